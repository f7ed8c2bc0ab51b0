//! 🍇欢迎光临🍓
//!
//! 涵盖了本 crate 一系列常用的功能.

pub use crate::Idx3d;

pub use crate::data::{
    Affine, LabelVolume, PosteriorVolume, RawVolume, ScanVolume, Volume, VoxelGeometry,
};

pub use crate::config::{AggregateColumn, SegConfig};
pub use crate::error::{
    CatalogError, ConfigConflictError, GeometryError, InferenceError, ItemProcessingError,
    SetupError, StoreError,
};

pub use crate::geometry::{canonicalize, resample_isotropic, Interpolation, OrientationAxes};
pub use crate::shape::{CropMode, CropPadRecord};

pub use crate::labels::{AnatomyTable, LabelCatalog, Side, TopologyClasses, TopologyTable};

pub use crate::inference::{Predictions, SegmentationModel, SymmetricModel};
pub use crate::post_proc::{PostProcessor, SegmentationResult};
pub use crate::preprocess::{preprocess, Prepared};

pub use crate::batch::{
    BatchDriver, BatchReport, InputSpec, NiftiStore, OutputPlan, OutputRequest,
    SegmentationContext, VolumeStore,
};
