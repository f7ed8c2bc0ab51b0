//! 批量分割.
//!
//! [`InputSpec`] 与 [`OutputPlan`] 在启动时解析一次输入输出路径,
//! [`BatchDriver`] 逐个处理输入并隔离单个输入的失败.

mod driver;
mod paths;
mod store;
mod table;

pub use driver::{BatchDriver, BatchReport, ItemFailure, SegmentationContext};
pub use paths::{
    is_image_path, subject_id, suffixed_name, InputSpec, ItemOutputs, OutputPlan, OutputRequest,
};
pub use store::{header_affine, MemoryStore, NiftiStore, StoredVolume, VolumeStore};
pub use table::{append_row, write_header, write_single, ValueFormat};
