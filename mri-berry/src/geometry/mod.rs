//! 体数据几何: 方向对齐与各向同性重采样.
//!
//! 两者都同时变换数据与 affine, 保证每个体素的世界坐标语义不变.

mod orientation;
mod resample;

pub use orientation::{canonicalize, OrientationAxes};
pub use resample::{gaussian_smooth, resample_isotropic, resample_labels_onto, Interpolation};
