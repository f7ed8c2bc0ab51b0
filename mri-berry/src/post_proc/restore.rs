//! 将工作网格上的结果还原到输入网格.

use ndarray::{Array3, Array4, Axis};

use crate::consts::freesurfer::BACKGROUND;
use crate::error::GeometryError;
use crate::geometry::{canonicalize, resample_labels_onto};
use crate::preprocess::GeometryTrace;
use crate::shape::CropPadRecord;
use crate::{LabelVolume, PosteriorVolume, Volume};

/// 后验画布的背景: 第 0 通道为 1, 其余为 0.
fn background_posterior(channels: usize) -> Vec<f32> {
    let mut bg = vec![0.0; channels];
    if let Some(first) = bg.first_mut() {
        *first = 1.0;
    }
    bg
}

/// 撤销 `crops` 中的裁剪 (画布外填充背景), 再撤销方向对齐.
///
/// `keep_geometry` 时, 硬标签再以最近邻重采样到输入网格 (形状与 affine 均与输入一致);
/// 否则结果位于重采样后的网格上, 仅轴方向与输入一致.
pub fn restore_to_native(
    labels: Array3<i32>,
    posteriors: Array4<f32>,
    crops: &CropPadRecord,
    trace: &GeometryTrace,
    keep_geometry: bool,
) -> Result<(LabelVolume, PosteriorVolume), GeometryError> {
    let labels = crops.restore(labels, &[BACKGROUND])?;
    let bg = background_posterior(posteriors.len_of(Axis(3)));
    let posteriors = crops.restore(posteriors, &bg)?;

    let expected = trace.canonical_shape;
    if labels.dim() != expected {
        return Err(GeometryError::ShapeMismatch {
            expected,
            found: labels.dim(),
        });
    }

    let (labels, affine) = canonicalize(labels, &trace.canonical_affine, &trace.native_affine)?;
    let (posteriors, post_affine) =
        canonicalize(posteriors, &trace.canonical_affine, &trace.native_affine)?;

    let labels = if keep_geometry {
        let resampled = resample_labels_onto(
            labels.view(),
            &affine,
            trace.native_shape,
            &trace.native_affine,
            BACKGROUND,
        );
        Volume::new(resampled, trace.native_affine)?
    } else {
        Volume::new(labels, affine)?
    };
    Ok((labels, Volume::new(posteriors, post_affine)?))
}
