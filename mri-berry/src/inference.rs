//! 推理接口.
//!
//! 本 crate 不包含任何网络实现. 使用者实现 [`SegmentationModel`] 接入推理后端,
//! [`SymmetricModel`] 在其外层提供左右翻转增强.

use ndarray::{s, Array4, ArrayView3, Axis, Zip};

use crate::error::InferenceError;
use crate::labels::FlipIndices;
use crate::Idx3d;

/// 一次推理的输出.
#[derive(Clone, Debug, PartialEq)]
pub struct Predictions {
    /// 分割后验, `[i, j, k, channel]`, 通道与分割标签目录一一对应. 不要求已归一化.
    pub segmentation: Array4<f32>,

    /// 皮层分区后验, 通道与分区标签目录一一对应.
    pub parcellation: Option<Array4<f32>>,

    /// 每个 QC 结构的质量分数. 第一个分数对应背景, 不输出.
    pub qc: Option<Vec<f32>>,
}

impl Predictions {
    /// 只有分割输出.
    #[inline]
    pub fn segmentation_only(segmentation: Array4<f32>) -> Self {
        Self {
            segmentation,
            parcellation: None,
            qc: None,
        }
    }

    /// 检查输出与输入尺寸, 通道数是否一致.
    pub fn check(
        &self,
        input: Idx3d,
        seg_channels: usize,
        parc_channels: Option<usize>,
    ) -> Result<(), InferenceError> {
        check_posteriors(&self.segmentation, input, seg_channels)?;
        if let Some(n) = parc_channels {
            let parc = self
                .parcellation
                .as_ref()
                .ok_or(InferenceError::MissingOutput("parcellation"))?;
            check_posteriors(parc, input, n)?;
        }
        Ok(())
    }
}

fn check_posteriors(post: &Array4<f32>, input: Idx3d, channels: usize) -> Result<(), InferenceError> {
    let (i, j, k, c) = post.dim();
    if (i, j, k) != input {
        return Err(InferenceError::ShapeMismatch {
            expected: input,
            found: (i, j, k),
        });
    }
    if c != channels {
        return Err(InferenceError::ChannelMismatch {
            expected: channels,
            found: c,
        });
    }
    Ok(())
}

/// 分割网络.
///
/// 输入是强度归一化到 `[0, 1]`, 空间尺寸为网络步长整数倍的单通道体数据;
/// 输出空间尺寸必须与输入一致.
pub trait SegmentationModel {
    /// 推理.
    fn predict(&self, image: ArrayView3<f32>) -> Result<Predictions, InferenceError>;
}

impl<M: SegmentationModel + ?Sized> SegmentationModel for &M {
    #[inline]
    fn predict(&self, image: ArrayView3<f32>) -> Result<Predictions, InferenceError> {
        (**self).predict(image)
    }
}

impl<M: SegmentationModel + ?Sized> SegmentationModel for Box<M> {
    #[inline]
    fn predict(&self, image: ArrayView3<f32>) -> Result<Predictions, InferenceError> {
        (**self).predict(image)
    }
}

/// 左右翻转增强.
///
/// 分别对原图和沿第一轴翻转的图推理, 将后者的输出翻转回来并按 [`FlipIndices`]
/// 交换左右通道, 再与前者逐元素取平均. 分区与 QC 输出取自未翻转的那次推理.
///
/// 第一轴应当是左右轴, 即输入已对齐到 RAS 方向.
pub struct SymmetricModel<'a, M> {
    inner: M,
    flip: &'a FlipIndices,
}

impl<'a, M> SymmetricModel<'a, M> {
    /// 包装 `inner`.
    #[inline]
    pub fn new(inner: M, flip: &'a FlipIndices) -> Self {
        Self { inner, flip }
    }
}

impl<M: SegmentationModel> SegmentationModel for SymmetricModel<'_, M> {
    fn predict(&self, image: ArrayView3<f32>) -> Result<Predictions, InferenceError> {
        let mut first = self.inner.predict(image)?;

        let flipped = image.slice(s![..;-1, .., ..]).as_standard_layout().into_owned();
        let second = self.inner.predict(flipped.view())?;

        let mut back = second.segmentation;
        if back.dim() != first.segmentation.dim() {
            let (i, j, k, _) = back.dim();
            let (a, b, c, _) = first.segmentation.dim();
            return Err(InferenceError::ShapeMismatch {
                expected: (a, b, c),
                found: (i, j, k),
            });
        }
        let channels = first.segmentation.len_of(Axis(3));
        if self.flip.len() != channels {
            return Err(InferenceError::ChannelMismatch {
                expected: self.flip.len(),
                found: channels,
            });
        }
        back.invert_axis(Axis(0));

        let flip = self.flip.as_slice();
        Zip::from(first.segmentation.lanes_mut(Axis(3)))
            .and(back.lanes(Axis(3)))
            .for_each(|mut out, mirrored| {
                for (i, v) in out.iter_mut().enumerate() {
                    *v = 0.5 * (*v + mirrored[flip[i]]);
                }
            });
        Ok(first)
    }
}
