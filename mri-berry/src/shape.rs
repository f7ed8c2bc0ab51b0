//! 裁剪与填充.
//!
//! 每次裁剪或填充都会产生一条 [`ShapeStep`], 记录 "内容区域在较大数组中的位置".
//! 多条记录按发生顺序组成 [`CropPadRecord`], 逆序回放即可把网络输出还原到裁剪前的网格上.

use ndarray::{Array, ArrayView3, Axis, Dimension, IntoDimension, RemoveAxis, Slice};

use crate::error::GeometryError;
use crate::Idx3d;

/// 将 `n` 上取整到 `m` 的倍数.
#[inline]
pub fn round_up_to_multiple(n: usize, m: usize) -> usize {
    debug_assert!(m > 0);
    n.div_ceil(m) * m
}

/// 裁剪方式.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum CropMode {
    /// 以数组中心为中心, 裁剪到给定尺寸.
    Center([usize; 3]),

    /// 取正值体素的包围盒, 对称扩展到 `stride` 的倍数后裁剪.
    BoundingBox {
        /// 网络步长.
        stride: usize,
    },
}

/// 步骤类型.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum StepKind {
    /// 裁剪: 外部形状为裁剪前形状, 区域为保留部分.
    Crop,

    /// 填充: 外部形状为填充后形状, 区域为原内容所在位置.
    Pad,
}

/// 一次裁剪或填充.
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ShapeStep {
    kind: StepKind,
    outer: Idx3d,
    start: [usize; 3],
    end: [usize; 3],
}

impl ShapeStep {
    /// 步骤类型.
    #[inline]
    pub fn kind(&self) -> StepKind {
        self.kind
    }

    /// 较大数组的空间形状.
    #[inline]
    pub fn outer_shape(&self) -> Idx3d {
        self.outer
    }

    /// 内容区域, 按 `[start_0, start_1, start_2, end_0, end_1, end_2]` 排列.
    #[inline]
    pub fn indices(&self) -> [usize; 6] {
        let [a, b, c] = self.start;
        let [d, e, f] = self.end;
        [a, b, c, d, e, f]
    }

    /// 内容区域的空间形状.
    #[inline]
    pub fn inner_shape(&self) -> Idx3d {
        (
            self.end[0] - self.start[0],
            self.end[1] - self.start[1],
            self.end[2] - self.start[2],
        )
    }

    /// 是否什么都没做 (内容即全部).
    #[inline]
    pub fn is_identity(&self) -> bool {
        self.inner_shape() == self.outer
    }

    /// 截取内容区域.
    fn extract<A: Clone, D: Dimension>(&self, data: &Array<A, D>) -> Array<A, D> {
        data.slice_each_axis(|ax| {
            let i = ax.axis.index();
            if i < 3 {
                Slice::from(self.start[i]..self.end[i])
            } else {
                Slice::from(..)
            }
        })
        .to_owned()
    }

    /// 把 `data` 放回外部形状的画布中. 画布第 `c` 个通道用 `channels[c]` 填充,
    /// 没有对应值的通道 (以及单通道数据) 用 `fill` 填充.
    fn embed<A, D>(&self, data: &Array<A, D>, fill: &A, channels: &[A]) -> Array<A, D>
    where
        A: Clone,
        D: RemoveAxis,
    {
        let mut dim = data.raw_dim();
        let outer = [self.outer.0, self.outer.1, self.outer.2];
        dim.slice_mut()[..3].copy_from_slice(&outer);

        let mut canvas = Array::from_elem(dim, fill.clone());
        if data.ndim() > 3 {
            let last = Axis(data.ndim() - 1);
            for (c, mut ch) in canvas.axis_iter_mut(last).enumerate() {
                ch.fill(channels.get(c).unwrap_or(fill).clone());
            }
        }
        canvas
            .slice_each_axis_mut(|ax| {
                let i = ax.axis.index();
                if i < 3 {
                    Slice::from(self.start[i]..self.end[i])
                } else {
                    Slice::from(..)
                }
            })
            .assign(data);
        canvas
    }
}

/// 按顺序记录的裁剪/填充步骤.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct CropPadRecord {
    steps: Vec<ShapeStep>,
}

impl CropPadRecord {
    /// 空记录.
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    /// 追加一步.
    #[inline]
    pub fn push(&mut self, step: ShapeStep) {
        self.steps.push(step);
    }

    /// 全部步骤.
    #[inline]
    pub fn steps(&self) -> &[ShapeStep] {
        &self.steps
    }

    /// 最后一次裁剪.
    pub fn last_crop(&self) -> Option<&ShapeStep> {
        self.steps.iter().rev().find(|s| s.kind == StepKind::Crop)
    }

    /// 拆分为 (末尾连续的填充步骤之前的部分, 末尾连续的填充步骤).
    pub fn split_trailing_pads(&self) -> (CropPadRecord, CropPadRecord) {
        let cut = self
            .steps
            .iter()
            .rposition(|s| s.kind != StepKind::Pad)
            .map_or(0, |p| p + 1);
        (
            CropPadRecord {
                steps: self.steps[..cut].to_vec(),
            },
            CropPadRecord {
                steps: self.steps[cut..].to_vec(),
            },
        )
    }

    /// 逆序回放, 把 `data` 还原到第一步之前的空间形状.
    ///
    /// 撤销填充时截取内容区域; 撤销裁剪时把内容放回画布, 画布第 `c` 个通道填充
    /// `background[c]` (单通道数据只使用 `background[0]`).
    ///
    /// `background` 为空时返回 [`GeometryError::EmptyBackground`].
    pub fn restore<A, D>(
        &self,
        data: Array<A, D>,
        background: &[A],
    ) -> Result<Array<A, D>, GeometryError>
    where
        A: Clone,
        D: RemoveAxis,
    {
        let fill = background.first().ok_or(GeometryError::EmptyBackground)?;
        let mut data = data;
        for step in self.steps.iter().rev() {
            data = match step.kind {
                StepKind::Pad => step.extract(&data),
                StepKind::Crop => step.embed(&data, fill, background),
            };
        }
        Ok(data)
    }
}

#[inline]
fn shape3<A, D: Dimension>(data: &Array<A, D>) -> [usize; 3] {
    let s = data.shape();
    [s[0], s[1], s[2]]
}

/// 按 `mode` 裁剪空间前三维.
///
/// 中心裁剪: 起点 `max((n - s) / 2, 0)`, 终点 `min(起点 + s, n)`, 即不足的轴保持原样.
///
/// 包围盒裁剪只对单通道数据有意义; 没有正值体素时返回 [`GeometryError::EmptyForeground`].
pub fn crop<A, D>(
    data: &Array<A, D>,
    mode: CropMode,
) -> Result<(Array<A, D>, ShapeStep), GeometryError>
where
    A: Clone + PartialOrd + num::Zero,
    D: Dimension,
{
    let n = shape3(data);
    let (start, end) = match mode {
        CropMode::Center(target) => {
            let mut start = [0; 3];
            let mut end = [0; 3];
            for i in 0..3 {
                start[i] = n[i].saturating_sub(target[i]) / 2;
                end[i] = (start[i] + target[i]).min(n[i]);
            }
            (start, end)
        }
        CropMode::BoundingBox { stride } => {
            let (lo, hi) = positive_bounds(data).ok_or(GeometryError::EmptyForeground)?;
            let mut start = [0; 3];
            let mut end = [0; 3];
            for i in 0..3 {
                let extent = hi[i] - lo[i] + 2;
                let size = round_up_to_multiple(extent, stride);
                start[i] = lo[i].saturating_sub((size - extent) / 2);
                end[i] = (start[i] + size).min(n[i]);
            }
            (start, end)
        }
    };
    let step = ShapeStep {
        kind: StepKind::Crop,
        outer: (n[0], n[1], n[2]),
        start,
        end,
    };
    let out = step.extract(data);
    Ok((out, step))
}

/// 正值体素在前三维上的包围盒 (闭区间).
fn positive_bounds<A, D>(data: &Array<A, D>) -> Option<([usize; 3], [usize; 3])>
where
    A: PartialOrd + num::Zero,
    D: Dimension,
{
    let zero = A::zero();
    let mut lo = [usize::MAX; 3];
    let mut hi = [0; 3];
    let mut found = false;
    for (idx, v) in data.indexed_iter() {
        if *v > zero {
            found = true;
            let idx = idx.into_dimension();
            let idx = idx.slice();
            for i in 0..3 {
                lo[i] = lo[i].min(idx[i]);
                hi[i] = hi[i].max(idx[i]);
            }
        }
    }
    found.then_some((lo, hi))
}

/// 居中填充到 `target` (只要有任何一轴需要填充).
///
/// 各轴前侧填充 `floor((t - n) / 2)`, 后侧填充 `ceil((t - n) / 2)`, 不足零的记为零.
/// 所有轴都不需要填充时, 数据原样返回, 记录为恒等步骤.
pub fn pad<A, D>(data: Array<A, D>, target: [usize; 3], value: A) -> (Array<A, D>, ShapeStep)
where
    A: Clone,
    D: RemoveAxis,
{
    let n = shape3(&data);
    if (0..3).all(|i| target[i] <= n[i]) {
        let step = ShapeStep {
            kind: StepKind::Pad,
            outer: (n[0], n[1], n[2]),
            start: [0; 3],
            end: n,
        };
        return (data, step);
    }
    let mut start = [0; 3];
    let mut outer = [0; 3];
    for i in 0..3 {
        let diff = target[i].saturating_sub(n[i]);
        start[i] = diff / 2;
        outer[i] = n[i] + diff;
    }
    let end = [start[0] + n[0], start[1] + n[1], start[2] + n[2]];
    let step = ShapeStep {
        kind: StepKind::Pad,
        outer: (outer[0], outer[1], outer[2]),
        start,
        end,
    };
    let out = step.embed(&data, &value, &[]);
    (out, step)
}

/// 填充的目标尺寸: 每一轴取 `ceil_m(n)` 与 `ceil_m(min_pad)` 中较大者.
pub fn pad_target(shape: Idx3d, min_pad: [usize; 3], stride: usize) -> [usize; 3] {
    let n = [shape.0, shape.1, shape.2];
    [0, 1, 2].map(|i| {
        round_up_to_multiple(n[i], stride).max(round_up_to_multiple(min_pad[i], stride))
    })
}

/// 检查空间形状是否都是 `stride` 的倍数.
pub fn is_stride_aligned(data: ArrayView3<f32>, stride: usize) -> bool {
    data.shape().iter().all(|n| n % stride == 0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{Array3, Array4};

    #[test]
    fn test_round_up() {
        assert_eq!(round_up_to_multiple(64, 32), 64);
        assert_eq!(round_up_to_multiple(65, 32), 96);
        assert_eq!(round_up_to_multiple(1, 32), 32);
        assert_eq!(round_up_to_multiple(0, 32), 0);
    }

    #[test]
    fn test_center_crop_indices() {
        let data = Array3::<f32>::zeros((100, 100, 100));
        let (out, step) = crop(&data, CropMode::Center([64, 64, 64])).unwrap();
        assert_eq!(out.dim(), (64, 64, 64));
        assert_eq!(step.indices(), [18, 18, 18, 82, 82, 82]);
    }

    #[test]
    fn test_center_crop_smaller_axis_kept() {
        let data = Array3::<f32>::zeros((50, 100, 70));
        let (out, step) = crop(&data, CropMode::Center([64, 64, 64])).unwrap();
        assert_eq!(out.dim(), (50, 64, 64));
        assert_eq!(step.indices(), [0, 18, 3, 50, 82, 67]);
    }

    #[test]
    fn test_bbox_crop() {
        let mut data = Array3::<f32>::zeros((100, 80, 60));
        data[(40, 30, 20)] = 1.0;
        data[(49, 39, 29)] = 1.0;
        let (out, step) = crop(&data, CropMode::BoundingBox { stride: 32 }).unwrap();
        // 范围 9 + 2 = 11 -> 32, 前侧扩展 (32 - 11) / 2 = 10.
        assert_eq!(step.indices(), [30, 20, 10, 62, 52, 42]);
        assert_eq!(out.dim(), (32, 32, 32));

        let empty = Array3::<f32>::zeros((10, 10, 10));
        assert!(matches!(
            crop(&empty, CropMode::BoundingBox { stride: 32 }),
            Err(GeometryError::EmptyForeground)
        ));
    }

    #[test]
    fn test_bbox_crop_clamped() {
        let mut data = Array3::<f32>::zeros((40, 40, 40));
        data[(1, 1, 1)] = 1.0;
        data[(38, 38, 38)] = 1.0;
        let (out, step) = crop(&data, CropMode::BoundingBox { stride: 32 }).unwrap();
        assert_eq!(step.indices(), [0, 0, 0, 40, 40, 40]);
        assert_eq!(out.dim(), (40, 40, 40));
    }

    #[test]
    fn test_bbox_crop_clamped_at_high_edge() {
        let mut data = Array3::<f32>::zeros((100, 80, 60));
        data[(95, 70, 50)] = 1.0;
        data[(98, 75, 58)] = 1.0;
        let (out, step) = crop(&data, CropMode::BoundingBox { stride: 32 }).unwrap();
        // 第 0 轴: 范围 3 + 2 = 5 -> 32, 起点 95 - 13 = 82, 终点截断到 100.
        // 第 1 轴: 范围 5 + 2 = 7 -> 32, 起点 70 - 12 = 58, 终点截断到 80.
        // 第 2 轴: 范围 8 + 2 = 10 -> 32, 起点 50 - 11 = 39, 终点截断到 60.
        assert_eq!(step.indices(), [82, 58, 39, 100, 80, 60]);
        assert_eq!(out.dim(), (18, 22, 21));
        assert_eq!(out[(16, 17, 19)], 1.0);
        assert_eq!(out.sum(), 2.0);

        let mut record = CropPadRecord::new();
        record.push(step);
        assert_eq!(record.restore(out, &[0.0]).unwrap(), data);
    }

    #[test]
    fn test_pad_margins() {
        let data = Array3::<f32>::ones((30, 64, 33));
        let target = pad_target((30, 64, 33), [32, 32, 32], 32);
        assert_eq!(target, [32, 64, 64]);
        let (out, step) = pad(data, target, 0.0);
        assert_eq!(out.dim(), (32, 64, 64));
        assert_eq!(step.indices(), [1, 0, 15, 31, 64, 48]);
        assert_eq!(out[(0, 0, 0)], 0.0);
        assert_eq!(out[(1, 0, 15)], 1.0);
        assert_eq!(out.sum(), (30 * 64 * 33) as f32);
    }

    #[test]
    fn test_pad_noop() {
        let data = Array3::<f32>::ones((64, 64, 64));
        let (out, step) = pad(data.clone(), [32, 64, 64], 0.0);
        assert_eq!(out, data);
        assert!(step.is_identity());
    }

    #[test]
    fn test_restore_round_trip() {
        let data = Array3::from_shape_fn((50, 70, 40), |(i, j, k)| (i + j + k) as f32 + 1.0);
        let mut record = CropPadRecord::new();
        let (cropped, step) = crop(&data, CropMode::Center([32, 64, 64])).unwrap();
        record.push(step.clone());
        let (padded, pstep) = pad(cropped, [64, 64, 64], 0.0);
        record.push(pstep);
        assert_eq!(padded.dim(), (64, 64, 64));

        let restored = record.restore(padded, &[0.0]).unwrap();
        assert_eq!(restored.dim(), data.dim());
        let [s0, s1, s2, e0, e1, e2] = step.indices();
        for ((i, j, k), v) in restored.indexed_iter() {
            let inside = (s0..e0).contains(&i) && (s1..e1).contains(&j) && (s2..e2).contains(&k);
            if inside {
                assert_eq!(*v, data[(i, j, k)]);
            } else {
                assert_eq!(*v, 0.0);
            }
        }
    }

    #[test]
    fn test_restore_multichannel_background() {
        let mut record = CropPadRecord::new();
        let data = Array4::<f32>::zeros((6, 6, 6, 3));
        let (cropped, step) = crop(&data, CropMode::Center([2, 2, 2])).unwrap();
        record.push(step);
        let cropped = cropped.mapv(|_| 0.5);
        let restored = record.restore(cropped.clone(), &[1.0, 0.0, 0.0]).unwrap();
        assert_eq!(restored.dim(), (6, 6, 6, 3));
        assert_eq!(restored[(0, 0, 0, 0)], 1.0);
        assert_eq!(restored[(0, 0, 0, 1)], 0.0);
        assert_eq!(restored[(2, 2, 2, 1)], 0.5);

        assert!(matches!(
            record.restore(cropped, &[]),
            Err(GeometryError::EmptyBackground)
        ));
    }

    #[test]
    fn test_split_trailing_pads() {
        let mut record = CropPadRecord::new();
        let data = Array3::<f32>::ones((40, 40, 40));
        let (c, s) = crop(&data, CropMode::Center([32, 32, 32])).unwrap();
        record.push(s);
        let (_, p) = pad(c, [64, 64, 64], 0.0);
        record.push(p);
        let (head, tail) = record.split_trailing_pads();
        assert_eq!(head.steps().len(), 1);
        assert_eq!(tail.steps().len(), 1);
        assert_eq!(tail.steps()[0].kind(), StepKind::Pad);
        assert!(record.last_crop().is_some());
    }
}
