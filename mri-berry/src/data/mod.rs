use ndarray::{Array, ArrayView, ArrayViewMut, Dimension, Ix3, Ix4, IxDyn};

use crate::error::GeometryError;
use crate::Idx3d;

mod affine;

pub use affine::Affine;

/// 体数据: 前三维为空间维度的 ndarray, 加上体素到世界坐标的 affine.
///
/// 第四维 (若存在) 为通道. 空间维度任意一维为 0 的体数据是非法的.
#[derive(Debug, Clone, PartialEq)]
pub struct Volume<A, D: Dimension> {
    data: Array<A, D>,
    affine: Affine,
}

/// 单通道扫描, 强度以 `f32` 保存.
pub type ScanVolume = Volume<f32, Ix3>;

/// 标签体数据. 体素值为解剖标签.
pub type LabelVolume = Volume<i32, Ix3>;

/// 后验概率体数据, 以 `[i, j, k, channel]` 组织.
pub type PosteriorVolume = Volume<f32, Ix4>;

/// 刚从存储中读出的体数据, 维度未定 (3 维或带通道的 4/5 维).
pub type RawVolume = Volume<f32, IxDyn>;

/// 体素网格的共用属性和部分通用操作.
pub trait VoxelGeometry {
    /// 获取 affine.
    fn affine(&self) -> &Affine;

    /// 获取空间形状.
    fn spatial_shape(&self) -> Idx3d;

    /// 获取单个体素分辨率, 以毫米为单位, 顺序与体素轴一致.
    #[inline]
    fn pix_dim(&self) -> [f64; 3] {
        self.affine().spacing()
    }

    /// 获取体素的实际体积值, 以立方毫米为单位.
    #[inline]
    fn voxel(&self) -> f64 {
        self.pix_dim().iter().product()
    }

    /// 获取数据体素个数.
    #[inline]
    fn size(&self) -> usize {
        let (i, j, k) = self.spatial_shape();
        i * j * k
    }

    /// 体素分辨率是否都落在 `target ± tol` 内?
    #[inline]
    fn is_near_spacing(&self, target: f64, tol: f64) -> bool {
        self.pix_dim()
            .iter()
            .all(|s| (target - tol..=target + tol).contains(s))
    }
}

impl<A, D: Dimension> VoxelGeometry for Volume<A, D> {
    #[inline]
    fn affine(&self) -> &Affine {
        &self.affine
    }

    #[inline]
    fn spatial_shape(&self) -> Idx3d {
        let s = self.data.shape();
        (s[0], s[1], s[2])
    }
}

impl<A, D: Dimension> Volume<A, D> {
    /// 直接创建体数据. 数据至少要有 3 维, 且空间维度非空.
    pub fn new(data: Array<A, D>, affine: Affine) -> Result<Self, GeometryError> {
        let ndim = data.ndim();
        if !(3..=5).contains(&ndim) {
            return Err(GeometryError::UnsupportedDimensions(ndim));
        }
        if data.shape()[..3].contains(&0) {
            return Err(GeometryError::EmptyAxis(data.shape().to_vec()));
        }
        Ok(Self { data, affine })
    }

    /// 获得数据的一份不可变 shallow copy.
    #[inline]
    pub fn data(&self) -> ArrayView<'_, A, D> {
        self.data.view()
    }

    /// 获得数据的一份可变 shallow copy.
    #[inline]
    pub fn data_mut(&mut self) -> ArrayViewMut<'_, A, D> {
        self.data.view_mut()
    }

    /// 拆分为数据与 affine.
    #[inline]
    pub fn into_parts(self) -> (Array<A, D>, Affine) {
        (self.data, self.affine)
    }

    /// 通道数. 3 维数据视为单通道.
    #[inline]
    pub fn channels(&self) -> usize {
        self.data.shape()[3..].iter().product()
    }
}
