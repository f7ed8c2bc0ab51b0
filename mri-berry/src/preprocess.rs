//! 网络输入预处理.
//!
//! 顺序: 通道合并 -> 各向同性重采样 -> 方向对齐 -> (显式) 中心裁剪 -> 强度归一化
//! -> (自动) 包围盒裁剪 -> 填充到网络步长. 所有几何变化都记录在 [`GeometryTrace`] 中,
//! 后处理据此把网络输出还原到输入网格.

use log::{debug, info};
use ndarray::{Array3, Axis, Ix3};
use ordered_float::OrderedFloat;

use crate::config::SegConfig;
use crate::consts::{CT_CLIP_RANGE, RESCALE_PERCENTILES};
use crate::data::{Affine, RawVolume, ScanVolume, Volume, VoxelGeometry};
use crate::error::GeometryError;
use crate::geometry::{canonicalize, resample_isotropic};
use crate::shape::{self, round_up_to_multiple, CropMode, CropPadRecord};
use crate::Idx3d;

/// 预处理过程中的几何变化.
#[derive(Clone, Debug, PartialEq)]
pub struct GeometryTrace {
    /// 输入网格的 affine.
    pub native_affine: Affine,

    /// 输入网格的空间形状.
    pub native_shape: Idx3d,

    /// 重采样并对齐后 (裁剪前) 网格的 affine.
    pub canonical_affine: Affine,

    /// 重采样并对齐后 (裁剪前) 网格的形状.
    pub canonical_shape: Idx3d,

    /// 裁剪与填充记录.
    pub record: CropPadRecord,
}

impl GeometryTrace {
    /// 工作网格的体素分辨率 (毫米).
    #[inline]
    pub fn resolution(&self) -> [f64; 3] {
        self.canonical_affine.spacing()
    }

    /// 工作网格单个体素的体积 (立方毫米).
    #[inline]
    pub fn voxel_volume(&self) -> f64 {
        self.resolution().iter().product()
    }
}

/// 预处理结果.
#[derive(Clone, Debug)]
pub struct Prepared {
    /// 网络输入: 强度在 `[0, 1]`, 空间尺寸为网络步长的整数倍.
    pub image: Array3<f32>,

    /// 几何变化记录.
    pub trace: GeometryTrace,

    /// 发生了重采样时, 重采样后 (输入方向, 未归一化) 的体数据.
    pub resampled: Option<ScanVolume>,
}

/// 将刚读出的体数据合并为单通道 3 维扫描.
///
/// 3 维原样返回; 4 维单通道去掉通道轴; 4 维多通道取通道平均;
/// 5 维且第 4 维长度为 1 的按 4 维处理; 其余维度报错.
pub fn reduce_channels(raw: RawVolume) -> Result<ScanVolume, GeometryError> {
    let (data, affine) = raw.into_parts();
    let data = match data.ndim() {
        5 if data.len_of(Axis(3)) == 1 => data.index_axis_move(Axis(3), 0),
        _ => data,
    };
    let data = match data.ndim() {
        3 => data,
        4 if data.len_of(Axis(3)) == 1 => data.index_axis_move(Axis(3), 0),
        4 => {
            info!("Detected more than 1 channel, we keep the average.");
            data.mean_axis(Axis(3))
                .ok_or_else(|| GeometryError::EmptyAxis(vec![0]))?
        }
        n => return Err(GeometryError::UnsupportedDimensions(n)),
    };
    let data = data.into_dimensionality::<Ix3>()?;
    Volume::new(data, affine)
}

/// `values` 的 `q` 百分位 (`0..=100`), 相邻秩之间线性插值.
///
/// `values` 会被部分重排. 为空时返回 0.
pub fn percentile(values: &mut [OrderedFloat<f32>], q: f64) -> f32 {
    if values.is_empty() {
        return 0.0;
    }
    let n = values.len();
    let rank = (q / 100.0).clamp(0.0, 1.0) * (n - 1) as f64;
    let lo = rank.floor() as usize;
    let frac = rank - lo as f64;

    let (_, lo_v, right) = values.select_nth_unstable(lo);
    let lo_v = lo_v.0 as f64;
    if frac == 0.0 || right.is_empty() {
        return lo_v as f32;
    }
    let hi_v = right.iter().min().map_or(lo_v, |v| v.0 as f64);
    (lo_v + frac * (hi_v - lo_v)) as f32
}

/// 以百分位估计稳健最小/最大值, 截断后线性映射到 `[0, 1]`. 常值图像映射为全零.
pub fn rescale_intensities(data: &mut Array3<f32>, min_percentile: f64, max_percentile: f64) {
    let mut values: Vec<OrderedFloat<f32>> = data.iter().map(|&v| OrderedFloat(v)).collect();
    let lo = percentile(&mut values, min_percentile);
    let hi = percentile(&mut values, max_percentile);
    debug!("robust intensity range [{lo}, {hi}]");
    if hi > lo {
        let range = hi - lo;
        data.mapv_inplace(|v| (v.clamp(lo, hi) - lo) / range);
    } else {
        data.fill(0.0);
    }
}

/// 强度归一化: CT 先截断到 `[0, 80]`, 然后稳健重标定到 `[0, 1]`.
pub fn normalize_intensities(data: &mut Array3<f32>, ct: bool) {
    if ct {
        let (lo, hi) = CT_CLIP_RANGE;
        data.mapv_inplace(|v| v.clamp(lo, hi));
    }
    let (lo, hi) = RESCALE_PERCENTILES;
    rescale_intensities(data, lo, hi);
}

/// 完整预处理.
pub fn preprocess(raw: RawVolume, config: &SegConfig) -> Result<Prepared, GeometryError> {
    let scan = reduce_channels(raw)?;
    let native_affine = *scan.affine();
    let native_shape = scan.spatial_shape();
    let needs_resampling = !scan.is_near_spacing(config.target_spacing, config.resample_tolerance);
    let (data, _) = scan.into_parts();

    let (data, affine, resampled) = if needs_resampling {
        debug!("resampling from {:?} mm", native_affine.spacing());
        let (data, affine) = resample_isotropic(
            data.view(),
            &native_affine,
            config.target_spacing,
            config.interpolation,
        )?;
        let resampled = Volume::new(data.clone(), affine)?;
        (data, affine, Some(resampled))
    } else {
        (data, native_affine, None)
    };

    let (data, affine) = canonicalize(data, &affine, &Affine::identity())?;
    let canonical_shape = data.dim();

    let stride = config.stride();
    let mut record = CropPadRecord::new();
    let mut data = data;
    if let Some(c) = config.crop {
        let target = c.map(|s| round_up_to_multiple(s, stride));
        let (cropped, step) = shape::crop(&data, CropMode::Center(target))?;
        record.push(step);
        data = cropped;
    }

    normalize_intensities(&mut data, config.ct);

    if config.autocrop && config.crop.is_none() {
        let (cropped, step) = shape::crop(&data, CropMode::BoundingBox { stride })?;
        debug!("autocrop to {:?}", step.indices());
        record.push(step);
        data = cropped;
    }

    let target = shape::pad_target(data.dim(), config.min_pad_shape(), stride);
    let (image, step) = shape::pad(data, target, 0.0);
    record.push(step);
    debug_assert!(shape::is_stride_aligned(image.view(), stride));

    Ok(Prepared {
        image,
        trace: GeometryTrace {
            native_affine,
            native_shape,
            canonical_affine: affine,
            canonical_shape,
            record,
        },
        resampled,
    })
}
