//! 分割任务配置.

use std::env;
use std::path::PathBuf;

use crate::consts::freesurfer::{LEFT_CORTEX, RIGHT_CORTEX};
use crate::consts::{
    DEFAULT_MIN_PAD, DEFAULT_N_LEVELS, DEFAULT_RESAMPLE_TOLERANCE, DEFAULT_TARGET_SPACING,
};
use crate::error::ConfigConflictError;
use crate::geometry::Interpolation;

/// 体积表中聚合列 (全颅内体积) 的处理方式.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum AggregateColumn {
    /// 不输出聚合列.
    Omitted,

    /// 输出聚合列, 并将其放在所有标签列之前.
    #[default]
    LastToFirst,
}

/// 一次分割任务的全部开关与参数. 启动时校验一次, 之后只读.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SegConfig {
    /// 快速模式: 关闭翻转增强, 先去除填充再做单阶段清理.
    pub fast: bool,

    /// 稳健模式. 蕴含快速模式.
    pub robust: bool,

    /// 是否进行皮层分区.
    pub parcellation: bool,

    /// 输入是否为 CT (强度先裁剪到 `[0, 80]`).
    pub ct: bool,

    /// 显式中心裁剪尺寸. 会被上取整到网络步长的倍数.
    pub crop: Option<[usize; 3]>,

    /// 是否按前景包围盒自动裁剪.
    pub autocrop: bool,

    /// 是否将分割结果重采样回原始网格.
    pub keep_geometry: bool,

    /// 目标 (各向同性) 体素间距, 毫米.
    pub target_spacing: f64,

    /// 间距容差, 落在容差内则不重采样.
    pub resample_tolerance: f64,

    /// 重采样插值方式.
    pub interpolation: Interpolation,

    /// 网络下采样层数.
    pub n_levels: u32,

    /// 未指定裁剪尺寸时的最小填充尺寸.
    pub min_pad: usize,

    /// 体积表聚合列.
    pub aggregate_column: AggregateColumn,

    /// 被分区替换的粗分割标签.
    pub cortex_labels: [i32; 2],
}

impl Default for SegConfig {
    fn default() -> Self {
        Self {
            fast: false,
            robust: false,
            parcellation: false,
            ct: false,
            crop: None,
            autocrop: false,
            keep_geometry: false,
            target_spacing: DEFAULT_TARGET_SPACING,
            resample_tolerance: DEFAULT_RESAMPLE_TOLERANCE,
            interpolation: Interpolation::Linear,
            n_levels: DEFAULT_N_LEVELS,
            min_pad: DEFAULT_MIN_PAD,
            aggregate_column: AggregateColumn::LastToFirst,
            cortex_labels: [LEFT_CORTEX, RIGHT_CORTEX],
        }
    }
}

impl SegConfig {
    /// 校验配置. 应在处理任何输入之前调用.
    pub fn validate(&self) -> Result<(), ConfigConflictError> {
        if self.crop.is_some() && self.autocrop {
            return Err(ConfigConflictError::CropWithAutocrop);
        }
        if let Some(c) = self.crop {
            if c.contains(&0) {
                return Err(ConfigConflictError::ZeroCrop(c));
            }
        }
        if !(self.target_spacing > 0.0) {
            return Err(ConfigConflictError::NonPositiveSpacing(self.target_spacing));
        }
        if self.n_levels >= usize::BITS / 2 {
            return Err(ConfigConflictError::DepthTooLarge(self.n_levels));
        }
        Ok(())
    }

    /// 设置快速模式.
    #[inline]
    pub fn with_fast(mut self, fast: bool) -> Self {
        self.fast = fast;
        self
    }

    /// 设置稳健模式.
    #[inline]
    pub fn with_robust(mut self, robust: bool) -> Self {
        self.robust = robust;
        self
    }

    /// 设置是否进行皮层分区.
    #[inline]
    pub fn with_parcellation(mut self, parcellation: bool) -> Self {
        self.parcellation = parcellation;
        self
    }

    /// 设置输入是否为 CT.
    #[inline]
    pub fn with_ct(mut self, ct: bool) -> Self {
        self.ct = ct;
        self
    }

    /// 设置显式中心裁剪尺寸.
    #[inline]
    pub fn with_crop(mut self, crop: [usize; 3]) -> Self {
        self.crop = Some(crop);
        self
    }

    /// 设置自动裁剪.
    #[inline]
    pub fn with_autocrop(mut self, autocrop: bool) -> Self {
        self.autocrop = autocrop;
        self
    }

    /// 设置是否还原到输入网格.
    #[inline]
    pub fn with_keep_geometry(mut self, keep: bool) -> Self {
        self.keep_geometry = keep;
        self
    }

    /// 设置目标体素间距与重采样插值方式.
    #[inline]
    pub fn with_resampling(mut self, spacing: f64, interpolation: Interpolation) -> Self {
        self.target_spacing = spacing;
        self.interpolation = interpolation;
        self
    }

    /// 设置体积表聚合列.
    #[inline]
    pub fn with_aggregate_column(mut self, aggregate: AggregateColumn) -> Self {
        self.aggregate_column = aggregate;
        self
    }

    /// 是否运行在快速路径上. 稳健模式蕴含快速模式.
    #[inline]
    pub fn is_fast(&self) -> bool {
        self.fast || self.robust
    }

    /// 是否启用左右翻转增强.
    #[inline]
    pub fn use_flip(&self) -> bool {
        !self.is_fast()
    }

    /// 网络要求的空间尺寸步长, 即 `2^n_levels`.
    #[inline]
    pub fn stride(&self) -> usize {
        1 << self.n_levels
    }

    /// 填充的最小目标尺寸.
    #[inline]
    pub fn min_pad_shape(&self) -> [usize; 3] {
        self.crop.unwrap_or([self.min_pad; 3])
    }
}

/// 获取 FreeSurfer 颜色查找表路径.
///
/// 1. 若环境变量 `$FREESURFER_HOME` 非空, 则返回 `$FREESURFER_HOME/FreeSurferColorLUT.txt`;
/// 2. 否则, 返回 `$HOME/freesurfer/FreeSurferColorLUT.txt`.
///
/// 不检查文件是否存在.
pub fn lut_path_from_env_or_home() -> Option<PathBuf> {
    let mut ans = match env::var("FREESURFER_HOME") {
        Ok(d) if !d.is_empty() => PathBuf::from(d),
        _ => {
            let mut h = dirs::home_dir()?;
            h.push("freesurfer");
            h
        }
    };
    ans.push("FreeSurferColorLUT.txt");
    Some(ans)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_valid() {
        let c = SegConfig::default();
        assert!(c.validate().is_ok());
        assert_eq!(c.stride(), 32);
        assert_eq!(c.min_pad_shape(), [128; 3]);
        assert!(c.use_flip());
    }

    #[test]
    fn test_robust_implies_fast() {
        let c = SegConfig {
            robust: true,
            ..SegConfig::default()
        };
        assert!(c.is_fast());
        assert!(!c.use_flip());
    }

    #[test]
    fn test_conflicts() {
        let c = SegConfig {
            crop: Some([160, 160, 160]),
            autocrop: true,
            ..SegConfig::default()
        };
        assert!(matches!(
            c.validate(),
            Err(ConfigConflictError::CropWithAutocrop)
        ));

        let c = SegConfig {
            crop: Some([160, 0, 160]),
            ..SegConfig::default()
        };
        assert!(matches!(c.validate(), Err(ConfigConflictError::ZeroCrop(_))));

        let c = SegConfig {
            target_spacing: 0.0,
            ..SegConfig::default()
        };
        assert!(matches!(
            c.validate(),
            Err(ConfigConflictError::NonPositiveSpacing(_))
        ));

        let c = SegConfig {
            target_spacing: f64::NAN,
            ..SegConfig::default()
        };
        assert!(c.validate().is_err());
    }

    #[test]
    fn test_builder() {
        let c = SegConfig::default()
            .with_robust(true)
            .with_crop([160; 3])
            .with_resampling(1.5, Interpolation::Nearest)
            .with_aggregate_column(AggregateColumn::Omitted);
        assert!(c.is_fast());
        assert_eq!(c.crop, Some([160; 3]));
        assert_eq!(c.target_spacing, 1.5);
        assert_eq!(c.interpolation, Interpolation::Nearest);
        assert!(c.validate().is_ok());
        assert!(c.with_autocrop(true).validate().is_err());
    }

    #[test]
    fn test_crop_drives_min_pad() {
        let c = SegConfig {
            crop: Some([96, 100, 64]),
            ..SegConfig::default()
        };
        assert_eq!(c.min_pad_shape(), [96, 100, 64]);
    }
}
