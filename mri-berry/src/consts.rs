//! 通用常量.

/// FreeSurfer 约定下的若干标签值.
pub mod freesurfer {
    /// 背景.
    pub const BACKGROUND: i32 = 0;

    /// 左侧大脑皮层.
    pub const LEFT_CORTEX: i32 = 3;

    /// 右侧大脑皮层.
    pub const RIGHT_CORTEX: i32 = 42;
}

/// 后处理阈值.
pub mod thresholds {
    /// 第一阶段清理: 前景通道概率和高于该值的体素参与连通域分析.
    pub const FOREGROUND_MASS: f32 = 0.25;

    /// 第二阶段清理: 单通道概率高于该值的体素参与拓扑类别连通域分析.
    pub const TOPOLOGY_CHANNEL: f32 = 0.25;

    /// 快速模式下, 不高于该值的前景通道概率被直接置零.
    pub const FAST_CHANNEL_FLOOR: f32 = 0.2;

    /// 归一化时概率和不超过该值即视为全零.
    pub const NORMALIZE_EPSILON: f32 = 1e-7;
}

/// 网络默认下采样层数. 输入空间尺寸必须是 `2^N_LEVELS` 的倍数.
pub const DEFAULT_N_LEVELS: u32 = 5;

/// 未指定裁剪尺寸时, 每个空间维度的最小填充尺寸.
pub const DEFAULT_MIN_PAD: usize = 128;

/// 默认目标体素间距, 以毫米为单位.
pub const DEFAULT_TARGET_SPACING: f64 = 1.0;

/// 体素间距落在 `[target - tol, target + tol]` 内即不再重采样.
pub const DEFAULT_RESAMPLE_TOLERANCE: f64 = 0.05;

/// 下采样前的抗混叠高斯核: `sigma = BLUR_SIGMA_SCALE / factor`.
pub const BLUR_SIGMA_SCALE: f64 = 0.25;

/// 高斯核截断半径 (以 sigma 为单位).
pub const GAUSSIAN_TRUNCATE: f64 = 4.0;

/// CT 强度裁剪区间 (HU).
pub const CT_CLIP_RANGE: (f32, f32) = (0.0, 80.0);

/// 强度重标定所用的百分位 (下界, 上界).
pub const RESCALE_PERCENTILES: (f64, f64) = (0.5, 99.5);

/// 体积表聚合列的名称.
pub const TOTAL_INTRACRANIAL: &str = "total intracranial";

/// 输出文件后缀.
pub mod suffix {
    /// 分割结果.
    pub const SEGMENTATION: &str = "synthseg";

    /// 后验概率.
    pub const POSTERIORS: &str = "posteriors";

    /// 重采样后的输入.
    pub const RESAMPLED: &str = "resampled";
}
