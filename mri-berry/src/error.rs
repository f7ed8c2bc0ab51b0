//! 运行时错误.
//!
//! 每一类错误对应一个处理阶段. 单例处理中出现的错误统一汇入 [`ItemProcessingError`],
//! 由批处理驱动记录后跳过该输入; 启动阶段的错误 ([`SetupError`]) 会中止整批任务.

use std::path::PathBuf;

use thiserror::Error;

use crate::Idx3d;

/// 标签目录构建错误.
#[derive(Debug, Error)]
pub enum CatalogError {
    /// 标签在解剖表中不存在.
    #[error("label {0} is not present in the anatomy table")]
    UnknownLabel(i32),

    /// 左右半球标签数目不同, 无法配对.
    #[error("cannot pair hemispheres: {left} left labels vs {right} right labels")]
    UnpairedSides {
        /// 左半球标签数.
        left: usize,
        /// 右半球标签数.
        right: usize,
    },

    /// 目录为空.
    #[error("label list is empty")]
    Empty,

    /// 拓扑类别表没有覆盖某个标签.
    #[error("label {0} has no topology class")]
    MissingTopologyClass(i32),

    /// 拓扑类别表两列长度不一致.
    #[error("topology table has {labels} labels but {classes} classes")]
    TopologyLength {
        /// 标签列长度.
        labels: usize,
        /// 类别列长度.
        classes: usize,
    },

    /// 查找表 (LUT) 某一行无法解析.
    #[error("malformed lookup table line {line}: {content:?}")]
    MalformedLut {
        /// 行号 (从 1 开始).
        line: usize,
        /// 原始内容.
        content: String,
    },

    /// 读取 `.npy` 标签列表失败.
    #[error("cannot read label list {path}: {source}")]
    Npy {
        /// 文件路径.
        path: PathBuf,
        /// 底层错误.
        #[source]
        source: ndarray_npy::ReadNpyError,
    },

    /// 读取查找表失败.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// 配置冲突或不合法.
#[derive(Debug, Error)]
pub enum ConfigConflictError {
    /// 同时指定了显式裁剪与自动裁剪.
    #[error("`crop` and `autocrop` cannot be used together")]
    CropWithAutocrop,

    /// 裁剪尺寸包含 0.
    #[error("crop size must be positive, got {0:?}")]
    ZeroCrop([usize; 3]),

    /// 目标体素间距不为正.
    #[error("target spacing must be positive, got {0}")]
    NonPositiveSpacing(f64),

    /// 网络层数过大.
    #[error("network depth {0} is too large")]
    DepthTooLarge(u32),

    /// 要求了分区或 QC 输出, 但没有提供对应的标签目录.
    #[error("{0} output requested but no {0} labels were provided")]
    MissingCatalog(&'static str),

    /// 输出路径与输入模式不匹配.
    #[error("invalid output {path}: {reason}")]
    OutputMismatch {
        /// 输出路径.
        path: PathBuf,
        /// 原因.
        reason: &'static str,
    },
}

/// 几何处理错误.
#[derive(Debug, Error)]
pub enum GeometryError {
    /// affine 不可逆.
    #[error("affine matrix is singular")]
    SingularAffine,

    /// affine 最后一行不是 `[0, 0, 0, 1]`.
    #[error("affine matrix is not homogeneous")]
    NotHomogeneous,

    /// 体数据维度不被支持.
    #[error("unsupported volume with {0} dimensions")]
    UnsupportedDimensions(usize),

    /// 体数据某一维为空.
    #[error("volume has an empty axis: {0:?}")]
    EmptyAxis(Vec<usize>),

    /// 自动裁剪时找不到前景体素.
    #[error("no foreground voxel found for bounding box crop")]
    EmptyForeground,

    /// 还原裁剪时没有给出背景值.
    #[error("no background value given for restoring a crop")]
    EmptyBackground,

    /// 形状不一致.
    #[error("shape mismatch: expected {expected:?}, found {found:?}")]
    ShapeMismatch {
        /// 期望形状.
        expected: Idx3d,
        /// 实际形状.
        found: Idx3d,
    },

    /// ndarray 形状错误.
    #[error(transparent)]
    Shape(#[from] ndarray::ShapeError),
}

/// 推理后端错误.
#[derive(Debug, Error)]
pub enum InferenceError {
    /// 后端内部错误.
    #[error("inference backend failed: {0}")]
    Backend(#[source] Box<dyn std::error::Error + Send + Sync>),

    /// 输出空间尺寸与输入不一致.
    #[error("prediction has spatial shape {found:?}, input was {expected:?}")]
    ShapeMismatch {
        /// 输入尺寸.
        expected: Idx3d,
        /// 输出尺寸.
        found: Idx3d,
    },

    /// 输出通道数与标签目录不一致.
    #[error("prediction has {found} channels, catalog has {expected} labels")]
    ChannelMismatch {
        /// 目录标签数.
        expected: usize,
        /// 输出通道数.
        found: usize,
    },

    /// 需要分区或 QC 输出, 但后端没有提供.
    #[error("model did not produce the `{0}` output")]
    MissingOutput(&'static str),
}

impl InferenceError {
    /// 将任意后端错误包装为 [`InferenceError::Backend`].
    pub fn backend<E>(err: E) -> Self
    where
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        Self::Backend(err.into())
    }
}

/// 体数据读写错误.
#[derive(Debug, Error)]
pub enum StoreError {
    /// nifti 读写失败.
    #[error(transparent)]
    Nifti(#[from] nifti::NiftiError),

    /// 读取 npz 失败.
    #[error(transparent)]
    ReadNpz(#[from] ndarray_npy::ReadNpzError),

    /// 写出 npz 失败.
    #[error(transparent)]
    WriteNpz(#[from] ndarray_npy::WriteNpzError),

    /// 不支持的文件格式.
    #[error("unsupported volume format: {0}")]
    Unsupported(PathBuf),

    /// 文件不存在 (内存存储).
    #[error("no volume stored at {0}")]
    Missing(PathBuf),

    /// header 中的几何信息不合法.
    #[error(transparent)]
    Geometry(#[from] GeometryError),

    /// IO 错误.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// 单个输入处理中出现的错误. 该错误被批处理驱动捕获并记录, 不会中止整批任务.
#[derive(Debug, Error)]
pub enum ItemProcessingError {
    /// 读取或写出体数据失败.
    #[error("volume I/O failed: {0}")]
    Store(#[from] StoreError),

    /// 几何处理失败.
    #[error("geometry failed: {0}")]
    Geometry(#[from] GeometryError),

    /// 推理失败.
    #[error("inference failed: {0}")]
    Inference(#[from] InferenceError),

    /// 写表失败.
    #[error("cannot write table {path}: {source}")]
    Table {
        /// 表路径.
        path: PathBuf,
        /// 底层错误.
        #[source]
        source: std::io::Error,
    },
}

/// 启动阶段错误, 会中止整批任务.
#[derive(Debug, Error)]
pub enum SetupError {
    /// 配置冲突.
    #[error(transparent)]
    Config(#[from] ConfigConflictError),

    /// 标签目录构建失败.
    #[error(transparent)]
    Catalog(#[from] CatalogError),

    /// 输入路径不存在.
    #[error("input {0} does not exist")]
    MissingInput(PathBuf),

    /// 输入文件扩展名不被支持.
    #[error("extension not supported for {0}, only use: nii.gz, .nii, .mgz, or .npz")]
    UnsupportedExtension(PathBuf),

    /// 输入目录中没有可处理的图像.
    #[error("no image found in {0}")]
    EmptyFolder(PathBuf),

    /// 列表文件中输入与输出条目数不一致.
    #[error("{inputs} inputs but {outputs} entries in {path}")]
    ListLength {
        /// 列表文件.
        path: PathBuf,
        /// 输入条目数.
        inputs: usize,
        /// 输出条目数.
        outputs: usize,
    },

    /// IO 错误 (创建目录, 写表头等).
    #[error("cannot prepare {path}: {source}")]
    Io {
        /// 出错路径.
        path: PathBuf,
        /// 底层错误.
        #[source]
        source: std::io::Error,
    },
}
