//! 输入与输出路径解析.
//!
//! 输入只可能是三种之一: 单个图像, 图像目录, 或每行一个路径的列表文件.
//! 启动时解析一次, 之后每个输入的输出路径都由 [`OutputPlan`] 直接给出.

use std::fs;
use std::path::{Path, PathBuf};

use itertools::Itertools;
use log::warn;

use crate::consts::suffix;
use crate::error::{ConfigConflictError, SetupError};

/// 支持的图像扩展名.
const IMAGE_EXTENSIONS: [&str; 4] = [".nii.gz", ".nii", ".mgz", ".npz"];

/// 路径的文件名部分.
fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// 路径是否带有图像扩展名?
pub fn is_image_path<P: AsRef<Path>>(path: P) -> bool {
    let name = file_name(path.as_ref());
    IMAGE_EXTENSIONS.iter().any(|e| name.ends_with(e))
}

#[inline]
fn is_list_path(path: &Path) -> bool {
    file_name(path).ends_with(".txt")
}

/// 受试者编号: 去掉图像扩展名后的文件名.
pub fn subject_id<P: AsRef<Path>>(path: P) -> String {
    let name = file_name(path.as_ref());
    IMAGE_EXTENSIONS
        .iter()
        .find_map(|e| name.strip_suffix(e))
        .unwrap_or(&name)
        .to_string()
}

/// 在图像文件名的扩展名前插入 `_{suffix}`, 例如 `a.nii.gz` -> `a_synthseg.nii.gz`.
pub fn suffixed_name(image: &Path, suffix: &str) -> String {
    let name = file_name(image);
    match IMAGE_EXTENSIONS.iter().find_map(|e| name.strip_suffix(e).map(|s| (s, e))) {
        Some((stem, ext)) => format!("{stem}_{suffix}{ext}"),
        None => format!("{name}_{suffix}"),
    }
}

/// 读取列表文件, 去掉空行.
fn read_list(path: &Path) -> Result<Vec<PathBuf>, SetupError> {
    let text = fs::read_to_string(path).map_err(|source| SetupError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(text
        .lines()
        .map(str::trim_end)
        .filter(|l| !l.is_empty())
        .map(PathBuf::from)
        .collect())
}

/// 输入.
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum InputSpec {
    /// 单个图像.
    Single(PathBuf),

    /// 图像目录, 其中的图像按文件名排序.
    Folder {
        /// 目录.
        dir: PathBuf,
        /// 目录中的图像.
        images: Vec<PathBuf>,
    },

    /// 列表文件.
    ListFile {
        /// 列表文件本身.
        path: PathBuf,
        /// 其中列出的图像.
        images: Vec<PathBuf>,
    },
}

impl InputSpec {
    /// 由路径判断输入类型: `.txt` 为列表文件, 带图像扩展名的为单个图像, 其余视为目录.
    pub fn resolve<P: AsRef<Path>>(path: P) -> Result<Self, SetupError> {
        let path = path.as_ref();
        if is_list_path(path) {
            if !path.is_file() {
                return Err(SetupError::MissingInput(path.to_path_buf()));
            }
            let images = read_list(path)?;
            return Ok(Self::ListFile {
                path: path.to_path_buf(),
                images,
            });
        }
        if is_image_path(path) {
            if !path.is_file() {
                return Err(SetupError::MissingInput(path.to_path_buf()));
            }
            return Ok(Self::Single(path.to_path_buf()));
        }
        if path.is_file() {
            return Err(SetupError::UnsupportedExtension(path.to_path_buf()));
        }
        if !path.is_dir() {
            return Err(SetupError::MissingInput(path.to_path_buf()));
        }
        let entries = fs::read_dir(path).map_err(|source| SetupError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let images: Vec<PathBuf> = entries
            .filter_map(|e| e.ok().map(|e| e.path()))
            .filter(|p| p.is_file() && is_image_path(p))
            .sorted()
            .collect();
        if images.is_empty() {
            return Err(SetupError::EmptyFolder(path.to_path_buf()));
        }
        Ok(Self::Folder {
            dir: path.to_path_buf(),
            images,
        })
    }

    /// 全部输入图像.
    pub fn images(&self) -> &[PathBuf] {
        match self {
            Self::Single(p) => std::slice::from_ref(p),
            Self::Folder { images, .. } | Self::ListFile { images, .. } => images,
        }
    }

    /// 输入图像个数.
    #[inline]
    pub fn len(&self) -> usize {
        self.images().len()
    }

    /// 是否没有输入?
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.images().is_empty()
    }
}

/// 使用者给出的输出路径 (尚未按输入类型解析).
#[derive(Clone, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct OutputRequest {
    /// 分割结果. 必需.
    pub segmentation: PathBuf,

    /// 后验概率.
    pub posteriors: Option<PathBuf>,

    /// 重采样后的输入.
    pub resampled: Option<PathBuf>,

    /// 体积表.
    pub volumes: Option<PathBuf>,

    /// QC 分数表.
    pub qc: Option<PathBuf>,
}

impl OutputRequest {
    /// 只要求分割结果.
    #[inline]
    pub fn new<P: Into<PathBuf>>(segmentation: P) -> Self {
        Self {
            segmentation: segmentation.into(),
            ..Self::default()
        }
    }
}

/// 单个输入的全部输出路径.
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ItemOutputs {
    /// 输入图像.
    pub image: PathBuf,

    /// 分割结果.
    pub segmentation: PathBuf,

    /// 后验概率.
    pub posteriors: Option<PathBuf>,

    /// 重采样后的输入.
    pub resampled: Option<PathBuf>,

    /// 体积表.
    pub volumes: Option<PathBuf>,

    /// QC 分数表.
    pub qc: Option<PathBuf>,
}

/// 输出计划: 每个输入的输出路径, 以及表格是否在输入之间共享.
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct OutputPlan {
    items: Vec<ItemOutputs>,
    shared_tables: bool,
}

/// 一类输出.
#[derive(Copy, Clone)]
enum Kind {
    Image(&'static str),
    Table,
}

impl OutputPlan {
    /// 按输入类型解析输出路径.
    ///
    /// - 列表文件: 每个输出也必须是列表文件, 且条目数与输入一致; 表格不共享.
    /// - 目录: 图像输出必须是目录; 表格为共享的 `.csv` (缺少扩展名时补上).
    /// - 单个图像: 图像输出可以是文件, 也可以是目录; 表格同上.
    pub fn resolve(input: &InputSpec, request: &OutputRequest) -> Result<Self, SetupError> {
        let resolve =
            |path: Option<&PathBuf>, kind| resolve_paths(input, path.map(PathBuf::as_path), kind);
        let seg = resolve(Some(&request.segmentation), Kind::Image(suffix::SEGMENTATION))?;
        let post = resolve(request.posteriors.as_ref(), Kind::Image(suffix::POSTERIORS))?;
        let res = resolve(request.resampled.as_ref(), Kind::Image(suffix::RESAMPLED))?;
        let vol = resolve(request.volumes.as_ref(), Kind::Table)?;
        let qc = resolve(request.qc.as_ref(), Kind::Table)?;

        let items = input
            .images()
            .iter()
            .zip(seg)
            .zip(post)
            .zip(res)
            .zip(vol)
            .zip(qc)
            .map(|(((((image, seg), post), res), vol), qc)| ItemOutputs {
                image: image.clone(),
                segmentation: seg.unwrap_or_default(),
                posteriors: post,
                resampled: res,
                volumes: vol,
                qc,
            })
            .collect();
        Ok(Self {
            items,
            shared_tables: !matches!(input, InputSpec::ListFile { .. }),
        })
    }

    /// 每个输入的输出.
    #[inline]
    pub fn items(&self) -> &[ItemOutputs] {
        &self.items
    }

    /// 体积表与 QC 表是否在输入之间共享?
    #[inline]
    pub fn shared_tables(&self) -> bool {
        self.shared_tables
    }

    /// 共享的体积表路径.
    pub fn shared_volumes(&self) -> Option<&Path> {
        self.shared_path(|it| it.volumes.as_deref())
    }

    /// 共享的 QC 表路径.
    pub fn shared_qc(&self) -> Option<&Path> {
        self.shared_path(|it| it.qc.as_deref())
    }

    fn shared_path<'a, F>(&'a self, get: F) -> Option<&'a Path>
    where
        F: Fn(&'a ItemOutputs) -> Option<&'a Path>,
    {
        if self.shared_tables {
            self.items.first().and_then(get)
        } else {
            None
        }
    }

    /// 创建全部输出所在目录.
    pub fn create_dirs(&self) -> Result<(), SetupError> {
        let dirs = self
            .items
            .iter()
            .flat_map(|it| {
                [
                    Some(&it.segmentation),
                    it.posteriors.as_ref(),
                    it.resampled.as_ref(),
                    it.volumes.as_ref(),
                    it.qc.as_ref(),
                ]
            })
            .flatten()
            .filter_map(|p| p.parent())
            .filter(|d| !d.as_os_str().is_empty())
            .unique();
        for dir in dirs {
            fs::create_dir_all(dir).map_err(|source| SetupError::Io {
                path: dir.to_path_buf(),
                source,
            })?;
        }
        Ok(())
    }
}

/// 解析一类输出在每个输入上的路径.
fn resolve_paths(
    input: &InputSpec,
    path: Option<&Path>,
    kind: Kind,
) -> Result<Vec<Option<PathBuf>>, SetupError> {
    let n = input.len();
    let Some(path) = path else {
        return Ok(vec![None; n]);
    };
    let mismatch = |reason| {
        SetupError::from(ConfigConflictError::OutputMismatch {
            path: path.to_path_buf(),
            reason,
        })
    };
    match (input, kind) {
        (InputSpec::ListFile { .. }, _) => {
            if !is_list_path(path) {
                return Err(mismatch("must be a text file when the input is a text file"));
            }
            let list = read_list(path)?;
            if list.len() != n {
                return Err(SetupError::ListLength {
                    path: path.to_path_buf(),
                    inputs: n,
                    outputs: list.len(),
                });
            }
            Ok(list.into_iter().map(Some).collect())
        }
        _ if is_list_path(path) => Err(mismatch(
            "can only be a text file when the input is a text file",
        )),
        (_, Kind::Table) => Ok(vec![Some(with_csv_extension(path)); n]),
        (InputSpec::Folder { images, .. }, Kind::Image(sfx)) => {
            if is_image_path(path) {
                return Err(mismatch("output folder has a file extension"));
            }
            Ok(images
                .iter()
                .map(|im| Some(path.join(suffixed_name(im, sfx))))
                .collect())
        }
        (InputSpec::Single(image), Kind::Image(sfx)) => {
            let out = if is_image_path(path) {
                path.to_path_buf()
            } else {
                path.join(suffixed_name(image, sfx))
            };
            Ok(vec![Some(out)])
        }
    }
}

/// 表格路径缺少 `.csv` 扩展名时补上.
fn with_csv_extension(path: &Path) -> PathBuf {
    if file_name(path).ends_with(".csv") {
        path.to_path_buf()
    } else {
        warn!(
            "{} provided without csv extension. Adding csv extension.",
            path.display()
        );
        let mut s = path.as_os_str().to_os_string();
        s.push(".csv");
        PathBuf::from(s)
    }
}
