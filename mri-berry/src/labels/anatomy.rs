use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::Path;

use once_cell::sync::Lazy;

use crate::config::lut_path_from_env_or_home;
use crate::error::CatalogError;

/// 解剖结构所在半球.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Side {
    /// 中线结构或背景, 左右翻转后不变.
    Neutral,

    /// 左半球.
    Left,

    /// 右半球.
    Right,
}

impl Side {
    /// 由 FreeSurfer 风格的结构名推断半球.
    ///
    /// `Left-*`, `ctx-lh-*`, `wm-lh-*` 为左; `Right-*`, `ctx-rh-*`, `wm-rh-*` 为右; 其余为中线.
    pub fn from_name(name: &str) -> Self {
        const LEFT: [&str; 5] = ["Left-", "ctx-lh-", "ctx_lh_", "wm-lh-", "wm_lh_"];
        const RIGHT: [&str; 5] = ["Right-", "ctx-rh-", "ctx_rh_", "wm-rh-", "wm_rh_"];
        if LEFT.iter().any(|p| name.starts_with(p)) {
            Side::Left
        } else if RIGHT.iter().any(|p| name.starts_with(p)) {
            Side::Right
        } else {
            Side::Neutral
        }
    }
}

/// 单个解剖结构.
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Structure {
    /// 结构名.
    pub name: String,

    /// 所在半球.
    pub side: Side,
}

/// 标签值到解剖结构的映射表.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct AnatomyTable {
    entries: BTreeMap<i32, Structure>,
}

/// 分割网络使用的皮层下结构.
const SEGMENTATION_STRUCTURES: [(i32, &str); 33] = [
    (0, "background"),
    (2, "Left-Cerebral-White-Matter"),
    (3, "Left-Cerebral-Cortex"),
    (4, "Left-Lateral-Ventricle"),
    (5, "Left-Inf-Lat-Vent"),
    (7, "Left-Cerebellum-White-Matter"),
    (8, "Left-Cerebellum-Cortex"),
    (10, "Left-Thalamus"),
    (11, "Left-Caudate"),
    (12, "Left-Putamen"),
    (13, "Left-Pallidum"),
    (14, "3rd-Ventricle"),
    (15, "4th-Ventricle"),
    (16, "Brain-Stem"),
    (17, "Left-Hippocampus"),
    (18, "Left-Amygdala"),
    (24, "CSF"),
    (26, "Left-Accumbens-area"),
    (28, "Left-VentralDC"),
    (41, "Right-Cerebral-White-Matter"),
    (42, "Right-Cerebral-Cortex"),
    (43, "Right-Lateral-Ventricle"),
    (44, "Right-Inf-Lat-Vent"),
    (46, "Right-Cerebellum-White-Matter"),
    (47, "Right-Cerebellum-Cortex"),
    (49, "Right-Thalamus"),
    (50, "Right-Caudate"),
    (51, "Right-Putamen"),
    (52, "Right-Pallidum"),
    (53, "Right-Hippocampus"),
    (54, "Right-Amygdala"),
    (58, "Right-Accumbens-area"),
    (60, "Right-VentralDC"),
];

/// Desikan-Killiany 皮层分区, 左半球为 `1000 + i`, 右半球为 `2000 + i`.
const DK_PARCELS: [&str; 35] = [
    "bankssts",
    "caudalanteriorcingulate",
    "caudalmiddlefrontal",
    "corpuscallosum",
    "cuneus",
    "entorhinal",
    "fusiform",
    "inferiorparietal",
    "inferiortemporal",
    "isthmuscingulate",
    "lateraloccipital",
    "lateralorbitofrontal",
    "lingual",
    "medialorbitofrontal",
    "middletemporal",
    "parahippocampal",
    "paracentral",
    "parsopercularis",
    "parsorbitalis",
    "parstriangularis",
    "pericalcarine",
    "postcentral",
    "posteriorcingulate",
    "precentral",
    "precuneus",
    "rostralanteriorcingulate",
    "rostralmiddlefrontal",
    "superiorfrontal",
    "superiorparietal",
    "superiortemporal",
    "supramarginal",
    "frontalpole",
    "temporalpole",
    "transversetemporal",
    "insula",
];

static FREESURFER: Lazy<AnatomyTable> = Lazy::new(|| {
    let mut t = AnatomyTable::new();
    for (label, name) in SEGMENTATION_STRUCTURES {
        t.insert_named(label, name);
    }
    for (i, parcel) in DK_PARCELS.iter().enumerate() {
        let i = i as i32 + 1;
        t.insert_named(1000 + i, &format!("ctx-lh-{parcel}"));
        t.insert_named(2000 + i, &format!("ctx-rh-{parcel}"));
    }
    t
});

impl AnatomyTable {
    /// 空表.
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    /// 内置的 FreeSurfer 标签表, 覆盖分割网络的 33 个结构与 DK 皮层分区.
    #[inline]
    pub fn freesurfer() -> &'static AnatomyTable {
        &FREESURFER
    }

    /// 插入或覆盖一个条目.
    pub fn insert(&mut self, label: i32, name: &str, side: Side) -> &mut Self {
        self.entries.insert(
            label,
            Structure {
                name: name.to_string(),
                side,
            },
        );
        self
    }

    /// 插入条目, 半球由名称推断.
    #[inline]
    pub fn insert_named(&mut self, label: i32, name: &str) -> &mut Self {
        self.insert(label, name, Side::from_name(name))
    }

    /// 读取 FreeSurfer 颜色查找表文件 (`FreeSurferColorLUT.txt` 格式).
    pub fn from_lut_file<P: AsRef<Path>>(path: P) -> Result<Self, CatalogError> {
        let text = fs::read_to_string(path.as_ref())?;
        Self::from_lut_str(&text)
    }

    /// 读取 FreeSurfer 安装目录中的颜色查找表, 路径见 [`lut_path_from_env_or_home`].
    pub fn from_freesurfer_home() -> Result<Self, CatalogError> {
        let path = lut_path_from_env_or_home()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "home directory is unknown"))?;
        Self::from_lut_file(path)
    }

    /// 解析查找表文本. 每行为 `label name [R G B A]`, `#` 之后为注释, 空行忽略.
    pub fn from_lut_str(text: &str) -> Result<Self, CatalogError> {
        let mut t = Self::new();
        for (no, line) in text.lines().enumerate() {
            let content = line.split('#').next().unwrap_or("").trim();
            if content.is_empty() {
                continue;
            }
            let mut it = content.split_whitespace();
            let (Some(label), Some(name)) = (it.next(), it.next()) else {
                return Err(CatalogError::MalformedLut {
                    line: no + 1,
                    content: line.to_string(),
                });
            };
            let label = label.parse::<i32>().map_err(|_| CatalogError::MalformedLut {
                line: no + 1,
                content: line.to_string(),
            })?;
            t.insert_named(label, name);
        }
        Ok(t)
    }

    /// 查找标签.
    #[inline]
    pub fn get(&self, label: i32) -> Option<&Structure> {
        self.entries.get(&label)
    }

    /// 标签是否在表中?
    #[inline]
    pub fn contains(&self, label: i32) -> bool {
        self.entries.contains_key(&label)
    }

    /// 条目数.
    #[inline]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// 是否为空表?
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// 按标签升序迭代.
    pub fn iter(&self) -> impl Iterator<Item = (i32, &Structure)> {
        self.entries.iter().map(|(k, v)| (*k, v))
    }
}
