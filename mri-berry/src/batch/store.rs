//! 体数据读写.
//!
//! 批处理驱动只通过 [`VolumeStore`] 访问磁盘. [`NiftiStore`] 读写 `.nii` / `.nii.gz`,
//! 以及以 `vol_data` 为键的 `.npz`; [`MemoryStore`] 把所有体数据留在内存中.

use std::collections::HashMap;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};

use ndarray::{IxDyn, OwnedRepr};
use ndarray_npy::{NpzReader, NpzWriter};
use nifti::writer::WriterOptions;
use nifti::{IntoNdArray, NiftiHeader, NiftiObject, ReaderOptions};

use crate::data::{Affine, VoxelGeometry};
use crate::error::StoreError;
use crate::{LabelVolume, PosteriorVolume, RawVolume, ScanVolume, Volume};

/// npz 中体数据的键.
const NPZ_KEY: &str = "vol_data.npy";

/// 体数据存储.
pub trait VolumeStore {
    /// 读取一个输入扫描. 维度未定, 由预处理负责合并通道.
    fn load_scan(&self, path: &Path) -> Result<RawVolume, StoreError>;

    /// 写出硬标签.
    fn save_labels(&self, path: &Path, labels: &LabelVolume) -> Result<(), StoreError>;

    /// 写出后验概率.
    fn save_posteriors(&self, path: &Path, posteriors: &PosteriorVolume)
        -> Result<(), StoreError>;

    /// 写出重采样后的扫描.
    fn save_scan(&self, path: &Path, scan: &ScanVolume) -> Result<(), StoreError>;
}

impl<S: VolumeStore + ?Sized> VolumeStore for &S {
    #[inline]
    fn load_scan(&self, path: &Path) -> Result<RawVolume, StoreError> {
        (**self).load_scan(path)
    }

    #[inline]
    fn save_labels(&self, path: &Path, labels: &LabelVolume) -> Result<(), StoreError> {
        (**self).save_labels(path, labels)
    }

    #[inline]
    fn save_posteriors(
        &self,
        path: &Path,
        posteriors: &PosteriorVolume,
    ) -> Result<(), StoreError> {
        (**self).save_posteriors(path, posteriors)
    }

    #[inline]
    fn save_scan(&self, path: &Path, scan: &ScanVolume) -> Result<(), StoreError> {
        (**self).save_scan(path, scan)
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum Format {
    Nifti,
    Npz,
}

fn format_of(path: &Path) -> Result<Format, StoreError> {
    let name = path
        .file_name()
        .map(|s| s.to_string_lossy())
        .unwrap_or_default();
    if name.ends_with(".nii") || name.ends_with(".nii.gz") {
        Ok(Format::Nifti)
    } else if name.ends_with(".npz") {
        Ok(Format::Npz)
    } else {
        Err(StoreError::Unsupported(path.to_path_buf()))
    }
}

/// 由 nifti header 计算体素到世界坐标的 affine.
///
/// 优先使用 sform; 其次使用 qform 四元数; 都没有时退化为以 `pixdim` 为对角线的缩放.
pub fn header_affine(h: &NiftiHeader) -> [[f64; 4]; 4] {
    let last = [0.0, 0.0, 0.0, 1.0];
    if h.sform_code > 0 {
        let row = |r: [f32; 4]| r.map(f64::from);
        return [row(h.srow_x), row(h.srow_y), row(h.srow_z), last];
    }
    let [qfac, i, j, k] = [h.pixdim[0], h.pixdim[1], h.pixdim[2], h.pixdim[3]].map(f64::from);
    if h.qform_code <= 0 {
        return [
            [i, 0.0, 0.0, 0.0],
            [0.0, j, 0.0, 0.0],
            [0.0, 0.0, k, 0.0],
            last,
        ];
    }
    let [b, c, d] = [h.quatern_b, h.quatern_c, h.quatern_d].map(f64::from);
    let a = (1.0 - b * b - c * c - d * d).max(0.0).sqrt();
    let k = if qfac < 0.0 { -k } else { k };
    [
        [
            (a * a + b * b - c * c - d * d) * i,
            2.0 * (b * c - a * d) * j,
            2.0 * (b * d + a * c) * k,
            h.quatern_x as f64,
        ],
        [
            2.0 * (b * c + a * d) * i,
            (a * a + c * c - b * b - d * d) * j,
            2.0 * (c * d - a * b) * k,
            h.quatern_y as f64,
        ],
        [
            2.0 * (b * d - a * c) * i,
            2.0 * (c * d + a * b) * j,
            (a * a + d * d - c * c - b * b) * k,
            h.quatern_z as f64,
        ],
        last,
    ]
}

/// 以 `affine` 为 sform 的 header. 维度与数据类型由写出时的数组决定.
fn header_for(affine: &Affine) -> NiftiHeader {
    let rows = affine.to_rows();
    let [sx, sy, sz] = affine.spacing();
    let row = |r: [f64; 4]| r.map(|v| v as f32);
    let mut h = NiftiHeader::default();
    h.pixdim[0] = 1.0;
    h.pixdim[1] = sx as f32;
    h.pixdim[2] = sy as f32;
    h.pixdim[3] = sz as f32;
    h.srow_x = row(rows[0]);
    h.srow_y = row(rows[1]);
    h.srow_z = row(rows[2]);
    h.sform_code = 1;
    h.qform_code = 0;
    h
}

/// 磁盘存储.
#[derive(Copy, Clone, Debug, Default)]
pub struct NiftiStore;

impl NiftiStore {
    fn load_nifti(path: &Path) -> Result<RawVolume, StoreError> {
        let obj = ReaderOptions::new().read_file(path)?;
        let affine = Affine::from_rows(header_affine(obj.header()))?;
        let data = obj.into_volume().into_ndarray::<f32>()?;
        Ok(Volume::new(data, affine)?)
    }

    fn load_npz(path: &Path) -> Result<RawVolume, StoreError> {
        let mut npz = NpzReader::new(File::open(path)?)?;
        let data = match npz.by_name::<OwnedRepr<f32>, IxDyn>(NPZ_KEY) {
            Ok(data) => data,
            Err(_) => npz
                .by_name::<OwnedRepr<f64>, IxDyn>(NPZ_KEY)?
                .mapv(|v| v as f32),
        };
        Ok(Volume::new(data, Affine::identity())?)
    }
}

impl VolumeStore for NiftiStore {
    fn load_scan(&self, path: &Path) -> Result<RawVolume, StoreError> {
        if !path.is_file() {
            return Err(StoreError::Missing(path.to_path_buf()));
        }
        match format_of(path)? {
            Format::Nifti => Self::load_nifti(path),
            Format::Npz => Self::load_npz(path),
        }
    }

    fn save_labels(&self, path: &Path, labels: &LabelVolume) -> Result<(), StoreError> {
        match format_of(path)? {
            Format::Nifti => WriterOptions::new(path)
                .reference_header(&header_for(labels.affine()))
                .write_nifti(&labels.data())?,
            Format::Npz => {
                let mut npz = NpzWriter::new_compressed(File::create(path)?);
                npz.add_array(NPZ_KEY, &labels.data())?;
                npz.finish()?;
            }
        }
        Ok(())
    }

    fn save_posteriors(
        &self,
        path: &Path,
        posteriors: &PosteriorVolume,
    ) -> Result<(), StoreError> {
        match format_of(path)? {
            Format::Nifti => WriterOptions::new(path)
                .reference_header(&header_for(posteriors.affine()))
                .write_nifti(&posteriors.data())?,
            Format::Npz => {
                let mut npz = NpzWriter::new_compressed(File::create(path)?);
                npz.add_array(NPZ_KEY, &posteriors.data())?;
                npz.finish()?;
            }
        }
        Ok(())
    }

    fn save_scan(&self, path: &Path, scan: &ScanVolume) -> Result<(), StoreError> {
        match format_of(path)? {
            Format::Nifti => WriterOptions::new(path)
                .reference_header(&header_for(scan.affine()))
                .write_nifti(&scan.data())?,
            Format::Npz => {
                let mut npz = NpzWriter::new_compressed(File::create(path)?);
                npz.add_array(NPZ_KEY, &scan.data())?;
                npz.finish()?;
            }
        }
        Ok(())
    }
}

/// 内存中的一个条目.
#[derive(Clone, Debug, PartialEq)]
pub enum StoredVolume {
    /// 原始输入或重采样后的扫描.
    Scan(RawVolume),

    /// 硬标签.
    Labels(LabelVolume),

    /// 后验概率.
    Posteriors(PosteriorVolume),
}

/// 内存存储. 用于嵌入其他程序, 或在测试中代替磁盘.
#[derive(Debug, Default)]
pub struct MemoryStore {
    volumes: Mutex<HashMap<PathBuf, StoredVolume>>,
}

impl MemoryStore {
    /// 空存储.
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<PathBuf, StoredVolume>> {
        self.volumes.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// 放入一个输入扫描.
    pub fn insert_scan<P: Into<PathBuf>>(&self, path: P, scan: RawVolume) {
        self.lock().insert(path.into(), StoredVolume::Scan(scan));
    }

    /// 取出 `path` 处的条目.
    pub fn get<P: AsRef<Path>>(&self, path: P) -> Option<StoredVolume> {
        self.lock().get(path.as_ref()).cloned()
    }

    /// `path` 处是否有条目?
    pub fn contains<P: AsRef<Path>>(&self, path: P) -> bool {
        self.lock().contains_key(path.as_ref())
    }

    /// 条目个数.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// 是否为空?
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn put(&self, path: &Path, v: StoredVolume) {
        self.lock().insert(path.to_path_buf(), v);
    }
}

impl VolumeStore for MemoryStore {
    fn load_scan(&self, path: &Path) -> Result<RawVolume, StoreError> {
        match self.lock().get(path) {
            Some(StoredVolume::Scan(v)) => Ok(v.clone()),
            _ => Err(StoreError::Missing(path.to_path_buf())),
        }
    }

    fn save_labels(&self, path: &Path, labels: &LabelVolume) -> Result<(), StoreError> {
        self.put(path, StoredVolume::Labels(labels.clone()));
        Ok(())
    }

    fn save_posteriors(
        &self,
        path: &Path,
        posteriors: &PosteriorVolume,
    ) -> Result<(), StoreError> {
        self.put(path, StoredVolume::Posteriors(posteriors.clone()));
        Ok(())
    }

    fn save_scan(&self, path: &Path, scan: &ScanVolume) -> Result<(), StoreError> {
        let (data, affine) = scan.clone().into_parts();
        self.put(path, StoredVolume::Scan(Volume::new(data.into_dyn(), affine)?));
        Ok(())
    }
}
