//! 批处理驱动.
//!
//! 逐个顺序处理输入. 单个输入的任何错误都被记录下来, 然后继续处理下一个输入;
//! 只有启动阶段的错误会中止整批任务.

use std::path::{Path, PathBuf};

use itertools::Itertools;
use log::{debug, error, info};
use ndarray::ArrayView3;

use super::paths::{subject_id, ItemOutputs, OutputPlan};
use super::store::VolumeStore;
use super::table::{self, ValueFormat};
use crate::config::SegConfig;
use crate::error::{
    CatalogError, ConfigConflictError, InferenceError, ItemProcessingError, SetupError,
};
use crate::inference::{Predictions, SegmentationModel, SymmetricModel};
use crate::labels::{FlipIndices, LabelCatalog, TopologyClasses, TopologyTable};
use crate::post_proc::{PostProcessor, SegmentationResult};
use crate::preprocess::preprocess;

/// 整批任务共享的只读标签信息. 启动时构建一次.
#[derive(Clone, Debug)]
pub struct SegmentationContext {
    catalog: LabelCatalog,
    flip: Option<FlipIndices>,
    topology: TopologyClasses,
    parcellation: Option<LabelCatalog>,
    qc_names: Option<Vec<String>>,
}

impl SegmentationContext {
    /// 由分割标签目录与拓扑类别表构建.
    ///
    /// 翻转对应关系不在这里构建, 见 [`SegmentationContext::with_flip`].
    pub fn new(catalog: LabelCatalog, topology: &TopologyTable) -> Result<Self, CatalogError> {
        let topology = catalog.topology_classes(topology)?;
        Ok(Self {
            catalog,
            flip: None,
            topology,
            parcellation: None,
            qc_names: None,
        })
    }

    /// 构建并校验左右翻转对应关系. 只有启用翻转增强时才需要.
    pub fn with_flip(mut self) -> Result<Self, CatalogError> {
        if self.flip.is_none() {
            self.flip = Some(self.catalog.flip_correspondence()?);
        }
        Ok(self)
    }

    /// 追加皮层分区目录.
    pub fn with_parcellation(mut self, parcellation: LabelCatalog) -> Self {
        self.parcellation = Some(parcellation);
        self
    }

    /// 追加 QC 结构名 (不含背景), 顺序与网络输出的 QC 分数一致.
    pub fn with_qc_names<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.qc_names = Some(names.into_iter().map(Into::into).collect());
        self
    }

    /// 分割目录.
    #[inline]
    pub fn catalog(&self) -> &LabelCatalog {
        &self.catalog
    }

    /// 左右翻转对应关系. 未构建时为 `None`.
    #[inline]
    pub fn flip(&self) -> Option<&FlipIndices> {
        self.flip.as_ref()
    }

    /// 拓扑类别.
    #[inline]
    pub fn topology(&self) -> &TopologyClasses {
        &self.topology
    }

    /// 分区目录.
    #[inline]
    pub fn parcellation(&self) -> Option<&LabelCatalog> {
        self.parcellation.as_ref()
    }

    /// QC 结构名.
    #[inline]
    pub fn qc_names(&self) -> Option<&[String]> {
        self.qc_names.as_deref()
    }

    /// 按配置组装后处理器. 只有启用分区时才会使用分区目录.
    pub fn post_processor<'a>(&'a self, config: &'a SegConfig) -> PostProcessor<'a> {
        let pp = PostProcessor::new(&self.catalog, &self.topology, config);
        match (config.parcellation, &self.parcellation) {
            (true, Some(parc)) => pp.with_parcellation(parc),
            _ => pp,
        }
    }
}

/// 单个失败的输入.
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ItemFailure {
    /// 输入图像.
    pub image: PathBuf,

    /// 错误描述.
    pub error: String,
}

/// 整批任务的结果.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct BatchReport {
    /// 成功处理的输入.
    pub processed: Vec<PathBuf>,

    /// 失败的输入.
    pub failures: Vec<ItemFailure>,
}

impl BatchReport {
    /// 是否全部成功?
    #[inline]
    pub fn is_success(&self) -> bool {
        self.failures.is_empty()
    }

    /// 进程退出码: 有任何输入失败时为 1, 否则为 0.
    #[inline]
    pub fn exit_code(&self) -> i32 {
        if self.is_success() {
            0
        } else {
            1
        }
    }

    /// 失败的输入.
    pub fn failed_items(&self) -> impl Iterator<Item = &Path> {
        self.failures.iter().map(|f| f.image.as_path())
    }
}

/// 批处理驱动.
pub struct BatchDriver<M, S> {
    model: M,
    store: S,
    config: SegConfig,
    context: SegmentationContext,
}

impl<M: SegmentationModel, S: VolumeStore> BatchDriver<M, S> {
    /// 创建驱动. 配置在此处校验; 启用翻转增强时, 左右翻转对应关系也在此处构建.
    pub fn new(
        model: M,
        store: S,
        config: SegConfig,
        context: SegmentationContext,
    ) -> Result<Self, SetupError> {
        config.validate()?;
        if config.parcellation && context.parcellation.is_none() {
            return Err(ConfigConflictError::MissingCatalog("parcellation").into());
        }
        let context = if config.use_flip() {
            context.with_flip()?
        } else {
            context
        };
        Ok(Self {
            model,
            store,
            config,
            context,
        })
    }

    /// 配置.
    #[inline]
    pub fn config(&self) -> &SegConfig {
        &self.config
    }

    /// 标签信息.
    #[inline]
    pub fn context(&self) -> &SegmentationContext {
        &self.context
    }

    /// 处理 `plan` 中的全部输入.
    ///
    /// 先创建输出目录并写入共享表的表头, 之后逐个处理. 返回的 `Err` 只可能来自这一准备阶段.
    pub fn run(&self, plan: &OutputPlan) -> Result<BatchReport, SetupError> {
        let pp = self.context.post_processor(&self.config);
        let volume_names: Vec<String> = pp.volume_columns().into_iter().map(|c| c.name).collect();
        let wants_qc = plan.items().iter().any(|it| it.qc.is_some());
        let qc_names: &[String] = match self.context.qc_names() {
            Some(names) => names,
            None if wants_qc => return Err(ConfigConflictError::MissingCatalog("qc").into()),
            None => &[],
        };

        plan.create_dirs()?;
        let header_error = |path: &Path| {
            let path = path.to_path_buf();
            move |source| SetupError::Io { path, source }
        };
        if let Some(path) = plan.shared_volumes() {
            table::write_header(path, &volume_names).map_err(header_error(path))?;
        }
        if let Some(path) = plan.shared_qc() {
            table::write_header(path, qc_names).map_err(header_error(path))?;
        }

        let tables = Tables {
            shared: plan.shared_tables(),
            volume_names: &volume_names,
            qc_names,
        };
        let n = plan.items().len();
        let mut report = BatchReport::default();
        for (i, item) in plan.items().iter().enumerate() {
            info!("predicting {}/{}: {}", i + 1, n, item.image.display());
            match self.process_item(item, &pp, &tables) {
                Ok(()) => report.processed.push(item.image.clone()),
                Err(e) => {
                    error!("the following problem occurred with {}: {e}", item.image.display());
                    report.failures.push(ItemFailure {
                        image: item.image.clone(),
                        error: e.to_string(),
                    });
                }
            }
        }

        log_summary(plan, &report);
        Ok(report)
    }

    fn predict(&self, image: ArrayView3<f32>) -> Result<Predictions, InferenceError> {
        match self.context.flip() {
            Some(flip) if self.config.use_flip() => {
                SymmetricModel::new(&self.model, flip).predict(image)
            }
            _ => self.model.predict(image),
        }
    }

    fn process_item(
        &self,
        item: &ItemOutputs,
        pp: &PostProcessor<'_>,
        tables: &Tables<'_>,
    ) -> Result<(), ItemProcessingError> {
        let raw = self.store.load_scan(&item.image)?;
        let prepared = preprocess(raw, &self.config)?;
        if let Some(path) = &item.resampled {
            match &prepared.resampled {
                Some(scan) => self.store.save_scan(path, scan)?,
                None => debug!("{} needs no resampling", item.image.display()),
            }
        }

        let predictions = self.predict(prepared.image.view())?;
        pp.check(&predictions, prepared.image.dim())?;
        if item.qc.is_some() && predictions.qc.is_none() {
            return Err(InferenceError::MissingOutput("qc").into());
        }

        let result = pp.run(predictions, &prepared.trace)?;
        self.store.save_labels(&item.segmentation, &result.labels)?;
        if let Some(path) = &item.posteriors {
            self.store.save_posteriors(path, &result.posteriors)?;
        }
        tables.write(item, &result)
    }
}

/// 体积表与 QC 表的写出方式.
struct Tables<'a> {
    shared: bool,
    volume_names: &'a [String],
    qc_names: &'a [String],
}

impl Tables<'_> {
    fn write(&self, item: &ItemOutputs, result: &SegmentationResult) -> Result<(), ItemProcessingError> {
        let subject = subject_id(&item.image);
        if let Some(path) = &item.volumes {
            let values: Vec<f64> = result.volumes.iter().map(|v| v.volume).collect();
            self.write_row(path, self.volume_names, &subject, &values, ValueFormat::Shortest)?;
        }
        if let (Some(path), Some(qc)) = (&item.qc, &result.qc) {
            let values: Vec<f64> = qc.iter().map(|&q| q as f64).collect();
            self.write_row(path, self.qc_names, &subject, &values, ValueFormat::Fixed4)?;
        }
        Ok(())
    }

    fn write_row(
        &self,
        path: &Path,
        columns: &[String],
        subject: &str,
        values: &[f64],
        fmt: ValueFormat,
    ) -> Result<(), ItemProcessingError> {
        let written = if self.shared {
            table::append_row(path, subject, values, fmt)
        } else {
            table::write_single(path, columns, subject, values, fmt)
        };
        written.map_err(|source| ItemProcessingError::Table {
            path: path.to_path_buf(),
            source,
        })
    }
}

fn log_summary(plan: &OutputPlan, report: &BatchReport) {
    if report.is_success() {
        let n = report.processed.len();
        match plan.items() {
            [single] => info!("segmentation saved in: {}", single.segmentation.display()),
            items => {
                let dirs = items
                    .iter()
                    .filter_map(|it| it.segmentation.parent())
                    .map(Path::display)
                    .map(|d| d.to_string());
                info!(
                    "{n} segmentations saved in: {}",
                    dirs.unique().join(", ")
                );
            }
        }
        if let Some(path) = plan.shared_volumes() {
            info!("volumes saved in: {}", path.display());
        }
        if let Some(path) = plan.shared_qc() {
            info!("QC scores saved in: {}", path.display());
        }
    } else {
        error!(
            "{} of {} items failed:",
            report.failures.len(),
            plan.items().len()
        );
        for f in &report.failures {
            error!("  {}", f.image.display());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::batch::paths::{InputSpec, OutputRequest};
    use crate::batch::store::{MemoryStore, StoredVolume};
    use crate::data::{Affine, VoxelGeometry};
    use crate::labels::AnatomyTable;
    use crate::Volume;
    use log::LevelFilter;
    use ndarray::{Array4, ArrayD, IxDyn};
    use simple_logger::SimpleLogger;
    use std::cell::Cell;
    use std::fs;

    fn init_logger() {
        let _ = SimpleLogger::new().with_level(LevelFilter::Debug).init();
    }

    /// 强度 > 0.5 的体素分给左白质, 其余为背景. 第 `fail_on` 次调用失败.
    struct Thresholding {
        calls: Cell<usize>,
        fail_on: Option<usize>,
    }

    impl Thresholding {
        fn new(fail_on: Option<usize>) -> Self {
            Self {
                calls: Cell::new(0),
                fail_on,
            }
        }
    }

    impl SegmentationModel for Thresholding {
        fn predict(&self, image: ArrayView3<f32>) -> Result<Predictions, InferenceError> {
            let call = self.calls.get() + 1;
            self.calls.set(call);
            if self.fail_on == Some(call) {
                return Err(InferenceError::backend("device lost"));
            }
            let (a, b, c) = image.dim();
            let post = Array4::from_shape_fn((a, b, c, 5), |(i, j, k, ch)| {
                let fg = image[(i, j, k)] > 0.5;
                match ch {
                    0 if !fg => 1.0,
                    1 if fg => 1.0,
                    _ => 0.0,
                }
            });
            Ok(Predictions {
                segmentation: post,
                parcellation: None,
                qc: Some(vec![1.0, 0.87654]),
            })
        }
    }

    fn context() -> SegmentationContext {
        let catalog = LabelCatalog::build(&[0, 2, 3, 41, 42], AnatomyTable::freesurfer()).unwrap();
        let topology = TopologyTable::singletons(&catalog);
        SegmentationContext::new(catalog, &topology)
            .unwrap()
            .with_qc_names(["general white matter"])
    }

    /// 中心 8^3 的立方体为亮, 其余为暗.
    fn scan() -> crate::RawVolume {
        let data = ArrayD::from_shape_fn(IxDyn(&[24, 24, 24]), |i| {
            if (0..3).all(|a| (8..16).contains(&i[a])) {
                100.0
            } else {
                0.0
            }
        });
        Volume::new(data, Affine::identity()).unwrap()
    }

    fn fast_config() -> SegConfig {
        SegConfig {
            fast: true,
            min_pad: 32,
            ..SegConfig::default()
        }
    }

    #[test]
    fn test_failed_item_is_isolated() {
        init_logger();
        let dir = tempfile::tempdir().unwrap();
        let images: Vec<PathBuf> = ["a", "b", "c"]
            .iter()
            .map(|s| PathBuf::from(format!("/in/{s}.nii.gz")))
            .collect();
        let store = MemoryStore::new();
        for p in &images {
            store.insert_scan(p.clone(), scan());
        }
        let input = InputSpec::Folder {
            dir: PathBuf::from("/in"),
            images: images.clone(),
        };
        let out = dir.path().join("seg");
        let request = OutputRequest {
            volumes: Some(dir.path().join("volumes.csv")),
            qc: Some(dir.path().join("qc")),
            ..OutputRequest::new(&out)
        };
        let plan = OutputPlan::resolve(&input, &request).unwrap();

        let model = Thresholding::new(Some(2));
        let driver = BatchDriver::new(&model, &store, fast_config(), context()).unwrap();
        let report = driver.run(&plan).unwrap();

        assert_eq!(model.calls.get(), 3);
        assert_eq!(report.exit_code(), 1);
        assert_eq!(report.processed, vec![images[0].clone(), images[2].clone()]);
        assert_eq!(report.failed_items().collect::<Vec<_>>(), vec![images[1].as_path()]);
        assert!(report.failures[0].error.contains("device lost"));

        assert!(store.contains(out.join("a_synthseg.nii.gz")));
        assert!(!store.contains(out.join("b_synthseg.nii.gz")));
        assert!(store.contains(out.join("c_synthseg.nii.gz")));
        match store.get(out.join("a_synthseg.nii.gz")) {
            Some(StoredVolume::Labels(seg)) => {
                assert_eq!(seg.spatial_shape(), (24, 24, 24));
                assert_eq!(seg.data()[(12, 12, 12)], 2);
                assert_eq!(seg.data()[(2, 2, 2)], 0);
            }
            other => panic!("unexpected entry {other:?}"),
        }

        let volumes = fs::read_to_string(dir.path().join("volumes.csv")).unwrap();
        let lines: Vec<&str> = volumes.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[0].starts_with("subject,total intracranial,Left-Cerebral-White-Matter,"));
        assert!(lines[1].starts_with("a,512,512,0,"));
        assert!(lines[2].starts_with("c,"));

        let qc = fs::read_to_string(dir.path().join("qc.csv")).unwrap();
        assert_eq!(qc, "subject,general white matter\na,0.8765\nc,0.8765\n");
    }

    #[test]
    fn test_flip_augmentation_calls_model_twice() {
        let store = MemoryStore::new();
        let dir = tempfile::tempdir().unwrap();
        let image = PathBuf::from("/in/t1.nii");
        store.insert_scan(image.clone(), scan());
        let seg = dir.path().join("t1_seg.nii");
        let plan =
            OutputPlan::resolve(&InputSpec::Single(image), &OutputRequest::new(&seg)).unwrap();

        let model = Thresholding::new(None);
        let config = SegConfig {
            min_pad: 32,
            ..SegConfig::default()
        };
        let driver = BatchDriver::new(&model, &store, config, context()).unwrap();
        let report = driver.run(&plan).unwrap();
        assert_eq!(report.exit_code(), 0);
        assert_eq!(model.calls.get(), 2);
        assert!(store.contains(&seg));
    }

    #[test]
    fn test_missing_input_is_an_item_error() {
        let store = MemoryStore::new();
        let dir = tempfile::tempdir().unwrap();
        let input = InputSpec::Single(PathBuf::from("/in/absent.nii.gz"));
        let plan = OutputPlan::resolve(&input, &OutputRequest::new(dir.path())).unwrap();
        let model = Thresholding::new(None);
        let driver = BatchDriver::new(&model, &store, fast_config(), context()).unwrap();
        let report = driver.run(&plan).unwrap();
        assert_eq!(report.exit_code(), 1);
        assert_eq!(model.calls.get(), 0);
        assert!(store.is_empty());
    }

    #[test]
    fn test_setup_errors() {
        let store = MemoryStore::new();
        let config = SegConfig {
            parcellation: true,
            ..fast_config()
        };
        assert!(matches!(
            BatchDriver::new(Thresholding::new(None), &store, config, context()),
            Err(SetupError::Config(ConfigConflictError::MissingCatalog("parcellation")))
        ));

        let config = SegConfig {
            crop: Some([32; 3]),
            autocrop: true,
            ..fast_config()
        };
        assert!(matches!(
            BatchDriver::new(Thresholding::new(None), &store, config, context()),
            Err(SetupError::Config(ConfigConflictError::CropWithAutocrop))
        ));

        let catalog = LabelCatalog::build(&[0, 2], AnatomyTable::freesurfer()).unwrap();
        let topology = TopologyTable::singletons(&catalog);
        let ctx = SegmentationContext::new(catalog, &topology).unwrap();
        let driver = BatchDriver::new(Thresholding::new(None), &store, fast_config(), ctx).unwrap();
        let dir = tempfile::tempdir().unwrap();
        let input = InputSpec::Single(PathBuf::from("/in/x.nii"));
        let request = OutputRequest {
            qc: Some(dir.path().join("qc.csv")),
            ..OutputRequest::new(dir.path())
        };
        let plan = OutputPlan::resolve(&input, &request).unwrap();
        assert!(matches!(
            driver.run(&plan),
            Err(SetupError::Config(ConfigConflictError::MissingCatalog("qc")))
        ));
    }

    #[test]
    fn test_flip_pairs_only_needed_with_augmentation() {
        let store = MemoryStore::new();
        let unpaired = || {
            let catalog = LabelCatalog::build(&[0, 2], AnatomyTable::freesurfer()).unwrap();
            let topology = TopologyTable::singletons(&catalog);
            SegmentationContext::new(catalog, &topology).unwrap()
        };
        assert!(unpaired().flip().is_none());

        let robust = SegConfig {
            robust: true,
            min_pad: 32,
            ..SegConfig::default()
        };
        for config in [fast_config(), robust] {
            let driver =
                BatchDriver::new(Thresholding::new(None), &store, config, unpaired()).unwrap();
            assert!(driver.context().flip().is_none());
        }

        assert!(matches!(
            BatchDriver::new(Thresholding::new(None), &store, SegConfig::default(), unpaired()),
            Err(SetupError::Catalog(CatalogError::UnpairedSides { left: 1, right: 0 }))
        ));

        let driver = BatchDriver::new(
            Thresholding::new(None),
            &store,
            SegConfig::default(),
            context(),
        )
        .unwrap();
        assert_eq!(driver.context().flip().map(|f| f.len()), Some(5));
    }
}
