//! 后处理流程集合.
//!
//! 网络输出 -> 连通域清理 -> 归一化与解码 -> 皮层分区融合 -> 体积积分 -> 还原到输入网格.

mod cleanup;
mod components;
mod decode;
mod parcellation;
mod restore;
mod volumes;

use log::debug;

pub use cleanup::{keep_largest_foreground, keep_largest_per_topology, suppress_weak};
pub use components::{count_components, label_components, largest_component, Components};
pub use decode::{argmax_channels, decode_labels, normalize_posteriors};
pub use parcellation::blend_parcellation;
pub use restore::restore_to_native;
pub use volumes::{
    channel_sums, round_to, structure_volumes, summarize_qc, volume_columns, StructureVolume,
    VolumeColumn, VolumeInputs,
};

use crate::config::SegConfig;
use crate::consts::thresholds::{FAST_CHANNEL_FLOOR, FOREGROUND_MASS, TOPOLOGY_CHANNEL};
use crate::error::{GeometryError, InferenceError};
use crate::inference::Predictions;
use crate::labels::{LabelCatalog, TopologyClasses};
use crate::preprocess::GeometryTrace;
use crate::{Idx3d, LabelVolume, PosteriorVolume};

/// 单个输入的分割结果.
#[derive(Clone, Debug)]
pub struct SegmentationResult {
    /// 硬标签, 位于输入方向 (`keep_geometry` 时位于输入网格).
    pub labels: LabelVolume,

    /// 归一化后的分割后验, 与 `labels` 方向一致.
    pub posteriors: PosteriorVolume,

    /// 结构体积, 顺序与 [`PostProcessor::volume_columns`] 一致.
    pub volumes: Vec<StructureVolume>,

    /// 整理后的 QC 分数 (不含背景).
    pub qc: Option<Vec<f32>>,
}

/// 后处理器. 持有整批任务共享的只读目录与配置.
#[derive(Copy, Clone, Debug)]
pub struct PostProcessor<'a> {
    catalog: &'a LabelCatalog,
    topology: &'a TopologyClasses,
    parcellation: Option<&'a LabelCatalog>,
    config: &'a SegConfig,
}

impl<'a> PostProcessor<'a> {
    /// 只做分割的后处理器.
    #[inline]
    pub fn new(
        catalog: &'a LabelCatalog,
        topology: &'a TopologyClasses,
        config: &'a SegConfig,
    ) -> Self {
        Self {
            catalog,
            topology,
            parcellation: None,
            config,
        }
    }

    /// 追加皮层分区目录.
    #[inline]
    pub fn with_parcellation(mut self, parcellation: &'a LabelCatalog) -> Self {
        self.parcellation = Some(parcellation);
        self
    }

    /// 分割目录.
    #[inline]
    pub fn catalog(&self) -> &'a LabelCatalog {
        self.catalog
    }

    /// 分区目录.
    #[inline]
    pub fn parcellation(&self) -> Option<&'a LabelCatalog> {
        self.parcellation
    }

    /// 体积表的列.
    pub fn volume_columns(&self) -> Vec<VolumeColumn> {
        volume_columns(self.catalog, self.parcellation, self.config.aggregate_column)
    }

    /// 完整后处理.
    ///
    /// `predictions` 必须已经通过 [`Predictions::check`]. 快速模式先撤销填充再做单阶段清理,
    /// 完整模式在填充后的网格上做两阶段清理后再撤销填充.
    pub fn run(
        &self,
        predictions: Predictions,
        trace: &GeometryTrace,
    ) -> Result<SegmentationResult, GeometryError> {
        let Predictions {
            segmentation: mut post,
            parcellation,
            qc,
        } = predictions;
        let (crops, pads) = trace.record.split_trailing_pads();

        if self.config.is_fast() {
            post = pads.restore(post, &[1.0])?;
            keep_largest_foreground(&mut post, FOREGROUND_MASS);
            suppress_weak(&mut post, FAST_CHANNEL_FLOOR);
        } else {
            keep_largest_foreground(&mut post, FOREGROUND_MASS);
            keep_largest_per_topology(&mut post, self.topology, TOPOLOGY_CHANNEL);
            post = pads.restore(post, &[1.0])?;
        }

        normalize_posteriors(&mut post);
        let mut labels = decode_labels(post.view(), self.catalog.labels());

        let parc_post = match (self.parcellation, parcellation) {
            (Some(parc), Some(parc_post)) => {
                let mut parc_post = pads.restore(parc_post, &[1.0])?;
                let n = blend_parcellation(
                    &mut labels,
                    &mut parc_post,
                    parc.labels(),
                    self.config.cortex_labels,
                );
                debug!("{n} cortical voxels parcellated");
                Some((parc_post, parc))
            }
            _ => None,
        };

        let volumes = structure_volumes(
            &VolumeInputs {
                segmentation: post.view(),
                catalog: self.catalog,
                parcellation: parc_post.as_ref().map(|(p, c)| (p.view(), *c)),
                cortex: self.config.cortex_labels,
            },
            trace.voxel_volume(),
            self.config.aggregate_column,
        );

        let (labels, posteriors) =
            restore_to_native(labels, post, &crops, trace, self.config.keep_geometry)?;

        Ok(SegmentationResult {
            labels,
            posteriors,
            volumes,
            qc: qc.as_deref().map(summarize_qc),
        })
    }

    /// 检查网络输出是否与目录一致.
    pub fn check(&self, predictions: &Predictions, input: Idx3d) -> Result<(), InferenceError> {
        predictions.check(
            input,
            self.catalog.len(),
            self.parcellation.map(LabelCatalog::len),
        )
    }
}
