//! 体积积分与 QC 分数整理.

use ndarray::{ArrayView4, Axis};

use crate::config::AggregateColumn;
use crate::consts::TOTAL_INTRACRANIAL;
use crate::labels::LabelCatalog;

/// 体积表中的一列.
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct VolumeColumn {
    /// 标签值. 聚合列为全部标签最大值加一.
    pub label: i32,

    /// 结构名.
    pub name: String,
}

/// 单个结构的体积.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct StructureVolume {
    /// 标签值.
    pub label: i32,

    /// 结构名.
    pub name: String,

    /// 体积, 立方毫米, 保留 3 位小数.
    pub volume: f64,
}

/// 四舍五入到 `decimals` 位小数.
#[inline]
pub fn round_to(v: f64, decimals: i32) -> f64 {
    let m = 10f64.powi(decimals);
    (v * m).round() / m
}

/// 体积表的列, 顺序与每行数据一致:
///
/// 1. 聚合列 (`AggregateColumn::LastToFirst` 时). 其标签为最后一个 "合成" 标签,
///   写表时从末尾移到最前;
/// 2. 分割目录中除背景外的全部结构;
/// 3. 分区目录中除背景外的全部结构 (左半球在前).
pub fn volume_columns(
    seg: &LabelCatalog,
    parc: Option<&LabelCatalog>,
    aggregate: AggregateColumn,
) -> Vec<VolumeColumn> {
    let column = |c: &LabelCatalog, p: usize| VolumeColumn {
        label: c.label_at(p),
        name: c.name_at(p).to_string(),
    };
    let mut cols: Vec<VolumeColumn> = (1..seg.len()).map(|p| column(seg, p)).collect();
    if let Some(parc) = parc {
        cols.extend((1..parc.len()).map(|p| column(parc, p)));
    }
    if aggregate == AggregateColumn::LastToFirst {
        let max = parc
            .map_or(seg.max_label(), |p| p.max_label().max(seg.max_label()));
        cols.insert(
            0,
            VolumeColumn {
                label: max + 1,
                name: TOTAL_INTRACRANIAL.to_string(),
            },
        );
    }
    cols
}

/// 每个通道的概率和.
pub fn channel_sums(post: ArrayView4<f32>) -> Vec<f64> {
    post.axis_iter(Axis(3))
        .map(|ch| ch.iter().map(|&v| v as f64).sum())
        .collect()
}

/// 结构体积 (单位为体素数, 未乘体素体积) 的计算输入.
pub struct VolumeInputs<'a> {
    /// 归一化后的分割后验.
    pub segmentation: ArrayView4<'a, f32>,

    /// 分割目录.
    pub catalog: &'a LabelCatalog,

    /// 归一化后的分区后验与分区目录.
    pub parcellation: Option<(ArrayView4<'a, f32>, &'a LabelCatalog)>,

    /// 左右皮层标签.
    pub cortex: [i32; 2],
}

/// 计算全部结构体积 (立方毫米), 顺序与 [`volume_columns`] 一致.
///
/// 分区体积按半球重新缩放, 使每侧分区体积之和恰为该侧皮层体积.
pub fn structure_volumes(
    inputs: &VolumeInputs<'_>,
    voxel_volume: f64,
    aggregate: AggregateColumn,
) -> Vec<StructureVolume> {
    let catalog = inputs.catalog;
    let sums = channel_sums(inputs.segmentation);
    let mut raw: Vec<f64> = sums[1..].to_vec();

    if let Some((parc_post, parc)) = inputs.parcellation {
        let cortex_volume = |label: i32| {
            catalog
                .position_of(label)
                .filter(|&p| p > 0)
                .map_or(0.0, |p| sums[p])
        };
        let parc_sums = channel_sums(parc_post);
        let fg = &parc_sums[1..];
        let half = fg.len() / 2;
        let (left, right) = fg.split_at(half);
        for (side, cortex) in [(left, cortex_volume(inputs.cortex[0])), (right, cortex_volume(inputs.cortex[1]))] {
            let total: f64 = side.iter().sum();
            raw.extend(side.iter().map(|&v| if total > 0.0 { v / total * cortex } else { 0.0 }));
        }
        debug_assert_eq!(raw.len(), catalog.len() - 1 + parc.len() - 1);
    }

    if aggregate == AggregateColumn::LastToFirst {
        raw.insert(0, sums[1..].iter().sum());
    }

    let columns = volume_columns(catalog, inputs.parcellation.map(|(_, p)| p), aggregate);
    columns
        .into_iter()
        .zip(raw)
        .map(|(c, v)| StructureVolume {
            label: c.label,
            name: c.name,
            volume: round_to(v * voxel_volume, 3),
        })
        .collect()
}

/// 整理 QC 分数: 去掉背景对应的第一个分数, 截断到 `[0, 1]`, 保留 4 位小数.
pub fn summarize_qc(scores: &[f32]) -> Vec<f32> {
    scores
        .iter()
        .skip(1)
        .map(|&s| round_to(s.clamp(0.0, 1.0) as f64, 4) as f32)
        .collect()
}
