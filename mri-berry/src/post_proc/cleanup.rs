//! 基于连通域的后验清理.

use log::debug;
use ndarray::{s, Array3, Array4, ArrayView1, ArrayView4, Axis, RemoveAxis, Zip};

use super::components::largest_component;
use crate::labels::TopologyClasses;

cfg_if::cfg_if! {
    if #[cfg(feature = "rayon")] {
        /// 并行地由每个体素的通道向量求出一个值.
        pub(super) fn map_lanes<T, F>(post: ArrayView4<f32>, op: F) -> Array3<T>
        where
            T: Send + Default + Clone,
            F: Fn(ArrayView1<f32>) -> T + Sync + Send,
        {
            let (a, b, c, _) = post.dim();
            let mut out = Array3::<T>::default((a, b, c));
            Zip::from(&mut out)
                .and(post.lanes(Axis(3)))
                .par_for_each(|v, lane| *v = op(lane));
            out
        }
    } else {
        /// 由每个体素的通道向量求出一个值.
        pub(super) fn map_lanes<T, F>(post: ArrayView4<f32>, op: F) -> Array3<T>
        where
            T: Default + Clone,
            F: Fn(ArrayView1<f32>) -> T,
        {
            let (a, b, c, _) = post.dim();
            let mut out = Array3::<T>::default((a, b, c));
            Zip::from(&mut out)
                .and(post.lanes(Axis(3)))
                .for_each(|v, lane| *v = op(lane));
            out
        }
    }
}

/// 第一阶段清理.
///
/// 前景通道 (第 1 个通道起) 概率和大于 `threshold` 的体素构成前景掩膜,
/// 只保留其最大 6-连通域, 域外所有前景通道置零. 背景通道不变.
pub fn keep_largest_foreground(post: &mut Array4<f32>, threshold: f32) {
    let mask = map_lanes(post.view(), |lane| lane.slice(s![1..]).sum() > threshold);
    let keep = largest_component(mask.view());
    Zip::from(post.lanes_mut(Axis(3)))
        .and(&keep)
        .for_each(|mut lane, &k| {
            if !k {
                lane.slice_mut(s![1..]).fill(0.0);
            }
        });
}

/// 第二阶段清理.
///
/// 对每个拓扑类别 (背景类别除外), 取该类别所有通道 "概率大于 `threshold`"
/// 掩膜的并集, 只保留其最大 6-连通域, 域外该类别的所有通道置零.
///
/// 各通道的掩膜在清理开始前一次性求出.
pub fn keep_largest_per_topology(post: &mut Array4<f32>, classes: &TopologyClasses, threshold: f32) {
    debug_assert_eq!(post.len_of(Axis(3)), classes.ids().len());
    let masks = post.mapv(|v| v > threshold);
    for (class, positions) in classes.groups() {
        let mut union = Array3::<bool>::from_elem(masks.raw_dim().remove_axis(Axis(3)), false);
        Zip::from(&mut union)
            .and(masks.lanes(Axis(3)))
            .for_each(|u, lane| *u = positions.iter().any(|&p| lane[p]));
        let keep = largest_component(union.view());
        for &p in positions.iter() {
            Zip::from(post.index_axis_mut(Axis(3), p))
                .and(&keep)
                .for_each(|v, &k| {
                    if !k {
                        *v = 0.0;
                    }
                });
        }
        debug!("topology class {class}: {} channel(s) cleaned", positions.len());
    }
}

/// 快速模式: 不高于 `floor` 的前景通道概率直接置零.
pub fn suppress_weak(post: &mut Array4<f32>, floor: f32) {
    post.slice_mut(s![.., .., .., 1..])
        .mapv_inplace(|v| if v > floor { v } else { 0.0 });
}
