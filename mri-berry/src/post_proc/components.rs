//! 三维二值掩膜的 6-连通域分析.

use std::collections::VecDeque;

use ndarray::{Array3, ArrayView3};

use crate::Idx3d;

/// 连通域标记结果.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Components {
    /// 每个体素所属连通域的编号, 背景为 0, 连通域从 1 开始按光栅顺序编号.
    pub ids: Array3<u32>,

    /// 第 `i` 个元素为编号 `i + 1` 的连通域体素数.
    pub sizes: Vec<usize>,
}

impl Components {
    /// 连通域个数.
    #[inline]
    pub fn len(&self) -> usize {
        self.sizes.len()
    }

    /// 是否没有任何前景?
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.sizes.is_empty()
    }

    /// 最大连通域的编号. 体素数相同时取编号较小者 (光栅顺序中先出现者).
    pub fn largest(&self) -> Option<u32> {
        let mut best: Option<(usize, usize)> = None;
        for (i, &n) in self.sizes.iter().enumerate() {
            if best.map_or(true, |(_, m)| n > m) {
                best = Some((i, n));
            }
        }
        best.map(|(i, _)| i as u32 + 1)
    }
}

/// 获取 `pos` 前后上下左右六个点的坐标. 越界的坐标会被过滤掉.
fn diamond_neighbours(shape: Idx3d, (z, h, w): Idx3d) -> impl Iterator<Item = Idx3d> {
    [
        (z.wrapping_sub(1), h, w),
        (z.saturating_add(1), h, w),
        (z, h.wrapping_sub(1), w),
        (z, h.saturating_add(1), w),
        (z, h, w.wrapping_sub(1)),
        (z, h, w.saturating_add(1)),
    ]
    .into_iter()
    .filter(move |&(a, b, c)| a < shape.0 && b < shape.1 && c < shape.2)
}

/// 按 6-相邻规则标记 `mask` 中的全部连通域.
pub fn label_components(mask: ArrayView3<bool>) -> Components {
    let shape = mask.dim();
    let mut ids = Array3::<u32>::zeros(shape);
    let mut sizes = Vec::new();
    let mut bfs_q = VecDeque::with_capacity(64);

    for (pos, &on) in mask.indexed_iter() {
        if !on || ids[pos] != 0 {
            continue;
        }
        let id = sizes.len() as u32 + 1;
        ids[pos] = id;
        bfs_q.push_back(pos);
        let mut size = 0;
        while let Some(cur) = bfs_q.pop_front() {
            size += 1;
            for nb in diamond_neighbours(shape, cur) {
                if mask[nb] && ids[nb] == 0 {
                    ids[nb] = id;
                    bfs_q.push_back(nb);
                }
            }
        }
        sizes.push(size);
    }
    Components { ids, sizes }
}

/// 只保留 `mask` 中最大的 6-连通域.
///
/// 没有任何前景时返回 `mask` 的拷贝.
pub fn largest_component(mask: ArrayView3<bool>) -> Array3<bool> {
    let comps = label_components(mask);
    match comps.largest() {
        Some(id) => comps.ids.mapv(|v| v == id),
        None => mask.to_owned(),
    }
}

/// `mask` 中 6-连通域的个数.
#[inline]
pub fn count_components(mask: ArrayView3<bool>) -> usize {
    label_components(mask).len()
}
