//! 皮层分区融合.

use ndarray::{Array3, Array4, Axis, Zip};

use super::decode::{decode_labels, normalize_posteriors};

/// 用分区后验细化粗分割中的皮层.
///
/// 1. 掩膜为 `seg` 中标签属于 `cortex` 的体素;
/// 2. 分区后验第 0 通道在掩膜外置 1, 掩膜内置 0, 之后逐体素重新归一化;
/// 3. 解码分区标签, 只替换掩膜内的体素.
///
/// `parc` 被原地改写为归一化后的分区后验 (供体积积分使用). 返回被替换的体素数.
pub fn blend_parcellation(
    seg: &mut Array3<i32>,
    parc: &mut Array4<f32>,
    parc_labels: &[i32],
    cortex: [i32; 2],
) -> usize {
    let mask = seg.mapv(|l| cortex.contains(&l));
    Zip::from(parc.index_axis_mut(Axis(3), 0))
        .and(&mask)
        .for_each(|v, &m| *v = if m { 0.0 } else { 1.0 });
    normalize_posteriors(parc);

    let fine = decode_labels(parc.view(), parc_labels);
    let mut replaced = 0;
    Zip::from(seg).and(&mask).and(&fine).for_each(|s, &m, &f| {
        if m {
            *s = f;
            replaced += 1;
        }
    });
    replaced
}
