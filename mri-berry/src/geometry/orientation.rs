use ndarray::{Array, Axis, Dimension};

use crate::data::Affine;
use crate::error::GeometryError;

/// 体素轴与世界坐标轴的对应关系.
///
/// `axes()[j]` 是与世界轴 `j` (R, A, S) 最接近平行的体素轴.
/// 三个值互不相同, 构成 `{0, 1, 2}` 的一个排列.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct OrientationAxes([usize; 3]);

impl OrientationAxes {
    /// 由 affine 推断.
    ///
    /// 对逆矩阵的第 `j` 列取绝对值最大的行, 即为世界轴 `j` 对应的体素轴.
    /// 若多个世界轴选中同一个体素轴 (斜切扫描时可能出现), 则按编号从小到大依次处理未被选中的体素轴:
    /// 将出现次数最多的体素轴的最后一次出现改为该轴.
    pub fn from_affine(affine: &Affine) -> Self {
        let inv = affine.inverse();
        let m = inv.matrix();

        let mut axes = [0usize; 3];
        for (j, slot) in axes.iter_mut().enumerate() {
            // 并列时取编号最小的行.
            let mut best = 0;
            for i in 1..3 {
                if m[(i, j)].abs() > m[(best, j)].abs() {
                    best = i;
                }
            }
            *slot = best;
        }
        for missing in 0..3 {
            if axes.contains(&missing) {
                continue;
            }
            let count = |v: usize| axes.iter().filter(|&&a| a == v).count();
            let mut dup = 0;
            for v in 1..3 {
                if count(v) > count(dup) {
                    dup = v;
                }
            }
            if let Some(pos) = axes.iter().rposition(|&a| a == dup) {
                axes[pos] = missing;
            }
        }
        Self(axes)
    }

    /// 世界轴到体素轴的映射.
    #[inline]
    pub fn axes(&self) -> [usize; 3] {
        self.0
    }
}

/// 将体数据 (及其 affine) 的轴置换、翻转, 使其方向与 `reference` 一致.
///
/// 只改变体素存储顺序, 不改变任何体素的世界坐标. 前三维以外的维度 (通道) 保持不变.
/// 交换 `affine` 与 `reference` 再调用一次即可精确还原.
///
/// # 返回值
///
/// 对齐后的数据 (标准内存布局) 与新 affine.
pub fn canonicalize<A, D>(
    data: Array<A, D>,
    affine: &Affine,
    reference: &Affine,
) -> Result<(Array<A, D>, Affine), GeometryError>
where
    A: Clone,
    D: Dimension,
{
    if data.ndim() < 3 {
        return Err(GeometryError::UnsupportedDimensions(data.ndim()));
    }
    let flo = OrientationAxes::from_affine(affine).axes();
    let target = OrientationAxes::from_affine(reference).axes();

    // 新第 k 个体素轴取自原第 perm[k] 个体素轴.
    let mut perm3 = [0, 1, 2];
    for j in 0..3 {
        perm3[target[j]] = flo[j];
    }
    let mut perm: Vec<usize> = (0..data.ndim()).collect();
    perm[..3].copy_from_slice(&perm3);

    let mut aff = affine.permute_columns(perm3);
    let mut data = data.into_dyn().permuted_axes(perm.as_slice());

    for i in 0..3 {
        let dot = aff.column(i).dot(&reference.column(i));
        if dot < 0.0 {
            let len = data.len_of(Axis(i));
            data.invert_axis(Axis(i));
            aff = aff.flip_axis(i, len);
        }
    }

    let data = if data.is_standard_layout() {
        data
    } else {
        data.as_standard_layout().into_owned()
    };
    Ok((data.into_dimensionality::<D>()?, aff))
}
