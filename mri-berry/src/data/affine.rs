//! 体素坐标到世界坐标 (RAS, 毫米) 的仿射变换.

use nalgebra::{Matrix3, Matrix4, Vector3, Vector4};

use crate::error::GeometryError;

/// 4x4 齐次仿射矩阵. 构造时保证可逆且最后一行为 `[0, 0, 0, 1]`.
///
/// 第 `j` 列 (`j < 3`) 是体素轴 `j` 上步进一个体素时的世界坐标位移,
/// 第 4 列是体素 `(0, 0, 0)` 的世界坐标.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct Affine(Matrix4<f64>);

impl Default for Affine {
    fn default() -> Self {
        Self::identity()
    }
}

impl Affine {
    /// 从矩阵构造. 矩阵必须齐次且可逆.
    pub fn new(m: Matrix4<f64>) -> Result<Self, GeometryError> {
        if m[(3, 0)] != 0.0 || m[(3, 1)] != 0.0 || m[(3, 2)] != 0.0 || m[(3, 3)] != 1.0 {
            return Err(GeometryError::NotHomogeneous);
        }
        if m.fixed_view::<3, 3>(0, 0).determinant().abs() <= f64::EPSILON {
            return Err(GeometryError::SingularAffine);
        }
        Ok(Self(m))
    }

    /// 从按行排列的 4x4 数组构造.
    pub fn from_rows(rows: [[f64; 4]; 4]) -> Result<Self, GeometryError> {
        Self::new(Matrix4::from_fn(|r, c| rows[r][c]))
    }

    /// 单位阵, 即 RAS 方向, 1mm 各向同性, 原点在体素 `(0, 0, 0)`.
    #[inline]
    pub fn identity() -> Self {
        Self(Matrix4::identity())
    }

    /// 对角 affine, 对角元素为各轴体素间距.
    ///
    /// 间距必须非零.
    pub fn from_spacing(spacing: [f64; 3]) -> Result<Self, GeometryError> {
        let [x, y, z] = spacing;
        Self::new(Matrix4::new_nonuniform_scaling(&Vector3::new(x, y, z)))
    }

    /// 矩阵本身.
    #[inline]
    pub fn matrix(&self) -> &Matrix4<f64> {
        &self.0
    }

    /// 按行展开的数组形式, 主要用于写 header.
    pub fn to_rows(&self) -> [[f64; 4]; 4] {
        let mut rows = [[0.0; 4]; 4];
        for (r, row) in rows.iter_mut().enumerate() {
            for (c, v) in row.iter_mut().enumerate() {
                *v = self.0[(r, c)];
            }
        }
        rows
    }

    /// 线性部分 (左上 3x3).
    #[inline]
    pub fn linear(&self) -> Matrix3<f64> {
        self.0.fixed_view::<3, 3>(0, 0).into_owned()
    }

    /// 第 `axis` 个体素轴对应的世界坐标方向向量.
    #[inline]
    pub fn column(&self, axis: usize) -> Vector3<f64> {
        Vector3::new(self.0[(0, axis)], self.0[(1, axis)], self.0[(2, axis)])
    }

    /// 平移部分.
    #[inline]
    pub fn translation(&self) -> Vector3<f64> {
        self.column(3)
    }

    /// 各体素轴的体素间距, 即线性部分的列范数.
    pub fn spacing(&self) -> [f64; 3] {
        [0, 1, 2].map(|i| self.column(i).norm())
    }

    /// 逆变换.
    ///
    /// `Affine` 只能经 [`Affine::new`] 构造 (行列式非零), 或由轴置换, 轴翻转,
    /// 正因子缩放得到, 这些操作都不会使行列式变为 0, 因此逆矩阵总是存在.
    pub fn inverse(&self) -> Affine {
        Self(
            self.0
                .try_inverse()
                .expect("affine is invertible by construction"),
        )
    }

    /// 体素坐标 (可以是小数) 到世界坐标.
    #[inline]
    pub fn apply(&self, p: [f64; 3]) -> [f64; 3] {
        let v = self.0 * Vector4::new(p[0], p[1], p[2], 1.0);
        [v.x, v.y, v.z]
    }

    /// 复合变换 `self * rhs`.
    #[inline]
    pub fn compose(&self, rhs: &Affine) -> Affine {
        Self(self.0 * rhs.0)
    }

    /// 所有元素误差都不超过 `tol`.
    pub fn approx_eq(&self, other: &Affine, tol: f64) -> bool {
        self.0
            .iter()
            .zip(other.0.iter())
            .all(|(a, b)| (a - b).abs() <= tol)
    }

    /// 按 `perm` 重排前三列: 新第 `k` 列取自原第 `perm[k]` 列.
    pub(crate) fn permute_columns(&self, perm: [usize; 3]) -> Affine {
        let mut m = self.0;
        for (k, &src) in perm.iter().enumerate() {
            for r in 0..4 {
                m[(r, k)] = self.0[(r, src)];
            }
        }
        Self(m)
    }

    /// 翻转第 `axis` 个体素轴, 该轴长度为 `len`. 体素 `len - 1` 成为新的体素 0.
    pub(crate) fn flip_axis(&self, axis: usize, len: usize) -> Affine {
        let mut m = self.0;
        for r in 0..3 {
            m[(r, axis)] = -m[(r, axis)];
        }
        let steps = len.saturating_sub(1) as f64;
        for r in 0..3 {
            m[(r, 3)] -= m[(r, axis)] * steps;
        }
        Self(m)
    }

    /// 每个体素轴按 `factor` 倍加密网格 (`factor > 1` 为上采样),
    /// 保持体数据覆盖的物理范围中心不变.
    pub(crate) fn rescale_grid(&self, factor: [f64; 3]) -> Affine {
        let mut m = self.0;
        for (c, f) in factor.iter().enumerate() {
            for r in 0..3 {
                m[(r, c)] /= f;
            }
        }
        let shift = Vector3::new(
            0.5 * (factor[0] - 1.0),
            0.5 * (factor[1] - 1.0),
            0.5 * (factor[2] - 1.0),
        );
        let delta = m.fixed_view::<3, 3>(0, 0) * shift;
        for r in 0..3 {
            m[(r, 3)] -= delta[r];
        }
        Self(m)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejects_singular() {
        let r = Affine::from_rows([
            [1.0, 0.0, 0.0, 0.0],
            [2.0, 0.0, 0.0, 0.0],
            [0.0, 0.0, 1.0, 0.0],
            [0.0, 0.0, 0.0, 1.0],
        ]);
        assert!(matches!(r, Err(GeometryError::SingularAffine)));

        let r = Affine::from_rows([
            [1.0, 0.0, 0.0, 0.0],
            [0.0, 1.0, 0.0, 0.0],
            [0.0, 0.0, 1.0, 0.0],
            [0.0, 0.0, 1.0, 1.0],
        ]);
        assert!(matches!(r, Err(GeometryError::NotHomogeneous)));
    }

    #[test]
    fn test_spacing_and_apply() {
        let a = Affine::from_rows([
            [0.0, 0.0, -2.0, 10.0],
            [1.5, 0.0, 0.0, -4.0],
            [0.0, 3.0, 0.0, 1.0],
            [0.0, 0.0, 0.0, 1.0],
        ])
        .unwrap();
        assert_eq!(a.spacing(), [1.5, 3.0, 2.0]);
        assert_eq!(a.apply([1.0, 1.0, 1.0]), [8.0, -2.5, 4.0]);
        let back = a.inverse().apply([8.0, -2.5, 4.0]);
        for (x, y) in back.iter().zip([1.0, 1.0, 1.0]) {
            approx::assert_abs_diff_eq!(*x, y, epsilon = 1e-12);
        }
    }

    #[test]
    fn test_derived_affine_inverse() {
        let a = Affine::from_rows([
            [0.0, 0.0, -2.0, 10.0],
            [1.5, 0.0, 0.0, -4.0],
            [0.0, 3.0, 0.0, 1.0],
            [0.0, 0.0, 0.0, 1.0],
        ])
        .unwrap();
        let d = a
            .permute_columns([2, 0, 1])
            .flip_axis(1, 7)
            .rescale_grid([2.0, 0.5, 3.0]);
        let id = d.compose(&d.inverse());
        assert!(id.approx_eq(&Affine::identity(), 1e-12));
    }

    #[test]
    fn test_flip_axis_keeps_world_positions() {
        let a = Affine::from_spacing([2.0, 1.0, 1.0]).unwrap();
        let f = a.flip_axis(0, 5);
        // 新体素 0 对应原体素 4.
        assert_eq!(f.apply([0.0, 0.0, 0.0]), a.apply([4.0, 0.0, 0.0]));
        assert_eq!(f.apply([4.0, 0.0, 0.0]), a.apply([0.0, 0.0, 0.0]));
    }

    #[test]
    fn test_rescale_grid_keeps_center() {
        let a = Affine::from_spacing([2.0, 2.0, 2.0]).unwrap();
        let r = a.rescale_grid([2.0, 2.0, 2.0]);
        assert_eq!(r.spacing(), [1.0, 1.0, 1.0]);
        // 原 4 个体素的中心 (1.5) 与新 8 个体素的中心 (3.5) 物理位置一致.
        let c0 = a.apply([1.5, 1.5, 1.5]);
        let c1 = r.apply([3.5, 3.5, 3.5]);
        for (x, y) in c0.iter().zip(c1.iter()) {
            approx::assert_abs_diff_eq!(*x, *y, epsilon = 1e-12);
        }
    }
}
