use ndarray::{Array3, ArrayView3, ArrayViewMut1, Axis, Zip};

use crate::consts::{BLUR_SIGMA_SCALE, GAUSSIAN_TRUNCATE};
use crate::data::Affine;
use crate::error::GeometryError;
use crate::Idx3d;

/// 重采样插值方式.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Interpolation {
    /// 三线性插值.
    #[default]
    Linear,

    /// 最近邻插值. 恰在两格正中时取较小的索引.
    Nearest,
}

cfg_if::cfg_if! {
    if #[cfg(feature = "rayon")] {
        /// 并行地对 `data` 沿 `axis` 的每一条 lane 实施 `op`.
        fn for_each_lane<F>(data: &mut Array3<f32>, axis: Axis, op: F)
        where
            F: Fn(ArrayViewMut1<f32>) + Sync + Send,
        {
            Zip::from(data.lanes_mut(axis)).par_for_each(op);
        }

        /// 并行地以 `op(index)` 填充 `out`.
        fn fill_indexed<T, F>(out: &mut Array3<T>, op: F)
        where
            T: Send,
            F: Fn(Idx3d) -> T + Sync + Send,
        {
            Zip::indexed(out).par_for_each(|idx, v| *v = op(idx));
        }
    } else {
        /// 对 `data` 沿 `axis` 的每一条 lane 实施 `op`.
        fn for_each_lane<F>(data: &mut Array3<f32>, axis: Axis, op: F)
        where
            F: Fn(ArrayViewMut1<f32>),
        {
            Zip::from(data.lanes_mut(axis)).for_each(op);
        }

        /// 以 `op(index)` 填充 `out`.
        fn fill_indexed<T, F>(out: &mut Array3<T>, op: F)
        where
            F: Fn(Idx3d) -> T,
        {
            Zip::indexed(out).for_each(|idx, v| *v = op(idx));
        }
    }
}

/// 归一化的一维高斯核, 半径为 `trunc(4 * sigma + 0.5)`.
fn gaussian_kernel(sigma: f64) -> Vec<f64> {
    let radius = (GAUSSIAN_TRUNCATE * sigma + 0.5) as usize;
    let mut w: Vec<f64> = (0..=2 * radius)
        .map(|i| {
            let x = i as f64 - radius as f64;
            (-0.5 * x * x / (sigma * sigma)).exp()
        })
        .collect();
    let s: f64 = w.iter().sum();
    w.iter_mut().for_each(|v| *v /= s);
    w
}

/// 镜像边界 `d c b a | a b c d | d c b a` 下的合法索引.
#[inline]
fn reflect(i: isize, n: usize) -> usize {
    let n = n as isize;
    let period = 2 * n;
    let m = i.rem_euclid(period);
    (if m >= n { period - 1 - m } else { m }) as usize
}

fn convolve_lane(mut lane: ArrayViewMut1<f32>, kernel: &[f64]) {
    let src: Vec<f32> = lane.to_vec();
    let n = src.len();
    let r = (kernel.len() / 2) as isize;
    for (i, out) in lane.iter_mut().enumerate() {
        let mut acc = 0.0;
        for (t, w) in kernel.iter().enumerate() {
            acc += w * src[reflect(i as isize + t as isize - r, n)] as f64;
        }
        *out = acc as f32;
    }
}

/// 可分离高斯平滑, 镜像边界. `sigmas[i]` 为第 `i` 轴的标准差 (体素), 为 0 的轴跳过.
pub fn gaussian_smooth(data: &mut Array3<f32>, sigmas: [f64; 3]) {
    for (ax, &sigma) in sigmas.iter().enumerate() {
        if sigma <= 1e-15 {
            continue;
        }
        let kernel = gaussian_kernel(sigma);
        for_each_lane(data, Axis(ax), |lane| convolve_lane(lane, &kernel));
    }
}

/// 某一轴上输出样本对应的输入坐标. 坐标被截断到 `[0, n - 1]`. `n` 不能为 0.
fn sample_positions(n: usize, factor: f64) -> Vec<f64> {
    let count = ((n as f64) * factor - 1e-9).ceil().max(1.0) as usize;
    let start = -(factor - 1.0) / (2.0 * factor);
    let step = 1.0 / factor;
    let last = (n - 1) as f64;
    (0..count)
        .map(|k| (start + k as f64 * step).clamp(0.0, last))
        .collect()
}

/// 一维插值表: 低位索引, 高位索引, 高位权重.
struct AxisTable {
    lo: Vec<usize>,
    hi: Vec<usize>,
    w: Vec<f64>,
}

impl AxisTable {
    fn new(n: usize, factor: f64, interpolation: Interpolation) -> Self {
        let pos = sample_positions(n, factor);
        let mut lo = Vec::with_capacity(pos.len());
        let mut hi = Vec::with_capacity(pos.len());
        let mut w = Vec::with_capacity(pos.len());
        for x in pos {
            let f = x.floor();
            let l = (f as usize).min(n - 1);
            let h = (l + 1).min(n - 1);
            let frac = x - f;
            match interpolation {
                Interpolation::Linear => {
                    lo.push(l);
                    hi.push(h);
                    w.push(frac);
                }
                Interpolation::Nearest => {
                    let idx = if frac <= 0.5 { l } else { h };
                    lo.push(idx);
                    hi.push(idx);
                    w.push(0.0);
                }
            }
        }
        Self { lo, hi, w }
    }

    #[inline]
    fn len(&self) -> usize {
        self.lo.len()
    }
}

/// 将体数据重采样到各向同性的 `target_spacing` 毫米网格.
///
/// 线性插值时, 下采样的轴先做抗混叠高斯平滑 (`sigma = 0.25 / factor`);
/// 最近邻插值不做平滑, 输出值都取自输入, 可用于标签.
/// 输出第 `k` 个样本位于输入坐标 `-(f - 1) / 2f + k / f` 处 (截断到边界),
/// 因此输入与输出覆盖的物理范围中心一致.
///
/// # 返回值
///
/// 重采样后的数据与更新后的 affine. 任一轴为空时返回 [`GeometryError::EmptyAxis`].
pub fn resample_isotropic(
    data: ArrayView3<f32>,
    affine: &Affine,
    target_spacing: f64,
    interpolation: Interpolation,
) -> Result<(Array3<f32>, Affine), GeometryError> {
    debug_assert!(target_spacing > 0.0);
    if data.is_empty() {
        return Err(GeometryError::EmptyAxis(data.shape().to_vec()));
    }
    let factor = affine.spacing().map(|s| s / target_spacing);

    let mut src = data.to_owned();
    if interpolation == Interpolation::Linear {
        let sigmas = factor.map(|f| if f > 1.0 { 0.0 } else { BLUR_SIGMA_SCALE / f });
        gaussian_smooth(&mut src, sigmas);
    }

    let (ni, nj, nk) = src.dim();
    let ti = AxisTable::new(ni, factor[0], interpolation);
    let tj = AxisTable::new(nj, factor[1], interpolation);
    let tk = AxisTable::new(nk, factor[2], interpolation);

    let mut out = Array3::<f32>::zeros((ti.len(), tj.len(), tk.len()));
    let src = &src;
    fill_indexed(&mut out, |(a, b, c)| {
        let (i0, i1, wi) = (ti.lo[a], ti.hi[a], ti.w[a]);
        let (j0, j1, wj) = (tj.lo[b], tj.hi[b], tj.w[b]);
        let (k0, k1, wk) = (tk.lo[c], tk.hi[c], tk.w[c]);
        let mut acc = 0.0;
        for (i, fi) in [(i0, 1.0 - wi), (i1, wi)] {
            if fi == 0.0 {
                continue;
            }
            for (j, fj) in [(j0, 1.0 - wj), (j1, wj)] {
                if fj == 0.0 {
                    continue;
                }
                for (k, fk) in [(k0, 1.0 - wk), (k1, wk)] {
                    if fk == 0.0 {
                        continue;
                    }
                    acc += fi * fj * fk * src[(i, j, k)] as f64;
                }
            }
        }
        acc as f32
    });

    Ok((out, affine.rescale_grid(factor)))
}

/// 将标签体数据按最近邻重采样到另一个网格上 (由形状与 affine 给出).
///
/// 目标体素中心映射到源网格外的, 填充 `background`.
pub fn resample_labels_onto(
    labels: ArrayView3<i32>,
    affine: &Affine,
    target_shape: Idx3d,
    target_affine: &Affine,
    background: i32,
) -> Array3<i32> {
    let to_src = affine.inverse().compose(target_affine);
    let (ni, nj, nk) = labels.dim();
    let mut out = Array3::<i32>::zeros(target_shape);
    fill_indexed(&mut out, |(a, b, c)| {
        let p = to_src.apply([a as f64, b as f64, c as f64]);
        let [i, j, k] = p.map(|x| x.round());
        let inside = |v: f64, n: usize| v >= 0.0 && v < n as f64;
        if inside(i, ni) && inside(j, nj) && inside(k, nk) {
            labels[(i as usize, j as usize, k as usize)]
        } else {
            background
        }
    });
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn test_reflect() {
        let v: Vec<usize> = (-3..7).map(|i| reflect(i, 4)).collect();
        assert_eq!(v, vec![2, 1, 0, 0, 1, 2, 3, 3, 2, 1]);
        assert_eq!(reflect(-5, 1), 0);
    }

    #[test]
    fn test_gaussian_preserves_constant() {
        let mut a = Array3::<f32>::from_elem((6, 5, 4), 3.0);
        gaussian_smooth(&mut a, [1.0, 0.5, 0.0]);
        for v in a.iter() {
            assert_abs_diff_eq!(*v, 3.0, epsilon = 1e-5);
        }
    }

    #[test]
    fn test_gaussian_spreads_impulse() {
        let mut a = Array3::<f32>::zeros((9, 1, 1));
        a[(4, 0, 0)] = 1.0;
        gaussian_smooth(&mut a, [1.0, 0.0, 0.0]);
        let total: f32 = a.iter().sum();
        assert_abs_diff_eq!(total, 1.0, epsilon = 1e-5);
        assert!(a[(4, 0, 0)] < 1.0);
        assert_abs_diff_eq!(a[(3, 0, 0)], a[(5, 0, 0)], epsilon = 1e-7);
    }

    #[test]
    fn test_sample_positions() {
        // 2mm -> 1mm: 4 个体素变为 8 个.
        let p = sample_positions(4, 2.0);
        assert_eq!(p.len(), 8);
        assert_abs_diff_eq!(p[0], 0.0);
        assert_abs_diff_eq!(p[1], 0.25);
        assert_abs_diff_eq!(p[7], 3.0);

        // 0.5mm -> 1mm: 8 个体素变为 4 个.
        let p = sample_positions(8, 0.5);
        assert_eq!(p, vec![0.5, 2.5, 4.5, 6.5]);
    }

    #[test]
    fn test_resample_shape_and_affine() {
        let aff = Affine::from_spacing([2.0, 1.0, 0.5]).unwrap();
        let data = Array3::<f32>::from_elem((10, 12, 16), 1.0);
        let (out, out_aff) =
            resample_isotropic(data.view(), &aff, 1.0, Interpolation::Linear).unwrap();
        assert_eq!(out.dim(), (20, 12, 8));
        for s in out_aff.spacing() {
            assert_abs_diff_eq!(s, 1.0, epsilon = 1e-12);
        }
        for v in out.iter() {
            assert_abs_diff_eq!(*v, 1.0, epsilon = 1e-5);
        }
        // 物理中心不变.
        let c0 = aff.apply([4.5, 5.5, 7.5]);
        let c1 = out_aff.apply([9.5, 5.5, 3.5]);
        for (x, y) in c0.iter().zip(c1.iter()) {
            assert_abs_diff_eq!(*x, *y, epsilon = 1e-9);
        }
    }

    #[test]
    fn test_resample_linear_ramp() {
        let aff = Affine::from_spacing([2.0, 1.0, 1.0]).unwrap();
        let data = Array3::from_shape_fn((4, 1, 1), |(i, _, _)| i as f32);
        let (out, _) = resample_isotropic(data.view(), &aff, 1.0, Interpolation::Linear).unwrap();
        // 上采样轴不做平滑, 但 factor == 1 的轴有轻微平滑, 对单体素轴无影响.
        let v: Vec<f32> = out.iter().copied().collect();
        let expected = [0.0, 0.25, 0.75, 1.25, 1.75, 2.25, 2.75, 3.0];
        for (a, b) in v.iter().zip(expected) {
            assert_abs_diff_eq!(*a, b, epsilon = 1e-5);
        }
    }

    #[test]
    fn test_resample_nearest_keeps_label_values() {
        let aff = Affine::from_spacing([2.0, 1.0, 0.5]).unwrap();
        let labels = [0.0f32, 2.0, 3.0, 41.0, 42.0];
        let data = Array3::from_shape_fn((6, 5, 8), |(i, j, k)| labels[(i + j + k) % 5]);
        let (out, _) = resample_isotropic(data.view(), &aff, 1.0, Interpolation::Nearest).unwrap();
        assert_eq!(out.dim(), (12, 5, 4));
        assert!(out.iter().all(|v| labels.contains(v)));
        // 上采样轴上每个输入体素恰好复制两次.
        assert_eq!(out[(0, 0, 0)], data[(0, 0, 0)]);
        assert_eq!(out[(1, 0, 0)], data[(0, 0, 0)]);
        assert_eq!(out[(2, 0, 0)], data[(1, 0, 0)]);
        assert_eq!(out[(11, 4, 0)], data[(5, 4, 0)]);
    }

    #[test]
    fn test_resample_empty_axis() {
        let aff = Affine::from_spacing([2.0, 1.0, 1.0]).unwrap();
        let data = Array3::<f32>::zeros((0, 4, 4));
        assert!(matches!(
            resample_isotropic(data.view(), &aff, 1.0, Interpolation::Linear),
            Err(GeometryError::EmptyAxis(shape)) if shape == vec![0, 4, 4]
        ));

        let labels = ndarray::Array3::<i32>::zeros((0, 2, 2));
        let out = resample_labels_onto(labels.view(), &aff, (2, 2, 2), &aff, 5);
        assert!(out.iter().all(|&l| l == 5));
    }

    #[test]
    fn test_resample_labels_onto_identity_grid() {
        let labels = Array3::from_shape_fn((3, 3, 3), |(i, j, k)| (i * 9 + j * 3 + k) as i32);
        let aff = Affine::identity();
        let out = resample_labels_onto(labels.view(), &aff, (3, 3, 3), &aff, 0);
        assert_eq!(out, labels);

        // 目标网格平移出界的部分为背景.
        let shifted = Affine::from_rows([
            [1.0, 0.0, 0.0, 2.0],
            [0.0, 1.0, 0.0, 0.0],
            [0.0, 0.0, 1.0, 0.0],
            [0.0, 0.0, 0.0, 1.0],
        ])
        .unwrap();
        let out = resample_labels_onto(labels.view(), &aff, (3, 3, 3), &shifted, -1);
        assert_eq!(out[(0, 1, 1)], labels[(2, 1, 1)]);
        assert_eq!(out[(1, 1, 1)], -1);
    }
}
