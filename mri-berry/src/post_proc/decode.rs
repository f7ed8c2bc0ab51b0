//! 后验归一化与硬标签解码.

use ndarray::{Array3, Array4, ArrayView4, Axis, Zip};

use super::cleanup::map_lanes;
use crate::consts::thresholds::NORMALIZE_EPSILON;

/// 将每个体素的通道向量归一化为和为 1.
///
/// 通道和不超过 [`NORMALIZE_EPSILON`] 的体素视为全零, 改写为确定的背景 (第 0 通道为 1).
pub fn normalize_posteriors(post: &mut Array4<f32>) {
    Zip::from(post.lanes_mut(Axis(3))).for_each(|mut lane| {
        let s: f32 = lane.sum();
        if s > NORMALIZE_EPSILON {
            lane.mapv_inplace(|v| v / s);
        } else {
            lane.fill(0.0);
            lane[0] = 1.0;
        }
    });
}

/// 每个体素概率最大的通道. 并列时取编号较小者.
pub fn argmax_channels(post: ArrayView4<f32>) -> Array3<usize> {
    map_lanes(post, |lane| {
        let mut best = 0;
        for (i, &v) in lane.iter().enumerate() {
            if v > lane[best] {
                best = i;
            }
        }
        best
    })
}

/// 解码为标签: 第 `i` 个通道对应 `labels[i]`.
pub fn decode_labels(post: ArrayView4<f32>, labels: &[i32]) -> Array3<i32> {
    debug_assert_eq!(post.len_of(Axis(3)), labels.len());
    argmax_channels(post).mapv(|c| labels[c])
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn test_normalize_sums_to_one() {
        let mut post = Array4::from_shape_fn((3, 4, 5, 4), |(i, j, k, c)| {
            ((i * 7 + j * 3 + k + c * 5) % 11) as f32 * 0.37
        });
        post[(0, 0, 0, 0)] = 0.0;
        post.slice_mut(ndarray::s![1, 1, 1, ..]).fill(0.0);
        normalize_posteriors(&mut post);
        for lane in post.lanes(Axis(3)) {
            assert_abs_diff_eq!(lane.sum(), 1.0, epsilon = 1e-5);
        }
        assert_eq!(post[(1, 1, 1, 0)], 1.0);
        assert_eq!(post[(1, 1, 1, 3)], 0.0);
    }

    #[test]
    fn test_decode_first_max_wins() {
        let mut post = Array4::<f32>::zeros((2, 1, 1, 3));
        post[(0, 0, 0, 1)] = 0.5;
        post[(0, 0, 0, 2)] = 0.5;
        post[(1, 0, 0, 2)] = 0.7;
        post[(1, 0, 0, 0)] = 0.3;
        let seg = decode_labels(post.view(), &[0, 17, 53]);
        assert_eq!(seg[(0, 0, 0)], 17);
        assert_eq!(seg[(1, 0, 0)], 53);
    }
}
