#![warn(missing_docs)] // <= 合适时移除它.
// #![warn(clippy::missing_docs_in_private_items)]  // <= too strict.

//! 核心库. 提供脑部 MRI / CT nifti 体数据的几何规范化, 解剖标签目录构建,
//! 分割网络后验概率的后处理, 以及批量分割任务的驱动框架.
//!
//! 该 crate 目前仅提供 `safe` 接口. 推理后端本身不在本 crate 中,
//! 使用者通过实现 [`inference::SegmentationModel`] 接入任意网络.
//!
//! # 注意
//!
//! 1. 所有体数据均以 nifti 体素顺序存储, 即 `[i, j, k]` 对应 header 中的
//!   `dim[1..=3]`. 体素到世界坐标 (毫米, RAS) 的映射由 [`Affine`] 描述.
//! 2. 后验概率以 `[i, j, k, channel]` 组织, 通道顺序与 [`labels::LabelCatalog`]
//!   中的标签顺序一致.
//! 3. 单个输入的失败不会中断整批任务, 见 [`batch::BatchDriver`].
//!
//! # 开发计划
//!
//! ### 方向对齐与各向同性重采样 ✅
//!
//! 依据 affine 推断体素轴到 RAS 轴的对应关系, 通过轴置换与翻转将体数据对齐到参考方向.
//! 可逆: 以交换参考的方式再调用一次即可还原.
//!
//! 实现位于 `mri-berry/src/geometry`.
//!
//! ### 裁剪与填充 ✅
//!
//! 中心裁剪, 前景包围盒裁剪, 对齐到网络步长的居中填充, 以及按记录还原.
//!
//! 实现位于 `mri-berry/src/shape`.
//!
//! ### 标签目录 ✅
//!
//! 左右半球标签配对 (翻转增强用) 与拓扑类别分组.
//!
//! 实现位于 `mri-berry/src/labels`.
//!
//! ### 后处理 ✅
//!
//! 1. 两阶段最大连通域清理. ✅
//! 2. 后验归一化与 argmax 解码. ✅
//! 3. 皮层分区融合. ✅
//! 4. 体积积分与体积表. ✅
//! 5. 还原到原始网格. ✅
//!
//! 实现位于 `mri-berry/src/post_proc`.
//!
//! ### 批处理 ✅
//!
//! 输入/输出路径解析, 共享体积表与 QC 表, 单例失败隔离.
//!
//! 实现位于 `mri-berry/src/batch`.
//!
//! ### 完善代码文档 ⌛️
//!
//! 给每个 public API 提供文档, 并视情况给 private
//! API 提供文档.

/// 三维索引, 同时也可一定程度上用作非负整数向量.
pub type Idx3d = (usize, usize, usize);

/// 体数据基础结构与 affine.
mod data;

pub use data::{
    Affine, LabelVolume, PosteriorVolume, RawVolume, ScanVolume, Volume, VoxelGeometry,
};

pub mod batch;
pub mod config;
pub mod consts;
pub mod error;
pub mod geometry;
pub mod inference;
pub mod labels;
pub mod post_proc;
pub mod prelude;
pub mod preprocess;
pub mod shape;
