//! 解剖标签: 标签含义表与分割网络输出通道的标签目录.

mod anatomy;
mod catalog;

pub use anatomy::{AnatomyTable, Side, Structure};
pub use catalog::{read_label_list, FlipIndices, LabelCatalog, TopologyClasses, TopologyTable};
