use std::collections::BTreeMap;
use std::path::Path;

use itertools::Itertools;
use ndarray::Array1;
use ndarray_npy::read_npy;

use super::anatomy::{AnatomyTable, Side, Structure};
use crate::error::CatalogError;

/// 读取 `.npy` 格式的一维整数标签列表 (`int32` 或 `int64`).
pub fn read_label_list<P: AsRef<Path>>(path: P) -> Result<Vec<i32>, CatalogError> {
    let path = path.as_ref();
    match read_npy::<_, Array1<i32>>(path) {
        Ok(a) => Ok(a.to_vec()),
        Err(_) => {
            let a: Array1<i64> = read_npy(path).map_err(|source| CatalogError::Npy {
                path: path.to_path_buf(),
                source,
            })?;
            Ok(a.iter().map(|&v| v as i32).collect())
        }
    }
}

/// 网络输出通道的标签目录: 升序去重后的标签, 第 `i` 个标签对应第 `i` 个输出通道.
///
/// 构建后只读, 在整批任务中共享.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LabelCatalog {
    labels: Vec<i32>,
    structures: Vec<Structure>,
}

impl LabelCatalog {
    /// 由标签列表 (可重复, 可无序) 与标签含义表构建目录.
    ///
    /// 任何标签不在表中时返回 [`CatalogError::UnknownLabel`].
    pub fn build(labels: &[i32], table: &AnatomyTable) -> Result<Self, CatalogError> {
        if labels.is_empty() {
            return Err(CatalogError::Empty);
        }
        let labels: Vec<i32> = labels.iter().copied().sorted_unstable().dedup().collect();
        let structures = labels
            .iter()
            .map(|&l| table.get(l).cloned().ok_or(CatalogError::UnknownLabel(l)))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { labels, structures })
    }

    /// 标签个数, 即网络输出通道数.
    #[inline]
    pub fn len(&self) -> usize {
        self.labels.len()
    }

    /// 目录是否为空? 构建成功的目录总是非空.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    /// 全部标签, 升序.
    #[inline]
    pub fn labels(&self) -> &[i32] {
        &self.labels
    }

    /// 第 `pos` 个通道对应的标签.
    #[inline]
    pub fn label_at(&self, pos: usize) -> i32 {
        self.labels[pos]
    }

    /// 第 `pos` 个通道对应的结构名.
    #[inline]
    pub fn name_at(&self, pos: usize) -> &str {
        &self.structures[pos].name
    }

    /// 第 `pos` 个通道对应的半球.
    #[inline]
    pub fn side_at(&self, pos: usize) -> Side {
        self.structures[pos].side
    }

    /// 标签所在通道.
    #[inline]
    pub fn position_of(&self, label: i32) -> Option<usize> {
        self.labels.binary_search(&label).ok()
    }

    /// 最大标签值.
    #[inline]
    pub fn max_label(&self) -> i32 {
        self.labels.last().copied().unwrap_or_default()
    }

    /// 位于 `side` 的通道, 升序.
    pub fn positions_on(&self, side: Side) -> Vec<usize> {
        (0..self.len()).filter(|&p| self.side_at(p) == side).collect()
    }

    /// 左右翻转对应关系.
    ///
    /// 中线标签映射到自身; 左、右标签各自升序排列后按名次一一配对.
    /// 左右标签个数不同时返回 [`CatalogError::UnpairedSides`].
    pub fn flip_correspondence(&self) -> Result<FlipIndices, CatalogError> {
        let left = self.positions_on(Side::Left);
        let right = self.positions_on(Side::Right);
        if left.len() != right.len() {
            return Err(CatalogError::UnpairedSides {
                left: left.len(),
                right: right.len(),
            });
        }
        let mut flip: Vec<usize> = (0..self.len()).collect();
        for (&l, &r) in left.iter().zip(right.iter()) {
            flip[l] = r;
            flip[r] = l;
        }
        Ok(FlipIndices(flip))
    }

    /// 每个通道的拓扑类别.
    ///
    /// `table` 没有覆盖某个标签时返回 [`CatalogError::MissingTopologyClass`].
    pub fn topology_classes(&self, table: &TopologyTable) -> Result<TopologyClasses, CatalogError> {
        let ids = self
            .labels
            .iter()
            .map(|&l| table.class_of(l).ok_or(CatalogError::MissingTopologyClass(l)))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(TopologyClasses { ids })
    }
}

/// 通道置换: 左右翻转后, 第 `i` 个通道的内容应取自第 `flip[i]` 个通道.
///
/// 该置换是对合的, 即 `flip[flip[i]] == i`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FlipIndices(Vec<usize>);

impl FlipIndices {
    /// 置换本身.
    #[inline]
    pub fn as_slice(&self) -> &[usize] {
        &self.0
    }

    /// 长度.
    #[inline]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// 是否为空?
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// 标签到拓扑类别的映射表. 同一类别的结构在后处理中作为整体保留最大连通域.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TopologyTable {
    classes: BTreeMap<i32, u32>,
}

impl TopologyTable {
    /// 由两列等长数组构建. 同一标签出现多次时以第一次为准.
    pub fn from_lists(labels: &[i32], classes: &[u32]) -> Result<Self, CatalogError> {
        if labels.len() != classes.len() {
            return Err(CatalogError::TopologyLength {
                labels: labels.len(),
                classes: classes.len(),
            });
        }
        let mut map = BTreeMap::new();
        for (&l, &c) in labels.iter().zip(classes) {
            map.entry(l).or_insert(c);
        }
        Ok(Self { classes: map })
    }

    /// 从两份 `.npy` 读取. 两者按位置对应.
    pub fn from_npy<P: AsRef<Path>, Q: AsRef<Path>>(
        labels: P,
        classes: Q,
    ) -> Result<Self, CatalogError> {
        let labels = read_label_list(labels)?;
        let classes: Vec<u32> = read_label_list(classes)?
            .into_iter()
            .map(|c| c.max(0) as u32)
            .collect();
        Self::from_lists(&labels, &classes)
    }

    /// 每个结构自成一类, 背景为类别 0.
    pub fn singletons(catalog: &LabelCatalog) -> Self {
        let classes = catalog
            .labels()
            .iter()
            .enumerate()
            .map(|(i, &l)| (l, i as u32))
            .collect();
        Self { classes }
    }

    /// 查询标签的类别.
    #[inline]
    pub fn class_of(&self, label: i32) -> Option<u32> {
        self.classes.get(&label).copied()
    }
}

/// 目录中每个通道的拓扑类别.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TopologyClasses {
    ids: Vec<u32>,
}

impl TopologyClasses {
    /// 第 `pos` 个通道的类别.
    #[inline]
    pub fn class_at(&self, pos: usize) -> u32 {
        self.ids[pos]
    }

    /// 全部类别.
    #[inline]
    pub fn ids(&self) -> &[u32] {
        &self.ids
    }

    /// 按类别升序分组的通道位置. 最小的类别 (背景所在类别) 不参与.
    pub fn groups(&self) -> Vec<(u32, Vec<usize>)> {
        let mut by_class: BTreeMap<u32, Vec<usize>> = BTreeMap::new();
        for (pos, &c) in self.ids.iter().enumerate() {
            by_class.entry(c).or_default().push(pos);
        }
        by_class.into_iter().skip(1).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small_table() -> AnatomyTable {
        let mut t = AnatomyTable::new();
        t.insert(0, "background", Side::Neutral)
            .insert(1, "a", Side::Neutral)
            .insert(2, "b", Side::Left)
            .insert(3, "c", Side::Right)
            .insert(4, "d", Side::Neutral);
        t
    }

    #[test]
    fn test_unknown_label() {
        let r = LabelCatalog::build(&[0, 1, 2, 3, 4, 99], &small_table());
        assert!(matches!(r, Err(CatalogError::UnknownLabel(99))));
        assert!(matches!(
            LabelCatalog::build(&[], &small_table()),
            Err(CatalogError::Empty)
        ));
    }

    #[test]
    fn test_sorted_unique() {
        let c = LabelCatalog::build(&[4, 0, 2, 2, 3, 0], &small_table()).unwrap();
        assert_eq!(c.labels(), &[0, 2, 3, 4]);
        assert_eq!(c.position_of(3), Some(2));
        assert_eq!(c.position_of(1), None);
        assert_eq!(c.max_label(), 4);
        assert_eq!(c.name_at(1), "b");
    }

    #[test]
    fn test_flip_is_involution() {
        let labels: Vec<i32> = AnatomyTable::freesurfer()
            .iter()
            .map(|(l, _)| l)
            .filter(|&l| l < 1000)
            .collect();
        let c = LabelCatalog::build(&labels, AnatomyTable::freesurfer()).unwrap();
        assert_eq!(c.len(), 33);
        let flip = c.flip_correspondence().unwrap();
        let f = flip.as_slice();
        for i in 0..f.len() {
            assert_eq!(f[f[i]], i);
            match c.side_at(i) {
                Side::Neutral => assert_eq!(f[i], i),
                Side::Left => assert_eq!(c.side_at(f[i]), Side::Right),
                Side::Right => assert_eq!(c.side_at(f[i]), Side::Left),
            }
        }
        // 左侧皮层 <-> 右侧皮层, 左侧海马 <-> 右侧海马.
        let p = |l| c.position_of(l).unwrap();
        assert_eq!(f[p(3)], p(42));
        assert_eq!(f[p(17)], p(53));
        assert_eq!(f[p(28)], p(60));
    }

    #[test]
    fn test_flip_unpaired() {
        let c = LabelCatalog::build(&[0, 1, 2, 4], &small_table()).unwrap();
        assert!(matches!(
            c.flip_correspondence(),
            Err(CatalogError::UnpairedSides { left: 1, right: 0 })
        ));
    }

    #[test]
    fn test_topology_groups() {
        let c = LabelCatalog::build(&[0, 1, 2, 3, 4], &small_table()).unwrap();
        let table = TopologyTable::from_lists(&[4, 3, 2, 1, 0], &[2, 1, 1, 3, 0]).unwrap();
        let t = c.topology_classes(&table).unwrap();
        assert_eq!(t.ids(), &[0, 3, 1, 1, 2]);
        assert_eq!(
            t.groups(),
            vec![(1, vec![2, 3]), (2, vec![4]), (3, vec![1])]
        );

        let partial = TopologyTable::from_lists(&[0, 1], &[0, 1]).unwrap();
        assert!(matches!(
            c.topology_classes(&partial),
            Err(CatalogError::MissingTopologyClass(2))
        ));
        assert!(TopologyTable::from_lists(&[0, 1], &[0]).is_err());

        let single = c.topology_classes(&TopologyTable::singletons(&c)).unwrap();
        assert_eq!(single.groups().len(), 4);
    }

    #[test]
    fn test_read_label_list() {
        let dir = tempfile::tempdir().unwrap();
        let p32 = dir.path().join("labels32.npy");
        let p64 = dir.path().join("labels64.npy");
        ndarray_npy::write_npy(&p32, &ndarray::arr1(&[0i32, 2, 41])).unwrap();
        ndarray_npy::write_npy(&p64, &ndarray::arr1(&[0i64, 3, 42])).unwrap();
        assert_eq!(read_label_list(&p32).unwrap(), vec![0, 2, 41]);
        assert_eq!(read_label_list(&p64).unwrap(), vec![0, 3, 42]);
        assert!(matches!(
            read_label_list(dir.path().join("nope.npy")),
            Err(CatalogError::Npy { .. })
        ));
    }

    #[test]
    fn test_topology_from_npy() {
        let dir = tempfile::tempdir().unwrap();
        let labels = dir.path().join("topology_labels.npy");
        let classes = dir.path().join("topology_classes.npy");
        ndarray_npy::write_npy(&labels, &ndarray::arr1(&[0i32, 1, 2, 3, 4])).unwrap();
        ndarray_npy::write_npy(&classes, &ndarray::arr1(&[0i64, 3, 1, 1, 2])).unwrap();

        let table = TopologyTable::from_npy(&labels, &classes).unwrap();
        assert_eq!(table.class_of(2), Some(1));
        assert_eq!(table.class_of(4), Some(2));
        assert_eq!(table.class_of(9), None);

        let c = LabelCatalog::build(&[0, 1, 2, 3, 4], &small_table()).unwrap();
        let t = c.topology_classes(&table).unwrap();
        assert_eq!(t.groups(), vec![(1, vec![2, 3]), (2, vec![4]), (3, vec![1])]);

        let short = dir.path().join("short.npy");
        ndarray_npy::write_npy(&short, &ndarray::arr1(&[0i32, 1])).unwrap();
        assert!(matches!(
            TopologyTable::from_npy(&labels, &short),
            Err(CatalogError::TopologyLength { labels: 5, classes: 2 })
        ));
    }
}
