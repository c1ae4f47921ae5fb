//! 区间缓存数据结构定义
//!
//! 包含簇区间、区间关系、FAT 类型、卷几何信息和分配结果容器。

use crate::consts::*;
use crate::error::{Error, ErrorKind, Result};
use alloc::vec::Vec;

/// 卷标识
///
/// 由 [`Fcache::mount`](crate::Fcache::mount) 分配，卸载后不再复用。
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct VolumeId(pub(crate) u32);

impl VolumeId {
    /// 原始编号
    pub const fn raw(self) -> u32 {
        self.0
    }
}

/// 簇区间 `[start, start + len)`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Interval {
    /// 起始簇号
    pub start: u32,
    /// 簇数
    pub len: u32,
}

/// 两个区间之间的几何关系
///
/// 以 `self` 为主语描述，例如 `LeftAdjacent` 表示 `self` 紧贴在 `other` 左侧。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntervalRelation {
    /// 完全相同
    Equal,
    /// `self` 覆盖 `other` 的左半部分
    LeftOverlap,
    /// `self` 覆盖 `other` 的右半部分
    RightOverlap,
    /// `self` 包含 `other`
    Including,
    /// `self` 被 `other` 包含
    IncludedBy,
    /// `self.end == other.start`
    LeftAdjacent,
    /// `other.end == self.start`
    RightAdjacent,
}

impl Interval {
    /// 创建区间
    pub const fn new(start: u32, len: u32) -> Self {
        Self { start, len }
    }

    /// 由 `[start, end)` 创建区间
    pub const fn from_bounds(start: u32, end: u32) -> Self {
        Self {
            start,
            len: end - start,
        }
    }

    /// 结束簇号（不包含）
    #[inline]
    pub const fn end(&self) -> u32 {
        self.start + self.len
    }

    /// 是否为空区间
    #[inline]
    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// 是否包含某个簇
    #[inline]
    pub const fn contains_unit(&self, unit: u32) -> bool {
        unit >= self.start && unit < self.end()
    }

    /// 是否完整包含另一个区间（相等也算包含）
    #[inline]
    pub const fn contains(&self, other: &Interval) -> bool {
        other.start >= self.start && other.end() <= self.end()
    }

    /// 是否与另一个区间相交
    #[inline]
    pub const fn overlaps(&self, other: &Interval) -> bool {
        self.start < other.end() && other.start < self.end()
    }

    /// 求交集
    pub fn intersect(&self, other: &Interval) -> Option<Interval> {
        let start = self.start.max(other.start);
        let end = self.end().min(other.end());
        (start < end).then(|| Interval::from_bounds(start, end))
    }

    /// 计算两个区间的关系
    ///
    /// 不相交且不相邻时返回 `None`。
    pub fn relation(&self, other: &Interval) -> Option<IntervalRelation> {
        use IntervalRelation::*;

        let (s0, e0) = (self.start, self.end());
        let (s1, e1) = (other.start, other.end());

        if s0 == s1 && e0 == e1 {
            Some(Equal)
        } else if e0 == s1 {
            Some(LeftAdjacent)
        } else if e1 == s0 {
            Some(RightAdjacent)
        } else if s0 <= s1 && e1 <= e0 {
            Some(Including)
        } else if s1 <= s0 && e0 <= e1 {
            Some(IncludedBy)
        } else if s0 < s1 && s1 < e0 && e0 < e1 {
            Some(LeftOverlap)
        } else if s1 < s0 && s0 < e1 && e1 < e0 {
            Some(RightOverlap)
        } else {
            None
        }
    }
}

/// FAT 类型
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FatType {
    /// FAT16
    Fat16,
    /// FAT32
    Fat32,
}

impl FatType {
    /// 表项字节数
    pub const fn entry_size(self) -> u32 {
        match self {
            FatType::Fat16 => FAT16_ENTRY_SIZE,
            FatType::Fat32 => FAT32_ENTRY_SIZE,
        }
    }

    /// 最大合法簇号
    pub const fn max_cluster(self) -> u32 {
        match self {
            FatType::Fat16 => FAT16_MAX_CLUSTER,
            FatType::Fat32 => FAT32_MAX_CLUSTER,
        }
    }

    /// 链结束标记
    pub const fn eoc(self) -> u32 {
        match self {
            FatType::Fat16 => FAT16_EOC,
            FatType::Fat32 => FAT32_EOC,
        }
    }
}

/// 卷几何信息
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VolumeGeometry {
    /// FAT 类型
    pub fat_type: FatType,
    /// 扇区大小（字节）
    pub sector_size: u32,
    /// 最后一个有效簇号（包含）
    pub last_unit: u32,
}

impl VolumeGeometry {
    /// 创建卷几何信息
    pub const fn new(fat_type: FatType, sector_size: u32, last_unit: u32) -> Self {
        Self {
            fat_type,
            sector_size,
            last_unit,
        }
    }

    /// 检查几何信息是否合法
    pub fn validate(&self) -> Result<()> {
        if !self.sector_size.is_power_of_two()
            || self.sector_size < FAT_MIN_SECTOR_SIZE
            || self.sector_size > FAT_MAX_SECTOR_SIZE
        {
            return Err(Error::new(ErrorKind::InvalidInput, "Invalid sector size"));
        }
        if self.last_unit < FAT_FIRST_CLUSTER || self.last_unit > self.fat_type.max_cluster() {
            return Err(Error::new(ErrorKind::InvalidInput, "Invalid last cluster number"));
        }
        Ok(())
    }

    /// 第一个有效簇号
    #[inline]
    pub const fn first_unit(&self) -> u32 {
        FAT_FIRST_CLUSTER
    }

    /// 有效簇数
    #[inline]
    pub const fn unit_count(&self) -> u32 {
        self.last_unit - FAT_FIRST_CLUSTER + 1
    }

    /// 每个 FAT 扇区包含的表项数
    #[inline]
    pub const fn units_per_sector(&self) -> u32 {
        self.sector_size / self.fat_type.entry_size()
    }

    /// FAT 表占用的扇区数
    pub const fn fat_sectors(&self) -> u32 {
        let per_sector = self.units_per_sector();
        (self.last_unit + per_sector) / per_sector
    }

    /// 某个 FAT 扇区覆盖的有效簇区间
    ///
    /// 扇区超出 FAT 表时返回 `None`。
    pub fn sector_units(&self, sector: u32) -> Option<Interval> {
        let per_sector = self.units_per_sector();
        let first = sector.checked_mul(per_sector)?;
        let end = first.saturating_add(per_sector);
        let valid = Interval::from_bounds(self.first_unit(), self.last_unit + 1);
        Interval::from_bounds(first, end.max(first)).intersect(&valid)
    }

    /// 检查区间是否落在有效簇范围内
    pub fn check_interval(&self, interval: Interval) -> Result<()> {
        if interval.len == 0 {
            return Err(Error::new(ErrorKind::InvalidRange, "Zero-length interval"));
        }
        let end = interval.start as u64 + interval.len as u64;
        if interval.start < self.first_unit() || end > self.last_unit as u64 + 1 {
            return Err(Error::new(ErrorKind::InvalidRange, "Interval outside volume"));
        }
        Ok(())
    }
}

/// 分配结果容器
///
/// 容量固定：达到 `limit` 个区间后不再接受新的非连续区间。
/// 与最后一个区间首尾相接的新区间会被合并，不占用额外容量。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunList {
    runs: Vec<Interval>,
    limit: usize,
}

impl RunList {
    /// 创建容量为 `limit` 个区间的容器
    pub fn new(limit: usize) -> Self {
        Self {
            runs: Vec::with_capacity(limit),
            limit,
        }
    }

    /// 已收集的区间
    pub fn runs(&self) -> &[Interval] {
        &self.runs
    }

    /// 区间数量
    pub fn len(&self) -> usize {
        self.runs.len()
    }

    /// 是否为空
    pub fn is_empty(&self) -> bool {
        self.runs.is_empty()
    }

    /// 最大区间数
    pub fn limit(&self) -> usize {
        self.limit
    }

    /// 剩余可用的区间槽位
    pub fn remaining(&self) -> usize {
        self.limit - self.runs.len()
    }

    /// 是否已满
    pub fn is_full(&self) -> bool {
        self.runs.len() >= self.limit
    }

    /// 已收集的簇总数
    pub fn total(&self) -> u32 {
        self.runs.iter().map(|r| r.len).sum()
    }

    /// 清空容器
    pub fn clear(&mut self) {
        self.runs.clear();
    }

    /// 能否接受一个新区间（包括与末尾合并的情况）
    pub fn can_accept(&self, run: &Interval) -> bool {
        !self.is_full() || self.runs.last().is_some_and(|last| last.end() == run.start)
    }

    /// 追加区间
    ///
    /// 满且无法合并时返回 `false`。
    pub fn push(&mut self, run: Interval) -> bool {
        if let Some(last) = self.runs.last_mut() {
            if last.end() == run.start {
                last.len += run.len;
                return true;
            }
        }
        if self.is_full() {
            return false;
        }
        self.runs.push(run);
        true
    }
}

impl Default for RunList {
    fn default() -> Self {
        Self::new(FCACHE_DEFAULT_MAX_RUNS)
    }
}

/// 分配结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AllocOutcome {
    /// 已获得全部请求的簇
    Done,
    /// 受结果容量限制，只获得了这么多簇
    Partial(u32),
}

/// 插入区间的结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddOutcome {
    /// 区间已全部缓存
    Cached,
    /// 池已耗尽，调用者允许丢弃，这么多簇未被缓存
    Dropped {
        /// 未缓存的簇数
        uncached: u32,
    },
}
