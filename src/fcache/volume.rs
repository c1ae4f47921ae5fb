//! 每卷缓存状态

use super::entry::EntryId;
use crate::{
    types::{VolumeGeometry, VolumeId},
    utils::RbTree,
};
use alloc::collections::BTreeMap;
use bitflags::bitflags;

bitflags! {
    /// 挂载标志
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct MountFlags: u32 {
        /// 只读卷：不启用缓存，分配和释放都返回 `NotActivated`
        const READ_ONLY = 0x0001;
        /// 不启用缓存：所有操作直接交给 FAT 表
        const NO_CACHE = 0x0002;
    }
}

/// 卷的缓存模式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum CacheMode {
    /// 缓存启用
    Active,
    /// 缓存关闭，分配/释放直接访问 FAT 表
    PassThrough,
    /// 只读
    ReadOnly,
}

/// 每卷缓存状态
#[derive(Debug)]
pub(crate) struct VolumeState {
    pub id: VolumeId,
    pub geometry: VolumeGeometry,
    pub flags: MountFlags,
    /// 按起始簇索引
    pub by_start: RbTree<u32, EntryId>,
    /// 按长度索引（同一组条目）
    pub by_len: RbTree<u32, EntryId>,
    /// 脏队列：起始簇 -> 条目
    pub dirty: BTreeMap<u32, EntryId>,
    /// 所有活动条目的长度之和
    pub free_units: u32,
    /// 缓存是否覆盖了卷上全部空闲簇
    pub complete: bool,
}

impl VolumeState {
    pub fn new(id: VolumeId, geometry: VolumeGeometry, flags: MountFlags) -> Self {
        Self {
            id,
            geometry,
            flags,
            by_start: RbTree::new(),
            by_len: RbTree::new(),
            dirty: BTreeMap::new(),
            free_units: 0,
            complete: false,
        }
    }

    pub fn mode(&self) -> CacheMode {
        if self.flags.contains(MountFlags::READ_ONLY) {
            CacheMode::ReadOnly
        } else if self.flags.contains(MountFlags::NO_CACHE) {
            CacheMode::PassThrough
        } else {
            CacheMode::Active
        }
    }

    /// 起始簇 `<= unit` 的最后一个条目
    pub fn floor(&self, unit: u32) -> Option<EntryId> {
        self.by_start.floor(unit).map(|n| *self.by_start.value(n))
    }

    /// 起始簇 `>= unit` 的第一个条目
    pub fn ceiling(&self, unit: u32) -> Option<EntryId> {
        self.by_start.ceiling(unit).map(|n| *self.by_start.value(n))
    }

    /// 按起始簇升序排列的条目
    pub fn entries(&self) -> impl Iterator<Item = EntryId> + '_ {
        self.by_start.iter().map(|(_, _, id)| *id)
    }

    pub fn entry_count(&self) -> usize {
        self.by_start.len()
    }
}
