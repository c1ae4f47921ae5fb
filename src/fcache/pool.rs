//! 条目池
//!
//! 启动时按字节预算一次性分配固定数量的条目槽位，所有卷共用。
//! 池耗尽是正常情况，调用者应回退到 FAT 表。

use super::entry::{ActiveEntry, Entry, EntryId};
use crate::{
    error::{Error, ErrorKind, Result},
    utils::RbTree,
};
use alloc::vec::Vec;

/// 条目池
#[derive(Debug)]
pub(crate) struct EntryPool {
    slots: Vec<Entry>,
    free_head: Option<EntryId>,
    in_use: usize,
}

impl EntryPool {
    /// 每个条目的内存开销（条目本身加两棵树中的节点）
    pub const ENTRY_COST: usize =
        core::mem::size_of::<Entry>() + 2 * RbTree::<u32, EntryId>::NODE_SIZE;

    /// 按字节预算创建池
    pub fn new(capacity_bytes: usize) -> Result<Self> {
        Self::with_entries(capacity_bytes / Self::ENTRY_COST)
    }

    /// 创建包含 `count` 个条目的池
    pub fn with_entries(count: usize) -> Result<Self> {
        if count == 0 || count > u32::MAX as usize {
            return Err(Error::new(ErrorKind::InvalidInput, "Invalid entry pool capacity"));
        }

        let mut slots = Vec::new();
        slots
            .try_reserve_exact(count)
            .map_err(|_| Error::new(ErrorKind::NoMemory, "Cannot allocate entry pool"))?;

        // 所有槽位串成一条空闲链表
        for i in 0..count {
            let next = (i + 1 < count).then(|| EntryId(i as u32 + 1));
            slots.push(Entry::Free { next });
        }

        log::debug!(
            "[FCACHE] entry pool: {} entries, {} bytes",
            count,
            count * Self::ENTRY_COST
        );

        Ok(Self {
            slots,
            free_head: Some(EntryId(0)),
            in_use: 0,
        })
    }

    /// 总条目数
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// 活动条目数
    pub fn in_use(&self) -> usize {
        self.in_use
    }

    /// 取出一个空闲条目
    ///
    /// `init` 拿到条目编号后返回活动状态（通常在这里把条目插入树中）。
    /// 池耗尽时返回 `None`，不会调用 `init`。
    pub fn acquire<F>(&mut self, init: F) -> Option<EntryId>
    where
        F: FnOnce(EntryId) -> ActiveEntry,
    {
        let id = self.free_head?;
        let Entry::Free { next } = self.slots[id.index()] else {
            log::error!("[FCACHE] free list points at active entry {:?}", id);
            return None;
        };
        self.free_head = next;
        self.slots[id.index()] = Entry::Active(init(id));
        self.in_use += 1;
        Some(id)
    }

    /// 归还条目，返回它原来的活动状态
    pub fn release(&mut self, id: EntryId) -> Option<ActiveEntry> {
        let slot = self.slots.get_mut(id.index())?;
        let active = *slot.as_active()?;
        *slot = Entry::Free {
            next: self.free_head,
        };
        self.free_head = Some(id);
        self.in_use -= 1;
        Some(active)
    }

    /// 获取活动条目
    pub fn get(&self, id: EntryId) -> Option<&ActiveEntry> {
        self.slots.get(id.index())?.as_active()
    }

    /// 获取活动条目（可变）
    pub fn get_mut(&mut self, id: EntryId) -> Option<&mut ActiveEntry> {
        self.slots.get_mut(id.index())?.as_active_mut()
    }

    /// 遍历所有活动条目
    pub fn active(&self) -> impl Iterator<Item = (EntryId, &ActiveEntry)> + '_ {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(i, slot)| slot.as_active().map(|a| (EntryId(i as u32), a)))
    }

    /// 释放整个池
    ///
    /// 所有条目必须已经归还。
    pub fn terminate(&mut self) -> Result<()> {
        if self.in_use != 0 {
            return Err(Error::new(ErrorKind::Busy, "Entry pool still has active entries"));
        }
        self.slots = Vec::new();
        self.free_head = None;
        Ok(())
    }
}
