//! 缓存条目
//!
//! 每个条目描述一个空闲区间。活动条目同时挂在所属卷的两棵树上
//! （按起始簇、按长度），空闲条目只在池的空闲链表里。

use crate::{
    types::{Interval, VolumeId},
    utils::NodeId,
};

/// 条目在池中的编号
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct EntryId(pub(crate) u32);

impl EntryId {
    #[inline]
    pub(crate) fn index(self) -> usize {
        self.0 as usize
    }
}

/// 活动条目
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct ActiveEntry {
    /// 所属卷
    pub volume: VolumeId,
    /// 空闲区间
    pub interval: Interval,
    /// 起始簇树中的节点
    pub by_start: NodeId,
    /// 长度树中的节点
    pub by_len: NodeId,
    /// 是否还没有写回 FAT 表
    pub dirty: bool,
}

/// 条目状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Entry {
    /// 在池的空闲链表中
    Free {
        /// 链表中的下一个空闲条目
        next: Option<EntryId>,
    },
    /// 挂在某个卷的两棵树上
    Active(ActiveEntry),
}

impl Entry {
    pub(crate) fn as_active(&self) -> Option<&ActiveEntry> {
        match self {
            Entry::Active(active) => Some(active),
            Entry::Free { .. } => None,
        }
    }

    pub(crate) fn as_active_mut(&mut self) -> Option<&mut ActiveEntry> {
        match self {
            Entry::Active(active) => Some(active),
            Entry::Free { .. } => None,
        }
    }
}
