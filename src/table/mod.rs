//! FAT 表接口
//!
//! 区间缓存本身不读写磁盘。缓存未命中、同步脏区间以及统计空闲簇时，
//! 通过 [`FreeSpaceTable`] 访问底层 FAT 表。
//!
//! [`MemFat`] 是一个基于内存字节数组的实现，表项按 FAT16/FAT32
//! 磁盘格式（小端）编码，可用于测试或作为 RAM 盘的 FAT 表。

mod mem;

pub use mem::MemFat;

use crate::{error::Result, types::Interval};
use alloc::vec::Vec;

/// 外部分配结果
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanOutput {
    /// 已分配（在 FAT 表中标记为占用）的区间，按分配顺序排列
    pub allocated: Vec<Interval>,
    /// 扫描中发现但没有分配的空闲区间
    pub surplus: Vec<Interval>,
}

impl ScanOutput {
    /// 创建空结果
    pub fn new() -> Self {
        Self::default()
    }

    /// 已分配的簇总数
    pub fn allocated_units(&self) -> u32 {
        self.allocated.iter().map(|r| r.len).sum()
    }

    /// 清空结果
    pub fn clear(&mut self) {
        self.allocated.clear();
        self.surplus.clear();
    }
}

/// 底层 FAT 表接口
///
/// 每个实例对应一个卷。实现者自行负责并发控制。
pub trait FreeSpaceTable {
    /// 从 `hint` 开始分配 `count` 个簇（到达卷末尾后回绕）
    ///
    /// 结果追加到 `out`，已分配区间最多 `max_runs` 个。
    ///
    /// # 返回
    ///
    /// 实际分配的簇数。受 `max_runs` 限制时可能小于 `count`；
    /// 空闲簇不足时返回 `NoSpace` 且不分配任何簇。
    fn scan_free_runs(
        &mut self,
        hint: u32,
        count: u32,
        max_runs: usize,
        out: &mut ScanOutput,
    ) -> Result<u32>;

    /// 与 [`FreeSpaceTable::scan_free_runs`] 相同，但只在 `[low, high)` 内分配
    fn scan_free_runs_in_range(
        &mut self,
        hint: u32,
        low: u32,
        high: u32,
        count: u32,
        max_runs: usize,
        out: &mut ScanOutput,
    ) -> Result<u32>;

    /// 把区间写回为空闲
    ///
    /// # 返回
    ///
    /// 释放的簇数
    fn free_runs(&mut self, runs: &[Interval]) -> Result<u32>;

    /// 读取并扫描一个 FAT 扇区
    ///
    /// 扇区内的空闲区间追加到 `runs`。
    ///
    /// # 返回
    ///
    /// 扇区内空闲簇数
    fn sector_free_count(&mut self, sector: u32, runs: &mut Vec<Interval>) -> Result<u32>;

    /// 扫描整个 FAT 表，统计空闲簇数
    fn total_free_units(&mut self) -> Result<u32>;
}
