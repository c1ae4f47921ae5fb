//! 空闲簇区间缓存
//!
//! 在内存中维护每个卷的空闲簇区间，避免每次分配和释放都扫描 FAT 表。
//!
//! # 结构
//!
//! ```text
//! Fcache
//! ├── EntryPool            所有卷共享的固定容量条目池
//! └── VolumeState (每卷)
//!     ├── by_start: RbTree  起始簇 -> 条目
//!     ├── by_len:   RbTree  长度 -> 条目（同一组条目）
//!     ├── dirty             尚未写回 FAT 表的条目
//!     └── free_units        所有区间长度之和
//! ```
//!
//! 池耗尽和区间不在缓存中都是正常情况：底层操作以 `PoolExhausted` /
//! `NotInCache` 报告，高层操作（分配、释放簇链、扇区统计）自行回退到
//! [`FreeSpaceTable`](crate::table::FreeSpaceTable)。
//!
//! # 示例
//!
//! ```rust,ignore
//! use fat_fcache::{Fcache, FcacheConfig, MountFlags, MemFat, RunList, VolumeGeometry, FatType};
//!
//! let geometry = VolumeGeometry::new(FatType::Fat32, 512, 65_000);
//! let mut table = MemFat::new(geometry)?;
//! let mut cache = Fcache::new(FcacheConfig::default())?;
//! let vol = cache.mount(geometry, MountFlags::empty())?;
//! cache.populate(vol, &mut table)?;
//!
//! let mut out = RunList::new(8);
//! cache.get_free_units(vol, 100, 32, &mut out, &mut table)?;
//! ```

mod allocator;
mod cache;
mod chain;
mod entry;
mod interval;
mod pool;
mod sync;
mod volume;

#[cfg(test)]
mod tests;

pub use cache::{Fcache, FcacheConfig, FcacheStats};
pub use volume::MountFlags;
