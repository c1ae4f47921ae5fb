//! fat_fcache: FAT 文件系统空闲簇区间缓存
//!
//! 在内存中以区间形式维护每个卷的空闲簇，旨在提供：
//! - **O(log n)** 的区间插入、删除和近似查找
//! - 相邻区间**自动合并**，释放簇链不会让缓存碎片化
//! - 固定容量的**共享条目池**，耗尽时回退到 FAT 表而不是失败
//! - **可注入**的 FAT 表接口，便于测试
//!
//! # 示例
//!
//! ```rust,ignore
//! use fat_fcache::{Fcache, FcacheConfig, FatType, MemFat, MountFlags, RunList, VolumeGeometry};
//!
//! fn main() -> fat_fcache::Result<()> {
//!     let geometry = VolumeGeometry::new(FatType::Fat32, 512, 100_000);
//!     let mut table = MemFat::new(geometry)?;
//!
//!     let mut cache = Fcache::new(FcacheConfig::default())?;
//!     let vol = cache.mount(geometry, MountFlags::empty())?;
//!
//!     // 释放簇链：进入缓存的脏队列
//!     cache.free_chain(vol, [10, 11, 12], &mut table)?;
//!
//!     // 分配：优先从缓存中取
//!     let mut out = RunList::new(4);
//!     cache.get_free_units(vol, 0, 3, &mut out, &mut table)?;
//!
//!     cache.unmount(vol, false, &mut table)?;
//!     cache.terminate()
//! }
//! ```
//!
//! # 模块结构
//!
//! - [`error`] - 错误类型定义
//! - [`consts`] - 常量定义
//! - [`types`] - 区间、卷几何信息等数据结构
//! - [`utils`] - 平衡树
//! - [`table`] - FAT 表接口和内存实现
//! - [`fcache`] - 区间缓存

#![cfg_attr(not(test), no_std)]
#![deny(unsafe_code)]
#![warn(missing_docs)]

extern crate alloc;

#[cfg(all(feature = "std", not(test)))]
extern crate std;

// ===== 核心模块 =====

/// 错误处理
pub mod error;

/// 常量定义
pub mod consts;

/// 数据结构定义
pub mod types;

/// 通用数据结构
pub mod utils;

/// FAT 表接口
pub mod table;

/// 空闲簇区间缓存
pub mod fcache;

// ===== 公共导出 =====

// 错误处理
pub use error::{Error, ErrorKind, Result};

// 数据结构
pub use types::{
    AddOutcome, AllocOutcome, FatType, Interval, IntervalRelation, RunList, VolumeGeometry,
    VolumeId,
};

// 平衡树
pub use utils::{NodeId, RbTree};

// FAT 表
pub use table::{FreeSpaceTable, MemFat, ScanOutput};

// 区间缓存
pub use fcache::{Fcache, FcacheConfig, FcacheStats, MountFlags};
