//! FAT 空闲簇缓存常量定义
//!
//! 这个模块包含了：
//! - FAT 表布局相关常量
//! - FAT 表项取值
//! - 缓存默认配置

//=============================================================================
// FAT 表布局
//=============================================================================

/// 第一个可分配簇号（簇 0 和簇 1 保留）
pub const FAT_FIRST_CLUSTER: u32 = 2;

/// 最小扇区大小
pub const FAT_MIN_SECTOR_SIZE: u32 = 512;

/// 最大扇区大小
pub const FAT_MAX_SECTOR_SIZE: u32 = 4096;

/// FAT16 表项字节数
pub const FAT16_ENTRY_SIZE: u32 = 2;

/// FAT32 表项字节数
pub const FAT32_ENTRY_SIZE: u32 = 4;

/// FAT16 最大簇号
pub const FAT16_MAX_CLUSTER: u32 = 0xFFF4;

/// FAT32 最大簇号（高 4 位保留）
pub const FAT32_MAX_CLUSTER: u32 = 0x0FFF_FFF5;

//=============================================================================
// FAT 表项取值
//=============================================================================

/// 空闲簇表项
pub const FAT_ENTRY_FREE: u32 = 0;

/// FAT16 链结束标记
pub const FAT16_EOC: u32 = 0xFFFF;

/// FAT32 链结束标记
pub const FAT32_EOC: u32 = 0x0FFF_FFFF;

/// FAT32 表项有效位掩码
pub const FAT32_ENTRY_MASK: u32 = 0x0FFF_FFFF;

//=============================================================================
// 缓存默认配置
//=============================================================================

/// 默认条目池字节预算（64 KiB）
pub const FCACHE_DEFAULT_POOL_BYTES: usize = 64 * 1024;

/// 默认最大挂载卷数
pub const FCACHE_DEFAULT_MAX_VOLUMES: usize = 8;

/// 同步时单次写回 FAT 表的区间数
pub const FCACHE_DEFAULT_SYNC_BATCH: usize = 32;

/// 分配结果默认最多容纳的区间数
pub const FCACHE_DEFAULT_MAX_RUNS: usize = 16;
