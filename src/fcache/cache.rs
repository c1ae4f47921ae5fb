//! 缓存上下文与卷生命周期
//!
//! [`Fcache`] 持有共享条目池和所有已挂载卷的状态，由初始化它的组件拥有，
//! 每次调用显式传入。它本身不加锁，调用者负责串行化所有修改操作。

use super::{
    entry::EntryId,
    interval::{check_volume, VolumeCtx},
    pool::EntryPool,
    volume::{CacheMode, MountFlags, VolumeState},
};
use crate::{
    consts::*,
    error::{Error, ErrorKind, Result},
    table::FreeSpaceTable,
    types::{AddOutcome, Interval, VolumeGeometry, VolumeId},
};
use alloc::{collections::BTreeMap, vec::Vec};

/// 缓存配置
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FcacheConfig {
    /// 条目池的内存预算（字节）
    pub pool_bytes: usize,
    /// 同时挂载的最大卷数
    pub max_volumes: usize,
    /// 写回时每次交给 FAT 表的最大区间数
    pub sync_batch: usize,
}

impl Default for FcacheConfig {
    fn default() -> Self {
        Self {
            pool_bytes: FCACHE_DEFAULT_POOL_BYTES,
            max_volumes: FCACHE_DEFAULT_MAX_VOLUMES,
            sync_batch: FCACHE_DEFAULT_SYNC_BATCH,
        }
    }
}

impl FcacheConfig {
    /// 条目池恰好容纳 `entries` 个条目的配置
    pub fn with_entries(entries: usize) -> Self {
        Self {
            pool_bytes: entries.saturating_mul(EntryPool::ENTRY_COST),
            ..Self::default()
        }
    }

    fn validate(&self) -> Result<()> {
        if self.max_volumes == 0 {
            return Err(Error::new(ErrorKind::InvalidInput, "max_volumes must be positive"));
        }
        if self.sync_batch == 0 {
            return Err(Error::new(ErrorKind::InvalidInput, "sync_batch must be positive"));
        }
        Ok(())
    }
}

/// 缓存统计信息
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FcacheStats {
    /// 分配请求由缓存直接满足的次数
    pub hits: u64,
    /// 分配或扇区查询回退到 FAT 表的次数
    pub misses: u64,
    /// 插入时与相邻区间合并的次数
    pub merges: u64,
    /// 删除时拆分区间的次数
    pub splits: u64,
    /// 条目池耗尽的次数
    pub exhausted: u64,
    /// 因池耗尽而没有缓存的空闲簇数
    pub dropped_units: u64,
    /// 写回 FAT 表的簇数
    pub synced_units: u64,
}

impl FcacheStats {
    /// 计算命中率
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

/// 空闲簇区间缓存
#[derive(Debug)]
pub struct Fcache {
    pub(crate) config: FcacheConfig,
    pub(crate) pool: EntryPool,
    pub(crate) volumes: BTreeMap<VolumeId, VolumeState>,
    next_volume: u32,
    pub(crate) stats: FcacheStats,
    terminated: bool,
}

impl Fcache {
    /// 初始化缓存，按配置一次性分配条目池
    pub fn new(config: FcacheConfig) -> Result<Self> {
        config.validate()?;
        let pool = EntryPool::new(config.pool_bytes)?;

        log::info!(
            "[FCACHE] init: {} entries, {} volumes max",
            pool.capacity(),
            config.max_volumes
        );

        Ok(Self {
            config,
            pool,
            volumes: BTreeMap::new(),
            next_volume: 0,
            stats: FcacheStats::default(),
            terminated: false,
        })
    }

    /// 释放条目池
    ///
    /// 所有卷必须已经卸载。
    pub fn terminate(&mut self) -> Result<()> {
        if !self.volumes.is_empty() {
            return Err(Error::new(ErrorKind::Busy, "Volumes still mounted"));
        }
        self.pool.terminate()?;
        self.terminated = true;
        log::info!("[FCACHE] terminated");
        Ok(())
    }

    /// 挂载一个卷，返回空的缓存状态
    ///
    /// 带 `READ_ONLY` 或 `NO_CACHE` 的卷不启用缓存。
    pub fn mount(&mut self, geometry: VolumeGeometry, flags: MountFlags) -> Result<VolumeId> {
        if self.terminated {
            return Err(Error::new(ErrorKind::InvalidState, "Cache terminated"));
        }
        geometry.validate()?;
        if self.volumes.len() >= self.config.max_volumes {
            return Err(Error::new(ErrorKind::NoSpace, "Too many mounted volumes"));
        }

        let id = VolumeId(self.next_volume);
        self.next_volume = self
            .next_volume
            .checked_add(1)
            .ok_or(Error::new(ErrorKind::NoSpace, "Volume ids exhausted"))?;

        let state = VolumeState::new(id, geometry, flags);
        log::debug!(
            "[FCACHE] mount volume {}: {:?}, clusters [{}, {}], mode {:?}",
            id.raw(),
            geometry.fat_type,
            geometry.first_unit(),
            geometry.last_unit,
            state.mode()
        );
        self.volumes.insert(id, state);
        Ok(id)
    }

    /// 卸载卷
    ///
    /// 先写回脏队列，再把所有条目归还给池。`force` 时写回失败只记录日志，
    /// 卷照样卸载。
    pub fn unmount<T: FreeSpaceTable>(
        &mut self,
        vol: VolumeId,
        force: bool,
        table: &mut T,
    ) -> Result<()> {
        let batch = self.config.sync_batch;
        if self.mode(vol)? == CacheMode::Active {
            let mut ctx = self.ctx(vol)?;
            match ctx.sync(table, batch) {
                Ok(_) => {}
                Err(err) if force => log::warn!(
                    "[FCACHE] forced unmount of volume {} drops {} dirty entries: {}",
                    vol.raw(),
                    ctx.vol.dirty.len(),
                    err
                ),
                Err(err) => return Err(err),
            }
            ctx.release_all();
        }
        self.volumes.remove(&vol);
        log::debug!("[FCACHE] unmount volume {} (force={})", vol.raw(), force);
        Ok(())
    }

    // --- 内部访问 ---

    pub(crate) fn volume(&self, vol: VolumeId) -> Result<&VolumeState> {
        self.volumes
            .get(&vol)
            .ok_or(Error::new(ErrorKind::NotFound, "Volume not mounted"))
    }

    pub(crate) fn mode(&self, vol: VolumeId) -> Result<CacheMode> {
        Ok(self.volume(vol)?.mode())
    }

    /// 缓存已启用的卷的操作上下文
    pub(crate) fn ctx(&mut self, vol: VolumeId) -> Result<VolumeCtx<'_>> {
        let state = self
            .volumes
            .get_mut(&vol)
            .ok_or(Error::new(ErrorKind::NotFound, "Volume not mounted"))?;
        if state.mode() != CacheMode::Active {
            return Err(Error::new(ErrorKind::NotActivated, "Cache disabled on volume"));
        }
        Ok(VolumeCtx {
            vol: state,
            pool: &mut self.pool,
            stats: &mut self.stats,
        })
    }

    // --- 区间操作 ---

    /// 插入空闲区间 `[start, start + len)`
    ///
    /// 与相邻区间合并。池耗尽时：`allow_force` 则返回
    /// [`AddOutcome::Dropped`]，否则返回 `PoolExhausted`，
    /// 调用者应直接把区间写回 FAT 表。
    pub fn add_interval(
        &mut self,
        vol: VolumeId,
        start: u32,
        len: u32,
        mark_dirty: bool,
        allow_force: bool,
    ) -> Result<AddOutcome> {
        self.ctx(vol)?
            .add_interval(Interval::new(start, len), mark_dirty, allow_force)
    }

    /// 移除空闲区间 `[start, start + len)`
    ///
    /// 区间不在缓存中时返回 `NotInCache`。
    pub fn remove_interval(&mut self, vol: VolumeId, start: u32, len: u32) -> Result<()> {
        self.ctx(vol)?.remove_interval(Interval::new(start, len))
    }

    // --- 诊断 ---

    /// 卷上缓存的空闲簇总数
    pub fn free_units(&self, vol: VolumeId) -> Result<u32> {
        Ok(self.volume(vol)?.free_units)
    }

    /// 卷上的条目数
    pub fn entry_count(&self, vol: VolumeId) -> Result<usize> {
        Ok(self.volume(vol)?.entry_count())
    }

    /// 等待写回的条目数
    pub fn dirty_count(&self, vol: VolumeId) -> Result<usize> {
        Ok(self.volume(vol)?.dirty.len())
    }

    /// 缓存是否覆盖了卷上全部空闲簇
    pub fn is_complete(&self, vol: VolumeId) -> Result<bool> {
        Ok(self.volume(vol)?.complete)
    }

    /// 按起始簇升序列出缓存的区间
    pub fn intervals(&self, vol: VolumeId) -> Result<Vec<Interval>> {
        let state = self.volume(vol)?;
        state.entries().map(|id| self.interval_of(state, id)).collect()
    }

    /// 最长的缓存区间
    pub fn largest_interval(&self, vol: VolumeId) -> Result<Option<Interval>> {
        let state = self.volume(vol)?;
        match state.by_len.last() {
            Some(node) => Ok(Some(self.interval_of(state, *state.by_len.value(node))?)),
            None => Ok(None),
        }
    }

    fn interval_of(&self, state: &VolumeState, id: EntryId) -> Result<Interval> {
        match self.pool.get(id) {
            Some(e) if e.volume == state.id => Ok(e.interval),
            _ => Err(Error::new(
                ErrorKind::ConsistencyViolation,
                "Tree references an inactive entry",
            )),
        }
    }

    /// 检查卷的索引、计数和脏队列是否一致
    pub fn check_consistency(&self, vol: VolumeId) -> Result<()> {
        check_volume(self.volume(vol)?, &self.pool)
    }

    /// 统计信息
    pub fn stats(&self) -> &FcacheStats {
        &self.stats
    }

    /// 清零统计信息
    pub fn reset_stats(&mut self) {
        self.stats = FcacheStats::default();
    }

    /// 条目池容量
    pub fn pool_capacity(&self) -> usize {
        self.pool.capacity()
    }

    /// 正在使用的条目数（所有卷）
    pub fn pool_in_use(&self) -> usize {
        self.pool.in_use()
    }

    /// 配置
    pub fn config(&self) -> &FcacheConfig {
        &self.config
    }

    /// 已挂载的卷数
    pub fn mounted_volumes(&self) -> usize {
        self.volumes.len()
    }
}
