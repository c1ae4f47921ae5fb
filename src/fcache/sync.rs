//! 写回与空闲簇统计

use super::{cache::Fcache, volume::CacheMode};
use crate::{
    error::{Error, ErrorKind, Result},
    table::FreeSpaceTable,
    types::VolumeId,
};
use alloc::vec::Vec;

impl Fcache {
    /// 把卷的脏队列写回 FAT 表
    ///
    /// 条目仍留在缓存中。返回写回的簇数。
    pub fn sync_volume<T: FreeSpaceTable>(&mut self, vol: VolumeId, table: &mut T) -> Result<u32> {
        let batch = self.config.sync_batch;
        self.ctx(vol)?.sync(table, batch)
    }

    /// 卷上的空闲簇数
    ///
    /// 缓存覆盖全部空闲簇时直接返回维护的计数，否则扫描整个 FAT 表。
    pub fn volume_status<T: FreeSpaceTable>(
        &mut self,
        vol: VolumeId,
        table: &mut T,
    ) -> Result<u32> {
        if self.mode(vol)? != CacheMode::Active {
            return table.total_free_units();
        }

        let batch = self.config.sync_batch;
        let mut ctx = self.ctx(vol)?;
        ctx.sync(table, batch)?;
        if ctx.vol.complete {
            return Ok(ctx.vol.free_units);
        }

        log::debug!(
            "[FCACHE] volume {} cache incomplete, scanning table",
            vol.raw()
        );
        table.total_free_units()
    }

    /// FAT 扇区 `sector` 中的空闲簇数
    ///
    /// 整个扇区都在一个缓存区间内时直接返回；否则读取并扫描该扇区，
    /// 顺便把发现的空闲区间补进缓存（池耗尽时放弃）。
    pub fn sector_free_count<T: FreeSpaceTable>(
        &mut self,
        vol: VolumeId,
        sector: u32,
        table: &mut T,
    ) -> Result<u32> {
        let units = self
            .volume(vol)?
            .geometry
            .sector_units(sector)
            .ok_or(Error::new(ErrorKind::InvalidRange, "Sector outside FAT"))?;

        let mut runs = Vec::new();
        if self.mode(vol)? != CacheMode::Active {
            return table.sector_free_count(sector, &mut runs);
        }

        let batch = self.config.sync_batch;
        let mut ctx = self.ctx(vol)?;
        if let Some((_, e)) = ctx.entry_containing(units.start)? {
            if e.contains(&units) {
                return Ok(units.len);
            }
        }

        ctx.sync(table, batch)?;
        let free = table.sector_free_count(sector, &mut runs)?;
        let mut cached = 0;
        for run in runs {
            cached += ctx.add_uncached(run)?;
        }

        log::trace!(
            "[FCACHE] sector {} of volume {}: {} free, {} newly cached",
            sector,
            vol.raw(),
            free,
            cached
        );
        Ok(free)
    }

    /// 扫描整个 FAT 表预热缓存
    ///
    /// 没有区间因池耗尽被放弃时，缓存此后被视为覆盖了全部空闲簇。
    /// 返回卷上的空闲簇数。
    pub fn populate<T: FreeSpaceTable>(&mut self, vol: VolumeId, table: &mut T) -> Result<u32> {
        let batch = self.config.sync_batch;
        let sectors = {
            let mut ctx = self.ctx(vol)?;
            ctx.sync(table, batch)?;
            ctx.vol.complete = true;
            ctx.vol.geometry.fat_sectors()
        };

        let mut free = 0;
        for sector in 0..sectors {
            match self.sector_free_count(vol, sector, table) {
                Ok(n) => free += n,
                Err(err) => {
                    self.ctx(vol)?.vol.complete = false;
                    return Err(err);
                }
            }
        }

        let state = self.volume(vol)?;
        log::info!(
            "[FCACHE] populated volume {}: {} free clusters, {} entries, complete={}",
            vol.raw(),
            free,
            state.entry_count(),
            state.complete
        );
        Ok(free)
    }
}
