//! 簇链释放

use super::{cache::Fcache, volume::CacheMode};
use crate::{
    error::{consistency_violation, Error, ErrorKind, Result},
    table::FreeSpaceTable,
    types::{Interval, VolumeId},
};
use alloc::vec::Vec;

/// 把簇序列合并成连续区间
fn coalesce<I: IntoIterator<Item = u32>>(units: I) -> Vec<Interval> {
    let mut runs: Vec<Interval> = Vec::new();
    for unit in units {
        match runs.last_mut() {
            Some(last) if last.start.checked_add(last.len) == Some(unit) => last.len += 1,
            _ => runs.push(Interval::new(unit, 1)),
        }
    }
    runs
}

impl Fcache {
    /// 释放一条簇链
    ///
    /// 相邻的簇合并成区间后作为脏区间插入缓存；池耗尽时该区间直接写回 FAT 表。
    /// 链中有重复的簇或已缓存的簇时整个操作被拒绝，缓存不变。
    /// 返回释放的簇数。
    pub fn free_chain<T, I>(&mut self, vol: VolumeId, units: I, table: &mut T) -> Result<u32>
    where
        T: FreeSpaceTable,
        I: IntoIterator<Item = u32>,
    {
        let geometry = self.volume(vol)?.geometry;
        let runs = coalesce(units);
        for run in &runs {
            geometry.check_interval(*run)?;
        }

        match self.mode(vol)? {
            CacheMode::ReadOnly => {
                return Err(Error::new(ErrorKind::NotActivated, "Volume is read-only"));
            }
            CacheMode::PassThrough => return table.free_runs(&runs),
            CacheMode::Active => {}
        }

        let mut ctx = self.ctx(vol)?;
        let mut sorted = runs.clone();
        sorted.sort_unstable_by_key(|r| r.start);
        if sorted.windows(2).any(|w| w[0].overlaps(&w[1])) {
            return Err(consistency_violation("Chain frees a cluster twice"));
        }
        for run in &runs {
            if ctx.overlaps_cached(*run)? {
                return Err(consistency_violation("Chain frees a cached cluster"));
            }
        }

        let mut freed = 0;
        let mut direct = 0;
        for run in runs {
            match ctx.add_interval(run, true, false) {
                Ok(_) => {}
                Err(err) if err.kind() == ErrorKind::PoolExhausted => {
                    table.free_runs(&[run])?;
                    direct += run.len;
                }
                Err(err) => return Err(err),
            }
            freed += run.len;
        }

        log::debug!(
            "[FCACHE] freed chain of {} clusters on volume {} ({} written through)",
            freed,
            vol.raw(),
            direct
        );
        Ok(freed)
    }
}
