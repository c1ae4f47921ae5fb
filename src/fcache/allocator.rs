//! 空闲簇分配
//!
//! 缓存能满足请求时从缓存区间中摘取簇；否则先写回脏队列，
//! 把整个请求交给 FAT 表，再把 FAT 表分配掉的簇从缓存中移除、
//! 把扫描中多发现的空闲区间补进缓存。
//!
//! 从缓存摘取的簇在 FAT 表中仍然是空闲的，调用者在下一次缓存操作之前
//! 必须把它们写成簇链；从 FAT 表回退路径得到的簇已经被表标记为占用。

use super::{cache::Fcache, interval::VolumeCtx, volume::CacheMode};
use crate::{
    error::{consistency_violation, Error, ErrorKind, Result},
    table::{FreeSpaceTable, ScanOutput},
    types::{AllocOutcome, Interval, RunList, VolumeId},
};

impl VolumeCtx<'_> {
    /// 从 `hint` 开始在 `[low, high)` 内摘取 `count` 个缓存簇
    ///
    /// 到达 `high` 后回绕到 `low` 一次。调用者保证范围内缓存了足够的簇。
    fn take_units<T: FreeSpaceTable>(
        &mut self,
        hint: u32,
        low: u32,
        high: u32,
        count: u32,
        out: &mut RunList,
        table: &mut T,
    ) -> Result<AllocOutcome> {
        let hint = if (low..high).contains(&hint) { hint } else { low };
        let mut cursor = hint;
        let mut wrapped = hint == low;
        let mut need = count;

        while need > 0 {
            let Some((id, piece)) = self.next_piece(cursor, high, need)? else {
                if wrapped {
                    break;
                }
                wrapped = true;
                cursor = low;
                continue;
            };

            if !out.can_accept(&piece) {
                log::debug!(
                    "[FCACHE] result list full, got {} of {} clusters",
                    count - need,
                    count
                );
                return Ok(AllocOutcome::Partial(count - need));
            }

            let taken = match self.remove_interval(piece) {
                Ok(()) => piece,
                Err(err) if err.kind() == ErrorKind::PoolExhausted => {
                    // 拆分失败只会发生在最后一段：改从条目左端取
                    let e = self.entry(id)?.interval;
                    let edge = Interval::new(e.start, piece.len);
                    if e.start >= low && out.can_accept(&edge) {
                        self.remove_interval(edge)?;
                        edge
                    } else {
                        self.remove_or_truncate(id, piece, table)?;
                        piece
                    }
                }
                Err(err) => return Err(err),
            };

            out.push(taken);
            need -= taken.len;
            cursor = taken.end();
        }

        if need > 0 {
            return Err(consistency_violation("Cached clusters fewer than counted"));
        }
        Ok(AllocOutcome::Done)
    }

    /// 缓存未命中：把请求交给 FAT 表并对账
    fn alloc_from_table<T: FreeSpaceTable>(
        &mut self,
        hint: u32,
        range: Option<(u32, u32)>,
        count: u32,
        out: &mut RunList,
        table: &mut T,
        batch: usize,
    ) -> Result<AllocOutcome> {
        self.stats.misses += 1;
        self.sync(table, batch)?;

        let mut scan = ScanOutput::new();
        let got = scan_table(table, hint, range, count, out, &mut scan)?;

        for run in &scan.allocated {
            self.forget(*run, table)?;
        }
        let mut refilled = 0;
        for run in &scan.surplus {
            refilled += self.add_uncached(*run)?;
        }

        log::debug!(
            "[FCACHE] miss on volume {}: table gave {} of {} clusters, {} surplus cached",
            self.vol.id.raw(),
            got,
            count,
            refilled
        );
        Ok(outcome(got, count))
    }
}

/// 调用 FAT 表分配，已分配区间追加到 `out`
fn scan_table<T: FreeSpaceTable>(
    table: &mut T,
    hint: u32,
    range: Option<(u32, u32)>,
    count: u32,
    out: &mut RunList,
    scan: &mut ScanOutput,
) -> Result<u32> {
    let max_runs = out.remaining();
    if max_runs == 0 {
        return Ok(0);
    }
    let got = match range {
        Some((low, high)) => {
            table.scan_free_runs_in_range(hint, low, high, count, max_runs, scan)?
        }
        None => table.scan_free_runs(hint, count, max_runs, scan)?,
    };
    for run in &scan.allocated {
        out.push(*run);
    }
    Ok(got)
}

fn outcome(got: u32, count: u32) -> AllocOutcome {
    if got >= count {
        AllocOutcome::Done
    } else {
        AllocOutcome::Partial(got)
    }
}

impl Fcache {
    fn check_request(&self, vol: VolumeId, count: u32, out: &RunList) -> Result<CacheMode> {
        if count == 0 {
            return Err(Error::new(ErrorKind::InvalidRange, "Zero-length request"));
        }
        if out.limit() == 0 {
            return Err(Error::new(ErrorKind::InvalidInput, "Result list has no capacity"));
        }
        let mode = self.mode(vol)?;
        if mode == CacheMode::ReadOnly {
            return Err(Error::new(ErrorKind::NotActivated, "Volume is read-only"));
        }
        Ok(mode)
    }

    /// 分配 `count` 个空闲簇，从 `hint` 开始查找
    ///
    /// 得到的区间追加到 `out`。`out` 容量不足时返回
    /// [`AllocOutcome::Partial`]，其中是实际得到的簇数。
    pub fn get_free_units<T: FreeSpaceTable>(
        &mut self,
        vol: VolumeId,
        hint: u32,
        count: u32,
        out: &mut RunList,
        table: &mut T,
    ) -> Result<AllocOutcome> {
        if self.check_request(vol, count, out)? == CacheMode::PassThrough {
            let got = scan_table(table, hint, None, count, out, &mut ScanOutput::new())?;
            return Ok(outcome(got, count));
        }

        let batch = self.config.sync_batch;
        let mut ctx = self.ctx(vol)?;
        let geometry = ctx.vol.geometry;

        if ctx.vol.free_units < count {
            return ctx.alloc_from_table(hint, None, count, out, table, batch);
        }

        ctx.stats.hits += 1;
        ctx.take_units(
            hint,
            geometry.first_unit(),
            geometry.last_unit + 1,
            count,
            out,
            table,
        )
    }

    /// 只从缓存中分配 `[low, high)` 内的簇
    ///
    /// 范围内缓存的簇不足时返回 `NotInCache`，不修改缓存，
    /// 调用者可以改用 FAT 表的范围扫描。
    pub fn get_free_units_in_range_cached<T: FreeSpaceTable>(
        &mut self,
        vol: VolumeId,
        hint: u32,
        low: u32,
        high: u32,
        count: u32,
        out: &mut RunList,
        table: &mut T,
    ) -> Result<AllocOutcome> {
        self.check_request(vol, count, out)?;
        self.check_bounds(vol, low, high)?;

        let mut ctx = self.ctx(vol)?;
        if ctx.cached_in_range(low, high, count)? < count {
            return Err(Error::new(ErrorKind::NotInCache, "Range not cached"));
        }
        ctx.stats.hits += 1;
        ctx.take_units(hint, low, high, count, out, table)
    }

    /// 分配 `[low, high)` 内的 `count` 个空闲簇
    ///
    /// 缓存不足时回退到 FAT 表的范围扫描，从不在范围外查找。
    pub fn get_free_units_in_range<T: FreeSpaceTable>(
        &mut self,
        vol: VolumeId,
        hint: u32,
        low: u32,
        high: u32,
        count: u32,
        out: &mut RunList,
        table: &mut T,
    ) -> Result<AllocOutcome> {
        let mode = self.check_request(vol, count, out)?;
        self.check_bounds(vol, low, high)?;

        if mode == CacheMode::PassThrough {
            let got = scan_table(
                table,
                hint,
                Some((low, high)),
                count,
                out,
                &mut ScanOutput::new(),
            )?;
            return Ok(outcome(got, count));
        }

        match self.get_free_units_in_range_cached(vol, hint, low, high, count, out, table) {
            Err(err) if err.kind() == ErrorKind::NotInCache => {
                let batch = self.config.sync_batch;
                self.ctx(vol)?
                    .alloc_from_table(hint, Some((low, high)), count, out, table, batch)
            }
            other => other,
        }
    }

    fn check_bounds(&self, vol: VolumeId, low: u32, high: u32) -> Result<()> {
        let geometry = self.volume(vol)?.geometry;
        if low >= high || low < geometry.first_unit() || high > geometry.last_unit + 1 {
            return Err(Error::new(ErrorKind::InvalidRange, "Invalid allocation range"));
        }
        Ok(())
    }

    /// 最佳匹配分配一段连续的 `count` 个簇
    ///
    /// 选取长度不小于 `count` 的最短缓存区间，从它的起始处取。
    /// 没有足够长的区间时返回 `NotInCache`。
    pub fn take_contiguous(&mut self, vol: VolumeId, count: u32) -> Result<Interval> {
        if count == 0 {
            return Err(Error::new(ErrorKind::InvalidRange, "Zero-length request"));
        }
        let mut ctx = self.ctx(vol)?;
        let Some((_, e)) = ctx.best_fit(count)? else {
            ctx.stats.misses += 1;
            return Err(Error::new(ErrorKind::NotInCache, "No cached run long enough"));
        };

        let taken = Interval::new(e.start, count);
        ctx.remove_interval(taken)?;
        ctx.stats.hits += 1;
        log::trace!("[FCACHE] best fit {:?} from {:?}", taken, e);
        Ok(taken)
    }
}
