//! 区间插入与删除
//!
//! [`VolumeCtx`] 把一个卷的状态、共享条目池和统计信息借用到一起，
//! 所有修改两棵树的操作都经过这里，保证两棵树始终包含同一组条目。

use super::{
    cache::FcacheStats,
    entry::{ActiveEntry, EntryId},
    pool::EntryPool,
    volume::VolumeState,
};
use crate::{
    error::{consistency_violation, Error, ErrorKind, Result},
    table::FreeSpaceTable,
    types::{AddOutcome, Interval},
};
use alloc::vec::Vec;

/// 单卷操作上下文
pub(crate) struct VolumeCtx<'a> {
    pub vol: &'a mut VolumeState,
    pub pool: &'a mut EntryPool,
    pub stats: &'a mut FcacheStats,
}

impl<'a> VolumeCtx<'a> {
    // --- 条目维护 ---

    /// 读取本卷的活动条目
    pub fn entry(&self, id: EntryId) -> Result<ActiveEntry> {
        match self.pool.get(id) {
            Some(e) if e.volume == self.vol.id => Ok(*e),
            _ => Err(consistency_violation("Tree references an inactive entry")),
        }
    }

    /// 包含 `unit` 的条目
    pub fn entry_containing(&self, unit: u32) -> Result<Option<(EntryId, Interval)>> {
        let Some(id) = self.vol.floor(unit) else {
            return Ok(None);
        };
        let interval = self.entry(id)?.interval;
        Ok(interval.contains_unit(unit).then_some((id, interval)))
    }

    /// `interval` 是否与某个已缓存区间重叠
    pub fn overlaps_cached(&self, interval: Interval) -> Result<bool> {
        if let Some(id) = self.vol.floor(interval.start) {
            if self.entry(id)?.interval.end() > interval.start {
                return Ok(true);
            }
        }
        match self.vol.ceiling(interval.start) {
            Some(id) => Ok(self.entry(id)?.interval.start < interval.end()),
            None => Ok(false),
        }
    }

    /// 取一个新条目并插入两棵树
    ///
    /// 池耗尽时返回 `None`，状态不变。
    fn insert_new(&mut self, interval: Interval) -> Option<EntryId> {
        let vol = &mut *self.vol;
        let volume = vol.id;
        self.pool.acquire(|id| ActiveEntry {
            volume,
            interval,
            by_start: vol.by_start.insert(interval.start, id),
            by_len: vol.by_len.insert(interval.len, id),
            dirty: false,
        })
    }

    /// 从两棵树和脏队列中摘下条目并归还给池
    ///
    /// 不修改 `free_units`。
    fn discard(&mut self, id: EntryId) -> Result<ActiveEntry> {
        let e = self.entry(id)?;
        self.vol.by_start.remove(e.by_start);
        self.vol.by_len.remove(e.by_len);
        if e.dirty {
            self.vol.dirty.remove(&e.interval.start);
        }
        self.pool.release(id);
        Ok(e)
    }

    /// 原地修改条目区间，同步更新两棵树和脏队列
    fn update(&mut self, id: EntryId, new: Interval) -> Result<()> {
        let mut e = self.entry(id)?;
        let old = e.interval;

        if new.start != old.start {
            e.by_start = self.vol.by_start.rekey(e.by_start, new.start);
            if e.dirty {
                self.vol.dirty.remove(&old.start);
                self.vol.dirty.insert(new.start, id);
            }
        }
        if new.len != old.len {
            e.by_len = self.vol.by_len.rekey(e.by_len, new.len);
        }
        e.interval = new;

        match self.pool.get_mut(id) {
            Some(slot) => *slot = e,
            None => return Err(consistency_violation("Entry vanished during update")),
        }
        log::trace!("[FCACHE] entry {:?}: {:?} -> {:?}", id, old, new);
        Ok(())
    }

    /// 把条目放进脏队列
    fn set_dirty(&mut self, id: EntryId) -> Result<()> {
        let start = self.entry(id)?.interval.start;
        if let Some(e) = self.pool.get_mut(id) {
            if !e.dirty {
                e.dirty = true;
                self.vol.dirty.insert(start, id);
            }
        }
        Ok(())
    }

    /// 把条目移出脏队列
    fn clear_dirty(&mut self, id: EntryId) -> Result<()> {
        let start = self.entry(id)?.interval.start;
        if let Some(e) = self.pool.get_mut(id) {
            if e.dirty {
                e.dirty = false;
                self.vol.dirty.remove(&start);
            }
        }
        Ok(())
    }

    /// 放弃一段本该缓存的空闲区间
    fn note_dropped(&mut self, units: u32) {
        self.stats.dropped_units += units as u64;
        self.vol.complete = false;
    }

    // --- 插入 ---

    /// 插入空闲区间，与相邻区间合并
    ///
    /// - 与左右邻居相接时原地扩展邻居，不占用新条目
    /// - 否则从池中取新条目
    /// - 池耗尽：`allow_force` 时放弃整个区间并返回未缓存的簇数，
    ///   否则返回 `PoolExhausted`
    /// - 与已缓存区间重叠属于调用者错误
    pub fn add_interval(
        &mut self,
        interval: Interval,
        mark_dirty: bool,
        allow_force: bool,
    ) -> Result<AddOutcome> {
        self.vol.geometry.check_interval(interval)?;

        let left = match self.vol.floor(interval.start) {
            Some(id) => Some((id, self.entry(id)?.interval)),
            None => None,
        };
        let right = match self.vol.ceiling(interval.start) {
            Some(id) => Some((id, self.entry(id)?.interval)),
            None => None,
        };

        if left.is_some_and(|(_, l)| l.end() > interval.start)
            || right.is_some_and(|(_, r)| r.start < interval.end())
        {
            return Err(consistency_violation("Added interval overlaps a cached interval"));
        }

        let merge_left = left.filter(|(_, l)| l.end() == interval.start);
        let merge_right = right.filter(|(_, r)| r.start == interval.end());

        let target = match (merge_left, merge_right) {
            (Some((lid, l)), Some((rid, r))) => {
                // 左邻居吸收新区间和右邻居
                let right_dirty = self.discard(rid)?.dirty;
                self.update(lid, Interval::from_bounds(l.start, r.end()))?;
                if right_dirty {
                    self.set_dirty(lid)?;
                }
                self.stats.merges += 2;
                lid
            }
            (Some((lid, l)), None) => {
                self.update(lid, Interval::from_bounds(l.start, interval.end()))?;
                self.stats.merges += 1;
                lid
            }
            (None, Some((rid, r))) => {
                self.update(rid, Interval::from_bounds(interval.start, r.end()))?;
                self.stats.merges += 1;
                rid
            }
            (None, None) => match self.insert_new(interval) {
                Some(id) => id,
                None => {
                    self.stats.exhausted += 1;
                    self.note_dropped(interval.len);
                    if allow_force {
                        log::warn!(
                            "[FCACHE] pool exhausted, dropping {:?} on volume {}",
                            interval,
                            self.vol.id.raw()
                        );
                        return Ok(AddOutcome::Dropped {
                            uncached: interval.len,
                        });
                    }
                    log::debug!("[FCACHE] pool exhausted while adding {:?}", interval);
                    return Err(Error::new(ErrorKind::PoolExhausted, "Entry pool exhausted"));
                }
            },
        };

        self.vol.free_units += interval.len;
        if mark_dirty {
            self.set_dirty(target)?;
        }
        log::trace!(
            "[FCACHE] add {:?} -> entry {:?} (dirty={}), free={}",
            interval,
            target,
            mark_dirty,
            self.vol.free_units
        );
        Ok(AddOutcome::Cached)
    }

    // --- 删除 ---

    /// 从缓存中移除一段空闲区间
    ///
    /// 区间必须被某个条目完整包含，否则返回 `NotInCache`。
    /// 需要拆分而池已耗尽时返回 `PoolExhausted`，状态不变。
    pub fn remove_interval(&mut self, interval: Interval) -> Result<()> {
        self.vol.geometry.check_interval(interval)?;

        let Some(id) = self.vol.floor(interval.start) else {
            return Err(Error::new(ErrorKind::NotInCache, "Range not cached"));
        };
        let e = self.entry(id)?;
        let cur = e.interval;
        if !cur.contains(&interval) {
            return Err(Error::new(ErrorKind::NotInCache, "Range not cached"));
        }

        match (interval.start == cur.start, interval.end() == cur.end()) {
            (true, true) => {
                self.discard(id)?;
            }
            (true, false) => {
                self.update(id, Interval::from_bounds(interval.end(), cur.end()))?;
            }
            (false, true) => {
                self.update(id, Interval::from_bounds(cur.start, interval.start))?;
            }
            (false, false) => {
                // 先取到右半部分的条目，失败时不做任何修改
                let tail = Interval::from_bounds(interval.end(), cur.end());
                let Some(tail_id) = self.insert_new(tail) else {
                    self.stats.exhausted += 1;
                    log::debug!("[FCACHE] pool exhausted while splitting {:?}", cur);
                    return Err(Error::new(ErrorKind::PoolExhausted, "Entry pool exhausted"));
                };
                self.update(id, Interval::from_bounds(cur.start, interval.start))?;
                if e.dirty {
                    self.set_dirty(tail_id)?;
                }
                self.stats.splits += 1;
            }
        }

        self.vol.free_units -= interval.len;
        log::trace!(
            "[FCACHE] remove {:?} from {:?}, free={}",
            interval,
            cur,
            self.vol.free_units
        );
        Ok(())
    }

    /// 移除条目 `id` 中的 `piece`；需要拆分但池已耗尽时，
    /// 连同右侧剩余部分一起移除（剩余部分若是脏的先写回 FAT 表）
    pub fn remove_or_truncate<T: FreeSpaceTable>(
        &mut self,
        id: EntryId,
        piece: Interval,
        table: &mut T,
    ) -> Result<()> {
        match self.remove_interval(piece) {
            Err(err) if err.kind() == ErrorKind::PoolExhausted => {
                let e = self.entry(id)?;
                let leftover = Interval::from_bounds(piece.end(), e.interval.end());
                if e.dirty {
                    table.free_runs(&[leftover])?;
                }
                self.remove_interval(Interval::from_bounds(piece.start, e.interval.end()))?;
                self.note_dropped(leftover.len);
                log::warn!(
                    "[FCACHE] pool exhausted, forgetting {:?} on volume {}",
                    leftover,
                    self.vol.id.raw()
                );
                Ok(())
            }
            other => other,
        }
    }

    /// 从缓存中移除与 `run` 相交的所有部分
    ///
    /// 用于外部分配之后的对账：这些簇已经不再空闲。
    pub fn forget<T: FreeSpaceTable>(&mut self, run: Interval, table: &mut T) -> Result<u32> {
        let mut cursor = run.start;
        let mut removed = 0;
        while let Some((id, piece)) = self.next_piece(cursor, run.end(), u32::MAX)? {
            self.remove_or_truncate(id, piece, table)?;
            removed += piece.len;
            cursor = piece.end();
        }
        Ok(removed)
    }

    /// 把 `run` 中尚未缓存的部分加入缓存（不标脏）
    ///
    /// 池耗尽时放弃剩余部分。返回新缓存的簇数。
    pub fn add_uncached(&mut self, run: Interval) -> Result<u32> {
        let mut cursor = run.start;
        let mut cached = 0;
        while cursor < run.end() {
            if let Some((_, e)) = self.entry_containing(cursor)? {
                cursor = e.end();
                continue;
            }
            let gap_end = match self.vol.ceiling(cursor) {
                Some(id) => self.entry(id)?.interval.start.min(run.end()),
                None => run.end(),
            };
            let gap = Interval::from_bounds(cursor, gap_end);
            if let AddOutcome::Cached = self.add_interval(gap, false, true)? {
                cached += gap.len;
            }
            cursor = gap_end;
        }
        Ok(cached)
    }

    // --- 查找 ---

    /// 从 `cursor` 开始、`high` 之前的第一段缓存空闲簇，最长 `max_len`
    pub fn next_piece(
        &self,
        cursor: u32,
        high: u32,
        max_len: u32,
    ) -> Result<Option<(EntryId, Interval)>> {
        let found = match self.entry_containing(cursor)? {
            Some((id, e)) => Some((id, cursor, e.end())),
            None => match self.vol.ceiling(cursor) {
                Some(id) => {
                    let e = self.entry(id)?.interval;
                    Some((id, e.start, e.end()))
                }
                None => None,
            },
        };

        Ok(found.and_then(|(id, start, end)| {
            let end = end.min(high).min(start.saturating_add(max_len));
            (start < end).then(|| (id, Interval::from_bounds(start, end)))
        }))
    }

    /// 统计 `[low, high)` 内缓存的空闲簇，达到 `limit` 即停止
    pub fn cached_in_range(&self, low: u32, high: u32, limit: u32) -> Result<u32> {
        let window = Interval::from_bounds(low, high);
        let mut node = match self.vol.by_start.floor(low) {
            Some(n) => Some(n),
            None => self.vol.by_start.ceiling(low),
        };
        let mut total = 0;
        while let Some(n) = node {
            let e = self.entry(*self.vol.by_start.value(n))?.interval;
            if e.start >= high || total >= limit {
                break;
            }
            if let Some(part) = e.intersect(&window) {
                total += part.len;
            }
            node = self.vol.by_start.next(n);
        }
        Ok(total)
    }

    /// 长度树上的最佳匹配：长度 `>= count` 的最短区间
    pub fn best_fit(&self, count: u32) -> Result<Option<(EntryId, Interval)>> {
        match self.vol.by_len.ceiling(count) {
            Some(n) => {
                let id = *self.vol.by_len.value(n);
                Ok(Some((id, self.entry(id)?.interval)))
            }
            None => Ok(None),
        }
    }

    // --- 写回 ---

    /// 把脏队列按起始簇顺序写回 FAT 表
    ///
    /// 条目仍留在缓存中，只是不再是脏的。返回写回的簇数。
    pub fn sync<T: FreeSpaceTable>(&mut self, table: &mut T, batch: usize) -> Result<u32> {
        if self.vol.dirty.is_empty() {
            return Ok(0);
        }

        let queue: Vec<EntryId> = self.vol.dirty.values().copied().collect();
        let mut written = 0;
        for chunk in queue.chunks(batch.max(1)) {
            let mut runs = Vec::with_capacity(chunk.len());
            for &id in chunk {
                runs.push(self.entry(id)?.interval);
            }
            table.free_runs(&runs)?;
            for &id in chunk {
                self.clear_dirty(id)?;
            }
            written += runs.iter().map(|r| r.len).sum::<u32>();
        }

        self.stats.synced_units += written as u64;
        log::debug!(
            "[FCACHE] synced {} clusters in {} entries on volume {}",
            written,
            queue.len(),
            self.vol.id.raw()
        );
        Ok(written)
    }

    /// 归还本卷的所有条目
    pub fn release_all(&mut self) {
        let ids: Vec<EntryId> = self.vol.entries().collect();
        for id in &ids {
            self.pool.release(*id);
        }
        self.vol.by_start.clear();
        self.vol.by_len.clear();
        self.vol.dirty.clear();
        self.vol.free_units = 0;
        self.vol.complete = false;
        log::debug!(
            "[FCACHE] released {} entries of volume {}",
            ids.len(),
            self.vol.id.raw()
        );
    }
}

/// 检查一个卷的全部不变量
///
/// - 两棵树包含同一组活动条目，节点句柄与条目记录一致
/// - 区间互不重叠也不相邻
/// - `free_units` 等于所有区间长度之和
/// - 脏队列与条目的脏标记一致
pub(crate) fn check_volume(vol: &VolumeState, pool: &EntryPool) -> Result<()> {
    let broken = |msg| Err(Error::new(ErrorKind::ConsistencyViolation, msg));

    if vol.by_start.len() != vol.by_len.len() {
        return broken("Index trees differ in size");
    }

    let mut sum: u64 = 0;
    let mut dirty = 0;
    let mut prev: Option<Interval> = None;
    let mut from_start: Vec<EntryId> = Vec::with_capacity(vol.by_start.len());

    for (node, &key, &id) in vol.by_start.iter() {
        let Some(e) = pool.get(id).filter(|e| e.volume == vol.id) else {
            return broken("Start tree references a foreign or free entry");
        };
        if e.by_start != node || e.interval.start != key {
            return broken("Start tree node does not match entry");
        }
        if e.interval.is_empty() {
            return broken("Empty interval cached");
        }
        if let Some(p) = prev {
            if p.end() >= e.interval.start {
                return broken("Cached intervals overlap or touch");
            }
        }
        if e.dirty {
            dirty += 1;
            if vol.dirty.get(&e.interval.start) != Some(&id) {
                return broken("Dirty entry missing from dirty queue");
            }
        }
        sum += e.interval.len as u64;
        prev = Some(e.interval);
        from_start.push(id);
    }

    let mut from_len: Vec<EntryId> = Vec::with_capacity(vol.by_len.len());
    for (node, &key, &id) in vol.by_len.iter() {
        let Some(e) = pool.get(id).filter(|e| e.volume == vol.id) else {
            return broken("Length tree references a foreign or free entry");
        };
        if e.by_len != node || e.interval.len != key {
            return broken("Length tree node does not match entry");
        }
        from_len.push(id);
    }

    from_start.sort_unstable();
    from_len.sort_unstable();
    if from_start != from_len {
        return broken("Index trees hold different entries");
    }
    let owned = pool.active().filter(|(_, e)| e.volume == vol.id).count();
    if owned != from_start.len() {
        return broken("Active entries missing from index trees");
    }
    if sum != vol.free_units as u64 {
        return broken("Free unit counter out of sync");
    }
    if dirty != vol.dirty.len() {
        return broken("Dirty queue holds clean entries");
    }
    Ok(())
}
