//! 区间缓存场景测试与属性测试

use super::*;
use crate::{
    error::{Error, ErrorKind},
    table::{FreeSpaceTable, MemFat, ScanOutput},
    types::{AddOutcome, AllocOutcome, FatType, Interval, RunList, VolumeGeometry, VolumeId},
};
use alloc::{collections::BTreeSet, vec::Vec};
use proptest::prelude::*;

fn geometry(last: u32) -> VolumeGeometry {
    VolumeGeometry::new(FatType::Fat32, 512, last)
}

fn setup_with(entries: usize, last: u32, flags: MountFlags) -> (Fcache, VolumeId, MemFat) {
    let mut cache = Fcache::new(FcacheConfig::with_entries(entries)).unwrap();
    let vol = cache.mount(geometry(last), flags).unwrap();
    let table = MemFat::new(geometry(last)).unwrap();
    (cache, vol, table)
}

fn setup(entries: usize, last: u32) -> (Fcache, VolumeId, MemFat) {
    setup_with(entries, last, MountFlags::empty())
}

fn iv(start: u32, end: u32) -> Interval {
    Interval::from_bounds(start, end)
}

fn units_of(runs: &[Interval]) -> BTreeSet<u32> {
    runs.iter().flat_map(|r| r.start..r.end()).collect()
}

// --- 插入与合并 ---

#[test]
fn test_merge_both_sides() {
    let (mut cache, vol, _) = setup(16, 1000);
    cache.add_interval(vol, 5, 5, false, false).unwrap();
    cache.add_interval(vol, 20, 5, false, false).unwrap();
    assert_eq!(cache.pool_in_use(), 2);

    assert_eq!(cache.add_interval(vol, 10, 10, false, false).unwrap(), AddOutcome::Cached);
    assert_eq!(cache.intervals(vol).unwrap(), [iv(5, 25)]);
    assert_eq!(cache.pool_in_use(), 1);
    assert_eq!(cache.free_units(vol).unwrap(), 20);
    assert_eq!(cache.stats().merges, 2);
    cache.check_consistency(vol).unwrap();
}

#[test]
fn test_adjacent_adds_coalesce() {
    let (mut cache, vol, _) = setup(16, 1000);
    cache.add_interval(vol, 10, 10, false, false).unwrap();
    cache.add_interval(vol, 20, 10, false, false).unwrap();
    assert_eq!(cache.intervals(vol).unwrap(), [iv(10, 30)]);
    assert_eq!(cache.entry_count(vol).unwrap(), 1);

    // 左侧相邻
    cache.add_interval(vol, 4, 6, false, false).unwrap();
    assert_eq!(cache.intervals(vol).unwrap(), [iv(4, 30)]);
    assert_eq!(cache.largest_interval(vol).unwrap(), Some(iv(4, 30)));
    cache.check_consistency(vol).unwrap();
}

#[test]
fn test_overlap_is_rejected() {
    let (mut cache, vol, _) = setup(16, 1000);
    cache.add_interval(vol, 10, 10, false, false).unwrap();

    for (start, len) in [(15, 10), (5, 6), (10, 10), (12, 2), (0x8, 20)] {
        let err = cache.add_interval(vol, start, len, false, false).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ConsistencyViolation);
    }
    assert_eq!(cache.intervals(vol).unwrap(), [iv(10, 20)]);
    assert_eq!(cache.free_units(vol).unwrap(), 10);
}

#[test]
fn test_invalid_ranges() {
    let (mut cache, vol, _) = setup(16, 1000);
    for (start, len) in [(0, 5), (1, 1), (5, 0), (1000, 2), (u32::MAX, 2)] {
        let err = cache.add_interval(vol, start, len, false, false).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidRange);
    }
    // 最后一个簇本身是有效的
    cache.add_interval(vol, 1000, 1, false, false).unwrap();
    assert_eq!(cache.free_units(vol).unwrap(), 1);
}

#[test]
fn test_exhaustion_keeps_existing_entries() {
    let (mut cache, vol, _) = setup(4, 1000);
    for i in 0..4 {
        cache.add_interval(vol, 10 * i + 2, 2, false, false).unwrap();
    }
    let before = cache.intervals(vol).unwrap();

    let err = cache.add_interval(vol, 100, 2, false, false).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::PoolExhausted);
    assert!(err.is_cache_miss());
    assert_eq!(cache.intervals(vol).unwrap(), before);
    assert_eq!(cache.free_units(vol).unwrap(), 8);

    let outcome = cache.add_interval(vol, 100, 2, false, true).unwrap();
    assert_eq!(outcome, AddOutcome::Dropped { uncached: 2 });
    assert_eq!(cache.intervals(vol).unwrap(), before);
    assert!(!cache.is_complete(vol).unwrap());
    assert_eq!(cache.stats().exhausted, 2);

    // 合并不需要新条目
    cache.add_interval(vol, 4, 2, false, false).unwrap();
    assert_eq!(cache.free_units(vol).unwrap(), 10);
    cache.check_consistency(vol).unwrap();
}

// --- 删除与拆分 ---

#[test]
fn test_interior_split() {
    let (mut cache, vol, _) = setup(16, 1000);
    cache.add_interval(vol, 100, 100, true, false).unwrap();
    cache.remove_interval(vol, 150, 10).unwrap();

    assert_eq!(cache.intervals(vol).unwrap(), [iv(100, 150), iv(160, 200)]);
    assert_eq!(cache.free_units(vol).unwrap(), 90);
    assert_eq!(cache.stats().splits, 1);
    // 两半都继承脏标记
    assert_eq!(cache.dirty_count(vol).unwrap(), 2);
    cache.check_consistency(vol).unwrap();
}

#[test]
fn test_remove_edges_and_whole() {
    let (mut cache, vol, _) = setup(16, 1000);
    cache.add_interval(vol, 100, 100, false, false).unwrap();

    cache.remove_interval(vol, 100, 10).unwrap();
    assert_eq!(cache.intervals(vol).unwrap(), [iv(110, 200)]);
    cache.remove_interval(vol, 190, 10).unwrap();
    assert_eq!(cache.intervals(vol).unwrap(), [iv(110, 190)]);
    cache.remove_interval(vol, 110, 80).unwrap();
    assert!(cache.intervals(vol).unwrap().is_empty());
    assert_eq!(cache.pool_in_use(), 0);
    assert_eq!(cache.free_units(vol).unwrap(), 0);
}

#[test]
fn test_remove_not_cached() {
    let (mut cache, vol, _) = setup(16, 1000);
    cache.add_interval(vol, 10, 10, false, false).unwrap();

    for (start, len) in [(30, 5), (15, 10), (5, 10), (2, 3)] {
        let err = cache.remove_interval(vol, start, len).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotInCache);
    }
    assert_eq!(cache.intervals(vol).unwrap(), [iv(10, 20)]);
}

#[test]
fn test_split_exhaustion_leaves_state_untouched() {
    let (mut cache, vol, _) = setup(1, 1000);
    cache.add_interval(vol, 100, 100, false, false).unwrap();

    let err = cache.remove_interval(vol, 150, 10).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::PoolExhausted);
    assert_eq!(cache.intervals(vol).unwrap(), [iv(100, 200)]);
    assert_eq!(cache.free_units(vol).unwrap(), 100);
    cache.check_consistency(vol).unwrap();
}

#[test]
fn test_add_then_remove_round_trip() {
    let (mut cache, vol, _) = setup(16, 1000);
    cache.add_interval(vol, 10, 10, false, false).unwrap();
    cache.add_interval(vol, 100, 10, false, false).unwrap();
    let before = cache.intervals(vol).unwrap();

    cache.add_interval(vol, 50, 10, false, false).unwrap();
    cache.remove_interval(vol, 50, 10).unwrap();
    assert_eq!(cache.intervals(vol).unwrap(), before);
    assert_eq!(cache.free_units(vol).unwrap(), 20);
    assert_eq!(cache.pool_in_use(), 2);
}

// --- 分配 ---

#[test]
fn test_get_free_units_from_hint() {
    let (mut cache, vol, mut table) = setup(16, 1000);
    cache.add_interval(vol, 10, 10, false, false).unwrap();
    cache.add_interval(vol, 100, 50, false, false).unwrap();

    let mut out = RunList::new(8);
    let outcome = cache.get_free_units(vol, 15, 20, &mut out, &mut table).unwrap();
    assert_eq!(outcome, AllocOutcome::Done);
    assert_eq!(out.runs(), [iv(15, 20), iv(100, 115)]);
    assert_eq!(cache.intervals(vol).unwrap(), [iv(10, 15), iv(115, 150)]);
    assert_eq!(cache.stats().hits, 1);
    cache.check_consistency(vol).unwrap();
}

#[test]
fn test_get_free_units_wraps_to_start() {
    let (mut cache, vol, mut table) = setup(16, 1000);
    cache.add_interval(vol, 10, 10, false, false).unwrap();
    cache.add_interval(vol, 100, 50, false, false).unwrap();

    let mut out = RunList::new(8);
    cache.get_free_units(vol, 120, 40, &mut out, &mut table).unwrap();
    assert_eq!(out.runs(), [iv(120, 150), iv(10, 20)]);
    assert_eq!(cache.intervals(vol).unwrap(), [iv(100, 120)]);
}

#[test]
fn test_get_free_units_partial_when_list_full() {
    let (mut cache, vol, mut table) = setup(16, 1000);
    cache.add_interval(vol, 10, 10, false, false).unwrap();
    cache.add_interval(vol, 30, 10, false, false).unwrap();

    let mut out = RunList::new(1);
    let outcome = cache.get_free_units(vol, 0, 15, &mut out, &mut table).unwrap();
    assert_eq!(outcome, AllocOutcome::Partial(10));
    assert_eq!(out.runs(), [iv(10, 20)]);
    assert_eq!(cache.intervals(vol).unwrap(), [iv(30, 40)]);
}

#[test]
fn test_range_bounded_allocation() {
    let (mut cache, vol, mut table) = setup(16, 1000);
    cache.add_interval(vol, 2, 998, false, false).unwrap();

    let mut out = RunList::new(4);
    let outcome = cache
        .get_free_units_in_range(vol, 0, 500, 600, 50, &mut out, &mut table)
        .unwrap();
    assert_eq!(outcome, AllocOutcome::Done);
    assert_eq!(out.total(), 50);
    for run in out.runs() {
        assert!(run.start >= 500 && run.end() <= 600, "{:?} outside range", run);
    }
    // 范围外的簇都还在缓存中
    let left = cache.intervals(vol).unwrap();
    assert!(left.iter().any(|r| r.contains(&iv(2, 500))));
    assert!(left.iter().any(|r| r.contains(&iv(600, 1000))));
    assert_eq!(cache.free_units(vol).unwrap(), 948);
    // 没有回退到 FAT 表
    assert_eq!(table.total_free_units().unwrap(), 999);
}

#[test]
fn test_range_cached_reports_not_in_cache() {
    let (mut cache, vol, mut table) = setup(16, 2000);
    cache.add_interval(vol, 2, 998, false, false).unwrap();

    let mut out = RunList::new(4);
    let err = cache
        .get_free_units_in_range_cached(vol, 0, 1500, 1600, 50, &mut out, &mut table)
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotInCache);
    assert!(out.is_empty());
    assert_eq!(cache.intervals(vol).unwrap(), [iv(2, 1000)]);

    // 高层接口回退到 FAT 表的范围扫描
    let outcome = cache
        .get_free_units_in_range(vol, 0, 1500, 1600, 50, &mut out, &mut table)
        .unwrap();
    assert_eq!(outcome, AllocOutcome::Done);
    assert_eq!(out.runs(), [iv(1500, 1550)]);
    assert!(!table.is_free(1500));
    // 同一扇区内剩余的空闲簇进入缓存，但不越过范围上界
    assert_eq!(cache.intervals(vol).unwrap(), [iv(2, 1000), iv(1550, 1600)]);
    assert_eq!(cache.stats().misses, 1);
    cache.check_consistency(vol).unwrap();
}

#[test]
fn test_invalid_allocation_requests() {
    let (mut cache, vol, mut table) = setup(16, 1000);
    let mut out = RunList::new(4);
    let err = cache.get_free_units(vol, 0, 0, &mut out, &mut table).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidRange);

    for (low, high) in [(600, 500), (500, 500), (0, 100), (900, 1002)] {
        let err = cache
            .get_free_units_in_range(vol, 0, low, high, 5, &mut out, &mut table)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidRange);
    }
}

#[test]
fn test_miss_falls_back_to_table() {
    let (mut cache, vol, mut table) = setup(16, 1000);

    let mut out = RunList::new(4);
    let outcome = cache.get_free_units(vol, 10, 5, &mut out, &mut table).unwrap();
    assert_eq!(outcome, AllocOutcome::Done);
    assert_eq!(out.runs(), [iv(10, 15)]);
    assert_eq!(table.chain(10).unwrap(), [10, 11, 12, 13, 14]);

    // FAT32 512 字节扇区覆盖 128 个簇，扇区内剩余空闲簇被缓存
    assert_eq!(cache.intervals(vol).unwrap(), [iv(15, 128)]);
    assert_eq!(cache.free_units(vol).unwrap(), 113);
    assert_eq!(cache.stats().misses, 1);
}

#[test]
fn test_miss_forgets_allocated_clusters() {
    let (mut cache, vol, mut table) = setup(16, 1000);
    cache.add_interval(vol, 10, 2, false, false).unwrap();
    cache.add_interval(vol, 300, 5, false, false).unwrap();

    let mut out = RunList::new(4);
    cache.get_free_units(vol, 10, 100, &mut out, &mut table).unwrap();
    assert_eq!(out.runs(), [iv(10, 110)]);
    assert_eq!(cache.intervals(vol).unwrap(), [iv(110, 128), iv(300, 305)]);
    cache.check_consistency(vol).unwrap();
}

#[test]
fn test_miss_with_no_space() {
    let (mut cache, vol, mut table) = setup(16, 20);
    let mut out = RunList::new(4);
    let err = cache.get_free_units(vol, 2, 100, &mut out, &mut table).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NoSpace);
    assert!(out.is_empty());
}

#[test]
fn test_exhausted_split_takes_left_edge() {
    let (mut cache, vol, mut table) = setup(1, 1000);
    cache.add_interval(vol, 100, 100, false, false).unwrap();

    let mut out = RunList::new(4);
    cache.get_free_units(vol, 150, 10, &mut out, &mut table).unwrap();
    assert_eq!(out.runs(), [iv(100, 110)]);
    assert_eq!(cache.intervals(vol).unwrap(), [iv(110, 200)]);
    assert_eq!(cache.stats().dropped_units, 0);
}

#[test]
fn test_exhausted_split_in_range_drops_remainder() {
    let (mut cache, vol, mut table) = setup(1, 1000);
    cache.add_interval(vol, 100, 100, false, false).unwrap();

    let mut out = RunList::new(4);
    cache
        .get_free_units_in_range_cached(vol, 0, 150, 160, 5, &mut out, &mut table)
        .unwrap();
    assert_eq!(out.runs(), [iv(150, 155)]);
    assert_eq!(cache.intervals(vol).unwrap(), [iv(100, 150)]);
    assert_eq!(cache.stats().dropped_units, 45);
    assert!(!cache.is_complete(vol).unwrap());
    cache.check_consistency(vol).unwrap();
}

#[test]
fn test_take_contiguous_best_fit() {
    let (mut cache, vol, _) = setup(16, 1000);
    cache.add_interval(vol, 10, 5, false, false).unwrap();
    cache.add_interval(vol, 100, 50, false, false).unwrap();
    cache.add_interval(vol, 300, 20, false, false).unwrap();

    assert_eq!(cache.take_contiguous(vol, 18).unwrap(), iv(300, 318));
    assert_eq!(cache.intervals(vol).unwrap(), [iv(10, 15), iv(100, 150), iv(318, 320)]);

    let err = cache.take_contiguous(vol, 60).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotInCache);
    assert_eq!(cache.largest_interval(vol).unwrap(), Some(iv(100, 150)));
}

// --- 释放与写回 ---

#[test]
fn test_free_chain_and_sync() {
    let (mut cache, vol, mut table) = setup(16, 1000);
    table.write_chain(&[20, 21, 22, 40]).unwrap();

    let chain = table.chain(20).unwrap();
    assert_eq!(cache.free_chain(vol, chain, &mut table).unwrap(), 4);
    assert_eq!(cache.intervals(vol).unwrap(), [iv(20, 23), iv(40, 41)]);
    assert_eq!(cache.dirty_count(vol).unwrap(), 2);
    assert!(!table.is_free(20));

    assert_eq!(cache.sync_volume(vol, &mut table).unwrap(), 4);
    assert!(table.is_free(20));
    assert!(table.is_free(40));
    assert_eq!(cache.dirty_count(vol).unwrap(), 0);
    // 写回后条目仍在缓存中
    assert_eq!(cache.entry_count(vol).unwrap(), 2);
    assert_eq!(cache.stats().synced_units, 4);
}

#[test]
fn test_free_chain_writes_through_when_exhausted() {
    let (mut cache, vol, mut table) = setup(1, 1000);
    table.write_chain(&[10, 11, 50]).unwrap();

    assert_eq!(cache.free_chain(vol, [10, 11, 50], &mut table).unwrap(), 3);
    assert_eq!(cache.intervals(vol).unwrap(), [iv(10, 12)]);
    assert!(!table.is_free(10));
    assert!(table.is_free(50));
    assert!(!cache.is_complete(vol).unwrap());
}

#[test]
fn test_sync_io_error_keeps_dirty_queue() {
    let (mut cache, vol, mut table) = setup(16, 1000);
    table.write_chain(&[30, 31]).unwrap();
    cache.free_chain(vol, [30, 31], &mut table).unwrap();

    table.set_fail_io(true);
    let err = cache.sync_volume(vol, &mut table).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Io);
    assert_eq!(cache.dirty_count(vol).unwrap(), 1);

    table.set_fail_io(false);
    cache.sync_volume(vol, &mut table).unwrap();
    assert!(table.is_free(30));
}

#[test]
fn test_free_chain_rejects_duplicate_clusters() {
    let (mut cache, vol, mut table) = setup(16, 1000);
    let err = cache.free_chain(vol, [10, 11, 10], &mut table).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ConsistencyViolation);

    // 整条链被拒绝，前面的区间不能留在缓存里
    assert!(cache.intervals(vol).unwrap().is_empty());
    assert_eq!(cache.dirty_count(vol).unwrap(), 0);
    assert_eq!(cache.pool_in_use(), 0);
}

#[test]
fn test_free_chain_rejects_cached_clusters() {
    let (mut cache, vol, mut table) = setup(16, 1000);
    cache.add_interval(vol, 50, 10, false, false).unwrap();

    let err = cache.free_chain(vol, [5, 6, 55], &mut table).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ConsistencyViolation);
    assert_eq!(cache.intervals(vol).unwrap(), [iv(50, 60)]);
    assert_eq!(cache.dirty_count(vol).unwrap(), 0);
    cache.check_consistency(vol).unwrap();
}

#[test]
fn test_free_chain_rejects_out_of_range_cluster() {
    let (mut cache, vol, mut table) = setup(16, 1000);
    let err = cache.free_chain(vol, [u32::MAX, 5], &mut table).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidRange);
    assert!(cache.intervals(vol).unwrap().is_empty());
}

/// 只记录写回调用的 FAT 表
#[derive(Default)]
struct RecordingTable {
    batches: Vec<Vec<Interval>>,
}

impl FreeSpaceTable for RecordingTable {
    fn scan_free_runs(
        &mut self,
        _hint: u32,
        _count: u32,
        _max_runs: usize,
        _out: &mut ScanOutput,
    ) -> crate::Result<u32> {
        Err(Error::new(ErrorKind::NoSpace, "Recording table has no space"))
    }

    fn scan_free_runs_in_range(
        &mut self,
        _hint: u32,
        _low: u32,
        _high: u32,
        _count: u32,
        _max_runs: usize,
        _out: &mut ScanOutput,
    ) -> crate::Result<u32> {
        Err(Error::new(ErrorKind::NoSpace, "Recording table has no space"))
    }

    fn free_runs(&mut self, runs: &[Interval]) -> crate::Result<u32> {
        self.batches.push(runs.to_vec());
        Ok(runs.iter().map(|r| r.len).sum())
    }

    fn sector_free_count(
        &mut self,
        _sector: u32,
        _runs: &mut Vec<Interval>,
    ) -> crate::Result<u32> {
        Ok(0)
    }

    fn total_free_units(&mut self) -> crate::Result<u32> {
        Ok(0)
    }
}

#[test]
fn test_sync_writes_in_start_order_and_batches() {
    let config = FcacheConfig {
        sync_batch: 2,
        ..FcacheConfig::with_entries(16)
    };
    let mut cache = Fcache::new(config).unwrap();
    let vol = cache.mount(geometry(1000), MountFlags::empty()).unwrap();
    for start in [500, 100, 900, 300, 700] {
        cache.add_interval(vol, start, 5, true, false).unwrap();
    }

    let mut table = RecordingTable::default();
    assert_eq!(cache.sync_volume(vol, &mut table).unwrap(), 25);
    assert_eq!(
        table.batches,
        [
            vec![iv(100, 105), iv(300, 305)],
            vec![iv(500, 505), iv(700, 705)],
            vec![iv(900, 905)],
        ]
    );
    assert_eq!(cache.dirty_count(vol).unwrap(), 0);

    // 队列已清空，再次写回不调用 FAT 表
    assert_eq!(cache.sync_volume(vol, &mut table).unwrap(), 0);
    assert_eq!(table.batches.len(), 3);
}

// --- 统计 ---

#[test]
fn test_populate_and_volume_status() {
    let (mut cache, vol, mut table) = setup(16, 1000);
    table.write_chain(&[500, 501]).unwrap();

    assert_eq!(cache.populate(vol, &mut table).unwrap(), 997);
    assert!(cache.is_complete(vol).unwrap());
    assert_eq!(cache.intervals(vol).unwrap(), [iv(2, 500), iv(502, 1001)]);
    assert_eq!(cache.volume_status(vol, &mut table).unwrap(), 997);

    let mut out = RunList::default();
    cache.get_free_units(vol, 2, 10, &mut out, &mut table).unwrap();
    let clusters: Vec<u32> = out.runs().iter().flat_map(|r| r.start..r.end()).collect();
    table.write_chain(&clusters).unwrap();

    // FAT 表不再被扫描
    table.set_fail_io(true);
    assert_eq!(cache.volume_status(vol, &mut table).unwrap(), 987);
}

#[test]
fn test_volume_status_scans_when_incomplete() {
    let (mut cache, vol, mut table) = setup(16, 1000);
    cache.add_interval(vol, 10, 5, false, false).unwrap();
    assert!(!cache.is_complete(vol).unwrap());
    assert_eq!(cache.volume_status(vol, &mut table).unwrap(), 999);
}

#[test]
fn test_populate_with_small_pool_is_incomplete() {
    let (mut cache, vol, mut table) = setup(2, 1000);
    table.write_chain(&[100, 200, 300]).unwrap();

    assert_eq!(cache.populate(vol, &mut table).unwrap(), 996);
    assert!(!cache.is_complete(vol).unwrap());
    assert_eq!(cache.entry_count(vol).unwrap(), 2);
    assert!(cache.stats().dropped_units > 0);
    assert_eq!(cache.volume_status(vol, &mut table).unwrap(), 996);
    cache.check_consistency(vol).unwrap();
}

#[test]
fn test_sector_free_count() {
    let (mut cache, vol, mut table) = setup(16, 1000);
    table.write_chain(&[5, 6]).unwrap();

    assert_eq!(cache.sector_free_count(vol, 0, &mut table).unwrap(), 124);
    assert_eq!(cache.intervals(vol).unwrap(), [iv(2, 5), iv(7, 128)]);
    assert_eq!(cache.sector_free_count(vol, 0, &mut table).unwrap(), 124);
    assert_eq!(cache.entry_count(vol).unwrap(), 2);

    // 整个扇区都已缓存时不读 FAT 表
    cache.add_interval(vol, 128, 128, false, false).unwrap();
    table.set_fail_io(true);
    assert_eq!(cache.sector_free_count(vol, 1, &mut table).unwrap(), 128);

    let err = cache.sector_free_count(vol, 100, &mut table).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidRange);
}

// --- 挂载模式与生命周期 ---

#[test]
fn test_read_only_volume() {
    let (mut cache, vol, mut table) = setup_with(16, 1000, MountFlags::READ_ONLY);

    let err = cache.add_interval(vol, 10, 5, false, false).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotActivated);
    let mut out = RunList::new(4);
    let err = cache.get_free_units(vol, 10, 5, &mut out, &mut table).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotActivated);
    let err = cache.free_chain(vol, [10], &mut table).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotActivated);

    assert_eq!(cache.volume_status(vol, &mut table).unwrap(), 999);
    assert_eq!(cache.sector_free_count(vol, 0, &mut table).unwrap(), 126);
    assert_eq!(cache.pool_in_use(), 0);
    cache.unmount(vol, false, &mut table).unwrap();
}

#[test]
fn test_no_cache_volume_passes_through() {
    let (mut cache, vol, mut table) = setup_with(16, 1000, MountFlags::NO_CACHE);

    let mut out = RunList::new(4);
    cache.get_free_units(vol, 10, 5, &mut out, &mut table).unwrap();
    assert_eq!(out.runs(), [iv(10, 15)]);
    assert!(!table.is_free(10));

    cache.free_chain(vol, 10..15, &mut table).unwrap();
    assert!(table.is_free(10));
    assert_eq!(cache.pool_in_use(), 0);
    let err = cache.sync_volume(vol, &mut table).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotActivated);
}

#[test]
fn test_unmount_syncs_and_releases() {
    let (mut cache, vol, mut table) = setup(16, 1000);
    table.write_chain(&[10, 11, 12]).unwrap();
    cache.free_chain(vol, [10, 11, 12], &mut table).unwrap();
    cache.add_interval(vol, 100, 10, false, false).unwrap();

    cache.unmount(vol, false, &mut table).unwrap();
    assert!(table.is_free(11));
    assert_eq!(cache.pool_in_use(), 0);
    assert_eq!(cache.free_units(vol).unwrap_err().kind(), ErrorKind::NotFound);
    assert_eq!(
        cache.unmount(vol, false, &mut table).unwrap_err().kind(),
        ErrorKind::NotFound
    );
}

#[test]
fn test_unmount_io_error() {
    let (mut cache, vol, mut table) = setup(16, 1000);
    table.write_chain(&[10]).unwrap();
    cache.free_chain(vol, [10], &mut table).unwrap();
    table.set_fail_io(true);

    let err = cache.unmount(vol, false, &mut table).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Io);
    assert_eq!(cache.mounted_volumes(), 1);

    cache.unmount(vol, true, &mut table).unwrap();
    assert_eq!(cache.mounted_volumes(), 0);
    assert_eq!(cache.pool_in_use(), 0);
}

#[test]
fn test_volumes_share_pool() {
    let mut cache = Fcache::new(FcacheConfig::with_entries(3)).unwrap();
    let a = cache.mount(geometry(1000), MountFlags::empty()).unwrap();
    let b = cache.mount(geometry(1000), MountFlags::empty()).unwrap();
    assert_ne!(a, b);

    cache.add_interval(a, 10, 5, false, false).unwrap();
    cache.add_interval(a, 30, 5, false, false).unwrap();
    cache.add_interval(b, 10, 5, false, false).unwrap();
    let err = cache.add_interval(b, 30, 5, false, false).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::PoolExhausted);

    // 两个卷互不干扰
    assert_eq!(cache.intervals(a).unwrap(), [iv(10, 15), iv(30, 35)]);
    assert_eq!(cache.intervals(b).unwrap(), [iv(10, 15)]);
    cache.check_consistency(a).unwrap();
    cache.check_consistency(b).unwrap();
}

#[test]
fn test_lifecycle_limits() {
    let config = FcacheConfig {
        max_volumes: 1,
        ..FcacheConfig::with_entries(8)
    };
    let mut cache = Fcache::new(config).unwrap();
    let mut table = MemFat::new(geometry(1000)).unwrap();
    let vol = cache.mount(geometry(1000), MountFlags::empty()).unwrap();

    let err = cache.mount(geometry(1000), MountFlags::empty()).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NoSpace);
    let err = cache.mount(geometry(1), MountFlags::empty()).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidInput);

    assert_eq!(cache.terminate().unwrap_err().kind(), ErrorKind::Busy);
    cache.unmount(vol, false, &mut table).unwrap();
    cache.terminate().unwrap();

    let err = cache.mount(geometry(1000), MountFlags::empty()).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidState);
}

#[test]
fn test_config_validation() {
    let err = Fcache::new(FcacheConfig::with_entries(0)).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidInput);
    let config = FcacheConfig {
        sync_batch: 0,
        ..FcacheConfig::default()
    };
    assert_eq!(Fcache::new(config).unwrap_err().kind(), ErrorKind::InvalidInput);

    let cache = Fcache::new(FcacheConfig::with_entries(10)).unwrap();
    assert_eq!(cache.pool_capacity(), 10);
}

// --- 属性测试 ---

#[derive(Debug, Clone)]
enum Op {
    Add { start: u32, len: u32, dirty: bool, force: bool },
    Remove { start: u32, len: u32 },
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![
        (2u32..560, 1u32..40, any::<bool>(), any::<bool>())
            .prop_map(|(start, len, dirty, force)| Op::Add { start, len, dirty, force }),
        (2u32..560, 1u32..40).prop_map(|(start, len)| Op::Remove { start, len }),
    ]
}

proptest! {
    #[test]
    fn random_ops_match_model(ops in prop::collection::vec(op(), 1..120)) {
        let (mut cache, vol, _) = setup(12, 600);
        let mut model: BTreeSet<u32> = BTreeSet::new();

        for op in ops {
            match op {
                Op::Add { start, len, dirty, force } => {
                    let overlaps = (start..start + len).any(|u| model.contains(&u));
                    match cache.add_interval(vol, start, len, dirty, force) {
                        Ok(AddOutcome::Cached) => {
                            prop_assert!(!overlaps);
                            model.extend(start..start + len);
                        }
                        Ok(AddOutcome::Dropped { uncached }) => {
                            prop_assert!(force && !overlaps);
                            prop_assert_eq!(uncached, len);
                        }
                        Err(err) => match err.kind() {
                            ErrorKind::ConsistencyViolation => prop_assert!(overlaps),
                            ErrorKind::PoolExhausted => prop_assert!(!force && !overlaps),
                            kind => prop_assert!(false, "unexpected {:?}", kind),
                        },
                    }
                }
                Op::Remove { start, len } => {
                    let covered = (start..start + len).all(|u| model.contains(&u));
                    match cache.remove_interval(vol, start, len) {
                        Ok(()) => {
                            prop_assert!(covered);
                            for u in start..start + len {
                                model.remove(&u);
                            }
                        }
                        Err(err) => prop_assert!(err.is_cache_miss()),
                    }
                }
            }

            prop_assert!(cache.check_consistency(vol).is_ok());
            let intervals = cache.intervals(vol).unwrap();
            prop_assert_eq!(units_of(&intervals), model.clone());
            prop_assert_eq!(cache.free_units(vol).unwrap() as usize, model.len());
        }
    }

    #[test]
    fn allocation_partitions_cached_units(
        runs in prop::collection::vec((2u32..900, 1u32..30), 1..20),
        hint in 0u32..1100,
        count in 1u32..200,
    ) {
        let (mut cache, vol, mut table) = setup(32, 1000);
        for (start, len) in runs {
            // 重叠的区间被拒绝，不影响测试
            let _ = cache.add_interval(vol, start, len, false, true);
        }
        let before = units_of(&cache.intervals(vol).unwrap());
        prop_assume!(before.len() as u32 >= count);

        let mut out = RunList::new(64);
        let outcome = cache.get_free_units(vol, hint, count, &mut out, &mut table).unwrap();
        prop_assert_eq!(outcome, AllocOutcome::Done);
        prop_assert_eq!(out.total(), count);

        let taken = units_of(out.runs());
        let left = units_of(&cache.intervals(vol).unwrap());
        prop_assert!(taken.is_disjoint(&left));
        prop_assert_eq!(taken.union(&left).copied().collect::<BTreeSet<u32>>(), before);
        prop_assert!(cache.check_consistency(vol).is_ok());
    }
}
