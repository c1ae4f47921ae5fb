//! 内存 FAT 表
//!
//! FAT 表以磁盘格式保存在一个字节数组中：FAT16 每项 2 字节，
//! FAT32 每项 4 字节（高 4 位保留），均为小端。

use super::{FreeSpaceTable, ScanOutput};
use crate::{
    consts::*,
    error::{Error, ErrorKind, Result},
    types::{FatType, Interval, VolumeGeometry},
};
use alloc::{vec, vec::Vec};
use byteorder::{ByteOrder, LittleEndian};

/// 内存 FAT 表
#[derive(Debug, Clone)]
pub struct MemFat {
    geometry: VolumeGeometry,
    data: Vec<u8>,
    /// 置位后所有表访问都返回 I/O 错误
    fail_io: bool,
}

impl MemFat {
    /// 创建全部簇空闲的 FAT 表
    pub fn new(geometry: VolumeGeometry) -> Result<Self> {
        geometry.validate()?;
        let size = geometry.fat_sectors() as usize * geometry.sector_size as usize;
        let mut fat = Self {
            geometry,
            data: vec![0u8; size],
            fail_io: false,
        };
        // 簇 0 保存介质描述符，簇 1 为链结束标记
        let eoc = geometry.fat_type.eoc();
        fat.write_entry(0, eoc & !0x7);
        fat.write_entry(1, eoc);
        Ok(fat)
    }

    /// 几何信息
    pub fn geometry(&self) -> &VolumeGeometry {
        &self.geometry
    }

    /// 原始 FAT 字节
    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    /// 让后续访问返回 I/O 错误
    pub fn set_fail_io(&mut self, fail: bool) {
        self.fail_io = fail;
    }

    fn check_io(&self) -> Result<()> {
        if self.fail_io {
            return Err(Error::new(ErrorKind::Io, "FAT table I/O failure"));
        }
        Ok(())
    }

    fn offset(&self, cluster: u32) -> usize {
        (cluster * self.geometry.fat_type.entry_size()) as usize
    }

    fn read_entry(&self, cluster: u32) -> u32 {
        let off = self.offset(cluster);
        match self.geometry.fat_type {
            FatType::Fat16 => LittleEndian::read_u16(&self.data[off..off + 2]) as u32,
            FatType::Fat32 => LittleEndian::read_u32(&self.data[off..off + 4]) & FAT32_ENTRY_MASK,
        }
    }

    fn write_entry(&mut self, cluster: u32, value: u32) {
        let off = self.offset(cluster);
        match self.geometry.fat_type {
            FatType::Fat16 => LittleEndian::write_u16(&mut self.data[off..off + 2], value as u16),
            FatType::Fat32 => {
                let slot = &mut self.data[off..off + 4];
                let reserved = LittleEndian::read_u32(slot) & !FAT32_ENTRY_MASK;
                LittleEndian::write_u32(slot, reserved | (value & FAT32_ENTRY_MASK));
            }
        }
    }

    fn check_cluster(&self, cluster: u32) -> Result<()> {
        if cluster < FAT_FIRST_CLUSTER || cluster > self.geometry.last_unit {
            return Err(Error::new(ErrorKind::InvalidRange, "Cluster outside volume"));
        }
        Ok(())
    }

    /// 读取表项
    pub fn entry(&self, cluster: u32) -> Result<u32> {
        self.check_cluster(cluster)?;
        Ok(self.read_entry(cluster))
    }

    /// 写入表项
    pub fn set_entry(&mut self, cluster: u32, value: u32) -> Result<()> {
        self.check_cluster(cluster)?;
        self.write_entry(cluster, value);
        Ok(())
    }

    /// 簇是否空闲
    pub fn is_free(&self, cluster: u32) -> bool {
        self.check_cluster(cluster).is_ok() && self.read_entry(cluster) == FAT_ENTRY_FREE
    }

    /// 链上的下一个簇，链结束时返回 `None`
    pub fn next_cluster(&self, cluster: u32) -> Result<Option<u32>> {
        let value = self.entry(cluster)?;
        if value == FAT_ENTRY_FREE {
            return Err(Error::new(ErrorKind::InvalidInput, "Cluster is not allocated"));
        }
        if value < FAT_FIRST_CLUSTER || value > self.geometry.last_unit {
            return Ok(None);
        }
        Ok(Some(value))
    }

    /// 按顺序把簇链接成一条链
    pub fn write_chain(&mut self, clusters: &[u32]) -> Result<()> {
        for &c in clusters {
            self.check_cluster(c)?;
        }
        let eoc = self.geometry.fat_type.eoc();
        for (i, &c) in clusters.iter().enumerate() {
            let next = clusters.get(i + 1).copied().unwrap_or(eoc);
            self.write_entry(c, next);
        }
        Ok(())
    }

    /// 读出从 `start` 开始的整条链
    pub fn chain(&self, start: u32) -> Result<Vec<u32>> {
        let mut chain = vec![start];
        let mut cur = start;
        while let Some(next) = self.next_cluster(cur)? {
            if chain.len() > self.geometry.unit_count() as usize {
                return Err(Error::new(ErrorKind::InvalidState, "Cluster chain loops"));
            }
            chain.push(next);
            cur = next;
        }
        Ok(chain)
    }

    /// 在 `[low, high)` 中从 `hint` 开始挑选空闲簇
    ///
    /// 返回挑中的区间和是否因区间数上限而提前停止。
    fn pick(
        &self,
        hint: u32,
        low: u32,
        high: u32,
        count: u32,
        max_runs: usize,
    ) -> (Vec<Interval>, bool) {
        let mut picked: Vec<Interval> = Vec::new();
        let mut need = count;
        let mut limited = false;

        for c in (hint..high).chain(low..hint) {
            if self.read_entry(c) != FAT_ENTRY_FREE {
                continue;
            }
            match picked.last_mut() {
                Some(last) if last.end() == c => last.len += 1,
                _ => {
                    if picked.len() == max_runs {
                        limited = true;
                        break;
                    }
                    picked.push(Interval::new(c, 1));
                }
            }
            need -= 1;
            if need == 0 {
                break;
            }
        }
        (picked, limited)
    }

    fn scan(
        &mut self,
        hint: u32,
        low: u32,
        high: u32,
        count: u32,
        max_runs: usize,
        out: &mut ScanOutput,
    ) -> Result<u32> {
        self.check_io()?;
        let valid_end = self.geometry.last_unit + 1;
        let low = low.max(FAT_FIRST_CLUSTER);
        let high = high.min(valid_end);
        if count == 0 || low >= high || max_runs == 0 {
            return Err(Error::new(ErrorKind::InvalidInput, "Invalid scan request"));
        }
        let hint = if hint < low || hint >= high { low } else { hint };

        let (picked, limited) = self.pick(hint, low, high, count, max_runs);
        let obtained: u32 = picked.iter().map(|r| r.len).sum();
        if obtained < count && !limited {
            log::debug!("[MEMFAT] scan wanted {} clusters, only {} free", count, obtained);
            return Err(Error::new(ErrorKind::NoSpace, "No free clusters available"));
        }

        // 分配的簇按顺序链接成一条链
        let clusters: Vec<u32> = picked.iter().flat_map(|r| r.start..r.end()).collect();
        self.write_chain(&clusters)?;

        // 最后一个分配簇所在扇区的剩余空闲簇作为额外结果返回
        if let Some(&tail) = clusters.last() {
            let per_sector = self.geometry.units_per_sector();
            let sector_end = ((tail / per_sector + 1) * per_sector).min(high);
            let mut cur: Option<Interval> = None;
            for c in tail + 1..sector_end {
                if self.read_entry(c) == FAT_ENTRY_FREE {
                    match cur.as_mut() {
                        Some(run) => run.len += 1,
                        None => cur = Some(Interval::new(c, 1)),
                    }
                } else if let Some(run) = cur.take() {
                    out.surplus.push(run);
                }
            }
            if let Some(run) = cur {
                out.surplus.push(run);
            }
        }

        log::debug!(
            "[MEMFAT] allocated {} clusters in {} runs (hint={}, range=[{}, {}))",
            obtained,
            picked.len(),
            hint,
            low,
            high
        );
        out.allocated.extend(picked);
        Ok(obtained)
    }
}

impl FreeSpaceTable for MemFat {
    fn scan_free_runs(
        &mut self,
        hint: u32,
        count: u32,
        max_runs: usize,
        out: &mut ScanOutput,
    ) -> Result<u32> {
        let high = self.geometry.last_unit + 1;
        self.scan(hint, FAT_FIRST_CLUSTER, high, count, max_runs, out)
    }

    fn scan_free_runs_in_range(
        &mut self,
        hint: u32,
        low: u32,
        high: u32,
        count: u32,
        max_runs: usize,
        out: &mut ScanOutput,
    ) -> Result<u32> {
        self.scan(hint, low, high, count, max_runs, out)
    }

    fn free_runs(&mut self, runs: &[Interval]) -> Result<u32> {
        self.check_io()?;
        for run in runs {
            self.geometry.check_interval(*run)?;
        }
        let mut freed = 0;
        for run in runs {
            for c in run.start..run.end() {
                self.write_entry(c, FAT_ENTRY_FREE);
            }
            freed += run.len;
        }
        log::trace!("[MEMFAT] freed {} clusters in {} runs", freed, runs.len());
        Ok(freed)
    }

    fn sector_free_count(&mut self, sector: u32, runs: &mut Vec<Interval>) -> Result<u32> {
        self.check_io()?;
        let units = self
            .geometry
            .sector_units(sector)
            .ok_or(Error::new(ErrorKind::InvalidInput, "Sector outside FAT"))?;

        let mut free = 0;
        let mut cur: Option<Interval> = None;
        for c in units.start..units.end() {
            if self.read_entry(c) == FAT_ENTRY_FREE {
                free += 1;
                match cur.as_mut() {
                    Some(run) => run.len += 1,
                    None => cur = Some(Interval::new(c, 1)),
                }
            } else if let Some(run) = cur.take() {
                runs.push(run);
            }
        }
        if let Some(run) = cur {
            runs.push(run);
        }
        Ok(free)
    }

    fn total_free_units(&mut self) -> Result<u32> {
        self.check_io()?;
        let free = (FAT_FIRST_CLUSTER..=self.geometry.last_unit)
            .filter(|&c| self.read_entry(c) == FAT_ENTRY_FREE)
            .count();
        Ok(free as u32)
    }
}
