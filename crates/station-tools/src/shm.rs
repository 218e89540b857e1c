//! 共享内存环形缓冲区
//!
//! 伪通道输出的唯一下游：每次发射写入一条定长记录，写完即走，没有回执。
//! 单写者、多读者；读者可以在另一个进程中 `open()` 同一个文件。
//!
//! # 内存布局
//!
//! ```text
//! [64-byte header] [capacity × 24-byte records]
//!
//! Header (little-endian):
//!   0  magic: u64         (0x5354_4154_5348_4D31, "STATSHM1")
//!   8  capacity: u64      (记录数)
//!   16 write_index: u64   (累计写入条数，单调递增)
//!   24 record_size: u32   (= 24)
//!   28 padding            (补齐到 64 字节)
//!
//! Record (#[repr(C)]):
//!   0  channel_id: u32
//!   4  _pad: u32
//!   8  sequence_index: u64
//!   16 value: f64
//! ```
//!
//! 写入顺序：先写记录，`Release` 栅栏，再推进 `write_index`；
//! 读者先读 `write_index` 再 `Acquire` 栅栏读记录。

use crate::error::ShmError;
use memmap2::{MmapMut, MmapOptions};
use std::fs::OpenOptions;
use std::mem::size_of;
use std::path::Path;
use std::sync::atomic::{Ordering, fence};
use tracing::{debug, trace};

/// 文件头魔数
pub const MAGIC: u64 = 0x5354_4154_5348_4D31;

/// 文件头大小（一个缓存行）
pub const HEADER_SIZE: usize = 64;

const MAGIC_OFFSET: usize = 0;
const CAPACITY_OFFSET: usize = 8;
const WRITE_INDEX_OFFSET: usize = 16;
const RECORD_SIZE_OFFSET: usize = 24;

/// 定长发布记录
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ShmRecord {
    pub channel_id: u32,
    _pad: u32,
    /// 该通道内的发射序号（从 0 开始）
    pub sequence_index: u64,
    pub value: f64,
}

/// 单条记录的字节数
pub const RECORD_SIZE: usize = size_of::<ShmRecord>();

const _: () = assert!(RECORD_SIZE == 24);

impl ShmRecord {
    pub fn new(channel_id: u32, sequence_index: u64, value: f64) -> Self {
        Self {
            channel_id,
            _pad: 0,
            sequence_index,
            value,
        }
    }

    fn encode(&self, out: &mut [u8]) {
        out[0..4].copy_from_slice(&self.channel_id.to_le_bytes());
        out[4..8].copy_from_slice(&0u32.to_le_bytes());
        out[8..16].copy_from_slice(&self.sequence_index.to_le_bytes());
        out[16..24].copy_from_slice(&self.value.to_le_bytes());
    }

    fn decode(bytes: &[u8]) -> Self {
        Self {
            channel_id: read_u32(bytes, 0),
            _pad: 0,
            sequence_index: read_u64(bytes, 8),
            value: f64::from_bits(read_u64(bytes, 16)),
        }
    }
}

fn read_u32(bytes: &[u8], offset: usize) -> u32 {
    let mut buf = [0u8; 4];
    buf.copy_from_slice(&bytes[offset..offset + 4]);
    u32::from_le_bytes(buf)
}

fn read_u64(bytes: &[u8], offset: usize) -> u64 {
    let mut buf = [0u8; 8];
    buf.copy_from_slice(&bytes[offset..offset + 8]);
    u64::from_le_bytes(buf)
}

fn write_u64(bytes: &mut [u8], offset: usize, value: u64) {
    bytes[offset..offset + 8].copy_from_slice(&value.to_le_bytes());
}

/// 基于内存映射文件的定长记录环形缓冲区
///
/// 容量写满后覆盖最旧的记录。
pub struct ShmRing {
    mmap: MmapMut,
    capacity: u64,
}

impl std::fmt::Debug for ShmRing {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShmRing")
            .field("capacity", &self.capacity)
            .field("write_index", &self.write_index())
            .finish()
    }
}

impl ShmRing {
    /// 创建（或截断重建）环形缓冲区文件
    pub fn create<P: AsRef<Path>>(path: P, capacity: usize) -> Result<Self, ShmError> {
        let path = path.as_ref();
        if capacity == 0 {
            return Err(ShmError::InvalidCapacity(0));
        }
        let capacity = capacity as u64;
        let total_size = total_size(capacity)?;

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)?;
        file.set_len(total_size)?;

        // SAFETY: 文件刚由本进程创建并设定长度；映射的生命周期由 ShmRing 持有，
        // 其它进程只读，记录访问全部经过边界检查的切片。
        let mut mmap = unsafe { MmapOptions::new().map_mut(&file)? };

        mmap[..HEADER_SIZE].fill(0);
        write_u64(&mut mmap, MAGIC_OFFSET, MAGIC);
        write_u64(&mut mmap, CAPACITY_OFFSET, capacity);
        write_u64(&mut mmap, WRITE_INDEX_OFFSET, 0);
        mmap[RECORD_SIZE_OFFSET..RECORD_SIZE_OFFSET + 4].copy_from_slice(&(RECORD_SIZE as u32).to_le_bytes());

        debug!(path = %path.display(), capacity, "shm ring created");
        Ok(Self { mmap, capacity })
    }

    /// 打开已存在的环形缓冲区文件并校验头部
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, ShmError> {
        let file = OpenOptions::new().read(true).write(true).open(path.as_ref())?;
        let actual = file.metadata()?.len();
        if actual < HEADER_SIZE as u64 {
            return Err(ShmError::Truncated {
                expected: HEADER_SIZE as u64,
                actual,
            });
        }

        // SAFETY: 映射前已确认文件至少包含完整头部；之后所有访问都经过长度校验。
        let mmap = unsafe { MmapOptions::new().map_mut(&file)? };

        let magic = read_u64(&mmap, MAGIC_OFFSET);
        if magic != MAGIC {
            return Err(ShmError::BadMagic(magic));
        }
        let record_size = read_u32(&mmap, RECORD_SIZE_OFFSET);
        if record_size as usize != RECORD_SIZE {
            return Err(ShmError::RecordSize(record_size));
        }
        let capacity = read_u64(&mmap, CAPACITY_OFFSET);
        if capacity == 0 {
            return Err(ShmError::InvalidCapacity(capacity));
        }
        let expected = total_size(capacity)?;
        if actual < expected {
            return Err(ShmError::Truncated { expected, actual });
        }

        Ok(Self { mmap, capacity })
    }

    /// 记录容量
    pub fn capacity(&self) -> u64 {
        self.capacity
    }

    /// 累计写入的记录条数
    pub fn write_index(&self) -> u64 {
        let index = read_u64(&self.mmap, WRITE_INDEX_OFFSET);
        fence(Ordering::Acquire);
        index
    }

    /// 写入一条记录，返回它在环中的全局位置
    pub fn push(&mut self, record: ShmRecord) -> u64 {
        let index = read_u64(&self.mmap, WRITE_INDEX_OFFSET);
        let offset = self.slot_offset(index);
        record.encode(&mut self.mmap[offset..offset + RECORD_SIZE]);

        fence(Ordering::Release);
        write_u64(&mut self.mmap, WRITE_INDEX_OFFSET, index + 1);
        trace!(index, channel = record.channel_id, "shm record written");
        index
    }

    /// 读取最近的至多 `count` 条记录（由旧到新）
    pub fn read_latest(&self, count: usize) -> Vec<ShmRecord> {
        let end = self.write_index();
        let available = end.min(self.capacity);
        let take = (count as u64).min(available);

        (end - take..end)
            .map(|index| {
                let offset = self.slot_offset(index);
                ShmRecord::decode(&self.mmap[offset..offset + RECORD_SIZE])
            })
            .collect()
    }

    /// 同步到底层文件
    pub fn flush(&self) -> Result<(), ShmError> {
        self.mmap.flush()?;
        Ok(())
    }

    fn slot_offset(&self, index: u64) -> usize {
        HEADER_SIZE + (index % self.capacity) as usize * RECORD_SIZE
    }
}

/// 头部 + 记录区的总字节数；溢出或超出地址空间时视为无效容量
fn total_size(capacity: u64) -> Result<u64, ShmError> {
    capacity
        .checked_mul(RECORD_SIZE as u64)
        .and_then(|records| records.checked_add(HEADER_SIZE as u64))
        .filter(|&total| usize::try_from(total).is_ok())
        .ok_or(ShmError::InvalidCapacity(capacity))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    #[test]
    fn test_record_layout() {
        assert_eq!(RECORD_SIZE, 24);
        let record = ShmRecord::new(7, 42, -1.5);
        let mut buf = [0u8; RECORD_SIZE];
        record.encode(&mut buf);
        assert_eq!(&buf[0..4], &7u32.to_le_bytes());
        assert_eq!(&buf[8..16], &42u64.to_le_bytes());
        assert_eq!(ShmRecord::decode(&buf), record);
    }

    #[test]
    fn test_create_push_read() {
        let file = NamedTempFile::new().unwrap();
        let mut ring = ShmRing::create(file.path(), 4).unwrap();
        assert_eq!(ring.capacity(), 4);
        assert_eq!(ring.write_index(), 0);
        assert!(ring.read_latest(10).is_empty());

        for seq in 0..3 {
            ring.push(ShmRecord::new(1, seq, seq as f64 * 10.0));
        }
        assert_eq!(ring.write_index(), 3);
        let latest = ring.read_latest(2);
        assert_eq!(latest, vec![ShmRecord::new(1, 1, 10.0), ShmRecord::new(1, 2, 20.0)]);
    }

    #[test]
    fn test_wraps_and_overwrites_oldest() {
        let file = NamedTempFile::new().unwrap();
        let mut ring = ShmRing::create(file.path(), 3).unwrap();
        for seq in 0..5 {
            ring.push(ShmRecord::new(2, seq, seq as f64));
        }
        assert_eq!(ring.write_index(), 5);

        let all = ring.read_latest(usize::MAX);
        let seqs: Vec<u64> = all.iter().map(|r| r.sequence_index).collect();
        assert_eq!(seqs, vec![2, 3, 4]);
    }

    #[test]
    fn test_reader_sees_writer_records() {
        let file = NamedTempFile::new().unwrap();
        let mut writer = ShmRing::create(file.path(), 8).unwrap();
        writer.push(ShmRecord::new(5, 0, 3.25));
        writer.flush().unwrap();

        let reader = ShmRing::open(file.path()).unwrap();
        assert_eq!(reader.capacity(), 8);
        assert_eq!(reader.read_latest(1), vec![ShmRecord::new(5, 0, 3.25)]);
    }

    #[test]
    fn test_open_rejects_foreign_files() {
        let file = NamedTempFile::new().unwrap();
        std::fs::write(file.path(), vec![0xAB; HEADER_SIZE]).unwrap();
        assert!(matches!(ShmRing::open(file.path()), Err(ShmError::BadMagic(_))));

        let short = NamedTempFile::new().unwrap();
        std::fs::write(short.path(), [0u8; 8]).unwrap();
        assert!(matches!(ShmRing::open(short.path()), Err(ShmError::Truncated { .. })));
    }

    #[test]
    fn test_open_rejects_oversized_capacity() {
        let file = NamedTempFile::new().unwrap();
        ShmRing::create(file.path(), 4).unwrap();

        // 头部声称的容量使 capacity * RECORD_SIZE 溢出
        let mut bytes = std::fs::read(file.path()).unwrap();
        let huge = u64::MAX / 8;
        write_u64(&mut bytes, CAPACITY_OFFSET, huge);
        std::fs::write(file.path(), &bytes).unwrap();
        assert!(matches!(
            ShmRing::open(file.path()),
            Err(ShmError::InvalidCapacity(c)) if c == huge
        ));

        // 不溢出但文件过短
        write_u64(&mut bytes, CAPACITY_OFFSET, 1 << 20);
        std::fs::write(file.path(), &bytes).unwrap();
        assert!(matches!(ShmRing::open(file.path()), Err(ShmError::Truncated { .. })));
    }

    #[test]
    fn test_zero_capacity_rejected() {
        let file = NamedTempFile::new().unwrap();
        assert!(matches!(ShmRing::create(file.path(), 0), Err(ShmError::InvalidCapacity(0))));
    }
}
