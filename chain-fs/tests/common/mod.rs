#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use block_dev::{BlockDevice, RamDisk};
use chain_fs::{ChainFileSystem, Clock, FormatOptions};

pub const BLOCK_SIZE: usize = 512;
pub const NOW: u64 = 1_700_000_000;

pub fn clock() -> Arc<dyn Clock> {
    Arc::new(|| NOW)
}

pub fn options(total_blocks: u32) -> FormatOptions<'static> {
    FormatOptions {
        total_blocks,
        block_size: BLOCK_SIZE,
        volume_name: "chain-fs test",
    }
}

/// 在内存卷上格式化出一个文件系统，同时交回卷本身以便检查
pub fn format(total_blocks: u32) -> (Arc<RamDisk>, ChainFileSystem) {
    let disk = Arc::new(RamDisk::new(total_blocks as usize, BLOCK_SIZE));
    let fs = ChainFileSystem::format(disk.clone(), &options(total_blocks), clock()).unwrap();
    (disk, fs)
}

/// 可以让指定块的读或写失败的卷
pub struct FaultyDisk {
    inner: RamDisk,
    bad_read: AtomicUsize,
    bad_write: AtomicUsize,
}

impl FaultyDisk {
    const NONE: usize = usize::MAX;

    pub fn new(total_blocks: usize) -> Self {
        Self {
            inner: RamDisk::new(total_blocks, BLOCK_SIZE),
            bad_read: AtomicUsize::new(Self::NONE),
            bad_write: AtomicUsize::new(Self::NONE),
        }
    }

    pub fn fail_reads_of(&self, block: usize) {
        self.bad_read.store(block, Ordering::Relaxed);
    }

    pub fn fail_writes_of(&self, block: usize) {
        self.bad_write.store(block, Ordering::Relaxed);
    }

    pub fn heal(&self) {
        self.bad_read.store(Self::NONE, Ordering::Relaxed);
        self.bad_write.store(Self::NONE, Ordering::Relaxed);
    }

    fn hits(bad: &AtomicUsize, start: usize, len: usize) -> bool {
        let bad = bad.load(Ordering::Relaxed);
        (start..start + len / BLOCK_SIZE).contains(&bad)
    }
}

impl BlockDevice for FaultyDisk {
    fn block_size(&self) -> usize {
        self.inner.block_size()
    }

    fn total_blocks(&self) -> usize {
        self.inner.total_blocks()
    }

    fn read_blocks(&self, start: usize, buf: &mut [u8]) -> usize {
        if Self::hits(&self.bad_read, start, buf.len()) {
            return 0;
        }
        self.inner.read_blocks(start, buf)
    }

    fn write_blocks(&self, start: usize, buf: &[u8]) -> usize {
        if Self::hits(&self.bad_write, start, buf.len()) {
            return 0;
        }
        self.inner.write_blocks(start, buf)
    }
}

pub fn format_faulty(total_blocks: u32) -> (Arc<FaultyDisk>, ChainFileSystem) {
    let disk = Arc::new(FaultyDisk::new(total_blocks as usize));
    let fs = ChainFileSystem::format(disk.clone(), &options(total_blocks), clock()).unwrap();
    (disk, fs)
}

/// 可复现的测试数据
pub fn pattern(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i * 7 + i / 251) as u8).collect()
}

/// 超级块计数与分配表扫描结果一致
pub fn assert_free_counter(fs: &ChainFileSystem) {
    assert_eq!(fs.free_blocks(), fs.count_free_blocks().unwrap());
}
