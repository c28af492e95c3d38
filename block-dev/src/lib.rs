//! # 块设备接口层
//!
//! 块设备是以**块**为单位存储数据的设备，例如磁盘、光盘、U盘等；
//! [`BlockDevice`] 就是对读写块设备的抽象，
//! 实现了此特质的类型称为**块设备驱动**。
//!
//! 块设备按逻辑块地址(LBA)读写，一次可以传输连续的多个块。
//! 传输越界或失败时，返回值小于请求的块数（通常为0），
//! 调用者必须把这种“短传输”视作错误。

#![no_std]

extern crate alloc;

use alloc::vec;
use alloc::vec::Vec;
use core::any::Any;

use spin::Mutex;

/// 块设备驱动特质
pub trait BlockDevice: Send + Sync + Any {
    /// 每块的字节数，挂载时协商得到
    fn block_size(&self) -> usize;

    /// 卷的总块数，挂载时协商得到
    fn total_blocks(&self) -> usize;

    /// 从`start`开始读出`buf.len() / block_size`个块，返回实际传输的块数
    fn read_blocks(&self, start: usize, buf: &mut [u8]) -> usize;

    /// 从`start`开始写入`buf.len() / block_size`个块，返回实际传输的块数
    fn write_blocks(&self, start: usize, buf: &[u8]) -> usize;

    /// 传输`count`个块是否会越过卷尾
    #[inline]
    fn out_of_range(&self, start: usize, count: usize) -> bool {
        start
            .checked_add(count)
            .is_none_or(|end| end > self.total_blocks())
    }
}

/// 内存中的卷，测试与工具都用它模拟磁盘
#[derive(Debug)]
pub struct RamDisk {
    block_size: usize,
    total_blocks: usize,
    data: Mutex<Vec<u8>>,
}

impl RamDisk {
    pub fn new(total_blocks: usize, block_size: usize) -> Self {
        Self {
            block_size,
            total_blocks,
            data: Mutex::new(vec![0; total_blocks * block_size]),
        }
    }

    /// 整个卷的字节快照
    pub fn snapshot(&self) -> Vec<u8> {
        self.data.lock().clone()
    }

    /// 直接改写卷上的字节，用于构造损坏的磁盘结构
    pub fn patch(&self, offset: usize, bytes: &[u8]) {
        self.data.lock()[offset..offset + bytes.len()].copy_from_slice(bytes);
    }

    /// 把缓冲区长度换算为块数；不是整块时拒绝传输
    fn blocks_of(&self, len: usize) -> Option<usize> {
        (len % self.block_size == 0).then_some(len / self.block_size)
    }
}

impl BlockDevice for RamDisk {
    #[inline]
    fn block_size(&self) -> usize {
        self.block_size
    }

    #[inline]
    fn total_blocks(&self) -> usize {
        self.total_blocks
    }

    fn read_blocks(&self, start: usize, buf: &mut [u8]) -> usize {
        let Some(count) = self.blocks_of(buf.len()) else {
            return 0;
        };
        if self.out_of_range(start, count) {
            return 0;
        }

        let offset = start * self.block_size;
        buf.copy_from_slice(&self.data.lock()[offset..offset + buf.len()]);
        count
    }

    fn write_blocks(&self, start: usize, buf: &[u8]) -> usize {
        let Some(count) = self.blocks_of(buf.len()) else {
            return 0;
        };
        if self.out_of_range(start, count) {
            return 0;
        }

        let offset = start * self.block_size;
        self.data.lock()[offset..offset + buf.len()].copy_from_slice(buf);
        count
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ram_disk_bounds() {
        let disk = RamDisk::new(4, 512);
        let block = [0xAB; 512];
        assert_eq!(1, disk.write_blocks(3, &block));
        assert_eq!(0, disk.write_blocks(4, &block));
        assert_eq!(0, disk.write_blocks(3, &[0; 1024]));
        assert_eq!(0, disk.write_blocks(0, &[0; 100]));

        let mut buf = [0; 512];
        assert_eq!(1, disk.read_blocks(3, &mut buf));
        assert_eq!(block, buf);
        assert_eq!(0, disk.read_blocks(usize::MAX, &mut buf));
    }
}
