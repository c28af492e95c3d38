use alloc::sync::Arc;
use alloc::vec::Vec;
use core::mem;

use block_dev::BlockDevice;

use crate::block::{Block, BlockId, Plain};
use crate::FILE_HEADER_MAGIC;
use crate::{Error, Result};

#[repr(C)]
struct FileHeaderHead {
    magic: u32,
    /// 有效的数据块槽位数
    data_block_count: u32,
    file_size: u64,
}

unsafe impl Plain for FileHeaderHead {}

/// 文件头块：一级索引。
///
/// 块头之后是数据块地址数组，前`data_block_count`个槽位有效，
/// 按文件内的逻辑块顺序排列。一个文件最多有 [`FileHeader::capacity`] 个数据块。
#[derive(Debug, Clone)]
pub struct FileHeader(Block);

impl FileHeader {
    const SLOTS_OFFSET: usize = mem::size_of::<FileHeaderHead>();

    #[inline]
    pub const fn capacity(block_size: usize) -> usize {
        (block_size - Self::SLOTS_OFFSET) / mem::size_of::<u32>()
    }

    /// 新文件头：没有数据块，大小为零
    pub fn init(id: BlockId, block_size: usize) -> Self {
        let mut header = Self(Block::zeroed(id, block_size));
        header.head_mut().magic = FILE_HEADER_MAGIC;
        header
    }

    pub fn load(block_device: &Arc<dyn BlockDevice>, id: BlockId) -> Result<Self> {
        let header = Self(Block::load(block_device, id)?);
        let head = header.head();
        if head.magic != FILE_HEADER_MAGIC || head.data_block_count as usize > header.cap() {
            log::error!(
                "bad file header at block {id}: magic={:#x} count={}",
                head.magic,
                head.data_block_count
            );
            return Err(Error::Corrupted);
        }
        Ok(header)
    }

    #[inline]
    pub fn store(&self, block_device: &Arc<dyn BlockDevice>) -> Result<()> {
        self.0.store(block_device)
    }

    #[inline]
    pub fn id(&self) -> BlockId {
        self.0.id()
    }

    #[inline]
    pub fn file_size(&self) -> u64 {
        self.head().file_size
    }

    #[inline]
    pub fn set_file_size(&mut self, size: u64) {
        self.head_mut().file_size = size;
    }

    #[inline]
    pub fn data_block_count(&self) -> usize {
        self.head().data_block_count as usize
    }

    /// 有效的数据块地址
    #[inline]
    pub fn data_blocks(&self) -> &[u32] {
        self.0.slice(Self::SLOTS_OFFSET, self.data_block_count())
    }

    /// 文件内第`index`个逻辑块对应的卷块
    #[inline]
    pub fn block_id(&self, index: usize) -> Option<BlockId> {
        self.data_blocks().get(index).copied().map(BlockId::new)
    }

    /// 在末尾登记一个数据块
    pub fn push(&mut self, id: BlockId) -> Result<()> {
        let count = self.data_block_count();
        if count == self.cap() {
            return Err(Error::FileTooLarge);
        }
        *self.0.get_mut(Self::SLOTS_OFFSET + count * mem::size_of::<u32>()) = id.raw();
        self.head_mut().data_block_count += 1;
        Ok(())
    }

    /// 清空索引，返回原有的数据块，由调用者回收
    pub fn clear(&mut self) -> Vec<BlockId> {
        let blocks = self.data_blocks().iter().copied().map(BlockId::new).collect();
        let magic = self.head().magic;
        self.0.zeroize();
        self.head_mut().magic = magic;
        blocks
    }
}

impl FileHeader {
    #[inline]
    fn cap(&self) -> usize {
        Self::capacity(self.0.len())
    }

    #[inline]
    fn head(&self) -> &FileHeaderHead {
        self.0.get(0)
    }

    #[inline]
    fn head_mut(&mut self) -> &mut FileHeaderHead {
        self.0.get_mut(0)
    }
}

#[cfg(test)]
mod tests {
    use block_dev::RamDisk;

    use super::*;

    #[test]
    fn capacity() {
        assert_eq!(124, FileHeader::capacity(512));
        assert_eq!(1020, FileHeader::capacity(4096));
    }

    #[test]
    fn index_grows_until_full() {
        let mut header = FileHeader::init(BlockId::new(10), 512);
        for raw in 0..124 {
            header.push(BlockId::new(100 + raw)).unwrap();
        }
        assert_eq!(124, header.data_block_count());
        assert_eq!(Err(Error::FileTooLarge), header.push(BlockId::new(999)));
        assert_eq!(Some(BlockId::new(105)), header.block_id(5));
        assert_eq!(None, header.block_id(124));

        let released = header.clear();
        assert_eq!(124, released.len());
        assert_eq!(0, header.data_block_count());
        assert_eq!(0, header.file_size());
    }

    #[test]
    fn magic_is_checked() {
        let dev: Arc<dyn BlockDevice> = Arc::new(RamDisk::new(16, 512));
        assert_eq!(
            Err(Error::Corrupted),
            FileHeader::load(&dev, BlockId::new(3)).map(|_| ())
        );

        let mut header = FileHeader::init(BlockId::new(3), 512);
        header.push(BlockId::new(7)).unwrap();
        header.set_file_size(12);
        header.store(&dev).unwrap();

        let loaded = FileHeader::load(&dev, BlockId::new(3)).unwrap();
        assert_eq!(12, loaded.file_size());
        assert_eq!(&[7u32], loaded.data_blocks());
    }
}
