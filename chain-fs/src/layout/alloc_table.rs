use alloc::sync::Arc;
use core::mem;

use block_dev::BlockDevice;

use crate::block::{Block, BlockId};
use crate::{Error, Result};

/// 分配表项：每个卷块对应一项
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum AllocState {
    Free = 0,
    /// 分配出去的单个块，不串成链表
    Used = 1,
    /// 超级块、根目录块、分配表自身，永不回收
    Reserved = u32::MAX,
}

impl TryFrom<u32> for AllocState {
    type Error = Error;

    fn try_from(raw: u32) -> Result<Self> {
        match raw {
            0 => Ok(Self::Free),
            1 => Ok(Self::Used),
            u32::MAX => Ok(Self::Reserved),
            _ => Err(Error::Corrupted),
        }
    }
}

/// 分配表区域，记录整个卷上每一块的分配情况
#[derive(Debug)]
pub struct AllocTable {
    /// 分配表的起始块
    start_block_id: BlockId,
    /// 分配表占用块数
    blocks: u32,
    /// 卷的总块数，即有效表项数
    total_blocks: u32,
    /// 每个表块容纳的表项数
    entries_per_block: u32,
}

impl AllocTable {
    pub const ENTRY_SIZE: usize = mem::size_of::<u32>();

    #[inline]
    pub fn new(start_block_id: BlockId, blocks: u32, total_blocks: u32, block_size: usize) -> Self {
        Self {
            start_block_id,
            blocks,
            total_blocks,
            entries_per_block: (block_size / Self::ENTRY_SIZE) as u32,
        }
    }

    /// 覆盖`total_blocks`个表项需要多少块
    #[inline]
    pub fn blocks_for(total_blocks: u64, block_size: usize) -> u64 {
        (total_blocks * Self::ENTRY_SIZE as u64).div_ceil(block_size as u64)
    }

    /// 写出整张表：前`reserved`块标记为保留，其余全部空闲
    pub fn format(&self, block_device: &Arc<dyn BlockDevice>, reserved: u32) -> Result<()> {
        for block_index in 0..self.blocks {
            let mut block = Block::zeroed(self.start_block_id + block_index, block_device.block_size());
            let first = block_index * self.entries_per_block;
            for (slot, entry) in block
                .slice_mut::<u32>(0, self.entries_per_block as usize)
                .iter_mut()
                .enumerate()
            {
                if first + (slot as u32) < reserved {
                    *entry = AllocState::Reserved as u32;
                }
            }
            block.store(block_device)?;
        }
        Ok(())
    }

    /// 首次适配：按表块顺序、块内按槽位顺序寻找第一个空闲项，
    /// 标记为已用并写回该表块，返回其对应的块地址。
    /// 若整张表都没有空闲项，则返回空。
    pub fn alloc(&self, block_device: &Arc<dyn BlockDevice>) -> Result<Option<BlockId>> {
        for block_index in 0..self.blocks {
            let mut block = Block::load(block_device, self.start_block_id + block_index)?;
            let first = block_index * self.entries_per_block;
            // 最后一个表块可能只有一部分槽位有效
            let valid = self.entries_per_block.min(self.total_blocks - first) as usize;

            let Some(slot) = block
                .slice::<u32>(0, valid)
                .iter()
                .position(|&entry| entry == AllocState::Free as u32)
            else {
                continue;
            };

            block.slice_mut::<u32>(0, valid)[slot] = AllocState::Used as u32;
            block.store(block_device)?;
            return Ok(Some(BlockId::new(first + slot as u32)));
        }

        Ok(None)
    }

    /// 把一个已分配的块标记为空闲并写回表块。
    /// 空闲块与保留块都不能回收。
    pub fn dealloc(&self, block_device: &Arc<dyn BlockDevice>, id: BlockId) -> Result<()> {
        let (table_block, slot) = self.locate(id)?;
        let mut block = Block::load(block_device, table_block)?;
        let entry = block.get_mut::<u32>(slot * Self::ENTRY_SIZE);

        match AllocState::try_from(*entry)? {
            AllocState::Used => *entry = AllocState::Free as u32,
            state => {
                log::warn!("refuse to free block {id} in state {state:?}");
                return Err(Error::InvalidFree);
            }
        }

        block.store(block_device)
    }

    pub fn state(&self, block_device: &Arc<dyn BlockDevice>, id: BlockId) -> Result<AllocState> {
        let (table_block, slot) = self.locate(id)?;
        let block = Block::load(block_device, table_block)?;
        AllocState::try_from(*block.get::<u32>(slot * Self::ENTRY_SIZE))
    }

    /// 扫描整张表，统计空闲项
    pub fn count_free(&self, block_device: &Arc<dyn BlockDevice>) -> Result<u64> {
        let mut free = 0;
        for block_index in 0..self.blocks {
            let block = Block::load(block_device, self.start_block_id + block_index)?;
            let first = block_index * self.entries_per_block;
            let valid = self.entries_per_block.min(self.total_blocks - first) as usize;
            free += block
                .slice::<u32>(0, valid)
                .iter()
                .filter(|&&entry| entry == AllocState::Free as u32)
                .count() as u64;
        }
        Ok(free)
    }
}

impl AllocTable {
    /// 块地址 -> (所在表块, 块内槽位)
    fn locate(&self, id: BlockId) -> Result<(BlockId, usize)> {
        let raw = id.raw();
        if raw >= self.total_blocks {
            log::warn!("block {id} is beyond the volume ({} blocks)", self.total_blocks);
            return Err(Error::OutOfRange);
        }
        Ok((
            self.start_block_id + raw / self.entries_per_block,
            (raw % self.entries_per_block) as usize,
        ))
    }
}

#[cfg(test)]
mod tests {
    use block_dev::RamDisk;

    use super::*;

    /// 300块的卷，表占3个块(128项/块)，前5块保留
    fn table() -> (Arc<dyn BlockDevice>, AllocTable) {
        let dev: Arc<dyn BlockDevice> = Arc::new(RamDisk::new(300, 512));
        let blocks = AllocTable::blocks_for(300, 512) as u32;
        let table = AllocTable::new(BlockId::new(2), blocks, 300, 512);
        table.format(&dev, 5).unwrap();
        (dev, table)
    }

    #[test]
    fn first_fit() {
        let (dev, table) = table();
        assert_eq!(3, AllocTable::blocks_for(300, 512));
        assert_eq!(295, table.count_free(&dev).unwrap());

        assert_eq!(Some(BlockId::new(5)), table.alloc(&dev).unwrap());
        assert_eq!(Some(BlockId::new(6)), table.alloc(&dev).unwrap());
        table.dealloc(&dev, BlockId::new(5)).unwrap();
        assert_eq!(Some(BlockId::new(5)), table.alloc(&dev).unwrap());
        assert_eq!(AllocState::Used, table.state(&dev, BlockId::new(6)).unwrap());
        assert_eq!(AllocState::Reserved, table.state(&dev, BlockId::new(4)).unwrap());
    }

    #[test]
    fn exhaustion_stops_at_volume_end() {
        let (dev, table) = table();
        let ids: Vec<_> = core::iter::from_fn(|| table.alloc(&dev).unwrap()).collect();
        assert_eq!(295, ids.len());
        assert_eq!(Some(&BlockId::new(299)), ids.last());
        assert_eq!(0, table.count_free(&dev).unwrap());
    }

    #[test]
    fn bad_frees() {
        let (dev, table) = table();
        assert_eq!(Err(Error::InvalidFree), table.dealloc(&dev, BlockId::new(2)));
        assert_eq!(Err(Error::InvalidFree), table.dealloc(&dev, BlockId::new(100)));
        assert_eq!(Err(Error::OutOfRange), table.dealloc(&dev, BlockId::new(300)));
    }
}
