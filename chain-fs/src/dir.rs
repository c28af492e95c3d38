//! # 目录层
//!
//! 一个目录是一条目录块链表，以首块地址作为目录的身份。
//! 链表只会在尾块满时增长，且永不缩短：即使某个块被删空，也仍留在链上。

use alloc::string::{String, ToString};
use alloc::sync::Arc;
use alloc::vec::Vec;

use block_dev::BlockDevice;

use crate::block::BlockId;
use crate::layout::{DirBlock, DirEntry};
use crate::{ChainFileSystem, Error, Result};

/// 目录项在链上的位置
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DirSlot {
    /// 所在目录块
    pub block: BlockId,
    /// 块内序号
    pub slot: usize,
    /// 整条链上的逻辑序号
    pub index: usize,
}

impl ChainFileSystem {
    /// 把绝对路径解析为`(所在目录的首块, 末项名)`。
    ///
    /// 除末项外的每一项都必须是已存在的目录；
    /// 路径为`/`或以`/`结尾时，末项名为空串，调用者须把它视作“没有对应的目录项”。
    pub fn resolve_path(&self, path: &str) -> Result<(BlockId, String)> {
        let Some(path) = path.strip_prefix('/') else {
            return Err(Error::InvalidPath);
        };
        let (dirs, leaf) = path.rsplit_once('/').unwrap_or(("", path));

        let mut dir = self.super_block.root_dir();
        for name in dirs.split('/').filter(|s| !s.is_empty()) {
            let Some((_, entry)) = self.find_in_chain(dir, name)? else {
                return Err(Error::NotFound);
            };
            if !entry.is_dir() {
                return Err(Error::NotADirectory);
            }
            dir = entry.start().ok_or(Error::Corrupted)?;
        }

        Ok((dir, leaf.to_string()))
    }

    /// 在目录链上按名字查找，第一个匹配者胜出
    pub fn find_in_chain(&self, first: BlockId, name: &str) -> Result<Option<(DirSlot, DirEntry)>> {
        let mut index = 0;
        for block in self.chain_blocks(first) {
            let block = block?;
            if let Some(slot) = block.entries().iter().position(|e| e.name() == name) {
                let found = DirSlot {
                    block: block.id(),
                    slot,
                    index: index + slot,
                };
                return Ok(Some((found, block.entries()[slot])));
            }
            index += block.len();
        }
        Ok(None)
    }

    /// 把目录项追加到链尾；尾块已满时分配新块并接到链上。
    ///
    /// 调用者须事先确认目录中没有同名项。
    pub fn add_entry(&mut self, first: BlockId, entry: DirEntry) -> Result<DirSlot> {
        let mut index = 0;
        let mut tail = None;
        for block in self.chain_blocks(first) {
            let block = block?;
            debug_assert!(
                block.entries().iter().all(|e| e.name() != entry.name()),
                "duplicate entry {:?} in directory {first}",
                entry.name()
            );
            index += block.len();
            tail = Some(block);
        }
        let mut tail = tail.ok_or(Error::Corrupted)?;

        if !tail.is_full() {
            let slot = tail.len();
            tail.push(entry);
            tail.store(&self.block_device)?;
            return Ok(DirSlot {
                block: tail.id(),
                slot,
                index,
            });
        }

        let id = self.alloc_block()?;
        let mut new_tail = DirBlock::empty(id, self.block_size());
        new_tail.push(entry);
        // 先写好新块，再挂到链上
        new_tail.store(&self.block_device)?;
        tail.set_next(id);
        tail.store(&self.block_device)?;
        log::debug!("directory {first} grows with block {id}");

        Ok(DirSlot {
            block: id,
            slot: 0,
            index,
        })
    }

    /// 移除链上逻辑序号为`index`的目录项。目录块即使被删空也不回收。
    pub fn remove_entry(&mut self, first: BlockId, index: usize) -> Result<DirEntry> {
        let mut base = 0;
        for block in self.chain_blocks(first) {
            let mut block = block?;
            if index < base + block.len() {
                let removed = block.remove(index - base);
                block.store(&self.block_device)?;
                return Ok(removed);
            }
            base += block.len();
        }
        Err(Error::NotFound)
    }

    /// 原地改写一个目录项
    pub fn update_entry(&mut self, slot: DirSlot, entry: &DirEntry) -> Result<()> {
        let mut block = DirBlock::load(&self.block_device, slot.block)?;
        let target = block.entries_mut().get_mut(slot.slot).ok_or(Error::Corrupted)?;
        *target = *entry;
        block.store(&self.block_device)
    }

    /// 链上每一块都没有目录项
    pub fn is_dir_empty(&self, first: BlockId) -> Result<bool> {
        for block in self.chain_blocks(first) {
            if !block?.is_empty() {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// 沿链走一遍，报告每一块的地址与目录项数
    pub fn chain(&self, first: BlockId) -> Result<Vec<(BlockId, usize)>> {
        self.chain_blocks(first)
            .map(|block| block.map(|block| (block.id(), block.len())))
            .collect()
    }

    #[inline]
    pub(crate) fn chain_blocks(&self, first: BlockId) -> ChainBlocks {
        ChainBlocks::new(self.block_device.clone(), first, self.total_blocks())
    }
}

/// 沿着`next`遍历目录链。
///
/// 链长不可能超过卷的块数，超过即说明链上有环。
pub(crate) struct ChainBlocks {
    block_device: Arc<dyn BlockDevice>,
    next: Option<BlockId>,
    budget: u64,
}

impl ChainBlocks {
    pub(crate) fn new(block_device: Arc<dyn BlockDevice>, first: BlockId, total_blocks: u64) -> Self {
        Self {
            block_device,
            next: Some(first),
            budget: total_blocks,
        }
    }
}

impl Iterator for ChainBlocks {
    type Item = Result<DirBlock>;

    fn next(&mut self) -> Option<Self::Item> {
        let id = self.next.take()?;
        if self.budget == 0 {
            log::error!("directory chain loops back at block {id}");
            return Some(Err(Error::Corrupted));
        }
        self.budget -= 1;

        let block = DirBlock::load(&self.block_device, id);
        if let Ok(block) = &block {
            self.next = block.next();
        }
        Some(block)
    }
}
