//! # 文件存储层
//!
//! 文件 = 一个文件头块 + 文件头里登记的一列数据块，只有一级索引。

use crate::block::{Block, BlockId};
use crate::layout::FileHeader;
use crate::{ChainFileSystem, Error, Result};

impl ChainFileSystem {
    /// 分配并写出一个空文件头
    pub(crate) fn create_header(&mut self) -> Result<FileHeader> {
        let id = self.alloc_block()?;
        let header = FileHeader::init(id, self.block_size());
        header.store(&self.block_device)?;
        Ok(header)
    }

    #[inline]
    pub(crate) fn load_header(&self, id: BlockId) -> Result<FileHeader> {
        FileHeader::load(&self.block_device, id)
    }

    /// 取文件第`index`个逻辑块对应的卷块；文件还没长到那里时，
    /// 就在末尾逐个追加新块直到覆盖`index`。
    ///
    /// 返回值的第二项表示目标块是否是刚分配的，刚分配的块不必再读。
    /// 中间跳过的块会被清零写出，目标块留给调用者写。
    /// 文件头只在内存中修改，由调用者负责写回。
    pub(crate) fn data_block(&mut self, header: &mut FileHeader, index: usize) -> Result<(BlockId, bool)> {
        if let Some(id) = header.block_id(index) {
            return Ok((id, false));
        }
        if index >= FileHeader::capacity(self.block_size()) {
            return Err(Error::FileTooLarge);
        }

        loop {
            let target = header.data_block_count() == index;
            let id = self.alloc_block()?;
            header.push(id)?;
            if target {
                return Ok((id, true));
            }
            Block::zeroed(id, self.block_size()).store(&self.block_device)?;
        }
    }

    /// 回收文件的全部数据块，再回收文件头本身
    pub(crate) fn release_file(&mut self, header_id: BlockId) -> Result<()> {
        let mut header = self.load_header(header_id)?;
        let data_blocks = header.clear();
        log::debug!(
            "release file header {header_id} with {} data blocks",
            data_blocks.len()
        );
        for id in data_blocks {
            self.free_block(id)?;
        }
        self.free_block(header_id)
    }
}
