//! # 块管理器层
//!
//! 构建出磁盘的布局并使用。
//!
//! [`ChainFileSystem`] 是一次挂载的会话：超级块、分配表、打开文件表、
//! 当前目录都挂在它身上，所有操作都经由`&mut self`串行执行。

use alloc::string::String;
use alloc::sync::Arc;

use block_dev::BlockDevice;

use crate::block::BlockId;
use crate::io::FdTable;
use crate::layout::{AllocState, AllocTable, DirBlock, SuperBlock};
use crate::{Clock, Error, Result};
use crate::{MAX_BLOCK_SIZE, MIN_BLOCK_SIZE, ROOT_DIR_BLOCK_ID, TABLE_START_BLOCK_ID};

/// 格式化参数
#[derive(Debug, Clone, Copy)]
pub struct FormatOptions<'a> {
    /// 文件系统占据的块数，不能超过设备的块数
    pub total_blocks: u32,
    /// 必须与设备协商出的块大小一致
    pub block_size: usize,
    pub volume_name: &'a str,
}

pub struct ChainFileSystem {
    pub(crate) block_device: Arc<dyn BlockDevice>,
    pub(crate) super_block: SuperBlock,
    pub(crate) table: AllocTable,
    pub(crate) clock: Arc<dyn Clock>,
    pub(crate) fds: FdTable,
    pub(crate) cwd: String,
}

impl ChainFileSystem {
    /// 在设备上建立空的文件系统：超级块、只有一个空块的根目录、分配表，
    /// 然后挂载它。
    pub fn format(
        block_device: Arc<dyn BlockDevice>,
        options: &FormatOptions,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        let FormatOptions {
            total_blocks,
            block_size,
            volume_name,
        } = *options;

        if block_size != block_device.block_size()
            || total_blocks as usize > block_device.total_blocks()
            || !valid_block_size(block_size)
        {
            log::error!(
                "cannot format {total_blocks}x{block_size} on a {}x{} device",
                block_device.total_blocks(),
                block_device.block_size()
            );
            return Err(Error::InvalidGeometry);
        }

        let table_blocks = AllocTable::blocks_for(total_blocks as u64, block_size) as u32;
        // 超级块 + 根目录块 + 分配表
        let reserved = 2 + table_blocks;
        if reserved >= total_blocks {
            log::error!("{total_blocks} blocks cannot hold the {reserved} reserved blocks");
            return Err(Error::InvalidGeometry);
        }

        let table = AllocTable::new(TABLE_START_BLOCK_ID, table_blocks, total_blocks, block_size);
        table.format(&block_device, reserved)?;
        DirBlock::empty(ROOT_DIR_BLOCK_ID, block_size).store(&block_device)?;
        SuperBlock::new(
            total_blocks as u64,
            block_size as u64,
            (total_blocks - reserved) as u64,
            ROOT_DIR_BLOCK_ID,
            TABLE_START_BLOCK_ID,
            table_blocks as u64,
            volume_name,
            clock.now(),
        )
        .store(&block_device)?;

        log::info!(
            "formatted {volume_name:?}: {total_blocks} blocks of {block_size} bytes, \
             {table_blocks} table blocks"
        );

        Self::mount(block_device, clock)
    }

    /// 校验超级块并刷新挂载时间，不做任何修复
    pub fn mount(block_device: Arc<dyn BlockDevice>, clock: Arc<dyn Clock>) -> Result<Self> {
        let mut super_block = SuperBlock::load(&block_device)?;

        let block_size = super_block.block_size as usize;
        let total_blocks = super_block.total_blocks;
        let table_blocks = super_block.table_blocks;
        if block_size != block_device.block_size()
            || !valid_block_size(block_size)
            || total_blocks > block_device.total_blocks() as u64
            || total_blocks > u32::MAX as u64
            || super_block.root_dir() != ROOT_DIR_BLOCK_ID
            || super_block.table_start() != TABLE_START_BLOCK_ID
            || table_blocks != AllocTable::blocks_for(total_blocks, block_size)
            || super_block.free_blocks > total_blocks
        {
            log::error!("super block geometry does not match the device: {super_block:?}");
            return Err(Error::InvalidGeometry);
        }

        super_block.last_mount_time = clock.now();
        super_block.store(&block_device)?;

        let table = AllocTable::new(
            super_block.table_start(),
            table_blocks as u32,
            total_blocks as u32,
            block_size,
        );

        log::info!(
            "mounted {:?}: {} of {total_blocks} blocks free",
            super_block.volume_name(),
            super_block.free_blocks
        );

        Ok(Self {
            block_device,
            super_block,
            table,
            clock,
            fds: FdTable::new(),
            cwd: String::from("/"),
        })
    }

    /// 关闭所有打开的文件，刷新挂载时间。
    /// 即使某个文件关闭失败，也会继续关闭其余文件，最后报告第一个错误。
    pub fn unmount(mut self) -> Result<()> {
        let mut result = Ok(());
        for fd in self.fds.open_fds() {
            if let Err(e) = self.close(fd) {
                log::warn!("failed to close {fd} on unmount: {e}");
                result = result.and(Err(e));
            }
        }

        self.super_block.last_mount_time = self.clock.now();
        self.super_block.store(&self.block_device)?;
        log::info!("unmounted {:?}", self.super_block.volume_name());

        result
    }
}

impl ChainFileSystem {
    /// 首次适配地分配一个块
    pub fn alloc_block(&mut self) -> Result<BlockId> {
        let Some(id) = self.table.alloc(&self.block_device)? else {
            log::warn!("no free block left");
            return Err(Error::NoSpace);
        };
        self.super_block.free_blocks -= 1;
        self.super_block.store(&self.block_device)?;
        log::debug!("alloc block {id}");
        Ok(id)
    }

    /// 回收一个已分配的块。空闲块与保留块不能回收。
    pub fn free_block(&mut self, id: BlockId) -> Result<()> {
        self.table.dealloc(&self.block_device, id)?;
        self.super_block.free_blocks += 1;
        self.fds.invalidate(id, None);
        self.super_block.store(&self.block_device)?;
        log::debug!("free block {id}");
        Ok(())
    }

    #[inline]
    pub fn block_state(&self, id: BlockId) -> Result<AllocState> {
        self.table.state(&self.block_device, id)
    }

    /// 扫描整张分配表得到的空闲块数，应当总与 [`Self::free_blocks`] 相等
    #[inline]
    pub fn count_free_blocks(&self) -> Result<u64> {
        self.table.count_free(&self.block_device)
    }

    /// 超级块记录的空闲块数
    #[inline]
    pub fn free_blocks(&self) -> u64 {
        self.super_block.free_blocks
    }

    #[inline]
    pub fn total_blocks(&self) -> u64 {
        self.super_block.total_blocks
    }

    #[inline]
    pub fn block_size(&self) -> usize {
        self.super_block.block_size as usize
    }

    #[inline]
    pub fn super_block(&self) -> &SuperBlock {
        &self.super_block
    }

    #[inline]
    pub fn block_device(&self) -> &Arc<dyn BlockDevice> {
        &self.block_device
    }

    /// 目录项里的时间戳只有32位
    #[inline]
    pub(crate) fn now(&self) -> u32 {
        self.clock.now() as u32
    }
}

#[inline]
fn valid_block_size(block_size: usize) -> bool {
    block_size.is_power_of_two() && (MIN_BLOCK_SIZE..=MAX_BLOCK_SIZE).contains(&block_size)
}

#[cfg(test)]
mod tests {
    use block_dev::RamDisk;

    use super::*;

    fn options(total_blocks: u32) -> FormatOptions<'static> {
        FormatOptions {
            total_blocks,
            block_size: 512,
            volume_name: "test",
        }
    }

    fn clock() -> Arc<dyn Clock> {
        Arc::new(|| 1_700_000_000u64)
    }

    #[test]
    fn format_reserves_metadata() {
        let dev: Arc<dyn BlockDevice> = Arc::new(RamDisk::new(64, 512));
        let fs = ChainFileSystem::format(dev, &options(64), clock()).unwrap();

        // 64项只需一个表块：超级块、根目录、表块
        assert_eq!(61, fs.free_blocks());
        assert_eq!(61, fs.count_free_blocks().unwrap());
        for raw in 0..3 {
            assert_eq!(AllocState::Reserved, fs.block_state(BlockId::new(raw)).unwrap());
        }
        assert_eq!(AllocState::Free, fs.block_state(BlockId::new(3)).unwrap());
    }

    #[test]
    fn bad_geometry() {
        let dev: Arc<dyn BlockDevice> = Arc::new(RamDisk::new(64, 512));
        assert_eq!(
            Err(Error::InvalidGeometry),
            ChainFileSystem::format(dev.clone(), &options(65), clock()).map(|_| ())
        );
        assert_eq!(
            Err(Error::InvalidGeometry),
            ChainFileSystem::format(dev.clone(), &options(3), clock()).map(|_| ())
        );
        let wrong_size = FormatOptions {
            block_size: 1024,
            ..options(32)
        };
        assert_eq!(
            Err(Error::InvalidGeometry),
            ChainFileSystem::format(dev, &wrong_size, clock()).map(|_| ())
        );
    }

    #[test]
    fn alloc_and_free_keep_counter() {
        let dev: Arc<dyn BlockDevice> = Arc::new(RamDisk::new(64, 512));
        let mut fs = ChainFileSystem::format(dev, &options(64), clock()).unwrap();

        let a = fs.alloc_block().unwrap();
        let b = fs.alloc_block().unwrap();
        assert_eq!((BlockId::new(3), BlockId::new(4)), (a, b));
        assert_eq!(59, fs.free_blocks());

        fs.free_block(a).unwrap();
        assert_eq!(Err(Error::InvalidFree), fs.free_block(a));
        assert_eq!(Err(Error::InvalidFree), fs.free_block(ROOT_DIR_BLOCK_ID));
        assert_eq!(Err(Error::OutOfRange), fs.free_block(BlockId::new(64)));
        assert_eq!(60, fs.free_blocks());
        assert_eq!(60, fs.count_free_blocks().unwrap());
    }
}
