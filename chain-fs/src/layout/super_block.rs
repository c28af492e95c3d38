use alloc::sync::Arc;

use block_dev::BlockDevice;

use crate::block::{Block, BlockId, Plain};
use crate::{Error, Result};
use crate::{MAGIC, MIN_BLOCK_SIZE, SUPER_BLOCK_ID, VERSION};

const VOLUME_NAME_LEN: usize = 32;

/// 超级块：
/// - 提供文件系统合法性校验（魔数 + 版本）；
/// - 记录卷的几何参数与空闲块计数；
/// - 定位根目录与分配表。
///
/// 每次分配、回收、挂载、卸载都会同步重写超级块，没有延迟写回。
#[derive(Debug, Clone, Copy)]
#[repr(C)]
pub struct SuperBlock {
    /// 魔数：用于校验文件系统合法性
    magic: u32,
    version: u32,
    /// 文件系统占据块数
    pub total_blocks: u64,
    pub block_size: u64,
    /// 分配表中`FREE`项的个数
    pub free_blocks: u64,
    pub root_dir_block: u64,
    /// 分配表的起始块
    pub table_start: u64,
    /// 分配表占用块数
    pub table_blocks: u64,
    // 最后一字节留给 \0
    volume_name: [u8; VOLUME_NAME_LEN],
    pub create_time: u64,
    pub last_mount_time: u64,
}

unsafe impl Plain for SuperBlock {}

impl SuperBlock {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        total_blocks: u64,
        block_size: u64,
        free_blocks: u64,
        root_dir_block: BlockId,
        table_start: BlockId,
        table_blocks: u64,
        volume_name: &str,
        now: u64,
    ) -> Self {
        let mut name = [0; VOLUME_NAME_LEN];
        // 截断时不能切开多字节字符
        let mut len = volume_name.len().min(VOLUME_NAME_LEN - 1);
        while !volume_name.is_char_boundary(len) {
            len -= 1;
        }
        name[..len].copy_from_slice(&volume_name.as_bytes()[..len]);

        Self {
            magic: MAGIC,
            version: VERSION,
            total_blocks,
            block_size,
            free_blocks,
            root_dir_block: u32::from(root_dir_block) as u64,
            table_start: u32::from(table_start) as u64,
            table_blocks,
            volume_name: name,
            create_time: now,
            last_mount_time: now,
        }
    }

    /// 读出超级块；魔数或版本不符时，不再触碰卷上的其它结构
    pub fn load(block_device: &Arc<dyn BlockDevice>) -> Result<Self> {
        let super_block = *Block::load(block_device, SUPER_BLOCK_ID)?.get::<Self>(0);
        if !super_block.is_valid() {
            log::error!(
                "bad super block: magic={:#x} version={}",
                super_block.magic,
                super_block.version
            );
            return Err(Error::InvalidMagic);
        }
        Ok(super_block)
    }

    /// 从卷开头的字节中认出超级块，用于挂载前探测块大小。
    /// 字节数不足 [`MIN_BLOCK_SIZE`] 或魔数不符时返回空。
    pub fn probe(head: &[u8]) -> Option<Self> {
        let head = head.get(..MIN_BLOCK_SIZE)?;
        let mut block = Block::zeroed(SUPER_BLOCK_ID, MIN_BLOCK_SIZE);
        block.bytes_mut().copy_from_slice(head);
        let super_block = *block.get::<Self>(0);
        super_block.is_valid().then_some(super_block)
    }

    pub fn store(&self, block_device: &Arc<dyn BlockDevice>) -> Result<()> {
        let mut block = Block::zeroed(SUPER_BLOCK_ID, block_device.block_size());
        *block.get_mut(0) = *self;
        block.store(block_device)
    }

    #[inline]
    pub fn is_valid(&self) -> bool {
        self.magic == MAGIC && self.version == VERSION
    }

    #[inline]
    pub fn version(&self) -> u32 {
        self.version
    }

    pub fn volume_name(&self) -> &str {
        let len = self
            .volume_name
            .iter()
            .position(|&c| c == 0)
            .unwrap_or(VOLUME_NAME_LEN);
        core::str::from_utf8(&self.volume_name[..len]).unwrap_or_default()
    }

    #[inline]
    pub fn root_dir(&self) -> BlockId {
        BlockId::new(self.root_dir_block as u32)
    }

    #[inline]
    pub fn table_start(&self) -> BlockId {
        BlockId::new(self.table_start as u32)
    }
}

#[cfg(test)]
mod tests {
    use block_dev::RamDisk;

    use super::*;
    use crate::{ROOT_DIR_BLOCK_ID, TABLE_START_BLOCK_ID};

    #[test]
    fn persist_and_validate() {
        let dev: Arc<dyn BlockDevice> = Arc::new(RamDisk::new(8, 512));
        assert_eq!(Err(Error::InvalidMagic), SuperBlock::load(&dev).map(|_| ()));

        let sb = SuperBlock::new(
            8,
            512,
            4,
            ROOT_DIR_BLOCK_ID,
            TABLE_START_BLOCK_ID,
            1,
            "a volume name far longer than thirty-two bytes",
            42,
        );
        sb.store(&dev).unwrap();

        let loaded = SuperBlock::load(&dev).unwrap();
        assert_eq!(4, loaded.free_blocks);
        assert_eq!(42, loaded.last_mount_time);
        assert_eq!(31, loaded.volume_name().len());
        assert_eq!(ROOT_DIR_BLOCK_ID, loaded.root_dir());

        let mut head = [0; 512];
        assert_eq!(1, dev.read_blocks(0, &mut head));
        assert_eq!(Some(512), SuperBlock::probe(&head).map(|sb| sb.block_size));
        assert!(SuperBlock::probe(&head[..100]).is_none());
        assert!(SuperBlock::probe(&[0; 512]).is_none());
    }

    #[test]
    fn long_names_keep_whole_chars() {
        let name = "卷".repeat(11);
        let sb = SuperBlock::new(8, 512, 4, ROOT_DIR_BLOCK_ID, TABLE_START_BLOCK_ID, 1, &name, 0);
        assert_eq!("卷".repeat(10), sb.volume_name());
    }
}
