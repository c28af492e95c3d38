use alloc::sync::Arc;
use core::fmt;
use core::mem;

use block_dev::BlockDevice;

use crate::block::{Block, BlockId, Plain};
use crate::{Error, Result};
use crate::NAME_MAX_LEN;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum EntryKind {
    File = 1,
    Directory = 2,
}

impl TryFrom<u32> for EntryKind {
    type Error = Error;

    fn try_from(raw: u32) -> Result<Self> {
        match raw {
            1 => Ok(Self::File),
            2 => Ok(Self::Directory),
            _ => Err(Error::Corrupted),
        }
    }
}

/// 目录项：文件系统项的元信息
#[derive(Clone, Copy)]
#[repr(C)]
pub struct DirEntry {
    // 最后一字节留给 \0
    name: [u8; NAME_MAX_LEN + 1],
    kind: u32,
    /// 目录：目录链的首块；文件：文件头块，`0`表示尚无文件头
    pub start_block: u32,
    /// 文件字节数
    pub size: u32,
    pub create_time: u32,
    pub modify_time: u32,
}

unsafe impl Plain for DirEntry {}

impl DirEntry {
    /// 元信息大小恒为84字节
    pub const SIZE: usize = mem::size_of::<Self>();

    pub fn new(name: &str, kind: EntryKind, start_block: Option<BlockId>, now: u32) -> Result<Self> {
        let mut entry = Self {
            name: [0; NAME_MAX_LEN + 1],
            kind: kind as u32,
            start_block: start_block.map_or(0, BlockId::raw),
            size: 0,
            create_time: now,
            modify_time: now,
        };
        entry.set_name(name)?;
        Ok(entry)
    }

    /// 名字非空、不含`/`、不是`.`或`..`，且不超过 [`NAME_MAX_LEN`] 字节
    pub fn validate_name(name: &str) -> Result<()> {
        if name.is_empty()
            || name.len() > NAME_MAX_LEN
            || name.contains('/')
            || name.contains('\0')
            || name == "."
            || name == ".."
        {
            return Err(Error::InvalidName);
        }
        Ok(())
    }

    pub fn set_name(&mut self, name: &str) -> Result<()> {
        Self::validate_name(name)?;
        self.name.fill(0);
        self.name[..name.len()].copy_from_slice(name.as_bytes());
        Ok(())
    }

    pub fn name(&self) -> &str {
        let len = self.name.iter().position(|&c| c == 0).unwrap_or(NAME_MAX_LEN);
        core::str::from_utf8(&self.name[..len]).unwrap_or_default()
    }

    #[inline]
    pub fn kind(&self) -> Result<EntryKind> {
        EntryKind::try_from(self.kind)
    }

    #[inline]
    pub fn is_dir(&self) -> bool {
        self.kind == EntryKind::Directory as u32
    }

    #[inline]
    pub fn is_file(&self) -> bool {
        self.kind == EntryKind::File as u32
    }

    #[inline]
    pub fn start(&self) -> Option<BlockId> {
        BlockId::non_null(self.start_block)
    }
}

impl fmt::Debug for DirEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DirEntry")
            .field("name", &self.name())
            .field("kind", &self.kind())
            .field("start_block", &self.start_block)
            .field("size", &self.size)
            .field("create_time", &self.create_time)
            .field("modify_time", &self.modify_time)
            .finish()
    }
}

#[repr(C)]
struct DirBlockHead {
    entry_count: u32,
    /// 链上的下一个目录块，`0`表示链尾
    next: u32,
}

unsafe impl Plain for DirBlockHead {}

/// 目录块：目录链上的一环。
///
/// 块内的目录项总是紧密排列，没有空洞。
#[derive(Debug, Clone)]
pub struct DirBlock(Block);

impl DirBlock {
    const ENTRIES_OFFSET: usize = mem::size_of::<DirBlockHead>();

    /// 一个目录块能容纳多少目录项
    #[inline]
    pub const fn capacity(block_size: usize) -> usize {
        (block_size - Self::ENTRIES_OFFSET) / DirEntry::SIZE
    }

    /// 空的链尾块
    #[inline]
    pub fn empty(id: BlockId, block_size: usize) -> Self {
        Self(Block::zeroed(id, block_size))
    }

    pub fn load(block_device: &Arc<dyn BlockDevice>, id: BlockId) -> Result<Self> {
        let dir_block = Self(Block::load(block_device, id)?);
        if dir_block.len() > dir_block.cap() {
            log::error!("directory block {id} claims {} entries", dir_block.len());
            return Err(Error::Corrupted);
        }
        Ok(dir_block)
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
    pub fn len(&self) -> usize {
        self.head().entry_count as usize
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[inline]
    pub fn is_full(&self) -> bool {
        self.len() == self.cap()
    }

    #[inline]
    pub fn next(&self) -> Option<BlockId> {
        BlockId::non_null(self.head().next)
    }

    #[inline]
    pub fn set_next(&mut self, next: BlockId) {
        self.head_mut().next = next.raw();
    }

    #[inline]
    pub fn entries(&self) -> &[DirEntry] {
        self.0.slice(Self::ENTRIES_OFFSET, self.len())
    }

    #[inline]
    pub fn entries_mut(&mut self) -> &mut [DirEntry] {
        let len = self.len();
        self.0.slice_mut(Self::ENTRIES_OFFSET, len)
    }

    /// 追加到末尾，调用者保证块未满
    pub fn push(&mut self, entry: DirEntry) {
        let len = self.len();
        assert!(len < self.cap(), "push into a full directory block");
        *self.0.get_mut(Self::ENTRIES_OFFSET + len * DirEntry::SIZE) = entry;
        self.head_mut().entry_count += 1;
    }

    /// 移除第`index`项，后续项左移一位以保持紧密排列
    pub fn remove(&mut self, index: usize) -> DirEntry {
        let entries = self.entries_mut();
        let removed = entries[index];
        entries.copy_within(index + 1.., index);
        let last = entries.len() - 1;
        // 清掉腾出的槽位，免得旧名字残留在磁盘上
        self.0.bytes_mut()[Self::ENTRIES_OFFSET + last * DirEntry::SIZE..][..DirEntry::SIZE].fill(0);
        self.head_mut().entry_count -= 1;
        removed
    }
}

impl DirBlock {
    #[inline]
    fn cap(&self) -> usize {
        Self::capacity(self.0.len())
    }

    #[inline]
    fn head(&self) -> &DirBlockHead {
        self.0.get(0)
    }

    #[inline]
    fn head_mut(&mut self) -> &mut DirBlockHead {
        self.0.get_mut(0)
    }
}

#[cfg(test)]
mod tests {
    use block_dev::RamDisk;

    use super::*;

    fn entry(name: &str) -> DirEntry {
        DirEntry::new(name, EntryKind::File, None, 0).unwrap()
    }

    #[test]
    fn sizes() {
        assert_eq!(84, DirEntry::SIZE);
        assert_eq!(6, DirBlock::capacity(512));
        assert_eq!(48, DirBlock::capacity(4096));
    }

    #[test]
    fn names() {
        assert_eq!(Err(Error::InvalidName), DirEntry::validate_name(""));
        assert_eq!(Err(Error::InvalidName), DirEntry::validate_name("a/b"));
        assert_eq!(Err(Error::InvalidName), DirEntry::validate_name(".."));
        assert!(DirEntry::validate_name(&"x".repeat(NAME_MAX_LEN)).is_ok());
        assert_eq!(
            Err(Error::InvalidName),
            DirEntry::validate_name(&"x".repeat(NAME_MAX_LEN + 1))
        );
    }

    #[test]
    fn push_and_remove_keep_entries_contiguous() {
        let mut block = DirBlock::empty(BlockId::new(9), 512);
        for name in ["a", "b", "c"] {
            block.push(entry(name));
        }
        assert_eq!("b", block.remove(1).name());

        let names: Vec<_> = block.entries().iter().map(DirEntry::name).collect();
        assert_eq!(["a", "c"], names.as_slice());
        assert_eq!(None, block.next());

        block.set_next(BlockId::new(12));
        assert_eq!(Some(BlockId::new(12)), block.next());
    }

    #[test]
    fn entry_count_is_checked() {
        let disk = Arc::new(RamDisk::new(8, 512));
        let dev: Arc<dyn BlockDevice> = disk.clone();
        let mut block = DirBlock::empty(BlockId::new(3), 512);
        block.push(entry("a"));
        block.store(&dev).unwrap();
        assert_eq!(1, DirBlock::load(&dev, BlockId::new(3)).unwrap().len());

        disk.patch(3 * 512, &7u32.to_ne_bytes());
        assert_eq!(
            Err(Error::Corrupted),
            DirBlock::load(&dev, BlockId::new(3)).map(|_| ())
        );
    }
}
