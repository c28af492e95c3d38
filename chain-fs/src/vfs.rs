//! # 路径接口层
//!
//! 按路径操作文件系统项。相对路径都以当前目录为基准规范化，
//! 之后一律按绝对路径解析。根目录本身没有目录项。

use alloc::string::String;

use crate::block::BlockId;
use crate::dir::{ChainBlocks, DirSlot};
use crate::layout::{DirBlock, DirEntry, EntryKind};
use crate::{ChainFileSystem, Error, Path, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Stat {
    pub kind: EntryKind,
    /// 文件的字节数，目录恒为0
    pub size: u64,
    pub block_size: u64,
    /// 文件：文件头 + 数据块；目录：链上的目录块
    pub blocks: u64,
    pub create_time: u32,
    pub modify_time: u32,
    /// 文件头或目录首块
    pub start_block: Option<BlockId>,
}

impl ChainFileSystem {
    /// 按路径取得目录项
    pub fn find(&self, path: &str) -> Result<DirEntry> {
        let path = self.canonicalize(path)?;
        self.lookup(&path).map(|(_, _, entry)| entry)
    }

    /// 创建空文件，并立即为它分配文件头
    pub fn create_file(&mut self, path: &str) -> Result<DirEntry> {
        self.create(path, EntryKind::File)
    }

    pub fn mkdir(&mut self, path: &str) -> Result<()> {
        self.create(path, EntryKind::Directory).map(|_| ())
    }

    /// 删除文件或空目录，并回收它占用的全部块
    pub fn delete(&mut self, path: &str) -> Result<()> {
        let path = self.canonicalize(path)?;
        let (dir, slot, entry) = self.lookup(&path)?;
        if self.is_busy(&path) {
            return Err(Error::Busy);
        }
        self.remove(dir, slot, &entry)
    }

    /// 只删除空目录
    pub fn rmdir(&mut self, path: &str) -> Result<()> {
        let path = self.canonicalize(path)?;
        let (dir, slot, entry) = self.lookup(&path)?;
        if !entry.is_dir() {
            return Err(Error::NotADirectory);
        }
        if self.is_busy(&path) {
            return Err(Error::Busy);
        }
        self.remove(dir, slot, &entry)
    }

    /// 改名或移动。目标已存在时失败；目录不能移到自己之下。
    pub fn rename(&mut self, src: &str, dst: &str) -> Result<()> {
        let src = self.canonicalize(src)?;
        let dst = self.canonicalize(dst)?;
        let (src_dir, src_slot, mut entry) = self.lookup(&src)?;
        if src == dst {
            return Ok(());
        }
        if dst.is_within(&src) {
            return Err(Error::InvalidPath);
        }
        if self.is_busy(&src) {
            return Err(Error::Busy);
        }

        let (dst_dir, leaf) = self.resolve_path(&dst)?;
        if self.find_in_chain(dst_dir, &leaf)?.is_some() {
            return Err(Error::AlreadyExists);
        }
        entry.set_name(&leaf)?;

        // 先插入再移除：插入失败时原目录项仍在
        self.add_entry(dst_dir, entry)?;
        self.remove_entry(src_dir, src_slot.index)?;
        log::debug!("rename {src:?} to {dst:?}");
        Ok(())
    }

    pub fn stat(&self, path: &str) -> Result<Stat> {
        let path = self.canonicalize(path)?;
        let block_size = self.block_size() as u64;

        if path == "/" {
            let root = self.super_block.root_dir();
            let time = self.super_block.create_time as u32;
            return Ok(Stat {
                kind: EntryKind::Directory,
                size: 0,
                block_size,
                blocks: self.chain(root)?.len() as u64,
                create_time: time,
                modify_time: time,
                start_block: Some(root),
            });
        }

        let (_, _, entry) = self.lookup(&path)?;
        let kind = entry.kind()?;
        let blocks = match (kind, entry.start()) {
            (EntryKind::File, Some(header)) => self.load_header(header)?.data_block_count() as u64 + 1,
            (EntryKind::File, None) => 0,
            (EntryKind::Directory, Some(first)) => self.chain(first)?.len() as u64,
            (EntryKind::Directory, None) => return Err(Error::Corrupted),
        };

        Ok(Stat {
            kind,
            size: entry.size as u64,
            block_size,
            blocks,
            create_time: entry.create_time,
            modify_time: entry.modify_time,
            start_block: entry.start(),
        })
    }

    #[inline]
    pub fn is_file(&self, path: &str) -> bool {
        self.stat(path).is_ok_and(|stat| stat.kind == EntryKind::File)
    }

    #[inline]
    pub fn is_dir(&self, path: &str) -> bool {
        self.stat(path).is_ok_and(|stat| stat.kind == EntryKind::Directory)
    }

    /// 遍历目录。迭代器自带设备句柄，不借用文件系统；
    /// 遍历期间对该目录的修改是否可见是未定义的。
    pub fn read_dir(&self, path: &str) -> Result<ReadDir> {
        let path = self.canonicalize(path)?;
        let first = self.dir_block_of(&path)?;
        Ok(ReadDir {
            blocks: self.chain_blocks(first),
            current: None,
            pos: 0,
        })
    }

    #[inline]
    pub fn current_dir(&self) -> &str {
        &self.cwd
    }

    pub fn set_current_dir(&mut self, path: &str) -> Result<()> {
        let path = self.canonicalize(path)?;
        self.dir_block_of(&path)?;
        self.cwd = path;
        Ok(())
    }
}

impl ChainFileSystem {
    pub(crate) fn canonicalize(&self, path: &str) -> Result<String> {
        if path.is_empty() {
            return Err(Error::InvalidPath);
        }
        path.canonicalize(&self.cwd).ok_or(Error::InvalidPath)
    }

    /// 路径或其下有打开的文件，或者当前目录就在其中
    fn is_busy(&self, path: &str) -> bool {
        self.fds.is_busy(path) || self.cwd.is_within(path)
    }

    /// 规范路径 -> (所在目录首块, 位置, 目录项)
    fn lookup(&self, path: &str) -> Result<(BlockId, DirSlot, DirEntry)> {
        let (dir, leaf) = self.resolve_path(path)?;
        if leaf.is_empty() {
            // 根目录没有目录项
            return Err(Error::InvalidPath);
        }
        let (slot, entry) = self.find_in_chain(dir, &leaf)?.ok_or(Error::NotFound)?;
        Ok((dir, slot, entry))
    }

    /// 规范路径所指目录的首块
    fn dir_block_of(&self, path: &str) -> Result<BlockId> {
        if path == "/" {
            return Ok(self.super_block.root_dir());
        }
        let (_, _, entry) = self.lookup(path)?;
        if !entry.is_dir() {
            return Err(Error::NotADirectory);
        }
        entry.start().ok_or(Error::Corrupted)
    }

    fn create(&mut self, path: &str, kind: EntryKind) -> Result<DirEntry> {
        let path = self.canonicalize(path)?;
        let (dir, leaf) = self.resolve_path(&path)?;
        if leaf.is_empty() || self.find_in_chain(dir, &leaf)?.is_some() {
            return Err(Error::AlreadyExists);
        }
        self.create_entry(dir, &leaf, kind).map(|(_, entry)| entry)
    }

    /// 为新项分配首块（文件头或目录块），再插入目录`dir`。
    /// 调用者须确认`name`在`dir`中不存在。
    pub(crate) fn create_entry(
        &mut self,
        dir: BlockId,
        name: &str,
        kind: EntryKind,
    ) -> Result<(DirSlot, DirEntry)> {
        DirEntry::validate_name(name)?;

        let start = match kind {
            EntryKind::File => self.create_header()?.id(),
            EntryKind::Directory => {
                let id = self.alloc_block()?;
                if let Err(e) = DirBlock::empty(id, self.block_size()).store(&self.block_device) {
                    self.undo_alloc(id);
                    return Err(e);
                }
                id
            }
        };

        let entry = DirEntry::new(name, kind, Some(start), self.now())?;
        match self.add_entry(dir, entry) {
            Ok(slot) => {
                log::debug!("create {kind:?} {name:?} at block {start}");
                Ok((slot, entry))
            }
            Err(e) => {
                self.undo_alloc(start);
                Err(e)
            }
        }
    }

    fn remove(&mut self, dir: BlockId, slot: DirSlot, entry: &DirEntry) -> Result<()> {
        // 先移除目录项，再回收块，目录项永远不会指向空闲块
        if entry.is_dir() {
            let first = entry.start().ok_or(Error::Corrupted)?;
            if !self.is_dir_empty(first)? {
                return Err(Error::DirectoryNotEmpty);
            }
            let chain = self.chain(first)?;
            self.remove_entry(dir, slot.index)?;
            for (id, _) in chain {
                self.free_block(id)?;
            }
        } else {
            self.remove_entry(dir, slot.index)?;
            if let Some(header) = entry.start() {
                self.release_file(header)?;
            }
        }

        log::debug!("delete {:?}", entry.name());
        Ok(())
    }

    fn undo_alloc(&mut self, id: BlockId) {
        if let Err(e) = self.free_block(id) {
            log::warn!("leaked block {id}: {e}");
        }
    }
}

/// 目录遍历器，逐项产出目录项
pub struct ReadDir {
    blocks: ChainBlocks,
    current: Option<DirBlock>,
    pos: usize,
}

impl Iterator for ReadDir {
    type Item = Result<DirEntry>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(entry) = self.current.as_ref().and_then(|b| b.entries().get(self.pos)) {
                self.pos += 1;
                return Some(Ok(*entry));
            }
            match self.blocks.next()? {
                Ok(block) => {
                    self.current = Some(block);
                    self.pos = 0;
                }
                Err(e) => return Some(Err(e)),
            }
        }
    }
}
