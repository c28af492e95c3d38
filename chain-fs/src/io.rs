//! # 文件描述符层
//!
//! 打开文件表是一个定长的槽位数组，[`Fd`] 就是槽位下标。
//! 描述符缓存了文件大小与文件头位置，关闭时才写回目录项；
//! 另外缓存最近访问的一个数据块，写操作直达设备，缓存只省去重复的读。

use alloc::string::String;
use alloc::vec::Vec;

use derive_more::{Display, From, Into};
use enumflags2::{BitFlags, bitflags};

use crate::block::{Block, BlockId};
use crate::layout::EntryKind;
use crate::{ChainFileSystem, Error, MAX_OPEN_FILES, Path, Result};

/// 文件描述符
#[derive(Debug, Display, Clone, Copy, PartialEq, Eq, Hash, From, Into)]
#[display(fmt = "fd#{}", _0)]
pub struct Fd(usize);

#[rustfmt::skip]
#[allow(clippy::upper_case_acronyms)]
#[bitflags]
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenFlag {
    /// 只写
    WRONLY = 0b0000_0000_0001,
    /// 读写兼备
    RDWR   = 0b0000_0000_0010,
    /// 文件不存在时创建
    CREATE = 0b0010_0000_0000,
    /// 先清空文件，再交给用户
    TRUNC  = 0b0100_0000_0000,
    /// 打开时游标置于文件末尾
    APPEND = 0b1000_0000_0000,
}

impl OpenFlag {
    // enumflags2拒绝值为0的标志
    /// 只读
    pub const RDONLY: u32 = 0b0000_0000_0000;

    #[inline]
    pub fn read_only() -> BitFlags<OpenFlag> {
        BitFlags::from_bits_truncate(Self::RDONLY)
    }
}

/// 定位基准
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Whence {
    Set,
    Cur,
    End,
}

#[derive(Debug)]
pub(crate) struct FileDescriptor {
    /// 规范化的绝对路径，关闭时据此找回目录项
    pub(crate) path: String,
    cursor: u64,
    size: u64,
    header: Option<BlockId>,
    readable: bool,
    writable: bool,
    last_access: u32,
    cache: Option<Block>,
}

impl FileDescriptor {
    fn new(path: String, size: u64, header: Option<BlockId>, flags: BitFlags<OpenFlag>, now: u32) -> Self {
        let [readable, writable] = if flags.contains(OpenFlag::RDWR) {
            [true, true]
        } else if flags.contains(OpenFlag::WRONLY) {
            [false, true]
        } else {
            [true, false]
        };

        Self {
            path,
            cursor: 0,
            size,
            header,
            readable,
            writable,
            last_access: now,
            cache: None,
        }
    }
}

#[derive(Debug)]
pub(crate) struct FdTable {
    slots: [Option<FileDescriptor>; MAX_OPEN_FILES],
}

impl FdTable {
    pub(crate) fn new() -> Self {
        Self {
            slots: [const { None }; MAX_OPEN_FILES],
        }
    }

    fn insert(&mut self, fd: FileDescriptor) -> Result<Fd> {
        let index = self
            .slots
            .iter()
            .position(Option::is_none)
            .ok_or(Error::TooManyOpenFiles)?;
        self.slots[index] = Some(fd);
        Ok(Fd(index))
    }

    #[inline]
    fn is_full(&self) -> bool {
        self.slots.iter().all(Option::is_some)
    }

    fn get(&self, fd: Fd) -> Result<&FileDescriptor> {
        self.slots
            .get(fd.0)
            .and_then(Option::as_ref)
            .ok_or(Error::BadDescriptor)
    }

    fn get_mut(&mut self, fd: Fd) -> Result<&mut FileDescriptor> {
        self.slots
            .get_mut(fd.0)
            .and_then(Option::as_mut)
            .ok_or(Error::BadDescriptor)
    }

    fn take(&mut self, fd: Fd) -> Result<FileDescriptor> {
        self.slots
            .get_mut(fd.0)
            .and_then(Option::take)
            .ok_or(Error::BadDescriptor)
    }

    pub(crate) fn open_fds(&self) -> Vec<Fd> {
        self.iter().map(|(fd, _)| fd).collect()
    }

    /// 是否有打开的文件位于`path`或其下
    pub(crate) fn is_busy(&self, path: &str) -> bool {
        self.iter().any(|(_, desc)| desc.path.is_within(path))
    }

    /// 丢弃除`except`外所有描述符中对块`id`的缓存
    pub(crate) fn invalidate(&mut self, id: BlockId, except: Option<Fd>) {
        for (index, desc) in self.slots.iter_mut().enumerate() {
            let Some(desc) = desc else { continue };
            if except != Some(Fd(index)) && desc.cache.as_ref().is_some_and(|b| b.id() == id) {
                desc.cache = None;
            }
        }
    }

    /// 同一文件上尚无文件头的其它描述符，一并认领新分配的文件头
    fn adopt_header(&mut self, path: &str, header: BlockId) {
        for desc in self.slots.iter_mut().flatten() {
            if desc.path == path && desc.header.is_none() {
                desc.header = Some(header);
            }
        }
    }

    fn iter(&self) -> impl Iterator<Item = (Fd, &FileDescriptor)> {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(index, desc)| desc.as_ref().map(|desc| (Fd(index), desc)))
    }
}

impl ChainFileSystem {
    /// 打开文件。
    ///
    /// 不带 [`OpenFlag::CREATE`] 时文件必须已存在；
    /// [`OpenFlag::TRUNC`] 立即回收文件的全部块并改写目录项；
    /// [`OpenFlag::APPEND`] 把游标置于文件末尾。
    pub fn open(&mut self, path: &str, flags: BitFlags<OpenFlag>) -> Result<Fd> {
        let path = self.canonicalize(path)?;
        if self.fds.is_full() {
            return Err(Error::TooManyOpenFiles);
        }

        let (dir, leaf) = self.resolve_path(&path)?;
        if leaf.is_empty() {
            return Err(Error::IsADirectory);
        }
        let (slot, mut entry) = match self.find_in_chain(dir, &leaf)? {
            Some(found) => found,
            None if flags.contains(OpenFlag::CREATE) => {
                self.create_entry(dir, &leaf, EntryKind::File)?
            }
            None => return Err(Error::NotFound),
        };
        if entry.is_dir() {
            return Err(Error::IsADirectory);
        }

        let now = self.now();
        if flags.contains(OpenFlag::TRUNC) {
            if self.fds.is_busy(&path) {
                return Err(Error::Busy);
            }
            if let Some(header) = entry.start() {
                self.release_file(header)?;
            }
            entry.start_block = 0;
            entry.size = 0;
            entry.modify_time = now;
            self.update_entry(slot, &entry)?;
        }

        let mut desc = FileDescriptor::new(path, entry.size as u64, entry.start(), flags, now);
        if flags.contains(OpenFlag::APPEND) {
            desc.cursor = desc.size;
        }

        let fd = self.fds.insert(desc)?;
        log::debug!("open {leaf:?} as {fd} ({flags:?})");
        Ok(fd)
    }

    /// 移动游标，返回新位置。游标可以越过文件末尾，但不能为负。
    pub fn seek(&mut self, fd: Fd, offset: i64, whence: Whence) -> Result<u64> {
        let desc = self.fds.get_mut(fd)?;
        let base = match whence {
            Whence::Set => 0,
            Whence::Cur => desc.cursor,
            Whence::End => desc.size,
        };
        let pos = u64::try_from(i128::from(base) + i128::from(offset)).map_err(|_| Error::InvalidSeek)?;
        desc.cursor = pos;
        Ok(pos)
    }

    #[inline]
    pub fn tell(&self, fd: Fd) -> Result<u64> {
        self.fds.get(fd).map(|desc| desc.cursor)
    }

    /// 最近一次读写的时间
    #[inline]
    pub fn last_access(&self, fd: Fd) -> Result<u32> {
        self.fds.get(fd).map(|desc| desc.last_access)
    }

    /// 描述符所见的文件大小
    #[inline]
    pub fn file_size(&self, fd: Fd) -> Result<u64> {
        self.fds.get(fd).map(|desc| desc.size)
    }

    /// 从游标处读出至多`buf.len()`字节，返回实际读出的字节数；到达文件末尾时返回0。
    pub fn read(&mut self, fd: Fd, buf: &mut [u8]) -> Result<usize> {
        let block_size = self.block_size() as u64;
        let now = self.now();

        let desc = self.fds.get(fd)?;
        if !desc.readable {
            return Err(Error::NotReadable);
        }
        if desc.cursor >= desc.size || buf.is_empty() {
            return Ok(0);
        }
        let len = (desc.size - desc.cursor).min(buf.len() as u64) as usize;
        let Some(header) = desc.header else {
            log::error!("{:?} has {} bytes but no file header", desc.path, desc.size);
            return Err(Error::Corrupted);
        };
        let header = self.load_header(header)?;

        let mut read = 0;
        let mut failure = None;
        while read < len {
            let desc = self.fds.get_mut(fd)?;
            let index = (desc.cursor / block_size) as usize;
            let offset = (desc.cursor % block_size) as usize;
            let chunk = (block_size as usize - offset).min(len - read);

            let Some(id) = header.block_id(index) else {
                log::error!("{:?} runs out of data blocks at index {index}", desc.path);
                failure = Some(Error::Corrupted);
                break;
            };
            let block = match desc.cache.take() {
                Some(block) if block.id() == id => block,
                _ => match Block::load(&self.block_device, id) {
                    Ok(block) => block,
                    Err(e) => {
                        failure = Some(e);
                        break;
                    }
                },
            };

            buf[read..read + chunk].copy_from_slice(&block.bytes()[offset..offset + chunk]);
            desc.cache = Some(block);
            desc.cursor += chunk as u64;
            read += chunk;
        }

        self.fds.get_mut(fd)?.last_access = now;
        transferred(read, failure)
    }

    /// 从游标处写入`buf`，返回实际写入的字节数。
    ///
    /// 文件长到最大块数或卷上没有空闲块时提前停下，返回的字节数少于`buf.len()`。
    pub fn write(&mut self, fd: Fd, buf: &[u8]) -> Result<usize> {
        let block_size = self.block_size();
        let now = self.now();

        let desc = self.fds.get(fd)?;
        if !desc.writable {
            return Err(Error::NotWritable);
        }
        if buf.is_empty() {
            return Ok(0);
        }

        let header_id = desc.header;
        let mut header = match header_id {
            Some(id) => self.load_header(id)?,
            None => {
                let header = self.create_header()?;
                let path = self.fds.get(fd)?.path.clone();
                self.fds.adopt_header(&path, header.id());
                self.store_entry(fd)?;
                header
            }
        };

        let mut written = 0;
        let mut failure = None;
        while written < buf.len() {
            let cursor = self.fds.get(fd)?.cursor;
            let index = (cursor / block_size as u64) as usize;
            let offset = (cursor % block_size as u64) as usize;
            let chunk = (block_size - offset).min(buf.len() - written);

            let (id, fresh) = match self.data_block(&mut header, index) {
                Ok(found) => found,
                Err(e) if e.is_exhaustion() => {
                    log::debug!("write stops at byte {cursor}: {e}");
                    break;
                }
                Err(e) => {
                    failure = Some(e);
                    break;
                }
            };

            let desc = self.fds.get_mut(fd)?;
            let mut block = match desc.cache.take() {
                Some(block) if block.id() == id => block,
                _ if fresh || chunk == block_size => Block::zeroed(id, block_size),
                _ => match Block::load(&self.block_device, id) {
                    Ok(block) => block,
                    Err(e) => {
                        failure = Some(e);
                        break;
                    }
                },
            };

            block.bytes_mut()[offset..offset + chunk].copy_from_slice(&buf[written..written + chunk]);
            if let Err(e) = block.store(&self.block_device) {
                failure = Some(e);
                break;
            }
            desc.cache = Some(block);
            desc.cursor += chunk as u64;
            desc.size = desc.size.max(desc.cursor);
            written += chunk;
            self.fds.invalidate(id, Some(fd));
        }

        let desc = self.fds.get_mut(fd)?;
        desc.last_access = now;
        header.set_file_size(desc.size);
        if let Err(e) = header.store(&self.block_device) {
            failure = failure.or(Some(e));
        }

        transferred(written, failure)
    }

    /// 把描述符缓存的大小与文件头写回目录项，然后释放槽位
    /// 目录项写回失败时槽位照样释放，错误仍会报告给调用者。
    pub fn close(&mut self, fd: Fd) -> Result<()> {
        let stored = self.store_entry(fd);
        let desc = self.fds.take(fd)?;
        log::debug!("close {fd} ({:?})", desc.path);
        stored
    }

    /// 按描述符记下的路径重新找到目录项，写入大小、文件头与修改时间
    fn store_entry(&mut self, fd: Fd) -> Result<()> {
        let desc = self.fds.get(fd)?;
        let (size, header) = (desc.size, desc.header);
        let (dir, leaf) = self.resolve_path(&desc.path)?;

        let Some((slot, mut entry)) = self.find_in_chain(dir, &leaf)? else {
            log::warn!("{:?} vanished while open", self.fds.get(fd)?.path);
            return Err(Error::NotFound);
        };
        entry.size = size as u32;
        entry.start_block = header.map_or(0, BlockId::raw);
        entry.modify_time = self.now();
        self.update_entry(slot, &entry)
    }
}

/// 已经搬运了部分字节时，错误只截断结果；一个字节都没搬运时才报告错误
fn transferred(bytes: usize, failure: Option<Error>) -> Result<usize> {
    match failure {
        Some(e) if bytes == 0 => Err(e),
        Some(e) => {
            log::warn!("transfer cut short after {bytes} bytes: {e}");
            Ok(bytes)
        }
        None => Ok(bytes),
    }
}
