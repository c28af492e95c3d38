#[cfg(test)]
mod tests;

use std::cell::RefCell;
use std::fs::{File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::Path;

use block_dev::BlockDevice;
use chain_fs::{MAX_BLOCK_SIZE, MIN_BLOCK_SIZE, SuperBlock};
use send_wrapper::SendWrapper;

/// 以宿主机上的镜像文件充当块设备
#[derive(Debug)]
pub struct BlockFile {
    inner: SendWrapper<RefCell<File>>,
    block_size: usize,
    total_blocks: usize,
}

impl BlockFile {
    /// 新建（或清空）镜像，长度定为`total_blocks * block_size`
    pub fn create(path: &Path, total_blocks: usize, block_size: usize) -> io::Result<Self> {
        let fd = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)?;
        fd.set_len((total_blocks * block_size) as u64)?;

        Ok(Self::new(fd, total_blocks, block_size))
    }

    /// 打开已有的镜像：块大小取自超级块，块数取自文件长度
    pub fn open(path: &Path) -> io::Result<Self> {
        let mut fd = OpenOptions::new().read(true).write(true).open(path)?;

        let mut head = [0; MIN_BLOCK_SIZE];
        fd.read_exact(&mut head)?;
        let super_block = SuperBlock::probe(&head).ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::InvalidData,
                format!("{} is not a chain-fs image", path.display()),
            )
        })?;

        let block_size = super_block.block_size as usize;
        if !block_size.is_power_of_two() || !(MIN_BLOCK_SIZE..=MAX_BLOCK_SIZE).contains(&block_size) {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("{}: unsupported block size {block_size}", path.display()),
            ));
        }
        let total_blocks = (fd.metadata()?.len() / block_size as u64) as usize;

        Ok(Self::new(fd, total_blocks, block_size))
    }

    fn new(fd: File, total_blocks: usize, block_size: usize) -> Self {
        Self {
            inner: SendWrapper::new(RefCell::new(fd)),
            block_size,
            total_blocks,
        }
    }

    /// 把请求换算为块数；越界或不是整块时返回空
    fn blocks_of(&self, start: usize, len: usize) -> Option<usize> {
        let count = (len % self.block_size == 0).then_some(len / self.block_size)?;
        (!self.out_of_range(start, count)).then_some(count)
    }
}

impl BlockDevice for BlockFile {
    #[inline]
    fn block_size(&self) -> usize {
        self.block_size
    }

    #[inline]
    fn total_blocks(&self) -> usize {
        self.total_blocks
    }

    fn read_blocks(&self, start: usize, buf: &mut [u8]) -> usize {
        let Some(count) = self.blocks_of(start, buf.len()) else {
            return 0;
        };

        let mut file = self.inner.borrow_mut();
        let result = file
            .seek(SeekFrom::Start((start * self.block_size) as u64))
            .and_then(|_| file.read_exact(buf));
        match result {
            Ok(()) => count,
            Err(e) => {
                log::error!("reading block {start} of the image: {e}");
                0
            }
        }
    }

    fn write_blocks(&self, start: usize, buf: &[u8]) -> usize {
        let Some(count) = self.blocks_of(start, buf.len()) else {
            return 0;
        };

        let mut file = self.inner.borrow_mut();
        let result = file
            .seek(SeekFrom::Start((start * self.block_size) as u64))
            .and_then(|_| file.write_all(buf));
        match result {
            Ok(()) => count,
            Err(e) => {
                log::error!("writing block {start} of the image: {e}");
                0
            }
        }
    }
}
