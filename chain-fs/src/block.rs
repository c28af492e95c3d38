//! # 块缓冲层
//!
//! 所有磁盘结构都按块对齐。[`Block`] 是内存中一个块的副本，
//! 读写都是同步直达块设备的，不做延迟写回：
//! 每次修改磁盘结构后都要立刻 [`Block::store`]。
//!
//! 块大小在挂载时才知道，因此缓冲区是动态分配的；
//! 用`u64`数组作底层存储，保证按`u64`对齐，
//! 这样才能把块内某个偏移处的字节直接视作磁盘结构。

use alloc::boxed::Box;
use alloc::sync::Arc;
use alloc::vec;
use core::mem;
use core::slice;

use block_dev::BlockDevice;
use derive_more::{Add, Display, From, Into};

use crate::{Error, Result};

/// 逻辑块地址
#[derive(Debug, Display, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Add, From, Into)]
#[repr(transparent)]
pub struct BlockId(u32);

impl core::ops::Add<u32> for BlockId {
    type Output = Self;

    fn add(self, rhs: u32) -> Self::Output {
        self + Self(rhs)
    }
}

impl From<BlockId> for usize {
    #[inline]
    fn from(id: BlockId) -> Self {
        id.0 as usize
    }
}

impl BlockId {
    #[inline]
    pub const fn new(raw: u32) -> Self {
        Self(raw)
    }

    /// 磁盘上用`0`表示“没有块”（链表尾、尚无文件头）
    #[inline]
    pub const fn non_null(raw: u32) -> Option<Self> {
        if raw == 0 { None } else { Some(Self(raw)) }
    }

    #[inline]
    pub const fn raw(self) -> u32 {
        self.0
    }
}

/// 可以从任意字节直接解释出来的磁盘结构。
///
/// # Safety
///
/// 实现者必须是`#[repr(C)]`的纯数据类型：任意位模式都合法，且不含指针与引用。
pub unsafe trait Plain: Sized {}

unsafe impl Plain for u8 {}
unsafe impl Plain for u32 {}
unsafe impl Plain for u64 {}

/// 内存中的块
#[derive(Debug, Clone)]
pub struct Block {
    id: BlockId,
    data: Box<[u64]>,
}

impl Block {
    /// 全零的块，还没有和设备同步过
    pub fn zeroed(id: BlockId, block_size: usize) -> Self {
        debug_assert_eq!(0, block_size % mem::size_of::<u64>());
        Self {
            id,
            data: vec![0; block_size / mem::size_of::<u64>()].into_boxed_slice(),
        }
    }

    /// 从设备读入一个块；短传输即错误
    pub fn load(block_device: &Arc<dyn BlockDevice>, id: BlockId) -> Result<Self> {
        let mut block = Self::zeroed(id, block_device.block_size());
        if block_device.read_blocks(id.into(), block.bytes_mut()) != 1 {
            log::error!("short read at block {id}");
            return Err(Error::Device);
        }
        log::trace!("read block {id}");
        Ok(block)
    }

    /// 把块写回设备；短传输即错误
    pub fn store(&self, block_device: &Arc<dyn BlockDevice>) -> Result<()> {
        if block_device.write_blocks(self.id.into(), self.bytes()) != 1 {
            log::error!("short write at block {}", self.id);
            return Err(Error::Device);
        }
        log::trace!("wrote block {}", self.id);
        Ok(())
    }

    #[inline]
    pub fn id(&self) -> BlockId {
        self.id
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.data.len() * mem::size_of::<u64>()
    }

    #[inline]
    pub fn bytes(&self) -> &[u8] {
        unsafe { slice::from_raw_parts(self.data.as_ptr().cast(), self.len()) }
    }

    #[inline]
    pub fn bytes_mut(&mut self) -> &mut [u8] {
        let len = self.len();
        unsafe { slice::from_raw_parts_mut(self.data.as_mut_ptr().cast(), len) }
    }

    #[inline]
    pub fn zeroize(&mut self) {
        self.data.fill(0);
    }

    pub fn get<T: Plain>(&self, offset: usize) -> &T {
        self.check::<T>(offset, 1);
        unsafe { &*self.bytes().as_ptr().add(offset).cast() }
    }

    pub fn get_mut<T: Plain>(&mut self, offset: usize) -> &mut T {
        self.check::<T>(offset, 1);
        unsafe { &mut *self.bytes_mut().as_mut_ptr().add(offset).cast() }
    }

    /// 把`offset`起的`len`个`T`视作切片
    pub fn slice<T: Plain>(&self, offset: usize, len: usize) -> &[T] {
        self.check::<T>(offset, len);
        unsafe { slice::from_raw_parts(self.bytes().as_ptr().add(offset).cast(), len) }
    }

    pub fn slice_mut<T: Plain>(&mut self, offset: usize, len: usize) -> &mut [T] {
        self.check::<T>(offset, len);
        unsafe { slice::from_raw_parts_mut(self.bytes_mut().as_mut_ptr().add(offset).cast(), len) }
    }
}

impl Block {
    fn check<T>(&self, offset: usize, count: usize) {
        assert!(offset + mem::size_of::<T>() * count <= self.len());
        assert_eq!(0, offset % mem::align_of::<T>(), "misaligned block access");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn typed_views() {
        let mut block = Block::zeroed(BlockId::new(3), 512);
        assert_eq!(512, block.len());

        *block.get_mut::<u32>(8) = 0xDEAD_BEEF;
        block.slice_mut::<u32>(16, 2).copy_from_slice(&[1, 2]);

        assert_eq!(0xDEAD_BEEF, *block.get::<u32>(8));
        assert_eq!(&[1u32, 2], block.slice::<u32>(16, 2));
        assert_eq!(0xEF, block.bytes()[8]);

        block.zeroize();
        assert!(block.bytes().iter().all(|&b| b == 0));
    }

    #[test]
    #[should_panic]
    fn out_of_block() {
        let block = Block::zeroed(BlockId::new(0), 512);
        block.slice::<u32>(500, 4);
    }

    #[test]
    fn null_block_id() {
        assert_eq!(None, BlockId::non_null(0));
        assert_eq!(Some(BlockId::new(7)), BlockId::non_null(7));
        assert_eq!(BlockId::new(9), BlockId::new(7) + 2u32);
    }
}
