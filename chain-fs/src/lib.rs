#![cfg_attr(not(test), no_std)]

extern crate alloc;

/* chain-fs 的整体架构，自上而下 */

// 路径接口层：按路径创建、删除、改名、遍历目录
mod vfs;
pub use vfs::{ReadDir, Stat};

// 文件描述符层：打开文件表与按字节读写
mod io;
pub use io::{Fd, OpenFlag, Whence};

// 文件存储层：文件头与数据块
mod file;

// 目录层：目录链与路径解析
mod dir;
pub use dir::DirSlot;

// 块管理器层：格式化、挂载与块分配
mod cfs;
pub use cfs::{ChainFileSystem, FormatOptions};

// 磁盘数据结构层：表示磁盘文件系统的数据结构
mod layout;
pub use layout::{AllocState, DirEntry, EntryKind, SuperBlock};

// 块缓冲层：内存上的磁盘块副本
mod block;
pub use block::BlockId;

mod error;
pub use error::{Error, Result};

mod path;
pub use path::Path;

mod time;
pub use time::Clock;

pub use block_dev::BlockDevice;

/// "CFS1"
pub const MAGIC: u32 = 0x4346_5331;
pub const VERSION: u32 = 1;
pub const FILE_HEADER_MAGIC: u32 = 0xC5C4_F11E;

pub const MIN_BLOCK_SIZE: usize = 512;
/// 再大的话，文件大小就放不进目录项的`u32`了
pub const MAX_BLOCK_SIZE: usize = 64 * 1024;

/// 打开文件表的槽位数
pub const MAX_OPEN_FILES: usize = 20;
pub const NAME_MAX_LEN: usize = 63;

pub const SUPER_BLOCK_ID: BlockId = BlockId::new(0);
pub const ROOT_DIR_BLOCK_ID: BlockId = BlockId::new(1);
pub const TABLE_START_BLOCK_ID: BlockId = BlockId::new(2);
