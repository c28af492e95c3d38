//! # 磁盘数据结构层
//!
//! chain-fs 的磁盘布局：
//! 超级块(#0) | 根目录块(#1) | 分配表(#2 ..) | 目录块、文件头、数据块混合分配
//!
//! 根目录块与分配表的位置是固定的，其余块都经由分配表按需分配。

mod super_block;
pub use super_block::SuperBlock;

mod alloc_table;
pub use alloc_table::{AllocState, AllocTable};

/// 目录项与目录块
mod dir_block;
pub use dir_block::{DirBlock, DirEntry, EntryKind};

mod file_header;
pub use file_header::FileHeader;
