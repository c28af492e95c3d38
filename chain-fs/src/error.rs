use derive_more::Display;

/// 文件系统操作的错误，全部同步返回给调用者，内部从不重试
#[derive(Debug, Display, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /* 句柄 */
    #[display(fmt = "bad file descriptor")]
    BadDescriptor,
    #[display(fmt = "too many open files")]
    TooManyOpenFiles,

    /* 权限 */
    #[display(fmt = "descriptor not opened for reading")]
    NotReadable,
    #[display(fmt = "descriptor not opened for writing")]
    NotWritable,

    /* 路径与类型 */
    #[display(fmt = "no such file or directory")]
    NotFound,
    #[display(fmt = "not a directory")]
    NotADirectory,
    #[display(fmt = "is a directory")]
    IsADirectory,
    #[display(fmt = "directory not empty")]
    DirectoryNotEmpty,
    #[display(fmt = "file exists")]
    AlreadyExists,
    #[display(fmt = "invalid file name")]
    InvalidName,
    #[display(fmt = "invalid path")]
    InvalidPath,
    #[display(fmt = "file is open")]
    Busy,

    /* 空间耗尽 */
    #[display(fmt = "no free block left on volume")]
    NoSpace,
    #[display(fmt = "file reached its maximum block count")]
    FileTooLarge,

    /* 磁盘结构损坏 */
    #[display(fmt = "corrupted on-disk structure")]
    Corrupted,
    #[display(fmt = "not a chain-fs volume")]
    InvalidMagic,
    #[display(fmt = "freeing a block that is not in use")]
    InvalidFree,

    /* 块设备 */
    #[display(fmt = "short block transfer")]
    Device,
    #[display(fmt = "block address out of range")]
    OutOfRange,

    #[display(fmt = "invalid seek position")]
    InvalidSeek,
    #[display(fmt = "unsupported volume geometry")]
    InvalidGeometry,
}

pub type Result<T> = core::result::Result<T, Error>;

impl Error {
    /// 空间耗尽类的错误只会让写入变短，不会终止写入
    #[inline]
    pub fn is_exhaustion(self) -> bool {
        matches!(self, Self::NoSpace | Self::FileTooLarge)
    }
}

impl core::error::Error for Error {}
