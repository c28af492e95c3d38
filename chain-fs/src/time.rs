/// 时间来源。
///
/// 文件系统本身没有墙上时钟，由使用者在格式化与挂载时注入；
/// 时间的单位由注入者决定，通常是 UNIX 秒。
pub trait Clock: Send + Sync {
    fn now(&self) -> u64;
}

impl<F> Clock for F
where
    F: Fn() -> u64 + Send + Sync,
{
    #[inline]
    fn now(&self) -> u64 {
        self()
    }
}
