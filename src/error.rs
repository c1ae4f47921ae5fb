//! 错误类型定义
//!
//! 提供空闲簇区间缓存操作的错误类型。

use core::fmt;

/// 区间缓存操作错误
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Error {
    kind: ErrorKind,
    message: &'static str,
}

/// 错误类别
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum ErrorKind {
    /// I/O 错误（来自外部 FAT 表）
    Io,
    /// 区间超出卷的有效簇范围，或长度为 0
    InvalidRange,
    /// 无效参数
    InvalidInput,
    /// 区间重叠或树索引不一致
    ConsistencyViolation,
    /// 条目池已耗尽（可恢复）
    PoolExhausted,
    /// 请求的区间不在缓存中（可恢复）
    NotInCache,
    /// 无法从分配器获得内存
    NoMemory,
    /// 空间不足
    NoSpace,
    /// 卷上未启用缓存
    NotActivated,
    /// 卷不存在
    NotFound,
    /// 仍有卷处于挂载状态
    Busy,
    /// 无效状态
    InvalidState,
}

impl Error {
    /// 创建新错误
    pub const fn new(kind: ErrorKind, message: &'static str) -> Self {
        Self { kind, message }
    }

    /// 获取错误类型
    pub const fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// 获取错误消息
    pub const fn message(&self) -> &'static str {
        self.message
    }

    /// 是否为可恢复的缓存未命中（池耗尽或不在缓存中）
    ///
    /// 这两类错误只表示缓存无法独立完成请求，调用者应回退到 FAT 表。
    pub const fn is_cache_miss(&self) -> bool {
        matches!(self.kind, ErrorKind::PoolExhausted | ErrorKind::NotInCache)
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}: {}", self.kind, self.message)
    }
}

#[cfg(feature = "std")]
impl std::error::Error for Error {}

/// 构造一致性错误
///
/// debug 构建（非测试）下直接 panic；release 构建只记录日志并拒绝操作。
pub(crate) fn consistency_violation(message: &'static str) -> Error {
    log::error!("[FCACHE] consistency violation: {}", message);
    if cfg!(all(debug_assertions, not(test))) {
        panic!("fcache consistency violation: {}", message);
    }
    Error::new(ErrorKind::ConsistencyViolation, message)
}

/// Result 类型别名
pub type Result<T> = core::result::Result<T, Error>;
