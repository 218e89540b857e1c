//! 工具层错误类型

use std::io;
use thiserror::Error;

/// 配置加载 / 校验错误
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("TOML parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("TOML serialize error: {0}")]
    Serialize(#[from] toml::ser::Error),

    /// 语义校验失败（引用不存在、参数非正、单位不兼容等）
    #[error("Invalid configuration: {0}")]
    Validation(String),
}

impl ConfigError {
    pub(crate) fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }
}

/// 共享内存环形缓冲区错误
#[derive(Error, Debug)]
pub enum ShmError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// 文件头魔数不匹配（不是环形缓冲区文件，或布局版本不同）
    #[error("Bad ring buffer magic: 0x{0:016X}")]
    BadMagic(u64),

    #[error("Invalid ring buffer capacity: {0}")]
    InvalidCapacity(u64),

    /// 文件长度与头部声明的容量不一致
    #[error("Ring buffer file truncated: expected {expected} bytes, found {actual}")]
    Truncated { expected: u64, actual: u64 },

    /// 记录大小与当前布局不一致
    #[error("Unsupported record size: {0}")]
    RecordSize(u32),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = ConfigError::validation("duplicate signal id `LOAD`");
        assert_eq!(format!("{}", err), "Invalid configuration: duplicate signal id `LOAD`");

        let err = ShmError::BadMagic(0xDEAD);
        assert_eq!(format!("{}", err), "Bad ring buffer magic: 0x000000000000DEAD");

        let err = ShmError::Truncated {
            expected: 128,
            actual: 64,
        };
        assert!(format!("{}", err).contains("expected 128"));
    }

    #[test]
    fn test_io_conversion() {
        let io_err = io::Error::new(io::ErrorKind::NotFound, "missing");
        let err: ConfigError = io_err.into();
        assert!(matches!(err, ConfigError::Io(_)));
    }
}
