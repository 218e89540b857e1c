//! 驱动层错误类型定义

use station_hal::AdapterError;
use thiserror::Error;

/// 驱动层错误类型
///
/// 只有构建期 / 调用期的配置错误会返回给调用方；
/// 逐样本的错误（读取失败、数据质量、处理阶段故障）在流内部吸收。
#[derive(Error, Debug)]
pub enum DriverError {
    /// 适配器错误（连接 / 命令）
    #[error("Adapter error: {0}")]
    Adapter(#[from] AdapterError),

    /// 非法参数（非正的速率 / 窗口 / 容量，`min > max` 等）
    #[error("Invalid parameter `{name}`: {value}")]
    InvalidParameter { name: &'static str, value: String },

    /// 构建 Pipeline 时未指定硬件适配器
    #[error("Pipeline requires a hardware adapter")]
    MissingAdapter,

    /// 构建 Pipeline 时未指定采集策略
    #[error("Pipeline requires an acquisition strategy")]
    MissingStrategy,

    /// 工作线程错误
    #[error("Worker thread error: {0}")]
    Worker(String),

    /// 操作超时
    #[error("Operation timeout")]
    Timeout,
}

impl DriverError {
    pub(crate) fn invalid(name: &'static str, value: impl std::fmt::Display) -> Self {
        Self::InvalidParameter {
            name,
            value: value.to_string(),
        }
    }
}

/// 校验参数严格为正且有限
pub(crate) fn ensure_positive(name: &'static str, value: f64) -> Result<f64, DriverError> {
    if value.is_finite() && value > 0.0 {
        Ok(value)
    } else {
        Err(DriverError::invalid(name, value))
    }
}
