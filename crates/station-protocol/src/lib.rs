//! # Station Protocol
//!
//! 测试台采集数据模型（无硬件依赖、无线程）
//!
//! ## 模块
//!
//! - `sample`: 原始样本 / 处理后样本 / 聚合统计
//! - `signal`: 信号与伪通道配置、物理通道索引规则
//! - `point`: 对外发布的数据点
//! - `timestamp`: 单调时钟
//!
//! ## 数据流
//!
//! ```text
//! Hardware read → RawSample (immutable)
//!     ↓ ProcessorChain
//! ProcessedSample (quality + derived payloads)
//!     ↓ SignalManager / PseudoChannel
//! DataPoint (one per tick, not retained)
//! ```

pub mod point;
pub mod sample;
pub mod signal;
pub mod timestamp;

pub use point::DataPoint;
pub use sample::*;
pub use signal::*;
pub use timestamp::monotonic_micros;

use thiserror::Error;

/// 协议层错误类型
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ProtocolError {
    /// 物理通道索引超出样本通道数组范围
    #[error("Channel index {index} out of range for sample (primary={primary}, secondary={secondary})")]
    ChannelOutOfRange {
        index: u32,
        primary: usize,
        secondary: usize,
    },

    /// 无效的质量标记
    #[error("Invalid quality tag: 0x{0:02X}")]
    InvalidQuality(u8),
}
