//! # Station Hardware Adapter Layer
//!
//! 控制器硬件抽象层，提供统一的适配器接口。
//!
//! 原生硬件绑定只通过 [`HardwareAdapter`] 暴露给上层；
//! 采集线程在热路径上同步调用 [`HardwareAdapter::read_data`]。

use station_protocol::RawSample;
use thiserror::Error;

#[cfg(any(test, feature = "mock"))]
pub mod mock;

#[cfg(any(test, feature = "mock"))]
pub use mock::MockAdapter;

/// 适配层统一错误类型
#[derive(Error, Debug)]
pub enum AdapterError {
    #[error("IO Error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Device Error: {0}")]
    Device(String),
    #[error("Read timeout")]
    Timeout,
    #[error("Device not connected")]
    NotConnected,
    #[error("Command rejected: {0}")]
    Rejected(String),
}

impl AdapterError {
    /// 是否为瞬态读取错误（由采集策略降级为哨兵样本）
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Timeout | Self::Io(_))
    }
}

/// 连接状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ConnectionStatus {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Faulted,
}

impl ConnectionStatus {
    pub fn is_connected(self) -> bool {
        self == Self::Connected
    }
}

/// 控制模式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ControlMode {
    /// 位置闭环
    Position,
    /// 负载（力）闭环
    Load,
    /// 开环（手动）
    OpenLoop,
}

/// 液压阀状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValveState {
    Off,
    LowPressure,
    HighPressure,
}

/// 硬件适配器
///
/// 采集线程与命令调用方共享同一个适配器（`Arc<dyn HardwareAdapter>`），
/// 因此所有方法都取 `&self`，实现方自行处理内部同步。
///
/// # 热路径约定
///
/// - `read_data()` 同步返回，延迟有界
/// - 读取失败返回 `Err`，由上层决定如何降级，适配器自身负责重连
pub trait HardwareAdapter: Send + Sync {
    /// 适配器（控制器）ID
    fn id(&self) -> &str;

    fn connect(&self) -> Result<(), AdapterError>;

    fn disconnect(&self) -> Result<(), AdapterError>;

    /// 读取一次硬件数据
    fn read_data(&self) -> Result<RawSample, AdapterError>;

    /// 当前连接状态
    fn status(&self) -> ConnectionStatus;

    fn set_control_mode(&self, mode: ControlMode) -> Result<(), AdapterError>;

    fn set_valve_state(&self, state: ValveState) -> Result<(), AdapterError>;

    fn emergency_stop(&self) -> Result<(), AdapterError>;
}
