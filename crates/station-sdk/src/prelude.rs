//! Prelude - 常用类型的便捷导入
//!
//! ```rust
//! use station_sdk::prelude::*;
//! ```

// 客户端层（推荐使用）
pub use station_client::{
    ControllerRegistry, PseudoChannelManager, SignalManager, StateChangedEvent, Station,
    StationBuilder, StationState, StationStateMachine,
};

// 驱动层
pub use station_driver::{
    AcquisitionStrategy, AdaptiveRate, Backpressure, Controller, FixedRate, Pipeline, ProcessorSpec,
    SharedStream, StationController, Subscription, TriggerBased,
};

// 硬件层（常用 Trait）
pub use station_hal::{ConnectionStatus, HardwareAdapter};

// 数据模型
pub use station_protocol::{DataPoint, ProcessedSample, Quality, RawSample, SignalConfiguration};

// 配置
pub use station_tools::StationConfig;

// 错误类型
pub use station_client::ClientError;
pub use station_driver::DriverError;
pub use station_hal::AdapterError;
pub use station_tools::ConfigError;
