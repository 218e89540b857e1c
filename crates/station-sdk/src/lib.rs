//! Station SDK - 力学试验台采集与控制 Rust SDK
//!
//! 把周期性的硬件读取变成可被多方消费的低延迟测量流，
//! 同时由监督状态机约束任一时刻允许的操作。
//!
//! # 架构设计
//!
//! 本 SDK 采用分层架构，从底层到高层：
//!
//! - **协议层** (`protocol`): 样本、信号、数据点数据模型
//! - **硬件层** (`hal`): 硬件适配器边界
//! - **驱动层** (`driver`): 采集策略、背压、处理链、热共享流、Pipeline
//! - **客户端层** (`client`): 控制器注册表、信号 / 伪通道、状态机、共享内存发布
//! - **工具层** (`tools`): 配置文件、共享内存环形缓冲区
//!
//! # 快速开始
//!
//! ```rust,no_run
//! use station_sdk::prelude::*;
//!
//! # fn main() -> Result<(), ClientError> {
//! station_sdk::init_logger();
//! let config = StationConfig::load_from_file("station.toml")?;
//! # let adapters: Vec<std::sync::Arc<dyn HardwareAdapter>> = Vec::new();
//! let station = StationBuilder::new(config).adapters(adapters).build()?;
//! station.connect()?;
//! # Ok(())
//! # }
//! ```

pub use station_client as client;
pub use station_driver as driver;
pub use station_hal as hal;
pub use station_protocol as protocol;
pub use station_tools as tools;

mod logging;
pub mod prelude;

pub use logging::init_logger;

// --- 常用类型 ---
pub use station_client::{
    ClientError, ControllerRegistry, PseudoChannel, PseudoChannelManager, SignalManager, Station,
    StationBuilder, StationState, StationStateMachine,
};
pub use station_driver::{DriverError, Pipeline, SharedStream};
pub use station_protocol::{DataPoint, ProcessedSample, ProtocolError, RawSample};
pub use station_tools::{ConfigError, StationConfig};
