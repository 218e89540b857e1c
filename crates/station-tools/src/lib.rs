//! # Station Tools
//!
//! 与硬件无关的辅助设施：
//!
//! - `config`: 测试台 TOML 配置模型与加载期校验
//! - `shm`: 定长记录的共享内存环形缓冲区（伪通道发布的下游）

pub mod config;
mod error;
pub mod shm;

pub use config::{
    AcquisitionConfig, BackpressureConfig, ControllerConfig, ProcessorConfig, PublisherConfig,
    StationConfig,
};
pub use error::{ConfigError, ShmError};
pub use shm::{ShmRecord, ShmRing};
