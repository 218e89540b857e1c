//! 驱动层模块
//!
//! 本模块把硬件适配器的周期读取变成可被多方消费的低延迟样本流：
//! - 采集策略（固定频率 / 自适应频率 / 外部触发）
//! - 背压（攒批 / 窗口采样 / 去抖 / 淘汰最旧）
//! - 顺序处理链（校验 / 信号解析 / 窗口聚合），阶段故障隔离
//! - 热共享流：引用计数驱动采集线程的启停（零订阅者 ⇒ 零硬件轮询）
//! - 控制器边界：数据流、连接状态流、命令透传
//!
//! # 数据流
//!
//! ```text
//! HardwareAdapter ─► AcquisitionStrategy ─► hand-off ─► ShapingStage ─► ProcessorChain ─► SharedStream
//! ```

pub mod acquisition;
pub mod backpressure;
mod builder;
pub mod controller;
mod error;
pub mod metrics;
pub mod pipeline;
pub mod processor;
pub mod stream;
mod worker;

pub use acquisition::{
    AcquisitionContext, AcquisitionStrategy, AdaptiveRate, FixedRate, RatePredicate, TriggerBased,
    TriggerHandle,
};
pub use backpressure::{Backpressure, ShapingStage};
pub use builder::PipelineBuilder;
pub use controller::{Controller, StationController};
pub use error::DriverError;
pub use metrics::{MetricsSnapshot, PipelineMetrics};
pub use pipeline::{Pipeline, PipelineConfig, PipelineStats};
pub use processor::{ProcessError, ProcessorChain, ProcessorSpec, SampleProcessor};
pub use stream::{Activation, CallbackSubscription, Emitter, SharedStream, StreamCallback, StreamConfig, Subscription};
pub use worker::CancelToken;
