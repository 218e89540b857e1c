//! 客户端层
//!
//! 本模块在驱动层之上组合出完整的测试台：
//! - [`ControllerRegistry`]：多控制器注册与最新值联合
//! - [`SignalManager`]：逻辑信号 → 物理通道，每个信号一条缓存的共享流
//! - [`PseudoChannelManager`]：由信号组合出的虚拟通道
//! - [`StationStateMachine`]：白名单生命周期状态机
//! - [`ShmPublisher`]：伪通道输出到共享内存环形缓冲区
//! - [`StationBuilder`]：从配置文件构建上述全部组件
//!
//! # 数据流
//!
//! ```text
//! Controller ─► ControllerRegistry ─► SignalManager ─► PseudoChannel ─► ShmPublisher
//!                                                         ▲
//!                            StationStateMachine（查询，不参与数据流）
//! ```

pub mod builder;
mod error;
pub mod pseudo;
pub mod publisher;
pub mod registry;
pub mod signal;
pub mod state;

pub use builder::{Station, StationBuilder};
pub use error::ClientError;
pub use pseudo::{PseudoChannel, PseudoChannelManager, combine_points};
pub use publisher::ShmPublisher;
pub use registry::ControllerRegistry;
pub use signal::SignalManager;
pub use state::{StateChangedEvent, StationState, StationStateMachine};
