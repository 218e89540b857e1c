//! 测试台状态管理
//!
//! 状态机独立于采集链：采集链只查询它，不持有它。

mod machine;

pub use machine::{
    DEFAULT_EVENT_CAPACITY, DEFAULT_SOURCE, HISTORY_CAPACITY, StateChangedEvent, StationState,
    StationStateMachine,
};
