//! 测试台生命周期状态机
//!
//! 运行期白名单状态机：所有读写都经过同一把互斥锁，
//! 转换的检查与提交是一个原子单元（急停、故障语义不允许先查后改的竞态）。

use crossbeam_channel::{Receiver, Sender, TrySendError, bounded};
use parking_lot::Mutex;
use station_protocol::monotonic_micros;
use std::collections::VecDeque;
use std::fmt;
use tracing::{info, warn};

/// 历史事件保留条数
pub const HISTORY_CAPACITY: usize = 64;

/// 订阅者事件队列容量
pub const DEFAULT_EVENT_CAPACITY: usize = 64;

/// 未指定来源时事件的 `source`
pub const DEFAULT_SOURCE: &str = "station";

/// 测试台状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum StationState {
    /// 未连接（初始状态）
    #[default]
    Offline,
    Connecting,
    /// 已连接，尚未就绪
    Online,
    /// 可以开始试验
    Ready,
    Running,
    Paused,
    /// 故障，需要恢复
    Faulted,
    /// 急停
    EStop,
    Recovering,
}

use StationState::*;

impl StationState {
    /// 全部状态（声明顺序）
    pub const ALL: [StationState; 9] = [
        Offline, Connecting, Online, Ready, Running, Paused, Faulted, EStop, Recovering,
    ];

    /// 从当前状态允许到达的目标状态（白名单）
    pub fn allowed_targets(self) -> &'static [StationState] {
        match self {
            Offline => &[Connecting],
            Connecting => &[Online, Offline, Faulted],
            Online => &[Ready, Offline, Faulted],
            Ready => &[Running, Offline, Faulted, EStop],
            Running => &[Ready, Paused, Faulted, EStop],
            Paused => &[Running, Ready, Faulted, EStop],
            Faulted => &[Recovering, Offline],
            EStop => &[Recovering, Offline],
            Recovering => &[Ready, Faulted, Offline],
        }
    }

    pub fn can_transition_to(self, target: StationState) -> bool {
        self.allowed_targets().contains(&target)
    }

    /// Ready / Running / Paused
    pub fn is_operational(self) -> bool {
        matches!(self, Ready | Running | Paused)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Offline => "Offline",
            Connecting => "Connecting",
            Online => "Online",
            Ready => "Ready",
            Running => "Running",
            Paused => "Paused",
            Faulted => "Faulted",
            EStop => "EStop",
            Recovering => "Recovering",
        }
    }
}

impl fmt::Display for StationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 状态变更事件
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateChangedEvent {
    pub previous: StationState,
    pub current: StationState,
    pub reason: String,
    /// 发起方（如 "operator"、"controller:ctrl-1"）
    pub source: String,
    /// 单调时钟时间戳（微秒）
    pub timestamp: i64,
}

struct MachineInner {
    state: StationState,
    subscribers: Vec<Sender<StateChangedEvent>>,
    history: VecDeque<StateChangedEvent>,
}

/// 测试台状态机
///
/// 初始状态为 [`StationState::Offline`]，没有终止状态。
pub struct StationStateMachine {
    inner: Mutex<MachineInner>,
}

impl Default for StationStateMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for StationStateMachine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StationStateMachine")
            .field("state", &self.state())
            .finish()
    }
}

impl StationStateMachine {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(MachineInner {
                state: Offline,
                subscribers: Vec::new(),
                history: VecDeque::with_capacity(HISTORY_CAPACITY),
            }),
        }
    }

    /// 当前状态
    pub fn state(&self) -> StationState {
        self.inner.lock().state
    }

    pub fn is_operational(&self) -> bool {
        self.state().is_operational()
    }

    /// 当前状态下允许的目标状态
    pub fn allowed_targets(&self) -> &'static [StationState] {
        self.state().allowed_targets()
    }

    pub fn can_transition(&self, target: StationState) -> bool {
        self.state().can_transition_to(target)
    }

    /// 尝试转换（来源为 [`DEFAULT_SOURCE`]）
    pub fn try_transition(&self, target: StationState, reason: &str) -> bool {
        self.try_transition_from(target, reason, DEFAULT_SOURCE)
    }

    /// 尝试转换
    ///
    /// 目标不在白名单内时返回 `false` 且状态不变；否则提交、
    /// 向订阅者发出一个变更事件并返回 `true`。
    pub fn try_transition_from(&self, target: StationState, reason: &str, source: &str) -> bool {
        let mut inner = self.inner.lock();
        let previous = inner.state;

        if !previous.can_transition_to(target) {
            warn!(
                from = %previous,
                to = %target,
                source,
                "state transition rejected: {}",
                reason
            );
            return false;
        }

        inner.state = target;
        let event = StateChangedEvent {
            previous,
            current: target,
            reason: reason.to_string(),
            source: source.to_string(),
            timestamp: monotonic_micros(),
        };

        if inner.history.len() == HISTORY_CAPACITY {
            inner.history.pop_front();
        }
        inner.history.push_back(event.clone());

        // 锁内发送保证所有订阅者看到相同的事件顺序；队列满的订阅者丢失该事件
        inner.subscribers.retain(|tx| match tx.try_send(event.clone()) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                warn!(to = %target, "state event subscriber lagging, event dropped");
                true
            },
            Err(TrySendError::Disconnected(_)) => false,
        });

        info!(from = %previous, to = %target, source, "station state: {}", reason);
        true
    }

    /// 急停（等价于 `try_transition(EStop, reason)`）
    pub fn emergency_stop(&self, reason: &str) -> bool {
        self.try_transition(EStop, reason)
    }

    /// 订阅状态变更事件
    ///
    /// 接收端 drop 后，下一次转换时自动清理。
    pub fn subscribe(&self) -> Receiver<StateChangedEvent> {
        let (tx, rx) = bounded(DEFAULT_EVENT_CAPACITY);
        self.inner.lock().subscribers.push(tx);
        rx
    }

    /// 最近的变更事件（由旧到新，至多 [`HISTORY_CAPACITY`] 条）
    pub fn history(&self) -> Vec<StateChangedEvent> {
        self.inner.lock().history.iter().cloned().collect()
    }
}
