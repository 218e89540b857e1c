//! 背压策略
//!
//! 采集线程与处理线程之间通过一个有界交接队列（hand-off queue）连接。
//! 队列满时淘汰最旧的**待处理**样本，保证最新数据优先送达。
//!
//! 处理线程在队列之后再应用一个可选的整形阶段（[`ShapingStage`]）：
//!
//! | 策略 | 行为 |
//! |------|------|
//! | `Batching(n)` | 攒满 n 个后按原顺序逐个发出（无丢弃） |
//! | `Sampling(interval)` | 每个窗口发出最后一个到达的样本，空窗口不发 |
//! | `Throttle(duration)` | 去抖：静默 `duration` 后才发出最新样本 |
//! | `DropOldest(capacity)` | 交接队列容量设为 `capacity`，整形阶段直通 |

use crate::error::DriverError;
use crate::metrics::PipelineMetrics;
use crossbeam_channel::{Receiver, Sender, TrySendError, bounded};
use station_protocol::RawSample;
use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::{Duration, Instant};
use tracing::trace;

/// 默认交接队列容量
pub const DEFAULT_HANDOFF_CAPACITY: usize = 1024;

/// 背压策略
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backpressure {
    /// 攒批后按原顺序重新逐个发出
    Batching { size: usize },
    /// 窗口采样（每个窗口最新一个）
    Sampling { interval: Duration },
    /// 去抖
    Throttle { duration: Duration },
    /// 有界 FIFO，溢出时淘汰最旧的待处理样本
    DropOldest { capacity: usize },
}

impl Backpressure {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Batching { .. } => "batching",
            Self::Sampling { .. } => "sampling",
            Self::Throttle { .. } => "throttle",
            Self::DropOldest { .. } => "drop-oldest",
        }
    }

    /// 参数校验（窗口 / 容量必须为正）
    pub fn validate(&self) -> Result<(), DriverError> {
        match *self {
            Self::Batching { size: 0 } => Err(DriverError::invalid("batch_size", 0)),
            Self::DropOldest { capacity: 0 } => Err(DriverError::invalid("capacity", 0)),
            Self::Sampling { interval } if interval.is_zero() => {
                Err(DriverError::invalid("sampling_interval", "0s"))
            },
            Self::Throttle { duration } if duration.is_zero() => {
                Err(DriverError::invalid("throttle_duration", "0s"))
            },
            _ => Ok(()),
        }
    }

    /// 交接队列容量
    pub fn handoff_capacity(&self, default: usize) -> usize {
        match *self {
            Self::DropOldest { capacity } => capacity,
            _ => default,
        }
    }

    /// 创建整形阶段（每次激活一个新实例）
    pub fn create_stage(&self) -> Box<dyn ShapingStage> {
        match *self {
            Self::Batching { size } => Box::new(BatchingStage::new(size)),
            Self::Sampling { interval } => Box::new(SamplingStage::new(interval, Instant::now())),
            Self::Throttle { duration } => Box::new(ThrottleStage::new(duration)),
            Self::DropOldest { .. } => Box::new(PassThrough),
        }
    }
}

/// 整形阶段
///
/// 在处理线程上运行；`now` 由调用方提供，便于测试。
pub trait ShapingStage: Send {
    /// 新样本到达
    fn on_arrival(&mut self, sample: RawSample, now: Instant, out: &mut Vec<RawSample>);

    /// 定时器回调（在 `next_deadline()` 到期后调用）
    fn on_tick(&mut self, _now: Instant, _out: &mut Vec<RawSample>) {}

    /// 下一次需要 `on_tick` 的时间
    fn next_deadline(&self) -> Option<Instant> {
        None
    }

    /// 取出并清零被丢弃的样本数
    fn take_dropped(&mut self) -> u64 {
        0
    }
}

/// 直通
pub struct PassThrough;

impl ShapingStage for PassThrough {
    fn on_arrival(&mut self, sample: RawSample, _now: Instant, out: &mut Vec<RawSample>) {
        out.push(sample);
    }
}

/// 攒批
pub struct BatchingStage {
    size: usize,
    batch: Vec<RawSample>,
}

impl BatchingStage {
    pub fn new(size: usize) -> Self {
        let size = size.max(1);
        Self {
            size,
            batch: Vec::with_capacity(size),
        }
    }

    /// 尚未凑满一批的样本数
    pub fn pending(&self) -> usize {
        self.batch.len()
    }
}

impl ShapingStage for BatchingStage {
    fn on_arrival(&mut self, sample: RawSample, _now: Instant, out: &mut Vec<RawSample>) {
        self.batch.push(sample);
        if self.batch.len() >= self.size {
            out.append(&mut self.batch);
        }
    }
}

/// 窗口采样
///
/// 窗口以创建时刻为锚点：`[anchor + k*interval, anchor + (k+1)*interval)`。
pub struct SamplingStage {
    interval: Duration,
    window_end: Instant,
    latest: Option<RawSample>,
    dropped: u64,
}

impl SamplingStage {
    pub fn new(interval: Duration, anchor: Instant) -> Self {
        Self {
            interval,
            window_end: anchor + interval,
            latest: None,
            dropped: 0,
        }
    }

    fn roll(&mut self, now: Instant, out: &mut Vec<RawSample>) {
        if now < self.window_end {
            return;
        }
        if let Some(sample) = self.latest.take() {
            out.push(sample);
        }
        // 跳过空窗口
        let elapsed = (now - self.window_end).as_nanos() / self.interval.as_nanos().max(1);
        let windows = u32::try_from(elapsed + 1).unwrap_or(u32::MAX);
        self.window_end += self.interval * windows;
    }
}

impl ShapingStage for SamplingStage {
    fn on_arrival(&mut self, sample: RawSample, now: Instant, out: &mut Vec<RawSample>) {
        self.roll(now, out);
        if self.latest.replace(sample).is_some() {
            self.dropped += 1;
        }
    }

    fn on_tick(&mut self, now: Instant, out: &mut Vec<RawSample>) {
        self.roll(now, out);
    }

    fn next_deadline(&self) -> Option<Instant> {
        Some(self.window_end)
    }

    fn take_dropped(&mut self) -> u64 {
        std::mem::take(&mut self.dropped)
    }
}

/// 去抖
pub struct ThrottleStage {
    duration: Duration,
    pending: Option<(RawSample, Instant)>,
    dropped: u64,
}

impl ThrottleStage {
    pub fn new(duration: Duration) -> Self {
        Self {
            duration,
            pending: None,
            dropped: 0,
        }
    }
}

impl ShapingStage for ThrottleStage {
    fn on_arrival(&mut self, sample: RawSample, now: Instant, out: &mut Vec<RawSample>) {
        self.on_tick(now, out);
        if self.pending.replace((sample, now + self.duration)).is_some() {
            self.dropped += 1;
        }
    }

    fn on_tick(&mut self, now: Instant, out: &mut Vec<RawSample>) {
        if self.pending.as_ref().is_some_and(|(_, due)| *due <= now)
            && let Some((sample, _)) = self.pending.take()
        {
            out.push(sample);
        }
    }

    fn next_deadline(&self) -> Option<Instant> {
        self.pending.as_ref().map(|(_, due)| *due)
    }

    fn take_dropped(&mut self) -> u64 {
        std::mem::take(&mut self.dropped)
    }
}

/// 交接队列发送端
///
/// 采集线程调用 `push`，永不阻塞。
pub(crate) struct HandoffSender {
    tx: Sender<RawSample>,
    evict: Receiver<RawSample>,
    metrics: Arc<PipelineMetrics>,
}

/// 创建交接队列
pub(crate) fn handoff(capacity: usize, metrics: Arc<PipelineMetrics>) -> (HandoffSender, Receiver<RawSample>) {
    let (tx, rx) = bounded(capacity.max(1));
    let sender = HandoffSender {
        tx,
        evict: rx.clone(),
        metrics,
    };
    (sender, rx)
}

impl HandoffSender {
    /// 入队；满时淘汰最旧的待处理样本
    ///
    /// 发送端自身持有淘汰用的接收端，队列不会断开；
    /// 处理线程退出时由激活令牌通知采集线程。
    pub(crate) fn push(&self, sample: RawSample) {
        let mut sample = sample;
        loop {
            match self.tx.try_send(sample) {
                Ok(()) => return,
                Err(TrySendError::Full(rejected)) => {
                    if self.evict.try_recv().is_ok() {
                        self.metrics.handoff_evictions.fetch_add(1, Ordering::Relaxed);
                        trace!("hand-off queue full, evicted oldest pending sample");
                    }
                    sample = rejected;
                },
                Err(TrySendError::Disconnected(_)) => return,
            }
        }
    }
}
