//! 采集策略
//!
//! 采集策略决定**何时**调用 [`HardwareAdapter::read_data`]：
//!
//! - [`FixedRate`]: 固定频率，按绝对锚点调度（不累积漂移）
//! - [`AdaptiveRate`]: 在 `[min, max]` 之间按谓词倍增 / 减半
//! - [`TriggerBased`]: 每个外部触发事件读取一次
//!
//! # 失败策略
//!
//! 读取失败不会终止采集循环：失败被降级为只有时间戳的哨兵样本
//! （通道数组为空，Validation 会将其丢弃），重连由适配器自身负责。
//! 采集循环只在取消令牌被取消时退出。

use crate::error::{DriverError, ensure_positive};
use crate::metrics::PipelineMetrics;
use crate::worker::CancelToken;
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, bounded};
use station_hal::HardwareAdapter;
use station_protocol::{MIN_ACQUISITION_RATE_HZ, RawSample, monotonic_micros};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tracing::{debug, trace};

/// 单次睡眠的最大切片（保证取消响应延迟有界）
const MAX_SLEEP_SLICE: Duration = Duration::from_millis(10);

/// 触发轮询间隔
const TRIGGER_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// 采集上下文
///
/// 由 Pipeline 在每次激活时创建，交给策略的 `run()`。
pub struct AcquisitionContext {
    adapter: Arc<dyn HardwareAdapter>,
    token: CancelToken,
    metrics: Arc<PipelineMetrics>,
}

impl AcquisitionContext {
    pub fn new(adapter: Arc<dyn HardwareAdapter>, token: CancelToken, metrics: Arc<PipelineMetrics>) -> Self {
        Self {
            adapter,
            token,
            metrics,
        }
    }

    pub fn adapter(&self) -> &Arc<dyn HardwareAdapter> {
        &self.adapter
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// 读取一次硬件；失败时返回哨兵样本
    pub fn read(&self) -> RawSample {
        self.metrics.reads_total.fetch_add(1, Ordering::Relaxed);
        match self.adapter.read_data() {
            Ok(sample) => sample,
            Err(e) => {
                self.metrics.read_failures.fetch_add(1, Ordering::Relaxed);
                trace!(adapter = %self.adapter.id(), "read failed, emitting sentinel: {}", e);
                RawSample::sentinel(monotonic_micros())
            },
        }
    }

    /// 睡眠到 `deadline`
    ///
    /// 以不超过 10ms 的切片睡眠并检查取消令牌。
    /// 返回 `false` 表示已被取消。
    pub fn sleep_until(&self, deadline: Instant) -> bool {
        loop {
            if self.token.is_cancelled() {
                return false;
            }
            let now = Instant::now();
            if now >= deadline {
                return true;
            }
            spin_sleep::sleep((deadline - now).min(MAX_SLEEP_SLICE));
        }
    }
}

/// 采集策略
///
/// `run()` 在采集线程上执行，产生的样本交给 `sink`，
/// 仅在取消令牌被取消时返回。
pub trait AcquisitionStrategy: Send + Sync {
    /// 策略名称（用于日志）
    fn name(&self) -> &str;

    /// 当前采样率（Hz），非周期策略返回 0.0
    fn current_rate(&self) -> f64;

    fn run(&self, ctx: &AcquisitionContext, sink: &mut dyn FnMut(RawSample));
}

/// 绝对锚点调度器
///
/// 第 k 个 tick 的截止时间为 `start + k * interval`；
/// 落后时跳过错过的 tick，不补发。
struct Ticker {
    interval: Duration,
    next: Instant,
}

impl Ticker {
    fn new(interval: Duration) -> Self {
        Self {
            interval,
            next: Instant::now(),
        }
    }

    /// 修改间隔，从下一个 tick 起生效
    fn set_interval(&mut self, interval: Duration) {
        if let Some(previous) = self.next.checked_sub(self.interval) {
            self.next = previous + interval;
        }
        self.interval = interval;
    }

    /// 等待下一个 tick；返回 `false` 表示已被取消
    fn wait(&mut self, ctx: &AcquisitionContext) -> bool {
        if !ctx.sleep_until(self.next) {
            return false;
        }

        let now = Instant::now();
        self.next += self.interval;
        if self.next <= now {
            let behind = (now - self.next).as_nanos() / self.interval.as_nanos().max(1);
            let skipped = u32::try_from(behind + 1).unwrap_or(u32::MAX);
            self.next += self.interval * skipped;
            trace!(skipped, "acquisition overrun, skipping missed ticks");
        }
        true
    }
}

/// 频率对应的 tick 间隔
///
/// 频率须有限且不低于 [`MIN_ACQUISITION_RATE_HZ`]。
fn interval_for(name: &'static str, rate_hz: f64) -> Result<Duration, DriverError> {
    let rate_hz = ensure_positive(name, rate_hz)?;
    if rate_hz < MIN_ACQUISITION_RATE_HZ {
        return Err(DriverError::invalid(name, rate_hz));
    }
    Duration::try_from_secs_f64(1.0 / rate_hz)
        .ok()
        .filter(|interval| !interval.is_zero())
        .ok_or_else(|| DriverError::invalid(name, rate_hz))
}

/// 固定频率采集
#[derive(Debug, Clone)]
pub struct FixedRate {
    rate_hz: f64,
    interval: Duration,
}

impl FixedRate {
    pub fn new(rate_hz: f64) -> Result<Self, DriverError> {
        let interval = interval_for("rate_hz", rate_hz)?;
        Ok(Self { rate_hz, interval })
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }
}

impl AcquisitionStrategy for FixedRate {
    fn name(&self) -> &str {
        "fixed-rate"
    }

    fn current_rate(&self) -> f64 {
        self.rate_hz
    }

    fn run(&self, ctx: &AcquisitionContext, sink: &mut dyn FnMut(RawSample)) {
        let mut ticker = Ticker::new(self.interval);
        while ticker.wait(ctx) {
            sink(ctx.read());
        }
    }
}

/// 判断是否需要高速采样的谓词
pub type RatePredicate = Arc<dyn Fn(&RawSample) -> bool + Send + Sync>;

/// 自适应频率采集
///
/// 从 `min_rate` 开始；每 `adjust_interval * current_rate` 个 tick
/// 对最新样本求一次谓词：为真则频率翻倍（不超过 `max_rate`），
/// 否则减半（不低于 `min_rate`）。新间隔从下一个 tick 起生效。
pub struct AdaptiveRate {
    min_rate: f64,
    max_rate: f64,
    adjust_interval: Duration,
    /// `min_rate` 对应的间隔（最长间隔）
    min_interval: Duration,
    need_high_speed: RatePredicate,
    /// 当前频率（f64 位模式）
    current: AtomicU64,
}

impl AdaptiveRate {
    pub fn new(
        min_rate: f64,
        max_rate: f64,
        adjust_interval: Duration,
        need_high_speed: impl Fn(&RawSample) -> bool + Send + Sync + 'static,
    ) -> Result<Self, DriverError> {
        let min_interval = interval_for("min_rate_hz", min_rate)?;
        interval_for("max_rate_hz", max_rate)?;
        if min_rate > max_rate {
            return Err(DriverError::invalid(
                "min_rate_hz",
                format!("{} > max_rate_hz {}", min_rate, max_rate),
            ));
        }
        if adjust_interval.is_zero() {
            return Err(DriverError::invalid("adjust_interval", "0s"));
        }

        Ok(Self {
            min_rate,
            max_rate,
            adjust_interval,
            min_interval,
            need_high_speed: Arc::new(need_high_speed),
            current: AtomicU64::new(min_rate.to_bits()),
        })
    }

    /// 以负载阈值为谓词：`|load| > threshold` 时需要高速采样
    pub fn load_threshold(
        min_rate: f64,
        max_rate: f64,
        adjust_interval: Duration,
        threshold: f64,
    ) -> Result<Self, DriverError> {
        Self::new(min_rate, max_rate, adjust_interval, move |sample| {
            sample.load.abs() > threshold
        })
    }

    pub fn min_rate(&self) -> f64 {
        self.min_rate
    }

    pub fn max_rate(&self) -> f64 {
        self.max_rate
    }

    /// 根据谓词结果计算下一个频率（结果始终在 `[min, max]` 内）
    pub fn next_rate(&self, current: f64, high_speed: bool) -> f64 {
        let next = if high_speed { current * 2.0 } else { current / 2.0 };
        next.clamp(self.min_rate, self.max_rate)
    }

    /// 当前频率下两次调整之间的 tick 数
    fn ticks_per_adjust(&self, rate: f64) -> u64 {
        ((self.adjust_interval.as_secs_f64() * rate).round() as u64).max(1)
    }

    /// `[min, max]` 内的频率总能换算为间隔；换算失败时退回最长间隔
    fn interval_at(&self, rate: f64) -> Duration {
        interval_for("rate_hz", rate).unwrap_or(self.min_interval)
    }

    fn store_rate(&self, rate: f64) {
        self.current.store(rate.to_bits(), Ordering::Relaxed);
    }
}

impl AcquisitionStrategy for AdaptiveRate {
    fn name(&self) -> &str {
        "adaptive-rate"
    }

    fn current_rate(&self) -> f64 {
        f64::from_bits(self.current.load(Ordering::Relaxed))
    }

    fn run(&self, ctx: &AcquisitionContext, sink: &mut dyn FnMut(RawSample)) {
        let mut rate = self.min_rate;
        self.store_rate(rate);
        let mut ticker = Ticker::new(self.min_interval);
        let mut ticks_per_adjust = self.ticks_per_adjust(rate);
        let mut ticks = 0u64;

        while ticker.wait(ctx) {
            let sample = ctx.read();
            ticks += 1;

            let adjust = ticks >= ticks_per_adjust;
            let high_speed = adjust && (self.need_high_speed)(&sample);
            sink(sample);

            if adjust {
                ticks = 0;
                let next = self.next_rate(rate, high_speed);
                if next != rate {
                    debug!(from = rate, to = next, "adaptive rate adjusted");
                    rate = next;
                    self.store_rate(rate);
                    ticker.set_interval(self.interval_at(rate));
                    ticks_per_adjust = self.ticks_per_adjust(rate);
                }
            }
        }
    }
}

/// 触发句柄
///
/// 每次 `fire()` 令采集线程读取一个样本。
#[derive(Debug, Clone)]
pub struct TriggerHandle {
    tx: Sender<()>,
}

impl TriggerHandle {
    /// 发送一次触发；队列满时返回 `false`（该触发被丢弃）
    pub fn fire(&self) -> bool {
        self.tx.try_send(()).is_ok()
    }
}

/// 外部触发采集
pub struct TriggerBased {
    rx: Receiver<()>,
}

impl TriggerBased {
    /// 创建触发采集策略及其触发句柄（`capacity` 为未处理触发的上限）
    pub fn new(capacity: usize) -> (Self, TriggerHandle) {
        let (tx, rx) = bounded(capacity.max(1));
        (Self { rx }, TriggerHandle { tx })
    }

    /// 以已有的事件接收端作为触发源
    pub fn from_receiver(rx: Receiver<()>) -> Self {
        Self { rx }
    }
}

impl AcquisitionStrategy for TriggerBased {
    fn name(&self) -> &str {
        "trigger-based"
    }

    fn current_rate(&self) -> f64 {
        0.0
    }

    fn run(&self, ctx: &AcquisitionContext, sink: &mut dyn FnMut(RawSample)) {
        // 无人订阅期间的触发没有意义
        let stale = self.rx.try_iter().count();
        if stale > 0 {
            debug!(stale, "discarding triggers fired while inactive");
        }

        while !ctx.is_cancelled() {
            match self.rx.recv_timeout(TRIGGER_POLL_INTERVAL) {
                Ok(()) => sink(ctx.read()),
                Err(RecvTimeoutError::Timeout) => {},
                Err(RecvTimeoutError::Disconnected) => {
                    // 事件源已关闭，空转直到取消
                    if !ctx.sleep_until(Instant::now() + TRIGGER_POLL_INTERVAL) {
                        break;
                    }
                },
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use station_hal::{AdapterError, MockAdapter};
    use std::thread;

    fn context(mock: Arc<MockAdapter>) -> (AcquisitionContext, CancelToken, Arc<PipelineMetrics>) {
        let token = CancelToken::new();
        let metrics = Arc::new(PipelineMetrics::new());
        let ctx = AcquisitionContext::new(mock, token.clone(), metrics.clone());
        (ctx, token, metrics)
    }

    #[test]
    fn test_read_failure_yields_sentinel() {
        let mock = Arc::new(MockAdapter::new("c1"));
        mock.push_failure(AdapterError::Device("bus".into()));
        let (ctx, _token, metrics) = context(mock);

        let sample = ctx.read();
        assert!(sample.is_sentinel());
        assert!(sample.timestamp > 0);
        assert_eq!(metrics.snapshot().read_failures, 1);
        assert_eq!(metrics.snapshot().reads_total, 1);
    }

    #[test]
    fn test_invalid_parameters_rejected() {
        assert!(FixedRate::new(0.0).is_err());
        assert!(FixedRate::new(-5.0).is_err());
        assert!(AdaptiveRate::new(10.0, 5.0, Duration::from_secs(1), |_| true).is_err());
        assert!(AdaptiveRate::new(1.0, 5.0, Duration::ZERO, |_| true).is_err());
    }

    #[test]
    fn test_tiny_rates_rejected_without_panic() {
        for rate in [1e-20, f64::MIN_POSITIVE, 1e-4] {
            assert!(matches!(
                FixedRate::new(rate),
                Err(DriverError::InvalidParameter { name: "rate_hz", .. })
            ));
        }
        assert!(matches!(
            AdaptiveRate::new(1e-20, 5.0, Duration::from_secs(1), |_| true),
            Err(DriverError::InvalidParameter { name: "min_rate_hz", .. })
        ));
        assert!(FixedRate::new(1e300).is_err());

        let slow = FixedRate::new(MIN_ACQUISITION_RATE_HZ).unwrap();
        assert!((slow.interval().as_secs_f64() - 1000.0).abs() < 1e-6);
        assert!(AdaptiveRate::new(1.0, 5.0, Duration::from_secs(1), |_| true).is_ok());
    }

    #[test]
    fn test_fixed_rate_interval() {
        let strategy = FixedRate::new(100.0).unwrap();
        assert_eq!(strategy.interval(), Duration::from_millis(10));
        assert_eq!(strategy.current_rate(), 100.0);
    }

    #[test]
    fn test_fixed_rate_stops_on_cancel() {
        let mock = Arc::new(MockAdapter::generating("c1", |i| RawSample::new(i as i64 + 1, &[1.0], &[])));
        let (ctx, token, _metrics) = context(mock.clone());

        let canceller = thread::spawn(move || {
            thread::sleep(Duration::from_millis(50));
            token.cancel();
        });

        let mut count = 0;
        FixedRate::new(200.0).unwrap().run(&ctx, &mut |_| count += 1);
        canceller.join().unwrap();

        assert!(count > 0);
        assert_eq!(count as u64, mock.read_count());
    }

    #[test]
    fn test_adaptive_next_rate_clamped() {
        let strategy = AdaptiveRate::new(10.0, 40.0, Duration::from_millis(100), |_| true).unwrap();
        assert_eq!(strategy.next_rate(10.0, true), 20.0);
        assert_eq!(strategy.next_rate(40.0, true), 40.0);
        assert_eq!(strategy.next_rate(10.0, false), 10.0);
        assert_eq!(strategy.next_rate(25.0, false), 12.5);
    }

    #[test]
    fn test_adaptive_ramps_to_max() {
        let mock = Arc::new(MockAdapter::generating("c1", |i| {
            RawSample::new(i as i64 + 1, &[1.0], &[]).with_load(100.0)
        }));
        let (ctx, token, _metrics) = context(mock);
        let strategy = Arc::new(AdaptiveRate::load_threshold(100.0, 400.0, Duration::from_millis(10), 50.0).unwrap());
        assert_eq!(strategy.current_rate(), 100.0);

        let runner = {
            let strategy = strategy.clone();
            thread::spawn(move || strategy.run(&ctx, &mut |_| {}))
        };

        thread::sleep(Duration::from_millis(150));
        token.cancel();
        runner.join().unwrap();
        assert_eq!(strategy.current_rate(), 400.0);
    }

    #[test]
    fn test_trigger_reads_once_per_event() {
        let mock = Arc::new(MockAdapter::generating("c1", |i| RawSample::new(i as i64 + 1, &[1.0], &[])));
        let (ctx, token, _metrics) = context(mock.clone());
        let (strategy, trigger) = TriggerBased::new(16);
        assert_eq!(strategy.current_rate(), 0.0);

        let (tx, rx) = crossbeam_channel::unbounded();
        let runner = thread::spawn(move || strategy.run(&ctx, &mut |s| tx.send(s).unwrap()));

        // 等待采集线程丢弃旧触发并进入轮询
        thread::sleep(Duration::from_millis(20));
        for _ in 0..3 {
            assert!(trigger.fire());
        }
        for _ in 0..3 {
            rx.recv_timeout(Duration::from_secs(1)).unwrap();
        }

        token.cancel();
        runner.join().unwrap();
        assert_eq!(mock.read_count(), 3);
    }
}
