//! 处理链
//!
//! 处理阶段**顺序组合**：每个阶段消费上一个阶段的输出。
//!
//! - [`Validation`]: 质量分类，Bad 样本被过滤（计入 `samples_rejected`）
//! - [`Transform`]: 按物理索引解析信号值映射
//! - [`Aggregation`]: 固定时间窗口聚合负载字段
//!
//! 空处理链为直通阶段（质量标记为 Good）。
//!
//! # 故障隔离
//!
//! 阶段返回 `Err` 或 panic 都在链边界被捕获，计入错误计数，
//! 当前样本不产生输出，流继续运行。

use crate::error::DriverError;
use station_protocol::{AggregatedStats, ProcessedSample, Quality, RawSample, SignalConfiguration, SignalValues};
use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{trace, warn};

/// 处理阶段错误
#[derive(Error, Debug)]
pub enum ProcessError {
    #[error("Processing failed: {0}")]
    Failed(String),
    #[error("Stage panicked: {0}")]
    Panicked(String),
}

/// 处理阶段
pub trait SampleProcessor: Send {
    fn name(&self) -> &str;

    /// 处理一个样本，输出零个或多个样本
    fn process(
        &mut self,
        sample: ProcessedSample,
        now: Instant,
        out: &mut Vec<ProcessedSample>,
    ) -> Result<(), ProcessError>;

    /// 定时器回调（窗口类阶段使用）
    fn on_tick(&mut self, _now: Instant, _out: &mut Vec<ProcessedSample>) -> Result<(), ProcessError> {
        Ok(())
    }

    /// 下一次需要 `on_tick` 的时间
    fn next_deadline(&self) -> Option<Instant> {
        None
    }

    /// 取出并清零因质量问题被过滤的样本数
    fn take_rejected(&mut self) -> u64 {
        0
    }
}

/// 质量校验
#[derive(Debug, Default)]
pub struct Validation {
    rejected: u64,
}

impl Validation {
    pub fn new() -> Self {
        Self::default()
    }

    /// 质量分类
    ///
    /// 以下任一条件为 Bad：
    /// - 所有通道数组为空
    /// - 负载字段为 NaN / Infinite
    /// - 时间戳 ≤ 0
    pub fn classify(raw: &RawSample) -> Quality {
        if !raw.has_channels() || !raw.load.is_finite() || raw.timestamp <= 0 {
            Quality::Bad
        } else {
            Quality::Good
        }
    }
}

impl SampleProcessor for Validation {
    fn name(&self) -> &str {
        "validation"
    }

    fn process(
        &mut self,
        mut sample: ProcessedSample,
        _now: Instant,
        out: &mut Vec<ProcessedSample>,
    ) -> Result<(), ProcessError> {
        match Self::classify(&sample.raw) {
            Quality::Good => {
                sample.quality = Quality::Good;
                out.push(sample);
            },
            Quality::Bad => {
                self.rejected += 1;
                trace!(timestamp = sample.timestamp(), "sample rejected by validation");
            },
        }
        Ok(())
    }

    fn take_rejected(&mut self) -> u64 {
        std::mem::take(&mut self.rejected)
    }
}

/// 信号值解析
///
/// 物理索引超出样本数组范围的信号不出现在映射中。
#[derive(Debug, Clone)]
pub struct Transform {
    signals: Vec<(String, u32)>,
}

impl Transform {
    pub fn new(signals: &[SignalConfiguration]) -> Self {
        Self {
            signals: signals.iter().map(|s| (s.id.clone(), s.channel_index)).collect(),
        }
    }

    pub fn resolve(&self, raw: &RawSample) -> SignalValues {
        self.signals
            .iter()
            .filter_map(|(id, index)| raw.channel(*index).ok().map(|value| (id.clone(), value)))
            .collect()
    }
}

impl SampleProcessor for Transform {
    fn name(&self) -> &str {
        "transform"
    }

    fn process(
        &mut self,
        sample: ProcessedSample,
        _now: Instant,
        out: &mut Vec<ProcessedSample>,
    ) -> Result<(), ProcessError> {
        let values = self.resolve(&sample.raw);
        out.push(sample.with_signal_values(values));
        Ok(())
    }
}

/// 窗口聚合
///
/// 窗口以创建时刻为锚点；窗口关闭时若非空，输出窗口内最后一个样本
/// 并附带负载字段的统计量。
pub struct Aggregation {
    window: Duration,
    window_end: Instant,
    last: Option<ProcessedSample>,
    loads: Vec<f64>,
}

impl Aggregation {
    pub fn new(window: Duration, anchor: Instant) -> Self {
        Self {
            window,
            window_end: anchor + window,
            last: None,
            loads: Vec::new(),
        }
    }

    fn roll(&mut self, now: Instant, out: &mut Vec<ProcessedSample>) {
        if now < self.window_end {
            return;
        }

        if let (Some(last), Some(stats)) = (self.last.take(), AggregatedStats::from_values(&self.loads)) {
            out.push(last.with_aggregate(stats));
        }
        self.loads.clear();

        let elapsed = (now - self.window_end).as_nanos() / self.window.as_nanos().max(1);
        let windows = u32::try_from(elapsed + 1).unwrap_or(u32::MAX);
        self.window_end += self.window * windows;
    }
}

impl SampleProcessor for Aggregation {
    fn name(&self) -> &str {
        "aggregation"
    }

    fn process(
        &mut self,
        sample: ProcessedSample,
        now: Instant,
        out: &mut Vec<ProcessedSample>,
    ) -> Result<(), ProcessError> {
        self.roll(now, out);
        self.loads.push(sample.raw.load);
        self.last = Some(sample);
        Ok(())
    }

    fn on_tick(&mut self, now: Instant, out: &mut Vec<ProcessedSample>) -> Result<(), ProcessError> {
        self.roll(now, out);
        Ok(())
    }

    fn next_deadline(&self) -> Option<Instant> {
        Some(self.window_end)
    }
}

/// 自定义阶段工厂
pub type ProcessorFactory = Arc<dyn Fn() -> Box<dyn SampleProcessor> + Send + Sync>;

/// 处理阶段描述
///
/// Pipeline 每次激活都按描述构建一条全新的处理链（窗口状态不跨激活保留）。
#[derive(Clone)]
pub enum ProcessorSpec {
    Validation,
    Transform { signals: Vec<SignalConfiguration> },
    Aggregation { window: Duration },
    Custom(ProcessorFactory),
}

impl ProcessorSpec {
    pub fn custom(factory: impl Fn() -> Box<dyn SampleProcessor> + Send + Sync + 'static) -> Self {
        Self::Custom(Arc::new(factory))
    }

    pub fn validate(&self) -> Result<(), DriverError> {
        match self {
            Self::Aggregation { window } if window.is_zero() => {
                Err(DriverError::invalid("aggregation_window", "0s"))
            },
            _ => Ok(()),
        }
    }

    pub fn build(&self, anchor: Instant) -> Box<dyn SampleProcessor> {
        match self {
            Self::Validation => Box::new(Validation::new()),
            Self::Transform { signals } => Box::new(Transform::new(signals)),
            Self::Aggregation { window } => Box::new(Aggregation::new(*window, anchor)),
            Self::Custom(factory) => factory(),
        }
    }
}

impl fmt::Debug for ProcessorSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Validation => write!(f, "Validation"),
            Self::Transform { signals } => f.debug_struct("Transform").field("signals", &signals.len()).finish(),
            Self::Aggregation { window } => f.debug_struct("Aggregation").field("window", window).finish(),
            Self::Custom(_) => write!(f, "Custom"),
        }
    }
}

/// 单次调用处理链的结果计数
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChainReport {
    /// 阶段故障（Err 或 panic）次数
    pub errors: u64,
    /// 被 Validation 过滤的样本数
    pub rejected: u64,
}

impl std::ops::AddAssign for ChainReport {
    fn add_assign(&mut self, rhs: Self) {
        self.errors += rhs.errors;
        self.rejected += rhs.rejected;
    }
}

/// 顺序处理链
pub struct ProcessorChain {
    stages: Vec<Box<dyn SampleProcessor>>,
}

impl ProcessorChain {
    pub fn new(stages: Vec<Box<dyn SampleProcessor>>) -> Self {
        Self { stages }
    }

    pub fn from_specs(specs: &[ProcessorSpec], anchor: Instant) -> Self {
        Self::new(specs.iter().map(|spec| spec.build(anchor)).collect())
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    /// 处理一个原始样本
    pub fn process(&mut self, raw: Arc<RawSample>, now: Instant, out: &mut Vec<ProcessedSample>) -> ChainReport {
        let input = vec![ProcessedSample::good(raw)];
        if self.stages.is_empty() {
            out.extend(input);
            return ChainReport::default();
        }
        self.run_from(0, input, now, out)
    }

    /// 驱动窗口类阶段的定时器，其输出继续流经后续阶段
    pub fn on_tick(&mut self, now: Instant, out: &mut Vec<ProcessedSample>) -> ChainReport {
        let mut report = ChainReport::default();
        for index in 0..self.stages.len() {
            let due = self.stages[index].next_deadline().is_some_and(|deadline| deadline <= now);
            if !due {
                continue;
            }

            let mut produced = Vec::new();
            let stage = &mut self.stages[index];
            let result = catch_unwind(AssertUnwindSafe(|| stage.on_tick(now, &mut produced)));
            if let Err(e) = flatten(result) {
                warn!(stage = %stage.name(), "processor tick failed: {}", e);
                report.errors += 1;
            }

            if !produced.is_empty() {
                report += self.run_from(index + 1, produced, now, out);
            }
        }
        report
    }

    /// 所有阶段中最早的定时器截止时间
    pub fn next_deadline(&self) -> Option<Instant> {
        self.stages.iter().filter_map(|s| s.next_deadline()).min()
    }

    fn run_from(
        &mut self,
        start: usize,
        input: Vec<ProcessedSample>,
        now: Instant,
        out: &mut Vec<ProcessedSample>,
    ) -> ChainReport {
        let mut report = ChainReport::default();
        let mut batch = input;

        for stage in self.stages.iter_mut().skip(start) {
            let mut next = Vec::with_capacity(batch.len());
            for item in batch {
                let result = catch_unwind(AssertUnwindSafe(|| stage.process(item, now, &mut next)));
                if let Err(e) = flatten(result) {
                    warn!(stage = %stage.name(), "processor stage failed: {}", e);
                    report.errors += 1;
                }
            }
            report.rejected += stage.take_rejected();

            batch = next;
            if batch.is_empty() {
                break;
            }
        }

        out.extend(batch);
        report
    }
}

fn flatten(result: std::thread::Result<Result<(), ProcessError>>) -> Result<(), ProcessError> {
    match result {
        Ok(inner) => inner,
        Err(payload) => {
            let message = payload
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            Err(ProcessError::Panicked(message))
        },
    }
}
