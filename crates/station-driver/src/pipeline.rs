//! Pipeline
//!
//! 把采集策略、背压和处理链组合成一个热共享的 `ProcessedSample` 流。
//!
//! # 线程模型
//!
//! 每次激活（第一个订阅者到来）启动两个线程：
//!
//! ```text
//! acq-<name>:  strategy.run() ──► hand-off queue (bounded, evict oldest)
//! proc-<name>: hand-off ──► ShapingStage ──► ProcessorChain ──► Emitter (fan-out)
//! ```
//!
//! 最后一个订阅者退订时取消令牌并 join 两个线程。
//! **零订阅者 ⇒ 零硬件轮询。**
//!
//! # 生命周期
//!
//! - `start()`: 幂等；重置统计并持有一个内部订阅（激活采集）
//! - `stop()`: 幂等；取消共享令牌，释放内部订阅，写入 `end_time`
//!
//! `stop()` 之后，其他订阅者也不再收到数据，直到下一次 `start()`。

use crate::acquisition::{AcquisitionContext, AcquisitionStrategy};
use crate::backpressure::{Backpressure, DEFAULT_HANDOFF_CAPACITY, HandoffSender, PassThrough, ShapingStage, handoff};
use crate::metrics::PipelineMetrics;
use crate::processor::{ChainReport, ProcessorChain, ProcessorSpec};
use crate::stream::{Activation, CallbackSubscription, Emitter, SharedStream, StreamCallback, StreamConfig, Subscription};
use crate::worker::{CancelOnDrop, CancelToken, DEFAULT_JOIN_TIMEOUT, join_logged, spawn_named};
use crate::{DriverError, PipelineBuilder};
use arc_swap::{ArcSwap, ArcSwapOption};
use crossbeam_channel::{Receiver, RecvTimeoutError};
use parking_lot::Mutex;
use station_hal::HardwareAdapter;
use station_protocol::{ProcessedSample, RawSample};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tracing::{debug, info, trace};

/// 处理线程在没有定时器时的最长等待时间
const PROCESSING_MAX_WAIT: Duration = Duration::from_millis(20);

/// Pipeline 配置
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PipelineConfig {
    /// 交接队列容量（`DropOldest` 策略会覆盖此值）
    pub handoff_capacity: usize,
    /// 输出流配置
    pub stream: StreamConfig,
    /// 关闭时等待工作线程的超时
    pub join_timeout: Duration,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            handoff_capacity: DEFAULT_HANDOFF_CAPACITY,
            stream: StreamConfig::default(),
            join_timeout: DEFAULT_JOIN_TIMEOUT,
        }
    }
}

impl PipelineConfig {
    pub fn validate(&self) -> Result<(), DriverError> {
        if self.handoff_capacity == 0 {
            return Err(DriverError::invalid("handoff_capacity", 0));
        }
        if self.stream.subscriber_capacity == 0 {
            return Err(DriverError::invalid("subscriber_capacity", 0));
        }
        Ok(())
    }
}

/// 运行统计
///
/// 由 Pipeline 以整体替换的方式更新，读取方无需加锁。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PipelineStats {
    pub start_time: Option<Instant>,
    pub end_time: Option<Instant>,
    /// 发出的处理后样本数（被 Validation 过滤的不计入）
    pub processed_count: u64,
    /// 处理阶段故障次数
    pub error_count: u64,
}

impl PipelineStats {
    fn started(now: Instant) -> Self {
        Self {
            start_time: Some(now),
            ..Self::default()
        }
    }

    /// 运行时长（未停止时计算到当前时刻）
    pub fn duration(&self) -> Duration {
        match (self.start_time, self.end_time) {
            (Some(start), Some(end)) => end.saturating_duration_since(start),
            (Some(start), None) => start.elapsed(),
            _ => Duration::ZERO,
        }
    }

    /// 平均吞吐量（样本 / 秒）
    pub fn throughput(&self) -> f64 {
        let secs = self.duration().as_secs_f64();
        if secs <= 0.0 {
            return 0.0;
        }
        self.processed_count as f64 / secs
    }
}

/// 工作线程共享的 Pipeline 状态
struct Shared {
    name: String,
    adapter: Arc<dyn HardwareAdapter>,
    strategy: Arc<dyn AcquisitionStrategy>,
    backpressure: Option<Backpressure>,
    processors: Vec<ProcessorSpec>,
    config: PipelineConfig,
    /// `stop()` 取消；`start()` 在已取消时替换
    token: Mutex<CancelToken>,
    stats: ArcSwap<PipelineStats>,
    metrics: Arc<PipelineMetrics>,
}

impl Shared {
    fn record(&self, processed: u64, errors: u64) {
        if processed == 0 && errors == 0 {
            return;
        }
        self.stats.rcu(|stats| PipelineStats {
            processed_count: stats.processed_count + processed,
            error_count: stats.error_count + errors,
            ..**stats
        });
    }

    fn handoff_capacity(&self) -> usize {
        let default = self.config.handoff_capacity;
        self.backpressure.map_or(default, |bp| bp.handoff_capacity(default))
    }
}

/// 采集 Pipeline
pub struct Pipeline {
    shared: Arc<Shared>,
    stream: SharedStream<ProcessedSample>,
    session: Mutex<Option<CallbackSubscription<ProcessedSample>>>,
    latest: Arc<ArcSwapOption<ProcessedSample>>,
}

impl Pipeline {
    pub fn builder() -> PipelineBuilder {
        PipelineBuilder::new()
    }

    pub(crate) fn new(
        name: String,
        adapter: Arc<dyn HardwareAdapter>,
        strategy: Arc<dyn AcquisitionStrategy>,
        backpressure: Option<Backpressure>,
        processors: Vec<ProcessorSpec>,
        config: PipelineConfig,
    ) -> Self {
        let shared = Arc::new(Shared {
            name: name.clone(),
            adapter,
            strategy,
            backpressure,
            processors,
            config,
            token: Mutex::new(CancelToken::new()),
            stats: ArcSwap::from_pointee(PipelineStats::default()),
            metrics: Arc::new(PipelineMetrics::new()),
        });

        let activation_shared = shared.clone();
        let stream = SharedStream::new(name, config.stream, move |emitter| {
            activate(&activation_shared, emitter)
        });

        Self {
            shared,
            stream,
            session: Mutex::new(None),
            latest: Arc::new(ArcSwapOption::empty()),
        }
    }

    pub fn name(&self) -> &str {
        &self.shared.name
    }

    /// 启动（幂等）
    pub fn start(&self) {
        let mut session = self.session.lock();
        if session.is_some() {
            debug!(pipeline = %self.shared.name, "start ignored: already running");
            return;
        }

        {
            let mut token = self.shared.token.lock();
            if token.is_cancelled() {
                *token = CancelToken::new();
            }
        }
        self.shared.stats.store(Arc::new(PipelineStats::started(Instant::now())));

        let latest = self.latest.clone();
        let callback: Arc<dyn StreamCallback<ProcessedSample>> =
            Arc::new(move |sample: &ProcessedSample| latest.store(Some(Arc::new(sample.clone()))));
        *session = Some(self.stream.subscribe_callback(callback));

        info!(
            pipeline = %self.shared.name,
            strategy = %self.shared.strategy.name(),
            "pipeline started"
        );
    }

    /// 停止（幂等）
    pub fn stop(&self) {
        let mut session = self.session.lock();
        let Some(subscription) = session.take() else {
            return;
        };

        self.shared.token.lock().cancel();
        drop(subscription);

        let now = Instant::now();
        self.shared.stats.rcu(|stats| PipelineStats {
            end_time: Some(now),
            ..**stats
        });

        let stats = self.stats();
        info!(
            pipeline = %self.shared.name,
            processed = stats.processed_count,
            errors = stats.error_count,
            "pipeline stopped"
        );
    }

    /// 是否处于 `start()` 与 `stop()` 之间
    pub fn is_running(&self) -> bool {
        self.session.lock().is_some()
    }

    /// 采集线程是否在运行（任一订阅者均可激活）
    pub fn is_acquiring(&self) -> bool {
        self.stream.is_active()
    }

    /// 运行统计快照
    pub fn stats(&self) -> PipelineStats {
        **self.shared.stats.load()
    }

    pub fn metrics(&self) -> &Arc<PipelineMetrics> {
        &self.shared.metrics
    }

    /// 共享输出流
    pub fn stream(&self) -> SharedStream<ProcessedSample> {
        self.stream.clone()
    }

    /// 订阅输出流（首个订阅者会激活采集）
    pub fn subscribe(&self) -> Subscription<ProcessedSample> {
        self.stream.subscribe()
    }

    /// `start()` 之后最近一个输出样本
    pub fn latest(&self) -> Option<Arc<ProcessedSample>> {
        self.latest.load_full()
    }

    pub fn adapter(&self) -> &Arc<dyn HardwareAdapter> {
        &self.shared.adapter
    }

    pub fn strategy(&self) -> &Arc<dyn AcquisitionStrategy> {
        &self.shared.strategy
    }

    pub fn backpressure(&self) -> Option<Backpressure> {
        self.shared.backpressure
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.shared.config
    }
}

impl Drop for Pipeline {
    fn drop(&mut self) {
        self.stop();
    }
}

/// 一次激活的工作线程
struct WorkerActivation {
    name: String,
    token: CancelToken,
    join_timeout: Duration,
    acquisition: Option<JoinHandle<()>>,
    processing: Option<JoinHandle<()>>,
}

impl Activation for WorkerActivation {
    fn shutdown(mut self: Box<Self>) {
        self.token.cancel();
        join_logged(self.acquisition.take(), &format!("acq-{}", self.name), self.join_timeout);
        join_logged(self.processing.take(), &format!("proc-{}", self.name), self.join_timeout);
        debug!(pipeline = %self.name, "acquisition workers joined");
    }

    fn is_finished(&self) -> bool {
        self.token.is_cancelled()
            || self.acquisition.as_ref().is_none_or(JoinHandle::is_finished)
            || self.processing.as_ref().is_none_or(JoinHandle::is_finished)
    }
}

fn activate(shared: &Arc<Shared>, emitter: Emitter<ProcessedSample>) -> Box<dyn Activation> {
    let token = shared.token.lock().child();
    shared.metrics.activations.fetch_add(1, std::sync::atomic::Ordering::Relaxed);

    let (handoff_tx, handoff_rx) = handoff(shared.handoff_capacity(), shared.metrics.clone());

    let acquisition = {
        let shared = shared.clone();
        let token = token.clone();
        spawn_named(&format!("acq-{}", shared.name), move || {
            acquisition_loop(&shared, token, handoff_tx)
        })
    };

    let processing = {
        let shared = shared.clone();
        let token = token.clone();
        spawn_named(&format!("proc-{}", shared.name), move || {
            // 处理线程无论因何退出，采集线程都随之停止轮询
            let _guard = CancelOnDrop(token.clone());
            processing_loop(&shared, &token, handoff_rx, &emitter)
        })
    };

    info!(
        pipeline = %shared.name,
        strategy = %shared.strategy.name(),
        backpressure = shared.backpressure.map_or("none", |bp| bp.name()),
        "acquisition activated"
    );

    Box::new(WorkerActivation {
        name: shared.name.clone(),
        token,
        join_timeout: shared.config.join_timeout,
        acquisition,
        processing,
    })
}

fn acquisition_loop(shared: &Shared, token: CancelToken, handoff: HandoffSender) {
    let ctx = AcquisitionContext::new(shared.adapter.clone(), token, shared.metrics.clone());
    shared.strategy.run(&ctx, &mut |sample| handoff.push(sample));
    debug!(pipeline = %shared.name, "acquisition loop exited");
    // handoff 在此 drop，处理线程随后看到 Disconnected
}

fn processing_loop(
    shared: &Shared,
    token: &CancelToken,
    handoff: Receiver<RawSample>,
    emitter: &Emitter<ProcessedSample>,
) {
    let mut stage: Box<dyn ShapingStage> = match shared.backpressure {
        Some(bp) => bp.create_stage(),
        None => Box::new(PassThrough),
    };
    let mut chain = ProcessorChain::from_specs(&shared.processors, Instant::now());
    let mut shaped = Vec::new();
    let mut processed = Vec::new();

    loop {
        if token.is_cancelled() {
            break;
        }

        let now = Instant::now();
        let deadline = [stage.next_deadline(), chain.next_deadline()]
            .into_iter()
            .flatten()
            .fold(now + PROCESSING_MAX_WAIT, Instant::min);

        match handoff.recv_deadline(deadline) {
            Ok(sample) => stage.on_arrival(sample, Instant::now(), &mut shaped),
            Err(RecvTimeoutError::Timeout) => {},
            Err(RecvTimeoutError::Disconnected) => break,
        }

        let now = Instant::now();
        stage.on_tick(now, &mut shaped);
        PipelineMetrics::add(&shared.metrics.shaping_dropped, stage.take_dropped());

        let mut report = ChainReport::default();
        for raw in shaped.drain(..) {
            report += chain.process(Arc::new(raw), now, &mut processed);
        }
        report += chain.on_tick(now, &mut processed);
        PipelineMetrics::add(&shared.metrics.samples_rejected, report.rejected);

        if token.is_cancelled() {
            break;
        }

        let count = processed.len() as u64;
        let faults_before = emitter.callback_faults();
        for sample in processed.drain(..) {
            let delivered = emitter.emit(sample);
            trace!(pipeline = %shared.name, delivered, "sample emitted");
        }
        let faults = emitter.callback_faults() - faults_before;
        shared.record(count, report.errors + faults);
    }

    debug!(pipeline = %shared.name, "processing loop exited");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::acquisition::FixedRate;
    use station_hal::MockAdapter;
    use std::thread;

    fn pipeline(mock: Arc<MockAdapter>) -> Pipeline {
        Pipeline::builder()
            .adapter(mock)
            .strategy(FixedRate::new(200.0).unwrap())
            .processor(ProcessorSpec::Validation)
            .build()
            .unwrap()
    }

    fn valid(i: u64) -> RawSample {
        RawSample::new(i as i64 + 1, &[i as f64], &[])
    }

    #[test]
    fn test_stats_duration_and_throughput() {
        let start = Instant::now();
        let stats = PipelineStats {
            start_time: Some(start),
            end_time: Some(start + Duration::from_secs(2)),
            processed_count: 100,
            error_count: 0,
        };
        assert_eq!(stats.duration(), Duration::from_secs(2));
        assert_eq!(stats.throughput(), 50.0);
        assert_eq!(PipelineStats::default().throughput(), 0.0);
    }

    #[test]
    fn test_config_validate() {
        assert!(PipelineConfig::default().validate().is_ok());
        let config = PipelineConfig {
            handoff_capacity: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_start_stop_idempotent() {
        let mock = Arc::new(MockAdapter::generating("c1", valid));
        let pipeline = pipeline(mock);

        pipeline.stop();
        assert!(pipeline.stats().end_time.is_none());

        pipeline.start();
        pipeline.start();
        assert!(pipeline.is_running());
        assert_eq!(pipeline.stream().subscriber_count(), 1);

        thread::sleep(Duration::from_millis(50));
        pipeline.stop();
        pipeline.stop();
        assert!(!pipeline.is_running());
        assert!(!pipeline.is_acquiring());

        let stats = pipeline.stats();
        assert!(stats.end_time.is_some());
        assert!(stats.processed_count > 0);
        assert!(pipeline.latest().is_some());
    }

    #[test]
    fn test_restart_resets_stats() {
        let mock = Arc::new(MockAdapter::generating("c1", valid));
        let pipeline = pipeline(mock);

        pipeline.start();
        thread::sleep(Duration::from_millis(30));
        pipeline.stop();
        assert!(pipeline.stats().processed_count > 0);

        pipeline.start();
        let stats = pipeline.stats();
        assert!(stats.start_time.is_some());
        assert!(stats.end_time.is_none());
        assert!(pipeline.is_acquiring());
        pipeline.stop();
        assert_eq!(pipeline.metrics().snapshot().activations, 2);
    }

    #[test]
    fn test_subscriber_receives_processed_samples() {
        let mock = Arc::new(MockAdapter::generating("c1", valid));
        let pipeline = pipeline(mock);

        let sub = pipeline.subscribe();
        let first = sub.recv_timeout(Duration::from_secs(1)).unwrap();
        assert!(first.quality.is_good());
        assert!(pipeline.is_acquiring());

        drop(sub);
        assert!(!pipeline.is_acquiring());
    }

    #[test]
    fn test_processing_exit_stops_acquisition() {
        let mock = Arc::new(MockAdapter::generating("c1", valid));
        let pipeline = pipeline(mock.clone());
        let shared = pipeline.shared.clone();
        let token = CancelToken::new();
        let (handoff_tx, _handoff_rx) = handoff(8, shared.metrics.clone());

        let acquisition = {
            let shared = shared.clone();
            let token = token.clone();
            thread::spawn(move || acquisition_loop(&shared, token, handoff_tx))
        };
        let processing = {
            let token = token.clone();
            thread::spawn(move || {
                let _guard = CancelOnDrop(token);
                thread::sleep(Duration::from_millis(30));
                panic!("processing worker failure");
            })
        };

        let activation = WorkerActivation {
            name: "c1".to_string(),
            token: token.clone(),
            join_timeout: DEFAULT_JOIN_TIMEOUT,
            acquisition: Some(acquisition),
            processing: Some(processing),
        };

        let deadline = Instant::now() + Duration::from_secs(1);
        while !token.is_cancelled() && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
        assert!(activation.is_finished());

        // 采集线程在下一个睡眠切片内退出
        thread::sleep(Duration::from_millis(30));
        let reads = mock.read_count();
        assert!(reads > 0);
        thread::sleep(Duration::from_millis(50));
        assert_eq!(mock.read_count(), reads);

        Box::new(activation).shutdown();
    }
}
