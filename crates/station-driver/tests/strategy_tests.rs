//! 采集策略与背压的集成 / 属性测试

use proptest::prelude::*;
use serial_test::serial;
use station_driver::*;
use station_hal::MockAdapter;
use station_protocol::RawSample;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

fn generating_mock() -> Arc<MockAdapter> {
    Arc::new(MockAdapter::generating("ctrl-1", |i| {
        RawSample::new(i as i64 + 1, &[1.0], &[]).with_load(i as f64)
    }))
}

#[test]
#[serial]
fn test_fixed_rate_100hz_ticks_every_10ms() {
    let mock = generating_mock();
    let token = CancelToken::new();
    let ctx = AcquisitionContext::new(mock, token.clone(), Arc::new(PipelineMetrics::new()));
    let strategy = FixedRate::new(100.0).unwrap();

    let mut ticks = Vec::new();
    strategy.run(&ctx, &mut |_| {
        ticks.push(Instant::now());
        if ticks.len() == 21 {
            token.cancel();
        }
    });

    assert_eq!(ticks.len(), 21);
    // 绝对锚点调度：20 个间隔总计约 200ms，误差不累积
    let total = ticks[20] - ticks[0];
    assert!(
        total >= Duration::from_millis(195) && total <= Duration::from_millis(215),
        "20 intervals took {:?}",
        total
    );
    let mean = total / 20;
    assert!(mean >= Duration::from_micros(9_500) && mean <= Duration::from_micros(10_750));
}

#[test]
#[serial]
fn test_adaptive_rate_observed_within_bounds() {
    let mock = generating_mock();
    let token = CancelToken::new();
    let ctx = AcquisitionContext::new(mock, token.clone(), Arc::new(PipelineMetrics::new()));

    // 负载随读取序号增长：第二次读取起越过阈值，逐级升速
    let strategy = Arc::new(AdaptiveRate::load_threshold(50.0, 800.0, Duration::from_millis(20), 0.5).unwrap());

    let runner = {
        let strategy = strategy.clone();
        thread::spawn(move || strategy.run(&ctx, &mut |_| {}))
    };

    let mut observed = Vec::new();
    for _ in 0..40 {
        observed.push(strategy.current_rate());
        thread::sleep(Duration::from_millis(5));
    }
    token.cancel();
    runner.join().unwrap();

    assert!(observed.iter().all(|r| (50.0..=800.0).contains(r)), "{:?}", observed);
    assert_eq!(strategy.current_rate(), 800.0);
}

#[test]
fn test_trigger_based_through_pipeline() {
    let mock = generating_mock();
    let (strategy, trigger) = TriggerBased::new(8);
    let pipeline = Pipeline::builder()
        .adapter(mock.clone())
        .strategy(strategy)
        .build()
        .unwrap();
    assert_eq!(pipeline.strategy().current_rate(), 0.0);

    let sub = pipeline.subscribe();
    thread::sleep(Duration::from_millis(30));
    assert_eq!(mock.read_count(), 0, "no trigger, no read");

    trigger.fire();
    sub.recv_timeout(Duration::from_secs(1)).unwrap();
    assert_eq!(mock.read_count(), 1);
}

proptest! {
    /// 任意谓词序列下，自适应频率始终落在 [min, max]
    #[test]
    fn adaptive_rate_stays_in_bounds(
        min in 1.0..100.0f64,
        span in 1.0..16.0f64,
        decisions in proptest::collection::vec(any::<bool>(), 1..64),
    ) {
        let max = min * span;
        let strategy = AdaptiveRate::new(min, max, Duration::from_secs(1), |_| true).unwrap();
        let mut rate = min;
        for high in decisions {
            rate = strategy.next_rate(rate, high);
            prop_assert!(rate >= min && rate <= max);
        }
    }

    /// Batching(n)：输入 M ≥ n 个元素，输出保持顺序，第 k 个输出等于第 k 个输入
    #[test]
    fn batching_preserves_order(size in 1usize..16, extra in 0usize..64) {
        let total = size + extra;
        let mut stage = Backpressure::Batching { size }.create_stage();
        let now = Instant::now();
        let mut out = Vec::new();
        for ts in 1..=total as i64 {
            stage.on_arrival(RawSample::new(ts, &[0.0], &[]), now, &mut out);
        }

        let complete = total - total % size;
        prop_assert_eq!(out.len(), complete);
        for (k, sample) in out.iter().enumerate() {
            prop_assert_eq!(sample.timestamp, k as i64 + 1);
        }
    }
}

#[test]
fn test_drop_oldest_sheds_pending_samples() {
    struct Slow;

    impl SampleProcessor for Slow {
        fn name(&self) -> &str {
            "slow"
        }

        fn process(
            &mut self,
            sample: station_protocol::ProcessedSample,
            _now: Instant,
            out: &mut Vec<station_protocol::ProcessedSample>,
        ) -> Result<(), ProcessError> {
            thread::sleep(Duration::from_millis(5));
            out.push(sample);
            Ok(())
        }
    }

    let mock = generating_mock();
    let pipeline = Pipeline::builder()
        .adapter(mock)
        .strategy(FixedRate::new(2000.0).unwrap())
        .backpressure(Backpressure::DropOldest { capacity: 4 })
        .processor(ProcessorSpec::custom(|| Box::new(Slow)))
        .build()
        .unwrap();

    let sub = pipeline.subscribe();
    thread::sleep(Duration::from_millis(150));
    drop(sub);

    let metrics = pipeline.metrics().snapshot();
    assert!(metrics.handoff_evictions > 0, "{:?}", metrics);
}
