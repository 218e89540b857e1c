//! Pipeline 性能指标
//!
//! 原子计数器，可在任何线程读取，不引入锁竞争。
//! 与 [`PipelineStats`](crate::PipelineStats) 互补：Stats 是对外的运行统计，
//! Metrics 记录被吸收的各类异常事件。

use std::sync::atomic::{AtomicU64, Ordering};

/// Pipeline 实时指标
#[derive(Debug, Default)]
pub struct PipelineMetrics {
    /// `read_data()` 调用总次数
    pub reads_total: AtomicU64,

    /// 读取失败次数（已降级为哨兵样本）
    pub read_failures: AtomicU64,

    /// Validation 判为 Bad 而丢弃的样本数
    pub samples_rejected: AtomicU64,

    /// 交接队列溢出时被淘汰的最旧样本数
    ///
    /// 如果这个值快速增长，说明处理线程跟不上采集速率。
    pub handoff_evictions: AtomicU64,

    /// 整形阶段（Sampling / Throttle）丢弃的样本数
    pub shaping_dropped: AtomicU64,

    /// 采集线程启动次数
    pub activations: AtomicU64,
}

impl PipelineMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// 获取指标快照
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            reads_total: self.reads_total.load(Ordering::Relaxed),
            read_failures: self.read_failures.load(Ordering::Relaxed),
            samples_rejected: self.samples_rejected.load(Ordering::Relaxed),
            handoff_evictions: self.handoff_evictions.load(Ordering::Relaxed),
            shaping_dropped: self.shaping_dropped.load(Ordering::Relaxed),
            activations: self.activations.load(Ordering::Relaxed),
        }
    }

    /// 重置所有计数器
    pub fn reset(&self) {
        self.reads_total.store(0, Ordering::Relaxed);
        self.read_failures.store(0, Ordering::Relaxed);
        self.samples_rejected.store(0, Ordering::Relaxed);
        self.handoff_evictions.store(0, Ordering::Relaxed);
        self.shaping_dropped.store(0, Ordering::Relaxed);
        self.activations.store(0, Ordering::Relaxed);
    }

    pub(crate) fn add(counter: &AtomicU64, n: u64) {
        if n > 0 {
            counter.fetch_add(n, Ordering::Relaxed);
        }
    }
}

/// 指标快照
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MetricsSnapshot {
    pub reads_total: u64,
    pub read_failures: u64,
    pub samples_rejected: u64,
    pub handoff_evictions: u64,
    pub shaping_dropped: u64,
    pub activations: u64,
}

impl MetricsSnapshot {
    /// 读取失败率（百分比），无读取时返回 0.0
    pub fn read_failure_rate(&self) -> f64 {
        if self.reads_total == 0 {
            return 0.0;
        }
        (self.read_failures as f64 / self.reads_total as f64) * 100.0
    }
}
