//! 共享内存发布器
//!
//! 订阅伪通道，每次发射写入一条 `{channel_id, sequence_index, value}` 记录。
//! 写完即走：没有回执，也不会反向影响采集链。

use crate::error::ClientError;
use crate::pseudo::PseudoChannel;
use crossbeam_channel::{Sender, bounded, select};
use parking_lot::Mutex;
use station_driver::{SharedStream, Subscription};
use station_protocol::DataPoint;
use station_tools::{ShmRecord, ShmRing};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread::{self, JoinHandle};
use tracing::{debug, error, info, trace};

struct PublishWorker {
    name: String,
    stop_tx: Option<Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

/// 共享内存发布器
pub struct ShmPublisher {
    ring: Arc<Mutex<ShmRing>>,
    published: Arc<AtomicU64>,
    workers: Mutex<Vec<PublishWorker>>,
}

impl std::fmt::Debug for ShmPublisher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShmPublisher")
            .field("published", &self.published())
            .field("channels", &self.workers.lock().len())
            .finish()
    }
}

impl ShmPublisher {
    pub fn new(ring: ShmRing) -> Self {
        Self {
            ring: Arc::new(Mutex::new(ring)),
            published: Arc::new(AtomicU64::new(0)),
            workers: Mutex::new(Vec::new()),
        }
    }

    /// 发布一个伪通道
    ///
    /// 订阅会激活该通道背后的采集管线。
    pub fn attach(&self, channel_id: u32, channel: &PseudoChannel) -> Result<(), ClientError> {
        let stream = channel.stream()?;
        self.attach_stream(channel_id, &stream)
    }

    /// 发布任意数据点流
    pub fn attach_stream(&self, channel_id: u32, stream: &SharedStream<DataPoint>) -> Result<(), ClientError> {
        let subscription = stream.subscribe();
        let (stop_tx, stop_rx) = bounded::<()>(0);
        let ring = self.ring.clone();
        let published = self.published.clone();
        let name = format!("shm-{}", channel_id);

        let handle = thread::Builder::new()
            .name(name.clone())
            .spawn(move || publish_loop(channel_id, subscription, stop_rx, ring, published))
            .map_err(|e| station_driver::DriverError::Worker(e.to_string()))?;

        info!(channel_id, stream = stream.name(), "shm publisher attached");
        self.workers.lock().push(PublishWorker {
            name,
            stop_tx: Some(stop_tx),
            handle: Some(handle),
        });
        Ok(())
    }

    /// 累计写入记录数
    pub fn published(&self) -> u64 {
        self.published.load(Ordering::Relaxed)
    }

    /// 读取最近的至多 `count` 条记录
    pub fn read_latest(&self, count: usize) -> Vec<ShmRecord> {
        self.ring.lock().read_latest(count)
    }

    /// 停止全部发布线程（幂等）
    pub fn shutdown(&self) {
        let workers: Vec<PublishWorker> = self.workers.lock().drain(..).collect();
        for mut worker in workers {
            drop(worker.stop_tx.take());
            if let Some(handle) = worker.handle.take() {
                if handle.join().is_err() {
                    error!(worker = %worker.name, "shm publish worker panicked");
                }
            }
        }
        if let Err(e) = self.ring.lock().flush() {
            error!("shm flush failed: {}", e);
        }
    }
}

impl Drop for ShmPublisher {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn publish_loop(
    channel_id: u32,
    subscription: Subscription<DataPoint>,
    stop_rx: crossbeam_channel::Receiver<()>,
    ring: Arc<Mutex<ShmRing>>,
    published: Arc<AtomicU64>,
) {
    let mut sequence = 0u64;
    loop {
        select! {
            recv(subscription.receiver()) -> msg => match msg {
                Ok(point) => {
                    ring.lock().push(ShmRecord::new(channel_id, sequence, point.value));
                    trace!(channel_id, sequence, "point published");
                    sequence += 1;
                    published.fetch_add(1, Ordering::Relaxed);
                },
                Err(_) => break,
            },
            recv(stop_rx) -> _ => break,
        }
    }
    debug!(channel_id, records = sequence, "shm publish worker exiting");
}
