//! 热共享流（Hot Shared Stream）
//!
//! 多个消费者共享同一个底层生产者，生产者的生命周期由订阅者计数驱动：
//!
//! - **第一个订阅者**：调用激活函数，启动上游（采集线程 / 转发线程）
//! - **最后一个订阅者退订**：关闭并 join 上游
//! - **零订阅者 ⇒ 零硬件轮询**
//!
//! # 订阅方式
//!
//! - [`SharedStream::subscribe`]: 有界 Channel（队列满时丢弃最新元素并计数）
//! - [`SharedStream::subscribe_callback`]: 回调（在生产者线程上执行，必须非阻塞）
//!
//! 回调中的 panic 被隔离：该次投递计为故障（[`SharedStream::callback_faults`]），
//! 其他订阅者照常收到元素。
//!
//! # 组合
//!
//! `map` / `filter_map` / `combine_latest` 返回新的热流；
//! 其激活会订阅上游，因此引用计数沿整个流图传播。
//!
//! # 重放
//!
//! `StreamConfig::replay_latest` 为真时，新订阅者立即收到最近一个元素
//! （适用于连接状态这类"当前值"语义的流）。流失活时清空。
//!
//! # 线程安全
//!
//! - 订阅者列表使用 `ArcSwap`，发射路径无锁
//! - 订阅/退订/激活/关闭在同一把 `parking_lot::Mutex` 下串行执行
//! - **禁止**在回调中订阅或退订同一个流（会在关闭时死锁）

use crate::worker::{DEFAULT_JOIN_TIMEOUT, join_logged, spawn_named};
use arc_swap::{ArcSwap, ArcSwapOption};
use crossbeam_channel::{Receiver, RecvTimeoutError, Select, Sender, TryRecvError, TrySendError, bounded};
use parking_lot::Mutex;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::{debug, trace, warn};

/// 默认订阅者队列容量
pub const DEFAULT_SUBSCRIBER_CAPACITY: usize = 1024;

/// 流配置
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamConfig {
    /// Channel 订阅者的队列容量
    pub subscriber_capacity: usize,
    /// 新订阅者是否立即收到最近一个元素
    pub replay_latest: bool,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            subscriber_capacity: DEFAULT_SUBSCRIBER_CAPACITY,
            replay_latest: false,
        }
    }
}

impl StreamConfig {
    /// 带重放的默认配置
    pub fn replaying() -> Self {
        Self {
            replay_latest: true,
            ..Self::default()
        }
    }
}

/// 流回调
///
/// 在生产者线程上执行，必须非阻塞（推荐 `try_send` 转交给其他线程）。
pub trait StreamCallback<T>: Send + Sync {
    fn on_next(&self, item: &T);
}

impl<T, F> StreamCallback<T> for F
where
    F: Fn(&T) + Send + Sync,
{
    fn on_next(&self, item: &T) {
        self(item)
    }
}

/// 激活句柄
///
/// 由激活函数返回，最后一个订阅者退订时调用 `shutdown`。
pub trait Activation: Send {
    /// 停止上游并等待其退出
    fn shutdown(self: Box<Self>);

    /// 上游是否已自行结束（如被取消令牌终止）
    ///
    /// 已结束的激活在下一次订阅时会被替换。
    fn is_finished(&self) -> bool {
        false
    }
}

type Activator<T> = dyn Fn(Emitter<T>) -> Box<dyn Activation> + Send + Sync;

enum Sink<T> {
    Channel {
        tx: Sender<T>,
        dropped: Arc<AtomicU64>,
    },
    Callback(Arc<dyn StreamCallback<T>>),
}

struct Subscriber<T> {
    id: u64,
    sink: Sink<T>,
}

type SubscriberList<T> = ArcSwap<Vec<Arc<Subscriber<T>>>>;

#[derive(Default)]
struct Lifecycle {
    count: usize,
    next_id: u64,
    activations: u64,
    activation: Option<Box<dyn Activation>>,
}

struct StreamInner<T> {
    name: String,
    config: StreamConfig,
    activator: Box<Activator<T>>,
    subscribers: Arc<SubscriberList<T>>,
    last: Arc<ArcSwapOption<T>>,
    /// 回调 panic 次数
    faults: Arc<AtomicU64>,
    lifecycle: Mutex<Lifecycle>,
}

impl<T> Sink<T> {
    /// 投递一个元素，返回是否送达
    fn deliver(&self, item: &T, faults: &AtomicU64) -> bool
    where
        T: Clone,
    {
        match self {
            Sink::Channel { tx, dropped } => match tx.try_send(item.clone()) {
                Ok(()) => true,
                Err(TrySendError::Full(_)) => {
                    dropped.fetch_add(1, Ordering::Relaxed);
                    false
                },
                // 订阅正在退订
                Err(TrySendError::Disconnected(_)) => false,
            },
            Sink::Callback(callback) => match catch_unwind(AssertUnwindSafe(|| callback.on_next(item))) {
                Ok(()) => true,
                Err(_) => {
                    faults.fetch_add(1, Ordering::Relaxed);
                    warn!("stream callback panicked, item skipped for this subscriber");
                    false
                },
            },
        }
    }
}

impl<T: Clone> StreamInner<T> {
    fn attach(&self, sink: Sink<T>) -> u64 {
        let mut life = self.lifecycle.lock();
        let id = life.next_id;
        life.next_id += 1;

        // 先加入订阅者列表，保证激活后的第一个元素不会丢失
        let subscriber = Arc::new(Subscriber { id, sink });
        let mut next: Vec<_> = self.subscribers.load().iter().cloned().collect();
        next.push(subscriber.clone());
        self.subscribers.store(Arc::new(next));
        life.count += 1;

        if self.config.replay_latest
            && let Some(latest) = self.last.load_full()
        {
            subscriber.sink.deliver(&latest, &self.faults);
        }

        if life.activation.as_ref().is_some_and(|a| a.is_finished())
            && let Some(stale) = life.activation.take()
        {
            debug!(stream = %self.name, "replacing finished activation");
            stale.shutdown();
        }

        if life.activation.is_none() {
            let emitter = Emitter {
                subscribers: self.subscribers.clone(),
                last: self.config.replay_latest.then(|| self.last.clone()),
                faults: self.faults.clone(),
            };
            life.activation = Some((self.activator)(emitter));
            life.activations += 1;
            debug!(stream = %self.name, subscribers = life.count, "stream activated");
        }

        id
    }
}

impl<T> StreamInner<T> {
    fn detach(&self, id: u64) {
        let mut life = self.lifecycle.lock();

        let current = self.subscribers.load_full();
        if !current.iter().any(|s| s.id == id) {
            return;
        }
        let next: Vec<_> = current.iter().filter(|s| s.id != id).cloned().collect();
        self.subscribers.store(Arc::new(next));
        life.count = life.count.saturating_sub(1);

        if life.count == 0
            && let Some(activation) = life.activation.take()
        {
            // 在锁内关闭：保证重新订阅时旧的上游已完全退出
            activation.shutdown();
            self.last.store(None);
            debug!(stream = %self.name, "stream deactivated");
        }
    }
}

/// 发射端
///
/// 交给激活函数，由生产者线程调用 `emit`。
pub struct Emitter<T> {
    subscribers: Arc<SubscriberList<T>>,
    /// 仅在重放模式下存在
    last: Option<Arc<ArcSwapOption<T>>>,
    faults: Arc<AtomicU64>,
}

impl<T> Clone for Emitter<T> {
    fn clone(&self) -> Self {
        Self {
            subscribers: self.subscribers.clone(),
            last: self.last.clone(),
            faults: self.faults.clone(),
        }
    }
}

impl<T: Clone> Emitter<T> {
    /// 向所有订阅者发射一个元素，返回成功投递的订阅者数量
    pub fn emit(&self, item: T) -> usize {
        if let Some(last) = &self.last {
            last.store(Some(Arc::new(item.clone())));
        }

        self.subscribers
            .load()
            .iter()
            .filter(|subscriber| subscriber.sink.deliver(&item, &self.faults))
            .count()
    }

    /// 累计回调 panic 次数（与所属流共享）
    pub fn callback_faults(&self) -> u64 {
        self.faults.load(Ordering::Relaxed)
    }

    /// 当前订阅者数量
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.load().len()
    }
}

/// 热共享流
///
/// 克隆只复制句柄，所有克隆共享同一个生产者。
pub struct SharedStream<T> {
    inner: Arc<StreamInner<T>>,
}

impl<T> Clone for SharedStream<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T> std::fmt::Debug for SharedStream<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedStream")
            .field("name", &self.inner.name)
            .field("subscribers", &self.subscriber_count())
            .finish()
    }
}

impl<T> SharedStream<T> {
    /// 流名称（用于日志）
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// 当前订阅者数量
    pub fn subscriber_count(&self) -> usize {
        self.inner.lifecycle.lock().count
    }

    /// 上游是否处于激活状态
    pub fn is_active(&self) -> bool {
        let life = self.inner.lifecycle.lock();
        life.activation.as_ref().is_some_and(|a| !a.is_finished())
    }

    /// 累计回调 panic 次数
    pub fn callback_faults(&self) -> u64 {
        self.inner.faults.load(Ordering::Relaxed)
    }

    /// 累计激活次数
    pub fn activation_count(&self) -> u64 {
        self.inner.lifecycle.lock().activations
    }

    /// 两个句柄是否指向同一个流
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl<T: Clone + Send + Sync + 'static> SharedStream<T> {
    /// 创建热流
    ///
    /// `activator` 在第一个订阅者到来时调用，返回的 [`Activation`]
    /// 在最后一个订阅者离开时被关闭。
    pub fn new<F>(name: impl Into<String>, config: StreamConfig, activator: F) -> Self
    where
        F: Fn(Emitter<T>) -> Box<dyn Activation> + Send + Sync + 'static,
    {
        Self {
            inner: Arc::new(StreamInner {
                name: name.into(),
                config,
                activator: Box::new(activator),
                subscribers: Arc::new(ArcSwap::from_pointee(Vec::new())),
                last: Arc::new(ArcSwapOption::empty()),
                faults: Arc::new(AtomicU64::new(0)),
                lifecycle: Mutex::new(Lifecycle::default()),
            }),
        }
    }

    /// 以回调方式订阅
    pub fn subscribe_callback(&self, callback: Arc<dyn StreamCallback<T>>) -> CallbackSubscription<T> {
        let id = self.inner.attach(Sink::Callback(callback));
        CallbackSubscription {
            stream: self.inner.clone(),
            id,
        }
    }

    /// 以有界 Channel 方式订阅
    pub fn subscribe(&self) -> Subscription<T> {
        let (tx, rx) = bounded(self.inner.config.subscriber_capacity.max(1));
        let dropped = Arc::new(AtomicU64::new(0));
        let id = self.inner.attach(Sink::Channel {
            tx,
            dropped: dropped.clone(),
        });
        Subscription {
            stream: self.inner.clone(),
            id,
            rx,
            dropped,
        }
    }

    /// 派生映射流
    pub fn map<U, F>(&self, name: impl Into<String>, f: F) -> SharedStream<U>
    where
        U: Clone + Send + Sync + 'static,
        F: Fn(T) -> U + Send + Sync + 'static,
    {
        self.filter_map(name, move |item| Some(f(item)))
    }

    /// 派生过滤映射流（`None` 的元素被丢弃）
    pub fn filter_map<U, F>(&self, name: impl Into<String>, f: F) -> SharedStream<U>
    where
        U: Clone + Send + Sync + 'static,
        F: Fn(T) -> Option<U> + Send + Sync + 'static,
    {
        let upstream = self.clone();
        let f = Arc::new(f);
        let name = name.into();
        let thread_name = format!("fwd-{}", name);
        SharedStream::new(name, self.inner.config, move |emitter: Emitter<U>| {
            let subscription = upstream.subscribe();
            let f = f.clone();
            ForwardActivation::spawn(&thread_name, move |stop_rx| {
                forward_loop(subscription, stop_rx, |item| {
                    if let Some(mapped) = f(item) {
                        emitter.emit(mapped);
                    }
                })
            })
        })
    }

    /// 最新值联合
    ///
    /// 任一输入发射时，输出一个长度为 N 的数组，包含每个输入的最新值。
    /// 所有输入至少发射过一次之后才开始输出。
    pub fn combine_latest(
        name: impl Into<String>,
        streams: Vec<SharedStream<T>>,
        config: StreamConfig,
    ) -> SharedStream<Vec<T>> {
        let name = name.into();
        let thread_name = format!("join-{}", name);
        SharedStream::new(name, config, move |emitter: Emitter<Vec<T>>| {
            let subscriptions: Vec<Subscription<T>> = streams.iter().map(|s| s.subscribe()).collect();
            ForwardActivation::spawn(&thread_name, move |stop_rx| {
                combine_loop(subscriptions, stop_rx, emitter)
            })
        })
    }
}

fn forward_loop<T>(upstream: Subscription<T>, stop_rx: Receiver<()>, mut on_item: impl FnMut(T)) {
    loop {
        crossbeam_channel::select! {
            recv(upstream.rx) -> msg => match msg {
                Ok(item) => on_item(item),
                Err(_) => break,
            },
            recv(stop_rx) -> _ => break,
        }
    }
    trace!("forwarder exiting");
    // upstream 在此 drop，触发上游退订
}

fn combine_loop<T: Clone>(upstreams: Vec<Subscription<T>>, stop_rx: Receiver<()>, emitter: Emitter<Vec<T>>) {
    let mut latest: Vec<Option<T>> = vec![None; upstreams.len()];
    let mut select = Select::new();
    for upstream in &upstreams {
        select.recv(&upstream.rx);
    }
    let stop_index = select.recv(&stop_rx);

    loop {
        let op = select.select();
        let index = op.index();
        if index == stop_index {
            let _ = op.recv(&stop_rx);
            break;
        }

        match op.recv(&upstreams[index].rx) {
            Ok(item) => {
                latest[index] = Some(item);
                if latest.iter().all(Option::is_some) {
                    emitter.emit(latest.iter().flatten().cloned().collect());
                }
            },
            Err(_) => break,
        }
    }
    trace!("combine_latest exiting");
}

/// 转发线程激活句柄
///
/// 关闭时 drop 停止信号发送端，转发线程的 `select!` 立即返回。
pub(crate) struct ForwardActivation {
    name: String,
    stop_tx: Option<Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl ForwardActivation {
    pub(crate) fn spawn<F>(name: &str, body: F) -> Box<dyn Activation>
    where
        F: FnOnce(Receiver<()>) + Send + 'static,
    {
        let (stop_tx, stop_rx) = bounded::<()>(0);
        let handle = spawn_named(name, move || body(stop_rx));
        Box::new(Self {
            name: name.to_string(),
            stop_tx: Some(stop_tx),
            handle,
        })
    }
}

impl Activation for ForwardActivation {
    fn shutdown(mut self: Box<Self>) {
        drop(self.stop_tx.take());
        join_logged(self.handle.take(), &self.name, DEFAULT_JOIN_TIMEOUT);
    }

    fn is_finished(&self) -> bool {
        self.handle.as_ref().is_none_or(JoinHandle::is_finished)
    }
}

/// Channel 订阅
///
/// drop 时自动退订；最后一个订阅退订会关闭上游。
pub struct Subscription<T> {
    stream: Arc<StreamInner<T>>,
    id: u64,
    rx: Receiver<T>,
    dropped: Arc<AtomicU64>,
}

impl<T> Subscription<T> {
    /// 阻塞接收
    pub fn recv(&self) -> Option<T> {
        self.rx.recv().ok()
    }

    /// 带超时接收
    pub fn recv_timeout(&self, timeout: Duration) -> Result<T, RecvTimeoutError> {
        self.rx.recv_timeout(timeout)
    }

    /// 非阻塞接收
    pub fn try_recv(&self) -> Result<T, TryRecvError> {
        self.rx.try_recv()
    }

    /// 取出当前队列中的所有元素
    pub fn drain(&self) -> Vec<T> {
        self.rx.try_iter().collect()
    }

    /// 底层接收端（用于 `select!`）
    pub fn receiver(&self) -> &Receiver<T> {
        &self.rx
    }

    /// 因队列满被丢弃的元素数量
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// 所属流名称
    pub fn stream_name(&self) -> &str {
        &self.stream.name
    }
}

impl<T> Drop for Subscription<T> {
    fn drop(&mut self) {
        self.stream.detach(self.id);
    }
}

/// 回调订阅（drop 时退订）
pub struct CallbackSubscription<T> {
    stream: Arc<StreamInner<T>>,
    id: u64,
}

impl<T> Drop for CallbackSubscription<T> {
    fn drop(&mut self) {
        self.stream.detach(self.id);
    }
}
