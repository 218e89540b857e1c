//! 后台线程工具
//!
//! - [`CancelToken`]: 协作式取消令牌（可派生子令牌）
//! - `CancelOnDrop`: 线程退出时取消令牌
//! - [`JoinTimeout`]: 带超时的线程 join

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{JoinHandle, spawn};
use std::time::Duration;
use tracing::error;

/// 默认 join 超时
pub const DEFAULT_JOIN_TIMEOUT: Duration = Duration::from_secs(2);

struct CancelInner {
    cancelled: AtomicBool,
    parent: Option<CancelToken>,
}

/// 协作式取消令牌
///
/// 采集循环在两次 tick 之间轮询 `is_cancelled()`。
/// 子令牌在自身或任一祖先被取消时视为已取消。
#[derive(Clone)]
pub struct CancelToken {
    inner: Arc<CancelInner>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(CancelInner {
                cancelled: AtomicBool::new(false),
                parent: None,
            }),
        }
    }

    /// 派生子令牌：取消子令牌不影响父令牌
    pub fn child(&self) -> Self {
        Self {
            inner: Arc::new(CancelInner {
                cancelled: AtomicBool::new(false),
                parent: Some(self.clone()),
            }),
        }
    }

    pub fn cancel(&self) {
        // Release: 取消前的写入对看到 true 的线程可见
        self.inner.cancelled.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::Acquire)
            || self.inner.parent.as_ref().is_some_and(CancelToken::is_cancelled)
    }
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for CancelToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CancelToken").field("cancelled", &self.is_cancelled()).finish()
    }
}

/// drop 时（包括 panic 展开）取消令牌
///
/// 放在工作线程栈上，保证该线程退出后同一激活的其他线程也会停下。
pub(crate) struct CancelOnDrop(pub(crate) CancelToken);

impl Drop for CancelOnDrop {
    fn drop(&mut self) {
        if std::thread::panicking() {
            error!("worker thread panicked, cancelling activation");
        }
        self.0.cancel();
    }
}

/// Extension trait for timeout-capable thread joins
pub(crate) trait JoinTimeout {
    fn join_timeout(self, timeout: Duration) -> std::thread::Result<()>;
}

impl<T: Send + 'static> JoinTimeout for JoinHandle<T> {
    fn join_timeout(self, timeout: Duration) -> std::thread::Result<()> {
        use std::sync::mpsc;

        let (tx, rx) = mpsc::channel();

        // watchdog 线程负责真正的 join
        spawn(move || {
            let result = self.join();
            let _ = tx.send(result);
        });

        match rx.recv_timeout(timeout) {
            Ok(join_result) => join_result.map(|_| ()),
            Err(mpsc::RecvTimeoutError::Timeout) => {
                // 超时：watchdog 线程继续运行，进程退出时由 OS 回收
                Err(Box::new(std::io::Error::new(
                    std::io::ErrorKind::TimedOut,
                    "Thread join timeout",
                )))
            },
            Err(mpsc::RecvTimeoutError::Disconnected) => Err(Box::new(std::io::Error::new(
                std::io::ErrorKind::ConnectionReset,
                "Thread panicked during join",
            ))),
        }
    }
}

/// 启动命名线程，失败时记录日志并返回 `None`
pub(crate) fn spawn_named<F>(name: &str, f: F) -> Option<JoinHandle<()>>
where
    F: FnOnce() + Send + 'static,
{
    match std::thread::Builder::new().name(name.to_string()).spawn(f) {
        Ok(handle) => Some(handle),
        Err(e) => {
            error!("Failed to spawn {} thread: {}", name, e);
            None
        },
    }
}

/// join 线程，失败时记录日志
pub(crate) fn join_logged(handle: Option<JoinHandle<()>>, name: &str, timeout: Duration) {
    if let Some(handle) = handle
        && let Err(_e) = handle.join_timeout(timeout)
    {
        error!(
            "{} thread panicked or failed to shut down within {:?}",
            name, timeout
        );
    }
}
