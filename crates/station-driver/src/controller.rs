//! 控制器
//!
//! [`Controller`] 把一个硬件适配器和它的采集 [`Pipeline`] 组合成
//! [`StationController`] 边界：数据流、连接状态流和命令透传。

use crate::error::DriverError;
use crate::pipeline::Pipeline;
use crate::stream::{ForwardActivation, SharedStream, StreamConfig};
use crossbeam_channel::RecvTimeoutError;
use station_hal::{AdapterError, ConnectionStatus, ControlMode, HardwareAdapter, ValveState};
use station_protocol::ProcessedSample;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::{debug, info, warn};

/// 默认连接状态轮询间隔
pub const DEFAULT_STATUS_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// 控制器边界
///
/// 注册表、信号管理器只依赖此 trait，测试时可替换实现。
pub trait StationController: Send + Sync {
    fn id(&self) -> &str;

    /// 连接硬件（Disconnected → Connecting → Connected / Faulted）
    fn connect(&self) -> Result<(), DriverError>;

    fn disconnect(&self) -> Result<(), DriverError>;

    /// 当前连接状态
    fn connection_status(&self) -> ConnectionStatus;

    /// 逐样本的热数据流
    fn data_stream(&self) -> SharedStream<ProcessedSample>;

    /// 连接状态热流（新订阅者立即收到当前状态，之后仅在变化时发出）
    fn status_stream(&self) -> SharedStream<ConnectionStatus>;

    fn set_control_mode(&self, mode: ControlMode) -> Result<(), DriverError>;

    fn set_valve_state(&self, state: ValveState) -> Result<(), DriverError>;

    /// 急停：无论连接状态如何都会下发到适配器
    fn emergency_stop(&self) -> Result<(), DriverError>;
}

/// 适配器连接状态（叠加 `connect()` 期间的 Connecting）
struct Link {
    adapter: Arc<dyn HardwareAdapter>,
    connecting: AtomicBool,
}

impl Link {
    fn status(&self) -> ConnectionStatus {
        if self.connecting.load(Ordering::Acquire) {
            ConnectionStatus::Connecting
        } else {
            self.adapter.status()
        }
    }
}

/// 单适配器控制器
pub struct Controller {
    id: String,
    link: Arc<Link>,
    pipeline: Pipeline,
    status_stream: SharedStream<ConnectionStatus>,
}

impl Controller {
    pub fn new(pipeline: Pipeline) -> Self {
        Self::with_status_poll_interval(pipeline, DEFAULT_STATUS_POLL_INTERVAL)
    }

    pub fn with_status_poll_interval(pipeline: Pipeline, poll_interval: Duration) -> Self {
        let adapter = pipeline.adapter().clone();
        let id = adapter.id().to_string();
        let link = Arc::new(Link {
            adapter,
            connecting: AtomicBool::new(false),
        });

        let poll_link = link.clone();
        let thread_name = format!("status-{}", id);
        let status_stream = SharedStream::new(
            format!("{}/status", id),
            StreamConfig::replaying(),
            move |emitter| {
                let link = poll_link.clone();
                ForwardActivation::spawn(&thread_name, move |stop_rx| {
                    let mut last = None;
                    loop {
                        let status = link.status();
                        if last != Some(status) {
                            last = Some(status);
                            emitter.emit(status);
                        }
                        match stop_rx.recv_timeout(poll_interval) {
                            Err(RecvTimeoutError::Timeout) => {},
                            _ => break,
                        }
                    }
                })
            },
        );

        Self {
            id,
            link,
            pipeline,
            status_stream,
        }
    }

    pub fn pipeline(&self) -> &Pipeline {
        &self.pipeline
    }

    pub fn adapter(&self) -> &Arc<dyn HardwareAdapter> {
        &self.link.adapter
    }

    fn ensure_connected(&self) -> Result<(), DriverError> {
        if self.link.status().is_connected() {
            Ok(())
        } else {
            Err(AdapterError::NotConnected.into())
        }
    }
}

impl StationController for Controller {
    fn id(&self) -> &str {
        &self.id
    }

    fn connect(&self) -> Result<(), DriverError> {
        self.link.connecting.store(true, Ordering::Release);
        let result = self.link.adapter.connect();
        self.link.connecting.store(false, Ordering::Release);

        match &result {
            Ok(()) => info!(controller = %self.id, "controller connected"),
            Err(e) => warn!(controller = %self.id, "controller connect failed: {}", e),
        }
        result.map_err(Into::into)
    }

    fn disconnect(&self) -> Result<(), DriverError> {
        self.pipeline.stop();
        self.link.adapter.disconnect()?;
        info!(controller = %self.id, "controller disconnected");
        Ok(())
    }

    fn connection_status(&self) -> ConnectionStatus {
        self.link.status()
    }

    fn data_stream(&self) -> SharedStream<ProcessedSample> {
        self.pipeline.stream()
    }

    fn status_stream(&self) -> SharedStream<ConnectionStatus> {
        self.status_stream.clone()
    }

    fn set_control_mode(&self, mode: ControlMode) -> Result<(), DriverError> {
        self.ensure_connected()?;
        debug!(controller = %self.id, ?mode, "set control mode");
        Ok(self.link.adapter.set_control_mode(mode)?)
    }

    fn set_valve_state(&self, state: ValveState) -> Result<(), DriverError> {
        self.ensure_connected()?;
        debug!(controller = %self.id, ?state, "set valve state");
        Ok(self.link.adapter.set_valve_state(state)?)
    }

    fn emergency_stop(&self) -> Result<(), DriverError> {
        warn!(controller = %self.id, "emergency stop requested");
        Ok(self.link.adapter.emergency_stop()?)
    }
}
