//! Mock 适配器（无硬件依赖）
//!
//! 用于测试和仿真：
//! - 脚本化读取队列（样本 / 失败）
//! - 脚本耗尽后按 [`ExhaustedBehavior`] 处理（默认返回超时）
//! - `read_count()` 探针：统计 `read_data()` 调用次数
//! - 记录收到的命令

use crate::{AdapterError, ConnectionStatus, ControlMode, HardwareAdapter, ValveState};
use parking_lot::Mutex;
use station_protocol::RawSample;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tracing::trace;

/// 样本生成函数（参数为读取序号，从 0 开始）
pub type SampleGenerator = Box<dyn Fn(u64) -> RawSample + Send + Sync>;

/// 脚本耗尽后的行为
pub enum ExhaustedBehavior {
    /// 返回 `AdapterError::Timeout`
    Timeout,
    /// 调用生成函数
    Generate(SampleGenerator),
}

/// 单次脚本化读取
#[derive(Debug)]
pub enum MockRead {
    Sample(RawSample),
    Failure(AdapterError),
}

/// Mock 收到的命令
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MockCommand {
    ControlMode(ControlMode),
    Valve(ValveState),
    EmergencyStop,
}

/// Mock 硬件适配器
pub struct MockAdapter {
    id: String,
    script: Mutex<VecDeque<MockRead>>,
    exhausted: ExhaustedBehavior,
    read_count: AtomicU64,
    status: Mutex<ConnectionStatus>,
    commands: Mutex<Vec<MockCommand>>,
    fail_connect: AtomicBool,
}

impl MockAdapter {
    /// 创建空脚本的 Mock（脚本耗尽后返回超时）
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            script: Mutex::new(VecDeque::new()),
            exhausted: ExhaustedBehavior::Timeout,
            read_count: AtomicU64::new(0),
            status: Mutex::new(ConnectionStatus::Disconnected),
            commands: Mutex::new(Vec::new()),
            fail_connect: AtomicBool::new(false),
        }
    }

    /// 创建由生成函数驱动的 Mock（用于仿真）
    pub fn generating(
        id: impl Into<String>,
        generator: impl Fn(u64) -> RawSample + Send + Sync + 'static,
    ) -> Self {
        Self {
            exhausted: ExhaustedBehavior::Generate(Box::new(generator)),
            ..Self::new(id)
        }
    }

    /// 追加一个脚本化样本
    pub fn push_sample(&self, sample: RawSample) {
        self.script.lock().push_back(MockRead::Sample(sample));
    }

    /// 追加多个脚本化样本
    pub fn push_samples(&self, samples: impl IntoIterator<Item = RawSample>) {
        let mut script = self.script.lock();
        script.extend(samples.into_iter().map(MockRead::Sample));
    }

    /// 追加一次读取失败
    pub fn push_failure(&self, error: AdapterError) {
        self.script.lock().push_back(MockRead::Failure(error));
    }

    /// 剩余脚本长度
    pub fn pending(&self) -> usize {
        self.script.lock().len()
    }

    /// `read_data()` 调用次数
    pub fn read_count(&self) -> u64 {
        self.read_count.load(Ordering::Relaxed)
    }

    /// 直接设置连接状态（模拟掉线等）
    pub fn set_status(&self, status: ConnectionStatus) {
        *self.status.lock() = status;
    }

    /// 下一次 `connect()` 是否失败
    pub fn set_fail_connect(&self, fail: bool) {
        self.fail_connect.store(fail, Ordering::Relaxed);
    }

    /// 已收到的命令
    pub fn commands(&self) -> Vec<MockCommand> {
        self.commands.lock().clone()
    }
}

impl HardwareAdapter for MockAdapter {
    fn id(&self) -> &str {
        &self.id
    }

    fn connect(&self) -> Result<(), AdapterError> {
        if self.fail_connect.load(Ordering::Relaxed) {
            *self.status.lock() = ConnectionStatus::Faulted;
            return Err(AdapterError::Device("mock connect failure".to_string()));
        }
        *self.status.lock() = ConnectionStatus::Connected;
        Ok(())
    }

    fn disconnect(&self) -> Result<(), AdapterError> {
        *self.status.lock() = ConnectionStatus::Disconnected;
        Ok(())
    }

    fn read_data(&self) -> Result<RawSample, AdapterError> {
        let index = self.read_count.fetch_add(1, Ordering::Relaxed);
        trace!(adapter = %self.id, index, "mock read");

        if let Some(read) = self.script.lock().pop_front() {
            return match read {
                MockRead::Sample(sample) => Ok(sample),
                MockRead::Failure(e) => Err(e),
            };
        }

        match &self.exhausted {
            ExhaustedBehavior::Timeout => Err(AdapterError::Timeout),
            ExhaustedBehavior::Generate(generator) => Ok(generator(index)),
        }
    }

    fn status(&self) -> ConnectionStatus {
        *self.status.lock()
    }

    fn set_control_mode(&self, mode: ControlMode) -> Result<(), AdapterError> {
        self.commands.lock().push(MockCommand::ControlMode(mode));
        Ok(())
    }

    fn set_valve_state(&self, state: ValveState) -> Result<(), AdapterError> {
        self.commands.lock().push(MockCommand::Valve(state));
        Ok(())
    }

    fn emergency_stop(&self) -> Result<(), AdapterError> {
        self.commands.lock().push(MockCommand::EmergencyStop);
        Ok(())
    }
}
