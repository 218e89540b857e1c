//! 测试台配置文件
//!
//! 配置只在初始化时加载一次，之后视为不可变。文件格式为 TOML：
//!
//! ```toml
//! name = "bench-a"
//!
//! [[controllers]]
//! id = "ctrl-1"
//! acquisition = { kind = "fixed", rate_hz = 100.0 }
//! backpressure = { kind = "batching", size = 4 }
//! processors = [{ kind = "validation" }, { kind = "transform" }]
//!
//! [[signals]]
//! id = "LOAD"
//! controller_id = "ctrl-1"
//! channel_index = 0
//! unit = "kN"
//!
//! [[pseudo_channels]]
//! id = "LOAD_AVG"
//! signal_ids = ["LOAD"]
//!
//! [publisher]
//! path = "/dev/shm/station"
//! capacity = 4096
//! ```

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use station_protocol::{MIN_ACQUISITION_RATE_HZ, PseudoChannelConfiguration, SignalConfiguration};
use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

/// 共享内存环形缓冲区默认容量（记录数）
pub const DEFAULT_PUBLISHER_CAPACITY: usize = 4096;

/// 外部触发队列默认容量
pub const DEFAULT_TRIGGER_CAPACITY: usize = 16;

fn default_station_name() -> String {
    "station".to_string()
}

fn default_publisher_capacity() -> usize {
    DEFAULT_PUBLISHER_CAPACITY
}

fn default_trigger_capacity() -> usize {
    DEFAULT_TRIGGER_CAPACITY
}

/// 采集策略配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AcquisitionConfig {
    /// 固定频率
    Fixed { rate_hz: f64 },
    /// 自适应频率（负载超过阈值时加倍，否则减半）
    Adaptive {
        min_rate_hz: f64,
        max_rate_hz: f64,
        adjust_interval_ms: u64,
        load_threshold: f64,
    },
    /// 外部触发
    Trigger {
        #[serde(default = "default_trigger_capacity")]
        capacity: usize,
    },
}

impl AcquisitionConfig {
    fn validate(&self, controller: &str) -> Result<(), ConfigError> {
        match *self {
            Self::Fixed { rate_hz } => acquisition_rate(controller, "rate_hz", rate_hz),
            Self::Adaptive {
                min_rate_hz,
                max_rate_hz,
                adjust_interval_ms,
                load_threshold,
            } => {
                acquisition_rate(controller, "min_rate_hz", min_rate_hz)?;
                acquisition_rate(controller, "max_rate_hz", max_rate_hz)?;
                nonzero(controller, "adjust_interval_ms", adjust_interval_ms)?;
                if min_rate_hz > max_rate_hz {
                    return Err(ConfigError::validation(format!(
                        "controller `{}`: min_rate_hz {} exceeds max_rate_hz {}",
                        controller, min_rate_hz, max_rate_hz
                    )));
                }
                if !load_threshold.is_finite() {
                    return Err(ConfigError::validation(format!(
                        "controller `{}`: load_threshold must be finite",
                        controller
                    )));
                }
                Ok(())
            },
            Self::Trigger { capacity } => nonzero(controller, "capacity", capacity as u64),
        }
    }
}

/// 背压配置
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BackpressureConfig {
    Batching { size: usize },
    Sampling { interval_ms: u64 },
    Throttle { duration_ms: u64 },
    DropOldest { capacity: usize },
}

impl BackpressureConfig {
    fn validate(&self, controller: &str) -> Result<(), ConfigError> {
        match *self {
            Self::Batching { size } => nonzero(controller, "size", size as u64),
            Self::Sampling { interval_ms } => nonzero(controller, "interval_ms", interval_ms),
            Self::Throttle { duration_ms } => nonzero(controller, "duration_ms", duration_ms),
            Self::DropOldest { capacity } => nonzero(controller, "capacity", capacity as u64),
        }
    }
}

/// 处理阶段配置（按列表顺序串联）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ProcessorConfig {
    Validation,
    /// 解析本控制器下所有信号的通道值
    Transform,
    Aggregation { window_ms: u64 },
}

impl ProcessorConfig {
    /// 聚合窗口（仅 `Aggregation`）
    pub fn window(&self) -> Option<Duration> {
        match *self {
            Self::Aggregation { window_ms } => Some(Duration::from_millis(window_ms)),
            _ => None,
        }
    }
}

/// 单个控制器（硬件适配器 + 采集管线）的配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ControllerConfig {
    pub id: String,
    pub acquisition: AcquisitionConfig,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backpressure: Option<BackpressureConfig>,
    #[serde(default)]
    pub processors: Vec<ProcessorConfig>,
}

/// 共享内存发布器配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PublisherConfig {
    /// 环形缓冲区文件路径（通常位于 /dev/shm）
    pub path: PathBuf,
    /// 记录容量
    #[serde(default = "default_publisher_capacity")]
    pub capacity: usize,
}

/// 测试台完整配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StationConfig {
    #[serde(default = "default_station_name")]
    pub name: String,
    #[serde(default)]
    pub controllers: Vec<ControllerConfig>,
    #[serde(default)]
    pub signals: Vec<SignalConfiguration>,
    #[serde(default)]
    pub pseudo_channels: Vec<PseudoChannelConfiguration>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub publisher: Option<PublisherConfig>,
}

impl Default for StationConfig {
    fn default() -> Self {
        Self {
            name: default_station_name(),
            controllers: Vec::new(),
            signals: Vec::new(),
            pseudo_channels: Vec::new(),
            publisher: None,
        }
    }
}

impl StationConfig {
    /// 从 TOML 文件加载并校验
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)?;
        let config = Self::from_toml_str(&content)?;
        debug!(
            path = %path.display(),
            controllers = config.controllers.len(),
            signals = config.signals.len(),
            pseudo_channels = config.pseudo_channels.len(),
            "station config loaded"
        );
        Ok(config)
    }

    /// 从 TOML 字符串解析并校验
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: StationConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml_string(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        fs::write(path, self.to_toml_string()?)?;
        Ok(())
    }

    pub fn controller(&self, id: &str) -> Option<&ControllerConfig> {
        self.controllers.iter().find(|c| c.id == id)
    }

    pub fn signal(&self, id: &str) -> Option<&SignalConfiguration> {
        self.signals.iter().find(|s| s.id == id)
    }

    /// 属于某控制器的信号（保持配置顺序）
    pub fn signals_for<'a>(&'a self, controller_id: &'a str) -> impl Iterator<Item = &'a SignalConfiguration> + 'a {
        self.signals.iter().filter(move |s| s.controller_id == controller_id)
    }

    /// 语义校验
    ///
    /// 伪通道成分的单位兼容性在这里检查，组合时不再检查。
    pub fn validate(&self) -> Result<(), ConfigError> {
        ensure_unique("controller", self.controllers.iter().map(|c| c.id.as_str()))?;
        ensure_unique("signal", self.signals.iter().map(|s| s.id.as_str()))?;
        ensure_unique("pseudo channel", self.pseudo_channels.iter().map(|p| p.id.as_str()))?;

        for controller in &self.controllers {
            if controller.id.is_empty() {
                return Err(ConfigError::validation("controller id must not be empty"));
            }
            controller.acquisition.validate(&controller.id)?;
            if let Some(backpressure) = &controller.backpressure {
                backpressure.validate(&controller.id)?;
            }
            for processor in &controller.processors {
                if let ProcessorConfig::Aggregation { window_ms } = *processor {
                    nonzero(&controller.id, "window_ms", window_ms)?;
                }
            }
        }

        let controllers: HashSet<&str> = self.controllers.iter().map(|c| c.id.as_str()).collect();
        for signal in &self.signals {
            if !controllers.contains(signal.controller_id.as_str()) {
                return Err(ConfigError::validation(format!(
                    "signal `{}` references unknown controller `{}`",
                    signal.id, signal.controller_id
                )));
            }
            if let Some(rate) = signal.sample_rate_hz {
                positive(&signal.id, "sample_rate_hz", rate)?;
            }
            if signal.buffer_size == Some(0) {
                return Err(ConfigError::validation(format!(
                    "signal `{}`: buffer_size must be positive",
                    signal.id
                )));
            }
        }

        let signals: HashMap<&str, &SignalConfiguration> =
            self.signals.iter().map(|s| (s.id.as_str(), s)).collect();
        for channel in &self.pseudo_channels {
            if channel.signal_ids.is_empty() {
                return Err(ConfigError::validation(format!(
                    "pseudo channel `{}` has no constituent signals",
                    channel.id
                )));
            }

            let mut units = Vec::with_capacity(channel.signal_ids.len());
            for signal_id in &channel.signal_ids {
                let Some(signal) = signals.get(signal_id.as_str()) else {
                    return Err(ConfigError::validation(format!(
                        "pseudo channel `{}` references unknown signal `{}`",
                        channel.id, signal_id
                    )));
                };
                units.push(signal.unit.as_str());
            }

            if channel.unit.is_none() && units.windows(2).any(|w| w[0] != w[1]) {
                return Err(ConfigError::validation(format!(
                    "pseudo channel `{}` combines incompatible units {:?} without a unit override",
                    channel.id, units
                )));
            }
        }

        if let Some(publisher) = &self.publisher {
            if publisher.capacity == 0 {
                return Err(ConfigError::validation("publisher capacity must be positive"));
            }
            if publisher.path.as_os_str().is_empty() {
                return Err(ConfigError::validation("publisher path must not be empty"));
            }
        }

        Ok(())
    }
}

fn ensure_unique<'a>(kind: &str, ids: impl Iterator<Item = &'a str>) -> Result<(), ConfigError> {
    let mut seen = HashSet::new();
    for id in ids {
        if !seen.insert(id) {
            return Err(ConfigError::validation(format!("duplicate {} id `{}`", kind, id)));
        }
    }
    Ok(())
}

fn positive(owner: &str, name: &str, value: f64) -> Result<(), ConfigError> {
    if value.is_finite() && value > 0.0 {
        Ok(())
    } else {
        Err(ConfigError::validation(format!(
            "`{}`: {} must be positive, got {}",
            owner, name, value
        )))
    }
}

/// 采集频率：有限、为正且不低于 [`MIN_ACQUISITION_RATE_HZ`]
fn acquisition_rate(owner: &str, name: &str, value: f64) -> Result<(), ConfigError> {
    positive(owner, name, value)?;
    if value < MIN_ACQUISITION_RATE_HZ {
        return Err(ConfigError::validation(format!(
            "`{}`: {} must be at least {} Hz, got {}",
            owner, name, MIN_ACQUISITION_RATE_HZ, value
        )));
    }
    Ok(())
}

fn nonzero(owner: &str, name: &str, value: u64) -> Result<(), ConfigError> {
    if value > 0 {
        Ok(())
    } else {
        Err(ConfigError::validation(format!("`{}`: {} must be positive", owner, name)))
    }
}
