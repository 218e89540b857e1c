//! 伪通道（虚拟通道）
//!
//! 伪通道由 1..N 个信号流组合而成，首次访问时构建，之后在通道生命周期内缓存：
//! - 单一成分：透传，单位按配置覆盖
//! - 多成分：最新值联合，输出取成分均值
//!
//! 成分单位的兼容性在配置加载时校验，组合时不再检查。

use crate::error::ClientError;
use crate::signal::SignalManager;
use station_driver::{SharedStream, StreamConfig};
use station_protocol::{DataPoint, PseudoChannelConfiguration, Quality};
use std::collections::HashMap;
use std::sync::{Arc, OnceLock};
use tracing::debug;

/// 组合多个成分数据点
///
/// - `device_id`: 第一个成分的 ID
/// - `timestamp`: 成分中最大的时间戳
/// - `value`: 算术平均
/// - `unit`: 配置覆盖，否则为空字符串
/// - `quality`: 任一成分为 Bad 则为 Bad
pub fn combine_points(points: &[DataPoint], unit: Option<&str>) -> Option<DataPoint> {
    let first = points.first()?;
    let timestamp = points.iter().map(|p| p.timestamp).max().unwrap_or(first.timestamp);
    let value = points.iter().map(|p| p.value).sum::<f64>() / points.len() as f64;
    let quality = if points.iter().all(|p| p.quality.is_good()) {
        Quality::Good
    } else {
        Quality::Bad
    };

    Some(DataPoint {
        device_id: first.device_id.clone(),
        timestamp,
        unit: unit.unwrap_or_default().to_string(),
        value,
        quality,
    })
}

/// 伪通道
pub struct PseudoChannel {
    config: PseudoChannelConfiguration,
    signals: Arc<SignalManager>,
    stream: OnceLock<SharedStream<DataPoint>>,
}

impl std::fmt::Debug for PseudoChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PseudoChannel")
            .field("id", &self.config.id)
            .field("signals", &self.config.signal_ids)
            .field("built", &self.is_built())
            .finish()
    }
}

impl PseudoChannel {
    pub fn new(config: PseudoChannelConfiguration, signals: Arc<SignalManager>) -> Result<Self, ClientError> {
        if config.signal_ids.is_empty() {
            return Err(ClientError::EmptyPseudoChannel(config.id));
        }
        Ok(Self {
            config,
            signals,
            stream: OnceLock::new(),
        })
    }

    pub fn id(&self) -> &str {
        &self.config.id
    }

    pub fn config(&self) -> &PseudoChannelConfiguration {
        &self.config
    }

    /// 组合流是否已构建
    pub fn is_built(&self) -> bool {
        self.stream.get().is_some()
    }

    /// 组合后的数据流（惰性构建，之后始终返回同一实例）
    pub fn stream(&self) -> Result<SharedStream<DataPoint>, ClientError> {
        if let Some(stream) = self.stream.get() {
            return Ok(stream.clone());
        }

        let mut constituents = self
            .config
            .signal_ids
            .iter()
            .map(|id| self.signals.get_signal_data_stream(id))
            .collect::<Result<Vec<_>, _>>()?;

        let stream = self.stream.get_or_init(|| {
            let name = format!("pseudo/{}", self.config.id);
            let unit = self.config.unit.clone();
            debug!(channel = %self.config.id, constituents = constituents.len(), "building pseudo channel");

            if constituents.len() == 1 {
                let single = constituents.remove(0);
                single.map(name, move |mut point| {
                    if let Some(unit) = &unit {
                        point.unit = unit.clone();
                    }
                    point
                })
            } else {
                SharedStream::combine_latest(format!("{}/join", name), constituents, StreamConfig::default())
                    .filter_map(name, move |points| combine_points(&points, unit.as_deref()))
            }
        });
        Ok(stream.clone())
    }
}

/// 伪通道管理器
pub struct PseudoChannelManager {
    signals: Arc<SignalManager>,
    channels: Vec<Arc<PseudoChannel>>,
    index: HashMap<String, usize>,
}

impl std::fmt::Debug for PseudoChannelManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.channels.iter()).finish()
    }
}

impl PseudoChannelManager {
    /// 创建管理器
    ///
    /// 通道 ID 重复、成分为空或引用未知信号时立即失败。
    pub fn new(
        signals: Arc<SignalManager>,
        configs: Vec<PseudoChannelConfiguration>,
    ) -> Result<Self, ClientError> {
        let mut channels = Vec::with_capacity(configs.len());
        let mut index = HashMap::with_capacity(configs.len());

        for config in configs {
            if let Some(unknown) = config.signal_ids.iter().find(|id| signals.signal(id).is_none()) {
                return Err(ClientError::SignalNotFound(unknown.clone()));
            }
            if index.contains_key(&config.id) {
                return Err(ClientError::DuplicateId {
                    kind: "pseudo channel",
                    id: config.id,
                });
            }
            index.insert(config.id.clone(), channels.len());
            channels.push(Arc::new(PseudoChannel::new(config, signals.clone())?));
        }

        Ok(Self {
            signals,
            channels,
            index,
        })
    }

    pub fn signals(&self) -> &Arc<SignalManager> {
        &self.signals
    }

    pub fn channel(&self, id: &str) -> Result<&Arc<PseudoChannel>, ClientError> {
        self.index
            .get(id)
            .map(|&i| &self.channels[i])
            .ok_or_else(|| ClientError::PseudoChannelNotFound(id.to_string()))
    }

    /// 伪通道 ID（配置顺序）
    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.channels.iter().map(|c| c.id())
    }

    pub fn channels(&self) -> &[Arc<PseudoChannel>] {
        &self.channels
    }

    /// 获取伪通道数据流
    pub fn get_channel_stream(&self, id: &str) -> Result<SharedStream<DataPoint>, ClientError> {
        self.channel(id)?.stream()
    }
}
