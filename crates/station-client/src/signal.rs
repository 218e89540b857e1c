//! 信号管理器
//!
//! 把逻辑信号 ID 映射到所属控制器数据流中的物理通道，
//! 每个信号只派生一条共享热流并缓存（并发首次访问也不会重复派生）。

use crate::error::ClientError;
use crate::registry::ControllerRegistry;
use parking_lot::RwLock;
use station_driver::SharedStream;
use station_protocol::{DataPoint, ProcessedSample, Quality, SignalConfiguration};
use std::collections::HashMap;
use std::sync::{Arc, OnceLock};
use tracing::{debug, trace};

type StreamCell = Arc<OnceLock<SharedStream<DataPoint>>>;

/// 信号管理器
pub struct SignalManager {
    registry: Arc<ControllerRegistry>,
    signals: Vec<SignalConfiguration>,
    index: HashMap<String, usize>,
    cache: RwLock<HashMap<String, StreamCell>>,
}

impl std::fmt::Debug for SignalManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SignalManager")
            .field("signals", &self.signals.len())
            .field("cached", &self.cache.read().len())
            .finish()
    }
}

impl SignalManager {
    /// 创建信号管理器（信号 ID 重复时拒绝）
    pub fn new(
        registry: Arc<ControllerRegistry>,
        signals: Vec<SignalConfiguration>,
    ) -> Result<Self, ClientError> {
        let mut index = HashMap::with_capacity(signals.len());
        for (i, signal) in signals.iter().enumerate() {
            if index.insert(signal.id.clone(), i).is_some() {
                return Err(ClientError::DuplicateId {
                    kind: "signal",
                    id: signal.id.clone(),
                });
            }
        }

        Ok(Self {
            registry,
            signals,
            index,
            cache: RwLock::new(HashMap::new()),
        })
    }

    pub fn registry(&self) -> &Arc<ControllerRegistry> {
        &self.registry
    }

    pub fn signal(&self, id: &str) -> Option<&SignalConfiguration> {
        self.index.get(id).map(|&i| &self.signals[i])
    }

    /// 信号 ID（配置顺序）
    pub fn signal_ids(&self) -> impl Iterator<Item = &str> {
        self.signals.iter().map(|s| s.id.as_str())
    }

    /// 已派生（缓存）的信号流数量
    pub fn cached_count(&self) -> usize {
        self.cache.read().values().filter(|cell| cell.get().is_some()).count()
    }

    /// 获取信号数据流
    ///
    /// 同一个 ID 的重复调用返回同一条热流实例。
    pub fn get_signal_data_stream(&self, signal_id: &str) -> Result<SharedStream<DataPoint>, ClientError> {
        let signal = self
            .signal(signal_id)
            .ok_or_else(|| ClientError::SignalNotFound(signal_id.to_string()))?;
        let controller = self.registry.get(&signal.controller_id)?;

        let cell = self.cell(signal_id);
        let stream = cell.get_or_init(|| {
            debug!(signal = signal_id, controller = %signal.controller_id, "deriving signal stream");
            let signal = signal.clone();
            controller
                .data_stream()
                .filter_map(format!("signal/{}", signal.id), move |sample| {
                    to_data_point(&signal, &sample)
                })
        });
        Ok(stream.clone())
    }

    /// 原子 get-or-create 每个 ID 的一次性单元
    fn cell(&self, signal_id: &str) -> StreamCell {
        if let Some(cell) = self.cache.read().get(signal_id) {
            return cell.clone();
        }
        self.cache
            .write()
            .entry(signal_id.to_string())
            .or_default()
            .clone()
    }
}

/// 从处理后样本中取出信号值
///
/// 优先使用 Transform 阶段解析好的值，否则按物理索引规则直接读取通道。
/// 超出配置量程的值以 Bad 质量发出。
pub(crate) fn to_data_point(signal: &SignalConfiguration, sample: &ProcessedSample) -> Option<DataPoint> {
    let value = match sample.signal_value(&signal.id) {
        Some(value) => value,
        None => match sample.raw.channel(signal.channel_index) {
            Ok(value) => value,
            Err(e) => {
                trace!(signal = %signal.id, "no value in sample: {}", e);
                return None;
            },
        },
    };

    let quality = if sample.quality.is_good() && signal.in_range(value) {
        Quality::Good
    } else {
        Quality::Bad
    };

    Some(DataPoint {
        device_id: signal.id.clone(),
        timestamp: sample.timestamp(),
        unit: signal.unit.clone(),
        value,
        quality,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use station_protocol::RawSample;
    use std::sync::Arc;

    fn sample(analog: &[f64], encoders: &[f64]) -> ProcessedSample {
        ProcessedSample::good(Arc::new(RawSample::new(42, analog, encoders)))
    }

    #[test]
    fn test_data_point_from_primary_and_secondary() {
        let load = SignalConfiguration::new("LOAD", "ctrl-1", 1, "kN");
        let pos = SignalConfiguration::new("POS", "ctrl-1", 12, "mm");
        let s = sample(&[0.5, 7.0], &[0.0, 0.0, -3.0]);

        let point = to_data_point(&load, &s).unwrap();
        assert_eq!(point.device_id, "LOAD");
        assert_eq!(point.timestamp, 42);
        assert_eq!(point.unit, "kN");
        assert_eq!(point.value, 7.0);
        assert_eq!(point.quality, Quality::Good);

        assert_eq!(to_data_point(&pos, &s).unwrap().value, -3.0);
    }

    #[test]
    fn test_transformed_value_takes_precedence() {
        let load = SignalConfiguration::new("LOAD", "ctrl-1", 0, "kN");
        let mut values = station_protocol::SignalValues::new();
        values.insert("LOAD".into(), 99.0);
        let s = sample(&[1.0], &[]).with_signal_values(values);
        assert_eq!(to_data_point(&load, &s).unwrap().value, 99.0);
    }

    #[test]
    fn test_missing_channel_yields_nothing() {
        let sig = SignalConfiguration::new("X", "ctrl-1", 15, "mm");
        assert!(to_data_point(&sig, &sample(&[1.0], &[])).is_none());
    }

    #[test]
    fn test_out_of_range_is_bad() {
        let mut sig = SignalConfiguration::new("LOAD", "ctrl-1", 0, "kN");
        sig.min_value = -1.0;
        sig.max_value = 1.0;
        let point = to_data_point(&sig, &sample(&[5.0], &[])).unwrap();
        assert_eq!(point.quality, Quality::Bad);
    }

    #[test]
    fn test_lookup_errors() {
        let registry = Arc::new(ControllerRegistry::new());
        let manager = SignalManager::new(
            registry,
            vec![SignalConfiguration::new("LOAD", "ctrl-9", 0, "kN")],
        )
        .unwrap();

        assert!(matches!(
            manager.get_signal_data_stream("NOPE"),
            Err(ClientError::SignalNotFound(_))
        ));
        assert!(matches!(
            manager.get_signal_data_stream("LOAD"),
            Err(ClientError::ControllerNotFound(_))
        ));
        assert_eq!(manager.cached_count(), 0);
    }

    #[test]
    fn test_duplicate_signal_rejected() {
        let registry = Arc::new(ControllerRegistry::new());
        let result = SignalManager::new(
            registry,
            vec![
                SignalConfiguration::new("LOAD", "ctrl-1", 0, "kN"),
                SignalConfiguration::new("LOAD", "ctrl-1", 1, "kN"),
            ],
        );
        assert!(matches!(result, Err(ClientError::DuplicateId { kind: "signal", .. })));
    }
}
