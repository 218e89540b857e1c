//! 样本类型
//!
//! - [`RawSample`]: 一次硬件读取的不可变快照
//! - [`ProcessedSample`]: 原始样本 + 质量标记 + 派生数据（信号值、窗口聚合）
//! - [`AggregatedStats`]: 时间窗口内负载字段的统计量

use crate::ProtocolError;
use crate::signal::ChannelLocation;
use num_enum::{IntoPrimitive, TryFromPrimitive};
use smallvec::SmallVec;
use std::collections::BTreeMap;
use std::sync::Arc;

/// 主通道（模拟量）数量
pub const PRIMARY_CHANNEL_COUNT: usize = 10;

/// 副通道（绝对编码器）数量
pub const SECONDARY_CHANNEL_COUNT: usize = 10;

/// 周期采集允许的最低频率（Hz），即两次读取最多相隔 1000 秒
pub const MIN_ACQUISITION_RATE_HZ: f64 = 1e-3;

/// 通道数组（内联存储，避免每次读取分配）
pub type ChannelArray = SmallVec<[f64; PRIMARY_CHANNEL_COUNT]>;

/// 原始样本
///
/// 每次硬件读取产生一个，之后不再修改。下游以 `Arc<RawSample>` 共享。
///
/// 读取失败时由采集策略生成 **哨兵样本**（仅含时间戳，通道数组为空），
/// 采集循环不会因为单次读取失败而终止。
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct RawSample {
    /// 单调时钟时间戳（微秒），`<= 0` 视为无效
    pub timestamp: i64,
    /// 主通道数组（模拟量）
    pub analog: ChannelArray,
    /// 副通道数组（绝对编码器）
    pub encoders: ChannelArray,
    /// 位置给定
    pub position_reference: f64,
    /// 位置误差
    pub position_error: f64,
    /// 控制输出
    pub control_output: f64,
    /// 循环计数
    pub cycle_count: u64,
    /// 控制器系统状态字
    pub system_state: u32,
    /// 数字量 I/O 位图
    pub digital_io: u32,
    /// 负载/力反馈
    pub load: f64,
    /// 保护/错误码
    pub error_code: u32,
    /// 控制器内部时间计数
    pub time_counter: u64,
}

impl RawSample {
    /// 创建带通道数据的样本（标量字段为 0）
    pub fn new(timestamp: i64, analog: &[f64], encoders: &[f64]) -> Self {
        Self {
            timestamp,
            analog: ChannelArray::from_slice(analog),
            encoders: ChannelArray::from_slice(encoders),
            position_reference: 0.0,
            position_error: 0.0,
            control_output: 0.0,
            cycle_count: 0,
            system_state: 0,
            digital_io: 0,
            load: 0.0,
            error_code: 0,
            time_counter: 0,
        }
    }

    /// 创建哨兵样本（读取失败时使用）
    pub fn sentinel(timestamp: i64) -> Self {
        Self::new(timestamp, &[], &[])
    }

    /// 设置负载字段（链式构造）
    #[must_use]
    pub fn with_load(mut self, load: f64) -> Self {
        self.load = load;
        self
    }

    /// 是否为哨兵样本（所有通道数组均为空）
    pub fn is_sentinel(&self) -> bool {
        !self.has_channels()
    }

    /// 至少一个通道数组非空
    pub fn has_channels(&self) -> bool {
        !self.analog.is_empty() || !self.encoders.is_empty()
    }

    /// 按物理通道索引取值
    ///
    /// 索引规则：`index < 10` → 主通道；否则副通道 `index % 10`。
    pub fn channel(&self, index: u32) -> Result<f64, ProtocolError> {
        let value = match ChannelLocation::from_index(index) {
            ChannelLocation::Primary(i) => self.analog.get(i),
            ChannelLocation::Secondary(i) => self.encoders.get(i),
        };
        value.copied().ok_or(ProtocolError::ChannelOutOfRange {
            index,
            primary: self.analog.len(),
            secondary: self.encoders.len(),
        })
    }
}

/// 样本质量
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, IntoPrimitive, TryFromPrimitive)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[repr(u8)]
pub enum Quality {
    #[default]
    Good = 0,
    Bad = 1,
}

impl Quality {
    /// 从 u8 转换
    pub fn from_u8(value: u8) -> Result<Self, ProtocolError> {
        Self::try_from(value).map_err(|_| ProtocolError::InvalidQuality(value))
    }

    pub fn is_good(self) -> bool {
        self == Self::Good
    }
}

/// 窗口聚合统计（负载字段）
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct AggregatedStats {
    /// 样本数量
    pub count: usize,
    /// 平均值
    pub mean: f64,
    /// 最大值
    pub max: f64,
    /// 最小值
    pub min: f64,
    /// 标准差（总体）
    pub std_dev: f64,
}

impl AggregatedStats {
    /// 计算统计量，空输入返回 `None`
    pub fn from_values(values: &[f64]) -> Option<Self> {
        if values.is_empty() {
            return None;
        }

        let count = values.len();
        let mean = values.iter().sum::<f64>() / count as f64;
        let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        let min = values.iter().copied().fold(f64::INFINITY, f64::min);

        let variance = values
            .iter()
            .map(|&x| {
                let diff = x - mean;
                diff * diff
            })
            .sum::<f64>()
            / count as f64;

        Some(Self {
            count,
            mean,
            max,
            min,
            std_dev: variance.sqrt(),
        })
    }
}

/// 信号值映射（信号 ID → 工程值）
pub type SignalValues = BTreeMap<String, f64>;

/// 处理后样本
///
/// 由处理链创建，创建后不再修改。克隆只增加引用计数。
#[derive(Debug, Clone, PartialEq)]
pub struct ProcessedSample {
    /// 代表性原始样本（聚合时为窗口内最后一个样本）
    pub raw: Arc<RawSample>,
    /// 质量标记
    pub quality: Quality,
    /// 信号值映射（Transform 阶段产生）
    pub signal_values: Option<Arc<SignalValues>>,
    /// 窗口聚合（Aggregation 阶段产生）
    pub aggregate: Option<AggregatedStats>,
}

impl ProcessedSample {
    /// 以 Good 质量包装原始样本
    pub fn good(raw: Arc<RawSample>) -> Self {
        Self {
            raw,
            quality: Quality::Good,
            signal_values: None,
            aggregate: None,
        }
    }

    /// 以 Bad 质量包装原始样本
    pub fn bad(raw: Arc<RawSample>) -> Self {
        Self {
            quality: Quality::Bad,
            ..Self::good(raw)
        }
    }

    #[must_use]
    pub fn with_signal_values(mut self, values: SignalValues) -> Self {
        self.signal_values = Some(Arc::new(values));
        self
    }

    #[must_use]
    pub fn with_aggregate(mut self, aggregate: AggregatedStats) -> Self {
        self.aggregate = Some(aggregate);
        self
    }

    /// 样本时间戳
    pub fn timestamp(&self) -> i64 {
        self.raw.timestamp
    }

    /// 查询信号值（仅当 Transform 阶段已运行）
    pub fn signal_value(&self, signal_id: &str) -> Option<f64> {
        self.signal_values.as_ref().and_then(|m| m.get(signal_id).copied())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sentinel_has_no_channels() {
        let s = RawSample::sentinel(42);
        assert!(s.is_sentinel());
        assert_eq!(s.timestamp, 42);
        assert!(s.channel(0).is_err());
    }

    #[test]
    fn test_channel_index_rule() {
        let s = RawSample::new(1, &[1.0, 2.0, 3.0], &[10.0, 11.0, 12.0]);
        assert_eq!(s.channel(0).unwrap(), 1.0);
        assert_eq!(s.channel(2).unwrap(), 3.0);
        // index >= 10 → 副通道 index % 10
        assert_eq!(s.channel(10).unwrap(), 10.0);
        assert_eq!(s.channel(12).unwrap(), 12.0);
        assert_eq!(s.channel(22).unwrap(), 12.0);
        assert!(matches!(
            s.channel(5),
            Err(ProtocolError::ChannelOutOfRange { index: 5, .. })
        ));
    }

    #[test]
    fn test_aggregated_stats() {
        let stats = AggregatedStats::from_values(&[2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0]).unwrap();
        assert_eq!(stats.count, 8);
        assert!((stats.mean - 5.0).abs() < 1e-12);
        assert_eq!(stats.max, 9.0);
        assert_eq!(stats.min, 2.0);
        assert!((stats.std_dev - 2.0).abs() < 1e-12);

        assert!(AggregatedStats::from_values(&[]).is_none());
    }

    #[test]
    fn test_quality_conversion() {
        assert_eq!(Quality::from_u8(0).unwrap(), Quality::Good);
        assert_eq!(Quality::from_u8(1).unwrap(), Quality::Bad);
        assert_eq!(Quality::from_u8(9), Err(ProtocolError::InvalidQuality(9)));
        assert_eq!(u8::from(Quality::Bad), 1);
    }

    #[test]
    fn test_processed_sample_builders() {
        let raw = Arc::new(RawSample::new(5, &[1.0], &[]).with_load(3.5));
        let mut values = SignalValues::new();
        values.insert("LOAD".to_string(), 3.5);

        let p = ProcessedSample::good(raw.clone()).with_signal_values(values);
        assert_eq!(p.timestamp(), 5);
        assert_eq!(p.signal_value("LOAD"), Some(3.5));
        assert_eq!(p.signal_value("POS"), None);

        let bad = ProcessedSample::bad(raw);
        assert_eq!(bad.quality, Quality::Bad);
        assert!(bad.signal_values.is_none());
    }

    #[cfg(feature = "serde")]
    #[test]
    fn test_raw_sample_serde() {
        let s = RawSample::new(7, &[1.0, 2.0], &[3.0]).with_load(4.0);
        let json = serde_json::to_string(&s).unwrap();
        let back: RawSample = serde_json::from_str(&json).unwrap();
        assert_eq!(s, back);
    }

    proptest::proptest! {
        #[test]
        fn prop_channel_lookup_matches_index_rule(
            analog in proptest::collection::vec(-1e6f64..1e6, 0..=10),
            encoders in proptest::collection::vec(-1e6f64..1e6, 0..=10),
            index in 0u32..40,
        ) {
            let s = RawSample::new(1, &analog, &encoders);
            let expected = if index < 10 {
                analog.get(index as usize)
            } else {
                encoders.get((index % 10) as usize)
            };
            match (s.channel(index), expected) {
                (Ok(value), Some(&want)) => proptest::prop_assert_eq!(value, want),
                (Err(_), None) => {},
                (got, want) => proptest::prop_assert!(false, "index {}: {:?} vs {:?}", index, got, want),
            }
        }
    }
}
