//! 数据点
//!
//! 每个信号 / 伪通道每个 tick 发出一个，不保留。

use crate::sample::Quality;

/// 数据点
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct DataPoint {
    /// 设备 / 信号 ID
    pub device_id: String,
    /// 单调时钟时间戳（微秒）
    pub timestamp: i64,
    /// 工程单位
    pub unit: String,
    /// 值
    pub value: f64,
    /// 质量
    pub quality: Quality,
}

impl DataPoint {
    pub fn new(device_id: impl Into<String>, timestamp: i64, unit: impl Into<String>, value: f64) -> Self {
        Self {
            device_id: device_id.into(),
            timestamp,
            unit: unit.into(),
            value,
            quality: Quality::Good,
        }
    }
}
