//! 信号与伪通道配置
//!
//! 配置在初始化时加载，之后视为不可变。

/// 主/副通道的分界（物理索引 `< 10` 为主通道）
pub const SECONDARY_INDEX_BASE: u32 = 10;

/// 物理通道在样本中的位置
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelLocation {
    /// 主通道数组中的位置
    Primary(usize),
    /// 副通道数组中的位置
    Secondary(usize),
}

impl ChannelLocation {
    /// 解析物理索引：`index < 10` → 主通道；否则副通道 `index % 10`
    pub fn from_index(index: u32) -> Self {
        if index < SECONDARY_INDEX_BASE {
            Self::Primary(index as usize)
        } else {
            Self::Secondary((index % SECONDARY_INDEX_BASE) as usize)
        }
    }
}

/// 信号方向
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum SignalDirection {
    /// 测量输入（传感器）
    #[default]
    Input,
    /// 控制输出（执行器）
    Output,
}

/// 信号配置
///
/// 将逻辑信号 ID 映射到某个控制器数据流中的物理通道。
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SignalConfiguration {
    /// 逻辑信号 ID
    pub id: String,
    /// 所属控制器 ID
    pub controller_id: String,
    /// 物理通道索引（见 [`ChannelLocation::from_index`]）
    pub channel_index: u32,
    /// 方向
    #[cfg_attr(feature = "serde", serde(default))]
    pub direction: SignalDirection,
    /// 量程下限
    #[cfg_attr(feature = "serde", serde(default))]
    pub min_value: f64,
    /// 量程上限
    #[cfg_attr(feature = "serde", serde(default))]
    pub max_value: f64,
    /// 工程单位（如 "kN"、"mm"）
    #[cfg_attr(feature = "serde", serde(default))]
    pub unit: String,
    /// 采样率提示（Hz）
    #[cfg_attr(feature = "serde", serde(default))]
    pub sample_rate_hz: Option<f64>,
    /// 缓冲区大小提示
    #[cfg_attr(feature = "serde", serde(default))]
    pub buffer_size: Option<usize>,
}

impl SignalConfiguration {
    /// 创建输入信号配置（其余字段取默认值）
    pub fn new(
        id: impl Into<String>,
        controller_id: impl Into<String>,
        channel_index: u32,
        unit: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            controller_id: controller_id.into(),
            channel_index,
            direction: SignalDirection::Input,
            min_value: 0.0,
            max_value: 0.0,
            unit: unit.into(),
            sample_rate_hz: None,
            buffer_size: None,
        }
    }

    /// 物理通道位置
    pub fn location(&self) -> ChannelLocation {
        ChannelLocation::from_index(self.channel_index)
    }

    /// 值是否落在配置量程内（量程未配置时始终为 true）
    pub fn in_range(&self, value: f64) -> bool {
        if self.min_value >= self.max_value {
            return true;
        }
        value >= self.min_value && value <= self.max_value
    }
}

/// 伪通道（虚拟通道）配置
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct PseudoChannelConfiguration {
    /// 逻辑通道 ID
    pub id: String,
    /// 单位覆盖（`None` 时单一成分透传原单位，多成分输出空字符串）
    #[cfg_attr(feature = "serde", serde(default))]
    pub unit: Option<String>,
    /// 有序的成分信号 ID 列表
    pub signal_ids: Vec<String>,
}

impl PseudoChannelConfiguration {
    pub fn new(id: impl Into<String>, unit: Option<&str>, signal_ids: &[&str]) -> Self {
        Self {
            id: id.into(),
            unit: unit.map(str::to_string),
            signal_ids: signal_ids.iter().map(|s| s.to_string()).collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_location() {
        assert_eq!(ChannelLocation::from_index(0), ChannelLocation::Primary(0));
        assert_eq!(ChannelLocation::from_index(9), ChannelLocation::Primary(9));
        assert_eq!(ChannelLocation::from_index(10), ChannelLocation::Secondary(0));
        assert_eq!(ChannelLocation::from_index(17), ChannelLocation::Secondary(7));
        assert_eq!(ChannelLocation::from_index(31), ChannelLocation::Secondary(1));
    }

    #[test]
    fn test_signal_in_range() {
        let mut cfg = SignalConfiguration::new("LOAD", "ctrl-1", 0, "kN");
        // 未配置量程
        assert!(cfg.in_range(1e9));

        cfg.min_value = -10.0;
        cfg.max_value = 10.0;
        assert!(cfg.in_range(0.0));
        assert!(cfg.in_range(10.0));
        assert!(!cfg.in_range(10.5));
    }

    #[test]
    fn test_pseudo_channel_new() {
        let cfg = PseudoChannelConfiguration::new("AVG", Some("kN"), &["A", "B"]);
        assert_eq!(cfg.unit.as_deref(), Some("kN"));
        assert_eq!(cfg.signal_ids, vec!["A".to_string(), "B".to_string()]);
    }
}
