//! 仿真硬件
//!
//! 为配置中的每个控制器生成一个 Mock 适配器：
//! 主通道为不同相位的正弦波，副通道为缓慢爬升的位移，负载偶尔越过阈值。

use station_sdk::hal::{HardwareAdapter, MockAdapter};
use station_sdk::protocol::{PRIMARY_CHANNEL_COUNT, RawSample, SECONDARY_CHANNEL_COUNT, monotonic_micros};
use station_sdk::tools::StationConfig;
use std::f64::consts::TAU;
use std::sync::Arc;

/// 每个控制器的合成信号参数
#[derive(Debug, Clone, Copy)]
pub struct Waveform {
    /// 幅值
    pub amplitude: f64,
    /// 每次读取推进的相位（弧度）
    pub step: f64,
    /// 相位偏移
    pub phase: f64,
}

impl Waveform {
    pub fn for_controller(index: usize) -> Self {
        Self {
            amplitude: 10.0 * (index + 1) as f64,
            step: TAU / 200.0,
            phase: index as f64 * 0.7,
        }
    }

    /// 第 `tick` 次读取的样本
    pub fn sample(&self, tick: u64) -> RawSample {
        let t = tick as f64 * self.step + self.phase;
        let analog: Vec<f64> = (0..PRIMARY_CHANNEL_COUNT)
            .map(|ch| self.amplitude * (t + ch as f64 * 0.3).sin())
            .collect();
        let encoders: Vec<f64> = (0..SECONDARY_CHANNEL_COUNT)
            .map(|ch| tick as f64 * 0.01 * (ch + 1) as f64)
            .collect();

        let mut sample = RawSample::new(monotonic_micros().max(1), &analog, &encoders).with_load(analog[0]);
        sample.cycle_count = tick;
        sample.time_counter = tick;
        sample
    }
}

/// 为配置中的全部控制器创建仿真适配器
pub fn adapters(config: &StationConfig) -> Vec<Arc<dyn HardwareAdapter>> {
    config
        .controllers
        .iter()
        .enumerate()
        .map(|(index, controller)| {
            let waveform = Waveform::for_controller(index);
            Arc::new(MockAdapter::generating(controller.id.clone(), move |tick| waveform.sample(tick)))
                as Arc<dyn HardwareAdapter>
        })
        .collect()
}
