//! 测试台构建器
//!
//! 从校验过的 [`StationConfig`] 和一组硬件适配器构建完整的测试台：
//! 控制器注册表、信号管理器、伪通道管理器、状态机和可选的共享内存发布器。

use crate::error::ClientError;
use crate::pseudo::PseudoChannelManager;
use crate::publisher::ShmPublisher;
use crate::registry::ControllerRegistry;
use crate::signal::SignalManager;
use crate::state::{StationState, StationStateMachine};
use station_driver::{
    AcquisitionStrategy, AdaptiveRate, Backpressure, Controller, FixedRate, Pipeline, PipelineConfig,
    PipelineStats, ProcessorSpec, StationController, TriggerBased, TriggerHandle,
};
use station_hal::HardwareAdapter;
use station_tools::{
    AcquisitionConfig, BackpressureConfig, ControllerConfig, ProcessorConfig, ShmRing, StationConfig,
};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// 测试台构建器
pub struct StationBuilder {
    config: StationConfig,
    adapters: HashMap<String, Arc<dyn HardwareAdapter>>,
    pipeline_config: PipelineConfig,
    status_poll_interval: Option<Duration>,
}

impl StationBuilder {
    pub fn new(config: StationConfig) -> Self {
        Self {
            config,
            adapters: HashMap::new(),
            pipeline_config: PipelineConfig::default(),
            status_poll_interval: None,
        }
    }

    /// 提供硬件适配器（按 `adapter.id()` 匹配配置中的控制器）
    pub fn adapter(mut self, adapter: Arc<dyn HardwareAdapter>) -> Self {
        self.adapters.insert(adapter.id().to_string(), adapter);
        self
    }

    pub fn adapters(mut self, adapters: impl IntoIterator<Item = Arc<dyn HardwareAdapter>>) -> Self {
        for adapter in adapters {
            self = self.adapter(adapter);
        }
        self
    }

    /// 所有管线共用的运行参数
    pub fn pipeline_config(mut self, config: PipelineConfig) -> Self {
        self.pipeline_config = config;
        self
    }

    /// 连接状态轮询间隔
    pub fn status_poll_interval(mut self, interval: Duration) -> Self {
        self.status_poll_interval = Some(interval);
        self
    }

    /// 构建测试台
    pub fn build(mut self) -> Result<Station, ClientError> {
        self.config.validate()?;

        let mut registry = ControllerRegistry::new();
        let mut controllers = Vec::with_capacity(self.config.controllers.len());
        let mut triggers = HashMap::new();

        for controller_config in &self.config.controllers {
            let adapter = self
                .adapters
                .remove(&controller_config.id)
                .ok_or_else(|| ClientError::MissingAdapter(controller_config.id.clone()))?;

            let (strategy, trigger) = build_strategy(&controller_config.acquisition)?;
            if let Some(trigger) = trigger {
                triggers.insert(controller_config.id.clone(), trigger);
            }

            let mut builder = Pipeline::builder()
                .name(controller_config.id.clone())
                .adapter(adapter)
                .shared_strategy(strategy)
                .processors(processor_specs(&self.config, controller_config))
                .pipeline_config(self.pipeline_config);
            if let Some(backpressure) = controller_config.backpressure {
                builder = builder.backpressure(to_backpressure(backpressure));
            }
            let pipeline = builder.build()?;

            let controller = Arc::new(match self.status_poll_interval {
                Some(interval) => Controller::with_status_poll_interval(pipeline, interval),
                None => Controller::new(pipeline),
            });
            registry.register(controller.clone())?;
            controllers.push(controller);
        }

        for unused in self.adapters.keys() {
            warn!(adapter = %unused, "adapter has no matching controller in config, ignored");
        }

        let registry = Arc::new(registry);
        let signals = Arc::new(SignalManager::new(registry.clone(), self.config.signals.clone())?);
        let pseudo_channels = Arc::new(PseudoChannelManager::new(
            signals.clone(),
            self.config.pseudo_channels.clone(),
        )?);

        let publisher = match &self.config.publisher {
            Some(publisher) => Some(ShmPublisher::new(ShmRing::create(&publisher.path, publisher.capacity)?)),
            None => None,
        };

        info!(
            station = %self.config.name,
            controllers = controllers.len(),
            signals = self.config.signals.len(),
            pseudo_channels = self.config.pseudo_channels.len(),
            "station built"
        );

        Ok(Station {
            name: self.config.name,
            registry,
            controllers,
            signals,
            pseudo_channels,
            state: Arc::new(StationStateMachine::new()),
            publisher,
            triggers,
        })
    }
}

fn build_strategy(
    config: &AcquisitionConfig,
) -> Result<(Arc<dyn AcquisitionStrategy>, Option<TriggerHandle>), ClientError> {
    let mut trigger = None;
    let strategy: Arc<dyn AcquisitionStrategy> = match *config {
        AcquisitionConfig::Fixed { rate_hz } => Arc::new(FixedRate::new(rate_hz)?),
        AcquisitionConfig::Adaptive {
            min_rate_hz,
            max_rate_hz,
            adjust_interval_ms,
            load_threshold,
        } => Arc::new(AdaptiveRate::load_threshold(
            min_rate_hz,
            max_rate_hz,
            Duration::from_millis(adjust_interval_ms),
            load_threshold,
        )?),
        AcquisitionConfig::Trigger { capacity } => {
            let (strategy, handle) = TriggerBased::new(capacity);
            trigger = Some(handle);
            Arc::new(strategy)
        },
    };
    Ok((strategy, trigger))
}

fn to_backpressure(config: BackpressureConfig) -> Backpressure {
    match config {
        BackpressureConfig::Batching { size } => Backpressure::Batching { size },
        BackpressureConfig::Sampling { interval_ms } => Backpressure::Sampling {
            interval: Duration::from_millis(interval_ms),
        },
        BackpressureConfig::Throttle { duration_ms } => Backpressure::Throttle {
            duration: Duration::from_millis(duration_ms),
        },
        BackpressureConfig::DropOldest { capacity } => Backpressure::DropOldest { capacity },
    }
}

fn processor_specs(station: &StationConfig, controller: &ControllerConfig) -> Vec<ProcessorSpec> {
    controller
        .processors
        .iter()
        .map(|processor| match *processor {
            ProcessorConfig::Validation => ProcessorSpec::Validation,
            ProcessorConfig::Transform => ProcessorSpec::Transform {
                signals: station.signals_for(&controller.id).cloned().collect(),
            },
            ProcessorConfig::Aggregation { window_ms } => ProcessorSpec::Aggregation {
                window: Duration::from_millis(window_ms),
            },
        })
        .collect()
}

/// 构建完成的测试台
pub struct Station {
    name: String,
    registry: Arc<ControllerRegistry>,
    controllers: Vec<Arc<Controller>>,
    signals: Arc<SignalManager>,
    pseudo_channels: Arc<PseudoChannelManager>,
    state: Arc<StationStateMachine>,
    publisher: Option<ShmPublisher>,
    triggers: HashMap<String, TriggerHandle>,
}

impl std::fmt::Debug for Station {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Station")
            .field("name", &self.name)
            .field("state", &self.state.state())
            .field("registry", &self.registry)
            .finish()
    }
}

impl Station {
    pub fn builder(config: StationConfig) -> StationBuilder {
        StationBuilder::new(config)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn registry(&self) -> &Arc<ControllerRegistry> {
        &self.registry
    }

    pub fn signals(&self) -> &Arc<SignalManager> {
        &self.signals
    }

    pub fn pseudo_channels(&self) -> &Arc<PseudoChannelManager> {
        &self.pseudo_channels
    }

    pub fn state_machine(&self) -> &Arc<StationStateMachine> {
        &self.state
    }

    pub fn publisher(&self) -> Option<&ShmPublisher> {
        self.publisher.as_ref()
    }

    /// 外部触发句柄（仅触发式采集的控制器）
    pub fn trigger(&self, controller_id: &str) -> Option<&TriggerHandle> {
        self.triggers.get(controller_id)
    }

    /// 控制器（注册顺序）
    pub fn controllers(&self) -> &[Arc<Controller>] {
        &self.controllers
    }

    /// 启动全部管线（重置统计，保持采集运行）
    pub fn start_pipelines(&self) {
        for controller in &self.controllers {
            controller.pipeline().start();
        }
    }

    /// 停止全部管线（结束统计）
    pub fn stop_pipelines(&self) {
        for controller in &self.controllers {
            controller.pipeline().stop();
        }
    }

    /// 各控制器管线的运行统计（注册顺序）
    pub fn pipeline_stats(&self) -> Vec<(String, PipelineStats)> {
        self.controllers
            .iter()
            .map(|c| (c.id().to_string(), c.pipeline().stats()))
            .collect()
    }

    /// 连接全部控制器：Offline → Connecting → Online（失败时 → Faulted）
    pub fn connect(&self) -> Result<(), ClientError> {
        self.transition(StationState::Connecting, "connect requested")?;
        match self.registry.connect_all() {
            Ok(()) => self.transition(StationState::Online, "all controllers connected"),
            Err(e) => {
                self.state.try_transition(StationState::Faulted, &e.to_string());
                Err(e)
            },
        }
    }

    /// 断开全部控制器并回到 Offline
    pub fn disconnect(&self) -> Result<(), ClientError> {
        if let Some(publisher) = &self.publisher {
            publisher.shutdown();
        }
        let result = self.registry.disconnect_all();
        if self.state.state() != StationState::Offline {
            self.transition(StationState::Offline, "disconnect requested")?;
        }
        result
    }

    /// 急停：状态机进入 EStop，并向全部控制器下发急停
    ///
    /// 急停命令总会下发，即使当前状态不允许转换到 EStop。
    pub fn emergency_stop(&self, reason: &str) -> Result<(), ClientError> {
        if !self.state.emergency_stop(reason) {
            warn!(state = %self.state.state(), "emergency stop outside an armed state");
        }
        self.registry.emergency_stop_all()
    }

    /// 把每个伪通道接到共享内存发布器（通道号为配置顺序）
    ///
    /// 没有配置发布器时什么也不做。
    pub fn start_publishing(&self) -> Result<(), ClientError> {
        let Some(publisher) = &self.publisher else {
            return Ok(());
        };
        for (channel_id, channel) in (0u32..).zip(self.pseudo_channels.channels()) {
            publisher.attach(channel_id, channel)?;
        }
        Ok(())
    }

    fn transition(&self, target: StationState, reason: &str) -> Result<(), ClientError> {
        let from = self.state.state();
        if self.state.try_transition(target, reason) {
            Ok(())
        } else {
            Err(ClientError::TransitionRejected { from, to: target })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use station_hal::MockAdapter;

    const CONFIG: &str = r#"
[[controllers]]
id = "ctrl-1"
acquisition = { kind = "trigger" }
backpressure = { kind = "sampling", interval_ms = 10 }
processors = [{ kind = "validation" }, { kind = "transform" }]

[[signals]]
id = "LOAD"
controller_id = "ctrl-1"
channel_index = 0
unit = "kN"
"#;

    #[test]
    fn test_processor_specs_resolve_controller_signals() {
        let config = StationConfig::from_toml_str(CONFIG).unwrap();
        let specs = processor_specs(&config, &config.controllers[0]);
        assert!(matches!(specs[0], ProcessorSpec::Validation));
        match &specs[1] {
            ProcessorSpec::Transform { signals } => assert_eq!(signals[0].id, "LOAD"),
            other => panic!("unexpected spec: {:?}", other),
        }
    }

    #[test]
    fn test_backpressure_conversion() {
        assert_eq!(
            to_backpressure(BackpressureConfig::Throttle { duration_ms: 25 }),
            Backpressure::Throttle {
                duration: Duration::from_millis(25)
            }
        );
    }

    #[test]
    fn test_missing_adapter() {
        let config = StationConfig::from_toml_str(CONFIG).unwrap();
        let result = StationBuilder::new(config).build();
        assert!(matches!(result, Err(ClientError::MissingAdapter(id)) if id == "ctrl-1"));
    }

    #[test]
    fn test_build_registers_trigger() {
        let config = StationConfig::from_toml_str(CONFIG).unwrap();
        let station = StationBuilder::new(config)
            .adapter(Arc::new(MockAdapter::new("ctrl-1")))
            .build()
            .unwrap();
        assert!(station.trigger("ctrl-1").is_some());
        assert_eq!(station.registry().ids(), vec!["ctrl-1"]);
        assert!(station.publisher().is_none());
        assert_eq!(station.state_machine().state(), StationState::Offline);
    }

    #[test]
    fn test_connect_drives_state_machine() {
        let config = StationConfig::from_toml_str(CONFIG).unwrap();
        let mock = Arc::new(MockAdapter::new("ctrl-1"));
        let station = StationBuilder::new(config).adapter(mock.clone()).build().unwrap();

        station.connect().unwrap();
        assert_eq!(station.state_machine().state(), StationState::Online);
        // 已在线时再次连接被状态机拒绝
        assert!(matches!(station.connect(), Err(ClientError::TransitionRejected { .. })));

        station.disconnect().unwrap();
        assert_eq!(station.state_machine().state(), StationState::Offline);

        mock.set_fail_connect(true);
        assert!(station.connect().is_err());
        assert_eq!(station.state_machine().state(), StationState::Faulted);
    }
}
