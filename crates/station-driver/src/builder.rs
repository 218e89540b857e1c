//! Builder 模式实现
//!
//! 提供链式构造 [`Pipeline`] 实例的便捷方式。
//! 所有参数在 `build()` 时校验，非法参数立即返回错误。

use crate::acquisition::AcquisitionStrategy;
use crate::backpressure::Backpressure;
use crate::error::DriverError;
use crate::pipeline::{Pipeline, PipelineConfig};
use crate::processor::ProcessorSpec;
use station_hal::HardwareAdapter;
use std::sync::Arc;
use tracing::debug;

/// Pipeline Builder（链式构造）
///
/// # Example
///
/// ```no_run
/// use station_driver::{Backpressure, FixedRate, PipelineBuilder, ProcessorSpec};
/// # fn adapter() -> std::sync::Arc<dyn station_hal::HardwareAdapter> { unimplemented!() }
///
/// let pipeline = PipelineBuilder::new()
///     .adapter(adapter())
///     .strategy(FixedRate::new(100.0)?)
///     .backpressure(Backpressure::Batching { size: 4 })
///     .processor(ProcessorSpec::Validation)
///     .build()?;
/// pipeline.start();
/// # Ok::<(), station_driver::DriverError>(())
/// ```
#[derive(Default)]
pub struct PipelineBuilder {
    /// Pipeline 名称（默认使用适配器 ID）
    name: Option<String>,
    adapter: Option<Arc<dyn HardwareAdapter>>,
    strategy: Option<Arc<dyn AcquisitionStrategy>>,
    backpressure: Option<Backpressure>,
    processors: Vec<ProcessorSpec>,
    config: Option<PipelineConfig>,
}

impl PipelineBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// 设置硬件适配器（必需）
    pub fn adapter(mut self, adapter: Arc<dyn HardwareAdapter>) -> Self {
        self.adapter = Some(adapter);
        self
    }

    /// 设置采集策略（必需）
    pub fn strategy(mut self, strategy: impl AcquisitionStrategy + 'static) -> Self {
        self.strategy = Some(Arc::new(strategy));
        self
    }

    /// 设置共享的采集策略（调用方保留句柄以观察 `current_rate()`）
    pub fn shared_strategy(mut self, strategy: Arc<dyn AcquisitionStrategy>) -> Self {
        self.strategy = Some(strategy);
        self
    }

    pub fn backpressure(mut self, backpressure: Backpressure) -> Self {
        self.backpressure = Some(backpressure);
        self
    }

    /// 追加一个处理阶段（按追加顺序组合）
    pub fn processor(mut self, spec: ProcessorSpec) -> Self {
        self.processors.push(spec);
        self
    }

    pub fn processors(mut self, specs: impl IntoIterator<Item = ProcessorSpec>) -> Self {
        self.processors.extend(specs);
        self
    }

    pub fn pipeline_config(mut self, config: PipelineConfig) -> Self {
        self.config = Some(config);
        self
    }

    pub fn build(self) -> Result<Pipeline, DriverError> {
        let adapter = self.adapter.ok_or(DriverError::MissingAdapter)?;
        let strategy = self.strategy.ok_or(DriverError::MissingStrategy)?;

        let config = self.config.unwrap_or_default();
        config.validate()?;
        if let Some(backpressure) = &self.backpressure {
            backpressure.validate()?;
        }
        for spec in &self.processors {
            spec.validate()?;
        }

        let name = self.name.unwrap_or_else(|| adapter.id().to_string());
        debug!(
            pipeline = %name,
            strategy = %strategy.name(),
            processors = self.processors.len(),
            "building pipeline"
        );

        Ok(Pipeline::new(
            name,
            adapter,
            strategy,
            self.backpressure,
            self.processors,
            config,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::acquisition::FixedRate;
    use station_hal::MockAdapter;
    use std::time::Duration;

    fn mock() -> Arc<dyn HardwareAdapter> {
        Arc::new(MockAdapter::new("ctrl-1"))
    }

    #[test]
    fn test_missing_parts() {
        let err = PipelineBuilder::new().strategy(FixedRate::new(10.0).unwrap()).build();
        assert!(matches!(err, Err(DriverError::MissingAdapter)));

        let err = PipelineBuilder::new().adapter(mock()).build();
        assert!(matches!(err, Err(DriverError::MissingStrategy)));
    }

    #[test]
    fn test_invalid_parameters_fail_fast() {
        let err = PipelineBuilder::new()
            .adapter(mock())
            .strategy(FixedRate::new(10.0).unwrap())
            .backpressure(Backpressure::DropOldest { capacity: 0 })
            .build();
        assert!(matches!(err, Err(DriverError::InvalidParameter { name: "capacity", .. })));

        let err = PipelineBuilder::new()
            .adapter(mock())
            .strategy(FixedRate::new(10.0).unwrap())
            .processor(ProcessorSpec::Aggregation { window: Duration::ZERO })
            .build();
        assert!(matches!(err, Err(DriverError::InvalidParameter { .. })));
    }

    #[test]
    fn test_default_name_is_adapter_id() {
        let pipeline = PipelineBuilder::new()
            .adapter(mock())
            .strategy(FixedRate::new(10.0).unwrap())
            .build()
            .unwrap();
        assert_eq!(pipeline.name(), "ctrl-1");
        assert!(!pipeline.is_acquiring());
    }
}
