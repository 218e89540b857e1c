//! 控制器注册表
//!
//! 持有一个或多个控制器，按注册顺序提供多设备最新值联合流：
//! 任一控制器发射时，输出一个长度为 N 的数组，包含每个控制器的最新样本。

use crate::error::ClientError;
use station_driver::{SharedStream, StationController, StreamConfig};
use station_hal::ConnectionStatus;
use station_protocol::ProcessedSample;
use std::collections::HashMap;
use std::sync::{Arc, OnceLock};
use tracing::{info, warn};

/// 控制器注册表
#[derive(Default)]
pub struct ControllerRegistry {
    controllers: Vec<Arc<dyn StationController>>,
    index: HashMap<String, usize>,
    combined_data: OnceLock<SharedStream<Vec<ProcessedSample>>>,
    combined_status: OnceLock<SharedStream<Vec<ConnectionStatus>>>,
}

impl std::fmt::Debug for ControllerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ControllerRegistry").field("ids", &self.ids()).finish()
    }
}

impl ControllerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 注册控制器（ID 重复时拒绝）
    ///
    /// 注册会使已缓存的联合流失效，之后的调用按新的控制器集合重建。
    pub fn register(&mut self, controller: Arc<dyn StationController>) -> Result<(), ClientError> {
        let id = controller.id().to_string();
        if self.index.contains_key(&id) {
            return Err(ClientError::DuplicateId { kind: "controller", id });
        }
        self.index.insert(id, self.controllers.len());
        self.controllers.push(controller);
        self.combined_data = OnceLock::new();
        self.combined_status = OnceLock::new();
        Ok(())
    }

    pub fn get(&self, id: &str) -> Result<&Arc<dyn StationController>, ClientError> {
        self.index
            .get(id)
            .map(|&i| &self.controllers[i])
            .ok_or_else(|| ClientError::ControllerNotFound(id.to_string()))
    }

    /// 控制器 ID（注册顺序）
    pub fn ids(&self) -> Vec<&str> {
        self.controllers.iter().map(|c| c.id()).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<dyn StationController>> {
        self.controllers.iter()
    }

    pub fn len(&self) -> usize {
        self.controllers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.controllers.is_empty()
    }

    /// 连接全部控制器
    ///
    /// 每个控制器都会尝试连接；返回第一个失败。
    pub fn connect_all(&self) -> Result<(), ClientError> {
        self.for_each_controller("connect", |c| c.connect())
    }

    /// 断开全部控制器（同时停止各自的管线）
    pub fn disconnect_all(&self) -> Result<(), ClientError> {
        self.for_each_controller("disconnect", |c| c.disconnect())
    }

    /// 向全部控制器下发急停
    pub fn emergency_stop_all(&self) -> Result<(), ClientError> {
        self.for_each_controller("emergency stop", |c| c.emergency_stop())
    }

    fn for_each_controller(
        &self,
        action: &str,
        op: impl Fn(&dyn StationController) -> Result<(), station_driver::DriverError>,
    ) -> Result<(), ClientError> {
        let mut first_error = None;
        for controller in &self.controllers {
            if let Err(e) = op(controller.as_ref()) {
                warn!(controller = controller.id(), "{} failed: {}", action, e);
                first_error.get_or_insert(e);
            }
        }
        match first_error {
            Some(e) => Err(e.into()),
            None => {
                info!(count = self.controllers.len(), "{} completed for all controllers", action);
                Ok(())
            },
        }
    }

    /// 多控制器数据联合流（缓存）
    ///
    /// 单控制器时不经过联合，直接包装成长度为 1 的数组。
    pub fn combined_data_stream(&self) -> Result<SharedStream<Vec<ProcessedSample>>, ClientError> {
        self.combined(&self.combined_data, "combined/data", StreamConfig::default(), |c| {
            c.data_stream()
        })
    }

    /// 多控制器连接状态联合流（缓存，新订阅者立即收到当前组合）
    pub fn combined_status_stream(&self) -> Result<SharedStream<Vec<ConnectionStatus>>, ClientError> {
        self.combined(&self.combined_status, "combined/status", StreamConfig::replaying(), |c| {
            c.status_stream()
        })
    }

    fn combined<T>(
        &self,
        cell: &OnceLock<SharedStream<Vec<T>>>,
        name: &str,
        config: StreamConfig,
        source: impl Fn(&dyn StationController) -> SharedStream<T>,
    ) -> Result<SharedStream<Vec<T>>, ClientError>
    where
        T: Clone + Send + Sync + 'static,
    {
        if self.controllers.is_empty() {
            return Err(ClientError::NoControllers);
        }

        let stream = cell.get_or_init(|| {
            let mut streams: Vec<SharedStream<T>> =
                self.controllers.iter().map(|c| source(c.as_ref())).collect();
            if streams.len() == 1 {
                let single = streams.remove(0);
                single.map(name, |item| vec![item])
            } else {
                SharedStream::combine_latest(name, streams, config)
            }
        });
        Ok(stream.clone())
    }
}
