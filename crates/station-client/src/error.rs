//! 客户端层错误类型

use crate::state::StationState;
use station_driver::DriverError;
use station_tools::{ConfigError, ShmError};
use thiserror::Error;

/// 客户端层统一错误类型
#[derive(Error, Debug)]
pub enum ClientError {
    #[error("Driver error: {0}")]
    Driver(#[from] DriverError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Shared memory error: {0}")]
    Shm(#[from] ShmError),

    #[error("Signal not found: {0}")]
    SignalNotFound(String),

    #[error("Controller not found: {0}")]
    ControllerNotFound(String),

    #[error("Pseudo channel not found: {0}")]
    PseudoChannelNotFound(String),

    #[error("Duplicate {kind} id: {id}")]
    DuplicateId { kind: &'static str, id: String },

    #[error("Pseudo channel `{0}` has no constituent signals")]
    EmptyPseudoChannel(String),

    #[error("No controllers registered")]
    NoControllers,

    /// 配置中声明的控制器没有对应的硬件适配器
    #[error("No adapter supplied for controller `{0}`")]
    MissingAdapter(String),

    #[error("State transition rejected: {from} -> {to}")]
    TransitionRejected { from: StationState, to: StationState },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        assert_eq!(
            ClientError::SignalNotFound("LOAD".into()).to_string(),
            "Signal not found: LOAD"
        );
        assert_eq!(
            ClientError::DuplicateId {
                kind: "controller",
                id: "ctrl-1".into()
            }
            .to_string(),
            "Duplicate controller id: ctrl-1"
        );
        assert_eq!(
            ClientError::TransitionRejected {
                from: StationState::Offline,
                to: StationState::Running
            }
            .to_string(),
            "State transition rejected: Offline -> Running"
        );
    }

    #[test]
    fn test_driver_error_conversion() {
        let err: ClientError = DriverError::Timeout.into();
        assert!(matches!(err, ClientError::Driver(DriverError::Timeout)));
    }
}
