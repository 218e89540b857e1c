//! 命令模块

pub mod check;
pub mod simulate;
pub mod transitions;

pub use check::CheckCommand;
pub use simulate::SimulateCommand;
pub use transitions::TransitionsCommand;
