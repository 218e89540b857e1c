//! 状态转换白名单命令

use anyhow::Result;
use clap::Args;
use station_sdk::StationState;

/// 白名单打印参数
#[derive(Args, Debug)]
pub struct TransitionsCommand {
    /// 只打印某个状态的出边
    #[arg(short, long)]
    pub from: Option<String>,
}

impl TransitionsCommand {
    pub fn execute(&self) -> Result<()> {
        let states: Vec<StationState> = match &self.from {
            Some(name) => vec![parse_state(name)?],
            None => StationState::ALL.to_vec(),
        };
        for state in states {
            println!("{}", format_row(state));
        }
        Ok(())
    }
}

fn parse_state(name: &str) -> Result<StationState> {
    StationState::ALL
        .into_iter()
        .find(|s| s.as_str().eq_ignore_ascii_case(name))
        .ok_or_else(|| anyhow::anyhow!("unknown state `{}`", name))
}

fn format_row(state: StationState) -> String {
    let targets: Vec<&str> = state.allowed_targets().iter().map(|t| t.as_str()).collect();
    let marker = if state.is_operational() { " *" } else { "" };
    format!("{:<12} -> {}{}", state.as_str(), targets.join(", "), marker)
}
