//! # Station CLI
//!
//! 试验台命令行工具。
//!
//! ```bash
//! # 校验配置文件
//! station-cli check --config station.toml
//!
//! # 用 Mock 适配器仿真整台设备 10 秒
//! station-cli simulate --config station.toml --seconds 10
//!
//! # 打印状态机白名单
//! station-cli transitions
//! ```

use anyhow::Result;
use clap::{Parser, Subcommand};

mod commands;
mod simulation;

use commands::{CheckCommand, SimulateCommand, TransitionsCommand};

/// Station CLI - 试验台命令行工具
#[derive(Parser, Debug)]
#[command(name = "station-cli")]
#[command(about = "Command-line interface for mechanical test stations", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// 校验配置文件
    Check {
        #[command(flatten)]
        args: CheckCommand,
    },

    /// 用 Mock 适配器仿真试验台
    Simulate {
        #[command(flatten)]
        args: SimulateCommand,
    },

    /// 打印状态转换白名单
    Transitions {
        #[command(flatten)]
        args: TransitionsCommand,
    },
}

fn main() -> Result<()> {
    // 初始化日志
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("station_cli=info,warn")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Check { args } => args.execute(),
        Commands::Simulate { args } => args.execute(),
        Commands::Transitions { args } => args.execute(),
    }
}
