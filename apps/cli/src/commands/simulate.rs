//! 仿真命令
//!
//! 用 Mock 适配器驱动整台试验台：
//! Offline → Connecting → Online → Ready → Running，
//! 周期打印每个伪通道的最新数据点，结束时打印各管线统计。

use crate::simulation;
use anyhow::{Context, Result};
use clap::Args;
use station_sdk::client::{Station, StationBuilder, StationState};
use station_sdk::driver::Subscription;
use station_sdk::protocol::DataPoint;
use station_sdk::tools::StationConfig;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{info, warn};

/// 仿真命令参数
#[derive(Args, Debug)]
pub struct SimulateCommand {
    /// 配置文件路径
    #[arg(short, long)]
    pub config: PathBuf,

    /// 仿真时长（秒）
    #[arg(short, long, default_value_t = 5)]
    pub seconds: u64,

    /// 打印间隔（毫秒）
    #[arg(long, default_value_t = 500)]
    pub print_interval_ms: u64,

    /// 触发式控制器的触发频率（Hz）
    #[arg(long, default_value_t = 20.0)]
    pub trigger_hz: f64,
}

impl SimulateCommand {
    pub fn execute(&self) -> Result<()> {
        let config = StationConfig::load_from_file(&self.config)
            .with_context(|| format!("failed to load {}", self.config.display()))?;
        let controller_ids: Vec<String> = config.controllers.iter().map(|c| c.id.clone()).collect();

        let station = StationBuilder::new(config.clone())
            .adapters(simulation::adapters(&config))
            .build()
            .context("failed to build station")?;

        let running = Arc::new(AtomicBool::new(true));
        let r = running.clone();
        ctrlc::set_handler(move || {
            r.store(false, Ordering::SeqCst);
            println!("\n收到退出信号，正在关闭...");
        })?;

        bring_up(&station)?;
        station.start_pipelines();
        station.start_publishing()?;

        let subscriptions = subscribe_channels(&station)?;
        if subscriptions.is_empty() {
            warn!("no pseudo channels configured, only pipeline statistics will be shown");
        }

        let trigger_interval = Duration::from_secs_f64(1.0 / self.trigger_hz.max(0.1));
        let print_interval = Duration::from_millis(self.print_interval_ms.max(10));
        let deadline = Instant::now() + Duration::from_secs(self.seconds);
        let mut next_print = Instant::now() + print_interval;

        while running.load(Ordering::SeqCst) && Instant::now() < deadline {
            for id in &controller_ids {
                if let Some(trigger) = station.trigger(id) {
                    trigger.fire();
                }
            }

            if Instant::now() >= next_print {
                print_latest(&subscriptions);
                next_print += print_interval;
            }
            thread::sleep(trigger_interval.min(print_interval));
        }

        drop(subscriptions);
        shut_down(&station)?;
        print_stats(&station);
        Ok(())
    }
}

/// Offline → Connecting → Online → Ready → Running
fn bring_up(station: &Station) -> Result<()> {
    station.connect().context("failed to connect controllers")?;
    let machine = station.state_machine();
    for target in [StationState::Ready, StationState::Running] {
        if !machine.try_transition_from(target, "simulation", "station-cli") {
            anyhow::bail!("station refused transition to {}", target);
        }
    }
    info!(station = station.name(), "station running");
    Ok(())
}

fn shut_down(station: &Station) -> Result<()> {
    let machine = station.state_machine();
    machine.try_transition_from(StationState::Ready, "simulation finished", "station-cli");
    station.stop_pipelines();
    station.disconnect()?;
    println!("\nstate history:");
    for event in machine.history() {
        println!("  {} -> {} ({})", event.previous, event.current, event.reason);
    }
    Ok(())
}

fn subscribe_channels(station: &Station) -> Result<Vec<(String, Subscription<DataPoint>)>> {
    let channels = station.pseudo_channels();
    channels
        .ids()
        .map(|id| {
            let stream = channels.get_channel_stream(id)?;
            Ok((id.to_string(), stream.subscribe()))
        })
        .collect()
}

fn print_latest(subscriptions: &[(String, Subscription<DataPoint>)]) {
    for (id, subscription) in subscriptions {
        match subscription.drain().pop() {
            Some(point) => println!(
                "{:<16} {:>12.4} {:<6} ts={} {:?}",
                id, point.value, point.unit, point.timestamp, point.quality
            ),
            None => println!("{:<16} (no data)", id),
        }
    }
}

fn print_stats(station: &Station) {
    println!("\npipeline statistics:");
    for controller in station.controllers() {
        let pipeline = controller.pipeline();
        let stats = pipeline.stats();
        let metrics = pipeline.metrics().snapshot();
        println!(
            "  {:<12} processed={} errors={} throughput={:.1}/s reads={} failures={} rejected={} evicted={}",
            pipeline.name(),
            stats.processed_count,
            stats.error_count,
            stats.throughput(),
            metrics.reads_total,
            metrics.read_failures,
            metrics.samples_rejected,
            metrics.handoff_evictions
        );
    }
    if let Some(publisher) = station.publisher() {
        println!("  shm records published: {}", publisher.published());
    }
}
