//! 从配置文件构建完整测试台的端到端测试

use serial_test::serial;
use station_client::*;
use station_hal::{HardwareAdapter, MockAdapter};
use station_protocol::RawSample;
use station_tools::{ShmRing, StationConfig};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

fn config(shm_path: &std::path::Path) -> StationConfig {
    let toml = format!(
        r#"
name = "e2e"

[[controllers]]
id = "ctrl-a"
acquisition = {{ kind = "fixed", rate_hz = 200.0 }}
processors = [{{ kind = "validation" }}, {{ kind = "transform" }}]

[[controllers]]
id = "ctrl-b"
acquisition = {{ kind = "fixed", rate_hz = 200.0 }}
backpressure = {{ kind = "batching", size = 2 }}
processors = [{{ kind = "validation" }}, {{ kind = "transform" }}]

[[signals]]
id = "LOAD_A"
controller_id = "ctrl-a"
channel_index = 0
unit = "kN"

[[signals]]
id = "LOAD_B"
controller_id = "ctrl-b"
channel_index = 0
unit = "kN"

[[pseudo_channels]]
id = "LOAD_AVG"
unit = "kN"
signal_ids = ["LOAD_A", "LOAD_B"]

[publisher]
path = "{}"
capacity = 256
"#,
        shm_path.display()
    );
    StationConfig::from_toml_str(&toml).unwrap()
}

fn adapter(id: &str, value: f64) -> Arc<dyn HardwareAdapter> {
    Arc::new(MockAdapter::generating(id, move |i| {
        RawSample::new(i as i64 + 1, &[value], &[]).with_load(1.0)
    }))
}

#[test]
#[serial]
fn test_station_publishes_pseudo_channel_to_shm() {
    let dir = tempfile::tempdir().unwrap();
    let shm_path = dir.path().join("station.shm");

    let station = StationBuilder::new(config(&shm_path))
        .adapters([adapter("ctrl-a", 10.0), adapter("ctrl-b", 30.0)])
        .status_poll_interval(Duration::from_millis(5))
        .build()
        .unwrap();
    assert_eq!(station.name(), "e2e");

    station.connect().unwrap();
    let machine = station.state_machine();
    assert!(machine.try_transition(StationState::Ready, "operator"));
    assert!(machine.try_transition(StationState::Running, "operator"));
    assert!(machine.is_operational());

    station.start_publishing().unwrap();
    let publisher = station.publisher().unwrap();

    let deadline = Instant::now() + Duration::from_secs(2);
    while publisher.published() < 5 && Instant::now() < deadline {
        thread::sleep(Duration::from_millis(10));
    }
    assert!(publisher.published() >= 5);

    // 另一个读者打开同一个文件
    let reader = ShmRing::open(&shm_path).unwrap();
    let records = reader.read_latest(5);
    assert_eq!(records.len(), 5);
    assert!(records.iter().all(|r| r.channel_id == 0 && r.value == 20.0));
    assert!(records.windows(2).all(|w| w[1].sequence_index == w[0].sequence_index + 1));

    let stats = station.pipeline_stats();
    assert_eq!(stats.len(), 2);
    assert_eq!(stats[0].0, "ctrl-a");
    assert!(stats.iter().all(|(_, s)| s.processed_count > 0 && s.error_count == 0));

    assert!(station.emergency_stop("test over").is_ok());
    assert_eq!(machine.state(), StationState::EStop);
    station.disconnect().unwrap();
    assert_eq!(machine.state(), StationState::Offline);
    assert!(
        station.registry().iter().all(|c| !c.data_stream().is_active()),
        "disconnect tears down every acquisition worker"
    );
}
