//! 信号 / 伪通道扇出集成测试

use serial_test::serial;
use station_client::*;
use station_driver::{Controller, FixedRate, Pipeline, StationController};
use station_hal::MockAdapter;
use station_protocol::{PseudoChannelConfiguration, RawSample, SignalConfiguration};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

fn scripted_controller(id: &str, samples: Vec<RawSample>) -> (Arc<MockAdapter>, Arc<dyn StationController>) {
    let mock = Arc::new(MockAdapter::new(id));
    mock.push_samples(samples);
    let pipeline = Pipeline::builder()
        .adapter(mock.clone())
        .strategy(FixedRate::new(100.0).unwrap())
        .build()
        .unwrap();
    (mock, Arc::new(Controller::new(pipeline)))
}

fn generating_controller(id: &str) -> (Arc<MockAdapter>, Arc<dyn StationController>) {
    let mock = Arc::new(MockAdapter::generating(id, |i| {
        RawSample::new(i as i64 + 1, &[i as f64, 2.0], &[5.0])
    }));
    let pipeline = Pipeline::builder()
        .adapter(mock.clone())
        .strategy(FixedRate::new(200.0).unwrap())
        .build()
        .unwrap();
    (mock, Arc::new(Controller::new(pipeline)))
}

#[test]
#[serial]
fn test_signal_stream_is_cached_per_id() {
    let (mock, controller) = generating_controller("ctrl-1");
    let mut registry = ControllerRegistry::new();
    registry.register(controller).unwrap();

    let manager = Arc::new(
        SignalManager::new(
            Arc::new(registry),
            vec![
                SignalConfiguration::new("LOAD", "ctrl-1", 0, "kN"),
                SignalConfiguration::new("POS", "ctrl-1", 10, "mm"),
            ],
        )
        .unwrap(),
    );

    let first = manager.get_signal_data_stream("LOAD").unwrap();
    let second = manager.get_signal_data_stream("LOAD").unwrap();
    assert!(first.ptr_eq(&second));
    assert!(!first.ptr_eq(&manager.get_signal_data_stream("POS").unwrap()));

    // 并发首次访问也只派生一次
    let streams: Vec<_> = (0..8)
        .map(|_| {
            let manager = manager.clone();
            thread::spawn(move || manager.get_signal_data_stream("POS").unwrap())
        })
        .map(|h| h.join().unwrap())
        .collect();
    assert!(streams.windows(2).all(|w| w[0].ptr_eq(&w[1])));
    assert_eq!(manager.cached_count(), 2);

    // 两个订阅者共享同一次派生、同一个采集线程
    let a = first.subscribe();
    let b = second.subscribe();
    let pa = a.recv_timeout(Duration::from_secs(1)).unwrap();
    let pb = b.recv_timeout(Duration::from_secs(1)).unwrap();
    assert_eq!(pa.device_id, "LOAD");
    assert_eq!(pa.unit, "kN");
    assert_eq!(pb.device_id, "LOAD");
    assert_eq!(first.activation_count(), 1);

    let pos = streams[0].subscribe().recv_timeout(Duration::from_secs(1)).unwrap();
    assert_eq!(pos.value, 5.0);

    drop((a, b));
    let reads = mock.read_count();
    thread::sleep(Duration::from_millis(50));
    assert_eq!(mock.read_count(), reads, "no subscriber, no polling");
}

#[test]
#[serial]
fn test_two_constituent_pseudo_channel_averages() {
    let (_a, ctrl_a) = scripted_controller("ctrl-a", vec![RawSample::new(100, &[10.0], &[])]);
    let (_b, ctrl_b) = scripted_controller("ctrl-b", vec![RawSample::new(200, &[20.0], &[])]);

    let mut registry = ControllerRegistry::new();
    registry.register(ctrl_a).unwrap();
    registry.register(ctrl_b).unwrap();

    let signals = Arc::new(
        SignalManager::new(
            Arc::new(registry),
            vec![
                SignalConfiguration::new("A", "ctrl-a", 0, "kN"),
                SignalConfiguration::new("B", "ctrl-b", 0, "kN"),
            ],
        )
        .unwrap(),
    );
    let manager = PseudoChannelManager::new(
        signals,
        vec![PseudoChannelConfiguration::new("AVG", None, &["A", "B"])],
    )
    .unwrap();

    let channel = manager.channel("AVG").unwrap();
    assert!(!channel.is_built());
    let stream = manager.get_channel_stream("AVG").unwrap();
    assert!(channel.is_built());
    assert!(stream.ptr_eq(&channel.stream().unwrap()));

    let sub = stream.subscribe();
    let point = sub.recv_timeout(Duration::from_secs(2)).unwrap();
    assert_eq!(point.value, 15.0);
    assert_eq!(point.timestamp, 200);
    assert_eq!(point.device_id, "A");
    assert_eq!(point.unit, "");

    // 脚本耗尽后只有哨兵样本（无通道值），不再有组合输出
    assert!(sub.recv_timeout(Duration::from_millis(100)).is_err());
}

#[test]
#[serial]
fn test_single_constituent_overrides_unit() {
    let (_mock, controller) = generating_controller("ctrl-1");
    let mut registry = ControllerRegistry::new();
    registry.register(controller).unwrap();

    let signals = Arc::new(
        SignalManager::new(
            Arc::new(registry),
            vec![SignalConfiguration::new("LOAD", "ctrl-1", 1, "kN")],
        )
        .unwrap(),
    );
    let manager = PseudoChannelManager::new(
        signals,
        vec![PseudoChannelConfiguration::new("LOAD_N", Some("N"), &["LOAD"])],
    )
    .unwrap();

    let point = manager
        .get_channel_stream("LOAD_N")
        .unwrap()
        .subscribe()
        .recv_timeout(Duration::from_secs(1))
        .unwrap();
    assert_eq!(point.unit, "N");
    assert_eq!(point.value, 2.0);
    assert_eq!(point.device_id, "LOAD");
}

#[test]
fn test_pseudo_channel_config_errors() {
    let signals = Arc::new(
        SignalManager::new(
            Arc::new(ControllerRegistry::new()),
            vec![SignalConfiguration::new("A", "ctrl-1", 0, "kN")],
        )
        .unwrap(),
    );

    let unknown = PseudoChannelManager::new(
        signals.clone(),
        vec![PseudoChannelConfiguration::new("P", None, &["A", "Z"])],
    );
    assert!(matches!(unknown, Err(ClientError::SignalNotFound(id)) if id == "Z"));

    let empty = PseudoChannelManager::new(signals.clone(), vec![PseudoChannelConfiguration::new("P", None, &[])]);
    assert!(matches!(empty, Err(ClientError::EmptyPseudoChannel(_))));

    let manager = PseudoChannelManager::new(signals, vec![]).unwrap();
    assert!(matches!(
        manager.get_channel_stream("P"),
        Err(ClientError::PseudoChannelNotFound(_))
    ));
}
