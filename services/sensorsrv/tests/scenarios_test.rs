//! End-to-end behaviour of the polling core over loopback sockets

#![allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable

mod common;

use std::time::Duration;

use common::{drain, fast_settings, frame, quick_reconnect_settings, recv, sensor, FrameServer};
use sensorsrv::domain::{AlarmType, ProtocolConfig, SensorStatus, FAULT_SENTINEL};
use sensorsrv::SensorManager;

fn manager() -> SensorManager {
    SensorManager::new(fast_settings(), 256)
}

#[tokio::test]
async fn test_sensors_on_one_bridged_port_share_a_connection() {
    let server = FrameServer::start().await;
    let port = server.addr.to_string();
    let mgr = manager();

    let a = mgr
        .add_sensor(sensor(1, 20.0, 80.0, ProtocolConfig::serial(port.clone())))
        .await
        .unwrap();
    let b = mgr
        .add_sensor(sensor(2, 20.0, 80.0, ProtocolConfig::serial(port.clone())))
        .await
        .unwrap();
    assert_eq!(a, b);
    assert_eq!(a.as_str(), format!("serial:{port}"));
    assert_eq!(mgr.endpoint_count(), 1);

    let mut readings = mgr.subscribe_readings();
    let results = mgr.connect_all().await;
    assert_eq!(results.get(&a), Some(&true));

    server.send(frame(1, 45.5));
    server.send(frame(2, 50.0));

    let first = recv(&mut readings).await;
    let second = recv(&mut readings).await;
    assert_eq!((first.sensor_id, first.value), (1, 45.5));
    assert_eq!((second.sensor_id, second.value), (2, 50.0));
    assert_eq!(first.sensor_name, "Sensor 1");
    assert_eq!(first.status, SensorStatus::Ok);

    mgr.disconnect_all().await;
}

#[tokio::test]
async fn test_alarm_emitted_once_per_transition() {
    let server = FrameServer::start().await;
    let mgr = manager();
    mgr.add_sensor(sensor(
        1,
        20.0,
        80.0,
        ProtocolConfig::tcp("127.0.0.1", server.addr.port()),
    ))
    .await
    .unwrap();

    let mut readings = mgr.subscribe_readings();
    let mut alarms = mgr.subscribe_alarms();
    mgr.connect_all().await;

    for value in [85.0, 85.0, 30.0, 15.0] {
        server.send(frame(1, value));
    }
    let mut seen = Vec::new();
    for _ in 0..4 {
        seen.push(recv(&mut readings).await.status);
    }
    assert_eq!(
        seen,
        vec![
            SensorStatus::HighAlarm,
            SensorStatus::HighAlarm,
            SensorStatus::Ok,
            SensorStatus::LowAlarm
        ]
    );

    assert_eq!(recv(&mut alarms).await.alarm_type, AlarmType::High);
    assert_eq!(recv(&mut alarms).await.alarm_type, AlarmType::Low);
    assert!(alarms.try_recv().is_err());
    assert_eq!(mgr.alarm_count(), 2);

    mgr.disconnect_all().await;
}

#[tokio::test]
async fn test_set_limit_does_not_rewrite_history() {
    let server = FrameServer::start().await;
    let mgr = manager();
    mgr.add_sensor(sensor(
        1,
        20.0,
        80.0,
        ProtocolConfig::tcp("127.0.0.1", server.addr.port()),
    ))
    .await
    .unwrap();
    let mut alarms = mgr.subscribe_alarms();
    mgr.connect_all().await;

    server.send(frame(1, 85.0));
    let first = recv(&mut alarms).await;
    assert_eq!((first.low_limit, first.high_limit), (20.0, 80.0));

    mgr.set_limit(1, 10.0, 90.0).unwrap();
    server.send(frame(1, 50.0));
    server.send(frame(1, 95.0));
    let second = recv(&mut alarms).await;
    assert_eq!(second.alarm_type, AlarmType::High);
    assert_eq!((second.low_limit, second.high_limit), (10.0, 90.0));

    let logged = mgr.alarms(100);
    assert_eq!(logged.len(), 2);
    assert_eq!((logged[0].low_limit, logged[0].high_limit), (20.0, 80.0));

    mgr.disconnect_all().await;
}

#[tokio::test]
async fn test_dropped_tcp_link_faults_sensor() {
    let server = FrameServer::start().await;
    let mgr = manager();
    let key = mgr
        .add_sensor(sensor(
            3,
            50.0,
            150.0,
            ProtocolConfig::tcp("127.0.0.1", server.addr.port()),
        ))
        .await
        .unwrap();
    let mut alarms = mgr.subscribe_alarms();
    assert_eq!(mgr.connect_all().await.get(&key), Some(&true));

    server.drop_client();

    let alarm = recv(&mut alarms).await;
    assert_eq!(alarm.sensor_id, 3);
    assert_eq!(alarm.alarm_type, AlarmType::Fault);
    assert_eq!(alarm.value, FAULT_SENTINEL);
    assert_eq!(mgr.sensor_status(3), Some(SensorStatus::Faulty));
    assert_eq!(mgr.get_connection_status().get(&key), Some(&false));

    mgr.disconnect_all().await;
}

#[tokio::test]
async fn test_malformed_lines_are_skipped() {
    let server = FrameServer::start().await;
    let mgr = manager();
    let key = mgr
        .add_sensor(sensor(
            1,
            20.0,
            80.0,
            ProtocolConfig::tcp("127.0.0.1", server.addr.port()),
        ))
        .await
        .unwrap();
    let mut readings = mgr.subscribe_readings();
    mgr.connect_all().await;

    server.send("{not json}\n");
    server.send(frame(99, 10.0));
    server.send(frame(1, 42.0));

    let reading = recv(&mut readings).await;
    assert_eq!((reading.sensor_id, reading.value), (1, 42.0));
    assert_eq!(mgr.decode_errors().get(&key), Some(&1));
    assert_eq!(mgr.get_connection_status().get(&key), Some(&true));

    mgr.disconnect_all().await;
}

#[tokio::test]
async fn test_unreachable_endpoint_reports_false() {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);

    let mgr = manager();
    let key = mgr
        .add_sensor(sensor(1, 0.0, 1.0, ProtocolConfig::tcp("127.0.0.1", port)))
        .await
        .unwrap();
    let results = tokio::time::timeout(Duration::from_secs(5), mgr.connect_all())
        .await
        .unwrap();
    assert_eq!(results.get(&key), Some(&false));
    assert_eq!(mgr.sensor_status(1), Some(SensorStatus::Faulty));
}

#[tokio::test]
async fn test_tcp_link_recovers_after_drop() {
    let server = FrameServer::start().await;
    let mgr = SensorManager::new(quick_reconnect_settings(), 256);
    let key = mgr
        .add_sensor(sensor(
            1,
            20.0,
            80.0,
            ProtocolConfig::tcp("127.0.0.1", server.addr.port()),
        ))
        .await
        .unwrap();
    let mut readings = mgr.subscribe_readings();
    mgr.connect_all().await;

    server.send(frame(1, 45.0));
    assert_eq!(recv(&mut readings).await.status, SensorStatus::Ok);

    server.drop_client();
    let faulty = recv(&mut readings).await;
    assert_eq!(faulty.status, SensorStatus::Faulty);
    assert_eq!(faulty.value, FAULT_SENTINEL);

    // Queued until the worker reconnects and the server accepts it
    server.send(frame(1, 42.0));
    let mut back = recv(&mut readings).await;
    while back.status == SensorStatus::Faulty {
        back = recv(&mut readings).await;
    }
    assert_eq!((back.value, back.status), (42.0, SensorStatus::Ok));
    assert_eq!(mgr.get_connection_status().get(&key), Some(&true));

    mgr.disconnect_all().await;
}

#[tokio::test]
async fn test_disconnect_all_stops_delivery() {
    let server = FrameServer::start().await;
    let mgr = manager();
    let key = mgr
        .add_sensor(sensor(
            1,
            20.0,
            80.0,
            ProtocolConfig::tcp("127.0.0.1", server.addr.port()),
        ))
        .await
        .unwrap();
    let mut readings = mgr.subscribe_readings();
    mgr.connect_all().await;

    server.send(frame(1, 45.0));
    recv(&mut readings).await;

    mgr.disconnect_all().await;
    assert_eq!(mgr.get_connection_status().get(&key), Some(&false));
    drain(&mut readings).await;

    server.send(frame(1, 50.0));
    let late = tokio::time::timeout(Duration::from_millis(300), readings.recv()).await;
    assert!(late.is_err(), "reading delivered after disconnect: {late:?}");
}
