//! End-to-end acquisition: registry-built drivers running under the session
//! loop over scripted transports.

use acq_core::config::{AcquisitionLimits, DeviceConfig};
use acq_core::feed::{feed_channel, FeedPacket, FeedReceiver, SessionFeed};
use acq_core::framing::StreamFramer;
use acq_core::session::{AcquisitionSession, SessionHandle, StopReason};
use acq_core::transport::MockByteSource;
use acq_hardware::drivers::demo;
use acq_hardware::registry::DriverRegistry;
use std::time::Duration;

fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

fn empty_params() -> toml::Value {
    toml::Value::Table(toml::map::Map::new())
}

fn start_session(
    driver: &str,
    params: &toml::Value,
    transport: MockByteSource,
    limits: AcquisitionLimits,
) -> (
    AcquisitionSession<MockByteSource>,
    SessionHandle,
    FeedReceiver,
) {
    let registry = DriverRegistry::with_bundled_drivers();
    let parts = registry.create(driver, params).unwrap();

    let (tx, rx) = feed_channel(512);
    let (session, handle) = AcquisitionSession::new(
        transport,
        StreamFramer::new(parts.validator, 256),
        parts.handler,
        SessionFeed::new(tx),
        limits,
    );
    let session = session.with_poll_interval(Duration::from_millis(1));
    (session, handle, rx)
}

async fn drain(rx: &mut FeedReceiver) -> Vec<FeedPacket> {
    let mut packets = Vec::new();
    loop {
        let p = rx.recv().await.unwrap();
        let done = matches!(*p, FeedPacket::End);
        packets.push((*p).clone());
        if done {
            return packets;
        }
    }
}

fn sample_values(feed: &[FeedPacket]) -> Vec<f64> {
    feed.iter()
        .filter_map(|p| match p {
            FeedPacket::Sample(s) => Some(s.value),
            _ => None,
        })
        .collect()
}

#[tokio::test]
async fn demo_device_with_noise_and_fragmentation() {
    init_tracing();
    let mut transport = MockByteSource::new();
    // Two frames with noise around them, delivered byte by byte.
    let mut stream = vec![0x00];
    stream.extend_from_slice(&demo::build_frame(&[10, 20]));
    stream.push(0xFF);
    stream.extend_from_slice(&demo::build_frame(&[30]));
    for b in stream {
        transport.push_chunk(vec![b]);
    }

    let (session, _handle, mut rx) = start_session(
        "demo",
        &empty_params(),
        transport,
        AcquisitionLimits {
            limit_samples: Some(3),
            limit_msec: None,
        },
    );

    let summary = session.run().await.unwrap();
    assert_eq!(summary.stop_reason, StopReason::SampleLimit);
    assert_eq!(summary.samples, 3);
    assert_eq!(summary.packets, 2);

    let feed = drain(&mut rx).await;
    assert!(matches!(feed.first(), Some(FeedPacket::Header { .. })));
    assert!(matches!(feed.last(), Some(FeedPacket::End)));
    assert_eq!(sample_values(&feed), vec![1.0, 2.0, 3.0]);
}

#[tokio::test]
async fn appa_memory_log_download_stops_on_log_end() {
    fn appa_packet(packet_type: u8, payload: &[u8]) -> Vec<u8> {
        let mut p = vec![0x55, 0x55, packet_type, payload.len() as u8];
        p.extend_from_slice(payload);
        let sum = p.iter().fold(0u8, |acc, &b| acc.wrapping_add(b));
        p.push(sum);
        p
    }
    fn log_record(t1_tenths: i16, t2_tenths: i16) -> Vec<u8> {
        let mut record = vec![0u8; 20];
        record[12..14].copy_from_slice(&t1_tenths.to_le_bytes());
        record[14..16].copy_from_slice(&t2_tenths.to_le_bytes());
        record
    }

    let mut transport = MockByteSource::new();
    transport.push_chunk(appa_packet(0x18, &[])); // log start
    transport.push_chunk(appa_packet(0x11, &[2, 0])); // 2 records
    let mut records = log_record(215, 220);
    records.extend_from_slice(&log_record(-100, 305));
    // Record data split mid-record across two packets.
    let mut chunk = appa_packet(0x14, &records[..25]);
    chunk.extend_from_slice(&appa_packet(0x14, &records[25..]));
    transport.push_chunk(chunk);
    transport.push_chunk(appa_packet(0x19, &[])); // log end

    let params: toml::Value = toml::from_str("data_source = \"memory\"").unwrap();
    let (session, _handle, mut rx) = start_session(
        "appa-55ii",
        &params,
        transport,
        AcquisitionLimits::default(),
    );

    let summary = session.run().await.unwrap();
    assert_eq!(summary.stop_reason, StopReason::DeviceEnd);
    assert_eq!(summary.samples, 4);

    let feed = drain(&mut rx).await;
    assert_eq!(sample_values(&feed), vec![21.5, 22.0, -10.0, 30.5]);
    assert!(matches!(feed.last(), Some(FeedPacket::End)));
}

#[tokio::test]
async fn cem_stream_emits_flagged_spl_readings() {
    let mut transport = MockByteSource::new();
    transport.push_chunk(vec![0xA5, 0x03]); // slow time weighting
    transport.push_chunk(vec![0xA5, 0x15, 0x00]); // C frequency weighting
    transport.push_chunk(vec![0xA5, 0x0D, 0x09, 0x35]); // 93.5 dB
    transport.push_chunk(vec![0xA5, 0x0B, 0x00]); // readout

    let (session, _handle, mut rx) = start_session(
        "cem-dt-885x",
        &empty_params(),
        transport,
        AcquisitionLimits {
            limit_samples: Some(1),
            limit_msec: None,
        },
    );

    let summary = session.run().await.unwrap();
    assert_eq!(summary.stop_reason, StopReason::SampleLimit);

    let feed = drain(&mut rx).await;
    let samples: Vec<_> = feed
        .iter()
        .filter_map(|p| match p {
            FeedPacket::Sample(s) => Some(s.clone()),
            _ => None,
        })
        .collect();
    assert_eq!(samples.len(), 1);
    assert_eq!(samples[0].value, 93.5);
    assert!(samples[0].flags.time_weight_slow);
    assert!(samples[0].flags.freq_weight_c);
}

#[tokio::test]
async fn transport_failure_surfaces_after_end_marker() {
    let mut transport = MockByteSource::new();
    transport.push_chunk(demo::build_frame(&[5]));
    transport.push_error(std::io::ErrorKind::BrokenPipe);

    let (session, _handle, mut rx) = start_session(
        "demo",
        &empty_params(),
        transport,
        AcquisitionLimits::default(),
    );

    assert!(session.run().await.is_err());

    let feed = drain(&mut rx).await;
    let ends = feed
        .iter()
        .filter(|p| matches!(p, FeedPacket::End))
        .count();
    assert_eq!(ends, 1);
    assert_eq!(sample_values(&feed), vec![0.5]);
}

#[tokio::test]
async fn device_config_drives_session_setup() {
    let config = DeviceConfig::from_toml_str(
        r#"
        driver = "demo"
        conn = "/dev/ttyUSB0"
        poll_interval_ms = 1

        [limits]
        limit_samples = 2

        [params]
        scale = 1.0
        "#,
    )
    .unwrap();

    let mut transport = MockByteSource::new();
    transport.push_chunk(demo::build_frame(&[7, 8]));

    let registry = DriverRegistry::with_bundled_drivers();
    let factory = registry.get(&config.driver).unwrap();
    assert_eq!(
        config.serial_params(factory.default_serialcomm()).unwrap().baud,
        9600
    );

    let parts = registry.create(&config.driver, &config.params).unwrap();
    let (tx, mut rx) = feed_channel(64);
    let (session, _handle) = AcquisitionSession::new(
        transport,
        StreamFramer::new(parts.validator, 256),
        parts.handler,
        SessionFeed::new(tx),
        config.limits,
    );
    let session = session.with_poll_interval(config.poll_interval().unwrap_or_default());

    let summary = session.run().await.unwrap();
    assert_eq!(summary.stop_reason, StopReason::SampleLimit);

    let feed = drain(&mut rx).await;
    assert_eq!(sample_values(&feed), vec![7.0, 8.0]);
}
