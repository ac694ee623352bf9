//! Adapter-surface tests against the fake reader
// (c) 2025 the llrpd contributors

use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::Duration;

use assertables::assert_contains;
use pretty_assertions::assert_eq;
use tokio::sync::mpsc;

use super::{
    CommandRequest, DeviceEvent, DiscoveredDevice, Driver, DriverError, ProtocolProperties,
    RESOURCE_ACTION, RESOURCE_READER_CONFIG, RESOURCE_RO_SPEC, RESOURCE_RO_SPEC_ID,
};
use crate::config::Settings;
use crate::protocol::header::MessageType;
use crate::reader::TrySendError;
use crate::util::test_reader::FakeReader;

fn fast_settings() -> Settings {
    Settings {
        request_timeout_secs: 5,
        shutdown_grace_ms: 200,
        initial_backoff_ms: 10,
        max_backoff_ms: 50,
        ..Settings::default()
    }
}

fn tcp_protocols(addr: SocketAddr) -> ProtocolProperties {
    let mut tcp = HashMap::new();
    let _ = tcp.insert("host".to_owned(), addr.ip().to_string());
    let _ = tcp.insert("port".to_owned(), addr.port().to_string());
    let mut protocols = HashMap::new();
    let _ = protocols.insert("tcp".to_owned(), tcp);
    protocols
}

fn initialized_driver() -> (
    Driver,
    mpsc::Receiver<DeviceEvent>,
    mpsc::Receiver<Vec<DiscoveredDevice>>,
) {
    let driver = Driver::new(fast_settings());
    let (events_tx, events_rx) = mpsc::channel(32);
    let (disc_tx, disc_rx) = mpsc::channel(4);
    driver.initialize(events_tx, disc_tx);
    (driver, events_rx, disc_rx)
}

#[tokio::test]
async fn read_reader_config_returns_json() {
    let fake = FakeReader::bind().await;
    let (driver, _events, _disc) = initialized_driver();

    let server = async {
        let mut s = fake.accept().await;
        s.handshake_v1().await;
        let (header, payload) = s.next().await.expect("request");
        assert_eq!(header.message_type, MessageType::GET_READER_CONFIG);
        // all-zero selector: everything, all antennas
        assert_eq!(payload.as_ref(), [0u8; 7]);
        s.send_status(
            MessageType::GET_READER_CONFIG_RESPONSE,
            header.message_id,
            0,
        )
        .await;
        s
    };
    let protocols = tcp_protocols(fake.addr);
    let requests = [CommandRequest::new(RESOURCE_READER_CONFIG)];
    let read = driver.handle_read_commands("rig", &protocols, &requests);
    let (values, _s) = tokio::join!(read, server);
    let values = values.expect("read");
    assert_eq!(values.len(), 1);
    assert_eq!(values[0].resource, RESOURCE_READER_CONFIG);
    assert_contains!(&values[0].value, "\"Success\"");
    driver.stop(false).await;
}

#[tokio::test]
async fn write_rospec_id_action_sends_the_matching_request() {
    let fake = FakeReader::bind().await;
    let (driver, mut events, _disc) = initialized_driver();

    let server = async {
        let mut s = fake.accept().await;
        s.handshake_v1().await;
        let (header, payload) = s.next().await.expect("request");
        assert_eq!(header.message_type, MessageType::ENABLE_ROSPEC);
        assert_eq!(payload.as_ref(), 44u32.to_be_bytes());
        s.send_status(MessageType::ENABLE_ROSPEC_RESPONSE, header.message_id, 0)
            .await;
        s
    };
    let protocols = tcp_protocols(fake.addr);
    let requests = [
        CommandRequest::new(RESOURCE_RO_SPEC_ID),
        CommandRequest::new(RESOURCE_ACTION),
    ];
    let values = ["44".to_owned(), "Enable".to_owned()];
    let write = driver.handle_write_commands("rig", &protocols, &requests, &values);
    let (result, _s) = tokio::join!(write, server);
    result.expect("write");

    // The confirmation is echoed to observers.
    let event = events.recv().await.expect("confirmation");
    assert_eq!(event.device, "rig");
    assert_eq!(event.resource, RESOURCE_RO_SPEC_ID);
    assert_contains!(&event.value, "Success");
    driver.stop(false).await;
}

#[tokio::test]
async fn write_rospec_json_wraps_into_add_rospec() {
    let fake = FakeReader::bind().await;
    let (driver, _events, _disc) = initialized_driver();

    let body = r#"{
        "ROSpecID": 9,
        "ROBoundarySpec": {
            "ROSpecStartTrigger": {"Trigger": 0},
            "ROSpecStopTrigger": {"Trigger": 0}
        },
        "AISpecs": [{"AntennaIDs": [0], "AISpecStopTrigger": {"Trigger": 0}}]
    }"#;

    let server = async {
        let mut s = fake.accept().await;
        s.handshake_v1().await;
        let (header, payload) = s.next().await.expect("request");
        assert_eq!(header.message_type, MessageType::ADD_ROSPEC);
        // ROSpec parameter with the requested id
        assert_eq!(u16::from_be_bytes([payload[0], payload[1]]), 177);
        assert_eq!(&payload[4..8], 9u32.to_be_bytes());
        s.send_status(MessageType::ADD_ROSPEC_RESPONSE, header.message_id, 0)
            .await;
        s
    };
    let protocols = tcp_protocols(fake.addr);
    let requests = [CommandRequest::new(RESOURCE_RO_SPEC)];
    let values = [body.to_owned()];
    let write = driver.handle_write_commands("rig", &protocols, &requests, &values);
    let (result, _s) = tokio::join!(write, server);
    result.expect("write");
    driver.stop(false).await;
}

#[tokio::test]
async fn unknown_action_fails_naming_the_value() {
    let fake = FakeReader::bind().await;
    let (driver, _events, _disc) = initialized_driver();

    let result = driver
        .handle_write_commands(
            "rig",
            &tcp_protocols(fake.addr),
            &[
                CommandRequest::new(RESOURCE_RO_SPEC_ID),
                CommandRequest::new(RESOURCE_ACTION),
            ],
            &["1".to_owned(), "Explode".to_owned()],
        )
        .await;
    match result {
        Err(DriverError::BadActionName(name)) => assert_eq!(name, "Explode"),
        other => panic!("expected BadActionName, got {other:?}"),
    }
    driver.stop(true).await;
}

#[tokio::test]
async fn missing_action_parameter_is_out_of_bounds_not_a_panic() {
    let fake = FakeReader::bind().await;
    let (driver, _events, _disc) = initialized_driver();

    // Two requests but only one parameter: index 1 must be refused,
    // not read past the end.
    let result = driver
        .handle_write_commands(
            "rig",
            &tcp_protocols(fake.addr),
            &[
                CommandRequest::new(RESOURCE_RO_SPEC_ID),
                CommandRequest::new(RESOURCE_ACTION),
            ],
            &["1".to_owned()],
        )
        .await;
    assert!(matches!(result, Err(DriverError::MissingParameter(_))));
    driver.stop(true).await;
}

#[tokio::test]
async fn companion_request_must_be_named_action() {
    let fake = FakeReader::bind().await;
    let (driver, _events, _disc) = initialized_driver();

    let result = driver
        .handle_write_commands(
            "rig",
            &tcp_protocols(fake.addr),
            &[
                CommandRequest::new(RESOURCE_RO_SPEC_ID),
                CommandRequest::new("Verb"),
            ],
            &["1".to_owned(), "Enable".to_owned()],
        )
        .await;
    match result {
        Err(DriverError::WrongParameterName { expected, got }) => {
            assert_eq!(expected, RESOURCE_ACTION);
            assert_eq!(got, "Verb");
        }
        other => panic!("expected WrongParameterName, got {other:?}"),
    }
    driver.stop(true).await;
}

#[tokio::test]
async fn rospec_body_with_unknown_fields_is_refused() {
    let fake = FakeReader::bind().await;
    let (driver, _events, _disc) = initialized_driver();

    let result = driver
        .handle_write_commands(
            "rig",
            &tcp_protocols(fake.addr),
            &[CommandRequest::new(RESOURCE_RO_SPEC)],
            &[r#"{"ROSpecID": 1, "Sneaky": 2}"#.to_owned()],
        )
        .await;
    assert!(matches!(result, Err(DriverError::BadRequestBody(_))));
    driver.stop(true).await;
}

#[tokio::test]
async fn missing_protocol_properties_are_reported() {
    let (driver, _events, _disc) = initialized_driver();

    let empty = ProtocolProperties::new();
    let result = driver
        .handle_read_commands("rig", &empty, &[CommandRequest::new(RESOURCE_READER_CONFIG)])
        .await;
    assert!(matches!(result, Err(DriverError::MissingParameter("tcp"))));

    let mut no_port = ProtocolProperties::new();
    let _ = no_port.insert(
        "tcp".to_owned(),
        HashMap::from([("host".to_owned(), "127.0.0.1".to_owned())]),
    );
    let result = driver
        .handle_read_commands("rig", &no_port, &[CommandRequest::new(RESOURCE_READER_CONFIG)])
        .await;
    assert!(matches!(result, Err(DriverError::MissingParameter("port"))));
}

#[tokio::test]
async fn unresolvable_host_is_addr_invalid() {
    let (driver, _events, _disc) = initialized_driver();
    let mut protocols = ProtocolProperties::new();
    let _ = protocols.insert(
        "tcp".to_owned(),
        HashMap::from([
            ("host".to_owned(), "no.such.host.invalid".to_owned()),
            ("port".to_owned(), "5084".to_owned()),
        ]),
    );
    let result = driver
        .handle_read_commands(
            "rig",
            &protocols,
            &[CommandRequest::new(RESOURCE_READER_CONFIG)],
        )
        .await;
    assert!(matches!(result, Err(DriverError::AddrInvalid(_))));
}

#[tokio::test]
async fn update_device_redials_new_port() {
    let old = FakeReader::bind().await;
    let new = FakeReader::bind().await;
    let (driver, _events, _disc) = initialized_driver();

    driver
        .add_device("rig", &tcp_protocols(old.addr))
        .await
        .expect("add");
    let mut s_old = {
        let mut s = old.accept().await;
        s.handshake_v1().await;
        s
    };

    driver
        .update_device("rig", &tcp_protocols(new.addr))
        .await
        .expect("update");

    // The old connection sees the hang-up before any new traffic is
    // attempted.
    assert!(s_old.next().await.is_none());

    let server = async {
        let mut s = new.accept().await;
        s.handshake_v1().await;
        let (header, _) = s.next().await.expect("request on new address");
        s.send_status(MessageType::GET_ROSPECS_RESPONSE, header.message_id, 0)
            .await;
        s
    };
    let protocols = tcp_protocols(new.addr);
    let requests = [CommandRequest::new(RESOURCE_RO_SPEC)];
    let read = driver.handle_read_commands("rig", &protocols, &requests);
    let (values, _s) = tokio::join!(read, server);
    assert!(values.is_ok());
    driver.stop(false).await;
}

#[tokio::test]
async fn notifications_are_pumped_to_the_outlet() {
    let fake = FakeReader::bind().await;
    let (driver, mut events, _disc) = initialized_driver();

    driver
        .add_device("rig", &tcp_protocols(fake.addr))
        .await
        .expect("add");
    let mut s = fake.accept().await;
    s.handshake_v1().await;
    s.send(MessageType::RO_ACCESS_REPORT, 0x5555, &[0xAA, 0xBB])
        .await;

    let event = events.recv().await.expect("pumped event");
    assert_eq!(event.device, "rig");
    assert_eq!(event.resource, "ROAccessReport");
    assert_contains!(&event.value, "aabb");
    driver.stop(false).await;
}

#[tokio::test]
async fn discovery_reports_registered_devices() {
    let fake = FakeReader::bind().await;
    let driver = Driver::new(fast_settings());
    driver
        .add_device("rig", &tcp_protocols(fake.addr))
        .await
        .expect("add");

    let (events_tx, _events_rx) = mpsc::channel(32);
    let (disc_tx, mut disc_rx) = mpsc::channel(4);
    driver.initialize(events_tx, disc_tx);

    let found = disc_rx.recv().await.expect("discovery");
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].name, "rig");
    driver.stop(true).await;
}

#[tokio::test]
async fn reader_rejection_surfaces_through_the_adapter() {
    let fake = FakeReader::bind().await;
    let (driver, _events, _disc) = initialized_driver();

    let server = async {
        let mut s = fake.accept().await;
        s.handshake_v1().await;
        let (header, _) = s.next().await.expect("request");
        s.send_status(
            MessageType::GET_READER_CONFIG_RESPONSE,
            header.message_id,
            401, // R_DeviceError
        )
        .await;
        s
    };
    let protocols = tcp_protocols(fake.addr);
    let requests = [CommandRequest::new(RESOURCE_READER_CONFIG)];
    let read = driver.handle_read_commands("rig", &protocols, &requests);
    let (result, _s) = tokio::join!(read, server);
    match result {
        Err(DriverError::TrySend(TrySendError::Send(
            crate::client::SendError::ReaderRejected { code, .. },
        ))) => assert_eq!(code, 401),
        other => panic!("expected ReaderRejected, got {other:?}"),
    }
    driver.stop(false).await;
}
