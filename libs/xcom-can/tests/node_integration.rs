//! Protocol node integration tests
//!
//! Drives a running node through the mock driver:
//! - request/response round trips, error frames and timeouts
//! - frames for other participants
//! - notification collection while dispatch is running
//! - late answers and concurrent calls of the same service

#![allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable

use std::sync::Arc;
use std::time::Duration;

use xcom_can::addresses::{xtender, XT_GROUP_DEVICE_ID};
use xcom_can::codec::{
    ReadParameterResponse, ReadUserInfoResponse, ServicePayload, WriteParameterRequest,
    WriteParameterResponse,
};
use xcom_can::{
    Address, CanFrame, ErrorCategory, FrameId, MessageNotification, MockCanDriver,
    ParameterPart, Request, ServiceKind, XcomClient, XcomConfig, XcomError, XcomNode,
};

const NODE_ADDRESS: u16 = 1;
const SETTLE: Duration = Duration::from_secs(1);

fn addr(value: u16) -> Address {
    Address::new(value).unwrap()
}

fn frame(dst: u16, src: u16, svc: u8, flags: u8, payload: &[u8]) -> CanFrame {
    let id = FrameId::new(addr(dst), addr(src), svc, flags).unwrap();
    CanFrame::new_extended(id.raw(), payload).unwrap()
}

fn parameter_read_response(parameter_id: u16, value: f32) -> Vec<u8> {
    ReadParameterResponse {
        parameter_id,
        part: ParameterPart::Flash.into(),
        value,
    }
    .encode()
    .to_vec()
}

fn start_node(driver: &Arc<MockCanDriver>) -> Arc<XcomNode> {
    let node = Arc::new(
        XcomNode::new(driver.clone(), addr(NODE_ADDRESS))
            .with_rx_poll_interval(Duration::from_millis(5)),
    );
    node.start();
    node
}

/// Wait until the receive loop has handled `count` frames
async fn wait_received(node: &XcomNode, count: u64) {
    let deadline = tokio::time::Instant::now() + SETTLE;
    while node.stats().frames_received < count {
        assert!(tokio::time::Instant::now() < deadline, "frames not dispatched");
        tokio::time::sleep(Duration::from_millis(2)).await;
    }
}

// ============================================================================
// Request / response
// ============================================================================

#[tokio::test]
async fn test_parameter_read_round_trip() {
    let driver = MockCanDriver::shared("bus");
    let node = start_node(&driver);

    let call = {
        let node = Arc::clone(&node);
        tokio::spawn(async move {
            node.wait_response(
                xtender(1).unwrap(),
                Request::read_parameter(1286, ParameterPart::Flash),
                Duration::from_secs(1),
            )
            .await
        })
    };

    assert!(driver.wait_for_sent(1, SETTLE).await);
    let sent = &driver.sent_frames()[0];
    assert_eq!(sent.id, (101 << 19) | (1 << 9) | (1 << 6));
    assert_eq!(sent.data, vec![0x05, 0x06, 0x00]);

    driver.inject(frame(1, 101, 1, 0, &parameter_read_response(1286, 230.0)));

    let response = call.await.unwrap().unwrap();
    assert_eq!(response.kind(), ServiceKind::ParameterRead);
    assert_eq!(response.value(), 230.0);
    assert_eq!(node.pending_count(), 0);
    node.stop().await;
}

#[tokio::test]
async fn test_error_frame_fails_call() {
    let driver = MockCanDriver::shared("bus");
    let node = start_node(&driver);

    let call = {
        let node = Arc::clone(&node);
        tokio::spawn(async move {
            node.wait_response(
                addr(101),
                Request::read_parameter(1286, ParameterPart::Flash),
                Duration::from_secs(1),
            )
            .await
        })
    };

    assert!(driver.wait_for_sent(1, SETTLE).await);
    driver.inject(frame(1, 101, 1, 0x01, &[0x00, 0x01, 0x00, 0x00, 0x00, 0x02]));

    let err = call.await.unwrap().unwrap_err();
    let protocol = err.protocol_error().unwrap();
    assert_eq!(protocol.service_id, 1);
    assert_eq!(protocol.code, 2);
    assert_eq!(protocol.category, ErrorCategory::DeviceNotFound);
    assert!(!err.is_retryable());
    assert_eq!(
        err.to_string(),
        "ProtocolError(id=1, error_code=2, identifier=DEVICE_NOT_FOUND)"
    );
    node.stop().await;
}

#[tokio::test]
async fn test_unknown_error_code() {
    let driver = MockCanDriver::shared("bus");
    let node = start_node(&driver);
    driver.set_responder(|request| {
        let id = FrameId::from_raw(request.id);
        vec![frame(
            id.source.value(),
            id.destination.value(),
            id.service_id,
            0x01,
            &[0x00, 0x00, 0x00, 0x00, 0x00, 0x77],
        )]
    });

    let err = node
        .wait_response(addr(101), Request::read_user_info(3000), Duration::from_secs(1))
        .await
        .unwrap_err();
    assert_eq!(
        err.protocol_error().map(|e| e.category),
        Some(ErrorCategory::Unknown)
    );
    node.stop().await;
}

#[tokio::test]
async fn test_gateway_error_fails_call() {
    let driver = MockCanDriver::shared("bus");
    let node = start_node(&driver);
    // device 101 is absent: the gateway at 501 answers instead
    driver.set_responder(|request| {
        let id = FrameId::from_raw(request.id);
        vec![frame(
            id.source.value(),
            501,
            id.service_id,
            0x01,
            &[0x00, 0x01, 0x00, 0x00, 0x00, 0x02],
        )]
    });

    let err = node
        .wait_response(
            addr(101),
            Request::read_parameter(1286, ParameterPart::Flash),
            Duration::from_millis(300),
        )
        .await
        .unwrap_err();
    assert!(!err.is_timeout());
    assert_eq!(
        err.protocol_error().map(|e| e.category),
        Some(ErrorCategory::DeviceNotFound)
    );
    assert_eq!(node.stats().frames_errored, 1);
    assert_eq!(node.pending_count(), 0);
    node.stop().await;
}

#[tokio::test]
async fn test_unlisted_part_in_answer_accepted() {
    let driver = MockCanDriver::shared("bus");
    let node = start_node(&driver);
    driver.set_responder(|request| {
        let id = FrameId::from_raw(request.id);
        vec![frame(
            id.source.value(),
            id.destination.value(),
            id.service_id,
            0,
            &[0x05, 0x06, 0x03, 0x43, 0x66, 0x00, 0x00],
        )]
    });

    let response = node
        .wait_response(
            addr(101),
            Request::read_parameter(1286, ParameterPart::Flash),
            Duration::from_millis(300),
        )
        .await
        .unwrap();
    assert_eq!(response.value(), 230.0);
    node.stop().await;
}

#[tokio::test]
async fn test_no_answer_times_out() {
    let driver = MockCanDriver::shared("bus");
    let node = start_node(&driver);

    let started = tokio::time::Instant::now();
    let err = node
        .wait_response(
            addr(101),
            Request::read_parameter(1286, ParameterPart::Flash),
            Duration::from_secs(1),
        )
        .await
        .unwrap_err();

    assert!(started.elapsed() >= Duration::from_secs(1));
    assert!(err.is_timeout());
    assert!(!err.is_protocol());
    assert_eq!(node.stats().timeouts, 1);
    assert_eq!(node.pending_count(), 0);
    node.stop().await;
}

#[tokio::test]
async fn test_group_request_answered_by_member() {
    let driver = MockCanDriver::shared("bus");
    let node = start_node(&driver);
    driver.set_responder(|_| {
        let payload = ReadUserInfoResponse {
            info_id: 3000,
            value: 51.5,
        }
        .encode();
        vec![frame(NODE_ADDRESS, 102, 0, 0, &payload)]
    });

    let response = node
        .wait_response(
            addr(XT_GROUP_DEVICE_ID),
            Request::read_user_info(3000),
            Duration::from_secs(1),
        )
        .await
        .unwrap();
    assert_eq!(response.value(), 51.5);
    node.stop().await;
}

// ============================================================================
// Routing
// ============================================================================

#[tokio::test]
async fn test_foreign_frames_do_not_resolve_calls() {
    let driver = MockCanDriver::shared("bus");
    let node = start_node(&driver);

    let call = {
        let node = Arc::clone(&node);
        tokio::spawn(async move {
            node.wait_response(
                addr(101),
                Request::read_parameter(1286, ParameterPart::Flash),
                Duration::from_secs(2),
            )
            .await
        })
    };
    assert!(driver.wait_for_sent(1, SETTLE).await);

    // same answer, addressed to another client
    driver.inject(frame(2, 101, 1, 0, &parameter_read_response(1286, 999.0)));
    // notification for another client
    driver.inject(frame(
        2,
        101,
        3,
        0,
        &MessageNotification {
            message_id: 1,
            value: 1,
        }
        .encode(),
    ));
    wait_received(&node, 2).await;
    assert_eq!(node.pending_count(), 1);
    assert!(node.notifications().is_empty());

    driver.inject(frame(1, 101, 1, 0, &parameter_read_response(1286, 230.0)));
    let response = call.await.unwrap().unwrap();
    assert_eq!(response.value(), 230.0);
    assert_eq!(node.stats().frames_dropped, 2);
    node.stop().await;
}

// ============================================================================
// Notifications
// ============================================================================

#[tokio::test]
async fn test_notifications_accumulate_in_order() {
    let driver = MockCanDriver::shared("bus");
    let node = start_node(&driver);

    let reader = {
        let node = Arc::clone(&node);
        tokio::spawn(async move {
            let mut seen = 0;
            while seen < 50 {
                let snapshot = node.notifications();
                assert!(snapshot.len() >= seen);
                for (index, record) in snapshot.iter().enumerate() {
                    assert_eq!(record.notification.message_id as usize, index);
                }
                seen = snapshot.len();
                tokio::task::yield_now().await;
            }
        })
    };

    for message_id in 0..50u16 {
        let source = if message_id % 2 == 0 { 101 } else { 301 };
        let destination = if message_id % 3 == 0 { 500 } else { NODE_ADDRESS };
        let payload = MessageNotification {
            message_id,
            value: u32::from(message_id) + 1000,
        }
        .encode();
        driver.inject(frame(destination, source, 3, 0, &payload));
    }

    tokio::time::timeout(SETTLE, reader).await.unwrap().unwrap();

    let records = node.notifications();
    assert_eq!(records.len(), 50);
    assert_eq!(records[0].source, addr(101));
    assert_eq!(records[1].source, addr(301));
    assert_eq!(records[49].notification.value, 1049);
    node.stop().await;
}

// ============================================================================
// Late answers and concurrency
// ============================================================================

#[tokio::test]
async fn test_late_answer_is_discarded() {
    let driver = MockCanDriver::shared("bus");
    let node = start_node(&driver);
    let request = Request::read_parameter(1286, ParameterPart::Flash);

    let err = node
        .wait_response(addr(101), request, Duration::from_millis(50))
        .await
        .unwrap_err();
    assert!(err.is_timeout());

    // answer to the abandoned call arrives now
    driver.inject(frame(1, 101, 1, 0, &parameter_read_response(1286, 230.0)));
    wait_received(&node, 1).await;
    assert_eq!(node.stats().frames_dropped, 1);

    // the next identical call must not see it
    let err = node
        .wait_response(addr(101), request, Duration::from_millis(50))
        .await
        .unwrap_err();
    assert!(err.is_timeout());
    node.stop().await;
}

#[tokio::test]
async fn test_concurrent_same_kind_calls() {
    let driver = MockCanDriver::shared("bus");
    let node = start_node(&driver);

    let spawn_read = |parameter_id: u16| {
        let node = Arc::clone(&node);
        tokio::spawn(async move {
            node.wait_response(
                addr(101),
                Request::read_parameter(parameter_id, ParameterPart::Flash),
                Duration::from_secs(2),
            )
            .await
        })
    };
    let first = spawn_read(1107);
    let second = spawn_read(1138);
    assert!(driver.wait_for_sent(2, SETTLE).await);
    assert_eq!(node.pending_count(), 2);

    // answers in reverse order
    driver.inject(frame(1, 101, 1, 0, &parameter_read_response(1138, 60.0)));
    driver.inject(frame(1, 101, 1, 0, &parameter_read_response(1107, 32.0)));

    assert_eq!(first.await.unwrap().unwrap().value(), 32.0);
    assert_eq!(second.await.unwrap().unwrap().value(), 60.0);
    node.stop().await;
}

#[tokio::test]
async fn test_different_kinds_in_flight() {
    let driver = MockCanDriver::shared("bus");
    let node = start_node(&driver);

    let read = {
        let node = Arc::clone(&node);
        tokio::spawn(async move {
            node.wait_response(addr(101), Request::read_user_info(3000), SETTLE)
                .await
        })
    };
    let write = {
        let node = Arc::clone(&node);
        tokio::spawn(async move {
            node.wait_response(
                addr(101),
                Request::write_parameter(1286, ParameterPart::Ram, 230.0),
                SETTLE,
            )
            .await
        })
    };
    assert!(driver.wait_for_sent(2, SETTLE).await);

    let write_ack = WriteParameterResponse {
        parameter_id: 1286,
        part: ParameterPart::Ram.into(),
        value: 230.0,
    }
    .encode();
    driver.inject(frame(1, 101, 2, 0, &write_ack));
    let info = ReadUserInfoResponse {
        info_id: 3000,
        value: 26.4,
    }
    .encode();
    driver.inject(frame(1, 101, 0, 0, &info));

    assert_eq!(read.await.unwrap().unwrap().value(), 26.4);
    assert_eq!(write.await.unwrap().unwrap().object_id(), 1286);
    node.stop().await;
}

#[tokio::test]
async fn test_stop_releases_waiters() {
    let driver = MockCanDriver::shared("bus");
    let node = start_node(&driver);

    let call = {
        let node = Arc::clone(&node);
        tokio::spawn(async move {
            node.wait_response(addr(101), Request::read_user_info(3000), Duration::from_secs(10))
                .await
        })
    };
    assert!(driver.wait_for_sent(1, SETTLE).await);
    node.stop().await;

    let err = tokio::time::timeout(SETTLE, call).await.unwrap().unwrap().unwrap_err();
    assert_eq!(err, XcomError::NotStarted);
}

// ============================================================================
// Client facade
// ============================================================================

#[tokio::test]
async fn test_client_against_simulated_device() {
    let driver = MockCanDriver::shared("bus");
    driver.set_responder(|request| {
        let id = FrameId::from_raw(request.id);
        let (src, dst) = (id.destination.value(), id.source.value());
        match id.service_id {
            1 => vec![frame(dst, src, 1, 0, &parameter_read_response(1286, 230.0))],
            2 => {
                let write = WriteParameterRequest::decode(&request.data).unwrap();
                let ack = WriteParameterResponse {
                    parameter_id: write.parameter_id,
                    part: write.part.into(),
                    value: write.value,
                }
                .encode();
                vec![frame(dst, src, 2, 0, &ack)]
            },
            // user info 9999 does not exist
            _ => vec![frame(dst, src, id.service_id, 0x01, &[0, 0, 0, 0, 0, 0x22])],
        }
    });

    let config = XcomConfig {
        address: addr(NODE_ADDRESS),
        rx_poll_interval_ms: 5,
        ..XcomConfig::default()
    };
    let client = XcomClient::open(driver.clone(), &config).unwrap();
    let xt1 = xtender(1).unwrap();

    let value = client
        .read_parameter(xt1, 1286, ParameterPart::Flash, None)
        .await
        .unwrap();
    assert_eq!(value, 230.0);

    let written = client
        .write_parameter(xt1, 1286, ParameterPart::Ram, 229.0, None)
        .await
        .unwrap();
    assert_eq!(written, 1286);

    let err = client.read_user_info(xt1, 9999, None).await.unwrap_err();
    assert_eq!(
        err.protocol_error().map(|e| e.category),
        Some(ErrorCategory::ObjectIdNotFound)
    );

    driver.inject(frame(
        NODE_ADDRESS,
        101,
        3,
        0,
        &MessageNotification {
            message_id: 12,
            value: 3,
        }
        .encode(),
    ));
    let node = Arc::clone(client.node());
    wait_received(&node, 4).await;
    let messages = client.messages();
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].notification.message_id, 12);

    assert_eq!(driver.sent_frames().len(), 3);
    client.close().await;
    assert!(!node.is_running());
}
