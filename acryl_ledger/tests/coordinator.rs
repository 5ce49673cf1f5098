use std::time::Duration;

use acryl_ledger::{derivation_path, Config, ConnectionStatus, DeviceError, Error};
use acryl_test_util::{
    mock_ledger, mock_ledger_with_config, mock_signature, rejected, MockDevice, MockLedger,
};

fn no_device() -> Error {
    Error::TransportCreation("no device".to_string())
}

#[tokio::test]
async fn connect_keeps_last_error() {
    let (ledger, device) = mock_ledger();
    assert!(!ledger.is_ready());
    assert_eq!(ledger.status(), ConnectionStatus::Disconnected);

    ledger.connect().await.unwrap();
    device.fail_signing(Some(rejected()));
    ledger.sign_request(1, b"req").await.unwrap_err();
    ledger.disconnect().await;
    assert_eq!(ledger.last_error(), Some(rejected()));

    ledger.connect().await.unwrap();
    assert!(ledger.is_ready());
    assert_eq!(ledger.last_error(), Some(rejected()));
    assert_eq!(device.creates(), 2);
}

#[tokio::test]
async fn connect_failure_returns_provider_error() {
    let (ledger, device) = mock_ledger();
    device.fail_create(Some(no_device()));

    let err = ledger.connect().await.unwrap_err();
    assert_eq!(err, no_device());
    assert!(!ledger.is_ready());
    assert_eq!(ledger.status(), ConnectionStatus::Failed);
    assert_eq!(ledger.connection_error().await, Some(no_device()));
    assert_eq!(ledger.last_error(), None);
}

#[tokio::test]
async fn client_construction_failure_closes_transport() {
    let (ledger, device) = mock_ledger();
    let bad_network = Error::ClientConstruction("unknown network".to_string());
    device.fail_client(Some(bad_network.clone()));

    let err = ledger.connect().await.unwrap_err();
    assert_eq!(err, bad_network);
    assert!(!ledger.is_ready());
    assert_eq!(device.closes(), 1);
    assert!(device.transports()[0].is_closed());
}

#[tokio::test]
async fn disconnect_without_connection() {
    let (ledger, device) = mock_ledger();
    ledger.disconnect().await;
    assert!(!ledger.is_ready());
    assert_eq!(ledger.status(), ConnectionStatus::Disconnected);
    assert_eq!(device.closes(), 0);
}

#[tokio::test]
async fn disconnect_ignores_close_error() {
    let (ledger, device) = mock_ledger();
    ledger.connect().await.unwrap();
    device.fail_close(Some(Error::Transport("device unplugged".to_string())));

    ledger.disconnect().await;
    assert!(!ledger.is_ready());
    assert_eq!(device.closes(), 1);
    assert!(device.transports()[0].is_closed());
    assert_eq!(ledger.last_error(), None);

    ledger.connect().await.unwrap();
    assert!(ledger.is_ready());
    assert_eq!(device.creates(), 2);
}

#[tokio::test]
async fn disconnect_cancels_pending_reconnect() {
    let (ledger, device) = mock_ledger();
    ledger.connect().await.unwrap();
    device.fail_signing(Some(rejected()));
    ledger.sign_request(1, b"req").await.unwrap_err();

    ledger.disconnect().await;
    tokio::task::yield_now().await;
    assert_eq!(device.creates(), 1);
    assert_eq!(device.closes(), 1);
    assert_eq!(ledger.status(), ConnectionStatus::Disconnected);
}

#[tokio::test]
async fn connect_cancels_pending_reconnect() {
    let (ledger, device) = mock_ledger();
    ledger.connect().await.unwrap();
    device.fail_signing(Some(rejected()));
    ledger.sign_request(1, b"req").await.unwrap_err();

    ledger.connect().await.unwrap();
    device.fail_signing(None);
    ledger.sign_request(1, b"req").await.unwrap();
    tokio::task::yield_now().await;

    assert_eq!(device.creates(), 2);
    assert_eq!(device.closes(), 1);
    assert!(!device.transports()[1].is_closed());
    let client = ledger.get_active_client().await.unwrap();
    assert_eq!(client.transport_index(), 1);
}

#[tokio::test]
async fn cancelled_reconnect_finishes_closing_previous_transport() {
    let (ledger, device) = mock_ledger();
    ledger.connect().await.unwrap();
    device.fail_signing(Some(rejected()));
    device.delay_close(Some(Duration::from_millis(50)));
    ledger.sign_request(1, b"req").await.unwrap_err();

    // the background reconnect is now waiting for the first transport to close
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(device.closes(), 1);
    assert!(!device.transports()[0].is_closed());

    ledger.disconnect().await;
    assert_eq!(ledger.status(), ConnectionStatus::Disconnected);
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(device.transports()[0].is_closed());
}

#[tokio::test]
async fn reconnect_replaces_transport() {
    let (ledger, device) = mock_ledger();
    ledger.connect().await.unwrap();
    ledger.connect().await.unwrap();

    let transports = device.transports();
    assert_eq!(transports.len(), 2);
    assert!(transports[0].is_closed());
    assert!(!transports[1].is_closed());
    assert_eq!(device.closes(), 1);

    let client = ledger.get_active_client().await.unwrap();
    assert_eq!(client.transport_index(), 1);
}

#[tokio::test]
async fn settings_applied_to_transport() {
    let config = Config::default()
        .with_network_code(b'T')
        .with_debug(true)
        .with_open_timeout(Duration::from_secs(3))
        .with_listen_timeout(Duration::from_secs(10))
        .with_exchange_timeout(Duration::from_millis(1500));
    let (ledger, device) = mock_ledger_with_config(config);
    ledger.connect().await.unwrap();

    let transport = &device.transports()[0];
    assert!(transport.debug());
    assert_eq!(transport.exchange_timeout(), Some(Duration::from_millis(1500)));
    assert_eq!(transport.open_timeout, Some(Duration::from_secs(3)));
    assert_eq!(transport.listen_timeout, Some(Duration::from_secs(10)));

    let client = ledger.get_active_client().await.unwrap();
    assert_eq!(client.network_code(), 84);
    let record = ledger.fetch_account(7).await.unwrap();
    assert_eq!(record.public_key.address, "T7");
}

#[tokio::test]
async fn operation_connects_when_disconnected() {
    let (ledger, device) = mock_ledger();
    let record = ledger.fetch_account(2).await.unwrap();
    assert_eq!(record.id, 2);
    assert_eq!(record.path, "44'/5741564'/0'/0'/2'");
    assert_eq!(record.public_key.public_key, "pk2");
    assert_eq!(device.creates(), 1);
    assert!(ledger.is_ready());
}

#[tokio::test]
async fn concurrent_calls_share_one_connection() {
    let (ledger, device) = mock_ledger();
    let (first, second) = tokio::join!(ledger.fetch_account(1), ledger.fetch_account(2));
    assert_eq!(first.unwrap().id, 1);
    assert_eq!(second.unwrap().id, 2);
    assert_eq!(device.creates(), 1);
    assert_eq!(device.closes(), 0);
}

#[tokio::test]
async fn failed_operation_reconnects_once() {
    let (ledger, device) = mock_ledger();
    ledger.connect().await.unwrap();
    assert_eq!(device.creates(), 1);

    device.fail_public_key(Some(rejected()));
    let err = ledger.fetch_account(1).await.unwrap_err();
    assert_eq!(err, rejected());
    assert_eq!(ledger.last_error(), Some(rejected()));

    device.fail_public_key(None);
    let client = ledger.get_active_client().await.unwrap();
    assert_eq!(device.creates(), 2);
    assert_eq!(client.transport_index(), 1);
    assert!(device.transports()[0].is_closed());

    ledger.get_active_client().await.unwrap();
    assert_eq!(device.creates(), 2);
}

#[tokio::test]
async fn failed_background_reconnect() {
    let (ledger, device) = mock_ledger();
    ledger.connect().await.unwrap();

    device.fail_signing(Some(rejected()));
    device.fail_create(Some(no_device()));
    let err = ledger.sign_message(1, "hello").await.unwrap_err();
    assert_eq!(err, rejected());

    // the background attempt fails, then the client is requested once more
    let err = ledger.get_active_client().await.unwrap_err();
    assert_eq!(err, no_device());
    assert_eq!(device.creates(), 3);
    assert_eq!(ledger.status(), ConnectionStatus::Failed);
    assert_eq!(ledger.connection_error().await, Some(no_device()));
    assert_eq!(ledger.last_error(), Some(rejected()));
    assert!(device.transports()[0].is_closed());
}

#[tokio::test]
async fn open_connects_in_background() {
    let device = MockDevice::new();
    let ledger = MockLedger::open(Config::default(), device.provider());
    let client = ledger.get_active_client().await.unwrap();
    assert_eq!(client.transport_index(), 0);
    assert_eq!(device.creates(), 1);
    assert!(ledger.is_ready());
}

#[tokio::test]
async fn status_changes_are_published() {
    let (ledger, _device) = mock_ledger();
    let mut status = ledger.subscribe();
    assert_eq!(*status.borrow(), ConnectionStatus::Disconnected);

    ledger.connect().await.unwrap();
    assert!(status.has_changed().unwrap());
    assert_eq!(*status.borrow_and_update(), ConnectionStatus::Ready);

    ledger.disconnect().await;
    assert_eq!(*status.borrow_and_update(), ConnectionStatus::Disconnected);
}

#[tokio::test]
async fn account_range_in_order() {
    let (ledger, device) = mock_ledger();
    let records = ledger.fetch_account_range(3, 2).await.unwrap();

    let ids: Vec<u32> = records.iter().map(|r| r.id).collect();
    assert_eq!(ids, vec![3, 4, 5]);
    let expected: Vec<String> = (3..=5).map(derivation_path).collect();
    assert_eq!(device.requested_paths(), expected);
}

#[tokio::test]
async fn account_range_stops_at_first_failure() {
    let (ledger, device) = mock_ledger();
    device.fail_account(4);

    let err = ledger.fetch_account_range(3, 2).await.unwrap_err();
    let expected = Error::Device(DeviceError::new(0x6a80, "account 4 unavailable"));
    assert_eq!(err, expected);
    assert_eq!(ledger.last_error(), Some(expected));
    assert_eq!(
        device.requested_paths(),
        vec![derivation_path(3), derivation_path(4)]
    );
}

#[tokio::test]
async fn account_range_overflow() {
    let (ledger, device) = mock_ledger();
    let err = ledger.fetch_account_range(u32::MAX, 1).await.unwrap_err();
    assert_eq!(
        err,
        Error::AccountRangeOverflow {
            from: u32::MAX,
            limit: 1
        }
    );
    assert_eq!(device.creates(), 0);
    assert_eq!(ledger.last_error(), None);
}

#[tokio::test]
async fn probe_device_failure() {
    let (ledger, device) = mock_ledger();
    device.fail_public_key(Some(rejected()));

    assert!(!ledger.probe_device().await);
    assert_eq!(ledger.last_error(), Some(rejected()));
}

#[tokio::test]
async fn probe_device_clears_last_error() {
    let (ledger, device) = mock_ledger();
    device.fail_signing(Some(rejected()));
    ledger.sign_arbitrary_payload(1, b"data").await.unwrap_err();
    assert_eq!(ledger.last_error(), Some(rejected()));

    assert!(ledger.probe_device().await);
    assert_eq!(ledger.last_error(), None);
    assert_eq!(device.requested_paths(), vec![derivation_path(1)]);
}

#[tokio::test]
async fn probe_device_without_device() {
    let (ledger, device) = mock_ledger();
    device.fail_create(Some(no_device()));

    assert!(!ledger.probe_device().await);
    assert_eq!(ledger.last_error(), Some(no_device()));
    assert!(device.requested_paths().is_empty());
}

#[tokio::test]
async fn signing_operations() {
    let (ledger, _device) = mock_ledger();
    let path = derivation_path(2);

    let signature = ledger.sign_transaction(2, 8, b"tx").await.unwrap();
    assert_eq!(signature, mock_signature("tx2p8", &path, b"tx"));

    let signature = ledger
        .sign_transaction_with_version(2, 8, b"tx", 3)
        .await
        .unwrap();
    assert_eq!(signature, mock_signature("tx3p8", &path, b"tx"));

    let signature = ledger.sign_order(2, 6, b"order").await.unwrap();
    assert_eq!(signature, mock_signature("order p6", &path, b"order"));

    let signature = ledger.sign_arbitrary_payload(2, b"data").await.unwrap();
    assert_eq!(signature, mock_signature("data", &path, b"data"));

    let signature = ledger.sign_request(2, b"req").await.unwrap();
    assert_eq!(signature, mock_signature("request", &path, b"req"));

    let signature = ledger.sign_message(2, "hello").await.unwrap();
    assert_eq!(signature, mock_signature("message", &path, b"hello"));

    let version = ledger.fetch_firmware_version().await.unwrap();
    assert_eq!(version, vec![1, 1, 5]);
    assert_eq!(ledger.last_error(), None);
}

#[tokio::test]
async fn sign_message_refuses_non_ascii() {
    let (ledger, device) = mock_ledger();
    let err = ledger.sign_message(1, "héllo").await.unwrap_err();
    assert_eq!(err, Error::NonAsciiMessage);
    assert_eq!(ledger.last_error(), None);
    assert_eq!(device.creates(), 0);
}
