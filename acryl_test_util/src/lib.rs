use acryl_ledger::{AcrylLedger, Config, DeviceError, Error};

mod mock;
pub use mock::{mock_signature, MockClient, MockDevice, MockProvider, MockTransportState};

/// Coordinator wired to a fresh [`MockDevice`]
pub type MockLedger = AcrylLedger<MockProvider, MockClient>;

pub fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// A coordinator on a mock device with the default config, plus the device to drive it
pub fn mock_ledger() -> (MockLedger, std::sync::Arc<MockDevice>) {
    mock_ledger_with_config(Config::default())
}

pub fn mock_ledger_with_config(config: Config) -> (MockLedger, std::sync::Arc<MockDevice>) {
    init_logging();
    let device = MockDevice::new();
    let ledger = AcrylLedger::new(config, device.provider());
    (ledger, device)
}

/// What a user pressing "reject" on the device looks like
pub fn rejected() -> Error {
    Error::Device(DeviceError::new(0x6985, "rejected by user"))
}
