use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use acryl_ledger::ledger_apdu::APDUAnswer;
use acryl_ledger::transport::{APDUAnswerVec, APDUCmdVec};
use acryl_ledger::{
    DeviceClient, DeviceError, Error, Result, Transport, TransportProvider, WalletPublicKey,
};

/// A fake device shared by the provider, its transports and the clients built on them.
///
/// Counts every transport opened and closed, and fails the calls it is told to.
#[derive(Debug, Default)]
pub struct MockDevice {
    creates: AtomicUsize,
    closes: AtomicUsize,
    create_error: Mutex<Option<Error>>,
    close_error: Mutex<Option<Error>>,
    close_delay: Mutex<Option<Duration>>,
    client_error: Mutex<Option<Error>>,
    public_key_error: Mutex<Option<Error>>,
    failing_accounts: Mutex<Vec<u32>>,
    sign_error: Mutex<Option<Error>>,
    requested_paths: Mutex<Vec<String>>,
    transports: Mutex<Vec<Arc<MockTransportState>>>,
}

impl MockDevice {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn provider(self: &Arc<Self>) -> MockProvider {
        MockProvider {
            device: self.clone(),
        }
    }

    /// Number of `create` calls received by the provider
    pub fn creates(&self) -> usize {
        self.creates.load(Ordering::SeqCst)
    }

    /// Number of `close` calls received by the transports
    pub fn closes(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }

    pub fn fail_create(&self, error: Option<Error>) {
        *self.create_error.lock().unwrap() = error;
    }

    pub fn fail_close(&self, error: Option<Error>) {
        *self.close_error.lock().unwrap() = error;
    }

    /// Makes every following `close` take `delay` before the transport is marked closed
    pub fn delay_close(&self, delay: Option<Duration>) {
        *self.close_delay.lock().unwrap() = delay;
    }

    pub fn fail_client(&self, error: Option<Error>) {
        *self.client_error.lock().unwrap() = error;
    }

    pub fn fail_public_key(&self, error: Option<Error>) {
        *self.public_key_error.lock().unwrap() = error;
    }

    pub fn fail_account(&self, id: u32) {
        self.failing_accounts.lock().unwrap().push(id);
    }

    pub fn fail_signing(&self, error: Option<Error>) {
        *self.sign_error.lock().unwrap() = error;
    }

    /// Paths passed to `get_wallet_public_key`, in order
    pub fn requested_paths(&self) -> Vec<String> {
        self.requested_paths.lock().unwrap().clone()
    }

    /// State of every transport opened so far, in order
    pub fn transports(&self) -> Vec<Arc<MockTransportState>> {
        self.transports.lock().unwrap().clone()
    }

    fn account_error(&self, id: u32) -> Option<Error> {
        if let Some(e) = self.public_key_error.lock().unwrap().clone() {
            return Some(e);
        }
        if self.failing_accounts.lock().unwrap().contains(&id) {
            return Some(Error::Device(DeviceError::new(
                0x6a80,
                format!("account {id} unavailable"),
            )));
        }
        None
    }

    fn sign_error(&self) -> Option<Error> {
        self.sign_error.lock().unwrap().clone()
    }
}

/// Hands out [`MockTransport`]s of a [`MockDevice`]
#[derive(Debug, Clone)]
pub struct MockProvider {
    device: Arc<MockDevice>,
}

impl TransportProvider for MockProvider {
    type Transport = MockTransport;

    async fn create(
        &self,
        open_timeout: Option<Duration>,
        listen_timeout: Option<Duration>,
    ) -> Result<MockTransport> {
        let index = self.device.creates.fetch_add(1, Ordering::SeqCst);
        // opening a real device is never immediate
        tokio::task::yield_now().await;
        if let Some(e) = self.device.create_error.lock().unwrap().clone() {
            return Err(e);
        }
        let state = Arc::new(MockTransportState {
            index,
            open_timeout,
            listen_timeout,
            ..Default::default()
        });
        self.device.transports.lock().unwrap().push(state.clone());
        Ok(MockTransport {
            device: self.device.clone(),
            state,
        })
    }
}

/// What happened to one transport, observable after the coordinator dropped it
#[derive(Debug, Default)]
pub struct MockTransportState {
    /// 0 for the first transport opened by the provider
    pub index: usize,
    pub open_timeout: Option<Duration>,
    pub listen_timeout: Option<Duration>,
    debug: AtomicBool,
    exchange_timeout: Mutex<Option<Duration>>,
    closed: AtomicBool,
}

impl MockTransportState {
    pub fn debug(&self) -> bool {
        self.debug.load(Ordering::SeqCst)
    }

    pub fn exchange_timeout(&self) -> Option<Duration> {
        *self.exchange_timeout.lock().unwrap()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

#[derive(Debug)]
pub struct MockTransport {
    device: Arc<MockDevice>,
    state: Arc<MockTransportState>,
}

impl Transport for MockTransport {
    async fn exchange(&self, _command: &APDUCmdVec) -> Result<APDUAnswerVec> {
        if self.state.is_closed() {
            return Err(Error::Transport("transport is closed".into()));
        }
        APDUAnswer::from_answer(vec![0x90, 0x00])
            .map_err(|e| Error::Transport(format!("{e:?}")))
    }

    fn set_debug_mode(&self, debug: bool) {
        self.state.debug.store(debug, Ordering::SeqCst);
    }

    fn set_exchange_timeout(&self, timeout: Option<Duration>) {
        *self.state.exchange_timeout.lock().unwrap() = timeout;
    }

    async fn close(&self) -> Result<()> {
        self.device.closes.fetch_add(1, Ordering::SeqCst);
        let delay = *self.device.close_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.state.closed.store(true, Ordering::SeqCst);
        match self.device.close_error.lock().unwrap().clone() {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

/// A device client answering from the [`MockDevice`] behind its transport
#[derive(Debug)]
pub struct MockClient {
    transport: Arc<MockTransport>,
    network_code: u8,
}

impl MockClient {
    /// Index of the transport this client was built on
    pub fn transport_index(&self) -> usize {
        self.transport.state.index
    }

    pub fn network_code(&self) -> u8 {
        self.network_code
    }

    fn device(&self) -> &MockDevice {
        &self.transport.device
    }

    fn check_open(&self) -> Result<()> {
        if self.transport.state.is_closed() {
            Err(Error::Transport("transport is closed".into()))
        } else {
            Ok(())
        }
    }

    fn sign(&self, kind: &str, path: &str, payload: &[u8]) -> Result<Vec<u8>> {
        self.check_open()?;
        match self.device().sign_error() {
            Some(e) => Err(e),
            None => Ok(mock_signature(kind, path, payload)),
        }
    }
}

impl DeviceClient for MockClient {
    type Transport = MockTransport;

    fn new(transport: Arc<MockTransport>, network_code: u8) -> Result<Self> {
        if let Some(e) = transport.device.client_error.lock().unwrap().clone() {
            return Err(e);
        }
        Ok(Self {
            transport,
            network_code,
        })
    }

    async fn get_wallet_public_key(
        &self,
        path: &str,
        _display_on_device: bool,
    ) -> Result<WalletPublicKey> {
        self.check_open()?;
        self.device()
            .requested_paths
            .lock()
            .unwrap()
            .push(path.to_string());
        let id = account_id(path)?;
        if let Some(e) = self.device().account_error(id) {
            return Err(e);
        }
        Ok(WalletPublicKey {
            public_key: format!("pk{id}"),
            address: format!("{}{id}", self.network_code as char),
            status_code: "9000".to_string(),
        })
    }

    async fn get_version(&self) -> Result<Vec<u32>> {
        self.check_open()?;
        Ok(vec![1, 1, 5])
    }

    async fn sign_transaction(
        &self,
        path: &str,
        asset_precision: u8,
        payload: &[u8],
        version: u8,
    ) -> Result<Vec<u8>> {
        self.sign(&format!("tx{version}p{asset_precision}"), path, payload)
    }

    async fn sign_order(&self, path: &str, asset_precision: u8, payload: &[u8]) -> Result<Vec<u8>> {
        self.sign(&format!("order p{asset_precision}"), path, payload)
    }

    async fn sign_some_data(&self, path: &str, payload: &[u8]) -> Result<Vec<u8>> {
        self.sign("data", path, payload)
    }

    async fn sign_request(&self, path: &str, payload: &[u8]) -> Result<Vec<u8>> {
        self.sign("request", path, payload)
    }

    async fn sign_message(&self, path: &str, message: &[u8]) -> Result<Vec<u8>> {
        self.sign("message", path, message)
    }
}

/// The signature the mock client returns for a signing call of the given `kind`
pub fn mock_signature(kind: &str, path: &str, payload: &[u8]) -> Vec<u8> {
    [kind.as_bytes(), b"|", path.as_bytes(), b"|", payload].concat()
}

/// Account id in the last level of `path`, eg 7 for `44'/5741564'/0'/0'/7'`
fn account_id(path: &str) -> Result<u32> {
    path.rsplit('/')
        .next()
        .and_then(|last| last.strip_suffix('\''))
        .and_then(|id| id.parse().ok())
        .ok_or_else(|| Error::Generic(format!("not an account path: {path}")))
}
