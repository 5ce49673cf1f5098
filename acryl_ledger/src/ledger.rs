use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::{watch, Mutex as AsyncMutex};
use tokio::task::JoinHandle;

use crate::client::DeviceClient;
use crate::config::Config;
use crate::consts::{DEFAULT_TRANSACTION_VERSION, PROBE_ACCOUNT_ID};
use crate::model::UserRecord;
use crate::path::{account_ids, derivation_path};
use crate::state::{Connection, ConnectionStatus};
use crate::transport::{Transport, TransportProvider};
use crate::{Error, Result};

/// Keeps a live connection to an Acryl Ledger device and runs device operations on it.
///
/// Every device operation goes through [`AcrylLedger::get_active_client`], which reconnects once
/// if no client is ready. When an operation fails the error is recorded, a reconnect is started
/// in the background to prepare the next call, and the original error is returned unchanged:
/// the failing call itself is not retried.
///
/// Connection changes are serialized: a connect holds the connection slot until the transport
/// and the client are both ready or the attempt failed, and at most one background reconnect
/// is pending at any time. Device calls run outside the slot, so a long signing doesn't block
/// other callers from reading the state.
///
/// The coordinator is cheap to clone, clones share the same connection. Background reconnects
/// are spawned on the current Tokio runtime.
pub struct AcrylLedger<P: TransportProvider, C> {
    inner: Arc<Inner<P, C>>,
}

struct Inner<P: TransportProvider, C> {
    config: Config,
    provider: P,
    connection: AsyncMutex<Connection<P::Transport, C>>,
    status: watch::Sender<ConnectionStatus>,
    last_error: Mutex<Option<Error>>,
    reconnect: Mutex<Option<JoinHandle<()>>>,
}

impl<P: TransportProvider, C> Clone for AcrylLedger<P, C> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<P: TransportProvider, C> std::fmt::Debug for AcrylLedger<P, C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AcrylLedger")
            .field("config", &self.inner.config)
            .field("status", &*self.inner.status.borrow())
            .finish()
    }
}

impl<P, C> AcrylLedger<P, C>
where
    P: TransportProvider,
    C: DeviceClient<Transport = P::Transport>,
{
    /// Creates a disconnected coordinator, the first device operation connects
    pub fn new(config: Config, provider: P) -> Self {
        let (status, _) = watch::channel(ConnectionStatus::Disconnected);
        Self {
            inner: Arc::new(Inner {
                config,
                provider,
                connection: AsyncMutex::new(Connection::Disconnected),
                status,
                last_error: Mutex::new(None),
                reconnect: Mutex::new(None),
            }),
        }
    }

    /// Creates a coordinator and starts connecting in the background.
    ///
    /// # Panics
    ///
    /// If called outside of a Tokio runtime.
    pub fn open(config: Config, provider: P) -> Self {
        let ledger = Self::new(config, provider);
        ledger.schedule_reconnect();
        ledger
    }

    /// The configuration applied to every connection
    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    /// Current connection status
    pub fn status(&self) -> ConnectionStatus {
        *self.inner.status.borrow()
    }

    /// True if a transport and a client built on it are available
    pub fn is_ready(&self) -> bool {
        self.status() == ConnectionStatus::Ready
    }

    /// Notifies every connection status change
    pub fn subscribe(&self) -> watch::Receiver<ConnectionStatus> {
        self.inner.status.subscribe()
    }

    /// The error of the last failed operation, cleared only by [`AcrylLedger::probe_device`]
    pub fn last_error(&self) -> Option<Error> {
        self.inner
            .last_error
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Why the last connection attempt failed, if the coordinator is in the failed state
    pub async fn connection_error(&self) -> Option<Error> {
        self.inner.connection.lock().await.error().cloned()
    }

    /// Replaces any existing connection with a new one.
    ///
    /// A pending background reconnect is cancelled. The previous transport is closed while the
    /// new one is being opened. On failure no transport is held and the provider or client error
    /// is returned.
    pub async fn connect(&self) -> Result<()> {
        self.cancel_pending_reconnect().await;
        let mut connection = self.inner.connection.lock().await;
        self.connect_locked(&mut connection).await.map(|_| ())
    }

    /// Drops the current connection, closing its transport.
    ///
    /// A pending background reconnect is cancelled. Errors closing the transport are ignored.
    pub async fn disconnect(&self) {
        self.cancel_pending_reconnect().await;
        let previous = {
            let mut connection = self.inner.connection.lock().await;
            let previous = connection.take_transport();
            self.publish(connection.status());
            previous
        };
        close_quietly(previous).await;
        tracing::info!("disconnected");
    }

    /// Returns the client of the current connection, connecting once if there is none.
    ///
    /// A pending background reconnect is awaited first.
    pub async fn get_active_client(&self) -> Result<Arc<C>> {
        self.await_pending_reconnect().await;
        let mut connection = self.inner.connection.lock().await;
        match connection.client() {
            Some(client) => Ok(client),
            None => {
                tracing::debug!("no active client, reconnecting");
                self.connect_locked(&mut connection).await
            }
        }
    }

    /// Public key and address of the account `id`
    pub async fn fetch_account(&self, id: u32) -> Result<UserRecord> {
        let path = derivation_path(id);
        let key_path = path.clone();
        let public_key = self
            .run(|client| async move { client.get_wallet_public_key(&key_path, false).await })
            .await?;
        Ok(UserRecord {
            id,
            path,
            public_key,
        })
    }

    /// Version of the app running on the device
    pub async fn fetch_firmware_version(&self) -> Result<Vec<u32>> {
        self.run(|client| async move { client.get_version().await })
            .await
    }

    /// Accounts from `from` to `from + limit`, both included, fetched one after the other.
    ///
    /// The first failure aborts the whole range.
    pub async fn fetch_account_range(&self, from: u32, limit: u32) -> Result<Vec<UserRecord>> {
        let mut records = vec![];
        for id in account_ids(from, limit)? {
            records.push(self.fetch_account(id).await?);
        }
        Ok(records)
    }

    /// Signs a serialized transaction of the default version with the account `id`
    pub async fn sign_transaction(
        &self,
        id: u32,
        asset_precision: u8,
        payload: &[u8],
    ) -> Result<Vec<u8>> {
        self.sign_transaction_with_version(id, asset_precision, payload, DEFAULT_TRANSACTION_VERSION)
            .await
    }

    /// Signs a serialized transaction with the account `id`
    pub async fn sign_transaction_with_version(
        &self,
        id: u32,
        asset_precision: u8,
        payload: &[u8],
        version: u8,
    ) -> Result<Vec<u8>> {
        let path = derivation_path(id);
        tracing::debug!("signing transaction v{version} with {path}");
        self.run(|client| async move {
            client
                .sign_transaction(&path, asset_precision, payload, version)
                .await
        })
        .await
    }

    /// Signs a serialized exchange order with the account `id`
    pub async fn sign_order(
        &self,
        id: u32,
        asset_precision: u8,
        payload: &[u8],
    ) -> Result<Vec<u8>> {
        let path = derivation_path(id);
        tracing::debug!("signing order with {path}");
        self.run(|client| async move { client.sign_order(&path, asset_precision, payload).await })
            .await
    }

    /// Signs arbitrary bytes with the account `id`
    pub async fn sign_arbitrary_payload(&self, id: u32, payload: &[u8]) -> Result<Vec<u8>> {
        let path = derivation_path(id);
        tracing::debug!("signing data with {path}");
        self.run(|client| async move { client.sign_some_data(&path, payload).await })
            .await
    }

    /// Signs a serialized request with the account `id`
    pub async fn sign_request(&self, id: u32, payload: &[u8]) -> Result<Vec<u8>> {
        let path = derivation_path(id);
        tracing::debug!("signing request with {path}");
        self.run(|client| async move { client.sign_request(&path, payload).await })
            .await
    }

    /// Signs an ascii message with the account `id`.
    ///
    /// A message with non ascii characters is refused before reaching the device.
    pub async fn sign_message(&self, id: u32, message: &str) -> Result<Vec<u8>> {
        if !message.is_ascii() {
            return Err(Error::NonAsciiMessage);
        }
        let path = derivation_path(id);
        tracing::debug!("signing message with {path}");
        self.run(|client| async move { client.sign_message(&path, message.as_bytes()).await })
            .await
    }

    /// Checks the device answers, connecting first if needed.
    ///
    /// Clears the last error, then fetches the first account. Any failure is kept as the last
    /// error.
    pub async fn probe_device(&self) -> bool {
        self.await_pending_reconnect().await;
        if !self.is_ready() {
            if let Err(e) = self.connect().await {
                self.record_error(e);
                return false;
            }
        }
        self.clear_last_error();
        match self.fetch_account(PROBE_ACCOUNT_ID).await {
            Ok(_) => true,
            Err(e) => {
                tracing::debug!("probe failed: {e}");
                self.record_error(e);
                false
            }
        }
    }

    async fn run<T, F, Fut>(&self, operation: F) -> Result<T>
    where
        F: FnOnce(Arc<C>) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let result = match self.get_active_client().await {
            Ok(client) => operation(client).await,
            Err(e) => Err(e),
        };
        result.map_err(|e| {
            self.record_error(e.clone());
            self.schedule_reconnect();
            e
        })
    }

    async fn connect_locked(
        &self,
        connection: &mut Connection<P::Transport, C>,
    ) -> Result<Arc<C>> {
        self.publish(ConnectionStatus::Connecting);
        let config = &self.inner.config;
        // the close runs on its own task so it completes even if this connect is aborted
        let closing = tokio::spawn(close_quietly(connection.take_transport()));
        let created = self
            .inner
            .provider
            .create(config.open_timeout, config.listen_timeout)
            .await;
        if let Err(e) = closing.await {
            tracing::warn!("closing previous transport failed: {e}");
        }
        let paired = match created {
            Ok(transport) => self.pair(transport).await,
            Err(e) => Err(e),
        };
        match paired {
            Ok((transport, client)) => {
                *connection = Connection::Ready {
                    transport,
                    client: client.clone(),
                };
                self.publish(connection.status());
                tracing::info!("connected, network code {}", config.network_code);
                Ok(client)
            }
            Err(e) => {
                tracing::debug!("cannot connect: {e}");
                *connection = Connection::Failed(e.clone());
                self.publish(connection.status());
                Err(e)
            }
        }
    }

    /// Applies the settings to a new transport and builds the client on it
    async fn pair(&self, transport: P::Transport) -> Result<(Arc<P::Transport>, Arc<C>)> {
        let config = &self.inner.config;
        transport.set_debug_mode(config.debug);
        transport.set_exchange_timeout(config.exchange_timeout);
        let transport = Arc::new(transport);
        match C::new(transport.clone(), config.network_code) {
            Ok(client) => Ok((transport, Arc::new(client))),
            Err(e) => {
                close_quietly(Some(transport)).await;
                Err(e)
            }
        }
    }

    fn schedule_reconnect(&self) {
        let mut pending = self
            .inner
            .reconnect
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if pending.as_ref().is_some_and(|handle| !handle.is_finished()) {
            tracing::trace!("reconnect already pending");
            return;
        }
        let ledger = self.clone();
        *pending = Some(tokio::spawn(async move {
            let mut connection = ledger.inner.connection.lock().await;
            if let Err(e) = ledger.connect_locked(&mut connection).await {
                tracing::warn!("background reconnect failed: {e}");
            }
        }));
    }

    async fn await_pending_reconnect(&self) {
        let Some(pending) = self.take_pending_reconnect() else {
            return;
        };
        if let Err(e) = pending.await {
            if e.is_panic() {
                self.record_error(e.into());
            }
        }
    }

    async fn cancel_pending_reconnect(&self) {
        if let Some(pending) = self.take_pending_reconnect() {
            pending.abort();
            let _ = pending.await;
        }
    }

    fn take_pending_reconnect(&self) -> Option<JoinHandle<()>> {
        self.inner
            .reconnect
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }

    fn publish(&self, status: ConnectionStatus) {
        tracing::debug!("connection status: {status:?}");
        self.inner.status.send_replace(status);
    }

    fn record_error(&self, e: Error) {
        *self
            .inner
            .last_error
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(e);
    }

    fn clear_last_error(&self) {
        self.inner
            .last_error
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
    }
}

async fn close_quietly<T: Transport>(transport: Option<Arc<T>>) {
    if let Some(transport) = transport {
        if let Err(e) = transport.close().await {
            tracing::debug!("ignoring error closing transport: {e}");
        }
    }
}
