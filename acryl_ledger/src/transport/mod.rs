//! Transports to the device and the providers opening them

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use ledger_apdu::{APDUAnswer, APDUCommand};
use tokio::time::Instant;

use crate::consts::LISTEN_POLL_INTERVAL;
use crate::{Error, Result};

#[cfg(feature = "hid")]
#[cfg_attr(docsrs, doc(cfg(feature = "hid")))]
mod hid;
mod tcp;

#[cfg(feature = "hid")]
pub use hid::{HidProvider, TransportHid};
pub use tcp::{TcpProvider, TransportTcp};

/// APDU command with an owned payload
pub type APDUCmdVec = APDUCommand<Vec<u8>>;

/// APDU answer with an owned payload
pub type APDUAnswerVec = APDUAnswer<Vec<u8>>;

/// An open byte pipe to the device.
pub trait Transport: Send + Sync + 'static {
    /// Sends `command` and waits for the device answer
    fn exchange(
        &self,
        command: &APDUCmdVec,
    ) -> impl Future<Output = Result<APDUAnswerVec>> + Send;

    /// When enabled, every exchanged APDU is logged
    fn set_debug_mode(&self, debug: bool);

    /// Bounds every following exchange, `None` waits forever
    fn set_exchange_timeout(&self, timeout: Option<Duration>);

    /// Releases the underlying device, following exchanges fail
    fn close(&self) -> impl Future<Output = Result<()>> + Send;
}

/// Opens transports to the device.
pub trait TransportProvider: Send + Sync + 'static {
    /// The transport handed out by [`TransportProvider::create`]
    type Transport: Transport;

    /// Opens a new transport.
    ///
    /// `open_timeout` bounds every single attempt, while with a `listen_timeout` failed attempts
    /// are retried until a device shows up or the timeout elapses.
    fn create(
        &self,
        open_timeout: Option<Duration>,
        listen_timeout: Option<Duration>,
    ) -> impl Future<Output = Result<Self::Transport>> + Send;
}

/// Runs `open` until it succeeds, honoring the open and listen timeouts
pub(crate) async fn open_with_retry<F, Fut, T>(
    open_timeout: Option<Duration>,
    listen_timeout: Option<Duration>,
    mut open: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let deadline = listen_timeout.map(|after| (Instant::now() + after, after));
    loop {
        let attempt = match open_timeout {
            Some(after) => tokio::time::timeout(after, open())
                .await
                .unwrap_or_else(|_| {
                    Err(Error::Timeout {
                        operation: "opening transport",
                        after,
                    })
                }),
            None => open().await,
        };
        let err = match attempt {
            Ok(transport) => return Ok(transport),
            Err(e) => e,
        };
        match deadline {
            None => return Err(err),
            Some((deadline, after)) => {
                let now = Instant::now();
                if now >= deadline {
                    return Err(Error::Timeout {
                        operation: "waiting for a device",
                        after,
                    });
                }
                tracing::debug!("no device yet: {err}");
                tokio::time::sleep(LISTEN_POLL_INTERVAL.min(deadline - now)).await;
            }
        }
    }
}

/// Debug flag and exchange timeout shared by the transports of this crate
#[derive(Debug, Default)]
pub(crate) struct TransportSettings {
    debug: AtomicBool,
    exchange_timeout: Mutex<Option<Duration>>,
}

impl TransportSettings {
    pub(crate) fn set_debug(&self, debug: bool) {
        self.debug.store(debug, Ordering::Relaxed);
    }

    pub(crate) fn set_exchange_timeout(&self, timeout: Option<Duration>) {
        *self
            .exchange_timeout
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = timeout;
    }

    fn exchange_timeout(&self) -> Option<Duration> {
        *self
            .exchange_timeout
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Awaits `exchange`, failing with a timeout if it takes longer than the exchange timeout
    pub(crate) async fn bounded<T>(
        &self,
        exchange: impl Future<Output = Result<T>>,
    ) -> Result<T> {
        match self.exchange_timeout() {
            Some(after) => tokio::time::timeout(after, exchange)
                .await
                .unwrap_or_else(|_| {
                    Err(Error::Timeout {
                        operation: "exchanging apdu",
                        after,
                    })
                }),
            None => exchange.await,
        }
    }

    pub(crate) fn log_command(&self, command: &APDUCmdVec) {
        if self.debug.load(Ordering::Relaxed) {
            tracing::debug!("=> {}", hex::encode(command.serialize()));
        }
    }

    pub(crate) fn log_answer(&self, answer: &APDUAnswerVec) {
        if self.debug.load(Ordering::Relaxed) {
            tracing::debug!(
                "<= {} ({:#06x})",
                hex::encode(answer.data()),
                answer.retcode()
            );
        }
    }
}
