use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use ledger_transport_hid::hidapi::HidApi;
use ledger_transport_hid::TransportNativeHID;

use super::{
    open_with_retry, APDUAnswerVec, APDUCmdVec, Transport, TransportProvider, TransportSettings,
};
use crate::{Error, Result};

/// Opens [`TransportHid`] connections to the first Ledger plugged over USB.
#[derive(Debug, Default, Clone)]
pub struct HidProvider;

impl HidProvider {
    async fn open() -> Result<TransportHid> {
        let device = tokio::task::spawn_blocking(|| {
            let api = HidApi::new().map_err(|e| Error::TransportCreation(e.to_string()))?;
            TransportNativeHID::new(&api).map_err(|e| Error::TransportCreation(e.to_string()))
        })
        .await
        .map_err(|e| Error::TransportCreation(e.to_string()))??;
        Ok(TransportHid::new(device))
    }
}

impl TransportProvider for HidProvider {
    type Transport = TransportHid;

    async fn create(
        &self,
        open_timeout: Option<Duration>,
        listen_timeout: Option<Duration>,
    ) -> Result<TransportHid> {
        open_with_retry(open_timeout, listen_timeout, Self::open).await
    }
}

/// Transport with a Ledger device over USB HID.
pub struct TransportHid {
    device: Mutex<Option<Arc<TransportNativeHID>>>,
    settings: TransportSettings,
}

impl std::fmt::Debug for TransportHid {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransportHid")
            .field("settings", &self.settings)
            .finish()
    }
}

impl TransportHid {
    /// Wraps an already opened device
    pub fn new(device: TransportNativeHID) -> Self {
        Self {
            device: Mutex::new(Some(Arc::new(device))),
            settings: TransportSettings::default(),
        }
    }

    fn device(&self) -> Result<Arc<TransportNativeHID>> {
        self.device
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .ok_or_else(|| Error::Transport("transport is closed".into()))
    }
}

impl Transport for TransportHid {
    async fn exchange(&self, command: &APDUCmdVec) -> Result<APDUAnswerVec> {
        self.settings.log_command(command);
        let device = self.device()?;
        let command = APDUCmdVec {
            cla: command.cla,
            ins: command.ins,
            p1: command.p1,
            p2: command.p2,
            data: command.data.clone(),
        };
        // hidapi blocks the calling thread until the device answers
        let answer = self
            .settings
            .bounded(async move {
                tokio::task::spawn_blocking(move || device.exchange(&command))
                    .await
                    .map_err(|e| Error::Transport(e.to_string()))?
                    .map_err(|e| Error::Transport(e.to_string()))
            })
            .await?;
        self.settings.log_answer(&answer);
        Ok(answer)
    }

    fn set_debug_mode(&self, debug: bool) {
        self.settings.set_debug(debug);
    }

    fn set_exchange_timeout(&self, timeout: Option<Duration>) {
        self.settings.set_exchange_timeout(timeout);
    }

    async fn close(&self) -> Result<()> {
        // the device handle is released when the last in-flight exchange drops its clone
        self.device
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        Ok(())
    }
}
