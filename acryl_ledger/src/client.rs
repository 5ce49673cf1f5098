use std::future::Future;
use std::sync::Arc;

use crate::model::WalletPublicKey;
use crate::transport::Transport;
use crate::Result;

/// The Acryl app protocol spoken over a [`Transport`].
///
/// Implementors own the APDU encoding of every command; the coordinator only decides when a
/// client is built and on which transport.
pub trait DeviceClient: Sized + Send + Sync + 'static {
    /// Transport the client is built on
    type Transport: Transport;

    /// Builds a client talking to the device through `transport` on the given network
    fn new(transport: Arc<Self::Transport>, network_code: u8) -> Result<Self>;

    /// Public key and address at `path`, optionally asking the user to verify it on screen
    fn get_wallet_public_key(
        &self,
        path: &str,
        display_on_device: bool,
    ) -> impl Future<Output = Result<WalletPublicKey>> + Send;

    /// Version of the app running on the device
    fn get_version(&self) -> impl Future<Output = Result<Vec<u32>>> + Send;

    /// Signs a serialized transaction
    fn sign_transaction(
        &self,
        path: &str,
        asset_precision: u8,
        payload: &[u8],
        version: u8,
    ) -> impl Future<Output = Result<Vec<u8>>> + Send;

    /// Signs a serialized exchange order
    fn sign_order(
        &self,
        path: &str,
        asset_precision: u8,
        payload: &[u8],
    ) -> impl Future<Output = Result<Vec<u8>>> + Send;

    /// Signs arbitrary bytes
    fn sign_some_data(
        &self,
        path: &str,
        payload: &[u8],
    ) -> impl Future<Output = Result<Vec<u8>>> + Send;

    /// Signs a serialized authentication request
    fn sign_request(
        &self,
        path: &str,
        payload: &[u8],
    ) -> impl Future<Output = Result<Vec<u8>>> + Send;

    /// Signs an ascii encoded message
    fn sign_message(
        &self,
        path: &str,
        message: &[u8],
    ) -> impl Future<Output = Result<Vec<u8>>> + Send;
}
