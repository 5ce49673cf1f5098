#![doc = include_str!("../README.md")]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(docsrs, feature(doc_cfg))]
#![warn(missing_docs)]

mod client;
mod config;
pub mod consts;
mod error;
mod ledger;
mod model;
mod path;
mod state;
pub mod transport;

pub use client::DeviceClient;
pub use config::Config;
pub use error::{DeviceError, Error};
pub use ledger::AcrylLedger;
pub use model::{UserRecord, WalletPublicKey};
pub use path::derivation_path;
pub use state::ConnectionStatus;

#[cfg(feature = "hid")]
pub use transport::HidProvider;
pub use transport::{TcpProvider, Transport, TransportProvider};

pub use ledger_apdu;

/// Result type of every fallible operation of this crate
pub type Result<T> = std::result::Result<T, Error>;
