//! Constants shared by the coordinator and the transports

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

/// Network code of the Acryl mainnet (`'A'`)
pub const DEFAULT_NETWORK_CODE: u8 = 65;

/// Every account lives under this prefix, the account id is the last hardened level
pub const ADDRESS_PREFIX: &str = "44'/5741564'/0'/0'/";

/// Transaction serialization version used when the caller doesn't specify one
pub const DEFAULT_TRANSACTION_VERSION: u8 = 2;

/// Account fetched by the liveness probe
pub const PROBE_ACCOUNT_ID: u32 = 1;

/// Speculos exposes its APDU socket here by default
pub const SPECULOS_ADDR: SocketAddr = SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 9999);

// Delay between attempts while waiting for a device to show up
pub(crate) const LISTEN_POLL_INTERVAL: Duration = Duration::from_millis(250);
