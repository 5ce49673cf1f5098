use serde::{Deserialize, Serialize};

/// Public key material of one account, as returned by the device
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WalletPublicKey {
    /// Encoded public key
    pub public_key: String,

    /// Address of the account on the configured network
    pub address: String,

    /// Status word of the response, as reported by the device client
    pub status_code: String,
}

/// An account of the device together with the id and path used to derive it
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct UserRecord {
    /// Account id, the last level of [`UserRecord::path`]
    pub id: u32,

    /// Derivation path of the account
    pub path: String,

    /// What the device returned for [`UserRecord::path`]
    #[serde(flatten)]
    pub public_key: WalletPublicKey,
}
