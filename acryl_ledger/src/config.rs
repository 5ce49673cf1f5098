use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::consts::DEFAULT_NETWORK_CODE;

/// Settings applied every time the coordinator opens a connection.
///
/// Timeouts left to `None` are up to the transport provider.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Config {
    /// Network byte passed to the device client
    pub network_code: u8,

    /// Log every APDU exchanged with the device
    pub debug: bool,

    /// Bound on a single attempt to open the transport
    #[serde(with = "millis")]
    pub open_timeout: Option<Duration>,

    /// How long to keep waiting for a device to show up
    #[serde(with = "millis")]
    pub listen_timeout: Option<Duration>,

    /// Bound on every APDU exchange on the opened transport
    #[serde(with = "millis")]
    pub exchange_timeout: Option<Duration>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            network_code: DEFAULT_NETWORK_CODE,
            debug: false,
            open_timeout: None,
            listen_timeout: None,
            exchange_timeout: None,
        }
    }
}

impl Config {
    /// Sets the network code
    pub fn with_network_code(mut self, network_code: u8) -> Self {
        self.network_code = network_code;
        self
    }

    /// Enables or disables debug mode on opened transports
    pub fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    /// Sets the open timeout
    pub fn with_open_timeout(mut self, timeout: Duration) -> Self {
        self.open_timeout = Some(timeout);
        self
    }

    /// Sets the listen timeout
    pub fn with_listen_timeout(mut self, timeout: Duration) -> Self {
        self.listen_timeout = Some(timeout);
        self
    }

    /// Sets the exchange timeout
    pub fn with_exchange_timeout(mut self, timeout: Duration) -> Self {
        self.exchange_timeout = Some(timeout);
        self
    }
}

mod millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Option<Duration>, s: S) -> Result<S::Ok, S::Error> {
        match value {
            Some(d) => s.serialize_some(&(d.as_millis() as u64)),
            None => s.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Duration>, D::Error> {
        Ok(Option::<u64>::deserialize(d)?.map(Duration::from_millis))
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn defaults() {
        let config = Config::default();
        assert_eq!(config.network_code, 65);
        assert!(!config.debug);
        assert_eq!(config.open_timeout, None);
        assert_eq!(config.listen_timeout, None);
        assert_eq!(config.exchange_timeout, None);
    }

    #[test]
    fn parse_partial_json() {
        let config: Config =
            serde_json::from_str(r#"{"debug":true,"openTimeout":3000,"exchangeTimeout":1500}"#)
                .unwrap();
        let expected = Config::default()
            .with_debug(true)
            .with_open_timeout(Duration::from_secs(3))
            .with_exchange_timeout(Duration::from_millis(1500));
        assert_eq!(config, expected);
    }

    #[test]
    fn json_roundtrip_keeps_millis() {
        let config = Config::default()
            .with_network_code(84)
            .with_listen_timeout(Duration::from_millis(250));
        let json = serde_json::to_value(&config).unwrap();
        assert_eq!(json["networkCode"], 84);
        assert_eq!(json["listenTimeout"], 250);
        assert!(json["openTimeout"].is_null());

        let back: Config = serde_json::from_value(json).unwrap();
        assert_eq!(back, config);
    }
}
