use crate::wol::MacAddress;
use log::warn;
use serde_json::{json, Map, Value};

/// Keys of the persisted settings object and the JSON state surfaces.
pub mod keys {
    pub const NAME: &str = "WakeOnLAN";

    pub const ENABLED: &str = "enabled";
    pub const TARGET_MAC: &str = "targetMAC";
    pub const RETRY_DELAY: &str = "retryDelay";
    pub const TIMEOUT_DURATION: &str = "timeoutDuration";
    pub const SEND_ON_WIFI_CONNECT: &str = "sendOnWifiConnect";
    pub const PERIODIC_RETRY: &str = "periodicRetry";

    pub const WOL: &str = "wol";
    pub const INFO_USER: &str = "u";
}

const MS_PER_SEC: u64 = 1000;

/// When and where to send. Times are milliseconds; the persisted form uses
/// whole seconds, so sub-second precision is dropped on save.
#[derive(Clone, Debug, PartialEq)]
pub struct Policy {
    pub enabled: bool,
    pub target: MacAddress,
    /// Always > 0.
    pub retry_interval_ms: u64,
    /// Measured from the start of a session. 0 disables the timeout.
    pub timeout_ms: u64,
    pub send_on_network_up: bool,
    pub periodic_retry: bool,
}

impl Default for Policy {
    fn default() -> Self {
        Policy {
            enabled: true,
            target: MacAddress::UNCONFIGURED,
            retry_interval_ms: 30 * MS_PER_SEC,
            timeout_ms: 300 * MS_PER_SEC,
            send_on_network_up: true,
            periodic_retry: true,
        }
    }
}

fn read_bool(top: &Value, key: &str, field: &mut bool) -> bool {
    match top.get(key).and_then(Value::as_bool) {
        Some(v) => {
            *field = v;
            true
        }
        None => false,
    }
}

fn read_secs(top: &Value, key: &str, field_ms: &mut u64, allow_zero: bool) -> bool {
    let ms = top
        .get(key)
        .and_then(Value::as_u64)
        .filter(|&s| allow_zero || s > 0)
        .and_then(|s| s.checked_mul(MS_PER_SEC));
    match ms {
        Some(ms) => {
            *field_ms = ms;
            true
        }
        None => false,
    }
}

impl Policy {
    /// Applies the settings object found under [`keys::NAME`] in `root`.
    ///
    /// Missing or invalid fields keep their current value. Returns whether
    /// every field was present and valid, so the host knows to write the
    /// full settings back.
    pub fn read_from_config(&mut self, root: &Value) -> bool {
        let top = match root.get(keys::NAME) {
            Some(top) if top.is_object() => top,
            _ => return false,
        };

        let mut complete = read_bool(top, keys::ENABLED, &mut self.enabled);

        complete &= match top.get(keys::TARGET_MAC).and_then(Value::as_str) {
            Some(s) => match s.parse() {
                Ok(mac) => {
                    self.target = mac;
                    true
                }
                Err(e) => {
                    warn!("keeping target {}: {}", self.target, e);
                    false
                }
            },
            None => false,
        };

        complete &= read_secs(top, keys::RETRY_DELAY, &mut self.retry_interval_ms, false);
        complete &= read_secs(top, keys::TIMEOUT_DURATION, &mut self.timeout_ms, true);
        complete &= read_bool(top, keys::SEND_ON_WIFI_CONNECT, &mut self.send_on_network_up);
        complete &= read_bool(top, keys::PERIODIC_RETRY, &mut self.periodic_retry);
        complete
    }

    /// Writes the full settings object under [`keys::NAME`].
    pub fn add_to_config(&self, root: &mut Map<String, Value>) {
        root.insert(
            keys::NAME.to_string(),
            json!({
                (keys::ENABLED): self.enabled,
                (keys::TARGET_MAC): self.target.to_string(),
                (keys::RETRY_DELAY): self.retry_interval_ms / MS_PER_SEC,
                (keys::TIMEOUT_DURATION): self.timeout_ms / MS_PER_SEC,
                (keys::SEND_ON_WIFI_CONNECT): self.send_on_network_up,
                (keys::PERIODIC_RETRY): self.periodic_retry,
            }),
        );
    }
}

/// Help text for the settings page, keyed by `<name>:<field>`.
pub fn config_hints() -> Value {
    let hint = |field: &str| format!("{}:{}", keys::NAME, field);
    json!({
        hint(keys::TARGET_MAC): "Target device MAC address (format: AA:BB:CC:DD:EE:FF)",
        hint(keys::RETRY_DELAY): "Seconds between retry attempts",
        hint(keys::TIMEOUT_DURATION): "Total timeout duration in seconds",
    })
}
