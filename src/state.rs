// JSON info/state/command documents and bus commands, in the layout the
// host's web UI expects.

use crate::config::keys;
use crate::host::Lifecycle;
use crate::scheduler::{Outcome, Scheduler};
use serde::Serialize;
use serde_json::{json, Map, Value};

const BUS_TOPIC: &str = "wol";
const BUS_ACTIONS: [&str; 3] = ["send", "wake", "1"];

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct StateReport {
    enabled: bool,
    mac: String,
    // Clock time of the last successful send, null until one goes out.
    last_sent: Option<u64>,
    active: bool,
}

fn object_entry<'a>(root: &'a mut Value, key: &str) -> Option<&'a mut Map<String, Value>> {
    let entry = root
        .as_object_mut()?
        .entry(key)
        .or_insert_with(|| Value::Object(Map::new()));
    if !entry.is_object() {
        *entry = Value::Object(Map::new());
    }
    entry.as_object_mut()
}

impl Scheduler {
    /// Adds `u.WakeOnLAN` to the info document: the target, or a fixed
    /// marker while disabled.
    pub fn add_to_json_info(&self, root: &mut Value) {
        if !self.is_initialized() {
            return;
        }
        let info = if self.policy().enabled {
            json!(["Target: ", self.policy().target.to_string()])
        } else {
            json!(["Disabled"])
        };
        if let Some(user) = object_entry(root, keys::INFO_USER) {
            user.insert(keys::NAME.to_string(), info);
        }
    }

    pub fn add_to_json_state(&self, root: &mut Value) {
        if !self.is_initialized() {
            return;
        }
        let state = if self.policy().enabled {
            json!(StateReport {
                enabled: true,
                mac: self.policy().target.to_string(),
                last_sent: self.last_sent(),
                active: self.session().is_some(),
            })
        } else {
            json!({ (keys::ENABLED): false })
        };
        if let Some(root) = root.as_object_mut() {
            root.insert(keys::NAME.to_string(), state);
        }
    }

    /// Handles a state write. `{"WakeOnLAN": {"wol": true}}` wakes the target.
    pub fn read_from_json_state(&mut self, root: &Value) -> Outcome {
        if !self.is_initialized() {
            return Outcome::Ignored;
        }
        let requested = root
            .get(keys::NAME)
            .and_then(|top| top.get(keys::WOL))
            .and_then(Value::as_bool)
            .unwrap_or(false);
        if requested {
            self.on_command()
        } else {
            Outcome::Ignored
        }
    }

    /// Handles a bus message whose topic ends in `wol`. Returns whether the
    /// message was consumed.
    pub fn on_bus_message(&mut self, topic: &str, payload: &str) -> bool {
        if !self.is_initialized() || !self.policy().enabled {
            return false;
        }
        let ours = match topic.strip_suffix(BUS_TOPIC) {
            Some(prefix) => prefix.is_empty() || prefix.ends_with('/'),
            None => false,
        };
        if !ours || !BUS_ACTIONS.contains(&payload) {
            return false;
        }
        self.on_command();
        true
    }
}
