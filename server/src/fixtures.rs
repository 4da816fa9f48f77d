//! Canned responses for the config endpoints.
//!
//! Loaded from one JSON file with optional `public`, `balances`, `catalog`
//! and `loadouts` keys; anything missing falls back to the built-in table.

use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::fs;
use std::path::Path;
use tableside_protocol::normalize_login;

use crate::script::ScriptError;

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct Fixtures {
    pub public: Value,
    pub balances: Value,
    pub catalog: Value,
    /// Loadouts keyed by channel; `*` applies to any other channel.
    pub loadouts: HashMap<String, Value>,
}

impl Default for Fixtures {
    fn default() -> Self {
        Self {
            public: json!({
                "channel": "table-1",
                "game": "blackjack",
                "tableTint": "#0b5d3b",
                "cardBack": "cards/back.png",
                "cardFace": "cards/classic/",
                "seatCount": 6,
                "overflowCap": 6
            }),
            balances: json!({"balances": {}}),
            catalog: json!({
                "items": [
                    {"id": "back-classic", "kind": "cardBack", "url": "cards/back.png"},
                    {"id": "back-gold", "kind": "cardBack", "url": "cards/back-gold.png"},
                    {"id": "face-classic", "kind": "cardFace", "url": "cards/classic/"},
                    {"id": "felt-green", "kind": "tint", "value": "#0b5d3b"},
                    {"id": "felt-red", "kind": "tint", "value": "#6b1111"}
                ]
            }),
            loadouts: HashMap::new(),
        }
    }
}

impl Fixtures {
    pub fn load(path: &Path) -> Result<Self, ScriptError> {
        let text = fs::read_to_string(path).map_err(|source| ScriptError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let mut fixtures: Fixtures = serde_json::from_str(&text).map_err(|source| ScriptError::Fixtures {
            path: path.to_path_buf(),
            source,
        })?;
        let defaults = Fixtures::default();
        for (slot, default) in [
            (&mut fixtures.public, defaults.public),
            (&mut fixtures.balances, defaults.balances),
            (&mut fixtures.catalog, defaults.catalog),
        ] {
            if slot.is_null() {
                *slot = default;
            }
        }
        fixtures.loadouts = fixtures
            .loadouts
            .into_iter()
            .map(|(channel, loadout)| (normalize_login(&channel), loadout))
            .collect();
        Ok(fixtures)
    }

    pub fn loadout(&self, channel: &str) -> Value {
        self.loadouts
            .get(&normalize_login(channel))
            .or_else(|| self.loadouts.get("*"))
            .cloned()
            .unwrap_or_else(|| json!({}))
    }
}
