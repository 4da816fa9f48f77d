//! Config and profile service client.
//!
//! Fetched once per load: public table config, a balances snapshot, the
//! cosmetic catalog and the channel's loadout. The overlay must come up even
//! when the service is down, so every fetch degrades to defaults.

use crate::error::{Error, Result};
use reqwest::Client as HttpClient;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use tableside_protocol::{normalize_login, Cosmetics, GameKind};
use tracing::{debug, warn};
use url::Url;

const TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct PublicConfig {
    /// Channel to bind when neither the page nor the token names one.
    pub channel: Option<String>,
    pub game: Option<GameKind>,
    pub table_tint: Option<String>,
    pub card_back: Option<String>,
    pub card_face: Option<String>,
    pub seat_count: Option<usize>,
    pub overflow_cap: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CosmeticItem {
    pub id: String,
    #[serde(default)]
    pub kind: String,
    /// Image URL for skins.
    #[serde(default)]
    pub url: Option<String>,
    /// Literal value for non-image items such as tints.
    #[serde(default)]
    pub value: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Catalog {
    pub items: Vec<CosmeticItem>,
}

impl Catalog {
    /// Resolve an item id to its URL or value. Ids missing from the catalog
    /// are taken as literal values.
    pub fn resolve(&self, id: &str) -> String {
        self.items
            .iter()
            .find(|item| item.id == id)
            .and_then(|item| item.url.clone().or_else(|| item.value.clone()))
            .unwrap_or_else(|| id.to_string())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Slots {
    pub card_back: Option<String>,
    pub card_face: Option<String>,
    pub table_tint: Option<String>,
    pub seat_frame: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Loadout {
    #[serde(flatten)]
    pub table: Slots,
    pub players: HashMap<String, Slots>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum BalancesRepr {
    Wrapped { balances: HashMap<String, i64> },
    Plain(HashMap<String, i64>),
}

/// Everything the renderer starts from before the first event arrives.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RenderDefaults {
    pub channel: Option<String>,
    pub game: Option<GameKind>,
    pub table_tint: Option<String>,
    pub card_back: Option<String>,
    pub card_face: Option<String>,
    pub seat_count: Option<usize>,
    pub overflow_cap: Option<usize>,
    pub balances: HashMap<String, i64>,
    pub player_cosmetics: HashMap<String, Cosmetics>,
}

impl RenderDefaults {
    pub fn from_public(public: &PublicConfig) -> Self {
        Self {
            channel: public.channel.clone(),
            game: public.game,
            table_tint: public.table_tint.clone(),
            card_back: public.card_back.clone(),
            card_face: public.card_face.clone(),
            seat_count: public.seat_count,
            overflow_cap: public.overflow_cap,
            ..Default::default()
        }
    }

    /// Layer the channel loadout over the public defaults. Loadout slots win.
    pub fn apply_loadout(&mut self, catalog: &Catalog, loadout: &Loadout) {
        let slots = &loadout.table;
        if let Some(id) = &slots.card_back {
            self.card_back = Some(catalog.resolve(id));
        }
        if let Some(id) = &slots.card_face {
            self.card_face = Some(catalog.resolve(id));
        }
        if let Some(id) = &slots.table_tint {
            self.table_tint = Some(catalog.resolve(id));
        }
        for (login, slots) in &loadout.players {
            let resolve = |slot: &Option<String>| slot.as_deref().map(|id| catalog.resolve(id));
            self.player_cosmetics.insert(
                normalize_login(login),
                Cosmetics {
                    card_back: resolve(&slots.card_back),
                    card_face: resolve(&slots.card_face),
                    seat_frame: resolve(&slots.seat_frame),
                    tint: resolve(&slots.table_tint),
                },
            );
        }
    }

    pub fn apply_balances(&mut self, balances: HashMap<String, i64>) {
        self.balances = balances.into_iter().map(|(login, b)| (normalize_login(&login), b)).collect();
    }
}

#[derive(Clone)]
pub struct ProfileClient {
    base: Url,
    http: HttpClient,
}

impl ProfileClient {
    pub fn new(base_url: &str) -> Result<Self> {
        let mut base = Url::parse(base_url)?;
        if !matches!(base.scheme(), "http" | "https") {
            return Err(Error::InvalidScheme(base.scheme().to_string()));
        }
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }
        let http = HttpClient::builder().timeout(TIMEOUT).build()?;
        Ok(Self { base, http })
    }

    async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        self.get_url(self.base.join(path)?).await
    }

    async fn get_url<T: DeserializeOwned>(&self, url: Url) -> Result<T> {
        debug!(%url, "profile fetch");
        let resp = self.http.get(url).send().await?;
        if !resp.status().is_success() {
            return Err(Error::Failed(resp.status()));
        }
        Ok(resp.json().await?)
    }

    pub async fn public_config(&self) -> Result<PublicConfig> {
        self.get("api/config/public").await
    }

    pub async fn balances(&self) -> Result<HashMap<String, i64>> {
        Ok(match self.get::<BalancesRepr>("api/balances").await? {
            BalancesRepr::Wrapped { balances } | BalancesRepr::Plain(balances) => balances,
        })
    }

    pub async fn catalog(&self) -> Result<Catalog> {
        self.get("api/cosmetics/catalog").await
    }

    pub async fn loadout(&self, channel: &str) -> Result<Loadout> {
        let mut url = self.base.join("api/cosmetics/loadout/")?;
        if let Ok(mut segments) = url.path_segments_mut() {
            segments.pop_if_empty().push(channel);
        }
        self.get_url(url).await
    }

    /// Public config, or defaults when the service is unavailable.
    pub async fn load_public(&self) -> PublicConfig {
        self.public_config().await.unwrap_or_else(|e| {
            warn!(error = %e, "public config unavailable; using defaults");
            PublicConfig::default()
        })
    }

    /// Channel-scoped defaults. Each endpoint fails independently.
    pub async fn load_channel(&self, public: &PublicConfig, channel: &str) -> RenderDefaults {
        let mut defaults = RenderDefaults::from_public(public);
        let (balances, catalog, loadout) = tokio::join!(self.balances(), self.catalog(), self.loadout(channel));

        match balances {
            Ok(balances) => defaults.apply_balances(balances),
            Err(e) => warn!(error = %e, "balances unavailable"),
        }
        let catalog = catalog.unwrap_or_else(|e| {
            warn!(error = %e, "cosmetic catalog unavailable");
            Catalog::default()
        });
        match loadout {
            Ok(loadout) => defaults.apply_loadout(&catalog, &loadout),
            Err(e) => warn!(%channel, error = %e, "cosmetic loadout unavailable"),
        }
        defaults
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn loadout_resolves_through_the_catalog() {
        let catalog: Catalog = serde_json::from_value(json!({
            "items": [
                {"id": "gold-back", "kind": "cardBack", "url": "https://cdn/gold.png"},
                {"id": "felt-red", "kind": "tint", "value": "#8b0000"}
            ]
        }))
        .unwrap();
        let loadout: Loadout = serde_json::from_value(json!({
            "cardBack": "gold-back",
            "tableTint": "felt-red",
            "players": {"Ann": {"cardBack": "https://cdn/ann.png", "seatFrame": "gold-back"}}
        }))
        .unwrap();

        let mut defaults = RenderDefaults::from_public(&PublicConfig {
            card_face: Some("faces.png".into()),
            table_tint: Some("#004400".into()),
            ..Default::default()
        });
        defaults.apply_loadout(&catalog, &loadout);

        assert_eq!(defaults.card_back.as_deref(), Some("https://cdn/gold.png"));
        assert_eq!(defaults.card_face.as_deref(), Some("faces.png"));
        assert_eq!(defaults.table_tint.as_deref(), Some("#8b0000"));
        let ann = &defaults.player_cosmetics["ann"];
        assert_eq!(ann.card_back.as_deref(), Some("https://cdn/ann.png"));
        assert_eq!(ann.seat_frame.as_deref(), Some("https://cdn/gold.png"));
    }

    #[test]
    fn balances_accept_both_shapes() {
        let wrapped: BalancesRepr = serde_json::from_value(json!({"balances": {"ann": 5}})).unwrap();
        let plain: BalancesRepr = serde_json::from_value(json!({"bob": 7})).unwrap();
        assert!(matches!(wrapped, BalancesRepr::Wrapped { balances } if balances["ann"] == 5));
        assert!(matches!(plain, BalancesRepr::Plain(b) if b["bob"] == 7));
    }

    #[test]
    fn profile_url_must_be_http() {
        assert!(ProfileClient::new("ws://host/").is_err());
        assert!(ProfileClient::new("http://host/base").is_ok());
    }

    #[tokio::test]
    async fn unreachable_service_falls_back_to_defaults() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let client = ProfileClient::new(&format!("http://{addr}")).unwrap();
        let public = client.load_public().await;
        assert_eq!(public, PublicConfig::default());
        let defaults = client.load_channel(&public, "table-3").await;
        assert_eq!(defaults, RenderDefaults::default());
    }
}
