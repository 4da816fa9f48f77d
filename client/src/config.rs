use serde::{Deserialize, Serialize};
use std::time::Duration;

pub const DEFAULT_SEAT_COUNT: usize = 6;
pub const DEFAULT_OVERFLOW_CAP: usize = 6;
pub const DEFAULT_LOBBY_PREFIX: &str = "lobby";

/// Capped exponential backoff for the transport.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconnectPolicy {
    /// Delay before the first retry.
    #[serde(with = "millis")]
    pub initial_delay: Duration,
    /// Upper bound on any single delay.
    #[serde(with = "millis")]
    pub max_delay: Duration,
    pub factor: f64,
    /// Fraction of the delay randomly added or removed (0.0 disables jitter).
    pub jitter: f64,
    /// Consecutive failed attempts before giving up. `None` retries forever.
    pub max_attempts: Option<u32>,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(10),
            factor: 2.0,
            jitter: 0.2,
            max_attempts: Some(12),
        }
    }
}

impl ReconnectPolicy {
    /// Delay before retry number `attempt` (1-based), without jitter.
    pub fn base_delay(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(32) as i32;
        let ms = self.initial_delay.as_millis() as f64 * self.factor.max(1.0).powi(exp);
        let capped = ms.min(self.max_delay.as_millis() as f64);
        Duration::from_millis(capped as u64)
    }

    /// Delay before retry number `attempt` with jitter applied from `rng`.
    pub fn delay<R: rand::Rng>(&self, attempt: u32, rng: &mut R) -> Duration {
        let base = self.base_delay(attempt);
        let jitter = self.jitter.clamp(0.0, 1.0);
        if jitter == 0.0 {
            return base;
        }
        let spread = rng.gen_range(-jitter..=jitter);
        let ms = base.as_millis() as f64 * (1.0 + spread);
        Duration::from_millis(ms.max(0.0) as u64).min(self.max_delay)
    }

    pub fn exhausted(&self, attempts: u32) -> bool {
        self.max_attempts.is_some_and(|max| attempts >= max)
    }
}

/// Everything the overlay needs to start. Variance between single-table and
/// multi-table deployments lives here rather than in separate code paths.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct OverlayConfig {
    /// WebSocket endpoint of the event stream.
    pub server_url: String,
    /// Base URL of the config/profile service.
    pub profile_url: Option<String>,
    /// Base URL that relative sprite and skin paths resolve against.
    pub asset_base_url: Option<String>,
    /// Page URL the overlay was opened with; its `channel` query parameter
    /// wins over every other binding source.
    pub page_url: Option<String>,
    /// Identity token handed to the overlay by its host page.
    pub token: Option<String>,
    /// Shared secret for verifying `token`. Without it the token is only
    /// decoded.
    pub token_secret: Option<String>,
    /// Login of the person looking at the overlay, if known.
    pub viewer: Option<String>,
    pub seat_count: usize,
    pub overflow_cap: usize,
    pub lobby_prefix: String,
    pub accessibility: bool,
    pub animations: bool,
    #[serde(with = "millis")]
    pub frame_interval: Duration,
    pub reconnect: ReconnectPolicy,
}

impl Default for OverlayConfig {
    fn default() -> Self {
        Self {
            server_url: "ws://127.0.0.1:9001/ws".into(),
            profile_url: None,
            asset_base_url: None,
            page_url: None,
            token: None,
            token_secret: None,
            viewer: None,
            seat_count: DEFAULT_SEAT_COUNT,
            overflow_cap: DEFAULT_OVERFLOW_CAP,
            lobby_prefix: DEFAULT_LOBBY_PREFIX.into(),
            accessibility: false,
            animations: true,
            frame_interval: Duration::from_millis(16),
            reconnect: ReconnectPolicy::default(),
        }
    }
}

mod millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(d)?))
    }
}
