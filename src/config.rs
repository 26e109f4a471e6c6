// Crate configuration.
// Logging can only be toggled in development builds.

use std::time::Duration;

use serde::{Deserialize, Serialize};

#[cfg(debug_assertions)]
pub const LOGGING_ENABLED: bool = true; // Debug builds log by default

#[cfg(not(debug_assertions))]
pub const LOGGING_ENABLED: bool = false; // Release builds stay quiet

// Extra knobs for development builds
#[cfg(debug_assertions)]
pub mod dev {
    // Flip this to false to silence logging entirely during development.
    // Only honored in debug builds.
    pub const ENABLE_LOGGING: bool = true;
}

#[cfg(not(debug_assertions))]
pub mod dev {
    pub const ENABLE_LOGGING: bool = false;
}

/// ICE server entry (STUN or TURN).
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct ServerConfig {
    pub id: String,
    pub r#type: String, // 'stun' or 'turn'
    pub url: String,
    pub username: Option<String>,
    pub credential: Option<String>,
}

/// Prepends the protocol scheme to an ICE server URL when it is missing.
pub fn add_ice_url_scheme(config: &ServerConfig) -> String {
    if config.url.starts_with("turn:") || config.url.starts_with("stun:") {
        config.url.clone()
    } else {
        let scheme = if config.r#type == "turn" {
            "turn:"
        } else {
            "stun:"
        };
        format!("{}{}", scheme, config.url)
    }
}

/// Per-session settings consumed when a connection is created.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub ice_servers: Vec<ServerConfig>,
    /// Label for the negotiated data channel.
    pub channel_label: String,
    /// ICE gathering that takes longer than this fails the session with
    /// `FailureReason::Timeout`. `None` disables the guard.
    pub gathering_timeout: Option<Duration>,
    /// Capacity of the typed event queue between connection and coordinator.
    pub event_capacity: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            ice_servers: vec![
                ServerConfig {
                    id: "default-stun".into(),
                    r#type: "stun".into(),
                    url: "stun:stun.l.google.com:19302".into(),
                    username: None,
                    credential: None,
                },
                ServerConfig {
                    id: "default-stun-1".into(),
                    r#type: "stun".into(),
                    url: "stun:stun1.l.google.com:19302".into(),
                    username: None,
                    credential: None,
                },
            ],
            channel_label: "pairlink-data".into(),
            gathering_timeout: Some(Duration::from_secs(30)),
            event_capacity: 64,
        }
    }
}
