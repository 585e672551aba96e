#![forbid(unsafe_code)]

// ICE server credentials handed to each connection so peers can reach each other
// through a coturn relay (--use-auth-secret time-limited credentials).

use base64::Engine;
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha1::Sha1;
use std::time::{SystemTime, UNIX_EPOCH};

type HmacSha1 = Hmac<Sha1>;

const DEFAULT_TTL_SECS: u64 = 86_400;

#[derive(Debug, Clone)]
pub struct TurnConfig {
    /// e.g. ["turn:example.com:3478", "turns:example.com:5349"]
    pub urls: Vec<String>,
    pub secret: String,
    pub ttl_secs: u64,
}

/// ICE server entry as a browser `RTCIceServer` expects it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IceServer {
    pub urls: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credential: Option<String>,
}

impl TurnConfig {
    /// Returns `None` unless both TURN_URLS and TURN_SECRET are set.
    pub fn from_env() -> Option<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Option<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let urls: Vec<String> = lookup("TURN_URLS")?
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();
        let secret = lookup("TURN_SECRET").filter(|s| !s.is_empty())?;
        if urls.is_empty() {
            return None;
        }
        let ttl_secs = lookup("TURN_TTL")
            .and_then(|v| v.parse().ok())
            .unwrap_or(DEFAULT_TTL_SECS);

        Some(Self { urls, secret, ttl_secs })
    }

    /// username = "<expiry>:<connection id>", credential = base64(HMAC-SHA1(secret, username))
    pub fn credentials_for(&self, conn_id: &str) -> IceServer {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs();
        self.credentials_at(conn_id, now)
    }

    fn credentials_at(&self, conn_id: &str, now_secs: u64) -> IceServer {
        let username = format!("{}:{conn_id}", now_secs + self.ttl_secs);
        let credential = sign(&self.secret, &username);

        IceServer {
            urls: self.urls.clone(),
            username: Some(username),
            credential: Some(credential),
        }
    }
}

fn sign(secret: &str, username: &str) -> String {
    // HMAC accepts keys of any length, so new_from_slice cannot fail here
    let Ok(mut mac) = HmacSha1::new_from_slice(secret.as_bytes()) else {
        return String::new();
    };
    mac.update(username.as_bytes());
    base64::engine::general_purpose::STANDARD.encode(mac.finalize().into_bytes())
}

/// ICE servers for a fresh connection; empty when no relay is configured.
pub fn ice_servers_for(turn: Option<&TurnConfig>, conn_id: &str) -> Vec<IceServer> {
    turn.map(|tc| vec![tc.credentials_for(conn_id)]).unwrap_or_default()
}
