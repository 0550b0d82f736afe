//! WebRTC configuration

use serde::{Deserialize, Deserializer, Serialize};
use tracing::warn;
use webrtc::ice_transport::ice_server::RTCIceServer;

/// Public ICE defaults - Google STUN only, no TURN
pub mod public_ice {
    use super::IceServerConfig;

    /// Google STUN server URL
    pub const STUN_SERVER: &str = "stun:stun.l.google.com:19302";

    /// Default ICE server list used when nothing is configured
    pub fn default_servers() -> Vec<IceServerConfig> {
        vec![IceServerConfig::new(STUN_SERVER)]
    }
}

/// ICE server entry as accepted in configuration (`RTCIceServer` JSON shape)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IceServerConfig {
    /// Server URLs; a single string is accepted as well as an array
    #[serde(deserialize_with = "string_or_seq")]
    pub urls: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credential: Option<String>,
}

impl IceServerConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            urls: vec![url.into()],
            username: None,
            credential: None,
        }
    }

    fn is_turn(&self) -> bool {
        self.urls
            .iter()
            .any(|u| u.starts_with("turn:") || u.starts_with("turns:"))
    }
}

fn string_or_seq<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum OneOrMany {
        One(String),
        Many(Vec<String>),
    }

    Ok(match OneOrMany::deserialize(deserializer)? {
        OneOrMany::One(url) => vec![url],
        OneOrMany::Many(urls) => urls,
    })
}

/// Parse an ICE server list from a JSON array
pub fn parse_ice_servers(raw: &str) -> serde_json::Result<Vec<IceServerConfig>> {
    serde_json::from_str(raw)
}

/// Convert configured servers into webrtc-rs ICE servers
pub fn to_rtc_ice_servers(servers: &[IceServerConfig]) -> Vec<RTCIceServer> {
    let mut ice_servers = Vec::with_capacity(servers.len());
    for server in servers {
        if server.urls.is_empty() {
            continue;
        }
        // webrtc-rs rejects TURN entries without credentials
        if server.is_turn() && (server.username.is_none() || server.credential.is_none()) {
            warn!(
                "Skipping TURN server {:?} - credentials required but missing",
                server.urls
            );
            continue;
        }
        ice_servers.push(RTCIceServer {
            urls: server.urls.clone(),
            username: server.username.clone().unwrap_or_default(),
            credential: server.credential.clone().unwrap_or_default(),
            ..Default::default()
        });
    }
    ice_servers
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_string_and_array_urls() {
        let servers = parse_ice_servers(
            r#"[{"urls":"stun:a:3478"},{"urls":["turn:b:3478","turns:b:5349"],"username":"u","credential":"c"}]"#,
        )
        .unwrap();
        assert_eq!(servers[0].urls, vec!["stun:a:3478"]);
        assert_eq!(servers[1].urls.len(), 2);
        assert_eq!(servers[1].username.as_deref(), Some("u"));
    }

    #[test]
    fn test_parse_rejects_non_array() {
        assert!(parse_ice_servers(r#"{"urls":"stun:a"}"#).is_err());
    }

    #[test]
    fn test_turn_without_credentials_skipped() {
        let servers = vec![
            IceServerConfig::new("turn:turn.example.com:3478"),
            IceServerConfig::new(public_ice::STUN_SERVER),
        ];
        let rtc = to_rtc_ice_servers(&servers);
        assert_eq!(rtc.len(), 1);
        assert_eq!(rtc[0].urls, vec![public_ice::STUN_SERVER.to_string()]);
    }
}
