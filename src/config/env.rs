//! Environment variable overrides

use std::path::PathBuf;
use tracing::warn;

use super::AppConfig;
use crate::webrtc::config::parse_ice_servers;

impl AppConfig {
    /// Build configuration from defaults plus process environment
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.apply_env(|key| std::env::var(key).ok());
        config
    }

    /// Apply overrides from an environment lookup.
    ///
    /// Malformed values are logged and skipped, keeping the previous value.
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(host) = lookup("HOST").filter(|h| !h.trim().is_empty()) {
            self.web.bind_address = host.trim().to_string();
        }

        if let Some(port) = lookup("PORT") {
            match port.trim().parse::<u16>() {
                Ok(port) => self.web.http_port = port,
                Err(_) => warn!("Ignoring invalid PORT value: {}", port),
            }
        }

        if let Some(ms) = lookup("THROTTLE_MS") {
            match ms.trim().parse::<u64>() {
                Ok(ms) => self.stream.throttle_ms = ms,
                Err(_) => warn!("Ignoring invalid THROTTLE_MS value: {}", ms),
            }
        }

        if let Some(raw) = lookup("ICE_SERVERS") {
            match parse_ice_servers(&raw) {
                Ok(servers) => self.stream.ice_servers = servers,
                Err(e) => warn!("Ignoring malformed ICE_SERVERS, using defaults: {}", e),
            }
        }

        if let Some(dir) = lookup("EMOTION_ASSETS_DIR").filter(|d| !d.is_empty()) {
            self.models.assets_dir = PathBuf::from(dir);
        }

        if let Some(path) = lookup("FACE_DETECTOR_MODEL").filter(|p| !p.is_empty()) {
            self.models.detector_model = Some(PathBuf::from(path));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_env_overrides() {
        let mut config = AppConfig::default();
        config.apply_env(lookup_from(&[
            ("HOST", "0.0.0.0"),
            ("PORT", "4000"),
            ("THROTTLE_MS", "500"),
            (
                "ICE_SERVERS",
                r#"[{"urls":"turn:turn.example.com:3478","username":"u","credential":"p"}]"#,
            ),
        ]));

        assert_eq!(config.web.bind_address, "0.0.0.0");
        assert_eq!(config.web.http_port, 4000);
        assert_eq!(config.stream.throttle_ms, 500);
        assert_eq!(config.stream.ice_servers.len(), 1);
        assert_eq!(config.stream.ice_servers[0].urls, vec!["turn:turn.example.com:3478"]);
    }

    #[test]
    fn test_malformed_values_keep_defaults() {
        let mut config = AppConfig::default();
        config.apply_env(lookup_from(&[
            ("PORT", "not-a-port"),
            ("ICE_SERVERS", "{broken"),
        ]));

        assert_eq!(config.web.http_port, 3001);
        assert_eq!(
            config.stream.ice_servers[0].urls,
            vec!["stun:stun.l.google.com:19302"]
        );
    }
}
