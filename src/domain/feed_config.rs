//! Source enablement flags owned by the `ConfigStore`.

use serde::{Deserialize, Serialize};

/// Persisted enablement flags. Both may be off (idle) or on (WebSocket wins).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedConfig {
    pub rest_enabled: bool,
    pub websocket_enabled: bool,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            rest_enabled: true,
            websocket_enabled: false,
        }
    }
}

impl FeedConfig {
    /// WebSocket takes priority; with both off the persisted label stays `rest`.
    pub const fn primary_source(&self) -> PrimarySource {
        if self.websocket_enabled {
            PrimarySource::WebSocket
        } else {
            PrimarySource::Rest
        }
    }

    pub const fn any_enabled(&self) -> bool {
        self.rest_enabled || self.websocket_enabled
    }

    #[must_use]
    pub fn patched(self, patch: FeedConfigPatch) -> Self {
        Self {
            rest_enabled: patch.rest_enabled.unwrap_or(self.rest_enabled),
            websocket_enabled: patch.websocket_enabled.unwrap_or(self.websocket_enabled),
        }
    }
}

/// Partial update for `ConfigStore::set`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedConfigPatch {
    pub rest_enabled: Option<bool>,
    pub websocket_enabled: Option<bool>,
}

impl FeedConfigPatch {
    pub const fn rest(enabled: bool) -> Self {
        Self {
            rest_enabled: Some(enabled),
            websocket_enabled: None,
        }
    }

    pub const fn websocket(enabled: bool) -> Self {
        Self {
            rest_enabled: None,
            websocket_enabled: Some(enabled),
        }
    }

    pub const fn both(rest_enabled: bool, websocket_enabled: bool) -> Self {
        Self {
            rest_enabled: Some(rest_enabled),
            websocket_enabled: Some(websocket_enabled),
        }
    }
}

/// Derived primary source, persisted as `price_source`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PrimarySource {
    Rest,
    WebSocket,
}

impl PrimarySource {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Rest => "rest",
            Self::WebSocket => "websocket",
        }
    }
}

impl std::fmt::Display for PrimarySource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_websocket_wins_priority() {
        let both = FeedConfig {
            rest_enabled: true,
            websocket_enabled: true,
        };
        assert_eq!(both.primary_source(), PrimarySource::WebSocket);

        let none = FeedConfig {
            rest_enabled: false,
            websocket_enabled: false,
        };
        assert_eq!(none.primary_source(), PrimarySource::Rest);
        assert!(!none.any_enabled());
    }

    #[test]
    fn test_patch_applies_only_given_fields() {
        let cfg = FeedConfig::default().patched(FeedConfigPatch::websocket(true));
        assert!(cfg.rest_enabled);
        assert!(cfg.websocket_enabled);

        let cfg = cfg.patched(FeedConfigPatch::both(false, false));
        assert_eq!(cfg, FeedConfig { rest_enabled: false, websocket_enabled: false });
    }

    #[test]
    fn test_primary_source_serde() {
        assert_eq!(serde_json::to_string(&PrimarySource::WebSocket).unwrap(), "\"websocket\"");
        assert_eq!(PrimarySource::Rest.to_string(), "rest");
    }
}
