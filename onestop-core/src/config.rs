//! Apply engine configuration.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Default ceiling on operations per payload.
pub const DEFAULT_MAX_ENTITIES_PER_PAYLOAD: usize = 1_000;
/// Default stop to route-stop-pattern distance beyond which an issue is raised.
pub const DEFAULT_STOP_RSP_DISTANCE_THRESHOLD_METERS: f64 = 100.0;

/// Settings consumed by the apply engine and the registry facade.
///
/// Missing fields take their defaults when deserialising, so a partial
/// configuration file is valid.
///
/// # Examples
/// ```
/// use onestop_core::ApplyConfig;
///
/// let config: ApplyConfig =
///     serde_json::from_str(r#"{"auto_fetch_related_feeds": true}"#).unwrap();
/// assert!(config.auto_fetch_related_feeds);
/// assert!(config.send_user_emails);
/// assert_eq!(config.max_entities_per_payload, 1_000);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApplyConfig {
    /// Notify non-admin users with an e-mail when their changesets are
    /// created or applied.
    pub send_user_emails: bool,
    /// Submit touched stops for conflation with the external map.
    pub auto_conflate_with_external_map: bool,
    /// Submit touched feeds for refetching.
    pub auto_fetch_related_feeds: bool,
    /// Maximum operations in a single payload.
    pub max_entities_per_payload: usize,
    /// Distance in metres above which a stop is considered detached from a
    /// route stop pattern line.
    pub stop_rsp_distance_threshold_meters: f64,
}

impl Default for ApplyConfig {
    fn default() -> Self {
        Self {
            send_user_emails: true,
            auto_conflate_with_external_map: false,
            auto_fetch_related_feeds: false,
            max_entities_per_payload: DEFAULT_MAX_ENTITIES_PER_PAYLOAD,
            stop_rsp_distance_threshold_meters: DEFAULT_STOP_RSP_DISTANCE_THRESHOLD_METERS,
        }
    }
}

/// Configuration values that cannot be used.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    /// Payloads must hold at least one operation.
    #[error("max_entities_per_payload must be at least 1")]
    ZeroPayloadSize,
    /// The distance threshold must be a finite, non-negative number.
    #[error("stop_rsp_distance_threshold_meters must be finite and non-negative, got {0}")]
    InvalidThreshold(f64),
}

impl ApplyConfig {
    /// Check the configuration for unusable values.
    ///
    /// # Errors
    /// Returns [`ConfigError`] describing the first bad value.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_entities_per_payload == 0 {
            return Err(ConfigError::ZeroPayloadSize);
        }
        let threshold = self.stop_rsp_distance_threshold_meters;
        if !threshold.is_finite() || threshold < 0.0 {
            return Err(ConfigError::InvalidThreshold(threshold));
        }
        Ok(())
    }
}
