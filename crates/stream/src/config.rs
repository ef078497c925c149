//! Streaming configuration.
//!
//! Loaded from YAML or JSON text; file IO is left to the application.

use std::collections::HashSet;
use std::time::Duration;

use gridstream_common::EntityKind;
use serde::{Deserialize, Serialize};

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{kind} streamer: max_visible must be positive")]
    ZeroBudget { kind: EntityKind },
    #[error("{kind} streamer: streaming_distance must be positive and finite, got {value}")]
    InvalidDistance { kind: EntityKind, value: f32 },
    #[error("{kind} streamer: bounds [{min}, {max}] are empty or not finite")]
    InvalidBounds { kind: EntityKind, min: f32, max: f32 },
    #[error("{kind} streamer: respawn delays must be finite and non-negative")]
    InvalidRespawnDelay { kind: EntityKind },
    #[error("more than one streamer configured for {0}")]
    DuplicateKind(EntityKind),
    #[error("tick_interval_ms must be positive")]
    ZeroTickInterval,
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Settings of one streamer (one entity kind).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamerConfig {
    pub kind: EntityKind,
    /// Hard ceiling on simultaneously live entities.
    #[serde(default = "default_max_visible")]
    pub max_visible: usize,
    /// Radius around an observer within which entities may be live. Also the
    /// grid cell size.
    #[serde(default = "default_streaming_distance")]
    pub streaming_distance: f32,
    #[serde(default = "default_min_bound")]
    pub min_bound: f32,
    #[serde(default = "default_max_bound")]
    pub max_bound: f32,
    #[serde(default = "default_ephemeral_respawn_secs")]
    pub ephemeral_respawn_secs: f64,
    /// Default for persistent entities without their own delay.
    #[serde(default = "default_persistent_respawn_secs")]
    pub persistent_respawn_secs: f64,
}

fn default_max_visible() -> usize {
    1000
}

fn default_streaming_distance() -> f32 {
    300.0
}

fn default_min_bound() -> f32 {
    -3000.0
}

fn default_max_bound() -> f32 {
    3000.0
}

fn default_ephemeral_respawn_secs() -> f64 {
    10.0
}

fn default_persistent_respawn_secs() -> f64 {
    180.0
}

impl StreamerConfig {
    /// Defaults for `kind`.
    pub fn for_kind(kind: EntityKind) -> Self {
        let (max_visible, streaming_distance) = match kind {
            EntityKind::Vehicle => (1000, 300.0),
            EntityKind::Object => (1000, 300.0),
            EntityKind::Pickup => (4096, 100.0),
        };
        Self {
            kind,
            max_visible,
            streaming_distance,
            min_bound: default_min_bound(),
            max_bound: default_max_bound(),
            ephemeral_respawn_secs: default_ephemeral_respawn_secs(),
            persistent_respawn_secs: default_persistent_respawn_secs(),
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let kind = self.kind;
        if self.max_visible == 0 {
            return Err(ConfigError::ZeroBudget { kind });
        }
        if !(self.streaming_distance.is_finite() && self.streaming_distance > 0.0) {
            return Err(ConfigError::InvalidDistance {
                kind,
                value: self.streaming_distance,
            });
        }
        if !(self.min_bound.is_finite() && self.max_bound.is_finite())
            || self.min_bound >= self.max_bound
        {
            return Err(ConfigError::InvalidBounds {
                kind,
                min: self.min_bound,
                max: self.max_bound,
            });
        }
        let delay_ok = |secs: f64| Duration::try_from_secs_f64(secs).is_ok();
        if !delay_ok(self.ephemeral_respawn_secs) || !delay_ok(self.persistent_respawn_secs) {
            return Err(ConfigError::InvalidRespawnDelay { kind });
        }
        Ok(())
    }

    pub fn cell_size(&self) -> f32 {
        self.streaming_distance
    }

    /// Cells to search around an observer to cover the streaming distance.
    pub fn cell_radius(&self) -> i32 {
        (self.streaming_distance / self.cell_size()).ceil() as i32
    }

    pub fn ephemeral_delay(&self) -> Duration {
        Duration::from_secs_f64(self.ephemeral_respawn_secs)
    }

    pub fn persistent_delay(&self) -> Duration {
        Duration::from_secs_f64(self.persistent_respawn_secs)
    }
}

/// Root configuration: tick cadence plus one entry per streamed kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_tick_interval_ms")]
    pub tick_interval_ms: u64,
    #[serde(default = "default_streamers")]
    pub streamers: Vec<StreamerConfig>,
}

fn default_tick_interval_ms() -> u64 {
    1000
}

fn default_streamers() -> Vec<StreamerConfig> {
    [EntityKind::Vehicle, EntityKind::Object, EntityKind::Pickup]
        .into_iter()
        .map(StreamerConfig::for_kind)
        .collect()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: default_tick_interval_ms(),
            streamers: default_streamers(),
        }
    }
}

impl ServerConfig {
    /// Parse and validate a YAML document.
    pub fn from_yaml_str(s: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_yaml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    /// Parse and validate a JSON document.
    pub fn from_json_str(s: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_yaml_string(&self) -> Result<String, ConfigError> {
        Ok(serde_yaml::to_string(self)?)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.tick_interval_ms == 0 {
            return Err(ConfigError::ZeroTickInterval);
        }
        let mut seen = HashSet::new();
        for streamer in &self.streamers {
            streamer.validate()?;
            if !seen.insert(streamer.kind) {
                return Err(ConfigError::DuplicateKind(streamer.kind));
            }
        }
        Ok(())
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    pub fn streamer(&self, kind: EntityKind) -> Option<&StreamerConfig> {
        self.streamers.iter().find(|s| s.kind == kind)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_cover_every_kind() {
        let config = ServerConfig::default();
        config.validate().unwrap();
        assert_eq!(config.tick_interval(), Duration::from_secs(1));
        assert_eq!(config.streamer(EntityKind::Pickup).unwrap().max_visible, 4096);
        assert_eq!(config.streamer(EntityKind::Vehicle).unwrap().max_visible, 1000);
    }

    #[test]
    fn cell_geometry_follows_distance() {
        let config = StreamerConfig::for_kind(EntityKind::Vehicle);
        assert_eq!(config.cell_size(), 300.0);
        assert_eq!(config.cell_radius(), 1);
    }

    #[test]
    fn yaml_fills_in_defaults() {
        let yaml = "tick_interval_ms: 250\nstreamers:\n  - kind: vehicle\n    max_visible: 8\n";
        let config = ServerConfig::from_yaml_str(yaml).unwrap();
        assert_eq!(config.tick_interval(), Duration::from_millis(250));
        let vehicles = config.streamer(EntityKind::Vehicle).unwrap();
        assert_eq!(vehicles.max_visible, 8);
        assert_eq!(vehicles.streaming_distance, 300.0);
        assert_eq!(vehicles.ephemeral_delay(), Duration::from_secs(10));
        assert!(config.streamer(EntityKind::Object).is_none());
    }

    #[test]
    fn json_round_trips_through_yaml() {
        let json = r#"{"streamers":[{"kind":"pickup","persistent_respawn_secs":600}]}"#;
        let config = ServerConfig::from_json_str(json).unwrap();
        assert_eq!(
            config.streamer(EntityKind::Pickup).unwrap().persistent_delay(),
            Duration::from_secs(600)
        );
        let yaml = config.to_yaml_string().unwrap();
        assert_eq!(ServerConfig::from_yaml_str(&yaml).unwrap(), config);
    }

    #[test]
    fn rejects_invalid_values() {
        let mut streamer = StreamerConfig::for_kind(EntityKind::Object);
        streamer.max_visible = 0;
        assert!(matches!(streamer.validate(), Err(ConfigError::ZeroBudget { .. })));

        let mut streamer = StreamerConfig::for_kind(EntityKind::Object);
        streamer.streaming_distance = -1.0;
        assert!(matches!(streamer.validate(), Err(ConfigError::InvalidDistance { .. })));

        let mut streamer = StreamerConfig::for_kind(EntityKind::Object);
        streamer.min_bound = 10.0;
        streamer.max_bound = 10.0;
        assert!(matches!(streamer.validate(), Err(ConfigError::InvalidBounds { .. })));

        let mut streamer = StreamerConfig::for_kind(EntityKind::Object);
        streamer.ephemeral_respawn_secs = f64::NAN;
        assert!(matches!(streamer.validate(), Err(ConfigError::InvalidRespawnDelay { .. })));

        let mut streamer = StreamerConfig::for_kind(EntityKind::Object);
        streamer.persistent_respawn_secs = 1e300;
        assert!(matches!(streamer.validate(), Err(ConfigError::InvalidRespawnDelay { .. })));
    }

    #[test]
    fn rejects_duplicate_kinds_and_zero_interval() {
        let yaml = "streamers:\n  - kind: vehicle\n  - kind: vehicle\n";
        assert!(matches!(
            ServerConfig::from_yaml_str(yaml),
            Err(ConfigError::DuplicateKind(EntityKind::Vehicle))
        ));
        assert!(matches!(
            ServerConfig::from_yaml_str("tick_interval_ms: 0\n"),
            Err(ConfigError::ZeroTickInterval)
        ));
        assert!(matches!(
            ServerConfig::from_yaml_str("streamers: 5\n"),
            Err(ConfigError::Yaml(_))
        ));
    }
}
