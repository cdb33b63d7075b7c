use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::field::conf::FieldConf;

/// Server-wide tuning, validated once at startup and then treated as
/// immutable for the lifetime of the process. The caller is responsible for
/// obtaining these values (file, environment, hardcoded fixture); this crate
/// only owns and validates the resulting struct.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConf {
    pub max_players: u32,
    pub tick_microseconds: u64,
    pub max_lag_ticks: u64,
    pub start_countdown_ticks: u64,
    pub field_confs: Vec<(String, FieldConf)>,
}

impl ServerConf {
    /// Validates every field-conf preset plus the lag/garbage-hang invariant
    /// that keeps a garbage from ever becoming droppable while still inside
    /// the permitted lag window.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_players == 0 {
            return Err(ConfigError::MaxPlayersOutOfRange(self.max_players));
        }
        if self.field_confs.is_empty() {
            return Err(ConfigError::NoFieldConfPresets);
        }
        for (_, conf) in &self.field_confs {
            conf.is_valid()?;
        }
        let min_gb_hang_ticks = self
            .field_confs
            .iter()
            .map(|(_, conf)| conf.gb_hang_ticks)
            .min()
            .expect("checked non-empty above");
        if self.max_lag_ticks >= min_gb_hang_ticks {
            return Err(ConfigError::LagWindowTooWide {
                max_lag_ticks: self.max_lag_ticks,
                min_gb_hang_ticks,
            });
        }
        Ok(())
    }

    pub fn field_conf(&self, name: &str) -> Result<&FieldConf, ConfigError> {
        self.field_confs
            .iter()
            .find(|(preset_name, _)| preset_name == name)
            .map(|(_, conf)| conf)
            .ok_or_else(|| ConfigError::UnknownFieldConfPreset(name.to_string()))
    }
}

#[cfg(test)]
pub fn test_server_conf() -> ServerConf {
    use crate::field::conf::test_conf;
    ServerConf {
        max_players: 2,
        tick_microseconds: 16_667,
        max_lag_ticks: 20,
        start_countdown_ticks: 180,
        field_confs: vec![("default".to_string(), test_conf())],
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_test_conf_is_valid() {
        assert!(test_server_conf().validate().is_ok());
    }

    #[test]
    fn lag_window_must_be_narrower_than_every_gb_hang_ticks() {
        let mut conf = test_server_conf();
        conf.max_lag_ticks = conf.field_confs[0].1.gb_hang_ticks;
        assert!(matches!(
            conf.validate(),
            Err(ConfigError::LagWindowTooWide { .. })
        ));
    }

    #[test]
    fn unknown_preset_name_is_rejected() {
        let conf = test_server_conf();
        assert!(matches!(
            conf.field_conf("nope"),
            Err(ConfigError::UnknownFieldConfPreset(_))
        ));
    }
}
