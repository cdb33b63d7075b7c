use std::error::Error;
use std::fmt::{self, Display};

/// Failures validating a `FieldConf` or `ServerConf` before a match starts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    RaiseSpeedChangesNotIncreasing,
    RaiseSpeedLengthMismatch { speeds: usize, changes: usize },
    NonPositiveTickField(&'static str),
    ColorCountOutOfRange(u8),
    UnknownFieldConfPreset(String),
    NoFieldConfPresets,
    MaxPlayersOutOfRange(u32),
    LagWindowTooWide { max_lag_ticks: u64, min_gb_hang_ticks: u64 },
}

impl Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::RaiseSpeedChangesNotIncreasing => {
                write!(f, "raise_speed_changes must be strictly increasing")
            }
            ConfigError::RaiseSpeedLengthMismatch { speeds, changes } => write!(
                f,
                "raise_speeds.len() ({speeds}) must equal raise_speed_changes.len() + 1 ({})",
                changes + 1
            ),
            ConfigError::NonPositiveTickField(name) => {
                write!(f, "field `{name}` must be a positive tick count")
            }
            ConfigError::ColorCountOutOfRange(n) => {
                write!(f, "color_count {n} is out of the valid range 4..=15")
            }
            ConfigError::UnknownFieldConfPreset(name) => {
                write!(f, "no field configuration preset named `{name}`")
            }
            ConfigError::NoFieldConfPresets => {
                write!(f, "server configuration carries no field_confs presets")
            }
            ConfigError::MaxPlayersOutOfRange(n) => {
                write!(f, "max_players {n} must be at least 1")
            }
            ConfigError::LagWindowTooWide {
                max_lag_ticks,
                min_gb_hang_ticks,
            } => write!(
                f,
                "max_lag_ticks ({max_lag_ticks}) must be less than every field's gb_hang_ticks \
                 (smallest configured is {min_gb_hang_ticks})"
            ),
        }
    }
}

impl Error for ConfigError {}
