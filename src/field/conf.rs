use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RaiseAdjacent {
    Never,
    Always,
    Alternate,
}

/// Immutable per-match tuning shared by every field using this preset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldConf {
    pub swap_ticks: u64,
    pub manual_raise_speed: u32,
    pub raise_speeds: Vec<u32>,
    pub raise_speed_changes: Vec<u64>,
    pub stop_combo_0: u64,
    pub stop_combo_k: u64,
    pub stop_chain_0: u64,
    pub stop_chain_k: u64,
    pub gb_hang_ticks: u64,
    pub flash_ticks: u64,
    pub levitate_ticks: u64,
    pub pop_ticks: u64,
    pub pop0_ticks: u64,
    pub transform_ticks: u64,
    pub color_count: u8,
    pub raise_adjacent: RaiseAdjacent,
    pub lost_ticks: u64,
}

impl FieldConf {
    pub fn is_valid(&self) -> Result<(), ConfigError> {
        if self.raise_speeds.len() != self.raise_speed_changes.len() + 1 {
            return Err(ConfigError::RaiseSpeedLengthMismatch {
                speeds: self.raise_speeds.len(),
                changes: self.raise_speed_changes.len(),
            });
        }
        if !self
            .raise_speed_changes
            .windows(2)
            .all(|w| w[0] < w[1])
        {
            return Err(ConfigError::RaiseSpeedChangesNotIncreasing);
        }
        for (name, value) in [
            ("swap_ticks", self.swap_ticks),
            ("gb_hang_ticks", self.gb_hang_ticks),
            ("flash_ticks", self.flash_ticks),
            ("levitate_ticks", self.levitate_ticks),
            ("pop_ticks", self.pop_ticks),
            ("pop0_ticks", self.pop0_ticks),
            ("transform_ticks", self.transform_ticks),
            ("lost_ticks", self.lost_ticks),
        ] {
            if value == 0 {
                return Err(ConfigError::NonPositiveTickField(name));
            }
        }
        if !(4..=15).contains(&self.color_count) {
            return Err(ConfigError::ColorCountOutOfRange(self.color_count));
        }
        Ok(())
    }
}

#[cfg(test)]
pub fn test_conf() -> FieldConf {
    FieldConf {
        swap_ticks: 4,
        manual_raise_speed: 8192,
        raise_speeds: vec![16, 32],
        raise_speed_changes: vec![6000],
        stop_combo_0: 4,
        stop_combo_k: 2,
        stop_chain_0: 4,
        stop_chain_k: 2,
        gb_hang_ticks: 400,
        flash_ticks: 8,
        levitate_ticks: 12,
        pop_ticks: 3,
        pop0_ticks: 2,
        transform_ticks: 10,
        color_count: 5,
        raise_adjacent: RaiseAdjacent::Alternate,
        lost_ticks: 100,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_test_conf_is_valid() {
        assert!(test_conf().is_valid().is_ok());
    }

    #[test]
    fn mismatched_raise_speed_lengths_rejected() {
        let mut conf = test_conf();
        conf.raise_speeds.push(64);
        assert_eq!(
            conf.is_valid(),
            Err(ConfigError::RaiseSpeedLengthMismatch {
                speeds: 3,
                changes: 1
            })
        );
    }

    #[test]
    fn zero_tick_field_rejected() {
        let mut conf = test_conf();
        conf.flash_ticks = 0;
        assert_eq!(
            conf.is_valid(),
            Err(ConfigError::NonPositiveTickField("flash_ticks"))
        );
    }

    #[test]
    fn color_count_out_of_range_rejected() {
        let mut conf = test_conf();
        conf.color_count = 2;
        assert_eq!(conf.is_valid(), Err(ConfigError::ColorCountOutOfRange(2)));
    }
}
