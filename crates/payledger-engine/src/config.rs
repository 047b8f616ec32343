//! Engine configuration.

use std::path::Path;
use std::time::Duration;

use payledger_core::{LedgerError, RateTable, Result};

/// Default time `charge` waits for a gateway settlement.
pub const DEFAULT_CHARGE_WAIT: Duration = Duration::from_secs(30);

/// Default number of attempts for an append that keeps hitting write conflicts.
pub const DEFAULT_APPEND_MAX_ATTEMPTS: u32 = 5;

/// Initial backoff between conflicting appends (doubles with each attempt).
pub const DEFAULT_APPEND_INITIAL_BACKOFF: Duration = Duration::from_millis(10);

/// Maximum backoff between conflicting appends.
pub const DEFAULT_APPEND_MAX_BACKOFF: Duration = Duration::from_millis(500);

/// Tuning knobs shared by every engine component.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// How long `charge` waits for the gateway before reporting `Pending`.
    pub charge_wait: Duration,
    /// Attempts per append before `LedgerConflict` surfaces.
    pub append_max_attempts: u32,
    /// First backoff after a write conflict.
    pub append_initial_backoff: Duration,
    /// Backoff ceiling.
    pub append_max_backoff: Duration,
    /// Prices applied by the charge calculator.
    pub rates: RateTable,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            charge_wait: DEFAULT_CHARGE_WAIT,
            append_max_attempts: DEFAULT_APPEND_MAX_ATTEMPTS,
            append_initial_backoff: DEFAULT_APPEND_INITIAL_BACKOFF,
            append_max_backoff: DEFAULT_APPEND_MAX_BACKOFF,
            rates: RateTable::default(),
        }
    }
}

impl EngineConfig {
    /// Check the configuration is usable.
    ///
    /// # Errors
    ///
    /// Returns `LedgerError::Configuration` for a zero attempt budget, a zero
    /// charge wait, or an invalid rate table.
    pub fn validate(&self) -> Result<()> {
        if self.append_max_attempts == 0 {
            return Err(LedgerError::Configuration(
                "append_max_attempts must be at least 1".into(),
            ));
        }
        if self.charge_wait.is_zero() {
            return Err(LedgerError::Configuration(
                "charge_wait must be positive".into(),
            ));
        }
        self.rates.validate()
    }

    /// Load a rate table from a JSON file.
    ///
    /// # Errors
    ///
    /// Returns `LedgerError::Configuration` if the file cannot be read or parsed.
    pub fn load_rates(path: &Path) -> Result<RateTable> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            LedgerError::Configuration(format!("failed to read {}: {e}", path.display()))
        })?;
        let rates: RateTable = serde_json::from_str(&content).map_err(|e| {
            LedgerError::Configuration(format!("failed to parse {}: {e}", path.display()))
        })?;
        rates.validate()?;
        Ok(rates)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_is_valid() {
        EngineConfig::default().validate().unwrap();
    }

    #[test]
    fn zero_attempts_rejected() {
        let config = EngineConfig {
            append_max_attempts: 0,
            ..EngineConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(LedgerError::Configuration(_))
        ));
    }

    #[test]
    fn missing_rate_file_is_configuration_error() {
        let err = EngineConfig::load_rates(Path::new("/nonexistent/rates.json")).unwrap_err();
        assert!(matches!(err, LedgerError::Configuration(_)));
    }
}
