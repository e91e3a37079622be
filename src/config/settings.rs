//! Ledger settings and catalogue loading from config.toml
//!
//! The `[ledger]` table carries the business constants (withdrawal fee, minimum,
//! sign-up bonus, referral quota). `[[packages]]` and `[[tasks]]` seed the catalogue
//! on `init`. Amounts are written in major units (`30.0`, `0.2`) and converted to
//! exact minor units on load.

use crate::core::money::{Money, Rate};
use crate::errors::{Error, Result};
use serde::Deserialize;
use std::path::Path;

/// Configuration structure representing the entire config.toml file
#[derive(Debug, Default, Deserialize)]
pub struct Config {
    /// Business constants
    #[serde(default)]
    pub ledger: LedgerConfig,
    /// Package catalogue to seed
    #[serde(default)]
    pub packages: Vec<PackageConfig>,
    /// Task catalogue to seed
    #[serde(default)]
    pub tasks: Vec<TaskConfig>,
}

/// Raw `[ledger]` table
#[derive(Debug, Default, Deserialize)]
pub struct LedgerConfig {
    /// Withdrawal fee in basis points
    pub withdrawal_fee_bps: Option<u32>,
    /// Smallest withdrawal accepted
    pub minimum_withdrawal: Option<f64>,
    /// Credited on registration
    pub registration_bonus: Option<f64>,
    /// Direct referrals needed before withdrawing
    pub required_referrals: Option<u64>,
    /// Of those, how many must have an approved deposit
    pub required_active_referrals: Option<u64>,
}

/// Configuration for a single package
#[derive(Debug, Deserialize, Clone)]
pub struct PackageConfig {
    /// Package id
    pub id: String,
    /// Display name
    pub name: String,
    /// Price in major units
    pub price: f64,
    /// Lifetime in days
    #[serde(default = "default_duration_days")]
    pub duration_days: i32,
    /// Daily reward in major units
    pub daily_claim: f64,
    /// Closed for purchase
    #[serde(default)]
    pub locked: bool,
}

/// Configuration for a single task
#[derive(Debug, Deserialize, Clone)]
pub struct TaskConfig {
    /// Task id
    pub id: String,
    /// Display title
    pub title: String,
    /// Task category
    pub kind: String,
    /// Reward in major units
    pub reward: f64,
}

const fn default_duration_days() -> i32 {
    90
}

/// Business constants used by the core operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerSettings {
    /// Fee withheld from each withdrawal
    pub withdrawal_fee: Rate,
    /// Smallest withdrawal accepted
    pub minimum_withdrawal: Money,
    /// Credited on registration; zero disables the bonus
    pub registration_bonus: Money,
    /// Direct referrals needed before withdrawing
    pub required_referrals: u64,
    /// Direct referrals with an approved deposit needed before withdrawing
    pub required_active_referrals: u64,
}

impl Default for LedgerSettings {
    fn default() -> Self {
        Self {
            withdrawal_fee: Rate::from_bps(1500),
            minimum_withdrawal: Money::from_major(30),
            registration_bonus: Money::from_major(50),
            required_referrals: 3,
            required_active_referrals: 1,
        }
    }
}

impl LedgerConfig {
    /// Resolves the raw table against the defaults.
    pub fn settings(&self) -> Result<LedgerSettings> {
        let defaults = LedgerSettings::default();
        let minimum_withdrawal = self
            .minimum_withdrawal
            .map(Money::try_from_decimal)
            .transpose()?
            .unwrap_or(defaults.minimum_withdrawal);
        let registration_bonus = self
            .registration_bonus
            .map(Money::try_from_decimal)
            .transpose()?
            .unwrap_or(defaults.registration_bonus);
        let withdrawal_fee = self
            .withdrawal_fee_bps
            .map_or(defaults.withdrawal_fee, Rate::from_bps);

        if withdrawal_fee.bps() > 10_000 {
            return Err(Error::Config {
                message: format!("withdrawal_fee_bps {} exceeds 100%", withdrawal_fee.bps()),
            });
        }
        if minimum_withdrawal < Money::ZERO || registration_bonus < Money::ZERO {
            return Err(Error::Config {
                message: "ledger amounts must not be negative".to_string(),
            });
        }

        Ok(LedgerSettings {
            withdrawal_fee,
            minimum_withdrawal,
            registration_bonus,
            required_referrals: self
                .required_referrals
                .unwrap_or(defaults.required_referrals),
            required_active_referrals: self
                .required_active_referrals
                .unwrap_or(defaults.required_active_referrals),
        })
    }
}

/// Loads configuration from a TOML file
///
/// # Errors
/// Returns an error if:
/// - The file cannot be read
/// - The TOML syntax is invalid
/// - Required fields are missing
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<Config> {
    let contents = std::fs::read_to_string(path.as_ref()).map_err(|e| Error::Config {
        message: format!("Failed to read config file: {e}"),
    })?;
    parse_config(&contents)
}

/// Parses configuration from TOML text
pub fn parse_config(contents: &str) -> Result<Config> {
    toml::from_str(contents).map_err(|e| Error::Config {
        message: format!("Failed to parse config.toml: {e}"),
    })
}

/// Loads configuration from the default location (./config.toml)
pub fn load_default_config() -> Result<Config> {
    load_config("config.toml")
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use super::*;

    #[test]
    fn test_parse_ledger_config() {
        let toml_str = r#"
            [ledger]
            withdrawal_fee_bps = 1000
            minimum_withdrawal = 50.0

            [[packages]]
            id = "p200"
            name = "Starter I"
            price = 200.0
            daily_claim = 35.0

            [[packages]]
            id = "p100000"
            name = "Diamond II"
            price = 100000.0
            duration_days = 60
            daily_claim = 22000.0
            locked = true

            [[tasks]]
            id = "t1"
            title = "Watch a video"
            kind = "video"
            reward = 0.2
        "#;

        let config = parse_config(toml_str).unwrap();
        assert_eq!(config.packages.len(), 2);
        assert_eq!(config.packages[0].duration_days, 90);
        assert!(!config.packages[0].locked);
        assert!(config.packages[1].locked);
        assert_eq!(config.tasks[0].kind, "video");

        let settings = config.ledger.settings().unwrap();
        assert_eq!(settings.withdrawal_fee, Rate::from_bps(1000));
        assert_eq!(settings.minimum_withdrawal, Money::from_major(50));
        // unspecified keys keep their defaults
        assert_eq!(settings.registration_bonus, Money::from_major(50));
        assert_eq!(settings.required_referrals, 3);
    }

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = parse_config("").unwrap();
        assert!(config.packages.is_empty());
        assert_eq!(config.ledger.settings().unwrap(), LedgerSettings::default());
    }

    #[test]
    fn test_fee_above_hundred_percent_rejected() {
        let config = parse_config("[ledger]\nwithdrawal_fee_bps = 12000\n").unwrap();
        assert!(matches!(
            config.ledger.settings(),
            Err(Error::Config { .. })
        ));
    }
}
