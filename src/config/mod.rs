/// Database configuration and connection management
pub mod database;

/// Ledger constants and catalogue loading from config.toml
pub mod settings;

pub use settings::LedgerSettings;
