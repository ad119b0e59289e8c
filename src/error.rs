//! Error kinds for the hub (spec §7).

use thiserror::Error;

pub type Result<T> = std::result::Result<T, HubError>;

/// Errors the hub can encounter. Most are logged and swallowed rather than
/// propagated — see spec §7 for which is which.
#[derive(Error, Debug)]
pub enum HubError {
    /// A call-placement or hangup failure surfaced by a VoipIO worker.
    /// Caught locally at the call site and logged; never fatal.
    #[error("VoIP error: {0}")]
    Voip(String),

    /// A required configuration section was missing at startup. Fatal.
    #[error("configuration error: {0}")]
    Config(String),

    /// The call database file was missing or corrupt. Treated as an empty
    /// database, never fatal.
    #[error("failed to load call database: {0}")]
    DbLoad(#[source] std::io::Error),

    /// The call database failed to persist. Logged, loop continues.
    #[error("failed to save call database: {0}")]
    DbSave(#[source] std::io::Error),
}
