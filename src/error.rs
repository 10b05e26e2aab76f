use thiserror::Error;

/// Failure classes surfaced to gateway clients.
///
/// Persistence failures are deliberately absent: history inserts are
/// logged and dropped without aborting the scan that produced them.
#[derive(Debug, Error)]
pub enum ScanError {
    /// The envelope was rejected before anything was published.
    #[error("validation error: {0}")]
    Validation(String),

    /// The broker publish itself failed.
    #[error("transport error: {0}")]
    Transport(String),

    /// No reply arrived within the RPC deadline.
    #[error("rpc timeout for queue {0}")]
    Timeout(String),

    /// The probe ran but could not produce a usable result.
    #[error("probe error: {0}")]
    Probe(String),
}

pub type Result<T> = std::result::Result<T, ScanError>;
