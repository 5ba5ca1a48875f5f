use thiserror::Error;

/// Top-level failure modes of the bridge binary. Everything below the RSP
/// dispatch loop that can fail either comes from the UPDI/OCD layer (a bus
/// or protocol failure) or from the TCP socket; both are fatal to the
/// current session and propagate to `main`, which logs and exits 1.
#[derive(Debug, Error)]
pub enum BridgeError {
    #[error(transparent)]
    Updi(#[from] updi::UpdiError),

    #[error("network I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("part `{0}` is not a recognized AVR UPDI target")]
    UnknownPart(String),
}

pub type Result<T> = std::result::Result<T, BridgeError>;
