use thiserror::Error;

/// Failure modes of a single UPDI bus transaction.
///
/// Every variant that can be blamed on a specific instruction carries its
/// mnemonic so that callers (ultimately the bridge binary) can report which
/// wire operation actually failed.
#[derive(Debug, Error)]
pub enum UpdiError {
    #[error("could not open serial port: {0}")]
    SerialPortUnavailable(#[from] serialport::Error),

    #[error("timed out waiting for a response")]
    TimedOut,

    #[error("`{instruction}`: instruction echo not received")]
    EchoTimedOut { instruction: &'static str },

    #[error("`{instruction}`: response not received")]
    ResponseTimedOut { instruction: &'static str },

    #[error("`{instruction}`: address stage not acknowledged")]
    AddressNacked { instruction: &'static str },

    #[error("`{instruction}`: data stage not acknowledged")]
    DataNacked { instruction: &'static str },

    #[error("`{instruction}`: instruction not echoed")]
    InstructionNotEchoed { instruction: &'static str },

    #[error("serial I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl UpdiError {
    /// The mnemonic of the instruction that failed, if this variant names one.
    pub fn instruction(&self) -> Option<&'static str> {
        match self {
            UpdiError::EchoTimedOut { instruction }
            | UpdiError::ResponseTimedOut { instruction }
            | UpdiError::AddressNacked { instruction }
            | UpdiError::DataNacked { instruction }
            | UpdiError::InstructionNotEchoed { instruction } => Some(instruction),
            UpdiError::SerialPortUnavailable(_)
            | UpdiError::TimedOut
            | UpdiError::Io(_) => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, UpdiError>;
