//! Error types for libaps2

use thiserror::Error;

use crate::registers::Command;
use crate::status::{ConfigurationSource, StatusRegister};
use crate::transport::TransportError;

#[derive(Error, Debug)]
pub enum APS2Error {
    /// A caller supplied value violates a protocol or device constraint.
    /// Always detected before anything is transmitted.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
    /// Frame could not be sent or no reply arrived in time
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),
    /// Malformed, truncated or unrecognised reply
    #[error("Protocol error: {reason} (mode/stat 0x{mode_stat:02x})")]
    ProtocolError { mode_stat: u8, reason: String },
    /// The device understood the command but refused it
    #[error("Device rejected {command:?} with mode/stat 0x{mode_stat:02x}")]
    DeviceRejected { command: Command, mode_stat: u8 },
    /// The device refused a chunk of an FPGA image
    #[error("Bitfile rejected at offset 0x{offset:08x} with mode/stat 0x{mode_stat:02x}")]
    BitfileRejected { offset: u32, mode_stat: u8 },
    /// A status register did not reach the expected value within the
    /// configured number of polls
    #[error("Status register {register:?} stuck at 0x{value:08x}")]
    StatusTimeout { register: StatusRegister, value: u32 },
    /// Operation requires a fully configured instrument
    #[error("Instrument not initialised")]
    NotInitialized,
    /// The active firmware image is not the one requested
    #[error("Configuration mismatch: expected {expected:?}, found 0x{found:08x}")]
    ConfigurationMismatch { expected: ConfigurationSource, found: u32 },
    /// A chunked transfer was cancelled; everything before `offset` has
    /// already been applied on the device
    #[error("Transfer cancelled at offset 0x{offset:08x}")]
    Cancelled { offset: u32 },
    /// The thread operating one instrument of a rack panicked
    #[error("Worker for unit {unit} panicked: {message}")]
    WorkerPanicked { unit: usize, message: String },
    /// Bitfile or sequence file could not be read
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl APS2Error {
    pub(crate) fn protocol<S: Into<String>>(mode_stat: u8, reason: S) -> Self {
        APS2Error::ProtocolError { mode_stat, reason: reason.into() }
    }

    pub(crate) fn invalid<S: Into<String>>(reason: S) -> Self {
        APS2Error::InvalidArgument(reason.into())
    }
}

/// Convenience alias used throughout the crate
pub type Result<T> = std::result::Result<T, APS2Error>;
