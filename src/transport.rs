//! Collaborator interfaces: frame transport and file sources
//!
//! libaps2 never opens sockets or parses files by itself. The link to an
//! instrument is provided through an implementation of [`Transport`],
//! bound to a single device address, that moves whole frames of 32-bit
//! words. Bitfiles and sequence files are obtained through a
//! [`FileSource`]; [`FsSource`] reads them straight from disk.

use std::fs;
use std::time::Duration;
use thiserror::Error;


/// Error type for the transport layer
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// No reply within the exchange deadline
    #[error("timed out waiting for reply")]
    Timeout,
    /// Link has not been opened or has been closed
    #[error("not connected")]
    NotConnected,
    /// Any other failure reported by the link
    #[error("{0}")]
    Io(String),
}


/// Frame level link to a single instrument
///
/// A frame is the ordered list of 32-bit protocol words carried by one
/// Ethernet packet. Implementations take care of byte order and framing
/// on the wire; the driver only deals in words.
pub trait Transport {

    /// Open the link to the bound device address
    fn connect(&mut self) -> Result<(), TransportError>;

    /// Close the link. Closing an already closed link is not an error.
    fn disconnect(&mut self) -> Result<(), TransportError>;

    /// Transmit one frame
    fn send(&mut self, frame: &[u32]) -> Result<(), TransportError>;

    /// Block until the next frame arrives or `timeout` elapses, in which
    /// case [`TransportError::Timeout`] is returned. A zero timeout polls
    /// for a frame that has already arrived without blocking.
    fn receive(&mut self, timeout: Duration) -> Result<Vec<u32>, TransportError>;
}


/// Source of FPGA images and sequence data
pub trait FileSource {

    /// Raw bytes of an FPGA image. The contents are opaque to the driver.
    fn read_bitfile(&self, identifier: &str) -> std::io::Result<Vec<u8>>;

    /// Device ready instruction stream of a sequence file
    fn read_sequence_file(&self, path: &str) -> std::io::Result<Vec<u32>>;
}


/// [`FileSource`] reading from the local filesystem.
///
/// Bitfiles are returned verbatim. Sequence files are expected to hold
/// the instruction stream as consecutive little-endian 32-bit words.
#[derive(Default, Clone, Debug)]
pub struct FsSource;

impl FileSource for FsSource {

    fn read_bitfile(&self, identifier: &str) -> std::io::Result<Vec<u8>> {
        fs::read(identifier)
    }

    fn read_sequence_file(&self, path: &str) -> std::io::Result<Vec<u32>> {
        let bytes = fs::read(path)?;

        if bytes.len() % 4 != 0 {
            return Err(std::io::Error::new(std::io::ErrorKind::InvalidData,
                "sequence file is not a whole number of 32-bit words"));
        }

        Ok(bytes.chunks_exact(4)
            .map(|b| u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
            .collect())
    }
}
