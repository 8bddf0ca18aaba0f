//! Driver library for the APS2 arbitrary waveform generator.
//!
//! The APS2 is an Ethernet attached, FPGA based instrument with two DAC
//! channels, a PLL clock generator, a VCXO reference and onboard EEPROM.
//! It is controlled exclusively through a 32-bit command/acknowledge
//! protocol. This library implements that protocol, the chip bring-up
//! sequence, FPGA image programming, status decoding and the waveform
//! and sequence data pipelines.
//!
//! libaps2 does not open sockets itself. The link is anything that
//! implements [`Transport`]; it is handed to [`APS2`] which then owns it.
//!
//! ```ignore
//! use libaps2::{APS2, BitfileSlot, Config};
//!
//! let mut aps = APS2::with_config(link, Config::default().sample_rate(600));
//! aps.init(false, BitfileSlot::User)?;
//! println!("{}", aps.read_status()?);
//! ```

#[macro_use] extern crate lazy_static;

#[macro_use] mod macros;

pub mod registers;
pub mod instructions;
pub mod queue;
pub mod bringup;
pub mod status;
pub mod channel;
pub mod lldata;
pub mod transport;
pub mod config;
pub mod error;
pub mod instrument;
pub mod rack;

pub use crate::instrument::{APS2, BitfileSlot, CancelToken};
pub use crate::bringup::BringUpState;
pub use crate::channel::RunMode;
pub use crate::config::Config;
pub use crate::error::{APS2Error, Result};
pub use crate::rack::Rack;
pub use crate::registers::{ResetMode, StatusMode, TriggerSource};
pub use crate::status::{ConfigurationSource, StatusRegister, StatusRegisters};
pub use crate::transport::{Transport, TransportError, FileSource, FsSource};
