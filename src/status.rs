//! Status block interpretation
//!
//! The STATUS command returns sixteen 32-bit registers. Their meaning is
//! fixed by position; [`StatusRegisters::from_words`] maps them to named
//! fields without any lookup by name.

use std::fmt;
use num_derive::FromPrimitive;
use num_traits::FromPrimitive;

use crate::error::{APS2Error, Result};
use crate::registers::consts::NUM_STATUS_REGISTERS;


/// Position of each register in the status block
#[derive(Clone, Copy, Debug, PartialEq, Eq, FromPrimitive)]
#[repr(u8)]
pub enum StatusRegister {
    HostFirmwareVersion = 0x0,
    UserFirmwareVersion = 0x1,
    ConfigurationSource = 0x2,
    UserStatus = 0x3,
    DAC0Status = 0x4,
    DAC1Status = 0x5,
    PLLStatus = 0x6,
    VCXOStatus = 0x7,
    SendPacketCount = 0x8,
    ReceivePacketCount = 0x9,
    SequenceSkipCount = 0xA,
    SequenceDupCount = 0xB,
    Uptime = 0xC,
    Reserved1 = 0xD,
    Reserved2 = 0xE,
    Reserved3 = 0xF,
}

impl StatusRegister {
    /// Status register reporting on a DAC channel
    pub fn dac(channel: usize) -> StatusRegister {
        if channel == 0 {
            StatusRegister::DAC0Status
        } else {
            StatusRegister::DAC1Status
        }
    }
}


/// Firmware image the FPGA was configured from
#[derive(Clone, Copy, Debug, PartialEq, Eq, FromPrimitive)]
#[repr(u32)]
pub enum ConfigurationSource {
    BaselineImage = 0xBBBB_BBBB,
    UserEEPROMImage = 0xEEEE_EEEE,
}

impl ConfigurationSource {
    pub fn magic(&self) -> u32 {
        *self as u32
    }
}


/// Snapshot of the instrument status block
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct StatusRegisters {
    pub host_firmware_version: u32,
    pub user_firmware_version: u32,
    pub configuration_source: u32,
    pub user_status: u32,
    pub dac0_status: u32,
    pub dac1_status: u32,
    pub pll_status: u32,
    pub vcxo_status: u32,
    pub send_packet_count: u32,
    pub receive_packet_count: u32,
    pub sequence_skip_count: u32,
    pub sequence_dup_count: u32,
    pub uptime: u32,
    pub reserved1: u32,
    pub reserved2: u32,
    pub reserved3: u32,
}

impl StatusRegisters {

    /// Decode a status payload. Fewer than 16 words is a truncated block;
    /// anything past the sixteenth word is ignored.
    pub fn from_words(words: &[u32]) -> Result<Self> {

        if words.len() < NUM_STATUS_REGISTERS {
            return Err(APS2Error::protocol(0x00, format!(
                "truncated status block: {} of {} words", words.len(), NUM_STATUS_REGISTERS)));
        }

        Ok(StatusRegisters {
            host_firmware_version: words[0x0],
            user_firmware_version: words[0x1],
            configuration_source: words[0x2],
            user_status: words[0x3],
            dac0_status: words[0x4],
            dac1_status: words[0x5],
            pll_status: words[0x6],
            vcxo_status: words[0x7],
            send_packet_count: words[0x8],
            receive_packet_count: words[0x9],
            sequence_skip_count: words[0xA],
            sequence_dup_count: words[0xB],
            uptime: words[0xC],
            reserved1: words[0xD],
            reserved2: words[0xE],
            reserved3: words[0xF],
        })
    }

    /// Back to protocol order
    pub fn to_words(&self) -> [u32; NUM_STATUS_REGISTERS] {
        [self.host_firmware_version, self.user_firmware_version,
         self.configuration_source, self.user_status,
         self.dac0_status, self.dac1_status, self.pll_status, self.vcxo_status,
         self.send_packet_count, self.receive_packet_count,
         self.sequence_skip_count, self.sequence_dup_count,
         self.uptime, self.reserved1, self.reserved2, self.reserved3]
    }

    /// Value of a single register
    pub fn get(&self, register: StatusRegister) -> u32 {
        self.to_words()[register as usize]
    }

    /// Active image, if the magic value is a known one
    pub fn configuration_source(&self) -> Option<ConfigurationSource> {
        ConfigurationSource::from_u32(self.configuration_source)
    }

    /// `true` if host and user firmware versions differ by more than
    /// `skew`
    pub fn firmware_mismatch(&self, skew: u32) -> bool {
        let diff = if self.host_firmware_version > self.user_firmware_version {
            self.host_firmware_version - self.user_firmware_version
        } else {
            self.user_firmware_version - self.host_firmware_version
        };
        diff > skew
    }

    /// `true` if the device has seen skipped or duplicated command
    /// sequence numbers since power up
    pub fn has_sequence_errors(&self) -> bool {
        self.sequence_skip_count != 0 || self.sequence_dup_count != 0
    }
}

impl fmt::Display for StatusRegisters {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let source = match self.configuration_source() {
            Some(ConfigurationSource::BaselineImage) => "baseline",
            Some(ConfigurationSource::UserEEPROMImage) => "user EEPROM",
            None => "unknown",
        };

        writeln!(f, "Host firmware version:  0x{:08x}", self.host_firmware_version)?;
        writeln!(f, "User firmware version:  0x{:08x}", self.user_firmware_version)?;
        writeln!(f, "Configuration source:   0x{:08x} ({})", self.configuration_source, source)?;
        writeln!(f, "User status:            0x{:08x}", self.user_status)?;
        writeln!(f, "DAC0 status:            0x{:08x}", self.dac0_status)?;
        writeln!(f, "DAC1 status:            0x{:08x}", self.dac1_status)?;
        writeln!(f, "PLL status:             0x{:08x}", self.pll_status)?;
        writeln!(f, "VCXO status:            0x{:08x}", self.vcxo_status)?;
        writeln!(f, "Send packet count:      {}", self.send_packet_count)?;
        writeln!(f, "Receive packet count:   {}", self.receive_packet_count)?;
        writeln!(f, "Sequence skip count:    {}", self.sequence_skip_count)?;
        writeln!(f, "Sequence dup count:     {}", self.sequence_dup_count)?;
        write!(f, "Uptime:                 {}", self.uptime)
    }
}


#[cfg(test)]
mod tests {

    use super::*;
    use assert_matches::assert_matches;

    fn block() -> Vec<u32> {
        (0u32..16).map(|i| 0x1000 + i).collect()
    }

    #[test]
    fn positional_decode() {
        let words = block();
        let status = StatusRegisters::from_words(&words).unwrap();

        assert_eq!(status.host_firmware_version, 0x1000);
        assert_eq!(status.configuration_source, 0x1002);
        assert_eq!(status.pll_status, 0x1006);
        assert_eq!(status.sequence_skip_count, 0x100A);
        assert_eq!(status.sequence_dup_count, 0x100B);
        assert_eq!(status.reserved3, 0x100F);
        assert_eq!(&status.to_words()[..], words.as_slice());

        for i in 0u8..16 {
            let reg = StatusRegister::from_u8(i).unwrap();
            assert_eq!(status.get(reg), words[i as usize]);
        }
    }

    #[test]
    fn truncated_block() {
        let words = block();
        assert_matches!(StatusRegisters::from_words(&words[..15]),
            Err(APS2Error::ProtocolError { .. }));
        assert_matches!(StatusRegisters::from_words(&[]),
            Err(APS2Error::ProtocolError { .. }));
    }

    #[test]
    fn configuration_source() {
        let mut words = block();
        words[2] = 0xEEEE_EEEE;
        let status = StatusRegisters::from_words(&words).unwrap();
        assert_eq!(status.configuration_source(), Some(ConfigurationSource::UserEEPROMImage));

        words[2] = 0xBBBB_BBBB;
        let status = StatusRegisters::from_words(&words).unwrap();
        assert_eq!(status.configuration_source(), Some(ConfigurationSource::BaselineImage));

        words[2] = 0x1234_5678;
        let status = StatusRegisters::from_words(&words).unwrap();
        assert_eq!(status.configuration_source(), None);
    }

    #[test]
    fn health_signals() {
        let mut status = StatusRegisters::default();
        status.host_firmware_version = 0x0203;
        status.user_firmware_version = 0x0201;

        assert!(status.firmware_mismatch(0));
        assert!(status.firmware_mismatch(1));
        assert!(!status.firmware_mismatch(2));
        assert!(!status.has_sequence_errors());

        status.sequence_dup_count = 1;
        assert!(status.has_sequence_errors());
    }

    #[test]
    fn display() {
        let mut words = block();
        words[2] = 0xBBBB_BBBB;
        let status = StatusRegisters::from_words(&words).unwrap();
        let text = status.to_string();
        assert!(text.contains("Configuration source:   0xbbbbbbbb (baseline)"));
        assert!(text.starts_with("Host firmware version:  0x00001000"));
    }
}
