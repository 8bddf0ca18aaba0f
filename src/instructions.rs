//! Frames understood by the APS2
//!
//! Every request sent to the instrument is a [`Packet`]: a command word
//! followed by an optional address (or offset) word and up to
//! [`MAX_CNT`] data words. Packets are built from registers with
//! [`Packet::from_registers`] and handed to the transport with
//! [`Packet::view`].

use crate::error::{APS2Error, Result};
use crate::registers::{ToU32s, Command, CommandWord, ChipConfigStream, StatusMode, ResetMode};
use crate::registers::consts::*;

macro_rules! make_packet_impl {
    ($t:ident, $f:ident) => {

        #[doc(hidden)]
        type S = Self;

        fn create() -> $t {
            $t { $f: Vec::with_capacity(Self::LENGTH) }
        }

        fn len(&self) -> usize {
            self.$f.len()
        }

        fn push_u32s(&mut self, reg: &[u32]) {
            self.$f.extend_from_slice(&reg);
        }

        fn view(&self) -> &[u32] {
            &self.$f
        }
    }
}


/// Common behaviour of all request frames.
///
/// Implementors provide `create`, `push_u32s`, `len` and `view`;
/// everything else is derived from these.
pub trait Packet {

    #[doc(hidden)]
    const LENGTH: usize = MAX_CNT + 2;

    /// Type of the packet. For most cases this should be `Self`.
    type S: Packet;

    /// Create a new empty packet
    fn create() -> Self::S;

    /// Add an array of u32s to the packet
    fn push_u32s(&mut self, reg: &[u32]);

    /// Number of words in the packet
    fn len(&self) -> usize;

    /// Get a u32 view of the packet, command word first
    fn view(&self) -> &[u32];

    #[doc(hidden)]
    /// Create a new packet from a bunch of registers
    fn from_registers(registers: &[&dyn ToU32s]) -> Self::S {

        let mut packet = Self::create();

        for reg in registers {
            packet.push_u32s(&reg.as_u32s());
        }

        packet
    }

    /// Add a new register to this packet
    fn push_register<T: ToU32s>(&mut self, register: &T) {
        self.push_u32s(&register.as_u32s());
    }

    /// Decoded command word of this packet
    fn command(&self) -> CommandWord {
        CommandWord::decode(self.view().first().copied().unwrap_or(0))
    }
}


fn count(len: usize) -> Result<u16> {
    if len == 0 || len > MAX_CNT {
        return Err(APS2Error::invalid(format!("{} data words outside [1, {}]", len, MAX_CNT)));
    }
    Ok(len as u16)
}


/// Write to the user register space
///
/// ## Packet layout
///
/// ```text
///        +---------+---------+--------------+
///        | Command | Address | Data [cnt]   |
///        +---------+---------+--------------+
/// Words:      1         1        1 - 366
/// ```
///
/// With `ack` the device confirms the write with a reply
/// ([`Command::UserIOAck`]); otherwise no reply is sent
/// ([`Command::UserIONack`]).
#[derive(Debug)]
pub struct UserWrite {
    words: Vec<u32>
}

impl UserWrite {

    pub fn new(addr: u32, data: &[u32], ack: bool) -> Result<Self> {
        let cmd = if ack { Command::UserIOAck } else { Command::UserIONack };
        let word = CommandWord::new(cmd, 0x00, count(data.len())?, false, false)?;

        let mut packet = Self::from_registers(&[&word, &addr]);
        packet.push_u32s(data);

        Ok(packet)
    }
}

impl Packet for UserWrite { make_packet_impl!(UserWrite, words); }


/// Read from the user register space
///
/// ## Packet layout
///
/// ```text
///        +---------+---------+
///        | Command | Address |
///        +---------+---------+
/// Words:      1         1
/// ```
///
/// The reply carries `cnt` data words after the command word.
#[derive(Debug)]
pub struct UserRead {
    words: Vec<u32>
}

impl UserRead {

    pub fn new(addr: u32, cnt: usize) -> Result<Self> {
        let word = CommandWord::new(Command::UserIOAck, 0x00, count(cnt)?, false, true)?;
        Ok(Self::from_registers(&[&word, &addr]))
    }
}

impl Packet for UserRead { make_packet_impl!(UserRead, words); }


/// Request a status block
///
/// ## Packet layout
///
/// ```text
///        +---------+
///        | Command |
///        +---------+
/// Words:      1
/// ```
#[derive(Debug)]
pub struct StatusRequest {
    words: Vec<u32>
}

impl StatusRequest {

    pub fn new(mode: StatusMode) -> Self {
        // cnt is a fixed in-range constant
        let word = CommandWord {
            r_w: true,
            cmd: Command::Status as u8,
            mode_stat: mode as u8,
            cnt: NUM_STATUS_REGISTERS as u16,
            ..CommandWord::default()
        };
        Self::from_registers(&[&word])
    }
}

impl Packet for StatusRequest { make_packet_impl!(StatusRequest, words); }


/// Execute a chip configuration stream
///
/// ## Packet layout
///
/// ```text
///        +---------+----------------------------+
///        | Command | Stream (end-of-list incl.) |
///        +---------+----------------------------+
/// Words:      1               cnt
/// ```
#[derive(Debug)]
pub struct ChipConfigIO {
    words: Vec<u32>
}

impl ChipConfigIO {

    pub fn new(stream: &ChipConfigStream) -> Result<Self> {
        let payload = stream.as_u32s();
        let word = CommandWord::new(Command::ChipConfigIO, 0x00, count(payload.len())?, false, false)?;

        let mut packet = Self::from_registers(&[&word]);
        packet.push_u32s(&payload);

        Ok(packet)
    }
}

impl Packet for ChipConfigIO { make_packet_impl!(ChipConfigIO, words); }


/// Run a chip configuration stream previously stored on the device
///
/// ## Packet layout
///
/// ```text
///        +---------+--------+
///        | Command | Offset |
///        +---------+--------+
/// Words:      1         1
/// ```
#[derive(Debug)]
pub struct RunChipConfig {
    words: Vec<u32>
}

impl RunChipConfig {

    pub fn new(offset: u32) -> Result<Self> {
        let word = CommandWord::new(Command::RunChipConfig, 0x00, 1, false, false)?;
        Ok(Self::from_registers(&[&word, &offset]))
    }
}

impl Packet for RunChipConfig { make_packet_impl!(RunChipConfig, words); }


/// One chunk of an FPGA image
///
/// ## Packet layout
///
/// ```text
///        +---------+-------------+-------------+
///        | Command | Byte offset | Data [cnt]  |
///        +---------+-------------+-------------+
/// Words:      1           1          1 - 366
/// ```
///
/// `sel` selects the image slot (0 baseline, 1 user).
#[derive(Debug)]
pub struct FPGAConfigChunk {
    words: Vec<u32>
}

impl FPGAConfigChunk {

    pub fn new(offset: u32, data: &[u32], user_slot: bool) -> Result<Self> {
        let word = CommandWord::new(Command::FPGAConfigCtrl, FPGACONFIG_MODE_WRITE,
            count(data.len())?, user_slot, false)?;

        let mut packet = Self::from_registers(&[&word, &offset]);
        packet.push_u32s(data);

        Ok(packet)
    }
}

impl Packet for FPGAConfigChunk { make_packet_impl!(FPGAConfigChunk, words); }


/// End of an FPGA image
///
/// ## Packet layout
///
/// ```text
///        +---------+------------+
///        | Command | Total size |
///        +---------+------------+
/// Words:      1          1
/// ```
#[derive(Debug)]
pub struct FPGAConfigEnd {
    words: Vec<u32>
}

impl FPGAConfigEnd {

    pub fn new(total_bytes: u32, user_slot: bool) -> Result<Self> {
        let word = CommandWord::new(Command::FPGAConfigCtrl, FPGACONFIG_MODE_END, 1,
            user_slot, false)?;
        Ok(Self::from_registers(&[&word, &total_bytes]))
    }
}

impl Packet for FPGAConfigEnd { make_packet_impl!(FPGAConfigEnd, words); }


/// EEPROM access
///
/// ## Packet layout
///
/// ```text
///        +---------+---------+--------------------+
///        | Command | Address | Data [cnt] (write) |
///        +---------+---------+--------------------+
/// Words:      1         1           0 - 64
/// ```
///
/// Reads and writes move whole 256 byte pages; erases clear a 64 KiB
/// sector and carry a single dummy data word.
#[derive(Debug)]
pub struct EEPROMIO {
    words: Vec<u32>
}

impl EEPROMIO {

    pub fn write(addr: u32, data: &[u32]) -> Result<Self> {
        if data.len() > EPROM_PAGE_WORDS {
            return Err(APS2Error::invalid(format!("{} words exceed an EEPROM page", data.len())));
        }
        let word = CommandWord::new(Command::EPROMIO, EPROM_RW_256B, count(data.len())?,
            false, false)?;

        let mut packet = Self::from_registers(&[&word, &addr]);
        packet.push_u32s(data);

        Ok(packet)
    }

    pub fn read(addr: u32, cnt: usize) -> Result<Self> {
        if cnt > EPROM_PAGE_WORDS {
            return Err(APS2Error::invalid(format!("{} words exceed an EEPROM page", cnt)));
        }
        let word = CommandWord::new(Command::EPROMIO, EPROM_RW_256B, count(cnt)?, false, true)?;
        Ok(Self::from_registers(&[&word, &addr]))
    }

    pub fn erase(addr: u32) -> Result<Self> {
        if addr % EPROM_SECTOR_BYTES != 0 {
            return Err(APS2Error::invalid(format!(
                "address 0x{:08x} is not aligned to an EEPROM sector", addr)));
        }
        let word = CommandWord::new(Command::EPROMIO, EPROM_ERASE_64K, 1, false, false)?;
        Ok(Self::from_registers(&[&word, &addr, &0u32]))
    }
}

impl Packet for EEPROMIO { make_packet_impl!(EEPROMIO, words); }


/// Reset or reconfigure the device. No reply is sent.
///
/// ## Packet layout
///
/// ```text
///        +---------+
///        | Command |
///        +---------+
/// Words:      1
/// ```
#[derive(Debug)]
pub struct Reset {
    words: Vec<u32>
}

impl Reset {

    pub fn new(mode: ResetMode) -> Self {
        let word = CommandWord {
            cmd: Command::Reset as u8,
            mode_stat: mode as u8,
            ..CommandWord::default()
        };
        Self::from_registers(&[&word])
    }
}

impl Packet for Reset { make_packet_impl!(Reset, words); }


/// Pack an FPGA image into protocol words: big-endian, the final word
/// padded with `0xFF`.
pub fn pack_image(image: &[u8]) -> Vec<u32> {
    image.chunks(4)
        .map(|chunk| {
            let mut bytes = [0xFFu8; 4];
            bytes[..chunk.len()].copy_from_slice(chunk);
            u32::from_be_bytes(bytes)
        })
        .collect()
}
