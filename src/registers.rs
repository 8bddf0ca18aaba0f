//! Bit level codec for the APS2 command protocol
//!
//! Every word exchanged with the instrument is 32 bits wide. The layouts
//! below are packed and unpacked explicitly with [`bitvec`] so the wire
//! format does not depend on any compiler's bitfield layout rules.

use std::fmt;
use std::ops::Range;
use bitvec::prelude::*;
use bitflags::bitflags;
use num_derive::FromPrimitive;
use num_traits::FromPrimitive;

use crate::channel::RunMode;
use crate::error::{APS2Error, Result};

pub mod consts {

    //! Protocol limits, mode/stat codes and the user register map

    /// Maximum number of data words in one frame (Ethernet packet limit)
    pub const MAX_CNT: usize = 366;
    /// Number of words in the status block
    pub const NUM_STATUS_REGISTERS: usize = 16;

    /// Generic success status
    pub const SUCCESS: u8 = 0x00;
    /// Generic invalid count status
    pub const INVALID_CNT: u8 = 0x01;
    /// Status returned for an invalid or unrecognised command
    pub const INVALID_COMMAND: u8 = 0xFF;

    pub const USERIO_USER_LOGIC_TIMEOUT: u8 = 0x02;

    pub const EPROM_RW_256B: u8 = 0x00;
    pub const EPROM_ERASE_64K: u8 = 0x01;
    pub const EPROM_OPERATION_FAILED: u8 = 0x04;
    /// Words in one 256 byte EEPROM page
    pub const EPROM_PAGE_WORDS: usize = 64;
    /// Bytes in one erasable EEPROM sector
    pub const EPROM_SECTOR_BYTES: u32 = 0x1_0000;

    pub const CHIPCONFIG_INVALID_TARGET: u8 = 0x02;
    pub const RUNCHIPCONFIG_INVALID_OFFSET: u8 = 0x02;

    pub const FPGACONFIG_INVALID_OFFSET: u8 = 0x02;
    /// Mode of an image data chunk
    pub const FPGACONFIG_MODE_WRITE: u8 = 0x00;
    /// Mode of the end-of-image marker
    pub const FPGACONFIG_MODE_END: u8 = 0x01;

    /// Mode/stat of a reply with the `seq` flag raised
    pub const SEQ_DUPLICATE: u8 = 0x00;
    pub const SEQ_SKIP: u8 = 0x01;

    // User register map (byte addresses, 4 bytes per word)
    pub const CONTROL_ADDR: u32 = 0x4400_0000;
    pub const TRIGGER_INTERVAL_ADDR: u32 = 0x4400_0004;
    pub const WAVEFORM_LENGTH_ADDR: [u32; 2] = [0x4400_0008, 0x4400_000C];
    pub const DAC_OFFSET_ADDR: [u32; 2] = [0x4400_0010, 0x4400_0014];
    pub const LL_LENGTH_ADDR: u32 = 0x4400_0018;
    pub const WAVEFORM_BASE: [u32; 2] = [0x4800_0000, 0x4900_0000];
    pub const LL_DATA_BASE: u32 = 0x5000_0000;

    /// Waveform memory per channel, in samples
    pub const WAVEFORM_MAX_SAMPLES: usize = 65536;
    /// LL memory, in words
    pub const LL_MAX_WORDS: usize = 40960;

    /// PLL_STATUS bit raised once the PLL has locked
    pub const PLL_LOCKED: u32 = 0x0000_0001;
    /// DACn_STATUS bit raised once the DAC FIFO is running
    pub const DAC_READY: u32 = 0x0000_0001;
}

use self::consts::*;


/// Anything that can be laid out as a sequence of protocol words
pub trait ToU32s {
    fn as_u32s(&self) -> Vec<u32>;
}

impl ToU32s for u32 {
    fn as_u32s(&self) -> Vec<u32> {
        vec![*self]
    }
}


type Word32 = BitArray<[u32; 1], Lsb0>;
type Word16 = BitArray<[u16; 1], Lsb0>;
type Word8 = BitArray<[u8; 1], Lsb0>;


/// Commands understood by the APS2
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, FromPrimitive)]
#[repr(u8)]
pub enum Command {
    Reset = 0x0,
    UserIOAck = 0x1,
    UserIONack = 0x9,
    EPROMIO = 0x2,
    ChipConfigIO = 0x3,
    RunChipConfig = 0x4,
    FPGAConfigAck = 0x5,
    FPGAConfigNack = 0xD,
    FPGAConfigCtrl = 0x6,
    Status = 0x7,
}

impl Command {
    /// Whether `cnt` must be within `[1, MAX_CNT]` for this command.
    /// Resets carry no data.
    pub fn expects_count(&self) -> bool {
        !matches!(self, Command::Reset)
    }
}


/// The 32-bit command / acknowledge word
///
/// ## Layout
///
/// ```text
///  31    30    29    28    27..24   23..16      15..0
/// +-----+-----+-----+-----+--------+-----------+----------+
/// | ACK | SEQ | SEL | R/W |  CMD   | MODE/STAT |   CNT    |
/// +-----+-----+-----+-----+--------+-----------+----------+
/// ```
///
/// `ack` and `seq` are only ever set by the device. `cnt` is the number of
/// data words following the address word and is echoed in the reply.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub struct CommandWord {
    pub ack: bool,
    pub seq: bool,
    pub sel: bool,
    pub r_w: bool,
    pub cmd: u8,
    pub mode_stat: u8,
    pub cnt: u16,
}

impl CommandWord {

    const CNT: Range<usize> = 0..16;
    const MODE_STAT: Range<usize> = 16..24;
    const CMD: Range<usize> = 24..28;
    const RW: usize = 28;
    const SEL: usize = 29;
    const SEQ: usize = 30;
    const ACK: usize = 31;

    /// Build a host issued command word, checking the count limits.
    pub fn new(cmd: Command, mode_stat: u8, cnt: u16, sel: bool, r_w: bool) -> Result<Self> {

        if cmd.expects_count() && (cnt == 0 || cnt as usize > MAX_CNT) {
            return Err(APS2Error::invalid(format!(
                "count {} for {:?} outside [1, {}]", cnt, cmd, MAX_CNT)));
        }

        if !cmd.expects_count() && cnt as usize > MAX_CNT {
            return Err(APS2Error::invalid(format!(
                "count {} for {:?} exceeds {}", cnt, cmd, MAX_CNT)));
        }

        Ok(CommandWord {
            ack: false,
            seq: false,
            sel: sel,
            r_w: r_w,
            cmd: cmd as u8,
            mode_stat: mode_stat,
            cnt: cnt
        })
    }

    /// Pack into the wire representation
    pub fn encode(&self) -> u32 {
        let mut bits = Word32::ZERO;

        bits[Self::CNT].store_le::<u16>(self.cnt);
        bits[Self::MODE_STAT].store_le::<u8>(self.mode_stat);
        bits[Self::CMD].store_le::<u8>(self.cmd & 0xF);
        bits.set(Self::RW, self.r_w);
        bits.set(Self::SEL, self.sel);
        bits.set(Self::SEQ, self.seq);
        bits.set(Self::ACK, self.ack);

        bits.into_inner()[0]
    }

    /// Unpack any 32-bit pattern. Never fails; whether the result makes
    /// sense as a reply is for the caller to decide.
    pub fn decode(word: u32) -> Self {
        let bits = Word32::new([word]);

        CommandWord {
            ack: bits[Self::ACK],
            seq: bits[Self::SEQ],
            sel: bits[Self::SEL],
            r_w: bits[Self::RW],
            cmd: bits[Self::CMD].load_le::<u8>(),
            mode_stat: bits[Self::MODE_STAT].load_le::<u8>(),
            cnt: bits[Self::CNT].load_le::<u16>(),
        }
    }

    /// The command this word refers to, if it is a known one
    pub fn command(&self) -> Option<Command> {
        Command::from_u8(self.cmd)
    }
}

impl ToU32s for CommandWord {
    fn as_u32s(&self) -> Vec<u32> {
        vec![self.encode()]
    }
}

impl fmt::Display for CommandWord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "APSCommand {{ ack: {}, seq: {}, sel: {}, r_w: {}, cmd: 0x{:x}",
            self.ack as u8, self.seq as u8, self.sel as u8, self.r_w as u8, self.cmd)?;
        if let Some(cmd) = self.command() {
            write!(f, " ({:?})", cmd)?;
        }
        write!(f, ", mode_stat: 0x{:02x}, cnt: {} }}", self.mode_stat, self.cnt)
    }
}

/// Pack a command word from raw fields. Fails if `cmd` is not a defined
/// command code or if `cnt` is out of range for that command.
pub fn encode_command(cmd: u8, mode_stat: u8, cnt: u16, sel: bool, r_w: bool) -> Result<u32> {
    let command = Command::from_u8(cmd)
        .ok_or_else(|| APS2Error::invalid(format!("undefined command code 0x{:x}", cmd)))?;
    Ok(CommandWord::new(command, mode_stat, cnt, sel, r_w)?.encode())
}

/// Unpack a command word
pub fn decode_command(word: u32) -> CommandWord {
    CommandWord::decode(word)
}


/// Target byte of a chip configuration word
#[derive(Clone, Copy, Debug, PartialEq, Eq, FromPrimitive)]
#[repr(u8)]
pub enum ChipConfigTarget {
    /// Pause the stream for 100 ns times D<23:0>
    Pause = 0x00,
    DAC0Multi = 0xC0,
    DAC1Multi = 0xC1,
    PLLMulti = 0xD0,
    DAC0Single = 0xC8,
    DAC1Single = 0xC9,
    PLLSingle = 0xD8,
    VCXO = 0xE0,
    EndOfList = 0xFF,
}


/// Raw chip configuration word
///
/// ```text
///    31..24     23..16        15..0
/// +---------+-------------+-----------+
/// | TARGET  | SPICNT/DATA |   INSTR   |
/// +---------+-------------+-----------+
/// ```
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub struct ChipConfigCommand {
    pub target: u8,
    pub spicnt_data: u8,
    pub instr: u16,
}

impl ChipConfigCommand {

    const INSTR: Range<usize> = 0..16;
    const SPICNT_DATA: Range<usize> = 16..24;
    const TARGET: Range<usize> = 24..32;

    pub fn encode(&self) -> u32 {
        let mut bits = Word32::ZERO;
        bits[Self::INSTR].store_le::<u16>(self.instr);
        bits[Self::SPICNT_DATA].store_le::<u8>(self.spicnt_data);
        bits[Self::TARGET].store_le::<u8>(self.target);
        bits.into_inner()[0]
    }

    pub fn decode(word: u32) -> Self {
        let bits = Word32::new([word]);
        ChipConfigCommand {
            target: bits[Self::TARGET].load_le::<u8>(),
            spicnt_data: bits[Self::SPICNT_DATA].load_le::<u8>(),
            instr: bits[Self::INSTR].load_le::<u16>(),
        }
    }
}

impl fmt::Display for ChipConfigCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "APSChipConfigCommand {{ target: 0x{:02x}", self.target)?;
        if let Some(target) = ChipConfigTarget::from_u8(self.target) {
            write!(f, " ({:?})", target)?;
        }
        write!(f, ", spicnt_data: 0x{:02x}, instr: 0x{:04x} }}", self.spicnt_data, self.instr)
    }
}

/// Pack a chip configuration word from its three fields
pub fn encode_chip_config_entry(target: ChipConfigTarget, instr: u16, data: u8) -> u32 {
    ChipConfigCommand { target: target as u8, spicnt_data: data, instr: instr }.encode()
}


/// PLL (AD9518) SPI instruction
///
/// ```text
///   15     14..13      12..0
/// +-----+----------+----------+
/// | R/W |  W<1:0>  |   ADDR   |
/// +-----+----------+----------+
/// ```
///
/// `W` is the transfer length: `0b00` = 1 byte, `0b01` = 2, `0b10` = 3,
/// `0b11` = streaming.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PLLCommand {
    pub addr: u16,
    pub w: u8,
    pub r_w: bool,
}

impl PLLCommand {

    const ADDR: Range<usize> = 0..13;
    const W: Range<usize> = 13..15;
    const RW: usize = 15;

    pub const MAX_ADDR: u16 = 0x1FFF;

    /// Write instruction for `len` bytes (1 to 3) starting at `addr`
    pub fn write(addr: u16, len: usize) -> Result<Self> {
        if addr > Self::MAX_ADDR {
            return Err(APS2Error::invalid(format!("PLL address 0x{:x} out of range", addr)));
        }
        if len == 0 || len > 3 {
            return Err(APS2Error::invalid(format!("PLL transfer of {} bytes", len)));
        }
        Ok(PLLCommand { addr: addr, w: (len - 1) as u8, r_w: false })
    }

    pub fn encode(&self) -> u16 {
        let mut bits = Word16::ZERO;
        bits[Self::ADDR].store_le::<u16>(self.addr);
        bits[Self::W].store_le::<u8>(self.w);
        bits.set(Self::RW, self.r_w);
        bits.into_inner()[0]
    }

    pub fn decode(half: u16) -> Self {
        let bits = Word16::new([half]);
        PLLCommand {
            addr: bits[Self::ADDR].load_le::<u16>(),
            w: bits[Self::W].load_le::<u8>(),
            r_w: bits[Self::RW],
        }
    }
}


/// DAC (AD9736) SPI instruction
///
/// ```text
///    7     6..5      4..0
/// +-----+--------+--------+
/// | R/W | N<1:0> |  ADDR  |
/// +-----+--------+--------+
/// ```
///
/// Only single byte transfers (`N = 0b00`) are supported by the DAC.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DACCommand {
    pub addr: u8,
    pub n: u8,
    pub r_w: bool,
}

impl DACCommand {

    const ADDR: Range<usize> = 0..5;
    const N: Range<usize> = 5..7;
    const RW: usize = 7;

    pub const MAX_ADDR: u8 = 0x1F;

    /// Single byte write instruction
    pub fn write(addr: u8) -> Result<Self> {
        if addr > Self::MAX_ADDR {
            return Err(APS2Error::invalid(format!("DAC address 0x{:x} out of range", addr)));
        }
        Ok(DACCommand { addr: addr, n: 0, r_w: false })
    }

    pub fn encode(&self) -> u8 {
        let mut bits = Word8::ZERO;
        bits[Self::ADDR].store_le::<u8>(self.addr);
        bits[Self::N].store_le::<u8>(self.n);
        bits.set(Self::RW, self.r_w);
        bits.into_inner()[0]
    }

    pub fn decode(byte: u8) -> Self {
        let bits = Word8::new([byte]);
        DACCommand {
            addr: bits[Self::ADDR].load_le::<u8>(),
            n: bits[Self::N].load_le::<u8>(),
            r_w: bits[Self::RW],
        }
    }
}


/// A single entry of a chip configuration stream
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ChipConfigEntry {
    /// Pause for the given number of 100 ns units (24 bits)
    Pause(u32),
    /// Single byte write to DAC 0 or 1
    DACSingle { dac: u8, cmd: DACCommand, data: u8 },
    /// Single byte write to the PLL
    PLLSingle { cmd: PLLCommand, data: u8 },
    /// 2 or 3 byte write to the PLL; bytes follow the header packed
    /// big-endian into whole words
    PLLMulti { cmd: PLLCommand, data: Vec<u8> },
    /// One 32-bit VCXO word; follows the header as a data word
    VCXO(u32),
    EndOfList,
}

impl ChipConfigEntry {

    pub const MAX_PAUSE: u32 = 0x00FF_FFFF;

    pub fn pause(units: u32) -> Result<Self> {
        if units > Self::MAX_PAUSE {
            return Err(APS2Error::invalid(format!("pause of {} units exceeds 24 bits", units)));
        }
        Ok(ChipConfigEntry::Pause(units))
    }

    pub fn dac_write(dac: usize, addr: u8, data: u8) -> Result<Self> {
        if dac > 1 {
            return Err(APS2Error::invalid(format!("no DAC {}", dac)));
        }
        Ok(ChipConfigEntry::DACSingle { dac: dac as u8, cmd: DACCommand::write(addr)?, data: data })
    }

    pub fn pll_write(addr: u16, data: u8) -> Result<Self> {
        Ok(ChipConfigEntry::PLLSingle { cmd: PLLCommand::write(addr, 1)?, data: data })
    }

    /// Multi-byte PLL write. The PLL counts the address down, so `data[k]`
    /// lands in register `addr - k`.
    pub fn pll_write_multi(addr: u16, data: &[u8]) -> Result<Self> {
        if data.len() < 2 {
            return Err(APS2Error::invalid("multi byte PLL write needs at least 2 bytes"));
        }
        if (addr as usize) + 1 < data.len() {
            return Err(APS2Error::invalid(format!(
                "{} byte PLL write from 0x{:x} runs below address 0", data.len(), addr)));
        }
        Ok(ChipConfigEntry::PLLMulti { cmd: PLLCommand::write(addr, data.len())?, data: data.to_vec() })
    }

    /// Target byte used by this entry
    pub fn target(&self) -> ChipConfigTarget {
        match self {
            ChipConfigEntry::Pause(_) => ChipConfigTarget::Pause,
            ChipConfigEntry::DACSingle { dac: 0, .. } => ChipConfigTarget::DAC0Single,
            ChipConfigEntry::DACSingle { .. } => ChipConfigTarget::DAC1Single,
            ChipConfigEntry::PLLSingle { .. } => ChipConfigTarget::PLLSingle,
            ChipConfigEntry::PLLMulti { .. } => ChipConfigTarget::PLLMulti,
            ChipConfigEntry::VCXO(_) => ChipConfigTarget::VCXO,
            ChipConfigEntry::EndOfList => ChipConfigTarget::EndOfList,
        }
    }
}

impl ToU32s for ChipConfigEntry {
    fn as_u32s(&self) -> Vec<u32> {
        let target = self.target();
        match self {
            ChipConfigEntry::Pause(units) => {
                vec![encode_chip_config_entry(target, (*units & 0xFFFF) as u16,
                    ((*units >> 16) & 0xFF) as u8)]
            },
            ChipConfigEntry::DACSingle { cmd, data, .. } => {
                vec![encode_chip_config_entry(target, cmd.encode() as u16, *data)]
            },
            ChipConfigEntry::PLLSingle { cmd, data } => {
                vec![encode_chip_config_entry(target, cmd.encode(), *data)]
            },
            ChipConfigEntry::PLLMulti { cmd, data } => {
                let mut words = vec![encode_chip_config_entry(target, cmd.encode(),
                    data.len() as u8)];
                for chunk in data.chunks(4) {
                    let mut bytes = [0u8; 4];
                    bytes[..chunk.len()].copy_from_slice(chunk);
                    words.push(u32::from_be_bytes(bytes));
                }
                words
            },
            ChipConfigEntry::VCXO(word) => {
                vec![encode_chip_config_entry(target, 0x0000, 4), *word]
            },
            ChipConfigEntry::EndOfList => {
                vec![encode_chip_config_entry(target, 0x0000, 0x00)]
            }
        }
    }
}


/// An ordered chip configuration stream. The end-of-list marker is never
/// stored; it is appended exactly once when the stream is laid out.
///
/// ## Example
///
/// ```
/// use libaps2::registers::{ChipConfigStream, ChipConfigEntry, ToU32s};
///
/// let mut stream = ChipConfigStream::new();
/// stream.push(ChipConfigEntry::pll_write(0x232, 0x01).unwrap()).unwrap();
/// stream.push(ChipConfigEntry::pause(10).unwrap()).unwrap();
///
/// assert_eq!(stream.as_u32s(), &[0xD8010232, 0x0000000A, 0xFF000000]);
/// ```
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ChipConfigStream {
    entries: Vec<ChipConfigEntry>
}

impl ChipConfigStream {

    pub fn new() -> Self {
        ChipConfigStream { entries: Vec::new() }
    }

    /// Append an entry. End-of-list markers are rejected; the stream
    /// terminates itself.
    pub fn push(&mut self, entry: ChipConfigEntry) -> Result<&mut Self> {
        if entry == ChipConfigEntry::EndOfList {
            return Err(APS2Error::invalid("end-of-list is appended automatically"));
        }
        self.entries.push(entry);
        Ok(self)
    }

    pub fn extend<I: IntoIterator<Item=ChipConfigEntry>>(&mut self, entries: I) -> Result<&mut Self> {
        for entry in entries {
            self.push(entry)?;
        }
        Ok(self)
    }

    /// Entries excluding the terminator
    pub fn entries(&self) -> &[ChipConfigEntry] {
        &self.entries
    }

    /// Entries as they will be transmitted, terminator included
    pub fn terminated(&self) -> Vec<ChipConfigEntry> {
        let mut entries = self.entries.clone();
        entries.push(ChipConfigEntry::EndOfList);
        entries
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl ToU32s for ChipConfigStream {
    fn as_u32s(&self) -> Vec<u32> {
        self.terminated().iter().flat_map(|e| e.as_u32s()).collect()
    }
}


/// Source of sequencer triggers
#[derive(Clone, Copy, Debug, PartialEq, Eq, FromPrimitive)]
#[repr(u8)]
pub enum TriggerSource {
    External = 0,
    Internal = 1,
    Software = 2,
}


/// Reset and reconfiguration modes
#[derive(Clone, Copy, Debug, PartialEq, Eq, FromPrimitive)]
#[repr(u8)]
pub enum ResetMode {
    ReconfigBaselineEPROM = 0,
    ReconfigUserEPROM = 1,
    SoftResetHostUser = 2,
    SoftResetUserOnly = 3,
}


/// Status block flavours returned by the STATUS command
#[derive(Clone, Copy, Debug, PartialEq, Eq, FromPrimitive)]
#[repr(u8)]
pub enum StatusMode {
    Host = 0,
    VoltA = 1,
    VoltB = 2,
    Temp = 3,
}


bitflags! {
    /// Sequencer control register
    ///
    /// The driver keeps a shadow copy of this register and always writes
    /// it whole. Run mode occupies two bits per channel (`CHn_MODE_*`).
    #[derive(Default)]
    pub struct SequencerControl: u32 {
        const CH0_FIFO_ENABLE   = 1 << 0;
        const CH1_FIFO_ENABLE   = 1 << 1;
        const CH0_OUTPUT_ENABLE = 1 << 2;
        const CH1_OUTPUT_ENABLE = 1 << 3;
        const CH0_MODE_LO       = 1 << 4;
        const CH0_MODE_HI       = 1 << 5;
        const CH1_MODE_LO       = 1 << 6;
        const CH1_MODE_HI       = 1 << 7;
        const TRIGGER_INTERNAL  = 1 << 8;
        const TRIGGER_SOFTWARE  = 1 << 9;
        const RUN               = 1 << 16;
    }
}

impl SequencerControl {

    const MODE_SHIFT: usize = 4;

    /// FIFO enable bit of a channel
    pub fn fifo_enable(channel: usize) -> Self {
        match channel {
            0 => Self::CH0_FIFO_ENABLE,
            1 => Self::CH1_FIFO_ENABLE,
            _ => Self::empty()
        }
    }

    /// Output enable bit of a channel
    pub fn output_enable(channel: usize) -> Self {
        match channel {
            0 => Self::CH0_OUTPUT_ENABLE,
            1 => Self::CH1_OUTPUT_ENABLE,
            _ => Self::empty()
        }
    }

    pub fn set_run_mode(&mut self, channel: usize, mode: RunMode) {
        let shift = Self::MODE_SHIFT + 2*channel;
        let bits = (self.bits() & !(0b11 << shift)) | ((mode as u32) << shift);
        *self = Self::from_bits_truncate(bits);
    }

    pub fn run_mode(&self, channel: usize) -> RunMode {
        let shift = Self::MODE_SHIFT + 2*channel;
        RunMode::from_u32((self.bits() >> shift) & 0b11).unwrap_or(RunMode::Sequence)
    }

    pub fn set_trigger_source(&mut self, source: TriggerSource) {
        self.remove(Self::TRIGGER_INTERNAL | Self::TRIGGER_SOFTWARE);
        match source {
            TriggerSource::External => {},
            TriggerSource::Internal => self.insert(Self::TRIGGER_INTERNAL),
            TriggerSource::Software => self.insert(Self::TRIGGER_SOFTWARE),
        }
    }

    pub fn trigger_source(&self) -> TriggerSource {
        if self.contains(Self::TRIGGER_SOFTWARE) {
            TriggerSource::Software
        } else if self.contains(Self::TRIGGER_INTERNAL) {
            TriggerSource::Internal
        } else {
            TriggerSource::External
        }
    }
}


#[cfg(test)]
mod tests {

    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn command_field_placement() {
        let word = CommandWord::new(Command::ChipConfigIO, 0x00, 5, false, false)
            .unwrap().encode();
        assert_eq!(word, 0x0300_0005);

        let word = CommandWord::new(Command::Status, 0x00, 16, false, true)
            .unwrap().encode();
        assert_eq!(word, 0x1700_0010);

        let word = CommandWord::new(Command::FPGAConfigCtrl, 0x01, 1, true, false)
            .unwrap().encode();
        assert_eq!(word, 0x2601_0001);
    }

    #[test]
    fn command_round_trip() {
        let commands = [Command::Reset, Command::UserIOAck, Command::UserIONack,
            Command::EPROMIO, Command::ChipConfigIO, Command::RunChipConfig,
            Command::FPGAConfigAck, Command::FPGAConfigNack, Command::FPGAConfigCtrl,
            Command::Status];

        for &cmd in commands.iter() {
            for &cnt in &[1u16, 366] {
                for &mode in &[0x00u8, 0xA5, 0xFE] {
                    for &(sel, rw) in &[(false, false), (false, true), (true, false), (true, true)] {
                        let raw = encode_command(cmd as u8, mode, cnt, sel, rw).unwrap();
                        let decoded = decode_command(raw);

                        assert_eq!(decoded.command(), Some(cmd));
                        assert_eq!(decoded.mode_stat, mode);
                        assert_eq!(decoded.cnt, cnt);
                        assert_eq!(decoded.sel, sel);
                        assert_eq!(decoded.r_w, rw);
                        assert!(!decoded.ack && !decoded.seq);
                        assert_eq!(decoded, CommandWord::new(cmd, mode, cnt, sel, rw).unwrap());
                    }
                }
            }
        }
    }

    #[test]
    fn command_count_boundaries() {
        let cmd = Command::UserIOAck as u8;
        assert_matches!(encode_command(cmd, 0, 0, false, false),
            Err(APS2Error::InvalidArgument(_)));
        assert_matches!(encode_command(cmd, 0, 367, false, false),
            Err(APS2Error::InvalidArgument(_)));
        assert_matches!(encode_command(cmd, 0, 1, false, false), Ok(0x0100_0001));
        assert_matches!(encode_command(cmd, 0, 366, false, false), Ok(0x0100_016E));
    }

    #[test]
    fn reset_carries_no_count() {
        assert_matches!(encode_command(Command::Reset as u8, 0x02, 0, false, false),
            Ok(0x0002_0000));
    }

    #[test]
    fn undefined_command_code() {
        assert_matches!(encode_command(0x8, 0, 1, false, false),
            Err(APS2Error::InvalidArgument(_)));
        assert_matches!(encode_command(0xF, 0, 1, false, false),
            Err(APS2Error::InvalidArgument(_)));
    }

    #[test]
    fn decode_reply_flags() {
        let reply = decode_command(0xC3FF_0004);
        assert!(reply.ack);
        assert!(reply.seq);
        assert!(!reply.sel);
        assert!(!reply.r_w);
        assert_eq!(reply.command(), Some(Command::ChipConfigIO));
        assert_eq!(reply.mode_stat, INVALID_COMMAND);
        assert_eq!(reply.cnt, 4);

        // unknown command codes still decode
        let reply = decode_command(0x8800_0001);
        assert_eq!(reply.cmd, 0x8);
        assert_eq!(reply.command(), None);
    }

    #[test]
    fn command_display() {
        let word = decode_command(0x8300_0005);
        assert_eq!(word.to_string(), "APSCommand { ack: 1, seq: 0, sel: 0, r_w: 0, \
            cmd: 0x3 (ChipConfigIO), mode_stat: 0x00, cnt: 5 }");
    }

    #[test]
    fn chip_config_fields() {
        let word = encode_chip_config_entry(ChipConfigTarget::PLLSingle, 0x0232, 0x01);
        assert_eq!(word, 0xD801_0232);

        let cmd = ChipConfigCommand::decode(word);
        assert_eq!(cmd.target, 0xD8);
        assert_eq!(cmd.spicnt_data, 0x01);
        assert_eq!(cmd.instr, 0x0232);
        assert_eq!(cmd.encode(), word);
        assert_eq!(cmd.to_string(), "APSChipConfigCommand { target: 0xd8 (PLLSingle), \
            spicnt_data: 0x01, instr: 0x0232 }");
    }

    #[test]
    fn pll_command() {
        let cmd = PLLCommand::write(0x190, 3).unwrap();
        assert_eq!(cmd.encode(), 0x4190);
        assert_eq!(PLLCommand::decode(0x4190), cmd);

        let read = PLLCommand { addr: 0x1FFF, w: 0b11, r_w: true };
        assert_eq!(read.encode(), 0xFFFF);
        assert_eq!(PLLCommand::decode(0xFFFF), read);

        assert_matches!(PLLCommand::write(0x2000, 1), Err(APS2Error::InvalidArgument(_)));
        assert_matches!(PLLCommand::write(0x10, 4), Err(APS2Error::InvalidArgument(_)));
    }

    #[test]
    fn dac_command() {
        let cmd = DACCommand::write(0x0A).unwrap();
        assert_eq!(cmd.encode(), 0x0A);

        let read = DACCommand { addr: 0x1F, n: 0, r_w: true };
        assert_eq!(read.encode(), 0x9F);
        assert_eq!(DACCommand::decode(0x9F), read);

        assert_matches!(DACCommand::write(0x20), Err(APS2Error::InvalidArgument(_)));
    }

    #[test]
    fn entry_layouts() {
        assert_eq!(ChipConfigEntry::pause(0x12_3456).unwrap().as_u32s(), &[0x0012_3456]);
        assert_matches!(ChipConfigEntry::pause(0x100_0000), Err(APS2Error::InvalidArgument(_)));

        assert_eq!(ChipConfigEntry::dac_write(1, 0x02, 0x80).unwrap().as_u32s(),
            &[0xC980_0002]);
        assert_matches!(ChipConfigEntry::dac_write(2, 0x02, 0x80),
            Err(APS2Error::InvalidArgument(_)));

        assert_eq!(ChipConfigEntry::pll_write_multi(0x10, &[0x7C, 0x05, 0x00]).unwrap().as_u32s(),
            &[0xD003_4010, 0x7C05_0000]);
        assert_matches!(ChipConfigEntry::pll_write_multi(0x01, &[0x7C, 0x05, 0x00]),
            Err(APS2Error::InvalidArgument(_)));

        assert_eq!(ChipConfigEntry::VCXO(0x8000_6C01).as_u32s(),
            &[0xE004_0000, 0x8000_6C01]);
    }

    #[test]
    fn stream_terminates_once() {
        let mut stream = ChipConfigStream::new();
        stream.push(ChipConfigEntry::VCXO(0x1234_5678)).unwrap();
        stream.push(ChipConfigEntry::pll_write(0x232, 0x01).unwrap()).unwrap();

        assert_matches!(stream.push(ChipConfigEntry::EndOfList),
            Err(APS2Error::InvalidArgument(_)));

        let entries = stream.terminated();
        assert_eq!(entries.len(), 3);
        assert_eq!(entries.iter()
            .filter(|e| e.target() == ChipConfigTarget::EndOfList).count(), 1);
        assert_eq!(entries.last(), Some(&ChipConfigEntry::EndOfList));

        assert_eq!(stream.as_u32s(),
            &[0xE004_0000, 0x1234_5678, 0xD801_0232, 0xFF00_0000]);
    }

    #[test]
    fn empty_stream() {
        let stream = ChipConfigStream::new();
        assert!(stream.is_empty());
        assert_eq!(stream.as_u32s(), &[0xFF00_0000]);
    }

    #[test]
    fn control_run_mode() {
        let mut ctrl = SequencerControl::CH0_FIFO_ENABLE | SequencerControl::RUN;
        ctrl.set_run_mode(1, RunMode::ContinuousWaveform);
        assert_eq!(ctrl.bits(), 0x0001_0081);
        assert_eq!(ctrl.run_mode(1), RunMode::ContinuousWaveform);
        assert_eq!(ctrl.run_mode(0), RunMode::Sequence);

        ctrl.set_run_mode(1, RunMode::TriggeredWaveform);
        assert_eq!(ctrl.bits(), 0x0001_0041);
    }

    #[test]
    fn control_trigger_source() {
        let mut ctrl = SequencerControl::empty();
        assert_eq!(ctrl.trigger_source(), TriggerSource::External);

        ctrl.set_trigger_source(TriggerSource::Software);
        assert_eq!(ctrl.bits(), 0x200);
        ctrl.set_trigger_source(TriggerSource::Internal);
        assert_eq!(ctrl.bits(), 0x100);
        assert_eq!(ctrl.trigger_source(), TriggerSource::Internal);
    }
}
