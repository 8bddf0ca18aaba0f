//! Chip bring-up: state tracking, device tables and stream assembly
//!
//! The clock and DAC chips are brought up in a fixed order: the VCXO
//! reference first, then the PLL for the requested sample rate, then
//! both DACs. [`BringUpState`] records how far the sequence got. The
//! address/data tables below are device documentation constants for
//! the CDC7005 (VCXO), AD9518 (PLL) and AD9736 (DAC) as fitted on the
//! APS2.

use crate::error::{APS2Error, Result};
use crate::registers::{ChipConfigEntry, ChipConfigStream, PLLCommand};

/// Sample rate the PLL is configured for unless asked otherwise, in MHz
pub const DEFAULT_SAMPLE_RATE: u32 = 1200;

/// Pause after a DAC soft reset, in 100 ns units
const DAC_RESET_PAUSE: u32 = 10;

/// Longest PLL register run that fits in one multi-byte write
const PLL_MAX_RUN: usize = 3;

lazy_static! {

    /// CDC7005 programming words
    static ref VCXO_INIT: Vec<u32> = vec![
        0x8860_04C2,
        0x8500_0321,
        0x8B00_0002,
        0xD800_0003,
    ];

    /// AD9518 register setup, applied before the rate specific dividers
    static ref PLL_INIT: Vec<(u16, u8)> = vec![
        (0x010, 0x7C), // PFD and charge pump
        (0x011, 0x01), // R counter
        (0x012, 0x00),
        (0x013, 0x03), // A counter
        (0x014, 0x09), // B counter
        (0x015, 0x00),
        (0x016, 0x05), // prescaler P = 8/9
        (0x01E, 0x00),
        (0x0F0, 0x0A), // LVPECL outputs
        (0x0F1, 0x0A),
        (0x0F2, 0x0A),
        (0x0F4, 0x0A),
        (0x1E0, 0x00), // VCO divider
        (0x1E1, 0x02), // select VCO as clock source
    ];

    /// AD9736 register setup, after the soft reset
    static ref DAC_INIT: Vec<(u8, u8)> = vec![
        (0x00, 0x00), // leave reset
        (0x01, 0x00), // interrupts off
        (0x02, 0x80), // two's complement input
        (0x03, 0x00),
        (0x0A, 0xCF), // LVDS controller
        (0x0E, 0x30), // sample delay
        (0x0F, 0x00),
    ];
}

/// AD9736 soft reset
const DAC_SOFT_RESET: (u8, u8) = (0x00, 0x20);

/// AD9518 output divider registers and the update-all register
const PLL_DIVIDER_ADDR: u16 = 0x190;
const PLL_BYPASS_ADDR: u16 = 0x191;
const PLL_UPDATE_ADDR: u16 = 0x232;


/// Progress of the chip bring-up sequence
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BringUpState {
    Idle,
    VCXOConfigured,
    PLLConfigured,
    DACsConfigured,
    Ready,
    /// A step failed; bring-up has to restart with the VCXO
    Failed,
}

impl Default for BringUpState {
    fn default() -> Self {
        BringUpState::Idle
    }
}

impl BringUpState {

    fn rank(&self) -> Option<u8> {
        match self {
            BringUpState::Idle => Some(0),
            BringUpState::VCXOConfigured => Some(1),
            BringUpState::PLLConfigured => Some(2),
            BringUpState::DACsConfigured => Some(3),
            BringUpState::Ready => Some(4),
            BringUpState::Failed => None,
        }
    }

    /// `true` if the sequence has got at least as far as `step`. A
    /// failed sequence has reached nothing.
    pub fn reached(&self, step: BringUpState) -> bool {
        match (self.rank(), step.rank()) {
            (Some(a), Some(b)) => a >= b,
            _ => false
        }
    }

    pub fn is_ready(&self) -> bool {
        *self == BringUpState::Ready
    }
}


/// Divider settings of the PLL outputs for a sample rate in MHz. Returns
/// the `(address, data)` pairs ending with the update-all write.
///
/// The VCO runs at 1.2 GHz; lower rates divide it down. The divider
/// register holds the low and high cycle counts (each plus one), the
/// bypass register skips the divider altogether.
pub fn pll_rate_pairs(rate: u32) -> Result<Vec<(u16, u8)>> {
    let (divider, bypass) = match rate {
        1200 => (0x00, 0x80),
        600 => (0x00, 0x00),
        300 => (0x11, 0x00),
        200 => (0x22, 0x00),
        100 => (0x55, 0x00),
        50 => (0xBB, 0x00),
        40 => (0xEE, 0x00),
        _ => {
            return Err(APS2Error::invalid(format!("unsupported sample rate {} MHz", rate)));
        }
    };

    Ok(vec![(PLL_DIVIDER_ADDR, divider),
            (PLL_BYPASS_ADDR, bypass),
            (PLL_UPDATE_ADDR, 0x01)])
}

/// Supported sample rates, in MHz
pub fn sample_rates() -> &'static [u32] {
    &[1200, 600, 300, 200, 100, 50, 40]
}


/// Turn PLL `(address, data)` pairs into chip config entries. Runs of
/// consecutive addresses are merged into multi-byte writes of up to
/// three bytes; everything else becomes a single byte write.
///
/// The AD9518 counts the register address down during a multi-byte
/// transfer, so a merged write starts at the highest address of the run
/// and carries its bytes in falling address order.
pub fn pll_entries(pairs: &[(u16, u8)]) -> Result<Vec<ChipConfigEntry>> {
    if let Some((addr, _)) = pairs.iter().find(|(a, _)| *a > PLLCommand::MAX_ADDR) {
        return Err(APS2Error::invalid(format!("PLL address 0x{:x} out of range", addr)));
    }

    let mut entries: Vec<ChipConfigEntry> = Vec::with_capacity(pairs.len());
    let mut idx = 0usize;

    while idx < pairs.len() {
        let mut run = 1usize;
        while run < PLL_MAX_RUN && idx + run < pairs.len()
            && pairs[idx + run].0 == pairs[idx + run - 1].0 + 1 {
            run += 1;
        }

        let block = &pairs[idx..idx + run];
        idx += run;

        if let [(addr, data)] = block {
            entries.push(ChipConfigEntry::pll_write(*addr, *data)?);
        } else {
            let top = block[run - 1].0;
            let data: Vec<u8> = block.iter().rev().map(|(_, d)| *d).collect();
            entries.push(ChipConfigEntry::pll_write_multi(top, &data)?);
        }
    }

    Ok(entries)
}

/// VCXO programming stream
pub fn vcxo_stream() -> Result<ChipConfigStream> {
    let mut stream = ChipConfigStream::new();
    stream.extend(VCXO_INIT.iter().map(|word| ChipConfigEntry::VCXO(*word)))?;
    Ok(stream)
}

/// PLL programming stream for a sample rate in MHz
pub fn pll_stream(rate: u32) -> Result<ChipConfigStream> {
    let mut pairs: Vec<(u16, u8)> = PLL_INIT.clone();
    pairs.extend(pll_rate_pairs(rate)?);

    let mut stream = ChipConfigStream::new();
    stream.extend(pll_entries(&pairs)?)?;
    Ok(stream)
}

/// PLL stream that only changes the output dividers
pub fn pll_rate_stream(rate: u32) -> Result<ChipConfigStream> {
    let mut stream = ChipConfigStream::new();
    stream.extend(pll_entries(&pll_rate_pairs(rate)?)?)?;
    Ok(stream)
}

/// DAC programming stream: soft reset, settle, then the register setup
pub fn dac_stream(dac: usize) -> Result<ChipConfigStream> {
    let mut stream = ChipConfigStream::new();

    stream.push(ChipConfigEntry::dac_write(dac, DAC_SOFT_RESET.0, DAC_SOFT_RESET.1)?)?;
    stream.push(ChipConfigEntry::pause(DAC_RESET_PAUSE)?)?;

    for (addr, data) in DAC_INIT.iter() {
        stream.push(ChipConfigEntry::dac_write(dac, *addr, *data)?)?;
    }

    Ok(stream)
}
