//! Simulated APS2 for integration tests
//!
//! [`SimDevice`] answers frames the way the instrument does: it keeps a
//! user register map, an EEPROM, a status block and the FPGA image it
//! has been sent, and replies according to the command protocol. Faults
//! can be injected to exercise the error paths of the driver.

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use libaps2::{Config, FileSource, Transport, TransportError, APS2, BitfileSlot};
use libaps2::registers::{Command, CommandWord, ChipConfigCommand, ChipConfigTarget};
use libaps2::registers::consts::*;
use num_traits::FromPrimitive;

pub const HOST_FIRMWARE: u32 = 0x0000_0A01;
pub const USER_FIRMWARE: u32 = 0x0000_0A01;
pub const BASELINE: u32 = 0xBBBB_BBBB;
pub const USER: u32 = 0xEEEE_EEEE;

#[derive(Default)]
pub struct SimDevice {
    pub connected: bool,
    /// Mirrors `connected`; stays readable after the device is dropped
    pub link_open: Arc<AtomicBool>,
    /// Every frame received, in order
    pub sent: Vec<Vec<u32>>,
    outbox: VecDeque<Vec<u32>>,

    pub regs: HashMap<u32, u32>,
    pub eeprom: HashMap<u32, u32>,
    pub status: [u32; 16],

    /// FPGA image chunks received: (slot, byte offset, words)
    pub image: Vec<(bool, u32, Vec<u32>)>,
    /// Size announced by the end-of-image marker
    pub image_end: Option<u32>,
    pub resets: Vec<u8>,
    pub chip_configs: Vec<Vec<u32>>,

    /// Reject the chip config with this index (0 based) with a status
    pub reject_chip_config: Option<(usize, u8)>,
    /// Refuse the FPGA chunk with this index (0 based)
    pub nack_fpga_chunk: Option<usize>,
    /// Never answer anything
    pub silent: bool,
    /// Do not answer status requests for this many polls after a reset
    pub boot_polls: usize,
    boot_remaining: usize,
    /// The PLL never reports lock
    pub pll_stuck: bool,
    /// Report this configuration source after any reconfiguration
    pub forced_source: Option<u32>,
    /// Raise the seq flag on the next reply with this mode/stat
    pub seq_error: Option<u8>,
    /// Cut the status block short by one word
    pub truncate_status: bool,
    /// Fail every send with an I/O error
    pub broken_link: bool,
    /// Fail sends after this many more successful ones
    pub fail_after: Option<usize>,
    /// Hold this many replies back past the receive that waits for them
    pub late_replies: usize,
    /// Answer the next request with this frame ahead of the real reply
    pub stray_reply: Option<Vec<u32>>,
    /// This DAC never reports ready
    pub dac_stuck: Option<usize>,
    /// Panic on the next send
    pub panic_on_send: bool,
}

impl SimDevice {

    pub fn new() -> Self {
        let mut sim = SimDevice::default();
        sim.status[0x0] = HOST_FIRMWARE;
        sim.status[0x1] = USER_FIRMWARE;
        sim.status[0x2] = USER;
        sim.status[0x7] = 0x1;
        sim
    }

    /// Running the baseline image
    pub fn baseline() -> Self {
        let mut sim = SimDevice::new();
        sim.status[0x2] = BASELINE;
        sim
    }

    pub fn clear_log(&mut self) {
        self.sent.clear();
    }

    /// Frames carrying the given command
    pub fn frames(&self, cmd: Command) -> Vec<&Vec<u32>> {
        self.sent.iter()
            .filter(|f| CommandWord::decode(f[0]).command() == Some(cmd))
            .collect()
    }

    /// User I/O writes received, as (address, data)
    pub fn user_writes(&self) -> Vec<(u32, Vec<u32>)> {
        self.sent.iter()
            .filter(|f| {
                let word = CommandWord::decode(f[0]);
                !word.r_w && matches!(word.command(),
                    Some(Command::UserIOAck) | Some(Command::UserIONack))
            })
            .map(|f| (f[1], f[2..].to_vec()))
            .collect()
    }

    pub fn reg(&self, addr: u32) -> u32 {
        self.regs.get(&addr).copied().unwrap_or(0)
    }

    fn reply(&mut self, req: &CommandWord, cmd: Command, mode_stat: u8, data: &[u32]) {
        let mut word = CommandWord {
            ack: true,
            seq: false,
            sel: req.sel,
            r_w: req.r_w,
            cmd: cmd as u8,
            mode_stat: mode_stat,
            cnt: req.cnt
        };

        if let Some(code) = self.seq_error.take() {
            word.seq = true;
            word.mode_stat = code;
        }

        let mut frame = vec![word.encode()];
        frame.extend_from_slice(data);
        self.outbox.push_back(frame);
    }

    fn user_write(&mut self, addr: u32, data: &[u32]) {
        for (i, value) in data.iter().enumerate() {
            let a = addr + 4*(i as u32);
            self.regs.insert(a, *value);

            if a == CONTROL_ADDR {
                // the DAC status follows its FIFO enable
                for dac in 0..2 {
                    let ready = if self.dac_stuck == Some(dac) { 0 } else { (*value >> dac) & 0x1 };
                    self.status[0x4 + dac] = ready;
                }
            }
        }
    }

    fn chip_config(&mut self, req: &CommandWord, stream: &[u32]) {
        let idx = self.chip_configs.len();
        self.chip_configs.push(stream.to_vec());

        if let Some((n, code)) = self.reject_chip_config {
            if n == idx {
                self.reply(req, Command::ChipConfigIO, code, &[]);
                return;
            }
        }

        let mut i = 0usize;
        while i < stream.len() {
            let cc = ChipConfigCommand::decode(stream[i]);
            match ChipConfigTarget::from_u8(cc.target) {
                Some(ChipConfigTarget::PLLSingle) if cc.instr == 0x232 => {
                    if !self.pll_stuck {
                        self.status[0x6] = PLL_LOCKED;
                    }
                },
                Some(ChipConfigTarget::PLLMulti) => {
                    i += (cc.spicnt_data as usize + 3) / 4;
                },
                Some(ChipConfigTarget::VCXO) => {
                    i += 1;
                },
                _ => {}
            }
            i += 1;
        }

        self.reply(req, Command::ChipConfigIO, SUCCESS, &[]);
    }

    fn fpga_config(&mut self, req: &CommandWord, frame: &[u32]) {
        match req.mode_stat {
            FPGACONFIG_MODE_WRITE => {
                let idx = self.image.len();
                self.image.push((req.sel, frame[1], frame[2..].to_vec()));

                if self.nack_fpga_chunk == Some(idx) {
                    self.reply(req, Command::FPGAConfigNack, FPGACONFIG_INVALID_OFFSET, &[]);
                } else {
                    self.reply(req, Command::FPGAConfigAck, SUCCESS, &[]);
                }
            },
            FPGACONFIG_MODE_END => {
                self.image_end = Some(frame[1]);
                self.reply(req, Command::FPGAConfigAck, SUCCESS, &[]);
            },
            _ => self.reply(req, Command::FPGAConfigNack, INVALID_COMMAND, &[])
        }
    }

    fn eeprom(&mut self, req: &CommandWord, frame: &[u32]) {
        let addr = frame[1];
        match (req.mode_stat, req.r_w) {
            (EPROM_RW_256B, false) => {
                for (i, w) in frame[2..].iter().enumerate() {
                    self.eeprom.insert(addr + 4*(i as u32), *w);
                }
                self.reply(req, Command::EPROMIO, SUCCESS, &[]);
            },
            (EPROM_RW_256B, true) => {
                let data: Vec<u32> = (0..req.cnt as u32)
                    .map(|i| self.eeprom.get(&(addr + 4*i)).copied().unwrap_or(0xFFFF_FFFF))
                    .collect();
                self.reply(req, Command::EPROMIO, SUCCESS, &data);
            },
            (EPROM_ERASE_64K, _) => {
                self.eeprom.retain(|a, _| *a < addr || *a >= addr + EPROM_SECTOR_BYTES);
                self.reply(req, Command::EPROMIO, SUCCESS, &[]);
            },
            _ => self.reply(req, Command::EPROMIO, EPROM_OPERATION_FAILED, &[])
        }
    }

    fn reset(&mut self, mode: u8) {
        self.resets.push(mode);
        self.status[0x4] = 0;
        self.status[0x5] = 0;
        self.status[0x6] = 0;
        self.regs.clear();

        let source = match mode {
            0 => Some(BASELINE),
            1 => Some(USER),
            _ => None
        };

        if let Some(src) = source {
            self.status[0x2] = self.forced_source.unwrap_or(src);
        }

        self.boot_remaining = self.boot_polls;
    }
}

impl Transport for SimDevice {

    fn connect(&mut self) -> Result<(), TransportError> {
        self.connected = true;
        self.link_open.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn disconnect(&mut self) -> Result<(), TransportError> {
        self.connected = false;
        self.link_open.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn send(&mut self, frame: &[u32]) -> Result<(), TransportError> {
        if !self.connected {
            return Err(TransportError::NotConnected);
        }

        if self.panic_on_send {
            panic!("simulated firmware crash");
        }

        if self.broken_link {
            return Err(TransportError::Io("link down".into()));
        }

        if let Some(n) = self.fail_after {
            if n == 0 {
                return Err(TransportError::Io("link down".into()));
            }
            self.fail_after = Some(n - 1);
        }

        self.sent.push(frame.to_vec());

        if self.silent {
            return Ok(());
        }

        if let Some(stray) = self.stray_reply.take() {
            self.outbox.push_back(stray);
        }

        let req = CommandWord::decode(frame[0]);

        match req.command() {
            Some(Command::Reset) => self.reset(req.mode_stat),
            Some(Command::UserIOAck) if req.r_w => {
                let addr = frame[1];
                let data: Vec<u32> = (0..req.cnt as u32).map(|i| self.reg(addr + 4*i)).collect();
                self.reply(&req, Command::UserIOAck, SUCCESS, &data);
            },
            Some(Command::UserIOAck) => {
                self.user_write(frame[1], &frame[2..]);
                self.reply(&req, Command::UserIOAck, SUCCESS, &[]);
            },
            Some(Command::UserIONack) => self.user_write(frame[1], &frame[2..]),
            Some(Command::Status) => {
                if self.boot_remaining > 0 {
                    self.boot_remaining -= 1;
                    return Ok(());
                }
                let mut block = self.status.to_vec();
                if self.truncate_status {
                    block.pop();
                }
                self.reply(&req, Command::Status, SUCCESS, &block);
            },
            Some(Command::ChipConfigIO) => self.chip_config(&req, &frame[1..]),
            Some(Command::RunChipConfig) => {
                let code = if frame[1] % 4 == 0 { SUCCESS } else { RUNCHIPCONFIG_INVALID_OFFSET };
                self.reply(&req, Command::RunChipConfig, code, &[]);
            },
            Some(Command::FPGAConfigCtrl) => self.fpga_config(&req, frame),
            Some(Command::EPROMIO) => self.eeprom(&req, frame),
            _ => {
                let mut word = req;
                word.ack = true;
                word.mode_stat = INVALID_COMMAND;
                self.outbox.push_back(vec![word.encode()]);
            }
        }

        Ok(())
    }

    fn receive(&mut self, _timeout: Duration) -> Result<Vec<u32>, TransportError> {
        if !self.connected {
            return Err(TransportError::NotConnected);
        }
        if self.late_replies > 0 && !self.outbox.is_empty() {
            self.late_replies -= 1;
            return Err(TransportError::Timeout);
        }
        self.outbox.pop_front().ok_or(TransportError::Timeout)
    }
}


/// In memory bitfiles and sequence files
#[derive(Default)]
pub struct MemSource {
    pub bitfiles: HashMap<String, Vec<u8>>,
    pub sequences: HashMap<String, Vec<u32>>,
}

impl FileSource for MemSource {

    fn read_bitfile(&self, identifier: &str) -> io::Result<Vec<u8>> {
        self.bitfiles.get(identifier)
            .cloned()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, identifier.to_string()))
    }

    fn read_sequence_file(&self, path: &str) -> io::Result<Vec<u32>> {
        self.sequences.get(path)
            .cloned()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, path.to_string()))
    }
}


/// Configuration with short polls so failing tests finish quickly
pub fn fast_config() -> Config {
    Config::default()
        .reply_timeout(Duration::from_millis(1))
        .status_poll_interval(Duration::from_micros(10))
        .status_poll_attempts(5)
}

pub fn instrument(sim: SimDevice) -> APS2<SimDevice> {
    APS2::with_config(sim, fast_config())
}

/// A connected instrument brought up to ready, with the frame log cleared
pub fn ready_instrument() -> APS2<SimDevice> {
    let mut aps = instrument(SimDevice::new());
    aps.init(false, BitfileSlot::User).unwrap();
    aps.transport_mut().clear_log();
    aps
}
