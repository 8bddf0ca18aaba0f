use std::sync::Arc;
use std::time::{Duration, Instant};
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, info, warn};

use crate::bringup::{self, BringUpState};
use crate::channel::{Channel, RunMode, Sample, check_channel, pack_samples, NUM_CHANNELS, MAX_SAMPLE};
use crate::config::Config;
use crate::error::{APS2Error, Result};
use crate::instructions::*;
use crate::lldata::LLData;
use crate::queue::WriteQueue;
use crate::registers::{Command, CommandWord, ChipConfigStream, ResetMode, StatusMode};
use crate::registers::{SequencerControl, TriggerSource};
use crate::registers::consts::*;
use crate::status::{ConfigurationSource, StatusRegister, StatusRegisters};
use crate::transport::{Transport, TransportError, FileSource, FsSource};

const WORD_BYTES: u32 = 4;
/// Bytes of EEPROM covered by one page access
const EPROM_PAGE_BYTES: u32 = (EPROM_PAGE_WORDS as u32) * WORD_BYTES;

// Commonly issued requests
lazy_static! {
    static ref HOST_STATUS: StatusRequest = StatusRequest::new(StatusMode::Host);
}


/// Request to stop a chunked transfer.
///
/// Cloned tokens share state, so a token handed to a long running
/// operation can be cancelled from another thread. Cancellation is
/// honoured before the next chunk is sent; whatever was already sent
/// stays applied on the device.
#[derive(Clone, Debug, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>
}

impl CancelToken {

    pub fn new() -> Self {
        CancelToken::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    /// Clear a previous cancellation so the token can be reused
    pub fn reset(&self) {
        self.flag.store(false, Ordering::SeqCst);
    }
}

fn check_cancel(cancel: Option<&CancelToken>, offset: u32) -> Result<()> {
    match cancel {
        Some(token) if token.is_cancelled() => Err(APS2Error::Cancelled { offset: offset }),
        _ => Ok(())
    }
}


/// EEPROM slot of an FPGA image
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BitfileSlot {
    Baseline,
    User,
}

impl BitfileSlot {

    /// Value of the `sel` flag selecting this slot
    pub fn is_user(&self) -> bool {
        *self == BitfileSlot::User
    }

    /// Reset mode that reconfigures the FPGA from this slot
    pub fn reset_mode(&self) -> ResetMode {
        match self {
            BitfileSlot::Baseline => ResetMode::ReconfigBaselineEPROM,
            BitfileSlot::User => ResetMode::ReconfigUserEPROM,
        }
    }

    /// Configuration source reported once running from this slot
    pub fn source(&self) -> ConfigurationSource {
        match self {
            BitfileSlot::Baseline => ConfigurationSource::BaselineImage,
            BitfileSlot::User => ConfigurationSource::UserEEPROMImage,
        }
    }
}


/// An APS2 arbitrary waveform generator
///
/// `APS2` owns the link to a single instrument and all host side state
/// mirroring it: the bring-up progress, the two output channels, the
/// sequencer control register and the queue of deferred register writes.
/// All exchanges are synchronous; every request blocks until the reply
/// arrives or the configured timeout elapses. Nothing is retried behind
/// the caller's back.
///
/// ## Example
///
/// ```ignore
/// use libaps2::{APS2, BitfileSlot};
///
/// let mut aps = APS2::new(link);
/// aps.connect()?;
/// aps.init(false, BitfileSlot::User)?;
///
/// aps.set_waveform(0, &[0.0f32, 0.5, 1.0, 0.5])?;
/// aps.set_channel_enabled(0, true)?;
/// aps.run()?;
/// ```
pub struct APS2<T: Transport> {
    transport: T,
    source: Box<dyn FileSource + Send>,
    config: Config,
    connected: bool,
    state: BringUpState,
    channels: Vec<Channel>,
    queue: WriteQueue,
    control: SequencerControl,
    sample_rate: u32,
    trigger_interval: f64,
}

impl<T: Transport> APS2<T> {

    /// Create a driver over `transport` with the default configuration.
    /// The link is not opened until [`APS2::connect`].
    pub fn new(transport: T) -> Self {
        APS2::with_config(transport, Config::default())
    }

    pub fn with_config(transport: T, config: Config) -> Self {
        let rate = config.get_sample_rate();
        APS2 {
            transport: transport,
            source: Box::new(FsSource),
            config: config,
            connected: false,
            state: BringUpState::Idle,
            channels: vec![Channel::new(); NUM_CHANNELS],
            queue: WriteQueue::new(),
            control: SequencerControl::default(),
            sample_rate: rate,
            trigger_interval: 0.0,
        }
    }

    /// Replace the source bitfiles and sequence files are read from
    pub fn with_source<F: FileSource + Send + 'static>(mut self, source: F) -> Self {
        self.source = Box::new(source);
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    /// Current bring-up progress
    pub fn state(&self) -> BringUpState {
        self.state
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }

    /// Number of register writes waiting for [`APS2::flush`]
    pub fn pending_writes(&self) -> usize {
        self.queue.len()
    }

    /// Open the link
    pub fn connect(&mut self) -> Result<()> {
        if self.connected {
            return Ok(());
        }
        self.transport.connect()?;
        self.connected = true;
        info!("Connected to APS2");
        Ok(())
    }

    /// Close the link. Pending writes are discarded.
    pub fn disconnect(&mut self) -> Result<()> {
        if !self.connected {
            return Ok(());
        }

        let dropped = self.queue.clear();
        if dropped > 0 {
            warn!("Discarding {} queued writes on disconnect", dropped);
        }

        self.connected = false;
        self.state = BringUpState::Idle;
        self.transport.disconnect()?;
        info!("Disconnected from APS2");
        Ok(())
    }

    fn ensure_connected(&self) -> Result<()> {
        if !self.connected {
            return Err(APS2Error::Transport(TransportError::NotConnected));
        }
        Ok(())
    }

    fn require_ready(&self) -> Result<()> {
        if !self.state.is_ready() {
            return Err(APS2Error::NotInitialized);
        }
        Ok(())
    }

    /// Transmit a packet without waiting for a reply
    fn send<P: Packet>(&mut self, packet: &P) -> Result<()> {
        self.ensure_connected()?;
        self.drain()?;
        pktdbg!("tx", packet.view());
        self.transport.send(packet.view())?;
        Ok(())
    }

    /// Transmit a packet and wait for its reply. The reply is checked for
    /// the ack flag, sequence errors, unrecognised commands and a matching
    /// command and count; the device status is left to the caller.
    ///
    /// Replies that answer a different command are left over from an
    /// exchange that timed out; they are dropped and the wait continues
    /// for whatever is left of the reply timeout.
    fn request<P: Packet>(&mut self, packet: &P) -> Result<(CommandWord, Vec<u32>)> {
        self.send(packet)?;

        let request = packet.command();
        let deadline = Instant::now() + self.config.get_reply_timeout();

        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            let reply = self.transport.receive(remaining)?;
            pktdbg!("rx", &reply);

            if is_stale(&request, &reply) {
                debug!("Dropping stale reply {:08x?}", &reply[..1]);
                continue;
            }

            let word = check_reply(&request, &reply)?;
            return Ok((word, reply));
        }
    }

    /// Discard replies still waiting in the transport
    fn drain(&mut self) -> Result<()> {
        loop {
            match self.transport.receive(Duration::from_secs(0)) {
                Ok(frame) => {
                    debug!("Discarding unclaimed reply {:08x?}", frame.first());
                },
                Err(TransportError::Timeout) => return Ok(()),
                Err(err) => return Err(err.into())
            }
        }
    }

    /// Fail with [`APS2Error::DeviceRejected`] unless the reply reports
    /// success
    fn accept(word: &CommandWord, command: Command) -> Result<()> {
        if word.mode_stat != SUCCESS {
            return Err(APS2Error::DeviceRejected { command: command, mode_stat: word.mode_stat });
        }
        Ok(())
    }

    fn send_user_write(&mut self, addr: u32, data: &[u32]) -> Result<()> {
        let ack = self.config.get_acknowledge_writes();
        let packet = UserWrite::new(addr, data, ack)?;

        if ack {
            let (word, _) = self.request(&packet)?;
            Self::accept(&word, Command::UserIOAck)
        } else {
            self.send(&packet)
        }
    }

    /// Write a single register. With `queue` the write is deferred until
    /// the next [`APS2::flush`].
    pub fn write(&mut self, addr: u32, value: u32, queue: bool) -> Result<()> {
        self.write_block(addr, &[value], queue)
    }

    /// Write consecutive registers starting at `addr`. At most
    /// [`MAX_CNT`] words can be written in one call.
    pub fn write_block(&mut self, addr: u32, values: &[u32], queue: bool) -> Result<()> {

        if values.is_empty() || values.len() > MAX_CNT {
            return Err(APS2Error::invalid(format!(
                "{} words outside [1, {}] for a single write", values.len(), MAX_CNT)));
        }

        if queue {
            self.queue.push_block(addr, values);
            return Ok(());
        }

        self.send_user_write(addr, values)
    }

    /// Send all queued writes, merging contiguous addresses into as few
    /// frames as possible. On failure the writes not yet delivered stay
    /// queued.
    pub fn flush(&mut self) -> Result<()> {
        while let Some(frame) = self.queue.next_frame() {
            self.send_user_write(frame.addr, &frame.data)?;
            self.queue.consume(&frame);
        }
        Ok(())
    }

    /// Read `count` consecutive registers starting at `addr`
    pub fn read(&mut self, addr: u32, count: usize) -> Result<Vec<u32>> {
        let packet = UserRead::new(addr, count)?;
        let (word, reply) = self.request(&packet)?;
        Self::accept(&word, Command::UserIOAck)?;
        payload(&reply, count)
    }

    /// Raw status block of the given flavour
    pub fn read_status_words(&mut self, mode: StatusMode) -> Result<Vec<u32>> {
        let (word, reply) = match mode {
            StatusMode::Host => self.request(&*HOST_STATUS)?,
            _ => self.request(&StatusRequest::new(mode))?
        };
        Self::accept(&word, Command::Status)?;
        payload(&reply, NUM_STATUS_REGISTERS)
    }

    /// Read and decode the host status block. Sequence errors and
    /// firmware mismatches are logged but not acted upon.
    pub fn read_status(&mut self) -> Result<StatusRegisters> {
        let words = self.read_status_words(StatusMode::Host)?;
        let status = StatusRegisters::from_words(&words)?;

        if status.has_sequence_errors() {
            warn!("APS2 reports sequence errors: {} skipped, {} duplicated",
                status.sequence_skip_count, status.sequence_dup_count);
        }

        if status.firmware_mismatch(self.config.get_firmware_skew()) {
            warn!("Host firmware 0x{:08x} and user firmware 0x{:08x} disagree",
                status.host_firmware_version, status.user_firmware_version);
        }

        Ok(status)
    }

    /// Poll the status block until every bit of `mask` is set in
    /// `register`, for at most the configured number of attempts.
    fn wait_for_status(&mut self, register: StatusRegister, mask: u32) -> Result<StatusRegisters> {
        let attempts = self.config.get_status_poll_attempts();
        let mut value = 0u32;

        for attempt in 0..attempts {
            let status = self.read_status()?;
            value = status.get(register);

            if value & mask == mask {
                return Ok(status);
            }

            if attempt + 1 < attempts {
                spin_sleep::sleep(self.config.get_status_poll_interval());
            }
        }

        Err(APS2Error::StatusTimeout { register: register, value: value })
    }

    /// Reset or reconfigure the device. Pending writes are discarded and
    /// the bring-up state returns to idle.
    pub fn reset(&mut self, mode: ResetMode) -> Result<()> {
        self.reset_and_wait(mode).map(|_| ())
    }

    /// Send a reset, then poll the status block until the device answers
    fn reset_and_wait(&mut self, mode: ResetMode) -> Result<StatusRegisters> {

        self.send(&Reset::new(mode))?;
        info!("Reset APS2 with {:?}", mode);

        let dropped = self.queue.clear();
        if dropped > 0 {
            warn!("Discarding {} queued writes on reset", dropped);
        }
        self.state = BringUpState::Idle;
        self.control.remove(SequencerControl::RUN | SequencerControl::CH0_FIFO_ENABLE
            | SequencerControl::CH1_FIFO_ENABLE);

        let attempts = self.config.get_status_poll_attempts();
        for _ in 0..attempts {
            match self.read_status() {
                Ok(status) => return Ok(status),
                Err(APS2Error::Transport(TransportError::Timeout)) => {
                    debug!("APS2 not answering yet after reset");
                    spin_sleep::sleep(self.config.get_status_poll_interval());
                },
                Err(err) => return Err(err)
            }
        }

        Err(APS2Error::Transport(TransportError::Timeout))
    }

    /// Execute a chip configuration stream
    pub fn chip_config(&mut self, stream: &ChipConfigStream) -> Result<()> {
        let packet = ChipConfigIO::new(stream)?;
        let (word, _) = self.request(&packet)?;
        Self::accept(&word, Command::ChipConfigIO)
    }

    /// Execute the chip configuration stream stored at `offset`
    pub fn run_chip_config(&mut self, offset: u32) -> Result<()> {
        let packet = RunChipConfig::new(offset)?;
        let (word, _) = self.request(&packet)?;
        Self::accept(&word, Command::RunChipConfig)
    }

    /// Write `words` to the EEPROM, one 256 byte page at a time. `addr`
    /// must be page aligned and the target area previously erased.
    pub fn write_eeprom(&mut self, addr: u32, words: &[u32]) -> Result<()> {

        if addr % EPROM_PAGE_BYTES != 0 {
            return Err(APS2Error::invalid(format!(
                "EEPROM address 0x{:08x} is not page aligned", addr)));
        }

        // validate every page before anything is sent
        let packets = words.chunks(EPROM_PAGE_WORDS)
            .enumerate()
            .map(|(i, page)| EEPROMIO::write(addr + (i as u32)*EPROM_PAGE_BYTES, page))
            .collect::<Result<Vec<EEPROMIO>>>()?;

        if packets.is_empty() {
            return Err(APS2Error::invalid("nothing to write to the EEPROM"));
        }

        for packet in &packets {
            let (word, _) = self.request(packet)?;
            Self::accept(&word, Command::EPROMIO)?;
        }

        debug!("Wrote {} EEPROM pages at 0x{:08x}", packets.len(), addr);
        Ok(())
    }

    /// Read `count` words from the EEPROM starting at page aligned `addr`
    pub fn read_eeprom(&mut self, addr: u32, count: usize) -> Result<Vec<u32>> {

        if addr % EPROM_PAGE_BYTES != 0 {
            return Err(APS2Error::invalid(format!(
                "EEPROM address 0x{:08x} is not page aligned", addr)));
        }

        if count == 0 {
            return Err(APS2Error::invalid("empty EEPROM read"));
        }

        let mut words: Vec<u32> = Vec::with_capacity(count);
        let mut page_addr = addr;

        while words.len() < count {
            let n = (count - words.len()).min(EPROM_PAGE_WORDS);
            let packet = EEPROMIO::read(page_addr, n)?;
            let (word, reply) = self.request(&packet)?;
            Self::accept(&word, Command::EPROMIO)?;
            words.extend(payload(&reply, n)?);
            page_addr += EPROM_PAGE_BYTES;
        }

        Ok(words)
    }

    /// Erase the 64 KiB EEPROM sector starting at `addr`
    pub fn erase_eeprom(&mut self, addr: u32) -> Result<()> {
        let packet = EEPROMIO::erase(addr)?;
        let (word, _) = self.request(&packet)?;
        Self::accept(&word, Command::EPROMIO)?;
        debug!("Erased EEPROM sector at 0x{:08x}", addr);
        Ok(())
    }

    /// Transfer an FPGA image to `slot` in chunks of at most
    /// [`MAX_CNT`] words, followed by the end-of-image marker. Any chunk
    /// the device refuses aborts the transfer; nothing is resumed.
    /// Returns the number of data chunks sent.
    pub fn write_bitfile(&mut self, image: &[u8], slot: BitfileSlot,
        cancel: Option<&CancelToken>) -> Result<usize> {

        if image.is_empty() {
            return Err(APS2Error::invalid("empty bitfile"));
        }

        if image.len() > u32::MAX as usize {
            return Err(APS2Error::invalid("bitfile too large"));
        }

        self.ensure_connected()?;

        let words = pack_image(image);
        let total = words.chunks(MAX_CNT).len();

        info!("Programming {} byte image into {:?} slot", image.len(), slot);

        for (i, chunk) in words.chunks(MAX_CNT).enumerate() {
            let offset = (i * MAX_CNT) as u32 * WORD_BYTES;
            check_cancel(cancel, offset)?;

            let packet = FPGAConfigChunk::new(offset, chunk, slot.is_user())?;
            self.bitfile_exchange(&packet, offset)?;

            debug!("Bitfile chunk {}/{} accepted at offset 0x{:08x}", i+1, total, offset);
        }

        let size = image.len() as u32;
        let packet = FPGAConfigEnd::new(size, slot.is_user())?;
        self.bitfile_exchange(&packet, size)?;

        info!("Image of {} bytes accepted", size);
        Ok(total)
    }

    fn bitfile_exchange<P: Packet>(&mut self, packet: &P, offset: u32) -> Result<()> {
        let (word, _) = self.request(packet)?;

        let acked = word.command() != Some(Command::FPGAConfigNack);
        if !acked || word.mode_stat != SUCCESS {
            return Err(APS2Error::BitfileRejected { offset: offset, mode_stat: word.mode_stat });
        }

        Ok(())
    }

    /// Read a bitfile through the file source and program it into `slot`
    pub fn load_bitfile(&mut self, path: &str, slot: BitfileSlot) -> Result<()> {
        let image = self.source.read_bitfile(path)?;
        self.write_bitfile(&image, slot, None).map(|_| ())
    }

    /// Reconfigure the FPGA from `slot` and check that the device now
    /// reports running that image
    pub fn program_bitfile(&mut self, slot: BitfileSlot) -> Result<()> {
        let status = self.reset_and_wait(slot.reset_mode())?;
        let expected = slot.source();

        if status.configuration_source != expected.magic() {
            return Err(APS2Error::ConfigurationMismatch {
                expected: expected,
                found: status.configuration_source
            });
        }

        info!("APS2 running {:?} firmware 0x{:08x}", expected, status.user_firmware_version);
        Ok(())
    }

    /// Version of the running user firmware
    pub fn get_bitfile_version(&mut self) -> Result<u32> {
        Ok(self.read_status()?.user_firmware_version)
    }

    /// Bring the instrument up to [`BringUpState::Ready`]. The FPGA is
    /// reconfigured from `slot` if `force_reload` is set or it is running
    /// a different image; then VCXO, PLL and DACs are configured in that
    /// order. The first failing step ends the sequence.
    pub fn init(&mut self, force_reload: bool, slot: BitfileSlot) -> Result<()> {

        self.connect()?;

        let status = self.read_status()?;
        if force_reload || status.configuration_source() != Some(slot.source()) {
            self.program_bitfile(slot)?;
        }

        let dropped = self.queue.clear();
        if dropped > 0 {
            warn!("Discarding {} queued writes before bring-up", dropped);
        }
        self.state = BringUpState::Idle;

        self.setup_vcxo()?;
        self.setup_pll()?;
        self.setup_dacs()?;

        info!("APS2 ready at {} MHz", self.sample_rate);
        Ok(())
    }

    /// Record the outcome of a bring-up step
    fn track<R>(&mut self, result: Result<R>, next: BringUpState) -> Result<R> {
        match result {
            Ok(r) => {
                self.state = next;
                Ok(r)
            },
            Err(err) => {
                warn!("Bring-up failed in state {:?}: {}", self.state, err);
                self.state = BringUpState::Failed;
                Err(err)
            }
        }
    }

    /// Program the VCXO reference. Allowed from any state; restarts the
    /// bring-up sequence.
    pub fn setup_vcxo(&mut self) -> Result<()> {
        self.ensure_connected()?;
        let result = bringup::vcxo_stream().and_then(|stream| self.chip_config(&stream));
        self.track(result, BringUpState::VCXOConfigured)?;
        debug!("VCXO configured");
        Ok(())
    }

    /// Program the PLL for the current sample rate and wait for it to lock
    pub fn setup_pll(&mut self) -> Result<()> {
        if !self.state.reached(BringUpState::VCXOConfigured) {
            return Err(APS2Error::NotInitialized);
        }

        let result = self.setup_pll_inner();
        self.track(result, BringUpState::PLLConfigured)?;
        debug!("PLL locked at {} MHz", self.sample_rate);
        Ok(())
    }

    fn setup_pll_inner(&mut self) -> Result<()> {
        let stream = bringup::pll_stream(self.sample_rate)?;
        self.chip_config(&stream)?;
        self.wait_for_status(StatusRegister::PLLStatus, PLL_LOCKED)?;
        Ok(())
    }

    /// Program both DACs, enable their FIFOs and push the sequencer
    /// settings. Ends in [`BringUpState::Ready`].
    pub fn setup_dacs(&mut self) -> Result<()> {
        if !self.state.reached(BringUpState::PLLConfigured) {
            return Err(APS2Error::NotInitialized);
        }

        let result = (0..NUM_CHANNELS).try_for_each(|ch| self.setup_dac(ch));
        self.track(result, BringUpState::DACsConfigured)?;

        let result = self.push_settings();
        self.track(result, BringUpState::Ready)?;
        debug!("DACs configured");
        Ok(())
    }

    fn setup_dac(&mut self, dac: usize) -> Result<()> {
        self.chip_config(&bringup::dac_stream(dac)?)?;

        self.control.insert(SequencerControl::fifo_enable(dac));
        self.write(CONTROL_ADDR, self.control.bits(), true)?;
        self.flush()?;

        self.wait_for_status(StatusRegister::dac(dac), DAC_READY)?;
        Ok(())
    }

    /// Stop the DAC FIFO of a channel
    fn disable_dac_fifo(&mut self, dac: usize) -> Result<()> {
        self.control.remove(SequencerControl::fifo_enable(dac));
        self.write_control()
    }

    /// Push the host side shadow of the sequencer registers
    fn push_settings(&mut self) -> Result<()> {
        let cycles = self.trigger_cycles(self.trigger_interval)?;
        self.write(TRIGGER_INTERVAL_ADDR, cycles, true)?;
        self.write(CONTROL_ADDR, self.control.bits(), true)?;
        self.flush()
    }

    fn write_control(&mut self) -> Result<()> {
        self.write(CONTROL_ADDR, self.control.bits(), false)
    }

    /// Change the sample rate, in MHz. On a ready instrument the PLL is
    /// reprogrammed and the DACs brought up again; otherwise the rate is
    /// used by the next bring-up.
    pub fn set_sample_rate(&mut self, rate: u32) -> Result<()> {
        let stream = bringup::pll_rate_stream(rate)?;

        if !self.state.is_ready() {
            self.sample_rate = rate;
            return Ok(());
        }

        info!("Changing sample rate from {} to {} MHz", self.sample_rate, rate);

        for dac in 0..NUM_CHANNELS {
            let result = self.disable_dac_fifo(dac);
            self.track(result, BringUpState::Ready)?;
        }

        let result = self.chip_config(&stream)
            .and_then(|_| self.wait_for_status(StatusRegister::PLLStatus, PLL_LOCKED));
        self.track(result, BringUpState::PLLConfigured)?;

        self.sample_rate = rate;
        self.setup_dacs()
    }

    /// Sample rate in MHz
    pub fn get_sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn set_trigger_source(&mut self, source: TriggerSource) -> Result<()> {
        self.control.set_trigger_source(source);
        if self.state.is_ready() {
            self.write_control()?;
        }
        Ok(())
    }

    pub fn get_trigger_source(&self) -> TriggerSource {
        self.control.trigger_source()
    }

    /// Internal trigger period in device clock cycles (one cycle is four
    /// samples)
    fn trigger_cycles(&self, seconds: f64) -> Result<u32> {
        let cycles = (seconds * self.sample_rate as f64 * 1e6 / 4.0).round();
        if !cycles.is_finite() || cycles < 0.0 || cycles > u32::MAX as f64 {
            return Err(APS2Error::invalid(format!(
                "trigger interval {} s out of range", seconds)));
        }
        Ok(cycles as u32)
    }

    /// Set the internal trigger interval, in seconds
    pub fn set_trigger_interval(&mut self, seconds: f64) -> Result<()> {
        let cycles = self.trigger_cycles(seconds)?;
        self.trigger_interval = seconds;
        if self.state.is_ready() {
            self.write(TRIGGER_INTERVAL_ADDR, cycles, false)?;
        }
        Ok(())
    }

    /// Internal trigger interval, in seconds. Read back from the device
    /// when ready.
    pub fn get_trigger_interval(&mut self) -> Result<f64> {
        if !self.state.is_ready() {
            return Ok(self.trigger_interval);
        }
        let cycles = self.read(TRIGGER_INTERVAL_ADDR, 1)?[0];
        Ok(cycles as f64 * 4.0 / (self.sample_rate as f64 * 1e6))
    }

    pub fn set_channel_enabled(&mut self, channel: usize, enabled: bool) -> Result<()> {
        check_channel(channel)?;
        self.channels[channel].set_enabled(enabled);
        self.control.set(SequencerControl::output_enable(channel), enabled);
        if self.state.is_ready() {
            self.write_control()?;
        }
        Ok(())
    }

    pub fn get_channel_enabled(&self, channel: usize) -> Result<bool> {
        check_channel(channel)?;
        Ok(self.channels[channel].enabled())
    }

    /// Set the offset of a channel, in normalised units. A loaded
    /// waveform is recalibrated and rewritten on a ready instrument.
    pub fn set_channel_offset(&mut self, channel: usize, offset: f32) -> Result<()> {
        check_channel(channel)?;
        self.channels[channel].set_offset(offset)?;
        self.recalibrate(channel)
    }

    pub fn get_channel_offset(&self, channel: usize) -> Result<f32> {
        check_channel(channel)?;
        Ok(self.channels[channel].offset())
    }

    /// Set the scale of a channel. A loaded waveform is recalibrated and
    /// rewritten on a ready instrument.
    pub fn set_channel_scale(&mut self, channel: usize, scale: f32) -> Result<()> {
        check_channel(channel)?;
        self.channels[channel].set_scale(scale)?;
        self.recalibrate(channel)
    }

    pub fn get_channel_scale(&self, channel: usize) -> Result<f32> {
        check_channel(channel)?;
        Ok(self.channels[channel].scale())
    }

    fn recalibrate(&mut self, channel: usize) -> Result<()> {
        if self.state.is_ready() && self.channels[channel].has_waveform() {
            debug!("Rewriting waveform of channel {} after calibration change", channel);
            self.write_waveform(channel, None)?;
        }
        Ok(())
    }

    /// Write the hardware offset register of a DAC channel, in
    /// normalised units
    pub fn set_offset_register(&mut self, channel: usize, offset: f32) -> Result<()> {
        check_channel(channel)?;
        if !offset.is_finite() || offset < -1.0 || offset > 1.0 {
            return Err(APS2Error::invalid(format!("offset {} outside [-1, 1]", offset)));
        }
        self.require_ready()?;

        let code = dac_code!(offset, MAX_SAMPLE);
        self.write(DAC_OFFSET_ADDR[channel], code as u16 as u32, false)
    }

    /// Load a waveform into a channel. Samples are calibrated, quantised
    /// and written to waveform memory.
    pub fn set_waveform<S: Sample>(&mut self, channel: usize, data: &[S]) -> Result<()> {
        self.set_waveform_cancellable(channel, data, None)
    }

    /// As [`APS2::set_waveform`], stopping at a chunk boundary once
    /// `cancel` is raised
    pub fn set_waveform_cancellable<S: Sample>(&mut self, channel: usize, data: &[S],
        cancel: Option<&CancelToken>) -> Result<()> {

        check_channel(channel)?;

        let mut staged = self.channels[channel].clone();
        staged.set_waveform(data)?;

        self.require_ready()?;

        self.channels[channel] = staged;
        self.write_waveform(channel, cancel)
    }

    fn write_waveform(&mut self, channel: usize, cancel: Option<&CancelToken>) -> Result<()> {
        let samples = self.channels[channel].prep_waveform().to_vec();
        let words = pack_samples(&samples);
        let base = WAVEFORM_BASE[channel];

        for (i, chunk) in words.chunks(MAX_CNT).enumerate() {
            let offset = (i * MAX_CNT) as u32 * WORD_BYTES;
            check_cancel(cancel, offset)?;
            self.write_block(base + offset, chunk, false)?;
        }

        self.write(WAVEFORM_LENGTH_ADDR[channel], samples.len() as u32, false)?;
        debug!("Wrote {} samples to channel {}", samples.len(), channel);
        Ok(())
    }

    pub fn set_run_mode(&mut self, channel: usize, mode: RunMode) -> Result<()> {
        check_channel(channel)?;
        self.channels[channel].set_run_mode(mode);
        self.control.set_run_mode(channel, mode);
        if self.state.is_ready() {
            self.write_control()?;
        }
        Ok(())
    }

    pub fn get_run_mode(&self, channel: usize) -> Result<RunMode> {
        check_channel(channel)?;
        Ok(self.channels[channel].run_mode())
    }

    /// Load LL sequence data from per-entry columns. The columns are
    /// validated before anything is sent.
    pub fn set_ll_data_iq(&mut self, addr: &[u32], count: &[u32], trigger: &[u32],
        repeat: &[u32], control: &[u32]) -> Result<()> {

        let ll = LLData::from_iq(addr, count, trigger, repeat, control)?;
        self.require_ready()?;
        self.write_ll(&ll)
    }

    /// Load LL sequence data from a sequence file
    pub fn load_sequence_file(&mut self, path: &str) -> Result<()> {
        let words = self.source.read_sequence_file(path)?;
        let ll = LLData::from_words(words)?;
        self.require_ready()?;
        self.write_ll(&ll)
    }

    fn write_ll(&mut self, ll: &LLData) -> Result<()> {
        for (addr, chunk) in ll.chunks(LL_DATA_BASE) {
            self.write_block(addr, chunk, false)?;
        }
        self.write(LL_LENGTH_ADDR, ll.len() as u32, false)?;
        debug!("Wrote {} LL entries", ll.len());
        Ok(())
    }

    /// Drop the waveforms of all channels. Calibration is kept.
    pub fn clear_channel_data(&mut self) {
        for chan in self.channels.iter_mut() {
            chan.clear_data();
        }
    }

    /// Start the sequencer
    pub fn run(&mut self) -> Result<()> {
        self.require_ready()?;
        self.control.insert(SequencerControl::RUN);
        self.write_control()?;
        info!("APS2 running");
        Ok(())
    }

    /// Stop the sequencer
    pub fn stop(&mut self) -> Result<()> {
        self.require_ready()?;
        self.control.remove(SequencerControl::RUN);
        self.write_control()?;
        info!("APS2 stopped");
        Ok(())
    }
}

impl<T: Transport> Drop for APS2<T> {
    fn drop(&mut self) {
        if self.connected {
            if let Err(err) = self.disconnect() {
                warn!("Could not disconnect APS2: {}", err);
            }
        }
    }
}


/// Check a reply against the request it answers. Returns the decoded
/// reply command word; a non-success status is left to the caller.
fn check_reply(request: &CommandWord, reply: &[u32]) -> Result<CommandWord> {

    let first = match reply.first() {
        Some(w) => *w,
        None => return Err(APS2Error::protocol(0x00, "empty reply"))
    };

    let word = CommandWord::decode(first);

    if !word.ack {
        return Err(APS2Error::protocol(word.mode_stat, "reply without ack flag"));
    }

    if word.seq {
        let reason = match word.mode_stat {
            SEQ_SKIP => "sequence number skipped",
            _ => "sequence number duplicated"
        };
        return Err(APS2Error::protocol(word.mode_stat, reason));
    }

    if word.mode_stat == INVALID_COMMAND {
        return Err(APS2Error::protocol(word.mode_stat, "command not recognised"));
    }

    if !answers_command(request, &word) {
        return Err(APS2Error::protocol(word.mode_stat, format!(
            "reply to command 0x{:x} carries command 0x{:x}", request.cmd, word.cmd)));
    }

    if word.cnt != request.cnt {
        return Err(APS2Error::protocol(word.mode_stat, format!(
            "reply count {} does not match request count {}", word.cnt, request.cnt)));
    }

    Ok(word)
}

fn answers_command(request: &CommandWord, reply: &CommandWord) -> bool {
    match request.command() {
        Some(Command::FPGAConfigCtrl) => matches!(reply.command(),
            Some(Command::FPGAConfigCtrl) | Some(Command::FPGAConfigAck) |
            Some(Command::FPGAConfigNack)),
        _ => reply.cmd == request.cmd
    }
}

/// An acknowledged reply whose command or count belongs to some other
/// request
fn is_stale(request: &CommandWord, reply: &[u32]) -> bool {
    match reply.first() {
        Some(first) => {
            let word = CommandWord::decode(*first);
            word.ack && !word.seq && word.mode_stat != INVALID_COMMAND &&
                (!answers_command(request, &word) || word.cnt != request.cnt)
        },
        None => false
    }
}

/// Data words of a read reply
fn payload(reply: &[u32], count: usize) -> Result<Vec<u32>> {
    if reply.len() < count + 1 {
        return Err(APS2Error::protocol(0x00, format!(
            "truncated reply: {} of {} data words", reply.len().saturating_sub(1), count)));
    }
    Ok(reply[1..count+1].to_vec())
}
