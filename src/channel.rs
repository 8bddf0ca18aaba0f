//! Output channels, calibration and sample preparation

use num_derive::FromPrimitive;

use crate::error::{APS2Error, Result};
use crate::registers::consts::WAVEFORM_MAX_SAMPLES;

/// Number of DAC channels on an APS2
pub const NUM_CHANNELS: usize = 2;
/// Largest magnitude of a DAC code (14-bit signed, symmetric)
pub const MAX_SAMPLE: i16 = 8191;


/// Playback mode of a channel
#[derive(Clone, Copy, Debug, PartialEq, Eq, FromPrimitive)]
#[repr(u8)]
pub enum RunMode {
    /// Play the LL sequence
    Sequence = 0,
    /// Play the waveform once per trigger
    TriggeredWaveform = 1,
    /// Loop the waveform
    ContinuousWaveform = 2,
}


/// Numeric types accepted as raw waveform samples.
///
/// Floating point samples are normalised amplitudes in `[-1.0, 1.0]`.
/// Integer samples are DAC codes in `[-MAX_SAMPLE, MAX_SAMPLE]`. Anything
/// else is rejected up front rather than silently wrapped.
pub trait Sample: Copy {
    /// Convert to a normalised amplitude
    fn normalized(self) -> Result<f64>;
}

impl Sample for f64 {
    fn normalized(self) -> Result<f64> {
        if !self.is_finite() || self < -1.0 || self > 1.0 {
            return Err(APS2Error::invalid(format!("sample {} outside [-1, 1]", self)));
        }
        Ok(self)
    }
}

impl Sample for f32 {
    fn normalized(self) -> Result<f64> {
        (self as f64).normalized()
    }
}

impl Sample for i16 {
    fn normalized(self) -> Result<f64> {
        if self < -MAX_SAMPLE || self > MAX_SAMPLE {
            return Err(APS2Error::invalid(format!("sample {} outside [{}, {}]",
                self, -MAX_SAMPLE, MAX_SAMPLE)));
        }
        Ok(self as f64 / MAX_SAMPLE as f64)
    }
}


/// Validate a channel index
pub(crate) fn check_channel(channel: usize) -> Result<()> {
    if channel >= NUM_CHANNELS {
        return Err(APS2Error::invalid(format!("channel {} out of range [0, {})",
            channel, NUM_CHANNELS)));
    }
    Ok(())
}


/// State of one DAC channel
///
/// A `Channel` holds the calibration of the output (offset and scale),
/// whether it is enabled, its run mode and the user waveform. Raw samples
/// are kept as supplied (normalised) so that the device ready version can
/// be recomputed whenever the calibration changes.
///
/// ## Example
///
/// ```
/// use libaps2::channel::Channel;
///
/// let mut chan = Channel::new();
/// chan.set_scale(0.5).unwrap();
/// chan.set_waveform(&[0.0f32, 1.0, -1.0]).unwrap();
///
/// assert_eq!(chan.prep_waveform(), &[0, 4096, -4096]);
/// ```
#[derive(Clone, Debug)]
pub struct Channel {
    enabled: bool,
    offset: f32,
    scale: f32,
    run_mode: RunMode,
    waveform: Vec<f64>,
    prepped: Vec<i16>,
}

impl Default for Channel {
    fn default() -> Self {
        Channel::new()
    }
}

impl Channel {

    pub fn new() -> Channel {
        Channel {
            enabled: false,
            offset: 0.0,
            scale: 1.0,
            run_mode: RunMode::TriggeredWaveform,
            waveform: Vec::new(),
            prepped: Vec::new(),
        }
    }

    pub fn enabled(&self) -> bool {
        self.enabled
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    pub fn offset(&self) -> f32 {
        self.offset
    }

    /// Set the offset, in normalised units
    pub fn set_offset(&mut self, offset: f32) -> Result<()> {
        if !offset.is_finite() || offset < -1.0 || offset > 1.0 {
            return Err(APS2Error::invalid(format!("offset {} outside [-1, 1]", offset)));
        }
        self.offset = offset;
        Ok(())
    }

    pub fn scale(&self) -> f32 {
        self.scale
    }

    pub fn set_scale(&mut self, scale: f32) -> Result<()> {
        if !scale.is_finite() {
            return Err(APS2Error::invalid(format!("scale {} is not finite", scale)));
        }
        self.scale = scale;
        Ok(())
    }

    pub fn run_mode(&self) -> RunMode {
        self.run_mode
    }

    pub fn set_run_mode(&mut self, mode: RunMode) {
        self.run_mode = mode;
    }

    /// Replace the raw waveform. All samples are validated before any
    /// state changes.
    pub fn set_waveform<S: Sample>(&mut self, data: &[S]) -> Result<()> {

        if data.is_empty() {
            return Err(APS2Error::invalid("empty waveform"));
        }

        if data.len() > WAVEFORM_MAX_SAMPLES {
            return Err(APS2Error::invalid(format!("waveform of {} samples exceeds {}",
                data.len(), WAVEFORM_MAX_SAMPLES)));
        }

        let waveform = data.iter()
            .map(|s| s.normalized())
            .collect::<Result<Vec<f64>>>()?;

        self.waveform = waveform;
        self.prepped.clear();

        Ok(())
    }

    /// Raw waveform, normalised
    pub fn waveform(&self) -> &[f64] {
        &self.waveform
    }

    pub fn has_waveform(&self) -> bool {
        !self.waveform.is_empty()
    }

    /// Apply calibration and quantise the raw waveform to DAC codes.
    /// Values beyond full scale after calibration are clamped.
    pub fn prep_waveform(&mut self) -> &[i16] {
        let scale = self.scale as f64;
        let offset = self.offset as f64;

        self.prepped = self.waveform.iter()
            .map(|s| dac_code!(s * scale + offset, MAX_SAMPLE))
            .collect();

        &self.prepped
    }

    /// Last prepared waveform
    pub fn prepped(&self) -> &[i16] {
        &self.prepped
    }

    /// Drop the waveform and its prepared copy. Calibration is kept.
    pub fn clear_data(&mut self) {
        self.waveform.clear();
        self.prepped.clear();
    }
}


/// Pack DAC codes two per word, first sample in the upper half. An odd
/// trailing sample is padded with zero.
pub fn pack_samples(samples: &[i16]) -> Vec<u32> {
    samples.chunks(2)
        .map(|pair| {
            let hi = pair[0] as u16 as u32;
            let lo = if pair.len() > 1 { pair[1] as u16 as u32 } else { 0u32 };
            (hi << 16) | lo
        })
        .collect()
}
