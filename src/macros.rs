/// Convert a normalised amplitude into a signed DAC code, rounding to the
/// nearest code and clamping to `[-max, max]`.
macro_rules! dac_code {
    ($val:expr, $max:expr) => {
        match (($val as f64) * ($max as f64)).round() {
            c if c.is_nan() => 0i16,
            c if c < -($max as f64) => -($max as i16),
            c if c > ($max as f64) => ($max as i16),
            c => c as i16
        }
    };
}

/// Trace a raw frame when packet debugging is enabled. `$dir` is a short
/// tag for the direction of the frame.
#[cfg(feature="debug_packets")]
macro_rules! pktdbg {
    ($dir:expr, $frame:expr) => {
        tracing::trace!("{} {:08x?}", $dir, $frame)
    };
}

#[cfg(not(feature="debug_packets"))]
macro_rules! pktdbg {
    ($dir:expr, $frame:expr) => {};
}
