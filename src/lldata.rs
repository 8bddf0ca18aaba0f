//! Low-level (LL) sequence data
//!
//! The sequencer consumes a flat table of fixed size entries, one per
//! waveform playback:
//!
//! ```text
//! +---------+------------------+-------+---------+--------+
//! | Control | Waveform address | Count | Trigger | Repeat |
//! +---------+------------------+-------+---------+--------+
//! ```

use crate::error::{APS2Error, Result};
use crate::registers::consts::{MAX_CNT, LL_MAX_WORDS};

/// Words per LL entry
pub const LL_ENTRY_WORDS: usize = 5;

const WORD_BYTES: u32 = 4;


/// A validated LL table, ready to be written to sequencer memory
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LLData {
    words: Vec<u32>
}

impl LLData {

    /// Interleave per-entry columns into a table. All columns must have
    /// the same, non-zero length.
    pub fn from_iq(addr: &[u32], count: &[u32], trigger: &[u32], repeat: &[u32],
        control: &[u32]) -> Result<Self> {

        let n = addr.len();

        if n == 0 {
            return Err(APS2Error::invalid("empty LL data"));
        }

        for (name, col) in &[("count", count), ("trigger", trigger),
                             ("repeat", repeat), ("control", control)] {
            if col.len() != n {
                return Err(APS2Error::invalid(format!(
                    "LL {} has {} entries, address has {}", name, col.len(), n)));
            }
        }

        Self::check_size(n * LL_ENTRY_WORDS)?;

        let mut words: Vec<u32> = Vec::with_capacity(n * LL_ENTRY_WORDS);
        for i in 0..n {
            words.extend_from_slice(&[control[i], addr[i], count[i], trigger[i], repeat[i]]);
        }

        Ok(LLData { words: words })
    }

    /// Use a ready made instruction stream, as read from a sequence file
    pub fn from_words(words: Vec<u32>) -> Result<Self> {
        if words.is_empty() {
            return Err(APS2Error::invalid("empty LL data"));
        }
        if words.len() % LL_ENTRY_WORDS != 0 {
            return Err(APS2Error::invalid(format!(
                "{} LL words is not a whole number of entries", words.len())));
        }
        Self::check_size(words.len())?;
        Ok(LLData { words: words })
    }

    fn check_size(len: usize) -> Result<()> {
        if len > LL_MAX_WORDS {
            return Err(APS2Error::invalid(format!(
                "LL data of {} words exceeds {}", len, LL_MAX_WORDS)));
        }
        Ok(())
    }

    /// Number of entries
    pub fn len(&self) -> usize {
        self.words.len() / LL_ENTRY_WORDS
    }

    pub fn is_empty(&self) -> bool {
        self.words.is_empty()
    }

    pub fn words(&self) -> &[u32] {
        &self.words
    }

    /// Split into address contiguous chunks starting at `base`. Chunks
    /// never exceed [`MAX_CNT`] words and never split an entry.
    pub fn chunks(&self, base: u32) -> Vec<(u32, &[u32])> {
        let per_chunk = (MAX_CNT / LL_ENTRY_WORDS) * LL_ENTRY_WORDS;

        self.words.chunks(per_chunk)
            .enumerate()
            .map(|(i, chunk)| (base + WORD_BYTES*((i*per_chunk) as u32), chunk))
            .collect()
    }
}


#[cfg(test)]
mod tests {

    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn interleave() {
        let ll = LLData::from_iq(&[0x10, 0x20], &[100, 200], &[1, 0], &[0, 3], &[0x8000, 0x0])
            .unwrap();
        assert_eq!(ll.len(), 2);
        assert_eq!(ll.words(), &[0x8000, 0x10, 100, 1, 0,
                                 0x0, 0x20, 200, 0, 3]);
    }

    #[test]
    fn length_mismatch() {
        assert_matches!(LLData::from_iq(&[1, 2], &[1, 2], &[1], &[1, 2], &[1, 2]),
            Err(APS2Error::InvalidArgument(_)));
        assert_matches!(LLData::from_iq(&[1, 2], &[1, 2], &[1, 2], &[1, 2], &[1, 2, 3]),
            Err(APS2Error::InvalidArgument(_)));
        assert_matches!(LLData::from_iq(&[], &[], &[], &[], &[]),
            Err(APS2Error::InvalidArgument(_)));
    }

    #[test]
    fn ragged_words() {
        assert_matches!(LLData::from_words(vec![1, 2, 3]), Err(APS2Error::InvalidArgument(_)));
        assert_matches!(LLData::from_words(vec![]), Err(APS2Error::InvalidArgument(_)));
        assert_matches!(LLData::from_words(vec![0; LL_MAX_WORDS + 5]),
            Err(APS2Error::InvalidArgument(_)));
        assert_eq!(LLData::from_words(vec![0; 10]).unwrap().len(), 2);
    }

    #[test]
    fn chunking() {
        let n = 100usize;
        let col: Vec<u32> = (0..n as u32).collect();
        let ll = LLData::from_iq(&col, &col, &col, &col, &col).unwrap();

        let chunks = ll.chunks(0x5000_0000);
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].0, 0x5000_0000);
        assert_eq!(chunks[0].1.len(), 365);
        assert_eq!(chunks[1].0, 0x5000_0000 + 4*365);
        assert_eq!(chunks[1].1.len(), 5*n - 365);

        let flat: Vec<u32> = chunks.iter().flat_map(|(_, c)| c.iter().copied()).collect();
        assert_eq!(flat, ll.words());
    }
}
