use std::collections::VecDeque;

use crate::registers::consts::MAX_CNT;

const WORD_BYTES: u32 = 4;


/// A frame assembled from queued writes: start address plus the data
/// words that go to consecutive addresses from there.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct QueuedFrame {
    pub addr: u32,
    pub data: Vec<u32>,
}

impl QueuedFrame {
    /// Frame payload as transmitted after the command word
    pub fn payload(&self) -> Vec<u32> {
        let mut words = Vec::with_capacity(self.data.len() + 1);
        words.push(self.addr);
        words.extend_from_slice(&self.data);
        words
    }
}


/// Pending register writes
///
/// [`WriteQueue`] holds the `(address, value)` pairs that have been
/// deferred by the driver until the next flush. Insertion order is
/// transmission order. When the queue is drained, runs of pairs whose
/// addresses follow each other (4 bytes apart) are merged into a single
/// frame of at most [`MAX_CNT`] data words, so that a flush uses as few
/// frames as the address layout allows.
///
/// Frames are only removed with [`WriteQueue::consume`] once they have
/// actually been delivered; a failed flush keeps everything that was not
/// yet sent.
#[derive(Clone, Debug, Default)]
pub struct WriteQueue {
    entries: VecDeque<(u32, u32)>
}

impl WriteQueue {

    pub fn new() -> Self {
        WriteQueue { entries: VecDeque::with_capacity(64) }
    }

    /// Queue a single write
    pub fn push(&mut self, addr: u32, value: u32) {
        self.entries.push_back((addr, value));
    }

    /// Queue a contiguous block of writes starting at `addr`
    pub fn push_block(&mut self, addr: u32, values: &[u32]) {
        for (i, value) in values.iter().enumerate() {
            self.entries.push_back((addr.wrapping_add(WORD_BYTES*(i as u32)), *value));
        }
    }

    /// Number of pending `(address, value)` pairs
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Pending pairs in transmission order
    pub fn pending(&self) -> impl Iterator<Item=&(u32, u32)> {
        self.entries.iter()
    }

    /// Build, without removing anything, the frame that should go out
    /// next. Returns [`None`] if the queue is empty.
    pub fn next_frame(&self) -> Option<QueuedFrame> {

        let (addr, first) = *self.entries.front()?;

        let mut data: Vec<u32> = Vec::with_capacity(MAX_CNT);
        data.push(first);

        let mut expected = addr.wrapping_add(WORD_BYTES);

        for (next_addr, value) in self.entries.iter().skip(1) {
            if *next_addr != expected || data.len() == MAX_CNT {
                break;
            }
            data.push(*value);
            expected = expected.wrapping_add(WORD_BYTES);
        }

        Some(QueuedFrame { addr: addr, data: data })
    }

    /// Remove the frame previously returned by [`WriteQueue::next_frame`]
    pub fn consume(&mut self, frame: &QueuedFrame) {
        let n = frame.data.len().min(self.entries.len());
        self.entries.drain(..n);
    }

    /// All frames a flush of the current contents would send, in order
    pub fn frames(&self) -> Vec<QueuedFrame> {
        let mut rest = self.clone();
        let mut frames: Vec<QueuedFrame> = Vec::new();

        while let Some(frame) = rest.next_frame() {
            rest.consume(&frame);
            frames.push(frame);
        }

        frames
    }

    /// Drop everything that is pending. Returns how many pairs were
    /// discarded.
    pub fn clear(&mut self) -> usize {
        let n = self.entries.len();
        self.entries.clear();
        n
    }
}
