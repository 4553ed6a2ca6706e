use bytes::Bytes;
use parking_lot::Mutex;

use crate::core::tts::AudioFrame;

/// Frames delivered during the current turn.
///
/// Only the pacer appends; every operation takes the same lock, so a drain
/// sees each frame either before or after it, never half-way.
#[derive(Debug, Default)]
pub struct AudioHistory {
    frames: Mutex<Vec<AudioFrame>>,
}

impl AudioHistory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store an independent copy of `frame`.
    pub(crate) fn append(&self, frame: &[u8]) {
        self.frames.lock().push(Bytes::copy_from_slice(frame));
    }

    pub fn clear(&self) {
        self.frames.lock().clear();
    }

    /// Take every stored frame and leave the history empty.
    pub fn drain_and_clear(&self) -> Vec<AudioFrame> {
        std::mem::take(&mut *self.frames.lock())
    }

    pub fn len(&self) -> usize {
        self.frames.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.lock().is_empty()
    }
}
