//! Double-buffered exchange of synchronized camera frames
//!
//! The acquisition thread writes the "next" slot and flips the active index;
//! the render loop only ever reads the stable slot. Frames are reference
//! counted so a reader that grabbed a frame keeps its mappings alive even
//! after the acquisition thread recycles the slot.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

/// Host-visible pixels of one mapped camera buffer. Dropping it unmaps.
pub type PixelHandle = Box<dyn AsRef<[u8]> + Send + Sync>;

/// One mapped camera buffer
pub struct MappedFrame {
    pixels: PixelHandle,
    pub pts: Option<Duration>,
}

impl MappedFrame {
    pub fn new(pixels: PixelHandle, pts: Option<Duration>) -> Self {
        Self { pixels, pts }
    }

    pub fn data(&self) -> &[u8] {
        (*self.pixels).as_ref()
    }
}

/// Synchronized left/right pair as published to the render loop
pub struct StereoFrame {
    pub sequence: u64,
    pub left: MappedFrame,
    /// `None` in single-camera or degraded mode; the left frame feeds both eyes
    pub right: Option<MappedFrame>,
    pub captured_at: Instant,
}

impl StereoFrame {
    pub fn right_or_left(&self) -> &MappedFrame {
        self.right.as_ref().unwrap_or(&self.left)
    }
}

struct Slots {
    frames: [Option<Arc<StereoFrame>>; 2],
    active: usize,
    posted: bool,
}

/// Two-slot frame exchange guarded by a single mutex
pub struct FrameExchange {
    inner: Mutex<Slots>,
}

impl Default for FrameExchange {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameExchange {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Slots {
                frames: [None, None],
                active: 0,
                posted: false,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Slots> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Release our reference to the frame in the "next" slot
    pub fn release_next(&self) {
        let released = {
            let mut slots = self.lock();
            let next = 1 - slots.active;
            slots.frames[next].take()
        };
        // Unmapping happens outside the lock
        drop(released);
    }

    /// Store a fully mapped frame in the "next" slot and make it stable
    pub fn publish(&self, frame: StereoFrame) {
        let frame = Arc::new(frame);
        let replaced = {
            let mut slots = self.lock();
            let next = 1 - slots.active;
            let replaced = slots.frames[next].replace(frame);
            slots.active = next;
            slots.posted = true;
            replaced
        };
        drop(replaced);
    }

    /// Latest stable frame, if any has been posted yet
    pub fn latest(&self) -> Option<Arc<StereoFrame>> {
        let slots = self.lock();
        if !slots.posted {
            return None;
        }
        slots.frames[slots.active].clone()
    }

    #[cfg(test)]
    fn active_index(&self) -> usize {
        self.lock().active
    }

    /// Drop both slots (shutdown)
    pub fn clear(&self) {
        let frames = {
            let mut slots = self.lock();
            slots.posted = false;
            std::mem::take(&mut slots.frames)
        };
        drop(frames);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Tracked(Vec<u8>, Arc<AtomicUsize>);

    impl AsRef<[u8]> for Tracked {
        fn as_ref(&self) -> &[u8] {
            &self.0
        }
    }

    impl Drop for Tracked {
        fn drop(&mut self) {
            self.1.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn frame(seq: u64, unmapped: &Arc<AtomicUsize>) -> StereoFrame {
        StereoFrame {
            sequence: seq,
            left: MappedFrame::new(
                Box::new(Tracked(vec![seq as u8; 4], unmapped.clone())),
                None,
            ),
            right: None,
            captured_at: Instant::now(),
        }
    }

    #[test]
    fn test_nothing_before_first_post() {
        let exchange = FrameExchange::new();
        assert!(exchange.latest().is_none());
    }

    #[test]
    fn test_publish_flips_active() {
        let unmapped = Arc::new(AtomicUsize::new(0));
        let exchange = FrameExchange::new();

        exchange.publish(frame(1, &unmapped));
        assert_eq!(exchange.active_index(), 1);
        assert_eq!(exchange.latest().unwrap().sequence, 1);

        exchange.release_next();
        exchange.publish(frame(2, &unmapped));
        assert_eq!(exchange.active_index(), 0);
        let latest = exchange.latest().unwrap();
        assert_eq!(latest.sequence, 2);
        assert_eq!(latest.right_or_left().data(), &[2, 2, 2, 2]);
    }

    #[test]
    fn test_reader_keeps_mapping_alive() {
        let unmapped = Arc::new(AtomicUsize::new(0));
        let exchange = FrameExchange::new();

        exchange.publish(frame(1, &unmapped));
        let held = exchange.latest().unwrap();

        exchange.publish(frame(2, &unmapped));
        // Frame 1 is now "next"; releasing it must not unmap while held
        exchange.release_next();
        assert_eq!(unmapped.load(Ordering::SeqCst), 0);
        assert_eq!(held.left.data(), &[1, 1, 1, 1]);

        drop(held);
        assert_eq!(unmapped.load(Ordering::SeqCst), 1);

        exchange.clear();
        assert_eq!(unmapped.load(Ordering::SeqCst), 2);
        assert!(exchange.latest().is_none());
    }
}
