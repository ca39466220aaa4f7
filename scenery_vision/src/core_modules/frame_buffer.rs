// THEORY:
// The `FrameBuffer` is the hand-off point between a capture worker and the
// detector. It is a fixed-depth ring of frames: the writer fills the slot after
// the newest one, readers always see the newest completed frame.
//
// Key architectural principles:
// 1.  **Writer never blocks readers**: The slot being filled is taken out of the
//     ring while the capture runs, so the lock is only held for the swap.
// 2.  **Buffer reuse**: When no reader still holds the frame in a slot its pixel
//     allocation is recycled for the next capture. A reader that kept a view keeps
//     valid data; the writer simply allocates a fresh frame for that slot.
// 3.  **Frame rate accounting**: Every commit ticks a one-second FPS window.

use super::frame::{Frame, FrameView};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Default number of slots in the ring.
pub const DEFAULT_DEPTH: usize = 4;

const MIN_DEPTH: usize = 2;
const FPS_WINDOW: Duration = Duration::from_secs(1);

struct Ring {
    slots: Vec<Option<FrameView>>,
    /// Index of the newest committed frame.
    newest: Option<usize>,
    /// Index of the slot currently being written.
    writing: usize,
    frames_written: u64,
}

#[derive(Debug, Clone, Copy)]
struct FpsCounter {
    window_start: Instant,
    frames_in_window: u32,
    fps: f64,
}

impl FpsCounter {
    fn new() -> Self {
        Self {
            window_start: Instant::now(),
            frames_in_window: 0,
            fps: 0.0,
        }
    }

    fn tick(&mut self, now: Instant) {
        self.frames_in_window += 1;
        let elapsed = now.duration_since(self.window_start);
        if elapsed >= FPS_WINDOW {
            self.fps = self.frames_in_window as f64 / elapsed.as_secs_f64();
            self.frames_in_window = 0;
            self.window_start = now;
        }
    }
}

pub struct FrameBuffer {
    ring: Mutex<Ring>,
    fps: Mutex<FpsCounter>,
}

impl FrameBuffer {
    /// Creates a ring of `depth` slots. At least two slots are kept so the slot
    /// being written is never the newest one.
    pub fn new(depth: usize) -> Self {
        let depth = depth.max(MIN_DEPTH);
        Self {
            ring: Mutex::new(Ring {
                slots: vec![None; depth],
                newest: None,
                writing: 0,
                frames_written: 0,
            }),
            fps: Mutex::new(FpsCounter::new()),
        }
    }

    pub fn depth(&self) -> usize {
        self.ring.lock().slots.len()
    }

    /// Takes the next slot out of the ring for writing. The returned frame keeps the
    /// slot's previous allocation when no reader still holds it.
    pub fn begin_write(&self) -> Frame {
        let previous = {
            let mut ring = self.ring.lock();
            let next = match ring.newest {
                Some(i) => (i + 1) % ring.slots.len(),
                None => 0,
            };
            ring.writing = next;
            ring.slots[next].take()
        };
        match previous.map(Arc::try_unwrap) {
            Some(Ok(frame)) => frame,
            Some(Err(shared)) => Frame::new(shared.width, shared.height, shared.channels),
            None => Frame::new(0, 0, 0),
        }
    }

    /// Publishes a frame obtained from `begin_write` as the newest one.
    pub fn commit(&self, mut frame: Frame) -> FrameView {
        let now = Instant::now();
        frame.timestamp = now;
        let view = Arc::new(frame);
        {
            let mut ring = self.ring.lock();
            let slot = ring.writing;
            ring.slots[slot] = Some(Arc::clone(&view));
            ring.newest = Some(slot);
            ring.frames_written += 1;
        }
        self.fps.lock().tick(now);
        view
    }

    /// Returns a frame obtained from `begin_write` without publishing it.
    pub fn cancel_write(&self, frame: Frame) {
        let mut ring = self.ring.lock();
        let slot = ring.writing;
        ring.slots[slot] = Some(Arc::new(frame));
    }

    /// Writes a complete frame in one call.
    pub fn push(&self, frame: Frame) -> FrameView {
        let _ = self.begin_write();
        self.commit(frame)
    }

    /// The newest committed frame.
    pub fn latest(&self) -> Option<FrameView> {
        let ring = self.ring.lock();
        ring.newest.and_then(|i| ring.slots[i].clone())
    }

    pub fn frames_written(&self) -> u64 {
        self.ring.lock().frames_written
    }

    /// Frames per second measured over the last completed one-second window.
    pub fn fps(&self) -> f64 {
        self.fps.lock().fps
    }
}

impl Default for FrameBuffer {
    fn default() -> Self {
        Self::new(DEFAULT_DEPTH)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core_modules::frame::BGR_CHANNELS;

    fn filled(value: u8) -> Frame {
        let mut frame = Frame::new(2, 2, BGR_CHANNELS);
        frame.data.fill(value);
        frame
    }

    #[test]
    fn latest_is_newest_commit() {
        let buffer = FrameBuffer::new(3);
        assert!(buffer.latest().is_none());
        buffer.push(filled(1));
        buffer.push(filled(2));
        let latest = buffer.latest().expect("a committed frame");
        assert_eq!(latest.data[0], 2);
        assert_eq!(buffer.frames_written(), 2);
    }

    #[test]
    fn reader_view_survives_slot_reuse() {
        let buffer = FrameBuffer::new(2);
        let held = buffer.push(filled(7));
        buffer.push(filled(8));
        let mut next = buffer.begin_write();
        next.reshape(2, 2, BGR_CHANNELS);
        next.data.fill(9);
        buffer.commit(next);
        assert_eq!(held.data[0], 7);
        assert_eq!(buffer.latest().map(|f| f.data[0]), Some(9));
    }

    #[test]
    fn unshared_slot_allocation_is_recycled() {
        let buffer = FrameBuffer::new(2);
        drop(buffer.push(filled(3)));
        drop(buffer.push(filled(4)));
        let recycled = buffer.begin_write();
        assert_eq!(recycled.data.len(), 12);
        assert_eq!(recycled.data[0], 3);
    }

    #[test]
    fn cancelled_write_is_not_published() {
        let buffer = FrameBuffer::new(2);
        buffer.push(filled(1));
        let mut pending = buffer.begin_write();
        pending.reshape(2, 2, BGR_CHANNELS);
        buffer.cancel_write(pending);
        assert_eq!(buffer.latest().map(|f| f.data[0]), Some(1));
        assert_eq!(buffer.frames_written(), 1);
    }

    #[test]
    fn ring_rotates_through_slots() {
        let buffer = FrameBuffer::new(2);
        for value in 0..5 {
            buffer.push(filled(value));
        }
        assert_eq!(buffer.depth(), 2);
        assert_eq!(buffer.latest().map(|f| f.data[0]), Some(4));
    }

    #[test]
    fn newest_stays_readable_during_a_write() {
        let buffer = FrameBuffer::new(1);
        assert_eq!(buffer.depth(), 2);
        buffer.push(filled(5));
        let pending = buffer.begin_write();
        assert_eq!(buffer.latest().map(|f| f.data[0]), Some(5));
        buffer.commit(pending);
    }
}
