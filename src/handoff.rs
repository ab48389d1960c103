//! Bounded handoff queue between the subscriber and render threads.
//!
//! The subscriber thread enqueues decoded frames without ever blocking; when
//! the queue is full the incoming frame is discarded and the caller gets a
//! `QueueFull` signal for diagnostics only. The render thread drains whatever
//! is available, also without blocking, and may coalesce a backlog down to
//! the newest frame per source.

use std::collections::HashMap;

use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};

use crate::route::ImageFrame;

/// Informational enqueue outcome: the frame was discarded, not an error.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct QueueFull;

/// Create a handoff queue with a fixed capacity.
pub fn handoff(capacity: usize) -> (FrameSender, FrameReceiver) {
    let (tx, rx) = bounded(capacity);
    (FrameSender { tx }, FrameReceiver { rx })
}

/// Producer half, owned by the subscriber thread.
pub struct FrameSender {
    tx: Sender<(String, ImageFrame)>,
}

impl FrameSender {
    /// Non-blocking enqueue. A full queue (or a render thread that has
    /// already exited during shutdown) discards the frame.
    pub fn send(&self, source_id: String, image: ImageFrame) -> Result<(), QueueFull> {
        match self.tx.try_send((source_id, image)) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) | Err(TrySendError::Disconnected(_)) => Err(QueueFull),
        }
    }
}

/// Consumer half, owned by the render thread.
pub struct FrameReceiver {
    rx: Receiver<(String, ImageFrame)>,
}

impl FrameReceiver {
    /// Drain everything currently queued without blocking.
    pub fn drain(&self) -> Vec<(String, ImageFrame)> {
        self.rx.try_iter().collect()
    }

    /// Drain and keep only the newest frame per source. Returns the
    /// coalesced frames and the total number drained.
    pub fn drain_coalesced(&self) -> (HashMap<String, ImageFrame>, usize) {
        let mut latest = HashMap::new();
        let mut drained = 0usize;
        for (source_id, image) in self.rx.try_iter() {
            latest.insert(source_id, image);
            drained += 1;
        }
        (latest, drained)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(tag: u8) -> ImageFrame {
        ImageFrame {
            dtype: "uint8".to_string(),
            shape: vec![1, 1, 3],
            data: vec![tag; 3],
        }
    }

    #[test]
    fn full_queue_discards_without_blocking() {
        let (tx, rx) = handoff(3);
        let mut full_signals = 0;
        for i in 0..4u8 {
            if tx.send("cam0".to_string(), frame(i)).is_err() {
                full_signals += 1;
            }
        }
        assert_eq!(full_signals, 1);

        let drained = rx.drain();
        assert_eq!(drained.len(), 3);
        // The overflowing (newest) frame was the one discarded.
        assert_eq!(drained.last().unwrap().1.data, vec![2u8; 3]);
        assert!(rx.drain().is_empty());
    }

    #[test]
    fn coalescing_keeps_newest_frame_per_source() {
        let (tx, rx) = handoff(8);
        tx.send("cam0".to_string(), frame(1)).unwrap();
        tx.send("cam1".to_string(), frame(2)).unwrap();
        tx.send("cam0".to_string(), frame(3)).unwrap();

        let (latest, drained) = rx.drain_coalesced();
        assert_eq!(drained, 3);
        assert_eq!(latest.len(), 2);
        assert_eq!(latest["cam0"].data, vec![3u8; 3]);
        assert_eq!(latest["cam1"].data, vec![2u8; 3]);
    }

    #[test]
    fn send_after_receiver_dropped_is_queue_full() {
        let (tx, rx) = handoff(1);
        drop(rx);
        assert_eq!(tx.send("cam0".to_string(), frame(0)), Err(QueueFull));
    }
}
