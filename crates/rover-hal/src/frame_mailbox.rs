//! Single-slot frame handoff between a capture thread and a consumer.
//!
//! The producer replaces the slot; the consumer clones out of it.  Either
//! side holds the lock only for the swap or the copy, never while capturing
//! or rendering.

use std::sync::{Arc, Mutex, PoisonError};

use crate::camera::CameraFrame;

/// Latest-frame mailbox.  Clones share the same slot.
#[derive(Debug, Clone, Default)]
pub struct FrameMailbox {
    slot: Arc<Mutex<Option<CameraFrame>>>,
}

impl FrameMailbox {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the stored frame.  Older frames are discarded unseen.
    pub fn publish(&self, frame: CameraFrame) {
        let previous = {
            let mut slot = self.slot.lock().unwrap_or_else(PoisonError::into_inner);
            slot.replace(frame)
        };
        // Free the old buffer outside the lock.
        drop(previous);
    }

    /// A copy of the most recent frame, or `None` before the first publish.
    pub fn latest(&self) -> Option<CameraFrame> {
        self.slot
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    fn frame(fill: u8) -> CameraFrame {
        CameraFrame {
            width: 1,
            height: 1,
            data: vec![fill; 3],
        }
    }

    #[test]
    fn empty_until_first_publish() {
        let mailbox = FrameMailbox::new();
        assert!(mailbox.latest().is_none());
        mailbox.publish(frame(7));
        assert_eq!(mailbox.latest(), Some(frame(7)));
    }

    #[test]
    fn readers_get_a_copy_not_the_live_buffer() {
        let mailbox = FrameMailbox::new();
        mailbox.publish(frame(1));
        let mut copy = mailbox.latest().unwrap();
        copy.data[0] = 99;
        assert_eq!(mailbox.latest().unwrap().data[0], 1);
    }

    #[test]
    fn only_the_newest_frame_is_kept() {
        let mailbox = FrameMailbox::new();
        mailbox.publish(frame(1));
        mailbox.publish(frame(2));
        assert_eq!(mailbox.latest(), Some(frame(2)));
    }

    #[test]
    fn producer_thread_and_consumer_share_the_slot() {
        let mailbox = FrameMailbox::new();
        let producer = {
            let mailbox = mailbox.clone();
            thread::spawn(move || {
                for i in 0..=200u8 {
                    mailbox.publish(frame(i));
                }
            })
        };
        while !producer.is_finished() {
            if let Some(f) = mailbox.latest() {
                assert!(f.is_complete());
            }
        }
        producer.join().unwrap();
        assert_eq!(mailbox.latest(), Some(frame(200)));
    }
}
