//! Bounded per-connection outbound queue
//!
//! Frames and lifecycle events share one ordered queue so a listener never
//! sees audio from before a `stream-stopped` after it. The two kinds are
//! bounded separately: a full frame budget drops the oldest queued frame,
//! a full event budget closes the connection. Publishers never wait.

use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tokio::sync::Notify;

use crate::audio::format::Frame;
use crate::protocol::ServerEvent;

/// Item handed to the connection writer
#[derive(Debug, Clone)]
pub enum Outbound {
    Event(ServerEvent),
    Frame(Frame),
}

#[derive(Default)]
struct Queue {
    items: VecDeque<Outbound>,
    frames: usize,
    events: usize,
}

/// Outbound queue of one connection
pub struct Outbox {
    queue: Mutex<Queue>,
    frame_capacity: usize,
    event_capacity: usize,
    notify: Notify,
    closed: AtomicBool,
    frames_queued: AtomicU64,
    frames_dropped: AtomicU64,
}

impl Outbox {
    pub fn new(frame_capacity: usize, event_capacity: usize) -> Self {
        Self {
            queue: Mutex::new(Queue::default()),
            frame_capacity: frame_capacity.max(1),
            event_capacity: event_capacity.max(1),
            notify: Notify::new(),
            closed: AtomicBool::new(false),
            frames_queued: AtomicU64::new(0),
            frames_dropped: AtomicU64::new(0),
        }
    }

    /// Queue a frame, evicting the oldest queued frame when full.
    /// Returns false once the outbox is closed.
    pub fn push_frame(&self, frame: Frame) -> bool {
        if self.is_closed() {
            return false;
        }

        {
            let mut queue = self.queue.lock();
            if queue.frames >= self.frame_capacity {
                if let Some(pos) = queue.items.iter().position(|o| matches!(o, Outbound::Frame(_))) {
                    queue.items.remove(pos);
                    queue.frames -= 1;
                    self.frames_dropped.fetch_add(1, Ordering::Relaxed);
                }
            }
            queue.items.push_back(Outbound::Frame(frame));
            queue.frames += 1;
        }

        self.frames_queued.fetch_add(1, Ordering::Relaxed);
        self.notify.notify_one();
        true
    }

    /// Queue a lifecycle event. A connection too slow to drain its events
    /// is closed instead of losing one silently.
    pub fn push_event(&self, event: ServerEvent) -> bool {
        if self.is_closed() {
            return false;
        }

        let overflow = {
            let mut queue = self.queue.lock();
            if queue.events >= self.event_capacity {
                true
            } else {
                queue.items.push_back(Outbound::Event(event));
                queue.events += 1;
                false
            }
        };

        if overflow {
            tracing::warn!("Outbound event queue full, closing connection");
            self.close();
            return false;
        }

        self.notify.notify_one();
        true
    }

    /// Stop accepting items; already queued items can still be drained
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.notify.notify_one();
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Take the next queued item without waiting
    pub fn try_next(&self) -> Option<Outbound> {
        let mut queue = self.queue.lock();
        let item = queue.items.pop_front()?;
        match item {
            Outbound::Frame(_) => queue.frames -= 1,
            Outbound::Event(_) => queue.events -= 1,
        }
        Some(item)
    }

    /// Wait for the next item; `None` once closed and drained.
    ///
    /// Single consumer: the connection's writer task.
    pub async fn next(&self) -> Option<Outbound> {
        loop {
            if let Some(item) = self.try_next() {
                return Some(item);
            }
            if self.is_closed() {
                return None;
            }
            self.notify.notified().await;
        }
    }

    pub fn len(&self) -> usize {
        self.queue.lock().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn frames_queued(&self) -> u64 {
        self.frames_queued.load(Ordering::Relaxed)
    }

    pub fn frames_dropped(&self) -> u64 {
        self.frames_dropped.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use uuid::Uuid;

    fn frame(tag: u8) -> Frame {
        Frame::new(Bytes::from(vec![tag; 4]))
    }

    fn frame_tag(item: Outbound) -> u8 {
        match item {
            Outbound::Frame(f) => f.as_bytes()[0],
            other => panic!("expected frame, got {:?}", other),
        }
    }

    #[test]
    fn test_full_frame_queue_drops_oldest() {
        let outbox = Outbox::new(2, 8);
        assert!(outbox.push_frame(frame(1)));
        assert!(outbox.push_frame(frame(2)));
        assert!(outbox.push_frame(frame(3)));

        assert_eq!(outbox.frames_dropped(), 1);
        assert_eq!(frame_tag(outbox.try_next().unwrap()), 2);
        assert_eq!(frame_tag(outbox.try_next().unwrap()), 3);
        assert!(outbox.try_next().is_none());
    }

    #[test]
    fn test_events_keep_their_position() {
        let outbox = Outbox::new(1, 8);
        let room_id = Uuid::new_v4();
        outbox.push_frame(frame(1));
        outbox.push_event(ServerEvent::StreamStopped { room_id });
        // evicts frame 1, not the event
        outbox.push_frame(frame(2));

        assert!(matches!(outbox.try_next(), Some(Outbound::Event(ServerEvent::StreamStopped { .. }))));
        assert_eq!(frame_tag(outbox.try_next().unwrap()), 2);
    }

    #[test]
    fn test_event_overflow_closes() {
        let outbox = Outbox::new(1, 1);
        let room_id = Uuid::new_v4();
        assert!(outbox.push_event(ServerEvent::StreamStarted { room_id }));
        assert!(!outbox.push_event(ServerEvent::StreamStopped { room_id }));
        assert!(outbox.is_closed());
        assert!(!outbox.push_frame(frame(1)));
    }

    #[tokio::test]
    async fn test_next_drains_before_reporting_closed() {
        let outbox = std::sync::Arc::new(Outbox::new(4, 4));
        outbox.push_frame(frame(9));
        outbox.close();

        assert_eq!(frame_tag(outbox.next().await.unwrap()), 9);
        assert!(outbox.next().await.is_none());
    }

    #[tokio::test]
    async fn test_next_wakes_on_push() {
        let outbox = std::sync::Arc::new(Outbox::new(4, 4));
        let reader = {
            let outbox = outbox.clone();
            tokio::spawn(async move { outbox.next().await })
        };
        tokio::task::yield_now().await;
        outbox.push_frame(frame(5));

        let item = reader.await.unwrap().unwrap();
        assert_eq!(frame_tag(item), 5);
    }
}
