//! Debounced window resize handling.
//!
//! During a drag-resize the window system sends a burst of resize events. Rebuilding the pass graph
//! for each of them would recreate every framebuffer dozens of times, so events are buffered and a
//! single resize is released once no new event arrived for the debounce duration:
//!
//! ```text
//! Events:  R  R  R  R  R  R  ... R [quiet period]
//!          └──────────────────────┘      │
//!            (events buffered)           ▼
//!                              Single pass graph rebuild
//! ```

use std::time::{Duration, Instant};

/// Resize released by [`ResizeDebouncer::update`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResizeEvent {
    pub width: u32,
    pub height: u32,
    pub previous_width: u32,
    pub previous_height: u32,
}

/// Collapses bursts of resize notifications into one resize.
#[derive(Debug)]
pub struct ResizeDebouncer {
    pending_size: Option<(u32, u32)>,
    last_event_time: Instant,
    debounce_duration: Duration,
    current_size: (u32, u32),
    min_size: (u32, u32),
}

impl ResizeDebouncer {
    pub fn new(initial_size: (u32, u32), debounce: Duration) -> Self {
        Self {
            pending_size: None,
            last_event_time: Instant::now(),
            debounce_duration: debounce,
            current_size: initial_size,
            min_size: (1, 1),
        }
    }

    /// Buffer a resize notification. Sizes are clamped to at least 1x1.
    pub fn on_resize_event(&mut self, width: u32, height: u32) {
        let new_size = (width.max(self.min_size.0), height.max(self.min_size.1));

        if Some(new_size) == self.pending_size {
            self.last_event_time = Instant::now();
            return;
        }
        if new_size == self.current_size && self.pending_size.is_none() {
            return;
        }

        self.pending_size = Some(new_size);
        self.last_event_time = Instant::now();

        log::trace!(
            "Resize event: {}x{} (pending, debounce={}ms)",
            new_size.0,
            new_size.1,
            self.debounce_duration.as_millis()
        );
    }

    /// Release the pending resize once the quiet period has elapsed.
    pub fn update(&mut self) -> Option<ResizeEvent> {
        if self.last_event_time.elapsed() < self.debounce_duration {
            return None;
        }
        self.force_resize()
    }

    /// Release the pending resize immediately.
    pub fn force_resize(&mut self) -> Option<ResizeEvent> {
        let (width, height) = self.pending_size.take()?;
        let previous = self.current_size;
        self.current_size = (width, height);

        log::trace!(
            "Resize applied: {}x{} -> {}x{}",
            previous.0,
            previous.1,
            width,
            height
        );

        Some(ResizeEvent {
            width,
            height,
            previous_width: previous.0,
            previous_height: previous.1,
        })
    }

    pub fn current_size(&self) -> (u32, u32) {
        self.current_size
    }

    pub fn pending_size(&self) -> Option<(u32, u32)> {
        self.pending_size
    }

    pub fn is_resizing(&self) -> bool {
        self.pending_size.is_some()
    }

    /// Time left before the pending resize is released, zero if none is pending.
    pub fn remaining_debounce(&self) -> Duration {
        if self.pending_size.is_some() {
            self.debounce_duration
                .saturating_sub(self.last_event_time.elapsed())
        } else {
            Duration::ZERO
        }
    }

    pub fn cancel_pending(&mut self) {
        self.pending_size = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_burst_collapses_into_one_resize() {
        let mut debouncer = ResizeDebouncer::new((800, 600), Duration::from_millis(20));
        for i in 0..10 {
            debouncer.on_resize_event(800 + i * 10, 600);
        }
        assert!(debouncer.is_resizing());
        assert!(debouncer.update().is_none());

        thread::sleep(Duration::from_millis(30));
        let event = debouncer.update().unwrap();
        assert_eq!((event.width, event.height), (890, 600));
        assert_eq!((event.previous_width, event.previous_height), (800, 600));
        assert!(debouncer.update().is_none());
        assert_eq!(debouncer.current_size(), (890, 600));
    }

    #[test]
    fn test_same_size_is_ignored() {
        let mut debouncer = ResizeDebouncer::new((800, 600), Duration::ZERO);
        debouncer.on_resize_event(800, 600);
        assert!(!debouncer.is_resizing());
        assert!(debouncer.update().is_none());
    }

    #[test]
    fn test_zero_size_is_clamped() {
        let mut debouncer = ResizeDebouncer::new((800, 600), Duration::ZERO);
        debouncer.on_resize_event(0, 0);
        assert_eq!(debouncer.force_resize().map(|e| (e.width, e.height)), Some((1, 1)));
    }

    #[test]
    fn test_cancel_pending() {
        let mut debouncer = ResizeDebouncer::new((800, 600), Duration::ZERO);
        debouncer.on_resize_event(1024, 768);
        debouncer.cancel_pending();
        assert!(debouncer.update().is_none());
        assert_eq!(debouncer.remaining_debounce(), Duration::ZERO);
    }
}
