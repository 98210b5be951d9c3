//! Receive-side flow control accounting.

/// Tracks the local receive window and the WINDOW_UPDATE owed to the peer.
///
/// Updates are batched: once half of the initial window has been consumed,
/// `should_update()` turns true and the consumed total becomes the pending
/// increment.
#[derive(Debug)]
pub struct FlowControl {
    window: i32,
    initial_window: u32,
    consumed: u32,
    update_threshold: u32,
}

impl FlowControl {
    pub fn new(initial_window_size: u32) -> Self {
        Self {
            window: initial_window_size as i32,
            initial_window: initial_window_size,
            consumed: 0,
            update_threshold: initial_window_size / 2,
        }
    }

    pub fn available(&self) -> i32 {
        self.window
    }

    pub fn consume(&mut self, amount: u32) {
        self.window -= amount as i32;
        self.consumed += amount;
    }

    pub fn should_update(&self) -> bool {
        self.consumed >= self.update_threshold
    }

    pub fn pending_update(&self) -> u32 {
        self.consumed
    }

    /// Restore the window after the WINDOW_UPDATE was queued.
    pub fn reset_pending(&mut self) {
        self.window += self.consumed as i32;
        self.consumed = 0;
    }

    pub fn initial_window(&self) -> u32 {
        self.initial_window
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn consume_then_update() {
        let mut fc = FlowControl::new(65_535);
        assert_eq!(fc.available(), 65_535);

        fc.consume(30_000);
        assert_eq!(fc.available(), 35_535);
        assert!(!fc.should_update());

        fc.consume(10_000);
        assert!(fc.should_update());
        assert_eq!(fc.pending_update(), 40_000);

        fc.reset_pending();
        assert_eq!(fc.available(), 65_535);
        assert!(!fc.should_update());
    }
}
