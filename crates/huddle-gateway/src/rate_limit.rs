use std::collections::HashMap;
use std::time::{Duration, Instant};

use huddle_types::models::ConnectionId;

#[derive(Debug, Clone, Copy)]
struct Window {
    started: Instant,
    count: u32,
}

/// Per-connection fixed-window message counter.
///
/// The window restarts on the first message after it has lapsed, so a client
/// can land `max` messages at the end of one window and `max` more at the
/// start of the next. That 2x burst at the boundary is accepted.
#[derive(Debug)]
pub struct RateLimiter {
    windows: HashMap<ConnectionId, Window>,
    window: Duration,
    max: u32,
}

impl RateLimiter {
    pub fn new(window: Duration, max: u32) -> Self {
        Self {
            windows: HashMap::new(),
            window,
            max,
        }
    }

    pub fn allow(&mut self, conn_id: ConnectionId) -> bool {
        self.allow_at(conn_id, Instant::now())
    }

    pub fn allow_at(&mut self, conn_id: ConnectionId, now: Instant) -> bool {
        let window = self.window;
        let state = self.windows.entry(conn_id).or_insert(Window {
            started: now,
            count: 0,
        });

        if state.count == 0 || now.saturating_duration_since(state.started) > window {
            state.started = now;
            state.count = 1;
        } else {
            state.count = state.count.saturating_add(1);
        }

        state.count <= self.max
    }

    pub fn forget(&mut self, conn_id: ConnectionId) {
        self.windows.remove(&conn_id);
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new(Duration::from_millis(8000), 5)
    }
}
