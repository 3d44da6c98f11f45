//! Trailing-edge throttle for watch-driven rescans.
//!
//! The first trigger opens a window; the fire happens once, when the window
//! closes. Triggers arriving while a fire is pending are absorbed. The next
//! window can only open after the previous fire, so two fires are always at
//! least one window apart.
//!
//! The throttle keeps no timer of its own. Callers pass the current
//! [`Instant`] in and arm a timer for [`Throttle::deadline`].

use std::time::{Duration, Instant};

/// What a trigger did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThrottleDecision {
    /// A new window was opened; fire at the given instant.
    Scheduled(Instant),
    /// A fire was already pending at the given instant.
    Coalesced(Instant),
}

impl ThrottleDecision {
    /// Returns the instant at which the pending fire is due.
    #[must_use]
    pub const fn deadline(self) -> Instant {
        match self {
            Self::Scheduled(at) | Self::Coalesced(at) => at,
        }
    }
}

/// A minimum-interval throttle with a trailing edge.
///
/// # Examples
///
/// ```
/// use cms_watcher::{Throttle, ThrottleDecision};
/// use std::time::{Duration, Instant};
///
/// let mut throttle = Throttle::new(Duration::from_millis(4500));
/// let t0 = Instant::now();
///
/// let first = throttle.trigger(t0);
/// let second = throttle.trigger(t0 + Duration::from_millis(200));
/// assert!(matches!(first, ThrottleDecision::Scheduled(_)));
/// assert!(matches!(second, ThrottleDecision::Coalesced(_)));
///
/// assert!(!throttle.poll(t0 + Duration::from_millis(4000)));
/// assert!(throttle.poll(t0 + Duration::from_millis(4500)));
/// assert!(!throttle.poll(t0 + Duration::from_millis(9000)));
/// ```
#[derive(Debug, Clone)]
pub struct Throttle {
    window: Duration,
    last_fire: Option<Instant>,
    deadline: Option<Instant>,
}

impl Throttle {
    /// Creates a throttle with the given window.
    #[must_use]
    pub const fn new(window: Duration) -> Self {
        Self {
            window,
            last_fire: None,
            deadline: None,
        }
    }

    /// Returns the window length.
    #[inline]
    #[must_use]
    pub const fn window(&self) -> Duration {
        self.window
    }

    /// Returns the instant of the pending fire, if any.
    #[inline]
    #[must_use]
    pub const fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Returns `true` if a fire is pending.
    #[inline]
    #[must_use]
    pub const fn is_pending(&self) -> bool {
        self.deadline.is_some()
    }

    /// Records a trigger at `now`.
    pub fn trigger(&mut self, now: Instant) -> ThrottleDecision {
        if let Some(at) = self.deadline {
            return ThrottleDecision::Coalesced(at);
        }
        let mut at = now + self.window;
        if let Some(last) = self.last_fire {
            at = at.max(last + self.window);
        }
        self.deadline = Some(at);
        ThrottleDecision::Scheduled(at)
    }

    /// Fires if the pending deadline has passed at `now`.
    ///
    /// Returns `true` exactly once per window.
    pub fn poll(&mut self, now: Instant) -> bool {
        match self.deadline {
            Some(at) if now >= at => {
                self.deadline = None;
                self.last_fire = Some(now);
                true
            }
            _ => false,
        }
    }

    /// Drops a pending fire without firing.
    pub fn cancel(&mut self) {
        self.deadline = None;
    }
}
