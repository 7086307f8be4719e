/* BEGIN LICENSE
  SupaSim, a GPGPU and simulation toolkit.
  Copyright (C) 2025 Magnus Larsson
  SPDX-License-Identifier: MIT OR Apache-2.0
END LICENSE */
//! Host side bookkeeping of the values scheduled on an interop semaphore.
//!
//! A timeline moves `Unsignaled(v)` → `PendingSignal(v → v')` → `Signaled(v')`
//! and every signal, from either API, must be strictly larger than the last one.
//! A binary semaphore is only `Unsignaled` or `Signaled` and each signal has a
//! single waiter. Violations of the binary rules are reported but not rejected,
//! since the device is what enforces them.

use hal::{InteropError, InteropResult};
use parking_lot::Mutex;
use types::SemaphoreKind;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SemaphoreState {
    Unsignaled(u64),
    PendingSignal { from: u64, to: u64 },
    Signaled(u64),
}

/// Which side enqueued an operation
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Side {
    Vulkan,
    Compute,
}

#[derive(Debug)]
struct Inner {
    /// Highest value a signal has been scheduled for
    scheduled: u64,
    /// Highest value known to have been reached
    reached: u64,
    /// Binary only: signals not yet consumed by a wait
    unconsumed_signals: u32,
}

#[derive(Debug)]
pub struct SemaphoreTracker {
    kind: SemaphoreKind,
    inner: Mutex<Inner>,
}
impl SemaphoreTracker {
    pub fn new(kind: SemaphoreKind, initial_value: u64) -> Self {
        let initial_value = match kind {
            SemaphoreKind::Timeline => initial_value,
            SemaphoreKind::Binary => 0,
        };
        Self {
            kind,
            inner: Mutex::new(Inner {
                scheduled: initial_value,
                reached: initial_value,
                unconsumed_signals: 0,
            }),
        }
    }

    /// Records a signal without enqueuing anything, for signals the caller submits
    /// itself. Fails without changing anything if a timeline value does not increase.
    pub fn schedule_signal(&self, side: Side, value: u64) -> InteropResult<()> {
        self.signal_with(side, value, || Ok(()))
    }
    /// Records a signal once `enqueue` has submitted it. The value is checked
    /// first, and nothing is recorded if either the check or `enqueue` fails.
    pub fn signal_with(
        &self,
        side: Side,
        value: u64,
        enqueue: impl FnOnce() -> InteropResult<()>,
    ) -> InteropResult<()> {
        let mut inner = self.inner.lock();
        match self.kind {
            SemaphoreKind::Timeline => {
                if value <= inner.scheduled {
                    return Err(InteropError::TimelineNotMonotonic {
                        last: inner.scheduled,
                        requested: value,
                    });
                }
                enqueue()?;
                log::trace!("{side:?} signals timeline value {value}");
                inner.scheduled = value;
            }
            SemaphoreKind::Binary => {
                if inner.unconsumed_signals > 0 {
                    log::warn!("{side:?} signals a binary semaphore that is already signaled");
                }
                enqueue()?;
                inner.unconsumed_signals += 1;
            }
        }
        Ok(())
    }
    /// Records a wait about to be enqueued. Returns whether a matching signal has
    /// been scheduled; if not the wait blocks until one is.
    pub fn schedule_wait(&self, side: Side, value: u64) -> bool {
        let mut inner = self.inner.lock();
        let satisfiable = match self.kind {
            SemaphoreKind::Timeline => value <= inner.scheduled,
            SemaphoreKind::Binary => {
                let pending = inner.unconsumed_signals > 0;
                inner.unconsumed_signals = inner.unconsumed_signals.saturating_sub(1);
                pending
            }
        };
        if !satisfiable {
            log::warn!(
                "{side:?} waits on a {:?} semaphore (value {value}) with no signal scheduled; \
                 it will block until one is",
                self.kind
            );
        }
        satisfiable
    }
    /// Feeds back a value read from the semaphore itself
    pub fn observe(&self, value: u64) {
        let mut inner = self.inner.lock();
        inner.reached = inner.reached.max(value);
        inner.scheduled = inner.scheduled.max(value);
    }
    /// The next value a timeline signal may use
    pub fn next_value(&self) -> u64 {
        self.inner.lock().scheduled + 1
    }
    pub fn last_scheduled(&self) -> u64 {
        self.inner.lock().scheduled
    }
    pub fn state(&self) -> SemaphoreState {
        let inner = self.inner.lock();
        match self.kind {
            SemaphoreKind::Timeline if inner.scheduled > inner.reached => {
                SemaphoreState::PendingSignal {
                    from: inner.reached,
                    to: inner.scheduled,
                }
            }
            SemaphoreKind::Timeline if inner.reached > 0 => SemaphoreState::Signaled(inner.reached),
            SemaphoreKind::Timeline => SemaphoreState::Unsignaled(0),
            SemaphoreKind::Binary if inner.unconsumed_signals > 0 => SemaphoreState::Signaled(1),
            SemaphoreKind::Binary => SemaphoreState::Unsignaled(0),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeline_values_must_increase() {
        let tracker = SemaphoreTracker::new(SemaphoreKind::Timeline, 3);
        assert_eq!(tracker.next_value(), 4);
        assert!(matches!(
            tracker.schedule_signal(Side::Vulkan, 3),
            Err(InteropError::TimelineNotMonotonic {
                last: 3,
                requested: 3
            })
        ));
        tracker.schedule_signal(Side::Vulkan, 5).unwrap();
        assert!(tracker.schedule_signal(Side::Compute, 4).is_err());
        tracker.schedule_signal(Side::Compute, 6).unwrap();
        assert_eq!(tracker.last_scheduled(), 6);
    }

    #[test]
    fn failed_enqueues_leave_no_trace() {
        let tracker = SemaphoreTracker::new(SemaphoreKind::Timeline, 0);
        let failed = tracker.signal_with(Side::Compute, 5, || Err(InteropError::ExportUnsupported));
        assert!(matches!(failed, Err(InteropError::ExportUnsupported)));
        assert_eq!(tracker.next_value(), 1);
        assert_eq!(tracker.state(), SemaphoreState::Unsignaled(0));
        tracker.signal_with(Side::Compute, 5, || Ok(())).unwrap();
        assert_eq!(tracker.last_scheduled(), 5);

        let mut enqueued = false;
        assert!(
            tracker
                .signal_with(Side::Compute, 5, || {
                    enqueued = true;
                    Ok(())
                })
                .is_err()
        );
        assert!(!enqueued);

        let binary = SemaphoreTracker::new(SemaphoreKind::Binary, 0);
        assert!(
            binary
                .signal_with(Side::Compute, 0, || Err(InteropError::ExportUnsupported))
                .is_err()
        );
        assert_eq!(binary.state(), SemaphoreState::Unsignaled(0));
    }

    #[test]
    fn waits_are_satisfiable_only_after_a_signal() {
        let tracker = SemaphoreTracker::new(SemaphoreKind::Timeline, 0);
        assert!(!tracker.schedule_wait(Side::Compute, 1));
        tracker.schedule_signal(Side::Vulkan, 2).unwrap();
        assert!(tracker.schedule_wait(Side::Compute, 1));
        assert!(tracker.schedule_wait(Side::Compute, 2));
        assert!(!tracker.schedule_wait(Side::Compute, 3));
    }

    #[test]
    fn timeline_state_machine() {
        let tracker = SemaphoreTracker::new(SemaphoreKind::Timeline, 0);
        assert_eq!(tracker.state(), SemaphoreState::Unsignaled(0));
        tracker.schedule_signal(Side::Vulkan, 1).unwrap();
        assert_eq!(tracker.state(), SemaphoreState::PendingSignal { from: 0, to: 1 });
        tracker.observe(1);
        assert_eq!(tracker.state(), SemaphoreState::Signaled(1));
        // Values reached behind our back still move the floor
        tracker.observe(7);
        assert_eq!(tracker.next_value(), 8);
    }

    #[test]
    fn binary_signals_have_one_consumer() {
        let tracker = SemaphoreTracker::new(SemaphoreKind::Binary, 42);
        assert_eq!(tracker.state(), SemaphoreState::Unsignaled(0));
        tracker.schedule_signal(Side::Vulkan, 0).unwrap();
        assert_eq!(tracker.state(), SemaphoreState::Signaled(1));
        assert!(tracker.schedule_wait(Side::Compute, 0));
        assert_eq!(tracker.state(), SemaphoreState::Unsignaled(0));
        assert!(!tracker.schedule_wait(Side::Compute, 0));
    }
}
