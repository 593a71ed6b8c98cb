//! # Scheduler Events and Timers
//!
//! The connection runs single-threaded and event-driven: the scheduler
//! delivers [`NetEvent`]s, and the connection arms timers through
//! idempotent [`TimerSlot`]s. A slot remembers the token of its armed
//! event; delivery must present the same token back, which keeps the
//! "delivered event matches stored handle" invariant checkable.

use core::time::Duration;

/// Events delivered to the connection state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetEvent {
    /// Datagrams are waiting in the receive queue.
    PacketReadReady,
    /// Time to run a packetization pass.
    PacketWriteReady,
    /// Path validation window expired.
    PathValidationTimeout,
    /// Closing/draining persistence window expired.
    ClosingTimeout,
    /// Final teardown of a closed connection.
    Shutdown,
    /// Idle-timeout tick from the net handler.
    Immediate,
}

/// Opaque identity of one scheduled event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EventToken(pub u64);

/// The scheduling surface the connection consumes.
///
/// `delay == None` schedules for immediate delivery. Cancellation of an
/// already-delivered token is a no-op.
pub trait EventScheduler: Send {
    fn schedule(&mut self, event: NetEvent, delay: Option<Duration>) -> EventToken;
    fn cancel(&mut self, token: EventToken);
}

/// One idempotent timer.
///
/// `schedule` no-ops while armed; `unschedule` cancels and disarms;
/// `close` consumes a delivered event, asserting it is the armed one.
#[derive(Debug)]
pub struct TimerSlot {
    event: NetEvent,
    armed: Option<EventToken>,
}

impl TimerSlot {
    pub fn new(event: NetEvent) -> Self {
        Self { event, armed: None }
    }

    pub fn is_armed(&self) -> bool {
        self.armed.is_some()
    }

    pub fn schedule(&mut self, scheduler: &mut dyn EventScheduler, delay: Option<Duration>) {
        if self.armed.is_none() {
            tracing::trace!(event = ?self.event, ?delay, "schedule event");
            self.armed = Some(scheduler.schedule(self.event, delay));
        }
    }

    pub fn unschedule(&mut self, scheduler: &mut dyn EventScheduler) {
        if let Some(token) = self.armed.take() {
            tracing::trace!(event = ?self.event, "unschedule event");
            scheduler.cancel(token);
        }
    }

    /// Consume a delivered event.
    pub fn close(&mut self, token: EventToken) {
        debug_assert_eq!(self.armed, Some(token), "delivered {:?} does not match armed token", self.event);
        self.armed = None;
    }
}
