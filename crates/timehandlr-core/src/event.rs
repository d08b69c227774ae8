//! Scheduled events and their repeat/delay policies.
//!
//! A [`TimeEvent`] is one scheduled invocation: a callback, the tick it is
//! due at, how often it repeats ([`Repeat`]), and how far apart repeats are
//! ([`Delay`]). Events are shared between the queue and the caller through
//! an [`EventHandle`], so the caller can inspect or cancel an event after
//! scheduling it.
//!
//! # Tombstones
//!
//! Cancelling never touches the queue. It flips the event's repeat count to
//! zero and drops the callback; the step loop skips the dead entry when it
//! reaches its bucket, and the bucket is deleted after processing.
//! [`TimeHandler::purge_cancelled`](crate::TimeHandler::purge_cancelled)
//! reclaims tombstones early for long-running hosts.

use std::cell::RefCell;
use std::fmt;
use std::rc::{Rc, Weak};

use crate::handler::TimeHandler;

/// Callback run when an event fires.
///
/// Receives the handler so it can schedule or cancel other events. Returns
/// `true` to stop the event regardless of remaining repeats.
pub type Callback = Box<dyn FnMut(&mut TimeHandler) -> bool>;

/// Continuation predicate for [`Repeat::While`]; `true` keeps repeating.
pub type RepeatPredicate = Box<dyn FnMut(&EventStatus) -> bool>;

/// Delay function for [`Delay::Dynamic`]; returns ticks until next firing.
pub type DelayFn = Rc<dyn Fn(&EventStatus) -> u64>;

/// Read-only view of an event handed to predicates and delay functions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EventStatus {
    /// Tick the event is (or was last) due at.
    pub due_tick: u64,
    /// Number of times the event has fired.
    pub count: u64,
}

/// How many times an event fires.
pub enum Repeat {
    /// A fixed number of firings; `Count(0)` is exhausted.
    Count(u64),
    /// Fire until cancelled or until the callback returns `true`.
    Forever,
    /// Re-evaluated after each firing; `false` ends the event.
    While(RepeatPredicate),
}

impl Repeat {
    /// Build a [`Repeat::While`] from a closure.
    pub fn while_fn(predicate: impl FnMut(&EventStatus) -> bool + 'static) -> Self {
        Self::While(Box::new(predicate))
    }

    /// Whether no firings remain.
    pub const fn is_exhausted(&self) -> bool {
        matches!(self, Self::Count(0))
    }
}

impl From<u64> for Repeat {
    fn from(count: u64) -> Self {
        Self::Count(count)
    }
}

impl fmt::Debug for Repeat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Count(n) => f.debug_tuple("Count").field(n).finish(),
            Self::Forever => f.write_str("Forever"),
            Self::While(_) => f.write_str("While(..)"),
        }
    }
}

/// Ticks between scheduling and firing, or between repeats.
#[derive(Clone)]
pub enum Delay {
    /// Same delay every time. 0 means "use the handler's default delay".
    Fixed(u64),
    /// Recomputed before every (re)scheduling, e.g. for accelerating
    /// animations.
    Dynamic(DelayFn),
}

impl Delay {
    /// Build a [`Delay::Dynamic`] from a closure.
    pub fn dynamic(delay: impl Fn(&EventStatus) -> u64 + 'static) -> Self {
        Self::Dynamic(Rc::new(delay))
    }

    /// Compute the raw delay for an event in the given state.
    pub fn resolve(&self, status: &EventStatus) -> u64 {
        match self {
            Self::Fixed(ticks) => *ticks,
            Self::Dynamic(delay) => delay(status),
        }
    }
}

impl From<u64> for Delay {
    fn from(ticks: u64) -> Self {
        Self::Fixed(ticks)
    }
}

impl fmt::Debug for Delay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Fixed(n) => f.debug_tuple("Fixed").field(n).finish(),
            Self::Dynamic(_) => f.write_str("Dynamic(..)"),
        }
    }
}

/// One scheduled invocation.
pub struct TimeEvent {
    /// Absolute tick the event is due at (its bucket key).
    due_tick: u64,
    /// `None` while the callback runs, and after the event has ended.
    callback: Option<Callback>,
    /// Remaining repeat policy.
    repeat: Repeat,
    /// Delay between repeats.
    time_repeat: Delay,
    /// Times fired so far.
    count: u64,
    /// Set once by an explicit cancel; never cleared.
    cancelled: bool,
    /// Whether this is the bootstrap of a deferred synched interval.
    bootstrap: bool,
    /// Series started by this event (deferred synched intervals).
    follow_on: Option<EventHandle>,
}

impl fmt::Debug for TimeEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TimeEvent")
            .field("due_tick", &self.due_tick)
            .field("repeat", &self.repeat)
            .field("time_repeat", &self.time_repeat)
            .field("count", &self.count)
            .field("cancelled", &self.cancelled)
            .field("bootstrap", &self.bootstrap)
            .field("has_follow_on", &self.follow_on.is_some())
            .finish_non_exhaustive()
    }
}

/// Shared handle to a scheduled [`TimeEvent`].
///
/// Cloning the handle does not duplicate the event. The queue holds one
/// clone while the event is pending.
#[derive(Debug, Clone)]
pub struct EventHandle(Rc<RefCell<TimeEvent>>);

/// Non-owning counterpart of [`EventHandle`].
#[derive(Debug, Clone)]
pub(crate) struct WeakEventHandle(Weak<RefCell<TimeEvent>>);

impl WeakEventHandle {
    pub(crate) fn upgrade(&self) -> Option<EventHandle> {
        self.0.upgrade().map(EventHandle)
    }
}

impl PartialEq for EventHandle {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}

impl Eq for EventHandle {}

impl EventHandle {
    pub(crate) fn new(
        due_tick: u64,
        callback: Option<Callback>,
        repeat: Repeat,
        time_repeat: Delay,
    ) -> Self {
        Self(Rc::new(RefCell::new(TimeEvent {
            due_tick,
            callback,
            repeat,
            time_repeat,
            count: 0,
            cancelled: false,
            bootstrap: false,
            follow_on: None,
        })))
    }

    pub(crate) fn downgrade(&self) -> WeakEventHandle {
        WeakEventHandle(Rc::downgrade(&self.0))
    }

    /// Tick the event is due at (or was last due at, once it has ended).
    pub fn due_tick(&self) -> u64 {
        self.0.borrow().due_tick
    }

    /// Number of times the event has fired.
    pub fn count(&self) -> u64 {
        self.0.borrow().count
    }

    /// Whether the event can still fire.
    pub fn is_active(&self) -> bool {
        let event = self.0.borrow();
        !event.repeat.is_exhausted() && !event.cancelled
    }

    /// Whether [`cancel`](Self::cancel) was called on this event.
    pub fn is_cancelled(&self) -> bool {
        self.0.borrow().cancelled
    }

    /// Snapshot of the event's state.
    pub fn status(&self) -> EventStatus {
        let event = self.0.borrow();
        EventStatus {
            due_tick: event.due_tick,
            count: event.count,
        }
    }

    /// Stop the event: no further firings. Idempotent.
    ///
    /// The event stays in its bucket as a tombstone. If this is the
    /// bootstrap of a deferred synched interval that already started its
    /// series, the series is cancelled too.
    pub fn cancel(&self) {
        let (follow_on, callback) = {
            let mut event = self.0.borrow_mut();
            event.repeat = Repeat::Count(0);
            event.cancelled = true;
            (event.follow_on.clone(), event.callback.take())
        };
        // Captured state is released outside the borrow.
        drop(callback);
        if let Some(series) = follow_on {
            series.cancel();
        }
    }

    /// The repeating series this handle stands for.
    ///
    /// For a deferred synched interval this is the series created when the
    /// bootstrap fired (or `None` before that). For every other event it is
    /// the event itself.
    pub fn series(&self) -> Option<Self> {
        let event = self.0.borrow();
        match &event.follow_on {
            Some(series) => Some(series.clone()),
            None if event.bootstrap => None,
            None => Some(self.clone()),
        }
    }

    /// Whether this handle is the bootstrap of a deferred synched interval.
    pub fn is_deferred(&self) -> bool {
        self.0.borrow().bootstrap
    }

    pub(crate) fn set_callback(&self, callback: Callback) {
        self.0.borrow_mut().callback = Some(callback);
    }

    pub(crate) fn mark_bootstrap(&self) {
        self.0.borrow_mut().bootstrap = true;
    }

    pub(crate) fn set_follow_on(&self, series: Self) {
        let cancelled = {
            let mut event = self.0.borrow_mut();
            event.follow_on = Some(series.clone());
            event.cancelled
        };
        if cancelled {
            series.cancel();
        }
    }

    /// Take the callback out for a firing. `None` if the event is dead.
    pub(crate) fn begin_firing(&self) -> Option<Callback> {
        let mut event = self.0.borrow_mut();
        if event.repeat.is_exhausted() || event.cancelled {
            return None;
        }
        event.callback.take()
    }

    /// Record a completed firing.
    pub(crate) fn record_firing(&self) {
        let mut event = self.0.borrow_mut();
        event.count = event.count.saturating_add(1);
    }

    /// Decide whether the event repeats after a firing whose callback
    /// returned `false`.
    pub(crate) fn should_continue(&self) -> bool {
        let status = self.status();
        let taken = {
            let mut event = self.0.borrow_mut();
            if event.cancelled {
                return false;
            }
            match &mut event.repeat {
                Repeat::Count(remaining) => {
                    *remaining = remaining.saturating_sub(1);
                    return *remaining > 0;
                }
                Repeat::Forever => return true,
                Repeat::While(_) => std::mem::replace(&mut event.repeat, Repeat::Count(0)),
            }
        };

        // The predicate runs without the event borrowed so it may inspect
        // or cancel handles it captured.
        let Repeat::While(mut predicate) = taken else {
            return false;
        };
        let keep = predicate(&status);
        let mut event = self.0.borrow_mut();
        if event.cancelled {
            return false;
        }
        if keep {
            event.repeat = Repeat::While(predicate);
        }
        keep
    }

    /// Raw delay until the next firing.
    pub(crate) fn next_delay(&self) -> u64 {
        let status = self.status();
        let delay = self.0.borrow().time_repeat.clone();
        delay.resolve(&status)
    }

    /// Put the callback back and move the event to its next due tick.
    pub(crate) fn reschedule(&self, due_tick: u64, callback: Callback) {
        let mut event = self.0.borrow_mut();
        event.due_tick = due_tick;
        if !event.cancelled {
            event.callback = Some(callback);
        }
    }

    /// End the event after its last firing and release the callback.
    pub(crate) fn retire(&self) {
        let callback = {
            let mut event = self.0.borrow_mut();
            event.repeat = Repeat::Count(0);
            event.callback.take()
        };
        drop(callback);
    }
}
