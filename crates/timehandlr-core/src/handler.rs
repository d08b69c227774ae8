//! The scheduler: a bucketed discrete-event queue on a logical clock.
//!
//! [`TimeHandler`] replaces `setTimeout`/`setInterval` for game code. Every
//! call to [`step`](TimeHandler::step) advances the clock by one tick and
//! fires the events due at that tick.
//!
//! # Ordering
//!
//! Events due at the same tick fire in the order they were inserted into
//! that tick's bucket. Every delay is at least one tick, so a callback can
//! never add to the bucket being dispatched: anything it schedules fires on
//! a later step.
//!
//! # Failure policy
//!
//! Callbacks are infallible by type. A callback that panics unwinds out of
//! `step`; the rest of that tick's bucket is dropped with it and is not
//! revisited. Events already rescheduled earlier in the same step keep
//! their new slots.
//!
//! # Re-entrancy
//!
//! Callbacks receive `&mut TimeHandler` so they can schedule and cancel,
//! but calling `step` from inside a callback returns
//! [`TimeError::Reentrant`].

use std::cell::Cell;
use std::collections::BTreeMap;
use std::rc::Rc;

use tracing::{debug, trace, warn};

use crate::clock::TickClock;
use crate::config::{SchedulerConfig, TimeHandlerSettings};
use crate::error::TimeError;
use crate::event::{Callback, Delay, EventHandle, EventStatus, Repeat};

/// Summary of a single step.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StepSummary {
    /// Clock value after the step.
    pub tick: u64,
    /// Callbacks invoked.
    pub fired: u32,
    /// Events moved to a later bucket.
    pub rescheduled: u32,
    /// Events that ended this step (callback stop, repeats exhausted).
    pub finished: u32,
    /// Tombstones skipped without firing.
    pub skipped: u32,
    /// Whether the clock was paused (nothing happened).
    pub paused: bool,
}

/// What happened to one event during dispatch.
enum Dispatch {
    Skipped,
    Finished,
    Rescheduled(u64),
}

/// Clears the dispatch flag even if a callback unwinds.
struct DispatchGuard(Rc<Cell<bool>>);

impl DispatchGuard {
    fn enter(flag: &Rc<Cell<bool>>) -> Self {
        flag.set(true);
        Self(Rc::clone(flag))
    }
}

impl Drop for DispatchGuard {
    fn drop(&mut self) {
        self.0.set(false);
    }
}

/// A deterministic, pausable tick scheduler.
#[derive(Debug, Default)]
pub struct TimeHandler {
    /// The logical clock.
    clock: TickClock,
    /// Due tick -> events in insertion order.
    events: BTreeMap<u64, Vec<EventHandle>>,
    /// Defaults and class edit functions.
    settings: TimeHandlerSettings,
    /// Set while a bucket is being dispatched.
    dispatching: Rc<Cell<bool>>,
    /// Bumped by `cancel_all_events`; a change mid-dispatch retires the
    /// rest of the bucket.
    generation: u64,
}

impl TimeHandler {
    /// Create a handler at tick 0.
    ///
    /// # Errors
    ///
    /// Returns [`TimeError::InvalidConfig`] if the settings fail validation.
    pub fn new(settings: TimeHandlerSettings) -> Result<Self, TimeError> {
        settings.validate()?;
        Ok(Self {
            settings,
            ..Self::default()
        })
    }

    /// Create a handler from the `scheduler` config section.
    ///
    /// # Errors
    ///
    /// Returns [`TimeError::InvalidConfig`] if the section is invalid.
    pub fn from_config(config: &SchedulerConfig) -> Result<Self, TimeError> {
        Self::new(TimeHandlerSettings::from_config(config)?)
    }

    /// Current tick.
    pub const fn time(&self) -> u64 {
        self.clock.tick()
    }

    /// The handler's settings.
    pub const fn settings(&self) -> &TimeHandlerSettings {
        &self.settings
    }

    /// Freeze the clock; steps become no-ops.
    pub const fn pause(&mut self) {
        self.clock.pause();
    }

    /// Unfreeze the clock.
    pub const fn resume(&mut self) {
        self.clock.resume();
    }

    /// Whether the clock is frozen.
    pub const fn is_paused(&self) -> bool {
        self.clock.is_paused()
    }

    // -----------------------------------------------------------------------
    // Scheduling
    // -----------------------------------------------------------------------

    /// Schedule `callback` to fire once, `time_delay` ticks from now.
    ///
    /// A delay of 0 uses the configured default delay.
    ///
    /// # Errors
    ///
    /// Returns [`TimeError::TickOverflow`] if the due tick overflows.
    pub fn add_event(
        &mut self,
        callback: impl FnMut(&mut Self) -> bool + 'static,
        time_delay: u64,
    ) -> Result<EventHandle, TimeError> {
        self.schedule(
            Box::new(callback),
            Delay::Fixed(time_delay),
            Repeat::Count(1),
        )
    }

    /// Schedule `callback` to fire repeatedly.
    ///
    /// The first firing is `time_delay` ticks from now, and each repeat
    /// waits `time_delay` again (recomputed each time when dynamic). The
    /// series ends when `repeat` runs out or the callback returns `true`.
    ///
    /// # Errors
    ///
    /// Returns [`TimeError::TickOverflow`] if the first due tick overflows.
    pub fn add_event_interval(
        &mut self,
        callback: impl FnMut(&mut Self) -> bool + 'static,
        time_delay: impl Into<Delay>,
        repeat: impl Into<Repeat>,
    ) -> Result<EventHandle, TimeError> {
        self.schedule(Box::new(callback), time_delay.into(), repeat.into())
    }

    /// Schedule a repeating series phase-locked to every other series with
    /// the same `time_delay x period`.
    ///
    /// The series starts at the next tick that is a multiple of
    /// `time_delay x period` (its first firing is `time_delay` after that).
    /// When the clock is already on such a tick this is exactly
    /// [`add_event_interval`](Self::add_event_interval) and the returned
    /// handle is the series.
    ///
    /// Otherwise a one-shot *bootstrap* event is scheduled for the
    /// alignment tick and its handle is returned; the series itself does not
    /// exist until the bootstrap fires. Use [`EventHandle::series`] to reach
    /// the series once started. Cancelling the bootstrap handle cancels the
    /// series as well, before or after it starts.
    ///
    /// A dynamic delay is resolved once, now, to compute the alignment.
    ///
    /// # Errors
    ///
    /// Returns [`TimeError::InvalidEvent`] if `time_delay x period` is zero,
    /// or [`TimeError::TickOverflow`] if the alignment tick overflows.
    pub fn add_event_interval_synched(
        &mut self,
        callback: impl FnMut(&mut Self) -> bool + 'static,
        time_delay: impl Into<Delay>,
        repeat: impl Into<Repeat>,
        period: u64,
    ) -> Result<EventHandle, TimeError> {
        let time_delay = time_delay.into();
        let now = self.time();
        let step_ticks = time_delay.resolve(&EventStatus {
            due_tick: now,
            count: 0,
        });
        let calc_time = step_ticks
            .checked_mul(period)
            .ok_or(TimeError::TickOverflow)?;
        if calc_time == 0 {
            return Err(TimeError::InvalidEvent {
                reason: format!(
                    "synched interval needs a non-zero delay and period (delay {step_ticks}, period {period})"
                ),
            });
        }

        let entry_time = now
            .div_ceil(calc_time)
            .checked_mul(calc_time)
            .ok_or(TimeError::TickOverflow)?;
        if entry_time == now {
            return self.schedule(Box::new(callback), time_delay, repeat.into());
        }

        let bootstrap = EventHandle::new(entry_time, None, Repeat::Count(1), Delay::Fixed(0));
        bootstrap.mark_bootstrap();

        let link = bootstrap.downgrade();
        let mut pending: Option<(Callback, Delay, Repeat)> =
            Some((Box::new(callback), time_delay, repeat.into()));
        bootstrap.set_callback(Box::new(move |handler: &mut Self| {
            if let Some((callback, time_delay, repeat)) = pending.take() {
                match handler.schedule(callback, time_delay, repeat) {
                    Ok(series) => {
                        if let Some(bootstrap) = link.upgrade() {
                            bootstrap.set_follow_on(series);
                        }
                    }
                    Err(err) => warn!(error = %err, "failed to start synched interval"),
                }
            }
            true
        }));

        self.insert(entry_time, bootstrap.clone());
        debug!(
            now,
            entry_time,
            wait = self.clock.ticks_until(entry_time),
            period,
            "Synched interval deferred to alignment tick"
        );
        Ok(bootstrap)
    }

    /// Insert a new event whose first firing is one resolved delay away.
    pub(crate) fn schedule(
        &mut self,
        callback: Callback,
        time_delay: Delay,
        repeat: Repeat,
    ) -> Result<EventHandle, TimeError> {
        let now = self.time();
        let first = self.effective_delay(time_delay.resolve(&EventStatus {
            due_tick: now,
            count: 0,
        }));
        let due_tick = self.clock.offset(first)?;
        let handle = EventHandle::new(due_tick, Some(callback), repeat, time_delay);
        self.insert(due_tick, handle.clone());
        debug!(now, due_tick, "Event scheduled");
        Ok(handle)
    }

    /// Append to the bucket for `due_tick`.
    fn insert(&mut self, due_tick: u64, event: EventHandle) {
        self.events.entry(due_tick).or_default().push(event);
    }

    /// A zero delay would land in a bucket that is already gone.
    const fn effective_delay(&self, raw: u64) -> u64 {
        if raw == 0 {
            self.settings.default_delay
        } else {
            raw
        }
    }

    // -----------------------------------------------------------------------
    // Stepping
    // -----------------------------------------------------------------------

    /// Advance the clock by one tick and fire every event due at it.
    ///
    /// # Errors
    ///
    /// Returns [`TimeError::Reentrant`] when called from a callback, or
    /// [`TimeError::TickOverflow`] if the clock cannot advance.
    pub fn step(&mut self) -> Result<StepSummary, TimeError> {
        if self.dispatching.get() {
            return Err(TimeError::Reentrant { tick: self.time() });
        }
        if self.clock.is_paused() {
            return Ok(StepSummary {
                tick: self.time(),
                paused: true,
                ..StepSummary::default()
            });
        }

        let tick = self.clock.advance()?;
        let mut summary = StepSummary {
            tick,
            ..StepSummary::default()
        };
        let Some(bucket) = self.events.remove(&tick) else {
            return Ok(summary);
        };

        let _guard = DispatchGuard::enter(&self.dispatching);
        let generation = self.generation;
        for event in bucket {
            // The queue was cleared by an earlier callback in this bucket.
            if self.generation != generation {
                event.retire();
                summary.skipped = summary.skipped.saturating_add(1);
                continue;
            }
            match self.dispatch(&event, tick, generation) {
                Dispatch::Skipped => summary.skipped = summary.skipped.saturating_add(1),
                Dispatch::Finished => {
                    summary.fired = summary.fired.saturating_add(1);
                    summary.finished = summary.finished.saturating_add(1);
                }
                Dispatch::Rescheduled(due_tick) => {
                    summary.fired = summary.fired.saturating_add(1);
                    summary.rescheduled = summary.rescheduled.saturating_add(1);
                    self.insert(due_tick, event);
                }
            }
        }

        trace!(
            tick,
            fired = summary.fired,
            rescheduled = summary.rescheduled,
            finished = summary.finished,
            skipped = summary.skipped,
            "Tick dispatched"
        );
        Ok(summary)
    }

    /// Alias of [`step`](Self::step).
    ///
    /// # Errors
    ///
    /// Same as [`step`](Self::step).
    pub fn handle_events(&mut self) -> Result<StepSummary, TimeError> {
        self.step()
    }

    /// Fire one event and work out where it goes next.
    fn dispatch(&mut self, event: &EventHandle, tick: u64, generation: u64) -> Dispatch {
        let Some(mut callback) = event.begin_firing() else {
            return Dispatch::Skipped;
        };

        let stop = callback(self);
        event.record_firing();

        if stop || self.generation != generation || !event.should_continue() {
            event.retire();
            return Dispatch::Finished;
        }

        let delay = self.effective_delay(event.next_delay());
        let Some(due_tick) = tick.checked_add(delay) else {
            warn!(tick, delay, "Repeat overflows the clock; ending event");
            event.retire();
            return Dispatch::Finished;
        };
        event.reschedule(due_tick, callback);
        if event.is_active() {
            Dispatch::Rescheduled(due_tick)
        } else {
            Dispatch::Finished
        }
    }

    // -----------------------------------------------------------------------
    // Cancellation and queries
    // -----------------------------------------------------------------------

    /// Stop an event. Idempotent; the queue entry becomes a tombstone.
    pub fn cancel_event(&mut self, event: &EventHandle) {
        event.cancel();
        trace!(tick = self.time(), due_tick = event.due_tick(), "Event cancelled");
    }

    /// Drop the whole queue. Outstanding handles become inert.
    ///
    /// Called from a callback, this also ends the firing event and every
    /// event left in the bucket being dispatched. Events the callback
    /// schedules afterwards are kept.
    pub fn cancel_all_events(&mut self) {
        self.generation = self.generation.wrapping_add(1);
        let dropped = std::mem::take(&mut self.events);
        for event in dropped.values().flatten() {
            event.retire();
        }
        debug!(
            tick = self.time(),
            buckets = dropped.len(),
            "All events cancelled"
        );
    }

    /// Number of live (non-tombstone) events in the queue.
    pub fn pending_events(&self) -> usize {
        self.events
            .values()
            .flatten()
            .filter(|event| event.is_active())
            .count()
    }

    /// Number of buckets, tombstone-only buckets included.
    pub fn bucket_count(&self) -> usize {
        self.events.len()
    }

    /// Earliest tick with a live event.
    pub fn next_due_tick(&self) -> Option<u64> {
        self.events
            .iter()
            .find(|(_, bucket)| bucket.iter().any(EventHandle::is_active))
            .map(|(tick, _)| *tick)
    }

    /// Events queued for `tick`, in firing order.
    pub fn events_at(&self, tick: u64) -> Vec<EventHandle> {
        self.events.get(&tick).cloned().unwrap_or_default()
    }

    /// Drop tombstones and empty buckets now instead of when their tick
    /// comes. Returns how many events were removed.
    pub fn purge_cancelled(&mut self) -> usize {
        let mut removed: usize = 0;
        self.events.retain(|_, bucket| {
            let before = bucket.len();
            bucket.retain(EventHandle::is_active);
            removed = removed.saturating_add(before.saturating_sub(bucket.len()));
            !bucket.is_empty()
        });
        if removed > 0 {
            debug!(tick = self.time(), removed, "Purged cancelled events");
        }
        removed
    }
}
