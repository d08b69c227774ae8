//! Class cycling: periodic visual state changes driven by the scheduler.
//!
//! A class cycle rotates a thing through a list of class names (sprite
//! frames, blink states, palette swaps) on a fixed or variable cadence. Each
//! cycle is one unbounded repeating event whose callback is
//! [`cycle_advance`]. Nothing beyond the per-cycle cursor is stored.
//!
//! # Things
//!
//! Anything that implements [`Cyclable`] can be cycled. The host owns it as
//! `Rc<RefCell<T>>`; a running cycle keeps only a weak reference, so
//! dropping the thing ends its cycles on their next tick.
//!
//! # Phases
//!
//! | Phase | Effect |
//! |-------|--------|
//! | [`CyclePhase::Class`] | apply the class name (an empty name acts as `Skip`) |
//! | [`CyclePhase::Skip`] | no class this phase, keep cycling |
//! | [`CyclePhase::Stop`] | retract the previous class and end the cycle |
//! | [`CyclePhase::Computed`] | ask a function; `None` stops, `Some("")` skips |
//!
//! # Sharing specs
//!
//! With `copy_cycle_settings` on (the default), registering a cycle copies
//! the spec, so one literal spec can be handed to many things. With it off,
//! every thing registered with the same [`ClassCycle`] shares one cursor,
//! and cancelling any of them neutralizes all of them.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::fmt;
use std::rc::{Rc, Weak};

use tracing::{debug, warn};

use crate::classes::ClassOps;
use crate::error::TimeError;
use crate::event::{Delay, EventHandle, Repeat};
use crate::handler::TimeHandler;

/// Name used when a cycle is registered with an empty name.
pub const DEFAULT_CYCLE_NAME: &str = "0";

/// Computes a phase's class from the thing and the cycle cursor.
pub type PhaseFn = Rc<dyn Fn(&dyn Cyclable, &CycleCursor) -> Option<String>>;

/// Cycles attached to one thing, by name.
pub type CycleMap = BTreeMap<String, ClassCycle>;

/// An object whose class name a cycle can change.
pub trait Cyclable {
    /// Current space-delimited class string.
    fn class_name(&self) -> &str;

    /// Replace the class string.
    fn set_class_name(&mut self, class_name: String);

    /// Cycles attached to this thing.
    fn cycles(&self) -> &CycleMap;

    /// Mutable access to the attached cycles.
    fn cycles_mut(&mut self) -> &mut CycleMap;

    /// Whether new cycles may start their timers right away. Things that
    /// are not yet placed return `false` and later call
    /// [`TimeHandler::start_pending_cycles`].
    fn cycle_start_ready(&self) -> bool {
        true
    }

    /// Whether running cycles should keep going. Returning `false` makes
    /// every cycle on the thing stop itself at its next tick.
    fn cycle_valid(&self) -> bool {
        true
    }
}

/// One step of a cycle.
#[derive(Clone)]
pub enum CyclePhase {
    /// Apply this class name.
    Class(String),
    /// Apply nothing this phase and keep cycling.
    Skip,
    /// End the cycle.
    Stop,
    /// Decide when the phase is reached.
    Computed(PhaseFn),
}

impl CyclePhase {
    /// Build a [`CyclePhase::Computed`] from a closure.
    pub fn computed(phase: impl Fn(&dyn Cyclable, &CycleCursor) -> Option<String> + 'static) -> Self {
        Self::Computed(Rc::new(phase))
    }
}

impl From<&str> for CyclePhase {
    fn from(class_name: &str) -> Self {
        Self::Class(class_name.to_owned())
    }
}

impl From<String> for CyclePhase {
    fn from(class_name: String) -> Self {
        Self::Class(class_name)
    }
}

impl fmt::Debug for CyclePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Class(name) => f.debug_tuple("Class").field(name).finish(),
            Self::Skip => f.write_str("Skip"),
            Self::Stop => f.write_str("Stop"),
            Self::Computed(_) => f.write_str("Computed(..)"),
        }
    }
}

/// Cursor snapshot handed to computed phases.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CycleCursor {
    /// Index of the phase being resolved.
    pub location: usize,
    /// Number of phases in the cycle.
    pub length: usize,
}

/// How a cycle's backing event is timed.
#[derive(Debug, Clone)]
enum CycleTiming {
    Interval(Delay),
    Synched { period: u64 },
}

/// Mutable state of one cycle.
#[derive(Debug)]
struct CycleState {
    phases: Vec<CyclePhase>,
    /// `None` before the first advance.
    location: Option<usize>,
    /// Class applied by the last advance, if any.
    old_class: Option<String>,
    /// Backing event once started.
    event: Option<EventHandle>,
    timing: CycleTiming,
    /// Registered but waiting for the thing to become ready.
    pending_start: bool,
    /// Name the cycle was last registered under.
    name: Option<String>,
}

/// Shared handle to a class cycle.
///
/// Build one with [`ClassCycle::new`] and pass it to
/// [`TimeHandler::add_class_cycle`]. The handle returned by registration is
/// the live cycle.
#[derive(Debug, Clone)]
pub struct ClassCycle(Rc<RefCell<CycleState>>);

impl PartialEq for ClassCycle {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}

impl Eq for ClassCycle {}

impl ClassCycle {
    /// Create a cycle spec from its phases.
    pub fn new<P: Into<CyclePhase>>(phases: impl IntoIterator<Item = P>) -> Self {
        Self(Rc::new(RefCell::new(CycleState {
            phases: phases.into_iter().map(Into::into).collect(),
            location: None,
            old_class: None,
            event: None,
            timing: CycleTiming::Interval(Delay::Fixed(0)),
            pending_start: false,
            name: None,
        })))
    }

    /// Number of phases.
    pub fn len(&self) -> usize {
        self.0.borrow().phases.len()
    }

    /// Whether the cycle has no phases.
    pub fn is_empty(&self) -> bool {
        self.0.borrow().phases.is_empty()
    }

    /// Copy of the phases.
    pub fn phases(&self) -> Vec<CyclePhase> {
        self.0.borrow().phases.clone()
    }

    /// Index of the current phase, `None` before the first advance.
    pub fn location(&self) -> Option<usize> {
        self.0.borrow().location
    }

    /// Class applied by the most recent advance.
    pub fn current_class(&self) -> Option<String> {
        self.0.borrow().old_class.clone()
    }

    /// The backing event once the cycle has started.
    pub fn event(&self) -> Option<EventHandle> {
        self.0.borrow().event.clone()
    }

    /// Whether the cycle is registered but waiting for its start hook.
    pub fn is_pending_start(&self) -> bool {
        self.0.borrow().pending_start
    }

    /// Whether the cycle has been cancelled or has stopped itself.
    pub fn is_neutralized(&self) -> bool {
        matches!(self.0.borrow().phases.as_slice(), [CyclePhase::Stop])
    }

    /// Same phases, fresh cursor, no event.
    fn fresh_copy(&self) -> Self {
        Self::new(self.phases())
    }

    fn downgrade(&self) -> Weak<RefCell<CycleState>> {
        Rc::downgrade(&self.0)
    }

    /// Reset the cursor for a new registration.
    fn prepare(&self, name: &str, timing: CycleTiming) {
        let mut state = self.0.borrow_mut();
        state.name = Some(name.to_owned());
        state.location = None;
        state.old_class = None;
        state.event = None;
        state.timing = timing;
        state.pending_start = true;
    }

    fn timing(&self) -> CycleTiming {
        self.0.borrow().timing.clone()
    }

    fn attach_event(&self, event: EventHandle) {
        let mut state = self.0.borrow_mut();
        state.event = Some(event);
        state.pending_start = false;
    }

    /// Make any in-flight event stop itself and cancel the backing event.
    fn neutralize(&self) {
        let event = {
            let mut state = self.0.borrow_mut();
            state.phases = vec![CyclePhase::Stop];
            state.pending_start = false;
            state.event.take()
        };
        if let Some(event) = event {
            event.cancel();
        }
    }

    /// Neutralize a cycle that ended on its own and detach it from
    /// `thing`. The backing event is left to retire itself.
    fn finish<T: Cyclable + ?Sized>(&self, thing: &mut T) {
        let name = {
            let mut state = self.0.borrow_mut();
            state.phases = vec![CyclePhase::Stop];
            state.pending_start = false;
            state.name.clone()
        };
        let Some(name) = name else {
            return;
        };
        if thing.cycles().get(&name) == Some(self) {
            thing.cycles_mut().remove(&name);
            debug!(name, "Class cycle finished");
        }
    }

    fn take_old_class(&self) -> Option<String> {
        self.0.borrow_mut().old_class.take()
    }

    fn set_old_class(&self, class_name: String) {
        self.0.borrow_mut().old_class = Some(class_name);
    }

    /// Move to the next phase and return it with the new cursor.
    fn advance_location(&self) -> Option<(CyclePhase, CycleCursor)> {
        let mut state = self.0.borrow_mut();
        let length = state.phases.len();
        let location = match state.location {
            Some(current) => current.checked_add(1)?.checked_rem(length)?,
            None => 0,
        };
        let phase = state.phases.get(location)?.clone();
        state.location = Some(location);
        Some((phase, CycleCursor { location, length }))
    }
}

/// Advance a cycle by one phase. Returns `true` when the cycle should stop.
///
/// This is the callback behind every cycle event. It stops when the thing
/// is gone or reports itself invalid, when the cycle has no phases, or on
/// an explicit [`CyclePhase::Stop`]. A cycle that stops while its thing is
/// alive is neutralized and removed from the thing's [`CycleMap`]. If the
/// host is holding a mutable borrow of the thing when the tick fires, this
/// phase is skipped.
pub fn cycle_advance<T: Cyclable>(thing: &Weak<RefCell<T>>, cycle: &ClassCycle, ops: ClassOps) -> bool {
    let Some(thing) = thing.upgrade() else {
        return true;
    };
    let Ok(mut thing) = thing.try_borrow_mut() else {
        warn!("Thing busy during class cycle advance; skipping phase");
        return false;
    };
    if cycle.is_empty() || !thing.cycle_valid() {
        cycle.finish(&mut *thing);
        return true;
    }

    if let Some(old_class) = cycle.take_old_class() {
        let next = (ops.remove)(thing.class_name(), &old_class);
        thing.set_class_name(next);
    }

    let Some((phase, cursor)) = cycle.advance_location() else {
        cycle.finish(&mut *thing);
        return true;
    };
    let resolved = match phase {
        CyclePhase::Class(name) => Some(name),
        CyclePhase::Skip => Some(String::new()),
        CyclePhase::Stop => None,
        CyclePhase::Computed(phase) => phase(&*thing, &cursor),
    };

    match resolved {
        Some(class_name) if !class_name.is_empty() => {
            let next = (ops.add)(thing.class_name(), &class_name);
            thing.set_class_name(next);
            cycle.set_old_class(class_name);
            false
        }
        Some(_) => false,
        None => {
            cycle.finish(&mut *thing);
            true
        }
    }
}

/// Remove the cycle `name` from `thing`, neutralizing it so an in-flight
/// event stops itself. Returns whether a cycle was removed; unknown names
/// are a no-op.
pub fn cancel_class_cycle<T: Cyclable + ?Sized>(thing: &mut T, name: &str) -> bool {
    let Some(cycle) = thing.cycles_mut().remove(name) else {
        return false;
    };
    cycle.neutralize();
    debug!(name, "Class cycle cancelled");
    true
}

/// Remove and neutralize every cycle on `thing`. Returns how many.
pub fn cancel_all_cycles<T: Cyclable + ?Sized>(thing: &mut T) -> usize {
    let cycles = std::mem::take(thing.cycles_mut());
    for cycle in cycles.values() {
        cycle.neutralize();
    }
    cycles.len()
}

impl TimeHandler {
    /// Attach a class cycle to `thing` under `name` and show its first
    /// phase immediately.
    ///
    /// An existing cycle with the same name is cancelled first. `timing`
    /// defaults to the configured cycle timing; a [`Delay::Dynamic`] timing
    /// varies the speed per phase. The timer starts at once if the thing is
    /// [ready](Cyclable::cycle_start_ready), otherwise on
    /// [`start_pending_cycles`](Self::start_pending_cycles).
    ///
    /// # Errors
    ///
    /// Returns [`TimeError::ThingBorrowed`] if the thing is already
    /// borrowed, or a scheduling error from the backing event.
    pub fn add_class_cycle<T: Cyclable + 'static>(
        &mut self,
        thing: &Rc<RefCell<T>>,
        spec: &ClassCycle,
        name: &str,
        timing: Option<Delay>,
    ) -> Result<ClassCycle, TimeError> {
        let timing = timing.unwrap_or(Delay::Fixed(self.settings().default_cycle_timing));
        self.register_cycle(thing, spec, name, CycleTiming::Interval(timing))
    }

    /// Like [`add_class_cycle`](Self::add_class_cycle), but the backing
    /// event is a synched interval so the cycle runs in phase with every
    /// other synched cycle of the same `period`.
    ///
    /// # Errors
    ///
    /// Returns [`TimeError::InvalidEvent`] for a zero period, plus the
    /// errors of [`add_class_cycle`](Self::add_class_cycle).
    pub fn add_class_cycle_synched<T: Cyclable + 'static>(
        &mut self,
        thing: &Rc<RefCell<T>>,
        spec: &ClassCycle,
        name: &str,
        period: u64,
    ) -> Result<ClassCycle, TimeError> {
        if period == 0 {
            return Err(TimeError::InvalidEvent {
                reason: "synched class cycle needs a non-zero period".to_owned(),
            });
        }
        self.register_cycle(thing, spec, name, CycleTiming::Synched { period })
    }

    /// Start every cycle on `thing` that is waiting for readiness. Hosts
    /// call this when the thing is placed. Returns how many started.
    ///
    /// # Errors
    ///
    /// Returns [`TimeError::ThingBorrowed`] if the thing is already
    /// borrowed, or a scheduling error from a backing event.
    pub fn start_pending_cycles<T: Cyclable + 'static>(
        &mut self,
        thing: &Rc<RefCell<T>>,
    ) -> Result<usize, TimeError> {
        let pending: Vec<ClassCycle> = thing
            .try_borrow()
            .map_err(|_err| TimeError::ThingBorrowed {
                name: "*".to_owned(),
            })?
            .cycles()
            .values()
            .filter(|cycle| cycle.is_pending_start())
            .cloned()
            .collect();
        for cycle in &pending {
            self.start_cycle(thing, cycle)?;
        }
        Ok(pending.len())
    }

    fn register_cycle<T: Cyclable + 'static>(
        &mut self,
        thing: &Rc<RefCell<T>>,
        spec: &ClassCycle,
        name: &str,
        timing: CycleTiming,
    ) -> Result<ClassCycle, TimeError> {
        let name = if name.is_empty() {
            DEFAULT_CYCLE_NAME
        } else {
            name
        };
        let cycle = if self.settings().copy_cycle_settings {
            spec.fresh_copy()
        } else {
            spec.clone()
        };

        let ready = {
            let mut target = thing
                .try_borrow_mut()
                .map_err(|_err| TimeError::ThingBorrowed {
                    name: name.to_owned(),
                })?;
            cancel_class_cycle(&mut *target, name);
            cycle.prepare(name, timing);
            target.cycles_mut().insert(name.to_owned(), cycle.clone());
            target.cycle_start_ready()
        };

        if ready {
            self.start_cycle(thing, &cycle)?;
        }
        let stopped = cycle_advance(&Rc::downgrade(thing), &cycle, self.settings().class_ops);
        if stopped {
            if let Some(event) = cycle.event() {
                event.cancel();
            }
        }
        debug!(name, ready, phases = cycle.len(), "Class cycle registered");
        Ok(cycle)
    }

    /// Create the repeating event that drives `cycle`.
    fn start_cycle<T: Cyclable + 'static>(
        &mut self,
        thing: &Rc<RefCell<T>>,
        cycle: &ClassCycle,
    ) -> Result<(), TimeError> {
        let target = Rc::downgrade(thing);
        let state = cycle.downgrade();
        let callback = move |handler: &mut Self| {
            // A dropped cycle was cancelled or detached with its thing.
            let Some(state) = state.upgrade() else {
                return true;
            };
            cycle_advance(&target, &ClassCycle(state), handler.settings().class_ops)
        };

        let event = match cycle.timing() {
            CycleTiming::Interval(timing) => {
                self.add_event_interval(callback, timing, Repeat::Forever)?
            }
            CycleTiming::Synched { period } => self.add_event_interval_synched(
                callback,
                self.settings().default_cycle_timing,
                Repeat::Forever,
                period,
            )?,
        };
        cycle.attach_event(event);
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::classes::has_class;

    /// Minimal thing for tests.
    #[derive(Debug, Default)]
    struct Sprite {
        class_name: String,
        cycles: CycleMap,
        placed: bool,
        alive: bool,
    }

    impl Cyclable for Sprite {
        fn class_name(&self) -> &str {
            &self.class_name
        }

        fn set_class_name(&mut self, class_name: String) {
            self.class_name = class_name;
        }

        fn cycles(&self) -> &CycleMap {
            &self.cycles
        }

        fn cycles_mut(&mut self) -> &mut CycleMap {
            &mut self.cycles
        }

        fn cycle_start_ready(&self) -> bool {
            self.placed
        }

        fn cycle_valid(&self) -> bool {
            self.alive
        }
    }

    fn sprite(class_name: &str) -> Rc<RefCell<Sprite>> {
        Rc::new(RefCell::new(Sprite {
            class_name: class_name.to_owned(),
            cycles: CycleMap::new(),
            placed: true,
            alive: true,
        }))
    }

    fn class_of(thing: &Rc<RefCell<Sprite>>) -> String {
        thing.borrow().class_name.clone()
    }

    /// Step once and return the sprite's class string afterwards.
    fn step_class(handler: &mut TimeHandler, thing: &Rc<RefCell<Sprite>>) -> String {
        handler.step().unwrap();
        class_of(thing)
    }

    #[test]
    fn cycle_is_circular() {
        let mut handler = TimeHandler::default();
        let thing = sprite("goomba");
        let spec = ClassCycle::new(["a", "b", "c"]);
        let cycle = handler.add_class_cycle(&thing, &spec, "walk", None).unwrap();

        let mut seen = vec![class_of(&thing)];
        for _ in 0..4 {
            seen.push(step_class(&mut handler, &thing));
        }
        assert_eq!(
            seen,
            vec!["goomba a", "goomba b", "goomba c", "goomba a", "goomba b"]
        );
        assert_eq!(cycle.current_class().as_deref(), Some("b"));
        assert_eq!(cycle.location(), Some(1));
    }

    #[test]
    fn explicit_stop_ends_cycle() {
        let mut handler = TimeHandler::default();
        let thing = sprite("");
        let cycle = handler
            .add_class_cycle(&thing, &ClassCycle::new([CyclePhase::from("a"), CyclePhase::Stop]), "", None)
            .unwrap();
        assert_eq!(class_of(&thing), "a");

        // Reaching the stop phase retracts "a" and ends the event.
        assert_eq!(step_class(&mut handler, &thing), "");
        assert!(!cycle.event().unwrap().is_active());
        for _ in 0..5 {
            assert_eq!(step_class(&mut handler, &thing), "");
        }
        assert_eq!(handler.pending_events(), 0);
    }

    #[test]
    fn stopped_cycle_is_neutralized_and_detached() {
        let mut handler = TimeHandler::default();
        let thing = sprite("");
        let spec = ClassCycle::new([CyclePhase::from("a"), CyclePhase::Stop]);
        let cycle = handler.add_class_cycle(&thing, &spec, "once", None).unwrap();
        assert!(!cycle.is_neutralized());
        assert!(thing.borrow().cycles.contains_key("once"));

        for _ in 0..3 {
            handler.step().unwrap();
        }
        assert!(cycle.is_neutralized());
        assert!(thing.borrow().cycles.is_empty());
        assert!(!cancel_class_cycle(&mut *thing.borrow_mut(), "once"));
    }

    #[test]
    fn stopped_cycle_leaves_a_replacement_attached() {
        let settings = crate::TimeHandlerSettings {
            copy_cycle_settings: false,
            ..crate::TimeHandlerSettings::default()
        };
        let mut handler = TimeHandler::new(settings).unwrap();
        let thing = sprite("");
        let old = ClassCycle::new([CyclePhase::from("a"), CyclePhase::Stop]);
        handler.add_class_cycle(&thing, &old, "walk", None).unwrap();
        let new = handler
            .add_class_cycle(&thing, &ClassCycle::new(["b", "c"]), "walk", None)
            .unwrap();

        // Advancing the replaced cycle by hand must not detach the new one.
        assert!(cycle_advance(&Rc::downgrade(&thing), &old, ClassOps::default()));
        assert_eq!(thing.borrow().cycles.get("walk"), Some(&new));
    }

    #[test]
    fn cycle_stopping_on_first_phase_never_starts() {
        let mut handler = TimeHandler::default();
        let thing = sprite("idle");
        let cycle = handler
            .add_class_cycle(&thing, &ClassCycle::new([CyclePhase::Stop]), "none", None)
            .unwrap();
        assert!(!cycle.event().unwrap().is_active());
        assert!(thing.borrow().cycles.is_empty());
        assert_eq!(handler.pending_events(), 0);
    }

    #[test]
    fn skip_phases_keep_cycling() {
        let mut handler = TimeHandler::default();
        let thing = sprite("");
        let spec = ClassCycle::new([
            CyclePhase::from("on"),
            CyclePhase::Skip,
            CyclePhase::from(""),
        ]);
        handler.add_class_cycle(&thing, &spec, "blink", None).unwrap();
        assert_eq!(class_of(&thing), "on");
        assert_eq!(step_class(&mut handler, &thing), "");
        assert_eq!(step_class(&mut handler, &thing), "");
        assert_eq!(step_class(&mut handler, &thing), "on");
    }

    #[test]
    fn computed_phase_sees_cursor_and_thing() {
        let mut handler = TimeHandler::default();
        let thing = sprite("big");
        let spec = ClassCycle::new([CyclePhase::computed(|thing, cursor| {
            let size = if has_class(thing.class_name(), "big") {
                "tall"
            } else {
                "short"
            };
            Some(format!("{size}-{}", cursor.location))
        })]);
        handler.add_class_cycle(&thing, &spec, "size", None).unwrap();
        assert_eq!(class_of(&thing), "big tall-0");
    }

    #[test]
    fn computed_none_stops() {
        let mut handler = TimeHandler::default();
        let thing = sprite("");
        let spec = ClassCycle::new([
            CyclePhase::from("x"),
            CyclePhase::computed(|_, _| None),
        ]);
        let cycle = handler.add_class_cycle(&thing, &spec, "c", None).unwrap();
        handler.step().unwrap();
        assert!(!cycle.event().unwrap().is_active());
        assert_eq!(class_of(&thing), "");
    }

    #[test]
    fn custom_timing_slows_cycle() {
        let mut handler = TimeHandler::default();
        let thing = sprite("");
        let spec = ClassCycle::new(["a", "b"]);
        handler
            .add_class_cycle(&thing, &spec, "slow", Some(Delay::Fixed(3)))
            .unwrap();
        assert_eq!(step_class(&mut handler, &thing), "a");
        assert_eq!(step_class(&mut handler, &thing), "a");
        assert_eq!(step_class(&mut handler, &thing), "b");
    }

    #[test]
    fn dynamic_timing_varies_speed() {
        let mut handler = TimeHandler::default();
        let thing = sprite("");
        let spec = ClassCycle::new(["a", "b"]);
        // 1 tick, then 2, then 3...
        let timing = Delay::dynamic(|status| status.count.saturating_add(1));
        let cycle = handler
            .add_class_cycle(&thing, &spec, "speed", Some(timing))
            .unwrap();
        let event = cycle.event().unwrap();
        assert_eq!(event.due_tick(), 1);
        handler.step().unwrap();
        assert_eq!(event.due_tick(), 3);
        assert_eq!(class_of(&thing), "b");
    }

    #[test]
    fn cancel_is_idempotent() {
        let mut handler = TimeHandler::default();
        let thing = sprite("");
        let cycle = handler
            .add_class_cycle(&thing, &ClassCycle::new(["a", "b"]), "walk", None)
            .unwrap();

        assert!(cancel_class_cycle(&mut *thing.borrow_mut(), "walk"));
        assert!(!cancel_class_cycle(&mut *thing.borrow_mut(), "walk"));
        assert!(!cancel_class_cycle(&mut *thing.borrow_mut(), "missing"));
        assert!(thing.borrow().cycles.is_empty());
        assert!(cycle.is_neutralized());

        let before = class_of(&thing);
        for _ in 0..3 {
            handler.step().unwrap();
        }
        assert_eq!(class_of(&thing), before);
    }

    #[test]
    fn cancel_all_cycles_neutralizes_everything() {
        let mut handler = TimeHandler::default();
        let thing = sprite("");
        let walk = handler
            .add_class_cycle(&thing, &ClassCycle::new(["a", "b"]), "walk", None)
            .unwrap();
        let blink = handler
            .add_class_cycle(&thing, &ClassCycle::new(["on", "off"]), "blink", None)
            .unwrap();
        assert_eq!(cancel_all_cycles(&mut *thing.borrow_mut()), 2);
        assert!(walk.is_neutralized());
        assert!(blink.is_neutralized());
        assert_eq!(handler.pending_events(), 0);
        assert_eq!(cancel_all_cycles(&mut *thing.borrow_mut()), 0);
    }

    #[test]
    fn re_registering_starts_fresh() {
        let mut handler = TimeHandler::default();
        let thing = sprite("");
        let spec = ClassCycle::new(["a", "b", "c"]);
        handler.add_class_cycle(&thing, &spec, "walk", None).unwrap();
        handler.step().unwrap();
        assert!(cancel_class_cycle(&mut *thing.borrow_mut(), "walk"));

        let fresh_thing = sprite("");
        let fresh = handler
            .add_class_cycle(&fresh_thing, &spec, "walk", None)
            .unwrap();
        let again = handler.add_class_cycle(&thing, &spec, "walk", None).unwrap();
        assert_eq!(again.location(), fresh.location());
        assert_eq!(again.current_class(), fresh.current_class());
        assert_eq!(again.location(), Some(0));

        // The template itself never moved.
        assert_eq!(spec.location(), None);
        assert!(!spec.is_neutralized());
    }

    #[test]
    fn registering_same_name_replaces_cycle() {
        let mut handler = TimeHandler::default();
        let thing = sprite("");
        let first = handler
            .add_class_cycle(&thing, &ClassCycle::new(["a"]), "walk", None)
            .unwrap();
        let second = handler
            .add_class_cycle(&thing, &ClassCycle::new(["b"]), "walk", None)
            .unwrap();
        assert!(first.is_neutralized());
        assert_eq!(thing.borrow().cycles.len(), 1);
        assert_eq!(thing.borrow().cycles.get("walk"), Some(&second));
    }

    #[test]
    fn copied_specs_keep_separate_cursors() {
        let mut handler = TimeHandler::default();
        let spec = ClassCycle::new(["a", "b", "c"]);
        let first = sprite("");
        handler.add_class_cycle(&first, &spec, "walk", None).unwrap();
        handler.step().unwrap();
        let second = sprite("");
        handler.add_class_cycle(&second, &spec, "walk", None).unwrap();

        assert_eq!(class_of(&first), "b");
        assert_eq!(class_of(&second), "a");
    }

    #[test]
    fn shared_specs_share_cursor_when_copy_is_off() {
        let settings = crate::TimeHandlerSettings {
            copy_cycle_settings: false,
            ..crate::TimeHandlerSettings::default()
        };
        let mut handler = TimeHandler::new(settings).unwrap();
        let spec = ClassCycle::new(["a", "b", "c"]);
        let first = sprite("");
        let second = sprite("");
        let one = handler.add_class_cycle(&first, &spec, "walk", None).unwrap();
        let two = handler.add_class_cycle(&second, &spec, "walk", None).unwrap();
        assert_eq!(one, two);
        assert_eq!(spec.location(), Some(0));
    }

    #[test]
    fn deferred_start_waits_for_hook() {
        let mut handler = TimeHandler::default();
        let thing = sprite("");
        thing.borrow_mut().placed = false;
        let cycle = handler
            .add_class_cycle(&thing, &ClassCycle::new(["a", "b"]), "walk", None)
            .unwrap();
        // The first phase shows at once, but no timer runs yet.
        assert_eq!(class_of(&thing), "a");
        assert!(cycle.is_pending_start());
        assert!(cycle.event().is_none());
        assert_eq!(step_class(&mut handler, &thing), "a");

        thing.borrow_mut().placed = true;
        assert_eq!(handler.start_pending_cycles(&thing).unwrap(), 1);
        assert!(!cycle.is_pending_start());
        assert_eq!(step_class(&mut handler, &thing), "b");
        assert_eq!(handler.start_pending_cycles(&thing).unwrap(), 0);
    }

    #[test]
    fn invalid_thing_stops_cycle() {
        let mut handler = TimeHandler::default();
        let thing = sprite("");
        let cycle = handler
            .add_class_cycle(&thing, &ClassCycle::new(["a", "b"]), "walk", None)
            .unwrap();
        thing.borrow_mut().alive = false;
        handler.step().unwrap();
        assert!(!cycle.event().unwrap().is_active());
        assert_eq!(class_of(&thing), "a");
    }

    #[test]
    fn dropped_thing_stops_cycle() {
        let mut handler = TimeHandler::default();
        let thing = sprite("");
        let cycle = handler
            .add_class_cycle(&thing, &ClassCycle::new(["a", "b"]), "walk", None)
            .unwrap();
        let event = cycle.event().unwrap();
        drop(cycle);
        drop(thing);
        let summary = handler.step().unwrap();
        assert_eq!(summary.finished, 1);
        assert!(!event.is_active());
    }

    #[test]
    fn busy_thing_skips_a_phase() {
        let mut handler = TimeHandler::default();
        let thing = sprite("");
        let cycle = handler
            .add_class_cycle(&thing, &ClassCycle::new(["a", "b"]), "walk", None)
            .unwrap();
        let weak = Rc::downgrade(&thing);
        {
            let _held = thing.borrow_mut();
            assert!(!cycle_advance(&weak, &cycle, ClassOps::default()));
        }
        assert_eq!(cycle.location(), Some(0));
    }

    #[test]
    fn registering_on_a_borrowed_thing_fails() {
        let mut handler = TimeHandler::default();
        let thing = sprite("");
        let _held = thing.borrow_mut();
        let result = handler.add_class_cycle(&thing, &ClassCycle::new(["a"]), "walk", None);
        assert!(matches!(result, Err(TimeError::ThingBorrowed { .. })));
    }

    #[test]
    fn empty_cycle_stops_immediately() {
        let mut handler = TimeHandler::default();
        let thing = sprite("idle");
        let cycle = handler
            .add_class_cycle(&thing, &ClassCycle::new(Vec::<CyclePhase>::new()), "none", None)
            .unwrap();
        handler.step().unwrap();
        assert!(!cycle.event().unwrap().is_active());
        assert_eq!(class_of(&thing), "idle");
    }

    #[test]
    fn synched_cycles_run_in_phase() {
        let mut handler = TimeHandler::default();
        let spec = ClassCycle::new(["on", "off"]);
        let first = sprite("");
        handler
            .add_class_cycle_synched(&first, &spec, "blink", 4)
            .unwrap();
        handler.step().unwrap();
        handler.step().unwrap();
        let second = sprite("");
        handler
            .add_class_cycle_synched(&second, &spec, "blink", 4)
            .unwrap();

        // The second series waits for tick 4 and then runs in phase.
        while handler.time() < 5 {
            handler.step().unwrap();
        }
        assert_eq!(class_of(&first), "off");
        assert_eq!(class_of(&second), "off");
        for _ in 0..3 {
            handler.step().unwrap();
            assert_eq!(class_of(&first), class_of(&second));
        }
    }

    #[test]
    fn synched_cycle_rejects_zero_period() {
        let mut handler = TimeHandler::default();
        let thing = sprite("");
        let result = handler.add_class_cycle_synched(&thing, &ClassCycle::new(["a"]), "x", 0);
        assert!(result.is_err());
        assert!(thing.borrow().cycles.is_empty());
    }

    #[test]
    fn custom_class_ops_are_used() {
        fn shout(current: &str, name: &str) -> String {
            crate::classes::add_class(current, &name.to_uppercase())
        }
        fn unshout(current: &str, name: &str) -> String {
            crate::classes::remove_class(current, &name.to_uppercase())
        }
        let settings = crate::TimeHandlerSettings::default().with_class_ops(ClassOps {
            add: shout,
            remove: unshout,
        });
        let mut handler = TimeHandler::new(settings).unwrap();
        let thing = sprite("");
        handler
            .add_class_cycle(&thing, &ClassCycle::new(["a", "b"]), "walk", None)
            .unwrap();
        assert_eq!(class_of(&thing), "A");
        assert_eq!(step_class(&mut handler, &thing), "B");
    }
}
