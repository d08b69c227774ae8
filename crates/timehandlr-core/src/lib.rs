//! Deterministic tick scheduler and class cycling for `TimeHandlr`.
//!
//! This crate replaces wall-clock timers with a logical clock that the host
//! advances once per frame. Events are bucketed by due tick, so the same
//! sequence of calls always produces the same sequence of firings.
//!
//! # Modules
//!
//! - [`clock`] -- Monotonic tick counter with a pause switch.
//! - [`classes`] -- Default add/remove edits for space-delimited class
//!   strings.
//! - [`config`] -- Configuration loading from `timehandlr-config.yaml` into
//!   strongly-typed structs, and the runtime [`TimeHandlerSettings`].
//! - [`cycle`] -- Class cycles: named, cancellable phase rotations attached
//!   to a [`Cyclable`] thing.
//! - [`error`] -- The [`TimeError`] type shared by every operation.
//! - [`event`] -- Scheduled events, their repeat and delay policies, and
//!   the [`EventHandle`] callers keep.
//! - [`handler`] -- The [`TimeHandler`] queue and its step loop.
//!
//! # Example
//!
//! ```
//! use timehandlr_core::TimeHandler;
//!
//! let mut handler = TimeHandler::default();
//! let event = handler.add_event(|_| false, 3).unwrap();
//! for _ in 0..3 {
//!     handler.step().unwrap();
//! }
//! assert_eq!(event.count(), 1);
//! ```

pub mod classes;
pub mod clock;
pub mod config;
pub mod cycle;
pub mod error;
pub mod event;
pub mod handler;

pub use classes::ClassOps;
pub use clock::TickClock;
pub use config::{ConfigError, TimeHandlerSettings, TimeHandlrConfig};
pub use cycle::{
    ClassCycle, CycleCursor, CycleMap, CyclePhase, Cyclable, cancel_all_cycles,
    cancel_class_cycle, cycle_advance,
};
pub use error::TimeError;
pub use event::{Callback, Delay, EventHandle, EventStatus, Repeat};
pub use handler::{StepSummary, TimeHandler};
