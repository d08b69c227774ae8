//! The demo scene: sprites, their class cycles, and a few game events.
//!
//! Every sprite gets two cycles. `blink` is a synched cycle, so sprites
//! added at different ticks still blink together. `flicker` picks a random
//! class each phase and slows down and speeds up on a dynamic delay.
//!
//! On top of that the scene schedules a one-shot spawn event that adds a
//! late sprite (exercising the deferred start hook), a repeating score
//! interval, and a despawn that marks one sprite dead so its cycles stop
//! themselves.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use timehandlr_core::{
    ClassCycle, CycleMap, CyclePhase, Cyclable, Delay, Repeat, StepSummary, TimeHandler,
    TimeHandlrConfig,
};
use tracing::{debug, info, warn};

use crate::error::HostError;

/// Classes the flicker cycle picks from. The empty entry skips a phase.
const FLICKER_CLASSES: &[&str] = &["flicker-bright", "flicker-dim", ""];

/// Points added per live sprite on every score tick.
const POINTS_PER_SPRITE: u64 = 10;

/// Number of score ticks before the score interval ends.
const SCORE_ROUNDS: u64 = 12;

/// Ticks between score rounds.
const SCORE_INTERVAL: u64 = 10;

/// A sprite whose visual state is its class string.
#[derive(Debug)]
pub struct Sprite {
    /// Scene-unique id.
    pub id: u32,
    /// Current classes.
    pub class_name: String,
    /// Cycles attached to this sprite.
    pub cycles: CycleMap,
    /// Whether the sprite has been placed in the scene.
    pub placed: bool,
    /// Whether the sprite is alive; dead sprites stop cycling.
    pub alive: bool,
}

/// Shared handle to a sprite.
pub type SpriteRef = Rc<RefCell<Sprite>>;

impl Sprite {
    /// Create a sprite with the base `sprite` class.
    pub fn new(id: u32, placed: bool) -> SpriteRef {
        Rc::new(RefCell::new(Self {
            id,
            class_name: "sprite".to_owned(),
            cycles: CycleMap::new(),
            placed,
            alive: true,
        }))
    }
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

/// Cycle specs shared by every sprite in the scene.
#[derive(Debug, Clone)]
struct CycleSpecs {
    blink: ClassCycle,
    flicker: ClassCycle,
    blink_period: u64,
}

impl CycleSpecs {
    fn new(seed: u64, blink_period: u64) -> Self {
        let rng = Rc::new(RefCell::new(StdRng::seed_from_u64(seed)));
        let flicker = ClassCycle::new([CyclePhase::computed(move |_, _| {
            let index = rng.borrow_mut().random_range(0..FLICKER_CLASSES.len());
            FLICKER_CLASSES.get(index).map(|class| (*class).to_owned())
        })]);
        Self {
            blink: ClassCycle::new(["blink-on", "blink-off"]),
            flicker,
            blink_period,
        }
    }

    /// Attach both cycles to `sprite`.
    fn attach(&self, handler: &mut TimeHandler, sprite: &SpriteRef) -> Result<(), HostError> {
        handler.add_class_cycle_synched(sprite, &self.blink, "blink", self.blink_period)?;
        // 1, 2, 3, 1, 2, 3...
        let timing =
            Delay::dynamic(|status| status.count.checked_rem(3).unwrap_or(0).saturating_add(1));
        handler.add_class_cycle(sprite, &self.flicker, "flicker", Some(timing))?;
        Ok(())
    }
}

/// Point-in-time view of the scene.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SceneReport {
    /// Current tick.
    pub tick: u64,
    /// Number of sprites, dead ones included.
    pub sprites: usize,
    /// Number of live sprites.
    pub alive: usize,
    /// Score so far.
    pub score: u64,
    /// Live events in the queue.
    pub pending_events: usize,
}

/// Owns the scheduler and everything it animates.
#[derive(Debug)]
pub struct Scene {
    handler: TimeHandler,
    sprites: Rc<RefCell<Vec<SpriteRef>>>,
    score: Rc<Cell<u64>>,
}

impl Scene {
    /// Build the scene described by `config`.
    ///
    /// # Errors
    ///
    /// Returns [`HostError::Time`] if the scheduler settings are invalid or
    /// a cycle cannot be attached, or [`HostError::Scene`] for an empty
    /// scene.
    pub fn build(config: &TimeHandlrConfig) -> Result<Self, HostError> {
        let host = &config.host;
        if host.things == 0 {
            return Err(HostError::Scene {
                message: "host.things must be at least 1".to_owned(),
            });
        }

        let mut handler = TimeHandler::from_config(&config.scheduler)?;
        let specs = CycleSpecs::new(host.seed, host.blink_period);
        let sprites: Rc<RefCell<Vec<SpriteRef>>> = Rc::new(RefCell::new(Vec::new()));

        for id in 0..host.things {
            let sprite = Sprite::new(id, true);
            specs.attach(&mut handler, &sprite)?;
            sprites.borrow_mut().push(sprite);
        }

        let score = Rc::new(Cell::new(0_u64));
        schedule_spawn(&mut handler, &specs, &sprites, host.things, host.blink_period)?;
        schedule_score(&mut handler, &sprites, &score)?;
        schedule_despawn(&mut handler, &sprites)?;

        info!(
            sprites = host.things,
            blink_period = host.blink_period,
            pending_events = handler.pending_events(),
            "Scene built"
        );
        Ok(Self {
            handler,
            sprites,
            score,
        })
    }

    /// Advance the scene by one frame.
    ///
    /// # Errors
    ///
    /// Returns [`HostError::Time`] if the scheduler cannot step.
    pub fn step(&mut self) -> Result<StepSummary, HostError> {
        Ok(self.handler.step()?)
    }

    /// The scene's scheduler.
    pub const fn handler(&self) -> &TimeHandler {
        &self.handler
    }

    /// Class strings of every sprite, by id.
    pub fn classes(&self) -> Vec<(u32, String)> {
        self.sprites
            .borrow()
            .iter()
            .map(|sprite| {
                let sprite = sprite.borrow();
                (sprite.id, sprite.class_name.clone())
            })
            .collect()
    }

    /// Snapshot of the scene.
    pub fn report(&self) -> SceneReport {
        let sprites = self.sprites.borrow();
        SceneReport {
            tick: self.handler.time(),
            sprites: sprites.len(),
            alive: sprites.iter().filter(|sprite| sprite.borrow().alive).count(),
            score: self.score.get(),
            pending_events: self.handler.pending_events(),
        }
    }
}

/// One-shot: add a late sprite, registered before it is placed.
fn schedule_spawn(
    handler: &mut TimeHandler,
    specs: &CycleSpecs,
    sprites: &Rc<RefCell<Vec<SpriteRef>>>,
    next_id: u32,
    blink_period: u64,
) -> Result<(), HostError> {
    let specs = specs.clone();
    let sprites = Rc::clone(sprites);
    let delay = blink_period.saturating_mul(2).saturating_add(1);
    handler.add_event(
        move |handler: &mut TimeHandler| {
            let sprite = Sprite::new(next_id, false);
            if let Err(err) = specs.attach(handler, &sprite) {
                warn!(error = %err, id = next_id, "Failed to attach cycles to spawned sprite");
                return true;
            }
            sprite.borrow_mut().placed = true;
            match handler.start_pending_cycles(&sprite) {
                Ok(started) => info!(id = next_id, tick = handler.time(), started, "Sprite spawned"),
                Err(err) => warn!(error = %err, id = next_id, "Failed to start spawned sprite"),
            }
            sprites.borrow_mut().push(sprite);
            true
        },
        delay,
    )?;
    Ok(())
}

/// Repeating: add points for every live sprite.
fn schedule_score(
    handler: &mut TimeHandler,
    sprites: &Rc<RefCell<Vec<SpriteRef>>>,
    score: &Rc<Cell<u64>>,
) -> Result<(), HostError> {
    let sprites = Rc::clone(sprites);
    let total = Rc::clone(score);
    handler.add_event_interval(
        move |handler: &mut TimeHandler| {
            let alive = sprites
                .borrow()
                .iter()
                .filter(|sprite| sprite.borrow().alive)
                .count();
            let points = u64::try_from(alive)
                .unwrap_or(u64::MAX)
                .saturating_mul(POINTS_PER_SPRITE);
            total.set(total.get().saturating_add(points));
            debug!(tick = handler.time(), alive, score = total.get(), "Score tick");
            false
        },
        SCORE_INTERVAL,
        Repeat::while_fn(|status| status.count < SCORE_ROUNDS),
    )?;
    Ok(())
}

/// One-shot: the first sprite dies and its cycles wind down on their own.
fn schedule_despawn(
    handler: &mut TimeHandler,
    sprites: &Rc<RefCell<Vec<SpriteRef>>>,
) -> Result<(), HostError> {
    let sprites = Rc::clone(sprites);
    handler.add_event(
        move |handler: &mut TimeHandler| {
            if let Some(sprite) = sprites.borrow().first() {
                let mut sprite = sprite.borrow_mut();
                sprite.alive = false;
                info!(id = sprite.id, tick = handler.time(), "Sprite despawned");
            }
            true
        },
        SCORE_INTERVAL.saturating_mul(5),
    )?;
    Ok(())
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::indexing_slicing,
    clippy::arithmetic_side_effects
)]
mod tests {
    use timehandlr_core::classes::has_class;

    use super::*;

    fn config(things: u32) -> TimeHandlrConfig {
        let mut config = TimeHandlrConfig::default();
        config.host.things = things;
        config.host.blink_period = 4;
        config
    }

    fn run(scene: &mut Scene, frames: u64) {
        for _ in 0..frames {
            scene.step().unwrap();
        }
    }

    #[test]
    fn build_attaches_both_cycles() {
        let scene = Scene::build(&config(3)).unwrap();
        let report = scene.report();
        assert_eq!(report.sprites, 3);
        assert_eq!(report.alive, 3);
        for sprite in scene.sprites.borrow().iter() {
            let sprite = sprite.borrow();
            assert_eq!(sprite.cycles.len(), 2);
            assert!(has_class(&sprite.class_name, "blink-on"));
        }
    }

    #[test]
    fn empty_scene_is_rejected() {
        assert!(matches!(
            Scene::build(&config(0)),
            Err(HostError::Scene { .. })
        ));
    }

    #[test]
    fn invalid_scheduler_config_is_reported() {
        let mut config = config(1);
        config.scheduler.default_delay = 0;
        assert!(matches!(Scene::build(&config), Err(HostError::Time { .. })));
    }

    #[test]
    fn spawned_sprite_blinks_with_the_others() {
        let mut scene = Scene::build(&config(2)).unwrap();
        // Spawn lands on tick 9; its blink series starts on tick 12.
        run(&mut scene, 9);
        assert_eq!(scene.report().sprites, 3);
        run(&mut scene, 4);
        let blink = |class_name: &str| has_class(class_name, "blink-on");
        let states: Vec<bool> = scene
            .classes()
            .iter()
            .map(|(_, class_name)| blink(class_name))
            .collect();
        assert!(states.iter().all(|on| *on == states[0]), "{states:?}");
    }

    #[test]
    fn score_counts_live_sprites() {
        let mut scene = Scene::build(&config(2)).unwrap();
        // The spawned sprite (tick 9) is already there for the first round.
        run(&mut scene, SCORE_INTERVAL);
        assert_eq!(scene.report().score, 3 * POINTS_PER_SPRITE);
    }

    #[test]
    fn despawned_sprite_stops_cycling() {
        let mut scene = Scene::build(&config(1)).unwrap();
        run(&mut scene, SCORE_INTERVAL * 5);
        let frozen = scene.classes()[0].1.clone();
        assert_eq!(scene.report().alive, 1);
        run(&mut scene, 20);
        assert_eq!(scene.classes()[0].1, frozen);
    }

    #[test]
    fn same_seed_same_scene() {
        let mut first = Scene::build(&config(2)).unwrap();
        let mut second = Scene::build(&config(2)).unwrap();
        for _ in 0..40 {
            first.step().unwrap();
            second.step().unwrap();
            assert_eq!(first.classes(), second.classes());
        }
    }
}
