// End to end transport scenarios through uniform and layered media.

use lepton_mc::coulomb::ScreenedCoulomb;
use lepton_mc::tables::builder::standard_rock;
use lepton_mc::{
    register_model, DecayMode, DifferentialCrossSection, Direction, EnergyLossMode, Event, FrameRecorder, Layer,
    LayeredMedium, Locals, Location, Medium, ModelSelection, Particle, ParticleState, PhysicsTables, RandomSource,
    Recorder, ScatteringMode, Scheme, SimulationContext, StepHint, TableBuilder, UniformMedium,
};
use rand::SeedableRng;
use rand_distr::{Distribution, UnitSphere};
use std::cell::RefCell;
use std::rc::Rc;
use std::sync::Arc;

const ROCK_DENSITY: f64 = 2.65e3;

fn rock_tables() -> Arc<PhysicsTables> {
    Arc::new(standard_rock(Particle::muon()).unwrap())
}

fn deterministic(tables: Arc<PhysicsTables>) -> SimulationContext {
    let mut context = SimulationContext::new(tables).with_random(RandomSource::none());
    context.config.energy_loss = EnergyLossMode::Csda;
    context.config.scattering = ScatteringMode::Disabled;
    context.config.decay = DecayMode::Disabled;
    context
}

/// Shares a frame recorder with the test after the context took ownership.
struct Shared(Rc<RefCell<FrameRecorder>>);

impl Recorder for Shared {
    fn record(&mut self, state: &ParticleState, medium: Option<usize>, event: Event) {
        self.0.borrow_mut().record(state, medium, event);
    }

    fn period(&self) -> usize {
        self.0.borrow().period()
    }
}

/// Uniform rock answering with a short exact step everywhere.
struct Chopped;

impl Medium for Chopped {
    fn locate(&mut self, _state: &ParticleState) -> Location {
        Location {
            material: Some(0),
            step: StepHint::Exact(1e-3),
        }
    }

    fn locals(&mut self, _material: usize, _state: &ParticleState) -> Locals {
        Locals::uniform(ROCK_DENSITY)
    }
}

#[test]
fn test_forward_then_backward_returns_to_start() {
    let tables = rock_tables();
    let mut context = deterministic(tables);
    let mut medium = UniformMedium::new(0, ROCK_DENSITY);
    let mut state = ParticleState::new(-1.0, 10.0, [1.0, 2.0, 3.0], [0.0, 0.6, 0.8]);

    context.config.limits.distance = Some(2.0);
    let outcome = context.transport(&mut state, &mut medium).unwrap();
    assert_eq!(outcome.event, Event::LIMIT_DISTANCE);
    assert!(state.kinetic < 10.0);

    context.config.direction = Direction::Backward;
    context.config.limits.distance = Some(4.0);
    let outcome = context.transport(&mut state, &mut medium).unwrap();
    assert_eq!(outcome.event, Event::LIMIT_DISTANCE);
    assert!((state.kinetic - 10.0).abs() < 1e-6, "K = {}", state.kinetic);
    let start = nalgebra::Vector3::new(1.0, 2.0, 3.0);
    assert!((state.position - start).norm() < 1e-9);
    assert_eq!(state.direction, nalgebra::Vector3::new(0.0, 0.6, 0.8));
}

#[test]
fn test_stepping_terminates_with_a_bounded_step_count() {
    let mut context = SimulationContext::new(rock_tables()).with_random(RandomSource::seeded(3));
    context.config.limits.distance = Some(1.0);
    let frames = Rc::new(RefCell::new(FrameRecorder::new(1)));
    context.recorder = Some(Box::new(Shared(Rc::clone(&frames))));

    let mut state = ParticleState::new(-1.0, 10.0, [0.0; 3], [0.0, 0.0, 1.0]);
    let outcome = context.transport(&mut state, &mut Chopped).unwrap();
    assert_eq!(outcome.event, Event::LIMIT_DISTANCE);
    assert_eq!(outcome.media, [Some(0), Some(0)]);
    assert_eq!(state.distance, 1.0);

    let frames = frames.borrow();
    let n = frames.frames.len();
    assert!(n > 500 && n < 2000, "{} frames", n);
    assert_eq!(frames.frames[0].event, Event::START);
    assert_eq!(frames.frames[n - 1].event, Event::LIMIT_DISTANCE | Event::STOP);
    for pair in frames.frames.windows(2) {
        assert!(pair[1].state.distance >= pair[0].state.distance);
        assert!(pair[1].state.kinetic <= pair[0].state.kinetic);
    }
}

#[test]
fn test_soft_scattering_mean_deflection() {
    let tables = rock_tables();
    let mut context = SimulationContext::new(Arc::clone(&tables)).with_random(RandomSource::seeded(11));
    context.config.energy_loss = EnergyLossMode::Csda;
    context.config.scattering = ScatteringMode::Soft;
    context.config.decay = DecayMode::Disabled;
    let grammage = 10.0;
    context.config.limits.distance = Some(grammage / ROCK_DENSITY);
    let mut medium = UniformMedium::new(0, ROCK_DENSITY);

    let view = tables.view(0, Scheme::Csda);
    let expected = grammage * view.transport_inverse(None, 10.0, false);

    let mut rng = rand::rngs::StdRng::seed_from_u64(5);
    let n = 20_000;
    let mut sum = 0.0;
    for _ in 0..n {
        let u: [f64; 3] = UnitSphere.sample(&mut rng);
        let mut state = ParticleState::new(-1.0, 10.0, [0.0; 3], u);
        let outcome = context.transport(&mut state, &mut medium).unwrap();
        assert_eq!(outcome.event, Event::LIMIT_DISTANCE);
        let u0 = nalgebra::Vector3::from(u);
        sum += 1.0 - state.direction.dot(&u0);
    }
    let mean = sum / n as f64;
    assert!((mean - expected).abs() < 0.05 * expected, "mean = {}, expected = {}", mean, expected);
}

fn rock_and_water() -> Arc<PhysicsTables> {
    let mut builder = TableBuilder::new(Particle::muon());
    builder.add_material("StandardRock", ROCK_DENSITY, &[("Rk", 1.0)]).unwrap();
    builder
        .add_material("Water", 1e3, &[("H", 0.111894), ("O", 0.888106)])
        .unwrap();
    Arc::new(builder.build().unwrap())
}

fn rock_over_water() -> LayeredMedium {
    let layers = vec![
        Layer {
            material: 0,
            density: ROCK_DENSITY,
            top: 10.0,
        },
        Layer {
            material: 1,
            density: 1e3,
            top: 20.0,
        },
    ];
    LayeredMedium::new([0.0, 0.0, 1.0], 0.0, layers).unwrap()
}

#[test]
fn test_layers_are_crossed_until_the_geometry_is_left() {
    let mut context = deterministic(rock_and_water());
    let frames = Rc::new(RefCell::new(FrameRecorder::new(0)));
    context.recorder = Some(Box::new(Shared(Rc::clone(&frames))));

    let mut medium = rock_over_water();
    let mut state = ParticleState::new(-1.0, 100.0, [0.0, 0.0, 5.0], [0.0, 0.0, 1.0]);
    let outcome = context.transport(&mut state, &mut medium).unwrap();

    assert_eq!(outcome.event, Event::MEDIUM);
    assert_eq!(outcome.media, [Some(0), None]);
    assert!((state.position.z - 20.0).abs() < 1e-5, "z = {}", state.position.z);
    let expected = 5.0 * ROCK_DENSITY + 10.0 * 1e3;
    assert!((state.grammage - expected).abs() < 1e-3 * expected);

    let frames = frames.borrow();
    let media: Vec<_> = frames
        .frames
        .iter()
        .filter(|frame| frame.event == Event::MEDIUM)
        .map(|frame| frame.medium)
        .collect();
    assert_eq!(media, vec![Some(1)]);
}

#[test]
fn test_medium_change_stops_when_requested() {
    let mut context = deterministic(rock_and_water());
    context.config.events = Event::MEDIUM;
    let mut medium = rock_over_water();
    let mut state = ParticleState::new(-1.0, 100.0, [0.0, 0.0, 5.0], [0.0, 0.0, 1.0]);
    let outcome = context.transport(&mut state, &mut medium).unwrap();
    assert_eq!(outcome.event, Event::MEDIUM);
    assert_eq!(outcome.media, [Some(0), Some(1)]);
    assert!(state.position.z >= 10.0 && state.position.z < 10.0 + 1e-5, "z = {}", state.position.z);
}

#[test]
fn test_slabs_of_one_material_use_their_own_density() {
    let layers = vec![
        Layer {
            material: 0,
            density: ROCK_DENSITY,
            top: 10.0,
        },
        Layer {
            material: 0,
            density: 1e3,
            top: 20.0,
        },
    ];
    let mut medium = LayeredMedium::new([0.0, 0.0, 1.0], 0.0, layers).unwrap();
    let mut context = deterministic(rock_tables());
    let mut state = ParticleState::new(-1.0, 100.0, [0.0, 0.0, 5.0], [0.0, 0.0, 1.0]);
    let outcome = context.transport(&mut state, &mut medium).unwrap();

    assert_eq!(outcome.event, Event::MEDIUM);
    assert_eq!(outcome.media, [Some(0), None]);
    assert!((state.position.z - 20.0).abs() < 1e-5, "z = {}", state.position.z);
    let expected = 5.0 * ROCK_DENSITY + 10.0 * 1e3;
    assert!((state.grammage - expected).abs() < 1e-3 * expected, "X = {}", state.grammage);
}

/// Rock below z = 10, water above, with an oracle that only caps steps at
/// 1 m and leaves the crossing to be found from the end points of steps.
struct Coarse;

impl Medium for Coarse {
    fn locate(&mut self, state: &ParticleState) -> Location {
        Location {
            material: Some(if state.position.z < 10.0 { 0 } else { 1 }),
            step: StepHint::Approximate(1.0),
        }
    }

    fn locals(&mut self, material: usize, _state: &ParticleState) -> Locals {
        Locals::uniform(if material == 0 { ROCK_DENSITY } else { 1e3 })
    }
}

#[test]
fn test_crossings_are_localised_only_when_requested() {
    let tables = rock_and_water();
    let crossing = |exact: bool| {
        let mut context = deterministic(Arc::clone(&tables));
        context.config.events = Event::MEDIUM;
        context.config.exact_localisation = exact;
        let mut state = ParticleState::new(-1.0, 100.0, [0.0, 0.0, 5.3], [0.0, 0.0, 1.0]);
        let outcome = context.transport(&mut state, &mut Coarse).unwrap();
        assert_eq!(outcome.event, Event::MEDIUM);
        assert_eq!(outcome.media, [Some(0), Some(1)]);
        state.position.z
    };
    let exact = crossing(true);
    assert!(exact >= 10.0 && exact < 10.0 + 1e-5, "z = {}", exact);
    let coarse = crossing(false);
    assert!(coarse > 10.0 + 1e-3 && coarse <= 11.0, "z = {}", coarse);
}

#[test]
fn test_grammage_limit_is_met_exactly() {
    let mut context = deterministic(rock_tables());
    context.config.limits.grammage = Some(1234.5);
    // Closed form through the uniform medium, stepping through the chopped one.
    let media: [&mut dyn Medium; 2] = [&mut UniformMedium::new(0, ROCK_DENSITY), &mut Chopped];
    let mut energies = Vec::new();
    for medium in media {
        let mut state = ParticleState::new(-1.0, 10.0, [0.0; 3], [0.0, 0.0, 1.0]);
        let outcome = context.transport(&mut state, medium).unwrap();
        assert_eq!(outcome.event, Event::LIMIT_GRAMMAGE);
        assert_eq!(state.grammage, 1234.5);
        assert!((state.distance - 1234.5 / ROCK_DENSITY).abs() < 1e-9, "d = {}", state.distance);
        assert!(state.kinetic < 10.0);
        energies.push(state.kinetic);
    }
    assert!((energies[0] - energies[1]).abs() < 1e-4 * energies[0], "{:?}", energies);
}

#[test]
fn test_hard_elastic_vertices_are_recorded_and_stop_the_track() {
    let tables = rock_tables();
    let mut context = SimulationContext::new(Arc::clone(&tables)).with_random(RandomSource::seeded(19));
    context.config.energy_loss = EnergyLossMode::Csda;
    context.config.scattering = ScatteringMode::Mixed;
    context.config.decay = DecayMode::Disabled;
    context.config.events = Event::VERTEX_COULOMB;
    context.config.record_vertices = true;
    let frames = Rc::new(RefCell::new(FrameRecorder::new(0)));
    context.recorder = Some(Box::new(Shared(Rc::clone(&frames))));

    let view = tables.view(0, Scheme::Csda);
    let element = &tables.elements()[tables.materials()[0].components[0].element];
    let mass = tables.particle().mass;
    let mut medium = UniformMedium::new(0, ROCK_DENSITY);
    for _ in 0..200 {
        frames.borrow_mut().clear();
        let mut state = ParticleState::new(-1.0, 10.0, [0.0; 3], [0.0, 0.0, 1.0]);
        let outcome = context.transport(&mut state, &mut medium).unwrap();
        assert_eq!(outcome.event, Event::VERTEX_COULOMB);

        let recorded = frames.borrow();
        let events: Vec<_> = recorded.frames.iter().map(|frame| frame.event).collect();
        assert_eq!(
            events,
            vec![
                Event::START,
                Event::VERTEX_COULOMB,
                Event::VERTEX_COULOMB,
                Event::VERTEX_COULOMB | Event::STOP
            ]
        );
        let (before, after) = (&recorded.frames[1].state, &recorded.frames[2].state);
        assert_eq!(before.position, after.position);
        assert_eq!(before.kinetic, after.kinetic);

        // sin²(θ/2) of the deflection, above the tabulated cutoff.
        let mu = 0.25 * (after.direction - before.direction).norm_squared();
        let cutoff = view.elastic_cutoff(before.kinetic);
        let floor = ScreenedCoulomb::new(element, mass, before.kinetic).to_lab(cutoff);
        assert!(mu >= floor * (1.0 - 1e-6) - 1e-15, "mu = {}, floor = {}", mu, floor);
    }
}

#[test]
fn test_discrete_vertices_are_recorded_and_stop_the_track() {
    let tables = rock_tables();
    let mut context = SimulationContext::new(Arc::clone(&tables)).with_random(RandomSource::seeded(23));
    context.config.energy_loss = EnergyLossMode::Mixed;
    context.config.scattering = ScatteringMode::Disabled;
    context.config.decay = DecayMode::Disabled;
    context.config.events = Event::VERTEX_DEL;
    context.config.record_vertices = true;
    let frames = Rc::new(RefCell::new(FrameRecorder::new(0)));
    context.recorder = Some(Box::new(Shared(Rc::clone(&frames))));

    let mut medium = UniformMedium::new(0, ROCK_DENSITY);
    for _ in 0..200 {
        frames.borrow_mut().clear();
        let mut state = ParticleState::new(-1.0, 100.0, [0.0; 3], [0.0, 0.0, 1.0]);
        let outcome = context.transport(&mut state, &mut medium).unwrap();
        let event = outcome.event;
        assert!(!event.is_empty() && Event::VERTEX_DEL.contains(event), "{:?}", event);

        let recorded = frames.borrow();
        let events: Vec<_> = recorded.frames.iter().map(|frame| frame.event).collect();
        assert_eq!(events, vec![Event::START, event, event, event | Event::STOP]);
        let (before, after) = (&recorded.frames[1].state, &recorded.frames[2].state);
        assert_eq!(before.position, after.position);
        assert_eq!(before.direction, after.direction);
        let transfer = before.kinetic - after.kinetic;
        assert!(
            transfer >= tables.cutoff() * before.kinetic * (1.0 - 1e-9),
            "{} GeV lost at {} GeV",
            transfer,
            before.kinetic
        );
    }
}

#[test]
fn test_randomised_decay_stops_the_track() {
    let tables = Arc::new(standard_rock(Particle::tau()).unwrap());
    let mut context = SimulationContext::new(tables).with_random(RandomSource::seeded(7));
    context.config.energy_loss = EnergyLossMode::Csda;
    context.config.scattering = ScatteringMode::Disabled;
    context.config.decay = DecayMode::Randomise;
    let mut medium = UniformMedium::new(0, ROCK_DENSITY);
    let mut state = ParticleState::new(-1.0, 10.0, [0.0; 3], [0.0, 0.0, 1.0]);
    let outcome = context.transport(&mut state, &mut medium).unwrap();
    assert_eq!(outcome.event, Event::VERTEX_DECAY);
    assert!(state.decayed);
    let lifetime = context.lifetime().unwrap();
    assert!((state.time - lifetime).abs() <= 1e-9 * lifetime);
    assert!(state.distance > 0.0);
}

#[test]
fn test_decay_weight_follows_proper_time() {
    let mut context = deterministic(rock_tables());
    context.config.decay = DecayMode::Weight;
    context.config.limits.distance = Some(5.0);
    let mut medium = UniformMedium::new(0, ROCK_DENSITY);
    let mut state = ParticleState::new(-1.0, 1.0, [0.0; 3], [1.0, 0.0, 0.0]);
    context.transport(&mut state, &mut medium).unwrap();
    let ctau = Particle::muon().ctau;
    let expected = (-state.time / ctau).exp();
    assert!(state.weight < 1.0);
    assert!((state.weight - expected).abs() < 1e-12);
}

#[test]
fn test_time_limit_is_met_exactly() {
    let mut context = deterministic(rock_tables());
    context.config.limits.time = Some(0.05);
    let mut medium = UniformMedium::new(0, ROCK_DENSITY);
    let mut state = ParticleState::new(-1.0, 10.0, [0.0; 3], [0.0, 0.0, 1.0]);
    let outcome = context.transport(&mut state, &mut medium).unwrap();
    assert_eq!(outcome.event, Event::LIMIT_TIME);
    assert_eq!(state.time, 0.05);
    // The distance is at least c·τ times the final βγ.
    assert!(state.distance > 0.05 * state.kinetic / Particle::muon().mass);
}

struct Null;

impl DifferentialCrossSection for Null {
    fn dcs(&self, _element: &lepton_mc::tables::Element, _mass: f64, _kinetic: f64, _transfer: f64) -> f64 {
        0.0
    }
}

#[test]
fn test_backward_vertex_without_transition_kills_the_track() {
    let mut tables = standard_rock(Particle::muon()).unwrap();
    register_model("null", Arc::new(Null)).unwrap();
    tables
        .set_models(ModelSelection {
            bremsstrahlung: "null".to_string(),
            pair_production: "null".to_string(),
            photonuclear: "null".to_string(),
            ionisation: "null".to_string(),
        })
        .unwrap();
    let mut context = SimulationContext::new(Arc::new(tables)).with_random(RandomSource::seeded(1));
    context.config.energy_loss = EnergyLossMode::Mixed;
    context.config.scattering = ScatteringMode::Disabled;
    context.config.decay = DecayMode::Disabled;
    context.config.direction = Direction::Backward;
    let mut medium = UniformMedium::new(0, ROCK_DENSITY);
    let mut state = ParticleState::new(-1.0, 1.0, [0.0; 3], [0.0, 0.0, 1.0]);
    let outcome = context.transport(&mut state, &mut medium).unwrap();
    assert_eq!(outcome.event, Event::WEIGHT);
    assert_eq!(state.weight, 0.0);
}

#[test]
fn test_straggled_energy_loss_is_unbiased() {
    let tables = rock_tables();
    let mut deterministic = deterministic(Arc::clone(&tables));
    deterministic.config.limits.distance = Some(1.0);
    let mut medium = UniformMedium::new(0, ROCK_DENSITY);
    let mut reference = ParticleState::new(-1.0, 1.0, [0.0; 3], [0.0, 0.0, 1.0]);
    deterministic.transport(&mut reference, &mut medium).unwrap();

    let mut context = SimulationContext::new(tables).with_random(RandomSource::seeded(13));
    context.config.energy_loss = EnergyLossMode::Straggled;
    context.config.scattering = ScatteringMode::Disabled;
    context.config.decay = DecayMode::Disabled;
    context.config.limits.distance = Some(1.0);
    let n = 2_000;
    let mut sum = 0.0;
    for _ in 0..n {
        let mut state = ParticleState::new(-1.0, 1.0, [0.0; 3], [0.0, 0.0, 1.0]);
        context.transport(&mut state, &mut medium).unwrap();
        sum += 1.0 - state.kinetic;
    }
    let mean = sum / n as f64;
    let expected = 1.0 - reference.kinetic;
    // Discrete losses are excluded from the restricted loss, hence the broad
    // tolerance.
    assert!(mean > 0.5 * expected && mean < 1.5 * expected, "mean = {}, csda = {}", mean, expected);
}
