// Transport state machine.
//
// A track runs step after step until a stopping event. Media changes refresh
// the local properties, foreseen vertices are executed and the plan redrawn.
// Uniform unbounded media without scattering nor discrete losses are crossed
// in one go with the closed form of the continuous slowing down.
use crate::config::{DecayMode, Direction, EnergyLossMode, ScatteringMode, TransportConfig};
use crate::constants::{DIRECTION_TOLERANCE, LARMOR_FACTOR};
use crate::context::{Outcome, SimulationContext};
use crate::del::{self, Reverse};
use crate::error::{Result, TransportError};
use crate::event::Event;
use crate::interpolation::IndexCache;
use crate::medium::{Locals, Medium, StepHint};
use crate::particle::ParticleState;
use crate::physics::{decompose, rotate_about, rotate_direction};
use crate::planner::{self, Plan};
use crate::quantities::MaterialView;
use crate::random::RandomSource;
use crate::recorder::Recorder;
use crate::stepper;
use crate::tables::{PhysicsTables, Scheme};
use std::sync::Arc;

/// Settings shared by the planner and the stepper along one track.
#[derive(Debug, Clone, Copy)]
pub struct Track<'t> {
    pub tables: &'t PhysicsTables,
    pub config: &'t TransportConfig,
    /// +1 forward, -1 backward.
    pub sign: f64,
    pub scheme: Scheme,
    /// Proper time (m) at which the particle decays, when randomised.
    pub lifetime: Option<f64>,
}

impl<'t> Track<'t> {
    pub fn new(tables: &'t PhysicsTables, config: &'t TransportConfig, lifetime: Option<f64>) -> Self {
        Self {
            tables,
            config,
            sign: config.direction.sign(),
            scheme: config.energy_loss.scheme(),
            lifetime,
        }
    }

    pub fn view(&self, material: usize) -> MaterialView<'t> {
        self.tables.view(material, self.scheme)
    }

    fn forward(&self) -> bool {
        self.config.direction == Direction::Forward
    }

    /// True when `kinetic` is at or beyond the energy bound of the track.
    fn out_of_range(&self, kinetic: f64) -> bool {
        let limit = self.config.limits.energy;
        if self.forward() {
            kinetic <= limit.unwrap_or(0.0).max(self.tables.energy_min())
        } else {
            kinetic >= limit.unwrap_or(self.tables.energy_max())
        }
    }
}

fn validate_state(state: &ParticleState) -> Result<()> {
    let norm2 = state.direction.norm_squared();
    if !((norm2 - 1.0).abs() <= DIRECTION_TOLERANCE) {
        return Err(TransportError::direction(format!(
            "direction {:?} is not a unit vector",
            state.direction
        )));
    }
    if !(state.kinetic.is_finite() && state.kinetic > 0.0) {
        return Err(TransportError::value(format!("invalid kinetic energy {}", state.kinetic)));
    }
    if state.position.iter().any(|x| !x.is_finite()) {
        return Err(TransportError::value(format!("invalid position {:?}", state.position)));
    }
    Ok(())
}

fn record(recorder: &mut Option<Box<dyn Recorder>>, state: &ParticleState, material: Option<usize>, event: Event) {
    if let Some(recorder) = recorder.as_mut() {
        recorder.record(state, material, event);
    }
}

fn fetch_locals(
    tables: &PhysicsTables,
    medium: &mut dyn Medium,
    material: usize,
    state: &ParticleState,
) -> Result<Locals> {
    tables.material(material)?;
    let locals = medium.locals(material, state);
    locals.validate()?;
    Ok(locals)
}

/// Run one track. Errors may leave the state partially updated, the caller
/// restores it.
pub fn transport(context: &mut SimulationContext, state: &mut ParticleState, medium: &mut dyn Medium) -> Result<Outcome> {
    let tables = Arc::clone(&context.tables);
    let particle = tables.particle();
    context
        .config
        .validate(particle, context.random.is_available())?;
    validate_state(state)?;

    let SimulationContext {
        config,
        random,
        recorder,
        cache,
        workspace,
        lifetime,
        ..
    } = context;
    cache.clear();
    if workspace.capacity() < tables.max_elements() {
        *workspace = crate::coulomb::CoulombWorkspace::with_capacity(tables.max_elements());
    }
    *lifetime = match config.decay {
        DecayMode::Randomise => Some(state.time + particle.ctau * random.exponential()),
        DecayMode::Disabled | DecayMode::Weight => None,
    };
    let track = Track::new(&tables, &*config, *lifetime);

    let mut location = medium.locate(state);
    let start = location.material;
    let mut material = match start {
        Some(material) => material,
        None => {
            log::trace!("track starts outside of the geometry");
            return Ok(Outcome {
                event: Event::MEDIUM,
                media: [None, None],
            });
        }
    };
    let mut locals = fetch_locals(&tables, medium, material, state)?;
    log::trace!(
        "{} track starts in medium {} with K = {:.6e} GeV",
        particle.name,
        material,
        state.kinetic
    );
    record(recorder, state, start, Event::START);

    let closed_form = track.config.energy_loss == EnergyLossMode::Csda
        && track.config.scattering == ScatteringMode::Disabled
        && location.step == StepHint::Unbounded
        && locals.step.is_none();

    let (event, end) = if closed_form {
        let event = csda(&track, material, &locals, state, cache);
        let end = medium.locate(state).material;
        (event, end)
    } else {
        let mut plan = planner::plan(&track, material, state, cache, random);
        let period = recorder.as_ref().map_or(0, |r| r.period());
        let mut steps: usize = 0;
        let event = loop {
            let (event, found) = stepper::step(
                &track,
                &plan,
                material,
                &locals,
                location.step,
                state,
                medium,
                cache,
                random,
            );
            location = found;
            steps += 1;

            // Locals bounded in length are refreshed at the end of every step
            // still within the medium.
            if locals.step.is_some() && !event.intersects(Event::LIMIT | Event::MEDIUM) {
                locals = fetch_locals(&tables, medium, material, state)?;
            }
            if event.is_empty() {
                if period > 0 && steps % period == 0 {
                    record(recorder, state, Some(material), Event::NONE);
                }
                continue;
            }
            if event.intersects(Event::LIMIT) {
                break event;
            }
            if event.intersects(Event::MEDIUM) {
                material = match location.material {
                    Some(material) => material,
                    None => break Event::MEDIUM,
                };
                locals = fetch_locals(&tables, medium, material, state)?;
                record(recorder, state, Some(material), Event::MEDIUM);
                if track.config.events.contains(Event::MEDIUM) {
                    break Event::MEDIUM;
                }
                plan = planner::plan(&track, material, state, cache, random);
                continue;
            }
            if event.contains(Event::VERTEX_DECAY) {
                state.decayed = true;
                break Event::VERTEX_DECAY;
            }

            let vertex = if event.intersects(Event::VERTEX_DEL) {
                match discrete_loss(&track, material, state, cache, random, recorder) {
                    Ok(vertex) => vertex,
                    Err(dead) => break dead,
                }
            } else if event.contains(Event::VERTEX_COULOMB) {
                let view = track.view(material);
                let mu0 = view.elastic_cutoff(state.kinetic);
                let scatter = workspace.sample(
                    tables.elements(),
                    view.material,
                    particle.mass,
                    state.kinetic,
                    mu0,
                    random,
                );
                match scatter {
                    Some(scatter) => {
                        if track.config.record_vertices {
                            record(recorder, state, Some(material), Event::VERTEX_COULOMB);
                        }
                        let phi = 2.0 * std::f64::consts::PI * random.uniform();
                        state.direction = rotate_direction(&state.direction, 1.0 - 2.0 * scatter.mu_lab, phi);
                        if track.config.record_vertices {
                            record(recorder, state, Some(material), Event::VERTEX_COULOMB);
                        }
                        Event::VERTEX_COULOMB
                    }
                    None => Event::NONE,
                }
            } else {
                Event::NONE
            };

            if track.config.events.intersects(vertex) {
                break vertex;
            }
            if track.out_of_range(state.kinetic) {
                break Event::LIMIT_ENERGY;
            }
            plan = planner::plan(&track, material, state, cache, random);
        };
        let end = match event {
            Event::MEDIUM => location.material,
            _ => Some(material),
        };
        (event, end)
    };

    record(recorder, state, end, event | Event::STOP);
    log::trace!(
        "track stopped on {:?} after {:.6e} m, K = {:.6e} GeV",
        event,
        state.distance,
        state.kinetic
    );
    Ok(Outcome {
        event,
        media: [start, end],
    })
}

/// Execute a foreseen discrete loss. Returns the vertex event, `Event::NONE`
/// when nothing happened, or `Err(Event::WEIGHT)` when a backward vertex
/// killed the track.
fn discrete_loss(
    track: &Track,
    material: usize,
    state: &mut ParticleState,
    cache: &mut IndexCache,
    random: &mut RandomSource,
    recorder: &mut Option<Box<dyn Recorder>>,
) -> std::result::Result<Event, Event> {
    let tables = track.tables;
    let record_vertices = track.config.record_vertices;
    let deflect = track.config.scattering == ScatteringMode::Mixed;
    if track.forward() {
        let vertex = match del::sample_forward(tables, material, state.kinetic, Some(cache), random) {
            Some(vertex) => vertex,
            None => return Ok(Event::NONE),
        };
        let event = vertex.process.event();
        if record_vertices {
            record(recorder, state, Some(material), event);
        }
        state.kinetic = (state.kinetic - vertex.transfer).max(0.0);
        if deflect {
            del::deflect(tables, &vertex, &mut state.direction, random);
        }
        if record_vertices {
            record(recorder, state, Some(material), event);
        }
        Ok(event)
    } else {
        match del::sample_backward(tables, material, state.kinetic, Some(cache), random) {
            Reverse::Continuous => Ok(Event::NONE),
            Reverse::Vertex { vertex, weight } => {
                let event = vertex.process.event();
                if record_vertices {
                    record(recorder, state, Some(material), event);
                }
                if !(weight > 0.0) {
                    state.weight = 0.0;
                    return Err(Event::WEIGHT);
                }
                state.kinetic = vertex.kinetic;
                state.weight *= weight;
                if deflect {
                    del::deflect(tables, &vertex, &mut state.direction, random);
                }
                if record_vertices {
                    record(recorder, state, Some(material), event);
                }
                Ok(event)
            }
        }
    }
}

/// Cross a uniform unbounded medium in a single continuous slowing down
/// step, bending analytically in the magnetic field.
fn csda(track: &Track, material: usize, locals: &Locals, state: &mut ParticleState, cache: &mut IndexCache) -> Event {
    let view = track.view(material);
    let sign = track.sign;
    let forward = sign > 0.0;
    let density = locals.density;
    let k0 = state.kinetic;

    // Nearest stopping condition, in grammage.
    let plan: Plan = planner::plan(track, material, state, cache, &mut RandomSource::none());
    let mut grammage = (plan.grammage_max - state.grammage).max(0.0);
    let mut event = plan.event;
    let mut time = None;
    if let Some(limit) = track.config.limits.distance {
        let x = (limit - state.distance).max(0.0) * density;
        if x < grammage {
            grammage = x;
            event = Event::LIMIT_DISTANCE;
        }
    }
    if let Some((length, limit_event, tau)) = stepper::time_budget(track, &view, state, density, cache) {
        let x = length * density;
        if x < grammage {
            grammage = x;
            event = limit_event;
            time = Some(tau);
        }
    }

    let x0 = view.grammage(Some(&mut *cache), k0);
    let k1 = if event == Event::LIMIT_ENERGY {
        plan.energy
    } else {
        let x1 = x0 - sign * grammage;
        if x1 <= 0.0 {
            view.energy_min()
        } else {
            view.kinetic_from_grammage(Some(&mut *cache), x1)
        }
    };
    let length = grammage / density;

    // Displacement and final direction.
    let u0 = state.direction;
    let field = locals.magnetic.norm();
    let (displacement, direction) = if field > 0.0 {
        let axis = locals.magnetic / field;
        let (parallel, transverse) = decompose(&u0, &axis);
        let c = -sign * state.charge * LARMOR_FACTOR * field / density;
        let (k_lo, k_hi) = if forward { (k1, k0) } else { (k0, k1) };
        let lambda0 = view.larmor(Some(&mut *cache), k0);
        let lambda1 = view.larmor(Some(&mut *cache), k1);
        // ∫ Aⁿ dX with A the accumulated Larmor integral, from the moments
        // of Λ.
        let mut integrals = [0.0; 4];
        let mut moments = [0.0; 4];
        for (j, moment) in moments.iter_mut().enumerate() {
            *moment = view.moment(Some(&mut *cache), j, k_hi) - view.moment(Some(&mut *cache), j, k_lo);
        }
        for (n, integral) in integrals.iter_mut().enumerate().skip(1) {
            let mut j_n = 0.0;
            for (j, moment) in moments.iter().enumerate().take(n + 1) {
                j_n += binomial(n, j) * (-lambda0).powi((n - j) as i32) * moment;
            }
            *integral = if forward && n % 2 == 1 { -j_n } else { j_n };
        }
        let i = |n: usize| c.powi(n as i32) * integrals[n] / density;
        let width = transverse.norm();
        let displacement = if width > 0.0 {
            let e1 = transverse / width;
            let e2 = axis.cross(&e1);
            parallel * length + width * ((length - 0.5 * i(2)) * e1 + (i(1) - i(3) / 6.0) * e2)
        } else {
            parallel * length
        };
        let angle = c * if forward { lambda0 - lambda1 } else { lambda1 - lambda0 };
        (displacement, rotate_about(&u0, &axis, angle).normalize())
    } else {
        (u0 * length, u0)
    };

    // Proper time and weights.
    let dtime = match time {
        Some(tau) => tau - state.time,
        None => (view.proper_time(Some(&mut *cache), k0) - view.proper_time(Some(&mut *cache), k1)).abs() / density,
    };
    if track.config.decay == DecayMode::Weight {
        state.weight *= (-dtime / track.tables.particle().ctau).exp();
    }
    if !forward {
        let s0 = view.energy_loss(Some(&mut *cache), k0);
        if s0 > 0.0 {
            state.weight *= view.energy_loss(Some(&mut *cache), k1) / s0;
        }
    }

    state.position += sign * displacement;
    state.direction = direction;
    state.kinetic = k1;
    state.distance += length;
    state.grammage += grammage;
    state.time += dtime;
    match event {
        Event::LIMIT_DISTANCE => {
            if let Some(limit) = track.config.limits.distance {
                state.distance = limit;
            }
        }
        Event::LIMIT_GRAMMAGE | Event::LIMIT_ENERGY => state.grammage = plan.grammage_max,
        Event::VERTEX_DECAY => state.decayed = true,
        _ => {}
    }
    event
}

fn binomial(n: usize, k: usize) -> f64 {
    (0..k).fold(1.0, |acc, i| acc * (n - i) as f64 / (i + 1) as f64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::medium::UniformMedium;
    use crate::particle::Particle;
    use crate::tables::builder::standard_rock;

    fn csda_context() -> SimulationContext {
        let tables = Arc::new(standard_rock(Particle::muon()).unwrap());
        let mut context = SimulationContext::new(tables).with_random(RandomSource::none());
        context.config.energy_loss = EnergyLossMode::Csda;
        context.config.scattering = ScatteringMode::Disabled;
        context.config.decay = DecayMode::Disabled;
        context
    }

    #[test]
    fn test_binomial() {
        assert_eq!(binomial(3, 0), 1.0);
        assert_eq!(binomial(3, 1), 3.0);
        assert_eq!(binomial(3, 2), 3.0);
        assert_eq!(binomial(3, 3), 1.0);
    }

    #[test]
    fn test_csda_range_to_energy_limit() {
        let mut context = csda_context();
        context.config.limits.energy = Some(1.0);
        let mut state = ParticleState::new(-1.0, 10.0, [0.0; 3], [0.0, 0.0, 1.0]);
        let mut medium = UniformMedium::new(0, 2.65e3);
        let outcome = context.transport(&mut state, &mut medium).unwrap();
        assert_eq!(outcome.event, Event::LIMIT_ENERGY);
        assert_eq!(state.kinetic, 1.0);

        let view = context.tables().view(0, Scheme::Csda);
        let expected = view.grammage(None, 10.0) - view.grammage(None, 1.0);
        assert!((state.grammage - expected).abs() <= 1e-9 * expected);
        assert!((state.distance - expected / 2.65e3).abs() <= 1e-9 * state.distance);
        assert!((state.position.z - state.distance).abs() <= 1e-9 * state.distance);
        assert!(state.time > 0.0);
        assert!(!state.decayed);
    }

    #[test]
    fn test_closed_form_matches_stepping_in_a_field() {
        let mut context = csda_context();
        context.config.limits.distance = Some(5.0);
        let mut medium = UniformMedium::new(0, 2.65e3).with_field([0.0, 0.1, 0.0]);
        let mut closed = ParticleState::new(-1.0, 10.0, [0.0; 3], [0.0, 0.0, 1.0]);
        let outcome = context.transport(&mut closed, &mut medium).unwrap();
        assert_eq!(outcome.event, Event::LIMIT_DISTANCE);

        // Same track forced through the stepping loop.
        struct Stepped(UniformMedium);
        impl Medium for Stepped {
            fn locate(&mut self, state: &ParticleState) -> crate::medium::Location {
                let mut location = self.0.locate(state);
                location.step = StepHint::Approximate(0.1);
                location
            }
            fn locals(&mut self, material: usize, state: &ParticleState) -> Locals {
                self.0.locals(material, state)
            }
        }
        let mut stepped_medium = Stepped(medium.clone());
        let mut stepped = ParticleState::new(-1.0, 10.0, [0.0; 3], [0.0, 0.0, 1.0]);
        let outcome = context.transport(&mut stepped, &mut stepped_medium).unwrap();
        assert_eq!(outcome.event, Event::LIMIT_DISTANCE);

        assert!((closed.kinetic - stepped.kinetic).abs() < 1e-6 * closed.kinetic);
        assert!((closed.distance - 5.0).abs() < 1e-12);
        assert!((closed.direction - stepped.direction).norm() < 2e-4);
        // The field bends the track in the x-z plane.
        let lateral = closed.position.x.abs();
        assert!(lateral > 1e-2, "lateral = {}", lateral);
        assert!((closed.position - stepped.position).norm() < 0.2 * lateral);
        assert!(closed.direction.y.abs() < 1e-12);
    }

    #[test]
    fn test_outside_start_reports_medium() {
        let mut context = csda_context();
        struct Void;
        impl Medium for Void {
            fn locate(&mut self, _state: &ParticleState) -> crate::medium::Location {
                crate::medium::Location {
                    material: None,
                    step: StepHint::Unbounded,
                }
            }
            fn locals(&mut self, _material: usize, _state: &ParticleState) -> Locals {
                Locals::uniform(1.0)
            }
        }
        let mut state = ParticleState::new(-1.0, 10.0, [0.0; 3], [0.0, 0.0, 1.0]);
        let outcome = context.transport(&mut state, &mut Void).unwrap();
        assert_eq!(outcome.event, Event::MEDIUM);
        assert_eq!(outcome.media, [None, None]);
        assert_eq!(state.distance, 0.0);
    }

    #[test]
    fn test_invalid_material_index() {
        let mut context = csda_context();
        let mut state = ParticleState::new(-1.0, 10.0, [0.0; 3], [0.0, 0.0, 1.0]);
        let mut medium = UniformMedium::new(3, 2.65e3);
        assert!(context.transport(&mut state, &mut medium).is_err());
    }
}
