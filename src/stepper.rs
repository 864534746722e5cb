// Step executor: advances a particle over one physical step.
//
// The step length is the smallest of the accuracy driven lengths (energy
// loss, soft scattering, magnetic bending), the geometry hints and the
// external budgets. Budgets snap exactly: the state lands on the limit. The
// end point is probed first; a change of medium is then localised by
// bisection before the energy, time, weight and direction are updated.
use crate::config::{DecayMode, EnergyLossMode, ScatteringMode};
use crate::constants::{
    LARMOR_FACTOR, LOCALISATION_MAX_ITERATIONS, SMALL_STEP_FRACTION, STEP_MIN, STRAGGLING_MAX_TRIALS,
    ULTRA_RELATIVISTIC_GAMMA,
};
use crate::event::Event;
use crate::interpolation::IndexCache;
use crate::medium::{Locals, Location, Medium, StepHint};
use crate::particle::ParticleState;
use crate::physics::{momentum, rotate_about, rotate_direction};
use crate::planner::Plan;
use crate::quantities::MaterialView;
use crate::random::RandomSource;
use crate::transport::Track;

/// Budget that bounded a step.
#[derive(Debug, Clone, Copy, PartialEq)]
enum Budget {
    None,
    Plan,
    Distance(f64),
    /// Proper time limit or decay, with the absolute time reached.
    Time(Event, f64),
}

/// Proper time budget converted to a length: (length, event, absolute time).
pub fn time_budget(
    track: &Track,
    view: &MaterialView,
    state: &ParticleState,
    density: f64,
    cache: &mut IndexCache,
) -> Option<(f64, Event, f64)> {
    let limit = track.config.limits.time.map(|t| (t, Event::LIMIT_TIME));
    let decay = track.lifetime.map(|t| (t, Event::VERTEX_DECAY));
    let (time, event) = match (limit, decay) {
        (Some(a), Some(b)) => {
            if b.0 < a.0 {
                b
            } else {
                a
            }
        }
        (Some(a), None) => a,
        (None, Some(b)) => b,
        (None, None) => return None,
    };
    let delta = (time - state.time).max(0.0) * density;
    let kinetic = state.kinetic;
    let t0 = view.proper_time(Some(&mut *cache), kinetic);
    let k1 = if track.sign > 0.0 {
        let t1 = t0 - delta;
        if t1 <= 0.0 && delta > 0.0 {
            return None;
        }
        view.kinetic_from_proper_time(Some(&mut *cache), t1)
    } else {
        view.kinetic_from_proper_time(Some(&mut *cache), t0 + delta)
    };
    let x0 = view.grammage(Some(&mut *cache), kinetic);
    let x1 = view.grammage(Some(&mut *cache), k1);
    Some(((x0 - x1).abs() / density, event, time))
}

/// Continuous energy loss over `grammage`: finite differences for short
/// steps, table inversion otherwise.
pub fn cel(view: &MaterialView, cache: &mut IndexCache, sign: f64, kinetic: f64, range: f64, loss: f64, grammage: f64) -> f64 {
    if grammage < SMALL_STEP_FRACTION * range {
        let half = (kinetic - sign * 0.5 * loss * grammage).max(0.0);
        let loss = view.energy_loss(Some(cache), half);
        (kinetic - sign * loss * grammage).max(0.0)
    } else {
        let x1 = range - sign * grammage;
        if x1 <= 0.0 {
            view.energy_min()
        } else {
            view.kinetic_from_grammage(Some(cache), x1)
        }
    }
}

/// Sample the energy lost over a step with mean loss `mean` and variance
/// `variance`, following the three regimes of PENELOPE.
pub fn straggle(mean: f64, variance: f64, random: &mut RandomSource) -> f64 {
    if !(mean > 0.0 && variance > 0.0) {
        return mean.max(0.0);
    }
    let m2 = mean * mean;
    if variance < m2 / 9.0 {
        // Gaussian truncated to (0, 2·mean), preserving the mean.
        let sigma = variance.sqrt();
        for _ in 0..STRAGGLING_MAX_TRIALS {
            let loss = mean + sigma * random.gaussian();
            if loss > 0.0 && loss < 2.0 * mean {
                return loss;
            }
        }
        log::debug!("straggling exhausted {} trials, mean loss used", STRAGGLING_MAX_TRIALS);
        mean
    } else if variance < m2 / 3.0 {
        let half_width = (3.0 * variance).sqrt();
        mean + half_width * (2.0 * random.uniform() - 1.0)
    } else {
        // Mixture of no loss and a uniform loss on (0, w).
        let w = 1.5 * (variance + m2) / mean;
        if random.uniform() < 2.0 * mean / w {
            w * random.uniform()
        } else {
            0.0
        }
    }
}

/// Rotation of the soft multiple scattering over a grammage with inverse
/// transport path `rate`.
pub fn soft_scatter(direction: &nalgebra::Vector3<f64>, grammage: f64, rate: f64, random: &mut RandomSource) -> nalgebra::Vector3<f64> {
    let mean = 0.5 * grammage * rate;
    if !(mean > 0.0) {
        return *direction;
    }
    // Exponential in μ = (1 - cos θ)/2, truncated to [0, 1].
    let u = random.uniform();
    let mu = (-mean * (1.0 - u * (1.0 - (-1.0 / mean).exp())).ln()).min(1.0);
    let phi = 2.0 * std::f64::consts::PI * random.uniform();
    rotate_direction(direction, 1.0 - 2.0 * mu, phi)
}

/// Execute one step. Returns the event ending the step, if any, and the
/// location of the end point.
#[allow(clippy::too_many_arguments)]
pub fn step(
    track: &Track,
    plan: &Plan,
    material: usize,
    locals: &Locals,
    hint: StepHint,
    state: &mut ParticleState,
    medium: &mut dyn Medium,
    cache: &mut IndexCache,
    random: &mut RandomSource,
) -> (Event, Location) {
    let config = track.config;
    let view = track.view(material);
    let sign = track.sign;
    let forward = sign > 0.0;
    let mass = view.mass;
    let density = locals.density;

    let k0 = state.kinetic;
    let x0 = view.grammage(Some(&mut *cache), k0);
    let s0 = view.energy_loss(Some(&mut *cache), k0);
    let p0 = momentum(mass, k0);

    // Accuracy driven step.
    let energy_step = if k0 > ULTRA_RELATIVISTIC_GAMMA * mass {
        config.accuracy * k0 / s0
    } else {
        config.accuracy * x0
    };
    let mut length = energy_step / density;
    let soft_rate = |cache: &mut IndexCache, kinetic: f64| match config.scattering {
        ScatteringMode::Disabled => 0.0,
        ScatteringMode::Soft => view.transport_inverse(Some(cache), kinetic, false),
        ScatteringMode::Mixed => view.transport_inverse(Some(cache), kinetic, true),
    };
    let rate0 = soft_rate(cache, k0);
    if rate0 > 0.0 {
        length = length.min(config.accuracy / (density * rate0));
    }
    let b_perp = locals.magnetic.cross(&state.direction).norm();
    if b_perp > 0.0 && p0 > 0.0 {
        length = length.min(config.accuracy * p0 / (LARMOR_FACTOR * b_perp));
    }
    match hint {
        StepHint::Exact(d) => length = length.min(d + STEP_MIN),
        StepHint::Approximate(d) => length = length.min(d),
        StepHint::Unbounded => {}
    }
    if let Some(d) = locals.step {
        length = length.min(d);
    }
    let mut length = length.max(STEP_MIN);

    // External budgets, snapped exactly.
    let mut budget = Budget::None;
    if !plan.event.is_empty() {
        let s = (plan.grammage_max - state.grammage).max(0.0) / density;
        if s <= length {
            length = s;
            budget = Budget::Plan;
        }
    }
    if let Some(limit) = config.limits.distance {
        let s = (limit - state.distance).max(0.0);
        if s < length {
            length = s;
            budget = Budget::Distance(limit);
        }
    }
    if let Some((s, event, time)) = time_budget(track, &view, state, density, cache) {
        if s < length {
            length = s;
            budget = Budget::Time(event, time);
        }
    }

    // Probe the end point, then localise any crossing.
    let start = state.position;
    let u0 = state.direction;
    let mut probe = state.clone();
    probe.position = start + sign * length * u0;
    let mut location = medium.locate(&probe);
    let mut event = Event::NONE;
    if location.material != Some(material) {
        if config.exact_localisation {
            let (mut lo, mut hi) = (0.0, length);
            for _ in 0..LOCALISATION_MAX_ITERATIONS {
                if hi - lo <= STEP_MIN {
                    break;
                }
                let mid = 0.5 * (lo + hi);
                probe.position = start + sign * mid * u0;
                let found = medium.locate(&probe);
                if found.material == Some(material) {
                    lo = mid;
                } else {
                    hi = mid;
                    location = found;
                }
            }
            if hi < length {
                length = hi;
                budget = Budget::None;
            }
        }
        event = Event::MEDIUM;
    }

    // Energy.
    let grammage = density * length;
    let (k_mean, mut k1) = match budget {
        Budget::Plan if plan.event == Event::LIMIT_ENERGY => (plan.energy, plan.energy),
        _ => {
            let k_mean = cel(&view, cache, sign, k0, x0, s0, grammage);
            let k1 = if config.energy_loss == EnergyLossMode::Straggled {
                let variance = (view.straggling(Some(&mut *cache), k0)
                    - view.straggling(Some(&mut *cache), k_mean))
                .abs();
                (k0 - straggle(k0 - k_mean, variance, random)).max(0.0)
            } else {
                k_mean
            };
            (k_mean, k1)
        }
    };

    // Proper time.
    let dtime = match budget {
        Budget::Time(_, time) => time - state.time,
        _ => {
            let p_half = momentum(mass, 0.5 * (k0 + k_mean));
            let dt = if grammage < SMALL_STEP_FRACTION * x0 && p_half > 0.0 {
                mass / p_half * grammage
            } else {
                (view.proper_time(Some(&mut *cache), k0) - view.proper_time(Some(&mut *cache), k_mean)).abs()
            };
            dt / density
        }
    };

    // Direction: magnetic bending then soft scattering, the position moving
    // along the initial direction.
    let mut direction = u0;
    if locals.is_magnetized() {
        let p1 = momentum(mass, k1);
        if p0 > 0.0 && p1 > 0.0 {
            let field = locals.magnetic.norm();
            let axis = locals.magnetic / field;
            let angle = -sign * state.charge * LARMOR_FACTOR * field * length * 0.5 * (1.0 / p0 + 1.0 / p1);
            direction = rotate_about(&direction, &axis, angle).normalize();
        }
    }
    if config.scattering != ScatteringMode::Disabled {
        let kinetic = if random.uniform() < 0.5 { k0 } else { k1 };
        let rate = soft_rate(cache, kinetic);
        direction = soft_scatter(&direction, grammage, rate, random);
    }

    // Energy bounds.
    if forward {
        let floor = config.limits.energy.unwrap_or(view.energy_min()).max(view.energy_min());
        if k1 <= floor && floor < k0 {
            k1 = floor;
            event = Event::LIMIT_ENERGY;
        }
    } else {
        let ceiling = config.limits.energy.unwrap_or(view.energy_max());
        if k1 >= ceiling && ceiling > k0 {
            k1 = ceiling;
            event = Event::LIMIT_ENERGY;
        }
    }

    // Weights.
    match config.decay {
        DecayMode::Weight => state.weight *= (-dtime / track.tables.particle().ctau).exp(),
        DecayMode::Disabled | DecayMode::Randomise => {}
    }
    if !forward && s0 > 0.0 {
        state.weight *= view.energy_loss(Some(&mut *cache), k1) / s0;
    }

    // Commit.
    state.position = start + sign * length * u0;
    state.direction = direction;
    state.kinetic = k1;
    state.time += dtime;
    state.distance += length;
    state.grammage += grammage;
    match budget {
        Budget::Plan => {
            state.grammage = plan.grammage_max;
            if event.is_empty() {
                event = plan.event;
            }
        }
        Budget::Distance(limit) => {
            state.distance = limit;
            if event.is_empty() {
                event = Event::LIMIT_DISTANCE;
            }
        }
        Budget::Time(limit_event, time) => {
            state.time = time;
            if event.is_empty() {
                event = limit_event;
            }
        }
        Budget::None => {}
    }
    (event, location)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_straggling_regimes_preserve_the_mean() {
        let mut random = RandomSource::seeded(17);
        for &(mean, variance) in &[(1.0, 0.01), (1.0, 0.2), (1.0, 2.0)] {
            let n = 100_000;
            let mut sum = 0.0;
            for _ in 0..n {
                let loss = straggle(mean, variance, &mut random);
                assert!(loss >= 0.0);
                sum += loss;
            }
            let average = sum / n as f64;
            assert!((average - mean).abs() < 0.02, "mean = {}, variance = {}, got {}", mean, variance, average);
        }
    }

    #[test]
    fn test_straggling_without_variance_is_the_mean() {
        let mut random = RandomSource::none();
        assert_eq!(straggle(0.3, 0.0, &mut random), 0.3);
        assert_eq!(straggle(0.0, 1.0, &mut random), 0.0);
    }

    #[test]
    fn test_soft_scatter_mean_deflection() {
        let mut random = RandomSource::seeded(23);
        let direction = nalgebra::Vector3::new(0.0, 0.0, 1.0);
        let (grammage, rate) = (1.0, 1e-3);
        let n = 50_000;
        let mut sum = 0.0;
        for _ in 0..n {
            let u = soft_scatter(&direction, grammage, rate, &mut random);
            assert!((u.norm() - 1.0).abs() < 1e-12);
            sum += 1.0 - u.z;
        }
        let mean = sum / n as f64;
        assert!((mean - grammage * rate).abs() < 0.03 * grammage * rate, "mean = {}", mean);
    }
}
