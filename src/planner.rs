// Step planner: resolution of the nearest foreseen event along the track.
//
// External energy and grammage limits, the grid bounds and the depths of the
// next discrete vertices are expressed as absolute grammage thresholds. Vertex
// depths are drawn in units of cumulative interaction counts, so the plan is
// redrawn at start, on medium changes and after every vertex.
use crate::config::{EnergyLossMode, ScatteringMode};
use crate::del::cel_probability;
use crate::event::Event;
use crate::interpolation::IndexCache;
use crate::particle::ParticleState;
use crate::quantities::MaterialView;
use crate::random::RandomSource;
use crate::transport::Track;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Plan {
    /// Absolute grammage at which the foreseen event occurs (kg/m²).
    pub grammage_max: f64,
    /// `LIMIT_ENERGY`, `LIMIT_GRAMMAGE`, `VERTEX_DEL`, `VERTEX_COULOMB` or
    /// `NONE`.
    pub event: Event,
    /// Kinetic energy reached at an energy limit.
    pub energy: f64,
}

impl Plan {
    fn consider(&mut self, grammage: f64, event: Event) {
        if grammage < self.grammage_max {
            self.grammage_max = grammage;
            self.event = event;
        }
    }
}

pub fn plan(
    track: &Track,
    material: usize,
    state: &ParticleState,
    cache: &mut IndexCache,
    random: &mut RandomSource,
) -> Plan {
    let view = track.view(material);
    let config = track.config;
    let forward = track.sign > 0.0;
    let kinetic = state.kinetic;
    let range = view.grammage(Some(&mut *cache), kinetic);
    let mut plan = Plan {
        grammage_max: f64::INFINITY,
        event: Event::NONE,
        energy: kinetic,
    };

    // Energy limit, or the bounds of the tabulation.
    let bound = if forward {
        config.limits.energy.unwrap_or(view.energy_min()).max(view.energy_min())
    } else {
        config.limits.energy.unwrap_or(view.energy_max())
    };
    let reached = if forward { bound >= kinetic } else { bound <= kinetic };
    if reached {
        plan.consider(state.grammage, Event::LIMIT_ENERGY);
    } else {
        let depth = (range - view.grammage(Some(&mut *cache), bound)).abs();
        plan.consider(state.grammage + depth, Event::LIMIT_ENERGY);
        plan.energy = bound;
    }

    if let Some(grammage) = config.limits.grammage {
        plan.consider(grammage.max(state.grammage), Event::LIMIT_GRAMMAGE);
    }

    if config.energy_loss != EnergyLossMode::Csda {
        let depth = random.exponential();
        let count = view.del_count(Some(&mut *cache), kinetic);
        let target = if forward {
            count - depth
        } else {
            count + depth * (1.0 - cel_probability(track.tables, material))
        };
        // A non positive forward target ranges out before the next vertex.
        if !(forward && target <= 0.0) {
            let vertex = view.kinetic_from_del_count(Some(&mut *cache), target);
            if let Some(grammage) = depth_to(&view, cache, range, vertex) {
                plan.consider(state.grammage + grammage, Event::VERTEX_DEL);
            }
        }
    }

    if config.scattering == ScatteringMode::Mixed {
        let depth = random.exponential();
        let count = view.elastic_count(Some(&mut *cache), kinetic);
        let target = if forward { count - depth } else { count + depth };
        if !(forward && target <= 0.0) {
            let vertex = view.kinetic_from_elastic_count(Some(&mut *cache), target);
            if let Some(grammage) = depth_to(&view, cache, range, vertex) {
                plan.consider(state.grammage + grammage, Event::VERTEX_COULOMB);
            }
        }
    }

    // The energy target only holds when the limit is the nearest event.
    if plan.event != Event::LIMIT_ENERGY {
        plan.energy = kinetic;
    }
    plan
}

/// Grammage between the current range and the one at `kinetic`, `None` when
/// the energy is never reached.
fn depth_to(view: &MaterialView, cache: &mut IndexCache, range: f64, kinetic: f64) -> Option<f64> {
    if !kinetic.is_finite() {
        return None;
    }
    Some((range - view.grammage(Some(cache), kinetic)).abs())
}
