// Discrete energy loss (DEL) vertices.
//
// Forward: the target component and the process are selected from the
// tabulated cumulative fractions, then the energy transfer is sampled from a
// two branch power law envelope with rejection against the model cross
// section. Backward: the ancestor energy is drawn from a 1/K² bias and the
// track is reweighted by the ratio of the true transition density to the
// sampling density. A fraction pCEL of the backward vertices are null events,
// standing for steps that were purely continuous.

use crate::constants::DEL_MAX_TRIALS;
use crate::dcs::{Envelope, Margin, ProcessKind, ProcessModel};
use crate::interpolation::{locate, IndexCache, TableFamily};
use crate::physics::rotate_direction;
use crate::random::RandomSource;
use crate::tables::{PhysicsTables, Scheme};
use crate::coulomb::atoms_per_kg;
use nalgebra::Vector3;

/// A sampled discrete loss.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DelVertex {
    pub process: ProcessKind,
    /// Index of the target component in the material.
    pub component: usize,
    /// Projectile kinetic energy before the loss (GeV).
    pub kinetic: f64,
    /// Energy transferred (GeV).
    pub transfer: f64,
}

/// Outcome of a backward vertex.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Reverse {
    /// Null event, the step was purely continuous.
    Continuous,
    /// Ancestor vertex with its importance weight. A weight of zero or less
    /// kills the track.
    Vertex { vertex: DelVertex, weight: f64 },
}

/// Probability that a backward vertex is a null event.
pub fn cel_probability(tables: &PhysicsTables, material: usize) -> f64 {
    let threshold = tables.materials()[material].del.threshold;
    let top = tables.energy_max();
    if !(threshold > 0.0 && threshold < top) {
        return 1.0;
    }
    let l_cut = (1.0 / tables.cutoff()).ln();
    let l_range = (top / threshold).ln();
    l_cut / (l_cut + l_range)
}

/// Sample a forward discrete loss at `kinetic`. Returns `None` below the DEL
/// threshold or when the rejection sampling is exhausted.
pub fn sample_forward(
    tables: &PhysicsTables,
    material: usize,
    kinetic: f64,
    cache: Option<&mut IndexCache>,
    random: &mut RandomSource,
) -> Option<DelVertex> {
    let tabulated = &tables.materials()[material];
    if kinetic < tabulated.del.threshold || kinetic <= 0.0 {
        return None;
    }
    let (component, process) = select_target(tables, material, kinetic, cache, random.uniform())?;
    let element = &tables.elements()[tabulated.components[component].element];
    let model = tables.model(process);
    let mass = tables.particle().mass;

    let (lo, hi) = model.transfer_range(element, mass, kinetic);
    let lo = lo.max(tables.cutoff() * kinetic);
    let hi = hi.min(kinetic);
    if !(hi > lo) {
        return None;
    }
    let envelope = PowerLaw::new(model.envelope(), kinetic, lo, hi);
    let dcs = |nu: f64| model.dcs(element, mass, kinetic, nu);
    match envelope.reject(&dcs, model.margin(), random) {
        Some(nu) => Some(DelVertex {
            process,
            component,
            kinetic,
            transfer: nu,
        }),
        None => {
            log::debug!(
                "{:?} transfer sampling failed at K = {} GeV, event dropped",
                process,
                kinetic
            );
            None
        }
    }
}

/// Sample the ancestor of a backward vertex at final energy `kinetic`.
pub fn sample_backward(
    tables: &PhysicsTables,
    material: usize,
    kinetic: f64,
    cache: Option<&mut IndexCache>,
    random: &mut RandomSource,
) -> Reverse {
    let p_cel = cel_probability(tables, material);
    if random.uniform() < p_cel {
        return Reverse::Continuous;
    }
    let view = tables.view(material, Scheme::Hybrid);
    let sigma = view.del_cross_section(cache, kinetic);
    let x_cut = tables.cutoff();
    let k_low = kinetic / (1.0 - x_cut);
    let k_high = tables.energy_max();
    if !(sigma > 0.0) || k_low >= k_high {
        return Reverse::Continuous;
    }

    // 1/K² bias on [k_low, k_high].
    let (inv_low, inv_high) = (1.0 / k_low, 1.0 / k_high);
    let ancestor = 1.0 / (inv_low - random.uniform() * (inv_low - inv_high));
    let q = 1.0 / ((inv_low - inv_high) * ancestor * ancestor);
    let transfer = ancestor - kinetic;

    let tabulated = &tables.materials()[material];
    let mass = tables.particle().mass;
    let mut weights = Vec::with_capacity(tabulated.components.len() * ProcessKind::ALL.len());
    for component in tabulated.components.iter() {
        let element = &tables.elements()[component.element];
        let atoms = atoms_per_kg(element, component.fraction);
        for kind in ProcessKind::ALL {
            let model = tables.model(kind);
            weights.push(atoms * transition(model, element, mass, ancestor, transfer, x_cut));
        }
    }
    let density: f64 = weights.iter().sum();
    let weight = backward_weight(density, sigma, q);

    let selected = if density > 0.0 {
        let target = random.uniform() * density;
        let mut acc = 0.0;
        let mut selected = weights.len() - 1;
        for (j, w) in weights.iter().enumerate() {
            acc += w;
            if target < acc {
                selected = j;
                break;
            }
        }
        selected
    } else {
        // Dead track, report the dominant process at the cut.
        ProcessKind::Ionisation.index()
    };
    let n = ProcessKind::ALL.len();
    let process = ProcessKind::from_index(selected % n).unwrap_or(ProcessKind::Ionisation);
    Reverse::Vertex {
        vertex: DelVertex {
            process,
            component: selected / n,
            kinetic: ancestor,
            transfer,
        },
        weight,
    }
}

/// Importance weight of a backward vertex: true transition density over the
/// sampling density. Non physical values collapse to 0.
pub fn backward_weight(density: f64, cross_section: f64, bias: f64) -> f64 {
    let weight = density / (cross_section * bias);
    if weight.is_finite() && weight > 0.0 {
        weight
    } else {
        0.0
    }
}

/// Apply the projectile deflection of a vertex to `direction`.
pub fn deflect(tables: &PhysicsTables, vertex: &DelVertex, direction: &mut Vector3<f64>, random: &mut RandomSource) {
    let model = tables.model(vertex.process);
    let mass = tables.particle().mass;
    let cos_theta = model.polar(mass, vertex.kinetic, vertex.transfer, random.uniform());
    if cos_theta < 1.0 {
        let phi = 2.0 * std::f64::consts::PI * random.uniform();
        *direction = rotate_direction(direction, cos_theta, phi);
    }
}

fn transition(
    model: &ProcessModel,
    element: &crate::tables::Element,
    mass: f64,
    kinetic: f64,
    transfer: f64,
    x_cut: f64,
) -> f64 {
    if transfer < x_cut * kinetic {
        return 0.0;
    }
    let (lo, hi) = model.transfer_range(element, mass, kinetic);
    if transfer < lo || transfer > hi {
        return 0.0;
    }
    model.dcs(element, mass, kinetic, transfer).max(0.0)
}

/// Select the component and process of a forward vertex from the tabulated
/// cumulative fractions, interpolated linearly in energy.
fn select_target(
    tables: &PhysicsTables,
    material: usize,
    kinetic: f64,
    cache: Option<&mut IndexCache>,
    u: f64,
) -> Option<(usize, ProcessKind)> {
    let grid = tables.energies();
    let fractions = &tables.materials()[material].del.fractions;
    let last = grid.len() - 1;
    let (row0, row1, h) = if kinetic >= grid[last] {
        (&fractions[last], &fractions[last], 0.0)
    } else {
        let i = locate(cache, TableFamily::Energy, grid, kinetic.max(grid[0]));
        let h = (kinetic - grid[i]) / (grid[i + 1] - grid[i]);
        (&fractions[i], &fractions[i + 1], h)
    };
    let width = row0.len();
    let active = |row: &Vec<f64>| row.last().map_or(false, |v| *v > 0.0);
    let cumulative = |j: usize| match (active(row0), active(row1)) {
        (true, true) => (1.0 - h) * row0[j] + h * row1[j],
        (false, true) => row1[j],
        (true, false) => row0[j],
        (false, false) => 0.0,
    };
    if !(active(row0) || active(row1)) {
        return None;
    }
    let n = ProcessKind::ALL.len();
    let mut last_nonzero = None;
    let mut previous = 0.0;
    for j in 0..width {
        let value = cumulative(j);
        if value > previous {
            last_nonzero = Some(j);
        }
        if u < value {
            return ProcessKind::from_index(j % n).map(|kind| (j / n, kind));
        }
        previous = value;
    }
    log::debug!("DEL target selection fell through at u = {}", u);
    last_nonzero.and_then(|j| ProcessKind::from_index(j % n).map(|kind| (j / n, kind)))
}

/// Normalised two branch power law on [lo, hi].
#[derive(Debug, Clone, Copy)]
struct PowerLaw {
    alpha_low: f64,
    alpha_high: f64,
    lo: f64,
    hi: f64,
    split: f64,
    /// Factor joining the high branch to the low one at the split.
    join: f64,
    weight_low: f64,
    weight_high: f64,
}

impl PowerLaw {
    fn new(envelope: Envelope, kinetic: f64, lo: f64, hi: f64) -> Self {
        let split = (envelope.x_break * kinetic).clamp(lo, hi);
        let join = split.powf(envelope.alpha_high - envelope.alpha_low);
        Self {
            alpha_low: envelope.alpha_low,
            alpha_high: envelope.alpha_high,
            lo,
            hi,
            split,
            join,
            weight_low: power_integral(envelope.alpha_low, lo, split),
            weight_high: join * power_integral(envelope.alpha_high, split, hi),
        }
    }

    /// Unnormalised envelope value.
    fn density(&self, nu: f64) -> f64 {
        if nu < self.split {
            nu.powf(-self.alpha_low)
        } else {
            self.join * nu.powf(-self.alpha_high)
        }
    }

    fn sample(&self, u: f64) -> f64 {
        let total = self.weight_low + self.weight_high;
        let target = u * total;
        if target < self.weight_low {
            power_sample(self.alpha_low, self.lo, self.split, target / self.weight_low)
        } else {
            let v = (target - self.weight_low) / self.weight_high;
            power_sample(self.alpha_high, self.split, self.hi, v.min(1.0))
        }
    }

    /// Upper bound of dcs/envelope scanned on a log grid, with a margin.
    fn scale<F: Fn(f64) -> f64>(&self, dcs: &F) -> f64 {
        const POINTS: usize = 16;
        let ratio = (self.hi / self.lo).ln();
        let mut scale: f64 = 0.0;
        for i in 0..POINTS {
            let nu = self.lo * (ratio * i as f64 / (POINTS - 1) as f64).exp();
            let nu = nu.min(self.hi);
            scale = scale.max(dcs(nu) / self.density(nu));
        }
        1.1 * scale
    }

    /// Rejection sampling of `dcs` under the envelope, scaled by the scanned
    /// bound times `margin`. A proposal above the bound raises the margin and
    /// restarts the sampling, so later draws of the same model use the new
    /// bound.
    fn reject<F: Fn(f64) -> f64>(&self, dcs: &F, margin: &Margin, random: &mut RandomSource) -> Option<f64> {
        let scanned = self.scale(dcs);
        if !(scanned > 0.0 && scanned.is_finite()) {
            return None;
        }
        let mut scale = scanned * margin.get();
        for _ in 0..DEL_MAX_TRIALS {
            let nu = self.sample(random.uniform());
            let bound = scale * self.density(nu);
            let value = dcs(nu);
            if value > bound {
                let raised = 1.1 * value / bound;
                if !raised.is_finite() {
                    return None;
                }
                log::debug!(
                    "cross section above its rejection bound at nu = {} GeV by {:.3}, margin raised",
                    nu,
                    value / bound
                );
                margin.raise(margin.get() * raised);
                scale = scanned * margin.get();
                continue;
            }
            if random.uniform() * bound <= value {
                return Some(nu);
            }
        }
        None
    }
}

fn power_integral(alpha: f64, a: f64, b: f64) -> f64 {
    if b <= a {
        0.0
    } else if (alpha - 1.0).abs() < 1e-9 {
        (b / a).ln()
    } else {
        let e = 1.0 - alpha;
        (b.powf(e) - a.powf(e)) / e
    }
}

fn power_sample(alpha: f64, a: f64, b: f64, u: f64) -> f64 {
    if (alpha - 1.0).abs() < 1e-9 {
        a * (b / a).powf(u)
    } else {
        let e = 1.0 - alpha;
        let (ae, be) = (a.powf(e), b.powf(e));
        (ae + u * (be - ae)).powf(1.0 / e).clamp(a, b)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::particle::Particle;
    use crate::tables::builder::standard_rock;

    #[test]
    fn test_power_law_sampling_stays_in_range() {
        let envelope = Envelope {
            alpha_low: 1.0,
            alpha_high: 2.0,
            x_break: 0.1,
        };
        let law = PowerLaw::new(envelope, 10.0, 0.5, 10.0);
        for i in 0..100 {
            let nu = law.sample(i as f64 / 100.0);
            assert!(nu >= 0.5 && nu <= 10.0, "nu = {}", nu);
        }
        // Continuity at the split.
        let below = law.density(law.split * (1.0 - 1e-12));
        let above = law.density(law.split);
        assert!((below - above).abs() <= 1e-9 * above);
    }

    #[test]
    fn test_rejection_recovers_from_an_underestimated_bound() {
        // Flat in ln(nu) except for a peak that the scan points miss.
        let envelope = Envelope {
            alpha_low: 1.0,
            alpha_high: 1.0,
            x_break: 1.0,
        };
        let law = PowerLaw::new(envelope, 1.0, 1.0, 15f64.exp());
        let peaked = |t: f64| (0.4..0.6).contains(&t);
        let dcs = |nu: f64| if peaked(nu.ln()) { 10.0 / nu } else { 1.0 / nu };
        let margin = Margin::new();
        let mut random = RandomSource::seeded(29);

        let (mut sampled, mut inside) = (0usize, 0usize);
        for _ in 0..20_000 {
            if let Some(nu) = law.reject(&dcs, &margin, &mut random) {
                assert!(nu >= 1.0 && nu <= 15f64.exp() * (1.0 + 1e-12));
                sampled += 1;
                if peaked(nu.ln()) {
                    inside += 1;
                }
            }
        }
        assert!(margin.get() >= 9.0, "margin = {}", margin.get());
        let expected = 2.0 / 16.8;
        let observed = inside as f64 / sampled as f64;
        assert!((observed - expected).abs() < 0.01, "observed {}, expected {}", observed, expected);
    }

    #[test]
    fn test_forward_transfers_respect_the_cut() {
        let tables = standard_rock(Particle::muon()).unwrap();
        let mut random = RandomSource::seeded(3);
        let kinetic = 100.0;
        let mut processes = [0usize; 4];
        let mut sampled = 0;
        for _ in 0..2000 {
            if let Some(vertex) = sample_forward(&tables, 0, kinetic, None, &mut random) {
                assert!(vertex.transfer >= tables.cutoff() * kinetic * (1.0 - 1e-12));
                assert!(vertex.transfer <= kinetic);
                processes[vertex.process.index()] += 1;
                sampled += 1;
            }
        }
        assert!(sampled > 1900, "sampled = {}", sampled);
        // Ionisation and bremsstrahlung both contribute at 100 GeV.
        assert!(processes[0] > 0 && processes[3] > 0, "{:?}", processes);
    }

    #[test]
    fn test_no_forward_vertex_below_threshold() {
        let tables = standard_rock(Particle::muon()).unwrap();
        let threshold = tables.materials()[0].del.threshold;
        let mut random = RandomSource::seeded(5);
        assert!(sample_forward(&tables, 0, 0.5 * threshold, None, &mut random).is_none());
    }

    #[test]
    fn test_cel_probability_bounds() {
        let tables = standard_rock(Particle::muon()).unwrap();
        let p = cel_probability(&tables, 0);
        assert!(p > 0.0 && p < 1.0, "p = {}", p);
    }

    #[test]
    fn test_backward_ancestor_is_above_the_cut() {
        let tables = standard_rock(Particle::muon()).unwrap();
        let mut random = RandomSource::seeded(11);
        let kinetic = 10.0;
        let mut vertices = 0;
        for _ in 0..500 {
            if let Reverse::Vertex { vertex, weight } = sample_backward(&tables, 0, kinetic, None, &mut random) {
                assert!(vertex.kinetic >= kinetic / (1.0 - tables.cutoff()) * (1.0 - 1e-12));
                assert!((vertex.kinetic - vertex.transfer - kinetic).abs() < 1e-9 * vertex.kinetic);
                assert!(weight >= 0.0 && weight.is_finite());
                vertices += 1;
            }
        }
        assert!(vertices > 0);
    }

    #[test]
    fn test_backward_weight_collapses_to_zero() {
        assert_eq!(backward_weight(0.0, 1e-3, 2.0), 0.0);
        assert_eq!(backward_weight(-1.0, 1e-3, 2.0), 0.0);
        assert_eq!(backward_weight(1.0, 0.0, 2.0), 0.0);
        assert!((backward_weight(2.0, 0.5, 2.0) - 2.0).abs() < 1e-15);
    }

    #[test]
    fn test_radiative_deflection_is_small() {
        let tables = standard_rock(Particle::muon()).unwrap();
        let mut random = RandomSource::seeded(1);
        let vertex = DelVertex {
            process: ProcessKind::Bremsstrahlung,
            component: 0,
            kinetic: 100.0,
            transfer: 10.0,
        };
        let mut direction = Vector3::new(0.0, 0.0, 1.0);
        deflect(&tables, &vertex, &mut direction, &mut random);
        assert!((direction.norm() - 1.0).abs() < 1e-12);
        assert!(direction.z > 0.99);
    }
}
