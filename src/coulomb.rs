// Elastic Coulomb scattering on screened nuclei.
//
// The atomic potential is the Molière exponential fit, three Yukawa terms with
// weights `A_i` and inverse lengths `α_i / b`, where `b` is the Thomas–Fermi
// radius. In the Born approximation each term contributes `A_i / (μ + a_i)` to
// the amplitude, with `μ = sin²(θ/2)` in the centre of mass frame and
// `a_i = (ħc α_i / (2 p b))²` the screening parameters, enlarged by the
// Molière Coulomb correction. Finite nuclear size multiplies the amplitude
// by `a_N / (μ + a_N)`.
//
// Partial fractions reduce the amplitude to four simple poles, so that the
// squared amplitude is a sum of first and second order poles and both the
// restricted cross section and the soft transport moment integrate in closed
// form:
//
// ```text
// dσ/dμ = K Σ_k [ b_k / (μ + ρ_k)² + c_k / (μ + ρ_k) ]
// ```
//
// Hard events are sampled per element from a Wentzel envelope, with the
// exact screening and nuclear form factor applied as an acceptance ratio.

use crate::constants::{
    ALPHA_EM, ASYMPTOTIC_ANGLE, ATOMIC_MASS_UNIT, AVOGADRO_NUMBER, BOHR_RADIUS, EHS_MAX_TRIALS, EHS_OVER_MSC,
    EHS_PATH_MIN, ELECTRON_MASS, ELECTRON_RADIUS, HBAR_C, MAX_SOFT_ANGLE,
};
use crate::random::RandomSource;
use crate::tables::{Element, MaterialTables};
use crate::utilities::ridder;

/// Weights of the Molière screening function.
pub const SCREENING_WEIGHTS: [f64; 3] = [0.10, 0.55, 0.35];
/// Inverse screening lengths, in units of the Thomas–Fermi radius.
pub const SCREENING_EXPONENTS: [f64; 3] = [6.0, 1.2, 0.3];

/// Largest cutoff μ treated as soft.
pub fn max_soft_cutoff() -> f64 {
    (0.5 * MAX_SOFT_ANGLE).sin().powi(2)
}

/// Atoms per kg of an element with mass fraction `fraction`.
pub fn atoms_per_kg(element: &Element, fraction: f64) -> f64 {
    fraction * AVOGADRO_NUMBER * 1e3 / element.a
}

/// Screened Coulomb cross section of one element at one energy.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ScreenedCoulomb {
    /// K = π (Z r_e m_e / (p β))² (m²).
    pub factor: f64,
    pub screening: [f64; 3],
    pub nuclear: f64,
    pub poles: [f64; 4],
    pub amplitudes: [f64; 4],
    b: [f64; 4],
    c: [f64; 4],
    /// Lorentz factor of the centre of mass frame.
    gamma: f64,
    /// Ratio of the centre of mass velocity to the projectile velocity in that frame.
    tau: f64,
}

impl ScreenedCoulomb {
    pub fn new(element: &Element, mass: f64, kinetic: f64) -> Self {
        let target = element.a * ATOMIC_MASS_UNIT;
        let energy = kinetic + mass;
        let p2 = kinetic * (kinetic + 2.0 * mass);
        let s = mass * mass + target * target + 2.0 * energy * target;
        let sqrt_s = s.sqrt();
        let p_cm = p2.sqrt() * target / sqrt_s;
        let e_cm = (p_cm * p_cm + mass * mass).sqrt();
        let beta_cm = p_cm / e_cm;
        let gamma = (energy + target) / sqrt_s;
        let tau = (p2.sqrt() / (energy + target)) / beta_cm;

        let z = element.z;
        let k = z * ELECTRON_RADIUS * ELECTRON_MASS / (p_cm * beta_cm);
        let factor = std::f64::consts::PI * k * k;

        let radius = 0.885_34 * BOHR_RADIUS * z.powf(-1.0 / 3.0);
        let correction = 1.13 + 3.76 * (ALPHA_EM * z / beta_cm).powi(2);
        let mut screening = [0.0; 3];
        for (a, alpha) in screening.iter_mut().zip(SCREENING_EXPONENTS.iter()) {
            let x = HBAR_C * alpha / (2.0 * p_cm * radius);
            *a = x * x * correction;
        }

        let r_nucleus = (1.029_34 * element.a.cbrt() + 0.435) * 1e-15;
        let nuclear = 1.5 * HBAR_C * HBAR_C / (p_cm * p_cm * r_nucleus * r_nucleus);

        let mut poles = [0.0; 4];
        let mut amplitudes = [0.0; 4];
        for i in 0..3 {
            poles[i] = screening[i];
            amplitudes[i] = SCREENING_WEIGHTS[i] * nuclear / (nuclear - screening[i]);
        }
        poles[3] = nuclear;
        amplitudes[3] = -(amplitudes[0] + amplitudes[1] + amplitudes[2]);

        let mut b = [0.0; 4];
        let mut c = [0.0; 4];
        for i in 0..4 {
            b[i] = amplitudes[i] * amplitudes[i];
            let mut sum = 0.0;
            for j in 0..4 {
                if j != i {
                    sum += amplitudes[j] / (poles[j] - poles[i]);
                }
            }
            c[i] = 2.0 * amplitudes[i] * sum;
        }

        Self {
            factor,
            screening,
            nuclear,
            poles,
            amplitudes,
            b,
            c,
            gamma,
            tau,
        }
    }

    /// Amplitude Σ A_i/(μ+a_i) × a_N/(μ+a_N).
    #[inline]
    fn amplitude(&self, mu: f64) -> f64 {
        let mut sum = 0.0;
        for i in 0..3 {
            sum += SCREENING_WEIGHTS[i] / (mu + self.screening[i]);
        }
        sum * self.nuclear / (mu + self.nuclear)
    }

    /// dσ/dμ per atom (m²).
    pub fn dcs(&self, mu: f64) -> f64 {
        let f = self.amplitude(mu);
        self.factor * f * f
    }

    /// dσ/dμ from the pole expansion.
    pub fn dcs_poles(&self, mu: f64) -> f64 {
        let mut sum = 0.0;
        for k in 0..4 {
            let d = mu + self.poles[k];
            sum += self.b[k] / (d * d) + self.c[k] / d;
        }
        self.factor * sum
    }

    /// Cross section for scattering above `mu0` (m²).
    pub fn restricted(&self, mu0: f64) -> f64 {
        let mut sum = 0.0;
        for k in 0..4 {
            let rho = self.poles[k];
            sum += self.b[k] * (1.0 / (mu0 + rho) - 1.0 / (1.0 + rho)) + self.c[k] * ((1.0 + rho) / (mu0 + rho)).ln();
        }
        (self.factor * sum).max(0.0)
    }

    /// Transport cross section ∫ 2μ dσ over [0, mu0] (m²).
    pub fn transport(&self, mu0: f64) -> f64 {
        let mut sum = 0.0;
        for k in 0..4 {
            let rho = self.poles[k];
            let l = (mu0 / rho).ln_1p();
            sum += self.b[k] * (l - mu0 / (mu0 + rho)) + self.c[k] * (mu0 - rho * l);
        }
        (2.0 * self.factor * sum).max(0.0)
    }

    /// Sample μ in [mu0, 1] in the centre of mass frame, or `None` when the
    /// rejection sampling runs out of trials.
    pub fn sample(&self, mu0: f64, random: &mut RandomSource) -> Option<f64> {
        let a = self.screening.iter().copied().fold(f64::INFINITY, f64::min);
        let i0 = 1.0 / (mu0 + a);
        let i1 = 1.0 / (1.0 + a);
        for _ in 0..EHS_MAX_TRIALS {
            let mu = 1.0 / (i0 - random.uniform() * (i0 - i1)) - a;
            let envelope = 1.0 / ((mu + a) * (mu + a));
            let f = self.amplitude(mu);
            if random.uniform() * envelope <= f * f {
                return Some(mu.clamp(mu0, 1.0));
            }
        }
        None
    }

    /// Transform μ from the centre of mass frame to the laboratory frame.
    pub fn to_lab(&self, mu_cm: f64) -> f64 {
        if mu_cm < ASYMPTOTIC_ANGLE {
            let r = self.gamma * (1.0 + self.tau);
            return mu_cm / (r * r);
        }
        let cos_cm = 1.0 - 2.0 * mu_cm;
        let sin_cm = 2.0 * (mu_cm * (1.0 - mu_cm)).max(0.0).sqrt();
        let theta = sin_cm.atan2(self.gamma * (cos_cm + self.tau));
        let s = (0.5 * theta).sin();
        s * s
    }
}

/// Tabulated Coulomb quantities of a material at one energy.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ElasticNode {
    pub cutoff: f64,
    pub path: f64,
    pub soft_transport: f64,
    pub transport: f64,
}

/// Solve the soft/hard cutoff of a material from its elements, given as
/// (cross section, atoms per kg) pairs.
pub fn elastic_node(elements: &[(ScreenedCoulomb, f64)]) -> ElasticNode {
    let rate = |mu: f64| elements.iter().map(|(cs, n)| n * cs.restricted(mu)).sum::<f64>();
    let transport = elements.iter().map(|(cs, n)| n * cs.transport(1.0)).sum::<f64>();
    let target = 1.0 / (EHS_OVER_MSC / transport).max(EHS_PATH_MIN);

    let mu_max = max_soft_cutoff();
    let cutoff = if rate(mu_max) >= target {
        mu_max
    } else if rate(0.0) <= target {
        0.0
    } else {
        ridder(|mu| rate(mu) - target, 0.0, mu_max, 0.0, 1e-10, 200).unwrap_or(mu_max)
    };

    let hard = rate(cutoff);
    let path = if hard > 0.0 { 1.0 / hard } else { f64::MAX };
    let soft_transport = elements.iter().map(|(cs, n)| n * cs.transport(cutoff)).sum::<f64>();
    ElasticNode {
        cutoff,
        path,
        soft_transport,
        transport,
    }
}

/// Outcome of a hard elastic event.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HardScatter {
    /// Index of the component the projectile scattered on.
    pub component: usize,
    pub mu_cm: f64,
    pub mu_lab: f64,
}

/// Scratch space staging per element screening parameters during a hard
/// elastic event.
#[derive(Debug, Clone, Default)]
pub struct CoulombWorkspace {
    entries: Vec<(ScreenedCoulomb, f64)>,
}

impl CoulombWorkspace {
    pub fn with_capacity(elements: usize) -> Self {
        Self {
            entries: Vec::with_capacity(elements),
        }
    }

    pub fn capacity(&self) -> usize {
        self.entries.capacity()
    }

    /// Sample a hard elastic event above `mu0`. Returns `None` when the
    /// material has no hard cross section or the rejection sampling fails.
    pub fn sample(
        &mut self,
        elements: &[Element],
        material: &MaterialTables,
        mass: f64,
        kinetic: f64,
        mu0: f64,
        random: &mut RandomSource,
    ) -> Option<HardScatter> {
        self.entries.clear();
        let mut total = 0.0;
        for component in material.components.iter() {
            let element = &elements[component.element];
            let cs = ScreenedCoulomb::new(element, mass, kinetic);
            let weight = atoms_per_kg(element, component.fraction) * cs.restricted(mu0);
            total += weight;
            self.entries.push((cs, weight));
        }
        if !(total > 0.0) {
            return None;
        }

        let target = random.uniform() * total;
        let mut acc = 0.0;
        let mut selected = self.entries.len() - 1;
        for (i, (_, weight)) in self.entries.iter().enumerate() {
            acc += weight;
            if target < acc {
                selected = i;
                break;
            }
        }

        let cs = self.entries[selected].0;
        match cs.sample(mu0, random) {
            Some(mu_cm) => Some(HardScatter {
                component: selected,
                mu_cm,
                mu_lab: cs.to_lab(mu_cm),
            }),
            None => {
                log::debug!("hard elastic sampling exhausted {} trials, event dropped", EHS_MAX_TRIALS);
                None
            }
        }
    }
}
