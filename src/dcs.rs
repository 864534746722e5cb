// Differential cross sections of the discrete energy loss processes.
//
// A process slot (bremsstrahlung, pair production, photonuclear, ionisation)
// is served either by a built-in model or by an external one registered by
// name in a process-wide registry. Models are resolved once, when physics
// tables are constructed.
//
// Cross sections are per atom, in m²/GeV, as a function of the projectile
// kinetic energy (GeV) and of the energy transfer ν (GeV).

use crate::constants::{ALPHA_EM, ELECTRON_MASS, ELECTRON_RADIUS};
use crate::error::{Result, TransportError};
use crate::event::Event;
use crate::physics::momentum;
use crate::tables::Element;
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

/// Name selecting the built-in model of a process slot.
pub const DEFAULT_MODEL: &str = "default";

/// Discrete energy loss process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProcessKind {
    Bremsstrahlung,
    PairProduction,
    Photonuclear,
    Ionisation,
}

impl ProcessKind {
    pub const ALL: [ProcessKind; 4] = [
        ProcessKind::Bremsstrahlung,
        ProcessKind::PairProduction,
        ProcessKind::Photonuclear,
        ProcessKind::Ionisation,
    ];

    /// Position of the process in per-component accumulators.
    pub fn index(self) -> usize {
        match self {
            ProcessKind::Bremsstrahlung => 0,
            ProcessKind::PairProduction => 1,
            ProcessKind::Photonuclear => 2,
            ProcessKind::Ionisation => 3,
        }
    }

    pub fn from_index(index: usize) -> Option<Self> {
        Self::ALL.get(index).copied()
    }

    /// Vertex event flagged when the process occurs.
    pub fn event(self) -> Event {
        match self {
            ProcessKind::Bremsstrahlung => Event::VERTEX_BREMSSTRAHLUNG,
            ProcessKind::PairProduction => Event::VERTEX_PAIR_CREATION,
            ProcessKind::Photonuclear => Event::VERTEX_PHOTONUCLEAR,
            ProcessKind::Ionisation => Event::VERTEX_DELTA_RAY,
        }
    }

    pub fn is_radiative(self) -> bool {
        self != ProcessKind::Ionisation
    }
}

/// Two branch power law ν^-α bounding a differential cross section.
///
/// The low branch applies below `x_break · K`, the high branch above. Branches
/// are joined continuously at the break.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Envelope {
    pub alpha_low: f64,
    pub alpha_high: f64,
    pub x_break: f64,
}

/// A differential cross section model for one process.
pub trait DifferentialCrossSection: Send + Sync {
    /// dσ/dν per atom (m²/GeV).
    fn dcs(&self, element: &Element, mass: f64, kinetic: f64, transfer: f64) -> f64;

    /// Kinematic range of the energy transfer.
    fn transfer_range(&self, _element: &Element, _mass: f64, kinetic: f64) -> (f64, f64) {
        (0.0, kinetic)
    }

    /// Power law envelope used for rejection sampling.
    fn envelope(&self) -> Envelope {
        Envelope {
            alpha_low: 1.0,
            alpha_high: 1.0,
            x_break: 0.5,
        }
    }

    /// Cosine of the projectile deflection for a transfer `transfer`, given a
    /// uniform deviate `u`.
    fn polar(&self, mass: f64, kinetic: f64, transfer: f64, u: f64) -> f64 {
        radiative_polar(mass, kinetic, transfer, u)
    }
}

/// Lorentzian deflection with critical angle θc = mν/(E(E−ν)).
pub fn radiative_polar(mass: f64, kinetic: f64, transfer: f64, u: f64) -> f64 {
    let energy = kinetic + mass;
    let remaining = energy - transfer;
    if remaining <= 0.0 {
        return 1.0;
    }
    let theta_c = mass * transfer / (energy * remaining);
    let u = u.min(1.0 - f64::EPSILON);
    let theta = (theta_c * (u / (1.0 - u)).sqrt()).min(std::f64::consts::PI);
    theta.cos()
}

/// Largest energy transfer to a free electron at rest.
pub fn max_delta_ray(mass: f64, kinetic: f64) -> f64 {
    let p2 = kinetic * (kinetic + 2.0 * mass);
    2.0 * ELECTRON_MASS * p2 / (mass * mass + ELECTRON_MASS * ELECTRON_MASS + 2.0 * ELECTRON_MASS * (kinetic + mass))
}

/// Close collisions with atomic electrons, treated as free spin 1/2 targets.
#[derive(Debug, Clone, Copy, Default)]
pub struct Ionisation;

impl DifferentialCrossSection for Ionisation {
    fn dcs(&self, element: &Element, mass: f64, kinetic: f64, transfer: f64) -> f64 {
        let nu_max = max_delta_ray(mass, kinetic);
        if transfer <= 0.0 || transfer > nu_max {
            return 0.0;
        }
        let energy = kinetic + mass;
        let p2 = kinetic * (kinetic + 2.0 * mass);
        let beta2 = p2 / (energy * energy);
        let spin = 1.0 - beta2 * transfer / nu_max + 0.5 * (transfer / energy).powi(2);
        let value = 2.0 * std::f64::consts::PI * element.z * ELECTRON_RADIUS * ELECTRON_RADIUS * ELECTRON_MASS
            / (beta2 * transfer * transfer)
            * spin;
        value.max(0.0)
    }

    fn transfer_range(&self, element: &Element, mass: f64, kinetic: f64) -> (f64, f64) {
        (element.i, max_delta_ray(mass, kinetic))
    }

    fn envelope(&self) -> Envelope {
        Envelope {
            alpha_low: 2.0,
            alpha_high: 2.0,
            x_break: 0.5,
        }
    }

    fn polar(&self, mass: f64, kinetic: f64, transfer: f64, _u: f64) -> f64 {
        let p = momentum(mass, kinetic);
        let p1 = momentum(mass, kinetic - transfer);
        let pe = momentum(ELECTRON_MASS, transfer);
        if p <= 0.0 || p1 <= 0.0 {
            return 1.0;
        }
        ((p * p + p1 * p1 - pe * pe) / (2.0 * p * p1)).clamp(-1.0, 1.0)
    }
}

/// Bremsstrahlung with complete screening of the nucleus by atomic electrons.
///
/// The Z(Z+1) factor adds the atomic electrons to the nuclear term.
#[derive(Debug, Clone, Copy, Default)]
pub struct Bremsstrahlung;

impl DifferentialCrossSection for Bremsstrahlung {
    fn dcs(&self, element: &Element, mass: f64, kinetic: f64, transfer: f64) -> f64 {
        if transfer <= 0.0 || transfer >= kinetic {
            return 0.0;
        }
        let energy = kinetic + mass;
        let v = transfer / energy;
        let z13 = element.z.powf(-1.0 / 3.0);
        let delta = mass * mass * transfer / (2.0 * energy * (energy - transfer));
        let b = 183.0 * z13;
        let phi = (b * mass / ELECTRON_MASS / (1.0 + delta * 0.5f64.exp() * b / ELECTRON_MASS)).ln();
        if phi <= 0.0 {
            return 0.0;
        }
        let rm = ELECTRON_RADIUS * ELECTRON_MASS / mass;
        4.0 * ALPHA_EM * rm * rm * element.z * (element.z + 1.0) * phi * (4.0 / 3.0 * (1.0 - v) + v * v)
            / transfer
    }
}

/// Electron pair creation in the field of the nucleus, logarithmic form.
#[derive(Debug, Clone, Copy, Default)]
pub struct PairProduction;

const PAIR_NORMALISATION: f64 = 0.03;

impl DifferentialCrossSection for PairProduction {
    fn dcs(&self, element: &Element, mass: f64, kinetic: f64, transfer: f64) -> f64 {
        let threshold = 4.0 * ELECTRON_MASS;
        if transfer <= threshold || transfer >= kinetic {
            return 0.0;
        }
        let v = transfer / (kinetic + mass);
        let ar = ALPHA_EM * ELECTRON_RADIUS;
        PAIR_NORMALISATION * ar * ar * element.z * (element.z + 1.0) * (1.0 - v) * (transfer / threshold).ln()
            / transfer
    }

    fn transfer_range(&self, _element: &Element, _mass: f64, kinetic: f64) -> (f64, f64) {
        (4.0 * ELECTRON_MASS, kinetic)
    }
}

/// Inelastic scattering on nuclei through virtual photons, with a
/// Bezrukov–Bugaev like dependence on the transfer.
#[derive(Debug, Clone, Copy, Default)]
pub struct Photonuclear;

const PHOTONUCLEAR_THRESHOLD: f64 = 0.2;

/// Real photon–nucleon cross section (m²).
pub fn photon_nucleon(nu: f64) -> f64 {
    let l = (0.0213 * nu).ln();
    (114.3 + 1.647 * l * l) * 1e-34
}

impl DifferentialCrossSection for Photonuclear {
    fn dcs(&self, element: &Element, mass: f64, kinetic: f64, transfer: f64) -> f64 {
        if transfer < PHOTONUCLEAR_THRESHOLD || transfer >= kinetic {
            return 0.0;
        }
        let v = transfer / (kinetic + mass);
        let t = mass * mass * v * v / (1.0 - v);
        let f = (1.0 - v + 0.5 * v * v) * (1.0 + 0.54 / t).ln();
        ALPHA_EM / std::f64::consts::PI * element.a * photon_nucleon(transfer) * f / transfer
    }

    fn transfer_range(&self, _element: &Element, _mass: f64, kinetic: f64) -> (f64, f64) {
        (PHOTONUCLEAR_THRESHOLD, kinetic)
    }

    fn envelope(&self) -> Envelope {
        Envelope {
            alpha_low: 1.0,
            alpha_high: 2.0,
            x_break: 0.1,
        }
    }
}

static IONISATION: Ionisation = Ionisation;
static BREMSSTRAHLUNG: Bremsstrahlung = Bremsstrahlung;
static PAIR_PRODUCTION: PairProduction = PairProduction;
static PHOTONUCLEAR: Photonuclear = Photonuclear;

static REGISTRY: Lazy<RwLock<HashMap<String, Arc<dyn DifferentialCrossSection>>>> =
    Lazy::new(|| RwLock::new(HashMap::new()));

/// Register an external model under `name`, replacing any previous one.
pub fn register_model(name: &str, model: Arc<dyn DifferentialCrossSection>) -> Result<()> {
    if name == DEFAULT_MODEL {
        return Err(TransportError::model(format!(
            "'{}' is reserved for the built-in models",
            DEFAULT_MODEL
        )));
    }
    let mut registry = REGISTRY
        .write()
        .map_err(|_| TransportError::model("model registry is poisoned"))?;
    registry.insert(name.to_string(), model);
    Ok(())
}

/// Look up a registered external model.
pub fn registered_model(name: &str) -> Option<Arc<dyn DifferentialCrossSection>> {
    REGISTRY.read().ok().and_then(|registry| registry.get(name).cloned())
}

/// Growing factor on the rejection bound of a model, shared by every clone
/// of the resolved model. It starts at 1 and only increases.
#[derive(Debug)]
pub struct Margin(AtomicU64);

impl Margin {
    pub fn new() -> Self {
        Self(AtomicU64::new(1f64.to_bits()))
    }

    pub fn get(&self) -> f64 {
        f64::from_bits(self.0.load(Ordering::Relaxed))
    }

    /// Raise the margin to at least `value`.
    pub fn raise(&self, value: f64) {
        let _ = self.0.fetch_update(Ordering::Relaxed, Ordering::Relaxed, |bits| {
            (value > f64::from_bits(bits)).then(|| value.to_bits())
        });
    }
}

impl Default for Margin {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Clone)]
enum Source {
    BuiltIn(ProcessKind),
    External(String, Arc<dyn DifferentialCrossSection>),
}

/// Resolved model serving one process slot.
#[derive(Clone)]
pub struct ProcessModel {
    source: Source,
    margin: Arc<Margin>,
}

impl ProcessModel {
    pub fn built_in(kind: ProcessKind) -> Self {
        Self {
            source: Source::BuiltIn(kind),
            margin: Arc::new(Margin::new()),
        }
    }

    /// Resolve `name` for the slot `kind`.
    pub fn resolve(kind: ProcessKind, name: &str) -> Result<Self> {
        if name == DEFAULT_MODEL {
            return Ok(Self::built_in(kind));
        }
        registered_model(name)
            .map(|model| Self {
                source: Source::External(name.to_string(), model),
                margin: Arc::new(Margin::new()),
            })
            .ok_or_else(|| TransportError::model(format!("no model registered as '{}' for {:?}", name, kind)))
    }

    pub fn name(&self) -> &str {
        match &self.source {
            Source::BuiltIn(_) => DEFAULT_MODEL,
            Source::External(name, _) => name,
        }
    }

    /// Factor applied on top of the scanned rejection bound.
    pub fn margin(&self) -> &Margin {
        &self.margin
    }

    fn model(&self) -> &dyn DifferentialCrossSection {
        match &self.source {
            Source::BuiltIn(ProcessKind::Bremsstrahlung) => &BREMSSTRAHLUNG,
            Source::BuiltIn(ProcessKind::PairProduction) => &PAIR_PRODUCTION,
            Source::BuiltIn(ProcessKind::Photonuclear) => &PHOTONUCLEAR,
            Source::BuiltIn(ProcessKind::Ionisation) => &IONISATION,
            Source::External(_, model) => model.as_ref(),
        }
    }

    #[inline]
    pub fn dcs(&self, element: &Element, mass: f64, kinetic: f64, transfer: f64) -> f64 {
        self.model().dcs(element, mass, kinetic, transfer)
    }

    #[inline]
    pub fn transfer_range(&self, element: &Element, mass: f64, kinetic: f64) -> (f64, f64) {
        self.model().transfer_range(element, mass, kinetic)
    }

    #[inline]
    pub fn envelope(&self) -> Envelope {
        self.model().envelope()
    }

    #[inline]
    pub fn polar(&self, mass: f64, kinetic: f64, transfer: f64, u: f64) -> f64 {
        self.model().polar(mass, kinetic, transfer, u)
    }
}

impl fmt::Debug for ProcessModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.source {
            Source::BuiltIn(kind) => write!(f, "BuiltIn({:?})", kind),
            Source::External(name, _) => write!(f, "External({:?})", name),
        }
    }
}
