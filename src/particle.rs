use crate::constants::{MUON_CTAU, MUON_MASS, TAU_CTAU, TAU_MASS};
use nalgebra::Vector3;
use serde::{Deserialize, Serialize};

/// Transported lepton species: rest mass and decay length.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Particle {
    pub name: String,
    /// Rest mass (GeV/c²).
    pub mass: f64,
    /// Decay length c·τ (m).
    pub ctau: f64,
}

impl Particle {
    pub fn muon() -> Self {
        Self {
            name: String::from("muon"),
            mass: MUON_MASS,
            ctau: MUON_CTAU,
        }
    }

    pub fn tau() -> Self {
        Self {
            name: String::from("tau"),
            mass: TAU_MASS,
            ctau: TAU_CTAU,
        }
    }

    /// Short lived species cannot be weighted backward: the decay weight
    /// underflows long before any realistic energy limit is reached.
    pub fn is_short_lived(&self) -> bool {
        self.ctau < 1.0
    }
}

/// Dynamic state of a transported lepton, owned by the caller and updated in
/// place by the engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParticleState {
    /// Charge sign, +1 or -1.
    pub charge: f64,
    /// Kinetic energy (GeV).
    pub kinetic: f64,
    /// Travelled distance (m).
    pub distance: f64,
    /// Travelled grammage (kg/m²).
    pub grammage: f64,
    /// Proper time c·τ (m).
    pub time: f64,
    /// Monte-Carlo weight.
    pub weight: f64,
    /// Position (m).
    pub position: Vector3<f64>,
    /// Unit momentum direction.
    pub direction: Vector3<f64>,
    /// Set when the particle decayed during transport.
    pub decayed: bool,
}

impl ParticleState {
    pub fn new(charge: f64, kinetic: f64, position: [f64; 3], direction: [f64; 3]) -> Self {
        Self {
            charge,
            kinetic,
            distance: 0.0,
            grammage: 0.0,
            time: 0.0,
            weight: 1.0,
            position: Vector3::from(position),
            direction: Vector3::from(direction),
            decayed: false,
        }
    }

    /// Reset the path counters while keeping the kinematics.
    pub fn reset_counters(&mut self) {
        self.distance = 0.0;
        self.grammage = 0.0;
        self.time = 0.0;
    }
}
