// Physical constants and engine tuning parameters.
//
// Units: GeV, m, kg, T. Proper times are expressed as c·τ in m.

/// Electron mass (GeV/c²).
pub const ELECTRON_MASS: f64 = 0.510_998_95e-3;
/// Muon mass (GeV/c²).
pub const MUON_MASS: f64 = 0.105_658_375_5;
/// Tau mass (GeV/c²).
pub const TAU_MASS: f64 = 1.776_86;
/// Muon c·τ (m).
pub const MUON_CTAU: f64 = 658.654;
/// Tau c·τ (m).
pub const TAU_CTAU: f64 = 87.03e-6;
/// Atomic mass unit (GeV/c²).
pub const ATOMIC_MASS_UNIT: f64 = 0.931_494_102_42;
/// Proton mass (GeV/c²).
pub const PROTON_MASS: f64 = 0.938_272_088_16;

/// Fine structure constant.
pub const ALPHA_EM: f64 = 7.297_352_569_3e-3;
/// Classical electron radius (m).
pub const ELECTRON_RADIUS: f64 = 2.817_940_326_2e-15;
/// ħc (GeV·m).
pub const HBAR_C: f64 = 1.973_269_804e-16;
/// Bohr radius (m).
pub const BOHR_RADIUS: f64 = 5.291_772_109_03e-11;
/// Avogadro's number (1/mol).
pub const AVOGADRO_NUMBER: f64 = 6.022_140_76e23;
/// Larmor conversion: rotation rate (rad/m) per T per 1/GeV.
pub const LARMOR_FACTOR: f64 = 0.299_792_458;

/// Relative cutoff on the energy transfer separating CEL from DEL.
pub const DEFAULT_CUTOFF: f64 = 5e-2;
/// Default numerical accuracy of the stepping.
pub const DEFAULT_ACCURACY: f64 = 1e-2;

/// Smallest physical step (m), the resolution floor of the stepping.
pub const STEP_MIN: f64 = 1e-7;
/// Relative grammage below which CEL is integrated by finite differences.
pub const SMALL_STEP_FRACTION: f64 = 1e-4;
/// Kinetic energy above which the range based step is capped by the
/// energy fraction, in units of the particle mass.
pub const ULTRA_RELATIVISTIC_GAMMA: f64 = 1e2;
/// Tolerance on the norm of the initial direction.
pub const DIRECTION_TOLERANCE: f64 = 1e-6;

/// Ratio of the hard elastic path to the total transport path.
pub const EHS_OVER_MSC: f64 = 1e-4;
/// Minimum hard elastic path (kg/m²).
pub const EHS_PATH_MIN: f64 = 1e-6;
/// Largest polar angle (rad) treated as soft scattering.
pub const MAX_SOFT_ANGLE: f64 = std::f64::consts::PI / 180.0;
/// Angle (as μ = sin²(θ/2)) below which the CM to lab transform is expanded.
pub const ASYMPTOTIC_ANGLE: f64 = 1e-6;

/// Bounded retries of the hard elastic angle rejection sampling.
pub const EHS_MAX_TRIALS: usize = 100;
/// Bounded retries of the DEL envelope rejection sampling.
pub const DEL_MAX_TRIALS: usize = 100;
/// Bounded retries of the truncated Gaussian straggling sampling.
pub const STRAGGLING_MAX_TRIALS: usize = 20;
/// Bisection iterations used to localise a boundary crossing.
pub const LOCALISATION_MAX_ITERATIONS: usize = 100;
