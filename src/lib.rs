// Stochastic transport of charged leptons through matter.
pub mod config;
pub mod constants;
pub mod context;
pub mod coulomb;
pub mod data;
pub mod dcs;
pub mod del;
pub mod error;
pub mod event;
pub mod interpolation;
pub mod medium;
pub mod mersenne;
pub mod particle;
pub mod physics;
pub mod quantities;
pub mod random;
pub mod recorder;
pub mod tables;
pub mod utilities;

mod planner;
mod stepper;
mod transport;

pub use config::{DecayMode, Direction, EnergyLossMode, Limits, ScatteringMode, TransportConfig};
pub use context::{Outcome, SimulationContext};
pub use dcs::{register_model, DifferentialCrossSection, ProcessKind};
pub use error::{ErrorCode, ErrorHandler, LogHandler, PanicHandler, Result, TransportError};
pub use event::Event;
pub use medium::{Layer, LayeredMedium, Locals, Location, Medium, StepHint, UniformMedium};
pub use mersenne::MersenneTwister;
pub use particle::{Particle, ParticleState};
pub use random::RandomSource;
pub use recorder::{Frame, FrameRecorder, Recorder};
pub use tables::{ModelSelection, PhysicsTables, Scheme, TableBuilder};
