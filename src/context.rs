// Simulation context: the per thread mutable side of the engine.
//
// A context owns its configuration, random source, optional recorder,
// bracketing memory and Coulomb scratch space, and shares the physics tables
// read-only. Contexts are reused across tracks; they must not be shared
// between concurrently transported particles.
use crate::config::TransportConfig;
use crate::coulomb::CoulombWorkspace;
use crate::error::{ErrorHandler, Result};
use crate::event::Event;
use crate::interpolation::IndexCache;
use crate::medium::Medium;
use crate::particle::ParticleState;
use crate::random::RandomSource;
use crate::recorder::Recorder;
use crate::tables::PhysicsTables;
use crate::transport;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Result of a transport call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Outcome {
    pub event: Event,
    /// Media at the start and at the end of the transport.
    pub media: [Option<usize>; 2],
}

pub struct SimulationContext {
    pub(crate) tables: Arc<PhysicsTables>,
    pub config: TransportConfig,
    pub random: RandomSource,
    pub recorder: Option<Box<dyn Recorder>>,
    pub(crate) cache: IndexCache,
    pub(crate) workspace: CoulombWorkspace,
    /// Proper time at which the current track decays, when randomised.
    pub(crate) lifetime: Option<f64>,
}

impl SimulationContext {
    /// Context with the default configuration and a default seeded Mersenne
    /// Twister.
    pub fn new(tables: Arc<PhysicsTables>) -> Self {
        let workspace = CoulombWorkspace::with_capacity(tables.max_elements());
        Self {
            tables,
            config: TransportConfig::default(),
            random: RandomSource::default(),
            recorder: None,
            cache: IndexCache::new(),
            workspace,
            lifetime: None,
        }
    }

    pub fn with_config(mut self, config: TransportConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_random(mut self, random: RandomSource) -> Self {
        self.random = random;
        self
    }

    pub fn tables(&self) -> &Arc<PhysicsTables> {
        &self.tables
    }

    /// Proper time (m) at which the last randomised track was set to decay.
    pub fn lifetime(&self) -> Option<f64> {
        self.lifetime
    }

    /// Transport `state` through `medium` until a stopping event.
    ///
    /// On error the state and the decay lifetime are left as they were on
    /// input. Frames already passed to the recorder are not withdrawn.
    pub fn transport(&mut self, state: &mut ParticleState, medium: &mut dyn Medium) -> Result<Outcome> {
        let snapshot = state.clone();
        let lifetime = self.lifetime;
        let result = transport::transport(self, state, medium);
        if result.is_err() {
            *state = snapshot;
            self.lifetime = lifetime;
        }
        result
    }

    /// Transport, routing any error to `handler`.
    pub fn transport_or_handle(
        &mut self,
        state: &mut ParticleState,
        medium: &mut dyn Medium,
        handler: &dyn ErrorHandler,
    ) -> Option<Outcome> {
        match self.transport(state, medium) {
            Ok(outcome) => Some(outcome),
            Err(err) => {
                handler.handle(&err);
                None
            }
        }
    }
}

impl std::fmt::Debug for SimulationContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SimulationContext")
            .field("particle", &self.tables.particle().name)
            .field("config", &self.config)
            .field("random", &self.random)
            .field("recorder", &self.recorder.is_some())
            .field("lifetime", &self.lifetime)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{DecayMode, EnergyLossMode, ScatteringMode};
    use crate::error::{ErrorCode, LogHandler};
    use crate::medium::UniformMedium;
    use crate::particle::Particle;
    use crate::tables::builder::standard_rock;

    fn context() -> SimulationContext {
        let tables = Arc::new(standard_rock(Particle::muon()).unwrap());
        SimulationContext::new(tables)
    }

    #[test]
    fn test_failed_transport_leaves_state_unchanged() {
        let mut context = context();
        let mut state = ParticleState::new(-1.0, 1.0, [0.0; 3], [0.0, 0.0, 2.0]);
        let before = state.clone();
        let mut medium = UniformMedium::new(0, 2.65e3);
        let err = context.transport(&mut state, &mut medium).unwrap_err();
        assert_eq!(err.code, ErrorCode::DirectionError);
        assert_eq!(state, before);
    }

    #[test]
    fn test_failed_transport_keeps_the_previous_lifetime() {
        let mut context = context().with_random(RandomSource::seeded(4));
        context.config.energy_loss = EnergyLossMode::Csda;
        context.config.scattering = ScatteringMode::Disabled;
        context.config.decay = DecayMode::Randomise;
        context.config.limits.distance = Some(1.0);
        let mut state = ParticleState::new(-1.0, 1.0, [0.0; 3], [0.0, 0.0, 1.0]);
        context
            .transport(&mut state, &mut UniformMedium::new(0, 2.65e3))
            .unwrap();
        let lifetime = context.lifetime();
        assert!(lifetime.is_some());

        let mut state = ParticleState::new(-1.0, 1.0, [0.0; 3], [0.0, 0.0, 1.0]);
        let err = context
            .transport(&mut state, &mut UniformMedium::new(0, 0.0))
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::DensityError);
        assert_eq!(context.lifetime(), lifetime);
    }

    #[test]
    fn test_density_error_is_reported() {
        let mut context = context();
        let mut state = ParticleState::new(-1.0, 1.0, [0.0; 3], [0.0, 0.0, 1.0]);
        let mut medium = UniformMedium::new(0, 0.0);
        let err = context.transport(&mut state, &mut medium).unwrap_err();
        assert_eq!(err.code, ErrorCode::DensityError);
    }

    #[test]
    fn test_missing_random_is_reported_before_transport() {
        let mut context = context().with_random(RandomSource::none());
        let mut state = ParticleState::new(-1.0, 1.0, [0.0; 3], [0.0, 0.0, 1.0]);
        let mut medium = UniformMedium::new(0, 2.65e3);
        assert!(context
            .transport_or_handle(&mut state, &mut medium, &LogHandler)
            .is_none());

        context.config.energy_loss = EnergyLossMode::Csda;
        context.config.scattering = ScatteringMode::Disabled;
        context.config.limits.distance = Some(10.0);
        let outcome = context
            .transport_or_handle(&mut state, &mut medium, &LogHandler)
            .unwrap();
        assert_eq!(outcome.event, Event::LIMIT_DISTANCE);
        assert_eq!(outcome.media, [Some(0), Some(0)]);
        assert!((state.distance - 10.0).abs() < 1e-12);
    }
}
