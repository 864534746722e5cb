// Random source of a simulation context.
//
// Any `rand::RngCore` engine can be installed. The engine is optional: a
// context running fully deterministic transport (CSDA, no scattering, no
// randomised decay) needs none, and configuration validation reports a
// `MissingRandom` error before any draw is attempted otherwise.

use crate::mersenne::MersenneTwister;
use rand::{Rng, RngCore};

pub struct RandomSource {
    engine: Option<Box<dyn RngCore + Send>>,
    cached_gaussian: Option<f64>,
}

impl RandomSource {
    pub fn new(engine: impl RngCore + Send + 'static) -> Self {
        Self {
            engine: Some(Box::new(engine)),
            cached_gaussian: None,
        }
    }

    /// Source backed by the default Mersenne Twister engine.
    pub fn seeded(seed: u32) -> Self {
        Self::new(MersenneTwister::new(seed))
    }

    /// Source without engine, for deterministic transport.
    pub fn none() -> Self {
        Self {
            engine: None,
            cached_gaussian: None,
        }
    }

    pub fn is_available(&self) -> bool {
        self.engine.is_some()
    }

    pub fn set_engine(&mut self, engine: impl RngCore + Send + 'static) {
        self.engine = Some(Box::new(engine));
        self.cached_gaussian = None;
    }

    /// Remove and return the installed engine.
    pub fn take_engine(&mut self) -> Option<Box<dyn RngCore + Send>> {
        self.cached_gaussian = None;
        self.engine.take()
    }

    /// Uniform deviate in [0, 1).
    #[inline]
    pub fn uniform(&mut self) -> f64 {
        match self.engine.as_mut() {
            Some(engine) => engine.gen::<f64>(),
            None => unreachable!("random draw without a random engine"),
        }
    }

    /// Exponential deviate with unit mean.
    #[inline]
    pub fn exponential(&mut self) -> f64 {
        -(1.0 - self.uniform()).ln()
    }

    /// Standard normal deviate (Box–Muller, second variate cached).
    pub fn gaussian(&mut self) -> f64 {
        if let Some(value) = self.cached_gaussian.take() {
            return value;
        }
        let r = (-2.0 * (1.0 - self.uniform()).ln()).sqrt();
        let phi = 2.0 * std::f64::consts::PI * self.uniform();
        self.cached_gaussian = Some(r * phi.sin());
        r * phi.cos()
    }
}

impl Default for RandomSource {
    fn default() -> Self {
        Self::new(MersenneTwister::default())
    }
}

impl std::fmt::Debug for RandomSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RandomSource")
            .field("engine", &self.engine.is_some())
            .field("cached_gaussian", &self.cached_gaussian)
            .finish()
    }
}
