// Per context transport settings.
//
// A `TransportConfig` lives in its simulation context and is validated at the
// start of every transport call, before the particle state is touched.
use crate::constants::DEFAULT_ACCURACY;
use crate::error::{Result, TransportError};
use crate::event::Event;
use crate::particle::Particle;
use crate::tables::Scheme;
use serde::{Deserialize, Serialize};

/// Treatment of the energy loss.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum EnergyLossMode {
    /// All losses averaged (continuous slowing down).
    Csda,
    /// Soft losses averaged, hard losses sampled as discrete vertices.
    #[default]
    Mixed,
    /// As `Mixed`, with the fluctuations of the soft losses.
    Straggled,
}

impl EnergyLossMode {
    pub fn scheme(self) -> Scheme {
        match self {
            EnergyLossMode::Csda => Scheme::Csda,
            EnergyLossMode::Mixed | EnergyLossMode::Straggled => Scheme::Hybrid,
        }
    }
}

/// Treatment of the Coulomb scattering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ScatteringMode {
    /// Straight tracks.
    Disabled,
    /// Every deflection folded into the soft multiple scattering.
    Soft,
    /// Soft multiple scattering below the cutoff, hard vertices above.
    #[default]
    Mixed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum DecayMode {
    Disabled,
    /// Survival probability folded into the weight.
    #[default]
    Weight,
    /// Decay vertex sampled from the lifetime.
    Randomise,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Direction {
    #[default]
    Forward,
    /// Reverse Monte-Carlo, from the final state back to its ancestors.
    Backward,
}

impl Direction {
    /// +1 forward, -1 backward.
    pub fn sign(self) -> f64 {
        match self {
            Direction::Forward => 1.0,
            Direction::Backward => -1.0,
        }
    }
}

/// External limits, as absolute values of the state counters. `None`
/// disables a limit.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Limits {
    /// Kinetic energy (GeV).
    pub energy: Option<f64>,
    /// Travelled distance (m).
    pub distance: Option<f64>,
    /// Travelled grammage (kg/m²).
    pub grammage: Option<f64>,
    /// Proper time c·τ (m).
    pub time: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    pub energy_loss: EnergyLossMode,
    pub scattering: ScatteringMode,
    pub decay: DecayMode,
    pub direction: Direction,
    /// Relative accuracy of the stepping, in (0, 1].
    pub accuracy: f64,
    pub limits: Limits,
    /// Optional events stopping the transport: medium changes and vertices.
    pub events: Event,
    /// Localise boundary crossings by bisection.
    pub exact_localisation: bool,
    /// Record the state before and after every vertex.
    pub record_vertices: bool,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            energy_loss: EnergyLossMode::default(),
            scattering: ScatteringMode::default(),
            decay: DecayMode::default(),
            direction: Direction::default(),
            accuracy: DEFAULT_ACCURACY,
            limits: Limits::default(),
            events: Event::NONE,
            exact_localisation: true,
            record_vertices: false,
        }
    }
}

impl TransportConfig {
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Whether transport with these settings draws random numbers.
    pub fn requires_random(&self) -> bool {
        self.energy_loss != EnergyLossMode::Csda
            || self.scattering != ScatteringMode::Disabled
            || self.decay == DecayMode::Randomise
    }

    /// Check the settings for `particle`, with or without a random engine.
    pub fn validate(&self, particle: &Particle, random_available: bool) -> Result<()> {
        if !(self.accuracy > 0.0 && self.accuracy <= 1.0) {
            return Err(TransportError::accuracy(format!(
                "accuracy {} is not in (0, 1]",
                self.accuracy
            )));
        }
        let limits = [
            ("energy", self.limits.energy),
            ("distance", self.limits.distance),
            ("grammage", self.limits.grammage),
            ("time", self.limits.time),
        ];
        for (name, limit) in limits {
            if let Some(value) = limit {
                if !(value.is_finite() && value >= 0.0) {
                    return Err(TransportError::value(format!("invalid {} limit {}", name, value)));
                }
            }
        }
        if !(Event::MEDIUM | Event::VERTEX).contains(self.events) {
            return Err(TransportError::configuration(format!(
                "only medium and vertex events can stop a transport, got {:?}",
                self.events
            )));
        }
        if self.requires_random() && !random_available {
            return Err(TransportError::missing_random(
                "randomised transport requires a random engine",
            ));
        }
        if self.direction == Direction::Backward {
            if self.energy_loss == EnergyLossMode::Straggled {
                return Err(TransportError::configuration(
                    "straggling cannot be reversed, use the mixed energy loss backward",
                ));
            }
            match self.decay {
                DecayMode::Randomise => {
                    return Err(TransportError::decay("decay vertices cannot be sampled backward"));
                }
                DecayMode::Weight if particle.is_short_lived() => {
                    return Err(TransportError::decay(format!(
                        "backward weighted decay is not supported for {}",
                        particle.name
                    )));
                }
                _ => {}
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;

    #[test]
    fn test_default_config_is_valid() {
        let config = TransportConfig::default();
        assert!(config.validate(&Particle::muon(), true).is_ok());
        assert_eq!(config.energy_loss.scheme(), Scheme::Hybrid);
    }

    #[test]
    fn test_missing_random_is_reported() {
        let config = TransportConfig::default();
        let err = config.validate(&Particle::muon(), false).unwrap_err();
        assert_eq!(err.code, ErrorCode::MissingRandom);

        let deterministic = TransportConfig {
            energy_loss: EnergyLossMode::Csda,
            scattering: ScatteringMode::Disabled,
            ..Default::default()
        };
        assert!(deterministic.validate(&Particle::muon(), false).is_ok());
    }

    #[test]
    fn test_accuracy_and_limits() {
        let mut config = TransportConfig {
            accuracy: 0.0,
            ..Default::default()
        };
        assert_eq!(
            config.validate(&Particle::muon(), true).unwrap_err().code,
            ErrorCode::AccuracyError
        );
        config.accuracy = 0.1;
        config.limits.distance = Some(-1.0);
        assert_eq!(
            config.validate(&Particle::muon(), true).unwrap_err().code,
            ErrorCode::ValueError
        );
    }

    #[test]
    fn test_backward_restrictions() {
        let mut config = TransportConfig {
            direction: Direction::Backward,
            decay: DecayMode::Randomise,
            ..Default::default()
        };
        assert_eq!(
            config.validate(&Particle::muon(), true).unwrap_err().code,
            ErrorCode::DecayError
        );
        config.decay = DecayMode::Weight;
        assert!(config.validate(&Particle::muon(), true).is_ok());
        assert_eq!(
            config.validate(&Particle::tau(), true).unwrap_err().code,
            ErrorCode::DecayError
        );
        config.energy_loss = EnergyLossMode::Straggled;
        assert_eq!(
            config.validate(&Particle::muon(), true).unwrap_err().code,
            ErrorCode::ConfigurationError
        );
    }

    #[test]
    fn test_stopping_events_are_restricted() {
        let config = TransportConfig {
            events: Event::LIMIT_ENERGY,
            ..Default::default()
        };
        assert_eq!(
            config.validate(&Particle::muon(), true).unwrap_err().code,
            ErrorCode::ConfigurationError
        );
    }

    #[test]
    fn test_json_with_defaults() {
        let config = TransportConfig::from_json(
            r#"{"energy_loss": "Csda", "direction": "Backward", "limits": {"energy": 100.0}}"#,
        )
        .unwrap();
        assert_eq!(config.energy_loss, EnergyLossMode::Csda);
        assert_eq!(config.direction.sign(), -1.0);
        assert_eq!(config.limits.energy, Some(100.0));
        assert_eq!(config.limits.time, None);
        assert_eq!(config.accuracy, DEFAULT_ACCURACY);
        assert!(config.exact_localisation);
        let back = TransportConfig::from_json(&config.to_json().unwrap()).unwrap();
        assert_eq!(back, config);
    }
}
