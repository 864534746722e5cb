// Geometry oracle interface and two simple implementations.
//
// The engine only asks where a particle is and what the local properties of
// its medium are. Intersections are the oracle's business: it returns a step
// hint that bounds how far the particle can move before the answer may change.
use crate::constants::STEP_MIN;
use crate::error::{Result, TransportError};
use crate::particle::ParticleState;
use nalgebra::Vector3;
use serde::{Deserialize, Serialize};

/// Bound on the step returned by the oracle.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum StepHint {
    /// The medium extends to infinity.
    Unbounded,
    /// Exact distance to the next boundary along the track.
    Exact(f64),
    /// Conservative distance, the boundary is at least this far away.
    Approximate(f64),
}

/// Answer of [`Medium::locate`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Location {
    /// Material index, `None` outside of the geometry.
    pub material: Option<usize>,
    pub step: StepHint,
}

/// Local properties of a medium.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Locals {
    /// Density (kg/m³).
    pub density: f64,
    /// Magnetic field (T).
    pub magnetic: Vector3<f64>,
    /// Length over which the properties hold, `None` when uniform over the
    /// whole medium.
    pub step: Option<f64>,
}

impl Locals {
    pub fn uniform(density: f64) -> Self {
        Self {
            density,
            magnetic: Vector3::zeros(),
            step: None,
        }
    }

    pub fn is_magnetized(&self) -> bool {
        self.magnetic.norm_squared() > 0.0
    }

    /// Check the properties returned by an oracle.
    pub fn validate(&self) -> Result<()> {
        if !(self.density.is_finite() && self.density > 0.0) {
            return Err(TransportError::density(format!("invalid density {}", self.density)));
        }
        if self.magnetic.iter().any(|b| !b.is_finite()) {
            return Err(TransportError::medium(format!("invalid magnetic field {:?}", self.magnetic)));
        }
        if let Some(step) = self.step {
            if !(step > 0.0) {
                return Err(TransportError::medium(format!("invalid locals step {}", step)));
            }
        }
        Ok(())
    }
}

/// Geometry oracle supplied by the caller.
pub trait Medium {
    fn locate(&mut self, state: &ParticleState) -> Location;

    fn locals(&mut self, material: usize, state: &ParticleState) -> Locals;
}

/// A single infinite medium.
#[derive(Debug, Clone, PartialEq)]
pub struct UniformMedium {
    pub material: usize,
    pub density: f64,
    pub magnetic: Vector3<f64>,
}

impl UniformMedium {
    pub fn new(material: usize, density: f64) -> Self {
        Self {
            material,
            density,
            magnetic: Vector3::zeros(),
        }
    }

    pub fn with_field(mut self, magnetic: [f64; 3]) -> Self {
        self.magnetic = Vector3::from(magnetic);
        self
    }
}

impl Medium for UniformMedium {
    fn locate(&mut self, _state: &ParticleState) -> Location {
        Location {
            material: Some(self.material),
            step: StepHint::Unbounded,
        }
    }

    fn locals(&mut self, _material: usize, _state: &ParticleState) -> Locals {
        Locals {
            density: self.density,
            magnetic: self.magnetic,
            step: None,
        }
    }
}

/// A slab of a layered medium.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Layer {
    pub material: usize,
    pub density: f64,
    /// Height of the top of the layer along the axis (m).
    pub top: f64,
}

/// Stack of slabs perpendicular to an axis. Layer `i` spans
/// `[top(i-1), top(i))`, the first one starting at `bottom`. Outside of the
/// stack the particle has left the geometry.
///
/// The oracle ignores the propagation sense, so both its step hint and the
/// validity of its locals are the distance along the track line to the nearest
/// plane of the current slab, on either side. Adjacent slabs may share a
/// material and differ only by their density.
#[derive(Debug, Clone, PartialEq)]
pub struct LayeredMedium {
    axis: Vector3<f64>,
    bottom: f64,
    layers: Vec<Layer>,
    magnetic: Vector3<f64>,
}

impl LayeredMedium {
    pub fn new(axis: [f64; 3], bottom: f64, layers: Vec<Layer>) -> Result<Self> {
        let axis = Vector3::from(axis);
        let norm = axis.norm();
        if !(norm > 0.0) {
            return Err(TransportError::value("the layer axis must not vanish"));
        }
        let mut previous = bottom;
        for layer in layers.iter() {
            if !(layer.top > previous) {
                return Err(TransportError::value(format!(
                    "layer tops must increase, got {} after {}",
                    layer.top, previous
                )));
            }
            if !(layer.density > 0.0) {
                return Err(TransportError::density(format!("invalid layer density {}", layer.density)));
            }
            previous = layer.top;
        }
        Ok(Self {
            axis: axis / norm,
            bottom,
            layers,
            magnetic: Vector3::zeros(),
        })
    }

    pub fn with_field(mut self, magnetic: [f64; 3]) -> Self {
        self.magnetic = Vector3::from(magnetic);
        self
    }

    /// Index of the layer containing `height`.
    fn layer(&self, height: f64) -> Option<usize> {
        if height < self.bottom {
            return None;
        }
        self.layers.iter().position(|layer| height < layer.top)
    }

    /// Distance along the track line from `state` to the nearest plane of
    /// layer `index`, `None` when the track runs parallel to the planes.
    fn clearance(&self, index: usize, state: &ParticleState) -> Option<f64> {
        let height = state.position.dot(&self.axis);
        let low = if index == 0 {
            self.bottom
        } else {
            self.layers[index - 1].top
        };
        let high = self.layers[index].top;
        let cosine = state.direction.dot(&self.axis).abs();
        if cosine > 0.0 {
            Some((height - low).min(high - height).max(0.0) / cosine)
        } else {
            None
        }
    }
}

impl Medium for LayeredMedium {
    fn locate(&mut self, state: &ParticleState) -> Location {
        let height = state.position.dot(&self.axis);
        match self.layer(height) {
            Some(index) => Location {
                material: Some(self.layers[index].material),
                step: self
                    .clearance(index, state)
                    .map_or(StepHint::Unbounded, StepHint::Approximate),
            },
            None => Location {
                material: None,
                step: StepHint::Unbounded,
            },
        }
    }

    fn locals(&mut self, _material: usize, state: &ParticleState) -> Locals {
        let height = state.position.dot(&self.axis);
        match self.layer(height) {
            Some(index) => Locals {
                density: self.layers[index].density,
                magnetic: self.magnetic,
                step: Some(
                    self.clearance(index, state)
                        .map_or(f64::MAX, |d| d.max(STEP_MIN)),
                ),
            },
            None => Locals {
                density: f64::NAN,
                magnetic: self.magnetic,
                step: None,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state_at(z: f64) -> ParticleState {
        ParticleState::new(-1.0, 1.0, [0.0, 0.0, z], [0.0, 0.0, 1.0])
    }

    #[test]
    fn test_uniform_medium() {
        let mut medium = UniformMedium::new(2, 1e3).with_field([0.0, 1.0, 0.0]);
        let location = medium.locate(&state_at(5.0));
        assert_eq!(location.material, Some(2));
        assert_eq!(location.step, StepHint::Unbounded);
        let locals = medium.locals(2, &state_at(5.0));
        assert!(locals.is_magnetized());
        assert!(locals.validate().is_ok());
    }

    #[test]
    fn test_layers_and_hints() {
        let layers = vec![
            Layer {
                material: 0,
                density: 2.65e3,
                top: 10.0,
            },
            Layer {
                material: 1,
                density: 1e3,
                top: 15.0,
            },
        ];
        let mut medium = LayeredMedium::new([0.0, 0.0, 1.0], 0.0, layers).unwrap();
        let location = medium.locate(&state_at(9.0));
        assert_eq!(location.material, Some(0));
        assert_eq!(location.step, StepHint::Approximate(1.0));
        assert_eq!(medium.locate(&state_at(10.0)).material, Some(1));
        assert_eq!(medium.locate(&state_at(15.0)).material, None);
        assert_eq!(medium.locate(&state_at(-1.0)).material, None);
        assert_eq!(medium.locals(1, &state_at(12.0)).density, 1e3);
        assert_eq!(medium.locals(1, &state_at(12.0)).step, Some(2.0));
        assert_eq!(medium.locals(0, &state_at(10.0 - 1e-9)).step, Some(STEP_MIN));
    }

    #[test]
    fn test_hints_follow_the_track_line() {
        let layers = vec![Layer {
            material: 0,
            density: 1e3,
            top: 10.0,
        }];
        let mut medium = LayeredMedium::new([0.0, 0.0, 1.0], 0.0, layers).unwrap();
        let oblique = ParticleState::new(-1.0, 1.0, [0.0, 0.0, 8.0], [0.8, 0.0, 0.6]);
        match medium.locate(&oblique).step {
            StepHint::Approximate(d) => assert!((d - 2.0 / 0.6).abs() < 1e-12, "d = {}", d),
            hint => panic!("unexpected hint {:?}", hint),
        }
        let parallel = ParticleState::new(-1.0, 1.0, [0.0, 0.0, 8.0], [1.0, 0.0, 0.0]);
        assert_eq!(medium.locate(&parallel).step, StepHint::Unbounded);
        assert_eq!(medium.locals(0, &parallel).step, Some(f64::MAX));
    }

    #[test]
    fn test_invalid_layers() {
        let layers = vec![Layer {
            material: 0,
            density: 1.0,
            top: -1.0,
        }];
        assert!(LayeredMedium::new([0.0, 0.0, 1.0], 0.0, layers).is_err());
        assert!(LayeredMedium::new([0.0, 0.0, 0.0], 0.0, Vec::new()).is_err());
    }

    #[test]
    fn test_locals_validation() {
        assert_eq!(
            Locals::uniform(-1.0).validate().unwrap_err().code,
            crate::error::ErrorCode::DensityError
        );
        assert!(Locals::uniform(1.0).validate().is_ok());
    }
}
