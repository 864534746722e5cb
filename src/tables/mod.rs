// Physics tables: immutable per material tabulations over a shared kinetic
// energy grid.
//
// Tables are produced upstream (or by `builder::TableBuilder`), validated once
// at construction and never rechecked per access. They are shared read-only
// between simulation contexts through an `Arc`.
pub mod builder;

use crate::constants::DEFAULT_CUTOFF;
use crate::dcs::{ProcessKind, ProcessModel, DEFAULT_MODEL};
use crate::error::{Result, TransportError};
use crate::interpolation::{self, locate, pchip_slopes, IndexCache, TableFamily};
use crate::particle::Particle;
use serde::{Deserialize, Serialize};

pub use builder::TableBuilder;

/// Atomic element.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Element {
    pub name: String,
    /// Atomic number.
    pub z: f64,
    /// Molar mass (g/mol).
    pub a: f64,
    /// Mean excitation energy (GeV).
    pub i: f64,
}

/// Element of a material with its mass fraction.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Component {
    /// Index into [`PhysicsTables::elements`].
    pub element: usize,
    pub fraction: f64,
}

/// Energy loss scheme of the tabulation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Scheme {
    /// Continuous slowing down, all losses averaged.
    Csda,
    /// Losses below the cutoff averaged, losses above sampled discretely.
    Hybrid,
}

/// Node values of a quantity with the slopes of its monotone interpolant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Table {
    pub values: Vec<f64>,
    #[serde(default)]
    pub slopes: Vec<f64>,
}

impl Table {
    /// Table whose slopes are computed when bound to the grid.
    pub fn new(values: Vec<f64>) -> Self {
        Self {
            values,
            slopes: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn first(&self) -> f64 {
        self.values[0]
    }

    pub fn last(&self) -> f64 {
        self.values[self.values.len() - 1]
    }

    pub fn last_slope(&self) -> f64 {
        self.slopes[self.slopes.len() - 1]
    }

    fn bind(&mut self, grid: &[f64], what: &str) -> Result<()> {
        if self.values.len() != grid.len() {
            return Err(TransportError::table(format!(
                "{} has {} values for a grid of {} nodes",
                what,
                self.values.len(),
                grid.len()
            )));
        }
        if self.values.iter().any(|v| !v.is_finite()) {
            return Err(TransportError::table(format!("{} has non finite values", what)));
        }
        if self.slopes.len() != grid.len() {
            if !self.slopes.is_empty() {
                log::warn!("{}: derivative table of the wrong size, recomputed", what);
            }
            self.slopes = pchip_slopes(grid, &self.values);
        }
        Ok(())
    }

    fn check_monotone(&self, what: &str) -> Result<()> {
        if self.values.windows(2).any(|w| w[1] < w[0]) {
            return Err(TransportError::table(format!("{} is not monotone", what)));
        }
        Ok(())
    }

    /// Value at `x`, which must lie within the grid.
    #[inline]
    pub fn interpolate(&self, grid: &[f64], cache: Option<&mut IndexCache>, x: f64) -> f64 {
        let i = locate(cache, TableFamily::Energy, grid, x);
        interpolation::evaluate(grid, &self.values, &self.slopes, i, x)
    }

    /// Abscissa at which the table reaches `target`, which must lie within
    /// `[first, last]`. The table must be non decreasing.
    #[inline]
    pub fn invert(&self, grid: &[f64], cache: Option<&mut IndexCache>, target: f64) -> f64 {
        let i = locate(cache, TableFamily::Other, &self.values, target);
        interpolation::invert(grid, &self.values, &self.slopes, i, target)
    }
}

/// Stopping power S = a + b·K used above the last grid node.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LinearLoss {
    /// GeV m²/kg.
    pub a: f64,
    /// m²/kg.
    pub b: f64,
}

impl LinearLoss {
    #[inline]
    pub fn loss(&self, kinetic: f64) -> f64 {
        self.a + self.b * kinetic
    }
}

/// Tabulations that depend on the energy loss scheme.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchemeTables {
    /// Range X(K) (kg/m²).
    pub grammage: Table,
    /// Proper time T(K) = ∫ m/p dX (kg/m²); the time in m is T/ρ.
    pub proper_time: Table,
    /// Mean stopping power S(K) (GeV m²/kg).
    pub energy_loss: Table,
    /// Λ(K) = ∫ dX/p (kg/m²/GeV).
    pub larmor: Table,
    /// M_n(K) = ∫ Λⁿ dX for n = 1, 2, 3.
    pub moments: [Table; 3],
    /// Cumulative count of hard elastic events ∫ dX/λ_h.
    pub elastic_count: Table,
    /// Extrapolation model above the grid.
    pub max_model: LinearLoss,
}

/// Discrete energy loss tabulation (hybrid scheme only).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DelTables {
    /// Kinetic energy below which no discrete loss occurs (GeV).
    pub threshold: f64,
    /// Total rate of discrete losses per unit grammage (m²/kg).
    pub cross_section: Table,
    /// Cumulative count of discrete losses along the hybrid range.
    pub count: Table,
    /// Per node cumulative fractions indexed by `component * 4 + process`.
    pub fractions: Vec<Vec<f64>>,
}

/// Coulomb scattering tabulation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ElasticTables {
    /// Cutoff μ0 = sin²(θ0/2) in the centre of mass frame, per node.
    pub cutoff: Vec<f64>,
    /// Mean free path between hard events λ_h (kg/m²).
    pub path: Table,
    /// Inverse transport path of the soft part, angles below the cutoff (m²/kg).
    pub soft_transport: Table,
    /// Inverse transport path over all angles (m²/kg).
    pub transport: Table,
}

/// All tabulations of one material.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MaterialTables {
    pub name: String,
    /// Reference density (kg/m³).
    pub density: f64,
    pub components: Vec<Component>,
    pub csda: SchemeTables,
    pub hybrid: SchemeTables,
    /// Cumulative energy straggling variance Ω(K) along the hybrid range (GeV²).
    pub straggling: Table,
    pub del: DelTables,
    pub elastic: ElasticTables,
}

impl MaterialTables {
    pub fn scheme(&self, scheme: Scheme) -> &SchemeTables {
        match scheme {
            Scheme::Csda => &self.csda,
            Scheme::Hybrid => &self.hybrid,
        }
    }

    fn bind(&mut self, grid: &[f64]) -> Result<()> {
        let name = self.name.clone();
        for (label, scheme) in [("csda", &mut self.csda), ("hybrid", &mut self.hybrid)] {
            let what = |q: &str| format!("{}/{}/{}", name, label, q);
            scheme.grammage.bind(grid, &what("grammage"))?;
            scheme.grammage.check_monotone(&what("grammage"))?;
            scheme.proper_time.bind(grid, &what("proper_time"))?;
            scheme.proper_time.check_monotone(&what("proper_time"))?;
            scheme.energy_loss.bind(grid, &what("energy_loss"))?;
            scheme.larmor.bind(grid, &what("larmor"))?;
            for (n, moment) in scheme.moments.iter_mut().enumerate() {
                moment.bind(grid, &what(&format!("moment{}", n + 1)))?;
            }
            scheme.elastic_count.bind(grid, &what("elastic_count"))?;
            scheme.elastic_count.check_monotone(&what("elastic_count"))?;
            if !(scheme.max_model.a > 0.0 && scheme.max_model.b >= 0.0) {
                return Err(TransportError::table(format!(
                    "{}: invalid max energy loss model {:?}",
                    what("max_model"),
                    scheme.max_model
                )));
            }
        }
        self.straggling.bind(grid, &format!("{}/straggling", name))?;
        self.del.cross_section.bind(grid, &format!("{}/del/cross_section", name))?;
        self.del.count.bind(grid, &format!("{}/del/count", name))?;
        self.del.count.check_monotone(&format!("{}/del/count", name))?;
        self.elastic.path.bind(grid, &format!("{}/elastic/path", name))?;
        self.elastic.soft_transport.bind(grid, &format!("{}/elastic/soft_transport", name))?;
        self.elastic.transport.bind(grid, &format!("{}/elastic/transport", name))?;
        if self.elastic.cutoff.len() != grid.len() {
            return Err(TransportError::table(format!(
                "{}: elastic cutoff has {} values for a grid of {} nodes",
                name,
                self.elastic.cutoff.len(),
                grid.len()
            )));
        }

        let width = self.components.len() * ProcessKind::ALL.len();
        if self.del.fractions.len() != grid.len() || self.del.fractions.iter().any(|row| row.len() != width) {
            return Err(TransportError::table(format!(
                "{}: DEL fractions must be {} rows of {} entries",
                name,
                grid.len(),
                width
            )));
        }
        Ok(())
    }
}

fn default_model() -> String {
    DEFAULT_MODEL.to_string()
}

/// Name of the differential cross section model serving each process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelSelection {
    #[serde(default = "default_model")]
    pub bremsstrahlung: String,
    #[serde(default = "default_model")]
    pub pair_production: String,
    #[serde(default = "default_model")]
    pub photonuclear: String,
    #[serde(default = "default_model")]
    pub ionisation: String,
}

impl Default for ModelSelection {
    fn default() -> Self {
        Self {
            bremsstrahlung: default_model(),
            pair_production: default_model(),
            photonuclear: default_model(),
            ionisation: default_model(),
        }
    }
}

impl ModelSelection {
    pub fn name(&self, kind: ProcessKind) -> &str {
        match kind {
            ProcessKind::Bremsstrahlung => &self.bremsstrahlung,
            ProcessKind::PairProduction => &self.pair_production,
            ProcessKind::Photonuclear => &self.photonuclear,
            ProcessKind::Ionisation => &self.ionisation,
        }
    }

    fn resolve(&self) -> Result<Vec<ProcessModel>> {
        ProcessKind::ALL
            .iter()
            .map(|&kind| ProcessModel::resolve(kind, self.name(kind)))
            .collect()
    }
}

fn default_cutoff() -> f64 {
    DEFAULT_CUTOFF
}

/// Complete, validated physics tables for one particle species.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PhysicsTables {
    particle: Particle,
    energies: Vec<f64>,
    elements: Vec<Element>,
    materials: Vec<MaterialTables>,
    #[serde(default)]
    models: ModelSelection,
    #[serde(default = "default_cutoff")]
    cutoff: f64,
    #[serde(skip)]
    resolved: Vec<ProcessModel>,
}

impl PhysicsTables {
    pub fn new(
        particle: Particle,
        energies: Vec<f64>,
        elements: Vec<Element>,
        materials: Vec<MaterialTables>,
        models: ModelSelection,
        cutoff: f64,
    ) -> Result<Self> {
        Self {
            particle,
            energies,
            elements,
            materials,
            models,
            cutoff,
            resolved: Vec::new(),
        }
        .finish()
    }

    /// Load tables serialised with [`PhysicsTables::to_json`].
    pub fn from_json(json: &str) -> Result<Self> {
        let tables: PhysicsTables = serde_json::from_str(json)?;
        tables.finish()
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    fn finish(mut self) -> Result<Self> {
        let grid = &self.energies;
        if grid.len() < 2 {
            return Err(TransportError::table("the energy grid needs at least 2 nodes"));
        }
        if grid[0] < 0.0 || grid.iter().any(|k| !k.is_finite()) || grid.windows(2).any(|w| w[1] <= w[0]) {
            return Err(TransportError::table(
                "the energy grid must be finite, non negative and strictly increasing",
            ));
        }
        if !(self.cutoff > 0.0 && self.cutoff < 1.0) {
            return Err(TransportError::accuracy(format!(
                "relative cutoff {} is not in (0, 1)",
                self.cutoff
            )));
        }
        if !(self.particle.mass > 0.0 && self.particle.ctau > 0.0) {
            return Err(TransportError::table(format!(
                "invalid particle properties for {}",
                self.particle.name
            )));
        }
        if self.materials.is_empty() {
            return Err(TransportError::table("no material tabulated"));
        }
        for material in self.materials.iter_mut() {
            if !(material.density > 0.0) || material.components.is_empty() {
                return Err(TransportError::table(format!(
                    "{}: invalid density or empty composition",
                    material.name
                )));
            }
            for component in material.components.iter() {
                if component.element >= self.elements.len() || !(component.fraction >= 0.0) {
                    return Err(TransportError::table(format!(
                        "{}: invalid component {:?}",
                        material.name, component
                    )));
                }
            }
            material.bind(grid)?;
        }
        self.resolved = self.models.resolve()?;
        Ok(self)
    }

    /// Swap the differential cross section models, resolving the new names.
    pub fn set_models(&mut self, models: ModelSelection) -> Result<()> {
        self.resolved = models.resolve()?;
        self.models = models;
        Ok(())
    }

    pub fn particle(&self) -> &Particle {
        &self.particle
    }

    pub fn energies(&self) -> &[f64] {
        &self.energies
    }

    pub fn energy_min(&self) -> f64 {
        self.energies[0]
    }

    pub fn energy_max(&self) -> f64 {
        self.energies[self.energies.len() - 1]
    }

    pub fn elements(&self) -> &[Element] {
        &self.elements
    }

    pub fn materials(&self) -> &[MaterialTables] {
        &self.materials
    }

    pub fn models(&self) -> &ModelSelection {
        &self.models
    }

    /// Relative cutoff x_cut on the energy transfer of discrete losses.
    pub fn cutoff(&self) -> f64 {
        self.cutoff
    }

    pub fn material(&self, index: usize) -> Result<&MaterialTables> {
        self.materials
            .get(index)
            .ok_or_else(|| TransportError::medium(format!("unknown material index {}", index)))
    }

    pub fn material_index(&self, name: &str) -> Option<usize> {
        self.materials.iter().position(|m| m.name == name)
    }

    /// Resolved model of a discrete process.
    pub fn model(&self, kind: ProcessKind) -> &ProcessModel {
        &self.resolved[kind.index()]
    }

    /// Largest number of elements in a material, the size of the Coulomb
    /// workspace.
    pub fn max_elements(&self) -> usize {
        self.materials.iter().map(|m| m.components.len()).max().unwrap_or(0)
    }
}
