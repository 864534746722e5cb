// Tabulation of physics tables from material compositions.
//
// Stopping powers combine a Bethe formula for ionisation (no density effect)
// with the radiative losses integrated from the differential cross section
// models. Cumulative quantities (range, proper time, Larmor integrals,
// interaction counts, straggling) are integrated over the grid with a log-log
// interpolation of the stopping power between nodes. Coulomb quantities come
// from the analytic screened cross section and its cutoff solver.
//
// The first grid node is always K = 0, joined to the second node by the
// linear bin of the interpolation.

use super::{
    Component, DelTables, ElasticTables, Element, LinearLoss, MaterialTables, ModelSelection, PhysicsTables,
    SchemeTables, Table,
};
use crate::constants::{DEFAULT_CUTOFF, ELECTRON_MASS};
use crate::coulomb::{atoms_per_kg, elastic_node, ElasticNode, ScreenedCoulomb};
use crate::data;
use crate::dcs::{max_delta_ray, ProcessKind, ProcessModel};
use crate::error::{Result, TransportError};
use crate::particle::Particle;
use crate::physics::momentum;
use crate::utilities::{integrate, integrate_log};

/// 4π N_A r_e² m_e c² (GeV m²/kg, per unit Z/A in mol/g).
const BETHE_FACTOR: f64 = 3.070_75e-5;

#[derive(Debug, Clone)]
struct MaterialSpec {
    name: String,
    density: f64,
    composition: Vec<(String, f64)>,
}

/// Builder of self consistent [`PhysicsTables`].
#[derive(Debug, Clone)]
pub struct TableBuilder {
    particle: Particle,
    energies: Vec<f64>,
    cutoff: f64,
    models: ModelSelection,
    materials: Vec<MaterialSpec>,
}

/// Grid made of K = 0 followed by `per_decade` log spaced nodes per decade.
pub fn energy_grid(min: f64, max: f64, per_decade: usize) -> Vec<f64> {
    let decades = (max / min).log10();
    let n = (decades * per_decade as f64).round().max(1.0) as usize;
    let mut grid = Vec::with_capacity(n + 2);
    grid.push(0.0);
    for i in 0..=n {
        grid.push(min * 10f64.powf(decades * i as f64 / n as f64));
    }
    grid
}

impl TableBuilder {
    /// Builder with a 1 MeV – 100 TeV grid and the default models and cutoff.
    pub fn new(particle: Particle) -> Self {
        Self {
            particle,
            energies: energy_grid(1e-3, 1e5, 6),
            cutoff: DEFAULT_CUTOFF,
            models: ModelSelection::default(),
            materials: Vec::new(),
        }
    }

    pub fn set_energies(&mut self, min: f64, max: f64, per_decade: usize) -> Result<()> {
        if !(min > 0.0 && max > min && per_decade > 0) {
            return Err(TransportError::value(format!(
                "invalid energy range [{}, {}] with {} nodes per decade",
                min, max, per_decade
            )));
        }
        self.energies = energy_grid(min, max, per_decade);
        Ok(())
    }

    pub fn set_cutoff(&mut self, cutoff: f64) -> Result<()> {
        if !(cutoff > 0.0 && cutoff < 1.0) {
            return Err(TransportError::accuracy(format!("relative cutoff {} is not in (0, 1)", cutoff)));
        }
        self.cutoff = cutoff;
        Ok(())
    }

    pub fn set_models(&mut self, models: ModelSelection) {
        self.models = models;
    }

    /// Add a material from element symbols and mass fractions. Fractions are
    /// normalised.
    pub fn add_material(&mut self, name: &str, density: f64, composition: &[(&str, f64)]) -> Result<()> {
        if !(density > 0.0) {
            return Err(TransportError::density(format!("{}: density {} must be positive", name, density)));
        }
        if composition.is_empty() {
            return Err(TransportError::value(format!("{}: empty composition", name)));
        }
        let total: f64 = composition.iter().map(|(_, w)| w).sum();
        let mut normalised = Vec::with_capacity(composition.len());
        for (symbol, fraction) in composition {
            if data::element(symbol).is_none() {
                return Err(TransportError::value(format!("{}: unknown element '{}'", name, symbol)));
            }
            if !(*fraction > 0.0) {
                return Err(TransportError::value(format!(
                    "{}: mass fraction of {} must be positive",
                    name, symbol
                )));
            }
            normalised.push((symbol.to_string(), fraction / total));
        }
        self.materials.push(MaterialSpec {
            name: name.to_string(),
            density,
            composition: normalised,
        });
        Ok(())
    }

    pub fn build(&self) -> Result<PhysicsTables> {
        if self.materials.is_empty() {
            return Err(TransportError::value("no material to tabulate"));
        }
        let models = ProcessKind::ALL
            .iter()
            .map(|&kind| ProcessModel::resolve(kind, self.models.name(kind)))
            .collect::<Result<Vec<_>>>()?;

        let mut elements: Vec<Element> = Vec::new();
        for spec in self.materials.iter() {
            for (symbol, _) in spec.composition.iter() {
                if !elements.iter().any(|e| &e.name == symbol) {
                    // Presence checked in add_material.
                    if let Some(element) = data::element(symbol) {
                        elements.push(element);
                    }
                }
            }
        }

        let mut materials = Vec::with_capacity(self.materials.len());
        for spec in self.materials.iter() {
            let components: Vec<Component> = spec
                .composition
                .iter()
                .filter_map(|(symbol, fraction)| {
                    elements.iter().position(|e| &e.name == symbol).map(|element| Component {
                        element,
                        fraction: *fraction,
                    })
                })
                .collect();
            materials.push(self.tabulate(spec, &elements, &components, &models));
        }

        PhysicsTables::new(
            self.particle.clone(),
            self.energies.clone(),
            elements,
            materials,
            self.models.clone(),
            self.cutoff,
        )
    }

    fn tabulate(
        &self,
        spec: &MaterialSpec,
        elements: &[Element],
        components: &[Component],
        models: &[ProcessModel],
    ) -> MaterialTables {
        let grid = &self.energies;
        let n = grid.len();
        let mass = self.particle.mass;
        let width = components.len() * ProcessKind::ALL.len();

        let mut loss_csda = vec![0.0; n];
        let mut loss_hybrid = vec![0.0; n];
        let mut del_rate = vec![0.0; n];
        let mut variance_rate = vec![0.0; n];
        let mut fractions = vec![vec![0.0; width]; n];
        let mut elastic = Vec::with_capacity(n);

        for i in 1..n {
            let kinetic = grid[i];
            let nu_cut = self.cutoff * kinetic;

            let mut full = bethe(elements, components, mass, kinetic, None);
            let mut restricted = bethe(elements, components, mass, kinetic, Some(nu_cut));
            let mut variance = ionisation_variance(elements, components, mass, kinetic, nu_cut);

            let mut partial = vec![0.0; width];
            for (c, component) in components.iter().enumerate() {
                let element = &elements[component.element];
                let atoms = atoms_per_kg(element, component.fraction);
                for kind in ProcessKind::ALL {
                    let losses = integrate_process(&models[kind.index()], element, mass, kinetic, nu_cut);
                    if kind.is_radiative() {
                        full += atoms * losses.full;
                        restricted += atoms * losses.restricted;
                        variance += atoms * losses.variance;
                    }
                    partial[c * 4 + kind.index()] = atoms * losses.del;
                }
            }

            let total: f64 = partial.iter().sum();
            if total > 0.0 {
                let mut acc = 0.0;
                for (j, value) in partial.iter().enumerate() {
                    acc += value;
                    fractions[i][j] = acc / total;
                }
                // Guard the last entry against rounding.
                fractions[i][width - 1] = 1.0;
            }

            loss_csda[i] = full;
            loss_hybrid[i] = restricted;
            del_rate[i] = total;
            variance_rate[i] = variance;

            let screened: Vec<(ScreenedCoulomb, f64)> = components
                .iter()
                .map(|component| {
                    let element = &elements[component.element];
                    (
                        ScreenedCoulomb::new(element, mass, kinetic),
                        atoms_per_kg(element, component.fraction),
                    )
                })
                .collect();
            elastic.push(elastic_node(&screened));
        }
        loss_csda[0] = loss_csda[1];
        loss_hybrid[0] = loss_hybrid[1];
        variance_rate[0] = variance_rate[1];
        elastic.insert(0, elastic[0]);

        let inverse_path: Vec<f64> = elastic.iter().map(|node| 1.0 / node.path).collect();
        let csda = scheme_tables(grid, mass, &loss_csda, &inverse_path);
        let hybrid = scheme_tables(grid, mass, &loss_hybrid, &inverse_path);

        let x1 = grid[1] / loss_hybrid[1];
        let count = cumulative(grid, &loss_hybrid, &del_rate, del_rate[1] * x1, |_| 1.0);
        let straggling = cumulative(grid, &loss_hybrid, &variance_rate, variance_rate[1] * x1, |_| 1.0);
        let threshold = grid
            .iter()
            .zip(del_rate.iter())
            .find(|(_, rate)| **rate > 0.0)
            .map(|(k, _)| *k)
            .unwrap_or(grid[n - 1]);

        MaterialTables {
            name: spec.name.clone(),
            density: spec.density,
            components: components.to_vec(),
            csda,
            hybrid,
            straggling: Table::new(straggling),
            del: DelTables {
                threshold,
                cross_section: Table::new(del_rate),
                count: Table::new(count),
                fractions,
            },
            elastic: ElasticTables {
                cutoff: elastic.iter().map(|node: &ElasticNode| node.cutoff).collect(),
                path: Table::new(elastic.iter().map(|node| node.path).collect()),
                soft_transport: Table::new(elastic.iter().map(|node| node.soft_transport).collect()),
                transport: Table::new(elastic.iter().map(|node| node.transport).collect()),
            },
        }
    }
}

/// Standard rock (Z = 11, A = 22, ρ = 2.65 g/cm³).
pub fn standard_rock(particle: Particle) -> Result<PhysicsTables> {
    let mut builder = TableBuilder::new(particle);
    builder.add_material("StandardRock", 2.65e3, &[("Rk", 1.0)])?;
    builder.build()
}

/// Restricted (`cut = Some`) or total Bethe stopping power of a mixture.
fn bethe(elements: &[Element], components: &[Component], mass: f64, kinetic: f64, cut: Option<f64>) -> f64 {
    let energy = kinetic + mass;
    let p2 = kinetic * (kinetic + 2.0 * mass);
    let beta2 = p2 / (energy * energy);
    let bg2 = p2 / (mass * mass);
    let w_max = max_delta_ray(mass, kinetic);
    let t = cut.map_or(w_max, |c| c.min(w_max));
    components
        .iter()
        .map(|component| {
            let element = &elements[component.element];
            let log = 0.5 * (2.0 * ELECTRON_MASS * bg2 * t / (element.i * element.i)).ln();
            let bracket = log - 0.5 * beta2 * (1.0 + t / w_max);
            component.fraction * element.z / element.a * BETHE_FACTOR / beta2 * bracket.max(0.0)
        })
        .sum()
}

/// Variance rate of close collisions below the cutoff (GeV² m²/kg).
fn ionisation_variance(elements: &[Element], components: &[Component], mass: f64, kinetic: f64, cut: f64) -> f64 {
    let energy = kinetic + mass;
    let beta2 = kinetic * (kinetic + 2.0 * mass) / (energy * energy);
    let w_max = max_delta_ray(mass, kinetic);
    let t = cut.min(w_max);
    components
        .iter()
        .map(|component| {
            let element = &elements[component.element];
            component.fraction * element.z / element.a * 0.5 * BETHE_FACTOR / beta2
                * t
                * (1.0 - 0.5 * beta2 * t / w_max)
        })
        .sum()
}

#[derive(Debug, Default, Clone, Copy)]
struct ProcessIntegrals {
    full: f64,
    restricted: f64,
    variance: f64,
    del: f64,
}

/// Energy loss moments (per atom) of one process split at `nu_cut`.
fn integrate_process(model: &ProcessModel, element: &Element, mass: f64, kinetic: f64, nu_cut: f64) -> ProcessIntegrals {
    let (lo, hi) = model.transfer_range(element, mass, kinetic);
    let lo = lo.max(1e-9 * kinetic);
    let hi = hi.min(kinetic);
    if !(hi > lo) {
        return ProcessIntegrals::default();
    }
    let split = nu_cut.clamp(lo, hi);
    let dcs = |nu: f64| model.dcs(element, mass, kinetic, nu);
    let restricted = integrate_log(|nu| nu * dcs(nu), lo, split, 8);
    ProcessIntegrals {
        full: restricted + integrate_log(|nu| nu * dcs(nu), split, hi, 8),
        restricted,
        variance: integrate_log(|nu| nu * nu * dcs(nu), lo, split, 8),
        del: integrate_log(dcs, split, hi, 8),
    }
}

/// Cumulative integral of rate·weight(K)/S(K) dK over the grid.
///
/// Within a bin ln S and the rate are linear in ln K. `first` is the value at
/// the second node, the first bin starting at K = 0.
fn cumulative<F>(grid: &[f64], loss: &[f64], rate: &[f64], first: f64, weight: F) -> Vec<f64>
where
    F: Fn(f64) -> f64,
{
    let mut values = vec![0.0; grid.len()];
    values[1] = first;
    for i in 2..grid.len() {
        let (t0, t1) = (grid[i - 1].ln(), grid[i].ln());
        let (l0, l1) = (loss[i - 1].ln(), loss[i].ln());
        let (r0, r1) = (rate[i - 1], rate[i]);
        let bin = integrate(
            |t| {
                let h = (t - t0) / (t1 - t0);
                let k = t.exp();
                let s = (l0 + h * (l1 - l0)).exp();
                (r0 + h * (r1 - r0)) * weight(k) * k / s
            },
            t0,
            t1,
            1,
        );
        values[i] = values[i - 1] + bin;
    }
    values
}

fn scheme_tables(grid: &[f64], mass: f64, loss: &[f64], inverse_path: &[f64]) -> SchemeTables {
    let n = grid.len();
    let ones = vec![1.0; n];
    let x1 = grid[1] / loss[1];
    // Near rest p ≈ √(2mK), giving ∫ dK/(S p) = √(2K/m)/S over the first bin.
    let lambda1 = (2.0 * grid[1] / mass).sqrt() / loss[1];

    let grammage = cumulative(grid, loss, &ones, x1, |_| 1.0);
    let larmor = cumulative(grid, loss, &ones, lambda1, |k| 1.0 / momentum(mass, k));
    let proper_time = cumulative(grid, loss, &ones, mass * lambda1, |k| mass / momentum(mass, k));
    let elastic_count = cumulative(grid, loss, inverse_path, inverse_path[1] * x1, |_| 1.0);

    let moments = [1, 2, 3].map(|order: i32| {
        let mut values = vec![0.0; n];
        values[1] = larmor[1].powi(order) * grammage[1] / (0.5 * order as f64 + 1.0);
        for i in 2..n {
            values[i] = values[i - 1]
                + 0.5 * (larmor[i - 1].powi(order) + larmor[i].powi(order)) * (grammage[i] - grammage[i - 1]);
        }
        Table::new(values)
    });

    let (k0, k1) = (grid[n - 2], grid[n - 1]);
    let (s0, s1) = (loss[n - 2], loss[n - 1]);
    let mut b = ((s1 - s0) / (k1 - k0)).max(0.0);
    let mut a = s1 - b * k1;
    if a <= 0.0 {
        a = 0.1 * s1;
        b = (s1 - a) / k1;
    }

    SchemeTables {
        grammage: Table::new(grammage),
        proper_time: Table::new(proper_time),
        energy_loss: Table::new(loss.to_vec()),
        larmor: Table::new(larmor),
        moments,
        elastic_count: Table::new(elastic_count),
        max_model: LinearLoss { a, b },
    }
}
