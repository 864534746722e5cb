// Tabulated quantities evaluated over the full energy range.
//
// Inside the grid every quantity is interpolated with the monotone cubic
// scheme. Below the first node quantities vanish. Above the last node the
// material behaves as a medium with a constant-slope stopping power
// S = a + b·K, for which range, proper time and Larmor integral have closed
// forms; rates (discrete losses, hard elastic events) are frozen at their
// last tabulated value.

use crate::interpolation::IndexCache;
use crate::tables::{MaterialTables, PhysicsTables, Scheme, SchemeTables, Table};
use crate::utilities::{interpolate_linear, ridder};

/// Read-only view of the tables of one material under one scheme.
#[derive(Debug, Clone, Copy)]
pub struct MaterialView<'a> {
    pub grid: &'a [f64],
    pub material: &'a MaterialTables,
    pub scheme: &'a SchemeTables,
    pub mass: f64,
}

impl PhysicsTables {
    /// View of `material` under `scheme`. The index must be valid.
    pub fn view(&self, material: usize, scheme: Scheme) -> MaterialView<'_> {
        let material = &self.materials()[material];
        MaterialView {
            grid: self.energies(),
            material,
            scheme: material.scheme(scheme),
            mass: self.particle().mass,
        }
    }
}

impl<'a> MaterialView<'a> {
    #[inline]
    pub fn energy_min(&self) -> f64 {
        self.grid[0]
    }

    #[inline]
    pub fn energy_max(&self) -> f64 {
        self.grid[self.grid.len() - 1]
    }

    #[inline]
    fn tabulated(&self, table: &Table, cache: Option<&mut IndexCache>, kinetic: f64) -> Option<f64> {
        if kinetic < self.energy_min() {
            Some(0.0)
        } else if kinetic > self.energy_max() {
            None
        } else {
            Some(table.interpolate(self.grid, cache, kinetic))
        }
    }

    /// ln((a+bK)/(a+bK_max))/b, the grammage above the grid.
    fn extra_grammage(&self, kinetic: f64) -> f64 {
        let model = self.scheme.max_model;
        let top = self.energy_max();
        if model.b > 0.0 {
            (model.loss(kinetic) / model.loss(top)).ln() / model.b
        } else {
            (kinetic - top) / model.a
        }
    }

    /// ∫ dk/((k+m)(a+bk)) from the top of the grid, with p ≈ k + m.
    fn extra_larmor(&self, kinetic: f64) -> f64 {
        let model = self.scheme.max_model;
        let top = self.energy_max();
        let m = self.mass;
        let d = model.a - model.b * m;
        if d.abs() > 1e-12 * model.a {
            (((kinetic + m) / (top + m)).ln() - (model.loss(kinetic) / model.loss(top)).ln()) / d
        } else {
            (kinetic - top) / ((top + m) * model.loss(top))
        }
    }

    /// Range X(K) (kg/m²).
    pub fn grammage(&self, cache: Option<&mut IndexCache>, kinetic: f64) -> f64 {
        let table = &self.scheme.grammage;
        self.tabulated(table, cache, kinetic)
            .unwrap_or_else(|| table.last() + self.extra_grammage(kinetic))
    }

    /// Kinetic energy with range `grammage`.
    pub fn kinetic_from_grammage(&self, cache: Option<&mut IndexCache>, grammage: f64) -> f64 {
        let table = &self.scheme.grammage;
        if grammage <= table.first() {
            return self.energy_min();
        }
        if grammage <= table.last() {
            return table.invert(self.grid, cache, grammage);
        }
        let model = self.scheme.max_model;
        let top = self.energy_max();
        let dx = grammage - table.last();
        if model.b > 0.0 {
            (model.loss(top) * (model.b * dx).exp() - model.a) / model.b
        } else {
            top + model.a * dx
        }
    }

    /// Cumulative proper time T(K) (kg/m²). Divide by the density for c·τ in m.
    pub fn proper_time(&self, cache: Option<&mut IndexCache>, kinetic: f64) -> f64 {
        let table = &self.scheme.proper_time;
        self.tabulated(table, cache, kinetic)
            .unwrap_or_else(|| table.last() + self.mass * self.extra_larmor(kinetic))
    }

    /// Kinetic energy at cumulative proper time `time` (kg/m²).
    pub fn kinetic_from_proper_time(&self, cache: Option<&mut IndexCache>, time: f64) -> f64 {
        let table = &self.scheme.proper_time;
        if time <= table.first() {
            return self.energy_min();
        }
        if time <= table.last() {
            return table.invert(self.grid, cache, time);
        }
        let top = self.energy_max();
        let f = |k: f64| table.last() + self.mass * self.extra_larmor(k) - time;
        let mut high = 2.0 * top;
        for _ in 0..200 {
            if f(high) >= 0.0 {
                break;
            }
            high *= 2.0;
        }
        ridder(f, top, high, 0.0, 1e-12, 200).unwrap_or(high)
    }

    /// Mean stopping power S(K) (GeV m²/kg).
    pub fn energy_loss(&self, cache: Option<&mut IndexCache>, kinetic: f64) -> f64 {
        self.tabulated(&self.scheme.energy_loss, cache, kinetic)
            .unwrap_or_else(|| self.scheme.max_model.loss(kinetic))
    }

    /// Larmor integral Λ(K) = ∫ dX/p (kg/m²/GeV).
    pub fn larmor(&self, cache: Option<&mut IndexCache>, kinetic: f64) -> f64 {
        let table = &self.scheme.larmor;
        self.tabulated(table, cache, kinetic)
            .unwrap_or_else(|| table.last() + self.extra_larmor(kinetic))
    }

    /// Moment M_n(K) = ∫ Λⁿ dX, with M_0 the range.
    pub fn moment(&self, mut cache: Option<&mut IndexCache>, order: usize, kinetic: f64) -> f64 {
        if order == 0 {
            return self.grammage(cache, kinetic);
        }
        let table = &self.scheme.moments[order - 1];
        if let Some(value) = self.tabulated(table, cache.as_deref_mut(), kinetic) {
            return value;
        }
        // Trapezoid over the extrapolated segment.
        let n = order as i32;
        let lambda_top = self.scheme.larmor.last();
        let lambda = self.larmor(cache, kinetic);
        table.last() + 0.5 * (lambda_top.powi(n) + lambda.powi(n)) * self.extra_grammage(kinetic)
    }

    /// Cumulative straggling variance Ω(K) (GeV²).
    pub fn straggling(&self, cache: Option<&mut IndexCache>, kinetic: f64) -> f64 {
        let table = &self.material.straggling;
        self.tabulated(table, cache, kinetic).unwrap_or_else(|| {
            let rate = table.last_slope() * self.scheme.energy_loss.last();
            table.last() + rate * self.extra_grammage(kinetic)
        })
    }

    /// Rate of discrete losses per unit grammage (m²/kg).
    pub fn del_cross_section(&self, cache: Option<&mut IndexCache>, kinetic: f64) -> f64 {
        let del = &self.material.del;
        if kinetic < del.threshold {
            return 0.0;
        }
        self.tabulated(&del.cross_section, cache, kinetic)
            .unwrap_or_else(|| del.cross_section.last())
            .max(0.0)
    }

    /// Cumulative number of discrete losses NI(K).
    pub fn del_count(&self, cache: Option<&mut IndexCache>, kinetic: f64) -> f64 {
        let del = &self.material.del;
        self.tabulated(&del.count, cache, kinetic)
            .unwrap_or_else(|| del.count.last() + del.cross_section.last() * self.extra_grammage(kinetic))
    }

    /// Kinetic energy at cumulative discrete loss count `count`.
    pub fn kinetic_from_del_count(&self, cache: Option<&mut IndexCache>, count: f64) -> f64 {
        let del = &self.material.del;
        self.invert_count(&del.count, del.cross_section.last(), cache, count)
    }

    /// Cumulative number of hard elastic events.
    pub fn elastic_count(&self, cache: Option<&mut IndexCache>, kinetic: f64) -> f64 {
        let table = &self.scheme.elastic_count;
        self.tabulated(table, cache, kinetic)
            .unwrap_or_else(|| table.last() + self.extra_grammage(kinetic) / self.material.elastic.path.last())
    }

    /// Kinetic energy at cumulative hard elastic count `count`.
    pub fn kinetic_from_elastic_count(&self, cache: Option<&mut IndexCache>, count: f64) -> f64 {
        let rate = 1.0 / self.material.elastic.path.last();
        self.invert_count(&self.scheme.elastic_count, rate, cache, count)
    }

    fn invert_count(&self, table: &Table, top_rate: f64, cache: Option<&mut IndexCache>, count: f64) -> f64 {
        if count <= table.first() {
            return self.energy_min();
        }
        if count <= table.last() {
            return table.invert(self.grid, cache, count);
        }
        if !(top_rate > 0.0) {
            return f64::INFINITY;
        }
        let grammage = self.scheme.grammage.last() + (count - table.last()) / top_rate;
        self.kinetic_from_grammage(None, grammage)
    }

    /// Elastic cutoff μ0 in the centre of mass frame.
    pub fn elastic_cutoff(&self, kinetic: f64) -> f64 {
        interpolate_linear(self.grid, &self.material.elastic.cutoff, kinetic)
    }

    /// Mean free path between hard elastic events (kg/m²).
    pub fn elastic_path(&self, cache: Option<&mut IndexCache>, kinetic: f64) -> f64 {
        let table = &self.material.elastic.path;
        let kinetic = kinetic.clamp(self.energy_min(), self.energy_max());
        table.interpolate(self.grid, cache, kinetic)
    }

    /// Inverse transport path (m²/kg), of the soft part only when `soft`.
    pub fn transport_inverse(&self, cache: Option<&mut IndexCache>, kinetic: f64, soft: bool) -> f64 {
        let table = if soft {
            &self.material.elastic.soft_transport
        } else {
            &self.material.elastic.transport
        };
        let kinetic = kinetic.clamp(self.energy_min(), self.energy_max());
        table.interpolate(self.grid, cache, kinetic).max(0.0)
    }
}
