// Monotone cubic (PCHIP) evaluation over tabulated physics quantities.
//
// Tables share a strictly increasing kinetic energy grid. Values are
// evaluated with a cubic Hermite polynomial built from the bracketing nodes
// and their Fritsch–Butland slopes; the first bin is linear since it joins
// the grid floor. Inverse queries (energy from grammage, time or interaction
// count) solve the same polynomial, so forward and inverse evaluations are
// consistent to machine precision.
//
// Bracketing is a binary search. When an [`IndexCache`] is supplied the two
// most recent brackets of the table family are tried first, which pays off
// for sequential stepping where consecutive queries land in the same bin.

/// Family of tables sharing the same abscissa, used to key the index cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TableFamily {
    /// Tables indexed by the kinetic energy grid.
    Energy,
    /// Inverse lookups, indexed by a tabulated quantity.
    Other,
}

impl TableFamily {
    #[inline]
    fn slot(self) -> usize {
        match self {
            TableFamily::Energy => 0,
            TableFamily::Other => 1,
        }
    }
}

/// Memory of the last two brackets found per table family.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IndexCache {
    slots: [[Option<usize>; 2]; 2],
}

impl IndexCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn clear(&mut self) {
        self.slots = [[None; 2]; 2];
    }

    /// Bracket `value` in `x`, trying the memorised indices first.
    ///
    /// `value` must lie within `[x[0], x[n-1]]`.
    pub fn find(&mut self, family: TableFamily, x: &[f64], value: f64) -> usize {
        let slot = &mut self.slots[family.slot()];
        for cached in slot.iter().flatten() {
            if brackets(x, *cached, value) {
                return *cached;
            }
        }
        let index = search(x, value);
        slot[1] = slot[0];
        slot[0] = Some(index);
        index
    }
}

#[inline]
fn brackets(x: &[f64], i: usize, value: f64) -> bool {
    i + 1 < x.len() && x[i] < x[i + 1] && x[i] <= value && value <= x[i + 1]
}

/// Index `i` with `x[i] < value <= x[i+1]` (or 0 when `value == x[0]`).
///
/// Flat runs of the abscissa are skipped so the returned bin has a non zero
/// width. `value` must lie within `[x[0], x[n-1]]`.
pub fn search(x: &[f64], value: f64) -> usize {
    let mut low = 0usize;
    let mut high = x.len() - 1;
    while high - low > 1 {
        let mid = (low + high) >> 1;
        if x[mid] < value {
            low = mid;
        } else {
            high = mid;
        }
    }
    low
}

/// Bracket with an optional index cache.
#[inline]
pub fn locate(cache: Option<&mut IndexCache>, family: TableFamily, x: &[f64], value: f64) -> usize {
    match cache {
        Some(cache) => cache.find(family, x, value),
        None => search(x, value),
    }
}

/// Fritsch–Butland slopes of a monotone piecewise cubic through `(x, y)`.
pub fn pchip_slopes(x: &[f64], y: &[f64]) -> Vec<f64> {
    let n = x.len();
    if n < 2 {
        return vec![0.0; n];
    }
    let h: Vec<f64> = x.windows(2).map(|w| w[1] - w[0]).collect();
    let d: Vec<f64> = (0..n - 1).map(|k| (y[k + 1] - y[k]) / h[k]).collect();
    if n == 2 {
        return vec![d[0], d[0]];
    }

    let mut m = vec![0.0; n];
    for k in 1..n - 1 {
        if d[k - 1] * d[k] <= 0.0 {
            m[k] = 0.0;
        } else {
            let w1 = 2.0 * h[k] + h[k - 1];
            let w2 = h[k] + 2.0 * h[k - 1];
            m[k] = (w1 + w2) / (w1 / d[k - 1] + w2 / d[k]);
        }
    }
    m[0] = edge_slope(h[0], h[1], d[0], d[1]);
    m[n - 1] = edge_slope(h[n - 2], h[n - 3], d[n - 2], d[n - 3]);
    m
}

fn edge_slope(h0: f64, h1: f64, d0: f64, d1: f64) -> f64 {
    let m = ((2.0 * h0 + h1) * d0 - h0 * d1) / (h0 + h1);
    if m.signum() != d0.signum() || d0 == 0.0 {
        0.0
    } else if d0.signum() != d1.signum() && m.abs() > 3.0 * d0.abs() {
        3.0 * d0
    } else {
        m
    }
}

/// Cubic Hermite polynomial on `[x0, x1]`.
#[inline]
pub fn hermite(x0: f64, x1: f64, y0: f64, y1: f64, m0: f64, m1: f64, x: f64) -> f64 {
    let h = x1 - x0;
    let t = (x - x0) / h;
    let t2 = t * t;
    let t3 = t2 * t;
    y0 * (2.0 * t3 - 3.0 * t2 + 1.0)
        + h * m0 * (t3 - 2.0 * t2 + t)
        + y1 * (3.0 * t2 - 2.0 * t3)
        + h * m1 * (t3 - t2)
}

#[inline]
fn hermite_derivative(x0: f64, x1: f64, y0: f64, y1: f64, m0: f64, m1: f64, x: f64) -> f64 {
    let h = x1 - x0;
    let t = (x - x0) / h;
    let t2 = t * t;
    (y0 * (6.0 * t2 - 6.0 * t) + y1 * (6.0 * t - 6.0 * t2)) / h
        + m0 * (3.0 * t2 - 4.0 * t + 1.0)
        + m1 * (3.0 * t2 - 2.0 * t)
}

/// Evaluate the interpolant in bin `i` at `value`.
pub fn evaluate(x: &[f64], y: &[f64], m: &[f64], i: usize, value: f64) -> f64 {
    let (x0, x1) = (x[i], x[i + 1]);
    if i == 0 {
        y[0] + (value - x0) * (y[1] - y[0]) / (x1 - x0)
    } else {
        hermite(x0, x1, y[i], y[i + 1], m[i], m[i + 1], value)
    }
}

/// Solve `evaluate(x, y, m, i, v) == target` for `v` in bin `i`.
///
/// The interpolant is monotone on the bin, so a Newton iteration safeguarded
/// by bisection converges to the unique root.
pub fn invert(x: &[f64], y: &[f64], m: &[f64], i: usize, target: f64) -> f64 {
    let (x0, x1) = (x[i], x[i + 1]);
    let (y0, y1) = (y[i], y[i + 1]);
    if y1 == y0 {
        return x0;
    }
    let linear = x0 + (target - y0) * (x1 - x0) / (y1 - y0);
    if i == 0 {
        return linear;
    }

    let increasing = y1 > y0;
    let (mut lo, mut hi) = (x0, x1);
    let mut v = linear.clamp(x0, x1);
    for _ in 0..60 {
        let g = hermite(x0, x1, y0, y1, m[i], m[i + 1], v) - target;
        if g == 0.0 {
            return v;
        }
        if (g < 0.0) == increasing {
            lo = v;
        } else {
            hi = v;
        }
        let dg = hermite_derivative(x0, x1, y0, y1, m[i], m[i + 1], v);
        let mut next = if dg != 0.0 { v - g / dg } else { f64::NAN };
        if !(next > lo && next < hi) {
            next = 0.5 * (lo + hi);
        }
        if (next - v).abs() <= 1e-15 * v.abs().max(f64::MIN_POSITIVE) {
            return next;
        }
        v = next;
    }
    v
}
