// Numerical primitives: linear interpolation, bracketed root finding and
// Gauss-Legendre quadrature.

/// Linear interpolation on a linear scale.
///
/// Given arrays of x and y values, interpolate to find the y value at x_new.
/// If x_new is outside the range of x, returns the first or last y value.
pub fn interpolate_linear(x: &[f64], y: &[f64], x_new: f64) -> f64 {
    if x.is_empty() {
        return f64::NAN;
    }
    if x.len() == 1 {
        return y[0];
    }
    if x_new <= x[0] {
        return y[0];
    }
    if x_new >= x[x.len() - 1] {
        return y[y.len() - 1];
    }

    // Largest i with x[i] <= x_new.
    let mut low = 0usize;
    let mut high = x.len() - 1;
    while high - low > 1 {
        let mid = (low + high) >> 1;
        if x[mid] <= x_new {
            low = mid;
        } else {
            high = mid;
        }
    }
    let (x1, x2) = (x[low], x[low + 1]);
    let (y1, y2) = (y[low], y[low + 1]);
    y1 + (x_new - x1) * (y2 - y1) / (x2 - x1)
}

/// Find a root of `f` in `[a, b]` with Ridders' method.
///
/// Returns `None` when `f(a)` and `f(b)` have the same sign or when the
/// iteration budget is exhausted.
pub fn ridder<F>(mut f: F, mut a: f64, mut b: f64, xtol: f64, rtol: f64, max_iter: usize) -> Option<f64>
where
    F: FnMut(f64) -> f64,
{
    let mut fa = f(a);
    let mut fb = f(b);
    if fa == 0.0 {
        return Some(a);
    }
    if fb == 0.0 {
        return Some(b);
    }
    if fa * fb > 0.0 {
        return None;
    }

    let mut x_old = f64::NAN;
    for _ in 0..max_iter {
        let c = 0.5 * (a + b);
        let fc = f(c);
        let s = (fc * fc - fa * fb).sqrt();
        if s == 0.0 {
            return Some(c);
        }
        let sign = if fa > fb { 1.0 } else { -1.0 };
        let x = c + (c - a) * sign * fc / s;
        let fx = f(x);
        if fx == 0.0 {
            return Some(x);
        }
        if (x - x_old).abs() <= xtol + rtol * x.abs() {
            return Some(x);
        }
        x_old = x;

        if fc * fx < 0.0 {
            a = c;
            fa = fc;
            b = x;
            fb = fx;
        } else if fa * fx < 0.0 {
            b = x;
            fb = fx;
        } else {
            a = x;
            fa = fx;
        }
        if (b - a).abs() <= xtol + rtol * x.abs() {
            return Some(x);
        }
    }
    None
}

const GL_NODES: [f64; 4] = [
    0.183_434_642_495_649_8,
    0.525_532_409_916_329_0,
    0.796_666_477_413_626_7,
    0.960_289_856_497_536_3,
];
const GL_WEIGHTS: [f64; 4] = [
    0.362_683_783_378_362_0,
    0.313_706_645_877_887_3,
    0.222_381_034_453_374_5,
    0.101_228_536_290_376_3,
];

/// Composite 8 point Gauss-Legendre integral of `f` over `[a, b]`.
pub fn integrate<F>(mut f: F, a: f64, b: f64, intervals: usize) -> f64
where
    F: FnMut(f64) -> f64,
{
    if b <= a || intervals == 0 {
        return 0.0;
    }
    let h = (b - a) / intervals as f64;
    let mut sum = 0.0;
    for i in 0..intervals {
        let center = a + (i as f64 + 0.5) * h;
        let half = 0.5 * h;
        for (node, weight) in GL_NODES.iter().zip(GL_WEIGHTS.iter()) {
            sum += weight * (f(center - half * node) + f(center + half * node));
        }
    }
    0.5 * h * sum
}

/// Integral of `f` over `[a, b]` (0 < a < b) with nodes spread uniformly in
/// ln x, suited to integrands spanning several decades.
pub fn integrate_log<F>(mut f: F, a: f64, b: f64, intervals: usize) -> f64
where
    F: FnMut(f64) -> f64,
{
    if b <= a || a <= 0.0 {
        return 0.0;
    }
    integrate(
        |t| {
            let x = t.exp();
            f(x) * x
        },
        a.ln(),
        b.ln(),
        intervals,
    )
}
