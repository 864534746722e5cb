// src/data.rs
// Static atomic data used when building physics tables from compositions.

use crate::tables::Element;
use once_cell::sync::Lazy;
use std::collections::HashMap;

/// Atomic data per element symbol: (Z, A in g/mol, mean excitation energy in eV).
///
/// Mean excitation energies follow the ICRU 37 recommendations for elements
/// in the condensed phase. `"Rk"` is the fictitious standard rock element
/// (Z = 11, A = 22) used as the reference medium for muon transport.
pub static ELEMENTS: Lazy<HashMap<&'static str, (f64, f64, f64)>> = Lazy::new(|| {
    let mut m = HashMap::new();
    m.insert("H", (1.0, 1.008, 19.2));
    m.insert("He", (2.0, 4.002_602, 41.8));
    m.insert("C", (6.0, 12.011, 78.0));
    m.insert("N", (7.0, 14.007, 82.0));
    m.insert("O", (8.0, 15.999, 95.0));
    m.insert("Na", (11.0, 22.989_769, 149.0));
    m.insert("Mg", (12.0, 24.305, 156.0));
    m.insert("Al", (13.0, 26.981_538, 166.0));
    m.insert("Si", (14.0, 28.085, 173.0));
    m.insert("Ar", (18.0, 39.948, 188.0));
    m.insert("K", (19.0, 39.098_3, 190.0));
    m.insert("Ca", (20.0, 40.078, 191.0));
    m.insert("Fe", (26.0, 55.845, 286.0));
    m.insert("Cu", (29.0, 63.546, 322.0));
    m.insert("W", (74.0, 183.84, 727.0));
    m.insert("Pb", (82.0, 207.2, 823.0));
    m.insert("U", (92.0, 238.028_91, 890.0));

    // Standard rock
    m.insert("Rk", (11.0, 22.0, 136.4));
    m
});

/// Look up an element by symbol.
pub fn element(symbol: &str) -> Option<Element> {
    ELEMENTS.get(symbol).map(|&(z, a, i)| Element {
        name: symbol.to_string(),
        z,
        a,
        i: i * 1e-9,
    })
}
