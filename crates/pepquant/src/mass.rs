use std::ops::Mul;

use serde::{Deserialize, Serialize};

pub const PROTON: f32 = 1.0072764;
pub const NEUTRON: f32 = 1.00335;

#[derive(Copy, Clone, Serialize, Deserialize, Debug, PartialEq, PartialOrd)]
#[serde(rename_all = "lowercase")]
pub enum Tolerance {
    Ppm(f32, f32),
    Da(f32, f32),
}

impl Tolerance {
    /// Compute the (`lower`, `upper`) window (in m/z or Da) around `center`
    pub fn bounds(&self, center: f32) -> (f32, f32) {
        match self {
            Tolerance::Ppm(lo, hi) => {
                let delta_lo = center * lo / 1_000_000.0;
                let delta_hi = center * hi / 1_000_000.0;
                (center + delta_lo, center + delta_hi)
            }
            Tolerance::Da(lo, hi) => (center + lo, center + hi),
        }
    }

    pub fn contains(&self, center: f32, rhs: f32) -> bool {
        let (lo, hi) = self.bounds(center);
        rhs >= lo && rhs <= hi
    }

    pub fn ppm_to_delta_mass(center: f32, ppm: f32) -> f32 {
        ppm * center / 1_000_000.0
    }

    /// Symmetric ppm window
    pub fn ppm(ppm: f32) -> Self {
        Tolerance::Ppm(-ppm.abs(), ppm.abs())
    }
}

impl Mul<f32> for Tolerance {
    type Output = Tolerance;

    fn mul(self, rhs: f32) -> Self::Output {
        match self {
            Tolerance::Ppm(lo, hi) => Tolerance::Ppm(lo * rhs, hi * rhs),
            Tolerance::Da(lo, hi) => Tolerance::Da(lo * rhs, hi * rhs),
        }
    }
}

/// Convert a neutral monoisotopic mass into the m/z of the `charge`-protonated ion
pub fn mass_to_mz(mass: f64, charge: u8) -> f32 {
    let charge = charge.max(1) as f64;
    ((mass + charge * PROTON as f64) / charge) as f32
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn tolerances() {
        assert_eq!(
            Tolerance::Ppm(-10.0, 20.0).bounds(1000.0),
            (999.99, 1000.02)
        );
        assert_eq!(
            Tolerance::Ppm(-10.0, 10.0).bounds(487.0),
            (486.99513, 487.00487)
        );
        assert_eq!(Tolerance::ppm(50.0), Tolerance::Ppm(-50.0, 50.0));
        assert!(Tolerance::Da(-0.5, 0.5).contains(500.0, 500.5));
        assert!(!Tolerance::Da(-0.5, 0.5).contains(500.0, 500.51));
    }

    #[test]
    fn precursor_mz() {
        let mz = mass_to_mz(1000.0, 2);
        assert!((mz - 501.00727).abs() < 1E-4);
        assert!((mass_to_mz(1000.0, 1) - 1001.00726).abs() < 1E-3);
    }
}
