use std::ops::{AddAssign, Index, IndexMut};

use derive_more::derive::Display;
use num_complex::Complex64;
use num_traits::One;
use serde::{Deserialize, Serialize};

/// The 120° rotation operator used to place phases B and C in the ABC frame.
pub const R120: Complex64 = Complex64::new(-0.5, -0.866025);

#[derive(Debug, Display, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Phase {
    #[display("A")]
    A,
    #[display("B")]
    B,
    #[display("C")]
    C,
}

impl Phase {
    pub const ALL: [Phase; 3] = [Phase::A, Phase::B, Phase::C];

    pub fn index(self) -> usize {
        match self {
            Phase::A => 0,
            Phase::B => 1,
            Phase::C => 2,
        }
    }

    /// Suffix used in per-phase publication and subscription keys.
    pub fn letter(self) -> char {
        match self {
            Phase::A => 'a',
            Phase::B => 'b',
            Phase::C => 'c',
        }
    }
}

/// One complex value per phase. Used for both power and voltage; carries no
/// unit of its own.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct ThreePhaseComplex {
    pub a: Complex64,
    pub b: Complex64,
    pub c: Complex64,
}

impl ThreePhaseComplex {
    pub const fn new(a: Complex64, b: Complex64, c: Complex64) -> Self {
        Self { a, b, c }
    }

    pub fn splat(value: Complex64) -> Self {
        Self::new(value, value, value)
    }

    pub fn map(self, mut f: impl FnMut(Complex64) -> Complex64) -> Self {
        Self::new(f(self.a), f(self.b), f(self.c))
    }

    pub fn scale(self, factor: f64) -> Self {
        self.map(|v| v * factor)
    }

    pub fn iter(&self) -> impl Iterator<Item = (Phase, Complex64)> + '_ {
        Phase::ALL.into_iter().map(|phase| (phase, self[phase]))
    }

    pub fn is_finite(&self) -> bool {
        self.iter().all(|(_, v)| v.is_finite())
    }
}

impl Index<Phase> for ThreePhaseComplex {
    type Output = Complex64;

    fn index(&self, phase: Phase) -> &Complex64 {
        match phase {
            Phase::A => &self.a,
            Phase::B => &self.b,
            Phase::C => &self.c,
        }
    }
}

impl IndexMut<Phase> for ThreePhaseComplex {
    fn index_mut(&mut self, phase: Phase) -> &mut Complex64 {
        match phase {
            Phase::A => &mut self.a,
            Phase::B => &mut self.b,
            Phase::C => &mut self.c,
        }
    }
}

impl AddAssign for ThreePhaseComplex {
    fn add_assign(&mut self, rhs: Self) {
        self.a += rhs.a;
        self.b += rhs.b;
        self.c += rhs.c;
    }
}

/// Rotates independently solved phase-equivalent voltages into the ABC frame:
/// `a = va`, `b = vb·r`, `c = vc·r²`.
pub fn compose(
    va: Complex64,
    vb_equiv: Complex64,
    vc_equiv: Complex64,
    rotation: Complex64,
) -> ThreePhaseComplex {
    ThreePhaseComplex::new(va, vb_equiv * rotation, vc_equiv * rotation * rotation)
}

/// Balanced unit set in the ABC frame.
pub fn balanced(rotation: Complex64) -> ThreePhaseComplex {
    let one = Complex64::one();
    compose(one, one, one, rotation)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compose_unit_inputs() {
        let one = Complex64::new(1.0, 0.0);
        let v = compose(one, one, one, R120);
        assert_eq!(v.a, one);
        assert_eq!(v.b, R120);
        assert_eq!(v.c, R120 * R120);
        // r² is close to conj(r)
        assert!((v.c - R120.conj()).norm() < 1e-5);
        assert_eq!(balanced(R120), v);
    }

    #[test]
    fn test_compose_nan_stays_in_its_phase() {
        let one = Complex64::new(1.0, 0.0);
        let nan = Complex64::new(f64::NAN, f64::NAN);
        let v = compose(one, nan, one, R120);
        assert!(v.a.is_finite());
        assert!(v.b.is_nan());
        assert!(v.c.is_finite());
        assert!(!v.is_finite());
    }

    #[test]
    fn test_phase_indexing() {
        let mut v = ThreePhaseComplex::default();
        v[Phase::B] = Complex64::new(2.0, 1.0);
        v += ThreePhaseComplex::splat(Complex64::new(1.0, 0.0));
        assert_eq!(v.b, Complex64::new(3.0, 1.0));
        assert_eq!(v[Phase::A], Complex64::new(1.0, 0.0));
        assert_eq!(Phase::C.to_string(), "C");
        assert_eq!(Phase::ALL.map(Phase::index), [0, 1, 2]);
    }
}
