//! Pluggable summation strategies.
//!
//! Forming normal-equation matrices (X'X) or iterative-refinement
//! residuals with plain left-to-right summation accumulates rounding
//! error proportional to the number of terms. The Neumaier variant of
//! compensated summation bounds the error independently of length. The
//! strategy is selected by the caller, never by a global switch.

/// A running sum of f64 terms.
pub trait Accumulator {
    fn reset(&mut self);
    fn add(&mut self, x: f64);
    fn sum(&self) -> f64;

    fn add_prod(&mut self, a: f64, b: f64) {
        self.add(a * b);
    }
}

/// Plain left-to-right summation.
#[derive(Debug, Clone, Copy, Default)]
pub struct NaiveAccumulator {
    s: f64,
}

impl Accumulator for NaiveAccumulator {
    fn reset(&mut self) {
        self.s = 0.0;
    }

    fn add(&mut self, x: f64) {
        self.s += x;
    }

    fn sum(&self) -> f64 {
        self.s
    }
}

/// Neumaier compensated summation.
///
/// Improves on Kahan by also capturing the low-order bits when the
/// incoming term is larger in magnitude than the running sum.
#[derive(Debug, Clone, Copy, Default)]
pub struct NeumaierAccumulator {
    s: f64,
    c: f64,
}

impl Accumulator for NeumaierAccumulator {
    fn reset(&mut self) {
        self.s = 0.0;
        self.c = 0.0;
    }

    fn add(&mut self, x: f64) {
        let t = self.s + x;
        if self.s.abs() >= x.abs() {
            self.c += (self.s - t) + x;
        } else {
            self.c += (x - t) + self.s;
        }
        self.s = t;
    }

    fn sum(&self) -> f64 {
        self.s + self.c
    }
}

/// Dot product of two slices with the given strategy.
pub fn dot_with<A: Accumulator>(acc: &mut A, x: &[f64], y: &[f64]) -> f64 {
    debug_assert_eq!(x.len(), y.len());
    acc.reset();
    for (&a, &b) in x.iter().zip(y.iter()) {
        acc.add_prod(a, b);
    }
    acc.sum()
}

/// Normal-equation matrix X'X (column-major columns) with the given strategy.
///
/// `cols[j]` is the j-th column of X; all columns must share one length.
pub fn xtx_with<A: Accumulator>(acc: &mut A, cols: &[Vec<f64>]) -> nalgebra::DMatrix<f64> {
    let k = cols.len();
    let mut m = nalgebra::DMatrix::zeros(k, k);
    for i in 0..k {
        for j in i..k {
            let v = dot_with(acc, &cols[i], &cols[j]);
            m[(i, j)] = v;
            m[(j, i)] = v;
        }
    }
    m
}
