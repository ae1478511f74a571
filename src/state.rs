use std::{fmt, marker::PhantomData};

use faer_core::{zipped, Mat, MatMut, MatRef};

pub const NUM_FIELDS: usize = 6;

/// The six nodal unknowns of the dispersive system.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Field {
    H,
    Hu,
    Hv,
    Heta,
    Hw,
    Hbeta,
}

impl Field {
    pub const ALL: [Field; NUM_FIELDS] = [
        Field::H,
        Field::Hu,
        Field::Hv,
        Field::Heta,
        Field::Hw,
        Field::Hbeta,
    ];

    pub fn index(self) -> usize {
        self as usize
    }

    pub fn name(self) -> &'static str {
        match self {
            Field::H => "h",
            Field::Hu => "hu",
            Field::Hv => "hv",
            Field::Heta => "heta",
            Field::Hw => "hw",
            Field::Hbeta => "hbeta",
        }
    }
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// `N` per-DOF columns stored in a single column-major faer matrix.
#[derive(Debug, Clone)]
pub struct Buffers<const N: usize> {
    inner: Mat<f64>,
    _marker: PhantomData<[(); N]>,
}

impl<const N: usize> Default for Buffers<N> {
    fn default() -> Self {
        Self::zeros(0)
    }
}

impl<const N: usize> Buffers<N> {
    pub fn zeros(size: usize) -> Self {
        Self {
            inner: Mat::zeros(size, N),
            _marker: PhantomData,
        }
    }

    pub fn resize(&mut self, size: usize) {
        self.inner.resize_with(size, N, |_, _| 0.0)
    }

    pub fn len(&self) -> usize {
        self.inner.nrows()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get(&self, n: usize) -> MatRef<'_, f64> {
        self.inner.as_ref().col(n)
    }

    pub fn get_mut(&mut self, n: usize) -> MatMut<'_, f64> {
        self.inner.as_mut().col(n)
    }

    pub fn read(&self, i: usize, n: usize) -> f64 {
        self.inner.read(i, n)
    }

    pub fn write(&mut self, i: usize, n: usize, value: f64) {
        self.inner.write(i, n, value)
    }

    pub fn row(&self, i: usize) -> [f64; N] {
        std::array::from_fn(|n| self.inner.read(i, n))
    }

    pub fn set_row(&mut self, i: usize, values: [f64; N]) {
        for (n, value) in values.into_iter().enumerate() {
            self.inner.write(i, n, value);
        }
    }

    pub fn as_ref(&self) -> MatRef<'_, f64> {
        self.inner.as_ref()
    }

    pub fn as_mut(&mut self) -> MatMut<'_, f64> {
        self.inner.as_mut()
    }

    pub fn rows(&self) -> Vec<[f64; N]> {
        (0..self.len()).map(|i| self.row(i)).collect()
    }

    /// `self ← a·self + b·other`, the Shu–Osher stage combination.
    pub fn combine(&mut self, a: f64, other: &Self, b: f64) {
        assert_eq!(self.len(), other.len());
        zipped!(self.inner.as_mut(), other.inner.as_ref())
            .for_each(|mut u, v| u.write(a * u.read() + b * v.read()));
    }

    pub fn assign(&mut self, other: &Self) {
        assert_eq!(self.len(), other.len());
        zipped!(self.inner.as_mut(), other.inner.as_ref()).for_each(|mut u, v| u.write(v.read()));
    }
}

/// Nodal values of `h, hu, hv, heta, hw, hbeta`.
pub type DofState = Buffers<NUM_FIELDS>;

impl Buffers<NUM_FIELDS> {
    pub fn from_fn(size: usize, mut f: impl FnMut(usize) -> [f64; NUM_FIELDS]) -> Self {
        let mut state = Self::zeros(size);
        for i in 0..size {
            state.set_row(i, f(i));
        }
        state
    }

    pub fn value(&self, i: usize, field: Field) -> f64 {
        self.read(i, field.index())
    }

    pub fn set_value(&mut self, i: usize, field: Field, value: f64) {
        self.write(i, field.index(), value)
    }

    pub fn field(&self, field: Field) -> MatRef<'_, f64> {
        self.get(field.index())
    }

    pub fn min(&self, field: Field) -> f64 {
        (0..self.len())
            .map(|i| self.value(i, field))
            .fold(f64::INFINITY, f64::min)
    }

    pub fn max(&self, field: Field) -> f64 {
        (0..self.len())
            .map(|i| self.value(i, field))
            .fold(f64::NEG_INFINITY, f64::max)
    }

    /// `Σ_i w_i · field_i`.
    pub fn weighted_sum(&self, field: Field, weights: &[f64]) -> f64 {
        weights
            .iter()
            .enumerate()
            .map(|(i, w)| w * self.value(i, field))
            .sum()
    }

    pub fn max_abs_diff(&self, other: &Self) -> f64 {
        let mut diff = 0.0f64;
        for n in 0..NUM_FIELDS {
            for i in 0..self.len() {
                diff = diff.max((self.read(i, n) - other.read(i, n)).abs());
            }
        }
        diff
    }
}
