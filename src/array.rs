//! Fixed-size numeric containers.
//!
//! [`Vector`] and [`Matrix`] own an `ndarray` buffer and add the elementwise
//! and scalar-broadcast arithmetic the integrator and the series builder are
//! written in terms of.

use ndarray::prelude::*;
use ndarray::Zip;
use std::ops::{Add, AddAssign, Div, DivAssign, Index, IndexMut, Mul, MulAssign, Sub, SubAssign};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ContainerError {
    #[error("operands have unequal lengths ({left} and {right})")]
    LengthMismatch { left: usize, right: usize },
    #[error("row {row} has {found} elements, expected {expected}")]
    Ragged {
        row: usize,
        expected: usize,
        found: usize,
    },
    #[error("index {index} is out of range for length {len}")]
    IndexOutOfRange { index: usize, len: usize },
}

/// Fixed-length sequence of `f64`.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Vector(Array1<f64>);

impl Vector {
    pub fn zeros(len: usize) -> Vector {
        Vector(Array1::zeros(len))
    }

    pub fn from_elem(len: usize, value: f64) -> Vector {
        Vector(Array1::from_elem(len, value))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<f64> {
        self.0.get(index).copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = &f64> + '_ {
        self.0.iter()
    }

    pub fn fill(&mut self, value: f64) {
        self.0.fill(value);
    }

    pub fn view(&self) -> ArrayView1<'_, f64> {
        self.0.view()
    }

    pub fn view_mut(&mut self) -> ArrayViewMut1<'_, f64> {
        self.0.view_mut()
    }

    pub fn as_array(&self) -> &Array1<f64> {
        &self.0
    }

    pub fn into_array(self) -> Array1<f64> {
        self.0
    }

    pub fn to_vec(&self) -> Vec<f64> {
        self.0.to_vec()
    }

    /// Applies `f` to every element.
    pub fn map(&self, f: impl Fn(f64) -> f64) -> Vector {
        Vector(self.0.mapv(f))
    }

    /// Combines two equal-length vectors elementwise.
    pub fn zip_with(
        &self,
        other: &Vector,
        f: impl Fn(f64, f64) -> f64,
    ) -> Result<Vector, ContainerError> {
        if self.len() != other.len() {
            return Err(ContainerError::LengthMismatch {
                left: self.len(),
                right: other.len(),
            });
        }
        Ok(Vector(Zip::from(&self.0).and(&other.0).map_collect(|&a, &b| f(a, b))))
    }

    pub fn pow(&self, exponent: f64) -> Vector {
        self.map(|x| x.powf(exponent))
    }

    pub fn exp(&self) -> Vector {
        self.map(f64::exp)
    }

    /// Natural logarithm; non-positive elements become NaN or `-inf`.
    pub fn ln(&self) -> Vector {
        self.map(f64::ln)
    }

    pub fn sum(&self) -> f64 {
        self.0.sum()
    }

    pub fn max(&self) -> Option<f64> {
        self.0.iter().copied().reduce(f64::max)
    }
}

impl From<Vec<f64>> for Vector {
    fn from(v: Vec<f64>) -> Vector {
        Vector(Array1::from(v))
    }
}

impl From<&[f64]> for Vector {
    fn from(v: &[f64]) -> Vector {
        Vector(Array1::from(v.to_vec()))
    }
}

impl<const N: usize> From<[f64; N]> for Vector {
    fn from(v: [f64; N]) -> Vector {
        Vector(Array1::from(v.to_vec()))
    }
}

impl From<Array1<f64>> for Vector {
    fn from(a: Array1<f64>) -> Vector {
        Vector(a)
    }
}

impl FromIterator<f64> for Vector {
    fn from_iter<I: IntoIterator<Item = f64>>(iter: I) -> Vector {
        Vector(iter.into_iter().collect())
    }
}

impl Index<usize> for Vector {
    type Output = f64;

    fn index(&self, index: usize) -> &f64 {
        &self.0[index]
    }
}

impl IndexMut<usize> for Vector {
    fn index_mut(&mut self, index: usize) -> &mut f64 {
        &mut self.0[index]
    }
}

macro_rules! impl_vector_op {
    ($trait:ident, $method:ident, $assign_trait:ident, $assign_method:ident, $op:tt) => {
        impl<'a, 'b> $trait<&'b Vector> for &'a Vector {
            type Output = Vector;

            /// # Panics
            ///
            /// Panics if the operands have unequal lengths.
            fn $method(self, rhs: &'b Vector) -> Vector {
                match self.zip_with(rhs, |a, b| a $op b) {
                    Ok(v) => v,
                    Err(e) => panic!("{}", e),
                }
            }
        }

        impl $trait<Vector> for Vector {
            type Output = Vector;

            fn $method(self, rhs: Vector) -> Vector {
                &self $op &rhs
            }
        }

        impl<'b> $trait<&'b Vector> for Vector {
            type Output = Vector;

            fn $method(self, rhs: &'b Vector) -> Vector {
                &self $op rhs
            }
        }

        impl<'a> $trait<f64> for &'a Vector {
            type Output = Vector;

            fn $method(self, rhs: f64) -> Vector {
                self.map(|a| a $op rhs)
            }
        }

        impl $trait<f64> for Vector {
            type Output = Vector;

            fn $method(mut self, rhs: f64) -> Vector {
                self.0.mapv_inplace(|a| a $op rhs);
                self
            }
        }

        impl<'b> $trait<&'b Vector> for f64 {
            type Output = Vector;

            fn $method(self, rhs: &'b Vector) -> Vector {
                rhs.map(|b| self $op b)
            }
        }

        impl $trait<Vector> for f64 {
            type Output = Vector;

            fn $method(self, mut rhs: Vector) -> Vector {
                rhs.0.mapv_inplace(|b| self $op b);
                rhs
            }
        }

        impl<'b> $assign_trait<&'b Vector> for Vector {
            /// # Panics
            ///
            /// Panics if the operands have unequal lengths.
            fn $assign_method(&mut self, rhs: &'b Vector) {
                assert_eq!(
                    self.len(),
                    rhs.len(),
                    "operands have unequal lengths ({} and {})",
                    self.len(),
                    rhs.len()
                );
                azip!((a in &mut self.0, &b in &rhs.0) *a = *a $op b);
            }
        }

        impl $assign_trait<f64> for Vector {
            fn $assign_method(&mut self, rhs: f64) {
                self.0.mapv_inplace(|a| a $op rhs);
            }
        }
    };
}

impl_vector_op!(Add, add, AddAssign, add_assign, +);
impl_vector_op!(Sub, sub, SubAssign, sub_assign, -);
impl_vector_op!(Mul, mul, MulAssign, mul_assign, *);
impl_vector_op!(Div, div, DivAssign, div_assign, /);

/// Row-major `rows × cols` matrix of `f64`.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Matrix(Array2<f64>);

impl Matrix {
    pub fn zeros(rows: usize, cols: usize) -> Matrix {
        Matrix(Array2::zeros((rows, cols)))
    }

    pub fn from_elem(rows: usize, cols: usize, value: f64) -> Matrix {
        Matrix(Array2::from_elem((rows, cols), value))
    }

    /// Builds a matrix from nested rows, which must all have the same length.
    pub fn from_rows<R: AsRef<[f64]>>(rows: &[R]) -> Result<Matrix, ContainerError> {
        let cols = rows.first().map_or(0, |r| r.as_ref().len());
        let mut data = Array2::zeros((rows.len(), cols));
        for (i, (row, mut out)) in rows.iter().zip(data.rows_mut()).enumerate() {
            let row = row.as_ref();
            if row.len() != cols {
                return Err(ContainerError::Ragged {
                    row: i,
                    expected: cols,
                    found: row.len(),
                });
            }
            out.assign(&aview1(row));
        }
        Ok(Matrix(data))
    }

    /// Stacks a single vector as a `1 × len` matrix.
    pub fn from_row(row: &Vector) -> Matrix {
        Matrix(row.as_array().clone().insert_axis(Axis(0)))
    }

    pub fn nrows(&self) -> usize {
        self.0.nrows()
    }

    pub fn ncols(&self) -> usize {
        self.0.ncols()
    }

    pub fn get(&self, row: usize, col: usize) -> Option<f64> {
        self.0.get((row, col)).copied()
    }

    pub fn view(&self) -> ArrayView2<'_, f64> {
        self.0.view()
    }

    pub fn as_array(&self) -> &Array2<f64> {
        &self.0
    }

    pub fn into_array(self) -> Array2<f64> {
        self.0
    }

    /// Returns a copy of row `r`.
    ///
    /// An out-of-range `r` yields a zero-filled vector of width `ncols`
    /// instead of an error.
    pub fn row(&self, r: usize) -> Vector {
        if r >= self.nrows() {
            return Vector::zeros(self.ncols());
        }
        Vector(self.0.row(r).to_owned())
    }

    pub fn column(&self, c: usize) -> Result<Vector, ContainerError> {
        if c >= self.ncols() {
            return Err(ContainerError::IndexOutOfRange {
                index: c,
                len: self.ncols(),
            });
        }
        Ok(Vector(self.0.column(c).to_owned()))
    }

    /// Copies `values` element by element into column `c`.
    pub fn set_column(&mut self, c: usize, values: &Vector) -> Result<(), ContainerError> {
        if c >= self.ncols() {
            return Err(ContainerError::IndexOutOfRange {
                index: c,
                len: self.ncols(),
            });
        }
        if values.len() != self.nrows() {
            return Err(ContainerError::LengthMismatch {
                left: self.nrows(),
                right: values.len(),
            });
        }
        self.0.column_mut(c).assign(values.as_array());
        Ok(())
    }

    pub fn set_row(&mut self, r: usize, values: &Vector) -> Result<(), ContainerError> {
        if r >= self.nrows() {
            return Err(ContainerError::IndexOutOfRange {
                index: r,
                len: self.nrows(),
            });
        }
        if values.len() != self.ncols() {
            return Err(ContainerError::LengthMismatch {
                left: self.ncols(),
                right: values.len(),
            });
        }
        self.0.row_mut(r).assign(values.as_array());
        Ok(())
    }

    /// Repeats a single-row matrix `rows` times; other shapes are returned
    /// unchanged.
    pub fn broadcast_rows(self, rows: usize) -> Matrix {
        if self.nrows() != 1 || rows == 1 {
            return self;
        }
        let row = self.0.row(0);
        let mut out = Array2::zeros((rows, self.ncols()));
        for mut r in out.rows_mut() {
            r.assign(&row);
        }
        Matrix(out)
    }
}

impl From<Array2<f64>> for Matrix {
    fn from(a: Array2<f64>) -> Matrix {
        Matrix(a)
    }
}

impl Index<(usize, usize)> for Matrix {
    type Output = f64;

    fn index(&self, index: (usize, usize)) -> &f64 {
        &self.0[index]
    }
}

impl IndexMut<(usize, usize)> for Matrix {
    fn index_mut(&mut self, index: (usize, usize)) -> &mut f64 {
        &mut self.0[index]
    }
}
