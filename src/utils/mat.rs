use crate::error::{Error, Result};
use rand::Rng;
use rayon::prelude::*;
use std::fmt::Formatter;

/// Dense row-major `f32` matrix. A batch of images is one row per sample.
#[derive(Debug, Clone, PartialEq)]
pub struct Matrix {
    data: Vec<f32>,
    row: usize,
    col: usize,
}

impl Matrix {
    pub fn new(n: usize, m: usize) -> Self {
        Matrix {
            data: vec![0.0; n * m],
            row: n,
            col: m,
        }
    }

    pub fn from_vec(n: usize, m: usize, data: Vec<f32>) -> Result<Self> {
        if data.len() != n * m {
            return Err(Error::Shape {
                op: "from_vec",
                lhs: (n, m),
                rhs: (data.len(), 1),
            });
        }
        Ok(Matrix { data, row: n, col: m })
    }

    /// Fills with `U(-1/sqrt(fan_in), 1/sqrt(fan_in))`.
    pub fn uniform_init<R: Rng>(&mut self, fan_in: usize, rng: &mut R) {
        let bound = 1.0 / (fan_in.max(1) as f32).sqrt();
        for v in self.data.iter_mut() {
            *v = rng.gen_range(-bound..=bound);
        }
    }

    pub fn shape(&self) -> (usize, usize) {
        (self.row, self.col)
    }

    pub fn number_of_row(&self) -> usize {
        self.row
    }

    pub fn number_of_col(&self) -> usize {
        self.col
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.data
    }

    pub fn as_mut_slice(&mut self) -> &mut [f32] {
        &mut self.data
    }

    pub fn row(&self, i: usize) -> &[f32] {
        &self.data[i * self.col..(i + 1) * self.col]
    }

    pub fn row_mut(&mut self, i: usize) -> &mut [f32] {
        &mut self.data[i * self.col..(i + 1) * self.col]
    }

    pub fn at(&self, i: usize, j: usize) -> f32 {
        self.data[i * self.col + j]
    }

    pub fn set(&mut self, i: usize, j: usize, val: f32) {
        self.data[i * self.col + j] = val;
    }

    /// Reinterprets the storage with a new shape of the same element count.
    pub fn reshape(mut self, n: usize, m: usize) -> Result<Self> {
        if n * m != self.data.len() {
            return Err(Error::Shape {
                op: "reshape",
                lhs: (self.row, self.col),
                rhs: (n, m),
            });
        }
        self.row = n;
        self.col = m;
        Ok(self)
    }

    pub fn fill_(&mut self, val: f32) {
        self.data.par_iter_mut().for_each(|v| *v = val);
    }

    pub fn clamp(&mut self, lo: f32, hi: f32) {
        self.data.par_iter_mut().for_each(|v| *v = v.clamp(lo, hi));
    }

    fn check_same_shape(&self, rhs: &Matrix, op: &'static str) -> Result<()> {
        if self.shape() != rhs.shape() {
            return Err(Error::Shape {
                op,
                lhs: self.shape(),
                rhs: rhs.shape(),
            });
        }
        Ok(())
    }

    pub fn add(&mut self, rhs: &Matrix) -> Result<()> {
        self.check_same_shape(rhs, "add")?;
        self.data
            .par_iter_mut()
            .zip(rhs.data.par_iter())
            .for_each(|(a, b)| *a += *b);
        Ok(())
    }

    /// `self += alpha * rhs`
    pub fn scaled_add(&mut self, alpha: f32, rhs: &Matrix) -> Result<()> {
        self.check_same_shape(rhs, "scaled_add")?;
        self.data
            .par_iter_mut()
            .zip(rhs.data.par_iter())
            .for_each(|(a, b)| *a += alpha * *b);
        Ok(())
    }

    /// Adds a `(1, col)` vector to every row.
    pub fn add_with_vector(&mut self, rhs: &Matrix) -> Result<()> {
        if rhs.row != 1 || self.col != rhs.col {
            return Err(Error::Shape {
                op: "add_with_vector",
                lhs: self.shape(),
                rhs: rhs.shape(),
            });
        }
        let bias = &rhs.data;
        self.data
            .par_chunks_mut(self.col.max(1))
            .for_each(|row| row.iter_mut().zip(bias).for_each(|(a, b)| *a += *b));
        Ok(())
    }

    pub fn mul_with_numeric(&mut self, rhs: f32) {
        self.data.par_iter_mut().for_each(|v| *v *= rhs);
    }

    pub fn mul(&self, rhs: &Matrix) -> Result<Matrix> {
        if self.col != rhs.row {
            return Err(Error::Shape {
                op: "mul",
                lhs: self.shape(),
                rhs: rhs.shape(),
            });
        }
        let mut ret = Matrix::new(self.row, rhs.col);
        if rhs.col == 0 {
            return Ok(ret);
        }
        let k_dim = self.col;
        ret.data
            .par_chunks_mut(rhs.col)
            .enumerate()
            .for_each(|(i, out)| {
                let lhs_row = &self.data[i * k_dim..(i + 1) * k_dim];
                for (k, &a) in lhs_row.iter().enumerate() {
                    let rhs_row = &rhs.data[k * rhs.col..(k + 1) * rhs.col];
                    out.iter_mut().zip(rhs_row).for_each(|(o, b)| *o += a * *b);
                }
            });
        Ok(ret)
    }

    #[allow(non_snake_case)]
    pub fn T(&self) -> Matrix {
        let mut ret = Matrix::new(self.col, self.row);
        if self.row == 0 {
            return ret;
        }
        let row = self.row;
        ret.data
            .par_chunks_mut(row)
            .enumerate()
            .for_each(|(j, out)| {
                for (i, o) in out.iter_mut().enumerate() {
                    *o = self.data[i * self.col + j];
                }
            });
        ret
    }

    /// Sum over rows, giving a `(1, col)` vector.
    pub fn column_sums(&self) -> Matrix {
        let mut ret = Matrix::new(1, self.col);
        for i in 0..self.row {
            ret.data
                .iter_mut()
                .zip(self.row(i))
                .for_each(|(s, v)| *s += *v);
        }
        ret
    }

    pub fn argmax_rows(&self) -> Vec<usize> {
        (0..self.row)
            .into_par_iter()
            .map(|i| {
                self.row(i)
                    .iter()
                    .enumerate()
                    .fold((0, f32::NEG_INFINITY), |a, (j, &v)| if a.1 < v { (j, v) } else { a })
                    .0
            })
            .collect()
    }

    pub fn sum(&self) -> f32 {
        self.data.iter().sum()
    }

    pub fn is_finite(&self) -> bool {
        self.data.iter().all(|v| v.is_finite())
    }
}

impl std::fmt::Display for Matrix {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_fmt(format_args!("Matrix Sized [{}, {}]\n", self.row, self.col))?;
        for i in 0..self.row {
            for j in 0..self.col {
                f.write_fmt(format_args!("{:.2}", self.at(i, j)))?;
                if j + 1 == self.col {
                    f.write_str("\n")?;
                } else {
                    f.write_str(" ")?;
                }
            }
        }
        Ok(())
    }
}
