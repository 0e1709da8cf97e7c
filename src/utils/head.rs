use crate::error::{Error, Result};
use crate::utils::mat::Matrix;
use crate::utils::nn_trait;
use rayon::prelude::*;

/// Probabilities below this are clamped before taking the log.
const PROB_FLOOR: f32 = 1e-7;

pub struct SoftMaxCrossEntropy {
    pub grad: Matrix,
}

impl SoftMaxCrossEntropy {
    pub fn new() -> Self {
        Self {
            grad: Matrix::new(0, 0),
        }
    }
}

impl Default for SoftMaxCrossEntropy {
    fn default() -> Self {
        Self::new()
    }
}

impl nn_trait::Head for SoftMaxCrossEntropy {
    fn forward(&mut self, mut input: Matrix, target: &Matrix) -> Result<Matrix> {
        if input.shape() != target.shape() {
            return Err(Error::Shape {
                op: "softmax cross entropy",
                lhs: input.shape(),
                rhs: target.shape(),
            });
        }
        let (h, w) = input.shape();
        let mut ret = Matrix::new(h, 1);
        if w == 0 || h == 0 {
            self.grad = input;
            return Ok(ret);
        }
        let scale = 1.0 / h as f32;

        ret.as_mut_slice()
            .par_iter_mut()
            .zip(input.as_mut_slice().par_chunks_mut(w))
            .zip(target.as_slice().par_chunks(w))
            .for_each(|((loss, row), target_row)| {
                let max_val = row.iter().copied().fold(f32::NEG_INFINITY, f32::max);
                let mut sum = 0.0;
                for v in row.iter_mut() {
                    *v = (*v - max_val).exp();
                    sum += *v;
                }
                let mut acc = 0f32;
                for (v, t) in row.iter_mut().zip(target_row) {
                    *v /= sum;
                    acc -= t * v.max(PROB_FLOOR).ln();
                    // mean reduction over the batch
                    *v = (*v - t) * scale;
                }
                *loss = acc;
            });
        self.grad = input;
        Ok(ret)
    }

    fn backward(&mut self) -> Matrix {
        self.grad.clone()
    }

    fn eval_forward(&self, input: &Matrix) -> Vec<usize> {
        input.argmax_rows()
    }
}
