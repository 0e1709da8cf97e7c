use crate::error::{Error, Result};
use crate::utils::mat::Matrix;
use crate::utils::nn_trait;
use rayon::prelude::*;

pub struct ReluLayer {
    dim: usize,
    last_input: Option<Matrix>,
}

impl ReluLayer {
    pub fn new(dim: usize) -> Self {
        Self {
            dim,
            last_input: None,
        }
    }
}

impl nn_trait::Layer for ReluLayer {
    fn forward(&mut self, mut input: Matrix, _train: bool) -> Result<Matrix> {
        self.last_input = Some(input.clone());
        input
            .as_mut_slice()
            .par_iter_mut()
            .for_each(|v| *v = v.max(0.0));
        Ok(input)
    }

    fn backward(&mut self, mut d_loss: Matrix) -> Result<Matrix> {
        let last_input = self
            .last_input
            .as_ref()
            .ok_or(Error::BackwardBeforeForward("relu"))?;
        if last_input.shape() != d_loss.shape() {
            return Err(Error::Shape {
                op: "relu backward",
                lhs: last_input.shape(),
                rhs: d_loss.shape(),
            });
        }
        d_loss
            .as_mut_slice()
            .par_iter_mut()
            .zip(last_input.as_slice().par_iter())
            .for_each(|(d, &x)| {
                if x <= 0.0 {
                    *d = 0.0;
                }
            });
        Ok(d_loss)
    }

    fn name(&self) -> String {
        "ReLU".to_string()
    }

    fn output_dim(&self) -> usize {
        self.dim
    }
}
