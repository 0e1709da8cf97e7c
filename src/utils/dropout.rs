use crate::error::{Error, Result};
use crate::utils::mat::Matrix;
use crate::utils::nn_trait;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

/// Inverted dropout: surviving activations are scaled by `1 / (1 - p)` during
/// training so evaluation is a plain identity.
pub struct Dropout {
    dim: usize,
    prob: f32,
    rng: ChaCha8Rng,
    mask: Option<Vec<f32>>,
}

impl Dropout {
    pub fn new(dim: usize, prob: f32, seed: u64) -> Result<Self> {
        if !(0.0..1.0).contains(&prob) {
            return Err(Error::Config(format!(
                "dropout probability must be in [0, 1), got {}",
                prob
            )));
        }
        Ok(Self {
            dim,
            prob,
            rng: ChaCha8Rng::seed_from_u64(seed),
            mask: None,
        })
    }
}

impl nn_trait::Layer for Dropout {
    fn forward(&mut self, mut input: Matrix, train: bool) -> Result<Matrix> {
        if !train || self.prob == 0.0 {
            self.mask = None;
            return Ok(input);
        }
        let scale = 1.0 / (1.0 - self.prob);
        let prob = self.prob;
        let rng = &mut self.rng;
        let mask: Vec<f32> = (0..input.as_slice().len())
            .map(|_| if rng.gen::<f32>() < prob { 0.0 } else { scale })
            .collect();
        input
            .as_mut_slice()
            .iter_mut()
            .zip(&mask)
            .for_each(|(v, m)| *v *= *m);
        self.mask = Some(mask);
        Ok(input)
    }

    fn backward(&mut self, mut d_loss: Matrix) -> Result<Matrix> {
        if let Some(mask) = &self.mask {
            if mask.len() != d_loss.as_slice().len() {
                return Err(Error::Shape {
                    op: "dropout backward",
                    lhs: (mask.len(), 1),
                    rhs: d_loss.shape(),
                });
            }
            d_loss
                .as_mut_slice()
                .iter_mut()
                .zip(mask)
                .for_each(|(d, m)| *d *= *m);
        }
        Ok(d_loss)
    }

    fn name(&self) -> String {
        format!("Dropout(p={})", self.prob)
    }

    fn output_dim(&self) -> usize {
        self.dim
    }
}
