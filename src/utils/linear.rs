use crate::error::{Error, Result};
use crate::utils::mat::Matrix;
use crate::utils::nn_trait::{self, Param};
use rand::Rng;

pub struct LinearLayer {
    in_channels: usize,
    out_channels: usize,
    last_input: Option<Matrix>,
    pub weight: Param,
    pub bias: Param,
}

impl LinearLayer {
    pub fn new<R: Rng>(in_channels: usize, out_channels: usize, rng: &mut R) -> Self {
        let mut weight = Matrix::new(in_channels, out_channels);
        let mut bias = Matrix::new(1, out_channels);
        weight.uniform_init(in_channels, rng);
        bias.uniform_init(in_channels, rng);
        Self {
            in_channels,
            out_channels,
            last_input: None,
            weight: Param::new(weight, true),
            bias: Param::new(bias, false),
        }
    }
}

impl nn_trait::Layer for LinearLayer {
    fn forward(&mut self, input: Matrix, _train: bool) -> Result<Matrix> {
        let mut now = input.mul(&self.weight.value)?;
        now.add_with_vector(&self.bias.value)?;
        self.last_input = Some(input);
        Ok(now)
    }

    fn backward(&mut self, d_loss: Matrix) -> Result<Matrix> {
        let last_input = self
            .last_input
            .as_ref()
            .ok_or(Error::BackwardBeforeForward("linear"))?;
        self.bias.grad = d_loss.column_sums();
        self.weight.grad = last_input.T().mul(&d_loss)?;
        d_loss.mul(&self.weight.value.T())
    }

    fn params_mut(&mut self) -> Vec<&mut Param> {
        vec![&mut self.weight, &mut self.bias]
    }

    fn name(&self) -> String {
        format!("Linear({} -> {})", self.in_channels, self.out_channels)
    }

    fn output_dim(&self) -> usize {
        self.out_channels
    }
}
