use crate::error::Result;
use crate::utils::nn_trait::{Optimizer, Param};

/// Momentum buffers are clamped to this magnitude.
const VELOCITY_LIMIT: f32 = 100.0;

/// Stochastic gradient descent with momentum and L2 weight decay.
///
/// `v = momentum * v - rate * (grad + decay * w)`, then `w += v`.
/// Decay only applies to parameters flagged with `decay`.
#[derive(Debug, Clone, Copy)]
pub struct Sgd {
    rate: f32,
    momentum: f32,
    decay: f32,
}

impl Sgd {
    pub fn new(rate: f32, momentum: f32, decay: f32) -> Self {
        Self {
            rate,
            momentum,
            decay,
        }
    }
}

impl Optimizer for Sgd {
    fn step(&self, param: &mut Param) -> Result<()> {
        let mut go = param.grad.clone();
        if param.decay && self.decay != 0.0 {
            go.scaled_add(self.decay, &param.value)?;
        }
        go.mul_with_numeric(-self.rate);

        let mut velocity = match param.velocity.take() {
            None => go,
            Some(mut v) => {
                v.mul_with_numeric(self.momentum);
                v.add(&go)?;
                v
            }
        };
        velocity.clamp(-VELOCITY_LIMIT, VELOCITY_LIMIT);
        param.value.add(&velocity)?;
        param.velocity = Some(velocity);
        Ok(())
    }
}
