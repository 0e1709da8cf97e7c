use crate::error::Result;
use crate::utils::mat::Matrix;

/// A trainable tensor with its gradient and momentum buffer.
#[derive(Debug, Clone)]
pub struct Param {
    pub value: Matrix,
    pub grad: Matrix,
    pub velocity: Option<Matrix>,
    /// Whether weight decay applies (weights yes, biases no).
    pub decay: bool,
}

impl Param {
    pub fn new(value: Matrix, decay: bool) -> Self {
        let (h, w) = value.shape();
        Self {
            value,
            grad: Matrix::new(h, w),
            velocity: None,
            decay,
        }
    }

    pub fn len(&self) -> usize {
        let (h, w) = self.value.shape();
        h * w
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

pub trait Layer: Send {
    /// `train` selects training behaviour for layers such as dropout.
    fn forward(&mut self, input: Matrix, train: bool) -> Result<Matrix>;
    fn backward(&mut self, d_loss: Matrix) -> Result<Matrix>;
    fn params_mut(&mut self) -> Vec<&mut Param> {
        Vec::new()
    }
    fn name(&self) -> String;
    /// Width of one output row.
    fn output_dim(&self) -> usize;
}

pub trait Head: Send {
    /// Returns the per-sample loss as a `(batch, 1)` matrix.
    fn forward(&mut self, input: Matrix, target: &Matrix) -> Result<Matrix>;
    fn backward(&mut self) -> Matrix;
    fn eval_forward(&self, input: &Matrix) -> Vec<usize>;
}

pub trait DataSet {
    fn dim(&self) -> usize;
    fn len(&self) -> usize;
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
    fn fetch_item(&self, idx: usize) -> Result<(&[f32], u8)>;
}

pub trait Optimizer {
    fn step(&self, param: &mut Param) -> Result<()>;
}
