use crate::error::{Error, Result};
use crate::utils::mat::Matrix;
use crate::utils::nn_trait::{self, Param};
use rand::Rng;
use rayon::prelude::*;

/// Square-kernel 2-D convolution over HWC rows, computed as im2col + matmul.
pub struct Conv2d {
    pub in_channels: usize,
    pub out_channels: usize,
    pub kernel: usize,
    pub im_row: usize,
    pub im_col: usize,
    pub stride: usize,
    pub padding: usize,

    pub feat_row: usize,
    pub feat_col: usize,

    /// `(kernel * kernel * in_channels, out_channels)`
    pub weight: Param,
    /// `(1, out_channels)`
    pub bias: Param,

    /// Patch matrix of the last forward pass, reused by backward.
    cols: Option<Matrix>,
    last_batch: usize,
}

impl Conv2d {
    #[allow(clippy::too_many_arguments)]
    pub fn new<R: Rng>(
        in_channels: usize,
        out_channels: usize,
        kernel: usize,
        im_row: usize,
        im_col: usize,
        stride: usize,
        padding: usize,
        rng: &mut R,
    ) -> Result<Self> {
        if kernel == 0 || stride == 0 {
            return Err(Error::Config(
                "convolution kernel and stride must be positive".to_string(),
            ));
        }
        if im_row + 2 * padding < kernel || im_col + 2 * padding < kernel {
            return Err(Error::Config(format!(
                "kernel {} does not fit a {}x{} input with padding {}",
                kernel, im_row, im_col, padding
            )));
        }
        let feat_row = (im_row + 2 * padding - kernel) / stride + 1;
        let feat_col = (im_col + 2 * padding - kernel) / stride + 1;
        let fan_in = kernel * kernel * in_channels;
        let mut weight = Matrix::new(fan_in, out_channels);
        let mut bias = Matrix::new(1, out_channels);
        weight.uniform_init(fan_in, rng);
        bias.uniform_init(fan_in, rng);
        Ok(Self {
            in_channels,
            out_channels,
            kernel,
            im_row,
            im_col,
            stride,
            padding,
            feat_row,
            feat_col,
            weight: Param::new(weight, true),
            bias: Param::new(bias, false),
            cols: None,
            last_batch: 0,
        })
    }

    fn in_size(&self) -> usize {
        self.im_row * self.im_col * self.in_channels
    }

    fn patch_size(&self) -> usize {
        self.kernel * self.kernel * self.in_channels
    }

    /// Input pixel feeding kernel tap `(ky, kx)` at output `(oy, ox)`, if inside the image.
    fn source_pixel(&self, oy: usize, ox: usize, ky: usize, kx: usize) -> Option<usize> {
        let iy = (oy * self.stride + ky).checked_sub(self.padding)?;
        let ix = (ox * self.stride + kx).checked_sub(self.padding)?;
        if iy >= self.im_row || ix >= self.im_col {
            return None;
        }
        Some(iy * self.im_col + ix)
    }

    // B*HWC => BH'W'*KKC
    pub fn im2col(&self, input: &Matrix) -> Matrix {
        let h = input.number_of_row();
        let patch = self.patch_size();
        let mut cols = Matrix::new(h * self.feat_row * self.feat_col, patch);
        if patch == 0 {
            return cols;
        }
        let block_size = self.feat_row * self.feat_col;
        let in_channels = self.in_channels;
        cols.as_mut_slice()
            .par_chunks_mut(patch)
            .enumerate()
            .for_each(|(idx, dst)| {
                let b = idx / block_size;
                let left = idx % block_size;
                let (oy, ox) = (left / self.feat_col, left % self.feat_col);
                let src = input.row(b);
                for ky in 0..self.kernel {
                    for kx in 0..self.kernel {
                        let at = (ky * self.kernel + kx) * in_channels;
                        if let Some(pixel) = self.source_pixel(oy, ox, ky, kx) {
                            let from = pixel * in_channels;
                            dst[at..at + in_channels].copy_from_slice(&src[from..from + in_channels]);
                        }
                    }
                }
            });
        cols
    }

    // BH'W'*KKC => B*HWC, overlapping taps are summed
    pub fn col2im(&self, d_cols: &Matrix, batch: usize) -> Matrix {
        let in_size = self.in_size();
        let block_size = self.feat_row * self.feat_col;
        let in_channels = self.in_channels;
        let mut ret = Matrix::new(batch, in_size);
        if in_size == 0 {
            return ret;
        }
        ret.as_mut_slice()
            .par_chunks_mut(in_size)
            .enumerate()
            .for_each(|(b, dst)| {
                for left in 0..block_size {
                    let (oy, ox) = (left / self.feat_col, left % self.feat_col);
                    let src = d_cols.row(b * block_size + left);
                    for ky in 0..self.kernel {
                        for kx in 0..self.kernel {
                            if let Some(pixel) = self.source_pixel(oy, ox, ky, kx) {
                                let at = (ky * self.kernel + kx) * in_channels;
                                let to = pixel * in_channels;
                                dst[to..to + in_channels]
                                    .iter_mut()
                                    .zip(&src[at..at + in_channels])
                                    .for_each(|(d, s)| *d += *s);
                            }
                        }
                    }
                }
            });
        ret
    }
}

impl nn_trait::Layer for Conv2d {
    fn forward(&mut self, input: Matrix, _train: bool) -> Result<Matrix> {
        let (h, w) = input.shape();
        if w != self.in_size() {
            return Err(Error::Shape {
                op: "conv2d forward",
                lhs: (h, w),
                rhs: (h, self.in_size()),
            });
        }
        let cols = self.im2col(&input);
        let mut res = cols.mul(&self.weight.value)?;
        res.add_with_vector(&self.bias.value)?;
        self.cols = Some(cols);
        self.last_batch = h;
        // rows are already ordered (b, y, x) with channels last
        res.reshape(h, self.feat_row * self.feat_col * self.out_channels)
    }

    fn backward(&mut self, d_loss: Matrix) -> Result<Matrix> {
        let cols = self
            .cols
            .as_ref()
            .ok_or(Error::BackwardBeforeForward("conv2d"))?;
        let rows = self.last_batch * self.feat_row * self.feat_col;
        let split_loss = d_loss.reshape(rows, self.out_channels)?;
        self.bias.grad = split_loss.column_sums();
        self.weight.grad = cols.T().mul(&split_loss)?;
        let d_cols = split_loss.mul(&self.weight.value.T())?;
        Ok(self.col2im(&d_cols, self.last_batch))
    }

    fn params_mut(&mut self) -> Vec<&mut Param> {
        vec![&mut self.weight, &mut self.bias]
    }

    fn name(&self) -> String {
        format!(
            "Conv2d({} -> {}, k={}, s={}, p={}) {}x{} -> {}x{}",
            self.in_channels,
            self.out_channels,
            self.kernel,
            self.stride,
            self.padding,
            self.im_row,
            self.im_col,
            self.feat_row,
            self.feat_col
        )
    }

    fn output_dim(&self) -> usize {
        self.feat_row * self.feat_col * self.out_channels
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::nn_trait::Layer;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    fn conv(cin: usize, cout: usize, k: usize, h: usize, s: usize, p: usize) -> Conv2d {
        let mut rng = ChaCha8Rng::seed_from_u64(11);
        Conv2d::new(cin, cout, k, h, h, s, p, &mut rng).unwrap()
    }

    #[test]
    fn test_output_size() {
        assert_eq!(conv(3, 6, 5, 32, 1, 0).feat_row, 28);
        assert_eq!(conv(3, 16, 3, 32, 1, 1).feat_row, 32);
        assert_eq!(conv(1, 1, 3, 7, 2, 1).feat_row, 4);
        let mut rng = ChaCha8Rng::seed_from_u64(0);
        assert!(Conv2d::new(1, 1, 5, 3, 3, 1, 0, &mut rng).is_err());
    }

    #[test]
    fn test_identity_kernel_copies_input() {
        // 3x3 kernel with only the centre tap set, padding 1: output == input
        let mut layer = conv(1, 1, 3, 3, 1, 1);
        layer.weight.value.fill_(0.0);
        layer.weight.value.set(4, 0, 1.0);
        layer.bias.value.fill_(0.0);
        let x = Matrix::from_vec(1, 9, (1..=9).map(|v| v as f32).collect()).unwrap();
        let y = layer.forward(x.clone(), true).unwrap();
        assert_eq!(y, x);
    }

    #[test]
    fn test_sum_kernel_with_padding() {
        let mut layer = conv(1, 1, 3, 3, 1, 1);
        layer.weight.value.fill_(1.0);
        layer.bias.value.fill_(0.5);
        let mut x = Matrix::new(1, 9);
        x.fill_(1.0);
        let y = layer.forward(x, true).unwrap();
        // corners see 4 pixels, edges 6, centre 9
        assert_eq!(
            y.as_slice(),
            &[4.5, 6.5, 4.5, 6.5, 9.5, 6.5, 4.5, 6.5, 4.5]
        );
    }

    #[test]
    fn test_gradient_matches_finite_difference() {
        let mut rng = ChaCha8Rng::seed_from_u64(5);
        let mut layer = conv(2, 3, 3, 4, 1, 1);
        let mut x = Matrix::new(2, 4 * 4 * 2);
        x.uniform_init(1, &mut rng);

        let out = layer.forward(x.clone(), true).unwrap();
        let mut ones = Matrix::new(out.number_of_row(), out.number_of_col());
        ones.fill_(1.0);
        let dx = layer.backward(ones).unwrap();
        assert_eq!(dx.shape(), x.shape());

        let eps = 1e-2;
        for &j in &[0usize, 5, 13, 31] {
            let mut plus = x.clone();
            plus.set(1, j, x.at(1, j) + eps);
            let mut minus = x.clone();
            minus.set(1, j, x.at(1, j) - eps);
            let lp = layer.forward(plus, true).unwrap().sum();
            let lm = layer.forward(minus, true).unwrap().sum();
            let numeric = (lp - lm) / (2.0 * eps);
            assert!(
                (numeric - dx.at(1, j)).abs() < 1e-2,
                "input {}: numeric {} analytic {}",
                j,
                numeric,
                dx.at(1, j)
            );
        }
    }

    #[test]
    fn test_weight_gradient_matches_finite_difference() {
        let mut rng = ChaCha8Rng::seed_from_u64(6);
        let mut layer = conv(1, 2, 3, 5, 2, 0);
        let mut x = Matrix::new(3, 25);
        x.uniform_init(1, &mut rng);

        let out = layer.forward(x.clone(), true).unwrap();
        let mut ones = Matrix::new(out.number_of_row(), out.number_of_col());
        ones.fill_(1.0);
        layer.backward(ones).unwrap();
        let analytic = layer.weight.grad.clone();
        assert_eq!(layer.bias.grad.as_slice(), &[12.0, 12.0]);

        let eps = 1e-2;
        for &(i, j) in &[(0usize, 0usize), (4, 1), (8, 0)] {
            let base = layer.weight.value.at(i, j);
            layer.weight.value.set(i, j, base + eps);
            let lp = layer.forward(x.clone(), true).unwrap().sum();
            layer.weight.value.set(i, j, base - eps);
            let lm = layer.forward(x.clone(), true).unwrap().sum();
            layer.weight.value.set(i, j, base);
            let numeric = (lp - lm) / (2.0 * eps);
            assert!((numeric - analytic.at(i, j)).abs() < 1e-2);
        }
    }
}
