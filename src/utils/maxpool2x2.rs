use crate::error::{Error, Result};
use crate::utils::mat::Matrix;
use crate::utils::nn_trait;
use rayon::prelude::*;

/// 2x2 max pooling with stride 2 over HWC rows. An odd trailing row or column
/// is dropped.
pub struct MaxPool2x2 {
    pub in_channels: usize,
    pub im_row: usize,
    pub im_col: usize,
    /// Flat input offset of the winning element for every output element.
    max_index: Option<Vec<usize>>,
}

impl MaxPool2x2 {
    pub fn new(in_channels: usize, im_row: usize, im_col: usize) -> Self {
        Self {
            in_channels,
            im_row,
            im_col,
            max_index: None,
        }
    }

    pub fn feat_row(&self) -> usize {
        self.im_row / 2
    }

    pub fn feat_col(&self) -> usize {
        self.im_col / 2
    }

    fn in_size(&self) -> usize {
        self.im_row * self.im_col * self.in_channels
    }
}

impl nn_trait::Layer for MaxPool2x2 {
    fn forward(&mut self, input: Matrix, _train: bool) -> Result<Matrix> {
        let (h, w) = input.shape();
        if w != self.in_size() {
            return Err(Error::Shape {
                op: "maxpool forward",
                lhs: (h, w),
                rhs: (h, self.in_size()),
            });
        }
        let in_channels = self.in_channels;
        let im_col = self.im_col;
        let feat_row = self.feat_row();
        let feat_col = self.feat_col();
        let out_size = feat_row * feat_col * in_channels;

        let mut ret = Matrix::new(h, out_size);
        let mut max_index = vec![0usize; h * out_size];
        if out_size > 0 {
            ret.as_mut_slice()
                .par_chunks_mut(out_size)
                .zip(max_index.par_chunks_mut(out_size))
                .enumerate()
                .for_each(|(batch_index, (dst, idx))| {
                    let src = input.row(batch_index);
                    for i in 0..feat_row {
                        for j in 0..feat_col {
                            for c in 0..in_channels {
                                // seeded from the first tap so an all -inf/NaN window
                                // still routes inside itself
                                let mut best_at = (i * 2 * im_col + j * 2) * in_channels + c;
                                let mut best = src[best_at];
                                for (di, dj) in [(0, 1), (1, 0), (1, 1)] {
                                    let at = ((i * 2 + di) * im_col + j * 2 + dj) * in_channels + c;
                                    if src[at] > best {
                                        best = src[at];
                                        best_at = at;
                                    }
                                }
                                let o = (i * feat_col + j) * in_channels + c;
                                dst[o] = best;
                                idx[o] = best_at;
                            }
                        }
                    }
                });
        }
        self.max_index = Some(max_index);
        Ok(ret)
    }

    fn backward(&mut self, d_loss: Matrix) -> Result<Matrix> {
        let max_index = self
            .max_index
            .as_ref()
            .ok_or(Error::BackwardBeforeForward("maxpool"))?;
        let (h, w) = d_loss.shape();
        if h * w != max_index.len() {
            return Err(Error::Shape {
                op: "maxpool backward",
                lhs: (h, w),
                rhs: (max_index.len(), 1),
            });
        }
        let in_size = self.in_size();
        let mut ret = Matrix::new(h, in_size);
        if w > 0 {
            ret.as_mut_slice()
                .par_chunks_mut(in_size)
                .enumerate()
                .for_each(|(batch_index, dst)| {
                    let src = d_loss.row(batch_index);
                    let idx = &max_index[batch_index * w..(batch_index + 1) * w];
                    for (g, &at) in src.iter().zip(idx) {
                        dst[at] += *g;
                    }
                });
        }
        Ok(ret)
    }

    fn name(&self) -> String {
        format!(
            "MaxPool2x2({}x{}x{} -> {}x{}x{})",
            self.in_channels,
            self.im_row,
            self.im_col,
            self.in_channels,
            self.feat_row(),
            self.feat_col()
        )
    }

    fn output_dim(&self) -> usize {
        self.feat_row() * self.feat_col() * self.in_channels
    }
}
