use crate::error::{Error, Result};
use crate::utils::mat::Matrix;
use crate::utils::misc::random_shuffle;
use crate::utils::nn_trait::DataSet;
use rayon::prelude::*;
use std::cmp::min;

/// One mini-batch: images `(B, dim)`, one-hot targets `(B, classes)` and raw labels.
#[derive(Debug, Clone)]
pub struct Batch {
    pub images: Matrix,
    pub targets: Matrix,
    pub labels: Vec<u8>,
}

impl Batch {
    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }
}

pub struct DataLoader<'a, T>
where
    T: DataSet + Sync,
{
    dataset: &'a T,
    batch_size: usize,
    num_classes: usize,
    count: usize,
    order: Vec<usize>,
}

impl<'a, T> DataLoader<'a, T>
where
    T: DataSet + Sync,
{
    /// `seed = None` keeps dataset order.
    pub fn new(dataset: &'a T, batch_size: usize, num_classes: usize, seed: Option<u64>) -> Result<Self> {
        if batch_size == 0 {
            return Err(Error::Config("batch size must be positive".to_string()));
        }
        let mut order = (0..dataset.len()).collect::<Vec<_>>();
        if let Some(seed) = seed {
            random_shuffle(&mut order, seed);
        }
        Ok(Self {
            dataset,
            batch_size,
            num_classes,
            count: 0,
            order,
        })
    }

    pub fn num_batches(&self) -> usize {
        (self.order.len() + self.batch_size - 1) / self.batch_size
    }

    pub fn fetch_batch(&self, start: usize, len: usize) -> Result<Batch> {
        let dim = self.dataset.dim();
        let mut images = Matrix::new(len, dim);
        let mut targets = Matrix::new(len, self.num_classes);
        let mut labels = vec![0u8; len];
        if dim > 0 {
            images
                .as_mut_slice()
                .par_chunks_mut(dim)
                .zip(labels.par_iter_mut())
                .enumerate()
                .try_for_each(|(batch_idx, (to, label))| -> Result<()> {
                    let (fetched_image, fetched_gt) =
                        self.dataset.fetch_item(self.order[start + batch_idx])?;
                    to.copy_from_slice(fetched_image);
                    *label = fetched_gt;
                    Ok(())
                })?;
        }
        for (idx, &label) in labels.iter().enumerate() {
            if label as usize >= self.num_classes {
                return Err(Error::Dataset(format!("label {} out of range", label)));
            }
            targets.set(idx, label as usize, 1.0);
        }
        Ok(Batch {
            images,
            targets,
            labels,
        })
    }
}

impl<'a, T> Iterator for DataLoader<'a, T>
where
    T: DataSet + Sync,
{
    type Item = Result<Batch>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.count >= self.order.len() {
            None
        } else {
            let left = self.order.len() - self.count;
            let sz = min(left, self.batch_size);
            let ret = self.fetch_batch(self.count, sz);
            self.count += sz;
            Some(ret)
        }
    }
}
