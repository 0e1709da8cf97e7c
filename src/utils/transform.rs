use crate::utils::mat::Matrix;
use rayon::prelude::*;

/// Per-channel `(x - mean) / std` over HWC image rows.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Normalize {
    pub mean: [f32; 3],
    pub std: [f32; 3],
}

impl Default for Normalize {
    /// Maps `[0, 1]` onto `[-1, 1]`.
    fn default() -> Self {
        Self {
            mean: [0.5; 3],
            std: [0.5; 3],
        }
    }
}

impl Normalize {
    pub fn new(mean: [f32; 3], std: [f32; 3]) -> Self {
        Self { mean, std }
    }

    pub fn apply(&self, images: &mut Matrix) {
        images
            .as_mut_slice()
            .par_chunks_mut(3)
            .for_each(|pixel| {
                for (c, v) in pixel.iter_mut().enumerate() {
                    *v = (*v - self.mean[c]) / self.std[c];
                }
            });
    }

    /// Inverse of [`Normalize::apply`] for a single value of channel `c`.
    pub fn invert(&self, value: f32, c: usize) -> f32 {
        value * self.std[c] + self.mean[c]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_maps_to_unit_range() {
        let mut m = Matrix::from_vec(1, 6, vec![0.0, 0.5, 1.0, 1.0, 0.0, 0.25]).unwrap();
        Normalize::default().apply(&mut m);
        assert_eq!(m.as_slice(), &[-1.0, 0.0, 1.0, 1.0, -1.0, -0.5]);
    }

    #[test]
    fn test_per_channel_and_invert() {
        let norm = Normalize::new([0.0, 0.5, 1.0], [1.0, 0.25, 2.0]);
        let mut m = Matrix::from_vec(1, 3, vec![0.5, 0.5, 0.5]).unwrap();
        norm.apply(&mut m);
        assert_eq!(m.as_slice(), &[0.5, 0.0, -0.25]);
        for c in 0..3 {
            assert!((norm.invert(m.at(0, c), c) - 0.5).abs() < 1e-6);
        }
    }
}
