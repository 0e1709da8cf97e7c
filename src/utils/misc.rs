use crate::error::{Error, Result};
use crate::utils::mat::Matrix;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;

/// Fails on the first NaN or infinity in `x`.
pub fn check_abnormal(x: &Matrix, what: &str) -> Result<()> {
    let (h, w) = x.shape();
    for i in 0..h {
        for j in 0..w {
            let cur = x.at(i, j);
            if cur.is_infinite() {
                return Err(Error::NonFinite(format!("{} is infinite at ({}, {})", what, i, j)));
            }
            if cur.is_nan() {
                return Err(Error::NonFinite(format!("{} is NaN at ({}, {})", what, i, j)));
            }
        }
    }
    Ok(())
}

pub fn random_shuffle(x: &mut [usize], seed: u64) {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    x.shuffle(&mut rng);
}
