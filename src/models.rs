//! The two fixed network variants.

use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;

use crate::error::Result;
use crate::utils::cifar::{CHANNELS, IMAGE_SIDE, NUM_CLASSES};
use crate::utils::conv2d::Conv2d;
use crate::utils::dropout::Dropout;
use crate::utils::head::SoftMaxCrossEntropy;
use crate::utils::linear::LinearLayer;
use crate::utils::maxpool2x2::MaxPool2x2;
use crate::utils::network::Network;
use crate::utils::nn_trait::Layer;
use crate::utils::relu::ReluLayer;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Architecture {
    /// conv5 -> pool -> conv5 -> pool -> fc120 -> fc84 -> fc10
    Lenet,
    /// Three padded conv3 blocks with pooling, then dropout and fc500 -> fc10
    Deep,
}

impl Architecture {
    pub fn all() -> [Architecture; 2] {
        [Architecture::Lenet, Architecture::Deep]
    }

    pub fn build(self, dropout: f32, seed: u64) -> Result<Network> {
        let layers = match self {
            Architecture::Lenet => lenet(seed)?,
            Architecture::Deep => deep(dropout, seed)?,
        };
        Ok(Network::new(layers, Box::new(SoftMaxCrossEntropy::new())))
    }
}

impl std::fmt::Display for Architecture {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Architecture::Lenet => f.write_str("lenet"),
            Architecture::Deep => f.write_str("deep"),
        }
    }
}

fn lenet(seed: u64) -> Result<Vec<Box<dyn Layer>>> {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let conv1 = Conv2d::new(CHANNELS, 6, 5, IMAGE_SIDE, IMAGE_SIDE, 1, 0, &mut rng)?;
    let relu1 = ReluLayer::new(conv1.output_dim());
    let (r, c) = (conv1.feat_row, conv1.feat_col);
    let pool1 = MaxPool2x2::new(6, r, c);
    let (r, c) = (pool1.feat_row(), pool1.feat_col());
    let conv2 = Conv2d::new(6, 16, 5, r, c, 1, 0, &mut rng)?;
    let relu2 = ReluLayer::new(conv2.output_dim());
    let (r, c) = (conv2.feat_row, conv2.feat_col);
    let pool2 = MaxPool2x2::new(16, r, c);
    let flat = pool2.output_dim();

    let layers: Vec<Box<dyn Layer>> = vec![
        Box::new(conv1),
        Box::new(relu1),
        Box::new(pool1),
        Box::new(conv2),
        Box::new(relu2),
        Box::new(pool2),
        Box::new(LinearLayer::new(flat, 120, &mut rng)),
        Box::new(ReluLayer::new(120)),
        Box::new(LinearLayer::new(120, 84, &mut rng)),
        Box::new(ReluLayer::new(84)),
        Box::new(LinearLayer::new(84, NUM_CLASSES, &mut rng)),
    ];
    Ok(layers)
}

fn deep(dropout: f32, seed: u64) -> Result<Vec<Box<dyn Layer>>> {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let mut layers: Vec<Box<dyn Layer>> = Vec::new();
    let (mut side, mut channels) = (IMAGE_SIDE, CHANNELS);
    for out in [16, 32, 64] {
        let conv = Conv2d::new(channels, out, 3, side, side, 1, 1, &mut rng)?;
        let relu = ReluLayer::new(conv.output_dim());
        let pool = MaxPool2x2::new(out, conv.feat_row, conv.feat_col);
        side = pool.feat_row();
        channels = out;
        layers.push(Box::new(conv));
        layers.push(Box::new(relu));
        layers.push(Box::new(pool));
    }
    let flat = side * side * channels;
    layers.push(Box::new(Dropout::new(flat, dropout, seed.wrapping_add(1))?));
    layers.push(Box::new(LinearLayer::new(flat, 500, &mut rng)));
    layers.push(Box::new(ReluLayer::new(500)));
    layers.push(Box::new(Dropout::new(500, dropout, seed.wrapping_add(2))?));
    layers.push(Box::new(LinearLayer::new(500, NUM_CLASSES, &mut rng)));
    Ok(layers)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::cifar::IMAGE_DIM;
    use crate::utils::mat::Matrix;

    #[test]
    fn test_lenet_shapes_and_size() {
        let mut net = Architecture::Lenet.build(0.0, 1).unwrap();
        let out = net.forward(Matrix::new(2, IMAGE_DIM), false).unwrap();
        assert_eq!(out.shape(), (2, NUM_CLASSES));
        // 456 + 2416 + 48120 + 10164 + 850
        assert_eq!(net.num_parameters(), 62006);
        assert!(net.summary()[5].contains("16x10x10 -> 16x5x5"));
    }

    #[test]
    fn test_deep_shapes_and_size() {
        let mut net = Architecture::Deep.build(0.25, 1).unwrap();
        let out = net.forward(Matrix::new(3, IMAGE_DIM), true).unwrap();
        assert_eq!(out.shape(), (3, NUM_CLASSES));
        // 448 + 4640 + 18496 + 512500 + 5010
        assert_eq!(net.num_parameters(), 541094);
        assert_eq!(net.summary().len(), 14);
    }

    #[test]
    fn test_same_seed_same_weights() {
        let mut a = Architecture::Lenet.build(0.0, 7).unwrap();
        let mut b = Architecture::Lenet.build(0.0, 7).unwrap();
        let mut x = Matrix::new(1, IMAGE_DIM);
        x.fill_(0.3);
        assert_eq!(a.forward(x.clone(), false).unwrap(), b.forward(x, false).unwrap());
    }

    #[test]
    fn test_bad_dropout_rejected() {
        assert!(Architecture::Deep.build(1.0, 0).is_err());
    }
}
