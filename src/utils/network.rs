use crate::error::Result;
use crate::utils::mat::Matrix;
use crate::utils::nn_trait::{Head, Layer, Optimizer};

pub struct Network {
    layers: Vec<Box<dyn Layer>>,
    loss_fn: Box<dyn Head>,
}

impl Network {
    pub fn new(layers: Vec<Box<dyn Layer>>, loss_fn: Box<dyn Head>) -> Self {
        Self { layers, loss_fn }
    }

    pub fn forward(&mut self, mut x: Matrix, train: bool) -> Result<Matrix> {
        for layer in self.layers.iter_mut() {
            x = layer.forward(x, train)?;
        }
        Ok(x)
    }

    pub fn calc_loss(&mut self, pred: Matrix, target: &Matrix) -> Result<Matrix> {
        self.loss_fn.forward(pred, target)
    }

    pub fn get_result(&self, pred: &Matrix) -> Vec<usize> {
        self.loss_fn.eval_forward(pred)
    }

    /// Evaluation-mode forward pass followed by argmax.
    pub fn predict(&mut self, x: Matrix) -> Result<Vec<usize>> {
        let pred = self.forward(x, false)?;
        Ok(self.get_result(&pred))
    }

    pub fn backward(&mut self) -> Result<()> {
        let mut x = self.loss_fn.backward();
        for layer in self.layers.iter_mut().rev() {
            x = layer.backward(x)?;
        }
        Ok(())
    }

    pub fn update_parameters(&mut self, optimizer: &dyn Optimizer) -> Result<()> {
        for layer in self.layers.iter_mut() {
            for param in layer.params_mut() {
                optimizer.step(param)?;
            }
        }
        Ok(())
    }

    pub fn num_parameters(&mut self) -> usize {
        self.layers
            .iter_mut()
            .flat_map(|layer| layer.params_mut())
            .map(|param| param.len())
            .sum()
    }

    pub fn summary(&self) -> Vec<String> {
        self.layers
            .iter()
            .enumerate()
            .map(|(idx, layer)| format!("({}) {} [out {}]", idx, layer.name(), layer.output_dim()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::head::SoftMaxCrossEntropy;
    use crate::utils::linear::LinearLayer;
    use crate::utils::optimizer::Sgd;
    use crate::utils::relu::ReluLayer;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    fn tiny() -> Network {
        let mut rng = ChaCha8Rng::seed_from_u64(9);
        let layers: Vec<Box<dyn Layer>> = vec![
            Box::new(LinearLayer::new(4, 8, &mut rng)),
            Box::new(ReluLayer::new(8)),
            Box::new(LinearLayer::new(8, 2, &mut rng)),
        ];
        Network::new(layers, Box::new(SoftMaxCrossEntropy::new()))
    }

    #[test]
    fn test_parameter_count_and_summary() {
        let mut net = tiny();
        assert_eq!(net.num_parameters(), 4 * 8 + 8 + 8 * 2 + 2);
        let summary = net.summary();
        assert_eq!(summary.len(), 3);
        assert!(summary[0].contains("Linear(4 -> 8)"));
    }

    #[test]
    fn test_training_step_reduces_loss() {
        let mut net = tiny();
        let x = Matrix::from_vec(2, 4, vec![1.0, 0.0, 0.0, 1.0, 0.0, 1.0, 1.0, 0.0]).unwrap();
        let target = Matrix::from_vec(2, 2, vec![1.0, 0.0, 0.0, 1.0]).unwrap();
        let sgd = Sgd::new(0.1, 0.0, 0.0);

        let first = {
            let pred = net.forward(x.clone(), true).unwrap();
            net.calc_loss(pred, &target).unwrap().sum()
        };
        for _ in 0..50 {
            let pred = net.forward(x.clone(), true).unwrap();
            net.calc_loss(pred, &target).unwrap();
            net.backward().unwrap();
            net.update_parameters(&sgd).unwrap();
        }
        let pred = net.forward(x.clone(), true).unwrap();
        let last = net.calc_loss(pred, &target).unwrap().sum();
        assert!(last < first);
        assert_eq!(net.predict(x).unwrap(), vec![0, 1]);
    }
}
