//! Training loop and evaluation pass.

use tracing::{debug, info};

use crate::config::TrainConfig;
use crate::error::Result;
use crate::metrics::ClassAccuracy;
use crate::utils::cifar::{class_name, NUM_CLASSES};
use crate::utils::dataloader::DataLoader;
use crate::utils::misc::check_abnormal;
use crate::utils::network::Network;
use crate::utils::nn_trait::{DataSet, Optimizer};

#[derive(Debug, Clone, Default, PartialEq)]
pub struct TrainReport {
    /// Mean mini-batch loss of every epoch.
    pub epoch_losses: Vec<f32>,
    pub steps: usize,
}

pub fn train<T>(
    network: &mut Network,
    optimizer: &dyn Optimizer,
    train_set: &T,
    config: &TrainConfig,
) -> Result<TrainReport>
where
    T: DataSet + Sync,
{
    config.validate()?;
    let mut report = TrainReport::default();
    for epoch in 0..config.epochs {
        let seed = config.seed.wrapping_add(epoch as u64);
        let dataloader = DataLoader::new(train_set, config.batch_size, NUM_CLASSES, Some(seed))?;
        debug!(epoch = epoch + 1, batches = dataloader.num_batches(), "starting epoch");

        let mut running_loss = 0f32;
        let mut epoch_loss = 0f32;
        let mut iter = 0usize;
        for batch in dataloader {
            let batch = batch?;
            let pred = network.forward(batch.images, true)?;
            check_abnormal(&pred, "logits")?;
            let loss = network.calc_loss(pred, &batch.targets)?;
            let mean = loss.sum() / batch.labels.len() as f32;

            network.backward()?;
            network.update_parameters(optimizer)?;

            iter += 1;
            running_loss += mean;
            epoch_loss += mean;
            if iter % config.log_interval == 0 {
                info!(
                    "[{}, {:5}] loss: {:.3}",
                    epoch + 1,
                    iter,
                    running_loss / config.log_interval as f32
                );
                running_loss = 0.0;
            }
        }
        report.steps += iter;
        let mean = if iter == 0 { 0.0 } else { epoch_loss / iter as f32 };
        info!(epoch = epoch + 1, mean_loss = mean, "epoch finished");
        report.epoch_losses.push(mean);
    }
    info!(steps = report.steps, "Finished Training");
    Ok(report)
}

/// Evaluation-mode pass over `test_set` in dataset order.
pub fn evaluate<T>(network: &mut Network, test_set: &T, batch_size: usize) -> Result<ClassAccuracy>
where
    T: DataSet + Sync,
{
    let mut accuracy = ClassAccuracy::new();
    for batch in DataLoader::new(test_set, batch_size, NUM_CLASSES, None)? {
        let batch = batch?;
        let predicted = network.predict(batch.images)?;
        accuracy.record_batch(&batch.labels, &predicted);
    }
    Ok(accuracy)
}

/// Ground-truth and predicted class names of the first `n` test images.
pub fn sample_predictions<T>(
    network: &mut Network,
    test_set: &T,
    n: usize,
) -> Result<(Vec<&'static str>, Vec<&'static str>)>
where
    T: DataSet + Sync,
{
    let n = n.min(test_set.len());
    if n == 0 {
        return Ok((Vec::new(), Vec::new()));
    }
    let loader = DataLoader::new(test_set, n, NUM_CLASSES, None)?;
    let batch = loader.fetch_batch(0, n)?;
    let predicted = network.predict(batch.images)?;
    let truth = batch.labels.iter().map(|l| class_name(*l as usize)).collect();
    let predicted = predicted.into_iter().map(class_name).collect();
    Ok((truth, predicted))
}
