//! Overall and per-class accuracy bookkeeping.

use crate::utils::cifar::{class_name, NUM_CLASSES};

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ClassAccuracy {
    correct: [usize; NUM_CLASSES],
    total: [usize; NUM_CLASSES],
}

impl ClassAccuracy {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records one prediction. Labels outside the class range are ignored.
    pub fn record(&mut self, label: usize, predicted: usize) {
        if label >= NUM_CLASSES {
            return;
        }
        self.total[label] += 1;
        if label == predicted {
            self.correct[label] += 1;
        }
    }

    pub fn record_batch(&mut self, labels: &[u8], predicted: &[usize]) {
        for (&label, &pred) in labels.iter().zip(predicted) {
            self.record(label as usize, pred);
        }
    }

    pub fn correct(&self) -> usize {
        self.correct.iter().sum()
    }

    pub fn total(&self) -> usize {
        self.total.iter().sum()
    }

    /// Percent in `[0, 100]`; 0 when nothing was recorded.
    pub fn accuracy(&self) -> f64 {
        percent(self.correct(), self.total())
    }

    pub fn class_accuracy(&self, class: usize) -> f64 {
        match (self.correct.get(class), self.total.get(class)) {
            (Some(&c), Some(&t)) => percent(c, t),
            _ => 0.0,
        }
    }

    pub fn report_lines(&self) -> Vec<String> {
        (0..NUM_CLASSES)
            .map(|class| {
                format!(
                    "Accuracy for class: {:<10} is {:.1} %",
                    class_name(class),
                    self.class_accuracy(class)
                )
            })
            .collect()
    }
}

fn percent(correct: usize, total: usize) -> f64 {
    if total == 0 {
        0.0
    } else {
        100.0 * correct as f64 / total as f64
    }
}
