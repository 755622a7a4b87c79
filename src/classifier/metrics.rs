use std::fmt;

use crate::types::Label;

#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct ClassMetrics {
    pub precision: f64,
    pub recall: f64,
    pub f1: f64,
    pub support: usize,
}

/// Held-out scores. `confusion[actual][predicted]`, indexed by label code.
#[derive(Clone, Debug, PartialEq)]
pub struct Evaluation {
    pub accuracy: f64,
    pub per_class: [ClassMetrics; 2],
    pub confusion: [[usize; 2]; 2],
}

impl Evaluation {
    pub fn from_predictions(actual: &[Label], predicted: &[Label]) -> Self {
        let mut confusion = [[0usize; 2]; 2];
        for (a, p) in actual.iter().zip(predicted) {
            confusion[a.code() as usize][p.code() as usize] += 1;
        }
        let total: usize = confusion.iter().flatten().sum();
        let correct = confusion[0][0] + confusion[1][1];

        let per_class = [0usize, 1].map(|k| {
            let tp = confusion[k][k] as f64;
            let predicted_k = (confusion[0][k] + confusion[1][k]) as f64;
            let support = confusion[k][0] + confusion[k][1];
            let precision = ratio(tp, predicted_k);
            let recall = ratio(tp, support as f64);
            ClassMetrics {
                precision,
                recall,
                f1: ratio(2.0 * precision * recall, precision + recall),
                support,
            }
        });

        Self {
            accuracy: ratio(correct as f64, total as f64),
            per_class,
            confusion,
        }
    }

    pub fn class(&self, label: Label) -> &ClassMetrics {
        &self.per_class[label.code() as usize]
    }

    pub fn total(&self) -> usize {
        self.confusion.iter().flatten().sum()
    }
}

fn ratio(num: f64, den: f64) -> f64 {
    if den > 0.0 {
        num / den
    } else {
        0.0
    }
}

impl fmt::Display for Evaluation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "{:>10} {:>9} {:>9} {:>9} {:>9}",
            "", "precision", "recall", "f1-score", "support"
        )?;
        for label in Label::ALL {
            let m = self.class(label);
            writeln!(
                f,
                "{:>10} {:>9.2} {:>9.2} {:>9.2} {:>9}",
                label.as_str(),
                m.precision,
                m.recall,
                m.f1,
                m.support
            )?;
        }
        writeln!(f, "{:>10} {:>29.2} {:>9}", "accuracy", self.accuracy, self.total())?;
        write!(
            f,
            "confusion [[{}, {}], [{}, {}]]",
            self.confusion[0][0], self.confusion[0][1], self.confusion[1][0], self.confusion[1][1]
        )
    }
}
