use crate::error::{Result, SsweError};

use ndarray::{Array1, Array2, ArrayView1, Zip};

/// Batch means of both hinge terms and their alpha mix.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct LossValue {
    pub syntactic: f32,
    pub sentiment: f32,
    pub combined: f32,
}

/// alpha * mean(max(0, 1 - orig_syn + corr_syn))
/// + (1 - alpha) * mean(max(0, 1 - label * orig_sent + label * corr_sent))
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct JointLoss {
    alpha: f32,
}

impl JointLoss {

    pub fn new(alpha: f32) -> Result<Self> {
        if !(0.0..=1.0).contains(&alpha) {
            return Err(SsweError::Config(format!("alpha must lie in [0, 1], got {}", alpha)));
        }
        Ok(Self { alpha })
    }

    fn syntactic_margins(original: &Array2<f32>, corrupted: &Array2<f32>) -> Array1<f32> {
        1.0 - &original.column(0) + &corrupted.column(0)
    }

    fn sentiment_margins(original: &Array2<f32>, corrupted: &Array2<f32>, labels: ArrayView1<f32>) -> Array1<f32> {
        1.0 - &(&labels * &original.column(1)) + &(&labels * &corrupted.column(1))
    }

    /// `original` and `corrupted` are (batch, 2) score matrices of the two branches.
    pub fn value(&self, original: &Array2<f32>, corrupted: &Array2<f32>, labels: &Array1<f32>) -> LossValue {

        let n = labels.len();
        if n == 0 {
            return LossValue::default();
        }

        let hinge_mean = |margins: Array1<f32>| margins.mapv(|m| m.max(0.0)).sum() / n as f32;
        let syntactic = hinge_mean(JointLoss::syntactic_margins(original, corrupted));
        let sentiment = hinge_mean(JointLoss::sentiment_margins(original, corrupted, labels.view()));

        LossValue {
            syntactic,
            sentiment,
            combined: self.alpha * syntactic + (1.0 - self.alpha) * sentiment,
        }
    }

    /// Loss value plus dL/dscores for the original and the corrupted branch.
    pub fn value_and_gradients(&self, original: &Array2<f32>, corrupted: &Array2<f32>, labels: &Array1<f32>) -> (LossValue, Array2<f32>, Array2<f32>) {

        let value = self.value(original, corrupted, labels);
        let n = labels.len();
        let mut d_original = Array2::zeros(original.raw_dim());
        let mut d_corrupted = Array2::zeros(corrupted.raw_dim());
        if n == 0 {
            return (value, d_original, d_corrupted);
        }

        // an inactive hinge (margin <= 0) contributes nothing
        let w_syn = self.alpha / n as f32;
        let w_sent = (1.0 - self.alpha) / n as f32;
        let syntactic = JointLoss::syntactic_margins(original, corrupted);
        let sentiment = JointLoss::sentiment_margins(original, corrupted, labels.view());

        Zip::from(d_original.rows_mut())
        .and(d_corrupted.rows_mut())
        .and(&syntactic)
        .and(&sentiment)
        .and(labels)
        .for_each(|mut d_orig, mut d_corr, &syn, &sent, &label| {
            if syn > 0.0 {
                d_orig[0] = -w_syn;
                d_corr[0] = w_syn;
            }
            if sent > 0.0 {
                d_orig[1] = -w_sent * label;
                d_corr[1] = w_sent * label;
            }
        });

        (value, d_original, d_corrupted)
    }
}
