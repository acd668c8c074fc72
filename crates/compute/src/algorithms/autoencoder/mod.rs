//! Dense autoencoder trained with mini-batch Adam on mean squared error.
//!
//! The network maps `d` inputs through ReLU hidden layers (a bottleneck in
//! the middle by default: 64 → 32 → 64) back to `d` linear outputs.
//! Reconstruction error per row is the anomaly signal.

pub mod adam;
pub mod layer;

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rayon::prelude::*;
use tracing::debug;

use marketwatch_core::DetectError;

use crate::pipeline::cancel::CancelToken;

use self::adam::{Adam, Moments};
use self::layer::{Activation, Dense, Gradients};

/// Training hyper-parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct TrainParams {
    pub hidden_layers: Vec<usize>,
    pub epochs: usize,
    pub learning_rate: f64,
    pub batch_size: usize,
    pub seed: u64,
}

impl Default for TrainParams {
    fn default() -> Self {
        Self {
            hidden_layers: vec![64, 32, 64],
            epochs: 50,
            learning_rate: 1e-3,
            batch_size: 32,
            seed: 42,
        }
    }
}

/// Loss history of a finished training run.
#[derive(Debug, Clone, PartialEq)]
pub struct TrainingReport {
    /// Mean batch loss per epoch.
    pub epoch_losses: Vec<f64>,
    /// Mean reconstruction error over the training rows after the last epoch.
    pub final_loss: f64,
}

#[derive(Debug, Clone)]
pub struct Autoencoder {
    layers: Vec<Dense>,
}

impl Autoencoder {
    /// Freshly initialized network for `dim` inputs.
    pub fn new(dim: usize, hidden_layers: &[usize], rng: &mut StdRng) -> Self {
        let mut sizes = Vec::with_capacity(hidden_layers.len() + 2);
        sizes.push(dim);
        sizes.extend_from_slice(hidden_layers);
        sizes.push(dim);

        let last = sizes.len() - 2;
        let layers = sizes
            .windows(2)
            .enumerate()
            .map(|(i, w)| {
                let activation = if i == last { Activation::Linear } else { Activation::Relu };
                Dense::glorot(w[0], w[1], activation, rng)
            })
            .collect();

        Self { layers }
    }

    /// Train a new network to reproduce `data` (standardized row vectors).
    ///
    /// Rows are shuffled every epoch with a seeded RNG. The cancel token is
    /// checked before each epoch; training stops with
    /// [`DetectError::TrainingDiverged`] as soon as a batch loss is non-finite.
    pub fn train(
        data: &[Vec<f64>],
        params: &TrainParams,
        cancel: &CancelToken,
    ) -> Result<(Self, TrainingReport), DetectError> {
        if data.is_empty() {
            return Err(DetectError::EmptyDataset {
                required: 1,
                actual: 0,
            });
        }
        if params.epochs == 0 || params.batch_size == 0 {
            return Err(DetectError::InvalidParameter(format!(
                "epochs ({}) and batch_size ({}) must be >= 1",
                params.epochs, params.batch_size
            )));
        }

        let dim = data[0].len();
        let mut rng = StdRng::seed_from_u64(params.seed);
        let mut model = Self::new(dim, &params.hidden_layers, &mut rng);

        let mut optimizer = Adam::new(params.learning_rate);
        let mut moments: Vec<Moments> = model.layers.iter().map(Moments::zeros_like).collect();
        let mut order: Vec<usize> = (0..data.len()).collect();
        let mut epoch_losses = Vec::with_capacity(params.epochs);

        for epoch in 0..params.epochs {
            if cancel.is_cancelled() {
                return Err(DetectError::Cancelled(format!(
                    "autoencoder training stopped before epoch {}",
                    epoch + 1
                )));
            }

            order.shuffle(&mut rng);
            let mut epoch_loss = 0.0;

            for batch in order.chunks(params.batch_size) {
                let mut grads: Vec<Gradients> = model.layers.iter().map(Gradients::zeros_like).collect();
                let mut batch_loss = 0.0;

                for &row in batch {
                    batch_loss += model.accumulate(&data[row], &mut grads);
                }

                let inv = 1.0 / batch.len() as f64;
                batch_loss *= inv;
                if !batch_loss.is_finite() {
                    return Err(DetectError::TrainingDiverged {
                        epochs: epoch + 1,
                        loss: batch_loss,
                    });
                }

                optimizer.begin_step();
                for ((layer, g), m) in model.layers.iter_mut().zip(grads.iter_mut()).zip(moments.iter_mut()) {
                    g.scale(inv);
                    optimizer.update(layer, g, m);
                }

                epoch_loss += batch_loss * batch.len() as f64;
            }

            let epoch_loss = epoch_loss / data.len() as f64;
            debug!(epoch = epoch + 1, loss = epoch_loss, "autoencoder epoch");
            epoch_losses.push(epoch_loss);
        }

        let errors = model.reconstruction_errors(data);
        let final_loss = errors.iter().sum::<f64>() / errors.len() as f64;
        if !final_loss.is_finite() {
            return Err(DetectError::TrainingDiverged {
                epochs: params.epochs,
                loss: final_loss,
            });
        }

        Ok((
            model,
            TrainingReport {
                epoch_losses,
                final_loss,
            },
        ))
    }

    /// Forward and backward pass for one row. Returns the row's loss.
    fn accumulate(&self, x: &[f64], grads: &mut [Gradients]) -> f64 {
        let mut activations: Vec<Vec<f64>> = Vec::with_capacity(self.layers.len() + 1);
        let mut pre_activations: Vec<Vec<f64>> = Vec::with_capacity(self.layers.len());
        activations.push(x.to_vec());

        for layer in &self.layers {
            let pre = layer.pre_activation(&activations[activations.len() - 1]);
            let out = pre.iter().map(|z| layer.activation.apply(*z)).collect();
            pre_activations.push(pre);
            activations.push(out);
        }

        let output = &activations[self.layers.len()];
        let d = x.len() as f64;
        let loss = output.iter().zip(x).map(|(o, t)| (o - t).powi(2)).sum::<f64>() / d;

        // d(mean squared error)/d(output)
        let mut grad: Vec<f64> = output.iter().zip(x).map(|(o, t)| 2.0 * (o - t) / d).collect();
        for (l, layer) in self.layers.iter().enumerate().rev() {
            grad = layer.backward(&activations[l], &pre_activations[l], &grad, &mut grads[l]);
        }

        loss
    }

    pub fn reconstruct(&self, x: &[f64]) -> Vec<f64> {
        self.layers
            .iter()
            .fold(x.to_vec(), |acc, layer| layer.forward(&acc))
    }

    /// Mean squared difference between a row and its reconstruction.
    pub fn reconstruction_error(&self, x: &[f64]) -> f64 {
        let out = self.reconstruct(x);
        out.iter().zip(x).map(|(o, t)| (o - t).powi(2)).sum::<f64>() / x.len() as f64
    }

    pub fn reconstruction_errors(&self, data: &[Vec<f64>]) -> Vec<f64> {
        data.par_iter().map(|x| self.reconstruction_error(x)).collect()
    }

    /// Widths from input to output, e.g. `[2, 64, 32, 64, 2]`.
    pub fn layer_sizes(&self) -> Vec<usize> {
        let mut sizes: Vec<usize> = self.layers.iter().map(|l| l.input).collect();
        if let Some(last) = self.layers.last() {
            sizes.push(last.output);
        }
        sizes
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn correlated_rows(n: usize) -> Vec<Vec<f64>> {
        (0..n)
            .map(|i| {
                let t = (i as f64 / n as f64) * 4.0 - 2.0;
                vec![t, 0.5 * t]
            })
            .collect()
    }

    fn small_params(epochs: usize) -> TrainParams {
        TrainParams {
            hidden_layers: vec![8, 4, 8],
            epochs,
            learning_rate: 1e-2,
            batch_size: 16,
            seed: 42,
        }
    }

    #[test]
    fn layer_sizes_follow_hidden_config() {
        let mut rng = StdRng::seed_from_u64(1);
        let model = Autoencoder::new(2, &[64, 32, 64], &mut rng);
        assert_eq!(model.layer_sizes(), vec![2, 64, 32, 64, 2]);
    }

    #[test]
    fn training_reduces_loss() {
        let data = correlated_rows(128);
        let (_, report) = Autoencoder::train(&data, &small_params(40), &CancelToken::new()).unwrap();
        assert_eq!(report.epoch_losses.len(), 40);
        let first = report.epoch_losses[0];
        let last = *report.epoch_losses.last().unwrap();
        assert!(last < first, "loss did not improve: {first} -> {last}");
        assert!(report.final_loss.is_finite());
    }

    #[test]
    fn training_is_reproducible() {
        let data = correlated_rows(64);
        let (a, _) = Autoencoder::train(&data, &small_params(3), &CancelToken::new()).unwrap();
        let (b, _) = Autoencoder::train(&data, &small_params(3), &CancelToken::new()).unwrap();
        assert_eq!(a.reconstruction_errors(&data), b.reconstruction_errors(&data));
    }

    #[test]
    fn huge_learning_rate_diverges() {
        let data = correlated_rows(64);
        let params = TrainParams {
            learning_rate: 1e300,
            ..small_params(5)
        };
        let err = Autoencoder::train(&data, &params, &CancelToken::new()).unwrap_err();
        assert!(matches!(err, DetectError::TrainingDiverged { .. }));
    }

    #[test]
    fn cancelled_token_stops_training() {
        let data = correlated_rows(16);
        let cancel = CancelToken::new();
        cancel.cancel();
        let err = Autoencoder::train(&data, &small_params(5), &cancel).unwrap_err();
        assert!(matches!(err, DetectError::Cancelled(_)));
    }

    #[test]
    fn zero_epochs_rejected() {
        let data = correlated_rows(16);
        let err = Autoencoder::train(&data, &small_params(0), &CancelToken::new()).unwrap_err();
        assert!(matches!(err, DetectError::InvalidParameter(_)));
    }
}
