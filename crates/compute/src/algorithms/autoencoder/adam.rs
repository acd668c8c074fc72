use super::layer::{Dense, Gradients};

/// Adam optimizer with bias-corrected step size.
#[derive(Debug, Clone)]
pub struct Adam {
    pub learning_rate: f64,
    pub beta1: f64,
    pub beta2: f64,
    pub epsilon: f64,
    step: i32,
}

impl Adam {
    pub fn new(learning_rate: f64) -> Self {
        Self {
            learning_rate,
            beta1: 0.9,
            beta2: 0.999,
            epsilon: 1e-7,
            step: 0,
        }
    }

    /// Advance the shared timestep. Call once per mini-batch, before `update`.
    pub fn begin_step(&mut self) {
        self.step = self.step.saturating_add(1);
    }

    pub fn step(&self) -> i32 {
        self.step
    }

    pub fn update(&self, layer: &mut Dense, grads: &Gradients, moments: &mut Moments) {
        let t = self.step.max(1);
        let lr_t = self.learning_rate * (1.0 - self.beta2.powi(t)).sqrt() / (1.0 - self.beta1.powi(t));

        let apply = |params: &mut [f64], g: &[f64], m: &mut [f64], v: &mut [f64]| {
            for k in 0..params.len() {
                m[k] = self.beta1 * m[k] + (1.0 - self.beta1) * g[k];
                v[k] = self.beta2 * v[k] + (1.0 - self.beta2) * g[k] * g[k];
                params[k] -= lr_t * m[k] / (v[k].sqrt() + self.epsilon);
            }
        };

        apply(&mut layer.weights, &grads.weights, &mut moments.m_weights, &mut moments.v_weights);
        apply(&mut layer.bias, &grads.bias, &mut moments.m_bias, &mut moments.v_bias);
    }
}

/// First and second moment estimates for one layer.
#[derive(Debug, Clone)]
pub struct Moments {
    m_weights: Vec<f64>,
    v_weights: Vec<f64>,
    m_bias: Vec<f64>,
    v_bias: Vec<f64>,
}

impl Moments {
    pub fn zeros_like(layer: &Dense) -> Self {
        Self {
            m_weights: vec![0.0; layer.weights.len()],
            v_weights: vec![0.0; layer.weights.len()],
            m_bias: vec![0.0; layer.bias.len()],
            v_bias: vec![0.0; layer.bias.len()],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::algorithms::autoencoder::layer::Activation;

    #[test]
    fn first_step_moves_by_learning_rate() {
        let mut layer = Dense {
            input: 1,
            output: 1,
            weights: vec![1.0],
            bias: vec![0.0],
            activation: Activation::Linear,
        };
        let grads = Gradients {
            weights: vec![4.0],
            bias: vec![-2.0],
        };
        let mut moments = Moments::zeros_like(&layer);
        let mut adam = Adam::new(0.1);
        adam.begin_step();
        adam.update(&mut layer, &grads, &mut moments);

        // Bias-corrected first step is lr * sign(g), up to epsilon.
        assert!((layer.weights[0] - 0.9).abs() < 1e-6);
        assert!((layer.bias[0] - 0.1).abs() < 1e-6);
        assert_eq!(adam.step(), 1);
    }
}
