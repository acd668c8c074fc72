use rand::rngs::StdRng;
use rand::Rng;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Activation {
    Relu,
    Linear,
}

impl Activation {
    #[inline]
    pub fn apply(self, z: f64) -> f64 {
        match self {
            Activation::Relu => z.max(0.0),
            Activation::Linear => z,
        }
    }

    #[inline]
    pub fn derivative(self, z: f64) -> f64 {
        match self {
            Activation::Relu => {
                if z > 0.0 { 1.0 } else { 0.0 }
            }
            Activation::Linear => 1.0,
        }
    }
}

/// Fully connected layer. Weights are row-major: `weights[o * input + i]`.
#[derive(Debug, Clone)]
pub struct Dense {
    pub input: usize,
    pub output: usize,
    pub weights: Vec<f64>,
    pub bias: Vec<f64>,
    pub activation: Activation,
}

impl Dense {
    /// Glorot-uniform weights, zero bias.
    pub fn glorot(input: usize, output: usize, activation: Activation, rng: &mut StdRng) -> Self {
        let limit = (6.0 / (input + output) as f64).sqrt();
        let weights = (0..input * output)
            .map(|_| rng.gen_range(-limit..=limit))
            .collect();
        Self {
            input,
            output,
            weights,
            bias: vec![0.0; output],
            activation,
        }
    }

    /// `W x + b`, before the activation.
    pub fn pre_activation(&self, x: &[f64]) -> Vec<f64> {
        (0..self.output)
            .map(|o| {
                let row = &self.weights[o * self.input..(o + 1) * self.input];
                row.iter().zip(x).map(|(w, v)| w * v).sum::<f64>() + self.bias[o]
            })
            .collect()
    }

    pub fn forward(&self, x: &[f64]) -> Vec<f64> {
        self.pre_activation(x)
            .into_iter()
            .map(|z| self.activation.apply(z))
            .collect()
    }

    /// Backpropagate through this layer for one sample.
    ///
    /// `grad_out` is dL/d(output activation). Accumulates parameter gradients
    /// into `grads` and returns dL/d(input).
    pub fn backward(&self, input: &[f64], pre: &[f64], grad_out: &[f64], grads: &mut Gradients) -> Vec<f64> {
        let mut grad_in = vec![0.0; self.input];
        for o in 0..self.output {
            let delta = grad_out[o] * self.activation.derivative(pre[o]);
            if delta == 0.0 {
                continue;
            }
            grads.bias[o] += delta;
            let base = o * self.input;
            for i in 0..self.input {
                grads.weights[base + i] += delta * input[i];
                grad_in[i] += self.weights[base + i] * delta;
            }
        }
        grad_in
    }
}

/// Accumulated gradients for one [`Dense`] layer.
#[derive(Debug, Clone)]
pub struct Gradients {
    pub weights: Vec<f64>,
    pub bias: Vec<f64>,
}

impl Gradients {
    pub fn zeros_like(layer: &Dense) -> Self {
        Self {
            weights: vec![0.0; layer.weights.len()],
            bias: vec![0.0; layer.bias.len()],
        }
    }

    pub fn scale(&mut self, factor: f64) {
        self.weights.iter_mut().for_each(|g| *g *= factor);
        self.bias.iter_mut().for_each(|g| *g *= factor);
    }
}
