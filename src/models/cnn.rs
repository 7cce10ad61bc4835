//! Convolutional classifier learner.
//!
//! Stack of `conv3x3 (pad 1) -> ReLU -> maxpool 2x2` blocks followed by two
//! fully connected layers. Trained with mini-batch SGD with momentum on
//! softmax cross-entropy. Parameters are kept as row-major tensors in export
//! order, so get/set is a straight copy.

use crate::core::{Error, Metrics, Result};
use crate::data::ImageData;
use crate::models::learner::{
    EvaluationResult, LocalTrainer, ModelKind, TrainConfig, TrainingResult,
};
use crate::params::{ParameterSet, Tensor};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

const KERNEL: usize = 3;

/// Network geometry.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CnnConfig {
    /// Input channels
    pub in_channels: usize,
    /// Input height
    pub height: usize,
    /// Input width
    pub width: usize,
    /// Output channels of each convolution block
    pub conv_channels: Vec<usize>,
    /// Width of the hidden fully connected layer
    pub hidden_units: usize,
    /// Number of output classes
    pub num_classes: usize,
}

impl Default for CnnConfig {
    fn default() -> Self {
        Self {
            in_channels: 3,
            height: 32,
            width: 32,
            conv_channels: vec![32, 64, 64],
            hidden_units: 64,
            num_classes: 10,
        }
    }
}

impl CnnConfig {
    /// Check that every block leaves a non-empty feature map.
    pub fn validate(&self) -> Result<()> {
        if self.in_channels == 0 || self.hidden_units == 0 || self.num_classes < 2 {
            return Err(Error::InvalidConfig(
                "cnn needs input channels, hidden units and at least two classes".to_string(),
            ));
        }
        if self.conv_channels.is_empty() || self.conv_channels.contains(&0) {
            return Err(Error::InvalidConfig(
                "cnn needs at least one non-empty convolution block".to_string(),
            ));
        }
        let (_, h, w) = self.feature_dims();
        if h == 0 || w == 0 {
            return Err(Error::InvalidConfig(format!(
                "{}x{} input is too small for {} pooling blocks",
                self.height,
                self.width,
                self.conv_channels.len()
            )));
        }
        Ok(())
    }

    /// (channels, height, width) entering each convolution block.
    fn block_dims(&self) -> Vec<(usize, usize, usize)> {
        let mut dims = Vec::with_capacity(self.conv_channels.len());
        let (mut c, mut h, mut w) = (self.in_channels, self.height, self.width);
        for &out in &self.conv_channels {
            dims.push((c, h, w));
            c = out;
            h /= 2;
            w /= 2;
        }
        dims
    }

    /// Feature map dims after the last pooling stage.
    fn feature_dims(&self) -> (usize, usize, usize) {
        let c = self.conv_channels.last().copied().unwrap_or(self.in_channels);
        let (mut h, mut w) = (self.height, self.width);
        for _ in &self.conv_channels {
            if h == 0 || w == 0 {
                break;
            }
            h /= 2;
            w /= 2;
        }
        (c, h, w)
    }

    fn flat_dim(&self) -> usize {
        let (c, h, w) = self.feature_dims();
        c * h * w
    }

    fn image_len(&self) -> usize {
        self.in_channels * self.height * self.width
    }

    /// Shapes of every parameter tensor, in order.
    pub fn parameter_shapes(&self) -> Vec<Vec<usize>> {
        let mut shapes = Vec::new();
        let mut in_c = self.in_channels;
        for &out_c in &self.conv_channels {
            shapes.push(vec![out_c, in_c, KERNEL, KERNEL]);
            shapes.push(vec![out_c]);
            in_c = out_c;
        }
        shapes.push(vec![self.hidden_units, self.flat_dim()]);
        shapes.push(vec![self.hidden_units]);
        shapes.push(vec![self.num_classes, self.hidden_units]);
        shapes.push(vec![self.num_classes]);
        shapes
    }
}

/// Cached activations of one forward pass.
struct Trace {
    /// Input of each convolution block
    block_inputs: Vec<Vec<f32>>,
    /// Post-ReLU convolution output of each block
    conv_outputs: Vec<Vec<f32>>,
    /// Argmax positions chosen by each pooling stage
    pool_indices: Vec<Vec<usize>>,
    /// Flattened features entering fc1
    flat: Vec<f32>,
    /// Post-ReLU fc1 output
    hidden: Vec<f32>,
    /// Raw class scores
    logits: Vec<f32>,
}

/// Convolutional network.
#[derive(Clone, Debug)]
pub struct ConvNet {
    config: CnnConfig,
    /// Parameters in `conv{i}.weight, conv{i}.bias, fc1.*, fc2.*` order
    params: Vec<Tensor>,
}

impl ConvNet {
    /// Create a network with uniform(-1/sqrt(fan_in), 1/sqrt(fan_in)) initialization.
    pub fn new(config: CnnConfig, rng: &mut impl Rng) -> Result<Self> {
        config.validate()?;
        let shapes = config.parameter_shapes();
        let mut params = Vec::with_capacity(shapes.len());
        for pair in shapes.chunks(2) {
            let weight_shape = &pair[0];
            let fan_in: usize = weight_shape[1..].iter().product();
            let bound = 1.0 / (fan_in as f32).sqrt();
            for shape in pair {
                let len: usize = shape.iter().product();
                let values = (0..len).map(|_| rng.gen_range(-bound..bound)).collect();
                params.push(Tensor::new(shape.clone(), values)?);
            }
        }
        Ok(Self { config, params })
    }

    /// Create a network from a fixed seed.
    pub fn with_seed(config: CnnConfig, seed: u64) -> Result<Self> {
        let mut rng = StdRng::seed_from_u64(seed);
        Self::new(config, &mut rng)
    }

    pub fn config(&self) -> &CnnConfig {
        &self.config
    }

    fn fc_offset(&self) -> usize {
        2 * self.config.conv_channels.len()
    }

    fn forward(&self, image: &[f32]) -> Trace {
        let cfg = &self.config;
        let dims = cfg.block_dims();
        let mut block_inputs = Vec::with_capacity(dims.len());
        let mut conv_outputs = Vec::with_capacity(dims.len());
        let mut pool_indices = Vec::with_capacity(dims.len());

        let mut x = image.to_vec();
        for (i, &(c, h, w)) in dims.iter().enumerate() {
            let out_c = cfg.conv_channels[i];
            let mut y = conv2d_forward(
                &x,
                (c, h, w),
                self.params[2 * i].data(),
                self.params[2 * i + 1].data(),
                out_c,
            );
            relu_inplace(&mut y);
            let (pooled, idx) = maxpool_forward(&y, (out_c, h, w));
            block_inputs.push(x);
            conv_outputs.push(y);
            pool_indices.push(idx);
            x = pooled;
        }

        let f = self.fc_offset();
        let mut hidden = dense_forward(
            self.params[f].data(),
            self.params[f + 1].data(),
            &x,
            cfg.hidden_units,
        );
        relu_inplace(&mut hidden);
        let logits = dense_forward(
            self.params[f + 2].data(),
            self.params[f + 3].data(),
            &hidden,
            cfg.num_classes,
        );

        Trace {
            block_inputs,
            conv_outputs,
            pool_indices,
            flat: x,
            hidden,
            logits,
        }
    }

    /// Accumulate gradients of one sample's loss into `grads`.
    fn backward(&self, trace: &Trace, dlogits: &[f32], grads: &mut [Vec<f32>]) {
        let cfg = &self.config;
        let f = self.fc_offset();

        let mut dhidden = {
            let (head, tail) = grads.split_at_mut(f + 3);
            dense_backward(
                self.params[f + 2].data(),
                &trace.hidden,
                dlogits,
                &mut head[f + 2],
                &mut tail[0],
            )
        };
        relu_backward(&trace.hidden, &mut dhidden);

        let mut dx = {
            let (head, tail) = grads.split_at_mut(f + 1);
            dense_backward(
                self.params[f].data(),
                &trace.flat,
                &dhidden,
                &mut head[f],
                &mut tail[0],
            )
        };

        let dims = cfg.block_dims();
        for i in (0..dims.len()).rev() {
            let (c, h, w) = dims[i];
            let out_c = cfg.conv_channels[i];
            let mut dconv = maxpool_backward(&dx, &trace.pool_indices[i], out_c * h * w);
            relu_backward(&trace.conv_outputs[i], &mut dconv);

            let (head, tail) = grads.split_at_mut(2 * i + 1);
            dx = conv2d_backward(
                &trace.block_inputs[i],
                (c, h, w),
                self.params[2 * i].data(),
                out_c,
                &dconv,
                &mut head[2 * i],
                &mut tail[0],
                i > 0,
            );
        }
    }

    fn check_data(&self, data: &ImageData) -> Result<()> {
        if data.images.len() != data.labels.len() {
            return Err(Error::Dataset(format!(
                "{} images but {} labels",
                data.images.len(),
                data.labels.len()
            )));
        }
        let expected = self.config.image_len();
        if let Some(img) = data.images.iter().find(|img| img.len() != expected) {
            return Err(Error::Dataset(format!(
                "expected images of {} values, got {}",
                expected,
                img.len()
            )));
        }
        if let Some(label) = data.labels.iter().find(|l| **l >= self.config.num_classes) {
            return Err(Error::Dataset(format!(
                "label {} outside {} classes",
                label, self.config.num_classes
            )));
        }
        Ok(())
    }
}

impl LocalTrainer for ConvNet {
    type Data = ImageData;

    fn kind(&self) -> ModelKind {
        ModelKind::Cnn
    }

    fn get_parameters(&self) -> ParameterSet {
        ParameterSet::new(self.params.clone())
    }

    fn set_parameters(&mut self, parameters: &ParameterSet) -> Result<()> {
        let shapes = self.config.parameter_shapes();
        if parameters.len() != shapes.len() {
            return Err(Error::ShapeMismatch(format!(
                "expected {} tensors, got {}",
                shapes.len(),
                parameters.len()
            )));
        }
        for (i, (tensor, shape)) in parameters.tensors().iter().zip(shapes.iter()).enumerate() {
            if tensor.shape() != shape.as_slice() {
                return Err(Error::ShapeMismatch(format!(
                    "tensor {} has shape {:?}, expected {:?}",
                    i,
                    tensor.shape(),
                    shape
                )));
            }
        }
        self.params = parameters.tensors().to_vec();
        Ok(())
    }

    fn fit(&mut self, data: &ImageData, config: &TrainConfig) -> Result<TrainingResult> {
        self.check_data(data)?;
        let n = data.len();
        if n == 0 {
            return Ok(TrainingResult {
                loss: 0.0,
                num_examples: 0,
                metrics: Metrics::new(),
            });
        }

        let mut rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        let mut velocity: Vec<Vec<f32>> = self.params.iter().map(|p| vec![0.0; p.len()]).collect();
        let mut order: Vec<usize> = (0..n).collect();
        let mut total_loss = 0.0f64;
        let mut total_seen = 0usize;

        for _ in 0..config.local_epochs {
            order.shuffle(&mut rng);
            for batch in order.chunks(config.batch_size) {
                let mut grads: Vec<Vec<f32>> =
                    self.params.iter().map(|p| vec![0.0; p.len()]).collect();

                for &idx in batch {
                    let trace = self.forward(&data.images[idx]);
                    let (loss, dlogits) = softmax_cross_entropy(&trace.logits, data.labels[idx]);
                    total_loss += loss as f64;
                    self.backward(&trace, &dlogits, &mut grads);
                }
                total_seen += batch.len();

                let scale = 1.0 / batch.len() as f32;
                for ((param, grad), vel) in self
                    .params
                    .iter_mut()
                    .zip(grads.iter())
                    .zip(velocity.iter_mut())
                {
                    for ((p, g), v) in param
                        .data_mut()
                        .iter_mut()
                        .zip(grad.iter())
                        .zip(vel.iter_mut())
                    {
                        *v = config.momentum * *v + g * scale;
                        *p -= config.learning_rate * *v;
                    }
                }
            }
        }

        let loss = total_loss / total_seen as f64;
        if !loss.is_finite() {
            return Err(Error::Training("loss diverged".to_string()));
        }
        let mut metrics = Metrics::new();
        metrics.insert("train_loss".to_string(), loss);

        Ok(TrainingResult {
            loss,
            num_examples: n as u64,
            metrics,
        })
    }

    fn evaluate(&self, data: &ImageData) -> Result<EvaluationResult> {
        self.check_data(data)?;
        let n = data.len();
        if n == 0 {
            return Ok(EvaluationResult {
                loss: 0.0,
                num_examples: 0,
                metrics: Metrics::new(),
            });
        }

        let mut total_loss = 0.0f64;
        let mut correct = 0usize;
        for (image, &label) in data.images.iter().zip(data.labels.iter()) {
            let trace = self.forward(image);
            let (loss, _) = softmax_cross_entropy(&trace.logits, label);
            total_loss += loss as f64;
            if argmax(&trace.logits) == label {
                correct += 1;
            }
        }

        let mut metrics = Metrics::new();
        metrics.insert("accuracy".to_string(), correct as f64 / n as f64);

        Ok(EvaluationResult {
            loss: total_loss / n as f64,
            num_examples: n as u64,
            metrics,
        })
    }
}

fn conv2d_forward(
    input: &[f32],
    (c, h, w): (usize, usize, usize),
    weight: &[f32],
    bias: &[f32],
    out_c: usize,
) -> Vec<f32> {
    let mut out = vec![0.0; out_c * h * w];
    for o in 0..out_c {
        for y in 0..h {
            for x in 0..w {
                let mut acc = bias[o];
                for ci in 0..c {
                    for ky in 0..KERNEL {
                        let iy = y + ky;
                        if iy < 1 || iy > h {
                            continue;
                        }
                        for kx in 0..KERNEL {
                            let ix = x + kx;
                            if ix < 1 || ix > w {
                                continue;
                            }
                            let wi = ((o * c + ci) * KERNEL + ky) * KERNEL + kx;
                            acc += weight[wi] * input[(ci * h + iy - 1) * w + ix - 1];
                        }
                    }
                }
                out[(o * h + y) * w + x] = acc;
            }
        }
    }
    out
}

#[allow(clippy::too_many_arguments)]
fn conv2d_backward(
    input: &[f32],
    (c, h, w): (usize, usize, usize),
    weight: &[f32],
    out_c: usize,
    dout: &[f32],
    dweight: &mut [f32],
    dbias: &mut [f32],
    need_input_grad: bool,
) -> Vec<f32> {
    let mut din = if need_input_grad {
        vec![0.0; c * h * w]
    } else {
        Vec::new()
    };
    for o in 0..out_c {
        for y in 0..h {
            for x in 0..w {
                let g = dout[(o * h + y) * w + x];
                if g == 0.0 {
                    continue;
                }
                dbias[o] += g;
                for ci in 0..c {
                    for ky in 0..KERNEL {
                        let iy = y + ky;
                        if iy < 1 || iy > h {
                            continue;
                        }
                        for kx in 0..KERNEL {
                            let ix = x + kx;
                            if ix < 1 || ix > w {
                                continue;
                            }
                            let wi = ((o * c + ci) * KERNEL + ky) * KERNEL + kx;
                            let ii = (ci * h + iy - 1) * w + ix - 1;
                            dweight[wi] += g * input[ii];
                            if need_input_grad {
                                din[ii] += g * weight[wi];
                            }
                        }
                    }
                }
            }
        }
    }
    din
}

fn maxpool_forward(input: &[f32], (c, h, w): (usize, usize, usize)) -> (Vec<f32>, Vec<usize>) {
    let (oh, ow) = (h / 2, w / 2);
    let mut out = Vec::with_capacity(c * oh * ow);
    let mut indices = Vec::with_capacity(c * oh * ow);
    for ch in 0..c {
        for y in 0..oh {
            for x in 0..ow {
                let mut best = (ch * h + 2 * y) * w + 2 * x;
                for (dy, dx) in [(0, 1), (1, 0), (1, 1)] {
                    let idx = (ch * h + 2 * y + dy) * w + 2 * x + dx;
                    if input[idx] > input[best] {
                        best = idx;
                    }
                }
                out.push(input[best]);
                indices.push(best);
            }
        }
    }
    (out, indices)
}

fn maxpool_backward(dout: &[f32], indices: &[usize], input_len: usize) -> Vec<f32> {
    let mut din = vec![0.0; input_len];
    for (g, &idx) in dout.iter().zip(indices.iter()) {
        din[idx] += g;
    }
    din
}

fn dense_forward(weight: &[f32], bias: &[f32], input: &[f32], out_dim: usize) -> Vec<f32> {
    let in_dim = input.len();
    (0..out_dim)
        .map(|o| {
            let row = &weight[o * in_dim..(o + 1) * in_dim];
            bias[o] + row.iter().zip(input.iter()).map(|(w, x)| w * x).sum::<f32>()
        })
        .collect()
}

fn dense_backward(
    weight: &[f32],
    input: &[f32],
    dout: &[f32],
    dweight: &mut [f32],
    dbias: &mut [f32],
) -> Vec<f32> {
    let in_dim = input.len();
    let mut din = vec![0.0; in_dim];
    for (o, &g) in dout.iter().enumerate() {
        dbias[o] += g;
        let row = o * in_dim;
        for i in 0..in_dim {
            dweight[row + i] += g * input[i];
            din[i] += g * weight[row + i];
        }
    }
    din
}

fn relu_inplace(values: &mut [f32]) {
    for v in values.iter_mut() {
        if *v < 0.0 {
            *v = 0.0;
        }
    }
}

/// Zero gradients where the forward ReLU clamped.
fn relu_backward(activated: &[f32], grad: &mut [f32]) {
    for (g, a) in grad.iter_mut().zip(activated.iter()) {
        if *a <= 0.0 {
            *g = 0.0;
        }
    }
}

/// Loss and d(loss)/d(logits) for one sample.
fn softmax_cross_entropy(logits: &[f32], label: usize) -> (f32, Vec<f32>) {
    let max = logits.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let exps: Vec<f32> = logits.iter().map(|l| (l - max).exp()).collect();
    let sum: f32 = exps.iter().sum();
    let loss = sum.ln() - (logits[label] - max);
    let mut grad: Vec<f32> = exps.iter().map(|e| e / sum).collect();
    grad[label] -= 1.0;
    (loss, grad)
}

fn argmax(values: &[f32]) -> usize {
    values
        .iter()
        .enumerate()
        .fold((0, f32::NEG_INFINITY), |best, (i, &v)| {
            if v > best.1 {
                (i, v)
            } else {
                best
            }
        })
        .0
}
