use rand::Rng;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::model::vocab::FIRST_FOOD_ID;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Matrix {
    pub rows: usize,
    pub cols: usize,
    #[serde(with = "packed_f32")]
    pub data: Vec<f32>,
}

impl Matrix {
    pub fn zeros(rows: usize, cols: usize) -> Self {
        Self {
            rows,
            cols,
            data: vec![0.0; rows * cols],
        }
    }

    pub fn random<R: Rng + ?Sized>(rows: usize, cols: usize, rng: &mut R) -> Self {
        let bound = (6.0 / (rows + cols).max(1) as f32).sqrt();
        let data = (0..rows * cols)
            .map(|_| rng.gen_range(-bound..bound))
            .collect();
        Self { rows, cols, data }
    }

    pub fn row(&self, r: usize) -> &[f32] {
        &self.data[r * self.cols..(r + 1) * self.cols]
    }

    pub fn row_mut(&mut self, r: usize) -> &mut [f32] {
        let cols = self.cols;
        &mut self.data[r * cols..(r + 1) * cols]
    }

    /// out += self · x
    pub fn matvec_add(&self, x: &[f32], out: &mut [f32]) {
        for (r, slot) in out.iter_mut().enumerate().take(self.rows) {
            *slot += dot(self.row(r), x);
        }
    }

    /// out += selfᵀ · y
    pub fn matvec_t_add(&self, y: &[f32], out: &mut [f32]) {
        for (r, weight) in y.iter().enumerate().take(self.rows) {
            if *weight == 0.0 {
                continue;
            }
            for (slot, value) in out.iter_mut().zip(self.row(r)) {
                *slot += weight * value;
            }
        }
    }

    /// self += a ⊗ b
    pub fn add_outer(&mut self, a: &[f32], b: &[f32]) {
        for (r, left) in a.iter().enumerate().take(self.rows) {
            if *left == 0.0 {
                continue;
            }
            for (slot, right) in self.row_mut(r).iter_mut().zip(b) {
                *slot += left * right;
            }
        }
    }

    pub fn add_to_row(&mut self, r: usize, values: &[f32]) {
        for (slot, value) in self.row_mut(r).iter_mut().zip(values) {
            *slot += value;
        }
    }

    fn is_consistent(&self) -> bool {
        self.data.len() == self.rows * self.cols && self.data.iter().all(|v| v.is_finite())
    }
}

fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

mod packed_f32 {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(data: &[f32], serializer: S) -> Result<S::Ok, S::Error> {
        let bytes = data
            .iter()
            .flat_map(|v| v.to_le_bytes())
            .collect::<Vec<u8>>();
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<f32>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        let bytes = STANDARD
            .decode(encoded.as_bytes())
            .map_err(serde::de::Error::custom)?;
        if bytes.len() % 4 != 0 {
            return Err(serde::de::Error::custom("packed tensor length is not a multiple of 4"));
        }
        Ok(bytes
            .chunks_exact(4)
            .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
            .collect())
    }
}

/// All learned tensors plus the fixed per-feature input scale.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelWeights {
    pub input_dim: usize,
    pub hidden: usize,
    pub vocab_size: usize,
    pub slots: usize,
    pub feature_scale: Matrix,
    pub encoder: Matrix,
    pub encoder_bias: Matrix,
    pub context: Matrix,
    pub decoder_bias: Matrix,
    pub token_embedding: Matrix,
    pub slot_embedding: Matrix,
    pub output: Matrix,
    pub output_bias: Matrix,
}

impl ModelWeights {
    pub fn initialize<R: Rng + ?Sized>(
        input_dim: usize,
        hidden: usize,
        vocab_size: usize,
        slots: usize,
        rng: &mut R,
    ) -> Self {
        let mut feature_scale = Matrix::zeros(1, input_dim);
        feature_scale.data.iter_mut().for_each(|v| *v = 1.0);
        Self {
            input_dim,
            hidden,
            vocab_size,
            slots,
            feature_scale,
            encoder: Matrix::random(hidden, input_dim, rng),
            encoder_bias: Matrix::zeros(1, hidden),
            context: Matrix::random(hidden, hidden, rng),
            decoder_bias: Matrix::zeros(1, hidden),
            token_embedding: Matrix::random(vocab_size, hidden, rng),
            slot_embedding: Matrix::random(slots, hidden, rng),
            output: Matrix::random(vocab_size, hidden, rng),
            output_bias: Matrix::zeros(1, vocab_size),
        }
    }

    pub fn zeros_like(&self) -> Self {
        let zero = |m: &Matrix| Matrix::zeros(m.rows, m.cols);
        Self {
            input_dim: self.input_dim,
            hidden: self.hidden,
            vocab_size: self.vocab_size,
            slots: self.slots,
            feature_scale: self.feature_scale.clone(),
            encoder: zero(&self.encoder),
            encoder_bias: zero(&self.encoder_bias),
            context: zero(&self.context),
            decoder_bias: zero(&self.decoder_bias),
            token_embedding: zero(&self.token_embedding),
            slot_embedding: zero(&self.slot_embedding),
            output: zero(&self.output),
            output_bias: zero(&self.output_bias),
        }
    }

    pub fn trainable(&self) -> [&Matrix; 8] {
        [
            &self.encoder,
            &self.encoder_bias,
            &self.context,
            &self.decoder_bias,
            &self.token_embedding,
            &self.slot_embedding,
            &self.output,
            &self.output_bias,
        ]
    }

    pub fn trainable_mut(&mut self) -> [&mut Matrix; 8] {
        [
            &mut self.encoder,
            &mut self.encoder_bias,
            &mut self.context,
            &mut self.decoder_bias,
            &mut self.token_embedding,
            &mut self.slot_embedding,
            &mut self.output,
            &mut self.output_bias,
        ]
    }

    /// Sets the input scale from the largest magnitude seen per feature.
    pub fn fit_feature_scale<'a, I>(&mut self, feature_rows: I)
    where
        I: IntoIterator<Item = &'a [f64]>,
    {
        let mut max_abs = vec![0.0f32; self.input_dim];
        for row in feature_rows {
            for (slot, value) in max_abs.iter_mut().zip(row) {
                *slot = slot.max(value.abs() as f32);
            }
        }
        for (scale, observed) in self.feature_scale.data.iter_mut().zip(max_abs) {
            *scale = if observed > 0.0 { observed } else { 1.0 };
        }
    }

    pub fn squared_norm(&self) -> f32 {
        self.trainable()
            .iter()
            .flat_map(|m| m.data.iter())
            .map(|v| v * v)
            .sum()
    }

    pub fn scale(&mut self, factor: f32) {
        for matrix in self.trainable_mut() {
            matrix.data.iter_mut().for_each(|v| *v *= factor);
        }
    }

    /// SHA-256 over the exact bytes of every tensor.
    pub fn digest(&self) -> String {
        let mut hasher = Sha256::new();
        for dim in [self.input_dim, self.hidden, self.vocab_size, self.slots] {
            hasher.update((dim as u64).to_le_bytes());
        }
        let tensors = std::iter::once(&self.feature_scale).chain(self.trainable());
        for matrix in tensors {
            hasher.update((matrix.rows as u64).to_le_bytes());
            hasher.update((matrix.cols as u64).to_le_bytes());
            for value in &matrix.data {
                hasher.update(value.to_le_bytes());
            }
        }
        format!("{:x}", hasher.finalize())
    }

    /// Checks every tensor against the declared dimensions.
    pub fn validate(&self) -> Result<(), String> {
        let expected = [
            ("feature_scale", &self.feature_scale, 1, self.input_dim),
            ("encoder", &self.encoder, self.hidden, self.input_dim),
            ("encoder_bias", &self.encoder_bias, 1, self.hidden),
            ("context", &self.context, self.hidden, self.hidden),
            ("decoder_bias", &self.decoder_bias, 1, self.hidden),
            ("token_embedding", &self.token_embedding, self.vocab_size, self.hidden),
            ("slot_embedding", &self.slot_embedding, self.slots, self.hidden),
            ("output", &self.output, self.vocab_size, self.hidden),
            ("output_bias", &self.output_bias, 1, self.vocab_size),
        ];
        for (name, matrix, rows, cols) in expected {
            if matrix.rows != rows || matrix.cols != cols || !matrix.is_consistent() {
                return Err(format!(
                    "tensor {name} is {}x{} with {} values, expected {rows}x{cols}",
                    matrix.rows,
                    matrix.cols,
                    matrix.data.len()
                ));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SequenceStep {
    pub token: u32,
    pub slot: usize,
}

/// One (health vector, plan) pair in model form.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SequenceExample {
    pub features: Vec<f64>,
    pub steps: Vec<SequenceStep>,
}

/// Encoder output reused across every decoding step of one plan.
#[derive(Debug, Clone)]
pub struct EncodedContext {
    input: Vec<f32>,
    context: Vec<f32>,
    base: Vec<f32>,
}

/// Encoder-decoder over food tokens.
///
/// The encoder projects the scaled health vector into a `tanh` context. Each decoder
/// step combines that context with the embedding of the previously committed token and
/// the embedding of the meal slot being filled, then projects to vocabulary logits.
#[derive(Debug, Clone, PartialEq)]
pub struct DietModel {
    pub weights: ModelWeights,
}

impl DietModel {
    pub fn new(weights: ModelWeights) -> Self {
        Self { weights }
    }

    pub fn vocab_size(&self) -> usize {
        self.weights.vocab_size
    }

    pub fn encode(&self, features: &[f64]) -> EncodedContext {
        let w = &self.weights;
        let input = (0..w.input_dim)
            .map(|i| {
                let raw = features.get(i).copied().unwrap_or(0.0) as f32;
                let scale = w.feature_scale.data[i];
                if scale > 0.0 {
                    raw / scale
                } else {
                    raw
                }
            })
            .collect::<Vec<_>>();
        let mut context = w.encoder_bias.data.clone();
        w.encoder.matvec_add(&input, &mut context);
        context.iter_mut().for_each(|v| *v = v.tanh());
        let mut base = w.decoder_bias.data.clone();
        w.context.matvec_add(&context, &mut base);
        EncodedContext {
            input,
            context,
            base,
        }
    }

    fn hidden_state(&self, encoded: &EncodedContext, prev: u32, slot: usize) -> Vec<f32> {
        let w = &self.weights;
        let prev = (prev as usize).min(w.vocab_size.saturating_sub(1));
        let slot = slot.min(w.slots.saturating_sub(1));
        encoded
            .base
            .iter()
            .zip(w.token_embedding.row(prev))
            .zip(w.slot_embedding.row(slot))
            .map(|((b, t), s)| (b + t + s).tanh())
            .collect()
    }

    fn project(&self, hidden: &[f32]) -> Vec<f32> {
        let mut logits = self.weights.output_bias.data.clone();
        self.weights.output.matvec_add(hidden, &mut logits);
        logits
    }

    /// Vocabulary logits for filling `slot` after committing `prev`.
    pub fn step_logits(&self, encoded: &EncodedContext, prev: u32, slot: usize) -> Vec<f32> {
        let hidden = self.hidden_state(encoded, prev, slot);
        self.project(&hidden)
    }

    /// Runs one example and returns the summed cross-entropy and the number of targets.
    ///
    /// With `grads` present, gradients scaled by `grad_scale` are accumulated into it.
    /// `teacher_forcing` is the probability of feeding the gold previous token instead of
    /// the model's own best guess.
    pub fn accumulate_example<R: Rng + ?Sized>(
        &self,
        example: &SequenceExample,
        teacher_forcing: f64,
        grad_scale: f32,
        rng: &mut R,
        mut grads: Option<&mut ModelWeights>,
    ) -> (f64, usize) {
        let w = &self.weights;
        let encoded = self.encode(&example.features);
        let mut d_base = vec![0.0f32; w.hidden];
        let mut loss = 0.0f64;
        let mut count = 0usize;
        let mut gold_prev = crate::model::vocab::SOS_ID;
        let mut predicted_prev = crate::model::vocab::SOS_ID;

        for step in &example.steps {
            let target = step.token as usize;
            if target >= w.vocab_size {
                continue;
            }
            let prev = if teacher_forcing >= 1.0 || rng.gen_bool(teacher_forcing.clamp(0.0, 1.0)) {
                gold_prev
            } else {
                predicted_prev
            };
            let hidden = self.hidden_state(&encoded, prev, step.slot);
            let logits = self.project(&hidden);
            let probs = softmax(&logits);
            loss -= (probs[target].max(1e-12) as f64).ln();
            count += 1;
            predicted_prev = argmax_food(&logits).unwrap_or(step.token);
            gold_prev = step.token;

            let Some(grads) = grads.as_deref_mut() else {
                continue;
            };
            let mut d_logits = probs;
            d_logits[target] -= 1.0;
            d_logits.iter_mut().for_each(|v| *v *= grad_scale);
            grads.output.add_outer(&d_logits, &hidden);
            for (slot, value) in grads.output_bias.data.iter_mut().zip(&d_logits) {
                *slot += value;
            }
            let mut d_hidden = vec![0.0f32; w.hidden];
            w.output.matvec_t_add(&d_logits, &mut d_hidden);
            let d_pre = d_hidden
                .iter()
                .zip(&hidden)
                .map(|(d, h)| d * (1.0 - h * h))
                .collect::<Vec<_>>();
            let prev_row = (prev as usize).min(w.vocab_size.saturating_sub(1));
            let slot_row = step.slot.min(w.slots.saturating_sub(1));
            grads.token_embedding.add_to_row(prev_row, &d_pre);
            grads.slot_embedding.add_to_row(slot_row, &d_pre);
            for (acc, value) in d_base.iter_mut().zip(&d_pre) {
                *acc += value;
            }
        }

        if let Some(grads) = grads {
            for (slot, value) in grads.decoder_bias.data.iter_mut().zip(&d_base) {
                *slot += value;
            }
            grads.context.add_outer(&d_base, &encoded.context);
            let mut d_context = vec![0.0f32; w.hidden];
            w.context.matvec_t_add(&d_base, &mut d_context);
            let d_pre_context = d_context
                .iter()
                .zip(&encoded.context)
                .map(|(d, c)| d * (1.0 - c * c))
                .collect::<Vec<_>>();
            grads.encoder.add_outer(&d_pre_context, &encoded.input);
            for (slot, value) in grads.encoder_bias.data.iter_mut().zip(&d_pre_context) {
                *slot += value;
            }
        }

        (loss, count)
    }
}

pub fn softmax(logits: &[f32]) -> Vec<f32> {
    let max = logits.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let exps = logits
        .iter()
        .map(|v| if v.is_finite() { (v - max).exp() } else { 0.0 })
        .collect::<Vec<_>>();
    let total: f32 = exps.iter().sum();
    if total <= 0.0 || !total.is_finite() {
        return vec![0.0; logits.len()];
    }
    exps.into_iter().map(|v| v / total).collect()
}

/// Highest-scoring food token, ignoring reserved ids.
pub fn argmax_food(logits: &[f32]) -> Option<u32> {
    logits
        .iter()
        .enumerate()
        .skip(FIRST_FOOD_ID as usize)
        .filter(|(_, v)| v.is_finite())
        .max_by(|a, b| a.1.total_cmp(b.1))
        .map(|(idx, _)| idx as u32)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    fn tiny_model() -> DietModel {
        let mut rng = ChaCha8Rng::seed_from_u64(7);
        DietModel::new(ModelWeights::initialize(4, 6, 8, 3, &mut rng))
    }

    fn example() -> SequenceExample {
        SequenceExample {
            features: vec![0.4, 0.7, 1.0, 0.5],
            steps: vec![
                SequenceStep { token: 3, slot: 0 },
                SequenceStep { token: 5, slot: 1 },
                SequenceStep { token: 7, slot: 2 },
            ],
        }
    }

    fn nudge(model: &DietModel, tensor: usize, index: usize, delta: f32) -> DietModel {
        let mut nudged = model.clone();
        for (i, matrix) in nudged.weights.trainable_mut().into_iter().enumerate() {
            if i == tensor {
                matrix.data[index] += delta;
            }
        }
        nudged
    }

    #[test]
    fn weights_survive_serde_exactly() {
        let model = tiny_model();
        let json = serde_json::to_string(&model.weights).expect("serialize");
        let back: ModelWeights = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(back, model.weights);
        assert_eq!(back.digest(), model.weights.digest());
        assert!(back.validate().is_ok());
    }

    #[test]
    fn analytic_gradient_matches_finite_difference() {
        let model = tiny_model();
        let example = example();
        let mut rng = ChaCha8Rng::seed_from_u64(1);
        let mut grads = model.weights.zeros_like();
        model.accumulate_example(&example, 1.0, 1.0, &mut rng, Some(&mut grads));

        let probes: [(usize, usize); 4] = [(0, 3), (2, 5), (4, 20), (6, 20)];
        for (tensor, index) in probes {
            let eps = 1e-2f32;
            let plus = nudge(&model, tensor, index, eps);
            let minus = nudge(&model, tensor, index, -eps);
            let (lp, _) = plus.accumulate_example(&example, 1.0, 1.0, &mut rng, None);
            let (lm, _) = minus.accumulate_example(&example, 1.0, 1.0, &mut rng, None);
            let numeric = ((lp - lm) / (2.0 * eps as f64)) as f32;
            let analytic = grads.trainable()[tensor].data[index];
            assert!(
                (numeric - analytic).abs() < 2e-2,
                "tensor {tensor} index {index}: numeric {numeric} analytic {analytic}"
            );
        }
    }

    #[test]
    fn softmax_and_argmax_skip_reserved_tokens() {
        let logits = vec![9.0, 9.0, 9.0, 1.0, 3.0, f32::NEG_INFINITY];
        assert_eq!(argmax_food(&logits), Some(4));
        let probs = softmax(&logits);
        assert!((probs.iter().sum::<f32>() - 1.0).abs() < 1e-5);
        assert_eq!(probs[5], 0.0);
    }
}
