use crate::model::network::ModelWeights;

const BETA1: f32 = 0.9;
const BETA2: f32 = 0.999;
const EPSILON: f32 = 1e-8;

#[derive(Debug, Clone)]
pub struct Adam {
    learning_rate: f32,
    step: i32,
    first_moment: ModelWeights,
    second_moment: ModelWeights,
}

impl Adam {
    pub fn new(template: &ModelWeights, learning_rate: f64) -> Self {
        Self {
            learning_rate: learning_rate as f32,
            step: 0,
            first_moment: template.zeros_like(),
            second_moment: template.zeros_like(),
        }
    }

    pub fn learning_rate(&self) -> f64 {
        self.learning_rate as f64
    }

    pub fn apply(&mut self, weights: &mut ModelWeights, grads: &ModelWeights) {
        self.step += 1;
        let correction1 = 1.0 - BETA1.powi(self.step);
        let correction2 = 1.0 - BETA2.powi(self.step);
        let lr = self.learning_rate;

        let params = weights.trainable_mut();
        let firsts = self.first_moment.trainable_mut();
        let seconds = self.second_moment.trainable_mut();
        let gradients = grads.trainable();
        for (((param, m), v), g) in params.into_iter().zip(firsts).zip(seconds).zip(gradients) {
            for (((p, m), v), g) in param
                .data
                .iter_mut()
                .zip(m.data.iter_mut())
                .zip(v.data.iter_mut())
                .zip(&g.data)
            {
                *m = BETA1 * *m + (1.0 - BETA1) * g;
                *v = BETA2 * *v + (1.0 - BETA2) * g * g;
                let m_hat = *m / correction1;
                let v_hat = *v / correction2;
                *p -= lr * m_hat / (v_hat.sqrt() + EPSILON);
            }
        }
    }
}

/// Rescales gradients so their global L2 norm is at most `max_norm`. Returns the
/// norm before clipping.
pub fn clip_global_norm(grads: &mut ModelWeights, max_norm: f64) -> f64 {
    let norm = (grads.squared_norm() as f64).sqrt();
    if max_norm > 0.0 && norm > max_norm {
        grads.scale((max_norm / norm) as f32);
    }
    norm
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    #[test]
    fn clipping_bounds_the_norm() {
        let mut rng = ChaCha8Rng::seed_from_u64(3);
        let mut grads = ModelWeights::initialize(3, 4, 6, 2, &mut rng);
        grads.scale(50.0);
        let before = clip_global_norm(&mut grads, 1.0);
        assert!(before > 1.0);
        assert!(((grads.squared_norm() as f64).sqrt() - 1.0).abs() < 1e-3);
    }

    #[test]
    fn adam_moves_against_the_gradient() {
        let mut rng = ChaCha8Rng::seed_from_u64(4);
        let mut weights = ModelWeights::initialize(2, 2, 4, 1, &mut rng);
        let before = weights.output_bias.data[0];
        let mut grads = weights.zeros_like();
        grads.output_bias.data[0] = 0.5;
        let mut adam = Adam::new(&weights, 0.01);
        adam.apply(&mut weights, &grads);
        assert!(weights.output_bias.data[0] < before);
        assert_eq!(adam.learning_rate(), 0.01f32 as f64);
    }
}
