use ndarray::{Array, Dimension, Zip};

use crate::recognition::domain::head_model::{Gradients, HeadModel};

const BETA1: f32 = 0.9;
const BETA2: f32 = 0.999;
const EPSILON: f32 = 1e-7;

/// Adam with bias correction, one moment pair per parameter tensor.
pub(crate) struct Adam {
    learning_rate: f32,
    step: i32,
    w1: Moments<ndarray::Ix2>,
    b1: Moments<ndarray::Ix1>,
    w2: Moments<ndarray::Ix2>,
}

struct Moments<D: Dimension> {
    m: Array<f32, D>,
    v: Array<f32, D>,
}

impl<D: Dimension> Moments<D> {
    fn zeros(dim: D) -> Self {
        Self {
            m: Array::zeros(dim.clone()),
            v: Array::zeros(dim),
        }
    }

    fn apply(&mut self, param: &mut Array<f32, D>, grad: &Array<f32, D>, lr_t: f32) {
        Zip::from(param)
            .and(grad)
            .and(&mut self.m)
            .and(&mut self.v)
            .for_each(|p, &g, m, v| {
                *m = BETA1 * *m + (1.0 - BETA1) * g;
                *v = BETA2 * *v + (1.0 - BETA2) * g * g;
                *p -= lr_t * *m / (v.sqrt() + EPSILON);
            });
    }
}

impl Adam {
    pub fn new(model: &HeadModel, learning_rate: f32) -> Self {
        Self {
            learning_rate,
            step: 0,
            w1: Moments::zeros(model.hidden_kernel().raw_dim()),
            b1: Moments::zeros(model.hidden_bias().raw_dim()),
            w2: Moments::zeros(model.output_kernel().raw_dim()),
        }
    }

    pub fn step(&mut self, model: &mut HeadModel, grads: &Gradients) {
        self.step += 1;
        let correction1 = 1.0 - BETA1.powi(self.step);
        let correction2 = 1.0 - BETA2.powi(self.step);
        let lr_t = self.learning_rate * correction2.sqrt() / correction1;

        let (w1, b1, w2) = model.parameters_mut();
        self.w1.apply(w1, &grads.w1, lr_t);
        self.b1.apply(b1, &grads.b1, lr_t);
        self.w2.apply(w2, &grads.w2, lr_t);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use ndarray::array;

    #[test]
    fn test_first_step_moves_by_learning_rate() {
        // With bias correction the first Adam step is ~lr * sign(grad).
        let mut param = array![1.0f32, -1.0, 0.5];
        let grad = array![0.2f32, -3.0, 0.0];
        let mut moments = Moments::zeros(param.raw_dim());
        let lr = 0.1;
        let lr_t = lr * (1.0 - BETA2).sqrt() / (1.0 - BETA1);

        moments.apply(&mut param, &grad, lr_t);

        assert_relative_eq!(param[0], 0.9, epsilon = 1e-4);
        assert_relative_eq!(param[1], -0.9, epsilon = 1e-4);
        assert_relative_eq!(param[2], 0.5);
    }

    #[test]
    fn test_repeated_steps_descend_quadratic() {
        // minimize (p - 3)^2
        let mut param = array![0.0f32];
        let mut moments = Moments::zeros(param.raw_dim());
        for step in 1..=500 {
            let grad = param.mapv(|p| 2.0 * (p - 3.0));
            let lr_t = 0.1 * (1.0 - BETA2.powi(step)).sqrt() / (1.0 - BETA1.powi(step));
            moments.apply(&mut param, &grad, lr_t);
        }
        assert_relative_eq!(param[0], 3.0, epsilon = 0.05);
    }
}
