use ndarray::{Array1, Array2, ArrayView1, ArrayView2, Axis, Zip};
use rand::rngs::StdRng;
use rand::Rng;
use thiserror::Error;

use crate::recognition::domain::dataset::argmax;
use crate::recognition::domain::sample::Label;

/// Cross-entropy probability clip.
const EPSILON: f32 = 1e-7;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("inconsistent head weights: {0}")]
pub struct HeadShapeError(pub String);

/// Trainable classifier head:
/// flatten → dense(hidden, relu, bias) → dense(labels, softmax, no bias).
///
/// The model owns the label ordering it was trained with; output unit `i`
/// always means `labels[i]`.
#[derive(Clone, Debug, PartialEq)]
pub struct HeadModel {
    labels: Vec<Label>,
    input_shape: Vec<usize>,
    /// `[input_len, hidden]`
    w1: Array2<f32>,
    /// `[hidden]`
    b1: Array1<f32>,
    /// `[hidden, labels]`
    w2: Array2<f32>,
}

/// Gradients of the mean batch loss, shaped like the model parameters.
pub(crate) struct Gradients {
    pub w1: Array2<f32>,
    pub b1: Array1<f32>,
    pub w2: Array2<f32>,
}

/// Loss and accuracy over a batch.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BatchMetrics {
    pub loss: f32,
    pub correct: usize,
    pub rows: usize,
}

struct Activations {
    z1: Array2<f32>,
    a1: Array2<f32>,
    probs: Array2<f32>,
}

impl HeadModel {
    /// Fresh model with variance-scaling (fan-in, uniform) kernels and zero
    /// bias.
    pub fn initialize(
        input_shape: &[usize],
        hidden_units: usize,
        labels: Vec<Label>,
        rng: &mut StdRng,
    ) -> Self {
        let input_len: usize = input_shape.iter().product();
        let outputs = labels.len();
        Self {
            w1: variance_scaling(input_len, hidden_units, rng),
            b1: Array1::zeros(hidden_units),
            w2: variance_scaling(hidden_units, outputs, rng),
            labels,
            input_shape: input_shape.to_vec(),
        }
    }

    pub fn from_parts(
        labels: Vec<Label>,
        input_shape: Vec<usize>,
        w1: Array2<f32>,
        b1: Array1<f32>,
        w2: Array2<f32>,
    ) -> Result<Self, HeadShapeError> {
        let input_len: usize = input_shape.iter().product();
        if w1.nrows() != input_len {
            return Err(HeadShapeError(format!(
                "hidden kernel has {} rows, input has {input_len} values",
                w1.nrows()
            )));
        }
        if b1.len() != w1.ncols() || w2.nrows() != w1.ncols() {
            return Err(HeadShapeError(format!(
                "hidden width disagrees: kernel {}, bias {}, output kernel {}",
                w1.ncols(),
                b1.len(),
                w2.nrows()
            )));
        }
        if w2.ncols() != labels.len() {
            return Err(HeadShapeError(format!(
                "{} output units for {} labels",
                w2.ncols(),
                labels.len()
            )));
        }
        Ok(Self {
            labels,
            input_shape,
            w1,
            b1,
            w2,
        })
    }

    pub fn labels(&self) -> &[Label] {
        &self.labels
    }

    pub fn input_shape(&self) -> &[usize] {
        &self.input_shape
    }

    pub fn input_len(&self) -> usize {
        self.w1.nrows()
    }

    pub fn hidden_units(&self) -> usize {
        self.w1.ncols()
    }

    pub fn output_units(&self) -> usize {
        self.w2.ncols()
    }

    pub fn hidden_kernel(&self) -> ArrayView2<'_, f32> {
        self.w1.view()
    }

    pub fn hidden_bias(&self) -> ArrayView1<'_, f32> {
        self.b1.view()
    }

    pub fn output_kernel(&self) -> ArrayView2<'_, f32> {
        self.w2.view()
    }

    /// Class probabilities, one row per input row.
    pub fn predict_proba(&self, inputs: ArrayView2<'_, f32>) -> Array2<f32> {
        self.forward(inputs).probs
    }

    /// Loss and correct predictions against one-hot `targets`.
    pub fn evaluate(&self, inputs: ArrayView2<'_, f32>, targets: ArrayView2<'_, f32>) -> BatchMetrics {
        let probs = self.predict_proba(inputs);
        metrics(&probs, targets)
    }

    /// Mean categorical cross-entropy gradients for one mini-batch.
    pub(crate) fn gradients(
        &self,
        inputs: ArrayView2<'_, f32>,
        targets: ArrayView2<'_, f32>,
    ) -> (BatchMetrics, Gradients) {
        let act = self.forward(inputs);
        let batch = metrics(&act.probs, targets);
        let rows = inputs.nrows().max(1) as f32;

        let dz2 = (&act.probs - &targets) / rows;
        let w2 = act.a1.t().dot(&dz2);
        let mut dz1 = dz2.dot(&self.w2.t());
        Zip::from(&mut dz1).and(&act.z1).for_each(|d, &z| {
            if z <= 0.0 {
                *d = 0.0;
            }
        });
        let w1 = inputs.t().dot(&dz1);
        let b1 = dz1.sum_axis(Axis(0));

        (batch, Gradients { w1, b1, w2 })
    }

    /// False once any weight or bias is NaN or infinite.
    pub fn is_finite(&self) -> bool {
        self.w1.iter().chain(&self.b1).chain(&self.w2).all(|v| v.is_finite())
    }

    pub(crate) fn parameters_mut(&mut self) -> (&mut Array2<f32>, &mut Array1<f32>, &mut Array2<f32>) {
        (&mut self.w1, &mut self.b1, &mut self.w2)
    }

    fn forward(&self, inputs: ArrayView2<'_, f32>) -> Activations {
        let z1 = inputs.dot(&self.w1) + &self.b1;
        let a1 = z1.mapv(relu);
        let mut probs = a1.dot(&self.w2);
        softmax_rows(&mut probs);
        Activations { z1, a1, probs }
    }
}

/// NaN passes through so a poisoned batch shows up in the loss.
fn relu(v: f32) -> f32 {
    if v > 0.0 || v.is_nan() {
        v
    } else {
        0.0
    }
}

fn variance_scaling(fan_in: usize, fan_out: usize, rng: &mut StdRng) -> Array2<f32> {
    let limit = (3.0 / fan_in.max(1) as f32).sqrt();
    Array2::from_shape_simple_fn((fan_in, fan_out), || rng.random_range(-limit..limit))
}

fn softmax_rows(logits: &mut Array2<f32>) {
    for mut row in logits.rows_mut() {
        let max = row.fold(f32::NEG_INFINITY, |m, &v| m.max(v));
        row.mapv_inplace(|v| (v - max).exp());
        let sum = row.sum();
        row.mapv_inplace(|v| v / sum);
    }
}

fn metrics(probs: &Array2<f32>, targets: ArrayView2<'_, f32>) -> BatchMetrics {
    let rows = probs.nrows();
    let mut total = 0.0f32;
    let mut correct = 0;
    for (p, y) in probs.rows().into_iter().zip(targets.rows()) {
        total -= Zip::from(&p)
            .and(&y)
            .fold(0.0, |acc, &p, &y| acc + y * p.clamp(EPSILON, 1.0 - EPSILON).ln());
        if argmax(p) == argmax(y) {
            correct += 1;
        }
    }
    BatchMetrics {
        loss: if rows == 0 { 0.0 } else { total / rows as f32 },
        correct,
        rows,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recognition::domain::dataset::make_rng;
    use approx::assert_relative_eq;
    use ndarray::array;

    fn labels(n: usize) -> Vec<Label> {
        (0..n).map(|i| Label::new(format!("l{i}")).unwrap()).collect()
    }

    fn tiny_model() -> HeadModel {
        HeadModel::initialize(&[2, 2], 5, labels(3), &mut make_rng(Some(11)))
    }

    #[test]
    fn test_initialize_shapes() {
        let model = HeadModel::initialize(&[7, 7, 4], 10, labels(4), &mut make_rng(Some(1)));
        assert_eq!(model.input_len(), 196);
        assert_eq!(model.hidden_units(), 10);
        assert_eq!(model.output_units(), 4);
        assert!(model.hidden_bias().iter().all(|&b| b == 0.0));
    }

    #[test]
    fn test_initialize_within_variance_scaling_limit() {
        let model = HeadModel::initialize(&[12], 8, labels(2), &mut make_rng(Some(2)));
        let limit = (3.0f32 / 12.0).sqrt();
        assert!(model.hidden_kernel().iter().all(|w| w.abs() <= limit));
        let limit = (3.0f32 / 8.0).sqrt();
        assert!(model.output_kernel().iter().all(|w| w.abs() <= limit));
    }

    #[test]
    fn test_probabilities_sum_to_one() {
        let model = tiny_model();
        let inputs = array![[0.1, 0.2, 0.3, 0.4], [1.0, -1.0, 0.5, 0.0]];
        let probs = model.predict_proba(inputs.view());
        for row in probs.rows() {
            assert_relative_eq!(row.sum(), 1.0, epsilon = 1e-5);
            assert!(row.iter().all(|&p| p > 0.0));
        }
    }

    #[test]
    fn test_softmax_is_stable_for_large_logits() {
        let mut logits = array![[1000.0f32, 1000.0, 0.0]];
        softmax_rows(&mut logits);
        assert_relative_eq!(logits[[0, 0]], 0.5, epsilon = 1e-6);
        assert_relative_eq!(logits[[0, 2]], 0.0, epsilon = 1e-6);
    }

    #[test]
    fn test_gradients_match_finite_differences() {
        let model = tiny_model();
        let inputs = array![[0.3, -0.2, 0.8, 0.5], [-0.6, 0.9, 0.1, 0.4]];
        let targets = array![[1.0, 0.0, 0.0], [0.0, 0.0, 1.0]];
        let (_, grads) = model.gradients(inputs.view(), targets.view());

        let h = 1e-2f32;
        let loss_with = |m: &HeadModel| m.evaluate(inputs.view(), targets.view()).loss;

        for &(r, c) in &[(0, 0), (2, 3), (3, 4)] {
            let mut plus = model.clone();
            plus.w1[[r, c]] += h;
            let mut minus = model.clone();
            minus.w1[[r, c]] -= h;
            let numeric = (loss_with(&plus) - loss_with(&minus)) / (2.0 * h);
            assert_relative_eq!(grads.w1[[r, c]], numeric, epsilon = 2e-3);
        }
        for &(r, c) in &[(0, 0), (4, 2)] {
            let mut plus = model.clone();
            plus.w2[[r, c]] += h;
            let mut minus = model.clone();
            minus.w2[[r, c]] -= h;
            let numeric = (loss_with(&plus) - loss_with(&minus)) / (2.0 * h);
            assert_relative_eq!(grads.w2[[r, c]], numeric, epsilon = 2e-3);
        }
        for i in 0..5 {
            let mut plus = model.clone();
            plus.b1[i] += h;
            let mut minus = model.clone();
            minus.b1[i] -= h;
            let numeric = (loss_with(&plus) - loss_with(&minus)) / (2.0 * h);
            assert_relative_eq!(grads.b1[i], numeric, epsilon = 2e-3);
        }
    }

    #[test]
    fn test_evaluate_counts_correct_rows() {
        let model = tiny_model();
        let inputs = array![[0.3, -0.2, 0.8, 0.5]];
        let probs = model.predict_proba(inputs.view());
        let predicted = argmax(probs.row(0));
        let mut targets = Array2::zeros((1, 3));
        targets[[0, predicted]] = 1.0;

        let m = model.evaluate(inputs.view(), targets.view());
        assert_eq!(m.correct, 1);
        assert_eq!(m.rows, 1);
        assert!(m.loss > 0.0);
    }

    #[test]
    fn test_nan_input_reaches_loss() {
        let model = tiny_model();
        let inputs = array![[f32::NAN, 0.0, 0.0, 0.0]];
        let targets = array![[1.0, 0.0, 0.0]];
        assert!(model.predict_proba(inputs.view()).iter().all(|p| p.is_nan()));
        assert!(model.evaluate(inputs.view(), targets.view()).loss.is_nan());
    }

    #[test]
    fn test_is_finite_detects_poisoned_weights() {
        let mut model = tiny_model();
        assert!(model.is_finite());
        model.b1[2] = f32::INFINITY;
        assert!(!model.is_finite());
        let mut model = tiny_model();
        model.w2[[1, 1]] = f32::NAN;
        assert!(!model.is_finite());
    }

    #[test]
    fn test_from_parts_rejects_label_width_mismatch() {
        let model = tiny_model();
        let result = HeadModel::from_parts(
            labels(2),
            vec![2, 2],
            model.w1.clone(),
            model.b1.clone(),
            model.w2.clone(),
        );
        assert!(result.is_err());
    }
}
