use crate::model::{Gradients, SharedNetwork};

use ndarray::{s, Array, Array1, Array2, ArrayBase, Data, DataMut, Dimension, Ix2, Zip};

pub const INITIAL_ACCUMULATOR: f32 = 0.1;

/// Adagrad with one squared-gradient accumulator per parameter.
///
/// Embedding rows are only touched when they received a gradient in the step.
#[derive(Clone, Debug, PartialEq)]
pub struct Adagrad {
    pub learning_rate: f32,
    pub acc_embeddings: Array2<f32>,
    pub acc_hidden_w: Array2<f32>,
    pub acc_hidden_b: Array1<f32>,
    pub acc_output_w: Array2<f32>,
    pub acc_output_b: Array1<f32>,
}

// acc += g^2, then w -= lr * g / sqrt(acc)
fn adagrad_update<S1, S2, S3, D>(weights: &mut ArrayBase<S1, D>, acc: &mut ArrayBase<S2, D>, grad: &ArrayBase<S3, D>, learning_rate: f32)
where
    S1: DataMut<Elem = f32>,
    S2: DataMut<Elem = f32>,
    S3: Data<Elem = f32>,
    D: Dimension,
{
    Zip::from(weights).and(acc).and(grad).for_each(|w, a, &g| {
        *a += g * g;
        *w -= learning_rate * g / a.sqrt();
    });
}

impl Adagrad {

    pub fn new(network: &SharedNetwork, learning_rate: f32) -> Self {
        let fill = |dim: Ix2| Array::from_elem(dim, INITIAL_ACCUMULATOR);
        Self {
            learning_rate,
            acc_embeddings: fill(network.embeddings.raw_dim()),
            acc_hidden_w: fill(network.hidden_w.raw_dim()),
            acc_hidden_b: Array1::from_elem(network.hidden_b.len(), INITIAL_ACCUMULATOR),
            acc_output_w: fill(network.output_w.raw_dim()),
            acc_output_b: Array1::from_elem(network.output_b.len(), INITIAL_ACCUMULATOR),
        }
    }

    pub fn apply(&mut self, network: &mut SharedNetwork, grads: &Gradients) {

        let lr = self.learning_rate;
        adagrad_update(&mut network.hidden_w, &mut self.acc_hidden_w, &grads.hidden_w, lr);
        adagrad_update(&mut network.hidden_b, &mut self.acc_hidden_b, &grads.hidden_b, lr);
        adagrad_update(&mut network.output_w, &mut self.acc_output_w, &grads.output_w, lr);
        adagrad_update(&mut network.output_b, &mut self.acc_output_b, &grads.output_b, lr);

        // update by index, done in a loop since no select_mut by non-consecutive indexes is available
        for (id, g) in &grads.embedding_rows {
            adagrad_update(
                &mut network.embeddings.slice_mut(s![*id, ..]),
                &mut self.acc_embeddings.slice_mut(s![*id, ..]),
                g,
                lr,
            );
        }
    }
}


#[cfg(test)]
mod tests {

    use super::*;
    use ndarray::array;
    use rand::{rngs::StdRng, SeedableRng};

    #[test]
    fn follows_adagrad_rule() {

        let mut w = array![1.0f32, -1.0];
        let mut acc = array![0.1f32, 0.1];
        let g = array![0.3f32, 0.0];
        adagrad_update(&mut w, &mut acc, &g, 0.5);

        let expected_acc = 0.1f32 + 0.3f32 * 0.3f32;
        assert_eq!(acc[0], expected_acc);
        assert_eq!(w[0], 1.0 - 0.5 * 0.3 / expected_acc.sqrt());
        // zero gradient leaves weight and accumulator alone
        assert_eq!((w[1], acc[1]), (-1.0, 0.1));
    }

    #[test]
    fn only_touched_rows_move() {

        let mut rng = StdRng::seed_from_u64(1);
        let mut net = SharedNetwork::new(4, 3, 2, &mut rng);
        let before = net.clone();
        let mut opt = Adagrad::new(&net, 0.1);

        let mut grads = Gradients::zeros(&net);
        grads.embedding_rows.insert(2, array![1.0, -1.0, 0.5]);
        grads.output_b = array![1.0, 0.0];
        opt.apply(&mut net, &grads);

        for id in [0, 1, 3] {
            assert_eq!(net.embeddings.row(id), before.embeddings.row(id));
            assert!(opt.acc_embeddings.row(id).iter().all(|a| *a == INITIAL_ACCUMULATOR));
        }
        assert!(net.embeddings[[2, 0]] < before.embeddings[[2, 0]]);
        assert!(net.embeddings[[2, 1]] > before.embeddings[[2, 1]]);
        assert!(net.output_b[0] < before.output_b[0]);
        assert_eq!(net.output_b[1], before.output_b[1]);
        assert_eq!(net.hidden_w, before.hidden_w);
    }
}
