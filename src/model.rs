
use crate::error::{Result, SsweError};

use ndarray::{s, Array, Array1, Array2, ArrayView1, Axis, Zip};
use ndarray_rand::rand_distr::Uniform;
use ndarray_rand::RandomExt;
use rand::Rng;
use std::collections::BTreeMap;

/// The scoring network shared by the original and the corrupted branch.
///
/// embedding lookup of the 3 ids -> concatenation (3 * embedding_dim)
/// -> affine to `hidden_units` -> hard clip to [-1, 1] -> affine to 2 outputs:
/// column 0 is the syntactic score, column 1 the sentiment score.
///
/// Both branches of a training step go through the same instance, so they
/// always read the same parameter values.
#[derive(Clone, Debug, PartialEq)]
pub struct SharedNetwork {
    pub embeddings: Array2<f32>,
    pub hidden_w: Array2<f32>,
    pub hidden_b: Array1<f32>,
    pub output_w: Array2<f32>,
    pub output_b: Array1<f32>,
}

/// Activations of one forward pass, kept for the backward pass.
pub struct Forward {
    ids: Array2<usize>,
    flat: Array2<f32>,
    pre_activation: Array2<f32>,
    hidden: Array2<f32>,
    pub scores: Array2<f32>,
}

impl Forward {

    pub fn syntactic(&self) -> ArrayView1<f32> {
        self.scores.column(0)
    }

    pub fn sentiment(&self) -> ArrayView1<f32> {
        self.scores.column(1)
    }
}

/// Accumulated gradients. Embedding gradients are kept per touched row only.
#[derive(Clone, Debug, PartialEq)]
pub struct Gradients {
    pub embedding_rows: BTreeMap<usize, Array1<f32>>,
    pub hidden_w: Array2<f32>,
    pub hidden_b: Array1<f32>,
    pub output_w: Array2<f32>,
    pub output_b: Array1<f32>,
}

impl Gradients {

    pub fn zeros(network: &SharedNetwork) -> Self {
        Self {
            embedding_rows: BTreeMap::new(),
            hidden_w: Array2::zeros(network.hidden_w.raw_dim()),
            hidden_b: Array1::zeros(network.hidden_b.raw_dim()),
            output_w: Array2::zeros(network.output_w.raw_dim()),
            output_b: Array1::zeros(network.output_b.raw_dim()),
        }
    }
}

// uniform in +- sqrt(6 / (fan_in + fan_out))
fn glorot_uniform<R: Rng + ?Sized>(fan_in: usize, fan_out: usize, rng: &mut R) -> Array2<f32> {
    let limit = (6.0 / (fan_in + fan_out) as f32).sqrt();
    Array::random_using((fan_in, fan_out), Uniform::new(-limit, limit), rng)
}

impl SharedNetwork {

    pub fn new<R: Rng + ?Sized>(vocab_size: usize, embedding_dim: usize, hidden_units: usize, rng: &mut R) -> Self {
        let embeddings = glorot_uniform(vocab_size, embedding_dim, rng);
        SharedNetwork::with_embeddings(embeddings, hidden_units, rng)
    }

    /// Starts from a given embedding matrix, the dense layers are drawn fresh.
    pub fn with_embeddings<R: Rng + ?Sized>(embeddings: Array2<f32>, hidden_units: usize, rng: &mut R) -> Self {
        let input_dim = 3 * embeddings.ncols();
        Self {
            embeddings,
            hidden_w: glorot_uniform(input_dim, hidden_units, rng),
            hidden_b: Array1::zeros(hidden_units),
            output_w: glorot_uniform(hidden_units, 2, rng),
            output_b: Array1::zeros(2),
        }
    }

    /// Reassembles a network from stored parameters, checking that the shapes fit together.
    pub fn from_parts(
        embeddings: Array2<f32>,
        hidden_w: Array2<f32>,
        hidden_b: Array1<f32>,
        output_w: Array2<f32>,
        output_b: Array1<f32>,
    ) -> Result<Self> {

        let hidden_units = hidden_w.ncols();
        let consistent = hidden_w.nrows() == 3 * embeddings.ncols()
            && hidden_b.len() == hidden_units
            && output_w.dim() == (hidden_units, 2)
            && output_b.len() == 2;
        if !consistent {
            return Err(SsweError::InvalidEmbedding(format!(
                "inconsistent parameter shapes: embeddings {:?}, hidden {:?} + {:?}, output {:?} + {:?}",
                embeddings.dim(), hidden_w.dim(), hidden_b.dim(), output_w.dim(), output_b.dim()
            )));
        }
        Ok(Self { embeddings, hidden_w, hidden_b, output_w, output_b })
    }

    pub fn vocab_size(&self) -> usize {
        self.embeddings.nrows()
    }

    pub fn embedding_dim(&self) -> usize {
        self.embeddings.ncols()
    }

    pub fn hidden_units(&self) -> usize {
        self.hidden_w.ncols()
    }

    // (batch, 3) ids -> (batch, 3 * embedding_dim) concatenated rows
    fn lookup(&self, ids: &Array2<usize>) -> Array2<f32> {

        let dim = self.embedding_dim();
        let mut flat = Array2::zeros((ids.nrows(), ids.ncols() * dim));
        for ((b, k), id) in ids.indexed_iter() {
            flat.slice_mut(s![b, k * dim..(k + 1) * dim]).assign(&self.embeddings.row(*id));
        }
        flat
    }

    pub fn forward(&self, ids: &Array2<usize>) -> Forward {

        let flat = self.lookup(ids);
        let pre_activation = flat.dot(&self.hidden_w) + &self.hidden_b;
        let hidden = pre_activation.mapv(|x| x.clamp(-1.0, 1.0));
        let scores = hidden.dot(&self.output_w) + &self.output_b;

        Forward { ids: ids.to_owned(), flat, pre_activation, hidden, scores }
    }

    /// (batch, 2) scores: syntactic in column 0, sentiment in column 1.
    pub fn score(&self, ids: &Array2<usize>) -> Array2<f32> {
        self.forward(ids).scores
    }

    /// Adds the gradients of a pass given `d_scores` = dL/dscores, shape (batch, 2).
    /// Calling it for both branches sums their contributions to the shared weights.
    pub fn backward(&self, forward: &Forward, d_scores: &Array2<f32>, grads: &mut Gradients) {

        // output layer
        grads.output_w += &forward.hidden.t().dot(d_scores);
        grads.output_b += &d_scores.sum_axis(Axis(0));

        // clip passes the gradient only inside [-1, 1]
        let mut d_pre = d_scores.dot(&self.output_w.t());
        Zip::from(&mut d_pre).and(&forward.pre_activation).for_each(|d, &x| {
            if !(-1.0..=1.0).contains(&x) {
                *d = 0.0;
            }
        });

        // hidden layer
        grads.hidden_w += &forward.flat.t().dot(&d_pre);
        grads.hidden_b += &d_pre.sum_axis(Axis(0));

        // scatter back into the looked up rows, repeated ids add up
        let dim = self.embedding_dim();
        let d_flat = d_pre.dot(&self.hidden_w.t());
        for ((b, k), id) in forward.ids.indexed_iter() {
            let g = d_flat.slice(s![b, k * dim..(k + 1) * dim]);
            grads.embedding_rows
            .entry(*id)
            .and_modify(|row| *row += &g)
            .or_insert_with(|| g.to_owned());
        }
    }
}


#[cfg(test)]
mod tests {

    use super::*;
    use ndarray::array;
    use rand::{rngs::StdRng, SeedableRng};

    fn network() -> SharedNetwork {
        let mut rng = StdRng::seed_from_u64(11);
        let mut net = SharedNetwork::new(6, 4, 5, &mut rng);
        // keep every pre-activation inside the clip range
        net.hidden_w.mapv_inplace(|x| x * 0.1);
        net.hidden_b = Array1::random_using(5, Uniform::new(-0.1, 0.1), &mut rng);
        net.output_b = array![0.3, -0.2];
        net
    }

    // a loss that is linear in the scores, so d_scores is the weight matrix
    fn weighted_sum(net: &SharedNetwork, ids: &Array2<usize>, weights: &Array2<f32>) -> f32 {
        (net.score(ids) * weights).sum()
    }

    #[test]
    fn shapes_and_score_columns() {

        let net = network();
        let ids = array![[0, 1, 2], [3, 4, 5], [0, 0, 0]];
        let forward = net.forward(&ids);

        assert_eq!(forward.scores.dim(), (3, 2));
        assert_eq!(forward.syntactic().len(), 3);
        assert_eq!(forward.sentiment()[1], forward.scores[[1, 1]]);
        assert_eq!(net.hidden_w.dim(), (12, 5));
        assert_eq!(net.output_w.dim(), (5, 2));
    }

    #[test]
    fn identical_trigrams_score_identically() {
        let net = network();
        let scores = net.score(&array![[1, 2, 3], [4, 4, 4], [1, 2, 3]]);
        assert_eq!(scores.row(0), scores.row(2));
        assert_ne!(scores.row(0), scores.row(1));
    }

    #[test]
    fn hidden_activation_is_clipped() {

        let mut net = network();
        net.hidden_b.fill(5.0);
        let forward = net.forward(&array![[0, 1, 2]]);

        // every hidden unit saturates at 1, so scores are the output column sums plus bias
        let expected = net.output_w.sum_axis(Axis(0)) + &net.output_b;
        for (a, b) in forward.scores.row(0).iter().zip(expected.iter()) {
            assert!((a - b).abs() < 1e-5);
        }

        // and nothing flows back below the clip
        let mut grads = Gradients::zeros(&net);
        net.backward(&forward, &array![[1.0, 1.0]], &mut grads);
        assert!(grads.hidden_w.iter().all(|g| *g == 0.0));
        assert!(grads.embedding_rows.values().all(|row| row.iter().all(|g| *g == 0.0)));
        assert!(grads.output_w.iter().all(|g| *g == 1.0));
    }

    #[test]
    fn backward_matches_finite_differences() {

        let net = network();
        let ids = array![[0, 1, 2], [2, 3, 2], [5, 5, 1]];
        let weights = array![[1.0, -0.5], [0.25, 2.0], [-1.5, 0.75]];

        let mut grads = Gradients::zeros(&net);
        net.backward(&net.forward(&ids), &weights, &mut grads);

        let eps = 1e-2;
        let numeric = |perturb: &dyn Fn(&mut SharedNetwork, f32)| {
            let mut plus = net.clone();
            perturb(&mut plus, eps);
            let mut minus = net.clone();
            perturb(&mut minus, -eps);
            (weighted_sum(&plus, &ids, &weights) - weighted_sum(&minus, &ids, &weights)) / (2.0 * eps)
        };
        let close = |a: f32, b: f32| assert!((a - b).abs() < 1e-3, "{} vs {}", a, b);

        close(grads.output_w[[3, 1]], numeric(&|n, e| n.output_w[[3, 1]] += e));
        close(grads.output_b[0], numeric(&|n, e| n.output_b[0] += e));
        close(grads.hidden_w[[7, 2]], numeric(&|n, e| n.hidden_w[[7, 2]] += e));
        close(grads.hidden_b[4], numeric(&|n, e| n.hidden_b[4] += e));

        // id 2 appears three times, id 5 twice within one row
        for (id, col) in [(2, 0), (2, 3), (5, 1), (1, 2)] {
            close(grads.embedding_rows[&id][col], numeric(&|n, e| n.embeddings[[id, col]] += e));
        }
        assert!(!grads.embedding_rows.contains_key(&4));
    }

    #[test]
    fn from_parts_checks_shapes() {

        let net = network();
        let rebuilt = SharedNetwork::from_parts(
            net.embeddings.clone(), net.hidden_w.clone(), net.hidden_b.clone(), net.output_w.clone(), net.output_b.clone()
        ).unwrap();
        assert_eq!(rebuilt, net);

        let broken = SharedNetwork::from_parts(
            Array2::zeros((6, 3)), net.hidden_w.clone(), net.hidden_b.clone(), net.output_w.clone(), net.output_b.clone()
        );
        assert!(broken.is_err());
    }
}
