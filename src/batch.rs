use crate::error::Result;
use crate::sample::Sample;

use ndarray::{Array1, Array2};
use rand::Rng;
use tracing::{debug, warn};

/// Column-stacked samples: `(n, 3)` id matrices plus one ±1 label per row.
#[derive(Clone, Debug, PartialEq)]
pub struct Batch {
    pub original: Array2<usize>,
    pub corrupted: Array2<usize>,
    pub labels: Array1<f32>,
}

impl Batch {

    pub fn from_samples(samples: &[Sample]) -> Self {

        let n = samples.len();
        let mut original = Array2::zeros((n, 3));
        let mut corrupted = Array2::zeros((n, 3));
        let mut labels = Array1::zeros(n);
        for (i, sample) in samples.iter().enumerate() {
            for j in 0..3 {
                original[[i, j]] = sample.original[j];
                corrupted[[i, j]] = sample.corrupted[j];
            }
            labels[i] = sample.label as f32;
        }
        Self { original, corrupted, labels }
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BatchConfig {
    pub batch_size: usize,
    // None repeats until the caller stops pulling
    pub epochs: Option<usize>,
    // None keeps generation order
    pub shuffle_buffer: Option<usize>,
}

/// Turns per-pass sample streams into batches.
///
/// `open(epoch)` must return a fresh stream for every pass. Passes are
/// shuffled independently through a bounded buffer, batches may span two
/// passes and only the very last batch can be shorter than `batch_size`.
pub struct Batcher<F, I, R> {
    open: F,
    current: Option<I>,
    config: BatchConfig,
    rng: R,
    buffer: Vec<Sample>,
    epoch: usize,
    pass_done: bool,
    pass_yield: usize,
    finished: bool,
}

impl<F, I, R> Batcher<F, I, R>
where
    F: FnMut(usize) -> Result<I>,
    I: Iterator<Item = Result<Sample>>,
    R: Rng,
{

    pub fn new(open: F, config: BatchConfig, rng: R) -> Self {
        let capacity = config.shuffle_buffer.unwrap_or(0);
        Self {
            open,
            current: None,
            config,
            rng,
            buffer: Vec::with_capacity(capacity),
            epoch: 0,
            pass_done: false,
            pass_yield: 0,
            finished: false,
        }
    }

    pub fn epoch(&self) -> usize {
        self.epoch
    }

    fn next_sample(&mut self) -> Result<Option<Sample>> {

        loop {

            if self.current.is_none() {
                if self.config.epochs.map_or(false, |n| self.epoch >= n) {
                    return Ok(None);
                }
                // an empty pass would make unbounded repetition spin forever
                if self.epoch > 0 && self.pass_yield == 0 {
                    warn!("pass {} produced no samples, stopping", self.epoch);
                    return Ok(None);
                }
                debug!("opening pass {}", self.epoch + 1);
                self.current = Some((self.open)(self.epoch)?);
                self.epoch += 1;
                self.pass_done = false;
                self.pass_yield = 0;
            }

            let Some(stream) = self.current.as_mut() else { continue };

            let next = match self.config.shuffle_buffer {
                None => stream.next().transpose()?,
                Some(buffer_size) => {
                    while !self.pass_done && self.buffer.len() < buffer_size {
                        match stream.next().transpose()? {
                            Some(sample) => self.buffer.push(sample),
                            None => self.pass_done = true,
                        }
                    }
                    if self.buffer.is_empty() {
                        None
                    } else {
                        let i = self.rng.gen_range(0..self.buffer.len());
                        Some(self.buffer.swap_remove(i))
                    }
                }
            };

            match next {
                Some(sample) => {
                    self.pass_yield += 1;
                    return Ok(Some(sample));
                },
                None => self.current = None,
            }
        }
    }
}

impl<F, I, R> Iterator for Batcher<F, I, R>
where
    F: FnMut(usize) -> Result<I>,
    I: Iterator<Item = Result<Sample>>,
    R: Rng,
{
    type Item = Result<Batch>;

    fn next(&mut self) -> Option<Self::Item> {

        if self.finished {
            return None;
        }

        let mut samples = Vec::with_capacity(self.config.batch_size);
        while samples.len() < self.config.batch_size {
            match self.next_sample() {
                Ok(Some(sample)) => samples.push(sample),
                Ok(None) => {
                    self.finished = true;
                    break;
                },
                Err(e) => {
                    self.finished = true;
                    return Some(Err(e));
                }
            }
        }

        if samples.is_empty() {
            return None;
        }
        Some(Ok(Batch::from_samples(&samples)))
    }
}


#[cfg(test)]
mod tests {

    use super::*;
    use crate::error::SsweError;
    use rand::{rngs::StdRng, SeedableRng};
    use std::vec;

    fn samples(n: usize) -> Vec<Sample> {
        (0..n).map(|i| Sample {
            original: [i, i, i],
            corrupted: [i, i + 1, i],
            label: if i % 2 == 0 { 1 } else { -1 },
        }).collect()
    }

    fn batcher(n: usize, config: BatchConfig) -> Batcher<impl FnMut(usize) -> Result<vec::IntoIter<Result<Sample>>>, vec::IntoIter<Result<Sample>>, StdRng> {
        let open = move |_epoch: usize| -> Result<vec::IntoIter<Result<Sample>>> {
            Ok(samples(n).into_iter().map(Ok).collect::<Vec<_>>().into_iter())
        };
        Batcher::new(open, config, StdRng::seed_from_u64(3))
    }

    fn firsts(batch: &Batch) -> Vec<usize> {
        batch.original.column(0).to_vec()
    }

    #[test]
    fn exact_batch_then_stop() {

        let config = BatchConfig { batch_size: 4, epochs: Some(1), shuffle_buffer: None };
        let batches = batcher(4, config).collect::<Result<Vec<Batch>>>().unwrap();

        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0].len(), 4);
        assert_eq!(batches[0].labels.to_vec(), vec![1.0, -1.0, 1.0, -1.0]);
        assert_eq!(batches[0].corrupted.row(2).to_vec(), vec![2, 3, 2]);
    }

    #[test]
    fn unshuffled_keeps_order_and_ragged_tail() {

        let config = BatchConfig { batch_size: 4, epochs: Some(2), shuffle_buffer: None };
        let batches = batcher(5, config).collect::<Result<Vec<Batch>>>().unwrap();

        // 10 samples over two passes, batches cross the pass boundary
        assert_eq!(batches.iter().map(Batch::len).collect::<Vec<_>>(), vec![4, 4, 2]);
        assert_eq!(firsts(&batches[0]), vec![0, 1, 2, 3]);
        assert_eq!(firsts(&batches[1]), vec![4, 0, 1, 2]);
        assert_eq!(firsts(&batches[2]), vec![3, 4]);
    }

    #[test]
    fn shuffle_permutes_each_pass() {

        let config = BatchConfig { batch_size: 10, epochs: Some(3), shuffle_buffer: Some(4) };
        let batches = batcher(10, config).collect::<Result<Vec<Batch>>>().unwrap();
        assert_eq!(batches.len(), 3);

        let mut any_moved = false;
        for batch in &batches {
            let mut ids = firsts(batch);
            any_moved |= ids != (0..10).collect::<Vec<_>>();
            ids.sort();
            assert_eq!(ids, (0..10).collect::<Vec<_>>());
        }
        assert!(any_moved);
    }

    #[test]
    fn unbounded_repeat_keeps_going() {
        let config = BatchConfig { batch_size: 3, epochs: None, shuffle_buffer: Some(2) };
        let mut batches = batcher(2, config);
        for _ in 0..20 {
            assert_eq!(batches.next().unwrap().unwrap().len(), 3);
        }
        assert!(batches.epoch() >= 30);
    }

    #[test]
    fn empty_input_terminates() {
        let config = BatchConfig { batch_size: 3, epochs: None, shuffle_buffer: None };
        assert!(batcher(0, config).next().is_none());
    }

    #[test]
    fn stream_error_ends_batches() {

        let open = |_epoch: usize| -> Result<vec::IntoIter<Result<Sample>>> {
            let mut items: Vec<Result<Sample>> = samples(3).into_iter().map(Ok).collect();
            items.push(Err(SsweError::Config("broken".into())));
            Ok(items.into_iter())
        };
        let config = BatchConfig { batch_size: 2, epochs: Some(1), shuffle_buffer: None };
        let mut batches = Batcher::new(open, config, StdRng::seed_from_u64(0));

        assert!(batches.next().unwrap().is_ok());
        assert!(batches.next().unwrap().is_err());
        assert!(batches.next().is_none());
    }
}
