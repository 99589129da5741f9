
// imports
use crate::batch::{BatchConfig, Batcher};
use crate::checkpoint::CheckpointManager;
use crate::config::Params;
use crate::embedding::Embedding;
use crate::error::{Result, SsweError};
use crate::loss::JointLoss;
use crate::model::SharedNetwork;
use crate::optim::Adagrad;
use crate::sample::{NegativeSampler, RecordFormat, RecordReader, TrigramGenerator};
use crate::tokenize::{join_ngrams, Tokenizer, TweetTokenizer};
use crate::train::{RunSummary, Train};
use crate::vocab::{Counts, Vocabulary};

use ndarray::Array2;
use rand::{rngs::StdRng, Rng, SeedableRng};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tracing::info;

pub const VOCABULARY_FILE: &str = "vocab.txt";

#[derive(Clone, Debug, PartialEq)]
pub struct PipelineOutput {
    pub summary: RunSummary,
    pub vocab_size: usize,
    pub exported: Option<PathBuf>,
}

pub struct Pipeline {}

impl Pipeline {

    // runs the main procedure of 3 steps -
    // -> vocabulary (and initial embedding) resolution
    // -> training over the sampled trigrams
    // -> export of the trained embedding

    pub fn run(params: &Params) -> Result<PipelineOutput> {

        params.validate()?;
        info!("{}", params);

        let tokenizer: Arc<dyn Tokenizer> = Arc::new(TweetTokenizer::new());
        let format = RecordFormat::from_params(params);
        let mut rng = match params.train.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };

        let timer = Instant::now();
        let (vocab, initial_matrix) = Pipeline::resolve_vocabulary(params, &format, &tokenizer)?;
        NegativeSampler::new(vocab.len())?;

        // checkpointed rows are only meaningful under the vocabulary they were trained with
        let manager = CheckpointManager::new(&params.model_dir, params.train.keep_checkpoints);
        let latest = manager.latest()?;
        let vocab_path = params.model_dir.join(VOCABULARY_FILE);
        if latest.is_some() {
            Pipeline::check_saved_vocabulary(&vocab_path, &vocab)?;
        }
        vocab.save(&vocab_path)?;
        info!("vocabulary of {} entries ready, took {} seconds ...", vocab.len(), timer.elapsed().as_secs());

        let embedding_dim = initial_matrix.as_ref().map_or(params.train.embedding_dim, |m| m.ncols());
        let loss = JointLoss::new(params.train.alpha)?;

        // resume from the newest checkpoint when there is one
        let mut trainer = match latest {
            Some(latest) => {
                let checkpoint = CheckpointManager::restore(&latest)?;
                let meta = &checkpoint.meta;
                if (meta.vocab_size, meta.embedding_dim, meta.hidden_units) != (vocab.len(), embedding_dim, params.train.hidden_units) {
                    return Err(SsweError::Config(format!(
                        "checkpoint {} was trained with vocab_size {}, embedding_dim {}, hidden_units {}",
                        latest.display(), meta.vocab_size, meta.embedding_dim, meta.hidden_units
                    )));
                }
                info!("resuming from step {}", meta.step);
                let step = meta.step;
                let mut optimizer = checkpoint.optimizer;
                optimizer.learning_rate = params.train.learning_rate;
                Train::new(checkpoint.network, optimizer, loss).with_global_step(step)
            },
            None => {
                let network = match initial_matrix {
                    Some(matrix) => SharedNetwork::with_embeddings(matrix, params.train.hidden_units, &mut rng),
                    None => SharedNetwork::new(vocab.len(), embedding_dim, params.train.hidden_units, &mut rng),
                };
                let optimizer = Adagrad::new(&network, params.train.learning_rate);
                Train::new(network, optimizer, loss)
            }
        };

        // every pass re-opens the input with its own sampling rng
        let vocab = Arc::new(vocab);
        let mut sample_rng = StdRng::from_rng(&mut rng).map_err(|e| SsweError::Config(e.to_string()))?;
        let open = {
            let vocab = Arc::clone(&vocab);
            let tokenizer = Arc::clone(&tokenizer);
            let input_file = params.input_file.clone();
            let ngram = params.ngram;
            let format = format.clone();
            move |_epoch: usize| {
                let records = RecordReader::open(&input_file, &format, Arc::clone(&tokenizer))?;
                TrigramGenerator::new(records, Arc::clone(&vocab), ngram, StdRng::seed_from_u64(sample_rng.gen()))
            }
        };
        let batch_config = BatchConfig {
            batch_size: params.train.batch_size,
            epochs: params.train.epochs,
            shuffle_buffer: params.train.shuffle.then_some(params.train.shuffle_buffer),
        };
        let batches = Batcher::new(open, batch_config, StdRng::seed_from_u64(rng.gen()));

        info!("starting training part...");
        let summary = trainer.run(batches, &params.train, Some(&manager))?;

        let exported = match &params.export_path {
            Some(export_path) => {
                let matrix = manager.latest_embeddings()?;
                let vocabulary = Arc::try_unwrap(vocab).unwrap_or_else(|shared| (*shared).clone());
                Embedding::new(vocabulary, matrix)?.save(export_path)?;
                info!("exported embedding to {}", export_path.display());
                Some(export_path.clone())
            },
            None => None
        };

        Ok(PipelineOutput { summary, vocab_size: trainer.network().vocab_size(), exported })
    }

    fn check_saved_vocabulary(saved_path: &Path, vocab: &Vocabulary) -> Result<()> {

        let saved = Vocabulary::load(saved_path)?;
        if saved == *vocab {
            return Ok(());
        }
        let id = (0..saved.len().max(vocab.len()))
        .find(|&id| saved.token(id) != vocab.token(id))
        .unwrap_or(0);
        Err(SsweError::Config(format!(
            "vocabulary does not match {} at id {}: checkpoint has {:?}, run has {:?}",
            saved_path.display(), id, saved.token(id), vocab.token(id)
        )))
    }

    fn resolve_vocabulary(params: &Params, format: &RecordFormat, tokenizer: &Arc<dyn Tokenizer>) -> Result<(Vocabulary, Option<Array2<f32>>)> {

        if let Some(path) = &params.initial_embeddings {
            info!("loading embeddings from file...");
            let embedding = Embedding::load(path)?;
            return Ok((embedding.vocabulary, Some(embedding.matrix)));
        }

        if let Some(path) = &params.vocabulary {
            info!("loading vocabulary...");
            return Ok((Vocabulary::load(path)?, None));
        }

        info!("building vocabulary from input data...");
        let mut sequences = Vec::new();
        for record in RecordReader::open(&params.input_file, format, Arc::clone(tokenizer))? {
            sequences.push(join_ngrams(&record?.tokens, params.ngram));
        }
        Ok((Counts::run(&sequences, params.max_vocab_size, params.num_threads)?, None))
    }
}
