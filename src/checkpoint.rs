
use crate::config::files_handling::{read_input, save_output};
use crate::error::{Result, SsweError};
use crate::model::SharedNetwork;
use crate::optim::Adagrad;

use ndarray::{Array1, Array2};
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

const PREFIX: &str = "ckpt-";
const META_FILE: &str = "meta.json";

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CheckpointMeta {
    pub step: u64,
    pub vocab_size: usize,
    pub embedding_dim: usize,
    pub hidden_units: usize,
    pub learning_rate: f32,
}

pub struct Checkpoint {
    pub meta: CheckpointMeta,
    pub network: SharedNetwork,
    pub optimizer: Adagrad,
}

/// Writes Θ and the optimizer state to `model_dir/ckpt-<step>` and keeps
/// only the newest `keep` of them.
pub struct CheckpointManager {
    model_dir: PathBuf,
    keep: usize,
}

impl CheckpointManager {

    pub fn new(model_dir: impl Into<PathBuf>, keep: usize) -> Self {
        Self { model_dir: model_dir.into(), keep: keep.max(1) }
    }

    pub fn save(&self, step: u64, network: &SharedNetwork, optimizer: &Adagrad) -> Result<PathBuf> {

        let final_dir = self.model_dir.join(format!("{}{:010}", PREFIX, step));
        let tmp_dir = self.model_dir.join(format!(".{}{:010}.tmp", PREFIX, step));
        if tmp_dir.exists() {
            fs::remove_dir_all(&tmp_dir)?;
        }

        save_output::<Array2<f32>>(&tmp_dir, "embeddings", &network.embeddings)?;
        save_output::<Array2<f32>>(&tmp_dir, "hidden_w", &network.hidden_w)?;
        save_output::<Array1<f32>>(&tmp_dir, "hidden_b", &network.hidden_b)?;
        save_output::<Array2<f32>>(&tmp_dir, "output_w", &network.output_w)?;
        save_output::<Array1<f32>>(&tmp_dir, "output_b", &network.output_b)?;
        save_output::<Array2<f32>>(&tmp_dir, "acc_embeddings", &optimizer.acc_embeddings)?;
        save_output::<Array2<f32>>(&tmp_dir, "acc_hidden_w", &optimizer.acc_hidden_w)?;
        save_output::<Array1<f32>>(&tmp_dir, "acc_hidden_b", &optimizer.acc_hidden_b)?;
        save_output::<Array2<f32>>(&tmp_dir, "acc_output_w", &optimizer.acc_output_w)?;
        save_output::<Array1<f32>>(&tmp_dir, "acc_output_b", &optimizer.acc_output_b)?;

        let meta = CheckpointMeta {
            step,
            vocab_size: network.vocab_size(),
            embedding_dim: network.embedding_dim(),
            hidden_units: network.hidden_units(),
            learning_rate: optimizer.learning_rate,
        };
        let mut f = BufWriter::new(File::create(tmp_dir.join(META_FILE))?);
        serde_json::to_writer_pretty(&mut f, &meta)?;
        f.flush()?;

        // a checkpoint only becomes visible once complete
        if final_dir.exists() {
            fs::remove_dir_all(&final_dir)?;
        }
        fs::rename(&tmp_dir, &final_dir)?;
        info!("saved checkpoint for step {} to {}", step, final_dir.display());

        self.prune()?;
        Ok(final_dir)
    }

    /// Complete checkpoints, oldest first.
    pub fn list(&self) -> Result<Vec<(u64, PathBuf)>> {

        let mut found = Vec::new();
        if !self.model_dir.is_dir() {
            return Ok(found);
        }
        for entry in fs::read_dir(&self.model_dir)? {
            let path = entry?.path();
            let step = path.file_name()
            .and_then(|n| n.to_str())
            .and_then(|n| n.strip_prefix(PREFIX))
            .and_then(|n| n.parse::<u64>().ok());
            if let Some(step) = step {
                if path.join(META_FILE).is_file() {
                    found.push((step, path));
                }
            }
        }
        found.sort();
        Ok(found)
    }

    pub fn latest(&self) -> Result<Option<PathBuf>> {
        Ok(self.list()?.pop().map(|(_, path)| path))
    }

    fn prune(&self) -> Result<()> {
        let found = self.list()?;
        let n_remove = found.len().saturating_sub(self.keep);
        for (step, path) in found.into_iter().take(n_remove) {
            debug!("removing checkpoint for step {}", step);
            fs::remove_dir_all(path)?;
        }
        Ok(())
    }

    pub fn restore(checkpoint_dir: &Path) -> Result<Checkpoint> {

        let f = BufReader::new(File::open(checkpoint_dir.join(META_FILE))?);
        let meta: CheckpointMeta = serde_json::from_reader(f)?;

        let network = SharedNetwork::from_parts(
            read_input::<Array2<f32>>(&checkpoint_dir.join("embeddings"))?,
            read_input::<Array2<f32>>(&checkpoint_dir.join("hidden_w"))?,
            read_input::<Array1<f32>>(&checkpoint_dir.join("hidden_b"))?,
            read_input::<Array2<f32>>(&checkpoint_dir.join("output_w"))?,
            read_input::<Array1<f32>>(&checkpoint_dir.join("output_b"))?,
        )?;
        let optimizer = Adagrad {
            learning_rate: meta.learning_rate,
            acc_embeddings: read_input::<Array2<f32>>(&checkpoint_dir.join("acc_embeddings"))?,
            acc_hidden_w: read_input::<Array2<f32>>(&checkpoint_dir.join("acc_hidden_w"))?,
            acc_hidden_b: read_input::<Array1<f32>>(&checkpoint_dir.join("acc_hidden_b"))?,
            acc_output_w: read_input::<Array2<f32>>(&checkpoint_dir.join("acc_output_w"))?,
            acc_output_b: read_input::<Array1<f32>>(&checkpoint_dir.join("acc_output_b"))?,
        };

        if optimizer.acc_embeddings.dim() != network.embeddings.dim() || optimizer.acc_hidden_w.dim() != network.hidden_w.dim() {
            return Err(SsweError::InvalidEmbedding(format!(
                "optimizer state in {} does not match the network", checkpoint_dir.display()
            )));
        }

        Ok(Checkpoint { meta, network, optimizer })
    }

    /// The embedding matrix of the newest checkpoint.
    pub fn latest_embeddings(&self) -> Result<Array2<f32>> {
        let latest = self.latest()?.ok_or_else(|| SsweError::NoCheckpoint(self.model_dir.clone()))?;
        read_input::<Array2<f32>>(&latest.join("embeddings"))
    }
}
