use crate::error::{Result, SsweError};
use crate::vocab::Vocabulary;

use ndarray::{Array2, Axis};
use std::fs;
use std::path::Path;

/// Embedding matrix joined with its vocabulary, row `i` belongs to token `i`.
#[derive(Clone, Debug, PartialEq)]
pub struct Embedding {
    pub vocabulary: Vocabulary,
    pub matrix: Array2<f32>,
}

impl Embedding {

    pub fn new(vocabulary: Vocabulary, matrix: Array2<f32>) -> Result<Self> {
        if vocabulary.len() != matrix.nrows() {
            return Err(SsweError::InvalidEmbedding(format!(
                "{} tokens but {} matrix rows", vocabulary.len(), matrix.nrows()
            )));
        }
        Ok(Self { vocabulary, matrix })
    }

    pub fn dim(&self) -> usize {
        self.matrix.ncols()
    }

    /// Writes one csv row per token: the token followed by its components.
    pub fn save(&self, file_path: &Path) -> Result<()> {

        if let Some(parent) = file_path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut wrt = csv::WriterBuilder::new().has_headers(false).from_path(file_path)?;

        let mut record: Vec<String> = Vec::with_capacity(self.dim() + 1);
        for (tok, row) in self.vocabulary.tokens().iter().zip(self.matrix.axis_iter(Axis(0))) {
            record.clear();
            record.push(tok.to_owned());
            // `{}` prints the shortest representation that parses back to the same f32
            record.extend(row.iter().map(|x| format!("{}", x)));
            wrt.write_record(&record)?;
        }
        wrt.flush()?;
        Ok(())
    }

    /// Reads the csv written by [`Embedding::save`].
    ///
    /// When the file carries no unknown token, one is appended with a zero row.
    pub fn load(file_path: &Path) -> Result<Self> {

        let mut rdr = csv::ReaderBuilder::new().has_headers(false).from_path(file_path)?;

        let mut tokens: Vec<String> = Vec::new();
        let mut values: Vec<f32> = Vec::new();
        let mut dim: Option<usize> = None;

        for (line, record) in rdr.records().enumerate() {
            let record = record?;
            let mut fields = record.iter();
            let tok = fields.next().ok_or_else(|| SsweError::InvalidEmbedding(format!("empty row {}", line)))?;

            let before = values.len();
            for field in fields {
                let x = field.trim().parse::<f32>().map_err(|_| {
                    SsweError::InvalidEmbedding(format!("row {} holds non numeric value '{}'", line, field))
                })?;
                values.push(x);
            }
            let width = values.len() - before;

            match dim {
                None if width == 0 => return Err(SsweError::InvalidEmbedding(format!("row {} has no components", line))),
                None => dim = Some(width),
                Some(d) if d != width => return Err(SsweError::InvalidEmbedding(format!(
                    "row {} has {} components, expected {}", line, width, d
                ))),
                Some(_) => {}
            }
            tokens.push(tok.to_owned());
        }

        let dim = dim.ok_or_else(|| SsweError::InvalidEmbedding(format!("{} holds no rows", file_path.display())))?;
        let n_rows = tokens.len();
        let vocabulary = Vocabulary::from_tokens(tokens)?;
        values.resize(vocabulary.len() * dim, 0.0);
        let matrix = Array2::from_shape_vec((vocabulary.len(), dim), values)?;

        if vocabulary.len() > n_rows {
            tracing::debug!("appended a zero row for the unknown token");
        }
        Embedding::new(vocabulary, matrix)
    }
}
