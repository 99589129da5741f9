
use crate::config::files_handling;
use crate::error::{Result, SsweError};

use rayon::{prelude::*, ThreadPoolBuilder};
use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::Path;
use tracing::info;

pub const UNKNOWN_TOKEN: &str = "<unk>";

/// Bijection between tokens and the dense ids `0..len()`.
///
/// Every vocabulary holds [`UNKNOWN_TOKEN`]; tokens missing from the
/// vocabulary are looked up as its id.
#[derive(Clone, Debug, PartialEq)]
pub struct Vocabulary {
    tokens: Vec<String>,
    t2i: HashMap<String, usize>,
    unknown: usize,
}

impl Vocabulary {

    /// Ids follow the order of `tokens`. The unknown token is appended when absent.
    pub fn from_tokens(mut tokens: Vec<String>) -> Result<Self> {

        if !tokens.iter().any(|t| t == UNKNOWN_TOKEN) {
            tokens.push(UNKNOWN_TOKEN.to_string());
        }

        let mut t2i: HashMap<String, usize> = HashMap::with_capacity(tokens.len());
        for (i, tok) in tokens.iter().enumerate() {
            if t2i.insert(tok.to_owned(), i).is_some() {
                return Err(SsweError::DuplicateToken(tok.to_owned()));
            }
        }
        let unknown = t2i[UNKNOWN_TOKEN];

        Ok(Self { tokens, t2i, unknown })
    }

    /// One token per line, the id of a token is its line index.
    pub fn load(file_path: &Path) -> Result<Self> {
        let tokens = files_handling::read_input::<Vec<String>>(file_path)?;
        Vocabulary::from_tokens(tokens)
    }

    pub fn save(&self, file_path: &Path) -> Result<()> {

        if let Some(parent) = file_path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut f = BufWriter::new(File::create(file_path)?);
        for tok in &self.tokens {
            writeln!(f, "{}", tok)?;
        }
        f.flush()?;
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    pub fn tokens(&self) -> &[String] {
        &self.tokens
    }

    pub fn unknown_id(&self) -> usize {
        self.unknown
    }

    pub fn get(&self, token: &str) -> Option<usize> {
        self.t2i.get(token).copied()
    }

    pub fn id(&self, token: &str) -> usize {
        self.get(token).unwrap_or(self.unknown)
    }

    pub fn token(&self, id: usize) -> Option<&str> {
        self.tokens.get(id).map(String::as_str)
    }

    pub fn lookup_ids(&self, tokens: &[String]) -> Vec<usize> {
        tokens.iter().map(|t| self.id(t)).collect()
    }
}


pub struct Counts {}

impl Counts {

    fn accumulate(sequence: &[String], token2count: &mut HashMap<String, usize>) {
        // accumulate occurrences of words - how many times each token appears in the corpus
        for tok in sequence {
            let val = token2count.entry(tok.to_owned()).or_insert(0);
            *val += 1;
        }
    }

    /// Counts tokens over `sequences` on `num_threads` threads.
    pub fn count(sequences: &[Vec<String>], num_threads: usize) -> Result<HashMap<String, usize>> {

        let pool = ThreadPoolBuilder::new().num_threads(num_threads).build()?;
        let token2count = pool.install(|| {
            sequences
            .par_iter()
            .fold(HashMap::new, |mut token2count, sequence| {
                Counts::accumulate(sequence, &mut token2count);
                token2count
            })
            .reduce(HashMap::new, |mut a, b| {
                for (tok, count) in b {
                    *a.entry(tok).or_insert(0) += count;
                }
                a
            })
        });

        Ok(token2count)
    }

    /// Orders tokens by descending count (ties by token) behind the unknown
    /// token at id 0, keeping at most `max_size` entries in total.
    pub fn build_vocab(token2count: HashMap<String, usize>, max_size: Option<usize>) -> Result<Vocabulary> {

        let n_unique = token2count.len();
        let mut tup = token2count
        .into_iter()
        .filter(|(k, _)| k != UNKNOWN_TOKEN)
        .collect::<Vec<(String, usize)>>();
        tup.sort_by(|(t, c), (u, d)| d.cmp(c).then_with(|| t.cmp(u)));

        if let Some(max_size) = max_size {
            tup.truncate(max_size.saturating_sub(1));
        }

        let mut tokens = Vec::with_capacity(tup.len() + 1);
        tokens.push(UNKNOWN_TOKEN.to_string());
        tokens.extend(tup.into_iter().map(|(tok, _)| tok));

        info!("using {} tokens out of {} unique ones", tokens.len() - 1, n_unique);
        Vocabulary::from_tokens(tokens)
    }

    pub fn run(sequences: &[Vec<String>], max_size: Option<usize>, num_threads: usize) -> Result<Vocabulary> {
        let token2count = Counts::count(sequences, num_threads)?;
        Counts::build_vocab(token2count, max_size)
    }
}
