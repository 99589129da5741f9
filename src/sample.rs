
use crate::config::{files_handling, Params};
use crate::error::{Result, SsweError};
use crate::tokenize::{join_ngrams, Tokenizer};
use crate::vocab::Vocabulary;

use rand::Rng;
use std::io::Read;
use std::path::Path;
use std::sync::Arc;
use std::vec;

/// Three vocabulary ids, the middle one is the corruption target.
pub type Trigram = [usize; 3];

/// Positive raw sentiments map to +1, everything else (zero included) to -1.
pub fn polarity(raw: i64) -> i8 {
    if raw > 0 { 1 } else { -1 }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Record {
    pub label: i8,
    pub tokens: Vec<String>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Sample {
    pub original: Trigram,
    pub corrupted: Trigram,
    pub label: i8,
}

/// Replaces the center id of a trigram by a different, uniformly drawn id.
#[derive(Clone, Copy, Debug)]
pub struct NegativeSampler {
    vocab_size: usize,
}

impl NegativeSampler {

    pub fn new(vocab_size: usize) -> Result<Self> {
        // with a single id there is nothing to draw that differs from the center
        if vocab_size < 2 {
            return Err(SsweError::VocabularyTooSmall(vocab_size));
        }
        Ok(Self { vocab_size })
    }

    pub fn corrupt<R: Rng + ?Sized>(&self, original: &Trigram, rng: &mut R) -> Trigram {
        let mut random_word = rng.gen_range(0..self.vocab_size);
        while random_word == original[1] {
            random_word = rng.gen_range(0..self.vocab_size);
        }
        [original[0], random_word, original[2]]
    }
}

/// Groups units into consecutive non-overlapping trigrams of ids, the
/// incomplete tail is dropped.
pub fn trigrams(units: &[String], vocab: &Vocabulary) -> Vec<Trigram> {
    vocab.lookup_ids(units)
    .chunks_exact(3)
    .map(|ids| [ids[0], ids[1], ids[2]])
    .collect()
}


/// Column layout of the input csv.
#[derive(Clone, Debug, PartialEq)]
pub struct RecordFormat {
    pub delimiter: u8,
    pub columns: Option<Vec<String>>,
}

impl RecordFormat {
    pub fn from_params(params: &Params) -> Self {
        Self { delimiter: params.csv_delimiter, columns: params.csv_columns.clone() }
    }
}

/// Reads `sentiment` and `text` out of each csv row and tokenizes the text.
/// Holds the file cursor, so one reader serves exactly one pass.
pub struct RecordReader {
    rdr: csv::Reader<Box<dyn Read + Send>>,
    tokenizer: Arc<dyn Tokenizer>,
    sentiment_col: usize,
    text_col: usize,
    row: csv::StringRecord,
    n_read: u64,
}

impl RecordReader {

    pub fn open(file_path: &Path, format: &RecordFormat, tokenizer: Arc<dyn Tokenizer>) -> Result<Self> {
        RecordReader::from_reader(files_handling::open_input(file_path)?, format, tokenizer)
    }

    pub fn from_reader(input: Box<dyn Read + Send>, format: &RecordFormat, tokenizer: Arc<dyn Tokenizer>) -> Result<Self> {

        let mut rdr = csv::ReaderBuilder::new()
        .delimiter(format.delimiter)
        .has_headers(false)
        .flexible(true)
        .from_reader(input);

        // without configured columns the first row names them
        let mut n_read = 0;
        let columns: Vec<String> = match &format.columns {
            Some(columns) => columns.clone(),
            None => {
                let mut header = csv::StringRecord::new();
                if !rdr.read_record(&mut header)? {
                    return Err(SsweError::Config("input holds no header row".into()));
                }
                n_read += 1;
                header.iter().map(|c| c.trim().to_owned()).collect()
            }
        };

        let position = |name: &str| {
            columns.iter().position(|c| c == name)
            .ok_or_else(|| SsweError::Config(format!("columns {:?} lack '{}'", columns, name)))
        };
        let sentiment_col = position("sentiment")?;
        let text_col = position("text")?;

        Ok(Self { rdr, tokenizer, sentiment_col, text_col, row: csv::StringRecord::new(), n_read })
    }

    pub fn next_record(&mut self) -> Result<Option<Record>> {

        if !self.rdr.read_record(&mut self.row)? {
            return Ok(None);
        }
        self.n_read += 1;

        let field = |col: usize, name: &str| {
            self.row.get(col).ok_or_else(|| SsweError::MissingColumn { record: self.n_read, column: name.to_string() })
        };

        let raw = field(self.sentiment_col, "sentiment")?;
        let sentiment = raw.trim().parse::<i64>().map_err(|_| {
            SsweError::SentimentParse { record: self.n_read, value: raw.to_string() }
        })?;
        let tokens = self.tokenizer.tokenize(field(self.text_col, "text")?);

        Ok(Some(Record { label: polarity(sentiment), tokens }))
    }
}

impl Iterator for RecordReader {
    type Item = Result<Record>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_record().transpose()
    }
}


/// Lazily turns records into samples: non-overlapping trigrams of
/// (n-gram joined) units, each paired with a corrupted copy and the record label.
///
/// A record that fails to parse ends the pass with that error.
pub struct TrigramGenerator<R: Rng> {
    records: RecordReader,
    vocab: Arc<Vocabulary>,
    sampler: NegativeSampler,
    ngram: usize,
    rng: R,
    chunks: vec::IntoIter<Trigram>,
    label: i8,
    failed: bool,
}

impl<R: Rng> TrigramGenerator<R> {

    pub fn new(records: RecordReader, vocab: Arc<Vocabulary>, ngram: usize, rng: R) -> Result<Self> {
        let sampler = NegativeSampler::new(vocab.len())?;
        Ok(Self {
            records,
            vocab,
            sampler,
            ngram: ngram.max(1),
            rng,
            chunks: Vec::new().into_iter(),
            label: -1,
            failed: false,
        })
    }
}

impl<R: Rng> Iterator for TrigramGenerator<R> {
    type Item = Result<Sample>;

    fn next(&mut self) -> Option<Self::Item> {

        if self.failed {
            return None;
        }

        loop {
            if let Some(original) = self.chunks.next() {
                let corrupted = self.sampler.corrupt(&original, &mut self.rng);
                return Some(Ok(Sample { original, corrupted, label: self.label }));
            }

            // current record is used up, short records just yield nothing
            match self.records.next_record() {
                Ok(Some(record)) => {
                    let units = join_ngrams(&record.tokens, self.ngram);
                    self.chunks = trigrams(&units, &self.vocab).into_iter();
                    self.label = record.label;
                },
                Ok(None) => return None,
                Err(e) => {
                    self.failed = true;
                    return Some(Err(e));
                }
            }
        }
    }
}
