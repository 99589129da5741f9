
use crate::error::{Result, SsweError};
use serde_json::Value;
use std::{fmt::Display, fs::File, io::BufReader, path::{Path, PathBuf}};

pub const DEFAULT_CSV_COLUMNS: [&str; 6] = ["sentiment", "id", "date", "status", "user", "text"];

#[derive(Clone, Debug, PartialEq)]
pub struct TrainParams {
    pub batch_size: usize,
    pub epochs: Option<usize>,
    pub shuffle: bool,
    pub shuffle_buffer: usize,
    pub alpha: f32,
    pub learning_rate: f32,
    pub hidden_units: usize,
    pub embedding_dim: usize,
    pub keep_checkpoints: usize,
    pub checkpoint_every_steps: usize,
    pub log_every_steps: usize,
    pub seed: Option<u64>,
}

impl Default for TrainParams {
    fn default() -> Self {
        Self {
            batch_size: 32,
            epochs: Some(10),
            shuffle: true,
            shuffle_buffer: 10000,
            alpha: 0.5,
            learning_rate: 0.1,
            hidden_units: 20,
            embedding_dim: 25,
            keep_checkpoints: 5,
            checkpoint_every_steps: 1000,
            log_every_steps: 100,
            seed: None,
        }
    }
}

impl Display for TrainParams {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "training hyper parameters:
        batch_size: {},
        epochs: {:?},
        shuffle: {} (buffer {}),
        alpha: {},
        learning_rate: {},
        hidden_units: {},
        embedding_dim: {},
        keep_checkpoints: {},
        checkpoint_every_steps: {},
        seed: {:?}",
        self.batch_size, self.epochs, self.shuffle, self.shuffle_buffer, self.alpha, self.learning_rate,
        self.hidden_units, self.embedding_dim, self.keep_checkpoints, self.checkpoint_every_steps, self.seed
        )
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Params {
    pub input_file: PathBuf,
    pub vocabulary: Option<PathBuf>,
    pub initial_embeddings: Option<PathBuf>,
    pub model_dir: PathBuf,
    pub export_path: Option<PathBuf>,
    pub ngram: usize,
    pub csv_delimiter: u8,
    // None means the first row of the input holds the column names
    pub csv_columns: Option<Vec<String>>,
    pub max_vocab_size: Option<usize>,
    pub num_threads: usize,
    pub train: TrainParams,
}

impl Params {

    pub fn new(input_file: impl Into<PathBuf>, model_dir: impl Into<PathBuf>) -> Self {
        Self {
            input_file: input_file.into(),
            vocabulary: None,
            initial_embeddings: None,
            model_dir: model_dir.into(),
            export_path: None,
            ngram: 1,
            csv_delimiter: b',',
            csv_columns: Some(DEFAULT_CSV_COLUMNS.iter().map(|c| c.to_string()).collect()),
            max_vocab_size: None,
            num_threads: 4,
            train: TrainParams::default(),
        }
    }

    // every misconfiguration is reported here, before any file is touched
    pub fn validate(&self) -> Result<()> {

        if self.vocabulary.is_some() && self.initial_embeddings.is_some() {
            return Err(SsweError::Config("vocabulary and initial_embeddings are mutually exclusive".into()));
        }

        let train = &self.train;
        if !(0.0..=1.0).contains(&train.alpha) {
            return Err(SsweError::Config(format!("alpha must lie in [0, 1], got {}", train.alpha)));
        }
        if !(train.learning_rate > 0.0) {
            return Err(SsweError::Config(format!("learning_rate must be positive, got {}", train.learning_rate)));
        }
        if train.epochs == Some(0) {
            return Err(SsweError::Config("epochs must be positive or null for unbounded training".into()));
        }

        let positive = [
            ("ngram", self.ngram),
            ("num_threads", self.num_threads),
            ("batch_size", train.batch_size),
            ("shuffle_buffer", train.shuffle_buffer),
            ("hidden_units", train.hidden_units),
            ("embedding_dim", train.embedding_dim),
            ("keep_checkpoints", train.keep_checkpoints),
            ("checkpoint_every_steps", train.checkpoint_every_steps),
            ("log_every_steps", train.log_every_steps),
        ];
        for (name, value) in positive {
            if value == 0 {
                return Err(SsweError::Config(format!("{} must be greater than zero", name)));
            }
        }
        if self.max_vocab_size == Some(0) {
            return Err(SsweError::Config("max_vocab_size must be greater than zero".into()));
        }

        if let Some(columns) = &self.csv_columns {
            for required in ["sentiment", "text"] {
                if !columns.iter().any(|c| c == required) {
                    return Err(SsweError::Config(format!("csv_columns lacks the '{}' column", required)));
                }
            }
        }

        Ok(())
    }
}

impl Display for Params {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "using hyper-params:
        input_file: {}
        vocabulary: {:?}
        initial_embeddings: {:?}
        model_dir: {}
        export_path: {:?}
        ngram: {}
        csv_delimiter: {:?}
        csv_columns: {:?}
        max_vocab_size: {:?}
        Using {}",
        self.input_file.display(), self.vocabulary, self.initial_embeddings, self.model_dir.display(),
        self.export_path, self.ngram, self.csv_delimiter as char, self.csv_columns, self.max_vocab_size, self.train)
    }
}

pub struct Config {
    params: Params
}

impl Config {

    pub fn get_params(&self) -> Params {
        return self.params.clone()
    }

    pub fn new(json_path: &Path) -> Result<Config> {

        // parse input json
        let f = BufReader::new(File::open(json_path)?);
        let json: Value = serde_json::from_reader(f)?;
        Config::from_json(&json)
    }

    pub fn from_json(json: &Value) -> Result<Config> {

        // validate input and output in json
        let input_file = required_str(json, "input_file")?;
        let model_dir = required_str(json, "model_dir")?;
        let mut params = Params::new(input_file, model_dir);

        // handle default vs input parameters
        params.vocabulary = optional_str(json, "vocabulary")?.map(PathBuf::from);
        params.initial_embeddings = optional_str(json, "initial_embeddings")?.map(PathBuf::from);
        params.export_path = optional_str(json, "export_path")?.map(PathBuf::from);
        params.ngram = get_usize(json, "ngram")?.unwrap_or(params.ngram);
        params.max_vocab_size = get_usize(json, "max_vocab_size")?;
        params.num_threads = get_usize(json, "num_threads")?.unwrap_or(params.num_threads);

        if let Some(delimiter) = optional_str(json, "csv_delimiter")? {
            params.csv_delimiter = match delimiter.as_bytes() {
                [byte] => *byte,
                _ => return Err(SsweError::Config(format!("csv_delimiter must be a single byte, got {:?}", delimiter)))
            };
        }

        // an explicit null asks for the header row
        match json.get("csv_columns") {
            Some(Value::Null) => params.csv_columns = None,
            Some(Value::Array(columns)) => {
                let columns = columns.iter().map(|c| {
                    c.as_str().map(str::to_owned).ok_or_else(|| SsweError::Config("csv_columns must hold strings".into()))
                }).collect::<Result<Vec<String>>>()?;
                params.csv_columns = Some(columns);
            },
            Some(_) => return Err(SsweError::Config("csv_columns must be an array or null".into())),
            None => {}
        }

        let train = &mut params.train;
        train.batch_size = get_usize(json, "batch_size")?.unwrap_or(train.batch_size);
        if json.get("epochs").is_some() {
            train.epochs = get_usize(json, "epochs")?;
        }
        train.shuffle = match json.get("shuffle") {
            Some(shuffle) => shuffle.as_bool().ok_or_else(|| SsweError::Config("shuffle must be boolean".into()))?,
            None => train.shuffle
        };
        train.shuffle_buffer = get_usize(json, "shuffle_buffer")?.unwrap_or(train.shuffle_buffer);
        train.alpha = get_f32(json, "alpha")?.unwrap_or(train.alpha);
        train.learning_rate = get_f32(json, "learning_rate")?.unwrap_or(train.learning_rate);
        train.hidden_units = get_usize(json, "hidden_units")?.unwrap_or(train.hidden_units);
        train.embedding_dim = get_usize(json, "embedding_dim")?.unwrap_or(train.embedding_dim);
        train.keep_checkpoints = get_usize(json, "keep_checkpoints")?.unwrap_or(train.keep_checkpoints);
        train.checkpoint_every_steps = get_usize(json, "checkpoint_every_steps")?.unwrap_or(train.checkpoint_every_steps);
        train.log_every_steps = get_usize(json, "log_every_steps")?.unwrap_or(train.log_every_steps);
        train.seed = get_usize(json, "seed")?.map(|s| s as u64);

        Ok (
            Self {
                params: params
            }
        )
    }
}

fn required_str(json: &Value, key: &str) -> Result<String> {
    optional_str(json, key)?.ok_or_else(|| SsweError::Config(format!("{} was not supplied through json", key)))
}

fn optional_str(json: &Value, key: &str) -> Result<Option<String>> {
    match json.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(value) => value.as_str()
            .map(|s| Some(s.to_owned()))
            .ok_or_else(|| SsweError::Config(format!("given {} is not a string", key)))
    }
}

fn get_usize(json: &Value, key: &str) -> Result<Option<usize>> {
    match json.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(value) => value.as_u64()
            .map(|v| Some(v as usize))
            .ok_or_else(|| SsweError::Config(format!("given {} is not a non-negative integer", key)))
    }
}

fn get_f32(json: &Value, key: &str) -> Result<Option<f32>> {
    match json.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(value) => value.as_f64()
            .map(|v| Some(v as f32))
            .ok_or_else(|| SsweError::Config(format!("given {} is not numeric", key)))
    }
}


pub mod files_handling {

    use crate::error::Result;
    use flate2::read::GzDecoder;
    use ndarray::{Array1, Array2};
    use ndarray_npy::{read_npy, write_npy};
    use std::fs::{self, File};
    use std::io::{BufRead, BufReader, Read};
    use std::path::Path;

    pub fn read_input<R: ReadFile>(file_path: &Path) -> Result<R> {
        R::read_file(file_path)
    }

    pub fn save_output<S: SaveFile>(output_dir: &Path, file_name: &str, item: &S) -> Result<()> {

        // create output folder
        fs::create_dir_all(output_dir)?;
        item.save_file(output_dir, file_name)
    }

    // plain or gzip compressed text, chosen by extension
    pub fn open_input(file_path: &Path) -> Result<Box<dyn Read + Send>> {
        let f = BufReader::new(File::open(file_path)?);
        match file_path.extension().and_then(|e| e.to_str()) {
            Some("gz") => Ok(Box::new(GzDecoder::new(f))),
            _ => Ok(Box::new(f))
        }
    }

    pub trait ReadFile: Sized {
        fn read_file(file_path: &Path) -> Result<Self>;
    }

    pub trait SaveFile {
        fn save_file(&self, output_dir: &Path, file_name: &str) -> Result<()>;
    }

    impl ReadFile for Array2<f32> {
        fn read_file(file_path: &Path) -> Result<Self> {
            let item = read_npy(file_path.with_extension("npy"))?;
            Ok(item)
        }
    }

    impl SaveFile for Array2<f32> {
        fn save_file(&self, output_dir: &Path, file_name: &str) -> Result<()> {
            let out = output_dir.join(file_name).with_extension("npy");
            write_npy(out, self)?;
            Ok(())
        }
    }

    impl ReadFile for Array1<f32> {
        fn read_file(file_path: &Path) -> Result<Self> {
            let item = read_npy(file_path.with_extension("npy"))?;
            Ok(item)
        }
    }

    impl SaveFile for Array1<f32> {
        fn save_file(&self, output_dir: &Path, file_name: &str) -> Result<()> {
            let out = output_dir.join(file_name).with_extension("npy");
            write_npy(out, self)?;
            Ok(())
        }
    }

    // one entry per line, trailing empty lines ignored
    impl ReadFile for Vec<String> {
        fn read_file(file_path: &Path) -> Result<Self> {
            let lines = BufReader::new(open_input(file_path)?).lines();
            let mut items = Vec::new();
            for line in lines {
                items.push(line?.trim_end_matches('\r').to_owned());
            }
            while items.last().map_or(false, |l| l.is_empty()) {
                items.pop();
            }
            Ok(items)
        }
    }
}
