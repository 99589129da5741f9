use sswe_trainer::checkpoint::CheckpointManager;
use sswe_trainer::pipeline::VOCABULARY_FILE;
use sswe_trainer::{Embedding, Params, Pipeline, SsweError, Vocabulary};

use std::fs;
use std::path::Path;

const TWEETS: &str = "\
4,1,Mon Apr 06,NO_QUERY,alice,\"what a great great day , love it\"
0,2,Mon Apr 06,NO_QUERY,bob,\"this is awful , i hate rainy days\"
4,3,Mon Apr 06,NO_QUERY,carol,\"love the sun , great mood today\"
0,4,Mon Apr 06,NO_QUERY,dave,\"awful traffic again , hate it so much\"
2,5,Mon Apr 06,NO_QUERY,erin,\"ok\"
";

fn write_input(dir: &Path) -> std::path::PathBuf {
    let path = dir.join("tweets.csv");
    fs::write(&path, TWEETS).unwrap();
    path
}

fn params(dir: &Path) -> Params {
    let mut params = Params::new(write_input(dir), dir.join("model"));
    params.export_path = Some(dir.join("export").join("embedding.csv"));
    params.train.batch_size = 4;
    params.train.epochs = Some(3);
    params.train.embedding_dim = 6;
    params.train.hidden_units = 5;
    params.train.checkpoint_every_steps = 2;
    params.train.keep_checkpoints = 2;
    params.train.seed = Some(17);
    params.num_threads = 2;
    params
}

#[test]
fn trains_and_exports_from_built_vocabulary() {

    let dir = tempfile::tempdir().unwrap();
    let params = params(dir.path());
    let output = Pipeline::run(&params).unwrap();

    assert!(output.summary.steps > 0);
    let exported = Embedding::load(output.exported.as_ref().unwrap()).unwrap();
    let saved_vocab = Vocabulary::load(&params.model_dir.join(VOCABULARY_FILE)).unwrap();

    assert_eq!(exported.vocabulary, saved_vocab);
    assert_eq!(exported.vocabulary.tokens()[0], "<unk>");
    assert_eq!(exported.matrix.dim(), (output.vocab_size, 6));

    // retention keeps at most two checkpoints, the newest one is what got exported
    let manager = CheckpointManager::new(&params.model_dir, 2);
    assert!(manager.list().unwrap().len() <= 2);
    assert_eq!(manager.latest_embeddings().unwrap(), exported.matrix);
}

#[test]
fn second_run_resumes_from_checkpoint() {

    let dir = tempfile::tempdir().unwrap();
    let params = params(dir.path());
    let first = Pipeline::run(&params).unwrap();
    let second = Pipeline::run(&params).unwrap();

    let manager = CheckpointManager::new(&params.model_dir, 2);
    let (last_step, _) = manager.list().unwrap().pop().unwrap();
    assert_eq!(last_step, first.summary.steps + second.summary.steps);
}

#[test]
fn vocabulary_file_and_initial_embeddings() {

    let dir = tempfile::tempdir().unwrap();

    let mut with_vocab = params(dir.path());
    let vocab_path = dir.path().join("vocab.txt");
    fs::write(&vocab_path, "great\nlove\nawful\nhate\n,\n").unwrap();
    with_vocab.vocabulary = Some(vocab_path);
    with_vocab.model_dir = dir.path().join("model_vocab");
    let output = Pipeline::run(&with_vocab).unwrap();

    let exported = Embedding::load(output.exported.as_ref().unwrap()).unwrap();
    assert_eq!(exported.vocabulary.tokens(), &["great", "love", "awful", "hate", ",", "<unk>"]);

    // the exported embedding seeds the next run, its width wins over embedding_dim
    let mut with_initial = params(dir.path());
    with_initial.initial_embeddings = output.exported.clone();
    with_initial.model_dir = dir.path().join("model_initial");
    with_initial.export_path = Some(dir.path().join("export2.csv"));
    with_initial.train.embedding_dim = 50;
    let output = Pipeline::run(&with_initial).unwrap();

    let exported = Embedding::load(output.exported.as_ref().unwrap()).unwrap();
    assert_eq!(exported.dim(), 6);
    assert_eq!(exported.vocabulary.len(), 6);
}

#[test]
fn conflicting_sources_fail_before_any_work() {

    let dir = tempfile::tempdir().unwrap();
    let mut params = params(dir.path());
    params.vocabulary = Some(dir.path().join("vocab.txt"));
    params.initial_embeddings = Some(dir.path().join("embedding.csv"));

    assert!(matches!(Pipeline::run(&params), Err(SsweError::Config(_))));
    assert!(!params.model_dir.exists());
}

#[test]
fn single_entry_vocabulary_is_fatal() {

    let dir = tempfile::tempdir().unwrap();
    let mut params = params(dir.path());
    let vocab_path = dir.path().join("vocab.txt");
    fs::write(&vocab_path, "").unwrap();
    params.vocabulary = Some(vocab_path);

    assert!(matches!(Pipeline::run(&params), Err(SsweError::VocabularyTooSmall(1))));
}

#[test]
fn export_without_checkpoint_is_fatal() {

    let dir = tempfile::tempdir().unwrap();
    let mut params = params(dir.path());
    // every tweet is too short for a trigram, so no step runs
    let short = dir.path().join("short.csv");
    fs::write(&short, "4,1,d,q,u,great day\n0,2,d,q,u,awful\n").unwrap();
    params.input_file = short;

    assert!(matches!(Pipeline::run(&params), Err(SsweError::NoCheckpoint(_))));
}

#[test]
fn malformed_sentiment_aborts() {

    let dir = tempfile::tempdir().unwrap();
    let mut params = params(dir.path());
    let broken = dir.path().join("broken.csv");
    fs::write(&broken, "4,1,d,q,u,great great day\npositive,2,d,q,u,awful awful day\n").unwrap();
    params.input_file = broken;

    assert!(matches!(Pipeline::run(&params), Err(SsweError::SentimentParse { .. })));
}

#[test]
fn resume_with_reordered_vocabulary_is_fatal() {

    let dir = tempfile::tempdir().unwrap();
    let vocab_path = dir.path().join("vocab.txt");

    let mut params = params(dir.path());
    fs::write(&vocab_path, "great\nlove\nawful\nhate\n").unwrap();
    params.vocabulary = Some(vocab_path.clone());
    Pipeline::run(&params).unwrap();

    // same size, different id order
    fs::write(&vocab_path, "hate\nawful\nlove\ngreat\n").unwrap();
    assert!(matches!(Pipeline::run(&params), Err(SsweError::Config(_))));

    let saved = Vocabulary::load(&params.model_dir.join(VOCABULARY_FILE)).unwrap();
    assert_eq!(saved.tokens(), &["great", "love", "awful", "hate", "<unk>"]);
}

#[test]
fn gzipped_input_trains() {

    use flate2::{write::GzEncoder, Compression};
    use std::io::Write;

    let dir = tempfile::tempdir().unwrap();
    let gz_path = dir.path().join("tweets.csv.gz");
    let mut enc = GzEncoder::new(fs::File::create(&gz_path).unwrap(), Compression::default());
    enc.write_all(TWEETS.as_bytes()).unwrap();
    enc.finish().unwrap();

    let mut params = params(dir.path());
    params.input_file = gz_path;
    let output = Pipeline::run(&params).unwrap();

    assert!(output.summary.steps > 0);
    let saved_vocab = Vocabulary::load(&params.model_dir.join(VOCABULARY_FILE)).unwrap();
    assert!(saved_vocab.get("great").is_some());
}
