use regex::Regex;

pub const URL_TOKEN: &str = "<url>";
pub const USER_TOKEN: &str = "<user>";
pub const NUMBER_TOKEN: &str = "<number>";

// defines the behavior needed for tokenizing a tweet
pub trait Tokenizer: Send + Sync {
    fn tokenize(&self, text: &str) -> Vec<String>;
}

/// Normalizing tweet tokenizer.
///
/// Text is lower-cased, URLs, @mentions and numbers are replaced by
/// placeholder tokens, letters repeated more than twice are squeezed to two
/// ("sooooo" -> "soo") and punctuation is split off as separate tokens.
/// Hashtags and simple emoticons survive as single tokens.
pub struct TweetTokenizer {
    pattern: Regex,
}

impl TweetTokenizer {

    pub fn new() -> Self {
        let pattern = Regex::new(concat!(
            r"(?P<url>(?:https?://|www\.)\S+)",
            r"|(?P<user>@\w+)",
            r"|(?P<hashtag>#\w+)",
            r"|(?P<emoticon>[:;=]-?[()\[\]dpo/\\|*]+)",
            r"|(?P<number>[+-]?\d+(?:[.,:]\d+)*)",
            r"|(?P<word>\w+(?:['’]\w+)*)",
            r"|(?P<punct>[^\w\s])",
        )).expect("tokenizer pattern is valid");

        Self { pattern }
    }
}

impl Default for TweetTokenizer {
    fn default() -> Self {
        Self::new()
    }
}

impl Tokenizer for TweetTokenizer {

    fn tokenize(&self, text: &str) -> Vec<String> {

        let text = squeeze_repeats(&text.trim().to_lowercase());
        self.pattern.captures_iter(&text).map(|caps| {
            if caps.name("url").is_some() {
                URL_TOKEN.to_string()
            } else if caps.name("user").is_some() {
                USER_TOKEN.to_string()
            } else if caps.name("number").is_some() {
                NUMBER_TOKEN.to_string()
            } else {
                caps[0].to_string()
            }
        }).collect()
    }
}

/// Whitespace tokenizer, for pre-tokenized corpora.
pub struct WhitespaceTokenizer;

impl Tokenizer for WhitespaceTokenizer {
    fn tokenize(&self, text: &str) -> Vec<String> {
        text.split_whitespace().map(|x| x.to_string()).collect()
    }
}

fn squeeze_repeats(text: &str) -> String {

    let mut out = String::with_capacity(text.len());
    let mut previous: Option<char> = None;
    let mut run = 0;
    for c in text.chars() {
        if Some(c) == previous {
            run += 1;
        } else {
            previous = Some(c);
            run = 1;
        }
        if run <= 2 || !c.is_alphabetic() {
            out.push(c);
        }
    }
    out
}

/// Joins consecutive non-overlapping groups of `ngram` tokens with '_'.
/// A trailing group shorter than `ngram` is dropped.
pub fn join_ngrams(tokens: &[String], ngram: usize) -> Vec<String> {
    if ngram <= 1 {
        return tokens.to_vec();
    }
    tokens.chunks_exact(ngram).map(|chunk| chunk.join("_")).collect()
}
