use crate::error::{Result, SearchError};
use lazy_static::lazy_static;
use regex::Regex;
use rust_stemmers::{Algorithm, Stemmer};
use std::collections::HashSet;
use std::fs;
use std::path::Path;
use unicode_normalization::UnicodeNormalization;

lazy_static! {
    static ref PUNCT: Regex = Regex::new(r"[\p{P}\p{S}]").expect("valid regex");
    static ref STEMMER: Stemmer = Stemmer::create(Algorithm::English);
    static ref DEFAULT_STOPWORDS: Vec<&'static str> = vec![
        "a","about","above","after","again","against","all","am","an","and","any","are","aren't","as","at",
        "be","because","been","before","being","below","between","both","but","by",
        "can","can't","cannot","could","couldn't",
        "did","didn't","do","does","doesn't","doing","don't","down","during",
        "each","few","for","from","further",
        "had","hadn't","has","hasn't","have","haven't","having","he","he'd","he'll","he's","her","here","here's","hers","herself","him","himself","his","how","how's",
        "i","i'd","i'll","i'm","i've","if","in","into","is","isn't","it","it's","its","itself",
        "let's","me","more","most","mustn't","my","myself",
        "no","nor","not","of","off","on","once","only","or","other","ought","our","ours","ourselves","out","over","own",
        "same","she","she'd","she'll","she's","should","shouldn't","so","some","such",
        "than","that","that's","the","their","theirs","them","themselves","then","there","there's","these","they","they'd","they'll","they're","they've","this","those","through","to","too",
        "under","until","up","very",
        "was","wasn't","we","we'd","we'll","we're","we've","were","weren't","what","what's","when","when's","where","where's","which","while","who","who's","whom","why","why's","with","won't","would","wouldn't",
        "you","you'd","you'll","you're","you've","your","yours","yourself","yourselves"
    ];
    static ref DEFAULT: Tokenizer = Tokenizer::new(DEFAULT_STOPWORDS.iter().copied());
}

/// Lowercases, strips punctuation, drops stop words and stems.
///
/// Stop words are matched exactly as listed against the lowercased, stripped
/// words, so an entry like `don't` never matches the indexed form `dont`.
#[derive(Debug, Clone, PartialEq)]
pub struct Tokenizer {
    stopwords: HashSet<String>,
}

impl Default for Tokenizer {
    fn default() -> Self {
        DEFAULT.clone()
    }
}

impl Tokenizer {
    pub fn new<I, S>(stopwords: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let stopwords = stopwords.into_iter().map(|w| w.as_ref().trim().to_string()).collect();
        Self { stopwords }
    }

    /// Read a stop word list with one word per line.
    pub fn from_stopword_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let text = fs::read_to_string(path)?;
        Ok(Self::new(text.lines().map(str::trim).filter(|l| !l.is_empty())))
    }

    fn is_stopword(&self, word: &str) -> bool {
        self.stopwords.contains(word)
    }

    /// Tokens in left-to-right order of the input.
    pub fn tokenize(&self, text: &str) -> Vec<String> {
        normalize(text)
            .split_whitespace()
            .filter(|w| !self.is_stopword(w))
            .map(|w| STEMMER.stem(w).into_owned())
            .collect()
    }

    /// The single token a term-level lookup operates on.
    pub fn single_token(&self, term: &str) -> Result<String> {
        let mut tokens = self.tokenize(term);
        if tokens.len() != 1 {
            return Err(SearchError::InvalidTerm { term: term.to_string(), tokens: tokens.len() });
        }
        Ok(tokens.remove(0))
    }
}

fn normalize(text: &str) -> String {
    let lowered = text.nfkc().collect::<String>().to_lowercase();
    PUNCT.replace_all(&lowered, "").into_owned()
}

/// Tokenize with the built-in English stop word list.
pub fn tokenize(text: &str) -> Vec<String> {
    DEFAULT.tokenize(text)
}
