//! Text canonicalization shared by every matching operation.
//!
//! [`normalize`] folds a raw string (NFKD, lowercase, trimmed). [`Normalizer::preprocess`]
//! additionally tokenizes, lemmatizes and drops stop-words, keeping the copular words and
//! articles in [`RETAINED_STOP_WORDS`] because some answers are exactly those words.
//!
//! The English [`Lexicon`] is built once per process and only ever read afterwards.

use once_cell::sync::Lazy;
use std::collections::{HashMap, HashSet};
use unicode_normalization::UnicodeNormalization;

/// Stop-words that survive preprocessing.
pub const RETAINED_STOP_WORDS: [&str; 9] = ["is", "am", "are", "be", "was", "were", "a", "an", "the"];

static ENGLISH: Lazy<Lexicon> = Lazy::new(Lexicon::english);

const STOP_WORDS: &[&str] = &[
    "about", "above", "across", "after", "afterwards", "again", "against", "all", "almost",
    "alone", "along", "already", "also", "although", "always", "am", "among", "amongst", "amount",
    "an", "and", "another", "any", "anyhow", "anyone", "anything", "anyway", "anywhere", "are",
    "around", "as", "at", "a", "be", "became", "because", "become", "becomes", "becoming", "been",
    "before", "beforehand", "behind", "being", "below", "beside", "besides", "between", "beyond",
    "both", "but", "by", "can", "cannot", "could", "did", "do", "does", "doing", "done", "down",
    "due", "during", "each", "either", "else", "elsewhere", "enough", "even", "ever", "every",
    "everyone", "everything", "everywhere", "except", "few", "first", "for", "former", "formerly",
    "from", "further", "get", "give", "go", "had", "has", "have", "he", "hence", "her", "here",
    "hereafter", "hereby", "herein", "hereupon", "hers", "herself", "him", "himself", "his",
    "how", "however", "i", "if", "in", "indeed", "into", "is", "it", "its", "itself", "just",
    "last", "latter", "latterly", "least", "less", "made", "make", "many", "may", "me",
    "meanwhile", "might", "mine", "more", "moreover", "most", "mostly", "much", "must", "my",
    "myself", "namely", "neither", "never", "nevertheless", "next", "no", "nobody", "none",
    "noone", "nor", "not", "nothing", "now", "nowhere", "of", "off", "often", "on", "once",
    "only", "onto", "or", "other", "others", "otherwise", "our", "ours", "ourselves", "out",
    "over", "own", "per", "perhaps", "please", "put", "quite", "rather", "re", "really",
    "regarding", "same", "say", "see", "seem", "seemed", "seeming", "seems", "several", "she",
    "should", "since", "so", "some", "somehow", "someone", "something", "sometime", "sometimes",
    "somewhere", "still", "such", "take", "than", "that", "the", "their", "them", "themselves",
    "then", "thence", "there", "thereafter", "thereby", "therefore", "therein", "thereupon",
    "these", "they", "this", "those", "though", "through", "throughout", "thru", "thus", "to",
    "together", "too", "toward", "towards", "under", "unless", "until", "up", "upon", "us",
    "used", "using", "various", "very", "via", "was", "we", "well", "were", "what", "whatever",
    "when", "whence", "whenever", "where", "whereafter", "whereas", "whereby", "wherein",
    "whereupon", "wherever", "whether", "which", "while", "whither", "who", "whoever", "whole",
    "whom", "whose", "why", "will", "with", "within", "without", "would", "yet", "you", "your",
    "yours", "yourself", "yourselves",
    // clitics left over after splitting contractions
    "s", "t", "m", "d", "ll", "ve", "don", "doesn", "didn", "isn", "aren", "wasn", "weren",
    "won", "wouldn", "couldn", "shouldn", "haven", "hasn", "hadn", "ain",
];

const IRREGULAR_LEMMAS: &[(&str, &str)] = &[
    // contraction pieces: it's, i'm, they're
    ("s", "be"), ("m", "be"), ("re", "be"),
    ("is", "be"), ("am", "be"), ("are", "be"), ("was", "be"), ("were", "be"), ("been", "be"),
    ("being", "be"), ("has", "have"), ("had", "have"), ("having", "have"), ("does", "do"),
    ("did", "do"), ("done", "do"), ("doing", "do"), ("goes", "go"), ("went", "go"),
    ("gone", "go"), ("children", "child"), ("men", "man"), ("women", "woman"),
    ("people", "person"), ("feet", "foot"), ("teeth", "tooth"), ("mice", "mouse"),
    ("geese", "goose"), ("leaves", "leaf"), ("knives", "knife"), ("wolves", "wolf"),
    ("lives", "life"), ("wives", "wife"), ("halves", "half"), ("shelves", "shelf"),
    ("thieves", "thief"), ("made", "make"), ("making", "make"), ("took", "take"),
    ("taken", "take"), ("gave", "give"), ("given", "give"), ("grew", "grow"), ("grown", "grow"),
    ("knew", "know"), ("known", "know"), ("saw", "see"), ("seen", "see"), ("spoke", "speak"),
    ("spoken", "speak"), ("wrote", "write"), ("written", "write"), ("ran", "run"),
    ("came", "come"), ("began", "begin"), ("begun", "begin"), ("broke", "break"),
    ("broken", "break"), ("fell", "fall"), ("fallen", "fall"), ("found", "find"),
    ("thought", "think"), ("told", "tell"), ("said", "say"), ("stood", "stand"),
    ("kept", "keep"), ("lost", "lose"), ("heard", "hear"), ("held", "hold"),
    ("brought", "bring"), ("bought", "buy"), ("caught", "catch"), ("taught", "teach"),
    ("sought", "seek"), ("built", "build"), ("sent", "send"), ("spent", "spend"),
    ("felt", "feel"), ("met", "meet"), ("sat", "sit"), ("slept", "sleep"), ("hid", "hide"),
    ("hidden", "hide"), ("flew", "fly"), ("flown", "fly"), ("drew", "draw"), ("drawn", "draw"),
    ("threw", "throw"), ("thrown", "throw"), ("wore", "wear"), ("worn", "wear"),
    ("froze", "freeze"), ("frozen", "freeze"), ("burnt", "burn"), ("lying", "lie"),
    ("dying", "die"), ("tying", "tie"),
];

/// Read-only English word data used by [`Normalizer`].
#[derive(Debug)]
pub struct Lexicon {
    stop_words: HashSet<&'static str>,
    irregular: HashMap<&'static str, &'static str>,
}

impl Lexicon {
    pub fn english() -> Self {
        Self {
            stop_words: STOP_WORDS.iter().copied().collect(),
            irregular: IRREGULAR_LEMMAS.iter().copied().collect(),
        }
    }

    pub fn is_stop_word(&self, word: &str) -> bool {
        self.stop_words.contains(word)
    }

    /// Returns the dictionary form of a lowercase token.
    pub fn lemma(&self, token: &str) -> String {
        if let Some(lemma) = self.irregular.get(token) {
            return (*lemma).to_string();
        }
        if token.chars().count() <= 3 || token.chars().any(|c| c.is_numeric()) {
            return token.to_string();
        }
        let singular = strip_plural(token);
        if let Some(lemma) = self.irregular.get(singular.as_str()) {
            return (*lemma).to_string();
        }
        strip_verb_suffix(&singular)
    }
}

fn strip_plural(token: &str) -> String {
    let len = token.len();
    if token.ends_with("ies") && len > 4 {
        return format!("{}y", &token[..len - 3]);
    }
    if token.ends_with("sses") {
        return token[..len - 2].to_string();
    }
    if len > 4 && ["ches", "shes", "xes", "zes"].iter().any(|s| token.ends_with(s)) {
        return token[..len - 2].to_string();
    }
    if token.ends_with('s') && !["ss", "us", "is", "os"].iter().any(|s| token.ends_with(s)) {
        return token[..len - 1].to_string();
    }
    token.to_string()
}

fn strip_verb_suffix(token: &str) -> String {
    let len = token.len();
    if token.ends_with("ied") && len > 4 {
        return format!("{}y", &token[..len - 3]);
    }
    if let Some(stem) = token.strip_suffix("ing") {
        if is_verb_stem(stem) {
            return undouble(stem);
        }
    }
    if let Some(stem) = token.strip_suffix("ed") {
        if is_verb_stem(stem) && !stem.ends_with('e') {
            return undouble(stem);
        }
    }
    token.to_string()
}

fn is_verb_stem(stem: &str) -> bool {
    stem.chars().count() >= 3 && stem.chars().any(|c| "aeiouy".contains(c))
}

// "stopp" -> "stop", but "fall" and "kiss" keep their doubled consonant.
fn undouble(stem: &str) -> String {
    let mut chars = stem.chars().rev();
    match (chars.next(), chars.next()) {
        (Some(last), Some(prev)) if last == prev && !"aeioulsz".contains(last) => {
            stem[..stem.len() - last.len_utf8()].to_string()
        }
        _ => stem.to_string(),
    }
}

/// NFKD-folds, lowercases and trims `text`.
pub fn normalize(text: &str) -> String {
    text.to_lowercase().nfkd().collect::<String>().trim().to_string()
}

/// Splits already-normalized text into word tokens. Punctuation is dropped and
/// contractions are split at the apostrophe.
pub fn tokenize(normalized: &str) -> Vec<String> {
    normalized
        .split(|c: char| !(c.is_alphanumeric() || c == '\'' || c == '\u{2019}'))
        .flat_map(|chunk| chunk.split(['\'', '\u{2019}']))
        .filter(|token| !token.is_empty())
        .map(str::to_string)
        .collect()
}

/// Applies [`normalize`] and lemma-based preprocessing against an injected [`Lexicon`].
#[derive(Debug, Clone, Copy)]
pub struct Normalizer {
    lexicon: &'static Lexicon,
}

impl Default for Normalizer {
    fn default() -> Self {
        Self::english()
    }
}

impl Normalizer {
    pub fn new(lexicon: &'static Lexicon) -> Self {
        Self { lexicon }
    }

    /// Normalizer backed by the process-wide English lexicon.
    pub fn english() -> Self {
        Self::new(&ENGLISH)
    }

    pub fn lexicon(&self) -> &'static Lexicon {
        self.lexicon
    }

    pub fn normalize(&self, text: &str) -> String {
        normalize(text)
    }

    pub fn normalize_opt(&self, text: Option<&str>) -> Option<String> {
        text.map(normalize)
    }

    /// Lemmatized, stop-word filtered form of `text`, joined by single spaces.
    pub fn preprocess(&self, text: &str) -> String {
        if text.is_empty() {
            return String::new();
        }
        let normalized = normalize(text);
        let mut lemmas = Vec::new();
        for token in tokenize(&normalized) {
            let lemma = self.lexicon.lemma(&token);
            let retained = RETAINED_STOP_WORDS.contains(&token.as_str())
                || RETAINED_STOP_WORDS.contains(&lemma.as_str());
            if retained || !self.lexicon.is_stop_word(&token) {
                lemmas.push(lemma);
            }
        }
        lemmas.join(" ")
    }

    /// [`Self::preprocess`], falling back to [`normalize`] when nothing survives
    /// preprocessing (answers made only of stop-words such as "nothing").
    pub fn answer_form(&self, text: &str) -> String {
        let processed = self.preprocess(text);
        if processed.is_empty() {
            normalize(text)
        } else {
            processed
        }
    }
}
