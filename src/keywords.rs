//! Statistical keyphrase candidates: RAKE blended with TF-IDF.
//!
//! Candidates are hints for the concept extractor, not final output, so
//! the goal is broad recall with stable scores rather than precision.

use keyword_extraction::rake::{Rake, RakeParams};
use keyword_extraction::tf_idf::{TfIdf, TfIdfParams, TextSplit};
use rust_stemmers::{Algorithm, Stemmer};
use std::collections::HashMap;
use stop_words::{get, LANGUAGE};

/// RAKE weight in the combined score; TF-IDF gets the remainder.
const RAKE_WEIGHT: f32 = 0.6;
const TFIDF_WEIGHT: f32 = 0.4;

/// Texts shorter than this carry too little signal to rank phrases.
const MIN_TEXT_LEN: usize = 50;

/// A ranked keyphrase candidate with a combined score in [0, 1].
#[derive(Debug, Clone)]
pub struct CandidateKeyword {
    /// Surface form of the phrase, lowercased.
    pub phrase: String,
    /// Combined RAKE/TF-IDF score, normalized to [0, 1].
    pub score: f32,
}

/// Extracts ranked candidate keyphrases from a full document.
pub struct KeywordExtractor {
    stop_words: Vec<String>,
    stemmer: Stemmer,
}

impl KeywordExtractor {
    /// Builds an extractor with the English stop-word list and stemmer.
    pub fn new() -> Self {
        Self {
            stop_words: get(LANGUAGE::English),
            stemmer: Stemmer::create(Algorithm::English),
        }
    }

    /// Top candidates by combined score, deterministic for a given input.
    pub fn extract(&self, text: &str, max_candidates: usize) -> Vec<CandidateKeyword> {
        if text.len() < MIN_TEXT_LEN {
            return Vec::new();
        }

        let rake_scores = self.rake_scores(text, max_candidates * 2);
        let tfidf_scores = self.tfidf_scores(text, max_candidates * 2);

        // Weighted combination over the union of both vocabularies; a
        // phrase missing from one method contributes zero on that side.
        let mut combined: HashMap<String, f32> = HashMap::new();
        for (phrase, score) in &rake_scores {
            let entry = combined.entry(phrase.clone()).or_insert(0.0);
            *entry += RAKE_WEIGHT * score;
        }
        for (phrase, score) in &tfidf_scores {
            let entry = combined.entry(phrase.clone()).or_insert(0.0);
            *entry += TFIDF_WEIGHT * score;
        }

        let filtered = combined.into_iter().filter(|(phrase, _)| {
            phrase.split_whitespace().count() <= 3 && phrase.len() >= 2
        });

        // Collapse morphological variants: group by stemmed form, keep the
        // best-scoring surface form, boost phrases confirmed by variants.
        let mut stem_groups: HashMap<String, (String, f32, usize)> = HashMap::new();
        for (phrase, score) in filtered {
            let stem_key = self.stem_phrase(&phrase);
            stem_groups
                .entry(stem_key)
                .and_modify(|(best_phrase, best_score, count)| {
                    *count += 1;
                    if score > *best_score || (score == *best_score && phrase < *best_phrase) {
                        *best_phrase = phrase.clone();
                        *best_score = score;
                    }
                })
                .or_insert((phrase, score, 1));
        }

        let mut candidates: Vec<CandidateKeyword> = stem_groups
            .into_values()
            .map(|(phrase, score, count)| {
                let boosted = if count > 1 { (score + 0.1).min(1.0) } else { score };
                CandidateKeyword { phrase, score: boosted }
            })
            .collect();

        candidates.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.phrase.cmp(&b.phrase))
        });
        candidates.truncate(max_candidates);
        candidates
    }

    /// RAKE phrase and keyword scores, normalized by the shared maximum.
    fn rake_scores(&self, text: &str, limit: usize) -> Vec<(String, f32)> {
        let rake = Rake::new(RakeParams::WithDefaultsAndPhraseLength(
            text,
            &self.stop_words,
            Some(3),
        ));
        let phrases = rake.get_ranked_phrases_scores(limit);
        let keywords = rake.get_ranked_keyword_scores(limit);

        let rake_max = phrases
            .iter()
            .map(|(_, s)| *s)
            .chain(keywords.iter().map(|(_, s)| *s))
            .fold(0.0_f32, f32::max);
        if rake_max <= 0.0 {
            return Vec::new();
        }

        let mut scored: HashMap<String, f32> = HashMap::new();
        for (phrase, score) in phrases.iter().chain(keywords.iter()) {
            let key = phrase.to_lowercase();
            let normalized = score / rake_max;
            scored
                .entry(key)
                .and_modify(|s| *s = s.max(normalized))
                .or_insert(normalized);
        }
        scored.into_iter().collect()
    }

    /// TF-IDF unigram scores plus repeated bigrams, normalized by the
    /// unigram maximum. Each sentence counts as one document for IDF.
    fn tfidf_scores(&self, text: &str, limit: usize) -> Vec<(String, f32)> {
        let tfidf = TfIdf::new(TfIdfParams::TextBlock(
            text,
            &self.stop_words,
            None,
            TextSplit::Sentences,
        ));
        let words = tfidf.get_ranked_word_scores(limit);

        let tfidf_max = words.iter().map(|(_, s)| *s).fold(0.0_f32, f32::max);
        if tfidf_max <= 0.0 {
            return Vec::new();
        }

        let mut scored: HashMap<String, f32> = HashMap::new();
        for (word, score) in &words {
            let key = word.to_lowercase();
            let normalized = score / tfidf_max;
            scored
                .entry(key)
                .and_modify(|s| *s = s.max(normalized))
                .or_insert(normalized);
        }
        for (bigram, normalized) in self.bigram_scores(text, &tfidf, tfidf_max) {
            scored
                .entry(bigram)
                .and_modify(|s| *s = s.max(normalized))
                .or_insert(normalized);
        }
        scored.into_iter().collect()
    }

    /// Slides a two-word window over the content words and scores each
    /// bigram seen at least twice by the geometric mean of its parts.
    fn bigram_scores(&self, text: &str, tfidf: &TfIdf, tfidf_max: f32) -> Vec<(String, f32)> {
        let content_words: Vec<String> = text
            .split_whitespace()
            .map(|w| w.trim_matches(|c: char| !c.is_alphanumeric()).to_lowercase())
            .filter(|w| w.len() >= 2 && !self.stop_words.contains(w))
            .collect();

        let mut bigram_counts: HashMap<String, usize> = HashMap::new();
        for window in content_words.windows(2) {
            let key = format!("{} {}", window[0], window[1]);
            *bigram_counts.entry(key).or_insert(0) += 1;
        }

        bigram_counts
            .into_iter()
            .filter(|(_, count)| *count >= 2)
            .filter_map(|(bigram, _)| {
                let mut parts = bigram.split_whitespace();
                let s1 = tfidf.get_score(parts.next()?);
                let s2 = tfidf.get_score(parts.next()?);
                if s1 > 0.0 && s2 > 0.0 {
                    Some((bigram, (s1 * s2).sqrt() / tfidf_max))
                } else {
                    None
                }
            })
            .collect()
    }

    /// Stems each word of a phrase and joins the stems back together.
    fn stem_phrase(&self, phrase: &str) -> String {
        phrase
            .split_whitespace()
            .map(|w| self.stemmer.stem(w).to_string())
            .collect::<Vec<_>>()
            .join(" ")
    }
}

impl Default for KeywordExtractor {
    fn default() -> Self {
        Self::new()
    }
}
