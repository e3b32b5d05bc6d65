//! Response quality scoring.
//!
//! A response is scored in `[0, 1]` as a weighted sum of three independent
//! components, each clamped to `[0, weight]`:
//!
//! | component       | weight | measure                                      |
//! |-----------------|--------|----------------------------------------------|
//! | length fit      | 0.3    | `min(actual/expected, expected/actual)` words |
//! | keyword match   | 0.4    | fraction of category keywords present        |
//! | well-formedness | 0.3    | penalties for short, unpunctuated, flat case |

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::suites::BenchmarkCase;

/// A case passes when its total score reaches this value.
pub const PASS_THRESHOLD: f64 = 0.7;

const LENGTH_WEIGHT: f64 = 0.3;
const KEYWORD_WEIGHT: f64 = 0.4;
const FORM_WEIGHT: f64 = 0.3;

/// Relevance credited to categories without a keyword set.
const NEUTRAL_RELEVANCE: f64 = 0.5;

const MIN_RESPONSE_CHARS: usize = 20;
const SHORT_PENALTY: f64 = 0.5;
const NO_PERIOD_PENALTY: f64 = 0.3;
const FLAT_CASE_PENALTY: f64 = 0.2;

/// Category → keywords used for relevance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeywordCatalog {
    categories: BTreeMap<String, Vec<String>>,
}

impl KeywordCatalog {
    /// An empty catalog; every category scores neutral relevance.
    pub fn empty() -> Self {
        Self {
            categories: BTreeMap::new(),
        }
    }

    pub fn with_category<I, S>(mut self, category: impl Into<String>, keywords: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.categories.insert(
            category.into(),
            keywords.into_iter().map(|k| k.into().to_lowercase()).collect(),
        );
        self
    }

    /// Keywords for `category`, or `None` if none are configured.
    pub fn keywords(&self, category: &str) -> Option<&[String]> {
        self.categories
            .get(category)
            .map(Vec::as_slice)
            .filter(|k| !k.is_empty())
    }
}

impl Default for KeywordCatalog {
    fn default() -> Self {
        Self::empty().with_category(
            "customer_service",
            ["help", "assist", "support", "service", "happy"],
        )
    }
}

/// Per-component breakdown of a score.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct QualityScore {
    pub length_fit: f64,
    pub keyword_relevance: f64,
    pub well_formedness: f64,
    pub total: f64,
}

impl QualityScore {
    pub fn passed(&self) -> bool {
        self.total >= PASS_THRESHOLD
    }
}

/// Scores responses against benchmark case expectations.
#[derive(Debug, Clone, Default)]
pub struct ResponseScorer {
    catalog: KeywordCatalog,
}

impl ResponseScorer {
    pub fn new(catalog: KeywordCatalog) -> Self {
        Self { catalog }
    }

    pub fn score(&self, response: &str, case: &BenchmarkCase) -> QualityScore {
        let length_fit = clamp_to(
            LENGTH_WEIGHT * length_ratio(response, case.expected_length),
            LENGTH_WEIGHT,
        );
        let keyword_relevance = clamp_to(
            KEYWORD_WEIGHT * self.relevance(response, &case.category),
            KEYWORD_WEIGHT,
        );
        let well_formedness = clamp_to(FORM_WEIGHT * form_quality(response), FORM_WEIGHT);

        QualityScore {
            length_fit,
            keyword_relevance,
            well_formedness,
            total: (length_fit + keyword_relevance + well_formedness).clamp(0.0, 1.0),
        }
    }

    fn relevance(&self, response: &str, category: &str) -> f64 {
        let Some(keywords) = self.catalog.keywords(category) else {
            return NEUTRAL_RELEVANCE;
        };

        let lowered = response.to_lowercase();
        let matches = keywords.iter().filter(|k| lowered.contains(k.as_str())).count();
        (matches as f64 / keywords.len() as f64).min(1.0)
    }
}

fn clamp_to(value: f64, weight: f64) -> f64 {
    if value.is_nan() {
        return 0.0;
    }
    value.clamp(0.0, weight)
}

fn length_ratio(response: &str, expected: usize) -> f64 {
    let actual = response.split_whitespace().count();
    if actual == 0 || expected == 0 {
        return 0.0;
    }
    let (actual, expected) = (actual as f64, expected as f64);
    (actual / expected).min(expected / actual)
}

fn form_quality(response: &str) -> f64 {
    let mut quality = 1.0;
    if response.chars().count() < MIN_RESPONSE_CHARS {
        quality -= SHORT_PENALTY;
    }
    if !response.contains('.') {
        quality -= NO_PERIOD_PENALTY;
    }
    if is_flat_case(response) {
        quality -= FLAT_CASE_PENALTY;
    }
    f64::max(quality, 0.0)
}

/// True when the text has cased letters and all of them share one case.
fn is_flat_case(text: &str) -> bool {
    let has_upper = text.chars().any(char::is_uppercase);
    let has_lower = text.chars().any(char::is_lowercase);
    has_upper != has_lower
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn case(expected_length: usize) -> BenchmarkCase {
        BenchmarkCase::new("prompt", "customer_service", expected_length, "helpful")
    }

    fn approx(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn test_empty_response_scores_low() {
        let score = ResponseScorer::default().score("", &case(100));
        assert_eq!(score.length_fit, 0.0);
        assert_eq!(score.keyword_relevance, 0.0);
        // short and no period; an empty string is not flat-cased
        assert!(approx(score.well_formedness, 0.3 * 0.2));
        assert!(!score.passed());
    }

    #[test]
    fn test_length_fit_is_symmetric() {
        let scorer = ResponseScorer::default();
        let ten_words = "Word word word word word word word word word word.";
        let short = scorer.score(ten_words, &case(20));
        let long = scorer.score(ten_words, &case(5));
        assert!(approx(short.length_fit, 0.3 * 0.5));
        assert!(approx(long.length_fit, 0.3 * 0.5));
    }

    #[test]
    fn test_all_keywords_give_full_relevance() {
        let response = "Happy to help: our service team will assist and support you.";
        let score = ResponseScorer::default().score(response, &case(11));
        assert!(approx(score.keyword_relevance, 0.4));
    }

    #[test]
    fn test_partial_keyword_match() {
        // help, support and happy match; assist and service do not
        let response = "I am happy to help with your support request.";
        let score = ResponseScorer::default().score(response, &case(9));
        assert!(approx(score.keyword_relevance, 0.4 * 3.0 / 5.0));
        assert!(approx(score.length_fit, 0.3));
        assert!(approx(score.well_formedness, 0.3));
        assert!(score.passed());
    }

    #[test]
    fn test_keyword_match_is_case_insensitive() {
        let score = ResponseScorer::default().score("HELP and Support are here.", &case(5));
        assert!(approx(score.keyword_relevance, 0.4 * 2.0 / 5.0));
    }

    #[test]
    fn test_unknown_category_is_neutral() {
        let unknown = BenchmarkCase::new("p", "billing", 5, "");
        let score = ResponseScorer::default().score("Your invoice is attached.", &unknown);
        assert!(approx(score.keyword_relevance, 0.2));
    }

    #[test]
    fn test_empty_keyword_set_is_neutral() {
        let catalog = KeywordCatalog::empty().with_category("billing", Vec::<String>::new());
        let scorer = ResponseScorer::new(catalog);
        let billing = BenchmarkCase::new("p", "billing", 5, "");
        let score = scorer.score("Your invoice is attached.", &billing);
        assert!(approx(score.keyword_relevance, 0.2));
    }

    #[test]
    fn test_well_formedness_penalties() {
        let scorer = ResponseScorer::default();
        // lower-case only, no period, shorter than 20 chars
        let score = scorer.score("sure thing", &case(2));
        assert!(approx(score.well_formedness, 0.0));

        // upper-case only but long and punctuated
        let score = scorer.score("THIS IS A PERFECTLY LONG ANSWER.", &case(6));
        assert!(approx(score.well_formedness, 0.3 * 0.8));
    }

    #[test]
    fn test_flat_case_detection() {
        assert!(is_flat_case("all lower."));
        assert!(is_flat_case("ALL UPPER."));
        assert!(!is_flat_case("Mixed case."));
        assert!(!is_flat_case("12345."));
        assert!(!is_flat_case(""));
    }

    proptest! {
        #[test]
        fn prop_score_is_bounded(response in ".*", expected in 0usize..500) {
            let score = ResponseScorer::default().score(&response, &case(expected));
            prop_assert!((0.0..=1.0).contains(&score.total));
            prop_assert!((0.0..=LENGTH_WEIGHT).contains(&score.length_fit));
            prop_assert!((0.0..=KEYWORD_WEIGHT).contains(&score.keyword_relevance));
            prop_assert!((0.0..=FORM_WEIGHT).contains(&score.well_formedness));
        }
    }
}
