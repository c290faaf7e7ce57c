//! Pluggable per-text annotators.
//!
//! An [`Annotator`] maps one text to an [`AnnotationResult`]: either a
//! multiset of matched labels (dictionary counting) or a score in `[0, 1]`
//! per label (an opaque classifier). The label universe is fixed when the
//! annotator is constructed, never discovered during aggregation.

use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::Path;

use crate::error::{Result, TrendError};

/// Boxed error returned by an opaque classifier call.
pub type ClassifyError = Box<dyn std::error::Error + Send + Sync>;

/// Outcome of annotating a single text.
#[derive(Debug, Clone, PartialEq)]
pub enum AnnotationResult {
    /// Occurrence counts for dictionary members found in the text.
    Counts(HashMap<String, u64>),
    /// One score in `[0, 1]` per universe label, plus the argmax label.
    /// Ties break by the classifier's own output ordering, then by universe
    /// order for labels the classifier never mentioned.
    Scores {
        scores: HashMap<String, f64>,
        top_label: String,
    },
}

/// Capability shared by all per-text annotators.
pub trait Annotator {
    /// Annotate one text. Counting annotators are infallible; scoring
    /// annotators propagate classifier failures instead of defaulting.
    fn annotate(&mut self, text: &str) -> Result<AnnotationResult>;

    /// The fixed label universe of this annotator.
    fn labels(&self) -> &[String];
}

/// Splits text into lowercase tokens. A token is a maximal run of ASCII
/// alphanumerics plus apostrophe; everything else is a separator.
///
/// # Example
/// ```
/// use corpus_trends::tokenize;
/// assert_eq!(tokenize("Don't PANIC, again!"), vec!["don't", "panic", "again"]);
/// ```
pub fn tokenize(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split(|c: char| !(c.is_ascii_alphanumeric() || c == '\''))
        .filter(|t| !t.is_empty())
        .map(String::from)
        .collect()
}

/// Counts occurrences of dictionary members in a text. Deterministic and
/// case-insensitive; matching is exact token membership.
pub struct CountingAnnotator {
    dictionary: HashSet<String>,
    labels: Vec<String>,
}

impl CountingAnnotator {
    pub fn new<I>(dictionary: I) -> Self
    where
        I: IntoIterator<Item = String>,
    {
        let dictionary: HashSet<String> =
            dictionary.into_iter().map(|w| w.to_lowercase()).collect();
        let mut labels: Vec<String> = dictionary.iter().cloned().collect();
        labels.sort();
        Self { dictionary, labels }
    }

    /// Loads a dictionary file: one token per line, `#` comments and blank
    /// lines ignored.
    pub fn from_file(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(TrendError::MissingResource {
                path: path.to_path_buf(),
            });
        }
        let raw = fs::read_to_string(path)?;
        Ok(Self::new(
            raw.lines()
                .map(str::trim)
                .filter(|l| !l.is_empty() && !l.starts_with('#'))
                .map(String::from),
        ))
    }

    pub fn len(&self) -> usize {
        self.dictionary.len()
    }

    pub fn is_empty(&self) -> bool {
        self.dictionary.is_empty()
    }
}

impl Annotator for CountingAnnotator {
    fn annotate(&mut self, text: &str) -> Result<AnnotationResult> {
        let mut counts: HashMap<String, u64> = HashMap::new();
        for token in tokenize(text) {
            if self.dictionary.contains(&token) {
                *counts.entry(token).or_insert(0) += 1;
            }
        }
        Ok(AnnotationResult::Counts(counts))
    }

    fn labels(&self) -> &[String] {
        &self.labels
    }
}

/// What to do when a classifier emits a label that is neither in the
/// universe nor a recognized positive alias.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LabelPolicy {
    /// Treat it as the complement of the positive class: assign `1 - score`
    /// to the positive label. Matches the behavior of common binary
    /// irony/sarcasm classifiers whose negative label name is arbitrary.
    #[default]
    Complement,
    /// Fail the annotation with [`TrendError::UnknownLabel`].
    Reject,
}

/// Marker substrings identifying the positive class in binary classifiers
/// with unknown label schemes (e.g. `IRONIC`, `sarcasm`, `LABEL_1`).
const POSITIVE_MARKERS: [&str; 2] = ["sarc", "iron"];

fn is_positive_alias(raw_label: &str) -> bool {
    let lower = raw_label.to_lowercase();
    POSITIVE_MARKERS.iter().any(|m| lower.contains(m)) || lower.ends_with('1')
}

/// Wraps an opaque classifier (`text -> ordered (label, score) list`) and
/// normalizes its raw labels into a fixed universe.
///
/// Scores are clamped to `[0, 1]`. Universe labels the classifier does not
/// mention default to `0.0`. Classifier failures propagate; the caller
/// decides whether to abort or skip.
pub struct ScoringAnnotator<C> {
    classify: C,
    labels: Vec<String>,
    positive_label: String,
    policy: LabelPolicy,
}

impl<C> ScoringAnnotator<C>
where
    C: FnMut(&str) -> std::result::Result<Vec<(String, f64)>, ClassifyError>,
{
    /// `positive_label` receives scores from recognized positive aliases and
    /// complement scores under [`LabelPolicy::Complement`]. It is appended
    /// to the universe if not already a member.
    pub fn new(
        mut labels: Vec<String>,
        positive_label: impl Into<String>,
        policy: LabelPolicy,
        classify: C,
    ) -> Self {
        let positive_label = positive_label.into();
        if !labels.contains(&positive_label) {
            labels.push(positive_label.clone());
        }
        Self {
            classify,
            labels,
            positive_label,
            policy,
        }
    }
}

impl<C> Annotator for ScoringAnnotator<C>
where
    C: FnMut(&str) -> std::result::Result<Vec<(String, f64)>, ClassifyError>,
{
    fn annotate(&mut self, text: &str) -> Result<AnnotationResult> {
        let raw = (self.classify)(text).map_err(|source| TrendError::Classify {
            date: "<unknown>".into(),
            source,
        })?;

        let mut scores: HashMap<String, f64> =
            self.labels.iter().map(|l| (l.clone(), 0.0)).collect();
        let mut seen: Vec<String> = Vec::new();

        for (raw_label, raw_score) in raw {
            let score = raw_score.clamp(0.0, 1.0);
            let (label, value) = if scores.contains_key(&raw_label) {
                (raw_label, score)
            } else if is_positive_alias(&raw_label) {
                (self.positive_label.clone(), score)
            } else {
                match self.policy {
                    LabelPolicy::Complement => (self.positive_label.clone(), 1.0 - score),
                    LabelPolicy::Reject => return Err(TrendError::UnknownLabel(raw_label)),
                }
            };
            scores.insert(label.clone(), value);
            if !seen.contains(&label) {
                seen.push(label);
            }
        }

        // Argmax with strict comparison: classifier output order wins ties,
        // then universe order for untouched labels.
        let mut top_label = String::new();
        let mut best = f64::NEG_INFINITY;
        let unseen = self.labels.iter().filter(|l| !seen.contains(l));
        for label in seen.iter().chain(unseen) {
            let v = scores[label];
            if v > best {
                best = v;
                top_label = label.clone();
            }
        }

        Ok(AnnotationResult::Scores { scores, top_label })
    }

    fn labels(&self) -> &[String] {
        &self.labels
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn counts(result: AnnotationResult) -> HashMap<String, u64> {
        match result {
            AnnotationResult::Counts(c) => c,
            other => panic!("expected Counts, got {other:?}"),
        }
    }

    fn scores(result: AnnotationResult) -> (HashMap<String, f64>, String) {
        match result {
            AnnotationResult::Scores { scores, top_label } => (scores, top_label),
            other => panic!("expected Scores, got {other:?}"),
        }
    }

    #[test]
    fn tokenize_keeps_apostrophes_and_digits() {
        assert_eq!(
            tokenize("We're at 110% -- synergy!"),
            vec!["we're", "at", "110", "synergy"]
        );
        assert!(tokenize("").is_empty());
        assert!(tokenize("?!. --").is_empty());
    }

    #[test]
    fn counting_is_case_insensitive_and_position_independent() {
        let mut ann = CountingAnnotator::new(vec!["foo".to_string()]);
        let c = counts(ann.annotate("FOO foo").unwrap());
        assert_eq!(c.get("foo"), Some(&2));
    }

    #[test]
    fn counting_ignores_tokens_outside_dictionary() {
        let mut ann =
            CountingAnnotator::new(vec!["synergy".to_string(), "leverage".to_string()]);
        let c = counts(ann.annotate("We need to leverage synergy, not effort").unwrap());
        assert_eq!(c.get("synergy"), Some(&1));
        assert_eq!(c.get("leverage"), Some(&1));
        assert_eq!(c.get("effort"), None);
    }

    #[test]
    fn counting_empty_text_yields_empty_counts() {
        let mut ann = CountingAnnotator::new(vec!["foo".to_string()]);
        assert!(counts(ann.annotate("").unwrap()).is_empty());
    }

    #[test]
    fn counting_labels_are_sorted() {
        let ann = CountingAnnotator::new(vec!["zeta".to_string(), "alpha".to_string()]);
        assert_eq!(ann.labels(), &["alpha".to_string(), "zeta".to_string()]);
    }

    fn fixed_classifier(
        output: Vec<(String, f64)>,
    ) -> impl FnMut(&str) -> std::result::Result<Vec<(String, f64)>, ClassifyError> {
        move |_text| Ok(output.clone())
    }

    #[test]
    fn scoring_clamps_out_of_range_scores() {
        let mut ann = ScoringAnnotator::new(
            vec!["a".to_string(), "b".to_string()],
            "a",
            LabelPolicy::Complement,
            fixed_classifier(vec![("a".to_string(), 1.5), ("b".to_string(), -0.3)]),
        );
        let (s, _) = scores(ann.annotate("x").unwrap());
        assert_eq!(s["a"], 1.0);
        assert_eq!(s["b"], 0.0);
    }

    #[test]
    fn scoring_defaults_unmentioned_labels_to_zero() {
        let mut ann = ScoringAnnotator::new(
            vec!["joy".to_string(), "anger".to_string(), "neutral".to_string()],
            "joy",
            LabelPolicy::Complement,
            fixed_classifier(vec![("joy".to_string(), 0.9)]),
        );
        let (s, top) = scores(ann.annotate("x").unwrap());
        assert_eq!(s.len(), 3);
        assert_eq!(s["anger"], 0.0);
        assert_eq!(s["neutral"], 0.0);
        assert_eq!(top, "joy");
    }

    #[test]
    fn scoring_maps_positive_aliases() {
        for alias in ["IRONIC", "sarcasm", "LABEL_1"] {
            let mut ann = ScoringAnnotator::new(
                vec!["sarcastic".to_string()],
                "sarcastic",
                LabelPolicy::Complement,
                fixed_classifier(vec![(alias.to_string(), 0.87)]),
            );
            let (s, _) = scores(ann.annotate("x").unwrap());
            assert_eq!(s["sarcastic"], 0.87, "alias {alias}");
        }
    }

    #[test]
    fn scoring_negated_marker_label_maps_directly_not_complemented() {
        // "NOT_IRONIC" still contains the "iron" marker, so its score goes
        // to the positive label as-is. Only labels with no marker at all
        // take the complement path.
        let mut ann = ScoringAnnotator::new(
            vec!["sarcastic".to_string()],
            "sarcastic",
            LabelPolicy::Complement,
            fixed_classifier(vec![("NOT_IRONIC".to_string(), 0.25)]),
        );
        let (s, _) = scores(ann.annotate("x").unwrap());
        assert_eq!(s["sarcastic"], 0.25);
    }

    #[test]
    fn scoring_complements_unrecognized_negative_label() {
        let mut ann = ScoringAnnotator::new(
            vec!["sarcastic".to_string()],
            "sarcastic",
            LabelPolicy::Complement,
            fixed_classifier(vec![("NOT_SERIOUS_0".to_string(), 0.93)]),
        );
        let (s, _) = scores(ann.annotate("x").unwrap());
        assert!((s["sarcastic"] - 0.07).abs() < 1e-9);
    }

    #[test]
    fn scoring_reject_policy_fails_on_unknown_label() {
        let mut ann = ScoringAnnotator::new(
            vec!["sarcastic".to_string()],
            "sarcastic",
            LabelPolicy::Reject,
            fixed_classifier(vec![("whatever".to_string(), 0.5)]),
        );
        match ann.annotate("x") {
            Err(TrendError::UnknownLabel(l)) => assert_eq!(l, "whatever"),
            other => panic!("expected UnknownLabel, got {other:?}"),
        }
    }

    #[test]
    fn scoring_top_label_tie_breaks_by_classifier_order() {
        let mut ann = ScoringAnnotator::new(
            vec!["a".to_string(), "b".to_string(), "c".to_string()],
            "a",
            LabelPolicy::Complement,
            fixed_classifier(vec![
                ("b".to_string(), 0.5),
                ("c".to_string(), 0.5),
                ("a".to_string(), 0.1),
            ]),
        );
        let (_, top) = scores(ann.annotate("x").unwrap());
        assert_eq!(top, "b");
    }

    #[test]
    fn scoring_propagates_classifier_failure() {
        let mut ann = ScoringAnnotator::new(
            vec!["a".to_string()],
            "a",
            LabelPolicy::Complement,
            |_text: &str| Err::<Vec<(String, f64)>, ClassifyError>("model exploded".into()),
        );
        assert!(matches!(
            ann.annotate("x"),
            Err(TrendError::Classify { .. })
        ));
    }

    #[test]
    fn positive_label_joins_universe_when_absent() {
        let ann = ScoringAnnotator::new(
            vec!["neutral".to_string()],
            "sarcastic",
            LabelPolicy::Complement,
            fixed_classifier(vec![]),
        );
        assert!(ann.labels().contains(&"sarcastic".to_string()));
    }
}
