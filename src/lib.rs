#![forbid(unsafe_code)]
//! # corpus_trends
//!
//! Yearly trend analysis for dated text corpora. The pipeline loads a
//! date-keyed corpus, partitions it by year, applies a pluggable
//! [`Annotator`] to every text, folds the results into per-year statistics,
//! and materializes a dense year x label [`ResultMatrix`] for CSV and
//! heatmap export.
//!
//! The same pipeline serves both annotator families: deterministic
//! dictionary counting ([`CountingAnnotator`]) and opaque classifier
//! scoring ([`ScoringAnnotator`]). Only the annotator is swapped.

use std::collections::{BTreeMap, HashMap};
use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use chrono::{Datelike, NaiveDate};
use log::{info, warn};
use serde::Deserialize;

pub mod annotate;
pub mod error;
pub mod export;

pub use annotate::{
    AnnotationResult, Annotator, ClassifyError, CountingAnnotator, LabelPolicy, ScoringAnnotator,
    tokenize,
};
pub use error::{Result, TrendError};
pub use export::{
    ExportFormat, csv_safe_cell, render_heatmap, render_trend, write_matrix_csv,
    write_year_stats_csv,
};

/// One dated text. Immutable once constructed; `year` always equals the
/// integer value of the first four characters of `date`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    pub date: String,
    pub year: i32,
    pub text: String,
}

/// Raw corpus entry as stored on disk. Extra fields (title, url, ...) are
/// ignored during deserialization.
#[derive(Debug, Clone, Deserialize)]
pub struct RawEntry {
    #[serde(default)]
    pub transcript: String,
}

/// Per-run loading diagnostics. Skips are counted, never silently absorbed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoadSummary {
    pub total: usize,
    pub kept: usize,
    pub skipped_empty: usize,
    pub skipped_bad_date: usize,
}

fn parse_year(date: &str) -> Option<i32> {
    match NaiveDate::parse_from_str(date, "%Y-%m-%d") {
        Ok(d) => Some(d.year()),
        // Fallback: first four characters as an integer year.
        Err(_) => date.get(..4).and_then(|p| p.parse().ok()),
    }
}

/// Validates a parsed date-keyed corpus into a flat record list.
///
/// Entries with an empty transcript or an unparsable date are skipped and
/// counted; a bad record never fails the whole load. Entries are visited in
/// ascending date-key order, so the output order is deterministic.
pub fn load_corpus(entries: &BTreeMap<String, RawEntry>) -> (Vec<Record>, LoadSummary) {
    let mut records = Vec::with_capacity(entries.len());
    let mut summary = LoadSummary {
        total: entries.len(),
        ..LoadSummary::default()
    };

    for (date, entry) in entries {
        let text = entry.transcript.trim();
        if text.is_empty() {
            summary.skipped_empty += 1;
            continue;
        }
        let Some(year) = parse_year(date) else {
            summary.skipped_bad_date += 1;
            continue;
        };
        records.push(Record {
            date: date.clone(),
            year,
            text: text.to_string(),
        });
    }

    summary.kept = records.len();
    info!(
        "loaded {} of {} entries ({} empty, {} bad dates skipped)",
        summary.kept, summary.total, summary.skipped_empty, summary.skipped_bad_date
    );
    if summary.skipped_empty + summary.skipped_bad_date > 0 {
        warn!(
            "skipped {} entries during load",
            summary.skipped_empty + summary.skipped_bad_date
        );
    }
    (records, summary)
}

/// Opens and parses a corpus JSON file, then validates it via
/// [`load_corpus`]. A missing file is fatal ([`TrendError::MissingResource`]).
pub fn load_corpus_file(path: &Path) -> Result<(Vec<Record>, LoadSummary)> {
    if !path.exists() {
        return Err(TrendError::MissingResource {
            path: path.to_path_buf(),
        });
    }
    let reader = BufReader::new(File::open(path)?);
    let entries: BTreeMap<String, RawEntry> = serde_json::from_reader(reader)?;
    Ok(load_corpus(&entries))
}

/// Groups records by year, ascending. Within a year, input order is
/// preserved (stable partition; downstream tie-breaking depends on it).
/// A year with no records is simply absent.
pub fn partition_by_year(records: Vec<Record>) -> BTreeMap<i32, Vec<Record>> {
    let mut corpus: BTreeMap<i32, Vec<Record>> = BTreeMap::new();
    for record in records {
        corpus.entry(record.year).or_default().push(record);
    }
    corpus
}

/// Observer attached to a fold for incremental progress reporting.
/// Observability only: nothing in the returned aggregates depends on it.
pub trait ProgressObserver {
    fn on_text(&mut self, _processed: usize, _total: usize) {}
    fn on_year(&mut self, _year: i32, _sample_count: usize) {}
}

/// Silent observer.
pub struct NoProgress;

impl ProgressObserver for NoProgress {}

/// Logs progress every `every` texts via the `log` facade. Useful for slow
/// classifier annotators over large corpora.
pub struct LogProgress {
    pub every: usize,
}

impl Default for LogProgress {
    fn default() -> Self {
        Self { every: 100 }
    }
}

impl ProgressObserver for LogProgress {
    fn on_text(&mut self, processed: usize, total: usize) {
        if self.every > 0 && (processed % self.every == 0 || processed == total) {
            info!(
                "annotated {processed}/{total} texts ({:.1}%)",
                100.0 * processed as f64 / total as f64
            );
        }
    }

    fn on_year(&mut self, year: i32, sample_count: usize) {
        info!("year {year}: {sample_count} texts aggregated");
    }
}

/// Folded statistics for one year.
///
/// For counting annotators `per_label` holds raw occurrence sums and the
/// other maps are empty. For scoring annotators `per_label` holds mean
/// scores, `std_dev` the sample standard deviation per label, and
/// `top_share` the proportion of texts whose top label is each label.
#[derive(Debug, Clone, PartialEq)]
pub struct YearlyAggregate {
    pub year: i32,
    pub per_label: BTreeMap<String, f64>,
    pub std_dev: BTreeMap<String, f64>,
    pub top_share: BTreeMap<String, f64>,
    pub sample_count: usize,
}

/// Applies the annotator to every text and folds results per year.
///
/// Years with zero contributing records never appear in the output.
/// Standard deviation uses the sample (n-1) denominator and is 0 (never
/// NaN) when a year holds a single text. Classifier failures abort the fold
/// with the failing record's date attached.
pub fn aggregate_years(
    corpus: &BTreeMap<i32, Vec<Record>>,
    annotator: &mut dyn Annotator,
    observer: &mut dyn ProgressObserver,
) -> Result<BTreeMap<i32, YearlyAggregate>> {
    let total: usize = corpus.values().map(Vec::len).sum();
    let mut processed = 0usize;
    let mut aggregates = BTreeMap::new();

    for (&year, records) in corpus {
        let mut sums: BTreeMap<String, f64> = BTreeMap::new();
        let mut sum_squares: BTreeMap<String, f64> = BTreeMap::new();
        let mut top_counts: HashMap<String, usize> = HashMap::new();
        let mut scored = false;
        let mut sample_count = 0usize;

        for record in records {
            let result = annotator.annotate(&record.text).map_err(|e| match e {
                TrendError::Classify { source, .. } => TrendError::Classify {
                    date: record.date.clone(),
                    source,
                },
                other => other,
            })?;
            sample_count += 1;
            processed += 1;
            observer.on_text(processed, total);

            match result {
                AnnotationResult::Counts(counts) => {
                    for (label, n) in counts {
                        *sums.entry(label).or_insert(0.0) += n as f64;
                    }
                }
                AnnotationResult::Scores { scores, top_label } => {
                    scored = true;
                    for (label, score) in scores {
                        *sum_squares.entry(label.clone()).or_insert(0.0) += score * score;
                        *sums.entry(label).or_insert(0.0) += score;
                    }
                    *top_counts.entry(top_label).or_insert(0) += 1;
                }
            }
        }

        if sample_count == 0 {
            continue;
        }
        observer.on_year(year, sample_count);

        let aggregate = if scored {
            let n = sample_count as f64;
            let mut per_label = BTreeMap::new();
            let mut std_dev = BTreeMap::new();
            for (label, sum) in &sums {
                let mean = sum / n;
                let std = if sample_count > 1 {
                    let sq = sum_squares.get(label).copied().unwrap_or(0.0);
                    // Guard against tiny negative variance from rounding.
                    (((sq - n * mean * mean) / (n - 1.0)).max(0.0)).sqrt()
                } else {
                    0.0
                };
                per_label.insert(label.clone(), mean);
                std_dev.insert(label.clone(), std);
            }
            let top_share = top_counts
                .into_iter()
                .map(|(label, count)| (label, count as f64 / n))
                .collect();
            YearlyAggregate {
                year,
                per_label,
                std_dev,
                top_share,
                sample_count,
            }
        } else {
            YearlyAggregate {
                year,
                per_label: sums,
                std_dev: BTreeMap::new(),
                top_share: BTreeMap::new(),
                sample_count,
            }
        };
        aggregates.insert(year, aggregate);
    }

    Ok(aggregates)
}

/// Per-year contributing record counts, for export alongside the matrix.
pub fn sample_counts(aggregates: &BTreeMap<i32, YearlyAggregate>) -> BTreeMap<i32, usize> {
    aggregates
        .iter()
        .map(|(&year, agg)| (year, agg.sample_count))
        .collect()
}

/// Which per-year statistic a matrix is built from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueField {
    /// Sums (counting) or means (scoring).
    PerLabel,
    /// Sample standard deviation per label (scoring only).
    StdDev,
    /// Proportion of texts whose top label is each label (scoring only).
    TopShare,
}

/// Dense year x label table, the pipeline's terminal artifact. Row order is
/// years ascending; column order is exactly as supplied by the caller.
#[derive(Debug, Clone, PartialEq)]
pub struct ResultMatrix {
    pub rows: Vec<i32>,
    pub columns: Vec<String>,
    pub values: Vec<Vec<f64>>,
}

impl ResultMatrix {
    /// Builds the matrix from completed aggregates. Column ordering is never
    /// recomputed here; any (year, label) combination absent from the
    /// aggregates fills with 0.0, never NaN.
    pub fn from_aggregates(
        aggregates: &BTreeMap<i32, YearlyAggregate>,
        columns: &[String],
        field: ValueField,
    ) -> Self {
        let rows: Vec<i32> = aggregates.keys().copied().collect();
        let values = aggregates
            .values()
            .map(|agg| {
                let map = match field {
                    ValueField::PerLabel => &agg.per_label,
                    ValueField::StdDev => &agg.std_dev,
                    ValueField::TopShare => &agg.top_share,
                };
                columns
                    .iter()
                    .map(|label| map.get(label).copied().unwrap_or(0.0))
                    .collect()
            })
            .collect();
        Self {
            rows,
            columns: columns.to_vec(),
            values,
        }
    }

    /// One column as (year, value) pairs, or `None` for an unknown label.
    pub fn column(&self, label: &str) -> Option<Vec<(i32, f64)>> {
        let idx = self.columns.iter().position(|c| c == label)?;
        Some(
            self.rows
                .iter()
                .zip(&self.values)
                .map(|(&year, row)| (year, row[idx]))
                .collect(),
        )
    }
}

/// Top-K labels by total aggregate value summed over all years, descending,
/// ties broken by lexical label order. Intended for column selection before
/// matrix construction; `field` must match the field the matrix will be
/// built from, so the ranking agrees with the exported values.
pub fn top_labels(
    aggregates: &BTreeMap<i32, YearlyAggregate>,
    k: usize,
    field: ValueField,
) -> Vec<String> {
    let mut totals: BTreeMap<String, f64> = BTreeMap::new();
    for agg in aggregates.values() {
        let map = match field {
            ValueField::PerLabel => &agg.per_label,
            ValueField::StdDev => &agg.std_dev,
            ValueField::TopShare => &agg.top_share,
        };
        for (label, value) in map {
            *totals.entry(label.clone()).or_insert(0.0) += value;
        }
    }
    let mut ranked: Vec<(String, f64)> = totals.into_iter().collect();
    ranked.sort_by(|a, b| {
        b.1.partial_cmp(&a.1)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.0.cmp(&b.0))
    });
    ranked.truncate(k);
    ranked.into_iter().map(|(label, _)| label).collect()
}
