#![forbid(unsafe_code)]
//! # corpus_trends CLI
//!
//! Command-line front end for the `corpus_trends` crate. It runs the yearly
//! annotation pipeline over a date-keyed JSON corpus and writes tabular and
//! chart output.
//!
//! ## Modes
//! - `--dictionary <file>`: count dictionary tokens per year.
//! - `--scores <file>`: aggregate precomputed classifier scores per year
//!   (a JSON mapping text -> ordered `[{label, score}]` list, standing in
//!   for the opaque classifier).
//!
//! ## Example
//! ```bash
//! cargo run --release -- transcripts.json --dictionary buzzwords.txt --top 20
//! ```
//!
//! See `--help` for all available options.

use std::collections::{BTreeMap, HashMap};
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::process;

use clap::{ArgGroup, Parser, ValueEnum};
use log::error;
use serde::Deserialize;

use corpus_trends::{
    Annotator, CountingAnnotator, ExportFormat, LabelPolicy, LogProgress, ResultMatrix,
    ScoringAnnotator, TrendError, ValueField, aggregate_years, load_corpus_file,
    partition_by_year, render_heatmap, render_trend, sample_counts, top_labels,
    write_matrix_csv, write_year_stats_csv,
};

/// Which per-year statistic becomes the exported matrix in scoring mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Stat {
    /// Mean score per label.
    Mean,
    /// Proportion of texts whose top label is each label.
    TopShare,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum VizFormat {
    Svg,
    Png,
}

impl VizFormat {
    fn extension(self) -> &'static str {
        match self {
            VizFormat::Svg => "svg",
            VizFormat::Png => "png",
        }
    }
}

#[derive(Parser)]
#[command(author, version, about)]
#[command(group(ArgGroup::new("annotator").required(true).args(["dictionary", "scores"])))]
struct Cli {
    /// Corpus JSON file: { "YYYY-MM-DD": { "transcript": "..." }, ... }
    corpus: String,

    /// Dictionary file for counting mode (one lowercase token per line)
    #[arg(long)]
    dictionary: Option<String>,

    /// Precomputed classifier scores for scoring mode
    /// (JSON: { "<text>": [ { "label": "...", "score": 0.9 }, ... ] })
    #[arg(long)]
    scores: Option<String>,

    /// Label universe for scoring mode (defaults to just the positive label)
    #[arg(long, value_delimiter = ',')]
    labels: Vec<String>,

    /// Label receiving scores from positive aliases and complements
    #[arg(long, default_value = "positive")]
    positive_label: String,

    /// Fail on classifier labels outside the universe instead of
    /// complementing them into the positive label
    #[arg(long, default_value_t = false)]
    strict_labels: bool,

    /// Statistic exported in scoring mode
    #[arg(long, value_enum, default_value_t = Stat::Mean)]
    stat: Stat,

    /// Keep only the top K labels by total value as matrix columns
    #[arg(long)]
    top: Option<usize>,

    /// Tabular output format
    #[arg(long, value_enum, default_value_t = ExportFormat::Csv)]
    export_format: ExportFormat,

    /// Chart output format
    #[arg(long, value_enum, default_value_t = VizFormat::Svg)]
    viz_format: VizFormat,

    /// Also render a per-year trend line for this label
    #[arg(long)]
    trend: Option<String>,

    /// Output directory for all generated files
    #[arg(long, default_value = ".")]
    out_dir: String,

    /// Skip chart rendering, write tables only
    #[arg(long, default_value_t = false)]
    no_plot: bool,
}

#[derive(Debug, Clone, Deserialize)]
struct ScoreEntry {
    label: String,
    score: f64,
}

fn load_scores_file(path: &Path) -> corpus_trends::Result<HashMap<String, Vec<ScoreEntry>>> {
    if !path.exists() {
        return Err(TrendError::MissingResource {
            path: path.to_path_buf(),
        });
    }
    let reader = BufReader::new(File::open(path)?);
    Ok(serde_json::from_reader(reader)?)
}

fn run(cli: &Cli) -> corpus_trends::Result<()> {
    let (records, summary) = load_corpus_file(Path::new(&cli.corpus))?;
    let corpus = partition_by_year(records);

    let scoring = cli.scores.is_some();
    let mut annotator: Box<dyn Annotator> = if let Some(dict) = &cli.dictionary {
        Box::new(CountingAnnotator::from_file(Path::new(dict))?)
    } else {
        // The annotator arg group guarantees --scores is set on this branch.
        let scores_path = cli.scores.as_deref().unwrap_or_default();
        let precomputed = load_scores_file(Path::new(scores_path))?;
        let policy = if cli.strict_labels {
            LabelPolicy::Reject
        } else {
            LabelPolicy::Complement
        };
        let universe = if cli.labels.is_empty() {
            vec![cli.positive_label.clone()]
        } else {
            cli.labels.clone()
        };
        let classify = move |text: &str| match precomputed.get(text) {
            Some(entries) => Ok(entries
                .iter()
                .map(|e| (e.label.clone(), e.score))
                .collect()),
            None => Err(format!("no precomputed score for text '{text}'").into()),
        };
        Box::new(ScoringAnnotator::new(
            universe,
            cli.positive_label.clone(),
            policy,
            classify,
        ))
    };

    let universe = annotator.labels().to_vec();
    let mut progress = LogProgress::default();
    let aggregates = aggregate_years(&corpus, annotator.as_mut(), &mut progress)?;

    let field = if scoring {
        match cli.stat {
            Stat::Mean => ValueField::PerLabel,
            Stat::TopShare => ValueField::TopShare,
        }
    } else {
        ValueField::PerLabel
    };
    let columns = match cli.top {
        Some(k) => top_labels(&aggregates, k, field),
        None => universe.clone(),
    };
    let matrix = ResultMatrix::from_aggregates(&aggregates, &columns, field);
    let counts: BTreeMap<i32, usize> = sample_counts(&aggregates);

    let out_dir = PathBuf::from(&cli.out_dir);
    std::fs::create_dir_all(&out_dir)?;
    let mode = if scoring { "scores" } else { "counts" };

    let table_path = out_dir.join(format!(
        "{mode}_by_year.{}",
        cli.export_format.extension()
    ));
    write_matrix_csv(&matrix, Some(&counts), &table_path, cli.export_format)?;
    println!("Wrote {}", table_path.display());

    if scoring {
        let stats_path = out_dir.join("yearly_stats.csv");
        write_year_stats_csv(&aggregates, &universe, &stats_path)?;
        println!("Wrote {}", stats_path.display());
    }

    if !cli.no_plot && !matrix.rows.is_empty() {
        let heatmap_path =
            out_dir.join(format!("{mode}_heatmap.{}", cli.viz_format.extension()));
        let title = format!("Yearly {mode} by label");
        render_heatmap(&matrix, &title, &heatmap_path)?;
        println!("Wrote {}", heatmap_path.display());

        if let Some(label) = &cli.trend {
            let trend_path =
                out_dir.join(format!("{mode}_trend.{}", cli.viz_format.extension()));
            let title = format!("Yearly trend: {label}");
            render_trend(&matrix, &counts, label, &title, &trend_path)?;
            println!("Wrote {}", trend_path.display());
        }
    }

    println!(
        "Processed {} of {} entries across {} years ({} skipped)",
        summary.kept,
        summary.total,
        aggregates.len(),
        summary.skipped_empty + summary.skipped_bad_date
    );
    Ok(())
}

fn main() {
    env_logger::init();
    let cli = Cli::parse();

    if let Err(e) = run(&cli) {
        error!("Error: {}", e);
        eprintln!("Error: {e}");
        process::exit(1);
    }
}
