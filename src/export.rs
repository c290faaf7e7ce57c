//! Tabular and visual export of a [`ResultMatrix`].
//!
//! The matrix arrives with its row and column orderings fixed; nothing here
//! re-sorts them. Tick labels on rendered charts come verbatim from those
//! orderings, so axes and data can never disagree.

use std::collections::BTreeMap;
use std::path::Path;

use clap::ValueEnum;
use csv::WriterBuilder;
use plotters::coord::Shift;
use plotters::drawing::DrawingAreaErrorKind;
use plotters::prelude::*;

use crate::error::{Result, TrendError};
use crate::{ResultMatrix, YearlyAggregate};

/// Delimited output format for the tabular export.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ExportFormat {
    Csv,
    Tsv,
}

impl ExportFormat {
    pub fn delimiter(self) -> u8 {
        match self {
            ExportFormat::Csv => b',',
            ExportFormat::Tsv => b'\t',
        }
    }

    pub fn extension(self) -> &'static str {
        match self {
            ExportFormat::Csv => "csv",
            ExportFormat::Tsv => "tsv",
        }
    }
}

/// Neutralizes cells that spreadsheet applications would interpret as
/// formulas by prefixing a single quote. Cells already starting with a
/// quote are left alone.
pub fn csv_safe_cell(cell: String) -> String {
    match cell.chars().next() {
        Some('=') | Some('+') | Some('-') | Some('@') => format!("'{cell}"),
        _ => cell,
    }
}

// Counting sums are whole numbers; render them without a fractional part so
// the CSV matches what a count is.
fn format_value(v: f64) -> String {
    if v.fract() == 0.0 && v.abs() < 1e15 {
        format!("{}", v as i64)
    } else {
        format!("{v:.6}")
    }
}

/// Writes the matrix as a delimited table: a `year` column, one column per
/// label, and optionally a trailing `sample_count` column.
pub fn write_matrix_csv(
    matrix: &ResultMatrix,
    counts: Option<&BTreeMap<i32, usize>>,
    path: &Path,
    format: ExportFormat,
) -> Result<()> {
    let mut wtr = WriterBuilder::new()
        .delimiter(format.delimiter())
        .from_path(path)?;

    let mut header = vec!["year".to_string()];
    header.extend(matrix.columns.iter().cloned().map(csv_safe_cell));
    if counts.is_some() {
        header.push("sample_count".to_string());
    }
    wtr.write_record(&header)?;

    for (year, row) in matrix.rows.iter().zip(&matrix.values) {
        let mut record = vec![year.to_string()];
        record.extend(row.iter().map(|&v| format_value(v)));
        if let Some(counts) = counts {
            record.push(counts.get(year).copied().unwrap_or(0).to_string());
        }
        wtr.write_record(&record)?;
    }
    wtr.flush()?;
    Ok(())
}

/// Writes per-year mean/std statistics for a scoring run: `year`,
/// `mean_<label>` and `std_<label>` per label, and `sample_count`.
pub fn write_year_stats_csv(
    aggregates: &BTreeMap<i32, YearlyAggregate>,
    labels: &[String],
    path: &Path,
) -> Result<()> {
    let mut wtr = WriterBuilder::new().from_path(path)?;

    let mut header = vec!["year".to_string()];
    for label in labels {
        header.push(csv_safe_cell(format!("mean_{label}")));
    }
    for label in labels {
        header.push(csv_safe_cell(format!("std_{label}")));
    }
    header.push("sample_count".to_string());
    wtr.write_record(&header)?;

    for (year, agg) in aggregates {
        let mut record = vec![year.to_string()];
        for label in labels {
            let mean = agg.per_label.get(label).copied().unwrap_or(0.0);
            record.push(format!("{mean:.6}"));
        }
        for label in labels {
            let std = agg.std_dev.get(label).copied().unwrap_or(0.0);
            record.push(format!("{std:.6}"));
        }
        record.push(agg.sample_count.to_string());
        wtr.write_record(&record)?;
    }
    wtr.flush()?;
    Ok(())
}

fn chart_err<E: std::error::Error + Send + Sync>(e: DrawingAreaErrorKind<E>) -> TrendError {
    TrendError::Render(e.to_string())
}

// Viridis-like ramp sampled at five anchors.
fn heat_color(t: f64) -> RGBColor {
    const ANCHORS: [(u8, u8, u8); 5] = [
        (68, 1, 84),
        (59, 82, 139),
        (33, 145, 140),
        (94, 201, 98),
        (253, 231, 37),
    ];
    let t = t.clamp(0.0, 1.0) * (ANCHORS.len() - 1) as f64;
    let i = (t.floor() as usize).min(ANCHORS.len() - 2);
    let f = t - i as f64;
    let (r0, g0, b0) = ANCHORS[i];
    let (r1, g1, b1) = ANCHORS[i + 1];
    let lerp = |a: u8, b: u8| (a as f64 + (b as f64 - a as f64) * f).round() as u8;
    RGBColor(lerp(r0, r1), lerp(g0, g1), lerp(b0, b1))
}

/// Renders the matrix as a heatmap: years on the x axis, labels on the y
/// axis, cell color proportional to value. SVG or bitmap output is chosen
/// by file extension (`.svg` vs anything else).
pub fn render_heatmap(matrix: &ResultMatrix, title: &str, path: &Path) -> Result<()> {
    if matrix.rows.is_empty() || matrix.columns.is_empty() {
        return Err(TrendError::Render("matrix has no rows or columns".into()));
    }
    if path.extension().and_then(|e| e.to_str()) == Some("svg") {
        let root = SVGBackend::new(path, (1280, 720)).into_drawing_area();
        draw_heatmap(&root, matrix, title)
    } else {
        let root = BitMapBackend::new(path, (1280, 720)).into_drawing_area();
        draw_heatmap(&root, matrix, title)
    }
}

fn draw_heatmap<DB: DrawingBackend>(
    root: &DrawingArea<DB, Shift>,
    matrix: &ResultMatrix,
    title: &str,
) -> Result<()> {
    root.fill(&WHITE).map_err(chart_err)?;
    let (nx, ny) = (matrix.rows.len() as i32, matrix.columns.len() as i32);

    let mut chart = ChartBuilder::on(root)
        .caption(title, ("sans-serif", 24))
        .margin(10)
        .x_label_area_size(50)
        .y_label_area_size(130)
        .build_cartesian_2d(0..nx, 0..ny)
        .map_err(chart_err)?;

    chart
        .configure_mesh()
        .disable_x_mesh()
        .disable_y_mesh()
        .x_labels(matrix.rows.len().min(40))
        .y_labels(matrix.columns.len().min(40))
        .x_label_formatter(&|x| {
            matrix
                .rows
                .get(*x as usize)
                .map(|y| y.to_string())
                .unwrap_or_default()
        })
        .y_label_formatter(&|y| {
            matrix
                .columns
                .get(*y as usize)
                .cloned()
                .unwrap_or_default()
        })
        .x_desc("Year")
        .draw()
        .map_err(chart_err)?;

    let max = matrix
        .values
        .iter()
        .flatten()
        .fold(0.0f64, |a, &b| a.max(b));
    let scale = if max > 0.0 { max } else { 1.0 };

    for (xi, row) in matrix.values.iter().enumerate() {
        for (yi, &v) in row.iter().enumerate() {
            chart
                .draw_series(std::iter::once(Rectangle::new(
                    [(xi as i32, yi as i32), (xi as i32 + 1, yi as i32 + 1)],
                    heat_color(v / scale).filled(),
                )))
                .map_err(chart_err)?;
        }
    }
    root.present().map_err(chart_err)?;
    Ok(())
}

/// Renders one matrix column as a line over years, with faint per-year
/// sample-count bars on a secondary axis.
pub fn render_trend(
    matrix: &ResultMatrix,
    counts: &BTreeMap<i32, usize>,
    label: &str,
    title: &str,
    path: &Path,
) -> Result<()> {
    let series = matrix
        .column(label)
        .ok_or_else(|| TrendError::Render(format!("label '{label}' is not a matrix column")))?;
    if series.is_empty() {
        return Err(TrendError::Render("matrix has no rows".into()));
    }
    if path.extension().and_then(|e| e.to_str()) == Some("svg") {
        let root = SVGBackend::new(path, (1280, 720)).into_drawing_area();
        draw_trend(&root, &series, counts, label, title)
    } else {
        let root = BitMapBackend::new(path, (1280, 720)).into_drawing_area();
        draw_trend(&root, &series, counts, label, title)
    }
}

fn draw_trend<DB: DrawingBackend>(
    root: &DrawingArea<DB, Shift>,
    series: &[(i32, f64)],
    counts: &BTreeMap<i32, usize>,
    label: &str,
    title: &str,
) -> Result<()> {
    root.fill(&WHITE).map_err(chart_err)?;
    let x0 = series[0].0;
    let x1 = series[series.len() - 1].0;
    let y_max = series
        .iter()
        .fold(0.0f64, |a, &(_, v)| a.max(v))
        .max(1e-9)
        * 1.1;
    let count_max = counts.values().copied().max().unwrap_or(1).max(1) as f64 * 1.25;

    let mut chart = ChartBuilder::on(root)
        .caption(title, ("sans-serif", 24))
        .margin(10)
        .x_label_area_size(40)
        .y_label_area_size(60)
        .right_y_label_area_size(60)
        .build_cartesian_2d(x0..x1 + 1, 0f64..y_max)
        .map_err(chart_err)?
        .set_secondary_coord(x0..x1 + 1, 0f64..count_max);

    chart
        .configure_mesh()
        .x_desc("Year")
        .y_desc(label)
        .draw()
        .map_err(chart_err)?;
    chart
        .configure_secondary_axes()
        .y_desc("Texts")
        .draw()
        .map_err(chart_err)?;

    chart
        .draw_secondary_series(
            counts
                .iter()
                .filter(|&(&year, _)| year >= x0 && year <= x1)
                .map(|(&year, &n)| {
                    Rectangle::new([(year, 0.0), (year + 1, n as f64)], BLUE.mix(0.15).filled())
                }),
        )
        .map_err(chart_err)?;
    chart
        .draw_series(LineSeries::new(series.iter().copied(), &RED))
        .map_err(chart_err)?;
    chart
        .draw_series(
            series
                .iter()
                .map(|&(x, y)| Circle::new((x, y), 3, RED.filled())),
        )
        .map_err(chart_err)?;

    root.present().map_err(chart_err)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn sample_matrix() -> ResultMatrix {
        ResultMatrix {
            rows: vec![1999, 2000],
            columns: vec!["synergy".to_string(), "leverage".to_string()],
            values: vec![vec![1.0, 1.0], vec![2.0, 0.0]],
        }
    }

    #[test]
    fn safe_cell_neutralizes_formula_starts() {
        assert_eq!(
            csv_safe_cell("=HYPERLINK(\"http://x\")".to_string()),
            "'=HYPERLINK(\"http://x\")"
        );
        assert_eq!(csv_safe_cell("+1".to_string()), "'+1");
        assert_eq!(csv_safe_cell("-x".to_string()), "'-x");
        assert_eq!(csv_safe_cell("@cmd".to_string()), "'@cmd");
    }

    #[test]
    fn safe_cell_leaves_normal_and_prefixed_cells_alone() {
        assert_eq!(csv_safe_cell("normal".to_string()), "normal");
        assert_eq!(csv_safe_cell("'@SAFE".to_string()), "'@SAFE");
    }

    #[test]
    fn counts_format_as_integers_and_means_as_floats() {
        assert_eq!(format_value(3.0), "3");
        assert_eq!(format_value(0.0), "0");
        assert_eq!(format_value(0.25), "0.250000");
    }

    #[test]
    fn matrix_csv_roundtrip_with_sample_counts() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("by_year.csv");
        let counts: BTreeMap<i32, usize> = [(1999, 1), (2000, 1)].into_iter().collect();

        write_matrix_csv(&sample_matrix(), Some(&counts), &path, ExportFormat::Csv).unwrap();

        let raw = fs::read_to_string(&path).unwrap();
        let mut lines = raw.lines();
        assert_eq!(lines.next(), Some("year,synergy,leverage,sample_count"));
        assert_eq!(lines.next(), Some("1999,1,1,1"));
        assert_eq!(lines.next(), Some("2000,2,0,1"));
    }

    #[test]
    fn matrix_tsv_uses_tab_delimiter() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("by_year.tsv");
        write_matrix_csv(&sample_matrix(), None, &path, ExportFormat::Tsv).unwrap();
        let raw = fs::read_to_string(&path).unwrap();
        assert!(raw.starts_with("year\tsynergy\tleverage"));
    }

    #[test]
    fn year_stats_csv_shape() {
        let mut aggregates = BTreeMap::new();
        aggregates.insert(
            2010,
            YearlyAggregate {
                year: 2010,
                per_label: [("x".to_string(), 0.4)].into_iter().collect(),
                std_dev: [("x".to_string(), 0.2)].into_iter().collect(),
                top_share: BTreeMap::new(),
                sample_count: 3,
            },
        );
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stats.csv");
        write_year_stats_csv(&aggregates, &["x".to_string()], &path).unwrap();

        let raw = fs::read_to_string(&path).unwrap();
        let mut lines = raw.lines();
        assert_eq!(lines.next(), Some("year,mean_x,std_x,sample_count"));
        assert_eq!(lines.next(), Some("2010,0.400000,0.200000,3"));
    }

    #[test]
    fn heatmap_svg_ticks_match_matrix_orderings() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("heat.svg");
        render_heatmap(&sample_matrix(), "test heatmap", &path).unwrap();

        let svg = fs::read_to_string(&path).unwrap();
        assert!(svg.contains("1999"));
        assert!(svg.contains("2000"));
        assert!(svg.contains("synergy"));
        assert!(svg.contains("leverage"));
    }

    #[test]
    fn heatmap_rejects_empty_matrix() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("heat.svg");
        let empty = ResultMatrix {
            rows: vec![],
            columns: vec![],
            values: vec![],
        };
        assert!(matches!(
            render_heatmap(&empty, "x", &path),
            Err(TrendError::Render(_))
        ));
    }

    #[test]
    fn trend_svg_renders_known_label() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("trend.svg");
        let counts: BTreeMap<i32, usize> = [(1999, 4), (2000, 2)].into_iter().collect();
        render_trend(&sample_matrix(), &counts, "synergy", "trend", &path).unwrap();
        assert!(fs::read_to_string(&path).unwrap().contains("svg"));
    }

    #[test]
    fn trend_fails_for_unknown_label() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("trend.svg");
        let counts = BTreeMap::new();
        assert!(matches!(
            render_trend(&sample_matrix(), &counts, "nope", "trend", &path),
            Err(TrendError::Render(_))
        ));
    }

    #[test]
    fn heat_color_endpoints() {
        assert_eq!(heat_color(0.0), RGBColor(68, 1, 84));
        assert_eq!(heat_color(1.0), RGBColor(253, 231, 37));
    }
}
