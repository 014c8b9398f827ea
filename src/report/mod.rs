use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use serde::Serialize;
use thiserror::Error;

use crate::core::{GuardrailAction, Phase, SimulationResult, WarningLevel, YearRecord};

/// Interchange form of a run: whole-unit assets, 4 dp rates, 2 dp money.
#[derive(Debug, Clone, Serialize)]
pub struct ExportDocument {
    pub records: Vec<ExportRecord>,
    pub summary: ExportSummary,
}

#[derive(Debug, Clone, Serialize)]
pub struct ExportRecord {
    pub year: i32,
    pub start_assets: i64,
    pub assets: i64,
    pub progress: f64,
    #[serde(rename = "return")]
    pub return_rate: f64,
    pub phase: Phase,
    pub cash_flow: f64,
    pub withdrawal: f64,
    pub guardrail: GuardrailAction,
    pub warning: bool,
    pub warning_level: u8,
    pub warning_message: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ExportTarget {
    pub annual_spending: f64,
    pub withdraw_rate: f64,
    pub target_assets: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct ExportSummary {
    pub start_year: i32,
    pub retire_year: Option<i32>,
    pub accumulation_years: u32,
    pub final_assets: i64,
    pub total_years: u32,
    pub safe: bool,
    pub retired: bool,
    pub warning_years: Vec<i32>,
    pub total_saved: f64,
    pub total_withdrawn: f64,
    pub net_gain: f64,
    pub target_description: ExportTarget,
}

pub fn export_document(result: &SimulationResult) -> ExportDocument {
    let summary = &result.summary;
    ExportDocument {
        records: result.records.iter().map(export_record).collect(),
        summary: ExportSummary {
            start_year: summary.start_year,
            retire_year: summary.retire_start_year,
            accumulation_years: summary.accumulation_years,
            final_assets: round_whole(summary.final_assets),
            total_years: summary.total_years,
            safe: summary.safe,
            retired: summary.retired,
            warning_years: summary.warning_years.clone(),
            total_saved: round_to(summary.total_saved, 2),
            total_withdrawn: round_to(summary.total_withdrawn, 2),
            net_gain: round_to(summary.net_gain, 2),
            target_description: ExportTarget {
                annual_spending: round_to(summary.target.annual_spending, 2),
                withdraw_rate: round_to(summary.target.withdrawal_rate, 4),
                target_assets: round_to(summary.target.target_assets, 2),
            },
        },
    }
}

fn export_record(record: &YearRecord) -> ExportRecord {
    ExportRecord {
        year: record.year,
        start_assets: round_whole(record.start_assets),
        assets: round_whole(record.end_assets),
        progress: round_to(record.progress, 4),
        return_rate: round_to(record.return_rate, 4),
        phase: record.phase,
        cash_flow: round_to(record.cash_flow, 2),
        withdrawal: round_to(record.withdrawal, 2),
        guardrail: record.guardrail,
        warning: record.warning_level != WarningLevel::None,
        warning_level: record.warning_level.as_u8(),
        warning_message: record.warning_message.clone(),
    }
}

#[derive(Debug, Error)]
pub enum ExportError {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error("failed to encode export: {0}")]
    Json(#[from] serde_json::Error),
}

pub fn write_json(path: &Path, document: &ExportDocument) -> Result<(), ExportError> {
    let mut writer = BufWriter::new(File::create(path)?);
    serde_json::to_writer_pretty(&mut writer, document)?;
    writer.write_all(b"\n")?;
    writer.flush()?;
    Ok(())
}

/// Human-readable year table followed by the run summary.
pub fn render_table(result: &SimulationResult) -> String {
    let summary = &result.summary;
    let target = &summary.target;
    let mut out = String::new();

    out.push_str(&format!(
        "Target: spending {} / withdrawal rate {:.2}% = required assets {}\n\n",
        group_thousands(target.annual_spending),
        target.withdrawal_rate * 100.0,
        group_thousands(target.target_assets),
    ));
    out.push_str(&format!(
        "{:<6} {:>8} {:<10} {:>15} {:>12} {:>15} {:>7}\n",
        "Year", "Return", "Phase", "Start", "Cash flow", "End", "Progress"
    ));

    for record in &result.records {
        let phase = match record.phase {
            Phase::Saving => "saving",
            Phase::Retirement => "retired",
        };
        out.push_str(&format!(
            "{:<6} {:>7.2}% {:<10} {:>15} {:>12} {:>15} {:>6.1}%",
            record.year,
            record.return_rate * 100.0,
            phase,
            group_thousands(record.start_assets),
            group_thousands(record.cash_flow),
            group_thousands(record.end_assets),
            record.progress * 100.0,
        ));
        if record.warning_level != WarningLevel::None {
            out.push_str(&format!("  ! {}", record.warning_message));
        }
        out.push('\n');
    }

    out.push('\n');
    match summary.retire_start_year {
        Some(year) => out.push_str(&format!(
            "Retirement starts in {year} after {} saving years\n",
            summary.accumulation_years
        )),
        None => out.push_str("Target not reached within the horizon\n"),
    }
    out.push_str(&format!(
        "Final assets {} | saved {} | withdrawn {} | net gain {}\n",
        group_thousands(summary.final_assets),
        group_thousands(summary.total_saved),
        group_thousands(summary.total_withdrawn),
        group_thousands(summary.net_gain),
    ));
    out.push_str(&format!(
        "Safe: {} | warning years: {}\n",
        if summary.safe { "yes" } else { "no" },
        summary.warning_years.len()
    ));
    out
}

fn round_to(value: f64, places: i32) -> f64 {
    let scale = 10_f64.powi(places);
    (value * scale).round() / scale
}

fn round_whole(value: f64) -> i64 {
    value.round() as i64
}

fn group_thousands(value: f64) -> String {
    let rounded = round_whole(value);
    let digits = rounded.unsigned_abs().to_string();
    let mut grouped = String::with_capacity(digits.len() + digits.len() / 3 + 1);
    if rounded < 0 {
        grouped.push('-');
    }
    for (idx, ch) in digits.chars().enumerate() {
        if idx > 0 && (digits.len() - idx) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(ch);
    }
    grouped
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{GuardrailConfig, SimulationConfig, simulate};

    fn sample_result() -> SimulationResult {
        let config = SimulationConfig {
            annual_spending: 40_000.0,
            withdrawal_rate: 0.04,
            initial_assets: 1_000_000.0,
            annual_saving: 0.0,
            years: 4,
            sensitivity_k: 0.0,
            post_income: 0.0,
            retire_injection: 10_000.0,
            guardrail: GuardrailConfig::default(),
            start_year: 2030,
            initial_prior_return: 0.07,
        };
        simulate(&config, &[0.0, -0.5, 0.123456, 0.0]).expect("valid run")
    }

    #[test]
    fn group_thousands_inserts_separators() {
        assert_eq!(group_thousands(0.0), "0");
        assert_eq!(group_thousands(999.4), "999");
        assert_eq!(group_thousands(1_000.0), "1,000");
        assert_eq!(group_thousands(1_234_567.6), "1,234,568");
        assert_eq!(group_thousands(-40_000.0), "-40,000");
    }

    #[test]
    fn round_to_applies_decimal_places() {
        assert_eq!(round_to(0.123456, 4), 0.1235);
        assert_eq!(round_to(1234.5678, 2), 1234.57);
        assert_eq!(round_whole(921_600.4), 921_600);
    }

    #[test]
    fn export_document_uses_interchange_field_names() {
        let document = export_document(&sample_result());
        let json = serde_json::to_value(&document).expect("document should serialize");

        let first = &json["records"][0];
        assert_eq!(first["year"], 2030);
        assert_eq!(first["assets"], 1_000_000);
        assert_eq!(first["phase"], "retirement");
        assert_eq!(first["guardrail"], "NONE");
        assert_eq!(first["warning"], false);
        assert_eq!(first["warning_level"], 0);
        assert_eq!(first["warning_message"], "");

        let crash = &json["records"][1];
        assert_eq!(crash["assets"], 460_000);
        assert_eq!(crash["return"], -0.5);
        assert_eq!(crash["cash_flow"], -40_000.0);
        assert_eq!(crash["warning"], true);
        assert_eq!(crash["warning_level"], 2);
        assert_eq!(json["records"][2]["return"], 0.1235);
        assert_eq!(json["records"][2]["guardrail"], "PAUSE");

        let summary = &json["summary"];
        assert_eq!(summary["start_year"], 2030);
        assert_eq!(summary["retire_year"], 2030);
        assert_eq!(summary["accumulation_years"], 0);
        assert_eq!(summary["total_years"], 4);
        assert_eq!(summary["safe"], false);
        assert_eq!(summary["retired"], true);
        assert_eq!(summary["total_withdrawn"], 40_000.0);
        assert_eq!(summary["target_description"]["withdraw_rate"], 0.04);
        assert_eq!(summary["target_description"]["target_assets"], 1_000_000.0);
        assert!(summary["warning_years"].is_array());
    }

    #[test]
    fn never_retired_summary_serializes_null_retire_year() {
        let config = SimulationConfig {
            annual_spending: 40_000.0,
            withdrawal_rate: 0.04,
            initial_assets: 0.0,
            annual_saving: 10_000.0,
            years: 2,
            sensitivity_k: 0.8,
            post_income: 0.0,
            retire_injection: 0.0,
            guardrail: GuardrailConfig::default(),
            start_year: 2025,
            initial_prior_return: 0.07,
        };
        let result = simulate(&config, &[0.07, 0.07]).expect("valid run");
        let json = serde_json::to_value(export_document(&result)).expect("serialize");
        assert!(json["summary"]["retire_year"].is_null());
        assert_eq!(json["summary"]["retired"], false);
        assert_eq!(json["records"][1]["phase"], "saving");
    }

    #[test]
    fn write_json_into_missing_directory_is_io_error() {
        let path = std::env::temp_dir()
            .join(format!("lifecycle-missing-{}", std::process::id()))
            .join("progress.json");
        let err = write_json(&path, &export_document(&sample_result()))
            .expect_err("parent directory does not exist");
        assert!(matches!(err, ExportError::Io(_)));
    }

    #[test]
    fn encoding_errors_keep_their_json_kind() {
        let source = serde_json::from_str::<serde_json::Value>("{").expect_err("truncated json");
        let err = ExportError::from(source);
        assert!(matches!(err, ExportError::Json(_)));
        assert!(err.to_string().starts_with("failed to encode export"));
    }

    #[test]
    fn table_lists_every_year_and_flags_warnings() {
        let table = render_table(&sample_result());
        assert!(table.contains("required assets 1,000,000"));
        for year in 2030..2034 {
            assert!(table.contains(&year.to_string()));
        }
        assert!(table.contains("! assets below 60% of target"));
        assert!(table.contains("Retirement starts in 2030 after 0 saving years"));
        assert!(table.contains("Safe: no"));
    }
}
