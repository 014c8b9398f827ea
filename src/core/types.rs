use serde::Serialize;

use super::error::ConfigError;

#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    Saving,
    Retirement,
}

/// Guardrail tier applied to a year's withdrawal. `None` covers saving years
/// and retirement years with guardrails switched off.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum GuardrailAction {
    None,
    Pause,
    Cut,
    Normal,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd)]
pub enum WarningLevel {
    None,
    Mild,
    Severe,
}

impl WarningLevel {
    pub fn as_u8(self) -> u8 {
        match self {
            WarningLevel::None => 0,
            WarningLevel::Mild => 1,
            WarningLevel::Severe => 2,
        }
    }

    pub fn message(self) -> &'static str {
        match self {
            WarningLevel::None => "",
            WarningLevel::Mild => "assets below 80% of target; spending is under pressure",
            WarningLevel::Severe => "assets below 60% of target; depletion risk is high",
        }
    }
}

/// Progress thresholds shared by the guardrail tiers and the warning classifier.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct GuardrailConfig {
    pub enabled: bool,
    pub cut_threshold: f64,
    pub pause_threshold: f64,
    pub cut_fraction: f64,
}

impl Default for GuardrailConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            cut_threshold: 0.8,
            pause_threshold: 0.6,
            cut_fraction: 0.20,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SimulationConfig {
    pub annual_spending: f64,
    pub withdrawal_rate: f64,
    pub initial_assets: f64,
    pub annual_saving: f64,
    pub years: u32,
    pub sensitivity_k: f64,
    pub post_income: f64,
    pub retire_injection: f64,
    pub guardrail: GuardrailConfig,
    pub start_year: i32,
    pub initial_prior_return: f64,
}

impl SimulationConfig {
    /// Assets needed to fund `annual_spending` at `withdrawal_rate`.
    pub fn target_assets(&self) -> f64 {
        self.annual_spending / self.withdrawal_rate
    }

    /// Calendar label of the `index`-th simulated year, if it fits in `i32`.
    pub fn year_label(&self, index: usize) -> Option<i32> {
        i32::try_from(index)
            .ok()
            .and_then(|offset| self.start_year.checked_add(offset))
    }

    fn last_year(&self) -> Option<i32> {
        let span = usize::try_from(self.years.checked_sub(1)?).ok()?;
        self.year_label(span)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.annual_spending.is_finite() || self.annual_spending <= 0.0 {
            return Err(ConfigError::invalid("annual_spending", "must be > 0"));
        }
        if !self.withdrawal_rate.is_finite()
            || self.withdrawal_rate <= 0.0
            || self.withdrawal_rate > 1.0
        {
            return Err(ConfigError::invalid(
                "withdrawal_rate",
                "must be in (0, 1]",
            ));
        }
        for (field, value) in [
            ("initial_assets", self.initial_assets),
            ("annual_saving", self.annual_saving),
            ("sensitivity_k", self.sensitivity_k),
            ("post_income", self.post_income),
            ("retire_injection", self.retire_injection),
        ] {
            if !value.is_finite() || value < 0.0 {
                return Err(ConfigError::invalid(field, "must be a finite value >= 0"));
            }
        }
        if self.years == 0 {
            return Err(ConfigError::invalid("years", "must be > 0"));
        }
        if self.last_year().is_none() {
            return Err(ConfigError::invalid(
                "start_year",
                "plus years runs past the last representable year",
            ));
        }
        if !self.initial_prior_return.is_finite() {
            return Err(ConfigError::invalid("initial_prior_return", "must be finite"));
        }

        let guardrail = &self.guardrail;
        if !(0.0..=1.0).contains(&guardrail.cut_fraction) {
            return Err(ConfigError::invalid(
                "guardrail_cut_fraction",
                "must be between 0 and 1",
            ));
        }
        if !guardrail.pause_threshold.is_finite()
            || !guardrail.cut_threshold.is_finite()
            || guardrail.pause_threshold < 0.0
            || guardrail.pause_threshold > guardrail.cut_threshold
        {
            return Err(ConfigError::invalid(
                "guardrail_pause_threshold",
                "must be >= 0 and <= guardrail_cut_threshold",
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct YearRecord {
    pub year: i32,
    pub start_assets: f64,
    pub end_assets: f64,
    pub cash_flow: f64,
    /// Gross withdrawal before income and injections; zero in saving years.
    pub withdrawal: f64,
    pub guardrail: GuardrailAction,
    pub phase: Phase,
    pub return_rate: f64,
    pub progress: f64,
    pub warning_level: WarningLevel,
    pub warning_message: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TargetDescription {
    pub annual_spending: f64,
    pub withdrawal_rate: f64,
    pub target_assets: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SimulationSummary {
    pub start_year: i32,
    pub retire_start_year: Option<i32>,
    pub accumulation_years: u32,
    pub final_assets: f64,
    pub total_years: u32,
    pub safe: bool,
    pub retired: bool,
    pub warning_years: Vec<i32>,
    pub total_saved: f64,
    pub total_withdrawn: f64,
    pub net_gain: f64,
    pub target: TargetDescription,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SimulationResult {
    pub records: Vec<YearRecord>,
    pub summary: SimulationSummary,
}
