use log::{debug, warn};

use super::error::ConfigError;
use super::policy::{classify_warning, plan_withdrawal};
use super::types::{
    GuardrailAction, Phase, SimulationConfig, SimulationResult, SimulationSummary,
    TargetDescription, WarningLevel, YearRecord,
};

#[derive(Debug)]
struct SimulationState {
    assets: f64,
    phase: Phase,
    prior_return: f64,
    total_saved: f64,
    total_withdrawn: f64,
    retire_start_year: Option<i32>,
    accumulation_years: u32,
    safe: bool,
    warning_years: Vec<i32>,
}

impl SimulationState {
    fn new(config: &SimulationConfig) -> Self {
        Self {
            assets: config.initial_assets,
            phase: Phase::Saving,
            prior_return: config.initial_prior_return,
            total_saved: 0.0,
            total_withdrawn: 0.0,
            retire_start_year: None,
            accumulation_years: 0,
            safe: true,
            warning_years: Vec::new(),
        }
    }

    /// One-way switch into retirement once a saving year ends at or above target.
    fn check_transition(&mut self, target_assets: f64, year: i32) {
        if self.phase != Phase::Saving {
            return;
        }
        if self.assets >= target_assets {
            self.phase = Phase::Retirement;
            self.retire_start_year = Some(year);
            debug!(
                "target {target_assets:.2} reached in {year} with assets {:.2}",
                self.assets
            );
        } else {
            self.accumulation_years += 1;
        }
    }
}

/// Runs the life-cycle simulation over the first `config.years` entries of
/// `returns`. Rejected configurations produce no records.
pub fn simulate(
    config: &SimulationConfig,
    returns: &[f64],
) -> Result<SimulationResult, ConfigError> {
    config.validate()?;

    let years = config.years as usize;
    if returns.len() < years {
        return Err(ConfigError::InsufficientReturns {
            expected: years,
            actual: returns.len(),
        });
    }

    let target_assets = config.target_assets();
    let mut state = SimulationState::new(config);
    let mut records = Vec::with_capacity(years);

    for (index, &return_rate) in returns[..years].iter().enumerate() {
        let year = config
            .year_label(index)
            .ok_or(ConfigError::invalid("start_year", "year label overflows"))?;
        records.push(step_year(config, target_assets, &mut state, year, return_rate));
    }

    let summary = build_summary(config, target_assets, state);
    Ok(SimulationResult { records, summary })
}

fn step_year(
    config: &SimulationConfig,
    target_assets: f64,
    state: &mut SimulationState,
    year: i32,
    return_rate: f64,
) -> YearRecord {
    let start_assets = state.assets;
    let step_phase = state.phase;

    let (cash_flow, withdrawal, guardrail) = match step_phase {
        Phase::Saving => (config.annual_saving, 0.0, GuardrailAction::None),
        Phase::Retirement => {
            let decision = plan_withdrawal(config, target_assets, start_assets, state.prior_return);
            (decision.cash_flow, decision.withdrawal, decision.action)
        }
    };

    state.assets = start_assets * (1.0 + return_rate) + cash_flow;

    match step_phase {
        Phase::Saving => {
            state.total_saved += config.annual_saving;
            state.check_transition(target_assets, year);
        }
        Phase::Retirement => state.total_withdrawn += withdrawal,
    }

    let progress = (state.assets / target_assets).min(1.0);
    let warning_level = match state.phase {
        Phase::Retirement => classify_warning(progress, &config.guardrail),
        Phase::Saving => WarningLevel::None,
    };
    if warning_level != WarningLevel::None {
        state.warning_years.push(year);
    }
    if warning_level == WarningLevel::Severe {
        state.safe = false;
        warn!("{year}: progress {progress:.4} below severe threshold");
    }

    state.prior_return = return_rate;

    YearRecord {
        year,
        start_assets,
        end_assets: state.assets,
        cash_flow,
        withdrawal,
        guardrail,
        phase: state.phase,
        return_rate,
        progress,
        warning_level,
        warning_message: warning_level.message().to_string(),
    }
}

fn build_summary(
    config: &SimulationConfig,
    target_assets: f64,
    state: SimulationState,
) -> SimulationSummary {
    let retired = state.retire_start_year.is_some();
    let safe = if retired {
        state.safe
    } else {
        state.assets >= target_assets
    };

    SimulationSummary {
        start_year: config.start_year,
        retire_start_year: state.retire_start_year,
        accumulation_years: state.accumulation_years,
        final_assets: state.assets,
        total_years: config.years,
        safe,
        retired,
        warning_years: state.warning_years,
        total_saved: state.total_saved,
        total_withdrawn: state.total_withdrawn,
        net_gain: state.assets - state.total_saved + state.total_withdrawn,
        target: TargetDescription {
            annual_spending: config.annual_spending,
            withdrawal_rate: config.withdrawal_rate,
            target_assets,
        },
    }
}
