use super::types::{GuardrailAction, GuardrailConfig, SimulationConfig, WarningLevel};

/// Outcome of one retirement year's withdrawal decision.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WithdrawalDecision {
    pub withdrawal: f64,
    pub cash_flow: f64,
    pub action: GuardrailAction,
    /// Start-of-year assets over target; drives tier selection.
    pub primary_progress: f64,
}

/// Rate-based withdrawal shifted by how far last year's return sat from the
/// withdrawal rate. Strong years raise it, weak years lower it.
pub fn base_withdrawal(config: &SimulationConfig, start_assets: f64, prior_return: f64) -> f64 {
    start_assets * config.withdrawal_rate
        + config.sensitivity_k * start_assets * (prior_return - config.withdrawal_rate)
}

pub fn select_tier(primary_progress: f64, guardrail: &GuardrailConfig) -> GuardrailAction {
    if !guardrail.enabled {
        return GuardrailAction::None;
    }
    if primary_progress < guardrail.pause_threshold {
        GuardrailAction::Pause
    } else if primary_progress < guardrail.cut_threshold {
        GuardrailAction::Cut
    } else {
        GuardrailAction::Normal
    }
}

pub fn plan_withdrawal(
    config: &SimulationConfig,
    target_assets: f64,
    start_assets: f64,
    prior_return: f64,
) -> WithdrawalDecision {
    let base = base_withdrawal(config, start_assets, prior_return);
    let primary_progress = start_assets / target_assets;
    let action = select_tier(primary_progress, &config.guardrail);

    let (withdrawal, cash_flow) = match action {
        GuardrailAction::Pause => (0.0, config.retire_injection + config.post_income),
        GuardrailAction::Cut => {
            let withdrawal = base * (1.0 - config.guardrail.cut_fraction);
            (withdrawal, -withdrawal + config.post_income)
        }
        GuardrailAction::Normal | GuardrailAction::None => (base, -base + config.post_income),
    };

    WithdrawalDecision {
        withdrawal,
        cash_flow,
        action,
        primary_progress,
    }
}

/// Classifies realized end-of-year progress. Independent of whether the
/// guardrail tiers are enabled.
pub fn classify_warning(progress: f64, guardrail: &GuardrailConfig) -> WarningLevel {
    if progress < guardrail.pause_threshold {
        WarningLevel::Severe
    } else if progress < guardrail.cut_threshold {
        WarningLevel::Mild
    } else {
        WarningLevel::None
    }
}
