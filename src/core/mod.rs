mod engine;
mod error;
mod policy;
mod types;

pub use engine::simulate;
pub use error::ConfigError;
pub use policy::{
    WithdrawalDecision, base_withdrawal, classify_warning, plan_withdrawal, select_tier,
};
pub use types::{
    GuardrailAction, GuardrailConfig, Phase, SimulationConfig, SimulationResult,
    SimulationSummary, TargetDescription, WarningLevel, YearRecord,
};
