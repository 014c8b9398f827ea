use axum::{
    Router,
    extract::{Json, Query, rejection::JsonRejection},
    http::{StatusCode, Uri, header},
    response::{IntoResponse, Response},
    routing::get,
};
use clap::Parser;
use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::ffi::OsString;
use std::net::SocketAddr;
use std::path::PathBuf;
use thiserror::Error;
use tokio::net::TcpListener;

use crate::core::{ConfigError, GuardrailConfig, SimulationConfig, SimulationResult, simulate};
use crate::report::{ExportDocument, ExportError, export_document, render_table, write_json};
use crate::returns::{ReturnSource, ReturnSourceError};

#[derive(Debug, Error)]
pub enum RunError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Returns(#[from] ReturnSourceError),
    #[error("failed to write {}: {source}", path.display())]
    Output {
        path: PathBuf,
        #[source]
        source: ExportError,
    },
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct SimulatePayload {
    #[serde(alias = "expense")]
    annual_spending: Option<f64>,
    #[serde(alias = "rate")]
    withdrawal_rate: Option<f64>,
    #[serde(alias = "assets")]
    initial_assets: Option<f64>,
    #[serde(alias = "saving")]
    annual_saving: Option<f64>,
    years: Option<u32>,
    #[serde(alias = "sensitivity")]
    k: Option<f64>,
    post_income: Option<f64>,
    retire_injection: Option<f64>,
    guardrail: Option<bool>,
    growth: Option<f64>,
    mu: Option<f64>,
    sigma: Option<f64>,
    seed: Option<u64>,
    returns: Option<Vec<f64>>,
    start_year: Option<i32>,
    init_return: Option<f64>,
}

#[derive(Parser, Debug, Clone)]
#[command(
    name = "lifecycle",
    about = "Saving-to-retirement asset simulation with return-sensitive withdrawals and guardrails"
)]
struct Cli {
    #[arg(short = 'e', long, help = "Target annual spending in retirement")]
    expense: f64,
    #[arg(short = 'r', long, help = "Target withdrawal rate as a fraction, e.g. 0.04")]
    rate: f64,
    #[arg(short = 'a', long, help = "Current total assets")]
    assets: f64,
    #[arg(short = 's', long, help = "Annual saving during accumulation")]
    saving: f64,
    #[arg(short = 'y', long, default_value_t = 40, help = "Years to simulate")]
    years: u32,
    #[arg(
        short = 'k',
        long,
        default_value_t = 0.8,
        help = "Sensitivity of retirement withdrawals to last year's return"
    )]
    k: f64,
    #[arg(long, default_value_t = 0.0, help = "Annual side income during retirement")]
    post_income: f64,
    #[arg(
        long,
        default_value_t = 0.0,
        help = "Capital injected in years where the guardrail pauses withdrawals"
    )]
    retire_injection: f64,
    #[arg(long, help = "Disable the cut/pause withdrawal guardrails")]
    no_guardrail: bool,
    #[arg(
        short = 'g',
        long,
        default_value_t = 0.07,
        allow_negative_numbers = true,
        help = "Constant annual return"
    )]
    growth: f64,
    #[arg(long, help = "CSV file with a `return` column, one row per year")]
    csv: Option<PathBuf>,
    #[arg(
        long,
        allow_negative_numbers = true,
        help = "Mean of normally distributed annual returns"
    )]
    mu: Option<f64>,
    #[arg(long, help = "Standard deviation of annual returns, defaults to 0")]
    sigma: Option<f64>,
    #[arg(long, help = "Seed for random returns; omitted means a fresh draw each run")]
    seed: Option<u64>,
    #[arg(long, default_value = "progress.json", help = "JSON export path")]
    json_out: PathBuf,
    #[arg(long, default_value_t = 2025, help = "Calendar year of the first simulated year")]
    start_year: i32,
    #[arg(
        long,
        allow_negative_numbers = true,
        help = "Prior-year return seeding the first withdrawal, defaults to --growth"
    )]
    init_return: Option<f64>,
    #[arg(short = 'q', long, help = "Skip the yearly table on stdout")]
    quiet: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PreparedRun {
    pub config: SimulationConfig,
    pub source: ReturnSource,
    pub json_out: PathBuf,
    pub quiet: bool,
}

impl PreparedRun {
    pub fn execute(&self) -> Result<SimulationResult, RunError> {
        let returns = self.source.materialize(self.config.years as usize)?;
        Ok(simulate(&self.config, &returns)?)
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SimulateResponse {
    return_source: &'static str,
    #[serde(flatten)]
    document: ExportDocument,
}

#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: String,
}

fn build_run(cli: Cli) -> Result<PreparedRun, ConfigError> {
    let source = ReturnSource::select(cli.growth, cli.csv, cli.mu, cli.sigma, cli.seed)?;
    let config = SimulationConfig {
        annual_spending: cli.expense,
        withdrawal_rate: cli.rate,
        initial_assets: cli.assets,
        annual_saving: cli.saving,
        years: cli.years,
        sensitivity_k: cli.k,
        post_income: cli.post_income,
        retire_injection: cli.retire_injection,
        guardrail: GuardrailConfig {
            enabled: !cli.no_guardrail,
            ..GuardrailConfig::default()
        },
        start_year: cli.start_year,
        initial_prior_return: cli.init_return.unwrap_or(cli.growth),
    };
    config.validate()?;

    Ok(PreparedRun {
        config,
        source,
        json_out: cli.json_out,
        quiet: cli.quiet,
    })
}

/// Parses command-line arguments, runs the simulation, prints the table and
/// writes the JSON export.
pub fn run_cli<I, T>(args: I) -> Result<SimulationResult, RunError>
where
    I: IntoIterator<Item = T>,
    T: Into<OsString> + Clone,
{
    let run = build_run(Cli::parse_from(args))?;
    let result = run.execute()?;

    if !run.quiet {
        print!("{}", render_table(&result));
    }

    write_json(&run.json_out, &export_document(&result)).map_err(|source| RunError::Output {
        path: run.json_out.clone(),
        source,
    })?;
    info!("exported {} records to {}", result.records.len(), run.json_out.display());
    println!("Exported JSON: {}", run.json_out.display());
    Ok(result)
}

pub async fn run_http_server(port: u16) -> std::io::Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let app = Router::new()
        .route("/health", get(health_handler))
        .route(
            "/api/simulate",
            get(simulate_get_handler).post(simulate_post_handler),
        )
        .fallback(not_found_handler);

    let listener = TcpListener::bind(addr).await?;
    info!("lifecycle HTTP API listening on http://{addr}");
    println!("Local access: http://127.0.0.1:{port}/api/simulate");

    axum::serve(listener, app).await
}

async fn health_handler() -> &'static str {
    "ok"
}

async fn not_found_handler() -> Response {
    error_response(StatusCode::NOT_FOUND, "Not found")
}

/// Query strings carry scalars only; an explicit `returns` list needs POST.
async fn simulate_get_handler(uri: Uri) -> Response {
    if query_has_key(&uri, "returns") {
        return error_response(
            StatusCode::BAD_REQUEST,
            "returns is only accepted in a POST body",
        );
    }
    match Query::<SimulatePayload>::try_from_uri(&uri) {
        Ok(Query(payload)) => simulate_handler_impl(payload).await,
        Err(rejection) => error_response(
            StatusCode::BAD_REQUEST,
            &format!("Invalid query: {}", rejection.body_text()),
        ),
    }
}

fn query_has_key(uri: &Uri, key: &str) -> bool {
    uri.query().is_some_and(|query| {
        query
            .split('&')
            .any(|pair| pair.split('=').next() == Some(key))
    })
}

async fn simulate_post_handler(
    payload: Result<Json<SimulatePayload>, JsonRejection>,
) -> Response {
    match payload {
        Ok(Json(payload)) => simulate_handler_impl(payload).await,
        Err(rejection) => error_response(
            StatusCode::BAD_REQUEST,
            &format!("Invalid API JSON payload: {}", rejection.body_text()),
        ),
    }
}

async fn simulate_handler_impl(payload: SimulatePayload) -> Response {
    let run = match api_run_from_payload(payload) {
        Ok(run) => run,
        Err(err) => return error_response(StatusCode::BAD_REQUEST, &err.to_string()),
    };

    match run.execute() {
        Ok(result) => json_response(
            StatusCode::OK,
            SimulateResponse {
                return_source: run.source.label(),
                document: export_document(&result),
            },
        ),
        Err(err) => {
            warn!("rejected simulation request: {err}");
            error_response(StatusCode::BAD_REQUEST, &err.to_string())
        }
    }
}

fn json_response<T: Serialize>(status: StatusCode, body: T) -> Response {
    let mut response = (status, Json(body)).into_response();
    response.headers_mut().insert(
        header::CACHE_CONTROL,
        "no-store".parse().expect("valid header"),
    );
    response
}

fn error_response(status: StatusCode, msg: &str) -> Response {
    json_response(
        status,
        ErrorResponse {
            error: msg.to_string(),
        },
    )
}

#[cfg(test)]
fn api_run_from_json(json: &str) -> Result<PreparedRun, String> {
    let payload = serde_json::from_str::<SimulatePayload>(json)
        .map_err(|e| format!("Invalid API JSON payload: {e}"))?;
    api_run_from_payload(payload).map_err(|e| e.to_string())
}

fn api_run_from_payload(payload: SimulatePayload) -> Result<PreparedRun, ConfigError> {
    let mut cli = default_cli_for_api();

    if let Some(v) = payload.annual_spending {
        cli.expense = v;
    }
    if let Some(v) = payload.withdrawal_rate {
        cli.rate = v;
    }
    if let Some(v) = payload.initial_assets {
        cli.assets = v;
    }
    if let Some(v) = payload.annual_saving {
        cli.saving = v;
    }
    if let Some(v) = payload.years {
        cli.years = v;
    }
    if let Some(v) = payload.k {
        cli.k = v;
    }
    if let Some(v) = payload.post_income {
        cli.post_income = v;
    }
    if let Some(v) = payload.retire_injection {
        cli.retire_injection = v;
    }
    if let Some(v) = payload.guardrail {
        cli.no_guardrail = !v;
    }
    if let Some(v) = payload.growth {
        cli.growth = v;
    }
    if let Some(v) = payload.mu {
        cli.mu = Some(v);
    }
    if let Some(v) = payload.sigma {
        cli.sigma = Some(v);
    }
    if let Some(v) = payload.seed {
        cli.seed = Some(v);
    }
    if let Some(v) = payload.start_year {
        cli.start_year = v;
    }
    if let Some(v) = payload.init_return {
        cli.init_return = Some(v);
    }

    let mut run = build_run(cli)?;
    if let Some(returns) = payload.returns {
        if payload.mu.is_some() {
            return Err(ConfigError::ConflictingReturnSources);
        }
        run.source = ReturnSource::Explicit(returns);
    }
    Ok(run)
}

fn default_cli_for_api() -> Cli {
    Cli {
        expense: 40_000.0,
        rate: 0.04,
        assets: 100_000.0,
        saving: 30_000.0,
        years: 40,
        k: 0.8,
        post_income: 0.0,
        retire_injection: 0.0,
        no_guardrail: false,
        growth: 0.07,
        csv: None,
        mu: None,
        sigma: None,
        seed: None,
        json_out: PathBuf::from("progress.json"),
        start_year: 2025,
        init_return: None,
        quiet: true,
    }
}
