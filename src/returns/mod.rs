use std::f64::consts::PI;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

use log::debug;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use thiserror::Error;

use crate::core::ConfigError;

/// Where the per-year return sequence comes from.
#[derive(Debug, Clone, PartialEq)]
pub enum ReturnSource {
    Constant(f64),
    Gaussian {
        mean: f64,
        std_dev: f64,
        seed: Option<u64>,
    },
    Csv(PathBuf),
    Explicit(Vec<f64>),
}

#[derive(Debug, Error)]
pub enum ReturnSourceError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("failed to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("CSV header has no `return` column")]
    MissingColumn,
    #[error("line {line}: invalid return value {value:?}")]
    InvalidValue { line: usize, value: String },
}

impl ReturnSource {
    /// Picks a source the way the CLI flags combine: a CSV file wins, then a
    /// mean for random draws, otherwise the constant growth rate.
    pub fn select(
        growth: f64,
        csv: Option<PathBuf>,
        mean: Option<f64>,
        std_dev: Option<f64>,
        seed: Option<u64>,
    ) -> Result<Self, ConfigError> {
        match (csv, mean) {
            (Some(_), Some(_)) => Err(ConfigError::ConflictingReturnSources),
            (Some(path), None) => Ok(Self::Csv(path)),
            (None, Some(mean)) => Ok(Self::Gaussian {
                mean,
                std_dev: std_dev.unwrap_or(0.0),
                seed,
            }),
            (None, None) => Ok(Self::Constant(growth)),
        }
    }

    pub fn materialize(&self, years: usize) -> Result<Vec<f64>, ReturnSourceError> {
        let returns = match self {
            Self::Constant(rate) => {
                if !rate.is_finite() {
                    return Err(ConfigError::invalid("growth", "must be finite").into());
                }
                vec![*rate; years]
            }
            Self::Gaussian {
                mean,
                std_dev,
                seed,
            } => {
                if !mean.is_finite() {
                    return Err(ConfigError::invalid("mu", "must be finite").into());
                }
                if !std_dev.is_finite() || *std_dev < 0.0 {
                    return Err(ConfigError::invalid("sigma", "must be >= 0").into());
                }
                let rng = match seed {
                    Some(seed) => ChaCha8Rng::seed_from_u64(*seed),
                    None => ChaCha8Rng::from_entropy(),
                };
                let mut sampler = NormalSampler::new(rng);
                (0..years)
                    .map(|_| mean + std_dev * sampler.standard_normal())
                    .collect()
            }
            Self::Csv(path) => read_csv_returns(path, years)?,
            Self::Explicit(values) => {
                if values.iter().any(|v| !v.is_finite()) {
                    return Err(ConfigError::invalid("returns", "must all be finite").into());
                }
                if values.len() < years {
                    return Err(ConfigError::InsufficientReturns {
                        expected: years,
                        actual: values.len(),
                    }
                    .into());
                }
                values[..years].to_vec()
            }
        };
        debug!("materialized {} returns from {}", returns.len(), self.label());
        Ok(returns)
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Constant(_) => "constant",
            Self::Gaussian { .. } => "gaussian",
            Self::Csv(_) => "csv",
            Self::Explicit(_) => "explicit",
        }
    }
}

fn read_csv_returns(path: &Path, years: usize) -> Result<Vec<f64>, ReturnSourceError> {
    let file = File::open(path).map_err(|source| ReturnSourceError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    parse_csv_returns(BufReader::new(file), years).map_err(|err| match err {
        ReturnSourceError::Io { source, .. } => ReturnSourceError::Io {
            path: path.to_path_buf(),
            source,
        },
        other => other,
    })
}

/// Reads the `return` column of a headed CSV, keeping the first `years` rows.
pub fn parse_csv_returns<R: BufRead>(
    reader: R,
    years: usize,
) -> Result<Vec<f64>, ReturnSourceError> {
    let mut column = None;
    let mut returns = Vec::with_capacity(years);

    for (idx, line) in reader.lines().enumerate() {
        let line = line.map_err(|source| ReturnSourceError::Io {
            path: PathBuf::new(),
            source,
        })?;
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let Some(col) = column else {
            column = Some(
                line.split(',')
                    .map(clean_field)
                    .position(|name| name == "return")
                    .ok_or(ReturnSourceError::MissingColumn)?,
            );
            continue;
        };

        if returns.len() == years {
            break;
        }
        let raw = line.split(',').nth(col).map(clean_field).unwrap_or("");
        let value = raw
            .parse::<f64>()
            .ok()
            .filter(|v| v.is_finite())
            .ok_or_else(|| ReturnSourceError::InvalidValue {
                line: idx + 1,
                value: raw.to_string(),
            })?;
        returns.push(value);
    }

    if column.is_none() {
        return Err(ReturnSourceError::MissingColumn);
    }
    if returns.len() < years {
        return Err(ConfigError::InsufficientReturns {
            expected: years,
            actual: returns.len(),
        }
        .into());
    }
    Ok(returns)
}

fn clean_field(field: &str) -> &str {
    field.trim().trim_matches('"').trim()
}

/// Box-Muller normal draws over any uniform source, caching the paired value.
struct NormalSampler<R> {
    rng: R,
    cached_normal: Option<f64>,
}

impl<R: Rng> NormalSampler<R> {
    fn new(rng: R) -> Self {
        Self {
            rng,
            cached_normal: None,
        }
    }

    fn standard_normal(&mut self) -> f64 {
        if let Some(z) = self.cached_normal.take() {
            return z;
        }

        let u1 = self.rng.r#gen::<f64>().max(1e-12);
        let u2 = self.rng.r#gen::<f64>();
        let r = (-2.0 * u1.ln()).sqrt();
        let theta = 2.0 * PI * u2;

        self.cached_normal = Some(r * theta.sin());
        r * theta.cos()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn constant_source_repeats_growth() {
        let returns = ReturnSource::Constant(0.07)
            .materialize(4)
            .expect("constant source");
        assert_eq!(returns, vec![0.07; 4]);
    }

    #[test]
    fn select_prefers_csv_then_mean_then_growth() {
        let csv = ReturnSource::select(0.07, Some(PathBuf::from("r.csv")), None, Some(0.2), None)
            .expect("csv only");
        assert_eq!(csv, ReturnSource::Csv(PathBuf::from("r.csv")));

        let gaussian = ReturnSource::select(0.07, None, Some(0.05), None, Some(3))
            .expect("mean only");
        assert_eq!(
            gaussian,
            ReturnSource::Gaussian {
                mean: 0.05,
                std_dev: 0.0,
                seed: Some(3)
            }
        );

        let constant = ReturnSource::select(0.06, None, None, Some(0.15), None)
            .expect("growth fallback");
        assert_eq!(constant, ReturnSource::Constant(0.06));
    }

    #[test]
    fn select_rejects_csv_with_mean() {
        let err = ReturnSource::select(0.07, Some(PathBuf::from("r.csv")), Some(0.05), None, None)
            .expect_err("must reject conflicting sources");
        assert_eq!(err, ConfigError::ConflictingReturnSources);
    }

    #[test]
    fn seeded_gaussian_is_reproducible() {
        let source = ReturnSource::Gaussian {
            mean: 0.07,
            std_dev: 0.15,
            seed: Some(42),
        };
        let a = source.materialize(50).expect("draws");
        let b = source.materialize(50).expect("draws");
        assert_eq!(a, b);
        assert_eq!(a.len(), 50);
        assert!(a.iter().any(|r| (r - 0.07).abs() > 1e-9));

        let other = ReturnSource::Gaussian {
            mean: 0.07,
            std_dev: 0.15,
            seed: Some(43),
        }
        .materialize(50)
        .expect("draws");
        assert_ne!(a, other);
    }

    #[test]
    fn gaussian_sample_mean_tracks_mu() {
        let returns = ReturnSource::Gaussian {
            mean: 0.05,
            std_dev: 0.10,
            seed: Some(7),
        }
        .materialize(20_000)
        .expect("draws");
        let mean = returns.iter().sum::<f64>() / returns.len() as f64;
        assert!((mean - 0.05).abs() < 0.005, "sample mean {mean}");
    }

    #[test]
    fn zero_sigma_gaussian_is_constant() {
        let returns = ReturnSource::Gaussian {
            mean: 0.04,
            std_dev: 0.0,
            seed: None,
        }
        .materialize(5)
        .expect("draws");
        assert!(returns.iter().all(|r| *r == 0.04));
    }

    #[test]
    fn negative_sigma_is_rejected() {
        let err = ReturnSource::Gaussian {
            mean: 0.04,
            std_dev: -0.1,
            seed: Some(1),
        }
        .materialize(5)
        .expect_err("must reject sigma");
        assert!(err.to_string().contains("sigma"));
    }

    #[test]
    fn csv_reads_return_column_among_others() {
        let data = "year,return,note\n2000,0.05,a\n2001,-0.10,b\n\n2002,\"0.2\",c\n";
        let returns = parse_csv_returns(Cursor::new(data), 3).expect("valid csv");
        assert_eq!(returns, vec![0.05, -0.10, 0.2]);
    }

    #[test]
    fn csv_keeps_only_requested_years() {
        let data = "return\n0.01\n0.02\n0.03\nnot-read\n";
        let returns = parse_csv_returns(Cursor::new(data), 3).expect("valid csv");
        assert_eq!(returns, vec![0.01, 0.02, 0.03]);
    }

    #[test]
    fn csv_without_return_column_is_rejected() {
        let err = parse_csv_returns(Cursor::new("year,rate\n2000,0.1\n"), 1)
            .expect_err("must reject header");
        assert!(matches!(err, ReturnSourceError::MissingColumn));
    }

    #[test]
    fn csv_reports_line_of_bad_value() {
        let err = parse_csv_returns(Cursor::new("return\n0.01\nabc\n"), 2)
            .expect_err("must reject value");
        match err {
            ReturnSourceError::InvalidValue { line, value } => {
                assert_eq!(line, 3);
                assert_eq!(value, "abc");
            }
            other => panic!("unexpected error {other}"),
        }
    }

    #[test]
    fn csv_with_too_few_rows_is_a_config_error() {
        let err = parse_csv_returns(Cursor::new("return\n0.01\n0.02\n0.03\n0.04\n"), 5)
            .expect_err("must reject short csv");
        assert!(matches!(
            err,
            ReturnSourceError::Config(ConfigError::InsufficientReturns {
                expected: 5,
                actual: 4
            })
        ));
    }

    #[test]
    fn missing_csv_file_reports_path() {
        let err = ReturnSource::Csv(PathBuf::from("/nonexistent/returns.csv"))
            .materialize(3)
            .expect_err("must fail to open");
        assert!(err.to_string().contains("/nonexistent/returns.csv"));
    }

    #[test]
    fn explicit_returns_are_truncated_to_horizon() {
        let source = ReturnSource::Explicit(vec![0.1, 0.2, 0.3]);
        assert_eq!(source.materialize(2).expect("enough"), vec![0.1, 0.2]);
        assert!(source.materialize(4).is_err());
    }
}
