use std::fs;
use std::path::{Path, PathBuf};

use clap::{Parser, ValueEnum};
use serde_json::Value;
use thiserror::Error;

use wareflow::{Database, StockPolicy, TenantPolicies};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    Pretty,
    Json,
}

#[derive(Parser, Debug, Clone)]
#[command(
    name = "wareflow-server",
    about = "WareFlow query server",
    allow_negative_numbers = true
)]
pub struct Config {
    /// Address to listen on
    #[arg(long, env = "WAREFLOW_ADDR", default_value = "127.0.0.1:4444")]
    pub addr: String,

    /// Log output format; verbosity comes from RUST_LOG
    #[arg(long, env = "WAREFLOW_LOG_FORMAT", value_enum, default_value_t = LogFormat::Pretty)]
    pub log_format: LogFormat,

    /// Quantity from which a product counts as in stock
    #[arg(long, env = "WAREFLOW_IN_STOCK_MIN", default_value_t = 50)]
    pub in_stock_min: i64,

    /// Quantity up to which a product counts as out of stock
    #[arg(long, env = "WAREFLOW_OUT_OF_STOCK_MAX", default_value_t = 0)]
    pub out_of_stock_max: i64,

    /// JSON file with per-tenant stock policy overrides
    #[arg(long, env = "WAREFLOW_POLICY_FILE")]
    pub policy_file: Option<PathBuf>,

    /// JSON file of `{ collection: [documents] }` loaded at startup; documents keep their `_id`
    #[arg(long, env = "WAREFLOW_SEED")]
    pub seed: Option<PathBuf>,
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("cannot read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("{path} is not valid JSON: {source}")]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error(transparent)]
    Invalid(#[from] wareflow::Error),
}

fn read_json(path: &Path) -> Result<Value, ConfigError> {
    let text = fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_str(&text).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

impl Config {
    /// Flag thresholds are the default policy unless the policy file sets one.
    pub fn policies(&self) -> Result<TenantPolicies, ConfigError> {
        let default = StockPolicy::new(self.in_stock_min, self.out_of_stock_max)?;
        let Some(path) = &self.policy_file else {
            return Ok(TenantPolicies::new(default));
        };
        let mut value = read_json(path)?;
        if let Some(obj) = value.as_object_mut() {
            if !obj.contains_key("default") {
                obj.insert("default".into(), serde_json::to_value(default).map_err(
                    |source| ConfigError::Parse {
                        path: path.clone(),
                        source,
                    },
                )?);
            }
        }
        Ok(TenantPolicies::from_json(&value)?)
    }

    /// Returns the number of documents loaded.
    pub fn load_seed(&self, db: &Database) -> Result<usize, ConfigError> {
        match &self.seed {
            Some(path) => Ok(db.load_fixtures(&read_json(path)?)?),
            None => Ok(0),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Config {
        let mut argv = vec!["wareflow-server"];
        argv.extend_from_slice(args);
        Config::try_parse_from(argv).unwrap()
    }

    #[test]
    fn defaults() {
        let config = parse(&[]);
        assert_eq!(config.addr, "127.0.0.1:4444");
        assert_eq!(config.log_format, LogFormat::Pretty);
        assert_eq!(config.policies().unwrap().default, StockPolicy::default());
    }

    #[test]
    fn thresholds_from_flags() {
        let config = parse(&["--in-stock-min", "20", "--out-of-stock-max", "-1"]);
        let policies = config.policies().unwrap();
        assert_eq!(policies.default.in_stock_min, 20);
        assert_eq!(policies.default.out_of_stock_max, -1);
    }

    #[test]
    fn inverted_thresholds_fail() {
        let config = parse(&["--in-stock-min", "0"]);
        assert!(matches!(config.policies(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn json_log_format() {
        assert_eq!(parse(&["--log-format", "json"]).log_format, LogFormat::Json);
    }

    #[test]
    fn missing_policy_file_is_reported() {
        let config = parse(&["--policy-file", "/nonexistent/wareflow-policies.json"]);
        assert!(matches!(config.policies(), Err(ConfigError::Read { .. })));
    }
}
