//! Run configuration
//!
//! Every setting is resolved from the environment first, then from the YAML
//! config file, then from its default. `.env` is loaded through `dotenvy`
//! before the environment is read. The result is validated as a whole before
//! any collaborator is built.

use chrono::Datelike;
use serde::Deserialize;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use thiserror::Error;
use tracing::{debug, info};
use url::Url;

use crate::controller::RunSettings;
use crate::feed::FeedConfig;
use crate::storage::StorageConfig;
use crate::warehouse::{BigQueryConfig, SchemaError, TableSchema};

// ============================================================================
// Defaults
// ============================================================================

pub const DEFAULT_CONFIG_FILE: &str = "config.yml";
pub const DEFAULT_URL_BASE: &str = "https://nvd.nist.gov/feeds/json/cve/1.1/";
pub const DEFAULT_FILE_PREFIX: &str = "nvdcve-1.1-";
pub const DEFAULT_FILE_SUFFIX: &str = ".json.gz";
/// Earliest year the feed publishes
pub const DEFAULT_FIRST_YEAR: i32 = 2002;
/// Row count below which the warehouse is considered not yet bootstrapped
pub const DEFAULT_BOOTSTRAP_THRESHOLD: u64 = 100_000;
pub const DEFAULT_WAREHOUSE_TABLE: &str = "nvd";
pub const DEFAULT_WAREHOUSE_API_BASE: &str = "https://bigquery.googleapis.com/bigquery/v2";
pub const DEFAULT_STORAGE_ENDPOINT: &str = "https://storage.googleapis.com";
pub const DEFAULT_STORAGE_REGION: &str = "auto";
pub const DEFAULT_STORAGE_URI_SCHEME: &str = "gs";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("missing required setting `{key}` (set {env} or add it to the config file)")]
    Missing { key: &'static str, env: &'static str },

    #[error("invalid value {value:?} for `{key}`: {reason}")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },

    #[error("cannot read config file {path}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot parse config file {path}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("invalid warehouse schema")]
    Schema(#[from] SchemaError),
}

impl ConfigError {
    fn invalid(key: &'static str, value: impl fmt::Display, reason: impl Into<String>) -> Self {
        Self::Invalid {
            key,
            value: value.to_string(),
            reason: reason.into(),
        }
    }
}

/// A credential that never shows up in logs
#[derive(Clone, PartialEq, Eq)]
pub struct Secret(String);

impl Secret {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Secret(\"***\")")
    }
}

/// Config file layout; every key is optional here and checked in [`EtlConfig::resolve`]
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FileConfig {
    pub local_path: Option<PathBuf>,
    pub bucket_name: Option<String>,
    pub project: Option<String>,
    pub dataset: Option<String>,
    pub nvd_schema: Option<PathBuf>,
    pub url_base: Option<String>,
    pub file_prefix: Option<String>,
    pub file_suffix: Option<String>,
    pub first_year: Option<i32>,
    pub bootstrap_threshold: Option<u64>,
    pub warehouse_table: Option<String>,
    pub warehouse_api_base: Option<String>,
    pub warehouse_token: Option<String>,
    pub storage_endpoint: Option<String>,
    pub storage_region: Option<String>,
    pub storage_uri_scheme: Option<String>,
    pub storage_path_style: Option<bool>,
    pub storage_access_key: Option<String>,
    pub storage_secret_key: Option<String>,
}

impl FileConfig {
    pub fn from_path(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn from_yaml(raw: &str) -> Result<Self, serde_yaml::Error> {
        if raw.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(raw)
    }
}

/// Fully resolved and validated settings
#[derive(Debug, Clone)]
pub struct EtlConfig {
    /// Staging directory for downloaded archives and delta files
    pub local_path: PathBuf,
    pub bucket_name: String,
    pub project: String,
    pub dataset: String,
    /// Path of the JSON table schema
    pub nvd_schema: PathBuf,
    /// Always ends with `/`
    pub url_base: String,
    pub file_prefix: String,
    pub file_suffix: String,
    pub first_year: i32,
    pub bootstrap_threshold: u64,
    pub warehouse_table: String,
    pub warehouse_api_base: String,
    pub warehouse_token: Secret,
    /// `None` when configured empty, which selects the AWS endpoint
    pub storage_endpoint: Option<String>,
    pub storage_region: String,
    pub storage_uri_scheme: String,
    pub storage_path_style: bool,
    pub storage_access_key: Option<Secret>,
    pub storage_secret_key: Option<Secret>,
}

impl EtlConfig {
    /// Load `.env`, the config file and the process environment.
    ///
    /// An explicitly given file must exist; the default `./config.yml` may be
    /// absent.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        let file = match path {
            Some(path) => {
                info!(path = %path.display(), "Reading config file");
                FileConfig::from_path(path)?
            },
            None => {
                let default = Path::new(DEFAULT_CONFIG_FILE);
                if default.exists() {
                    info!(path = %default.display(), "Reading config file");
                    FileConfig::from_path(default)?
                } else {
                    debug!("No config file, using environment only");
                    FileConfig::default()
                }
            },
        };

        Self::resolve(file, |key| std::env::var(key).ok())
    }

    /// Merge `file` with values from `lookup` and validate the result
    pub fn resolve<F>(file: FileConfig, lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = Env(lookup);

        let config = Self {
            local_path: env
                .string(&["NVD_LOCAL_PATH"])
                .map(PathBuf::from)
                .or(file.local_path)
                .ok_or(ConfigError::Missing {
                    key: "local_path",
                    env: "NVD_LOCAL_PATH",
                })?,
            bucket_name: required("bucket_name", "NVD_BUCKET_NAME", env.string(&["NVD_BUCKET_NAME"]), file.bucket_name)?,
            project: required("project", "NVD_PROJECT", env.string(&["NVD_PROJECT"]), file.project)?,
            dataset: required("dataset", "NVD_DATASET", env.string(&["NVD_DATASET"]), file.dataset)?,
            nvd_schema: env
                .string(&["NVD_SCHEMA"])
                .map(PathBuf::from)
                .or(file.nvd_schema)
                .ok_or(ConfigError::Missing {
                    key: "nvd_schema",
                    env: "NVD_SCHEMA",
                })?,
            url_base: env
                .string(&["NVD_URL_BASE"])
                .or(file.url_base)
                .unwrap_or_else(|| DEFAULT_URL_BASE.to_string()),
            file_prefix: env
                .string(&["NVD_FILE_PREFIX"])
                .or(file.file_prefix)
                .unwrap_or_else(|| DEFAULT_FILE_PREFIX.to_string()),
            file_suffix: env
                .string(&["NVD_FILE_SUFFIX"])
                .or(file.file_suffix)
                .unwrap_or_else(|| DEFAULT_FILE_SUFFIX.to_string()),
            first_year: env
                .parsed("first_year", &["NVD_FIRST_YEAR"])?
                .or(file.first_year)
                .unwrap_or(DEFAULT_FIRST_YEAR),
            bootstrap_threshold: env
                .parsed("bootstrap_threshold", &["NVD_BOOTSTRAP_THRESHOLD"])?
                .or(file.bootstrap_threshold)
                .unwrap_or(DEFAULT_BOOTSTRAP_THRESHOLD),
            warehouse_table: env
                .string(&["NVD_WAREHOUSE_TABLE"])
                .or(file.warehouse_table)
                .unwrap_or_else(|| DEFAULT_WAREHOUSE_TABLE.to_string()),
            warehouse_api_base: env
                .string(&["NVD_WAREHOUSE_API_BASE"])
                .or(file.warehouse_api_base)
                .unwrap_or_else(|| DEFAULT_WAREHOUSE_API_BASE.to_string()),
            warehouse_token: required(
                "warehouse_token",
                "NVD_WAREHOUSE_TOKEN",
                env.string(&["NVD_WAREHOUSE_TOKEN", "GOOGLE_OAUTH_ACCESS_TOKEN"]),
                file.warehouse_token,
            )
            .map(Secret::new)?,
            storage_endpoint: env
                .raw(&["NVD_STORAGE_ENDPOINT"])
                .or(file.storage_endpoint)
                .map_or(Some(DEFAULT_STORAGE_ENDPOINT.to_string()), non_empty),
            storage_region: env
                .string(&["NVD_STORAGE_REGION"])
                .or(file.storage_region)
                .unwrap_or_else(|| DEFAULT_STORAGE_REGION.to_string()),
            storage_uri_scheme: env
                .string(&["NVD_STORAGE_URI_SCHEME"])
                .or(file.storage_uri_scheme)
                .unwrap_or_else(|| DEFAULT_STORAGE_URI_SCHEME.to_string()),
            storage_path_style: env
                .parsed("storage_path_style", &["NVD_STORAGE_PATH_STYLE"])?
                .or(file.storage_path_style)
                .unwrap_or(true),
            storage_access_key: env
                .string(&["NVD_STORAGE_ACCESS_KEY", "AWS_ACCESS_KEY_ID"])
                .or(file.storage_access_key.and_then(non_empty))
                .map(Secret::new),
            storage_secret_key: env
                .string(&["NVD_STORAGE_SECRET_KEY", "AWS_SECRET_ACCESS_KEY"])
                .or(file.storage_secret_key.and_then(non_empty))
                .map(Secret::new),
        };

        config.validate()
    }

    fn validate(mut self) -> Result<Self, ConfigError> {
        for (key, value) in [
            ("bucket_name", &self.bucket_name),
            ("project", &self.project),
            ("dataset", &self.dataset),
            ("warehouse_table", &self.warehouse_table),
            ("storage_uri_scheme", &self.storage_uri_scheme),
        ] {
            if value.trim().is_empty() {
                return Err(ConfigError::invalid(key, value, "must not be empty"));
            }
        }

        self.url_base = http_url("url_base", &self.url_base)?;
        if !self.url_base.ends_with('/') {
            self.url_base.push('/');
        }
        self.warehouse_api_base = http_url("warehouse_api_base", &self.warehouse_api_base)?
            .trim_end_matches('/')
            .to_string();
        if let Some(endpoint) = &self.storage_endpoint {
            http_url("storage_endpoint", endpoint)?;
        }

        let current_year = chrono::Utc::now().year();
        if self.first_year > current_year {
            return Err(ConfigError::invalid(
                "first_year",
                self.first_year,
                format!("must not be after the current year {current_year}"),
            ));
        }

        match (&self.storage_access_key, &self.storage_secret_key) {
            (Some(_), None) => {
                return Err(ConfigError::invalid(
                    "storage_secret_key",
                    "",
                    "storage_access_key is set, the secret key must be set too",
                ));
            },
            (None, Some(_)) => {
                return Err(ConfigError::invalid(
                    "storage_access_key",
                    "",
                    "storage_secret_key is set, the access key must be set too",
                ));
            },
            _ => {},
        }

        Ok(self)
    }

    /// Parse and validate the warehouse table schema
    pub fn load_schema(&self) -> Result<TableSchema, ConfigError> {
        let schema = TableSchema::from_file(&self.nvd_schema)?;
        info!(
            path = %self.nvd_schema.display(),
            columns = schema.column_count(),
            "Loaded warehouse schema"
        );
        Ok(schema)
    }

    pub fn storage_config(&self) -> StorageConfig {
        StorageConfig {
            endpoint: self.storage_endpoint.clone(),
            region: self.storage_region.clone(),
            access_key: self.storage_access_key.clone(),
            secret_key: self.storage_secret_key.clone(),
            path_style: self.storage_path_style,
            uri_scheme: self.storage_uri_scheme.clone(),
        }
    }

    pub fn feed_config(&self) -> FeedConfig {
        FeedConfig {
            url_base: self.url_base.clone(),
            file_prefix: self.file_prefix.clone(),
            file_suffix: self.file_suffix.clone(),
        }
    }

    pub fn warehouse_config(&self) -> BigQueryConfig {
        BigQueryConfig {
            api_base: self.warehouse_api_base.clone(),
            project: self.project.clone(),
            table: self.warehouse_table.clone(),
            token: self.warehouse_token.clone(),
        }
    }

    pub fn run_settings(&self) -> RunSettings {
        RunSettings {
            staging_dir: self.local_path.clone(),
            dataset: self.dataset.clone(),
            bucket: self.bucket_name.clone(),
            first_year: self.first_year,
            bootstrap_threshold: self.bootstrap_threshold,
            current_year: None,
        }
    }
}

/// Environment accessor; the first of several aliases that is set wins
struct Env<F>(F);

impl<F: Fn(&str) -> Option<String>> Env<F> {
    /// Value as set, including empty strings
    fn raw(&self, names: &[&str]) -> Option<String> {
        names.iter().find_map(|name| (self.0)(name))
    }

    /// Value with surrounding whitespace removed; empty counts as unset
    fn string(&self, names: &[&str]) -> Option<String> {
        names
            .iter()
            .find_map(|name| (self.0)(name).map(|v| v.trim().to_string()).and_then(non_empty))
    }

    fn parsed<T>(&self, key: &'static str, names: &[&str]) -> Result<Option<T>, ConfigError>
    where
        T: FromStr,
        T::Err: fmt::Display,
    {
        self.string(names)
            .map(|value| {
                value
                    .parse()
                    .map_err(|e: T::Err| ConfigError::invalid(key, &value, e.to_string()))
            })
            .transpose()
    }
}

fn required(
    key: &'static str,
    env: &'static str,
    from_env: Option<String>,
    from_file: Option<String>,
) -> Result<String, ConfigError> {
    from_env
        .or(from_file.and_then(non_empty))
        .ok_or(ConfigError::Missing { key, env })
}

fn non_empty(value: String) -> Option<String> {
    if value.trim().is_empty() {
        None
    } else {
        Some(value)
    }
}

fn http_url(key: &'static str, value: &str) -> Result<String, ConfigError> {
    let url = Url::parse(value).map_err(|e| ConfigError::invalid(key, value, e.to_string()))?;
    match url.scheme() {
        "http" | "https" => Ok(value.to_string()),
        other => Err(ConfigError::invalid(
            key,
            value,
            format!("unsupported scheme {other}, expected http or https"),
        )),
    }
}
