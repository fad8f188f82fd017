//! Run controller
//!
//! One run decides between a full bootstrap and an incremental update, then
//! drives every unit of work through fetch, decode, filter, serialize and
//! publish, strictly one after another:
//!
//! ```text
//! Init -> DecidingMode -> Bootstrapping       -> Done
//!                      -> IncrementalUpdating -> Done
//! (any) -> Failed
//! ```
//!
//! The first failing unit ends the run. Units published before it stay in
//! the warehouse.

use chrono::Datelike;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, info_span, warn, Instrument};

use crate::decoder;
use crate::delta::{self, DeltaMode};
use crate::error::EtlError;
use crate::feed::{FeedConfig, FeedFetcher};
use crate::publish::{PublishReceipt, Publisher};
use crate::record::KnownIds;
use crate::serializer;
use crate::warehouse::{TableSchema, Warehouse};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunState {
    Init,
    DecidingMode,
    Bootstrapping,
    IncrementalUpdating,
    Done,
    Failed(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
    /// Load every yearly archive
    Bootstrap,
    /// Load the delta of the recent-changes archive
    Incremental,
}

/// One archive processed end to end
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkUnit {
    Year(i32),
    Recent,
}

impl WorkUnit {
    /// Feed name between the file prefix and suffix
    pub fn feed_name(&self) -> String {
        match self {
            WorkUnit::Year(year) => year.to_string(),
            WorkUnit::Recent => "recent".to_string(),
        }
    }
}

impl fmt::Display for WorkUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WorkUnit::Year(year) => write!(f, "year {year}"),
            WorkUnit::Recent => f.write_str("recent changes"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    DecideMode,
    Fetch,
    Decode,
    Filter,
    Serialize,
    Publish,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Stage::DecideMode => "decide mode",
            Stage::Fetch => "fetch",
            Stage::Decode => "decode",
            Stage::Filter => "filter",
            Stage::Serialize => "serialize",
            Stage::Publish => "publish",
        })
    }
}

/// A failed run, with the stage and unit of work it failed in
#[derive(Error, Debug)]
#[error("{stage} failed{}", unit_suffix(.unit))]
pub struct RunError {
    pub stage: Stage,
    pub unit: Option<WorkUnit>,
    #[source]
    pub source: EtlError,
}

fn unit_suffix(unit: &Option<WorkUnit>) -> String {
    unit.map(|unit| format!(" for {unit}")).unwrap_or_default()
}

/// `map_err` adapter tagging an error with its stage and unit
fn failed<E: Into<EtlError>>(stage: Stage, unit: WorkUnit) -> impl FnOnce(E) -> RunError {
    move |e| RunError::new(stage, Some(unit), e)
}

impl RunError {
    fn new(stage: Stage, unit: Option<WorkUnit>, source: impl Into<EtlError>) -> Self {
        Self {
            stage,
            unit,
            source: source.into(),
        }
    }
}

/// Run parameters taken from configuration
#[derive(Debug, Clone)]
pub struct RunSettings {
    /// Where archives are downloaded and delta files written
    pub staging_dir: PathBuf,
    pub dataset: String,
    pub bucket: String,
    pub first_year: i32,
    /// Row count at or above which the warehouse counts as bootstrapped
    pub bootstrap_threshold: u64,
    /// Last year to bootstrap; `None` uses the current calendar year
    pub current_year: Option<i32>,
}

#[derive(Debug, Clone)]
pub struct UnitOutcome {
    pub unit: WorkUnit,
    /// Records decoded from the archive
    pub fetched: usize,
    /// Records written to the delta file
    pub submitted: usize,
    /// `None` when the delta was empty and nothing was published
    pub published: Option<PublishReceipt>,
}

#[derive(Debug, Clone)]
pub struct RunReport {
    pub mode: RunMode,
    /// Warehouse row count seen when deciding the mode
    pub initial_rows: u64,
    pub units: Vec<UnitOutcome>,
}

impl RunReport {
    pub fn submitted(&self) -> usize {
        self.units.iter().map(|u| u.submitted).sum()
    }

    pub fn published(&self) -> usize {
        self.units.iter().filter(|u| u.published.is_some()).count()
    }
}

pub struct RunController {
    fetcher: Arc<dyn FeedFetcher>,
    warehouse: Arc<dyn Warehouse>,
    publisher: Publisher,
    feed: FeedConfig,
    schema: TableSchema,
    settings: RunSettings,
    state: RunState,
}

impl RunController {
    pub fn new(
        fetcher: Arc<dyn FeedFetcher>,
        warehouse: Arc<dyn Warehouse>,
        publisher: Publisher,
        feed: FeedConfig,
        schema: TableSchema,
        settings: RunSettings,
    ) -> Self {
        Self {
            fetcher,
            warehouse,
            publisher,
            feed,
            schema,
            settings,
            state: RunState::Init,
        }
    }

    pub fn state(&self) -> &RunState {
        &self.state
    }

    fn transition(&mut self, next: RunState) {
        info!(from = ?self.state, to = ?next, "Run state changed");
        self.state = next;
    }

    pub async fn run(&mut self) -> Result<RunReport, RunError> {
        match self.execute().await {
            Ok(report) => {
                self.transition(RunState::Done);
                info!(
                    mode = ?report.mode,
                    units = report.units.len(),
                    submitted = report.submitted(),
                    published = report.published(),
                    "Run complete"
                );
                Ok(report)
            },
            Err(e) => {
                self.transition(RunState::Failed(e.to_string()));
                Err(e)
            },
        }
    }

    async fn execute(&mut self) -> Result<RunReport, RunError> {
        self.transition(RunState::DecidingMode);
        let rows = self.count_rows().await?;

        let (mode, units, delta_mode) = if rows < self.settings.bootstrap_threshold {
            self.transition(RunState::Bootstrapping);
            // A partial earlier bootstrap left rows behind; never submit them twice
            let delta_mode = if rows == 0 {
                DeltaMode::Disabled
            } else {
                DeltaMode::Enabled
            };
            (RunMode::Bootstrap, self.bootstrap_units(), delta_mode)
        } else {
            self.transition(RunState::IncrementalUpdating);
            (RunMode::Incremental, vec![WorkUnit::Recent], DeltaMode::Enabled)
        };

        info!(
            ?mode,
            rows,
            threshold = self.settings.bootstrap_threshold,
            units = units.len(),
            deltas = delta_mode.is_enabled(),
            "Selected run mode"
        );

        // Warehouse identifiers, fetched on first use and shared by every unit
        let mut known = None;
        let mut outcomes = Vec::with_capacity(units.len());
        for unit in units {
            let span = info_span!("unit", unit = %unit);
            outcomes.push(
                self.process_unit(unit, delta_mode, &mut known)
                    .instrument(span)
                    .await?,
            );
        }

        Ok(RunReport {
            mode,
            initial_rows: rows,
            units: outcomes,
        })
    }

    /// Row count of the dataset, creating the dataset when it does not exist
    async fn count_rows(&self) -> Result<u64, RunError> {
        let dataset = &self.settings.dataset;
        match self.warehouse.count_rows(dataset).await {
            Ok(rows) => Ok(rows),
            Err(e) if e.is_not_found() => {
                warn!(dataset, "Dataset not found, creating it");
                self.warehouse
                    .create_dataset(dataset, &self.schema)
                    .await
                    .map_err(|e| RunError::new(Stage::DecideMode, None, e))?;
                Ok(0)
            },
            Err(e) => Err(RunError::new(Stage::DecideMode, None, e)),
        }
    }

    fn bootstrap_units(&self) -> Vec<WorkUnit> {
        let last = self
            .settings
            .current_year
            .unwrap_or_else(|| chrono::Utc::now().year());
        (self.settings.first_year..=last).map(WorkUnit::Year).collect()
    }

    async fn process_unit(
        &self,
        unit: WorkUnit,
        delta_mode: DeltaMode,
        known: &mut Option<KnownIds>,
    ) -> Result<UnitOutcome, RunError> {
        let staging_dir = &self.settings.staging_dir;

        let file_name = self.feed.file_name(&unit.feed_name());
        let archive = self
            .fetcher
            .fetch(&file_name, staging_dir)
            .await
            .map_err(failed(Stage::Fetch, unit))?;

        let batch = decoder::decode(&archive).map_err(failed(Stage::Decode, unit))?;
        let fetched = batch.len();

        let batch = if delta_mode.is_enabled() {
            let ids = match known.take() {
                Some(ids) => ids,
                None => {
                    let ids = self
                        .warehouse
                        .list_ids(&self.settings.dataset)
                        .await
                        .map_err(failed(Stage::Filter, unit))?;
                    info!(known = ids.len(), "Fetched warehouse identifiers");
                    ids
                },
            };
            let filtered = delta::filter(batch, &ids);
            *known = Some(ids);
            filtered
        } else {
            batch
        };
        let submitted = batch.len();
        info!(fetched, submitted, "Computed delta");

        let output = serializer::delta_output_path(staging_dir, &archive);
        let written = serializer::serialize(batch.records(), &output)
            .map_err(failed(Stage::Serialize, unit))?;

        let published = match written {
            Some(path) => Some(
                self.publisher
                    .publish(&path, &self.settings.dataset, &self.settings.bucket)
                    .await
                    .map_err(failed(Stage::Publish, unit))?,
            ),
            None => {
                info!("No new records, nothing to publish");
                None
            },
        };

        Ok(UnitOutcome {
            unit,
            fetched,
            submitted,
            published,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feed::FetchError;

    #[test]
    fn test_feed_names() {
        assert_eq!(WorkUnit::Year(2002).feed_name(), "2002");
        assert_eq!(WorkUnit::Recent.feed_name(), "recent");
    }

    #[test]
    fn test_run_error_names_stage_and_unit() {
        let err = RunError::new(
            Stage::Fetch,
            Some(WorkUnit::Year(2019)),
            FetchError::Status {
                url: "https://nvd.nist.gov/feeds/json/cve/1.1/nvdcve-1.1-2019.json.gz".to_string(),
                status: 503,
            },
        );
        assert_eq!(err.to_string(), "fetch failed for year 2019");

        let cause = std::error::Error::source(&err).map(ToString::to_string).unwrap();
        assert!(cause.contains("HTTP 503"));
    }

    #[test]
    fn test_run_error_without_unit() {
        let err = RunError::new(
            Stage::DecideMode,
            None,
            crate::warehouse::WarehouseError::UnexpectedResponse {
                operation: "count rows",
                reason: "empty".to_string(),
            },
        );
        assert_eq!(err.to_string(), "decide mode failed");
    }
}
