//! BigQuery REST client
//!
//! Uses the v2 JSON API directly:
//!
//! - `jobs.query` / `getQueryResults` for counts and identifier listings,
//!   following `jobComplete` and `pageToken`
//! - `datasets.insert` and `tables.insert` for first-run setup
//! - `jobs.insert` with a load configuration for bulk loads
//!
//! Requests carry a bearer access token taken from configuration.

use async_trait::async_trait;
use reqwest::{Response, StatusCode};
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

use super::{LoadJob, TableSchema, Warehouse, WarehouseError};
use crate::config::Secret;
use crate::record::KnownIds;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);
/// Server-side wait per `getQueryResults` call
const QUERY_WAIT_MS: u64 = 10_000;
/// Upper bound on polls for one query before giving up
const MAX_QUERY_POLLS: usize = 360;
const NOT_FOUND_REASON: &str = "notFound";

#[derive(Debug, Clone)]
pub struct BigQueryConfig {
    /// e.g. `https://bigquery.googleapis.com/bigquery/v2`, without trailing `/`
    pub api_base: String,
    pub project: String,
    pub table: String,
    pub token: Secret,
}

pub struct BigQueryClient {
    http: reqwest::Client,
    config: BigQueryConfig,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct QueryResponse {
    #[serde(default)]
    job_complete: bool,
    job_reference: Option<JobReference>,
    #[serde(default)]
    rows: Vec<TableRow>,
    page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct JobReference {
    job_id: String,
    location: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TableRow {
    #[serde(default)]
    f: Vec<TableCell>,
}

#[derive(Debug, Deserialize)]
struct TableCell {
    #[serde(default)]
    v: Value,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct JobResponse {
    job_reference: JobReference,
}

#[derive(Debug, Default, Deserialize)]
struct ErrorEnvelope {
    error: Option<ErrorBody>,
}

#[derive(Debug, Default, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    message: String,
    #[serde(default)]
    errors: Vec<ErrorItem>,
}

#[derive(Debug, Deserialize)]
struct ErrorItem {
    reason: Option<String>,
}

impl BigQueryClient {
    pub fn new(config: BigQueryConfig) -> Result<Self, WarehouseError> {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(WarehouseError::Client)?;
        Ok(Self { http, config })
    }

    fn table_path(&self, dataset: &str) -> String {
        format!("`{}.{}.{}`", self.config.project, dataset, self.config.table)
    }

    fn project_url(&self, suffix: &str) -> String {
        format!("{}/projects/{}/{}", self.config.api_base, self.config.project, suffix)
    }

    async fn post(&self, operation: &'static str, url: &str, body: &Value) -> Result<Response, WarehouseError> {
        self.http
            .post(url)
            .bearer_auth(self.config.token.expose())
            .json(body)
            .send()
            .await
            .map_err(|source| WarehouseError::Request { operation, source })
    }

    /// Run `sql` to completion and collect every row, across all pages
    async fn query_rows(
        &self,
        operation: &'static str,
        dataset: &str,
        sql: &str,
    ) -> Result<Vec<Vec<Value>>, WarehouseError> {
        debug!(sql, "Submitting query");
        let body = json!({
            "query": sql,
            "useLegacySql": false,
            "timeoutMs": QUERY_WAIT_MS,
        });
        let response = self.post(operation, &self.project_url("queries"), &body).await?;
        let mut page: QueryResponse = parse(operation, dataset, response).await?;

        let job = page.job_reference.take().ok_or_else(|| WarehouseError::UnexpectedResponse {
            operation,
            reason: "query response has no jobReference".to_string(),
        })?;

        let mut rows = Vec::new();
        let mut polls = 0usize;
        loop {
            if page.job_complete {
                rows.extend(page.rows.drain(..).map(|row| row.f.into_iter().map(|cell| cell.v).collect()));
                match page.page_token.take() {
                    Some(token) => page = self.query_results(operation, dataset, &job, Some(&token)).await?,
                    None => break,
                }
            } else {
                polls += 1;
                if polls > MAX_QUERY_POLLS {
                    return Err(WarehouseError::UnexpectedResponse {
                        operation,
                        reason: format!("query {} did not complete", job.job_id),
                    });
                }
                debug!(job_id = %job.job_id, polls, "Query still running");
                page = self.query_results(operation, dataset, &job, None).await?;
            }
        }

        debug!(rows = rows.len(), "Query complete");
        Ok(rows)
    }

    async fn query_results(
        &self,
        operation: &'static str,
        dataset: &str,
        job: &JobReference,
        page_token: Option<&str>,
    ) -> Result<QueryResponse, WarehouseError> {
        let mut query = vec![("timeoutMs", QUERY_WAIT_MS.to_string())];
        if let Some(location) = &job.location {
            query.push(("location", location.clone()));
        }
        if let Some(token) = page_token {
            query.push(("pageToken", token.to_string()));
        }

        let response = self
            .http
            .get(self.project_url(&format!("queries/{}", job.job_id)))
            .bearer_auth(self.config.token.expose())
            .query(&query)
            .send()
            .await
            .map_err(|source| WarehouseError::Request { operation, source })?;

        parse(operation, dataset, response).await
    }

    /// Insert a resource, treating HTTP 409 as already present
    async fn insert(
        &self,
        operation: &'static str,
        resource: &str,
        url: &str,
        body: &Value,
    ) -> Result<(), WarehouseError> {
        let response = self.post(operation, url, body).await?;
        if response.status() == StatusCode::CONFLICT {
            debug!(resource, "Already exists");
            return Ok(());
        }
        check(operation, resource, response).await?;
        info!(resource, "Created");
        Ok(())
    }
}

#[async_trait]
impl Warehouse for BigQueryClient {
    #[instrument(skip(self))]
    async fn count_rows(&self, dataset: &str) -> Result<u64, WarehouseError> {
        const OPERATION: &str = "count rows";
        let sql = format!(
            "SELECT COUNT(cve.CVE_data_meta.ID) AS Count FROM {}",
            self.table_path(dataset)
        );

        let rows = self.query_rows(OPERATION, dataset, &sql).await?;
        let count = rows
            .first()
            .and_then(|row| row.first())
            .and_then(cell_u64)
            .ok_or_else(|| WarehouseError::UnexpectedResponse {
                operation: OPERATION,
                reason: "count query returned no numeric value".to_string(),
            })?;

        info!(count, "Counted warehouse rows");
        Ok(count)
    }

    #[instrument(skip(self, schema), fields(columns = schema.column_count()))]
    async fn create_dataset(&self, dataset: &str, schema: &TableSchema) -> Result<(), WarehouseError> {
        let project = &self.config.project;

        self.insert(
            "create dataset",
            dataset,
            &self.project_url("datasets"),
            &json!({ "datasetReference": { "projectId": project, "datasetId": dataset } }),
        )
        .await?;

        self.insert(
            "create table",
            &format!("{dataset}.{}", self.config.table),
            &self.project_url(&format!("datasets/{dataset}/tables")),
            &json!({
                "tableReference": {
                    "projectId": project,
                    "datasetId": dataset,
                    "tableId": self.config.table,
                },
                "schema": schema,
            }),
        )
        .await
    }

    #[instrument(skip(self))]
    async fn list_ids(&self, dataset: &str) -> Result<KnownIds, WarehouseError> {
        let sql = format!(
            "SELECT cve.CVE_data_meta.ID AS ID FROM {}",
            self.table_path(dataset)
        );

        let rows = self.query_rows("list identifiers", dataset, &sql).await?;
        let total = rows.len();
        let ids: KnownIds = rows
            .into_iter()
            .filter_map(|row| row.into_iter().next())
            .filter_map(|cell| match cell {
                Value::String(id) => Some(id),
                _ => None,
            })
            .collect();

        if ids.len() < total {
            debug!(rows = total, distinct = ids.len(), "Identifier listing had duplicates or nulls");
        }
        info!(known = ids.len(), "Listed warehouse identifiers");
        Ok(ids)
    }

    #[instrument(skip(self))]
    async fn load_from_storage(&self, dataset: &str, uri: &str) -> Result<LoadJob, WarehouseError> {
        const OPERATION: &str = "start load job";
        let body = json!({
            "configuration": {
                "load": {
                    "sourceUris": [uri],
                    "sourceFormat": "NEWLINE_DELIMITED_JSON",
                    "writeDisposition": "WRITE_APPEND",
                    "destinationTable": {
                        "projectId": self.config.project,
                        "datasetId": dataset,
                        "tableId": self.config.table,
                    },
                }
            }
        });

        let response = self.post(OPERATION, &self.project_url("jobs"), &body).await?;
        let job: JobResponse = parse(OPERATION, dataset, response).await?;

        info!(job_id = %job.job_reference.job_id, uri, "Load job submitted");
        Ok(LoadJob {
            job_id: job.job_reference.job_id,
            source_uri: uri.to_string(),
        })
    }
}

fn cell_u64(cell: &Value) -> Option<u64> {
    match cell {
        Value::String(s) => s.parse().ok(),
        Value::Number(n) => n.as_u64(),
        _ => None,
    }
}

/// Map an error response; 404 or a `notFound` reason becomes [`WarehouseError::NotFound`]
async fn check(operation: &'static str, resource: &str, response: Response) -> Result<Response, WarehouseError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let text = response.text().await.unwrap_or_default();
    let body = serde_json::from_str::<ErrorEnvelope>(&text)
        .ok()
        .and_then(|envelope| envelope.error)
        .unwrap_or_default();

    let not_found = status == StatusCode::NOT_FOUND
        || body
            .errors
            .iter()
            .any(|item| item.reason.as_deref() == Some(NOT_FOUND_REASON));
    if not_found {
        return Err(WarehouseError::NotFound {
            resource: resource.to_string(),
        });
    }

    let message = if body.message.is_empty() { text } else { body.message };
    warn!(operation, status = status.as_u16(), %message, "Warehouse request failed");
    Err(WarehouseError::Api {
        operation,
        status: status.as_u16(),
        message,
    })
}

async fn parse<T: serde::de::DeserializeOwned>(
    operation: &'static str,
    resource: &str,
    response: Response,
) -> Result<T, WarehouseError> {
    let response = check(operation, resource, response).await?;
    response
        .json()
        .await
        .map_err(|e| WarehouseError::UnexpectedResponse {
            operation,
            reason: e.to_string(),
        })
}
