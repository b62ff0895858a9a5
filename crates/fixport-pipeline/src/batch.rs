//! CSV batch driver.
//!
//! Reads `CVE-ID,Mainline_Commit,Status` rows (extra columns are kept),
//! runs the pipeline for each with bounded parallelism and writes every row
//! back with a `Prejudge_Result` column, in input order, as soon as it and
//! all rows before it are done. A failing row is written as
//! `error, <message>` and never stops the batch.

use std::io::{Read, Write};
use std::path::PathBuf;

use futures::stream::{self, StreamExt};
use serde::Serialize;
use tracing::{info, warn};

use crate::error::BatchError;
use crate::pipeline::{Pipeline, WorkItem};

pub const CVE_COLUMN: &str = "CVE-ID";
pub const COMMIT_COLUMN: &str = "Mainline_Commit";
pub const STATUS_COLUMN: &str = "Status";
pub const RESULT_COLUMN: &str = "Prejudge_Result";
/// Optional per-row override of the target directory.
pub const TARGET_COLUMN: &str = "Target_Dir";

#[derive(Debug, Clone)]
pub struct BatchConfig {
    pub mainline_dir: PathBuf,
    pub target_dir: PathBuf,
    pub concurrency: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BatchSummary {
    pub rows: usize,
    pub applicable: usize,
    pub not_applicable: usize,
    pub errors: usize,
}

struct Columns {
    commit: usize,
    cve: Option<usize>,
    target: Option<usize>,
}

impl Columns {
    fn locate(headers: &csv::StringRecord) -> Result<Self, BatchError> {
        let find = |name: &str| headers.iter().position(|h| h.trim() == name);
        Ok(Self {
            commit: find(COMMIT_COLUMN)
                .ok_or_else(|| BatchError::MissingColumn(COMMIT_COLUMN.to_string()))?,
            cve: find(CVE_COLUMN),
            target: find(TARGET_COLUMN),
        })
    }
}

enum RowResult {
    Applicable(String),
    NotApplicable(String),
    Error(String),
}

impl RowResult {
    fn text(&self) -> &str {
        match self {
            RowResult::Applicable(s) | RowResult::NotApplicable(s) | RowResult::Error(s) => s,
        }
    }
}

/// Run every row of `input` and write results to `output`.
pub async fn run_batch<R: Read, W: Write>(
    pipeline: &Pipeline,
    config: &BatchConfig,
    input: R,
    output: W,
) -> Result<BatchSummary, BatchError> {
    let mut reader = csv::ReaderBuilder::new().flexible(true).from_reader(input);
    let headers = reader.headers()?.clone();
    let columns = Columns::locate(&headers)?;
    if columns.cve.is_none() {
        warn!("input has no {CVE_COLUMN} column");
    }
    let records = reader.records().collect::<Result<Vec<_>, _>>()?;

    let mut writer = csv::WriterBuilder::new().flexible(true).from_writer(output);
    let mut header_row = headers.clone();
    header_row.push_field(RESULT_COLUMN);
    writer.write_record(&header_row)?;
    writer.flush()?;

    let concurrency = if config.concurrency > 1 && pipeline.validates_in_place() {
        warn!("in-place validation cannot run concurrently; processing rows one at a time");
        1
    } else {
        config.concurrency.max(1)
    };
    info!(rows = records.len(), concurrency, "batch starting");

    let columns = &columns;
    let mut results = stream::iter(records.into_iter().enumerate())
        .map(move |(index, record)| async move {
            let result = run_row(pipeline, config, columns, index, &record).await;
            (record, result)
        })
        .buffered(concurrency);

    let mut summary = BatchSummary::default();
    while let Some((mut record, result)) = results.next().await {
        summary.rows += 1;
        match &result {
            RowResult::Applicable(_) => summary.applicable += 1,
            RowResult::NotApplicable(_) => summary.not_applicable += 1,
            RowResult::Error(_) => summary.errors += 1,
        }
        // short rows are padded so the result lands in its own column
        while record.len() < headers.len() {
            record.push_field("");
        }
        record.push_field(result.text());
        writer.write_record(&record)?;
        writer.flush()?;
    }

    info!(
        rows = summary.rows,
        applicable = summary.applicable,
        errors = summary.errors,
        "batch finished"
    );
    Ok(summary)
}

async fn run_row(
    pipeline: &Pipeline,
    config: &BatchConfig,
    columns: &Columns,
    index: usize,
    record: &csv::StringRecord,
) -> RowResult {
    let field = |i: Option<usize>| {
        i.and_then(|i| record.get(i))
            .map(str::trim)
            .filter(|s| !s.is_empty())
    };
    let cve = field(columns.cve).unwrap_or("-");
    let target = field(columns.target)
        .map(PathBuf::from)
        .unwrap_or_else(|| config.target_dir.clone());
    let item = WorkItem::new(
        &config.mainline_dir,
        target,
        field(Some(columns.commit)).unwrap_or_default(),
    );

    info!(row = index + 1, cve, commit = %item.fix, "processing row");
    match pipeline.run(&item).await {
        Ok(record) => {
            let text = record.outcome.prejudge_result();
            info!(row = index + 1, cve, result = %text, "row done");
            if record.outcome.verdict().is_applicable() {
                RowResult::Applicable(text)
            } else {
                RowResult::NotApplicable(text)
            }
        }
        Err(e) => {
            warn!(row = index + 1, cve, error = %e, "row failed");
            RowResult::Error(format!("error, {e}"))
        }
    }
}
