//! Level-by-level extraction
//!
//! Levels run strictly in order; tables inside one level are mutually
//! independent by construction of the classifier, so their fetches run
//! concurrently and fan back in through a shared result queue. Each
//! writer consumes from its own ordered queue so a slow sink never
//! blocks a fast one.

use crate::resolver::resolve_filters;
use crate::ExtractError;
use datapluck_convert::{Converter, ConverterRegistry};
use datapluck_core::{Model, RefValue};
use datapluck_reader::{ParamSet, Reader, Row};
use datapluck_writer::{Writer, WriterError};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// One table's fetched batch
#[derive(Debug, Clone)]
pub struct TableRows {
    pub table: String,
    pub rows: Vec<Row>,
}

struct WriterBatch {
    table: String,
    rows: Arc<Vec<Row>>,
}

/// Orchestrates a full extraction run
pub struct Extractor {
    reader: Arc<dyn Reader>,
    converters: Vec<Arc<dyn Converter>>,
}

impl Extractor {
    /// Resolve the model's declared converter ids against the registry
    pub fn new(
        reader: Arc<dyn Reader>,
        registry: &ConverterRegistry,
        model: &Model,
    ) -> Result<Self, ExtractError> {
        let converters = registry
            .resolve(&model.converters)
            .map_err(ExtractError::UnknownConverter)?;

        Ok(Self { reader, converters })
    }

    /// Run the extraction plan, fanning batches out to every writer
    ///
    /// Rows already forwarded for completed levels are not retracted on
    /// failure; writers still finalize their output so partial fixtures
    /// stay well-formed.
    pub async fn run(
        &self,
        model: &mut Model,
        writers: Vec<Box<dyn Writer + Send>>,
    ) -> Result<(), ExtractError> {
        let mut senders = Vec::with_capacity(writers.len());
        let mut consumers = Vec::with_capacity(writers.len());

        for writer in writers {
            let (tx, handle) = spawn_writer(writer);
            senders.push(tx);
            consumers.push(handle);
        }

        let outcome = self.run_levels(model, &senders).await;

        // termination signal: consumers drain their queue, then finalize
        drop(senders);

        let mut writer_failure: Option<WriterError> = None;
        for consumer in consumers {
            match consumer.await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    writer_failure.get_or_insert(e);
                }
                Err(e) => {
                    writer_failure
                        .get_or_insert(WriterError::Io(std::io::Error::other(e.to_string())));
                }
            }
        }

        match (outcome, writer_failure) {
            (Ok(()), None) => Ok(()),
            (Ok(()), Some(failure)) => Err(failure.into()),
            // a dead consumer shows up as a closed queue; report its own
            // error instead of the send failure
            (Err(ExtractError::Writer(WriterError::Closed)), Some(failure)) => Err(failure.into()),
            (Err(e), _) => Err(e),
        }
    }

    async fn run_levels(
        &self,
        model: &mut Model,
        writers: &[mpsc::UnboundedSender<WriterBatch>],
    ) -> Result<(), ExtractError> {
        for (index, tables) in model.grouped_tables().into_iter().enumerate() {
            let level = index + 1;
            info!(level, tables = tables.len(), "extracting level");

            // resolve the whole level first: a resolution failure aborts
            // before a single fetch is issued
            let mut jobs = Vec::with_capacity(tables.len());
            for table in tables {
                let params = resolve_filters(&table, &model.refs)?;
                jobs.push((table, params));
            }

            let expected = jobs.len();
            let (tx, mut rx) = mpsc::channel::<Result<TableRows, ExtractError>>(expected);

            for (table, params) in jobs {
                let reader = Arc::clone(&self.reader);
                let converters = self.converters.clone();
                let tx = tx.clone();

                tokio::spawn(async move {
                    let result = fetch_table(reader, &converters, table, params).await;
                    let _ = tx.send(result).await;
                });
            }
            drop(tx);

            // fan-in: drain every outstanding task even after a failure
            // so no fetch leaks past the level boundary
            let mut failure: Option<ExtractError> = None;
            let mut fetched = Vec::with_capacity(expected);

            for _ in 0..expected {
                match rx.recv().await {
                    Some(Ok(result)) => {
                        if failure.is_none() {
                            fetched.push(result);
                        }
                    }
                    Some(Err(e)) => {
                        failure.get_or_insert(e);
                    }
                    None => break,
                }
            }

            if let Some(e) = failure {
                return Err(e);
            }

            for result in fetched {
                merge_refs(&mut model.refs, &result);
                debug!(table = %result.table, rows = result.rows.len(), "forwarding batch");

                let rows = Arc::new(result.rows);
                for writer in writers {
                    writer
                        .send(WriterBatch {
                            table: result.table.clone(),
                            rows: Arc::clone(&rows),
                        })
                        .map_err(|_| ExtractError::Writer(WriterError::Closed))?;
                }
            }
        }

        Ok(())
    }
}

async fn fetch_table(
    reader: Arc<dyn Reader>,
    converters: &[Arc<dyn Converter>],
    table: datapluck_core::Table,
    params: Vec<ParamSet>,
) -> Result<TableRows, ExtractError> {
    let columns = reader.fetch_columns_metadata(&table).await?;
    let rows = reader
        .fetch_data(&table.name, &columns, converters, &params)
        .await?;

    Ok(TableRows {
        table: table.name,
        rows,
    })
}

/// Merge a fetched batch back into the references map
///
/// Scalar keys are overwritten with the row's value, multi-valued keys
/// accumulate one entry per row. Only keys seeded during schema parsing
/// are touched.
fn merge_refs(refs: &mut HashMap<String, RefValue>, result: &TableRows) {
    let table = result.table.to_lowercase();

    for row in &result.rows {
        for (column, value) in row {
            let key = format!("{}.{}", table, column.name.to_lowercase());

            if let Some(entry) = refs.get_mut(&key) {
                *entry = RefValue::Scalar(value.clone());
            }

            let multi_key = format!("{}[@]", key);
            if let Some(entry) = refs.get_mut(&multi_key) {
                match entry {
                    RefValue::List(values) => values.push(value.clone()),
                    other => *other = RefValue::List(vec![value.clone()]),
                }
            }
        }
    }
}

fn spawn_writer(
    mut writer: Box<dyn Writer + Send>,
) -> (
    mpsc::UnboundedSender<WriterBatch>,
    JoinHandle<Result<(), WriterError>>,
) {
    let (tx, mut rx) = mpsc::unbounded_channel::<WriterBatch>();

    let handle = tokio::spawn(async move {
        writer.write_header()?;

        while let Some(batch) = rx.recv().await {
            writer.write(&batch.table, &batch.rows)?;
        }

        writer.write_footer()
    });

    (tx, handle)
}
