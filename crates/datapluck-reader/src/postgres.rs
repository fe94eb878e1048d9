//! PostgreSQL reader
//!
//! Metadata comes from `information_schema.columns`; data queries are
//! prepared with positional parameters, one execution per parameter set.
//! Numeric columns are cast to text in the projection so arbitrary
//! precision survives the trip into fixture files.

use crate::{DataSource, DbColumn, ParamSet, Reader, ReaderError, Row};
use async_trait::async_trait;
use bytes::BytesMut;
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use datapluck_convert::{self as convert, Converter};
use datapluck_core::{Table, Value};
use std::sync::Arc;
use tokio_postgres::types::{to_sql_checked, IsNull, ToSql, Type};
use tokio_postgres::{Client, NoTls};
use tracing::{debug, error};

const METADATA_QUERY: &str = "SELECT column_name, data_type, is_nullable, \
     COALESCE(character_maximum_length, 0)::bigint, \
     COALESCE(numeric_precision, 0)::bigint, \
     COALESCE(numeric_scale, 0)::bigint \
     FROM information_schema.columns WHERE table_name = $1";

/// Reader backed by a live PostgreSQL connection
pub struct PostgresReader {
    client: Client,
}

impl PostgresReader {
    /// Connect and spawn the connection driver task
    pub async fn connect(source: &DataSource) -> Result<Self, ReaderError> {
        let config = format!(
            "host={} port={} dbname={} user={} password={}",
            source.hostname, source.port, source.database, source.username, source.password
        );

        let (client, connection) = tokio_postgres::connect(&config, NoTls)
            .await
            .map_err(|e| {
                ReaderError::Connection(format!(
                    "{}:{}: {}",
                    source.hostname, source.port, e
                ))
            })?;

        tokio::spawn(async move {
            if let Err(e) = connection.await {
                error!(error = %e, "postgres connection terminated");
            }
        });

        Ok(Self { client })
    }
}

#[async_trait]
impl Reader for PostgresReader {
    async fn fetch_columns_metadata(&self, table: &Table) -> Result<Vec<DbColumn>, ReaderError> {
        let query = metadata_query(table);
        debug!(table = %table.name, %query, "fetching column metadata");

        let rows = self
            .client
            .query(query.as_str(), &[&table.name.to_lowercase()])
            .await
            .map_err(|e| ReaderError::Query(e.to_string()))?;

        let mut columns = Vec::with_capacity(rows.len());
        for row in rows {
            let nullable: String = row.get(2);
            columns.push(DbColumn {
                name: row.get(0),
                db_type: row.get(1),
                nullable: nullable == "YES",
                length: row.get(3),
                precision: row.get(4),
                scale: row.get(5),
            });
        }

        if columns.is_empty() {
            return Err(ReaderError::NoMetadata(table.name.clone()));
        }

        Ok(columns)
    }

    async fn fetch_data(
        &self,
        table: &str,
        columns: &[DbColumn],
        converters: &[Arc<dyn Converter>],
        param_sets: &[ParamSet],
    ) -> Result<Vec<Row>, ReaderError> {
        let empty: ParamSet = Vec::new();
        let sets: Vec<&ParamSet> = if param_sets.is_empty() {
            vec![&empty]
        } else {
            param_sets.iter().collect()
        };

        let mut rows = Vec::new();

        for params in sets {
            let query = data_query(table, columns, params);
            debug!(%table, %query, "fetching data");

            let bound: Vec<PgParam<'_>> = params.iter().map(|(_, v)| PgParam(v)).collect();
            let args: Vec<&(dyn ToSql + Sync)> =
                bound.iter().map(|p| p as &(dyn ToSql + Sync)).collect();

            let fetched = self
                .client
                .query(query.as_str(), &args)
                .await
                .map_err(|e| ReaderError::Query(e.to_string()))?;

            for pg_row in fetched {
                let mut row = Row::with_capacity(columns.len());
                for (i, column) in columns.iter().enumerate() {
                    let value = decode(&pg_row, i, column)?;
                    row.push((column.clone(), convert::apply(value, converters)?));
                }
                rows.push(row);
            }
        }

        Ok(rows)
    }
}

fn metadata_query(table: &Table) -> String {
    let mut query = String::from(METADATA_QUERY);

    if table.columns.is_empty() && table.ignore.is_empty() {
        query.push_str(" ORDER BY ordinal_position");
        return query;
    }

    query.push_str(" AND column_name");
    if !table.ignore.is_empty() {
        query.push_str(" NOT");
    }
    query.push_str(&format!(
        " IN({})",
        table.formatted_select_columns().to_lowercase()
    ));
    query.push_str(" ORDER BY ordinal_position");

    query
}

fn data_query(table: &str, columns: &[DbColumn], params: &ParamSet) -> String {
    let projection = columns
        .iter()
        .map(|c| {
            // arbitrary-precision numerics do not fit i64/f64
            if c.db_type == "numeric" {
                format!("{}::text AS {}", c.name, c.name)
            } else {
                c.name.clone()
            }
        })
        .collect::<Vec<_>>()
        .join(", ");

    let mut query = format!("SELECT {} FROM {}", projection, table);

    if !params.is_empty() {
        let conditions = params
            .iter()
            .enumerate()
            .map(|(i, (name, _))| format!("{} = ${}", name, i + 1))
            .collect::<Vec<_>>()
            .join(" AND ");
        query.push_str(&format!(" WHERE {}", conditions));
    }

    query
}

fn decode(row: &tokio_postgres::Row, idx: usize, column: &DbColumn) -> Result<Value, ReaderError> {
    let fail = |e: tokio_postgres::Error| ReaderError::Query(e.to_string());

    let value = match column.db_type.as_str() {
        "smallint" => row
            .try_get::<_, Option<i16>>(idx)
            .map_err(fail)?
            .map(|v| Value::Int(v as i64)),
        "integer" => row
            .try_get::<_, Option<i32>>(idx)
            .map_err(fail)?
            .map(|v| Value::Int(v as i64)),
        "bigint" => row
            .try_get::<_, Option<i64>>(idx)
            .map_err(fail)?
            .map(Value::Int),
        "real" => row
            .try_get::<_, Option<f32>>(idx)
            .map_err(fail)?
            .map(|v| Value::Float(v as f64)),
        "double precision" => row
            .try_get::<_, Option<f64>>(idx)
            .map_err(fail)?
            .map(Value::Float),
        "boolean" => row
            .try_get::<_, Option<bool>>(idx)
            .map_err(fail)?
            .map(|v| Value::Text(v.to_string())),
        "bytea" => row
            .try_get::<_, Option<Vec<u8>>>(idx)
            .map_err(fail)?
            .map(Value::Bytes),
        "date" => row
            .try_get::<_, Option<NaiveDate>>(idx)
            .map_err(fail)?
            .and_then(|v| v.and_hms_opt(0, 0, 0))
            .map(|v| Value::Timestamp(DateTime::from_naive_utc_and_offset(v, Utc))),
        "timestamp without time zone" => row
            .try_get::<_, Option<NaiveDateTime>>(idx)
            .map_err(fail)?
            .map(|v| Value::Timestamp(DateTime::from_naive_utc_and_offset(v, Utc))),
        "timestamp with time zone" => row
            .try_get::<_, Option<DateTime<Utc>>>(idx)
            .map_err(fail)?
            .map(Value::Timestamp),
        // numeric is projected as text, everything else is read as text
        _ => row
            .try_get::<_, Option<String>>(idx)
            .map_err(fail)?
            .map(Value::Text),
    };

    Ok(value.unwrap_or(Value::Null))
}

/// Adapts [`Value`] to postgres parameter binding
#[derive(Debug)]
struct PgParam<'a>(&'a Value);

impl ToSql for PgParam<'_> {
    fn to_sql(
        &self,
        ty: &Type,
        out: &mut BytesMut,
    ) -> Result<IsNull, Box<dyn std::error::Error + Sync + Send>> {
        match self.0 {
            Value::Null => Ok(IsNull::Yes),
            Value::Int(v) => v.to_sql(ty, out),
            Value::Float(v) => v.to_sql(ty, out),
            Value::Text(v) => v.to_sql(ty, out),
            Value::Bytes(v) => v.to_sql(ty, out),
            Value::Timestamp(v) => v.to_sql(ty, out),
        }
    }

    fn accepts(_ty: &Type) -> bool {
        true
    }

    to_sql_checked!();
}
