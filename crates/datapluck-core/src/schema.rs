//! Extraction schema model
//!
//! A schema file declares which tables to pull, how their rows are
//! filtered and which converters are active. Filters are either literal
//! values or reference expressions (`${table.column}` scalar,
//! `${table.column[@]}` multi-valued) that bind against values produced
//! by tables fetched at earlier dependency levels.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;

use crate::validate::ConverterLookup;
use crate::value::Value;

/// Identifier length cap applied to table, filter and column names
pub const NAME_MAX_LENGTH: usize = 80;

/// Converter id applied to date/time values when none is declared
pub const DATE_TIME_ISO8601_ID: &str = "date-time-iso8601";

/// Converter id applied to binary values when none is declared
pub const BLOB_ID: &str = "blob";

pub(crate) static NAME_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-zA-Z_]\w+$").expect("name regex"));

static FILTER_REFERENCE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\$\{(\w+)\.(\w+(\[@\])?)\}$").expect("reference regex"));

pub(crate) static MULTIVALUED_FILTER_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\$\{(\w+)\.(\w+\[@\])\}$").expect("multivalued regex"));

/// Schema level errors
#[derive(Debug, thiserror::Error)]
pub enum SchemaError {
    #[error("schema-file: {0}")]
    File(#[from] std::io::Error),

    #[error("schema-file: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("validation: {0}")]
    Validation(String),

    #[error("classification: {0}")]
    Classification(String),
}

/// A named restriction on the rows pulled from one table
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Filter {
    pub name: String,
    pub value: String,
}

/// Structural classification of a filter value
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FilterKind {
    /// Plain value, bound as-is
    Literal,

    /// `${table.column}`, bound to a single value of an earlier table
    ScalarRef { table: String, column: String },

    /// `${table.column[@]}`, expanding into one fetch per referenced value
    MultiRef { table: String, column: String },
}

impl Filter {
    /// Parse the filter value against the reference grammar
    pub fn kind(&self) -> FilterKind {
        if let Some(caps) = MULTIVALUED_FILTER_RE.captures(&self.value) {
            let column = caps[2].trim_end_matches("[@]").to_string();
            return FilterKind::MultiRef {
                table: caps[1].to_string(),
                column,
            };
        }

        if let Some(caps) = FILTER_REFERENCE_RE.captures(&self.value) {
            return FilterKind::ScalarRef {
                table: caps[1].to_string(),
                column: caps[2].to_string(),
            };
        }

        FilterKind::Literal
    }

    /// Whether the value is a reference expression (scalar or multi-valued)
    pub fn is_reference(&self) -> bool {
        FILTER_REFERENCE_RE.is_match(&self.value)
    }

    /// Normalized references-map key, `None` for literals
    ///
    /// Keys are lower-cased `table.column`; multi-valued keys keep the
    /// `[@]` suffix so scalar and list entries never collide.
    pub fn ref_key(&self) -> Option<String> {
        FILTER_REFERENCE_RE
            .captures(&self.value)
            .map(|caps| format!("{}.{}", &caps[1], &caps[2]).to_lowercase())
    }

    /// Table a reference expression points at, `None` for literals
    pub fn ref_table(&self) -> Option<String> {
        FILTER_REFERENCE_RE
            .captures(&self.value)
            .map(|caps| caps[1].to_string())
    }
}

/// One table declared for extraction
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Table {
    /// Dependency level assigned by classification; 0 means unassigned
    #[serde(skip)]
    pub level: usize,

    pub name: String,

    #[serde(default)]
    pub filters: Vec<Filter>,

    /// Allow-list of columns to pull; exclusive with `ignore`
    #[serde(default)]
    pub columns: Vec<String>,

    /// Deny-list of columns to skip; exclusive with `columns`
    #[serde(default)]
    pub ignore: Vec<String>,
}

impl Table {
    /// Column names a reader should project, `["*"]` when unrestricted
    pub fn select_columns(&self) -> Vec<String> {
        if !self.columns.is_empty() {
            self.columns.clone()
        } else if !self.ignore.is_empty() {
            self.ignore.clone()
        } else {
            vec!["*".to_string()]
        }
    }

    /// Quoted, comma-joined form of [`select_columns`](Self::select_columns)
    pub fn formatted_select_columns(&self) -> String {
        format!("'{}'", self.select_columns().join("', '"))
    }
}

/// State of one entry in the references map
#[derive(Debug, Clone, PartialEq)]
pub enum RefValue {
    /// Referenced table has not been fetched yet
    Unresolved,

    /// Last value seen for a scalar `table.column` key
    Scalar(Value),

    /// Accumulated values for a `table.column[@]` key, one per fetched row
    List(Vec<Value>),
}

/// Parsed, validated and classified extraction schema
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Model {
    #[serde(default)]
    pub converters: Vec<String>,

    #[serde(default)]
    pub tables: Vec<Table>,

    /// Reference values keyed by normalized `table.column`, written back
    /// by the extraction engine after each level completes
    #[serde(skip)]
    pub refs: HashMap<String, RefValue>,
}

impl Model {
    /// Read, validate and classify a schema file
    pub fn from_file(
        path: impl AsRef<Path>,
        converters: &dyn ConverterLookup,
    ) -> Result<Self, SchemaError> {
        let yaml = std::fs::read_to_string(path)?;
        Self::from_yaml(&yaml, converters)
    }

    /// Parse, validate and classify a schema document
    pub fn from_yaml(yaml: &str, converters: &dyn ConverterLookup) -> Result<Self, SchemaError> {
        let mut model: Model = serde_yaml::from_str(yaml)?;

        model.validate(converters)?;
        model.refs = model.collect_references();
        model.set_default_converters();
        model.classify()?;

        Ok(model)
    }

    /// Pre-resolve reference entries from externally supplied bindings
    ///
    /// Keys are `table.column` (case-insensitive); unknown keys are
    /// ignored so callers can pass a superset of what the schema uses.
    pub fn seed_refs(&mut self, bindings: &HashMap<String, Value>) {
        for (key, value) in bindings {
            let key = key.to_lowercase();
            if let Some(entry) = self.refs.get_mut(&key) {
                *entry = RefValue::Scalar(value.clone());
            }
        }
    }

    /// Case-insensitive table lookup
    pub fn find_table(&self, name: &str) -> Option<&Table> {
        self.tables.iter().find(|t| t.name.eq_ignore_ascii_case(name))
    }

    /// Every reference key used by any filter, initialized unresolved
    fn collect_references(&self) -> HashMap<String, RefValue> {
        let mut refs = HashMap::new();

        for table in &self.tables {
            for filter in &table.filters {
                if let Some(key) = filter.ref_key() {
                    refs.insert(key, RefValue::Unresolved);
                }
            }
        }

        refs
    }

    fn set_default_converters(&mut self) {
        for id in [DATE_TIME_ISO8601_ID, BLOB_ID] {
            if !self.converters.iter().any(|c| c == id) {
                self.converters.push(id.to_string());
            }
        }
    }
}
