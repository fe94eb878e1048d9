//! Structural schema validation
//!
//! Runs before classification: identifier syntax, duplicate detection,
//! column/ignore exclusivity, the one-multivalued-filter-per-table rule
//! and converter-id existence.

use crate::schema::{
    Filter, Model, SchemaError, Table, MULTIVALUED_FILTER_RE, NAME_MAX_LENGTH, NAME_RE,
};

/// Converter-id existence check, implemented by the converter registry
///
/// Kept as a trait so the schema model never depends on the registry
/// implementation (or on ambient global state).
pub trait ConverterLookup {
    fn exists(&self, id: &str) -> bool;
}

impl Model {
    /// Validate the schema structure against the declared converters
    pub fn validate(&self, converters: &dyn ConverterLookup) -> Result<(), SchemaError> {
        validate_converters(&self.converters, converters)?;
        validate_tables(&self.tables)
    }
}

impl Table {
    fn validate(&self) -> Result<(), SchemaError> {
        validate_name(&self.name)?;

        for filter in &self.filters {
            filter
                .validate()
                .map_err(|e| SchemaError::Validation(format!("table '{}' {}", self.name, e)))?;
        }

        for column in self.columns.iter().chain(self.ignore.iter()) {
            validate_name(column)
                .map_err(|e| SchemaError::Validation(format!("table '{}' {}", self.name, e)))?;
        }

        if !self.columns.is_empty() && !self.ignore.is_empty() {
            return Err(SchemaError::Validation(format!(
                "table '{}' with columns and ignore set (excludents)",
                self.name
            )));
        }

        if let Some(repeated) = repeated_value(&self.columns) {
            return Err(SchemaError::Validation(format!(
                "repeated column '{}' in table '{}'",
                repeated, self.name
            )));
        }

        if let Some(repeated) = repeated_value(&self.ignore) {
            return Err(SchemaError::Validation(format!(
                "repeated ignore column '{}' in table '{}'",
                repeated, self.name
            )));
        }

        Ok(())
    }
}

impl Filter {
    fn validate(&self) -> Result<(), SchemaError> {
        if self.value.is_empty() {
            return Err(SchemaError::Validation(format!(
                "empty filter value '{}'",
                self.name
            )));
        }

        validate_name(&self.name)
    }
}

fn validate_converters(ids: &[String], converters: &dyn ConverterLookup) -> Result<(), SchemaError> {
    for id in ids {
        if !converters.exists(id) {
            return Err(SchemaError::Validation(format!(
                "converter '{}' not found",
                id
            )));
        }
    }

    if let Some(repeated) = repeated_value(ids) {
        return Err(SchemaError::Validation(format!(
            "repeated converter '{}'",
            repeated
        )));
    }

    Ok(())
}

fn validate_tables(tables: &[Table]) -> Result<(), SchemaError> {
    if tables.is_empty() {
        return Err(SchemaError::Validation("no table provided".to_string()));
    }

    for table in tables {
        table.validate()?;
    }

    validate_repeated_tables(tables)?;
    validate_multivalued_filters(tables)
}

/// Two tables may share a name, but not a name plus an identical ordered
/// filter signature.
fn validate_repeated_tables(tables: &[Table]) -> Result<(), SchemaError> {
    for (i, t1) in tables.iter().enumerate() {
        for (j, t2) in tables.iter().enumerate() {
            if i == j || t1.name != t2.name || t1.filters.len() != t2.filters.len() {
                continue;
            }

            if t1.filters == t2.filters {
                let signature = t1
                    .filters
                    .iter()
                    .map(|f| format!("{}={}", f.name, f.value))
                    .collect::<Vec<_>>()
                    .join(", ");

                return Err(SchemaError::Validation(format!(
                    "repeated table {} with filters [{}]",
                    t1.name, signature
                )));
            }
        }
    }

    Ok(())
}

fn validate_multivalued_filters(tables: &[Table]) -> Result<(), SchemaError> {
    for table in tables {
        let count = table
            .filters
            .iter()
            .filter(|f| MULTIVALUED_FILTER_RE.is_match(&f.value))
            .count();

        if count > 1 {
            return Err(SchemaError::Validation(format!(
                "found more than one multivalued filter in table {}",
                table.name
            )));
        }
    }

    Ok(())
}

fn validate_name(name: &str) -> Result<(), SchemaError> {
    if name.len() > NAME_MAX_LENGTH {
        return Err(SchemaError::Validation(format!(
            "'{}' invalid name size",
            name
        )));
    }

    if !NAME_RE.is_match(name) {
        return Err(SchemaError::Validation(format!("'{}' invalid name", name)));
    }

    Ok(())
}

fn repeated_value(values: &[String]) -> Option<&str> {
    for (i, value) in values.iter().enumerate() {
        if values.iter().skip(i + 1).any(|other| other == value) {
            return Some(value);
        }
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::RefValue;
    use std::collections::HashMap;

    struct Known(Vec<&'static str>);

    impl ConverterLookup for Known {
        fn exists(&self, id: &str) -> bool {
            self.0.contains(&id)
        }
    }

    fn table(name: &str, filters: Vec<(&str, &str)>) -> Table {
        Table {
            level: 0,
            name: name.to_string(),
            filters: filters
                .into_iter()
                .map(|(n, v)| Filter {
                    name: n.to_string(),
                    value: v.to_string(),
                })
                .collect(),
            columns: vec![],
            ignore: vec![],
        }
    }

    fn model(tables: Vec<Table>) -> Model {
        Model {
            converters: vec![],
            tables,
            refs: HashMap::<String, RefValue>::new(),
        }
    }

    #[test]
    fn empty_schema_is_invalid() {
        let err = model(vec![]).validate(&Known(vec![])).unwrap_err();
        assert!(err.to_string().contains("no table provided"));
    }

    #[test]
    fn unknown_converter_is_invalid() {
        let mut m = model(vec![table("customers", vec![])]);
        m.converters = vec!["nope".to_string()];

        let err = m.validate(&Known(vec!["blob"])).unwrap_err();
        assert!(err.to_string().contains("converter 'nope' not found"));
    }

    #[test]
    fn repeated_converter_is_invalid() {
        let mut m = model(vec![table("customers", vec![])]);
        m.converters = vec!["blob".to_string(), "blob".to_string()];

        let err = m.validate(&Known(vec!["blob"])).unwrap_err();
        assert!(err.to_string().contains("repeated converter 'blob'"));
    }

    #[test]
    fn invalid_identifiers_are_rejected() {
        let err = model(vec![table("1customers", vec![])])
            .validate(&Known(vec![]))
            .unwrap_err();
        assert!(err.to_string().contains("invalid name"));

        let err = model(vec![table("customers", vec![("select col", "1")])])
            .validate(&Known(vec![]))
            .unwrap_err();
        assert!(err.to_string().contains("table 'customers'"));

        let long = "a".repeat(NAME_MAX_LENGTH + 1);
        let err = model(vec![table(&long, vec![])])
            .validate(&Known(vec![]))
            .unwrap_err();
        assert!(err.to_string().contains("invalid name size"));
    }

    #[test]
    fn empty_filter_value_is_invalid() {
        let err = model(vec![table("customers", vec![("id", "")])])
            .validate(&Known(vec![]))
            .unwrap_err();
        assert!(err.to_string().contains("empty filter value 'id'"));
    }

    #[test]
    fn columns_and_ignore_are_exclusive() {
        let mut t = table("customers", vec![]);
        t.columns = vec!["id".to_string()];
        t.ignore = vec!["password".to_string()];

        let err = model(vec![t]).validate(&Known(vec![])).unwrap_err();
        assert!(err.to_string().contains("excludents"));
    }

    #[test]
    fn repeated_columns_are_invalid() {
        let mut t = table("customers", vec![]);
        t.columns = vec!["id".to_string(), "id".to_string()];

        let err = model(vec![t]).validate(&Known(vec![])).unwrap_err();
        assert!(err.to_string().contains("repeated column 'id'"));
    }

    #[test]
    fn identical_table_signatures_are_invalid() {
        let m = model(vec![
            table("customers", vec![("id", "1")]),
            table("customers", vec![("id", "1")]),
        ]);

        let err = m.validate(&Known(vec![])).unwrap_err();
        assert!(err.to_string().contains("repeated table customers"));
    }

    #[test]
    fn same_table_with_different_filters_is_valid() {
        let m = model(vec![
            table("customers", vec![("id", "1")]),
            table("customers", vec![("id", "2")]),
        ]);

        assert!(m.validate(&Known(vec![])).is_ok());
    }

    #[test]
    fn two_multivalued_filters_fail_before_classification() {
        let m = model(vec![
            table("orders", vec![]),
            table(
                "order_items",
                vec![
                    ("order_id", "${orders.id[@]}"),
                    ("product_id", "${orders.product_id[@]}"),
                ],
            ),
        ]);

        let err = m.validate(&Known(vec![])).unwrap_err();
        assert!(err
            .to_string()
            .contains("more than one multivalued filter in table order_items"));
    }
}
