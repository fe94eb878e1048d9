//! Filter resolution
//!
//! Turns a table's declared filters into concrete parameter sets against
//! the references map. A multi-valued reference fans out into one
//! parameter set per referenced value; everything else binds in place.

use crate::ExtractError;
use datapluck_core::{FilterKind, RefValue, Table, Value};
use datapluck_reader::ParamSet;
use std::collections::HashMap;

/// Resolve a table's filters into bindable parameter sets
///
/// A table without filters issues exactly one parameter-less fetch. With
/// a multi-valued filter bound to N values the table fans out into N
/// sets; any set left with a null binding is unusable and the whole
/// resolution fails rather than silently narrowing the fetch.
pub fn resolve_filters(
    table: &Table,
    refs: &HashMap<String, RefValue>,
) -> Result<Vec<ParamSet>, ExtractError> {
    if table.filters.is_empty() {
        return Ok(vec![ParamSet::new()]);
    }

    // bindings in declaration order; the multi-valued slot stays open
    let mut template: Vec<Option<(String, Value)>> = Vec::with_capacity(table.filters.len());
    let mut expansion: Option<(usize, Vec<Value>)> = None;

    for (slot, filter) in table.filters.iter().enumerate() {
        match filter.kind() {
            FilterKind::Literal => {
                template.push(Some((filter.name.clone(), Value::Text(filter.value.clone()))));
            }
            FilterKind::ScalarRef { .. } => {
                let key = filter.ref_key().expect("reference filter has a key");
                match refs.get(&key) {
                    Some(RefValue::Scalar(value)) => {
                        template.push(Some((filter.name.clone(), value.clone())));
                    }
                    _ => {
                        return Err(ExtractError::UnresolvedReference {
                            table: table.name.clone(),
                            filter: filter.name.clone(),
                            expr: filter.value.clone(),
                        })
                    }
                }
            }
            FilterKind::MultiRef { .. } => {
                let key = filter.ref_key().expect("reference filter has a key");
                match refs.get(&key) {
                    Some(RefValue::List(values)) => {
                        expansion = Some((slot, values.clone()));
                        template.push(None);
                    }
                    _ => {
                        return Err(ExtractError::UnresolvedReference {
                            table: table.name.clone(),
                            filter: filter.name.clone(),
                            expr: filter.value.clone(),
                        })
                    }
                }
            }
        }
    }

    let expected;
    let mut sets = Vec::new();

    match expansion {
        None => {
            expected = 1;
            let set: ParamSet = template.into_iter().flatten().collect();
            if !has_null_binding(&set) {
                sets.push(set);
            }
        }
        Some((slot, values)) => {
            expected = values.len();
            for value in values {
                let set: ParamSet = template
                    .iter()
                    .enumerate()
                    .map(|(i, binding)| {
                        if i == slot {
                            (table.filters[i].name.clone(), value.clone())
                        } else {
                            binding.clone().expect("only the multi-valued slot is open")
                        }
                    })
                    .collect();

                if !has_null_binding(&set) {
                    sets.push(set);
                }
            }
        }
    }

    if sets.len() != expected || sets.is_empty() {
        return Err(ExtractError::FiltersNotBound(table.name.clone()));
    }

    Ok(sets)
}

fn has_null_binding(set: &ParamSet) -> bool {
    set.iter().any(|(_, value)| value.is_null())
}
