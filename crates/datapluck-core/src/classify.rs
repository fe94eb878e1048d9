//! Dependency classification
//!
//! Assigns every table a dependency level: level 1 tables have no
//! reference filters, level n tables reference at least one table at
//! level n-1. The grouped, ascending partition is the iteration plan the
//! extraction engine runs level by level.

use crate::schema::{Model, SchemaError, Table};

impl Model {
    /// Assign a dependency level to every declared table
    ///
    /// A table carrying reference filters at several depths is re-assigned
    /// as deeper targets classify, so it always lands after its deepest
    /// already-classified dependency.
    pub fn classify(&mut self) -> Result<(), SchemaError> {
        let level_one = self.classify_level_one()?;
        for index in level_one {
            self.tables[index].level = 1;
        }

        let mut level = 2;
        loop {
            let indexes = self.classify_level(level)?;
            if indexes.is_empty() {
                break;
            }

            for index in indexes {
                self.tables[index].level = level;
            }

            level += 1;
        }

        if let Some(unassigned) = self.tables.iter().find(|t| t.level == 0) {
            return Err(SchemaError::Classification(format!(
                "couldn't assign a level to table '{}' (circular or unreachable references)",
                unassigned.name
            )));
        }

        Ok(())
    }

    /// Tables partitioned by level, ascending, stopping at the first
    /// empty level
    pub fn grouped_tables(&self) -> Vec<Vec<Table>> {
        let mut groups = Vec::new();
        let mut level = 0;

        loop {
            level += 1;

            let tables: Vec<Table> = self
                .tables
                .iter()
                .filter(|t| t.level == level)
                .cloned()
                .collect();

            if tables.is_empty() {
                break;
            }

            groups.push(tables);
        }

        groups
    }

    /// Level 1: no filters at all, or only literal filters
    fn classify_level_one(&self) -> Result<Vec<usize>, SchemaError> {
        let mut indexes = Vec::with_capacity(self.tables.len());

        for (i, table) in self.tables.iter().enumerate() {
            let mut literal = false;
            let mut referenced = false;

            for filter in &table.filters {
                if filter.is_reference() {
                    referenced = true;
                } else {
                    literal = true;
                }
            }

            if table.filters.is_empty() || (literal && !referenced) {
                indexes.push(i);
            }
        }

        if indexes.is_empty() {
            return Err(SchemaError::Classification(
                "couldn't find any level one tables".to_string(),
            ));
        }

        Ok(indexes)
    }

    /// Level n >= 2: any reference filter targeting a level n-1 table
    fn classify_level(&self, level: usize) -> Result<Vec<usize>, SchemaError> {
        let mut indexes = Vec::with_capacity(self.tables.len());

        for (i, table) in self.tables.iter().enumerate() {
            for filter in &table.filters {
                let Some(target) = filter.ref_table() else {
                    continue;
                };

                let Some(referenced) = self.find_table(&target) else {
                    return Err(SchemaError::Classification(format!(
                        "{}.{} points to unresolvable reference '{}'",
                        table.name, filter.name, filter.value
                    )));
                };

                if referenced.level + 1 == level {
                    indexes.push(i);
                }
            }
        }

        indexes.dedup();
        Ok(indexes)
    }
}
