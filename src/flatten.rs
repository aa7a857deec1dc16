//! Turns heterogeneous records into one rectangular table.

use indexmap::{IndexMap, IndexSet};

use crate::record::{FieldValue, Record, METADATA_FIELD};

pub const DEFAULT_NESTED_FIELDS: [&str; 6] = [
    METADATA_FIELD,
    "Properties",
    "Characteristics",
    "Cascade of Meaningful Measures",
    "Groups",
    "Reporting Status",
];

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Table {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

impl Table {
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn column(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }
}

fn nested_column(field: &str, key: &str) -> String {
    format!("{field}_{key}")
}

/// Flattens `records` in order. Nested fields listed in `nested_fields`
/// (or [`DEFAULT_NESTED_FIELDS`]) expand into `<field>_<key>` columns.
///
/// Scalar columns come first. Each nested field then contributes one block
/// holding the union of its keys across every record, in list order, so
/// missing cells are empty.
pub fn flatten(records: &[Record], nested_fields: Option<&[&str]>) -> Table {
    let mut groups: IndexMap<&str, IndexSet<String>> = nested_fields
        .unwrap_or(&DEFAULT_NESTED_FIELDS)
        .iter()
        .map(|&field| (field, IndexSet::new()))
        .collect();

    let mut scalar_columns: IndexSet<String> = IndexSet::new();
    let mut cells: Vec<IndexMap<String, String>> = Vec::with_capacity(records.len());

    for record in records {
        let mut row = IndexMap::new();
        for (name, value) in record.iter() {
            match (groups.get_mut(name), value) {
                (Some(group), FieldValue::Nested(sub)) => {
                    for (key, v) in sub {
                        let column = nested_column(name, key);
                        group.insert(column.clone());
                        row.insert(column, v.clone());
                    }
                }
                // A scalar where a mapping is expected has nothing to expand.
                (Some(_), FieldValue::Text(_)) => {}
                (None, FieldValue::Text(text)) => {
                    scalar_columns.insert(name.to_string());
                    row.insert(name.to_string(), text.clone());
                }
                (None, FieldValue::Nested(sub)) => {
                    scalar_columns.insert(name.to_string());
                    let json = serde_json::to_string(sub).unwrap_or_default();
                    row.insert(name.to_string(), json);
                }
            }
        }
        cells.push(row);
    }

    let columns: Vec<String> = scalar_columns
        .into_iter()
        .chain(groups.into_values().flatten())
        .collect();
    let rows = cells
        .into_iter()
        .map(|row| {
            columns
                .iter()
                .map(|c| row.get(c).cloned().unwrap_or_default())
                .collect()
        })
        .collect();

    Table { columns, rows }
}
