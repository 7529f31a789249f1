//! Table reference parser
//!
//! Turns `database.table` strings into permission requests.

use anyhow::{anyhow, Result};
use batchmat_core::{PermissionRequest, TableRef, TableSelection, ALL_TABLES};
use pest::Parser;
use pest_derive::Parser;

#[derive(Parser)]
#[grammar = "grammar.pest"]
pub struct BatchmatParser;

/// Parse `database.table`; `database.*` yields the wildcard table name
pub fn parse_table_ref(input: &str) -> Result<TableRef> {
    let pairs = BatchmatParser::parse(Rule::table_ref, input.trim())
        .map_err(|e| anyhow!("Invalid table reference '{}': {}", input, e))?;

    let mut parts = Vec::with_capacity(2);
    for pair in pairs {
        for inner_pair in pair.into_inner() {
            match inner_pair.as_rule() {
                Rule::identifier => parts.push(inner_pair.as_str().to_string()),
                Rule::all_tables => parts.push(ALL_TABLES.to_string()),
                _ => {}
            }
        }
    }

    match parts.as_slice() {
        [database, table] => Ok(TableRef::new(database.clone(), table.clone())),
        _ => Err(anyhow!("Invalid table reference '{}': expected database.table", input)),
    }
}

/// Group table references into one request per database, in first-seen order
pub fn group_table_refs(refs: &[TableRef]) -> Vec<PermissionRequest> {
    let mut grouped: Vec<(String, Vec<String>)> = Vec::new();
    for table in refs {
        match grouped.iter_mut().find(|(db, _)| *db == table.database) {
            Some((_, tables)) => tables.push(table.name.clone()),
            None => grouped.push((table.database.clone(), vec![table.name.clone()])),
        }
    }
    grouped
        .into_iter()
        .map(|(database, tables)| PermissionRequest {
            database,
            tables: TableSelection::from_names(tables),
            provisioning_uri_prefix: None,
        })
        .collect()
}
