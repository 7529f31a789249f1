//! Core data types for catalog access policies

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// Wildcard table name meaning "every table in the database"
pub const ALL_TABLES: &str = "*";

/// A logical table inside a catalog database
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TableRef {
    pub database: String,
    pub name: String,
}

impl TableRef {
    pub fn new(database: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            database: database.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for TableRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.database, self.name)
    }
}

/// Access level requested for a set of tables.
///
/// Write access always includes read access.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccessLevel {
    Read,
    Write,
}

impl fmt::Display for AccessLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AccessLevel::Read => f.write_str("read"),
            AccessLevel::Write => f.write_str("write"),
        }
    }
}

impl std::str::FromStr for AccessLevel {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "read" => Ok(AccessLevel::Read),
            "write" => Ok(AccessLevel::Write),
            other => Err(crate::Error::invalid_request(format!(
                "unknown access level '{}', expected 'read' or 'write'",
                other
            ))),
        }
    }
}

/// Which tables of a database a request covers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "Vec<String>", into = "Vec<String>")]
pub enum TableSelection {
    /// Every table, present and future (`"*"`)
    All,
    /// Explicit table names, in caller order
    Named(Vec<String>),
}

impl TableSelection {
    /// Build a selection from a raw list. Any `"*"` entry widens the selection
    /// to every table. An empty list stays empty and is rejected by the resolver.
    pub fn from_names<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let names: Vec<String> = names.into_iter().map(Into::into).collect();
        if names.iter().any(|n| n == ALL_TABLES) {
            TableSelection::All
        } else {
            TableSelection::Named(names)
        }
    }

    pub fn is_all(&self) -> bool {
        matches!(self, TableSelection::All)
    }
}

impl Default for TableSelection {
    fn default() -> Self {
        TableSelection::All
    }
}

impl From<Vec<String>> for TableSelection {
    fn from(names: Vec<String>) -> Self {
        TableSelection::from_names(names)
    }
}

impl From<TableSelection> for Vec<String> {
    fn from(selection: TableSelection) -> Self {
        match selection {
            TableSelection::All => vec![ALL_TABLES.to_string()],
            TableSelection::Named(names) => names,
        }
    }
}

/// Input to the policy resolver
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PermissionRequest {
    pub database: String,
    #[serde(default)]
    pub tables: TableSelection,
    /// Storage root under which a missing destination table will be created
    #[serde(default)]
    pub provisioning_uri_prefix: Option<String>,
}

impl PermissionRequest {
    /// Request covering every table of `database`
    pub fn all_tables(database: impl Into<String>) -> Self {
        Self {
            database: database.into(),
            tables: TableSelection::All,
            provisioning_uri_prefix: None,
        }
    }

    pub fn tables<I, S>(database: impl Into<String>, tables: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            database: database.into(),
            tables: TableSelection::from_names(tables),
            provisioning_uri_prefix: None,
        }
    }

    pub fn with_provisioning_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.provisioning_uri_prefix = Some(prefix.into());
        self
    }
}

/// Outcome of locating one table in the catalog
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedLocation {
    pub table: TableRef,
    pub storage_uri: Option<String>,
    pub existed: bool,
}

impl ResolvedLocation {
    pub fn found(table: TableRef, storage_uri: impl Into<String>) -> Self {
        Self {
            table,
            storage_uri: Some(storage_uri.into()),
            existed: true,
        }
    }

    pub fn missing(table: TableRef) -> Self {
        Self {
            table,
            storage_uri: None,
            existed: false,
        }
    }
}

/// An allow statement: a set of actions over an ordered list of resources
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PolicyStatement {
    #[serde(rename = "Action")]
    pub actions: BTreeSet<String>,
    #[serde(rename = "Resource")]
    pub resources: Vec<String>,
}

impl PolicyStatement {
    pub fn new<A, S>(actions: A, resources: Vec<String>) -> Self
    where
        A: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            actions: actions.into_iter().map(Into::into).collect(),
            resources: dedup_in_order(resources),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty() || self.resources.is_empty()
    }

    /// Whether this statement grants `action` on `resource` verbatim.
    /// Patterns are compared as opaque strings.
    pub fn grants(&self, action: &str, resource: &str) -> bool {
        self.actions.contains(action) && self.resources.iter().any(|r| r == resource)
    }

    /// Render as an IAM statement object
    pub fn to_iam_json(&self) -> serde_json::Value {
        serde_json::json!({
            "Effect": "Allow",
            "Action": self.actions,
            "Resource": self.resources,
        })
    }
}

/// Storage and catalog statements produced by one resolve call
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedPolicy {
    pub storage: PolicyStatement,
    pub catalog: PolicyStatement,
}

impl ResolvedPolicy {
    pub fn statements(&self) -> [&PolicyStatement; 2] {
        [&self.storage, &self.catalog]
    }
}

/// IAM policy document wrapping a list of statements
pub fn policy_document<'a, I>(statements: I) -> serde_json::Value
where
    I: IntoIterator<Item = &'a PolicyStatement>,
{
    let statements: Vec<serde_json::Value> =
        statements.into_iter().map(PolicyStatement::to_iam_json).collect();
    serde_json::json!({
        "Version": "2012-10-17",
        "Statement": statements,
    })
}

pub(crate) fn dedup_in_order(items: Vec<String>) -> Vec<String> {
    let mut seen = std::collections::HashSet::with_capacity(items.len());
    items
        .into_iter()
        .filter(|item| seen.insert(item.clone()))
        .collect()
}
