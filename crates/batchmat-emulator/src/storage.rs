//! Persistent storage for the catalog emulator

use crate::EmulatorState;
use anyhow::{Context, Result};
use std::path::Path;

/// JSON file holding emulator state
#[derive(Debug)]
pub struct FileStorage {
    file_path: String,
}

impl FileStorage {
    pub fn new(file_path: String) -> Self {
        Self { file_path }
    }

    pub fn path(&self) -> &str {
        &self.file_path
    }

    /// Load state from file; a missing file is an empty catalog
    pub async fn load(&self) -> Result<EmulatorState> {
        if !self.exists() {
            return Ok(EmulatorState::new());
        }

        let content = tokio::fs::read_to_string(&self.file_path).await?;
        let state: EmulatorState = serde_json::from_str(&content)
            .with_context(|| format!("Corrupt catalog state in {}", self.file_path))?;
        Ok(state)
    }

    pub async fn save(&self, state: &EmulatorState) -> Result<()> {
        let content = serde_json::to_string_pretty(state)?;

        if let Some(parent) = Path::new(&self.file_path).parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }

        tokio::fs::write(&self.file_path, content).await?;
        Ok(())
    }

    pub fn exists(&self) -> bool {
        Path::new(&self.file_path).exists()
    }
}

/// Render state for humans
pub struct StateExporter;

impl StateExporter {
    /// One line per table, grouped by database
    pub fn to_summary(state: &EmulatorState) -> String {
        let mut summary = String::new();
        summary.push_str("🦀 Catalog Emulator State\n");
        summary.push_str("=========================\n\n");
        summary.push_str(&format!("- Databases: {}\n", state.databases.len()));
        summary.push_str(&format!("- Tables: {}\n", state.table_count()));
        if !state.denied_databases.is_empty() {
            let denied: Vec<&str> = state.denied_databases.iter().map(String::as_str).collect();
            summary.push_str(&format!("- Denied: {}\n", denied.join(", ")));
        }

        for (database, tables) in &state.databases {
            summary.push_str(&format!("\n📁 {}\n", database));
            for (name, entry) in tables {
                summary.push_str(&format!("  • {} → {}", name, entry.location));
                if let Some(description) = &entry.description {
                    summary.push_str(&format!("  ({})", description));
                }
                summary.push('\n');
            }
        }

        summary
    }
}
