//! JSON schemas of the documents gantry reads and writes.
//!
//! Editors pick these up through the `$schema` key of a guest file.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Args, Subcommand};
use gantry_common::{Installable, Options};
use schemars::{Schema, schema_for};

use crate::config::GuestConfig;
use crate::pidfile::RebootRequest;

#[derive(Debug, Args)]
pub struct SchemaArgs {
    #[command(subcommand)]
    pub action: SchemaAction,
}

#[derive(Debug, Subcommand)]
pub enum SchemaAction {
    /// Write one `<name>.schema.json` per document, or print them all
    Generate {
        /// Directory to write into; without it one JSON object keyed by
        /// document is printed
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Show which documents have a schema
    List,
}

/// One document gantry has a schema for.
struct Document {
    name: &'static str,
    stem: &'static str,
    about: &'static str,
    schema: fn() -> Schema,
}

impl Document {
    fn filename(&self) -> String {
        format!("{}.schema.json", self.stem)
    }
}

const DOCUMENTS: &[Document] = &[
    Document {
        name: "GuestConfig",
        stem: "guest",
        about: "A guest description passed with --guest",
        schema: || schema_for!(GuestConfig),
    },
    Document {
        name: "Installable",
        stem: "installable",
        about: "A package, package file, URL or filesystem path",
        schema: || schema_for!(Installable),
    },
    Document {
        name: "Options",
        stem: "install-options",
        about: "Install-time flags of package operations",
        schema: || schema_for!(Options),
    },
    Document {
        name: "RebootRequest",
        stem: "reboot-request",
        about: "The reboot request left by the reboot helper",
        schema: || schema_for!(RebootRequest),
    },
];

fn write_schemas(dir: &Path) -> Result<()> {
    fs::create_dir_all(dir)
        .with_context(|| format!("Failed to create schema directory {}", dir.display()))?;
    for document in DOCUMENTS {
        let path = dir.join(document.filename());
        let json = serde_json::to_string_pretty(&(document.schema)())?;
        fs::write(&path, json).with_context(|| format!("Failed to write {}", path.display()))?;
        println!("{}", path.display());
    }
    Ok(())
}

/// Every schema in one object, keyed by file stem.
fn combined_schemas() -> Result<serde_json::Value> {
    let combined = DOCUMENTS
        .iter()
        .map(|document| -> Result<_> {
            Ok((document.stem, serde_json::to_value((document.schema)())?))
        })
        .collect::<Result<BTreeMap<_, _>>>()?;
    Ok(serde_json::to_value(combined)?)
}

pub fn run(args: SchemaArgs) -> Result<()> {
    match args.action {
        SchemaAction::Generate { output: Some(dir) } => write_schemas(&dir),
        SchemaAction::Generate { output: None } => {
            println!("{}", serde_json::to_string_pretty(&combined_schemas()?)?);
            Ok(())
        }
        SchemaAction::List => {
            for document in DOCUMENTS {
                println!("{:<14} {:<28} {}", document.name, document.filename(), document.about);
            }
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_combined_has_every_document() {
        let combined = combined_schemas().unwrap();
        let object = combined.as_object().unwrap();
        assert_eq!(object.len(), DOCUMENTS.len());
        for document in DOCUMENTS {
            assert!(object.contains_key(document.stem), "{}", document.stem);
        }
    }

    #[test]
    fn test_guest_schema_uses_kebab_case() {
        let guest = serde_json::to_string(&schema_for!(GuestConfig)).unwrap();
        assert!(guest.contains("\"package-manager\""));
        assert!(guest.contains("\"connect-retries\""));
    }

    #[test]
    fn test_write_schemas_creates_files() {
        let dir = tempfile::tempdir().unwrap();
        write_schemas(dir.path()).unwrap();
        for document in DOCUMENTS {
            assert!(dir.path().join(document.filename()).exists());
        }
    }
}
