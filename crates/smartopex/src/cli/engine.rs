//! `smartopex engine` - OCR engine registry administration.

use crate::cli::config;
use anyhow::{Context, Result};
use clap::Subcommand;
use comfy_table::{presets::UTF8_FULL_CONDENSED, Table};
use std::path::PathBuf;

#[derive(Subcommand, Debug)]
pub enum EngineCommand {
    /// Show the currently active engine script
    Current,
    /// List uploaded engine versions
    List,
    /// Switch the active engine script
    Activate { file_name: String },
    /// Upload a new engine version
    Upload {
        file: PathBuf,
        /// Also activate the uploaded version
        #[arg(long)]
        activate: bool,
    },
}

pub fn run(command: EngineCommand) -> Result<()> {
    let registry = config::engine_registry();

    match command {
        EngineCommand::Current => {
            let script = registry.active_script();
            println!("{}", script.display());
        }

        EngineCommand::List => {
            let versions = registry.list_versions()?;
            if versions.is_empty() {
                println!("No engine versions uploaded");
                return Ok(());
            }

            let mut table = Table::new();
            table.load_preset(UTF8_FULL_CONDENSED);
            table.set_header(["File", "Updated", "Active"]);
            for v in &versions {
                table.add_row([
                    v.file_name.clone(),
                    v.updated_at.to_rfc3339(),
                    if v.is_active { "*".into() } else { String::new() },
                ]);
            }
            println!("{table}");
        }

        EngineCommand::Activate { file_name } => {
            let path = registry.set_active(&file_name)?;
            println!("Engine updated: {}", path.display());
        }

        EngineCommand::Upload { file, activate } => {
            let content = std::fs::read(&file)
                .with_context(|| format!("Failed to read {}", file.display()))?;
            let version = registry.upload(&content, activate)?;
            println!(
                "Uploaded {}{}",
                version.file_name,
                if activate { " (active)" } else { "" }
            );
        }
    }

    Ok(())
}
