//! `smartopex opex` - expense activities and their receipts.

use crate::cli::config;
use anyhow::{bail, Result};
use clap::Subcommand;
use comfy_table::{presets::UTF8_FULL_CONDENSED, Table};
use smartopex_db::{ActivityUpdate, NewActivity, OpexDb, ReceiptJob, ReviewStatus};
use std::path::PathBuf;
use tracing::error;

#[derive(Subcommand, Debug)]
pub enum OpexCommand {
    /// Create an activity
    Create {
        #[arg(long)]
        item_name: String,
        #[arg(long)]
        manual_total: f64,
        #[arg(long)]
        recipient: Option<String>,
        #[arg(long)]
        district: Option<i64>,
        #[arg(long)]
        group: Option<i64>,
        /// Transaction date (YYYY-MM-DD)
        #[arg(long)]
        date: Option<String>,
        #[arg(long)]
        created_by: Option<i64>,
    },
    /// List activities
    List {
        #[arg(long)]
        district: Option<i64>,
        #[arg(long)]
        json: bool,
    },
    /// Review one activity: receipts, OCR totals, status
    Show {
        id: i64,
        #[arg(long)]
        json: bool,
    },
    /// Edit an activity (a manual-total edit re-reconciles; an explicit
    /// --status is stored verbatim)
    Update {
        id: i64,
        #[arg(long)]
        item_name: Option<String>,
        #[arg(long)]
        manual_total: Option<f64>,
        #[arg(long)]
        recipient: Option<String>,
        #[arg(long)]
        date: Option<String>,
        /// OK, PERLU_REVIEW, or TELAH_DIREVIEW
        #[arg(long)]
        status: Option<String>,
    },
    /// Delete an activity and everything attached to it
    Delete { id: i64 },
    /// Attach a receipt image and enqueue OCR for it
    AddReceipt {
        id: i64,
        file: PathBuf,
        #[arg(long)]
        file_type: Option<String>,
    },
    /// Remove a receipt (and its document + extraction result)
    DeleteReceipt { id: i64, receipt_id: i64 },
    /// Attach a supporting document (no OCR)
    AddDocument {
        id: i64,
        file: PathBuf,
        #[arg(long)]
        file_type: Option<String>,
    },
    /// Remove a supporting document
    DeleteDocument { id: i64, document_id: i64 },
    /// Recompute review status for one activity or all of them
    Recompute {
        id: Option<i64>,
        #[arg(long)]
        all: bool,
    },
    /// Export activities as CSV
    Export {
        /// Only activities created by this user
        #[arg(long)]
        user: Option<i64>,
        /// PIC name printed in the header
        #[arg(long)]
        pic: Option<String>,
        /// Output file (stdout when omitted)
        #[arg(long, short)]
        output: Option<PathBuf>,
    },
}

pub async fn run(db_flag: Option<PathBuf>, command: OpexCommand) -> Result<()> {
    let db = config::open_db(db_flag).await?;

    match command {
        OpexCommand::Create {
            item_name,
            manual_total,
            recipient,
            district,
            group,
            date,
            created_by,
        } => {
            let activity = db
                .create_activity(NewActivity {
                    item_name,
                    manual_total,
                    recipient_name: recipient,
                    district_id: district,
                    group_view_id: group,
                    transaction_date: date,
                    created_by,
                })
                .await?;
            println!("Created activity {}", activity.id);
        }

        OpexCommand::List { district, json } => {
            let activities = db.list_activities(district).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&activities)?);
                return Ok(());
            }

            let mut table = Table::new();
            table.load_preset(UTF8_FULL_CONDENSED);
            table.set_header(["ID", "Item", "Manual Total", "OCR Total", "Status", "Date"]);
            for a in &activities {
                let sum = db.receipt_sum_for_activity(a.id).await?;
                table.add_row([
                    a.id.to_string(),
                    a.item_name.clone(),
                    format!("{:.2}", a.manual_total),
                    format!("{:.2}", sum),
                    status_label(a.status),
                    a.transaction_date.clone().unwrap_or_default(),
                ]);
            }
            println!("{table}");
        }

        OpexCommand::Show { id, json } => {
            let Some(review) = db.get_activity_review(id).await? else {
                bail!("Activity {} not found", id);
            };
            if json {
                println!("{}", serde_json::to_string_pretty(&review)?);
                return Ok(());
            }

            let a = &review.activity;
            println!("Activity {}: {}", a.id, a.item_name);
            if let Some(ref recipient) = a.recipient_name {
                println!("  Recipient: {}", recipient);
            }
            println!("  Manual total: {:.2}", a.manual_total);
            println!("  OCR total:    {:.2}", review.total_ocr);
            println!("  Status:       {}", status_label(a.status));

            let mut table = Table::new();
            table.load_preset(UTF8_FULL_CONDENSED);
            table.set_header(["Receipt", "File", "Extracted"]);
            for r in &review.receipts {
                table.add_row([
                    r.id.to_string(),
                    r.file_path.clone(),
                    r.ocr_detected_total
                        .map(|t| format!("{:.2}", t))
                        .unwrap_or_else(|| "pending".into()),
                ]);
            }
            println!("{table}");
        }

        OpexCommand::Update {
            id,
            item_name,
            manual_total,
            recipient,
            date,
            status,
        } => {
            let status = match status {
                Some(ref s) => Some(
                    ReviewStatus::parse(s)
                        .ok_or_else(|| anyhow::anyhow!("Unknown status: {}", s))?,
                ),
                None => None,
            };
            let updated = db
                .apply_activity_update(
                    id,
                    ActivityUpdate {
                        item_name,
                        manual_total,
                        recipient_name: recipient,
                        transaction_date: date,
                        status,
                        ..Default::default()
                    },
                )
                .await?;
            match updated {
                Some(a) => println!("Activity {} updated, status {}", a.id, status_label(a.status)),
                None => bail!("Activity {} not found", id),
            }
        }

        OpexCommand::Delete { id } => {
            if db.delete_activity(id).await? {
                println!("Activity {} deleted", id);
            } else {
                bail!("Activity {} not found", id);
            }
        }

        OpexCommand::AddReceipt { id, file, file_type } => {
            if db.get_activity(id).await?.is_none() {
                bail!("Activity {} not found", id);
            }
            let file_path = file.to_string_lossy().into_owned();
            let (receipt, document) = db
                .add_receipt(id, &file_path, file_type.as_deref())
                .await?;

            let job = ReceiptJob {
                receipt_id: receipt.id,
                opex_item_id: id,
                document_id: document.id,
                file_path,
            };
            // Enqueue failure is logged, never fatal: the receipt row exists
            // and can be re-submitted later.
            if let Err(e) = db.enqueue_receipt_ocr(&job).await {
                error!(receipt = receipt.id, error = %e, "Failed to enqueue OCR job");
            }
            println!("Receipt {} attached, OCR queued", receipt.id);
        }

        OpexCommand::DeleteReceipt { id, receipt_id } => {
            match db.delete_receipt(id, receipt_id).await? {
                Some(_) => {
                    let report = db.recompute_status(id).await?;
                    println!(
                        "Receipt {} removed, status {}",
                        receipt_id,
                        report
                            .status
                            .map(|s| s.to_string())
                            .unwrap_or_else(|| "PENDING".into())
                    );
                }
                None => bail!("Receipt {} not found on activity {}", receipt_id, id),
            }
        }

        OpexCommand::AddDocument { id, file, file_type } => {
            if db.get_activity(id).await?.is_none() {
                bail!("Activity {} not found", id);
            }
            let document = db
                .add_document(id, &file.to_string_lossy(), file_type.as_deref())
                .await?;
            println!("Document {} attached", document.id);
        }

        OpexCommand::DeleteDocument { id, document_id } => {
            if db.delete_document(id, document_id).await? {
                println!("Document {} removed", document_id);
            } else {
                bail!("Document {} not found on activity {}", document_id, id);
            }
        }

        OpexCommand::Recompute { id, all } => {
            let ids = match (id, all) {
                (Some(id), false) => vec![id],
                (None, true) => db.list_activity_ids().await?,
                _ => bail!("Pass an activity id or --all"),
            };
            for id in ids {
                let report = db.recompute_status(id).await?;
                println!(
                    "activity {}: sum={:.2} pending={} status={} changed={}",
                    id,
                    report.sum,
                    report.pending,
                    report
                        .status
                        .map(|s| s.to_string())
                        .unwrap_or_else(|| "-".into()),
                    report.changed
                );
            }
        }

        OpexCommand::Export { user, pic, output } => {
            let csv = crate::cli::export::export_csv(&db, user, pic.as_deref()).await?;
            match output {
                Some(path) => {
                    std::fs::write(&path, csv)?;
                    println!("Exported to {}", path.display());
                }
                None => print!("{}", csv),
            }
        }
    }

    Ok(())
}

fn status_label(status: Option<ReviewStatus>) -> String {
    status
        .map(|s| s.to_string())
        .unwrap_or_else(|| "PENDING".into())
}
