//! CSV export of activities with their OCR totals.

use anyhow::Result;
use smartopex_db::OpexDb;

/// Build the export CSV: PIC/PR header lines, then one row per activity.
pub async fn export_csv(db: &OpexDb, user: Option<i64>, pic: Option<&str>) -> Result<String> {
    let activities = match user {
        Some(user_id) => db.list_activities_by_user(user_id).await?,
        None => db.list_activities(None).await?,
    };

    let pic_name = pic.unwrap_or("PIC");
    let pr_number = format!(
        "PR-{}-{}",
        chrono::Utc::now().timestamp_millis(),
        std::process::id()
    );

    let mut rows: Vec<Vec<String>> = Vec::new();
    rows.push(vec![format!("PIC: {}", pic_name)]);
    rows.push(vec![format!("PR Number: {}", pr_number)]);
    rows.push(Vec::new());
    rows.push(
        ["ID", "Transaction Date", "Item Name", "Manual Total", "Total OCR", "Status"]
            .iter()
            .map(|s| s.to_string())
            .collect(),
    );

    for a in &activities {
        let total_ocr = db.receipt_sum_for_activity(a.id).await?;
        rows.push(vec![
            a.id.to_string(),
            a.transaction_date.clone().unwrap_or_default(),
            a.item_name.clone(),
            format!("{}", a.manual_total),
            format!("{}", total_ocr),
            a.status.map(|s| s.to_string()).unwrap_or_default(),
        ]);
    }

    let csv = rows
        .iter()
        .map(|row| {
            row.iter()
                .map(|value| escape_csv(value))
                .collect::<Vec<_>>()
                .join(",")
        })
        .collect::<Vec<_>>()
        .join("\n");

    Ok(csv)
}

/// Quote a field only when it contains a quote, comma, or line break.
fn escape_csv(value: &str) -> String {
    if value.contains(['"', ',', '\n', '\r']) {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use smartopex_db::NewActivity;

    #[test]
    fn escaping_quotes_and_commas() {
        assert_eq!(escape_csv("plain"), "plain");
        assert_eq!(escape_csv("a,b"), "\"a,b\"");
        assert_eq!(escape_csv("say \"hi\""), "\"say \"\"hi\"\"\"");
        assert_eq!(escape_csv("two\nlines"), "\"two\nlines\"");
    }

    #[tokio::test]
    async fn export_contains_header_and_rows() {
        let db = OpexDb::open_in_memory().await.unwrap();
        db.create_activity(NewActivity {
            item_name: "Cables, assorted".into(),
            manual_total: 25.5,
            ..Default::default()
        })
        .await
        .unwrap();

        let csv = export_csv(&db, None, Some("Jane")).await.unwrap();
        let lines: Vec<&str> = csv.lines().collect();

        assert_eq!(lines[0], "PIC: Jane");
        assert!(lines[1].starts_with("PR Number: PR-"));
        assert_eq!(lines[2], "");
        assert!(lines[3].starts_with("ID,Transaction Date,Item Name"));
        assert!(lines[4].contains("\"Cables, assorted\""));
        assert!(lines[4].contains("25.5"));
    }
}
