//! Overview of what has already been stored.
//!
//! Used by `hcdigest history` to confirm that runs are persisting new
//! notices and to see which periods are on record.

use anyhow::Result;

use crate::config::Config;
use crate::db;
use crate::models::StoredSummary;

/// Query the store and print the most recent rows, newest first.
pub async fn run_history(config: &Config, limit: i64) -> Result<()> {
    let store = db::open_store(&config.store).await?;
    let total = store.count().await?;
    let rows = store.recent(limit).await?;
    store.close().await;

    println!("{}", render_history(total, &rows));
    Ok(())
}

pub fn render_history(total: i64, rows: &[StoredSummary]) -> String {
    let mut out = String::new();
    out.push_str("HomeCase Digest: stored messages\n");
    out.push_str("================================\n\n");
    out.push_str(&format!("  Total:  {}\n", total));

    if rows.is_empty() {
        out.push_str("\n  No messages stored yet.");
        return out;
    }

    out.push_str(&format!(
        "\n  {:<12} {:<18} {}\n",
        "Period", "Hash", "Stored at"
    ));
    for row in rows {
        out.push_str(&format!(
            "  {:<12} {:<18} {}\n",
            row.message_date.format("%Y-%m"),
            &row.content_hash[..row.content_hash.len().min(16)],
            row.created_at.format("%Y-%m-%d %H:%M")
        ));
    }
    out.truncate(out.trim_end().len());
    out
}
