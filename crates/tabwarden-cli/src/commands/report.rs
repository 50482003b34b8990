use anyhow::Result;
use chrono::Local;
use std::path::Path;
use tabled::{Table, Tabled};
use tabwarden_core::{
    facade::format_duration,
    ipc::{IpcClient, IpcRequest, IpcResponse},
};
use tabwarden_storage::Store;

#[derive(Tabled)]
struct UsageRow {
    #[tabled(rename = "Site")]
    hostname: String,
    #[tabled(rename = "Time")]
    time: String,
}

pub async fn show_report(data_dir: &Path) -> Result<()> {
    let usage = fetch_usage(data_dir).await?;

    println!("Browsing time for {}", Local::now().date_naive());
    if usage.is_empty() {
        println!("No browsing recorded today.");
        return Ok(());
    }

    let total: u64 = usage.iter().map(|(_, ms)| *ms).sum();
    let rows: Vec<UsageRow> = usage
        .into_iter()
        .map(|(hostname, ms)| UsageRow {
            hostname,
            time: format_duration(ms),
        })
        .collect();

    println!("{}", Table::new(rows));
    println!("Total: {}", format_duration(total));
    Ok(())
}

/// Live numbers from the daemon when it is up; otherwise the flushed
/// values straight from the store.
async fn fetch_usage(data_dir: &Path) -> Result<Vec<(String, u64)>> {
    let sock_path = data_dir.join("tabwarden.sock");
    if sock_path.exists() {
        let client = IpcClient::new(&sock_path);
        if let Ok(IpcResponse::UsageToday { usage }) =
            client.send_command(IpcRequest::UsageToday).await
        {
            return Ok(usage);
        }
        log::warn!("daemon not responding; reading flushed usage from the store");
    }

    let store = Store::new(None)?;
    let mut usage: Vec<(String, u64)> = store.load_usage()?.into_iter().collect();
    usage.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    Ok(usage)
}
