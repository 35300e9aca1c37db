use anyhow::{anyhow, Result};
use chrono::{SecondsFormat, Utc};
use powerping_engine::ScanReport;
use powerping_model::{HostInformation, PingResults};
use serde::Serialize;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

#[derive(Serialize)]
pub struct PingSummary<'a> {
    pub version: String,
    pub finished_at_utc: String,
    pub target: &'a str,
    pub address: Option<String>,
    pub results: &'a PingResults,
}

impl<'a> PingSummary<'a> {
    pub fn new(target: &'a str, address: Option<String>, results: &'a PingResults) -> Self {
        Self {
            version: env!("CARGO_PKG_VERSION").to_string(),
            finished_at_utc: now_utc(),
            target,
            address,
            results,
        }
    }
}

#[derive(Serialize)]
pub struct ScanSummary<'a> {
    pub version: String,
    pub finished_at_utc: String,
    pub range: &'a str,
    pub total: usize,
    pub scanned: usize,
    pub completed: bool,
    pub elapsed_ms: u64,
    pub hosts: &'a [HostInformation],
}

impl<'a> ScanSummary<'a> {
    pub fn new(range: &'a str, report: &'a ScanReport) -> Self {
        Self {
            version: env!("CARGO_PKG_VERSION").to_string(),
            finished_at_utc: now_utc(),
            range,
            total: report.total,
            scanned: report.scanned,
            completed: report.completed,
            elapsed_ms: report.elapsed.as_millis() as u64,
            hosts: &report.hosts,
        }
    }
}

fn now_utc() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true)
}

pub fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let json = serde_json::to_vec_pretty(value)?;
    atomic_write(path, &json)
}

fn atomic_write(path: &Path, data: &[u8]) -> Result<()> {
    let parent = path.parent().unwrap_or_else(|| Path::new("."));
    if !parent.as_os_str().is_empty() {
        fs::create_dir_all(parent)
            .map_err(|err| anyhow!("failed to create output directory {:?}: {}", parent, err))?;
    }

    let tmp_path = temp_path(path);
    let mut file = fs::File::create(&tmp_path)
        .map_err(|err| anyhow!("failed to create temp file {:?}: {}", tmp_path, err))?;
    file.write_all(data)
        .map_err(|err| anyhow!("failed to write temp file {:?}: {}", tmp_path, err))?;
    file.sync_all()
        .map_err(|err| anyhow!("failed to sync temp file {:?}: {}", tmp_path, err))?;

    if let Err(err) = fs::rename(&tmp_path, path) {
        let _ = fs::remove_file(&tmp_path);
        return Err(anyhow!("failed to replace output {:?}: {}", path, err));
    }

    // persist the rename itself, not just the file contents
    if let Ok(dir) = fs::File::open(parent) {
        let _ = dir.sync_all();
    }

    Ok(())
}

fn temp_path(path: &Path) -> PathBuf {
    let parent = path.parent().unwrap_or_else(|| Path::new("."));
    let file_name = path
        .file_name()
        .and_then(|name| name.to_str())
        .unwrap_or("results");
    let stamp = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos();
    parent.join(format!(".{}.part-{}-{}", file_name, std::process::id(), stamp))
}
