use async_trait::async_trait;
use sdk::{Action, ActionParams, EngineError};
use serde_json::{json, Value};
use std::path::PathBuf;
use sysinfo::System;
use tracing::debug;

const DEFAULT_PROCESS_LIMIT: u64 = 10;

/// `get_system_info`: host facts that need no extra privileges
pub struct SystemInfo {
    workspace: PathBuf,
}

impl SystemInfo {
    pub fn new(workspace: PathBuf) -> Self {
        Self { workspace }
    }
}

fn hostname() -> String {
    std::env::var("HOSTNAME")
        .or_else(|_| std::env::var("COMPUTERNAME"))
        .ok()
        .or_else(|| {
            std::fs::read_to_string("/etc/hostname")
                .ok()
                .map(|h| h.trim().to_string())
        })
        .filter(|h| !h.is_empty())
        .unwrap_or_else(|| "unknown".to_string())
}

#[async_trait]
impl Action for SystemInfo {
    fn name(&self) -> &str {
        "get_system_info"
    }

    fn description(&self) -> &str {
        "Report operating system, architecture, CPU count and host name"
    }

    fn parameters(&self) -> &[&'static str] {
        &[]
    }

    async fn execute(&self, _params: &ActionParams) -> Result<Value, EngineError> {
        let cpus = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);
        let cwd = std::env::current_dir()
            .map(|p| p.display().to_string())
            .unwrap_or_default();

        Ok(json!({
            "os": std::env::consts::OS,
            "family": std::env::consts::FAMILY,
            "arch": std::env::consts::ARCH,
            "cpus": cpus,
            "hostname": hostname(),
            "cwd": cwd,
            "workspace": self.workspace.display().to_string(),
            "version": env!("CARGO_PKG_VERSION"),
            "timestamp": chrono::Utc::now().to_rfc3339(),
        }))
    }
}

/// `get_running_processes`: the busiest processes by CPU share
pub struct RunningProcesses;

#[async_trait]
impl Action for RunningProcesses {
    fn name(&self) -> &str {
        "get_running_processes"
    }

    fn description(&self) -> &str {
        "List running processes with CPU and memory usage, busiest first"
    }

    fn parameters(&self) -> &[&'static str] {
        &["limit"]
    }

    async fn execute(&self, params: &ActionParams) -> Result<Value, EngineError> {
        let limit = params.u64_opt("limit").unwrap_or(DEFAULT_PROCESS_LIMIT) as usize;

        let (total, processes) = tokio::task::spawn_blocking(move || snapshot_processes(limit))
            .await
            .map_err(|e| EngineError::ActionFailed(format!("Process scan failed: {}", e)))?;
        debug!("Scanned {} processes, returning {}", total, processes.len());

        Ok(json!({
            "processes": processes,
            "total_processes": total,
        }))
    }
}

fn snapshot_processes(limit: usize) -> (usize, Vec<Value>) {
    let mut sys = System::new();
    sys.refresh_memory();
    sys.refresh_processes();
    // cpu usage is a delta between two refreshes
    std::thread::sleep(sysinfo::MINIMUM_CPU_UPDATE_INTERVAL);
    sys.refresh_processes();

    let total_memory = sys.total_memory().max(1) as f64;
    let mut rows: Vec<(f32, Value)> = sys
        .processes()
        .values()
        .map(|process| {
            let cpu = process.cpu_usage();
            let row = json!({
                "pid": process.pid().as_u32(),
                "name": process.name(),
                "cpu_percent": cpu,
                "memory_percent": process.memory() as f64 / total_memory * 100.0,
            });
            (cpu, row)
        })
        .collect();

    let total = rows.len();
    rows.sort_by(|a, b| b.0.total_cmp(&a.0));
    rows.truncate(limit);
    (total, rows.into_iter().map(|(_, row)| row).collect())
}
