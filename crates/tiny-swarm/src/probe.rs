//! Host hardware probe: `/proc/meminfo` for memory, `df -Pk` for disk.

use std::path::PathBuf;

use async_trait::async_trait;
use coordination::{HardwareProbe, HardwareSnapshot};
use tokio::process::Command;
use tracing::warn;

/// Probes the machine the swarm runs on.
///
/// Figures that cannot be read come back as zero, which the selector treats
/// as "nothing fits" rather than guessing.
#[derive(Debug, Clone)]
pub struct HostProbe {
    /// Filesystem whose free space is reported.
    disk_path: PathBuf,
}

impl HostProbe {
    pub fn new(disk_path: impl Into<PathBuf>) -> Self {
        Self {
            disk_path: disk_path.into(),
        }
    }

    async fn memory_mb(&self) -> (u64, u64) {
        match tokio::fs::read_to_string("/proc/meminfo").await {
            Ok(text) => parse_meminfo(&text),
            Err(e) => {
                warn!(error = %e, "Could not read /proc/meminfo");
                (0, 0)
            }
        }
    }

    async fn free_disk_mb(&self) -> u64 {
        // df needs an existing path; walk up to the nearest ancestor.
        let mut path = self.disk_path.as_path();
        while !tokio::fs::try_exists(path).await.unwrap_or(false) {
            match path.parent() {
                Some(parent) => path = parent,
                None => break,
            }
        }
        let output = Command::new("df")
            .arg("-Pk")
            .arg(path)
            .kill_on_drop(true)
            .output()
            .await;
        match output {
            Ok(output) if output.status.success() => {
                parse_df(&String::from_utf8_lossy(&output.stdout)).unwrap_or(0)
            }
            Ok(output) => {
                warn!(code = ?output.status.code(), "df failed");
                0
            }
            Err(e) => {
                warn!(error = %e, "Could not run df");
                0
            }
        }
    }
}

impl Default for HostProbe {
    fn default() -> Self {
        Self::new(dirs::home_dir().unwrap_or_else(|| PathBuf::from("/")))
    }
}

#[async_trait]
impl HardwareProbe for HostProbe {
    async fn snapshot(&self) -> HardwareSnapshot {
        let ((total_ram_mb, available_ram_mb), free_disk_mb) =
            tokio::join!(self.memory_mb(), self.free_disk_mb());
        HardwareSnapshot {
            total_ram_mb,
            available_ram_mb,
            free_disk_mb,
            cpu_cores: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1),
        }
    }
}

/// `(MemTotal, MemAvailable)` in MB. `MemAvailable` falls back to `MemFree`
/// on kernels that lack it.
pub fn parse_meminfo(text: &str) -> (u64, u64) {
    let field = |name: &str| {
        text.lines()
            .find_map(|line| line.strip_prefix(name)?.strip_prefix(':'))
            .and_then(|rest| rest.split_whitespace().next()?.parse::<u64>().ok())
            .map(|kb| kb / 1024)
    };
    let total = field("MemTotal").unwrap_or(0);
    let available = field("MemAvailable").or_else(|| field("MemFree")).unwrap_or(0);
    (total, available)
}

/// Available MB from POSIX `df -Pk` output (fourth column of the data row).
pub fn parse_df(stdout: &str) -> Option<u64> {
    let row = stdout.lines().nth(1)?;
    let kb: u64 = row.split_whitespace().nth(3)?.parse().ok()?;
    Some(kb / 1024)
}
