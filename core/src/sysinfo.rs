//! System information snapshot for the `sysinfo` request

use std::fs;
use std::path::Path;

use schema::SysInfo;
use tracing::debug;

/// Collect a best-effort snapshot. Unreadable sources yield empty
/// strings or zeros rather than failing the request.
pub fn collect() -> SysInfo {
    let (memory_total_kib, memory_free_kib) = meminfo();
    let (storage_total_bytes, storage_free_bytes) = storage("/");
    SysInfo {
        os: std::env::consts::OS.to_string(),
        arch: std::env::consts::ARCH.to_string(),
        hostname: hostname(),
        user: std::env::var("USER")
            .or_else(|_| std::env::var("USERNAME"))
            .unwrap_or_default(),
        cpu_count: std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1),
        cpu_model: cpu_model(),
        memory_total_kib,
        memory_free_kib,
        storage_total_bytes,
        storage_free_bytes,
    }
}

fn hostname() -> String {
    fs::read_to_string("/proc/sys/kernel/hostname")
        .map(|s| s.trim().to_string())
        .or_else(|_| std::env::var("HOSTNAME"))
        .unwrap_or_default()
}

fn cpu_model() -> String {
    let Ok(cpuinfo) = fs::read_to_string("/proc/cpuinfo") else {
        return String::new();
    };
    cpuinfo
        .lines()
        .find(|line| line.starts_with("model name"))
        .and_then(|line| line.split(':').nth(1))
        .map(|model| model.trim().to_string())
        .unwrap_or_default()
}

/// (total, available) in KiB from /proc/meminfo.
fn meminfo() -> (u64, u64) {
    let Ok(meminfo) = fs::read_to_string("/proc/meminfo") else {
        return (0, 0);
    };
    let field = |name: &str| -> u64 {
        meminfo
            .lines()
            .find(|line| line.starts_with(name))
            .and_then(|line| line.split_whitespace().nth(1))
            .and_then(|v| v.parse().ok())
            .unwrap_or(0)
    };
    (field("MemTotal:"), field("MemAvailable:"))
}

/// (total, free-for-unprivileged) in bytes for the filesystem at `path`.
fn storage(path: &str) -> (u64, u64) {
    match nix::sys::statvfs::statvfs(Path::new(path)) {
        Ok(stat) => {
            let frsize = stat.fragment_size() as u64;
            (
                stat.blocks() as u64 * frsize,
                stat.blocks_available() as u64 * frsize,
            )
        }
        Err(e) => {
            debug!("statvfs({}) failed: {}", path, e);
            (0, 0)
        }
    }
}
