//! cgroup v2 counter readers.
//!
//! Containers show up under the system slice as `docker-<id>.scope`. The
//! CPU monitor reads the cumulative `usage_usec` from `cpu.stat`; the
//! memory monitor reads `memory.current` (bytes).

use std::path::{Path, PathBuf};

use crate::error::{MonitorError, MonitorResult};

const DEFAULT_CGROUP_ROOT: &str = "/sys/fs/cgroup/system.slice";

/// Reads per-container counters from the cgroup v2 hierarchy.
#[derive(Debug, Clone)]
pub struct CgroupReader {
    root: PathBuf,
}

impl Default for CgroupReader {
    fn default() -> Self {
        Self::new(DEFAULT_CGROUP_ROOT)
    }
}

impl CgroupReader {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn scope(&self, container_id: &str) -> PathBuf {
        self.root.join(format!("docker-{container_id}.scope"))
    }

    /// Cumulative CPU time in microseconds (`usage_usec` from `cpu.stat`).
    pub fn cpu_usage_usec(&self, container_id: &str) -> MonitorResult<u64> {
        let path = self.scope(container_id).join("cpu.stat");
        let content = std::fs::read_to_string(&path)?;

        for line in content.lines() {
            if let Some(value) = line.strip_prefix("usage_usec ") {
                return value
                    .trim()
                    .parse()
                    .map_err(|_| MonitorError::Parse(format!("usage_usec {value:?}")));
            }
        }
        Err(MonitorError::MissingCounter {
            container: container_id.to_string(),
            counter: "usage_usec".to_string(),
        })
    }

    /// Current memory usage in MiB (`memory.current`, bytes on disk).
    pub fn memory_current_mib(&self, container_id: &str) -> MonitorResult<u64> {
        let path = self.scope(container_id).join("memory.current");
        let content = std::fs::read_to_string(&path)?;
        let bytes: u64 = content
            .trim()
            .parse()
            .map_err(|_| MonitorError::Parse(format!("memory.current {content:?}")))?;
        Ok(bytes / (1024 * 1024))
    }
}

/// Test helper: write counters for a container scope under `root`.
#[cfg(test)]
pub(crate) fn write_counters(root: &Path, container_id: &str, cpu_usec: u64, memory_bytes: u64) {
    let scope = root.join(format!("docker-{container_id}.scope"));
    std::fs::create_dir_all(&scope).unwrap();
    std::fs::write(
        scope.join("cpu.stat"),
        format!("usage_usec {cpu_usec}\nuser_usec {}\nsystem_usec 0\n", cpu_usec / 2),
    )
    .unwrap();
    std::fs::write(scope.join("memory.current"), format!("{memory_bytes}\n")).unwrap();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_cpu_usage() {
        let dir = tempfile::tempdir().unwrap();
        write_counters(dir.path(), "abc", 123_456, 0);

        let reader = CgroupReader::new(dir.path());
        assert_eq!(reader.cpu_usage_usec("abc").unwrap(), 123_456);
    }

    #[test]
    fn reads_memory_in_mib() {
        let dir = tempfile::tempdir().unwrap();
        write_counters(dir.path(), "abc", 0, 52_428_800);

        let reader = CgroupReader::new(dir.path());
        assert_eq!(reader.memory_current_mib("abc").unwrap(), 50);
    }

    #[test]
    fn missing_scope_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let reader = CgroupReader::new(dir.path());
        assert!(matches!(
            reader.cpu_usage_usec("ghost"),
            Err(MonitorError::Io(_))
        ));
    }

    #[test]
    fn missing_counter_line_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let scope = dir.path().join("docker-abc.scope");
        std::fs::create_dir_all(&scope).unwrap();
        std::fs::write(scope.join("cpu.stat"), "user_usec 10\n").unwrap();

        let reader = CgroupReader::new(dir.path());
        assert!(matches!(
            reader.cpu_usage_usec("abc"),
            Err(MonitorError::MissingCounter { .. })
        ));
    }

    #[test]
    fn garbage_counter_is_a_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        let scope = dir.path().join("docker-abc.scope");
        std::fs::create_dir_all(&scope).unwrap();
        std::fs::write(scope.join("memory.current"), "not-a-number\n").unwrap();

        let reader = CgroupReader::new(dir.path());
        assert!(matches!(
            reader.memory_current_mib("abc"),
            Err(MonitorError::Parse(_))
        ));
    }
}
