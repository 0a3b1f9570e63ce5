//! Agent configuration.
//!
//! One YAML file selects the metric class, thresholds, cluster topology,
//! and logging. Thresholds default to `-1` (disabled); enabling more than
//! one metric class is a fatal configuration error.

use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use anyhow::Context;
use serde::Deserialize;

/// Parsed agent configuration. Unknown keys are ignored.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    #[serde(rename = "lower-cpu")]
    pub lower_cpu: f64,
    #[serde(rename = "upper-cpu")]
    pub upper_cpu: f64,

    #[serde(rename = "lower-mm")]
    pub lower_mb: i64,
    #[serde(rename = "upper-mm")]
    pub upper_mb: i64,
    #[serde(rename = "lower-mg")]
    pub lower_gb: i64,
    #[serde(rename = "upper-mg")]
    pub upper_gb: i64,

    #[serde(rename = "lower-conc-req")]
    pub lower_conc_req: i64,
    #[serde(rename = "upper-conc-req")]
    pub upper_conc_req: i64,
    #[serde(rename = "req-threshold-tolerance")]
    pub req_threshold_tolerance: i64,

    #[serde(rename = "collection-period", with = "humantime_serde")]
    pub collection_period: Duration,
    #[serde(rename = "keep-alive", with = "humantime_serde")]
    pub keep_alive: Duration,

    /// Network interface the port-wake probe attaches to.
    pub iface: String,

    /// Cluster topology: hostname → ip.
    pub managers: HashMap<String, String>,
    pub workers: HashMap<String, String>,

    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct LoggingConfig {
    #[serde(default)]
    pub enable: bool,
    #[serde(default)]
    pub events: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            lower_cpu: -1.0,
            upper_cpu: -1.0,
            lower_mb: -1,
            upper_mb: -1,
            lower_gb: -1,
            upper_gb: -1,
            lower_conc_req: -1,
            upper_conc_req: -1,
            req_threshold_tolerance: 5,
            collection_period: Duration::from_secs(10),
            keep_alive: Duration::from_secs(5),
            iface: "eth0".to_string(),
            managers: HashMap::new(),
            workers: HashMap::new(),
            logging: LoggingConfig::default(),
        }
    }
}

/// The single metric class this agent monitors.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MetricMode {
    Cpu { lower: f64, upper: f64 },
    /// Thresholds resolved to MiB; a GiB setting overrides its MiB
    /// counterpart (they are never summed).
    Memory { lower_mib: i64, upper_mib: i64 },
    ConcReq { lower: i64, upper: i64, tolerance: i64 },
}

impl Config {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        let config: Config =
            serde_yaml::from_str(&content).context("failed to parse config file")?;
        Ok(config)
    }

    /// Resolve which metric class is enabled. A class is enabled when
    /// either of its thresholds is ≥ 0; exactly one must be.
    pub fn metric_mode(&self) -> anyhow::Result<MetricMode> {
        let cpu = self.lower_cpu >= 0.0 || self.upper_cpu >= 0.0;
        let memory =
            self.lower_mb >= 0 || self.upper_mb >= 0 || self.lower_gb >= 0 || self.upper_gb >= 0;
        let conc_req = self.lower_conc_req >= 0 || self.upper_conc_req >= 0;

        match (cpu, memory, conc_req) {
            (true, false, false) => Ok(MetricMode::Cpu {
                lower: self.lower_cpu,
                upper: self.upper_cpu,
            }),
            (false, true, false) => Ok(MetricMode::Memory {
                lower_mib: if self.lower_gb > 0 {
                    self.lower_gb * 1024
                } else {
                    self.lower_mb
                },
                upper_mib: if self.upper_gb > 0 {
                    self.upper_gb * 1024
                } else {
                    self.upper_mb
                },
            }),
            (false, false, true) => Ok(MetricMode::ConcReq {
                lower: self.lower_conc_req,
                upper: self.upper_conc_req,
                tolerance: self.req_threshold_tolerance,
            }),
            (false, false, false) => {
                anyhow::bail!("no metric thresholds configured; enable cpu, memory, or concurrent requests")
            }
            _ => anyhow::bail!(
                "more than one of cpu, memory, or concurrent-request monitoring is enabled; configure exactly one"
            ),
        }
    }
}
