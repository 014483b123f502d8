pub mod system;

use serde::Serialize;
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

pub type Snapshot = Map<String, Value>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    System,
    Cpu,
    Memory,
    Gpu,
    Disk,
    Network,
    Process,
    Uptime,
    Sensors,
}

impl Category {
    pub const ALL: [Category; 9] = [
        Category::System,
        Category::Cpu,
        Category::Memory,
        Category::Gpu,
        Category::Disk,
        Category::Network,
        Category::Process,
        Category::Uptime,
        Category::Sensors,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Category::System => "system",
            Category::Cpu => "cpu",
            Category::Memory => "memory",
            Category::Gpu => "gpu",
            Category::Disk => "disk",
            Category::Network => "network",
            Category::Process => "process",
            Category::Uptime => "uptime",
            Category::Sensors => "sensors",
        }
    }

    pub fn description(self) -> &'static str {
        match self {
            Category::System => "Operating system, platform and host information",
            Category::Cpu => "CPU cores, frequency and usage",
            Category::Memory => "RAM and swap usage",
            Category::Gpu => "GPU load, memory and temperature (nvidia-smi)",
            Category::Disk => "Disk partitions and usage",
            Category::Network => "Network interfaces and traffic counters",
            Category::Process => "Top processes by CPU and memory usage",
            Category::Uptime => "System uptime and boot time",
            Category::Sensors => "Hardware component temperatures",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Category {
    type Err = ProducerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Category::ALL
            .into_iter()
            .find(|c| c.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| ProducerError::UnknownCategory(s.to_string()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ScanScope {
    #[default]
    Full,
    Only(Category),
}

impl ScanScope {
    pub fn parse(raw: Option<&str>) -> Result<Self, ProducerError> {
        match raw.map(str::trim) {
            None | Some("") => Ok(ScanScope::Full),
            Some(s) if s.eq_ignore_ascii_case("full") => Ok(ScanScope::Full),
            Some(s) => s.parse().map(ScanScope::Only),
        }
    }

    pub fn includes(self, category: Category) -> bool {
        match self {
            ScanScope::Full => true,
            ScanScope::Only(c) => c == category,
        }
    }
}

#[derive(Debug, Error)]
pub enum ProducerError {
    #[error("неизвестная категория сканирования: {0}")]
    UnknownCategory(String),
    #[error("сбой сбора категории {category}: {message}")]
    Collect { category: Category, message: String },
}

pub trait SnapshotProducer: Send + Sync {
    fn produce(&self, scope: ScanScope) -> Result<Snapshot, ProducerError>;
}

#[cfg(test)]
pub mod testing {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicU64, Ordering};

    #[derive(Default)]
    pub struct FakeProducer {
        pub calls: AtomicU64,
        pub fail: bool,
    }

    impl FakeProducer {
        pub fn failing() -> Self {
            Self {
                calls: AtomicU64::new(0),
                fail: true,
            }
        }
    }

    impl SnapshotProducer for FakeProducer {
        fn produce(&self, scope: ScanScope) -> Result<Snapshot, ProducerError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(ProducerError::Collect {
                    category: Category::Cpu,
                    message: "permission denied".to_string(),
                });
            }
            let full = json!({
                "system": {"platform": "Linux", "hostname": "test-host", "platform_release": "6.1"},
                "cpu": {"physical_cores": 4, "logical_cores": 8, "cpu_percent": 12.5},
                "memory": {"total_gb": 16.0, "used_gb": 4.0, "percent": 25.0},
                "disk": {"/dev/sda1": {"mountpoint": "/", "total_gb": 100.0, "used_gb": 40.0}},
                "gpu": {"gpus": []},
            });
            let Value::Object(map) = full else {
                unreachable!("json! object literal");
            };
            Ok(map
                .into_iter()
                .filter(|(key, _)| match key.parse::<Category>() {
                    Ok(category) => scope.includes(category),
                    Err(_) => false,
                })
                .collect())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scope_parsing() {
        assert_eq!(ScanScope::parse(None).unwrap(), ScanScope::Full);
        assert_eq!(ScanScope::parse(Some("full")).unwrap(), ScanScope::Full);
        assert_eq!(
            ScanScope::parse(Some("CPU")).unwrap(),
            ScanScope::Only(Category::Cpu)
        );
        assert!(matches!(
            ScanScope::parse(Some("toaster")),
            Err(ProducerError::UnknownCategory(_))
        ));
    }

    #[test]
    fn scope_includes() {
        assert!(ScanScope::Full.includes(Category::Gpu));
        assert!(ScanScope::Only(Category::Gpu).includes(Category::Gpu));
        assert!(!ScanScope::Only(Category::Gpu).includes(Category::Cpu));
    }
}
