use super::ResultRecord;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{Map, Value};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResultSummary {
    pub id: Uuid,
    pub name: String,
    pub created_at: DateTime<Utc>,
    pub storage_key: String,
    pub summary: SummaryBody,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SummaryBody {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system: Option<SystemSummary>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cpu: Option<CpuSummary>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub memory: Option<MemorySummary>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub disk: Option<DiskSummary>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gpu: Option<GpuSummary>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SystemSummary {
    pub platform: Option<String>,
    pub platform_release: Option<String>,
    pub architecture: Option<String>,
    pub hostname: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CpuSummary {
    pub physical_cores: Option<u64>,
    pub logical_cores: Option<u64>,
    pub cpu_percent: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MemorySummary {
    pub total_gb: Option<f64>,
    pub used_gb: Option<f64>,
    pub percent: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DiskSummary {
    pub partitions: usize,
    pub total_gb: f64,
    pub used_gb: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GpuSummary {
    pub count: usize,
    pub names: Vec<String>,
}

pub fn summarize(record: &ResultRecord) -> ResultSummary {
    let payload = &record.payload;
    ResultSummary {
        id: record.id,
        name: record.name.clone(),
        created_at: record.created_at,
        storage_key: record.storage_key.clone(),
        summary: SummaryBody {
            system: category(payload, "system").map(system_summary),
            cpu: category(payload, "cpu").map(cpu_summary),
            memory: category(payload, "memory").map(memory_summary),
            disk: category(payload, "disk").map(disk_summary),
            gpu: category(payload, "gpu").and_then(gpu_summary),
        },
    }
}

fn category<'a>(payload: &'a Map<String, Value>, key: &str) -> Option<&'a Map<String, Value>> {
    payload.get(key).and_then(Value::as_object)
}

fn system_summary(facts: &Map<String, Value>) -> SystemSummary {
    SystemSummary {
        platform: text(facts, "platform"),
        platform_release: text(facts, "platform_release"),
        architecture: text(facts, "architecture"),
        hostname: text(facts, "hostname"),
    }
}

fn cpu_summary(facts: &Map<String, Value>) -> CpuSummary {
    CpuSummary {
        physical_cores: facts.get("physical_cores").and_then(Value::as_u64),
        logical_cores: facts
            .get("logical_cores")
            .or_else(|| facts.get("cores"))
            .and_then(Value::as_u64),
        cpu_percent: facts.get("cpu_percent").and_then(Value::as_f64),
    }
}

fn memory_summary(facts: &Map<String, Value>) -> MemorySummary {
    MemorySummary {
        total_gb: facts.get("total_gb").and_then(Value::as_f64),
        used_gb: facts.get("used_gb").and_then(Value::as_f64),
        percent: facts.get("percent").and_then(Value::as_f64),
    }
}

fn disk_summary(facts: &Map<String, Value>) -> DiskSummary {
    let partitions: Vec<&Map<String, Value>> =
        facts.values().filter_map(Value::as_object).collect();
    let sum = |field: &str| -> f64 {
        let total: f64 = partitions
            .iter()
            .filter_map(|p| p.get(field).and_then(Value::as_f64))
            .sum();
        (total * 100.0).round() / 100.0
    };
    DiskSummary {
        partitions: partitions.len(),
        total_gb: sum("total_gb"),
        used_gb: sum("used_gb"),
    }
}

fn gpu_summary(facts: &Map<String, Value>) -> Option<GpuSummary> {
    let gpus = facts.get("gpus")?.as_array()?;
    Some(GpuSummary {
        count: gpus.len(),
        names: gpus
            .iter()
            .filter_map(|g| g.get("name").and_then(Value::as_str))
            .map(str::to_string)
            .collect(),
    })
}

fn text(facts: &Map<String, Value>, key: &str) -> Option<String> {
    match facts.get(key)? {
        Value::String(s) => Some(s.clone()),
        Value::Null => None,
        other => Some(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(payload: Value) -> ResultRecord {
        let Value::Object(payload) = payload else {
            panic!("ожидался объект");
        };
        ResultRecord {
            id: Uuid::nil(),
            name: "t".to_string(),
            created_at: Utc::now(),
            storage_key: "t.json".to_string(),
            payload,
        }
    }

    #[test]
    fn recognized_categories_are_reduced() {
        let summary = summarize(&record(json!({
            "system": {"platform": "Linux", "hostname": "box", "python_version": "n/a"},
            "cpu": {"physical_cores": 4, "logical_cores": 8, "cpu_percent": 12.5, "per_cpu_percent": [1, 2]},
            "memory": {"total_gb": 16.0, "used_gb": 6.5, "percent": 40.6, "available_gb": 9.5},
            "disk": {
                "/dev/sda1": {"mountpoint": "/", "total_gb": 100.25, "used_gb": 50.0},
                "/dev/sdb1": {"mountpoint": "/data", "total_gb": 200.5, "used_gb": 10.0}
            },
            "gpu": {"gpus": [{"name": "RTX"}]}
        })));

        let body = summary.summary;
        let system = body.system.unwrap();
        assert_eq!(system.platform.as_deref(), Some("Linux"));
        assert_eq!(system.hostname.as_deref(), Some("box"));
        assert_eq!(system.architecture, None);

        assert_eq!(
            body.cpu,
            Some(CpuSummary {
                physical_cores: Some(4),
                logical_cores: Some(8),
                cpu_percent: Some(12.5),
            })
        );
        assert_eq!(body.memory.unwrap().used_gb, Some(6.5));
        let disk = body.disk.unwrap();
        assert_eq!(disk.partitions, 2);
        assert_eq!(disk.total_gb, 300.75);
        assert_eq!(disk.used_gb, 60.0);
        assert_eq!(body.gpu.unwrap().names, vec!["RTX".to_string()]);
    }

    #[test]
    fn missing_or_malformed_categories_degrade_to_absent() {
        let summary = summarize(&record(json!({
            "cpu": "unavailable",
            "memory": {"total_gb": "lots"},
            "gpu": {"note": "no gpu"},
            "network": {}
        })));

        let body = summary.summary;
        assert!(body.system.is_none());
        assert!(body.cpu.is_none());
        assert!(body.disk.is_none());
        assert!(body.gpu.is_none());
        assert_eq!(
            body.memory,
            Some(MemorySummary {
                total_gb: None,
                used_gb: None,
                percent: None,
            })
        );

        let json = serde_json::to_value(SummaryBody::default()).unwrap();
        assert_eq!(json, json!({}));
    }

    #[test]
    fn bare_core_count_is_accepted() {
        let summary = summarize(&record(json!({"cpu": {"cores": 4}})));
        assert_eq!(summary.summary.cpu.unwrap().logical_cores, Some(4));
    }
}
