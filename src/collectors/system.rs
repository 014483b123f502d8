use crate::collectors::{Category, ProducerError, ScanScope, Snapshot, SnapshotProducer};
use serde_json::{json, Map, Value};
#[cfg(target_os = "linux")]
use std::fs;
use std::process::Command;
use std::sync::Mutex;
use std::time::Duration;
use sysinfo::{
    ComponentExt, CpuExt, DiskExt, NetworkExt, NetworksExt, PidExt, ProcessExt, System, SystemExt,
};
use tracing::debug;

// Пауза между двумя замерами CPU: sysinfo считает загрузку как дельту.
const CPU_SAMPLE_INTERVAL: Duration = Duration::from_millis(250);

const BYTES_PER_GB: f64 = 1024.0 * 1024.0 * 1024.0;

pub struct SystemProducer {
    system: Mutex<System>,
    process_top_n: usize,
}

impl SystemProducer {
    pub fn new(process_top_n: usize) -> Self {
        Self {
            system: Mutex::new(System::new_all()),
            process_top_n: process_top_n.max(1),
        }
    }
}

impl SnapshotProducer for SystemProducer {
    fn produce(&self, scope: ScanScope) -> Result<Snapshot, ProducerError> {
        let mut system = self.system.lock().map_err(|_| ProducerError::Collect {
            category: Category::System,
            message: "состояние sysinfo повреждено предыдущим сбоем".to_string(),
        })?;

        refresh(&mut system, scope);

        let mut snapshot = Map::new();
        for category in Category::ALL {
            if !scope.includes(category) {
                continue;
            }
            let facts = match category {
                Category::System => collect_system_info(&system),
                Category::Cpu => collect_cpu(&system),
                Category::Memory => collect_memory(&system),
                Category::Gpu => collect_gpu(),
                Category::Disk => collect_disks(&system),
                Category::Network => collect_network(&system),
                Category::Process => collect_processes(&system, self.process_top_n),
                Category::Uptime => collect_uptime(&system),
                Category::Sensors => collect_sensors(&system),
            };
            snapshot.insert(category.as_str().to_string(), facts);
        }

        debug!(categories = snapshot.len(), "снимок системы собран");
        Ok(snapshot)
    }
}

fn refresh(system: &mut System, scope: ScanScope) {
    let needs_cpu = scope.includes(Category::Cpu) || scope.includes(Category::Process);
    if needs_cpu {
        system.refresh_cpu();
        system.refresh_processes();
        std::thread::sleep(CPU_SAMPLE_INTERVAL);
        system.refresh_cpu();
        system.refresh_processes();
    }
    if scope.includes(Category::Memory) {
        system.refresh_memory();
    }
    if scope.includes(Category::Disk) {
        system.refresh_disks_list();
        system.refresh_disks();
    }
    if scope.includes(Category::Network) {
        system.refresh_networks_list();
        system.refresh_networks();
    }
    if scope.includes(Category::Sensors) {
        system.refresh_components_list();
        system.refresh_components();
    }
}

fn collect_system_info(system: &System) -> Value {
    json!({
        "platform": system.name().unwrap_or_else(|| std::env::consts::OS.to_string()),
        "platform_release": system.kernel_version(),
        "platform_version": system.long_os_version().or_else(|| system.os_version()),
        "architecture": std::env::consts::ARCH,
        "processor": system.cpus().first().map(|c| c.brand().trim().to_string()),
        "hostname": system.host_name(),
        "distribution": system.distribution_id(),
    })
}

fn collect_cpu(system: &System) -> Value {
    let cpus = system.cpus();
    let per_cpu: Vec<f64> = cpus.iter().map(|c| round2(c.cpu_usage() as f64)).collect();
    let cpu_percent = if per_cpu.is_empty() {
        0.0
    } else {
        round2(per_cpu.iter().sum::<f64>() / per_cpu.len() as f64)
    };
    let freq = cpus.first().map(|c| c.frequency()).filter(|f| *f > 0);

    json!({
        "physical_cores": system.physical_core_count(),
        "logical_cores": cpus.len(),
        "cpu_freq_mhz": freq,
        "cpu_percent": cpu_percent,
        "per_cpu_percent": per_cpu,
    })
}

fn collect_memory(system: &System) -> Value {
    let total = system.total_memory();
    let used = system.used_memory();
    let percent = if total > 0 {
        round2(used as f64 / total as f64 * 100.0)
    } else {
        0.0
    };
    json!({
        "total_gb": gb(total),
        "available_gb": gb(system.available_memory()),
        "used_gb": gb(used),
        "percent": percent,
        "swap_total_gb": gb(system.total_swap()),
        "swap_used_gb": gb(system.used_swap()),
    })
}

fn collect_disks(system: &System) -> Value {
    let mut disks = Map::new();
    for disk in system.disks() {
        let total = disk.total_space();
        let free = disk.available_space();
        let used = total.saturating_sub(free);
        let percent = if total > 0 {
            round2(used as f64 / total as f64 * 100.0)
        } else {
            0.0
        };
        let mount = disk.mount_point().to_string_lossy().to_string();
        let mut device = disk.name().to_string_lossy().to_string();
        if device.is_empty() || disks.contains_key(&device) {
            device = mount.clone();
        }
        disks.insert(
            device,
            json!({
                "mountpoint": mount,
                "fstype": String::from_utf8_lossy(disk.file_system()),
                "total_gb": gb(total),
                "used_gb": gb(used),
                "free_gb": gb(free),
                "percent": percent,
                "removable": disk.is_removable(),
            }),
        );
    }
    Value::Object(disks)
}

fn collect_network(system: &System) -> Value {
    let mut ifaces = Map::new();
    for (name, data) in system.networks().iter() {
        ifaces.insert(
            name.to_string(),
            json!({
                "received_bytes": data.total_received(),
                "transmitted_bytes": data.total_transmitted(),
                "packets_received": data.total_packets_received(),
                "packets_transmitted": data.total_packets_transmitted(),
                "errors_on_received": data.total_errors_on_received(),
                "errors_on_transmitted": data.total_errors_on_transmitted(),
            }),
        );
    }
    Value::Object(ifaces)
}

fn collect_processes(system: &System, top_n: usize) -> Value {
    let total_memory = system.total_memory();
    let mut rows: Vec<(u32, String, f64, f64)> = system
        .processes()
        .iter()
        .map(|(pid, p)| {
            let mem_percent = if total_memory > 0 {
                p.memory() as f64 / total_memory as f64 * 100.0
            } else {
                0.0
            };
            (
                pid.as_u32(),
                p.name().to_string(),
                round2(p.cpu_usage() as f64),
                round2(mem_percent),
            )
        })
        .collect();

    let to_json = |rows: &[(u32, String, f64, f64)]| -> Vec<Value> {
        rows.iter()
            .take(top_n)
            .map(|(pid, name, cpu, mem)| {
                json!({"pid": pid, "name": name, "cpu_percent": cpu, "memory_percent": mem})
            })
            .collect()
    };

    rows.sort_by(|a, b| b.2.total_cmp(&a.2).then(a.0.cmp(&b.0)));
    let top_cpu = to_json(&rows);
    rows.sort_by(|a, b| b.3.total_cmp(&a.3).then(a.0.cmp(&b.0)));
    let top_memory = to_json(&rows);

    json!({
        "total": rows.len(),
        "top_cpu": top_cpu,
        "top_memory": top_memory,
    })
}

fn collect_uptime(system: &System) -> Value {
    let uptime = system.uptime();
    json!({
        "boot_timestamp": system.boot_time(),
        "uptime_days": uptime / 86_400,
        "uptime_hours": (uptime % 86_400) / 3_600,
        "uptime_minutes": (uptime % 3_600) / 60,
        "uptime_seconds": uptime,
    })
}

fn collect_sensors(system: &System) -> Value {
    let mut temps: Vec<Value> = system
        .components()
        .iter()
        .filter(|c| c.temperature() > 0.0)
        .map(|c| {
            json!({
                "label": c.label(),
                "temperature_celsius": round2(c.temperature() as f64),
                "max_celsius": round2(c.max() as f64),
                "critical_celsius": c.critical().map(|v| round2(v as f64)),
            })
        })
        .collect();

    let sys_count = temps.len();
    let thermal = collect_thermal_zones();
    debug!(
        sysinfo_temps = sys_count,
        thermal_zones = thermal.len(),
        "результат сбора температур по источникам"
    );
    temps.extend(thermal);

    json!({ "temperatures": temps })
}

#[cfg(target_os = "linux")]
fn collect_thermal_zones() -> Vec<Value> {
    let Ok(entries) = fs::read_dir("/sys/class/thermal") else {
        return Vec::new();
    };

    let mut out = Vec::new();
    for entry in entries.flatten() {
        let path = entry.path();
        let Some(name) = path.file_name().and_then(|v| v.to_str()) else {
            continue;
        };
        if !name.starts_with("thermal_zone") {
            continue;
        }

        let typ = fs::read_to_string(path.join("type"))
            .ok()
            .map(|s| s.trim().to_string())
            .unwrap_or_else(|| name.to_string());
        let Some(v) = fs::read_to_string(path.join("temp"))
            .ok()
            .and_then(|raw| raw.trim().parse::<f64>().ok())
        else {
            continue;
        };
        // Ядро отдаёт миллиградусы.
        let celsius = if v > 1000.0 { v / 1000.0 } else { v };
        if celsius <= 0.0 {
            continue;
        }
        out.push(json!({
            "label": format!("{typ} ({name})"),
            "temperature_celsius": round2(celsius),
            "max_celsius": null,
            "critical_celsius": null,
        }));
    }
    out
}

#[cfg(not(target_os = "linux"))]
fn collect_thermal_zones() -> Vec<Value> {
    Vec::new()
}

fn collect_gpu() -> Value {
    let gpus = collect_nvidia_smi();
    if gpus.is_empty() {
        return json!({
            "gpus": [],
            "note": "GPU не обнаружен или nvidia-smi недоступен",
        });
    }
    json!({ "gpus": gpus })
}

fn collect_nvidia_smi() -> Vec<Value> {
    let Some(output) = run_nvidia_smi(&[
        "--query-gpu=index,name,utilization.gpu,memory.used,memory.total,temperature.gpu",
        "--format=csv,noheader,nounits",
    ]) else {
        return Vec::new();
    };
    if !output.status.success() {
        return Vec::new();
    }

    let Ok(text) = String::from_utf8(output.stdout) else {
        return Vec::new();
    };

    text.lines().filter_map(parse_nvidia_smi_line).collect()
}

fn parse_nvidia_smi_line(line: &str) -> Option<Value> {
    let parts: Vec<&str> = line.split(',').map(|v| v.trim()).collect();
    if parts.len() < 6 {
        return None;
    }

    let used_mb = parse_u64_loose(parts[3]);
    let total_mb = parse_u64_loose(parts[4]);
    let free_mb = match (used_mb, total_mb) {
        (Some(used), Some(total)) => Some(total.saturating_sub(used)),
        _ => None,
    };

    Some(json!({
        "id": parts[0],
        "name": parts[1],
        "load_percent": parse_f64_loose(parts[2]),
        "memory_used_mb": used_mb,
        "memory_total_mb": total_mb,
        "memory_free_mb": free_mb,
        "temperature": parse_f64_loose(parts[5]),
    }))
}

fn run_nvidia_smi(args: &[&str]) -> Option<std::process::Output> {
    if let Ok(output) = Command::new("nvidia-smi").args(args).output() {
        return Some(output);
    }

    #[cfg(target_os = "windows")]
    {
        if let Ok(output) = Command::new(r"C:\Windows\System32\nvidia-smi.exe")
            .args(args)
            .output()
        {
            return Some(output);
        }
    }

    None
}

fn parse_f64_loose(input: &str) -> Option<f64> {
    let trimmed = input.trim();
    if let Ok(v) = trimmed.parse::<f64>() {
        return Some(v);
    }
    trimmed.replace(',', ".").parse::<f64>().ok()
}

fn parse_u64_loose(input: &str) -> Option<u64> {
    parse_f64_loose(input)
        .filter(|v| *v >= 0.0)
        .map(|v| v.round() as u64)
}

fn gb(bytes: u64) -> f64 {
    round2(bytes as f64 / BYTES_PER_GB)
}

fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}
