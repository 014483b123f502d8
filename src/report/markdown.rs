use super::{display_key, display_value};
use crate::collectors::Snapshot;
use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use std::fmt::Write;

pub fn render_report(snapshot: &Snapshot, generated_at: DateTime<Utc>) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "# Device Information Report\n");
    let _ = writeln!(
        out,
        "**Generated:** {}\n",
        generated_at.format("%Y-%m-%d %H:%M:%S UTC")
    );
    out.push_str("---\n\n");

    for (category, facts) in snapshot {
        let _ = writeln!(out, "## {}\n", display_key(category));
        match (category.as_str(), facts) {
            (_, Value::Object(map)) if map.contains_key("error") => {
                let _ = writeln!(out, "> Error: {}\n", display_value(&map["error"]));
            }
            ("cpu", Value::Object(map)) => cpu_section(&mut out, map),
            ("disk", Value::Object(map)) => disk_section(&mut out, map),
            ("gpu", Value::Object(map)) => gpu_section(&mut out, map),
            ("network", Value::Object(map)) => network_section(&mut out, map),
            ("process", Value::Object(map)) => process_section(&mut out, map),
            (_, Value::Object(map)) => property_table(&mut out, map),
            (_, other) => {
                let _ = writeln!(out, "`{}`\n", cell(&display_value(other)));
            }
        }
    }

    out
}

fn property_table(out: &mut String, map: &Map<String, Value>) {
    if map.is_empty() {
        out.push_str("_No data._\n\n");
        return;
    }
    out.push_str("| Property | Value |\n|----------|-------|\n");
    for (key, value) in map {
        let _ = writeln!(out, "| {} | `{}` |", display_key(key), cell(&display_value(value)));
    }
    out.push('\n');
}

fn cpu_section(out: &mut String, map: &Map<String, Value>) {
    let scalars: Map<String, Value> = map
        .iter()
        .filter(|(key, _)| key.as_str() != "per_cpu_percent")
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();
    property_table(out, &scalars);

    if let Some(per_cpu) = map.get("per_cpu_percent").and_then(Value::as_array) {
        out.push_str("### Per-Core CPU Usage\n\n");
        for (i, usage) in per_cpu.iter().enumerate() {
            let _ = writeln!(out, "- Core {i}: `{}%`", display_value(usage));
        }
        out.push('\n');
    }
}

fn disk_section(out: &mut String, map: &Map<String, Value>) {
    if map.is_empty() {
        out.push_str("_No disks detected._\n\n");
        return;
    }
    out.push_str("| Device | Mount Point | File System | Total | Used | Free | Usage |\n");
    out.push_str("|--------|-------------|-------------|-------|------|------|-------|\n");
    for (device, info) in map {
        let field = |name: &str| cell(&display_value(info.get(name).unwrap_or(&Value::Null)));
        let _ = writeln!(
            out,
            "| `{}` | {} | {} | {} GB | {} GB | {} GB | {}% |",
            cell(device),
            field("mountpoint"),
            field("fstype"),
            field("total_gb"),
            field("used_gb"),
            field("free_gb"),
            field("percent"),
        );
    }
    out.push('\n');
}

fn gpu_section(out: &mut String, map: &Map<String, Value>) {
    let gpus = map.get("gpus").and_then(Value::as_array);
    match gpus {
        Some(gpus) if !gpus.is_empty() => {
            for gpu in gpus {
                let field = |name: &str| display_value(gpu.get(name).unwrap_or(&Value::Null));
                let _ = writeln!(out, "### GPU {}: {}\n", field("id"), field("name"));
                out.push_str("| Property | Value |\n|----------|-------|\n");
                let _ = writeln!(out, "| Load | `{}%` |", field("load_percent"));
                let _ = writeln!(out, "| Memory Total | `{} MB` |", field("memory_total_mb"));
                let _ = writeln!(out, "| Memory Used | `{} MB` |", field("memory_used_mb"));
                let _ = writeln!(out, "| Memory Free | `{} MB` |", field("memory_free_mb"));
                let _ = writeln!(out, "| Temperature | `{}°C` |\n", field("temperature"));
            }
        }
        _ => {
            let note = map
                .get("note")
                .map(display_value)
                .unwrap_or_else(|| "No GPU detected".to_string());
            let _ = writeln!(out, "_{note}_\n");
        }
    }
}

fn network_section(out: &mut String, map: &Map<String, Value>) {
    if map.is_empty() {
        out.push_str("_No interfaces detected._\n\n");
        return;
    }
    out.push_str("| Interface | Received (bytes) | Transmitted (bytes) |\n");
    out.push_str("|-----------|------------------|---------------------|\n");
    for (iface, info) in map {
        let field = |name: &str| display_value(info.get(name).unwrap_or(&Value::Null));
        let _ = writeln!(
            out,
            "| `{}` | {} | {} |",
            cell(iface),
            field("received_bytes"),
            field("transmitted_bytes")
        );
    }
    out.push('\n');
}

fn process_section(out: &mut String, map: &Map<String, Value>) {
    for (key, title) in [("top_cpu", "Top by CPU"), ("top_memory", "Top by Memory")] {
        let Some(rows) = map.get(key).and_then(Value::as_array) else {
            continue;
        };
        let _ = writeln!(out, "### {title}\n");
        out.push_str("| PID | Name | CPU % | Memory % |\n|-----|------|-------|----------|\n");
        for row in rows {
            let field = |name: &str| cell(&display_value(row.get(name).unwrap_or(&Value::Null)));
            let _ = writeln!(
                out,
                "| {} | {} | {} | {} |",
                field("pid"),
                field("name"),
                field("cpu_percent"),
                field("memory_percent")
            );
        }
        out.push('\n');
    }
}

fn cell(text: &str) -> String {
    text.replace('|', "\\|").replace('\n', " ")
}
