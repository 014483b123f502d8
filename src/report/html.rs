use super::{display_key, display_value};
use crate::store::{ResultMeta, ResultRecord};
use serde_json::{Map, Value};
use std::fmt::Write;

const STYLE: &str = r#"
* { margin: 0; padding: 0; box-sizing: border-box; }
body { font-family: -apple-system, 'Segoe UI', Arial, sans-serif; background: #eef0f7; padding: 20px; color: #222; }
.container { max-width: 1400px; margin: 0 auto; background: #fff; border-radius: 10px; box-shadow: 0 10px 40px rgba(0,0,0,0.15); overflow: hidden; }
.header { background: linear-gradient(135deg, #667eea 0%, #764ba2 100%); color: #fff; padding: 30px 20px; }
.header h1 { font-size: 2em; margin-bottom: 20px; }
.header a { color: #fff; }
.header-info { display: grid; grid-template-columns: repeat(auto-fit, minmax(300px, 1fr)); gap: 20px; }
.header-info-item { background: rgba(255,255,255,0.1); padding: 15px; border-radius: 5px; }
.header-info-item strong { display: block; margin-bottom: 5px; opacity: 0.9; }
.content { padding: 30px 20px; }
.button-group { margin-bottom: 30px; display: flex; gap: 10px; flex-wrap: wrap; }
a.button { background: #667eea; color: #fff; padding: 10px 20px; border-radius: 5px; text-decoration: none; }
a.button.secondary { background: #6c757d; }
.section { margin-bottom: 30px; }
.section h2 { color: #667eea; border-bottom: 2px solid #667eea; padding-bottom: 8px; margin-bottom: 15px; }
.info-grid { display: grid; grid-template-columns: repeat(auto-fill, minmax(220px, 1fr)); gap: 12px; }
.info-card { background: #f8f9fa; padding: 12px; border-radius: 5px; border-left: 4px solid #667eea; }
.info-card strong { display: block; color: #666; font-size: 0.85em; margin-bottom: 4px; }
.info-card span { word-break: break-all; }
table { width: 100%; border-collapse: collapse; }
th, td { padding: 8px 10px; border-bottom: 1px solid #ddd; text-align: left; }
th { background: #f1f3f9; }
pre { background: #1e1e1e; color: #d4d4d4; padding: 15px; border-radius: 5px; overflow: auto; max-height: 600px; }
.error { color: #b00020; }
"#;

pub fn render_detail_page(record: &ResultRecord) -> String {
    let id = record.id.to_string();
    let mut body = String::new();

    let _ = write!(
        body,
        r#"<div class="header"><a href="/">&larr; All results</a><h1>Scan Result</h1><div class="header-info">"#
    );
    header_item(&mut body, "Name", &record.name);
    header_item(&mut body, "Result ID", &id);
    header_item(&mut body, "Created", &record.created_at.to_rfc3339());
    header_item(&mut body, "Storage Key", &record.storage_key);
    body.push_str("</div></div><div class=\"content\"><div class=\"button-group\">");
    let _ = write!(
        body,
        r#"<a class="button" href="/api/download/{id}">Download JSON</a><a class="button secondary" href="/api/results/summary/{id}">Summary</a><a class="button secondary" href="/api/scan/{id}">Raw API</a>"#
    );
    body.push_str("</div>");

    for (category, facts) in &record.payload {
        let _ = write!(
            body,
            "<div class=\"section\"><h2>{}</h2>",
            escape(&display_key(category))
        );
        match (category.as_str(), facts) {
            (_, Value::Object(map)) if map.contains_key("error") => {
                let _ = write!(
                    body,
                    "<p class=\"error\">Error: {}</p>",
                    escape(&display_value(&map["error"]))
                );
            }
            ("disk", Value::Object(map)) => keyed_table(
                &mut body,
                map,
                "Device",
                &["mountpoint", "fstype", "total_gb", "used_gb", "free_gb", "percent"],
            ),
            ("network", Value::Object(map)) => keyed_table(
                &mut body,
                map,
                "Interface",
                &["received_bytes", "transmitted_bytes", "packets_received", "packets_transmitted"],
            ),
            ("gpu", Value::Object(map)) => gpu_section(&mut body, map),
            ("process", Value::Object(map)) => process_section(&mut body, map),
            ("sensors", Value::Object(map)) => {
                let rows = map.get("temperatures").and_then(Value::as_array);
                row_table(
                    &mut body,
                    rows.map(Vec::as_slice).unwrap_or_default(),
                    &["label", "temperature_celsius", "max_celsius", "critical_celsius"],
                );
            }
            (_, Value::Object(map)) => info_grid(&mut body, map),
            (_, other) => {
                let _ = write!(body, "<p>{}</p>", escape(&display_value(other)));
            }
        }
        body.push_str("</div>");
    }

    let pretty = serde_json::to_string_pretty(&record.payload).unwrap_or_default();
    let _ = write!(
        body,
        "<div class=\"section\"><h2>Full JSON</h2><pre>{}</pre></div></div>",
        escape(&pretty)
    );

    page(&format!("Scan Result - {}", record.name), &body)
}

pub fn render_home_page(port: u16, results: &[ResultMeta]) -> String {
    let mut body = String::new();
    let _ = write!(
        body,
        r#"<div class="header"><h1>Device Remote Scanner</h1><p>Port {port}</p></div><div class="content">"#
    );
    body.push_str("<div class=\"section\"><h2>Results</h2>");
    if results.is_empty() {
        body.push_str("<p>No results yet. Trigger one with <code>POST /api/scan</code>.</p>");
    } else {
        body.push_str("<table><tr><th>Name</th><th>Created</th><th>ID</th><th></th></tr>");
        for meta in results {
            let id = meta.id.to_string();
            let _ = write!(
                body,
                r#"<tr><td>{}</td><td>{}</td><td><code>{id}</code></td><td><a href="/results/{id}">View</a> | <a href="/api/download/{id}">Download</a></td></tr>"#,
                escape(&meta.name),
                escape(&meta.created_at.to_rfc3339()),
            );
        }
        body.push_str("</table>");
    }
    body.push_str("</div><div class=\"section\"><h2>API</h2><pre>");
    let _ = write!(
        body,
        "curl -X POST http://localhost:{port}/api/scan\n\
         curl http://localhost:{port}/api/scan/&lt;id&gt;\n\
         curl http://localhost:{port}/api/results?limit=10\n\
         curl http://localhost:{port}/api/results/summary/&lt;id&gt;\n\
         curl -X DELETE http://localhost:{port}/api/results/&lt;id&gt;\n\
         curl http://localhost:{port}/api/statistics"
    );
    body.push_str("</pre></div></div>");

    page("Device Remote Scanner", &body)
}

pub fn render_error_page(title: &str, message: &str) -> String {
    let body = format!(
        r#"<div class="header"><a href="/">&larr; All results</a><h1>{}</h1></div><div class="content"><p class="error">{}</p></div>"#,
        escape(title),
        escape(message)
    );
    page(title, &body)
}

pub fn escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

fn page(title: &str, body: &str) -> String {
    format!(
        "<!DOCTYPE html>\n<html lang=\"en\"><head><meta charset=\"UTF-8\">\
         <meta name=\"viewport\" content=\"width=device-width, initial-scale=1.0\">\
         <title>{}</title><style>{STYLE}</style></head>\
         <body><div class=\"container\">{body}</div></body></html>\n",
        escape(title)
    )
}

fn header_item(out: &mut String, label: &str, value: &str) {
    let _ = write!(
        out,
        "<div class=\"header-info-item\"><strong>{}</strong><code>{}</code></div>",
        escape(label),
        escape(value)
    );
}

fn info_grid(out: &mut String, map: &Map<String, Value>) {
    out.push_str("<div class=\"info-grid\">");
    for (key, value) in map {
        let _ = write!(
            out,
            "<div class=\"info-card\"><strong>{}</strong><span>{}</span></div>",
            escape(&display_key(key)),
            escape(&display_value(value))
        );
    }
    out.push_str("</div>");
}

fn keyed_table(out: &mut String, map: &Map<String, Value>, first: &str, columns: &[&str]) {
    if map.is_empty() {
        out.push_str("<p>No data.</p>");
        return;
    }
    let _ = write!(out, "<table><tr><th>{}</th>", escape(first));
    for column in columns {
        let _ = write!(out, "<th>{}</th>", escape(&display_key(column)));
    }
    out.push_str("</tr>");
    for (name, info) in map {
        let _ = write!(out, "<tr><td><code>{}</code></td>", escape(name));
        for column in columns {
            let value = info.get(*column).unwrap_or(&Value::Null);
            let _ = write!(out, "<td>{}</td>", escape(&display_value(value)));
        }
        out.push_str("</tr>");
    }
    out.push_str("</table>");
}

fn row_table(out: &mut String, rows: &[Value], columns: &[&str]) {
    if rows.is_empty() {
        out.push_str("<p>No data.</p>");
        return;
    }
    out.push_str("<table><tr>");
    for column in columns {
        let _ = write!(out, "<th>{}</th>", escape(&display_key(column)));
    }
    out.push_str("</tr>");
    for row in rows {
        out.push_str("<tr>");
        for column in columns {
            let value = row.get(*column).unwrap_or(&Value::Null);
            let _ = write!(out, "<td>{}</td>", escape(&display_value(value)));
        }
        out.push_str("</tr>");
    }
    out.push_str("</table>");
}

fn gpu_section(out: &mut String, map: &Map<String, Value>) {
    let gpus = map.get("gpus").and_then(Value::as_array);
    match gpus {
        Some(gpus) if !gpus.is_empty() => row_table(
            out,
            gpus,
            &["id", "name", "load_percent", "memory_used_mb", "memory_total_mb", "temperature"],
        ),
        _ => {
            let note = map
                .get("note")
                .map(display_value)
                .unwrap_or_else(|| "No GPU detected".to_string());
            let _ = write!(out, "<p>{}</p>", escape(&note));
        }
    }
}

fn process_section(out: &mut String, map: &Map<String, Value>) {
    for (key, title) in [("top_cpu", "Top by CPU"), ("top_memory", "Top by Memory")] {
        if let Some(rows) = map.get(key).and_then(Value::as_array) {
            let _ = write!(out, "<h3>{title}</h3>");
            row_table(out, rows, &["pid", "name", "cpu_percent", "memory_percent"]);
        }
    }
}
