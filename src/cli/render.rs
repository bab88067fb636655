//! Plain-text tables for `ps`, `images`, `inspect` and `events`.

use crate::container::naming::{display_image, short_id};
use crate::container::{ImageSummary, LifecycleEvent, ResourceDetail, ResourceSummary};
use chrono::{DateTime, Utc};
use std::fmt::Write;

/// Left-align `rows` under `headers`, two spaces between columns.
fn table(headers: &[&str], rows: &[Vec<String>]) -> String {
    let mut widths: Vec<usize> = headers.iter().map(|h| h.chars().count()).collect();
    for row in rows {
        for (width, cell) in widths.iter_mut().zip(row) {
            *width = (*width).max(cell.chars().count());
        }
    }

    let mut out = String::new();
    let mut push_row = |cells: Vec<&str>| {
        let last = cells.len().saturating_sub(1);
        let mut line = String::new();
        for (i, (cell, width)) in cells.iter().zip(&widths).enumerate() {
            if i == last {
                line.push_str(cell);
            } else {
                let _ = write!(line, "{:<width$}  ", cell, width = width);
            }
        }
        out.push_str(line.trim_end());
        out.push('\n');
    };

    push_row(headers.to_vec());
    for row in rows {
        push_row(row.iter().map(String::as_str).collect());
    }
    out
}

/// Coarse age such as `5 minutes ago`.
pub fn age(created: Option<DateTime<Utc>>, now: DateTime<Utc>) -> String {
    let Some(created) = created else {
        return "-".to_string();
    };
    let secs = (now - created).num_seconds().max(0);
    let (value, unit) = match secs {
        0..60 => return "just now".to_string(),
        60..3_600 => (secs / 60, "minute"),
        3_600..86_400 => (secs / 3_600, "hour"),
        _ => (secs / 86_400, "day"),
    };
    let plural = if value == 1 { "" } else { "s" };
    format!("{} {}{} ago", value, unit, plural)
}

/// Size with a binary unit, e.g. `7.4 MB`.
pub fn human_size(bytes: i64) -> String {
    const UNITS: [&str; 5] = ["B", "KB", "MB", "GB", "TB"];
    let mut size = bytes.max(0) as f64;
    let mut unit = 0;
    while size >= 1024.0 && unit < UNITS.len() - 1 {
        size /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{} {}", bytes.max(0), UNITS[0])
    } else {
        format!("{:.1} {}", size, UNITS[unit])
    }
}

pub fn containers(rows: &[ResourceSummary], now: DateTime<Utc>) -> String {
    let rows: Vec<Vec<String>> = rows
        .iter()
        .map(|r| {
            vec![
                r.id.clone(),
                r.name.clone(),
                r.image.clone(),
                r.command.clone(),
                age(r.created, now),
                r.status.clone(),
            ]
        })
        .collect();
    table(&["ID", "NAME", "IMAGE", "COMMAND", "CREATED", "STATUS"], &rows)
}

pub fn images(rows: &[ImageSummary], now: DateTime<Utc>) -> String {
    let rows: Vec<Vec<String>> = rows
        .iter()
        .map(|r| {
            let id = r.id.strip_prefix("sha256:").unwrap_or(&r.id);
            vec![
                r.name.clone(),
                short_id(id).to_string(),
                age(r.created, now),
                human_size(r.size),
            ]
        })
        .collect();
    table(&["NAME", "ID", "CREATED", "SIZE"], &rows)
}

pub fn detail(detail: &ResourceDetail) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "Name:     {}", detail.name);
    let _ = writeln!(out, "Id:       {} ({})", detail.id, detail.encoded_id);
    let _ = writeln!(out, "Image:    {}", display_image(&detail.image));
    let _ = writeln!(out, "State:    {}", detail.state);
    let _ = writeln!(out, "Command:  {}", detail.command);
    if let Some(created) = detail.created {
        let _ = writeln!(out, "Created:  {}", created.to_rfc3339());
    }
    let _ = writeln!(out, "Network:  {}", detail.network.as_deref().unwrap_or("-"));
    if !detail.dns.is_empty() {
        let _ = writeln!(out, "DNS:      {}", detail.dns.join(", "));
    }
    for (container, host) in &detail.ports {
        let _ = writeln!(out, "Port:     {} -> {}", host, container);
    }
    for (container, host) in &detail.volumes {
        let _ = writeln!(out, "Volume:   {} -> {}", host, container);
    }
    for (key, value) in &detail.env {
        let _ = writeln!(out, "Env:      {}={}", key, value);
    }
    out
}

pub fn event(event: &LifecycleEvent) -> String {
    let subject = match &event.name {
        Some(name) => format!("{} ({})", name, event.id),
        None => event.id.clone(),
    };
    let mut line = format!(
        "{} {:<8} {}",
        event.time.format("%Y-%m-%dT%H:%M:%S"),
        event.status,
        subject
    );
    if let Some(image) = &event.image {
        let _ = write!(line, " {}", image);
    }
    line
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::container::ResourceState;
    use chrono::TimeZone;
    use std::collections::BTreeMap;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap()
    }

    #[test]
    fn test_age() {
        let now = now();
        assert_eq!(age(None, now), "-");
        assert_eq!(age(Some(now), now), "just now");
        assert_eq!(age(Some(now - chrono::Duration::minutes(1)), now), "1 minute ago");
        assert_eq!(age(Some(now - chrono::Duration::hours(5)), now), "5 hours ago");
        assert_eq!(age(Some(now - chrono::Duration::days(3)), now), "3 days ago");
    }

    #[test]
    fn test_human_size() {
        assert_eq!(human_size(512), "512 B");
        assert_eq!(human_size(2048), "2.0 KB");
        assert_eq!(human_size(7_759_462), "7.4 MB");
    }

    #[test]
    fn test_container_table_alignment() {
        let rows = vec![
            ResourceSummary {
                id: "0123456789ab".to_string(),
                name: "my app".to_string(),
                image: "redis@7".to_string(),
                command: "redis-server".to_string(),
                created: Some(now() - chrono::Duration::hours(2)),
                status: "Up 2 hours".to_string(),
            },
            ResourceSummary {
                id: "ba9876543210".to_string(),
                name: "web".to_string(),
                image: "nginx".to_string(),
                command: String::new(),
                created: None,
                status: "Up".to_string(),
            },
        ];

        let out = containers(&rows, now());
        let lines: Vec<&str> = out.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[0].starts_with("ID            NAME    IMAGE"));
        assert!(lines[1].contains("my app  redis@7"));
        assert!(lines[1].contains("2 hours ago"));
        assert!(lines[2].ends_with("Up"));
    }

    #[test]
    fn test_detail_lists_mappings() {
        let detail = detail(&ResourceDetail {
            name: "front end".to_string(),
            encoded_id: "whale-66726f6e7420656e64".to_string(),
            id: "0123456789ab".to_string(),
            image: "nginx:latest".to_string(),
            state: ResourceState::Running,
            command: "nginx".to_string(),
            created: None,
            network: Some("bridge".to_string()),
            dns: Vec::new(),
            ports: BTreeMap::from([("80".to_string(), "8080".to_string())]),
            volumes: BTreeMap::new(),
            env: BTreeMap::from([("MODE".to_string(), "prod".to_string())]),
        });

        assert!(detail.contains("Image:    nginx\n"));
        assert!(detail.contains("State:    running\n"));
        assert!(detail.contains("Port:     8080 -> 80\n"));
        assert!(detail.contains("Env:      MODE=prod\n"));
    }

    #[test]
    fn test_event_line() {
        let line = event(&LifecycleEvent {
            status: "start".to_string(),
            id: "0123456789ab".to_string(),
            name: Some("web".to_string()),
            image: Some("nginx".to_string()),
            time: now(),
        });
        assert_eq!(line, "2024-05-01T12:00:00 start    web (0123456789ab) nginx");
    }
}
