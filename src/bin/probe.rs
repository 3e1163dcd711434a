use resource_monitor::config::{DiskEntry, GpuEntry, SensorEntry, Sources};
use resource_monitor::monitor::{disk, gpu, temperature};
use std::process::Command;

/// Appends one pasteable entry. Any note goes on its own `#` line above it
/// so the entry line stays exactly what the config parser accepts.
fn push_entry(lines: &mut Vec<String>, note: Option<String>, entry: String) {
    if let Some(note) = note {
        lines.push(format!("# {}", note));
    }
    lines.push(entry);
}

fn listing() -> Vec<String> {
    let sources = Sources::default();
    let mut lines = Vec::new();

    lines.push("# disks (device|stats|space)".to_string());
    let disks = disk::discover();
    for d in &disks {
        let entry = DiskEntry {
            device: d.name.clone(),
            stats: true,
            space: true,
        };
        let note = format!("{} on {}, {} bytes", d.file_system, d.mount_point, d.total_bytes);
        push_entry(&mut lines, Some(note), entry.encode());
    }
    if disks.is_empty() {
        lines.push("# no disks found via sysinfo".to_string());
    }

    lines.push("# thermal sensors (label|path|enabled)".to_string());
    let sensors = temperature::discover(&sources.sys_root);
    for s in &sensors {
        let entry = SensorEntry {
            label: s.label.clone(),
            path: s.path.clone(),
            enabled: true,
        };
        push_entry(&mut lines, None, entry.encode());
    }
    if sensors.is_empty() {
        lines.push("# no hwmon temperature sensors found".to_string());
    }

    lines.push("# gpus (uuid|name|usage|memory)".to_string());
    match Command::new("nvidia-smi").arg("-L").output() {
        Ok(out) if out.status.success() => {
            for g in gpu::parse_list(&String::from_utf8_lossy(&out.stdout)) {
                let note = format!("index {}", g.index);
                let entry = GpuEntry {
                    uuid: g.uuid,
                    name: g.name,
                    usage: true,
                    memory: true,
                };
                push_entry(&mut lines, Some(note), entry.encode());
            }
        }
        _ => lines.push("# nvidia-smi not available".to_string()),
    }
    lines
}

fn main() {
    for line in listing() {
        println!("{}", line);
    }
}
