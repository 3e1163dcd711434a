use super::read_source;
use crate::{Error, Result};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

const MIN_PLAUSIBLE_C: f64 = -50.0;
const MAX_PLAUSIBLE_C: f64 = 150.0;

/// Converts a sysfs millidegree reading to Celsius, rejecting values no real
/// sensor produces.
pub fn parse_millidegrees(raw: &str) -> Result<f64> {
    let milli: i64 = raw
        .trim()
        .parse()
        .map_err(|_| Error::Parse(format!("temperature: invalid value {:?}", raw.trim())))?;
    let celsius = milli as f64 / 1000.0;
    if !(MIN_PLAUSIBLE_C..=MAX_PLAUSIBLE_C).contains(&celsius) {
        return Err(Error::Parse(format!("temperature: implausible {}C", celsius)));
    }
    Ok(celsius)
}

pub async fn read_celsius(path: &Path, timeout: Duration) -> Result<f64> {
    parse_millidegrees(&read_source(path, timeout).await?)
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DiscoveredSensor {
    pub label: String,
    pub path: PathBuf,
}

fn read_trimmed(path: &Path) -> Option<String> {
    fs::read_to_string(path)
        .ok()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

/// Walks `class/hwmon` for `temp*_input` files.
pub fn discover(sys_root: &Path) -> Vec<DiscoveredSensor> {
    let mut sensors = Vec::new();
    let Ok(chips) = fs::read_dir(sys_root.join("class/hwmon")) else {
        return sensors;
    };
    let mut chips: Vec<PathBuf> = chips.flatten().map(|e| e.path()).collect();
    chips.sort();

    for chip in chips {
        let chip_name = read_trimmed(&chip.join("name")).unwrap_or_else(|| {
            chip.file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default()
        });
        let Ok(entries) = fs::read_dir(&chip) else {
            continue;
        };
        let mut inputs: Vec<PathBuf> = entries
            .flatten()
            .map(|e| e.path())
            .filter(|p| {
                p.file_name()
                    .map(|n| n.to_string_lossy())
                    .is_some_and(|n| n.starts_with("temp") && n.ends_with("_input"))
            })
            .collect();
        inputs.sort();

        for input in inputs {
            let file = input
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            let stem = file.trim_end_matches("_input");
            let label = read_trimmed(&chip.join(format!("{stem}_label")))
                .unwrap_or_else(|| stem.to_string());
            sensors.push(DiscoveredSensor {
                label: format!("{chip_name} {label}"),
                path: input,
            });
        }
    }
    sensors
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn parses_millidegrees() {
        assert_eq!(parse_millidegrees("45000\n").unwrap(), 45.0);
        assert_eq!(parse_millidegrees("-5500").unwrap(), -5.5);
        assert!(matches!(parse_millidegrees("abc"), Err(Error::Parse(_))));
        assert!(matches!(parse_millidegrees("200000"), Err(Error::Parse(_))));
    }

    #[tokio::test]
    async fn missing_sensor_is_unavailable() {
        let tmp = tempdir().unwrap();
        let err = read_celsius(&tmp.path().join("temp1_input"), Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Unavailable(_)));
    }

    #[test]
    fn discovers_hwmon_sensors() {
        let tmp = tempdir().unwrap();
        let chip = tmp.path().join("class/hwmon/hwmon0");
        fs::create_dir_all(&chip).unwrap();
        fs::write(chip.join("name"), "coretemp\n").unwrap();
        fs::write(chip.join("temp1_input"), "42000\n").unwrap();
        fs::write(chip.join("temp1_label"), "Package id 0\n").unwrap();
        fs::write(chip.join("temp2_input"), "40000\n").unwrap();
        fs::write(chip.join("temp2_max"), "100000\n").unwrap();

        let sensors = discover(tmp.path());
        assert_eq!(sensors.len(), 2);
        assert_eq!(sensors[0].label, "coretemp Package id 0");
        assert_eq!(sensors[0].path, chip.join("temp1_input"));
        assert_eq!(sensors[1].label, "coretemp temp2");
        assert!(discover(&tmp.path().join("nothing")).is_empty());
    }
}
