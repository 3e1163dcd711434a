use super::{parse_u64, read_source};
use crate::model::{Counters, LinkKind};
use crate::{Error, Result};
use std::path::Path;
use std::time::Duration;

const ETH_PREFIXES: &[&str] = &["eth", "en", "em"];
const WLAN_PREFIXES: &[&str] = &["wl"];

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InterfaceCounters {
    pub name: String,
    pub rx_bytes: u64,
    pub tx_bytes: u64,
}

pub fn classify(name: &str) -> Option<LinkKind> {
    if WLAN_PREFIXES.iter().any(|p| name.starts_with(p)) {
        Some(LinkKind::Wlan)
    } else if ETH_PREFIXES.iter().any(|p| name.starts_with(p)) {
        Some(LinkKind::Eth)
    } else {
        None
    }
}

pub fn parse_net_dev(raw: &str) -> Result<Vec<InterfaceCounters>> {
    let mut interfaces = Vec::new();
    for line in raw.lines().skip(2).filter(|l| !l.trim().is_empty()) {
        let (name, rest) = line
            .split_once(':')
            .ok_or_else(|| Error::Parse(format!("net/dev: no interface name in {:?}", line)))?;
        let fields: Vec<&str> = rest.split_whitespace().collect();
        if fields.len() < 9 {
            return Err(Error::Parse(format!("net/dev: short line {:?}", line.trim())));
        }
        interfaces.push(InterfaceCounters {
            name: name.trim().to_string(),
            rx_bytes: parse_u64(fields[0], "net/dev rx")?,
            tx_bytes: parse_u64(fields[8], "net/dev tx")?,
        });
    }
    Ok(interfaces)
}

/// Sums `[rx, tx]` over every interface of the given kind. No matching
/// interface means both counters are zero.
pub fn totals(interfaces: &[InterfaceCounters], kind: LinkKind) -> Result<Counters> {
    let mut rx = 0u64;
    let mut tx = 0u64;
    for iface in interfaces.iter().filter(|i| classify(&i.name) == Some(kind)) {
        rx = rx
            .checked_add(iface.rx_bytes)
            .ok_or_else(|| Error::Parse(format!("net/dev: rx total overflows at {}", iface.name)))?;
        tx = tx
            .checked_add(iface.tx_bytes)
            .ok_or_else(|| Error::Parse(format!("net/dev: tx total overflows at {}", iface.name)))?;
    }
    Ok(Counters::Flat(vec![rx, tx]))
}

pub async fn read(proc_root: &Path, timeout: Duration) -> Result<Vec<InterfaceCounters>> {
    parse_net_dev(&read_source(&proc_root.join("net/dev"), timeout).await?)
}

/// Whether any interface of `kind` reports an `up` operstate.
pub async fn link_active(
    sys_root: &Path,
    interfaces: &[InterfaceCounters],
    kind: LinkKind,
    timeout: Duration,
) -> bool {
    for iface in interfaces.iter().filter(|i| classify(&i.name) == Some(kind)) {
        let path = sys_root.join("class/net").join(&iface.name).join("operstate");
        if let Ok(state) = read_source(&path, timeout).await {
            if state.trim() == "up" {
                return true;
            }
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    const NET_DEV: &str = "Inter-|   Receive                                                |  Transmit
 face |bytes    packets errs drop fifo frame compressed multicast|bytes    packets errs drop fifo colls carrier compressed
    lo:  5000      50    0    0    0     0          0         0     5000      50    0    0    0     0       0          0
enp3s0: 2000000    1500    0    0    0     0          0        10   300000    1200    0    0    0     0       0          0
  eth1:  100000     100    0    0    0     0          0         0    20000     100    0    0    0     0       0          0
wlp2s0: 7000000    5000    0    0    0     0          0         0   900000    4000    0    0    0     0       0          0
";

    #[test]
    fn classifies_interface_names() {
        assert_eq!(classify("eth0"), Some(LinkKind::Eth));
        assert_eq!(classify("enp3s0"), Some(LinkKind::Eth));
        assert_eq!(classify("wlan0"), Some(LinkKind::Wlan));
        assert_eq!(classify("wlp2s0"), Some(LinkKind::Wlan));
        assert_eq!(classify("lo"), None);
        assert_eq!(classify("docker0"), None);
    }

    #[test]
    fn parses_and_sums_by_kind() {
        let ifaces = parse_net_dev(NET_DEV).unwrap();
        assert_eq!(ifaces.len(), 4);
        assert_eq!(ifaces[1].name, "enp3s0");
        assert_eq!(ifaces[1].tx_bytes, 300_000);
        assert_eq!(
            totals(&ifaces, LinkKind::Eth).unwrap(),
            Counters::Flat(vec![2_100_000, 320_000])
        );
        assert_eq!(
            totals(&ifaces, LinkKind::Wlan).unwrap(),
            Counters::Flat(vec![7_000_000, 900_000])
        );
        assert_eq!(
            totals(&ifaces[..1], LinkKind::Eth).unwrap(),
            Counters::Flat(vec![0, 0])
        );
    }

    #[test]
    fn overflowing_totals_are_a_parse_error() {
        let ifaces = vec![
            InterfaceCounters {
                name: "eth0".into(),
                rx_bytes: u64::MAX,
                tx_bytes: 0,
            },
            InterfaceCounters {
                name: "eth1".into(),
                rx_bytes: 1,
                tx_bytes: 0,
            },
        ];
        assert!(matches!(totals(&ifaces, LinkKind::Eth), Err(Error::Parse(_))));
    }

    #[test]
    fn rejects_short_lines() {
        let raw = "h1\nh2\neth0: 1 2 3\n";
        assert!(matches!(parse_net_dev(raw), Err(Error::Parse(_))));
    }

    #[tokio::test]
    async fn detects_link_state() {
        let tmp = tempdir().unwrap();
        let ifaces = parse_net_dev(NET_DEV).unwrap();
        for (name, state) in [("enp3s0", "down"), ("eth1", "up"), ("wlp2s0", "dormant")] {
            let dir = tmp.path().join("class/net").join(name);
            fs::create_dir_all(&dir).unwrap();
            fs::write(dir.join("operstate"), format!("{state}\n")).unwrap();
        }
        let timeout = Duration::from_secs(1);
        assert!(link_active(tmp.path(), &ifaces, LinkKind::Eth, timeout).await);
        assert!(!link_active(tmp.path(), &ifaces, LinkKind::Wlan, timeout).await);
    }
}
