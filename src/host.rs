//! Best-effort identity of the machine running a scan.
//!
//! Recorded in the artifact's run metadata so an index can be traced back
//! to where it was produced. Every field is optional: a missing file or an
//! unreadable value is simply left out.

use serde::Serialize;
use std::path::Path;

#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct HostInfo {
    pub hostname: Option<String>,
    pub machine_id: Option<String>,
    pub os: Option<String>,
}

impl HostInfo {
    pub fn detect() -> Self {
        Self {
            hostname: read_trimmed(Path::new("/etc/hostname"))
                .or_else(|| std::env::var("HOSTNAME").ok().filter(|h| !h.is_empty())),
            machine_id: read_trimmed(Path::new("/etc/machine-id"))
                .or_else(|| read_trimmed(Path::new("/var/lib/dbus/machine-id"))),
            os: std::fs::read_to_string("/etc/os-release")
                .ok()
                .and_then(|content| pretty_name(&content))
                .or_else(|| Some(std::env::consts::OS.to_string())),
        }
    }
}

fn read_trimmed(path: &Path) -> Option<String> {
    let value = std::fs::read_to_string(path).ok()?;
    let value = value.trim();
    (!value.is_empty()).then(|| value.to_string())
}

/// `PRETTY_NAME` from an os-release file, unquoted.
fn pretty_name(os_release: &str) -> Option<String> {
    os_release.lines().find_map(|line| {
        let value = line.strip_prefix("PRETTY_NAME=")?;
        let value = value.trim().trim_matches('"').trim_matches('\'');
        (!value.is_empty()).then(|| value.to_string())
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_pretty_name() {
        let content = "NAME=\"Debian GNU/Linux\"\nPRETTY_NAME=\"Debian GNU/Linux 12 (bookworm)\"\nID=debian\n";
        assert_eq!(
            pretty_name(content).as_deref(),
            Some("Debian GNU/Linux 12 (bookworm)")
        );
        assert_eq!(pretty_name("ID=arch\n"), None);
    }

    #[test]
    fn detect_never_fails() {
        let info = HostInfo::detect();
        assert!(info.os.is_some());
    }
}
