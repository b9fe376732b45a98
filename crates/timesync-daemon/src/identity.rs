use std::fs;

use timesync_scheduler::seed::DeviceIdentity;

const MACHINE_ID_PATHS: &[&str] = &["/etc/machine-id", "/var/lib/dbus/machine-id"];

/// Device identity from the configured install id, the machine id and the
/// host name, whichever are available.
#[derive(Debug, Clone, Default)]
pub struct HostIdentity {
    install_id: Option<String>,
}

impl HostIdentity {
    pub fn new(install_id: Option<String>) -> Self {
        Self { install_id }
    }
}

fn non_empty(s: String) -> Option<String> {
    let trimmed = s.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

fn machine_id() -> Option<String> {
    MACHINE_ID_PATHS
        .iter()
        .find_map(|p| fs::read_to_string(p).ok().and_then(non_empty))
}

fn host_name() -> Option<String> {
    fs::read_to_string("/etc/hostname")
        .ok()
        .and_then(non_empty)
        .or_else(|| std::env::var("HOSTNAME").ok().and_then(non_empty))
}

impl DeviceIdentity for HostIdentity {
    fn identifiers(&self) -> Vec<String> {
        [self.install_id.clone().and_then(non_empty), machine_id(), host_name()]
            .into_iter()
            .flatten()
            .collect()
    }
}
