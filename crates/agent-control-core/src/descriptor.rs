//! Identity attributes reported by a connected agent.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Descriptor attribute names, in display order.
pub const DESCRIPTOR_FIELDS: [&str; 13] = [
    "user",
    "hostname",
    "platform",
    "release",
    "version",
    "os_arch",
    "proc_arch",
    "exec_path",
    "macaddr",
    "pid",
    "address",
    "launcher",
    "launcher_args",
];

/// Source of the individual identity attributes on the agent side.
///
/// Every method is probed independently by [`IdentityReport::collect`];
/// an error from one probe never prevents the others from running.
pub trait IdentityProbe {
    /// Name of the user the agent runs as.
    ///
    /// # Errors
    /// Returns an error if the user cannot be determined.
    fn user(&self) -> Result<String, Box<dyn std::error::Error>>;
    /// Host name of the machine.
    ///
    /// # Errors
    /// Returns an error if the host name cannot be determined.
    fn hostname(&self) -> Result<String, Box<dyn std::error::Error>>;
    /// OS platform, e.g. `Linux` or `Windows`.
    ///
    /// # Errors
    /// Returns an error if the platform cannot be determined.
    fn platform(&self) -> Result<String, Box<dyn std::error::Error>>;
    /// OS release.
    ///
    /// # Errors
    /// Returns an error if the release cannot be determined.
    fn release(&self) -> Result<String, Box<dyn std::error::Error>>;
    /// OS version string.
    ///
    /// # Errors
    /// Returns an error if the version cannot be determined.
    fn version(&self) -> Result<String, Box<dyn std::error::Error>>;
    /// Machine architecture, e.g. `x86_64`.
    ///
    /// # Errors
    /// Returns an error if the architecture cannot be determined.
    fn machine_arch(&self) -> Result<String, Box<dyn std::error::Error>>;
    /// 48-bit hardware node id the MAC address is derived from.
    ///
    /// # Errors
    /// Returns an error if the node id cannot be read.
    fn node_id(&self) -> Result<u64, Box<dyn std::error::Error>>;
    /// Process id of the agent.
    ///
    /// # Errors
    /// Returns an error if the pid cannot be read.
    fn pid(&self) -> Result<u32, Box<dyn std::error::Error>>;
    /// Process architecture, e.g. `64bit`.
    ///
    /// # Errors
    /// Returns an error if the architecture cannot be determined.
    fn proc_arch(&self) -> Result<String, Box<dyn std::error::Error>>;
    /// Path of the agent executable.
    ///
    /// # Errors
    /// Returns an error if the path cannot be determined.
    fn exec_path(&self) -> Result<String, Box<dyn std::error::Error>>;
}

/// Identity self-report returned by the agent's identity call.
///
/// On the wire this is a fixed-order array:
/// `[user, hostname, platform, release, version, machine_arch, mac_address, pid, proc_arch, exec_path]`.
///
/// Decoding is per slot: a missing slot or a value of the wrong type leaves
/// only that attribute empty.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "Vec<Value>", into = "WireIdentity")]
pub struct IdentityReport {
    pub user: Option<String>,
    pub hostname: Option<String>,
    pub platform: Option<String>,
    pub release: Option<String>,
    pub version: Option<String>,
    pub machine_arch: Option<String>,
    pub mac_address: Option<String>,
    pub pid: Option<u32>,
    pub proc_arch: Option<String>,
    pub exec_path: Option<String>,
}

#[derive(Clone, Serialize)]
struct WireIdentity(
    Option<String>,
    Option<String>,
    Option<String>,
    Option<String>,
    Option<String>,
    Option<String>,
    Option<String>,
    Option<u32>,
    Option<String>,
    Option<String>,
);

fn slot_text(slots: &[Value], index: usize) -> Option<String> {
    match slots.get(index)? {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn slot_pid(slots: &[Value], index: usize) -> Option<u32> {
    match slots.get(index)? {
        Value::Number(n) => n.as_u64().and_then(|pid| u32::try_from(pid).ok()),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

impl From<Vec<Value>> for IdentityReport {
    fn from(slots: Vec<Value>) -> Self {
        Self {
            user: slot_text(&slots, 0),
            hostname: slot_text(&slots, 1),
            platform: slot_text(&slots, 2),
            release: slot_text(&slots, 3),
            version: slot_text(&slots, 4),
            machine_arch: slot_text(&slots, 5),
            mac_address: slot_text(&slots, 6),
            pid: slot_pid(&slots, 7),
            proc_arch: slot_text(&slots, 8),
            exec_path: slot_text(&slots, 9),
        }
    }
}

impl From<IdentityReport> for WireIdentity {
    fn from(r: IdentityReport) -> Self {
        Self(
            r.user,
            r.hostname,
            r.platform,
            r.release,
            r.version,
            r.machine_arch,
            r.mac_address,
            r.pid,
            r.proc_arch,
            r.exec_path,
        )
    }
}

impl IdentityReport {
    /// Collect every attribute from `probe`, degrading failures per field.
    ///
    /// A failed `user` probe records the error text; any other failed
    /// probe records `None`.
    #[must_use]
    pub fn collect<P: IdentityProbe + ?Sized>(probe: &P) -> Self {
        Self {
            user: Some(probe.user().unwrap_or_else(|e| e.to_string())),
            hostname: probe.hostname().ok(),
            platform: probe.platform().ok(),
            release: probe.release().ok(),
            version: probe.version().ok(),
            machine_arch: probe.machine_arch().ok(),
            mac_address: probe.node_id().ok().map(format_mac),
            pid: probe.pid().ok(),
            proc_arch: probe.proc_arch().ok(),
            exec_path: probe.exec_path().ok(),
        }
    }
}

/// Format a 48-bit node id as `AA:BB:CC:DD:EE:FF`.
#[must_use]
pub fn format_mac(node: u64) -> String {
    let hex = format!("{:012X}", node & 0xFFFF_FFFF_FFFF);
    hex.as_bytes()
        .chunks(2)
        .map(|pair| String::from_utf8_lossy(pair).into_owned())
        .collect::<Vec<_>>()
        .join(":")
}

/// Named attribute snapshot identifying a session's peer.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionDescriptor {
    pub user: Option<String>,
    pub hostname: Option<String>,
    pub platform: Option<String>,
    pub release: Option<String>,
    pub version: Option<String>,
    pub os_arch: Option<String>,
    pub proc_arch: Option<String>,
    pub exec_path: Option<String>,
    pub macaddr: Option<String>,
    pub pid: Option<u32>,
    pub address: Option<String>,
    pub launcher: Option<String>,
    pub launcher_args: Option<Vec<String>>,
}

impl SessionDescriptor {
    /// Build a descriptor from an identity report plus transport metadata.
    #[must_use]
    pub fn from_report(
        report: IdentityReport,
        address: Option<String>,
        launcher: Option<String>,
        launcher_args: Option<Vec<String>>,
    ) -> Self {
        Self {
            user: report.user,
            hostname: report.hostname,
            platform: report.platform,
            release: report.release,
            version: report.version,
            os_arch: report.machine_arch,
            proc_arch: report.proc_arch,
            exec_path: report.exec_path,
            macaddr: report.mac_address,
            pid: report.pid,
            address,
            launcher,
            launcher_args,
        }
    }

    /// Whether `field` names a descriptor attribute.
    #[must_use]
    pub fn has_field(field: &str) -> bool {
        DESCRIPTOR_FIELDS.contains(&field)
    }

    /// Rendered value of `field`, or `None` if unknown or unavailable.
    #[must_use]
    pub fn get(&self, field: &str) -> Option<String> {
        let text = |v: &Option<String>| v.clone();
        match field {
            "user" => text(&self.user),
            "hostname" => text(&self.hostname),
            "platform" => text(&self.platform),
            "release" => text(&self.release),
            "version" => text(&self.version),
            "os_arch" => text(&self.os_arch),
            "proc_arch" => text(&self.proc_arch),
            "exec_path" => text(&self.exec_path),
            "macaddr" => text(&self.macaddr),
            "pid" => self.pid.map(|pid| pid.to_string()),
            "address" => text(&self.address),
            "launcher" => text(&self.launcher),
            "launcher_args" => self.launcher_args.as_ref().map(|args| args.join(" ")),
            _ => None,
        }
    }

    /// All attributes in display order.
    pub fn fields(&self) -> impl Iterator<Item = (&'static str, Option<String>)> + '_ {
        DESCRIPTOR_FIELDS.iter().map(|&name| (name, self.get(name)))
    }
}

impl fmt::Display for SessionDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}@{} ({}/{})",
            self.user.as_deref().unwrap_or("?"),
            self.hostname.as_deref().unwrap_or("?"),
            self.platform.as_deref().unwrap_or("?"),
            self.os_arch.as_deref().unwrap_or("?"),
        )
    }
}
