use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::ModelError;

/// Resources granted to one execution session.
///
/// Zero / empty values mean "no explicit limit"; builders omit the matching flags instead of passing degenerate values.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ResourceLimits {
    /// Number of CPUs (`--cpus`).
    pub num_cpus: u32,
    /// Memory limit in container-engine syntax, e.g. `"20G"`.
    pub memory: String,
    /// Disk size in the same syntax; sizes the VM workspace block device.
    pub disk_space: String,
    /// Maximum ingress bandwidth in bits per second.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_ingress_bandwidth: Option<u64>,
    /// Maximum egress bandwidth in bits per second.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_egress_bandwidth: Option<u64>,
    /// Host-side path substituted for the workspace directory in container mounts.
    ///
    /// Needed when the engine runs in a container whose paths differ from the node's.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub docker_host_mount_path: Option<PathBuf>,
}

impl ResourceLimits {
    /// Disk space in bytes, `None` when no disk limit is configured.
    pub fn disk_space_bytes(&self) -> Result<Option<u64>, ModelError> {
        if self.disk_space.trim().is_empty() {
            return Ok(None);
        }
        parse_size(&self.disk_space).map(Some)
    }
}

/// Parse a human size such as `512M`, `20G`, `1Gi` or `1024` (bytes).
///
/// Suffixes are binary multiples; a trailing `i` or `B` is accepted.
pub fn parse_size(raw: &str) -> Result<u64, ModelError> {
    let s = raw.trim();
    let err = || ModelError::InvalidSize(raw.to_string());

    let digits_end = s.find(|c: char| !c.is_ascii_digit()).unwrap_or(s.len());
    if digits_end == 0 {
        return Err(err());
    }
    let value: u64 = s[..digits_end].parse().map_err(|_| err())?;

    let suffix = s[digits_end..].trim_end_matches(['B', 'b']).trim_end_matches('i');
    let shift = match suffix.to_ascii_uppercase().as_str() {
        "" => 0,
        "K" => 10,
        "M" => 20,
        "G" => 30,
        "T" => 40,
        _ => return Err(err()),
    };
    value.checked_mul(1u64 << shift).ok_or_else(err)
}
