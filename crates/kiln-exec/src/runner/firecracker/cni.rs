//! Network configuration handed to the VM manager's CNI integration.

use kiln_model::ResourceLimits;
use serde_json::{Value, json};

pub const CNI_CONFLIST_NAME: &str = "10-kiln-executors.conflist";
pub const CNI_NETWORK_NAME: &str = "kiln-executors";
pub const CNI_BRIDGE: &str = "ignite0";
pub const CNI_SUBNET: &str = "10.61.0.0/16";

/// Plugin chain: bridge with NAT, port mapping, firewall, isolation between VMs,
/// and a bandwidth shaper when any limit is configured.
pub fn conflist(limits: &ResourceLimits) -> Value {
    let mut plugins = vec![
        json!({
            "type": "bridge",
            "bridge": CNI_BRIDGE,
            "isGateway": true,
            "isDefaultGateway": true,
            "promiscMode": false,
            "ipMasq": true,
            "ipam": {
                "type": "host-local",
                "subnet": CNI_SUBNET,
            },
        }),
        json!({
            "type": "portmap",
            "capabilities": { "portMappings": true },
        }),
        json!({ "type": "firewall" }),
        json!({ "type": "isolation" }),
    ];
    if let Some(bandwidth) = bandwidth(limits) {
        plugins.push(bandwidth);
    }

    json!({
        "cniVersion": "0.4.0",
        "name": CNI_NETWORK_NAME,
        "plugins": plugins,
    })
}

/// Burst is twice the rate.
fn bandwidth(limits: &ResourceLimits) -> Option<Value> {
    if limits.max_ingress_bandwidth.is_none() && limits.max_egress_bandwidth.is_none() {
        return None;
    }
    let mut plugin = json!({ "type": "bandwidth" });
    if let Some(rate) = limits.max_ingress_bandwidth {
        plugin["ingressRate"] = json!(rate);
        plugin["ingressBurst"] = json!(rate.saturating_mul(2));
    }
    if let Some(rate) = limits.max_egress_bandwidth {
        plugin["egressRate"] = json!(rate);
        plugin["egressBurst"] = json!(rate.saturating_mul(2));
    }
    Some(plugin)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn types(conf: &Value) -> Vec<&str> {
        conf["plugins"]
            .as_array()
            .unwrap()
            .iter()
            .map(|p| p["type"].as_str().unwrap())
            .collect()
    }

    #[test]
    fn default_chain_has_no_shaper() {
        let conf = conflist(&ResourceLimits::default());
        assert_eq!(types(&conf), vec!["bridge", "portmap", "firewall", "isolation"]);
        assert_eq!(conf["plugins"][0]["ipam"]["subnet"], CNI_SUBNET);
        assert_eq!(conf["plugins"][0]["bridge"], "ignite0");
    }

    #[test]
    fn shaper_only_carries_set_directions() {
        let limits = ResourceLimits {
            max_egress_bandwidth: Some(1_000_000),
            ..Default::default()
        };
        let conf = conflist(&limits);
        let shaper = &conf["plugins"][4];
        assert_eq!(shaper["type"], "bandwidth");
        assert_eq!(shaper["egressRate"], 1_000_000);
        assert_eq!(shaper["egressBurst"], 2_000_000);
        assert!(shaper.get("ingressRate").is_none());
    }
}
