//! Network manager configuration.

/// Tunables for a [`crate::NetworkManager`].
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct NetworkConfig {
    /// Number of independent CAN ports this manager drives.
    pub ports: u8,
    /// Whether to maintain the rolling bus-load estimate.
    pub bus_load_monitoring: bool,
    /// Milliseconds of silence before an external control function is
    /// pruned from the registry.
    pub external_cf_timeout_ms: u64,
    /// Nominal bus bitrate, used for the bus-load percentage.
    pub nominal_bitrate: u32,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            ports: 1,
            bus_load_monitoring: false,
            external_cf_timeout_ms: 20_000,
            nominal_bitrate: 250_000,
        }
    }
}

impl NetworkConfig {
    pub fn with_ports(mut self, ports: u8) -> Self {
        self.ports = ports;
        self
    }

    pub fn with_bus_load_monitoring(mut self, enabled: bool) -> Self {
        self.bus_load_monitoring = enabled;
        self
    }

    pub fn with_external_cf_timeout_ms(mut self, ms: u64) -> Self {
        self.external_cf_timeout_ms = ms;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = NetworkConfig::default();
        assert_eq!(config.ports, 1);
        assert_eq!(config.external_cf_timeout_ms, 20_000);
        assert!(!config.bus_load_monitoring);
    }
}
