//! Transport engine configuration.

/// Tunables for the TP/ETP session engine. All timers are in milliseconds
/// and follow ISO 11783-3 / J1939-21 defaults; they rarely need changing.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct TransportConfig {
    /// Maximum number of concurrent sessions, across both directions and
    /// both TP and ETP.
    pub max_concurrent_sessions: usize,
    /// Number of packets a receiver grants per CTS window.
    pub cts_window_packets: u8,
    /// Tr: minimum spacing between data-transfer frames within a window
    /// (sender side).
    pub tr_ms: u64,
    /// Th: minimum spacing between control frames (sender side).
    pub th_ms: u64,
    /// T1: receiver's wait for the first DT frame after a BAM.
    pub t1_ms: u64,
    /// T2: receiver's wait for the next DT frame after a CTS.
    pub t2_ms: u64,
    /// T3: receiver's wait for an EoMA response.
    pub t3_ms: u64,
    /// T4: sender's wait for a CTS after an RTS.
    pub t4_ms: u64,
    /// Minimum spacing between BAM data-transfer frames.
    pub bam_interval_ms: u64,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            max_concurrent_sessions: 8,
            cts_window_packets: 16,
            tr_ms: 500,
            th_ms: 500,
            t1_ms: 750,
            t2_ms: 1250,
            t3_ms: 1250,
            t4_ms: 1050,
            bam_interval_ms: 50,
        }
    }
}

impl TransportConfig {
    pub fn with_max_concurrent_sessions(mut self, value: usize) -> Self {
        self.max_concurrent_sessions = value;
        self
    }

    pub fn with_cts_window_packets(mut self, value: u8) -> Self {
        self.cts_window_packets = value;
        self
    }
}
