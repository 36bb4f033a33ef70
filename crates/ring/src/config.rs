//! TcpRing configuration types.

/// Configuration parameters for
/// [TcpRingFactory](crate::TcpRingFactory).
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
#[serde(default)]
pub struct TcpRingConfig {
    /// The socket address the ring listener binds to. Use port zero to
    /// let the os pick a free port.
    ///
    /// Default: "127.0.0.1:0".
    pub bind_addr: String,

    /// Seed member addresses to contact when joining. An empty list
    /// means this node bootstraps a new single-node grid.
    ///
    /// Default: empty.
    pub seed_addrs: Vec<String>,

    /// Interval between heartbeat circulations, in ms.
    ///
    /// Default: 500.
    pub heartbeat_interval_ms: u32,

    /// How long a join attempt may take before failing, in ms.
    ///
    /// Default: 30 seconds.
    pub join_timeout_ms: u32,

    /// Timeout for establishing a tcp connection to another member and
    /// for the direct ping probe, in ms.
    ///
    /// Default: 1 second.
    pub connect_timeout_ms: u32,

    /// The fraction of the largest membership this node has been part
    /// of that must remain reachable for the node to keep serving.
    /// Dropping below it segments the local node. Must be in (0.0, 1.0].
    ///
    /// Default: 0.5.
    pub quorum_fraction: f64,

    /// Maximum encoded size of a single ring message.
    ///
    /// Default: 1 MiB.
    pub max_frame_bytes: u32,
}

impl Default for TcpRingConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:0".into(),
            seed_addrs: Vec::new(),
            heartbeat_interval_ms: 500,
            join_timeout_ms: 1000 * 30,
            connect_timeout_ms: 1000,
            quorum_fraction: 0.5,
            max_frame_bytes: 1024 * 1024,
        }
    }
}

impl TcpRingConfig {
    /// Get the heartbeat interval duration.
    pub fn heartbeat_interval(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.heartbeat_interval_ms as u64)
    }

    /// Get the join timeout duration.
    pub fn join_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.join_timeout_ms as u64)
    }

    /// Get the connect timeout duration.
    pub fn connect_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.connect_timeout_ms as u64)
    }
}

/// Module-level configuration for TcpRing.
#[derive(Debug, Default, Clone, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TcpRingModConfig {
    /// TcpRing configuration.
    pub tcp_ring: TcpRingConfig,
}

impl gridmesh_api::config::ModConfig for TcpRingModConfig {}

/// The module name under which the ring factory stores its config.
pub const TCP_RING_MOD: &str = "tcpRing";
