//! Federation-wide and per-federate configuration constants (spec.md §6).
//!
//! Everything here is known at program-generation time; parsing it from CLI
//! flags or a generated header is out of scope (spec.md §1).

use std::time::Duration;

use federate_core::FederateId;

/// Collects every configuration constant spec.md §6 lists, plus the
/// neighbor id lists needed to know which peers to dial and how many
/// inbound P2P sockets to expect.
#[derive(Debug, Clone)]
pub struct FederateConfig {
    pub number_of_federates: u16,
    pub fed_id: FederateId,
    pub federation_id: String,

    pub starting_port: u16,
    pub port_range_limit: u16,
    pub connect_num_retries: u32,
    pub connect_retry_interval: Duration,
    pub address_query_retry_interval: Duration,
    pub buffer_size: u32,

    pub has_upstream: bool,
    pub has_downstream: bool,

    /// Federates this one sends `P2P_TIMED_MESSAGE`s to; dialed outbound
    /// during startup via `connect_to_federate`.
    pub downstream_peers: Vec<FederateId>,
    /// Number of inbound P2P connections to accept in
    /// `handle_p2p_connections_from_federates` before the accept loop stops.
    pub number_of_inbound_physical_connections: usize,

    /// If the program declares a finite execution duration, `stop_time =
    /// start_time + program_duration_ns` (spec.md §4.8 step 2).
    pub program_duration_ns: Option<i64>,
    /// Skip the initial wall-clock wait for `start_time` (spec.md §4.8
    /// step 4).
    pub fast_mode: bool,
}

impl FederateConfig {
    /// A reasonable baseline for tests and single-host setups, mirroring
    /// the constants `original_source/federate.c`'s companion header pins.
    pub fn for_testing(fed_id: FederateId, federation_id: impl Into<String>) -> Self {
        FederateConfig {
            number_of_federates: 1,
            fed_id,
            federation_id: federation_id.into(),
            starting_port: 15045,
            port_range_limit: 1024,
            connect_num_retries: 10,
            connect_retry_interval: Duration::from_millis(100),
            address_query_retry_interval: Duration::from_millis(100),
            buffer_size: 1 << 16,
            has_upstream: false,
            has_downstream: false,
            downstream_peers: Vec::new(),
            number_of_inbound_physical_connections: 0,
            program_duration_ns: None,
            fast_mode: true,
        }
    }
}
