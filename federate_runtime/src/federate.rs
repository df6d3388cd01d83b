//! Startup/shutdown orchestration and the public surface exposed to the
//! reactor runtime (spec.md §4.8, §6). Grounded on
//! `synchronize_with_other_federates` in `original_source/federate.c`.

use std::net::Ipv4Addr;
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};

use federate_core::{FederateId, Timestamp};
use tracing::{info, instrument};

use crate::bridge::{EventQueue, PortResolver, TriggerId};
use crate::clock::{Clock, SleepOutcome};
use crate::config::FederateConfig;
use crate::connection;
use crate::coordinator::Coordinator;
use crate::error::FederateError;
use crate::reader::{self, ReaderExit};
use crate::wire::TimedPayload;

/// A federate's view of the federation: connection state, the time-advance
/// coordinator, and the reader threads it has spawned.
pub struct Federate {
    config: FederateConfig,
    rti_host: Ipv4Addr,
    specified_rti_port: Option<u16>,
    specified_server_port: Option<u16>,
    coordinator: Arc<Coordinator>,
    resolver: Arc<dyn PortResolver>,
    clock: Arc<dyn Clock>,
    stop_time: Mutex<Option<Timestamp>>,
    physical_start_time: Mutex<Option<Timestamp>>,
    reader_handles: Mutex<Vec<JoinHandle<ReaderExit>>>,
}

impl Federate {
    pub fn new(
        config: FederateConfig,
        rti_host: Ipv4Addr,
        specified_rti_port: Option<u16>,
        specified_server_port: Option<u16>,
        event_queue: Box<dyn EventQueue>,
        resolver: Arc<dyn PortResolver>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let coordinator = Arc::new(Coordinator::new(
            config.fed_id,
            config.number_of_federates,
            config.has_upstream,
            config.has_downstream,
            event_queue,
        ));
        Federate {
            config,
            rti_host,
            specified_rti_port,
            specified_server_port,
            coordinator,
            resolver,
            clock,
            stop_time: Mutex::new(None),
            physical_start_time: Mutex::new(None),
            reader_handles: Mutex::new(Vec::new()),
        }
    }

    pub fn coordinator(&self) -> &Arc<Coordinator> {
        &self.coordinator
    }

    pub fn physical_start_time(&self) -> Option<Timestamp> {
        *self.physical_start_time.lock().unwrap()
    }

    pub fn stop_time(&self) -> Option<Timestamp> {
        *self.stop_time.lock().unwrap()
    }

    /// `synchronize_with_other_federates()` (spec.md §4.8). Blocking;
    /// called once at startup.
    #[instrument(skip(self))]
    pub fn synchronize_with_other_federates(&self) -> Result<(), FederateError> {
        let mut rti_socket = connection::connect_to_rti(
            self.rti_host,
            self.specified_rti_port,
            &self.config,
        )?;

        self.coordinator
            .install_rti_writer(rti_socket.try_clone().map_err(anyhow::Error::from)?);

        let now = self.clock.now();
        let start_time = connection::get_start_time_from_rti(&mut rti_socket, now)?;
        self.coordinator.set_start_time(start_time);
        info!(%start_time, "synchronized start time with RTI");

        if let Some(duration_ns) = self.config.program_duration_ns {
            *self.stop_time.lock().unwrap() = Some(start_time.saturating_add(duration_ns));
        }

        let (listener, bound_port) =
            connection::create_server(self.specified_server_port, &self.config)?;
        connection::send_address_ad(&mut rti_socket, bound_port)?;

        let mut handles = self.reader_handles.lock().unwrap();

        for &peer in &self.config.downstream_peers {
            let stream = connection::connect_to_federate(&mut rti_socket, peer, &self.config)?;
            self.coordinator
                .install_peer_writer(peer, stream.try_clone().map_err(anyhow::Error::from)?);
            handles.push(self.spawn_peer_reader(stream, peer));
        }

        self.spawn_p2p_accept_supervisor(listener);

        handles.push(self.spawn_rti_reader(rti_socket));
        drop(handles);

        if !self.config.fast_mode {
            loop {
                let now = self.clock.now();
                if now >= start_time {
                    break;
                }
                if self.clock.sleep_until(start_time) == SleepOutcome::Expired {
                    break;
                }
            }
        }

        *self.physical_start_time.lock().unwrap() = Some(self.clock.now());
        Ok(())
    }

    fn spawn_rti_reader(&self, socket: std::net::TcpStream) -> JoinHandle<ReaderExit> {
        let coordinator = self.coordinator.clone();
        let resolver = self.resolver.clone();
        let buffer_size = self.config.buffer_size;
        thread::spawn(move || reader::run_rti_reader(socket, coordinator, resolver, buffer_size))
    }

    fn spawn_peer_reader(
        &self,
        socket: std::net::TcpStream,
        peer: FederateId,
    ) -> JoinHandle<ReaderExit> {
        let coordinator = self.coordinator.clone();
        let resolver = self.resolver.clone();
        let buffer_size = self.config.buffer_size;
        thread::spawn(move || {
            reader::run_peer_reader(socket, peer, coordinator, resolver, buffer_size)
        })
    }

    /// Spawns the accept-and-supervise loop on its own thread so that
    /// `synchronize_with_other_federates` does not block on it
    /// (spec.md §4.4's "wait for all reader tasks to terminate" applies to
    /// this supervisor, not to startup).
    fn spawn_p2p_accept_supervisor(&self, listener: std::net::TcpListener) {
        let config = self.config.clone();
        let coordinator = self.coordinator.clone();
        let resolver = self.resolver.clone();

        thread::spawn(move || {
            let accepted = match connection::handle_p2p_connections_from_federates(
                &listener, &config,
            ) {
                Ok(accepted) => accepted,
                Err(e) => {
                    tracing::error!(error = %e, "P2P accept loop failed");
                    coordinator.broadcast_stop(coordinator.granted_tag());
                    return;
                }
            };

            let mut handles = Vec::with_capacity(accepted.len());
            for (peer_id, stream) in accepted {
                match stream.try_clone() {
                    Ok(clone) => coordinator.install_peer_writer(peer_id, clone),
                    Err(e) => {
                        tracing::warn!(%peer_id, error = %e, "failed to clone accepted peer socket");
                        continue;
                    }
                }
                let coordinator = coordinator.clone();
                let resolver = resolver.clone();
                let buffer_size = config.buffer_size;
                handles.push(thread::spawn(move || {
                    reader::run_peer_reader(stream, peer_id, coordinator, resolver, buffer_size)
                }));
            }

            for handle in handles {
                let _ = handle.join();
            }
        });
    }

    /// `next_event_time(t)` (spec.md §4.6, §6).
    pub fn next_event_time(&self, t: Timestamp) -> Timestamp {
        self.coordinator.next_event_time(t)
    }

    /// `logical_time_complete(t)` (spec.md §4.6, §6).
    pub fn logical_time_complete(&self, t: Timestamp) {
        self.coordinator.logical_time_complete(t)
    }

    /// `broadcast_stop()` (spec.md §4.6, §6).
    pub fn broadcast_stop(&self, current_logical_time: Timestamp) {
        self.coordinator.broadcast_stop(current_logical_time)
    }

    /// The `stop_requested` flag the main loop polls after every wakeup
    /// (spec.md §6).
    pub fn stop_requested(&self) -> bool {
        self.coordinator.stop_requested()
    }

    /// Send a P2P message directly to a peer over its established socket.
    pub fn send_timed_message_to_peer(
        &self,
        peer: FederateId,
        payload: TimedPayload,
    ) -> std::io::Result<()> {
        self.coordinator.send_timed_message_to_peer(peer, payload)
    }

    /// Send a message to the RTI for relay to its destination federate.
    pub fn send_timed_message_via_rti(&self, payload: TimedPayload) -> std::io::Result<()> {
        self.coordinator.send_timed_message_to_rti(payload)
    }

    /// Block until every spawned reader thread has exited. Used by an
    /// orderly shutdown sequence after `stop_requested()` is observed.
    pub fn join_readers(&self) {
        let handles = std::mem::take(&mut *self.reader_handles.lock().unwrap());
        for handle in handles {
            let _ = handle.join();
        }
    }
}
