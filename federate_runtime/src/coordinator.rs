//! Time-advance coordinator (spec.md §4.6) — the semantic heart of the
//! runtime. Core state (`granted_tag`, `tag_pending`, `stop_requested`) and
//! the NET/TAG/LTC protocol live behind one mutex and one condition
//! variable, mirroring `__next_event_time`/`__logical_time_complete`/
//! `handle_time_advance_grant`/`handle_incoming_stop_message` in
//! `original_source/federate.c`.

use std::net::TcpStream;
use std::sync::{Condvar, Mutex};

use federate_core::{FederateId, Timestamp};
use tracing::{debug, info, instrument, warn};

use crate::bridge::{EventQueue, TriggerId};
use crate::wire::{write_message, Message};

struct CoordinatorState {
    granted_tag: Timestamp,
    tag_pending: bool,
    stop_requested: bool,
    /// Informational stop tag, carried by whichever `STOP` was observed
    /// first (ours or the RTI's) — see DESIGN.md for the resolution of
    /// spec.md §9's open question on stop-aware `next_event_time` wakeups.
    requested_stop_time: Option<Timestamp>,
    start_time: Timestamp,
    rti_writer: Option<TcpStream>,
    /// Write handles to peers, indexed by `FederateId::index()`. `None`
    /// until `install_peer_writer` registers one, and again after the
    /// peer's reader observes EOF and clears it.
    peer_writers: Vec<Option<TcpStream>>,
}

/// Coordinates logical time advancement for one federate. `has_upstream`
/// and `has_downstream` are fixed at construction (spec.md §3).
pub struct Coordinator {
    my_fed_id: FederateId,
    has_upstream: bool,
    has_downstream: bool,
    state: Mutex<CoordinatorState>,
    event_q_changed: Condvar,
    event_queue: Box<dyn EventQueue>,
}

impl Coordinator {
    /// `number_of_federates` sizes the peer-writer table; the connection
    /// table is fixed-size for the lifetime of the federation (spec.md §3,
    /// "no dynamic membership").
    pub fn new(
        my_fed_id: FederateId,
        number_of_federates: u16,
        has_upstream: bool,
        has_downstream: bool,
        event_queue: Box<dyn EventQueue>,
    ) -> Self {
        Coordinator {
            my_fed_id,
            has_upstream,
            has_downstream,
            state: Mutex::new(CoordinatorState {
                granted_tag: Timestamp::NEVER,
                tag_pending: false,
                stop_requested: false,
                requested_stop_time: None,
                start_time: Timestamp::ZERO,
                rti_writer: None,
                peer_writers: (0..number_of_federates).map(|_| None).collect(),
            }),
            event_q_changed: Condvar::new(),
            event_queue,
        }
    }

    pub fn my_fed_id(&self) -> FederateId {
        self.my_fed_id
    }

    pub fn install_rti_writer(&self, writer: TcpStream) {
        self.state.lock().unwrap().rti_writer = Some(writer);
    }

    pub fn install_peer_writer(&self, peer: FederateId, writer: TcpStream) {
        self.state.lock().unwrap().peer_writers[peer.index()] = Some(writer);
    }

    /// Called by a peer reader on EOF/transport error (spec.md §4.5): the
    /// connection table slot is cleared so the federation continues
    /// without that peer's inputs.
    pub fn clear_peer_writer(&self, peer: FederateId) {
        self.state.lock().unwrap().peer_writers[peer.index()] = None;
    }

    pub fn set_start_time(&self, start_time: Timestamp) {
        self.state.lock().unwrap().start_time = start_time;
    }

    pub fn start_time(&self) -> Timestamp {
        self.state.lock().unwrap().start_time
    }

    pub fn granted_tag(&self) -> Timestamp {
        self.state.lock().unwrap().granted_tag
    }

    pub fn stop_requested(&self) -> bool {
        self.state.lock().unwrap().stop_requested
    }

    /// `next_event_time(t)` (spec.md §4.6): called by the local scheduler
    /// before advancing logical time past `t`.
    #[instrument(skip(self))]
    pub fn next_event_time(&self, t: Timestamp) -> Timestamp {
        let mut state = self.state.lock().unwrap();

        if !self.has_upstream && !self.has_downstream {
            return t;
        }
        if state.granted_tag >= t {
            return t;
        }

        if let Some(writer) = state.rti_writer.as_mut() {
            if let Err(e) = write_message(writer, &Message::NextEventTime(t)) {
                warn!(error = %e, "failed to send NEXT_EVENT_TIME to RTI");
            }
        }

        if !self.has_upstream {
            return t;
        }

        state.tag_pending = true;
        loop {
            state = self.event_q_changed.wait(state).unwrap();

            if !state.tag_pending {
                break;
            }

            let head = self.event_queue.peek_head_time();
            if head < t {
                debug!(%head, %t, "local event preempts pending NET wait");
                return head;
            }

            if state.stop_requested {
                let stop_time = state.requested_stop_time.unwrap_or(t).min(t);
                debug!(%stop_time, "stop requested while NET was pending");
                return stop_time;
            }
        }

        state.granted_tag
    }

    /// `logical_time_complete(t)` (spec.md §4.6).
    #[instrument(skip(self))]
    pub fn logical_time_complete(&self, t: Timestamp) {
        if !self.has_downstream {
            return;
        }
        let mut state = self.state.lock().unwrap();
        if let Some(writer) = state.rti_writer.as_mut() {
            if let Err(e) = write_message(writer, &Message::LogicalTimeComplete(t)) {
                warn!(error = %e, "failed to send LOGICAL_TIME_COMPLETE to RTI");
            }
        }
    }

    /// `broadcast_stop()` (spec.md §4.6): user-initiated stop.
    #[instrument(skip(self))]
    pub fn broadcast_stop(&self, current_logical_time: Timestamp) {
        let mut state = self.state.lock().unwrap();
        state.stop_requested = true;
        state.requested_stop_time.get_or_insert(current_logical_time);
        if let Some(writer) = state.rti_writer.as_mut() {
            if let Err(e) = write_message(writer, &Message::Stop(current_logical_time)) {
                warn!(error = %e, "failed to send STOP to RTI");
            }
        }
        info!("stop broadcast");
        self.event_q_changed.notify_all();
    }

    /// Handler for `TIME_ADVANCE_GRANT`, invoked by the RTI reader
    /// (spec.md §4.6).
    #[instrument(skip(self))]
    pub fn handle_time_advance_grant(&self, g: Timestamp) {
        let mut state = self.state.lock().unwrap();
        debug_assert!(
            g >= state.granted_tag,
            "TIME_ADVANCE_GRANT must not decrease: {g:?} < {:?}",
            state.granted_tag
        );
        state.granted_tag = g;
        state.tag_pending = false;
        drop(state);
        self.event_q_changed.notify_all();
    }

    /// Handler for `STOP` received from the RTI (spec.md §4.6). The
    /// carried time is informational only per spec.md §9.
    #[instrument(skip(self))]
    pub fn handle_incoming_stop_message(&self, stop_time: Timestamp) {
        let mut state = self.state.lock().unwrap();
        state.stop_requested = true;
        state.requested_stop_time.get_or_insert(stop_time);
        drop(state);
        self.event_q_changed.notify_all();
    }

    /// Send a `P2P_TIMED_MESSAGE` directly to a peer, under the same lock
    /// discipline as any other socket write (spec.md §5).
    pub fn send_timed_message_to_peer(
        &self,
        peer: FederateId,
        payload: crate::wire::TimedPayload,
    ) -> std::io::Result<()> {
        let mut state = self.state.lock().unwrap();
        if let Some(writer) = state.peer_writers[peer.index()].as_mut() {
            write_message(writer, &Message::P2pTimedMessage(payload))
                .map_err(|e| std::io::Error::new(std::io::ErrorKind::BrokenPipe, e))
        } else {
            Err(std::io::Error::new(
                std::io::ErrorKind::NotConnected,
                format!("no writer registered for {peer}"),
            ))
        }
    }

    /// Send a `TIMED_MESSAGE` to the RTI for relay to its destination
    /// federate (spec.md §4.3's `RTI↔F` direction).
    pub fn send_timed_message_to_rti(
        &self,
        payload: crate::wire::TimedPayload,
    ) -> std::io::Result<()> {
        let mut state = self.state.lock().unwrap();
        if let Some(writer) = state.rti_writer.as_mut() {
            write_message(writer, &Message::TimedMessage(payload))
                .map_err(|e| std::io::Error::new(std::io::ErrorKind::BrokenPipe, e))
        } else {
            Err(std::io::Error::new(
                std::io::ErrorKind::NotConnected,
                "no RTI writer registered",
            ))
        }
    }

    /// Schedule a message injection bridge payload (spec.md §4.7), under
    /// the coordinator's lock.
    pub fn schedule_event(&self, trigger: TriggerId, timestamp: Timestamp, payload: Vec<u8>) {
        let _state = self.state.lock().unwrap();
        let delay = timestamp.since(self.event_queue.current_logical_time());
        self.event_queue.schedule_at(trigger, delay, payload);
        drop(_state);
        self.event_q_changed.notify_all();
    }
}
