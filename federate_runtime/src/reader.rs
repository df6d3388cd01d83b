//! Reader tasks (spec.md §4.5): one blocking OS thread per RTI/peer socket.
//! Each owns its socket exclusively, reads a full frame, then acquires the
//! coordinator's lock to mutate state or inject an event — never holding
//! the lock across I/O. Grounded on `listen_to_rti`/`listen_to_federates`
//! in `original_source/federate.c`.

use std::net::TcpStream;
use std::sync::Arc;

use federate_core::FederateId;
use tracing::{debug, error, info, warn};

use crate::bridge::{handle_timed_message, PortResolver};
use crate::coordinator::Coordinator;
use crate::wire::{read_message_body, read_u8, CodecError, FrameIoError, Message, MessageType};

/// Why a reader thread stopped. Used by tests and shutdown orchestration to
/// tell a clean peer close apart from a fault.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReaderExit {
    Eof,
    TransportError,
    ProtocolError,
}

/// Reads and dispatches RTI messages until EOF or a fatal error. Per
/// spec.md §4.5, the RTI reader accepts `TIMED_MESSAGE`, `TIME_ADVANCE_GRANT`,
/// `STOP`; anything else is a protocol fault. An RTI-socket fault is fatal
/// to the federation (spec.md §7): the reader sets `stop_requested` and
/// broadcasts before exiting.
pub fn run_rti_reader(
    mut socket: TcpStream,
    coordinator: Arc<Coordinator>,
    resolver: Arc<dyn PortResolver>,
    max_body_len: u32,
) -> ReaderExit {
    loop {
        let type_byte = match read_u8(&mut socket) {
            Ok(b) => b,
            Err(FrameIoError::Closed) => {
                info!("RTI connection closed");
                coordinator.broadcast_stop(coordinator.granted_tag());
                return ReaderExit::Eof;
            }
            Err(FrameIoError::Broken(e)) => {
                error!(error = %e, "RTI transport error");
                coordinator.broadcast_stop(coordinator.granted_tag());
                return ReaderExit::TransportError;
            }
        };

        let message_type = match MessageType::try_from(type_byte) {
            Ok(t) => t,
            Err(byte) => {
                error!(byte, "unknown message type from RTI, treating as protocol fault");
                coordinator.broadcast_stop(coordinator.granted_tag());
                return ReaderExit::ProtocolError;
            }
        };

        if !matches!(
            message_type,
            MessageType::TimedMessage | MessageType::TimeAdvanceGrant | MessageType::Stop
        ) {
            error!(?message_type, "message type not valid from the RTI reader");
            coordinator.broadcast_stop(coordinator.granted_tag());
            return ReaderExit::ProtocolError;
        }

        let message = match read_message_body(&mut socket, message_type, max_body_len) {
            Ok(m) => m,
            Err(e) => {
                if is_fatal(&e) {
                    error!(error = %e, "failed to read RTI frame body");
                } else {
                    info!(error = %e, "RTI closed mid-frame");
                }
                coordinator.broadcast_stop(coordinator.granted_tag());
                return ReaderExit::TransportError;
            }
        };

        match message {
            Message::TimeAdvanceGrant(g) => {
                debug!(%g, "received TIME_ADVANCE_GRANT");
                coordinator.handle_time_advance_grant(g);
            }
            Message::Stop(stop_time) => {
                debug!(%stop_time, "received STOP from RTI");
                coordinator.handle_incoming_stop_message(stop_time);
            }
            Message::TimedMessage(payload) => {
                if let Err(e) = handle_timed_message(
                    &coordinator,
                    resolver.as_ref(),
                    coordinator.my_fed_id(),
                    payload,
                ) {
                    error!(error = %e, "fault while injecting TIMED_MESSAGE");
                    coordinator.broadcast_stop(coordinator.granted_tag());
                    return ReaderExit::ProtocolError;
                }
            }
            other => unreachable!("dispatch filtered to {other:?} above"),
        }
    }
}

/// Reads and dispatches one peer's messages until EOF or error. Per
/// spec.md §4.5, the peer reader accepts only `P2P_TIMED_MESSAGE`. A
/// transport fault on a peer socket is soft (spec.md §7): the connection
/// table slot is cleared and the federation continues without that peer's
/// inputs. A protocol fault is not scoped to this peer and is universally
/// fatal (spec.md §7, "corruption and cannot be recovered from"), so it
/// also broadcasts a stop.
pub fn run_peer_reader(
    mut socket: TcpStream,
    peer_id: FederateId,
    coordinator: Arc<Coordinator>,
    resolver: Arc<dyn PortResolver>,
    max_body_len: u32,
) -> ReaderExit {
    let exit = loop {
        let type_byte = match read_u8(&mut socket) {
            Ok(b) => b,
            Err(FrameIoError::Closed) => {
                info!(%peer_id, "peer connection closed");
                break ReaderExit::Eof;
            }
            Err(FrameIoError::Broken(e)) => {
                warn!(%peer_id, error = %e, "peer transport error");
                break ReaderExit::TransportError;
            }
        };

        let message_type = match MessageType::try_from(type_byte) {
            Ok(MessageType::P2pTimedMessage) => MessageType::P2pTimedMessage,
            Ok(other) => {
                error!(%peer_id, kind = ?other, "unexpected message type from peer, treating as protocol fault");
                coordinator.broadcast_stop(coordinator.granted_tag());
                break ReaderExit::ProtocolError;
            }
            Err(byte) => {
                error!(%peer_id, byte, "unknown message type from peer, treating as protocol fault");
                coordinator.broadcast_stop(coordinator.granted_tag());
                break ReaderExit::ProtocolError;
            }
        };

        let message = match read_message_body(&mut socket, message_type, max_body_len) {
            Ok(m) => m,
            Err(e) => {
                if is_fatal(&e) {
                    warn!(%peer_id, error = %e, "failed to read peer frame body");
                } else {
                    info!(%peer_id, "peer closed mid-frame");
                }
                break ReaderExit::TransportError;
            }
        };

        if let Message::P2pTimedMessage(payload) = message {
            if let Err(e) = handle_timed_message(
                &coordinator,
                resolver.as_ref(),
                coordinator.my_fed_id(),
                payload,
            ) {
                error!(%peer_id, error = %e, "fault while injecting P2P_TIMED_MESSAGE, treating as protocol fault");
                coordinator.broadcast_stop(coordinator.granted_tag());
                break ReaderExit::ProtocolError;
            }
        }
    };

    coordinator.clear_peer_writer(peer_id);
    exit
}

/// Surfaced so callers can match on a specific decode failure without
/// string comparison, per spec.md §7's "distinguish by type" guidance.
pub fn is_fatal(error: &CodecError) -> bool {
    !matches!(error, CodecError::Io(FrameIoError::Closed))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::{EventQueue, TriggerId};
    use crate::wire::{write_message, TimedPayload};
    use federate_core::{PortId, Timestamp};
    use std::net::TcpListener;
    use std::thread;

    struct NullQueue;
    impl EventQueue for NullQueue {
        fn current_logical_time(&self) -> Timestamp {
            Timestamp::ZERO
        }
        fn peek_head_time(&self) -> Timestamp {
            Timestamp::FOREVER
        }
        fn schedule_at(&self, _trigger: TriggerId, _delay_nanos: i64, _payload: Vec<u8>) {}
    }

    struct AllowAllResolver;
    impl PortResolver for AllowAllResolver {
        fn action_for_port(&self, _port: PortId) -> Option<TriggerId> {
            Some(TriggerId(0))
        }
    }

    #[test_log::test]
    fn rti_reader_applies_time_advance_grant_and_stops_on_close() {
        let listener = TcpListener::bind(("127.0.0.1", 0)).unwrap();
        let port = listener.local_addr().unwrap().port();

        let server = thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            write_message(&mut stream, &Message::TimeAdvanceGrant(Timestamp::from_nanos(99))).unwrap();
            // Drop the stream to signal EOF after the grant has been read.
        });

        let socket = TcpStream::connect(("127.0.0.1", port)).unwrap();
        let coordinator = Arc::new(Coordinator::new(
            FederateId::new(1),
            1,
            true,
            false,
            Box::new(NullQueue),
        ));
        let resolver: Arc<dyn PortResolver> = Arc::new(AllowAllResolver);

        let exit = run_rti_reader(socket, coordinator.clone(), resolver, 1 << 16);
        assert_eq!(exit, ReaderExit::Eof);
        assert_eq!(coordinator.granted_tag(), Timestamp::from_nanos(99));
        assert!(coordinator.stop_requested());
        server.join().unwrap();
    }

    #[test_log::test]
    fn peer_reader_injects_timed_message_and_clears_slot_on_eof() {
        let listener = TcpListener::bind(("127.0.0.1", 0)).unwrap();
        let port = listener.local_addr().unwrap().port();

        let server = thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            write_message(
                &mut stream,
                &Message::P2pTimedMessage(TimedPayload {
                    dest_port: PortId::new(0),
                    dest_federate: FederateId::new(1),
                    timestamp: Timestamp::from_nanos(5),
                    body: vec![7],
                }),
            )
            .unwrap();
        });

        let socket = TcpStream::connect(("127.0.0.1", port)).unwrap();
        let coordinator = Arc::new(Coordinator::new(
            FederateId::new(1),
            2,
            true,
            false,
            Box::new(NullQueue),
        ));
        let peer = FederateId::new(0);
        coordinator.install_peer_writer(peer, socket.try_clone().unwrap());
        let resolver: Arc<dyn PortResolver> = Arc::new(AllowAllResolver);

        let exit = run_peer_reader(socket, peer, coordinator.clone(), resolver, 1 << 16);
        assert_eq!(exit, ReaderExit::Eof);
        // Slot cleared; a subsequent write should fail with NotConnected.
        let err = coordinator
            .send_timed_message_to_peer(
                peer,
                TimedPayload {
                    dest_port: PortId::new(0),
                    dest_federate: FederateId::new(1),
                    timestamp: Timestamp::ZERO,
                    body: vec![],
                },
            )
            .unwrap_err();
        assert_eq!(err.kind(), std::io::ErrorKind::NotConnected);
        server.join().unwrap();
    }

    #[test_log::test]
    fn peer_reader_treats_non_p2p_message_as_a_fatal_protocol_error() {
        let listener = TcpListener::bind(("127.0.0.1", 0)).unwrap();
        let port = listener.local_addr().unwrap().port();

        let server = thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            write_message(&mut stream, &Message::Ack).unwrap();
        });

        let socket = TcpStream::connect(("127.0.0.1", port)).unwrap();
        let coordinator = Arc::new(Coordinator::new(
            FederateId::new(1),
            2,
            false,
            false,
            Box::new(NullQueue),
        ));
        let peer = FederateId::new(0);
        let resolver: Arc<dyn PortResolver> = Arc::new(AllowAllResolver);

        let exit = run_peer_reader(socket, peer, coordinator.clone(), resolver, 1 << 16);
        assert_eq!(exit, ReaderExit::ProtocolError);
        // A protocol fault is not scoped to this peer; the whole federation stops.
        assert!(coordinator.stop_requested());
        server.join().unwrap();
    }
}
