//! Directory / connection manager (spec.md §4.4).
//!
//! Establishes the RTI socket and per-peer P2P sockets: port-scanning with a
//! retry budget against a partially available directory service, and the
//! three handshakes (`FED_ID`→RTI, `P2P_SENDING_FED_ID`↔peer,
//! `ADDRESS_QUERY`/`ADDRESS_REPLY` against the RTI). Grounded on
//! `connect_to_rti`, `create_server`, `connect_to_federate` and
//! `handle_p2p_connections_from_federates` in `original_source/federate.c`.

use std::io;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4, TcpListener, TcpStream};
use std::thread;

use federate_core::FederateId;
use tracing::{debug, info, warn};

use crate::config::FederateConfig;
use crate::wire::{read_message, write_message, CodecError, Message, MessageType, RejectReason};

#[derive(Debug, thiserror::Error)]
pub enum ConnectError {
    #[error("exhausted {retries} scan pass(es) against ports {start}..={end}")]
    PortScanExhausted { retries: u32, start: u16, end: u16 },

    #[error("rejected by peer: {0:?}")]
    Rejected(RejectReason),

    #[error("unexpected message type during handshake: {0:?}")]
    UnexpectedMessage(MessageType),

    #[error("failed to bind a listening socket in {start}..={end}")]
    BindExhausted { start: u16, end: u16 },

    #[error("wire error during handshake: {0}")]
    Wire(#[from] CodecError),

    #[error("federation id does not match")]
    FederationIdMismatch,
}

fn message_type_of(message: &Message) -> MessageType {
    match message {
        Message::FedId { .. } => MessageType::FedId,
        Message::Ack => MessageType::Ack,
        Message::Reject { .. } => MessageType::Reject,
        Message::AddressAd { .. } => MessageType::AddressAd,
        Message::AddressQuery { .. } => MessageType::AddressQuery,
        Message::AddressReply { .. } => MessageType::AddressReply,
        Message::Timestamp(_) => MessageType::Timestamp,
        Message::NextEventTime(_) => MessageType::NextEventTime,
        Message::TimeAdvanceGrant(_) => MessageType::TimeAdvanceGrant,
        Message::LogicalTimeComplete(_) => MessageType::LogicalTimeComplete,
        Message::Stop(_) => MessageType::Stop,
        Message::TimedMessage(_) => MessageType::TimedMessage,
        Message::P2pTimedMessage(_) => MessageType::P2pTimedMessage,
        Message::P2pSendingFedId { .. } => MessageType::P2pSendingFedId,
    }
}

/// Is this rejection cause one a port scan should treat as "wrong port,
/// keep looking" rather than a fatal configuration error (spec.md §4.4/§7)?
fn is_soft_reject(cause: RejectReason) -> bool {
    matches!(
        cause,
        RejectReason::WrongServer | RejectReason::FederationIdDoesNotMatch
    )
}

fn handshake_fed_id(
    stream: &mut TcpStream,
    fed_id: FederateId,
    federation_id: &str,
    max_body_len: u32,
) -> Result<(), ConnectError> {
    write_message(
        stream,
        &Message::FedId {
            fed_id,
            federation_id: federation_id.to_string(),
        },
    )?;
    match read_message(stream, max_body_len)? {
        Message::Ack => Ok(()),
        Message::Reject { cause } => Err(ConnectError::Rejected(cause)),
        other => Err(ConnectError::UnexpectedMessage(message_type_of(&other))),
    }
}

fn try_connect_one(
    addr: SocketAddr,
    fed_id: FederateId,
    federation_id: &str,
    max_body_len: u32,
) -> Option<Result<TcpStream, ConnectError>> {
    let mut stream = match TcpStream::connect(addr) {
        Ok(stream) => stream,
        Err(e) => {
            debug!(%addr, error = %e, "connect attempt failed");
            return None;
        }
    };
    if let Err(e) = disable_nagle(&stream) {
        debug!(%addr, error = %e, "failed to set TCP_NODELAY");
    }
    match handshake_fed_id(&mut stream, fed_id, federation_id, max_body_len) {
        Ok(()) => Some(Ok(stream)),
        Err(ConnectError::Rejected(cause)) if is_soft_reject(cause) => {
            debug!(?cause, %addr, "soft reject during port scan");
            None
        }
        Err(e) => Some(Err(e)),
    }
}

/// Connect to the RTI, scanning ports if none was specified (spec.md §4.4).
pub fn connect_to_rti(
    host: Ipv4Addr,
    specified_port: Option<u16>,
    config: &FederateConfig,
) -> Result<TcpStream, ConnectError> {
    if let Some(port) = specified_port {
        let addr = SocketAddr::V4(SocketAddrV4::new(host, port));
        return try_connect_one(addr, config.fed_id, &config.federation_id, config.buffer_size)
            .unwrap_or(Err(ConnectError::PortScanExhausted {
                retries: 1,
                start: port,
                end: port,
            }));
    }

    let start = config.starting_port;
    let end = start.saturating_add(config.port_range_limit);

    for pass in 0..config.connect_num_retries {
        for port in start..=end {
            let addr = SocketAddr::V4(SocketAddrV4::new(host, port));
            if let Some(result) = try_connect_one(
                addr,
                config.fed_id,
                &config.federation_id,
                config.buffer_size,
            ) {
                return result;
            }
        }
        debug!(pass, start, end, "port scan pass exhausted, sleeping before retry");
        thread::sleep(config.connect_retry_interval);
    }

    Err(ConnectError::PortScanExhausted {
        retries: config.connect_num_retries,
        start,
        end,
    })
}

/// Bind a listening P2P socket, scanning ports if none was specified
/// (spec.md §4.4). Returns the bound listener and the port it landed on.
pub fn create_server(
    specified_port: Option<u16>,
    config: &FederateConfig,
) -> Result<(TcpListener, u16), ConnectError> {
    if let Some(port) = specified_port {
        let listener = TcpListener::bind(("0.0.0.0", port))
            .map_err(|_| ConnectError::BindExhausted { start: port, end: port })?;
        return Ok((listener, port));
    }

    let start = config.starting_port;
    let end = start.saturating_add(config.port_range_limit);
    for port in start..=end {
        match TcpListener::bind(("0.0.0.0", port)) {
            Ok(listener) => {
                info!(port, "P2P server bound");
                return Ok((listener, port));
            }
            Err(e) => {
                debug!(port, error = %e, "bind attempt failed");
            }
        }
    }

    Err(ConnectError::BindExhausted { start, end })
}

/// Advertise the bound P2P port to the RTI.
pub fn send_address_ad(rti_socket: &mut TcpStream, port: u16) -> Result<(), ConnectError> {
    write_message(rti_socket, &Message::AddressAd { port: u32::from(port) })?;
    Ok(())
}

/// Dial a peer federate, querying the RTI for its address first
/// (spec.md §4.4, `connect_to_federate`). Called synchronously on the RTI
/// socket before the RTI reader thread is spawned.
pub fn connect_to_federate(
    rti_socket: &mut TcpStream,
    peer_id: FederateId,
    config: &FederateConfig,
) -> Result<TcpStream, ConnectError> {
    for attempt in 0..config.connect_num_retries {
        write_message(rti_socket, &Message::AddressQuery { fed_id: peer_id })?;
        let (port, addr) = match read_message(rti_socket, config.buffer_size)? {
            Message::AddressReply { port, addr } => (port, addr),
            other => return Err(ConnectError::UnexpectedMessage(message_type_of(&other))),
        };

        if port < 0 {
            debug!(%peer_id, attempt, "RTI does not yet know peer's address, retrying");
            thread::sleep(config.address_query_retry_interval);
            continue;
        }

        let socket_addr = SocketAddr::V4(SocketAddrV4::new(
            Ipv4Addr::new(addr[0], addr[1], addr[2], addr[3]),
            port as u16,
        ));

        let mut stream = match TcpStream::connect(socket_addr) {
            Ok(stream) => stream,
            Err(e) => {
                warn!(%peer_id, %socket_addr, error = %e, "connect to peer failed, retrying");
                continue;
            }
        };
        if let Err(e) = disable_nagle(&stream) {
            debug!(%peer_id, error = %e, "failed to set TCP_NODELAY");
        }

        write_message(
            &mut stream,
            &Message::P2pSendingFedId {
                fed_id: config.fed_id,
                federation_id: config.federation_id.clone(),
            },
        )?;

        match read_message(&mut stream, config.buffer_size) {
            Ok(Message::Ack) => {
                info!(%peer_id, %socket_addr, "connected to peer");
                return Ok(stream);
            }
            Ok(other) => {
                warn!(%peer_id, kind = ?message_type_of(&other), "peer rejected handshake, retrying");
            }
            Err(e) => {
                warn!(%peer_id, error = %e, "peer handshake failed, retrying");
            }
        }
    }

    Err(ConnectError::PortScanExhausted {
        retries: config.connect_num_retries,
        start: config.starting_port,
        end: config.starting_port.saturating_add(config.port_range_limit),
    })
}

/// Accept inbound P2P connections until exactly
/// `config.number_of_inbound_physical_connections` peers have registered
/// (spec.md §4.4, `handle_p2p_connections_from_federates`).
pub fn handle_p2p_connections_from_federates(
    listener: &TcpListener,
    config: &FederateConfig,
) -> Result<Vec<(FederateId, TcpStream)>, ConnectError> {
    let mut accepted = Vec::with_capacity(config.number_of_inbound_physical_connections);

    while accepted.len() < config.number_of_inbound_physical_connections {
        let (mut stream, peer_addr) = match listener.accept() {
            Ok(pair) => pair,
            Err(e) => {
                warn!(error = %e, "accept failed, retrying");
                continue;
            }
        };
        if let Err(e) = disable_nagle(&stream) {
            debug!(%peer_addr, error = %e, "failed to set TCP_NODELAY");
        }

        match read_message(&mut stream, config.buffer_size) {
            Ok(Message::P2pSendingFedId {
                fed_id,
                federation_id,
            }) => {
                if federation_id != config.federation_id {
                    warn!(%peer_addr, "federation id mismatch on P2P accept");
                    let _ = write_message(
                        &mut stream,
                        &Message::Reject {
                            cause: RejectReason::FederationIdDoesNotMatch,
                        },
                    );
                    continue;
                }
                write_message(&mut stream, &Message::Ack)?;
                info!(%fed_id, %peer_addr, "accepted P2P connection");
                accepted.push((fed_id, stream));
            }
            Ok(other) => {
                warn!(%peer_addr, kind = ?message_type_of(&other), "unexpected first message on P2P accept");
                let _ = write_message(
                    &mut stream,
                    &Message::Reject {
                        cause: RejectReason::WrongServer,
                    },
                );
            }
            Err(e) => {
                warn!(%peer_addr, error = %e, "failed to read P2P handshake");
            }
        }
    }

    Ok(accepted)
}

/// Send `TIMESTAMP(now)` to the RTI and read back its reply, establishing
/// the federation's shared start time (spec.md §4.8, `get_start_time_from_rti`).
pub fn get_start_time_from_rti(
    rti_socket: &mut TcpStream,
    now: federate_core::Timestamp,
) -> Result<federate_core::Timestamp, ConnectError> {
    write_message(rti_socket, &Message::Timestamp(now))?;
    match read_message(rti_socket, 64)? {
        Message::Timestamp(start_time) => Ok(start_time),
        other => Err(ConnectError::UnexpectedMessage(message_type_of(&other))),
    }
}

/// Set TCP_NODELAY the way a federate's sockets are expected to run: small
/// protocol frames should not wait on Nagle's algorithm.
pub fn disable_nagle(stream: &TcpStream) -> io::Result<()> {
    stream.set_nodelay(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;
    use std::thread;

    fn loopback_config() -> FederateConfig {
        let mut config = FederateConfig::for_testing(FederateId::new(1), "fed-a");
        config.connect_num_retries = 3;
        config
    }

    #[test]
    fn connect_to_rti_succeeds_against_a_listening_mock() {
        let listener = TcpListener::bind(("127.0.0.1", 0)).unwrap();
        let port = listener.local_addr().unwrap().port();
        let config = loopback_config();
        let federation_id = config.federation_id.clone();

        let server = thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            match read_message(&mut stream, 1024).unwrap() {
                Message::FedId {
                    federation_id: got, ..
                } => assert_eq!(got, federation_id),
                other => panic!("unexpected message {other:?}"),
            }
            write_message(&mut stream, &Message::Ack).unwrap();
        });

        let stream =
            connect_to_rti(Ipv4Addr::LOCALHOST, Some(port), &config).expect("should connect");
        drop(stream);
        server.join().unwrap();
    }

    #[test]
    fn connect_to_rti_propagates_fatal_rejection() {
        let listener = TcpListener::bind(("127.0.0.1", 0)).unwrap();
        let port = listener.local_addr().unwrap().port();
        let config = loopback_config();

        let server = thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            let _ = read_message(&mut stream, 1024).unwrap();
            write_message(
                &mut stream,
                &Message::Reject {
                    cause: RejectReason::FederateIdInUse,
                },
            )
            .unwrap();
        });

        let err = connect_to_rti(Ipv4Addr::LOCALHOST, Some(port), &config).unwrap_err();
        assert!(matches!(
            err,
            ConnectError::Rejected(RejectReason::FederateIdInUse)
        ));
        server.join().unwrap();
    }

    #[test]
    fn connect_to_rti_finds_the_rti_two_ports_into_the_scan_range() {
        // RTI listens on starting_port + 2; the scan must walk past two
        // refused ports before landing on it (spec.md §8 scenario 5).
        let mut config = loopback_config();
        config.starting_port = 0;
        config.port_range_limit = 8;

        let listener = TcpListener::bind(("127.0.0.1", 0)).unwrap();
        let actual_port = listener.local_addr().unwrap().port();
        config.starting_port = actual_port.saturating_sub(2);
        let federation_id = config.federation_id.clone();

        let server = thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            match read_message(&mut stream, 1024).unwrap() {
                Message::FedId {
                    federation_id: got, ..
                } => assert_eq!(got, federation_id),
                other => panic!("unexpected message {other:?}"),
            }
            write_message(&mut stream, &Message::Ack).unwrap();
        });

        let stream =
            connect_to_rti(Ipv4Addr::LOCALHOST, None, &config).expect("scan should find the RTI");
        drop(stream);
        server.join().unwrap();
    }

    #[test]
    fn handle_p2p_connections_accepts_expected_count_and_rejects_bad_federation_id() {
        let listener = TcpListener::bind(("127.0.0.1", 0)).unwrap();
        let port = listener.local_addr().unwrap().port();
        let mut config = loopback_config();
        config.number_of_inbound_physical_connections = 1;

        let server = thread::spawn(move || handle_p2p_connections_from_federates(&listener, &config));

        // First connection: wrong federation id, should be rejected and not counted.
        let mut bad = TcpStream::connect(("127.0.0.1", port)).unwrap();
        write_message(
            &mut bad,
            &Message::P2pSendingFedId {
                fed_id: FederateId::new(9),
                federation_id: "wrong-federation".to_string(),
            },
        )
        .unwrap();
        assert_eq!(
            read_message(&mut bad, 1024).unwrap(),
            Message::Reject {
                cause: RejectReason::FederationIdDoesNotMatch
            }
        );
        drop(bad);

        // Second connection: correct id, should be accepted.
        let mut good = TcpStream::connect(("127.0.0.1", port)).unwrap();
        write_message(
            &mut good,
            &Message::P2pSendingFedId {
                fed_id: FederateId::new(2),
                federation_id: "fed-a".to_string(),
            },
        )
        .unwrap();
        assert_eq!(read_message(&mut good, 1024).unwrap(), Message::Ack);

        let accepted = server.join().unwrap().unwrap();
        assert_eq!(accepted.len(), 1);
        assert_eq!(accepted[0].0, FederateId::new(2));
    }
}
