//! Message injection bridge (spec.md §4.7): turns a timestamped wire
//! message into a scheduled event on the local event queue, under the
//! coordinator's lock discipline.

use federate_core::{FederateId, PortId, Timestamp};

use crate::coordinator::Coordinator;
use crate::error::FederateError;
use crate::wire::TimedPayload;

/// Opaque handle to a local trigger (reaction input port / action), as
/// returned by [`PortResolver::action_for_port`]. The local reactor
/// scheduler defines what this actually addresses; the runtime core only
/// threads it through to `EventQueue::schedule_at`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TriggerId(pub u32);

/// The local event queue, owned by the enclosing reactor runtime
/// (spec.md §3, "Event-queue integration"). Implementations must be safe to
/// call while the coordinator's internal lock is held by the caller.
pub trait EventQueue: Send + Sync {
    /// Current logical time, i.e. `get_logical_time()` in spec.md §6.
    fn current_logical_time(&self) -> Timestamp;

    /// The time of the earliest event still on the queue, or
    /// [`Timestamp::FOREVER`] if the queue is empty.
    fn peek_head_time(&self) -> Timestamp;

    /// Schedule `payload` to fire on `trigger` at `current_logical_time() +
    /// delay_nanos`. `delay_nanos` may be zero or negative; spec.md §4.7
    /// requires such delays be treated as "next microstep after current
    /// logical time" rather than rejected.
    fn schedule_at(&self, trigger: TriggerId, delay_nanos: i64, payload: Vec<u8>);
}

/// Maps a wire port id to a local trigger handle (spec.md §6,
/// `__action_for_port`).
pub trait PortResolver: Send + Sync {
    fn action_for_port(&self, port: PortId) -> Option<TriggerId>;
}

/// Handle one `TIMED_MESSAGE`/`P2P_TIMED_MESSAGE` payload already read off
/// the wire: validate addressing, resolve the destination port, and
/// schedule it (spec.md §4.7, §8 "`dest_fed == my_fed_id`" invariant).
pub fn handle_timed_message(
    coordinator: &Coordinator,
    resolver: &dyn PortResolver,
    my_fed_id: FederateId,
    payload: TimedPayload,
) -> Result<(), FederateError> {
    if payload.dest_federate != my_fed_id {
        return Err(FederateError::Protocol(format!(
            "received message addressed to {} but this federate is {my_fed_id}",
            payload.dest_federate
        )));
    }

    let trigger = resolver.action_for_port(payload.dest_port).ok_or_else(|| {
        FederateError::Protocol(format!(
            "no local trigger for port {}",
            payload.dest_port
        ))
    })?;

    coordinator.schedule_event(trigger, payload.timestamp, payload.body);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coordinator::Coordinator;
    use federate_core::PortId;
    use std::sync::Mutex;

    struct RecordingQueue {
        logical_time: Timestamp,
        scheduled: Mutex<Vec<(TriggerId, i64, Vec<u8>)>>,
    }

    impl EventQueue for RecordingQueue {
        fn current_logical_time(&self) -> Timestamp {
            self.logical_time
        }

        fn peek_head_time(&self) -> Timestamp {
            Timestamp::FOREVER
        }

        fn schedule_at(&self, trigger: TriggerId, delay_nanos: i64, payload: Vec<u8>) {
            self.scheduled
                .lock()
                .unwrap()
                .push((trigger, delay_nanos, payload));
        }
    }

    struct OneArgResolver;

    impl PortResolver for OneArgResolver {
        fn action_for_port(&self, port: PortId) -> Option<TriggerId> {
            (port.get() == 0).then_some(TriggerId(42))
        }
    }

    #[test]
    fn rejects_messages_addressed_to_another_federate() {
        let queue = RecordingQueue {
            logical_time: Timestamp::ZERO,
            scheduled: Mutex::new(Vec::new()),
        };
        let coordinator =
            Coordinator::new(FederateId::new(1), 1, false, false, Box::new(queue));
        let payload = TimedPayload {
            dest_port: PortId::new(0),
            dest_federate: FederateId::new(2),
            timestamp: Timestamp::from_nanos(10),
            body: vec![1],
        };
        let err =
            handle_timed_message(&coordinator, &OneArgResolver, FederateId::new(1), payload)
                .unwrap_err();
        assert!(matches!(err, FederateError::Protocol(_)));
    }

    #[test]
    fn rejects_unresolvable_ports() {
        let queue = RecordingQueue {
            logical_time: Timestamp::ZERO,
            scheduled: Mutex::new(Vec::new()),
        };
        let coordinator =
            Coordinator::new(FederateId::new(1), 1, false, false, Box::new(queue));
        let payload = TimedPayload {
            dest_port: PortId::new(9),
            dest_federate: FederateId::new(1),
            timestamp: Timestamp::from_nanos(10),
            body: vec![],
        };
        let err =
            handle_timed_message(&coordinator, &OneArgResolver, FederateId::new(1), payload)
                .unwrap_err();
        assert!(matches!(err, FederateError::Protocol(_)));
    }
}
