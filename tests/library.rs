//! Engine library lifecycle
//!
//! Kept in its own test binary so that no other test holds a lease while
//! the library is torn down.

use std::time::Duration;

use mqlink::bridge::{BridgeEvent, BridgeHandle};
use mqlink::engine::{library, MemoryBroker};
use mqlink::protocol::{BridgeError, Command};

#[test]
fn test_library_init_shutdown_reinit() {
    // Teardown before any use is a no-op
    library::shutdown().unwrap();
    assert!(!library::is_initialized());

    let broker = MemoryBroker::new();
    let first = BridgeHandle::spawn(broker.engine()).unwrap();
    let second = BridgeHandle::spawn(broker.engine()).unwrap();
    assert!(library::is_initialized());
    assert_eq!(library::lease_count(), 2);

    // Refused while bridges are alive
    assert!(matches!(library::shutdown(), Err(BridgeError::Library(_))));
    assert!(library::is_initialized());

    first.terminate();
    assert_eq!(library::lease_count(), 1);
    assert!(library::shutdown().is_err());

    second.terminate();
    assert_eq!(library::lease_count(), 0);
    library::shutdown().unwrap();
    assert!(!library::is_initialized());
    assert!(library::handle().is_none());

    // A new bridge initializes the library again
    let third = BridgeHandle::spawn(broker.engine()).unwrap();
    assert!(library::is_initialized());
    third.send(Command::Stop).unwrap();
    third
        .send_frames(vec![bytes::Bytes::from_static(b"NOPE")])
        .unwrap();
    assert!(matches!(
        third.recv_timeout(Duration::from_secs(5)),
        Some(BridgeEvent::Error(BridgeError::ProtocolViolation(_)))
    ));
    third.terminate();

    library::shutdown().unwrap();
    library::init().unwrap();
    library::init().unwrap();
    assert!(library::is_initialized());
    library::shutdown().unwrap();
}
