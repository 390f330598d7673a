use chargesync::error::{ChargeSyncError, TransportErrorKind};

#[test]
fn error_constructors_fatal_group() {
    assert!(matches!(
        ChargeSyncError::config("x"),
        ChargeSyncError::Config { .. }
    ));
    assert!(matches!(
        ChargeSyncError::validation("f", "m"),
        ChargeSyncError::Validation { .. }
    ));
    assert!(matches!(
        ChargeSyncError::connectivity("x"),
        ChargeSyncError::Connectivity { .. }
    ));
}

#[test]
fn error_constructors_transport_group() {
    assert!(matches!(
        ChargeSyncError::connection_lost("x"),
        ChargeSyncError::Transport {
            kind: TransportErrorKind::ConnectionLost,
            ..
        }
    ));
    assert!(matches!(
        ChargeSyncError::frame("x"),
        ChargeSyncError::Transport {
            kind: TransportErrorKind::Frame,
            ..
        }
    ));
}

#[test]
fn error_constructors_runtime_group() {
    assert!(matches!(
        ChargeSyncError::device_status("x"),
        ChargeSyncError::DeviceStatus { .. }
    ));
    assert!(matches!(ChargeSyncError::io("x"), ChargeSyncError::Io { .. }));
}

#[test]
fn conversions_from_library_errors() {
    let io = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
    assert!(matches!(ChargeSyncError::from(io), ChargeSyncError::Io { .. }));

    let yaml = serde_yaml::from_str::<serde_yaml::Value>("a: [").unwrap_err();
    assert!(matches!(
        ChargeSyncError::from(yaml),
        ChargeSyncError::Serialization { .. }
    ));

    let json = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
    assert!(matches!(
        ChargeSyncError::from(json),
        ChargeSyncError::Serialization { .. }
    ));
}

#[test]
fn only_startup_errors_are_fatal() {
    assert!(ChargeSyncError::validation("f", "m").is_fatal());
    assert!(ChargeSyncError::connectivity("x").is_fatal());
    assert!(!ChargeSyncError::connection_lost("x").is_fatal());
    assert!(!ChargeSyncError::frame("x").is_fatal());
    assert!(!ChargeSyncError::device_status("x").is_fatal());
}
