use super::error::Error;

#[test]
fn test_error_codes_are_stable() {
    assert_eq!(Error::InvalidArgument("x".into()).code(), "GV-001");
    assert_eq!(
        Error::DimensionMismatch {
            expected: 4,
            actual: 3
        }
        .code(),
        "GV-002"
    );
    assert_eq!(Error::RowNotFound(7).code(), "GV-003");
    assert_eq!(Error::Untrained("ivf").code(), "GV-004");
    assert_eq!(Error::TrainingFailed("no centroids".into()).code(), "GV-005");
    assert_eq!(Error::Corrupted("bad magic".into()).code(), "GV-006");
}

#[test]
fn test_corruption_is_not_recoverable() {
    assert!(!Error::Corrupted("posting not sorted".into()).is_recoverable());
    assert!(!Error::Internal("bug".into()).is_recoverable());
    assert!(Error::RowNotFound(1).is_recoverable());
    assert!(Error::Untrained("ivf-pq").is_recoverable());
}

#[test]
fn test_display_includes_code_and_detail() {
    let err = Error::DimensionMismatch {
        expected: 128,
        actual: 64,
    };
    let msg = err.to_string();
    assert!(msg.contains("GV-002"));
    assert!(msg.contains("128"));
    assert!(msg.contains("64"));
}

#[test]
fn test_io_error_conversion() {
    let io = std::io::Error::new(std::io::ErrorKind::UnexpectedEof, "short read");
    let err: Error = io.into();
    assert_eq!(err.code(), "GV-007");
}
