//! Shared helpers for the docan test suites

/// Install a TRACE-level test logger; repeated calls are fine
pub fn init_test_logging() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::TRACE)
        .with_test_writer()
        .with_ansi(true)
        .try_init();
}

/// Parse a whitespace-separated hex dump into frame bytes
///
/// # Example
/// ```
/// let frame = docan_test::frame_bytes("02 3E 80 00 00 00 00 00");
/// assert_eq!(frame.len(), 8);
/// assert_eq!(frame[1], 0x3E);
/// ```
pub fn frame_bytes(dump: &str) -> Vec<u8> {
    let compact: String = dump.split_whitespace().collect();
    hex::decode(compact).expect("invalid hex in test fixture")
}
