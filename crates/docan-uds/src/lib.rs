pub mod code;
pub mod connection;
pub mod dispatcher;
pub mod job;
pub mod services;
pub mod session;
pub mod session_manager;
pub mod transport_binding;

#[cfg(test)]
#[ctor::ctor]
fn setup_test_logging() {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::TRACE)
        .with_test_writer()
        .with_ansi(true)
        .init();
}
