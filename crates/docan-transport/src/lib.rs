pub mod address;
pub mod codec;
pub mod connection;
pub mod datalink;
pub mod interrupts;
pub mod layer;
pub mod message;
pub mod params;
pub mod receiver;
pub mod timer;
pub mod transmitter;
pub mod types;

#[cfg(test)]
#[ctor::ctor]
fn setup_test_logging() {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::TRACE)
        .with_test_writer()
        .with_ansi(true)
        .init();
}
