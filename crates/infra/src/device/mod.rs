//! Network adapters for the amplifier's WebSocket and REST interfaces

pub mod rest;
pub mod websocket;

pub use rest::RestCommandSink;
pub use websocket::WebSocketSource;

/// Strip any scheme and trailing slashes from a device address
pub(crate) fn normalize_address(address: &str) -> &str {
    let address = address.trim();
    let address = address
        .strip_prefix("http://")
        .or_else(|| address.strip_prefix("ws://"))
        .unwrap_or(address);
    address.trim_end_matches('/')
}
