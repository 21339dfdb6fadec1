//! Framing adapters feeding the shared tool dispatcher

pub mod codec;
pub mod http;
pub mod socket;

pub use codec::{Frame, FrameError, JsonLineCodec, DEFAULT_BUFFER_LIMIT};
pub use http::{bind_with_retry, create_router, HttpState};
pub use socket::{serve_connection, SocketServer};
