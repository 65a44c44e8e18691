//! Browser-facing WebSocket sessions.
//!
//! - **messages**: SUBSCRIBE parsing and ACK/PRICE/ERROR shapes
//! - **router**: per-session symbol switching on top of the registry
//! - **server**: the axum `/ws/stock` endpoint

pub mod messages;
pub mod router;
pub mod server;

pub use messages::{ClientRequest, RequestError, ServerMessage, parse_client_request};
pub use router::{Outbound, SessionHandle, SessionRouter};
pub use server::{DownstreamServer, DownstreamServerError, STOCK_STREAM_PATH};
