//! Live task event stream
//!
//! ## Architecture
//!
//! ```text
//! Transport (SSE over HTTP) → ConnectionManager → Dispatcher → StreamHandler
//! ```
//!
//! - The [`Transport`] opens `GET /tasks/{id}/logs` and yields raw frames
//! - The [`ConnectionManager`] owns the single live connection, its status
//!   signal, the terminal flag and the reconnect timer
//! - The [`Dispatcher`] parses each frame by kind and calls the matching
//!   [`StreamHandler`] method

mod connection;
mod dispatch;
mod frame;
mod sse;
mod transport;

pub use connection::{ConnectOptions, ConnectionManager, ConnectionStatus, ReconnectPolicy};
pub use dispatch::{CancelFlag, Dispatch, Dispatcher, NoopHandler, StreamHandler, TerminalFlag};
pub use frame::{
    AwaitingReviewPayload, CompletePayload, ErrorPayload, Frame, FrameKind, LogPayload,
    StatusPayload, TimeoutWarningPayload, CANCELLED_CODE,
};
pub use sse::{SseDecoder, SseFrame};
pub use transport::{FrameStream, HttpTransport, Transport, TransportEvent};
