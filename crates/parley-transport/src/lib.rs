//! # parley-transport
//!
//! Transport abstraction layer for the Parley chat hub.
//!
//! - **WebSocket** - upgraded axum sockets, used by the server
//! - **Memory** - an in-process duplex pair, used to drive sessions in tests
//!
//! ## Transport Abstraction
//!
//! Every transport implements [`Connection`], which splits into a
//! [`FrameReader`] and a [`FrameWriter`] so reads and writes can run on
//! separate tasks.
//!
//! ```rust,ignore
//! use parley_transport::{Connection, Inbound};
//!
//! async fn handle(conn: Box<dyn Connection>) {
//!     let (mut reader, mut writer) = conn.split();
//!     while let Ok(Some(Inbound::Data(data))) = reader.recv().await {
//!         // Process payload
//!     }
//!     let _ = writer.close().await;
//! }
//! ```

pub mod memory;
pub mod traits;

#[cfg(feature = "websocket")]
pub mod websocket;

pub use traits::{Connection, FrameReader, FrameWriter, Inbound, TransportError};

#[cfg(feature = "websocket")]
pub use websocket::WebSocketConnection;
