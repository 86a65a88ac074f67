#![warn(missing_docs)]

//! Cross-context messaging for the web-sqlite DevTools extension.
//!
//! The extension spans five isolated execution contexts that can only
//! exchange serializable messages:
//!
//! ```text
//! ┌────────┐   port    ┌────────────┐  tab msg  ┌──────────────────┐  bridge  ┌──────────────┐
//! │ Panel  │◂────────▸ │ Background │◂────────▸ │ Content ISOLATED │◂───────▸ │ Content MAIN │
//! └────────┘           │  (Router)  │           └──────────────────┘          │ __web_sqlite │
//!                      └────────────┘                                         └──────────────┘
//!                            ▲
//!                            │ mailbox
//!                      ┌───────────┐
//!                      │ Offscreen │
//!                      └───────────┘
//! ```
//!
//! The background is the coordinator. It owns the [Router], which knows
//! which context handles each channel, answers requests with its local
//! handlers and forwards everything else. Every other context holds a
//! satellite [Messenger] that sends through the router and announces the
//! channels it handles.
//!
//! Requests and responses travel as [WireMessage]s and are typed at the
//! edges with [Channel]:
//!
//! ```rust
//! use web_sqlite_messaging::{Channel, Router};
//!
//! const DOUBLE: Channel<i64, i64> = Channel::new("double");
//!
//! # async fn example() -> Result<(), web_sqlite_messaging::ChannelError> {
//! let router = Router::new();
//! let background = router.messenger();
//!
//! let _subscription = DOUBLE.on(&background, |n| async move { Ok::<_, String>(n * 2) }).await?;
//! assert_eq!(DOUBLE.send(&background, 21).await?, 42);
//! # Ok(())
//! # }
//! ```
//!
//! Panel operations on page data take two hops: the background relays them
//! to the content script of the inspected tab through a [Passthrough].
//! High-frequency page logs are buffered in a [RingBuffer] and delivered in
//! batches by a [LogStream].

mod error;
pub use error::*;

mod wire;
pub use wire::*;

mod context;
pub use context::*;

mod registry;
pub use registry::*;

pub mod handler;
pub use handler::{BoxedHandler, HandlerFuture, HandlerTable};

mod transport;
pub use transport::*;

mod messenger;
pub use messenger::*;

mod channel;
pub use channel::*;

mod router;
pub use router::*;

mod passthrough;
pub use passthrough::*;

mod bridge;
pub use bridge::*;

mod ring_buffer;
pub use ring_buffer::*;

mod log_stream;
pub use log_stream::*;

mod config;
pub use config::*;

mod heartbeat;
pub use heartbeat::*;

mod channels;
pub use channels::*;
