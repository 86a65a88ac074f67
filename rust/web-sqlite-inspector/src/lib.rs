#![warn(missing_docs)]

//! The execution contexts of the web-sqlite DevTools extension, wired on
//! top of [web_sqlite_messaging].
//!
//! - [Background] coordinates: it owns the router and relays panel
//!   requests to the inspected tab.
//! - [ContentScript] answers those requests against the page's
//!   [WebSqliteApi] and streams database logs back in batches.
//! - [relay_changes] and [forward_changes] carry database list changes
//!   from the page's MAIN world across the bridge and on to the panel.
//! - [PanelClient] is the panel's typed client.
//!
//! With the `helpers` feature, [MemoryWebSqlite] and [TabHost] stand in for
//! the inspected page and the browser's tab messaging.

mod error;
pub use error::*;

mod api;
pub use api::*;

mod content;
pub use content::*;

mod relay;
pub use relay::*;

mod background;
pub use background::*;

mod panel;
pub use panel::*;

#[cfg(any(test, feature = "helpers"))]
pub mod helpers;
#[cfg(any(test, feature = "helpers"))]
pub use helpers::{MemoryWebSqlite, TabHost};
