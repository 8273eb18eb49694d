//! Client-Side Multiplexer
//!
//! One reconnecting connection to a broker, with inbound messages routed
//! to subscribers by message kind.
//!
//! ## Example
//!
//! ```rust,no_run
//! use farmcast::client::Multiplexer;
//! use farmcast::config::ClientConfig;
//! use farmcast::protocol::MessageKind;
//!
//! # async fn run() {
//! let mux = Multiplexer::connect(ClientConfig::default());
//! let sub = mux.subscribe(MessageKind::Weather, |payload| {
//!     println!("weather update: {:?}", payload);
//! });
//! // ...
//! sub.unsubscribe();
//! mux.disconnect();
//! # }
//! ```

mod multiplexer;

pub use multiplexer::{ClientError, LinkState, Multiplexer, Subscription};
