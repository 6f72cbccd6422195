//! Asterisk Manager Interface (AMI) client for Rust
//!
//! This crate provides an async, multiplexing AMI client: one TCP stream,
//! one background reader, any number of concurrent actions and event
//! subscribers. Replies are correlated to actions by `ActionID`; everything
//! else the server sends flows to subscribers as a live event stream.
//!
//! # Architecture
//!
//! The library uses a split reader/writer design:
//! - [`AmiClient`] (Clone + Send) — send actions from any task
//! - [`AmiEventStream`] — receive events from the background reader task
//!
//! # Examples
//!
//! ## Request/reply
//!
//! ```rust,no_run
//! use asterisk_ami_tokio::{AmiClient, AmiMessage, AmiResult};
//!
//! #[tokio::main]
//! async fn main() -> AmiResult<()> {
//!     let client = AmiClient::connect("localhost", 5038).await?;
//!     client.login("admin", "secret", false).await?;
//!
//!     let reply = client.send_action(AmiMessage::new("Ping")).await?;
//!     println!("Response: {}", reply.response().unwrap_or("?"));
//!
//!     client.logoff().await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Event subscription
//!
//! Any number of subscribers observe the same event flow; a subscriber that
//! falls behind skips its oldest events rather than stalling the reader
//! (configurable via [`DeliveryPolicy`]).
//!
//! ```rust,no_run
//! use asterisk_ami_tokio::AmiClient;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let client = AmiClient::connect("localhost", 5038).await?;
//!     client.login("admin", "secret", true).await?;
//!
//!     let mut events = client.subscribe();
//!     while let Some(Ok(event)) = events.recv().await {
//!         println!("{}: {:?}", event.event().unwrap_or("?"), event.fields());
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Actions with follow-up events
//!
//! List-style actions (`PJSIPShowEndpoints`, `Status`, ...) reply once and
//! then emit events tagged with the same ActionID. The reply completes
//! [`AmiClient::send_action`]; the follow-ups arrive on the event stream,
//! where callers filter by [`AmiMessage::action_id`] and stop at the
//! `*ListComplete` sentinel.
//!
//! ```rust,no_run
//! use asterisk_ami_tokio::{AmiClient, AmiMessage};
//!
//! # async fn example(client: &AmiClient) -> Result<(), Box<dyn std::error::Error>> {
//! let mut events = client.subscribe();
//! let action = AmiMessage::new("PJSIPShowEndpoints");
//! let id = action.action_id().unwrap().to_string();
//!
//! let reply = client.send_action(action).await?;
//! assert!(reply.is_success());
//!
//! while let Some(Ok(event)) = events.recv().await {
//!     if event.action_id() != Some(id.as_str()) {
//!         continue;
//!     }
//!     if event.event() == Some("EndpointListComplete") {
//!         break;
//!     }
//!     println!("endpoint: {:?}", event.get("ObjectName"));
//! }
//! # Ok(())
//! # }
//! ```

#[macro_use]
pub(crate) mod macros;

pub mod connection;
pub mod error;
pub mod fields;
pub mod hub;
pub mod message;

pub(crate) mod buffer;
pub mod constants;
pub(crate) mod pending;
pub(crate) mod protocol;

pub use connection::{
    ActionIdGenerator, AmiClient, AmiConnectOptions, AmiEventStream, AmiStream, ConnectionStatus,
    WireDirection, WireEvent,
};
pub use constants::DEFAULT_AMI_PORT;
pub use error::{AmiError, AmiResult, DisconnectReason};
pub use fields::{AmiField, ParseAmiFieldError};
pub use hub::DeliveryPolicy;
pub use message::AmiMessage;
