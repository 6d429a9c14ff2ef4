//! `courier-mail`: outbound invoice email.
//!
//! [`MailTransport`] is the capability the pipeline depends on; the
//! production implementation is [`GraphTransport`] (Microsoft Graph
//! `sendMail` with client-credentials auth). [`DeliveryClient`] wraps a
//! transport with token caching, a per-message timeout and passive health
//! tracking, and sorts failures into run-fatal and per-message ones.

pub mod client;
pub mod error;
pub mod graph;
pub mod health;
pub mod transport;

#[cfg(any(test, feature = "test-support"))]
pub mod mock;

pub use client::DeliveryClient;
pub use error::{DeliveryError, TransportError};
pub use graph::GraphTransport;
pub use health::{TransportHealth, TransportHealthEntry, TransportStatus};
pub use transport::{AccessToken, Attachment, MailTransport, OutgoingMail};
