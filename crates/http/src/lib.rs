//! FlowTest HTTP client
//!
//! An authenticated client for the FlowTest backend. Requests carry the
//! stored bearer token, expired tokens are refreshed transparently and the
//! session is ended (tokens cleared, navigator sent to the login page) when
//! the refresh token is no longer accepted.

pub mod client;
pub mod types;

pub use client::error::{ClientError, RefreshError};
pub use client::navigation::{Navigator, PageNavigator};
pub use client::request::PendingRequest;
pub use client::session::{Session, SessionState};
pub use client::{FlowTestClient, FlowTestClientBuilder};
