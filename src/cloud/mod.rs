//! Vendor cloud integration module
//!
//! - `transport`: HTTP seam (reqwest in production)
//! - `client`: URL building, JSONP unwrapping, response classification
//! - `session`: Login state and reconnect policy

pub mod client;
pub mod session;
pub mod transport;

pub use client::{CloudClient, Surface};
pub use session::SessionController;
pub use transport::{HttpTransport, ReqwestTransport};
