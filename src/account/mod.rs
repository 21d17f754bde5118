//! Account integration module
//!
//! - `devices`: Cached device list (DeviceRegistry)
//! - `samples`: Sample history and time-weighted averaging (SensorSampleStore)
//! - `controller`: Per-account orchestration with timeouts (AccountController)
//! - `manager`: Registry of configured accounts
//! - `sync`: Background poll loops

pub mod controller;
pub mod devices;
pub mod manager;
pub mod samples;
pub mod sync;

pub use controller::AccountController;
pub use manager::AccountManager;
pub use sync::AccountSyncer;
