//! Process management subsystem.
//!
//! This module owns the two leaf components of the session pool:
//! - [`PortAllocator`]: unique, monotonically increasing dashboard ports.
//! - [`Launcher`] / [`DashboardLauncher`]: spawn a dashboard bound to a port,
//!   with its working area as cwd, and poll it until it accepts connections.
//!
//! Example (non-running):
//! ```ignore
//! use dashpool::process_management::{DashboardLauncher, Launcher};
//!
//! let launcher = DashboardLauncher::new("marimo", vec!["run".into(), "--port".into(), "{port}".into()], "127.0.0.1");
//! let process = launcher.launch(8200, std::path::Path::new("/tmp/session")).await?;
//! process.shutdown(std::time::Duration::from_secs(5)).await?;
//! ```

pub mod launcher;
pub mod port_allocator;
pub mod types;

pub use launcher::{DashboardLauncher, Launcher};
pub use port_allocator::PortAllocator;
pub use types::{DashboardProcess, LaunchFailure};
