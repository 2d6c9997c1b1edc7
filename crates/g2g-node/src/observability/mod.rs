//! # Observability Module
//!
//! Structured logging for both binaries. Logs always go to stderr: stdout
//! belongs to git in the remote helper and to the `Serving on` lines in the
//! server.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use g2g_node::observability::{init_logging, LogFormat};
//!
//! init_logging("info", LogFormat::Pretty);
//! ```

mod logging;

pub use logging::{init_logging, LogFormat};
