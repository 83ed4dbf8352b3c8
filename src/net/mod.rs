//! Network layer subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming TCP connection
//!     → plain: axum::serve
//!     → TLS: tls.rs loads the rustls config, axum-server terminates TLS
//!     → Hand off to HTTP layer
//! ```
//!
//! # Design Decisions
//! - TLS is optional and handled transparently
//! - Certificates are read once at startup

pub mod tls;
