#![allow(clippy::doc_markdown)]

//! handlename-core - hang-safe handle name resolution
//!
//! Resolves the name of a kernel handle owned by another process without
//! ever blocking the calling thread indefinitely. The name query for some
//! object classes (notably synchronous file objects such as serial ports)
//! can wait forever inside the kernel, so it runs on a watchdog worker and
//! the caller gives up after a deadline.
//!
//! # Modules
//!
//! - [`protocol`]: fixed-size request/response records and status codes
//! - [`kernel`]: the [`KernelObjects`] seam over the privileged primitives
//! - [`watchdog`]: the worker thread and its abandon-and-respawn lifecycle
//! - [`resolver`]: [`ResolverContext`], the resolution algorithm
//! - [`client`]: blocking client for the host application
//! - [`config`]: [`HelperConfig`] and its TOML loader
//!
//! # Example
//!
//! ```rust,ignore
//! use handlename_core::{HandleStatus, ResolverContext};
//!
//! let mut resolver = ResolverContext::new(kernel);
//! let info = resolver.resolve(pid, handle);
//! if info.status() == HandleStatus::Success {
//!     println!("{}", info.name().unwrap_or_default());
//! }
//! ```

pub mod client;
pub mod config;
pub mod kernel;
pub mod protocol;
pub mod resolver;
pub mod watchdog;

pub use client::HandleClient;
pub use config::{ConfigError, HelperConfig};
pub use kernel::{AsObjectRef, KernelError, KernelObjects, ObjectRef};
pub use protocol::{HandleInfo, HandleQuery, HandleStatus, ProtocolError, ProtocolResult};
pub use resolver::{DEFAULT_QUERY_DEADLINE, ResolverContext};
pub use watchdog::{AbandonedWorker, Detach, TerminationStrategy, Watchdog, WatchdogOutcome};
