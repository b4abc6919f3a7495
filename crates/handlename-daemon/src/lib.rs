#![allow(clippy::doc_markdown)]

//! handlename-daemon - handle name helper process
//!
//! Connects to the host application's pipe and answers handle-name
//! requests one at a time using [`handlename_core::ResolverContext`].
//!
//! # Modules
//!
//! - [`transport`]: pipe connection and the request/response loop
//! - [`windows`]: the Windows kernel backend and forced worker termination
//!   (Windows only)

pub mod transport;
#[cfg(windows)]
pub mod windows;

pub use transport::{Transport, connect_pipe, serve};
#[cfg(windows)]
pub use windows::{ForceTerminate, WindowsKernel};
