//! Kernel seam: the privileged primitives the resolver is built on.
//!
//! The resolver never touches the operating system directly. It drives an
//! implementation of [`KernelObjects`], which the daemon provides for
//! Windows and tests provide in memory ([`fake`], behind the
//! `test-support` feature).
//!
//! Process and object handles are associated types that release
//! themselves on drop, so every exit path of a resolution closes what it
//! opened.

#[cfg(any(test, feature = "test-support"))]
pub mod fake;

use std::fmt;
use std::io;

use thiserror::Error;

use crate::protocol::NAME_BUFFER_LEN;

/// Kernel-reported short type name of the only object class served.
pub const FILE_TYPE_NAME: &str = "File";

/// Size of the bounded buffer used for the object-type query.
pub const TYPE_BUFFER_LEN: usize = 1024;

/// Raw reference to a duplicated object, as handed to the watchdog thread.
///
/// It does not own the object; the owning [`KernelObjects::Object`] must
/// outlive every query issued through it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObjectRef(usize);

impl ObjectRef {
    /// Wrap a raw handle value.
    #[must_use]
    pub const fn from_raw(raw: usize) -> Self {
        Self(raw)
    }

    /// The raw handle value.
    #[must_use]
    pub const fn as_raw(self) -> usize {
        self.0
    }
}

impl fmt::Display for ObjectRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

/// Access to an owned object handle's raw reference.
pub trait AsObjectRef {
    /// Borrow the raw reference without giving up ownership.
    fn object_ref(&self) -> ObjectRef;
}

/// Which object query failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryClass {
    /// Object-type information.
    Type,
    /// Object-name information.
    Name,
}

impl fmt::Display for QueryClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Type => f.write_str("type"),
            Self::Name => f.write_str("name"),
        }
    }
}

/// Failures of the kernel primitives.
#[derive(Debug, Error)]
pub enum KernelError {
    /// The target process could not be opened.
    #[error("failed to open process {process_id}: {source}")]
    OpenProcess {
        /// Target process.
        process_id: u32,
        /// OS error.
        #[source]
        source: io::Error,
    },

    /// The handle could not be duplicated into this process.
    #[error("failed to duplicate handle {handle_value:#x}: {source}")]
    Duplicate {
        /// Handle value in the target process.
        handle_value: u32,
        /// OS error.
        #[source]
        source: io::Error,
    },

    /// An object query returned a failure status.
    #[error("{class} query failed with status {status:#010x}")]
    Query {
        /// Query that failed.
        class: QueryClass,
        /// Raw NTSTATUS (or fake equivalent).
        status: u32,
    },

    /// An object query succeeded but its result could not be interpreted.
    #[error("malformed {class} information: {reason}")]
    Malformed {
        /// Query that produced the result.
        class: QueryClass,
        /// What was wrong with it.
        reason: String,
    },
}

impl KernelError {
    /// Create a query failure.
    #[must_use]
    pub const fn query(class: QueryClass, status: u32) -> Self {
        Self::Query { class, status }
    }

    /// Create a malformed-result error.
    #[must_use]
    pub fn malformed(class: QueryClass, reason: impl Into<String>) -> Self {
        Self::Malformed {
            class,
            reason: reason.into(),
        }
    }
}

/// The privileged primitives behind handle-name resolution.
///
/// `query_name` is the call that may never return for some objects. The
/// resolver only issues it from the watchdog thread, which is why
/// implementations must be shareable across threads.
pub trait KernelObjects: Send + Sync + 'static {
    /// An opened target process, closed on drop.
    type Process;

    /// An object duplicated into this process, closed on drop.
    type Object: AsObjectRef;

    /// Id of the process hosting the resolver.
    fn current_process_id(&self) -> u32;

    /// Whether `process_id` names the process hosting the resolver.
    ///
    /// Literal comparison by default; backends whose ids alias override it.
    fn is_current_process(&self, process_id: u32) -> bool {
        process_id == self.current_process_id()
    }

    /// Open `process_id` with only the right needed to duplicate handles.
    fn open_process(&self, process_id: u32) -> Result<Self::Process, KernelError>;

    /// Duplicate `handle_value` from `process` with identical access rights.
    fn duplicate_handle(
        &self,
        process: &Self::Process,
        handle_value: u32,
    ) -> Result<Self::Object, KernelError>;

    /// Short type name of the object (e.g. `File`, `Event`).
    fn query_type_name(&self, object: ObjectRef) -> Result<String, KernelError>;

    /// Write the object's name record into `buffer` and return its length.
    ///
    /// May block indefinitely.
    fn query_name(
        &self,
        object: ObjectRef,
        buffer: &mut [u8; NAME_BUFFER_LEN],
    ) -> Result<usize, KernelError>;
}
