//! In-memory kernel backend for tests.
//!
//! Processes and their handle tables are registered up front; every opened
//! process and duplicated object is counted so tests can assert that a
//! resolution released everything it acquired.

use std::collections::HashMap;
use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;
use std::time::Duration;

use super::{AsObjectRef, KernelError, KernelObjects, ObjectRef, QueryClass};
use crate::protocol::{NAME_BUFFER_LEN, encode_name_record};

/// NTSTATUS returned by failing fake queries.
pub const FAKE_QUERY_FAILURE: u32 = 0xC000_0022;

/// How a fake object answers the name query.
#[derive(Debug, Clone)]
pub enum NameBehavior {
    /// Answer with a well-formed name record for this name.
    Named(String),
    /// Answer with these raw bytes.
    Raw(Vec<u8>),
    /// Fail the query.
    Fails,
    /// Sleep, then answer with a name record. Models a query that hangs
    /// past the deadline.
    Delayed {
        /// Name to answer with.
        name: String,
        /// Time spent inside the query.
        delay: Duration,
    },
}

/// A fake kernel object in some process's handle table.
#[derive(Debug, Clone)]
pub struct FakeObject {
    type_name: String,
    name: NameBehavior,
    duplicable: bool,
    type_queryable: bool,
}

impl FakeObject {
    /// A `File` object with the given name.
    #[must_use]
    pub fn file(name: &str) -> Self {
        Self::of_type("File", NameBehavior::Named(name.to_string()))
    }

    /// A `File` object whose name query takes `delay`.
    #[must_use]
    pub fn slow_file(name: &str, delay: Duration) -> Self {
        Self::of_type(
            "File",
            NameBehavior::Delayed {
                name: name.to_string(),
                delay,
            },
        )
    }

    /// An object of an arbitrary type.
    #[must_use]
    pub fn of_type(type_name: &str, name: NameBehavior) -> Self {
        Self {
            type_name: type_name.to_string(),
            name,
            duplicable: true,
            type_queryable: true,
        }
    }

    /// Make duplication of this object fail.
    #[must_use]
    pub const fn not_duplicable(mut self) -> Self {
        self.duplicable = false;
        self
    }

    /// Make the type query on this object fail.
    #[must_use]
    pub const fn type_unqueryable(mut self) -> Self {
        self.type_queryable = false;
        self
    }
}

#[derive(Debug, Default)]
struct FakeProcessEntry {
    accessible: bool,
    handles: HashMap<u32, FakeObject>,
}

#[derive(Debug, Default)]
struct Counters {
    open_processes: AtomicUsize,
    open_objects: AtomicUsize,
    name_queries: AtomicUsize,
}

/// In-memory [`KernelObjects`] implementation.
#[derive(Debug)]
pub struct FakeKernel {
    own_pid: u32,
    processes: HashMap<u32, FakeProcessEntry>,
    duplicated: Arc<Mutex<HashMap<usize, FakeObject>>>,
    next_ref: AtomicUsize,
    counters: Arc<Counters>,
}

impl FakeKernel {
    /// A kernel whose current process is `own_pid`.
    #[must_use]
    pub fn new(own_pid: u32) -> Self {
        Self {
            own_pid,
            processes: HashMap::new(),
            duplicated: Arc::new(Mutex::new(HashMap::new())),
            next_ref: AtomicUsize::new(0x1000),
            counters: Arc::new(Counters::default()),
        }
    }

    /// Register a process and its handle table.
    #[must_use]
    pub fn with_process(
        mut self,
        process_id: u32,
        handles: impl IntoIterator<Item = (u32, FakeObject)>,
    ) -> Self {
        self.processes.insert(
            process_id,
            FakeProcessEntry {
                accessible: true,
                handles: handles.into_iter().collect(),
            },
        );
        self
    }

    /// Register a live process that refuses to be opened.
    #[must_use]
    pub fn with_protected_process(mut self, process_id: u32) -> Self {
        self.processes.insert(
            process_id,
            FakeProcessEntry {
                accessible: false,
                handles: HashMap::new(),
            },
        );
        self
    }

    /// Process handles currently open.
    #[must_use]
    pub fn open_processes(&self) -> usize {
        self.counters.open_processes.load(Ordering::SeqCst)
    }

    /// Duplicated objects currently open.
    #[must_use]
    pub fn open_objects(&self) -> usize {
        self.counters.open_objects.load(Ordering::SeqCst)
    }

    /// Name queries issued so far.
    #[must_use]
    pub fn name_queries(&self) -> usize {
        self.counters.name_queries.load(Ordering::SeqCst)
    }
}

/// Opened fake process.
#[derive(Debug)]
pub struct FakeProcess {
    process_id: u32,
    counters: Arc<Counters>,
}

impl Drop for FakeProcess {
    fn drop(&mut self) {
        self.counters.open_processes.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Duplicated fake object.
#[derive(Debug)]
pub struct FakeHandle {
    object: ObjectRef,
    table: Arc<Mutex<HashMap<usize, FakeObject>>>,
    counters: Arc<Counters>,
}

impl AsObjectRef for FakeHandle {
    fn object_ref(&self) -> ObjectRef {
        self.object
    }
}

impl Drop for FakeHandle {
    fn drop(&mut self) {
        self.table
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.object.as_raw());
        self.counters.open_objects.fetch_sub(1, Ordering::SeqCst);
    }
}

impl FakeKernel {
    fn lookup(&self, object: ObjectRef, class: QueryClass) -> Result<FakeObject, KernelError> {
        self.duplicated
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&object.as_raw())
            .cloned()
            .ok_or_else(|| KernelError::query(class, FAKE_QUERY_FAILURE))
    }
}

impl KernelObjects for FakeKernel {
    type Process = FakeProcess;
    type Object = FakeHandle;

    fn current_process_id(&self) -> u32 {
        self.own_pid
    }

    fn open_process(&self, process_id: u32) -> Result<FakeProcess, KernelError> {
        let source = match self.processes.get(&process_id) {
            Some(entry) if entry.accessible => None,
            Some(_) => Some(io::Error::from(io::ErrorKind::PermissionDenied)),
            None => Some(io::Error::from(io::ErrorKind::NotFound)),
        };
        if let Some(source) = source {
            return Err(KernelError::OpenProcess { process_id, source });
        }
        self.counters.open_processes.fetch_add(1, Ordering::SeqCst);
        Ok(FakeProcess {
            process_id,
            counters: Arc::clone(&self.counters),
        })
    }

    fn duplicate_handle(
        &self,
        process: &FakeProcess,
        handle_value: u32,
    ) -> Result<FakeHandle, KernelError> {
        let object = self
            .processes
            .get(&process.process_id)
            .and_then(|entry| entry.handles.get(&handle_value))
            .filter(|object| object.duplicable)
            .cloned()
            .ok_or_else(|| KernelError::Duplicate {
                handle_value,
                source: io::Error::from(io::ErrorKind::InvalidInput),
            })?;

        let raw = self.next_ref.fetch_add(4, Ordering::SeqCst);
        self.duplicated
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(raw, object);
        self.counters.open_objects.fetch_add(1, Ordering::SeqCst);
        Ok(FakeHandle {
            object: ObjectRef::from_raw(raw),
            table: Arc::clone(&self.duplicated),
            counters: Arc::clone(&self.counters),
        })
    }

    fn query_type_name(&self, object: ObjectRef) -> Result<String, KernelError> {
        let object = self.lookup(object, QueryClass::Type)?;
        if !object.type_queryable {
            return Err(KernelError::query(QueryClass::Type, FAKE_QUERY_FAILURE));
        }
        Ok(object.type_name)
    }

    fn query_name(
        &self,
        object: ObjectRef,
        buffer: &mut [u8; NAME_BUFFER_LEN],
    ) -> Result<usize, KernelError> {
        self.counters.name_queries.fetch_add(1, Ordering::SeqCst);
        let object = self.lookup(object, QueryClass::Name)?;
        let record = match object.name {
            NameBehavior::Named(name) => encode_name_record(&name),
            NameBehavior::Raw(bytes) => bytes,
            NameBehavior::Fails => {
                return Err(KernelError::query(QueryClass::Name, FAKE_QUERY_FAILURE));
            },
            NameBehavior::Delayed { name, delay } => {
                thread::sleep(delay);
                encode_name_record(&name)
            },
        };
        if record.len() > buffer.len() {
            return Err(KernelError::query(QueryClass::Name, FAKE_QUERY_FAILURE));
        }
        buffer[..record.len()].copy_from_slice(&record);
        Ok(record.len())
    }
}
