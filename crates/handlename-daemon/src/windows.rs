//! Windows kernel backend.
//!
//! Implements [`KernelObjects`] with `OpenProcess`, `DuplicateHandle` and
//! `NtQueryObject`, and provides [`ForceTerminate`], the strategy that kills
//! a worker stuck in `NtQueryObject`.
//!
//! Handles are wrapped in [`OwnedHandle`] as soon as they are obtained, so
//! `CloseHandle` runs on every exit path.

use std::ffi::c_void;
use std::io;
use std::os::windows::io::{AsRawHandle, FromRawHandle, OwnedHandle};
use std::ptr;

use handlename_core::kernel::{
    AsObjectRef, KernelError, KernelObjects, ObjectRef, QueryClass, TYPE_BUFFER_LEN,
};
use handlename_core::protocol::NAME_BUFFER_LEN;
use handlename_core::watchdog::{AbandonedWorker, TerminationStrategy};
use tracing::warn;
use windows_sys::Wdk::Foundation::{NtQueryObject, OBJECT_INFORMATION_CLASS};
use windows_sys::Win32::Foundation::{
    DUPLICATE_SAME_ACCESS, DuplicateHandle, HANDLE, UNICODE_STRING,
};
use windows_sys::Win32::System::Threading::{
    GetCurrentProcess, GetCurrentProcessId, OpenProcess, PROCESS_DUP_HANDLE, TerminateThread,
};

const OBJECT_NAME_INFORMATION: OBJECT_INFORMATION_CLASS = 1;
const OBJECT_TYPE_INFORMATION: OBJECT_INFORMATION_CLASS = 2;

/// Process ids ignore their low two bits.
const PROCESS_ID_ALIAS_MASK: u32 = !3;

/// Exit code given to a killed worker thread.
const TERMINATED_EXIT_CODE: u32 = 1;

#[repr(C, align(8))]
struct AlignedBuffer<const N: usize>([u8; N]);

impl<const N: usize> AlignedBuffer<N> {
    const fn zeroed() -> Self {
        Self([0u8; N])
    }
}

/// [`KernelObjects`] over the Win32 and native APIs.
#[derive(Debug, Clone, Copy)]
pub struct WindowsKernel {
    process_id: u32,
}

impl WindowsKernel {
    /// Capture the current process identity.
    #[must_use]
    pub fn new() -> Self {
        // SAFETY: no preconditions.
        let process_id = unsafe { GetCurrentProcessId() };
        Self { process_id }
    }
}

impl Default for WindowsKernel {
    fn default() -> Self {
        Self::new()
    }
}

/// Target process opened with `PROCESS_DUP_HANDLE`.
#[derive(Debug)]
pub struct WindowsProcess(OwnedHandle);

/// Handle duplicated into this process.
#[derive(Debug)]
pub struct WindowsObject(OwnedHandle);

impl AsObjectRef for WindowsObject {
    fn object_ref(&self) -> ObjectRef {
        ObjectRef::from_raw(self.0.as_raw_handle() as usize)
    }
}

fn as_handle(object: ObjectRef) -> HANDLE {
    object.as_raw() as HANDLE
}

fn query_object<const N: usize>(
    object: ObjectRef,
    class: QueryClass,
    buffer: &mut AlignedBuffer<N>,
) -> Result<usize, KernelError> {
    let information_class = match class {
        QueryClass::Type => OBJECT_TYPE_INFORMATION,
        QueryClass::Name => OBJECT_NAME_INFORMATION,
    };
    let capacity = u32::try_from(N).unwrap_or(u32::MAX);
    let mut returned: u32 = 0;
    // SAFETY: the buffer is valid for `capacity` bytes, suitably aligned,
    // and outlives the call; `returned` is a valid out pointer.
    let status = unsafe {
        NtQueryObject(
            as_handle(object),
            information_class,
            buffer.0.as_mut_ptr().cast::<c_void>(),
            capacity,
            &mut returned,
        )
    };
    if status != 0 {
        #[allow(clippy::cast_sign_loss)] // NTSTATUS is reported as its bit pattern
        return Err(KernelError::query(class, status as u32));
    }
    Ok(returned as usize)
}

/// Extract the counted string at the start of a type-information buffer.
fn type_name_from(buffer: &AlignedBuffer<TYPE_BUFFER_LEN>) -> Result<String, KernelError> {
    // SAFETY: the buffer is 8-aligned and larger than UNICODE_STRING, which
    // is plain data.
    let header: UNICODE_STRING = unsafe { ptr::read(buffer.0.as_ptr().cast()) };

    let base = buffer.0.as_ptr() as usize;
    let start = (header.Buffer as usize)
        .checked_sub(base)
        .ok_or_else(|| KernelError::malformed(QueryClass::Type, "name outside buffer"))?;
    let end = start
        .checked_add(usize::from(header.Length))
        .ok_or_else(|| KernelError::malformed(QueryClass::Type, "name outside buffer"))?;
    let bytes = buffer
        .0
        .get(start..end)
        .ok_or_else(|| KernelError::malformed(QueryClass::Type, "name outside buffer"))?;

    let units: Vec<u16> = bytes
        .chunks_exact(2)
        .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
        .collect();
    String::from_utf16(&units)
        .map_err(|err| KernelError::malformed(QueryClass::Type, err.to_string()))
}

impl KernelObjects for WindowsKernel {
    type Process = WindowsProcess;
    type Object = WindowsObject;

    fn current_process_id(&self) -> u32 {
        self.process_id
    }

    fn is_current_process(&self, process_id: u32) -> bool {
        process_id & PROCESS_ID_ALIAS_MASK == self.process_id & PROCESS_ID_ALIAS_MASK
    }

    fn open_process(&self, process_id: u32) -> Result<WindowsProcess, KernelError> {
        // SAFETY: no pointer arguments.
        let handle = unsafe { OpenProcess(PROCESS_DUP_HANDLE, 0, process_id) };
        if handle.is_null() {
            return Err(KernelError::OpenProcess {
                process_id,
                source: io::Error::last_os_error(),
            });
        }
        // SAFETY: `handle` is a fresh, owned process handle.
        Ok(WindowsProcess(unsafe { OwnedHandle::from_raw_handle(handle) }))
    }

    fn duplicate_handle(
        &self,
        process: &WindowsProcess,
        handle_value: u32,
    ) -> Result<WindowsObject, KernelError> {
        let mut duplicated: HANDLE = ptr::null_mut();
        // SAFETY: the source process handle is open for the duration of the
        // call and `duplicated` is a valid out pointer. The source handle
        // value is only interpreted inside the target process.
        let ok = unsafe {
            DuplicateHandle(
                process.0.as_raw_handle(),
                handle_value as usize as HANDLE,
                GetCurrentProcess(),
                &mut duplicated,
                0,
                0,
                DUPLICATE_SAME_ACCESS,
            )
        };
        if ok == 0 {
            return Err(KernelError::Duplicate {
                handle_value,
                source: io::Error::last_os_error(),
            });
        }
        // SAFETY: `duplicated` is a fresh handle owned by this process.
        Ok(WindowsObject(unsafe { OwnedHandle::from_raw_handle(duplicated) }))
    }

    fn query_type_name(&self, object: ObjectRef) -> Result<String, KernelError> {
        let mut buffer = AlignedBuffer::<TYPE_BUFFER_LEN>::zeroed();
        query_object(object, QueryClass::Type, &mut buffer)?;
        type_name_from(&buffer)
    }

    fn query_name(
        &self,
        object: ObjectRef,
        buffer: &mut [u8; NAME_BUFFER_LEN],
    ) -> Result<usize, KernelError> {
        let mut aligned = AlignedBuffer::<NAME_BUFFER_LEN>::zeroed();
        let len = query_object(object, QueryClass::Name, &mut aligned)?;
        buffer.copy_from_slice(&aligned.0);
        Ok(len)
    }
}

/// Kill a worker that missed its deadline with `TerminateThread`.
///
/// The thread gets no chance to clean up, and whatever it held inside the
/// kernel call is lost. Its channel endpoints are leaked rather than
/// dropped. If the kill fails the worker is detached instead.
#[derive(Debug, Clone, Copy, Default)]
pub struct ForceTerminate;

impl TerminationStrategy for ForceTerminate {
    fn name(&self) -> &'static str {
        "terminate"
    }

    fn abandon(&self, worker: AbandonedWorker) {
        let thread = worker.thread().as_raw_handle();
        // SAFETY: the join handle keeps the thread handle open. Killing the
        // thread is the point; the leaked state is accounted for by
        // `AbandonedWorker::forget`.
        let ok = unsafe { TerminateThread(thread, TERMINATED_EXIT_CODE) };
        if ok == 0 {
            warn!(
                error = %io::Error::last_os_error(),
                "TerminateThread failed; detaching worker instead"
            );
            worker.detach();
            return;
        }
        worker.forget();
    }
}
