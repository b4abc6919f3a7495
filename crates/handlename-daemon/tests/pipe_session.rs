//! End-to-end pipe sessions against the in-memory kernel.
//!
//! A host-side [`HandleClient`] talks to the transport loop over an
//! in-process message pipe, exercising the full request path: record
//! decode, resolution (including watchdog timeouts) and record encode.

use std::collections::VecDeque;
use std::io::{self, Read, Write};
use std::sync::mpsc::{self, Receiver, Sender};
use std::thread;
use std::time::Duration;

use handlename_core::kernel::fake::{FakeKernel, FakeObject, NameBehavior};
use handlename_core::protocol::encode_name_record;
use handlename_core::{HandleClient, HandleStatus, ProtocolError, ResolverContext};
use handlename_daemon::{Transport, serve};

const HELPER_PID: u32 = 1000;
const TARGET_PID: u32 = 2000;
const DEADLINE: Duration = Duration::from_millis(100);

/// One end of a message-preserving in-process pipe.
struct PipeEnd {
    tx: Sender<Vec<u8>>,
    rx: Receiver<Vec<u8>>,
    pending: VecDeque<u8>,
}

fn pipe_pair() -> (PipeEnd, PipeEnd) {
    let (a_tx, a_rx) = mpsc::channel();
    let (b_tx, b_rx) = mpsc::channel();
    (
        PipeEnd {
            tx: a_tx,
            rx: b_rx,
            pending: VecDeque::new(),
        },
        PipeEnd {
            tx: b_tx,
            rx: a_rx,
            pending: VecDeque::new(),
        },
    )
}

impl Read for PipeEnd {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.pending.is_empty() {
            match self.rx.recv() {
                Ok(message) => self.pending.extend(message),
                Err(_) => return Ok(0),
            }
        }
        let len = buf.len().min(self.pending.len());
        for (slot, byte) in buf.iter_mut().zip(self.pending.drain(..len)) {
            *slot = byte;
        }
        Ok(len)
    }
}

impl Write for PipeEnd {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.tx
            .send(buf.to_vec())
            .map_err(|_| io::Error::from(io::ErrorKind::BrokenPipe))?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

fn kernel() -> FakeKernel {
    FakeKernel::new(HELPER_PID)
        .with_process(
            TARGET_PID,
            [
                (0x04, FakeObject::file("\\Device\\Serial0")),
                (0x08, FakeObject::file("\\Device\\Serial1")),
                (0x0c, FakeObject::of_type("Mutant", NameBehavior::Named("m".into()))),
                (0x10, FakeObject::slow_file("\\Device\\Serial2", Duration::from_secs(3))),
            ],
        )
        .with_protected_process(4)
}

/// Run the helper side on its own thread; returns the session result and
/// the number of workers it spawned.
fn spawn_helper(end: PipeEnd) -> thread::JoinHandle<(ProtocolError, u64)> {
    thread::spawn(move || {
        let mut resolver = ResolverContext::new(kernel()).with_deadline(DEADLINE);
        let mut transport = Transport::new(end);
        let err = serve(&mut transport, &mut resolver);
        (err, resolver.watchdog().generation())
    })
}

#[test]
fn session_answers_every_status_in_order() {
    let (host, helper) = pipe_pair();
    let server = spawn_helper(helper);
    let mut client = HandleClient::new(host);

    let info = client.query(TARGET_PID, 0x04).unwrap();
    assert_eq!(info.status(), HandleStatus::Success);
    assert_eq!(info.name().as_deref(), Some("\\Device\\Serial0"));
    assert_eq!(
        info.name_len() as usize,
        encode_name_record("\\Device\\Serial0").len()
    );

    let info = client.query(HELPER_PID, 0x04).unwrap();
    assert_eq!(info.status(), HandleStatus::SameProcess);
    assert_eq!(info.name_len(), 0);

    assert_eq!(
        client.query(4, 0x04).unwrap().status(),
        HandleStatus::OpenProcess
    );
    assert_eq!(
        client.query(TARGET_PID, 0x400).unwrap().status(),
        HandleStatus::Duplicate
    );
    assert_eq!(
        client.query(TARGET_PID, 0x0c).unwrap().status(),
        HandleStatus::InvalidType
    );

    drop(client);
    let (err, generation) = server.join().unwrap();
    assert!(err.is_disconnect(), "unexpected session end: {err}");
    assert_eq!(generation, 1);
}

#[test]
fn session_survives_hung_query() {
    let (host, helper) = pipe_pair();
    let server = spawn_helper(helper);
    let mut client = HandleClient::new(host);

    let first = client.query(TARGET_PID, 0x08).unwrap();
    assert_eq!(first.status(), HandleStatus::Success);

    let hung = client.query(TARGET_PID, 0x10).unwrap();
    assert_eq!(hung.status(), HandleStatus::QueryName);
    assert_eq!(hung.name_len(), 0);

    let after = client.query(TARGET_PID, 0x08).unwrap();
    assert_eq!(after, first);

    drop(client);
    let (err, generation) = server.join().unwrap();
    assert!(err.is_disconnect());
    assert_eq!(generation, 2);
}

#[test]
fn short_request_ends_session() {
    let (mut host, helper) = pipe_pair();
    let server = spawn_helper(helper);

    host.write_all(&[1, 2, 3, 4]).unwrap();

    let (err, generation) = server.join().unwrap();
    assert!(matches!(
        err,
        ProtocolError::ShortRead {
            got: 4,
            expected: 8
        }
    ));
    assert!(!err.is_disconnect());
    assert_eq!(generation, 0);
}
