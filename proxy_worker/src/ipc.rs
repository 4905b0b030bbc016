//! Lifecycle commands from the parent supervisor (C7).
//!
//! Unframed byte stream: every byte read is an independent opcode. No
//! acknowledgements are sent back. `read == 0` (EOF) is fatal — the
//! parent closed its end, so the worker has lost its only command path.

use std::os::fd::{FromRawFd, OwnedFd, RawFd};

use tokio::io::{AsyncReadExt, ErrorKind};
use tokio::net::unix::pipe;

use crate::error::IpcError;

const READ_CHUNK: usize = 1024;

/// One opcode recognized on the IPC channel (§4.6). Anything else is
/// silently ignored, for forward-compatibility with a newer parent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleEvent {
    GracefulShutdown,
    ReopenLog,
}

const OP_GRACEFUL_SHUTDOWN: u8 = 0x01;
const OP_REOPEN_LOG: u8 = 0x02;

fn decode(byte: u8) -> Option<LifecycleEvent> {
    match byte {
        OP_GRACEFUL_SHUTDOWN => Some(LifecycleEvent::GracefulShutdown),
        OP_REOPEN_LOG => Some(LifecycleEvent::ReopenLog),
        _ => None,
    }
}

pub struct IpcChannel {
    receiver: pipe::Receiver,
}

impl IpcChannel {
    /// Takes ownership of the inherited IPC descriptor. It is an unframed
    /// byte pipe, not necessarily a Unix domain socket, so it is wrapped
    /// as a `pipe::Receiver` rather than a `UnixStream`. `pipe::Receiver`
    /// registers with the reactor on construction, which is fallible, so
    /// it only exposes `from_owned_fd`/`from_file`, not `FromRawFd`; the
    /// raw fd is first wrapped in an `OwnedFd` to hand over ownership.
    pub fn from_inherited(ipc_fd: RawFd) -> std::io::Result<Self> {
        let owned = unsafe { OwnedFd::from_raw_fd(ipc_fd) };
        let receiver = pipe::Receiver::from_owned_fd(owned)?;
        Ok(Self { receiver })
    }

    /// Reads one chunk (up to 1 KiB) and decodes every byte in it, in
    /// order, into the lifecycle events recognized opcodes map to —
    /// invariant 3 ("the sequence of lifecycle events triggered equals
    /// the sequence of recognized opcodes in that prefix, in order").
    ///
    /// `Ok(events)` may be empty if the chunk held only unrecognized
    /// bytes. `Err(IpcError::Closed)` means the parent end hung up.
    pub async fn read_events(&mut self) -> Result<Vec<LifecycleEvent>, IpcError> {
        let mut buf = [0u8; READ_CHUNK];
        loop {
            match self.receiver.read(&mut buf).await {
                Ok(0) => return Err(IpcError::Closed),
                Ok(n) => return Ok(buf[..n].iter().copied().filter_map(decode).collect()),
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(IpcError::Read(e)),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_recognized_opcodes() {
        assert_eq!(decode(OP_GRACEFUL_SHUTDOWN), Some(LifecycleEvent::GracefulShutdown));
        assert_eq!(decode(OP_REOPEN_LOG), Some(LifecycleEvent::ReopenLog));
    }

    #[test]
    fn ignores_unrecognized_opcodes() {
        assert_eq!(decode(0x00), None);
        assert_eq!(decode(0xFF), None);
    }

    #[test]
    fn a_chunk_decodes_in_order_skipping_unknowns() {
        let chunk = [OP_REOPEN_LOG, 0x99, OP_GRACEFUL_SHUTDOWN, OP_REOPEN_LOG];
        let events: Vec<_> = chunk.iter().copied().filter_map(decode).collect();
        assert_eq!(
            events,
            vec![
                LifecycleEvent::ReopenLog,
                LifecycleEvent::GracefulShutdown,
                LifecycleEvent::ReopenLog,
            ]
        );
    }
}
