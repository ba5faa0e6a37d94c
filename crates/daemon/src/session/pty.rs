// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Pseudo-terminal plumbing for interactive agent sessions.
//!
//! The agent CLI buffers output until exit unless stdin looks like a TTY,
//! so each session gets a PTY pair: the child reads the slave side as
//! stdin while stream-json output still arrives on a plain stdout pipe.
//! A background task continuously drains the master's echo so the kernel
//! buffer never applies backpressure to the child.

use std::io;
use std::os::fd::{AsRawFd, OwnedFd};
use std::sync::Arc;

use nix::fcntl::{fcntl, FcntlArg, OFlag};
use nix::pty::openpty;
use tokio::io::unix::AsyncFd;
use tokio_util::sync::CancellationToken;
use tracing::trace;

/// Newtype wrapper around `OwnedFd` for use with `AsyncFd`.
#[derive(Debug)]
pub struct PtyFd(pub OwnedFd);

impl AsRawFd for PtyFd {
    fn as_raw_fd(&self) -> std::os::fd::RawFd {
        self.0.as_raw_fd()
    }
}

/// Master side of a session PTY: the child's terminal input.
///
/// Clones share one fd. EOF reaches the child only when every clone has
/// been dropped, so the echo-drain task must exit when input closes.
#[derive(Clone)]
pub struct PtyMaster {
    fd: Arc<AsyncFd<PtyFd>>,
}

/// Open a PTY pair. The returned slave fd becomes the child's stdin; the
/// master is held by the session for writes and echo draining.
pub fn open() -> anyhow::Result<(PtyMaster, OwnedFd)> {
    let pair = openpty(None, None)?;
    set_nonblocking(&pair.master)?;
    let fd = Arc::new(AsyncFd::new(PtyFd(pair.master))?);
    Ok((PtyMaster { fd }, pair.slave))
}

impl PtyMaster {
    /// Write all bytes to the child's terminal input.
    pub async fn write_all(&self, data: &[u8]) -> io::Result<()> {
        let mut offset = 0;
        while offset < data.len() {
            let mut guard = self.fd.writable().await?;
            match guard.try_io(|inner| {
                nix::unistd::write(&inner.get_ref().0, &data[offset..]).map_err(io_err)
            }) {
                Ok(Ok(n)) => offset += n,
                Ok(Err(e)) => return Err(e),
                Err(_would_block) => continue,
            }
        }
        Ok(())
    }

    async fn read_chunk(&self, buf: &mut [u8]) -> io::Result<usize> {
        loop {
            let mut guard = self.fd.readable().await?;
            match guard.try_io(|inner| {
                nix::unistd::read(&inner.get_ref().0, buf).map_err(io_err)
            }) {
                Ok(result) => return result,
                Err(_would_block) => continue,
            }
        }
    }

    /// Discard echoed bytes until `stop` fires or the PTY closes.
    ///
    /// EIO here means the slave side is gone (child exited); both end the
    /// drain quietly. The clone held by this task drops on return, which is
    /// what lets the child observe EOF after input is closed.
    pub async fn drain_echo(self, stop: CancellationToken) {
        let mut buf = vec![0u8; 4096];
        loop {
            tokio::select! {
                _ = stop.cancelled() => return,
                read = self.read_chunk(&mut buf) => match read {
                    Ok(0) => return,
                    Ok(n) => trace!(bytes = n, "discarded pty echo"),
                    Err(_) => return,
                },
            }
        }
    }
}

/// Set the given file descriptor to non-blocking mode.
fn set_nonblocking(fd: &impl std::os::fd::AsFd) -> io::Result<()> {
    let flags = fcntl(fd, FcntlArg::F_GETFL).map_err(io_err)?;
    let flags = OFlag::from_bits_truncate(flags);
    fcntl(fd, FcntlArg::F_SETFL(flags | OFlag::O_NONBLOCK)).map_err(io_err)?;
    Ok(())
}

fn io_err(e: nix::errno::Errno) -> io::Error {
    io::Error::from_raw_os_error(e as i32)
}
