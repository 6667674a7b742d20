//! Process handle for worker subprocesses.

use super::ipc::{FrameReader, FrameWriter, PipeFd};
use super::signals::{TerminationReason, analyze_wait_status};
use crate::error::{QuadError, Result};
use crate::protocol::Request;
use nix::sys::signal::{self, Signal};
use nix::sys::wait::{WaitPidFlag, WaitStatus, waitpid};
use nix::unistd::Pid;
use std::io;
use std::os::unix::io::OwnedFd;
use std::time::{Duration, Instant};

/// Handle to a worker subprocess and its pipes.
///
/// The read side is handed to a collector thread with [`Proc::take_reader`];
/// the handle keeps the write side and the process lifetime.
pub struct Proc {
    pid: Pid,
    writer: Option<FrameWriter>,
    reader: Option<FrameReader>,
    reaped: bool,
    exit: Option<TerminationReason>,
}

impl Proc {
    /// Take ownership of a spawned child's stdin and stdout.
    pub fn from_child(mut child: std::process::Child) -> Result<Self> {
        let pid = Pid::from_raw(child.id() as i32);

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| QuadError::Worker("Child stdin not captured".into()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| QuadError::Worker("Child stdout not captured".into()))?;

        Ok(Self {
            pid,
            writer: Some(FrameWriter::new(PipeFd::new(OwnedFd::from(stdin)))),
            reader: Some(FrameReader::new(PipeFd::new(OwnedFd::from(stdout)))),
            reaped: false,
            exit: None,
        })
    }

    pub fn pid(&self) -> Pid {
        self.pid
    }

    /// Hand out the response side of the pipe pair (once).
    pub fn take_reader(&mut self) -> Option<FrameReader> {
        self.reader.take()
    }

    /// Write one request frame.
    pub fn send(&mut self, request: &Request) -> io::Result<()> {
        match self.writer.as_mut() {
            Some(writer) => writer.write_request(request),
            None => Err(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "worker input already closed",
            )),
        }
    }

    /// Close the worker's stdin; a healthy worker exits on EOF.
    pub fn close_input(&mut self) {
        self.writer = None;
    }

    /// Reap the process if it has exited (non-blocking).
    pub fn try_wait(&mut self) -> Result<Option<TerminationReason>> {
        if self.reaped {
            return Ok(self.exit.clone());
        }
        match waitpid(self.pid, Some(WaitPidFlag::WNOHANG)) {
            Ok(WaitStatus::StillAlive) => Ok(None),
            Ok(status) => Ok(Some(self.record(status))),
            Err(e) => Err(QuadError::Worker(format!("waitpid failed: {}", e))),
        }
    }

    /// Send SIGTERM to the process.
    pub fn terminate(&self) -> Result<()> {
        if self.reaped {
            return Ok(());
        }
        signal::kill(self.pid, Signal::SIGTERM)
            .map_err(|e| QuadError::Worker(format!("Failed to send SIGTERM: {}", e)))
    }

    /// Send SIGKILL and reap.
    pub fn kill(&mut self) -> Result<()> {
        if self.reaped {
            return Ok(());
        }
        signal::kill(self.pid, Signal::SIGKILL)
            .map_err(|e| QuadError::Worker(format!("Failed to send SIGKILL: {}", e)))?;
        match waitpid(self.pid, None) {
            Ok(status) => {
                self.record(status);
                Ok(())
            }
            Err(e) => Err(QuadError::Worker(format!("waitpid failed: {}", e))),
        }
    }

    /// Close stdin, wait up to `timeout`, then escalate to SIGTERM and SIGKILL.
    pub fn stop(&mut self, timeout: Duration) -> Result<()> {
        self.close_input();
        if self.wait_for_exit(timeout)? {
            return Ok(());
        }

        let _ = self.terminate();
        if self.wait_for_exit(Duration::from_millis(100))? {
            return Ok(());
        }

        self.kill()
    }

    fn wait_for_exit(&mut self, timeout: Duration) -> Result<bool> {
        let start = Instant::now();
        loop {
            if self.try_wait()?.is_some() {
                return Ok(true);
            }
            if start.elapsed() >= timeout {
                return Ok(false);
            }
            std::thread::sleep(Duration::from_millis(5));
        }
    }

    fn record(&mut self, status: WaitStatus) -> TerminationReason {
        let reason = analyze_wait_status(status);
        self.reaped = true;
        self.exit = Some(reason.clone());
        reason
    }
}

impl Drop for Proc {
    fn drop(&mut self) {
        if !self.reaped {
            self.close_input();
            let _ = self.terminate();
            std::thread::sleep(Duration::from_millis(10));
            if let Ok(Some(_)) = self.try_wait() {
                return;
            }
            let _ = signal::kill(self.pid, Signal::SIGKILL);
            let _ = waitpid(self.pid, None);
            self.reaped = true;
        }
    }
}
