//! Fixed-size frame I/O over pipes for process workers.
//!
//! Frames carry no header: both sides know the record size from its type. A
//! clean EOF at a frame boundary is the peer shutting down; an EOF inside a
//! frame is an error.

use crate::protocol::{Request, Response};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::os::unix::io::{AsFd, AsRawFd, BorrowedFd, FromRawFd, OwnedFd, RawFd};

/// Buffer size for frame readers and writers.
const BUFFER_SIZE: usize = 4 * 1024;

/// A file descriptor wrapper that implements Read/Write with EINTR handling.
pub struct PipeFd {
    fd: OwnedFd,
}

impl PipeFd {
    pub fn new(fd: OwnedFd) -> Self {
        Self { fd }
    }

    /// Create from a raw file descriptor (takes ownership).
    ///
    /// # Safety
    /// The caller must ensure `fd` is a valid file descriptor that can be owned.
    pub unsafe fn from_raw(fd: RawFd) -> Self {
        Self {
            fd: unsafe { OwnedFd::from_raw_fd(fd) },
        }
    }
}

impl AsFd for PipeFd {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.fd.as_fd()
    }
}

impl AsRawFd for PipeFd {
    fn as_raw_fd(&self) -> RawFd {
        self.fd.as_raw_fd()
    }
}

impl Read for PipeFd {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        loop {
            match nix::unistd::read(&self.fd, buf) {
                Ok(n) => return Ok(n),
                Err(nix::errno::Errno::EINTR) => continue,
                Err(e) => return Err(io::Error::from_raw_os_error(e as i32)),
            }
        }
    }
}

impl Write for PipeFd {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        loop {
            match nix::unistd::write(&self.fd, buf) {
                Ok(n) => return Ok(n),
                Err(nix::errno::Errno::EINTR) => continue,
                Err(e) => return Err(io::Error::from_raw_os_error(e as i32)),
            }
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Buffered reader of fixed-size frames.
pub struct FrameReader {
    reader: BufReader<PipeFd>,
}

impl FrameReader {
    pub fn new(fd: PipeFd) -> Self {
        Self {
            reader: BufReader::with_capacity(BUFFER_SIZE, fd),
        }
    }

    /// Read one frame of `N` bytes. Returns `None` on EOF before the first byte.
    pub fn read_frame<const N: usize>(&mut self) -> io::Result<Option<[u8; N]>> {
        let mut buf = [0u8; N];
        let mut filled = 0;
        while filled < N {
            match self.reader.read(&mut buf[filled..]) {
                Ok(0) if filled == 0 => return Ok(None),
                Ok(0) => {
                    return Err(io::Error::new(
                        io::ErrorKind::UnexpectedEof,
                        format!("peer closed after {} of {} frame bytes", filled, N),
                    ));
                }
                Ok(n) => filled += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
        Ok(Some(buf))
    }

    pub fn read_request(&mut self) -> io::Result<Option<Request>> {
        Ok(self
            .read_frame::<{ Request::SIZE }>()?
            .map(|buf| Request::decode(&buf)))
    }

    pub fn read_response(&mut self) -> io::Result<Option<Response>> {
        Ok(self
            .read_frame::<{ Response::SIZE }>()?
            .map(|buf| Response::decode(&buf)))
    }
}

/// Buffered writer of fixed-size frames; every frame is flushed immediately.
pub struct FrameWriter {
    writer: BufWriter<PipeFd>,
}

impl FrameWriter {
    pub fn new(fd: PipeFd) -> Self {
        Self {
            writer: BufWriter::with_capacity(BUFFER_SIZE, fd),
        }
    }

    pub fn write_frame(&mut self, frame: &[u8]) -> io::Result<()> {
        self.writer.write_all(frame)?;
        self.writer.flush()
    }

    pub fn write_request(&mut self, request: &Request) -> io::Result<()> {
        self.write_frame(&request.encode())
    }

    pub fn write_response(&mut self, response: &Response) -> io::Result<()> {
        self.write_frame(&response.encode())
    }
}

#[cfg(test)]
pub(crate) fn create_pipe() -> (PipeFd, PipeFd) {
    let (read_fd, write_fd) = nix::unistd::pipe().expect("Failed to create pipe");
    (PipeFd::new(read_fd), PipeFd::new(write_fd))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::Timestamp;

    #[test]
    fn test_request_frames_over_pipe() {
        let (read_fd, write_fd) = create_pipe();
        let mut reader = FrameReader::new(read_fd);
        let mut writer = FrameWriter::new(write_fd);

        let first = Request {
            left: 0.0,
            right: 0.5,
            density_budget: 1e-6,
            sent_at: Timestamp(10),
        };
        let second = Request {
            left: 0.5,
            right: 1.0,
            ..first
        };
        writer.write_request(&first).unwrap();
        writer.write_request(&second).unwrap();
        drop(writer);

        assert_eq!(reader.read_request().unwrap(), Some(first));
        assert_eq!(reader.read_request().unwrap(), Some(second));
        assert_eq!(reader.read_request().unwrap(), None);
    }

    #[test]
    fn test_eof_mid_frame_is_error() {
        let (read_fd, write_fd) = create_pipe();
        let mut reader = FrameReader::new(read_fd);
        let mut writer = FrameWriter::new(write_fd);

        writer.write_frame(&[1u8; 12]).unwrap();
        drop(writer);

        let err = reader.read_response().unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
    }

    #[test]
    fn test_empty_pipe_is_clean_eof() {
        let (read_fd, write_fd) = create_pipe();
        let mut reader = FrameReader::new(read_fd);
        drop(write_fd);

        assert_eq!(reader.read_response().unwrap(), None);
    }
}
