// src/exec/pipe.rs

//! Pipe transport between the parent and a child's standard streams.
//!
//! Both endpoints come out of [`create`] non-inheritable (close-on-exec on
//! Unix, non-inheritable handles on Windows). Only an endpoint passed
//! explicitly to a child's stdio crosses the process boundary.

use std::io::{self, PipeReader, PipeWriter, Read, Write};

/// A connected pair: bytes written to `write` become readable from `read`
/// in write order.
#[derive(Debug)]
pub struct Transport {
    pub read: PipeReader,
    pub write: PipeWriter,
}

/// Create a new transport.
///
/// Nothing is half-open on failure: the pair is created atomically, and any
/// endpoint created afterwards is dropped (closed) before an error leaves
/// the caller.
pub fn create() -> io::Result<Transport> {
    let (read, write) = io::pipe()?;
    Ok(Transport { read, write })
}

/// Parent-side read endpoint that never blocks.
///
/// `read` returns `ErrorKind::WouldBlock` when the pipe is currently empty
/// and `Ok(0)` once every write endpoint is closed.
#[derive(Debug)]
pub struct ReadEnd {
    inner: PipeReader,
}

impl ReadEnd {
    pub fn new(reader: PipeReader) -> io::Result<Self> {
        #[cfg(unix)]
        set_nonblocking(&reader)?;
        Ok(Self { inner: reader })
    }
}

#[cfg(unix)]
impl Read for ReadEnd {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.inner.read(buf)
    }
}

#[cfg(windows)]
impl Read for ReadEnd {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match bytes_available(&self.inner)? {
            None => Ok(0),
            Some(0) => Err(io::ErrorKind::WouldBlock.into()),
            Some(n) => {
                let len = buf.len().min(n as usize);
                self.inner.read(&mut buf[..len])
            }
        }
    }
}

/// Parent-side write endpoint.
///
/// Non-blocking on Unix: a full pipe yields `ErrorKind::WouldBlock` instead
/// of stalling the running loop. Windows anonymous pipes have no such mode,
/// so writes there block until the child has read enough.
#[derive(Debug)]
pub struct WriteEnd {
    inner: PipeWriter,
}

impl WriteEnd {
    pub fn new(writer: PipeWriter) -> io::Result<Self> {
        #[cfg(unix)]
        set_nonblocking(&writer)?;
        Ok(Self { inner: writer })
    }
}

impl Write for WriteEnd {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.inner.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

#[cfg(unix)]
fn set_nonblocking(fd: &impl std::os::fd::AsRawFd) -> io::Result<()> {
    let fd = fd.as_raw_fd();
    let flags = unsafe { libc::fcntl(fd, libc::F_GETFL) };
    if flags < 0 {
        return Err(io::Error::last_os_error());
    }
    let ret = unsafe { libc::fcntl(fd, libc::F_SETFL, flags | libc::O_NONBLOCK) };
    if ret < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

/// `None` once the write side is gone.
#[cfg(windows)]
fn bytes_available(reader: &PipeReader) -> io::Result<Option<u32>> {
    use std::os::windows::io::AsRawHandle;
    use windows_sys::Win32::Foundation::{ERROR_BROKEN_PIPE, HANDLE};
    use windows_sys::Win32::System::Pipes::PeekNamedPipe;

    let mut available: u32 = 0;
    let ok = unsafe {
        PeekNamedPipe(
            reader.as_raw_handle() as HANDLE,
            std::ptr::null_mut(),
            0,
            std::ptr::null_mut(),
            &mut available,
            std::ptr::null_mut(),
        )
    };
    if ok == 0 {
        let err = io::Error::last_os_error();
        if err.raw_os_error() == Some(ERROR_BROKEN_PIPE as i32) {
            return Ok(None);
        }
        return Err(err);
    }
    Ok(Some(available))
}
