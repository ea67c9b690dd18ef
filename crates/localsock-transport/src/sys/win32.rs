use std::ffi::OsStr;
use std::io;
use std::iter;
use std::os::windows::ffi::OsStrExt;
use std::ptr;
use std::time::Duration;

use windows_sys::Win32::Foundation::{
    CloseHandle, ERROR_BROKEN_PIPE, ERROR_IO_PENDING, ERROR_NO_DATA, ERROR_PIPE_CONNECTED,
    HANDLE, INVALID_HANDLE_VALUE,
};
use windows_sys::Win32::Storage::FileSystem::{
    ReadFile, WriteFile, FILE_FLAG_FIRST_PIPE_INSTANCE, FILE_FLAG_OVERLAPPED, PIPE_ACCESS_DUPLEX,
};
use windows_sys::Win32::System::Pipes::{
    ConnectNamedPipe, CreateNamedPipeW, DisconnectNamedPipe, PIPE_READMODE_BYTE, PIPE_TYPE_BYTE,
    PIPE_WAIT,
};
use windows_sys::Win32::System::Threading::{CreateEventW, WaitForSingleObject};
use windows_sys::Win32::System::IO::{CancelIoEx, GetOverlappedResult, OVERLAPPED};

use super::{ConnectStatus, PipeApi};
use crate::connection::NativeHandle;

/// Client wait default handed to `CreateNamedPipeW`, in milliseconds.
const DEFAULT_CLIENT_TIMEOUT_MS: u32 = 0;

/// Named pipe calls through `windows-sys`.
#[derive(Debug, Default, Clone, Copy)]
pub struct Win32PipeApi;

/// An `OVERLAPPED` with its own manual-reset event.
///
/// Boxed so its address stays fixed while the kernel holds it; the event is
/// closed on drop.
pub struct OverlappedOp {
    overlapped: Box<OVERLAPPED>,
    event: HANDLE,
}

// SAFETY: the event handle and OVERLAPPED are owned exclusively by this value
// and kernel objects may be used from any thread.
unsafe impl Send for OverlappedOp {}

impl OverlappedOp {
    fn new() -> io::Result<Self> {
        // SAFETY: manual-reset, initially unsignaled, unnamed event.
        let event = unsafe { CreateEventW(ptr::null(), 1, 0, ptr::null()) };
        if event.is_null() {
            return Err(io::Error::last_os_error());
        }
        // SAFETY: OVERLAPPED is plain old data; all-zero is its documented initial state.
        let mut overlapped: Box<OVERLAPPED> = Box::new(unsafe { std::mem::zeroed() });
        overlapped.hEvent = event;
        Ok(Self { overlapped, event })
    }

    fn as_mut_ptr(&mut self) -> *mut OVERLAPPED {
        &mut *self.overlapped
    }

    /// Block until the operation issued with this structure finishes.
    fn wait(&self, handle: NativeHandle) -> io::Result<usize> {
        let mut transferred = 0u32;
        // SAFETY: `overlapped` is the structure the operation was issued with;
        // bWait=TRUE blocks until it completes or is cancelled.
        check(unsafe { GetOverlappedResult(raw(handle), &*self.overlapped, &mut transferred, 1) })?;
        Ok(transferred as usize)
    }
}

impl Drop for OverlappedOp {
    fn drop(&mut self) {
        // SAFETY: `event` came from CreateEventW and is closed only here.
        unsafe {
            CloseHandle(self.event);
        }
    }
}

fn raw(handle: NativeHandle) -> HANDLE {
    handle.as_raw() as HANDLE
}

fn wide(path: &str) -> Vec<u16> {
    OsStr::new(path).encode_wide().chain(iter::once(0)).collect()
}

fn check(ok: i32) -> io::Result<()> {
    if ok == 0 {
        Err(io::Error::last_os_error())
    } else {
        Ok(())
    }
}

fn create_pipe(
    path: &str,
    open_mode: u32,
    max_instances: u32,
    buffer_size: u32,
) -> io::Result<NativeHandle> {
    let name = wide(path);
    // SAFETY: `name` is NUL-terminated and outlives the call; null security
    // attributes select the default descriptor.
    let handle = unsafe {
        CreateNamedPipeW(
            name.as_ptr(),
            open_mode,
            PIPE_TYPE_BYTE | PIPE_READMODE_BYTE | PIPE_WAIT,
            max_instances,
            buffer_size,
            buffer_size,
            DEFAULT_CLIENT_TIMEOUT_MS,
            ptr::null(),
        )
    };
    if handle == INVALID_HANDLE_VALUE {
        return Err(io::Error::last_os_error());
    }
    Ok(NativeHandle::from_raw(handle as isize))
}

impl PipeApi for Win32PipeApi {
    type Pending = OverlappedOp;

    fn create_lock_instance(&self, path: &str, buffer_size: u32) -> io::Result<NativeHandle> {
        create_pipe(
            path,
            PIPE_ACCESS_DUPLEX | FILE_FLAG_OVERLAPPED | FILE_FLAG_FIRST_PIPE_INSTANCE,
            1,
            buffer_size,
        )
    }

    fn create_instance(
        &self,
        path: &str,
        max_instances: u32,
        buffer_size: u32,
    ) -> io::Result<NativeHandle> {
        create_pipe(
            path,
            PIPE_ACCESS_DUPLEX | FILE_FLAG_OVERLAPPED,
            max_instances,
            buffer_size,
        )
    }

    fn connect(&self, handle: NativeHandle) -> ConnectStatus<OverlappedOp> {
        let mut pending = match OverlappedOp::new() {
            Ok(pending) => pending,
            Err(err) => return ConnectStatus::Failed(err),
        };

        // SAFETY: the pipe handle is open and `pending` keeps the OVERLAPPED
        // at a fixed address until the operation completes or is cancelled.
        let ok = unsafe { ConnectNamedPipe(raw(handle), pending.as_mut_ptr()) };
        if ok != 0 {
            return ConnectStatus::Connected;
        }

        let err = io::Error::last_os_error();
        match err.raw_os_error().map(|code| code as u32) {
            Some(ERROR_PIPE_CONNECTED) => ConnectStatus::AlreadyConnected,
            Some(ERROR_NO_DATA) => ConnectStatus::NoData,
            Some(ERROR_IO_PENDING) => ConnectStatus::Pending(pending),
            _ => ConnectStatus::Failed(err),
        }
    }

    fn wait_connected(&self, handle: NativeHandle, pending: OverlappedOp) -> io::Result<()> {
        pending.wait(handle).map(drop)
    }

    fn cancel_io(&self, handle: NativeHandle) -> io::Result<()> {
        // SAFETY: a null OVERLAPPED cancels every request issued on the handle.
        check(unsafe { CancelIoEx(raw(handle), ptr::null()) })
    }

    fn wait_idle(&self, handle: NativeHandle, timeout: Duration) {
        let millis = u32::try_from(timeout.as_millis()).unwrap_or(u32::MAX);
        // SAFETY: the handle is open; the result only bounds how long we wait.
        unsafe {
            WaitForSingleObject(raw(handle), millis);
        }
    }

    fn disconnect(&self, handle: NativeHandle) -> io::Result<()> {
        // SAFETY: the handle is an open server end of a named pipe.
        check(unsafe { DisconnectNamedPipe(raw(handle)) })
    }

    fn close(&self, handle: NativeHandle) -> io::Result<()> {
        // SAFETY: callers remove the handle from every registry before closing,
        // so this is the only close.
        check(unsafe { CloseHandle(raw(handle)) })
    }
}

/// Read from a pipe handle opened with or without `FILE_FLAG_OVERLAPPED`.
///
/// A broken pipe reads as end of stream.
pub(crate) fn read_pipe(handle: NativeHandle, buf: &mut [u8]) -> io::Result<usize> {
    let len = u32::try_from(buf.len()).unwrap_or(u32::MAX);
    let result = overlapped_io(handle, |overlapped| {
        // SAFETY: `buf` is valid for `len` bytes and outlives the wait below.
        unsafe { ReadFile(raw(handle), buf.as_mut_ptr(), len, ptr::null_mut(), overlapped) }
    });
    match result {
        Err(err) if err.raw_os_error() == Some(ERROR_BROKEN_PIPE as i32) => Ok(0),
        other => other,
    }
}

/// Write to a pipe handle opened with or without `FILE_FLAG_OVERLAPPED`.
pub(crate) fn write_pipe(handle: NativeHandle, buf: &[u8]) -> io::Result<usize> {
    let len = u32::try_from(buf.len()).unwrap_or(u32::MAX);
    overlapped_io(handle, |overlapped| {
        // SAFETY: `buf` is valid for `len` bytes and outlives the wait below.
        unsafe { WriteFile(raw(handle), buf.as_ptr(), len, ptr::null_mut(), overlapped) }
    })
}

/// Issue one I/O call with a private OVERLAPPED and wait for it.
fn overlapped_io(
    handle: NativeHandle,
    start: impl FnOnce(*mut OVERLAPPED) -> i32,
) -> io::Result<usize> {
    let mut op = OverlappedOp::new()?;
    if start(op.as_mut_ptr()) == 0 {
        let err = io::Error::last_os_error();
        if err.raw_os_error() != Some(ERROR_IO_PENDING as i32) {
            return Err(err);
        }
    }
    op.wait(handle)
}

#[cfg(test)]
mod tests {
    use std::fs::OpenOptions;
    use std::io::{Read, Write};
    use std::thread;
    use std::time::Instant;

    use crate::config::PipeListenerConfig;
    use crate::error::TransportError;
    use crate::pipe::PipeServerSocket;
    use crate::traits::ListenerAddress;

    fn unique_name(tag: &str) -> String {
        format!(r"\\.\pipe\localsock-{tag}-{}", std::process::id())
    }

    fn open_client(path: &str) -> std::fs::File {
        let deadline = Instant::now() + std::time::Duration::from_secs(5);
        loop {
            match OpenOptions::new().read(true).write(true).open(path) {
                Ok(file) => return file,
                Err(_) if Instant::now() < deadline => {
                    thread::sleep(std::time::Duration::from_millis(20));
                }
                Err(err) => panic!("client could not connect to {path}: {err}"),
            }
        }
    }

    #[test]
    fn pipe_round_trip() {
        let path = unique_name("rt");
        let listener = PipeServerSocket::new(&path).expect("listener should reserve the name");
        assert!(matches!(
            listener.bind(&ListenerAddress::from(path.as_str())),
            Err(TransportError::Unsupported(_))
        ));

        let client_path = path.clone();
        let client = thread::spawn(move || {
            let mut file = open_client(&client_path);
            file.write_all(b"ping").expect("client write");
            let mut reply = [0u8; 4];
            file.read_exact(&mut reply).expect("client read");
            reply
        });

        let mut conn = listener.accept().expect("accept should succeed");
        let mut buf = [0u8; 4];
        conn.read_exact(&mut buf).expect("server read");
        assert_eq!(&buf, b"ping");
        conn.write_all(b"pong").expect("server write");

        assert_eq!(&client.join().expect("client thread"), b"pong");
        assert_eq!(listener.handle_counts(), (0, 1));
        conn.close().expect("connection close");
        assert_eq!(listener.handle_counts(), (0, 0));
        listener.close().expect("listener close");
    }

    #[test]
    fn second_listener_on_same_name_fails() {
        let path = unique_name("dup");
        let first = PipeServerSocket::new(&path).expect("first listener");
        assert!(PipeServerSocket::with_config(&path, PipeListenerConfig::default()).is_err());
        first.close().expect("close");
        let second = PipeServerSocket::new(&path).expect("name is free after close");
        second.close().expect("close");
    }
}
