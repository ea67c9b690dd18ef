//! `sockaddr_un` marshalling.
//!
//! BSD-family platforms prefix the family byte with a `sun_len` byte; the
//! rest store a 16-bit family. The layout is picked per target at compile
//! time through [`NativeLayout`], and both layouts produce the same
//! [`NativeAddressRecord`].

use std::ffi::OsStr;
use std::marker::PhantomData;
use std::mem::{offset_of, size_of};
use std::os::unix::ffi::OsStrExt;
use std::path::{Path, PathBuf};

use crate::error::{Result, TransportError};

/// Size of the family header in front of `sun_path`.
pub const HEADER_LEN: usize = 2;
/// Byte offset of `sun_path` inside `sockaddr_un`.
pub const PATH_OFFSET: usize = offset_of!(libc::sockaddr_un, sun_path);
/// Size of the `sun_path` buffer (108 on Linux, 104 on the BSDs and macOS).
pub const PATH_CAPACITY: usize = size_of::<libc::sockaddr_un>() - PATH_OFFSET;
/// Longest encodable path; one byte is reserved for the terminator.
pub const MAX_PATH_LEN: usize = PATH_CAPACITY - 1;

const _: () = assert!(PATH_OFFSET == HEADER_LEN, "unsupported sockaddr_un layout");

/// Writes the header that precedes `sun_path`.
pub trait HeaderLayout {
    /// Fill `header` for a path of `path_len` bytes (terminator excluded).
    fn write_header(header: &mut [u8; HEADER_LEN], path_len: usize);
}

/// `{ sun_family: u16 }`.
#[derive(Debug, Clone, Copy)]
pub struct FamilyOnly;

impl HeaderLayout for FamilyOnly {
    fn write_header(header: &mut [u8; HEADER_LEN], _path_len: usize) {
        *header = (libc::AF_UNIX as u16).to_ne_bytes();
    }
}

/// `{ sun_len: u8, sun_family: u8 }`.
#[derive(Debug, Clone, Copy)]
pub struct LenPrefixed;

impl HeaderLayout for LenPrefixed {
    fn write_header(header: &mut [u8; HEADER_LEN], path_len: usize) {
        // Bounded by size_of::<sockaddr_un>(), which fits in a byte on every BSD.
        header[0] = (PATH_OFFSET + path_len) as u8;
        header[1] = libc::AF_UNIX as u8;
    }
}

#[cfg(any(
    target_os = "macos",
    target_os = "ios",
    target_os = "freebsd",
    target_os = "netbsd",
    target_os = "openbsd",
    target_os = "dragonfly"
))]
pub type NativeLayout = LenPrefixed;

#[cfg(not(any(
    target_os = "macos",
    target_os = "ios",
    target_os = "freebsd",
    target_os = "netbsd",
    target_os = "openbsd",
    target_os = "dragonfly"
)))]
pub type NativeLayout = FamilyOnly;

/// Encodes filesystem paths into [`NativeAddressRecord`]s using layout `L`.
#[derive(Debug, Clone, Copy, Default)]
pub struct AddressEncoder<L: HeaderLayout = NativeLayout>(PhantomData<L>);

impl<L: HeaderLayout> AddressEncoder<L> {
    /// Encode `path`, failing with [`TransportError::PathTooLong`] rather than truncating.
    ///
    /// Interior NUL bytes are rejected: the kernel would stop at the first one
    /// (or, on Linux, treat a leading one as an abstract name).
    pub fn encode(path: &Path) -> Result<NativeAddressRecord> {
        let bytes = path.as_os_str().as_bytes();
        if bytes.contains(&0) {
            return Err(TransportError::InvalidPath {
                path: path.to_path_buf(),
                reason: "contains a NUL byte",
            });
        }
        if bytes.len() > MAX_PATH_LEN {
            return Err(TransportError::PathTooLong {
                path: path.to_path_buf(),
                len: bytes.len(),
                max: MAX_PATH_LEN,
            });
        }

        let mut record = NativeAddressRecord::zeroed();
        {
            let raw = record.bytes_mut();
            let mut header = [0u8; HEADER_LEN];
            L::write_header(&mut header, bytes.len());
            raw[..HEADER_LEN].copy_from_slice(&header);
            raw[PATH_OFFSET..PATH_OFFSET + bytes.len()].copy_from_slice(bytes);
            raw[PATH_OFFSET + bytes.len()] = 0;
        }
        record.len = (PATH_OFFSET + bytes.len() + 1) as libc::socklen_t;
        Ok(record)
    }
}

/// A `sockaddr_un` together with the address length handed to the kernel.
#[derive(Clone, Copy)]
pub struct NativeAddressRecord {
    storage: libc::sockaddr_un,
    len: libc::socklen_t,
}

impl NativeAddressRecord {
    /// Encode `path` with the host layout.
    pub fn encode(path: &Path) -> Result<Self> {
        AddressEncoder::<NativeLayout>::encode(path)
    }

    /// A full-size blank record for receiving a peer address from `accept`.
    pub fn empty() -> Self {
        let mut record = Self::zeroed();
        record.len = size_of::<libc::sockaddr_un>() as libc::socklen_t;
        record
    }

    fn zeroed() -> Self {
        Self {
            // SAFETY: sockaddr_un is plain old data; all-zero is a valid value.
            storage: unsafe { std::mem::zeroed() },
            len: 0,
        }
    }

    /// Header size plus path bytes plus the terminator.
    pub fn size(&self) -> usize {
        self.len as usize
    }

    pub fn socklen(&self) -> libc::socklen_t {
        self.len
    }

    pub fn as_sockaddr(&self) -> *const libc::sockaddr {
        (&self.storage as *const libc::sockaddr_un).cast::<libc::sockaddr>()
    }

    /// Address and length slots for calls that write a peer address back (`accept`).
    pub fn raw_parts_mut(&mut self) -> (*mut libc::sockaddr, *mut libc::socklen_t) {
        (
            (&mut self.storage as *mut libc::sockaddr_un).cast::<libc::sockaddr>(),
            &mut self.len as *mut libc::socklen_t,
        )
    }

    /// The whole record as raw bytes.
    pub fn as_bytes(&self) -> &[u8] {
        // SAFETY: storage is a fully initialized plain-old-data struct of this size.
        unsafe {
            std::slice::from_raw_parts(
                (&self.storage as *const libc::sockaddr_un).cast::<u8>(),
                size_of::<libc::sockaddr_un>(),
            )
        }
    }

    fn bytes_mut(&mut self) -> &mut [u8] {
        // SAFETY: as in `as_bytes`; every byte pattern is a valid sockaddr_un.
        unsafe {
            std::slice::from_raw_parts_mut(
                (&mut self.storage as *mut libc::sockaddr_un).cast::<u8>(),
                size_of::<libc::sockaddr_un>(),
            )
        }
    }

    /// Path bytes up to (not including) the terminator.
    pub fn path_bytes(&self) -> &[u8] {
        let path = &self.as_bytes()[PATH_OFFSET..];
        let end = path.iter().position(|&b| b == 0).unwrap_or(path.len());
        &path[..end]
    }

    pub fn to_path(&self) -> PathBuf {
        PathBuf::from(OsStr::from_bytes(self.path_bytes()))
    }
}

impl std::fmt::Debug for NativeAddressRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NativeAddressRecord")
            .field("path", &self.to_path())
            .field("len", &self.len)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_decode_round_trip() {
        for path in ["/tmp/test.sock", "a", "/var/run/localsock/daemon.sock", ""] {
            let record = NativeAddressRecord::encode(Path::new(path)).expect("path should fit");
            assert_eq!(record.to_path(), PathBuf::from(path));
            assert_eq!(record.size(), HEADER_LEN + path.len() + 1);
        }
    }

    #[test]
    fn longest_path_fits_with_terminator() {
        let path = "p".repeat(MAX_PATH_LEN);
        let record = NativeAddressRecord::encode(Path::new(&path)).expect("max path should fit");
        assert_eq!(record.path_bytes().len(), MAX_PATH_LEN);
        assert_eq!(record.size(), size_of::<libc::sockaddr_un>());
    }

    #[test]
    fn rejects_path_over_capacity() {
        let path = "p".repeat(MAX_PATH_LEN + 1);
        let result = NativeAddressRecord::encode(Path::new(&path));
        match result {
            Err(TransportError::PathTooLong { len, max, .. }) => {
                assert_eq!(len, MAX_PATH_LEN + 1);
                assert_eq!(max, MAX_PATH_LEN);
            }
            other => panic!("expected PathTooLong, got {other:?}"),
        }
    }

    #[test]
    fn rejects_interior_and_leading_nul() {
        for raw in [&b"/tmp/a\0b.sock"[..], &b"\0abstract"[..]] {
            let path = Path::new(OsStr::from_bytes(raw));
            match NativeAddressRecord::encode(path) {
                Err(TransportError::InvalidPath { path: rejected, .. }) => {
                    assert_eq!(rejected.as_os_str().as_bytes(), raw);
                }
                other => panic!("expected InvalidPath for {raw:?}, got {other:?}"),
            }
        }
    }

    #[test]
    fn family_only_header() {
        let record =
            AddressEncoder::<FamilyOnly>::encode(Path::new("/tmp/x.sock")).expect("should fit");
        let bytes = record.as_bytes();
        assert_eq!(bytes[..2], (libc::AF_UNIX as u16).to_ne_bytes());
        assert_eq!(&bytes[2..13], b"/tmp/x.sock");
        assert_eq!(bytes[13], 0);
    }

    #[test]
    fn len_prefixed_header() {
        let record =
            AddressEncoder::<LenPrefixed>::encode(Path::new("/tmp/x.sock")).expect("should fit");
        let bytes = record.as_bytes();
        assert_eq!(bytes[0] as usize, PATH_OFFSET + "/tmp/x.sock".len());
        assert_eq!(bytes[1], libc::AF_UNIX as u8);
        assert_eq!(record.to_path(), PathBuf::from("/tmp/x.sock"));
    }

    #[test]
    fn empty_record_is_full_size() {
        let record = NativeAddressRecord::empty();
        assert_eq!(record.size(), size_of::<libc::sockaddr_un>());
        assert!(record.path_bytes().is_empty());
    }
}
