//! Stream mock for code that reads, writes or inspects streams.
//!
//! [`StreamMock`] records every stream method. Methods with output
//! parameters take an argument struct that the action fills in; methods
//! without them record their plain arguments.

use std::ffi::c_void;
use std::fmt;
use std::ptr;

use super::unknown::{ComMock, QueryInterfaceArgs};
use super::{MockMethod, Strictness};
use crate::com::{HResult, E_POINTER, S_OK};

/// `stat` flag asking for the element name.
pub const STATFLAG_DEFAULT: u32 = 0;
/// `stat` flag asking to leave out the element name. Actions see it in
/// [`StatArgs::flags`] and decide for themselves.
pub const STATFLAG_NONAME: u32 = 1;

/// `commit` flag for a plain commit.
pub const STGC_DEFAULT: u32 = 0;
/// `commit` flag asking to overwrite the stored data in place.
pub const STGC_OVERWRITE: u32 = 1;

/// `lock_region` type for a write lock.
pub const LOCK_WRITE: u32 = 1;
/// `lock_region` type for an exclusive lock.
pub const LOCK_EXCLUSIVE: u32 = 2;
/// `lock_region` type for a lock taken only once per region.
pub const LOCK_ONLYONCE: u32 = 4;

/// Arguments of a mocked `read`. An action puts the bytes to hand back in
/// `data`; anything beyond `requested` is cut off.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReadArgs {
    pub requested: u32,
    pub data: Vec<u8>,
}

/// Arguments of a mocked `write`. An action sets `written`; it defaults to
/// the full length of `data`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WriteArgs {
    pub data: Vec<u8>,
    pub written: u32,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SeekOrigin {
    #[default]
    Set,
    Current,
    End,
}

/// Arguments of a mocked `seek`. An action sets `new_position`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SeekArgs {
    pub offset: i64,
    pub origin: SeekOrigin,
    pub new_position: u64,
}

/// What `stat` reports about a stream.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StatInfo {
    pub name: Option<String>,
    pub size: u64,
}

/// Arguments of a mocked `stat`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StatArgs {
    pub flags: u32,
    pub stat: StatInfo,
}

/// Arguments of a mocked `copy_to`. `target` is the destination as handed
/// in; an action reports the byte counts in `read` and `written`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CopyToArgs {
    pub target: *mut c_void,
    pub requested: u64,
    pub read: u64,
    pub written: u64,
}

/// Arguments of a mocked `lock_region` or `unlock_region`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RegionArgs {
    pub offset: u64,
    pub length: u64,
    pub lock_type: u32,
}

/// Arguments of a mocked `clone_stream`. An action stores the new stream,
/// usually through [`set_com_object`](super::set_com_object).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CloneArgs {
    pub clone: *mut c_void,
}

/// Answers `stat` with `name` as the element name, whatever the flags.
///
/// # Examples
/// ```
/// use comkit::mock::matcher::anything;
/// use comkit::mock::{stat_with_name, StatInfo, StreamMock, STATFLAG_DEFAULT};
///
/// let stream = StreamMock::new();
/// stream.stat_method().expect_call(anything()).will_once(stat_with_name("data.bin"));
///
/// let mut stat = StatInfo::default();
/// assert!(stream.stat(Some(&mut stat), STATFLAG_DEFAULT).is_ok());
/// assert_eq!(stat.name.as_deref(), Some("data.bin"));
/// ```
pub fn stat_with_name(name: &str) -> impl Fn(&mut StatArgs) -> HResult + 'static {
    let name = name.to_owned();
    move |args| {
        args.stat.name = Some(name.clone());
        S_OK
    }
}

/// A full stream on top of the identity contract.
pub struct StreamMock {
    add_ref: MockMethod<(), u32>,
    release: MockMethod<(), u32>,
    query_interface: MockMethod<QueryInterfaceArgs, HResult>,
    read: MockMethod<ReadArgs, HResult>,
    write: MockMethod<WriteArgs, HResult>,
    seek: MockMethod<SeekArgs, HResult>,
    set_size: MockMethod<u64, HResult>,
    copy_to: MockMethod<CopyToArgs, HResult>,
    commit: MockMethod<u32, HResult>,
    revert: MockMethod<(), HResult>,
    lock_region: MockMethod<RegionArgs, HResult>,
    unlock_region: MockMethod<RegionArgs, HResult>,
    stat: MockMethod<StatArgs, HResult>,
    clone: MockMethod<CloneArgs, HResult>,
}

impl StreamMock {
    pub fn new() -> Self {
        Self {
            add_ref: MockMethod::new("AddRef"),
            release: MockMethod::new("Release"),
            query_interface: MockMethod::new("QueryInterface"),
            read: MockMethod::new("Read"),
            write: MockMethod::new("Write"),
            seek: MockMethod::new("Seek"),
            set_size: MockMethod::new("SetSize"),
            copy_to: MockMethod::new("CopyTo"),
            commit: MockMethod::new("Commit"),
            revert: MockMethod::new("Revert"),
            lock_region: MockMethod::new("LockRegion"),
            unlock_region: MockMethod::new("UnlockRegion"),
            stat: MockMethod::new("Stat"),
            clone: MockMethod::new("Clone"),
        }
    }

    pub fn set_strictness(&self, strictness: Strictness) {
        self.add_ref.set_strictness(strictness);
        self.release.set_strictness(strictness);
        self.query_interface.set_strictness(strictness);
        self.read.set_strictness(strictness);
        self.write.set_strictness(strictness);
        self.seek.set_strictness(strictness);
        self.set_size.set_strictness(strictness);
        self.copy_to.set_strictness(strictness);
        self.commit.set_strictness(strictness);
        self.revert.set_strictness(strictness);
        self.lock_region.set_strictness(strictness);
        self.unlock_region.set_strictness(strictness);
        self.stat.set_strictness(strictness);
        self.clone.set_strictness(strictness);
    }

    pub fn read_method(&self) -> &MockMethod<ReadArgs, HResult> {
        &self.read
    }

    pub fn write_method(&self) -> &MockMethod<WriteArgs, HResult> {
        &self.write
    }

    pub fn seek_method(&self) -> &MockMethod<SeekArgs, HResult> {
        &self.seek
    }

    pub fn set_size_method(&self) -> &MockMethod<u64, HResult> {
        &self.set_size
    }

    pub fn copy_to_method(&self) -> &MockMethod<CopyToArgs, HResult> {
        &self.copy_to
    }

    pub fn commit_method(&self) -> &MockMethod<u32, HResult> {
        &self.commit
    }

    pub fn revert_method(&self) -> &MockMethod<(), HResult> {
        &self.revert
    }

    pub fn lock_region_method(&self) -> &MockMethod<RegionArgs, HResult> {
        &self.lock_region
    }

    pub fn unlock_region_method(&self) -> &MockMethod<RegionArgs, HResult> {
        &self.unlock_region
    }

    pub fn stat_method(&self) -> &MockMethod<StatArgs, HResult> {
        &self.stat
    }

    pub fn clone_method(&self) -> &MockMethod<CloneArgs, HResult> {
        &self.clone
    }

    /// Copies the bytes chosen by the action into `buf` and reports how
    /// many were copied through `read`.
    pub fn read(&self, buf: &mut [u8], read: Option<&mut u32>) -> HResult {
        let requested = u32::try_from(buf.len()).unwrap_or(u32::MAX);
        let mut args = ReadArgs {
            requested,
            data: Vec::new(),
        };
        let hr = self.read.call(&mut args);
        let copied = args.data.len().min(buf.len());
        buf[..copied].copy_from_slice(&args.data[..copied]);
        if let Some(read) = read {
            // copied <= requested, which fits in u32
            *read = copied as u32;
        }
        hr
    }

    pub fn write(&self, data: &[u8], written: Option<&mut u32>) -> HResult {
        let mut args = WriteArgs {
            data: data.to_vec(),
            written: u32::try_from(data.len()).unwrap_or(u32::MAX),
        };
        let hr = self.write.call(&mut args);
        if let Some(written) = written {
            *written = args.written;
        }
        hr
    }

    pub fn seek(&self, offset: i64, origin: SeekOrigin, new_position: Option<&mut u64>) -> HResult {
        let mut args = SeekArgs {
            offset,
            origin,
            new_position: 0,
        };
        let hr = self.seek.call(&mut args);
        if let Some(new_position) = new_position {
            *new_position = args.new_position;
        }
        hr
    }

    pub fn set_size(&self, size: u64) -> HResult {
        let mut size = size;
        self.set_size.call(&mut size)
    }

    /// Copies `requested` bytes to `target`, reporting the counts chosen by
    /// the action.
    pub fn copy_to(
        &self,
        target: *mut c_void,
        requested: u64,
        read: Option<&mut u64>,
        written: Option<&mut u64>,
    ) -> HResult {
        let mut args = CopyToArgs {
            target,
            requested,
            read: 0,
            written: 0,
        };
        let hr = self.copy_to.call(&mut args);
        if let Some(read) = read {
            *read = args.read;
        }
        if let Some(written) = written {
            *written = args.written;
        }
        hr
    }

    pub fn commit(&self, flags: u32) -> HResult {
        let mut flags = flags;
        self.commit.call(&mut flags)
    }

    pub fn revert(&self) -> HResult {
        self.revert.call(&mut ())
    }

    pub fn lock_region(&self, offset: u64, length: u64, lock_type: u32) -> HResult {
        self.lock_region.call(&mut RegionArgs {
            offset,
            length,
            lock_type,
        })
    }

    pub fn unlock_region(&self, offset: u64, length: u64, lock_type: u32) -> HResult {
        self.unlock_region.call(&mut RegionArgs {
            offset,
            length,
            lock_type,
        })
    }

    /// Fails with `E_POINTER` when `clone` is `None`. Otherwise stores
    /// whatever the action put in [`CloneArgs::clone`], null by default.
    pub fn clone_stream(&self, clone: Option<&mut *mut c_void>) -> HResult {
        let Some(clone) = clone else {
            return E_POINTER;
        };
        let mut args = CloneArgs {
            clone: ptr::null_mut(),
        };
        let hr = self.clone.call(&mut args);
        *clone = args.clone;
        hr
    }

    /// Fails with `E_POINTER` when `stat` is `None`.
    pub fn stat(&self, stat: Option<&mut StatInfo>, flags: u32) -> HResult {
        let Some(stat) = stat else {
            return E_POINTER;
        };
        let mut args = StatArgs {
            flags,
            stat: StatInfo::default(),
        };
        let hr = self.stat.call(&mut args);
        *stat = args.stat;
        hr
    }

    /// The address handed out by `query_interface`, for comparisons.
    pub fn as_ptr(&self) -> *const c_void {
        self as *const Self as *const c_void
    }
}

impl Default for StreamMock {
    fn default() -> Self {
        Self::new()
    }
}

impl ComMock for StreamMock {
    fn add_ref_method(&self) -> &MockMethod<(), u32> {
        &self.add_ref
    }

    fn release_method(&self) -> &MockMethod<(), u32> {
        &self.release
    }

    fn query_interface_method(&self) -> &MockMethod<QueryInterfaceArgs, HResult> {
        &self.query_interface
    }
}

impl fmt::Debug for StreamMock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamMock")
            .field("read", &self.read)
            .field("write", &self.write)
            .field("seek", &self.seek)
            .field("set_size", &self.set_size)
            .field("copy_to", &self.copy_to)
            .field("commit", &self.commit)
            .field("revert", &self.revert)
            .field("lock_region", &self.lock_region)
            .field("unlock_region", &self.unlock_region)
            .field("stat", &self.stat)
            .field("clone", &self.clone)
            .finish_non_exhaustive()
    }
}
