//! SQLite VFS backed by in-process byte buffers.
//!
//! Each registered [`MemoryVfs`] owns a table of named [`MemoryFile`]s. A
//! connection opened through the VFS reads and writes those buffers directly,
//! so a world database (and its rollback journal) never touches disk. Files
//! outlive the connections that use them until they are deleted, which lets
//! callers preload a database image or snapshot one after writing.
//!
//! The VFS serves one connection at a time: locking is a no-op.

use std::collections::HashMap;
use std::ffi::{c_char, c_int, c_void, CStr, CString};
use std::mem::size_of;
use std::ptr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, OnceLock};

use log::{debug, trace};
use parking_lot::Mutex;
use rusqlite::{ffi, Connection, OpenFlags};

use crate::{QueryError, QueryResult};

const MAX_PATHNAME: c_int = 512;
const SECTOR_SIZE: c_int = 512;

/// One in-memory file.
#[derive(Debug, Default)]
pub struct MemoryFile {
    data: Mutex<Vec<u8>>,
}

impl MemoryFile {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self {
            data: Mutex::new(bytes),
        }
    }

    pub fn len(&self) -> usize {
        self.data.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn snapshot(&self) -> Vec<u8> {
        self.data.lock().clone()
    }

    /// Copies into `buf` from `offset`. Returns the number of bytes that
    /// existed; the rest of `buf` is zero-filled.
    fn read_at(&self, buf: &mut [u8], offset: usize) -> usize {
        let data = self.data.lock();
        let available = data.len().saturating_sub(offset).min(buf.len());
        if available > 0 {
            buf[..available].copy_from_slice(&data[offset..offset + available]);
        }
        buf[available..].fill(0);
        available
    }

    fn write_at(&self, bytes: &[u8], offset: usize) {
        let mut data = self.data.lock();
        let end = offset + bytes.len();
        if data.len() < end {
            data.resize(end, 0);
        }
        data[offset..end].copy_from_slice(bytes);
    }

    fn truncate(&self, size: usize) {
        self.data.lock().resize(size, 0);
    }
}

/// A named, process-registered in-memory VFS.
#[derive(Debug)]
pub struct MemoryVfs {
    name: String,
    c_name: CString,
    files: Mutex<HashMap<String, Arc<MemoryFile>>>,
    temp_counter: AtomicU32,
}

fn registry() -> &'static Mutex<HashMap<String, &'static MemoryVfs>> {
    static REGISTRY: OnceLock<Mutex<HashMap<String, &'static MemoryVfs>>> = OnceLock::new();
    REGISTRY.get_or_init(|| Mutex::new(HashMap::new()))
}

impl MemoryVfs {
    /// Registers (or returns the already registered) VFS called `name`.
    /// Registered VFSs live for the rest of the process.
    pub fn register(name: &str) -> QueryResult<&'static MemoryVfs> {
        let mut registry = registry().lock();
        if let Some(vfs) = registry.get(name) {
            return Ok(vfs);
        }

        let c_name = CString::new(name).map_err(|_| QueryError::vfs("vfs name contains a NUL byte"))?;
        let vfs: &'static MemoryVfs = Box::leak(Box::new(MemoryVfs {
            name: name.to_owned(),
            c_name,
            files: Mutex::new(HashMap::new()),
            temp_counter: AtomicU32::new(0),
        }));

        // SAFETY: `sqlite3_vfs_find(NULL)` returns the default VFS (or null),
        // which stays valid for the life of the process. We copy it by value
        // and override every entry point that touches files; the copied
        // time/randomness/dlopen entry points only use their `vfs` argument
        // for `pAppData`, which the default VFS never reads. The new struct
        // and its name are leaked, so SQLite may hold on to them forever.
        unsafe {
            let default = ffi::sqlite3_vfs_find(ptr::null());
            if default.is_null() {
                return Err(QueryError::vfs("SQLite has no default VFS"));
            }
            let mut raw: ffi::sqlite3_vfs = ptr::read(default);
            raw.iVersion = 2;
            raw.szOsFile = size_of::<MemoryHandle>() as c_int;
            raw.mxPathname = MAX_PATHNAME;
            raw.pNext = ptr::null_mut();
            raw.zName = vfs.c_name.as_ptr();
            raw.pAppData = vfs as *const MemoryVfs as *mut c_void;
            raw.xOpen = Some(x_open);
            raw.xDelete = Some(x_delete);
            raw.xAccess = Some(x_access);
            raw.xFullPathname = Some(x_full_pathname);
            raw.xSetSystemCall = None;
            raw.xGetSystemCall = None;
            raw.xNextSystemCall = None;

            let raw: &'static mut ffi::sqlite3_vfs = Box::leak(Box::new(raw));
            let rc = ffi::sqlite3_vfs_register(raw, 0);
            if rc != ffi::SQLITE_OK {
                return Err(QueryError::vfs(format!("sqlite3_vfs_register failed with code {rc}")));
            }
        }

        debug!("registered in-memory vfs '{name}'");
        registry.insert(name.to_owned(), vfs);
        Ok(vfs)
    }

    /// Looks up a VFS registered earlier in this process.
    pub fn find(name: &str) -> Option<&'static MemoryVfs> {
        registry().lock().get(name).copied()
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Opens a connection to `file` through this VFS.
    pub fn open_connection(&self, file: &str, create: bool) -> QueryResult<Connection> {
        let mut flags = OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_NO_MUTEX;
        if create {
            flags |= OpenFlags::SQLITE_OPEN_CREATE;
        }
        Ok(Connection::open_with_flags_and_vfs(file, flags, &self.name)?)
    }

    /// Preloads (or replaces) a file, typically a database image.
    pub fn insert_file(&self, name: &str, bytes: Vec<u8>) {
        self.files
            .lock()
            .insert(name.to_owned(), Arc::new(MemoryFile::new(bytes)));
    }

    /// Snapshot of a file's current contents.
    pub fn file_bytes(&self, name: &str) -> Option<Vec<u8>> {
        self.files.lock().get(name).map(|file| file.snapshot())
    }

    pub fn contains_file(&self, name: &str) -> bool {
        self.files.lock().contains_key(name)
    }

    pub fn remove_file(&self, name: &str) -> bool {
        self.files.lock().remove(name).is_some()
    }

    pub fn file_names(&self) -> Vec<String> {
        let mut names: Vec<_> = self.files.lock().keys().cloned().collect();
        names.sort();
        names
    }

    fn open_file(&self, name: &str, create: bool) -> Option<Arc<MemoryFile>> {
        let mut files = self.files.lock();
        match files.get(name) {
            Some(file) => Some(Arc::clone(file)),
            None if create => {
                let file = Arc::new(MemoryFile::default());
                files.insert(name.to_owned(), Arc::clone(&file));
                Some(file)
            }
            None => None,
        }
    }

    fn temp_name(&self) -> String {
        let n = self.temp_counter.fetch_add(1, Ordering::Relaxed);
        format!("{}-temp-{n}", self.name)
    }
}

/// Per-open-file state. SQLite allocates `szOsFile` bytes for it and we
/// initialise it in place, so the base struct must come first.
#[repr(C)]
struct MemoryHandle {
    base: ffi::sqlite3_file,
    vfs: &'static MemoryVfs,
    file: Arc<MemoryFile>,
    name: String,
    delete_on_close: bool,
}

static IO_METHODS: ffi::sqlite3_io_methods = ffi::sqlite3_io_methods {
    iVersion: 1,
    xClose: Some(x_close),
    xRead: Some(x_read),
    xWrite: Some(x_write),
    xTruncate: Some(x_truncate),
    xSync: Some(x_sync),
    xFileSize: Some(x_file_size),
    xLock: Some(x_lock),
    xUnlock: Some(x_unlock),
    xCheckReservedLock: Some(x_check_reserved_lock),
    xFileControl: Some(x_file_control),
    xSectorSize: Some(x_sector_size),
    xDeviceCharacteristics: Some(x_device_characteristics),
    xShmMap: None,
    xShmLock: None,
    xShmBarrier: None,
    xShmUnmap: None,
    xFetch: None,
    xUnfetch: None,
};

unsafe fn app_data(vfs: *mut ffi::sqlite3_vfs) -> &'static MemoryVfs {
    // SAFETY: `pAppData` was set to a leaked `&'static MemoryVfs` at registration.
    &*((*vfs).pAppData as *const MemoryVfs)
}

unsafe fn handle<'a>(file: *mut ffi::sqlite3_file) -> &'a MemoryHandle {
    // SAFETY: SQLite only calls io methods on files `x_open` initialised.
    &*(file as *const MemoryHandle)
}

unsafe fn name_of(z_name: *const c_char) -> Option<String> {
    if z_name.is_null() {
        None
    } else {
        Some(CStr::from_ptr(z_name).to_string_lossy().into_owned())
    }
}

unsafe extern "C" fn x_open(
    vfs: *mut ffi::sqlite3_vfs,
    z_name: *const c_char,
    file: *mut ffi::sqlite3_file,
    flags: c_int,
    out_flags: *mut c_int,
) -> c_int {
    let memory = app_data(vfs);
    // A null method table tells SQLite not to call xClose on failure.
    (*file).pMethods = ptr::null();

    let name = name_of(z_name).unwrap_or_else(|| memory.temp_name());
    let create = flags & ffi::SQLITE_OPEN_CREATE != 0;
    let Some(data) = memory.open_file(&name, create) else {
        trace!("vfs '{}': '{name}' does not exist", memory.name);
        return ffi::SQLITE_CANTOPEN;
    };

    let handle = MemoryHandle {
        base: ffi::sqlite3_file {
            pMethods: &IO_METHODS,
        },
        vfs: memory,
        file: data,
        name,
        delete_on_close: flags & ffi::SQLITE_OPEN_DELETEONCLOSE != 0,
    };
    // SAFETY: SQLite hands us `szOsFile` bytes, suitably aligned, which is
    // exactly `size_of::<MemoryHandle>()`.
    ptr::write(file as *mut MemoryHandle, handle);
    if !out_flags.is_null() {
        *out_flags = flags;
    }
    ffi::SQLITE_OK
}

unsafe extern "C" fn x_delete(vfs: *mut ffi::sqlite3_vfs, z_name: *const c_char, _sync_dir: c_int) -> c_int {
    let memory = app_data(vfs);
    if let Some(name) = name_of(z_name) {
        memory.remove_file(&name);
    }
    ffi::SQLITE_OK
}

unsafe extern "C" fn x_access(
    vfs: *mut ffi::sqlite3_vfs,
    z_name: *const c_char,
    _flags: c_int,
    res_out: *mut c_int,
) -> c_int {
    let memory = app_data(vfs);
    let exists = name_of(z_name).is_some_and(|name| memory.contains_file(&name));
    *res_out = c_int::from(exists);
    ffi::SQLITE_OK
}

unsafe extern "C" fn x_full_pathname(
    _vfs: *mut ffi::sqlite3_vfs,
    z_name: *const c_char,
    n_out: c_int,
    z_out: *mut c_char,
) -> c_int {
    let name = CStr::from_ptr(z_name).to_bytes_with_nul();
    if name.len() > n_out as usize {
        return ffi::SQLITE_CANTOPEN;
    }
    ptr::copy_nonoverlapping(name.as_ptr() as *const c_char, z_out, name.len());
    ffi::SQLITE_OK
}

unsafe extern "C" fn x_close(file: *mut ffi::sqlite3_file) -> c_int {
    let memory_handle = file as *mut MemoryHandle;
    if (*memory_handle).delete_on_close {
        (*memory_handle).vfs.remove_file(&(*memory_handle).name);
    }
    // SAFETY: written by `x_open`; SQLite calls xClose exactly once.
    ptr::drop_in_place(memory_handle);
    (*file).pMethods = ptr::null();
    ffi::SQLITE_OK
}

unsafe extern "C" fn x_read(
    file: *mut ffi::sqlite3_file,
    buf: *mut c_void,
    amount: c_int,
    offset: ffi::sqlite3_int64,
) -> c_int {
    let handle = handle(file);
    let buf = std::slice::from_raw_parts_mut(buf as *mut u8, amount as usize);
    if handle.file.read_at(buf, offset as usize) < buf.len() {
        return ffi::SQLITE_IOERR_SHORT_READ;
    }
    ffi::SQLITE_OK
}

unsafe extern "C" fn x_write(
    file: *mut ffi::sqlite3_file,
    buf: *const c_void,
    amount: c_int,
    offset: ffi::sqlite3_int64,
) -> c_int {
    let handle = handle(file);
    let bytes = std::slice::from_raw_parts(buf as *const u8, amount as usize);
    handle.file.write_at(bytes, offset as usize);
    ffi::SQLITE_OK
}

unsafe extern "C" fn x_truncate(file: *mut ffi::sqlite3_file, size: ffi::sqlite3_int64) -> c_int {
    handle(file).file.truncate(size as usize);
    ffi::SQLITE_OK
}

unsafe extern "C" fn x_sync(_file: *mut ffi::sqlite3_file, _flags: c_int) -> c_int {
    ffi::SQLITE_OK
}

unsafe extern "C" fn x_file_size(file: *mut ffi::sqlite3_file, size: *mut ffi::sqlite3_int64) -> c_int {
    *size = handle(file).file.len() as ffi::sqlite3_int64;
    ffi::SQLITE_OK
}

unsafe extern "C" fn x_lock(_file: *mut ffi::sqlite3_file, _level: c_int) -> c_int {
    ffi::SQLITE_OK
}

unsafe extern "C" fn x_unlock(_file: *mut ffi::sqlite3_file, _level: c_int) -> c_int {
    ffi::SQLITE_OK
}

unsafe extern "C" fn x_check_reserved_lock(_file: *mut ffi::sqlite3_file, res_out: *mut c_int) -> c_int {
    *res_out = 0;
    ffi::SQLITE_OK
}

unsafe extern "C" fn x_file_control(_file: *mut ffi::sqlite3_file, _op: c_int, _arg: *mut c_void) -> c_int {
    ffi::SQLITE_NOTFOUND
}

unsafe extern "C" fn x_sector_size(_file: *mut ffi::sqlite3_file) -> c_int {
    SECTOR_SIZE
}

unsafe extern "C" fn x_device_characteristics(_file: *mut ffi::sqlite3_file) -> c_int {
    0
}
