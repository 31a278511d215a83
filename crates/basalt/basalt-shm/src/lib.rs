use memmap2::{Mmap, MmapMut};
use std::{
    fs::{File, OpenOptions},
    io,
    path::Path,
};

/// Read-write mapping of a file-backed shared region.
///
/// The mapping (and therefore every pointer handed out by [`base_ptr`])
/// stays valid until this handle is dropped. Ring handles borrow the
/// region rather than own it, so the mapping outlives all of them.
///
/// [`base_ptr`]: ShmRegionMut::base_ptr
pub struct ShmRegionMut {
    _file: File,
    mmap: MmapMut,
}

/// Read-only mapping of an existing shared region.
pub struct ShmRegion {
    _file: File,
    mmap: Mmap,
}

impl ShmRegionMut {
    /// Create (or truncate) the file at `path`, size it to `size_bytes`
    /// and map it read-write. The fresh mapping is zero-filled.
    pub fn create_rw<P: AsRef<Path>>(path: P, size_bytes: u64) -> io::Result<Self> {
        if size_bytes == 0 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "shared region size must be nonzero",
            ));
        }
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(true)
            .open(path)?;
        file.set_len(size_bytes)?;

        let mmap = unsafe { MmapMut::map_mut(&file)? };
        Ok(Self { _file: file, mmap })
    }

    /// Open an existing file and map it read-write at its current length.
    pub fn open_rw<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        let file = OpenOptions::new().read(true).write(true).open(path)?;

        let mmap = unsafe { MmapMut::map_mut(&file)? };
        Ok(Self { _file: file, mmap })
    }

    /// Base pointer of the mapped region.
    ///
    /// Takes `&self`: several producer handles may attach through one
    /// mapping concurrently, and all mutation behind the pointer goes
    /// through atomics or interior mutability in the ring layout.
    #[inline]
    pub fn base_ptr(&self) -> *mut u8 {
        self.mmap.as_ptr() as *mut u8
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.mmap.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.mmap.len() == 0
    }
}

impl ShmRegion {
    /// Open an existing file and map it read-only.
    pub fn open_ro<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        let file = OpenOptions::new().read(true).open(path)?;

        let mmap = unsafe { Mmap::map(&file)? };
        Ok(Self { _file: file, mmap })
    }

    #[inline]
    pub fn as_ptr(&self) -> *const u8 {
        self.mmap.as_ptr()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.mmap.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.mmap.len() == 0
    }
}
