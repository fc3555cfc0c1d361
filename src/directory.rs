use crate::io_helper::{SharedBytes, SharedInputStream};
use crate::Error;
use fs2::FileExt;
use memmap::MmapOptions;
use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufWriter, Read, Write};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// A read-only window over one file: base offset plus length.
/// Many logical files can live inside one physical container this way.
#[derive(Debug, Clone)]
pub struct FileSlice {
    source: SharedBytes,
    start: usize,
    end: usize,
}

impl FileSlice {
    pub fn new(source: SharedBytes) -> Self {
        let end = source.len();
        Self {
            source,
            start: 0,
            end,
        }
    }
    pub fn len(&self) -> usize {
        self.end - self.start
    }
    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }
    pub fn as_bytes(&self) -> &[u8] {
        &self.source[self.start..self.end]
    }
    /// A narrower window; offsets are relative to this slice.
    pub fn slice(&self, start: usize, end: usize) -> FileSlice {
        debug_assert!(start <= end);
        debug_assert!(self.start + end <= self.end);
        FileSlice {
            source: self.source.clone(),
            start: self.start + start,
            end: self.start + end,
        }
    }
    pub fn stream(&self) -> SharedInputStream {
        SharedInputStream::new(self.source.clone(), self.start, self.end)
    }
}

/// Sink for building one file; `finish` flushes and makes the bytes durable.
pub trait IndexOutput: Write {
    fn finish(&mut self) -> Result<(), Error>;
}

/// Held for the lifetime of a writer; releases its lock on drop.
pub trait DirLock: Send {}

/// Named append-only files with atomic rename; the only storage contract
/// the engine needs.
pub trait Directory: Send + Sync {
    fn create(&self, name: &str) -> Result<Box<dyn IndexOutput>, Error>;
    fn open(&self, name: &str) -> Result<FileSlice, Error>;
    fn list(&self) -> Result<Vec<String>, Error>;
    fn delete(&self, name: &str) -> Result<(), Error>;
    fn exists(&self, name: &str) -> bool;
    /// The commit primitive: atomic within the directory.
    fn atomic_rename(&self, from: &str, to: &str) -> Result<(), Error>;
    /// Make directory metadata (renames, deletes) durable.
    fn sync_dir(&self) -> Result<(), Error>;
    fn acquire_lock(&self, name: &str, timeout_ms: u64) -> Result<Box<dyn DirLock>, Error>;
}

/// Footer on every immutable segment file: payload length, crc32, magic.
const FOOTER_LEN: usize = 8 + 4 + 8;

/// Wraps an output, maintaining a running checksum; `seal` stamps the footer
/// and makes the file durable.
pub struct ChecksumOutput {
    inner: Box<dyn IndexOutput>,
    hasher: crc32fast::Hasher,
    written: u64,
}

impl ChecksumOutput {
    pub fn new(inner: Box<dyn IndexOutput>) -> Self {
        Self {
            inner,
            hasher: crc32fast::Hasher::new(),
            written: 0,
        }
    }
    pub fn tell(&self) -> u64 {
        self.written
    }
    pub fn seal(mut self, magic: u64) -> Result<(), Error> {
        let crc = self.hasher.clone().finalize();
        let len = self.written;
        self.inner.write_all(&len.to_be_bytes())?;
        self.inner.write_all(&crc.to_be_bytes())?;
        self.inner.write_all(&magic.to_be_bytes())?;
        self.inner.finish()
    }
}

impl Write for ChecksumOutput {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.inner.write(buf)?;
        self.hasher.update(&buf[..n]);
        self.written += n as u64;
        Ok(n)
    }
    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

/// Validate a file's footer and hand back the payload window.
pub fn checked_payload(slice: &FileSlice, magic: u64) -> Result<FileSlice, Error> {
    use std::convert::TryInto;
    if slice.len() < FOOTER_LEN {
        return Err(Error::Corrupt("file shorter than its footer".into()));
    }
    let bytes = slice.as_bytes();
    let footer = &bytes[bytes.len() - FOOTER_LEN..];
    let len = u64::from_be_bytes(footer[0..8].try_into().unwrap()) as usize;
    let crc = u32::from_be_bytes(footer[8..12].try_into().unwrap());
    let found_magic = u64::from_be_bytes(footer[12..20].try_into().unwrap());
    if found_magic != magic {
        return Err(Error::Corrupt(format!(
            "bad magic: {:x} != {:x}",
            found_magic, magic
        )));
    }
    if len != slice.len() - FOOTER_LEN {
        return Err(Error::Corrupt("payload length disagrees with file".into()));
    }
    let mut hasher = crc32fast::Hasher::new();
    hasher.update(&bytes[..len]);
    if hasher.finalize() != crc {
        return Err(Error::Corrupt("checksum mismatch".into()));
    }
    Ok(slice.slice(0, len))
}

// ---------------------------------------------------------------------------
// Filesystem-backed implementation.

pub struct FsDirectory {
    root: PathBuf,
    use_mmap: bool,
}

struct FsOutput {
    writer: BufWriter<File>,
}

impl Write for FsOutput {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.writer.write(buf)
    }
    fn flush(&mut self) -> io::Result<()> {
        self.writer.flush()
    }
}

impl IndexOutput for FsOutput {
    fn finish(&mut self) -> Result<(), Error> {
        self.writer.flush()?;
        self.writer.get_ref().sync_all()?;
        Ok(())
    }
}

struct FsLock {
    file: File,
    path: PathBuf,
}
impl DirLock for FsLock {}
impl Drop for FsLock {
    fn drop(&mut self) {
        let _ = self.file.unlock();
        let _ = fs::remove_file(&self.path);
    }
}

impl FsDirectory {
    pub fn open(root: impl Into<PathBuf>, use_mmap: bool) -> Result<Self, Error> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        Ok(Self { root, use_mmap })
    }
    fn resolve(&self, name: &str) -> PathBuf {
        self.root.join(name)
    }
}

impl Directory for FsDirectory {
    fn create(&self, name: &str) -> Result<Box<dyn IndexOutput>, Error> {
        let file = File::create(self.resolve(name))?;
        Ok(Box::new(FsOutput {
            writer: BufWriter::new(file),
        }))
    }

    fn open(&self, name: &str) -> Result<FileSlice, Error> {
        let path = self.resolve(name);
        let mut file = File::open(&path).map_err(|e| {
            if e.kind() == io::ErrorKind::NotFound {
                Error::NotFound
            } else {
                Error::IO(e)
            }
        })?;
        let source = if self.use_mmap && file.metadata()?.len() > 0 {
            let mmap = unsafe { MmapOptions::new().map(&file)? };
            SharedBytes::Mapped(Arc::new(mmap))
        } else {
            let mut data = Vec::new();
            file.read_to_end(&mut data)?;
            SharedBytes::Heap(Arc::new(data))
        };
        Ok(FileSlice::new(source))
    }

    fn list(&self) -> Result<Vec<String>, Error> {
        let mut names = Vec::new();
        for entry in fs::read_dir(&self.root)? {
            let entry = entry?;
            if let Some(name) = entry.file_name().to_str() {
                names.push(name.to_string());
            }
        }
        names.sort();
        Ok(names)
    }

    fn delete(&self, name: &str) -> Result<(), Error> {
        fs::remove_file(self.resolve(name))?;
        Ok(())
    }

    fn exists(&self, name: &str) -> bool {
        self.resolve(name).exists()
    }

    fn atomic_rename(&self, from: &str, to: &str) -> Result<(), Error> {
        fs::rename(self.resolve(from), self.resolve(to))?;
        Ok(())
    }

    fn sync_dir(&self) -> Result<(), Error> {
        // Windows cannot open a directory handle; rename durability is
        // already as good as it gets there.
        #[cfg(unix)]
        {
            File::open(&self.root)?.sync_all()?;
        }
        Ok(())
    }

    fn acquire_lock(&self, name: &str, timeout_ms: u64) -> Result<Box<dyn DirLock>, Error> {
        let path = self.resolve(name);
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .open(&path)?;
        let deadline = Instant::now() + Duration::from_millis(timeout_ms);
        loop {
            match file.try_lock_exclusive() {
                Ok(()) => {
                    return Ok(Box::new(FsLock { file, path }));
                }
                Err(_) if Instant::now() < deadline => {
                    std::thread::sleep(Duration::from_millis(10));
                }
                Err(_) => return Err(Error::Locked),
            }
        }
    }
}

// ---------------------------------------------------------------------------
// In-memory implementation for tests.

#[derive(Default)]
struct RamInner {
    files: BTreeMap<String, Arc<Vec<u8>>>,
    locks: BTreeMap<String, ()>,
}

#[derive(Clone, Default)]
pub struct RamDirectory {
    inner: Arc<Mutex<RamInner>>,
}

struct RamOutput {
    dir: Arc<Mutex<RamInner>>,
    name: String,
    buffer: Vec<u8>,
}

impl Write for RamOutput {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.buffer.extend_from_slice(buf);
        Ok(buf.len())
    }
    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl IndexOutput for RamOutput {
    fn finish(&mut self) -> Result<(), Error> {
        let mut inner = self.dir.lock().unwrap();
        let data = std::mem::replace(&mut self.buffer, Vec::new());
        inner.files.insert(self.name.clone(), Arc::new(data));
        Ok(())
    }
}

struct RamLock {
    dir: Arc<Mutex<RamInner>>,
    name: String,
}
impl DirLock for RamLock {}
impl Drop for RamLock {
    fn drop(&mut self) {
        self.dir.lock().unwrap().locks.remove(&self.name);
    }
}

impl RamDirectory {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Directory for RamDirectory {
    fn create(&self, name: &str) -> Result<Box<dyn IndexOutput>, Error> {
        Ok(Box::new(RamOutput {
            dir: self.inner.clone(),
            name: name.to_string(),
            buffer: Vec::new(),
        }))
    }

    fn open(&self, name: &str) -> Result<FileSlice, Error> {
        let inner = self.inner.lock().unwrap();
        let data = inner.files.get(name).ok_or(Error::NotFound)?;
        Ok(FileSlice::new(SharedBytes::Heap(data.clone())))
    }

    fn list(&self) -> Result<Vec<String>, Error> {
        let inner = self.inner.lock().unwrap();
        Ok(inner.files.keys().cloned().collect())
    }

    fn delete(&self, name: &str) -> Result<(), Error> {
        let mut inner = self.inner.lock().unwrap();
        inner.files.remove(name).ok_or(Error::NotFound)?;
        Ok(())
    }

    fn exists(&self, name: &str) -> bool {
        self.inner.lock().unwrap().files.contains_key(name)
    }

    fn atomic_rename(&self, from: &str, to: &str) -> Result<(), Error> {
        let mut inner = self.inner.lock().unwrap();
        let data = inner.files.remove(from).ok_or(Error::NotFound)?;
        inner.files.insert(to.to_string(), data);
        Ok(())
    }

    fn sync_dir(&self) -> Result<(), Error> {
        Ok(())
    }

    fn acquire_lock(&self, name: &str, _timeout_ms: u64) -> Result<Box<dyn DirLock>, Error> {
        let mut inner = self.inner.lock().unwrap();
        if inner.locks.contains_key(name) {
            return Err(Error::Locked);
        }
        inner.locks.insert(name.to_string(), ());
        Ok(Box::new(RamLock {
            dir: self.inner.clone(),
            name: name.to_string(),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn exercise(dir: &dyn Directory) {
        let mut out = dir.create("a.tmp").unwrap();
        out.write_all(b"hello world").unwrap();
        out.finish().unwrap();

        dir.atomic_rename("a.tmp", "a").unwrap();
        assert!(dir.exists("a"));
        assert!(!dir.exists("a.tmp"));

        let slice = dir.open("a").unwrap();
        assert_eq!(slice.as_bytes(), b"hello world");
        let world = slice.slice(6, 11);
        assert_eq!(world.as_bytes(), b"world");

        dir.delete("a").unwrap();
        assert!(!dir.exists("a"));
        match dir.open("a").map(|_| ()) {
            Err(Error::NotFound) => {}
            other => panic!("expected NotFound, got {:?}", other.is_ok()),
        }
    }

    #[test]
    fn ram_directory_files() {
        exercise(&RamDirectory::new());
    }

    #[test]
    fn fs_directory_files() {
        let tmp = TempDir::new().unwrap();
        let dir = FsDirectory::open(tmp.path(), true).unwrap();
        exercise(&dir);
    }

    #[test]
    fn checksum_footer_round_trip() {
        const MAGIC: u64 = 0x6775_7374_7465_7374;
        let dir = RamDirectory::new();
        let mut out = ChecksumOutput::new(dir.create("x").unwrap());
        out.write_all(b"some payload bytes").unwrap();
        out.seal(MAGIC).unwrap();

        let slice = dir.open("x").unwrap();
        let payload = checked_payload(&slice, MAGIC).unwrap();
        assert_eq!(payload.as_bytes(), b"some payload bytes");

        // wrong magic:
        assert!(checked_payload(&slice, MAGIC + 1).is_err());

        // flipped payload byte:
        let mut bytes = slice.as_bytes().to_vec();
        bytes[3] ^= 0xff;
        let mut out = dir.create("y").unwrap();
        out.write_all(&bytes).unwrap();
        out.finish().unwrap();
        match checked_payload(&dir.open("y").unwrap(), MAGIC) {
            Err(Error::Corrupt(_)) => {}
            _ => panic!("corruption should be caught"),
        }
    }

    #[test]
    fn ram_lock_is_exclusive() {
        let dir = RamDirectory::new();
        let held = dir.acquire_lock("write.lock", 0).unwrap();
        match dir.acquire_lock("write.lock", 0) {
            Err(Error::Locked) => {}
            _ => panic!("second lock should fail"),
        }
        drop(held);
        let _again = dir.acquire_lock("write.lock", 0).unwrap();
    }

    #[test]
    fn fs_lock_is_exclusive() {
        let tmp = TempDir::new().unwrap();
        let dir = FsDirectory::open(tmp.path(), false).unwrap();
        let held = dir.acquire_lock("write.lock", 0).unwrap();
        match dir.acquire_lock("write.lock", 0) {
            Err(Error::Locked) => {}
            _ => panic!("second lock should fail"),
        }
        drop(held);
        let _again = dir.acquire_lock("write.lock", 50).unwrap();
    }
}
