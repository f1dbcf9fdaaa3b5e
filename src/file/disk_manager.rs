use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;

use parking_lot::Mutex;
use tracing::{error, warn};

use super::error::{FileError, FileResult};
use super::{PageId, PAGE_SIZE};

/// Magic number identifying a database file
const MAGIC_NUMBER: u32 = 0xDEAD_BEEF;

/// The header page occupies slot 0 and is never handed out
pub const HEADER_PAGE_ID: PageId = 0;

/// Fixed header fields: magic + page count + free list length
const HEADER_FIXED_SIZE: usize = 12;

/// How many free-list entries fit in the header page
const MAX_FREE_LIST_LEN: usize = (PAGE_SIZE - HEADER_FIXED_SIZE) / 4;

/// Owns the database file and the bookkeeping of which page ids are live.
///
/// Pages are allocated from a LIFO free list (or by extending the file) and
/// recycled back onto it. The free list and page count are persisted in the
/// header page, rewritten on clean shutdown.
pub struct DiskManager {
    inner: Mutex<DiskInner>,
}

struct DiskInner {
    file: File,
    page_count: u32,
    free_list: Vec<PageId>,
}

impl DiskManager {
    /// Create or open the database file at `path`.
    ///
    /// A fresh file gets a header page with `page_count = 1` and an empty
    /// free list. An existing file has its header validated and loaded.
    pub fn open<P: AsRef<Path>>(path: P) -> FileResult<Self> {
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(path.as_ref())?;

        let len = file.metadata()?.len();
        let (page_count, free_list) = if len == 0 {
            Self::initialize_header(&mut file)?;
            (1, Vec::new())
        } else {
            Self::read_header(&mut file)?
        };

        Ok(Self {
            inner: Mutex::new(DiskInner {
                file,
                page_count,
                free_list,
            }),
        })
    }

    /// Read page `page_id` into `buf` (must be exactly [`PAGE_SIZE`] bytes).
    ///
    /// A page that was allocated but never written reads back as zeros. The
    /// page id stored in the header is compared with the requested id; a
    /// mismatch is logged but not an error (the header page is exempt).
    pub fn read_page(&self, page_id: PageId, buf: &mut [u8]) -> FileResult<()> {
        if buf.len() != PAGE_SIZE {
            return Err(FileError::InvalidPageSize {
                expected: PAGE_SIZE,
                actual: buf.len(),
            });
        }

        let mut inner = self.inner.lock();
        if page_id >= inner.page_count {
            return Err(FileError::OutOfRange {
                page_id,
                page_count: inner.page_count,
            });
        }

        inner.file.seek(SeekFrom::Start(file_offset(page_id)))?;

        // Read as much as the file holds; the tail of a page past EOF is zeros
        let mut read = 0;
        while read < PAGE_SIZE {
            let n = inner.file.read(&mut buf[read..])?;
            if n == 0 {
                break;
            }
            read += n;
        }
        buf[read..].fill(0);

        let stored = u32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]);
        if stored != page_id && page_id != HEADER_PAGE_ID {
            warn!(page_id, stored, "page id mismatch on read");
        }

        Ok(())
    }

    /// Write `buf` (must be exactly [`PAGE_SIZE`] bytes) as page `page_id`.
    ///
    /// Writing past the current page count extends the file and raises the
    /// count. Data is handed to the OS but not synced; see [`Self::flush`].
    pub fn write_page(&self, page_id: PageId, buf: &[u8]) -> FileResult<()> {
        if buf.len() != PAGE_SIZE {
            return Err(FileError::InvalidPageSize {
                expected: PAGE_SIZE,
                actual: buf.len(),
            });
        }

        let mut inner = self.inner.lock();
        inner.file.seek(SeekFrom::Start(file_offset(page_id)))?;
        inner.file.write_all(buf)?;

        if page_id >= inner.page_count {
            inner.page_count = page_id + 1;
        }

        Ok(())
    }

    /// Hand out a page id: the free-list tail if one exists, else a fresh id
    /// at the end of the file. Performs no I/O.
    pub fn allocate_page(&self) -> PageId {
        let mut inner = self.inner.lock();
        match inner.free_list.pop() {
            Some(page_id) => page_id,
            None => {
                let page_id = inner.page_count;
                inner.page_count += 1;
                page_id
            }
        }
    }

    /// Return `page_id` to the free list for reuse.
    ///
    /// The header page is immortal and ids past the current page count (or
    /// already on the free list) are rejected.
    pub fn deallocate_page(&self, page_id: PageId) -> FileResult<()> {
        let mut inner = self.inner.lock();

        if page_id == HEADER_PAGE_ID {
            return Err(FileError::InvalidArgument(
                "cannot deallocate the header page".to_string(),
            ));
        }
        if page_id >= inner.page_count {
            return Err(FileError::OutOfRange {
                page_id,
                page_count: inner.page_count,
            });
        }
        if inner.free_list.contains(&page_id) {
            return Err(FileError::InvalidArgument(format!(
                "page {page_id} is already on the free list"
            )));
        }

        inner.free_list.push(page_id);
        Ok(())
    }

    /// Sync the file to stable storage
    pub fn flush(&self) -> FileResult<()> {
        let inner = self.inner.lock();
        inner.file.sync_data()?;
        Ok(())
    }

    /// Number of page slots in the file, including the header page
    pub fn page_count(&self) -> u32 {
        self.inner.lock().page_count
    }

    /// Number of entries currently on the free list
    pub fn free_list_len(&self) -> usize {
        self.inner.lock().free_list.len()
    }

    /// Whether `page_id` is currently on the free list
    pub fn is_free(&self, page_id: PageId) -> bool {
        self.inner.lock().free_list.contains(&page_id)
    }

    fn initialize_header(file: &mut File) -> FileResult<()> {
        let mut buf = [0u8; PAGE_SIZE];
        buf[0..4].copy_from_slice(&MAGIC_NUMBER.to_le_bytes());
        buf[4..8].copy_from_slice(&1u32.to_le_bytes()); // page_count: header only
        buf[8..12].copy_from_slice(&0u32.to_le_bytes()); // empty free list

        file.seek(SeekFrom::Start(0))?;
        file.write_all(&buf)?;
        file.sync_data()?;
        Ok(())
    }

    fn read_header(file: &mut File) -> FileResult<(u32, Vec<PageId>)> {
        let mut buf = [0u8; PAGE_SIZE];
        file.seek(SeekFrom::Start(0))?;

        let mut read = 0;
        while read < PAGE_SIZE {
            let n = file.read(&mut buf[read..])?;
            if n == 0 {
                break;
            }
            read += n;
        }

        let magic = u32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]);
        if magic != MAGIC_NUMBER {
            return Err(FileError::BadFormat(magic));
        }

        let page_count = u32::from_le_bytes([buf[4], buf[5], buf[6], buf[7]]);
        let stored_len = u32::from_le_bytes([buf[8], buf[9], buf[10], buf[11]]) as usize;
        let free_list_len = if stored_len > MAX_FREE_LIST_LEN {
            warn!(stored_len, "free list length exceeds header capacity, clamping");
            MAX_FREE_LIST_LEN
        } else {
            stored_len
        };

        let mut free_list = Vec::with_capacity(free_list_len);
        for i in 0..free_list_len {
            let off = HEADER_FIXED_SIZE + i * 4;
            free_list.push(u32::from_le_bytes([
                buf[off],
                buf[off + 1],
                buf[off + 2],
                buf[off + 3],
            ]));
        }

        Ok((page_count, free_list))
    }

    fn write_header(inner: &mut DiskInner) -> FileResult<()> {
        let mut buf = [0u8; PAGE_SIZE];
        buf[0..4].copy_from_slice(&MAGIC_NUMBER.to_le_bytes());
        buf[4..8].copy_from_slice(&inner.page_count.to_le_bytes());

        if inner.free_list.len() > MAX_FREE_LIST_LEN {
            // Overflowing entries are leaked, not corrupted
            warn!(
                free_list_len = inner.free_list.len(),
                "free list does not fit the header page, dropping the excess"
            );
            inner.free_list.truncate(MAX_FREE_LIST_LEN);
        }

        buf[8..12].copy_from_slice(&(inner.free_list.len() as u32).to_le_bytes());
        for (i, page_id) in inner.free_list.iter().enumerate() {
            let off = HEADER_FIXED_SIZE + i * 4;
            buf[off..off + 4].copy_from_slice(&page_id.to_le_bytes());
        }

        inner.file.seek(SeekFrom::Start(0))?;
        inner.file.write_all(&buf)?;
        inner.file.sync_data()?;
        Ok(())
    }
}

impl Drop for DiskManager {
    fn drop(&mut self) {
        // Persist page count and free list for the next open
        let mut inner = self.inner.lock();
        if let Err(e) = Self::write_header(&mut inner) {
            error!("failed to write header page on close: {e}");
        }
    }
}

fn file_offset(page_id: PageId) -> u64 {
    page_id as u64 * PAGE_SIZE as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn setup() -> (TempDir, DiskManager) {
        let temp_dir = tempfile::tempdir().unwrap();
        let disk = DiskManager::open(temp_dir.path().join("test.db")).unwrap();
        (temp_dir, disk)
    }

    fn page_with_id(page_id: PageId, fill: u8) -> Vec<u8> {
        let mut buf = vec![fill; PAGE_SIZE];
        buf[0..4].copy_from_slice(&page_id.to_le_bytes());
        buf
    }

    #[test]
    fn test_open_creates_header() {
        let (_temp_dir, disk) = setup();
        assert_eq!(disk.page_count(), 1);
        assert_eq!(disk.free_list_len(), 0);
    }

    #[test]
    fn test_open_rejects_bad_magic() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("garbage.db");
        std::fs::write(&path, vec![0x42u8; PAGE_SIZE]).unwrap();

        let result = DiskManager::open(&path);
        assert!(matches!(result, Err(FileError::BadFormat(_))));
    }

    #[test]
    fn test_write_read_round_trip() {
        let (_temp_dir, disk) = setup();

        let page_id = disk.allocate_page();
        let buf = page_with_id(page_id, 0xCD);
        disk.write_page(page_id, &buf).unwrap();

        let mut out = vec![0u8; PAGE_SIZE];
        disk.read_page(page_id, &mut out).unwrap();
        assert_eq!(out, buf);
    }

    #[test]
    fn test_read_out_of_range() {
        let (_temp_dir, disk) = setup();

        let mut buf = vec![0u8; PAGE_SIZE];
        let result = disk.read_page(99, &mut buf);
        assert!(matches!(result, Err(FileError::OutOfRange { .. })));
    }

    #[test]
    fn test_read_never_written_page_is_zeroed() {
        let (_temp_dir, disk) = setup();

        // Allocated but never written: the file was not extended
        let page_id = disk.allocate_page();
        let mut buf = vec![0xFFu8; PAGE_SIZE];
        disk.read_page(page_id, &mut buf).unwrap();
        assert!(buf.iter().all(|&b| b == 0));
    }

    #[test]
    fn test_write_raises_page_count() {
        let (_temp_dir, disk) = setup();

        disk.write_page(5, &page_with_id(5, 0)).unwrap();
        assert_eq!(disk.page_count(), 6);
    }

    #[test]
    fn test_allocate_extends_file() {
        let (_temp_dir, disk) = setup();

        assert_eq!(disk.allocate_page(), 1);
        assert_eq!(disk.allocate_page(), 2);
        assert_eq!(disk.page_count(), 3);
    }

    #[test]
    fn test_deallocate_lifo_reuse() {
        let (_temp_dir, disk) = setup();

        let a = disk.allocate_page();
        let b = disk.allocate_page();
        disk.deallocate_page(a).unwrap();
        disk.deallocate_page(b).unwrap();

        // LIFO: the most recently freed page comes back first
        assert_eq!(disk.allocate_page(), b);
        assert_eq!(disk.allocate_page(), a);
    }

    #[test]
    fn test_deallocate_header_page_rejected() {
        let (_temp_dir, disk) = setup();

        let result = disk.deallocate_page(HEADER_PAGE_ID);
        assert!(matches!(result, Err(FileError::InvalidArgument(_))));
    }

    #[test]
    fn test_deallocate_out_of_range() {
        let (_temp_dir, disk) = setup();

        let result = disk.deallocate_page(7);
        assert!(matches!(result, Err(FileError::OutOfRange { .. })));
    }

    #[test]
    fn test_double_deallocate_rejected() {
        let (_temp_dir, disk) = setup();

        let page_id = disk.allocate_page();
        disk.deallocate_page(page_id).unwrap();
        let result = disk.deallocate_page(page_id);
        assert!(matches!(result, Err(FileError::InvalidArgument(_))));
    }

    #[test]
    fn test_close_reopen_preserves_metadata() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("test.db");

        let freed;
        {
            let disk = DiskManager::open(&path).unwrap();
            let a = disk.allocate_page();
            let b = disk.allocate_page();
            disk.write_page(a, &page_with_id(a, 0x11)).unwrap();
            disk.write_page(b, &page_with_id(b, 0x22)).unwrap();
            disk.deallocate_page(b).unwrap();
            freed = b;
            // Drop rewrites the header page
        }

        let disk = DiskManager::open(&path).unwrap();
        assert_eq!(disk.page_count(), 3);
        assert_eq!(disk.free_list_len(), 1);
        assert!(disk.is_free(freed));

        let mut buf = vec![0u8; PAGE_SIZE];
        disk.read_page(1, &mut buf).unwrap();
        assert!(buf[4..].iter().all(|&b| b == 0x11));
    }

    #[test]
    fn test_invalid_buffer_size() {
        let (_temp_dir, disk) = setup();

        let mut small = vec![0u8; PAGE_SIZE - 1];
        let result = disk.read_page(0, &mut small);
        assert!(matches!(result, Err(FileError::InvalidPageSize { .. })));

        let large = vec![0u8; PAGE_SIZE + 1];
        let result = disk.write_page(0, &large);
        assert!(matches!(result, Err(FileError::InvalidPageSize { .. })));
    }
}
