use std::cell::Cell;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::{error, warn};

use super::disk_manager::DiskManager;
use super::error::{FileError, FileResult};
use super::lru_replacer::LruReplacer;
use super::page::Page;
use super::{FrameId, PageId, DEFAULT_POOL_SIZE};

/// Bookkeeping for one frame; the page bytes live in [`BufferPool::pages`]
struct FrameMeta {
    page_id: Option<PageId>,
    pin_count: u32,
    dirty: bool,
}

impl FrameMeta {
    fn new() -> Self {
        Self {
            page_id: None,
            pin_count: 0,
            dirty: false,
        }
    }
}

/// Directory, free-frame list, replacer and per-frame metadata, all guarded
/// by the single cache-wide lock
struct PoolState {
    frames: Vec<FrameMeta>,
    page_table: HashMap<PageId, FrameId>,
    free_frames: VecDeque<FrameId>,
    replacer: LruReplacer,
}

/// Fixed-capacity cache of pages with pin/unpin semantics and LRU eviction.
///
/// A page is served from its frame while any [`PageGuard`] for it is alive;
/// the frame is only eligible for eviction once every guard has been
/// dropped. A dirty frame is written back to disk before its binding is
/// removed. All state transitions happen under one exclusive lock; page
/// bytes sit behind per-frame locks so guard holders read and write without
/// touching the pool lock.
pub struct BufferPool {
    disk: DiskManager,
    /// Page bytes per frame. A pin keeps the binding stable, so guard access
    /// outside the pool lock cannot race with eviction.
    pages: Vec<Arc<RwLock<Page>>>,
    state: Mutex<PoolState>,
    pool_size: usize,
}

impl BufferPool {
    /// Create a buffer pool over `disk` with the default frame count
    pub fn new(disk: DiskManager) -> Self {
        Self::with_capacity(disk, DEFAULT_POOL_SIZE)
    }

    /// Create a buffer pool with `pool_size` frames
    pub fn with_capacity(disk: DiskManager, pool_size: usize) -> Self {
        let pages = (0..pool_size)
            .map(|_| Arc::new(RwLock::new(Page::new())))
            .collect();
        let frames = (0..pool_size).map(|_| FrameMeta::new()).collect();

        Self {
            disk,
            pages,
            state: Mutex::new(PoolState {
                frames,
                page_table: HashMap::new(),
                free_frames: (0..pool_size).collect(),
                replacer: LruReplacer::new(),
            }),
            pool_size,
        }
    }

    /// The disk manager backing this pool
    pub fn disk(&self) -> &DiskManager {
        &self.disk
    }

    /// Total number of frames
    pub fn pool_size(&self) -> usize {
        self.pool_size
    }

    /// Frames that could serve a miss right now: never-used frames plus
    /// unpinned residents
    pub fn free_frame_count(&self) -> usize {
        let state = self.state.lock();
        state.free_frames.len() + state.replacer.size()
    }

    /// Number of resident frames with the dirty bit set
    pub fn dirty_page_count(&self) -> usize {
        let state = self.state.lock();
        state.frames.iter().filter(|f| f.dirty).count()
    }

    /// Whether `page_id` currently occupies a frame
    pub fn is_resident(&self, page_id: PageId) -> bool {
        self.state.lock().page_table.contains_key(&page_id)
    }

    /// Pin `page_id` into a frame, reading it from disk on a miss.
    ///
    /// Fails with [`FileError::BufferPoolFull`] when every frame is pinned.
    pub fn fetch(&self, page_id: PageId) -> FileResult<PageGuard<'_>> {
        let mut state = self.state.lock();

        if let Some(&frame) = state.page_table.get(&page_id) {
            state.frames[frame].pin_count += 1;
            state.replacer.pin(frame);
            return Ok(self.guard(frame, page_id));
        }

        let frame = self.find_free_frame(&mut state)?;

        {
            let mut page = self.pages[frame].write();
            if let Err(e) = self.disk.read_page(page_id, page.data_mut()) {
                // Hand the frame back rather than leak it
                state.free_frames.push_back(frame);
                return Err(e);
            }
        }

        let meta = &mut state.frames[frame];
        meta.page_id = Some(page_id);
        meta.pin_count = 1;
        meta.dirty = false;
        state.page_table.insert(page_id, frame);

        Ok(self.guard(frame, page_id))
    }

    /// Allocate a fresh page on disk and pin it into a zeroed frame.
    ///
    /// The new id is stamped into the page header and the frame starts
    /// dirty, so the page reaches disk even if it is never modified again.
    pub fn new_page(&self) -> FileResult<(PageId, PageGuard<'_>)> {
        let mut state = self.state.lock();

        let frame = self.find_free_frame(&mut state)?;
        let page_id = self.disk.allocate_page();

        {
            let mut page = self.pages[frame].write();
            page.reset();
            page.set_page_id(page_id);
        }

        let meta = &mut state.frames[frame];
        meta.page_id = Some(page_id);
        meta.pin_count = 1;
        meta.dirty = true;
        state.page_table.insert(page_id, frame);

        Ok((page_id, self.guard(frame, page_id)))
    }

    /// Write `page_id`'s frame to disk if it is dirty.
    ///
    /// Returns `false` when the page is not resident. The pin count is
    /// unchanged.
    pub fn flush_page(&self, page_id: PageId) -> FileResult<bool> {
        let mut state = self.state.lock();

        let frame = match state.page_table.get(&page_id) {
            Some(&frame) => frame,
            None => return Ok(false),
        };

        if state.frames[frame].dirty {
            let page = self.pages[frame].read();
            self.disk.write_page(page_id, page.data())?;
            state.frames[frame].dirty = false;
        }

        Ok(true)
    }

    /// Drop `page_id` from the cache and return it to the disk free list.
    ///
    /// Returns `false` when the page is resident and pinned. A non-resident
    /// page is deallocated directly.
    pub fn delete_page(&self, page_id: PageId) -> FileResult<bool> {
        let mut state = self.state.lock();

        if let Some(&frame) = state.page_table.get(&page_id) {
            if state.frames[frame].pin_count > 0 {
                return Ok(false);
            }

            state.page_table.remove(&page_id);
            state.replacer.pin(frame);
            let meta = &mut state.frames[frame];
            meta.page_id = None;
            meta.dirty = false;
            self.pages[frame].write().reset();
            state.free_frames.push_back(frame);
        }

        self.disk.deallocate_page(page_id)?;
        Ok(true)
    }

    /// Write every dirty resident frame to disk, then sync the file.
    ///
    /// Per-page write failures are logged and skipped so one bad page does
    /// not stop the sweep.
    pub fn flush_all(&self) -> FileResult<()> {
        let mut state = self.state.lock();

        let resident: Vec<(PageId, FrameId)> = state
            .page_table
            .iter()
            .map(|(&page_id, &frame)| (page_id, frame))
            .collect();

        for (page_id, frame) in resident {
            if !state.frames[frame].dirty {
                continue;
            }
            let page = self.pages[frame].read();
            match self.disk.write_page(page_id, page.data()) {
                Ok(()) => state.frames[frame].dirty = false,
                Err(e) => error!(page_id, "failed to flush page: {e}"),
            }
        }

        self.disk.flush()
    }

    /// Release one pin on `page_id`, OR-ing `dirty` into the frame.
    ///
    /// Called by [`PageGuard`] on drop. Returns `false` if the page is not
    /// resident or not pinned.
    fn unpin(&self, page_id: PageId, dirty: bool) -> bool {
        let mut state = self.state.lock();

        let frame = match state.page_table.get(&page_id) {
            Some(&frame) => frame,
            None => return false,
        };

        let meta = &mut state.frames[frame];
        if meta.pin_count == 0 {
            return false;
        }

        meta.dirty |= dirty;
        meta.pin_count -= 1;
        let now_unpinned = meta.pin_count == 0;
        if now_unpinned {
            state.replacer.unpin(frame);
        }

        true
    }

    /// Claim a frame for a new binding: the free list first, then an LRU
    /// victim (written back first if dirty), else the pool is exhausted.
    fn find_free_frame(&self, state: &mut PoolState) -> FileResult<FrameId> {
        if let Some(frame) = state.free_frames.pop_front() {
            return Ok(frame);
        }

        let frame = state
            .replacer
            .victim()
            .ok_or(FileError::BufferPoolFull)?;
        let victim_id = state.frames[frame]
            .page_id
            .expect("replacer tracks only bound frames");

        // Write-back precedes rebinding: the old contents must be on disk
        // before the directory entry disappears
        if state.frames[frame].dirty {
            let page = self.pages[frame].read();
            if let Err(e) = self.disk.write_page(victim_id, page.data()) {
                state.replacer.unpin(frame);
                return Err(e);
            }
        }

        state.page_table.remove(&victim_id);
        let meta = &mut state.frames[frame];
        meta.page_id = None;
        meta.dirty = false;
        self.pages[frame].write().reset();

        Ok(frame)
    }

    fn guard(&self, frame: FrameId, page_id: PageId) -> PageGuard<'_> {
        PageGuard {
            pool: self,
            page: Arc::clone(&self.pages[frame]),
            page_id,
            dirty: Cell::new(false),
        }
    }
}

impl Drop for BufferPool {
    fn drop(&mut self) {
        if let Err(e) = self.flush_all() {
            error!("failed to flush buffer pool on drop: {e}");
        }
    }
}

/// A pinned page. The pin is released when the guard is dropped, on every
/// exit path; the dirty flag accumulated through [`write`] and
/// [`mark_dirty`] is OR-ed into the frame at that point.
///
/// [`write`]: PageGuard::write
/// [`mark_dirty`]: PageGuard::mark_dirty
pub struct PageGuard<'a> {
    pool: &'a BufferPool,
    page: Arc<RwLock<Page>>,
    page_id: PageId,
    dirty: Cell<bool>,
}

impl PageGuard<'_> {
    pub fn page_id(&self) -> PageId {
        self.page_id
    }

    /// Read access to the pinned page
    pub fn read(&self) -> RwLockReadGuard<'_, Page> {
        self.page.read()
    }

    /// Write access to the pinned page; marks it dirty
    pub fn write(&self) -> RwLockWriteGuard<'_, Page> {
        self.dirty.set(true);
        self.page.write()
    }

    /// Mark the page dirty without taking write access
    pub fn mark_dirty(&self) {
        self.dirty.set(true);
    }
}

impl Drop for PageGuard<'_> {
    fn drop(&mut self) {
        if !self.pool.unpin(self.page_id, self.dirty.get()) {
            warn!(page_id = self.page_id, "unpin of unpinned or evicted page");
        }
    }
}
