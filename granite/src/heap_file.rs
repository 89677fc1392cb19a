//! Heap files: unordered tuples stored over a file of contiguous pages.

use std::collections::hash_map::DefaultHasher;
use std::fs::OpenOptions;
use std::hash::{Hash, Hasher};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use crate::buffer_pool::{BufferPool, PageRef};
use crate::cursor::Cursor;
use crate::errors::DbError;
use crate::lock_manager::Permissions;
use crate::page::HeapPage;
use crate::transaction::TransactionId;
use crate::tuple::{Tuple, TupleDesc};
use crate::{granite_debug_log, page_size, PageId};

/// A heap file: one table's pages, addressed by page number. The file length
/// is always a whole number of pages; appending a page grows it by one.
pub struct HeapFile {
    file: Mutex<std::fs::File>,
    path: PathBuf,
    desc: Arc<TupleDesc>,
    table_id: u32,
}

impl HeapFile {
    /// Opens (creating if missing) the heap file at `path`. The table id is
    /// derived from the absolute path, so reopening the same file yields the
    /// same id.
    pub fn open<P: AsRef<Path>>(path: P, desc: Arc<TupleDesc>) -> io::Result<Self> {
        let path_ref = path.as_ref();
        granite_debug_log!("[HeapFile::open] Opening heap file at: {path_ref:?}");
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path_ref)?;
        let path = path_ref.canonicalize()?;
        let table_id = stable_table_id(&path);
        Ok(Self {
            file: Mutex::new(file),
            path,
            desc,
            table_id,
        })
    }

    pub fn table_id(&self) -> u32 {
        self.table_id
    }

    pub fn desc(&self) -> &Arc<TupleDesc> {
        &self.desc
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn num_pages(&self) -> Result<u32, DbError> {
        let len = self.file.lock().unwrap().metadata()?.len();
        Ok((len / page_size() as u64) as u32)
    }

    /// Reads one page from disk. Reading past the end of the file fails with
    /// `PageOutOfRange`.
    pub fn read_page(&self, pid: PageId) -> Result<HeapPage, DbError> {
        granite_debug_log!("[HeapFile::read_page] Reading page {:?}", pid);
        let mut file = self.file.lock().unwrap();
        let offset = pid.page_no as u64 * page_size() as u64;
        if offset + page_size() as u64 > file.metadata()?.len() {
            return Err(DbError::PageOutOfRange);
        }
        file.seek(SeekFrom::Start(offset))?;
        let mut data = vec![0u8; page_size()];
        file.read_exact(&mut data)?;
        Ok(HeapPage::new(pid, self.desc.clone(), data))
    }

    pub fn write_page(&self, page: &HeapPage) -> Result<(), DbError> {
        granite_debug_log!("[HeapFile::write_page] Writing page {:?}", page.id());
        let mut file = self.file.lock().unwrap();
        let offset = page.id().page_no as u64 * page_size() as u64;
        file.seek(SeekFrom::Start(offset))?;
        file.write_all(&page.serialize())?;
        file.sync_all()?;
        Ok(())
    }

    /// Appends a blank page to the file and returns its id.
    pub fn append_blank_page(&self) -> Result<PageId, DbError> {
        let mut file = self.file.lock().unwrap();
        let len = file.metadata()?.len();
        let page_no = (len / page_size() as u64) as u32;
        file.seek(SeekFrom::Start(len))?;
        file.write_all(&HeapPage::empty_page_data())?;
        file.sync_all()?;
        granite_debug_log!("[HeapFile::append_blank_page] Appended page {page_no}");
        Ok(PageId::new(self.table_id, page_no))
    }

    /// Inserts `t` into the first page with a free slot, fetching each page
    /// through the buffer pool with write permission. When every page is
    /// full a blank page is appended and the insert retried there. Returns
    /// the pages dirtied by the operation.
    pub fn insert_tuple(
        &self,
        pool: &BufferPool,
        tx: TransactionId,
        t: &mut Tuple,
    ) -> Result<Vec<(PageId, PageRef)>, DbError> {
        if **t.desc() != *self.desc {
            return Err(DbError::NotMatchingSchema);
        }
        for page_no in 0..self.num_pages()? {
            let pid = PageId::new(self.table_id, page_no);
            let page_ref = pool.get_page(tx, pid, Permissions::ReadWrite)?;
            let inserted = {
                let mut page = page_ref.write().unwrap();
                match page.insert_tuple(t) {
                    Ok(()) => {
                        page.mark_dirty(Some(tx));
                        true
                    }
                    Err(DbError::PageFull) => false,
                    Err(e) => return Err(e),
                }
            };
            if inserted {
                return Ok(vec![(pid, page_ref)]);
            }
        }

        let pid = self.append_blank_page()?;
        let page_ref = pool.get_page(tx, pid, Permissions::ReadWrite)?;
        {
            let mut page = page_ref.write().unwrap();
            page.insert_tuple(t)?;
            page.mark_dirty(Some(tx));
        }
        Ok(vec![(pid, page_ref)])
    }

    /// Deletes `t` from the page its record id names. Returns the pages
    /// dirtied by the operation.
    pub fn delete_tuple(
        &self,
        pool: &BufferPool,
        tx: TransactionId,
        t: &Tuple,
    ) -> Result<Vec<(PageId, PageRef)>, DbError> {
        if **t.desc() != *self.desc {
            return Err(DbError::NotMatchingSchema);
        }
        let rid = t.record_id().ok_or(DbError::TupleNotOnPage)?;
        let page_ref = pool.get_page(tx, rid.page_id, Permissions::ReadWrite)?;
        {
            let mut page = page_ref.write().unwrap();
            page.delete_tuple(t)?;
            page.mark_dirty(Some(tx));
        }
        Ok(vec![(rid.page_id, page_ref)])
    }

    /// A cursor over every tuple of the file, page by page, fetched through
    /// the buffer pool under read permission.
    pub fn cursor(self: Arc<Self>, pool: Arc<BufferPool>, tx: TransactionId) -> HeapCursor {
        HeapCursor {
            file: self,
            pool,
            tx,
            page_no: 0,
            tuples: Vec::new().into_iter(),
            open: false,
        }
    }
}

fn stable_table_id(path: &Path) -> u32 {
    let mut hasher = DefaultHasher::new();
    path.hash(&mut hasher);
    hasher.finish() as u32
}

pub struct HeapCursor {
    file: Arc<HeapFile>,
    pool: Arc<BufferPool>,
    tx: TransactionId,
    page_no: u32,
    tuples: std::vec::IntoIter<Tuple>,
    open: bool,
}

impl HeapCursor {
    fn load_page(&mut self, page_no: u32) -> Result<(), DbError> {
        let pid = PageId::new(self.file.table_id(), page_no);
        let page_ref = self.pool.get_page(self.tx, pid, Permissions::ReadOnly)?;
        let page = page_ref.read().unwrap();
        self.tuples = page.iter().collect::<Vec<_>>().into_iter();
        Ok(())
    }
}

impl Cursor for HeapCursor {
    fn open(&mut self) -> Result<(), DbError> {
        self.open = true;
        self.page_no = 0;
        if self.file.num_pages()? == 0 {
            self.tuples = Vec::new().into_iter();
        } else {
            self.load_page(0)?;
        }
        Ok(())
    }

    fn next(&mut self) -> Result<Option<Tuple>, DbError> {
        if !self.open {
            return Ok(None);
        }
        loop {
            if let Some(t) = self.tuples.next() {
                return Ok(Some(t));
            }
            // Skip empty pages until a tuple turns up or pages run out.
            if self.page_no + 1 >= self.file.num_pages()? {
                return Ok(None);
            }
            self.page_no += 1;
            self.load_page(self.page_no)?;
        }
    }

    fn rewind(&mut self) -> Result<(), DbError> {
        self.open()
    }

    fn close(&mut self) {
        self.open = false;
        self.page_no = 0;
        self.tuples = Vec::new().into_iter();
    }

    fn tuple_desc(&self) -> &TupleDesc {
        self.file.desc()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tuple::{Field, FieldType};
    use serial_test::serial;
    use tempfile::tempdir;

    fn int_desc() -> Arc<TupleDesc> {
        Arc::new(TupleDesc::unnamed(vec![FieldType::Int]))
    }

    #[test]
    #[serial]
    fn test_write_then_read_page() {
        let dir = tempdir().unwrap();
        let desc = int_desc();
        let file = HeapFile::open(dir.path().join("t.dat"), desc.clone()).unwrap();

        let pid = file.append_blank_page().unwrap();
        assert_eq!(file.num_pages().unwrap(), 1);

        let mut page = file.read_page(pid).unwrap();
        let mut t = Tuple::new(desc.clone(), vec![Field::Int(11)]);
        page.insert_tuple(&mut t).unwrap();
        file.write_page(&page).unwrap();

        let reread = file.read_page(pid).unwrap();
        let tuples: Vec<_> = reread.iter().collect();
        assert_eq!(tuples.len(), 1);
        assert_eq!(tuples[0].field(0), &Field::Int(11));
    }

    #[test]
    #[serial]
    fn test_read_past_eof_is_out_of_range() {
        let dir = tempdir().unwrap();
        let file = HeapFile::open(dir.path().join("t.dat"), int_desc()).unwrap();
        let err = file.read_page(PageId::new(file.table_id(), 0)).unwrap_err();
        assert!(matches!(err, DbError::PageOutOfRange));
    }

    #[test]
    #[serial]
    fn test_table_id_is_stable_per_path() {
        let dir = tempdir().unwrap();
        let a = HeapFile::open(dir.path().join("t.dat"), int_desc()).unwrap();
        let b = HeapFile::open(dir.path().join("t.dat"), int_desc()).unwrap();
        let c = HeapFile::open(dir.path().join("u.dat"), int_desc()).unwrap();
        assert_eq!(a.table_id(), b.table_id());
        assert_ne!(a.table_id(), c.table_id());
    }
}
