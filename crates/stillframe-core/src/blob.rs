//! Cloud archive access: SAS-addressed container plus the paged listing and
//! transfer operations the reconciliation job drives.

use core::cell::RefCell;

use alloc::vec::Vec;
use embassy_sync::blocking_mutex::Mutex;
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;

use crate::name::ImageName;

/// Server-side cap on names per listing page.
pub const LIST_PAGE_MAX: usize = 50;

/// Continuation token handed back by a partial listing.
pub type ListMarker = heapless::String<128>;

/// Split view of a shared-access-signature container URL.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct SasUrl<'a> {
    /// Scheme, host and container path, no trailing slash.
    pub base: &'a str,
    /// Query string without the leading `?`.
    pub query: &'a str,
    pub https: bool,
}

/// Validate and split a container SAS URL.
///
/// Rejects anything without an `http(s)` scheme, a host, or a signed query
/// (`sig=` parameter).
pub fn parse_sas_url(url: &str) -> Option<SasUrl<'_>> {
    let (https, rest) = if let Some(rest) = url.strip_prefix("https://") {
        (true, rest)
    } else if let Some(rest) = url.strip_prefix("http://") {
        (false, rest)
    } else {
        return None;
    };

    let question = url.find('?')?;
    let (base, query) = (&url[..question], &url[question + 1..]);
    let host = &rest[..rest.len() - (query.len() + 1)];
    if host.is_empty() || host.starts_with('/') {
        return None;
    }
    if !query.split('&').any(|param| param.starts_with("sig=")) {
        return None;
    }

    Some(SasUrl {
        base: base.trim_end_matches('/'),
        query,
        https,
    })
}

/// One page of archive names, with a marker when more pages follow.
#[derive(Debug, Default)]
pub struct BlobPage {
    pub names: Vec<ImageName>,
    pub next_marker: Option<ListMarker>,
}

/// Remote archive operations used by reconciliation and pull-on-wake.
pub trait BlobStore {
    type Error: core::fmt::Debug;

    /// List up to `max_results` blob names under `prefix`, lexicographically
    /// after `marker` when one is given.
    async fn list_page(
        &mut self,
        sas: &SasUrl<'_>,
        prefix: &str,
        marker: Option<&str>,
        max_results: usize,
    ) -> Result<BlobPage, Self::Error>;

    async fn download(&mut self, sas: &SasUrl<'_>, name: &str) -> Result<Vec<u8>, Self::Error>;

    /// Returns `false` when the blob was already gone.
    async fn delete(&mut self, sas: &SasUrl<'_>, name: &str) -> Result<bool, Self::Error>;
}

/// In-memory archive used by host tests and bring-up builds until the HTTP
/// client lands.
#[derive(Debug, Default)]
pub struct MemoryBlobStore {
    blobs: alloc::collections::BTreeMap<alloc::string::String, Vec<u8>>,
    /// When set, every `list_page` call fails.
    pub fail_list: bool,
    /// Remaining `download` calls that fail before transfers recover.
    pub fail_downloads: u32,
    pub list_calls: u32,
    pub download_calls: u32,
}

#[derive(Debug, Eq, PartialEq)]
pub struct MemoryBlobError;

impl MemoryBlobStore {
    pub const fn new() -> Self {
        Self {
            blobs: alloc::collections::BTreeMap::new(),
            fail_list: false,
            fail_downloads: 0,
            list_calls: 0,
            download_calls: 0,
        }
    }

    pub fn insert(&mut self, name: &str, data: &[u8]) {
        self.blobs
            .insert(alloc::string::String::from(name), Vec::from(data));
    }

    pub fn contains(&self, name: &str) -> bool {
        self.blobs.contains_key(name)
    }

    pub fn blob_count(&self) -> usize {
        self.blobs.len()
    }

    fn do_list_page(
        &mut self,
        prefix: &str,
        marker: Option<&str>,
        max_results: usize,
    ) -> Result<BlobPage, MemoryBlobError> {
        self.list_calls += 1;
        if self.fail_list {
            return Err(MemoryBlobError);
        }

        let mut page = BlobPage::default();
        let mut more = false;
        for name in self.blobs.keys() {
            if !name.starts_with(prefix) {
                continue;
            }
            if let Some(marker) = marker {
                if name.as_str() <= marker {
                    continue;
                }
            }
            if page.names.len() == max_results {
                more = true;
                break;
            }
            let mut out = ImageName::new();
            if out.push_str(name).is_ok() {
                page.names.push(out);
            }
        }
        if more {
            if let Some(last) = page.names.last() {
                let mut next = ListMarker::new();
                let _ = next.push_str(last);
                page.next_marker = Some(next);
            }
        }
        Ok(page)
    }

    fn do_download(&mut self, name: &str) -> Result<Vec<u8>, MemoryBlobError> {
        self.download_calls += 1;
        if self.fail_downloads > 0 {
            self.fail_downloads -= 1;
            return Err(MemoryBlobError);
        }
        self.blobs.get(name).cloned().ok_or(MemoryBlobError)
    }

    fn do_delete(&mut self, name: &str) -> Result<bool, MemoryBlobError> {
        Ok(self.blobs.remove(name).is_some())
    }
}

impl BlobStore for MemoryBlobStore {
    type Error = MemoryBlobError;

    async fn list_page(
        &mut self,
        _sas: &SasUrl<'_>,
        prefix: &str,
        marker: Option<&str>,
        max_results: usize,
    ) -> Result<BlobPage, Self::Error> {
        self.do_list_page(prefix, marker, max_results)
    }

    async fn download(&mut self, _sas: &SasUrl<'_>, name: &str) -> Result<Vec<u8>, Self::Error> {
        self.do_download(name)
    }

    async fn delete(&mut self, _sas: &SasUrl<'_>, name: &str) -> Result<bool, Self::Error> {
        self.do_delete(name)
    }
}

/// One in-memory container shared by several call sites, so the wake-time
/// pull and the worker's sync jobs see the same remote state. Handles only
/// touch the store inside the lock and never hold it across an await.
pub struct SharedBlobStore {
    inner: Mutex<CriticalSectionRawMutex, RefCell<MemoryBlobStore>>,
}

impl SharedBlobStore {
    pub const fn new() -> Self {
        Self {
            inner: Mutex::new(RefCell::new(MemoryBlobStore::new())),
        }
    }

    pub fn handle(&self) -> BlobHandle<'_> {
        BlobHandle(self)
    }

    /// Direct access for seeding and inspection.
    pub fn with<R>(&self, f: impl FnOnce(&mut MemoryBlobStore) -> R) -> R {
        self.inner.lock(|store| f(&mut store.borrow_mut()))
    }
}

impl Default for SharedBlobStore {
    fn default() -> Self {
        Self::new()
    }
}

/// [`BlobStore`] view onto a [`SharedBlobStore`].
pub struct BlobHandle<'a>(&'a SharedBlobStore);

impl BlobStore for BlobHandle<'_> {
    type Error = MemoryBlobError;

    async fn list_page(
        &mut self,
        _sas: &SasUrl<'_>,
        prefix: &str,
        marker: Option<&str>,
        max_results: usize,
    ) -> Result<BlobPage, Self::Error> {
        self.0.with(|store| store.do_list_page(prefix, marker, max_results))
    }

    async fn download(&mut self, _sas: &SasUrl<'_>, name: &str) -> Result<Vec<u8>, Self::Error> {
        self.0.with(|store| store.do_download(name))
    }

    async fn delete(&mut self, _sas: &SasUrl<'_>, name: &str) -> Result<bool, Self::Error> {
        self.0.with(|store| store.do_delete(name))
    }
}
