//! Services the session consumes but does not own.
//!
//! - [`PageRouter`]: URL → page or redirect
//! - [`AssetService`]: opaque asset handle → bytes
//! - [`UploadService`]: out-of-band upload id → uploaded file
//!
//! [`RouteTable`], [`AssetRegistry`] and [`UploadBroker`] are the in-process
//! implementations the server wires up.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::oneshot;
use tracing::debug;
use weft_core::Element;
use weft_types::ClientDescriptor;

use crate::error::{CollaboratorError, NavigationError};

/// Redirect hops followed before a navigation is abandoned.
pub const MAX_REDIRECTS: usize = 8;

/// URL the session's page was resolved from. Attached to the tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CurrentUrl(pub String);

#[derive(Debug, Clone)]
pub enum Navigation {
    Page(Element),
    Redirect(String),
}

#[async_trait]
pub trait PageRouter: Send + Sync {
    async fn resolve(
        &self,
        url: &str,
        client: &ClientDescriptor,
    ) -> Result<Navigation, NavigationError>;
}

/// Resolve `url`, following redirects. Returns the final URL and its page.
pub async fn resolve_page(
    router: &dyn PageRouter,
    url: &str,
    client: &ClientDescriptor,
) -> Result<(String, Element), NavigationError> {
    let mut current = url.to_string();
    for _ in 0..=MAX_REDIRECTS {
        match router.resolve(&current, client).await? {
            Navigation::Page(page) => return Ok((current, page)),
            Navigation::Redirect(next) => {
                debug!(from = %current, to = %next, "following redirect");
                current = next;
            }
        }
    }
    Err(NavigationError::TooManyRedirects {
        url: url.to_string(),
        hops: MAX_REDIRECTS,
    })
}

type RouteFn =
    Arc<dyn Fn(&ClientDescriptor) -> Result<Navigation, NavigationError> + Send + Sync>;

/// Exact-path routing table.
#[derive(Clone, Default)]
pub struct RouteTable {
    routes: HashMap<String, RouteFn>,
}

impl RouteTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn page(
        mut self,
        path: impl Into<String>,
        build: impl Fn(&ClientDescriptor) -> Element + Send + Sync + 'static,
    ) -> Self {
        self.routes
            .insert(path.into(), Arc::new(move |client| Ok(Navigation::Page(build(client)))));
        self
    }

    pub fn redirect(mut self, path: impl Into<String>, target: impl Into<String>) -> Self {
        let target = target.into();
        self.routes
            .insert(path.into(), Arc::new(move |_| Ok(Navigation::Redirect(target.clone()))));
        self
    }

    /// Route with a guard that may refuse or redirect.
    pub fn guarded(
        mut self,
        path: impl Into<String>,
        route: impl Fn(&ClientDescriptor) -> Result<Navigation, NavigationError> + Send + Sync + 'static,
    ) -> Self {
        self.routes.insert(path.into(), Arc::new(route));
        self
    }
}

#[async_trait]
impl PageRouter for RouteTable {
    async fn resolve(
        &self,
        url: &str,
        client: &ClientDescriptor,
    ) -> Result<Navigation, NavigationError> {
        let path = url.split(['?', '#']).next().unwrap_or(url);
        match self.routes.get(path) {
            Some(route) => route(client),
            None => Err(NavigationError::NotFound(url.to_string())),
        }
    }
}

// assets

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AssetHandle(String);

impl AssetHandle {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for AssetHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for AssetHandle {
    fn from(s: &str) -> Self {
        AssetHandle(s.to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Asset {
    pub content_type: String,
    pub bytes: Arc<[u8]>,
}

#[async_trait]
pub trait AssetService: Send + Sync {
    async fn open(&self, handle: &AssetHandle) -> Result<Asset, CollaboratorError>;
}

struct AssetEntry {
    asset: Asset,
    leases: usize,
    released_at: Option<Instant>,
}

/// Assets kept alive by explicit leases.
///
/// An asset with no leases left stays retrievable for the grace period so
/// a client that already holds its URL can still fetch it.
pub struct AssetRegistry {
    entries: Mutex<HashMap<AssetHandle, AssetEntry>>,
    grace: Duration,
}

impl AssetRegistry {
    pub fn new(grace: Duration) -> Arc<Self> {
        Arc::new(Self {
            entries: Mutex::new(HashMap::new()),
            grace,
        })
    }

    /// Store an asset and take the first lease on it.
    pub fn register(
        self: &Arc<Self>,
        content_type: impl Into<String>,
        bytes: impl Into<Arc<[u8]>>,
    ) -> AssetLease {
        let handle = AssetHandle(uuid::Uuid::new_v4().simple().to_string());
        self.entries.lock().insert(
            handle.clone(),
            AssetEntry {
                asset: Asset {
                    content_type: content_type.into(),
                    bytes: bytes.into(),
                },
                leases: 1,
                released_at: None,
            },
        );
        AssetLease {
            registry: Arc::clone(self),
            handle,
        }
    }

    /// Take another lease on an existing asset.
    pub fn lease(self: &Arc<Self>, handle: &AssetHandle) -> Result<AssetLease, CollaboratorError> {
        let mut entries = self.entries.lock();
        let entry = entries
            .get_mut(handle)
            .ok_or_else(|| CollaboratorError::UnknownAsset(handle.to_string()))?;
        entry.leases += 1;
        entry.released_at = None;
        Ok(AssetLease {
            registry: Arc::clone(self),
            handle: handle.clone(),
        })
    }

    fn release(&self, handle: &AssetHandle) {
        if let Some(entry) = self.entries.lock().get_mut(handle) {
            entry.leases = entry.leases.saturating_sub(1);
            if entry.leases == 0 {
                entry.released_at = Some(Instant::now());
            }
        }
    }

    pub fn leases(&self, handle: &AssetHandle) -> usize {
        self.entries.lock().get(handle).map_or(0, |e| e.leases)
    }

    /// Drop unleased assets whose grace period ended before `now`.
    pub fn purge(&self, now: Instant) -> usize {
        let mut entries = self.entries.lock();
        let before = entries.len();
        entries.retain(|_, entry| match entry.released_at {
            Some(at) if entry.leases == 0 => now.saturating_duration_since(at) < self.grace,
            _ => true,
        });
        before - entries.len()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

#[async_trait]
impl AssetService for AssetRegistry {
    async fn open(&self, handle: &AssetHandle) -> Result<Asset, CollaboratorError> {
        self.entries
            .lock()
            .get(handle)
            .map(|entry| entry.asset.clone())
            .ok_or_else(|| CollaboratorError::UnknownAsset(handle.to_string()))
    }
}

/// Holds an asset alive until dropped.
pub struct AssetLease {
    registry: Arc<AssetRegistry>,
    handle: AssetHandle,
}

impl AssetLease {
    pub fn handle(&self) -> &AssetHandle {
        &self.handle
    }

    /// Path the server serves this asset under.
    pub fn url(&self) -> String {
        format!("/assets/{}", self.handle)
    }
}

impl std::fmt::Debug for AssetLease {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("AssetLease").field(&self.handle).finish()
    }
}

impl Drop for AssetLease {
    fn drop(&mut self) {
        self.registry.release(&self.handle);
    }
}

// uploads

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct UploadId(String);

impl UploadId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for UploadId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for UploadId {
    fn from(s: &str) -> Self {
        UploadId(s.to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadedFile {
    pub name: Option<String>,
    pub content_type: Option<String>,
    pub bytes: Arc<[u8]>,
}

#[async_trait]
pub trait UploadService: Send + Sync {
    /// Wait until the upload with `id` completes.
    async fn wait_for(&self, id: &UploadId) -> Result<UploadedFile, CollaboratorError>;
}

#[derive(Default)]
struct PendingUpload {
    waiters: Vec<oneshot::Sender<UploadedFile>>,
    done: Option<UploadedFile>,
}

/// Table of expected uploads, completed by the HTTP side.
#[derive(Default)]
pub struct UploadBroker {
    pending: Mutex<HashMap<UploadId, PendingUpload>>,
}

impl UploadBroker {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Announce an upload the client is about to send.
    pub fn expect(&self) -> UploadId {
        let id = UploadId(uuid::Uuid::new_v4().simple().to_string());
        self.pending.lock().insert(id.clone(), PendingUpload::default());
        id
    }

    /// Hand the finished file to whoever waits for it. With nobody waiting
    /// yet the file is held until the first `wait_for`.
    pub fn complete(&self, id: &UploadId, file: UploadedFile) -> Result<(), CollaboratorError> {
        let mut pending = self.pending.lock();
        let slot = pending
            .get_mut(id)
            .ok_or_else(|| CollaboratorError::UnknownUpload(id.to_string()))?;
        if slot.done.is_some() {
            return Err(CollaboratorError::UploadCompleted(id.to_string()));
        }
        let waiters = std::mem::take(&mut slot.waiters);
        let mut delivered = false;
        for waiter in waiters {
            delivered |= waiter.send(file.clone()).is_ok();
        }
        if delivered {
            pending.remove(id);
        } else {
            slot.done = Some(file);
        }
        Ok(())
    }

    /// Forget an upload; anyone waiting for it gets `UploadCancelled`.
    pub fn cancel(&self, id: &UploadId) -> bool {
        self.pending.lock().remove(id).is_some()
    }

    pub fn len(&self) -> usize {
        self.pending.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.lock().is_empty()
    }
}

#[async_trait]
impl UploadService for UploadBroker {
    async fn wait_for(&self, id: &UploadId) -> Result<UploadedFile, CollaboratorError> {
        let rx = {
            let mut pending = self.pending.lock();
            let slot = pending
                .get_mut(id)
                .ok_or_else(|| CollaboratorError::UnknownUpload(id.to_string()))?;
            if let Some(file) = slot.done.take() {
                pending.remove(id);
                return Ok(file);
            }
            let (tx, rx) = oneshot::channel();
            slot.waiters.push(tx);
            rx
        };
        rx.await
            .map_err(|_| CollaboratorError::UploadCancelled(id.to_string()))
    }
}

/// Collaborator services, attached to every session tree.
#[derive(Clone)]
pub struct Services {
    pub assets: Arc<dyn AssetService>,
    pub uploads: Arc<dyn UploadService>,
}
