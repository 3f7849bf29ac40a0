//! Token holder
//!
//! Holds the short-lived access credential in memory. Setting a credential
//! starts the proactive refresh timer; clearing it stops the timer. The
//! optional [`SessionCache`] only carries a credential across process restarts
//! for as long as it remains valid; the server-side refresh is always the
//! source of truth.

use crate::config::AuthConfig;
use crate::proactive;
use crate::refresh::RefreshError;
use chrono::{Duration, Utc};
use codelab_core::Credential;
use futures::future::BoxFuture;
use parking_lot::{Mutex, RwLock};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Weak};
use tokio::task::JoinHandle;

/// Callback producing a renewed credential
pub type RefreshCallback =
    Arc<dyn Fn() -> BoxFuture<'static, Result<Credential, RefreshError>> + Send + Sync>;

/// Short-lived store that lets a new process pick up a still-valid credential
pub trait SessionCache: Send + Sync {
    fn load(&self) -> Option<Credential>;
    fn store(&self, credential: &Credential);
    fn clear(&self);
}

/// In-memory cache, mostly useful in tests
#[derive(Default)]
pub struct MemorySessionCache {
    slot: Mutex<Option<Credential>>,
}

impl MemorySessionCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_credential(credential: Credential) -> Self {
        Self {
            slot: Mutex::new(Some(credential)),
        }
    }
}

impl SessionCache for MemorySessionCache {
    fn load(&self) -> Option<Credential> {
        self.slot.lock().clone()
    }

    fn store(&self, credential: &Credential) {
        *self.slot.lock() = Some(credential.clone());
    }

    fn clear(&self) {
        *self.slot.lock() = None;
    }
}

/// JSON file cache
///
/// Failures are logged and otherwise ignored; losing the cache only costs a login.
pub struct FileSessionCache {
    path: PathBuf,
}

#[derive(serde::Serialize, serde::Deserialize)]
struct CachedSession {
    access_token: Credential,
}

impl FileSessionCache {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Replace the file in one rename; the temp file is created owner-only
    fn write(&self, cached: &CachedSession) -> std::io::Result<()> {
        let dir = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        std::fs::create_dir_all(dir)?;

        let mut file = tempfile::NamedTempFile::new_in(dir)?;
        serde_json::to_writer(&mut file, cached).map_err(std::io::Error::other)?;
        file.persist(&self.path).map_err(|e| e.error)?;
        Ok(())
    }
}

impl SessionCache for FileSessionCache {
    fn load(&self) -> Option<Credential> {
        let content = std::fs::read_to_string(&self.path).ok()?;
        match serde_json::from_str::<CachedSession>(&content) {
            Ok(cached) => Some(cached.access_token),
            Err(e) => {
                warn!(path = %self.path.display(), "Ignoring unreadable session cache: {e}");
                None
            }
        }
    }

    fn store(&self, credential: &Credential) {
        let cached = CachedSession {
            access_token: credential.clone(),
        };
        if let Err(e) = self.write(&cached) {
            warn!(path = %self.path.display(), "Failed to write session cache: {e}");
        }
    }

    fn clear(&self) {
        match std::fs::remove_file(&self.path) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(path = %self.path.display(), "Failed to clear session cache: {e}"),
        }
    }
}

struct Inner {
    credential: RwLock<Option<Credential>>,
    timer: Mutex<Option<JoinHandle<()>>>,
    refresh: RwLock<Option<RefreshCallback>>,
    cache: Option<Arc<dyn SessionCache>>,
}

impl Drop for Inner {
    fn drop(&mut self) {
        if let Some(timer) = self.timer.get_mut().take() {
            timer.abort();
        }
    }
}

/// Shared handle to the held access credential
#[derive(Clone)]
pub struct TokenHolder {
    inner: Arc<Inner>,
}

/// Non-owning handle used by the proactive timer
#[derive(Clone)]
pub(crate) struct WeakTokenHolder(Weak<Inner>);

impl WeakTokenHolder {
    pub(crate) fn upgrade(&self) -> Option<TokenHolder> {
        self.0.upgrade().map(|inner| TokenHolder { inner })
    }
}

impl TokenHolder {
    /// Empty holder without a cache
    pub fn new() -> Self {
        Self::build(None)
    }

    /// Holder backed by a cache, rehydrated from it when the cached credential is still valid
    pub fn with_cache(cache: Arc<dyn SessionCache>) -> Self {
        let holder = Self::build(Some(cache.clone()));
        match cache.load() {
            Some(credential) if !expired(&credential) => {
                debug!("Rehydrated credential from session cache");
                holder.set(Some(credential));
            }
            Some(_) => {
                debug!("Discarding expired cached credential");
                cache.clear();
            }
            None => {}
        }
        holder
    }

    fn build(cache: Option<Arc<dyn SessionCache>>) -> Self {
        Self {
            inner: Arc::new(Inner {
                credential: RwLock::new(None),
                timer: Mutex::new(None),
                refresh: RwLock::new(None),
                cache,
            }),
        }
    }

    /// Replace the held credential
    pub fn set(&self, credential: Option<Credential>) {
        let held = credential.is_some();
        if let Some(cache) = &self.inner.cache {
            match &credential {
                Some(credential) => cache.store(credential),
                None => cache.clear(),
            }
        }
        *self.inner.credential.write() = credential;

        if held {
            self.start_timer();
        } else {
            self.stop_timer();
        }
    }

    /// Current credential
    pub fn get(&self) -> Option<Credential> {
        self.inner.credential.read().clone()
    }

    /// Expiry within the proactive refresh window, or unknown
    pub fn is_nearing_expiry(&self) -> bool {
        self.inner.credential.read().as_ref().is_some_and(|credential| {
            credential.expires_within(Duration::seconds(AuthConfig::NEARING_EXPIRY_SECS), Utc::now())
        })
    }

    /// Expiry within the clock-skew buffer, or unknown
    pub fn is_expired(&self) -> bool {
        self.inner.credential.read().as_ref().is_some_and(expired)
    }

    /// Register the callback the proactive timer uses to renew the credential
    pub fn register_refresh(&self, callback: RefreshCallback) {
        *self.inner.refresh.write() = Some(callback);
    }

    pub(crate) fn refresh_callback(&self) -> Option<RefreshCallback> {
        self.inner.refresh.read().clone()
    }

    pub fn is_timer_running(&self) -> bool {
        self.inner
            .timer
            .lock()
            .as_ref()
            .is_some_and(|timer| !timer.is_finished())
    }

    pub(crate) fn downgrade(&self) -> WeakTokenHolder {
        WeakTokenHolder(Arc::downgrade(&self.inner))
    }

    fn start_timer(&self) {
        let mut timer = self.inner.timer.lock();
        if timer.as_ref().is_some_and(|t| !t.is_finished()) {
            return;
        }
        // Rehydration may happen before a runtime exists; the next set() starts it
        if tokio::runtime::Handle::try_current().is_err() {
            return;
        }
        *timer = Some(proactive::spawn(self.downgrade()));
    }

    fn stop_timer(&self) {
        if let Some(timer) = self.inner.timer.lock().take() {
            timer.abort();
        }
    }
}

impl Default for TokenHolder {
    fn default() -> Self {
        Self::new()
    }
}

fn expired(credential: &Credential) -> bool {
    credential.expires_within(Duration::seconds(AuthConfig::EXPIRY_BUFFER_SECS), Utc::now())
}

#[cfg(test)]
mod tests {
    use super::*;
    use base64::Engine;
    use base64::engine::general_purpose::URL_SAFE_NO_PAD;

    fn token_expiring_in(secs: i64) -> Credential {
        let exp = (Utc::now() + Duration::seconds(secs)).timestamp();
        let payload = URL_SAFE_NO_PAD.encode(format!(r#"{{"exp":{exp}}}"#));
        Credential::new(format!("eyJhbGciOiJIUzI1NiJ9.{payload}.sig"))
    }

    #[test]
    fn test_expiry_windows() {
        let holder = TokenHolder::new();
        assert!(!holder.is_nearing_expiry());
        assert!(!holder.is_expired());

        holder.set(Some(token_expiring_in(45)));
        assert!(holder.is_nearing_expiry());
        assert!(!holder.is_expired());

        holder.set(Some(token_expiring_in(10)));
        assert!(holder.is_nearing_expiry());
        assert!(holder.is_expired());

        holder.set(Some(token_expiring_in(3600)));
        assert!(!holder.is_nearing_expiry());
        assert!(!holder.is_expired());
    }

    #[test]
    fn test_undecodable_token_counts_as_expired() {
        let holder = TokenHolder::new();
        holder.set(Some(Credential::new("opaque")));
        assert!(holder.is_nearing_expiry());
        assert!(holder.is_expired());
    }

    #[tokio::test]
    async fn test_timer_follows_credential() {
        let holder = TokenHolder::new();
        holder.set(Some(token_expiring_in(3600)));
        assert!(holder.is_timer_running());

        holder.set(None);
        assert!(!holder.is_timer_running());
        assert!(holder.get().is_none());
    }

    #[test]
    fn test_rehydrates_valid_cached_credential() {
        let credential = token_expiring_in(3600);
        let cache = Arc::new(MemorySessionCache::with_credential(credential.clone()));
        let holder = TokenHolder::with_cache(cache);
        assert_eq!(holder.get(), Some(credential));
    }

    #[test]
    fn test_expired_cached_credential_is_discarded() {
        let cache = Arc::new(MemorySessionCache::with_credential(token_expiring_in(5)));
        let holder = TokenHolder::with_cache(cache.clone());
        assert!(holder.get().is_none());
        assert!(cache.load().is_none());
    }

    #[test]
    fn test_file_cache_round_trip_and_clear() {
        let dir = tempfile::tempdir().unwrap();
        let cache = Arc::new(FileSessionCache::new(dir.path().join("nested/session.json")));
        let credential = token_expiring_in(3600);

        let holder = TokenHolder::with_cache(cache.clone());
        holder.set(Some(credential.clone()));
        assert_eq!(cache.load(), Some(credential.clone()));

        let rehydrated = TokenHolder::with_cache(cache.clone());
        assert_eq!(rehydrated.get(), Some(credential));

        rehydrated.set(None);
        assert!(!cache.path().exists());
    }

    #[cfg(unix)]
    #[test]
    fn test_file_cache_is_owner_only() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("session.json");
        std::fs::write(&path, "{}").unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o644)).unwrap();

        FileSessionCache::new(&path).store(&Credential::new("secret-bearer"));

        let mode = std::fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
        assert!(std::fs::read_to_string(&path).unwrap().contains("secret-bearer"));
    }
}
