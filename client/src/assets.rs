//! Memoized asset loading.
//!
//! Every URL maps to one shared in-flight load, so any number of concurrent
//! requests for the same sprite collapse into a single fetch. Failed loads are
//! evicted so that a later request can retry; successful ones stay until
//! invalidated.

use crate::error::AssetError;
use futures::future::{BoxFuture, FutureExt, Shared};
use image::RgbaImage;
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};
use url::Url;

pub type AssetResult<T> = Result<Arc<T>, AssetError>;
type SharedLoad<T> = Shared<BoxFuture<'static, AssetResult<T>>>;

/// Fetches raw bytes for an asset URL.
pub trait AssetFetcher: Send + Sync + 'static {
    fn fetch(&self, url: &str) -> BoxFuture<'static, Result<Vec<u8>, AssetError>>;
}

/// HTTP fetcher backed by a shared reqwest client.
#[derive(Clone)]
pub struct HttpFetcher {
    http: reqwest::Client,
}

impl HttpFetcher {
    pub fn new(timeout: Duration) -> Result<Self, reqwest::Error> {
        Ok(Self {
            http: reqwest::Client::builder().timeout(timeout).build()?,
        })
    }
}

impl AssetFetcher for HttpFetcher {
    fn fetch(&self, url: &str) -> BoxFuture<'static, Result<Vec<u8>, AssetError>> {
        let http = self.http.clone();
        let url = url.to_string();
        async move {
            let resp = http.get(&url).send().await.map_err(|e| AssetError::Fetch {
                url: url.clone(),
                reason: e.to_string(),
            })?;
            let status = resp.status();
            if !status.is_success() {
                return Err(AssetError::Status {
                    url,
                    status: status.as_u16(),
                });
            }
            let bytes = resp.bytes().await.map_err(|e| AssetError::Fetch {
                url: url.clone(),
                reason: e.to_string(),
            })?;
            Ok(bytes.to_vec())
        }
        .boxed()
    }
}

/// What a caller sees when it looks at a load without waiting for it.
#[derive(Debug, Clone)]
pub enum AssetState<T> {
    Pending,
    Ready(Arc<T>),
    Failed(AssetError),
}

/// A handle to one shared load. Cloning is cheap; all clones observe the same
/// result.
#[derive(Clone)]
pub struct AssetHandle<T> {
    url: String,
    load: SharedLoad<T>,
}

impl<T> AssetHandle<T> {
    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn peek(&self) -> AssetState<T> {
        match self.load.peek() {
            None => AssetState::Pending,
            Some(Ok(value)) => AssetState::Ready(value.clone()),
            Some(Err(e)) => AssetState::Failed(e.clone()),
        }
    }

    pub async fn wait(&self) -> AssetResult<T> {
        self.load.clone().await
    }

    pub fn same_load(&self, other: &Self) -> bool {
        self.load.ptr_eq(&other.load)
    }
}

type Decoder<T> = Arc<dyn Fn(&str, &[u8]) -> Result<T, AssetError> + Send + Sync>;

pub struct AssetCache<T> {
    fetcher: Arc<dyn AssetFetcher>,
    decode: Decoder<T>,
    entries: Arc<Mutex<HashMap<String, SharedLoad<T>>>>,
}

impl<T> Clone for AssetCache<T> {
    fn clone(&self) -> Self {
        Self {
            fetcher: self.fetcher.clone(),
            decode: self.decode.clone(),
            entries: self.entries.clone(),
        }
    }
}

impl<T: Send + Sync + 'static> AssetCache<T> {
    pub fn new<D>(fetcher: Arc<dyn AssetFetcher>, decode: D) -> Self
    where
        D: Fn(&str, &[u8]) -> Result<T, AssetError> + Send + Sync + 'static,
    {
        Self {
            fetcher,
            decode: Arc::new(decode),
            entries: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Return the shared load for `url`, starting it if nothing is cached.
    ///
    /// Inside a tokio runtime the load is driven in the background, so
    /// `peek` makes progress without anyone awaiting it.
    pub fn load(&self, url: &str) -> AssetHandle<T> {
        let mut entries = self.entries.lock();
        if let Some(load) = entries.get(url) {
            return AssetHandle {
                url: url.to_string(),
                load: load.clone(),
            };
        }

        let fetch = self.fetcher.fetch(url);
        let decode = self.decode.clone();
        let owned = url.to_string();
        let load: SharedLoad<T> = async move {
            let bytes = fetch.await?;
            decode(&owned, &bytes).map(Arc::new)
        }
        .boxed()
        .shared();
        entries.insert(url.to_string(), load.clone());
        drop(entries);

        debug!(url, "asset load started");
        if let Ok(rt) = tokio::runtime::Handle::try_current() {
            let entries = self.entries.clone();
            let driven = load.clone();
            let url = url.to_string();
            rt.spawn(async move {
                if let Err(e) = driven.clone().await {
                    warn!(%url, error = %e, "asset load failed");
                    let mut entries = entries.lock();
                    if entries.get(&url).is_some_and(|current| current.ptr_eq(&driven)) {
                        entries.remove(&url);
                    }
                }
            });
        }

        AssetHandle {
            url: url.to_string(),
            load,
        }
    }

    /// Forget `url`; the next `load` fetches again. In-flight handles keep
    /// their result.
    pub fn invalidate(&self, url: &str) -> bool {
        self.entries.lock().remove(url).is_some()
    }

    /// Forget every URL under `prefix`. Returns how many were dropped.
    pub fn invalidate_prefix(&self, prefix: &str) -> usize {
        let mut entries = self.entries.lock();
        let before = entries.len();
        entries.retain(|url, _| !url.starts_with(prefix));
        before - entries.len()
    }

    pub fn clear(&self) {
        self.entries.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

pub fn decode_image(url: &str, bytes: &[u8]) -> Result<RgbaImage, AssetError> {
    image::load_from_memory(bytes)
        .map(|img| img.to_rgba8())
        .map_err(|e| AssetError::Decode {
            url: url.to_string(),
            reason: e.to_string(),
        })
}

pub fn decode_json<M: DeserializeOwned>(url: &str, bytes: &[u8]) -> Result<M, AssetError> {
    serde_json::from_slice(bytes).map_err(|e| AssetError::Decode {
        url: url.to_string(),
        reason: e.to_string(),
    })
}

/// The image and sprite-metadata caches with URL resolution against the
/// asset base.
#[derive(Clone)]
pub struct Assets {
    base: Option<Url>,
    pub images: AssetCache<RgbaImage>,
    pub metas: AssetCache<crate::animation::SpriteMeta>,
}

impl Assets {
    pub fn new(fetcher: Arc<dyn AssetFetcher>, base: Option<Url>) -> Self {
        Self {
            base,
            images: AssetCache::new(fetcher.clone(), decode_image),
            metas: AssetCache::new(fetcher, decode_json),
        }
    }

    /// Absolute URLs pass through; relative paths join the asset base.
    pub fn resolve(&self, path: &str) -> String {
        if Url::parse(path).is_ok() {
            return path.to_string();
        }
        match self.base.as_ref().and_then(|b| b.join(path).ok()) {
            Some(url) => url.to_string(),
            None => path.to_string(),
        }
    }

    pub fn image(&self, path: &str) -> AssetHandle<RgbaImage> {
        self.images.load(&self.resolve(path))
    }

    pub fn meta(&self, path: &str) -> AssetHandle<crate::animation::SpriteMeta> {
        self.metas.load(&self.resolve(path))
    }

    /// Drop cached skin images after a cosmetics change. A skin ending in
    /// `/` names a face set and drops every card image under it.
    pub fn invalidate_skins<'a>(&self, skins: impl IntoIterator<Item = &'a str>) {
        for skin in skins {
            let url = self.resolve(skin);
            let dropped = if url.ends_with('/') {
                self.images.invalidate_prefix(&url)
            } else {
                usize::from(self.images.invalidate(&url))
            };
            if dropped > 0 {
                debug!(%url, dropped, "skin invalidated");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingFetcher {
        calls: AtomicUsize,
        body: Result<Vec<u8>, u16>,
    }

    impl AssetFetcher for CountingFetcher {
        fn fetch(&self, url: &str) -> BoxFuture<'static, Result<Vec<u8>, AssetError>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let url = url.to_string();
            let body = self.body.clone();
            async move {
                tokio::task::yield_now().await;
                body.map_err(|status| AssetError::Status { url, status })
            }
            .boxed()
        }
    }

    fn fetcher(body: Result<Vec<u8>, u16>) -> Arc<CountingFetcher> {
        Arc::new(CountingFetcher {
            calls: AtomicUsize::new(0),
            body,
        })
    }

    fn text_cache(f: Arc<CountingFetcher>) -> AssetCache<String> {
        AssetCache::new(f, |_, bytes| Ok(String::from_utf8_lossy(bytes).into_owned()))
    }

    #[tokio::test]
    async fn concurrent_loads_share_one_fetch() {
        let f = fetcher(Ok(b"sprite".to_vec()));
        let cache = text_cache(f.clone());
        let a = cache.load("flip.png");
        let b = cache.load("flip.png");
        assert!(a.same_load(&b));
        let (ra, rb) = tokio::join!(a.wait(), b.wait());
        assert_eq!(*ra.unwrap(), "sprite");
        assert_eq!(*rb.unwrap(), "sprite");
        assert_eq!(f.calls.load(Ordering::SeqCst), 1);
        assert!(matches!(a.peek(), AssetState::Ready(_)));
    }

    #[tokio::test]
    async fn failures_are_evicted_and_retried() {
        let f = fetcher(Err(404));
        let cache = text_cache(f.clone());
        let handle = cache.load("missing.png");
        assert!(matches!(handle.peek(), AssetState::Pending));
        let err = handle.wait().await.unwrap_err();
        assert_eq!(err, AssetError::Status { url: "missing.png".into(), status: 404 });

        // let the driver task evict the entry
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
        assert!(cache.is_empty());
        cache.load("missing.png");
        assert_eq!(f.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn invalidate_forces_refetch() {
        let f = fetcher(Ok(b"x".to_vec()));
        let cache = text_cache(f.clone());
        cache.load("back.png").wait().await.unwrap();
        cache.load("back.png").wait().await.unwrap();
        assert_eq!(f.calls.load(Ordering::SeqCst), 1);
        assert!(cache.invalidate("back.png"));
        cache.load("back.png").wait().await.unwrap();
        assert_eq!(f.calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn face_set_invalidation_drops_every_card() {
        let assets = Assets::new(fetcher(Ok(vec![])), None);
        assets.image("cards/gold/ah.png");
        assets.image("cards/gold/10s.png");
        assets.image("cards/back.png");
        assets.invalidate_skins(["cards/gold/", "nothing.png"]);
        assert_eq!(assets.images.len(), 1);
    }

    #[test]
    fn garbage_bytes_fail_to_decode() {
        let err = decode_image("a.png", b"not a png").unwrap_err();
        assert!(matches!(err, AssetError::Decode { .. }));
    }

    #[test]
    fn relative_paths_join_the_base() {
        let assets = Assets::new(fetcher(Ok(vec![])), Url::parse("https://cdn.example/skins/").ok());
        assert_eq!(assets.resolve("back.png"), "https://cdn.example/skins/back.png");
        assert_eq!(assets.resolve("https://other.example/a.png"), "https://other.example/a.png");
    }
}
