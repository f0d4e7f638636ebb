use crate::ports::CacheLoader;
use async_trait::async_trait;
use shared::BoxError;
use std::future::Future;

/// [`CacheLoader`] backed by an async closure taking the key by value
pub struct FnLoader<F>(F);

/// Wrap `f` as a loader, e.g. `loader_fn(|id: u64| async move { repo.find(id).await })`
pub fn loader_fn<F>(f: F) -> FnLoader<F> {
    FnLoader(f)
}

#[async_trait]
impl<K, V, F, Fut, E> CacheLoader<K, V> for FnLoader<F>
where
    K: Clone + Send + Sync + 'static,
    V: Send + 'static,
    F: Fn(K) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<V, E>> + Send + 'static,
    E: Into<BoxError> + 'static,
{
    async fn load(&self, key: &K) -> Result<V, BoxError> {
        (self.0)(key.clone()).await.map_err(Into::into)
    }
}
