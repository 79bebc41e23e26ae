//! Injected fetch capability

use std::future::Future;
use std::pin::Pin;

/// Boxed future returned by a [`Fetcher`]
pub type FetchFuture<V> = Pin<Box<dyn Future<Output = anyhow::Result<V>> + Send + 'static>>;

/// Retrieves the contents of one path
///
/// Supplied per warming call rather than stored, so each call can use its
/// own backend or credentials. Any `Fn(String) -> impl Future<Output =
/// anyhow::Result<V>>` closure qualifies.
pub trait Fetcher<V>: Send + Sync {
    fn fetch(&self, path: &str) -> FetchFuture<V>;
}

impl<V, F, Fut> Fetcher<V> for F
where
    F: Fn(String) -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<V>> + Send + 'static,
{
    fn fetch(&self, path: &str) -> FetchFuture<V> {
        Box::pin(self(path.to_string()))
    }
}
