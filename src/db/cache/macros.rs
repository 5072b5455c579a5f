/// A macro to simplify read-through caching.
///
/// This macro checks if a value is present in the cache.
/// If found, it returns the cached value.
/// If not found (or the cache is unavailable), it executes the provided block
/// to compute the value, queues it for the cache, and returns it.
///
/// # Arguments
/// * `$cache`: The [`Cache`](crate::db::Cache) to use for retrieval and storage.
/// * `$key`: The [`CacheKey`](crate::db::CacheKey) for the value.
/// * `$ttl`: The time-to-live (TTL) for the cached value in seconds.
/// * `$block`: The future computing the value on a miss; it yields an `AppResult`.
///
/// # Example
/// ```rust,ignore
/// let score: f64 = cached!(cache, key, 3600, async move {
///     compute_similarity().await
/// })?;
/// ```
#[macro_export]
macro_rules! cached {
    ($cache:expr, $key:expr, $ttl:expr, $block:expr) => {{
        if let Some(cached) = $cache.get_from_cache(&$key).await {
            Ok(cached)
        } else {
            match $block.await {
                Ok(value) => {
                    $cache.set_in_background(&$key, &value, $ttl);
                    Ok(value)
                }
                Err(e) => Err(e),
            }
        }
    }};
}
