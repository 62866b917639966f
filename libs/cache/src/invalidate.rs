//! Invalidation seam between the resolver and the caches it guards

/// A cache that can be emptied on demand
///
/// The config resolver holds a list of these and clears all of them when it
/// detects that the upstream source changed.
pub trait CacheInvalidation: Send + Sync {
    /// Drop every entry
    fn invalidate(&self);

    /// Name used in logs
    fn cache_name(&self) -> &str;
}
