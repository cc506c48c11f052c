//! Read model trait for query-side views.

/// Query access to a view maintained by a projection.
pub trait ReadModel: Send + Sync {
    fn name(&self) -> &'static str;

    /// Number of entries in the view. Reads the current state without
    /// waiting, so a view being written reports zero.
    fn count(&self) -> usize;
}
