/// Window-local catalog state
///
/// - Records and the identifier/status types (data.rs)
/// - Canonical copy of the backend collection (store.rs)
/// - In-flight mutations layered over it (overlay.rs)
/// - Search, status filter and sort order (projection.rs)

pub mod data;
pub mod overlay;
pub mod projection;
pub mod store;
