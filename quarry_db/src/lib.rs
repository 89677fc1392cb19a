//! # Quarry
//! A small relational database built on the `granite` storage engine. This
//! crate holds the pieces that sit above the engine: table statistics for a
//! cost-based planner, a minimal operator set, and catalog loading.

/// Loading table definitions from a catalog file.
pub mod catalog;
/// The operator set.
pub mod executor;
/// Histograms and per-table statistics.
pub mod stats;

pub fn debug_logs_enabled() -> bool {
    std::env::var_os("QUARRY_DEBUG_LOG").is_some()
}

#[macro_export]
macro_rules! quarry_debug_log {
    ($($arg:tt)*) => {
        if $crate::debug_logs_enabled() {
            println!($($arg)*);
        }
    };
}
