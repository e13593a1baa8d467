//! Runtime configuration.

/// Tunables for the streaming pipeline. Constructed once by the embedding
/// application and shared (read-only) across the scheduler, content
/// manager, and processing graph.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StreamingConfig {
    /// Whether new loads may be started this tick at all; toggled off to
    /// freeze the current view (e.g. while the embedding app is paused).
    pub streaming_mode: StreamingMode,
    /// Soft budget, in milliseconds, for main-thread work per tick across
    /// the whole processing graph.
    pub main_thread_time_limit_ms: f64,
    /// Concurrency cap on in-flight content requests (matches the teacher's
    /// `in_flight` dedup set, generalized from a fixed constant to a
    /// configured limit).
    pub maximum_simultaneous_content_requests: usize,
    /// Used by bounding-sphere math for `Region` volumes expressed in
    /// geodetic coordinates.
    pub planet_radius_meters: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamingMode {
    Enabled,
    Paused,
}

impl Default for StreamingConfig {
    fn default() -> Self {
        Self {
            streaming_mode: StreamingMode::Enabled,
            main_thread_time_limit_ms: 8.0,
            maximum_simultaneous_content_requests: 32,
            planet_radius_meters: 6_378_137.0,
        }
    }
}
