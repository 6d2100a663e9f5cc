/// Configuration for the generation coordinator.
#[derive(Debug, Clone)]
pub struct GenerationConfig {
    /// Capacity of the broadcast channel carrying generation events.
    /// Slow subscribers past this many events see `Lagged`.
    pub event_capacity: usize,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self { event_capacity: 256 }
    }
}
