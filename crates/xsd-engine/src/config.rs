/// Engine-wide tuning knobs.
#[derive(Debug, Clone, Copy)]
pub struct Config {
    /// Maximum number of concurrently connected domains (worker-pool slots).
    dom_max: usize,
    /// Ring size handed to each domain's [`xsd_ring::RingPage`].
    ring_size: usize,
}

impl Config {
    /// # Panics
    ///
    /// Panics if `dom_max` is zero or `ring_size` is not a power of two.
    pub const fn new(dom_max: usize, ring_size: usize) -> Self {
        assert!(dom_max > 0, "dom_max must be nonzero");
        assert!(ring_size.is_power_of_two(), "ring_size must be a power of two");
        Self { dom_max, ring_size }
    }

    #[inline]
    pub const fn dom_max(&self) -> usize {
        self.dom_max
    }

    #[inline]
    pub const fn ring_size(&self) -> usize {
        self.ring_size
    }
}

impl Default for Config {
    fn default() -> Self {
        // Typical platform limits: a few dozen concurrent guests, the
        // standard 1024-byte ring.
        Self::new(32, 1024)
    }
}

/// Small pool for tests and constrained guests.
pub const SMALL_ENGINE_CONFIG: Config = Config::new(4, 256);

/// Default engine configuration used by most deployments.
pub const STANDARD_ENGINE_CONFIG: Config = Config::new(32, 1024);
