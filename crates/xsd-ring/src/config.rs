/// Configuration for a [`crate::ring::RingPage`].
///
/// A `Copy` value type with a `const fn new` that asserts its invariants at
/// construction, plus named presets for common ring sizes.
#[derive(Debug, Clone, Copy)]
pub struct Config {
    /// Ring size in bytes, must be a power of two.
    ring_size: usize,
}

impl Config {
    /// Creates a new configuration.
    ///
    /// # Panics
    ///
    /// Panics if `ring_size` is zero or not a power of two.
    pub const fn new(ring_size: usize) -> Self {
        assert!(ring_size > 0, "ring_size must be nonzero");
        assert!(ring_size.is_power_of_two(), "ring_size must be a power of two");
        Self { ring_size }
    }

    /// Returns the ring size in bytes.
    #[inline]
    pub const fn ring_size(&self) -> usize {
        self.ring_size
    }

    /// Returns the byte-index mask for wrapping (`index & mask`).
    #[inline]
    pub const fn mask(&self) -> u32 {
        (self.ring_size - 1) as u32
    }
}

impl Default for Config {
    fn default() -> Self {
        // Typical ring size used by most hypervisor platforms.
        Self::new(1024)
    }
}

/// Small ring for tests and constrained guests.
pub const SMALL_RING_CONFIG: Config = Config::new(256);

/// Default XenStore ring size used by most hypervisor platforms.
pub const STANDARD_RING_CONFIG: Config = Config::new(1024);
