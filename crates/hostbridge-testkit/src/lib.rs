//! HostBridge test kit
//!
//! In-memory doubles for both sides of the bridge:
//! - `FakeRuntime`: a `ForeignRuntime` that hands out pointers from
//!   per-category ranges and keeps an exhaustive call and disposal log
//! - `FakeHost`: a `NativeHost` with spawnable, destroyable objects and a
//!   configurable native type table
//!
//! Both are cheap `Clone` views over shared state, so a test can move one
//! copy into a bridge context and keep another to inspect afterwards.

#![warn(missing_docs)]

mod host;
mod runtime;

pub use host::FakeHost;
pub use runtime::{Disposal, FakeRuntime, InvokeHandler, RuntimeCall};

/// Pointer ranges used by `FakeRuntime`, one per category
pub mod ranges {
    /// Module tokens
    pub const MODULES: usize = 0x1000_0000;
    /// Type tokens
    pub const TYPES: usize = 0x2000_0000;
    /// Method tokens
    pub const METHODS: usize = 0x3000_0000;
    /// Object handles
    pub const OBJECTS: usize = 0x4000_0000;
    /// Interface wrapper handles
    pub const WRAPPERS: usize = 0x5000_0000;
    /// Delegate handles
    pub const DELEGATES: usize = 0x6000_0000;

    /// Width of each range
    pub const WIDTH: usize = 0x1000_0000;

    /// Check whether `addr` falls in the range starting at `base`
    pub fn contains(base: usize, addr: usize) -> bool {
        addr >= base && addr < base + WIDTH
    }
}

/// Install a test logger (idempotent)
pub fn init_logging() {
    let _ = env_logger::builder()
        .is_test(true)
        .filter_level(log::LevelFilter::Debug)
        .try_init();
}
