//! Tether runtime: hierarchical resource sessions over pluggable drivers.
//!
//! - **Registry**: one id-keyed store per hierarchy level, ids never reused
//! - **Session tree**: parent/child wiring across registries and cascade-close
//! - **Turns**: FIFO single-flight guard so work on one id never interleaves
//! - **Driver**: the seam to the controlled program (tmux, a browser, ...)
//!
//! ```text
//! ┌──────────────┐
//! │ SessionTree  │  create / invoke / close / list
//! │  ┌────────┐  │
//! │  │Registry│  │  level 0 (e.g. instance)
//! │  ├────────┤  │
//! │  │Registry│  │  level 1 (e.g. context)
//! │  ├────────┤  │
//! │  │Registry│  │  level 2 (e.g. surface)
//! │  └────────┘  │
//! └──────┬───────┘
//!        │ Driver trait
//! ┌──────▼───────┐
//! │ external     │
//! │ program      │
//! └──────────────┘
//! ```

pub mod driver;
pub mod error;
pub mod hierarchy;
pub mod memory;
pub mod registry;
pub mod tree;
pub mod turn;

pub use driver::{Driver, DriverError, DriverResult, Outcome, Spawned};
pub use error::{Error, Result};
pub use hierarchy::Hierarchy;
pub use memory::{MemoryDriver, MemoryHandle};
pub use registry::{IdGenerator, Metadata, Registry, RegistryError, ResourceEntry, ResourceInfo};
pub use tree::{CloseFailure, CloseReport, SessionTree, ShutdownReport, TreeNode, TreeOptions};
