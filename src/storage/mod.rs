//! # Storage Layer
//!
//! Configuration, workspace layout and tree snapshots.
//!
//! ## Storage Formats
//!
//! | Data | Format | Location |
//! |------|--------|----------|
//! | Workspace config and state | TOML | `.buildtree/config.toml` |
//! | Global config | TOML | `<config dir>/buildtree/config.toml` |
//! | Tree snapshot | version tag + bincode | `.buildtree/tree.bin` |
//! | Watch log | text, rotated | `.buildtree/watch.log` |
//!
//! ## Concurrency Safety
//!
//! - [`SnapshotStore`] locks with `fs2` and writes through temp file + rename
//! - An unreadable snapshot is discarded whole, never partially applied
//!
//! ## Workspace Structure
//!
//! ```text
//! .buildtree/
//! ├── config.toml     # Settings plus managed files, profiles, ignores
//! ├── tree.bin        # Snapshot of the last known tree
//! ├── repository/     # Default local artifact repository
//! ├── watch.log       # Watch loop log
//! └── .gitignore
//! ```

mod config;
mod snapshot;
mod workspace;

pub use config::{
    Config, ConfigError, GeneralSettings, GlobalConfig, OutputFormat, PipelineSettings, WatchSettings,
    WorkspaceConfig, WorkspaceState, STATE_DIR,
};
pub use snapshot::{NodeSnapshot, SnapshotError, SnapshotStore, TreeSnapshot, SNAPSHOT_VERSION};
pub use workspace::{Workspace, WorkspaceError};
