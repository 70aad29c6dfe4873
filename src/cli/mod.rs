//! # Command-Line Interface
//!
//! User-facing commands and output formatting.
//!
//! ## Command Groups
//!
//! | Group | Purpose | Examples |
//! |-------|---------|----------|
//! | Core | Workspace setup | `init` |
//! | Projects | Managed files, profiles, ignores | `add`, `remove`, `profiles`, `ignore` |
//! | Pipeline | Reading and resolution | `update`, `resolve` |
//! | Query | Tree inspection | `tree`, `show`, `find`, `problems` |
//! | Watch | Keep the tree current | `watch` |
//!
//! ## Output Formats
//!
//! All commands support `--format` flag:
//! - `text` (default) - Human-readable output
//! - `json` - Machine-parseable JSON
//!
//! Without the flag the global config's `default_format` applies.
//!
//! ## Logging
//!
//! Diagnostics go to stderr through `tracing`. `--verbose` (or `-v`) raises
//! the level to debug; `BUILDTREE_LOG` accepts any `EnvFilter` directive:
//! ```bash
//! BUILDTREE_LOG=buildtree=trace buildtree update --force
//! ```
//!
//! ## Entry Point
//!
//! Call [`run()`] to parse arguments and execute the appropriate command.

mod app;
mod output;
mod project_cmd;
mod query;
mod watch;

pub use app::{run, Cli, Commands};
pub use output::{Output, OutputFormat};
