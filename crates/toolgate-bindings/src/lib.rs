//! # toolgate-bindings
//!
//! Typed TypeScript bindings generated from the live tool catalog.
//!
//! Scripts executed in the sandbox never speak the protocol directly;
//! they import generated stubs:
//!
//! ```text
//! <root>/generated/
//!   ├── client.ts                    shared invoke() helper
//!   └── servers/
//!       ├── index.ts                 export * as bash, docs, ...
//!       ├── bash/
//!       │   ├── index.ts
//!       │   ├── read_file.ts
//!       │   └── list_directory.ts
//!       └── docs/...
//! ```

mod generator;
pub mod schema;

pub use generator::{BindingGenerator, GeneratedBindings};

use thiserror::Error;

/// Errors during binding generation.
#[derive(Error, Debug)]
pub enum BindingError {
    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
