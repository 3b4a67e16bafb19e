//! Hard safety invariants enforced before any tool effect.
//!
//! Three independent checkers, all deny-before-execute:
//!   - [`command`]: destructive shell command gating with obfuscation
//!     normalization and a confirmation callback.
//!   - [`path`]: filesystem sandboxing with symlink-resolving
//!     canonicalization and always-blocked sensitive paths.
//!   - [`url`]: outbound URL validation (scheme, private/metadata hosts,
//!     internal-service ports) with DNS resolution of every address.
//!
//! None of these aim to be an airtight OS-level sandbox; they catch the
//! footgun patterns an LLM is most likely to emit.

pub mod command;
pub mod path;
pub mod url;

pub use command::{check_command, CommandGate, ConfirmCallback};
pub use path::PathSandbox;
pub use url::validate_url;
