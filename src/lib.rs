//! Dual-mode wrapper around the low-level OCI runtime.
//!
//! The same binary plays two roles, selected by the path it is invoked
//! under:
//!
//! 1. The bundle rewriter, invoked by the container runtime daemon in place
//!    of runc. It injects the in-container supervisor into the OCI bundle of
//!    every managed exec, then execs the real runtime.
//! 2. The in-container supervisor, running as the container's init process
//!    at [`SHIM_PATH`]. It runs the requested user command with stdio
//!    capture, control-plane proxying, and exit-code recording.

pub mod bundle;
mod error;
pub mod proxy;
pub mod runtime;
pub mod supervisor;

pub use error::ShimError;

/// Mount destination that marks a container execution as a managed exec.
pub const META_MOUNT_PATH: &str = "/.dagger_meta_mount";

/// Default source for the child's standard input, inside the meta mount.
pub const STDIN_PATH: &str = "/.dagger_meta_mount/stdin";

/// Default capture destination for the child's standard output.
pub const STDOUT_PATH: &str = "/.dagger_meta_mount/stdout";

/// Default capture destination for the child's standard error.
pub const STDERR_PATH: &str = "/.dagger_meta_mount/stderr";

/// Where the supervisor records the child's decimal exit status.
pub const EXIT_CODE_PATH: &str = "/.dagger_meta_mount/exitCode";

/// The real low-level runtime this binary stands in for.
pub const RUNC_PATH: &str = "/usr/bin/buildkit-runc";

/// In-container path the supervisor binary is bind-mounted at. Also the
/// argv[0] the entry dispatcher keys on to select the supervisor role.
pub const SHIM_PATH: &str = "/_shim";
