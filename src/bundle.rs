use crate::error::ShimError;
use crate::runtime;
use crate::{META_MOUNT_PATH, SHIM_PATH};
use oci_spec::runtime::{MountBuilder, Spec};
use std::convert::Infallible;
use std::path::{Path, PathBuf};

/// Bundle rewriter entry point, invoked by the container runtime daemon in
/// place of the low-level runtime.
///
/// For container-creation invocations (`--bundle <dir>` present) the
/// bundle's `config.json` is inspected and, when the meta mount marks it as
/// a managed exec, rewritten to make the supervisor the init process. Every
/// invocation ends by execing the real runtime with the original arguments,
/// so this returns only on error.
pub fn setup_bundle(args: &[String]) -> Result<Infallible, ShimError> {
    let Some(dir) = bundle_dir(args)? else {
        // Some other runtime subcommand (state, kill, delete, ...). Never
        // block or alter those, just pass through.
        return runtime::exec_runtime(args);
    };

    let self_path = std::fs::canonicalize(std::env::current_exe()?)?;
    let config_path = dir.join("config.json");

    if rewrite_config(&config_path, &self_path)? {
        tracing::info!(bundle = %dir.display(), "injected supervisor into bundle");
    }

    // The runtime re-reads the (possibly rewritten) bundle from disk.
    runtime::exec_runtime(args)
}

/// Locate the value of the `--bundle` flag among otherwise opaque runtime
/// arguments. `Ok(None)` means this is not a container-creation invocation.
fn bundle_dir(args: &[String]) -> Result<Option<PathBuf>, ShimError> {
    for (i, arg) in args.iter().enumerate() {
        if arg == "--bundle" {
            return match args.get(i + 1) {
                Some(dir) => Ok(Some(PathBuf::from(dir))),
                None => Err(ShimError::MissingBundlePath),
            };
        }
    }
    Ok(None)
}

/// Inject the supervisor into a bundle's `config.json` when the meta mount
/// is present: the binary at `self_path` is bind-mounted read-only at
/// [`SHIM_PATH`] and that path is prepended to the process argument list, so
/// the original command becomes the supervisor's own arguments.
///
/// Bundles without the meta mount are left byte-for-byte untouched on disk.
/// Returns whether the file was rewritten.
pub fn rewrite_config(config_path: &Path, self_path: &Path) -> Result<bool, ShimError> {
    let config_bytes = std::fs::read_to_string(config_path)?;
    let mut spec: Spec = serde_json::from_str(&config_bytes)?;

    let is_managed_exec = spec.mounts().as_ref().is_some_and(|mounts| {
        mounts
            .iter()
            .any(|m| m.destination().as_path() == Path::new(META_MOUNT_PATH))
    });
    if !is_managed_exec {
        return Ok(false);
    }

    let shim_mount = MountBuilder::default()
        .destination(SHIM_PATH)
        .typ("bind")
        .source(self_path)
        .options(vec!["rbind".to_string(), "ro".to_string()])
        .build()
        .map_err(|e| ShimError::OciSpec(e.to_string()))?;

    let mut mounts = spec.mounts().clone().unwrap_or_default();
    mounts.push(shim_mount);
    spec.set_mounts(Some(mounts));

    let mut process = spec
        .process()
        .clone()
        .ok_or_else(|| ShimError::OciSpec("bundle config has no process".to_string()))?;
    let mut proc_args = process.args().clone().unwrap_or_default();
    proc_args.insert(0, SHIM_PATH.to_string());
    process.set_args(Some(proc_args));
    spec.set_process(Some(process));

    std::fs::write(config_path, serde_json::to_string(&spec)?)?;
    Ok(true)
}
