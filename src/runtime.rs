use crate::RUNC_PATH;
use crate::error::ShimError;
use std::convert::Infallible;
use std::ffi::CString;

/// Replace the current process image with the real low-level runtime,
/// passing through every argument after argv[0] and the current environment.
///
/// On success this never returns: the process becomes the runtime. An `Err`
/// means the exec itself failed (binary missing, permission denied).
pub fn exec_runtime(args: &[String]) -> Result<Infallible, ShimError> {
    let path = CString::new(RUNC_PATH)?;
    let mut argv = Vec::with_capacity(args.len().max(1));
    argv.push(path.clone());
    for arg in args.iter().skip(1) {
        argv.push(CString::new(arg.as_str())?);
    }

    tracing::debug!(runtime = RUNC_PATH, "handing off to low-level runtime");

    // execv inherits the current environment unchanged.
    nix::unistd::execv(&path, &argv).map_err(|source| ShimError::Exec {
        path: RUNC_PATH.to_string(),
        source,
    })
}
