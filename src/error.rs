use thiserror::Error;

#[derive(Error, Debug)]
pub enum ShimError {
    #[error("missing bundle path")]
    MissingBundlePath,

    #[error("no command given")]
    EmptyCommand,

    #[error("oci spec error: {0}")]
    OciSpec(String),

    #[error("invalid control-plane address: {0}")]
    InvalidAddress(String),

    #[error("exec {path}: {source}")]
    Exec { path: String, source: nix::Error },

    #[error("argument contains nul byte: {0}")]
    Nul(#[from] std::ffi::NulError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}
