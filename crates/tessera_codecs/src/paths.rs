//! Stream helpers for build paths and file system paths.

use std::path::{Path as FsPath, PathBuf};
use tessera_common::Path;
use tessera_graph::{DecodeError, EncodeError, ReadContext, WriteContext};

pub(crate) fn write_path(ctx: &mut WriteContext, path: &Path) -> Result<(), EncodeError> {
    ctx.write_str(&path.to_string())
}

pub(crate) fn read_path(ctx: &mut ReadContext) -> Result<Path, DecodeError> {
    let text = ctx.read_string()?;
    Path::parse(&text).map_err(|e| DecodeError::Stream(format!("bad path '{text}': {e}")))
}

pub(crate) fn write_file(ctx: &mut WriteContext, path: &FsPath) -> Result<(), EncodeError> {
    let text = path.to_str().ok_or_else(|| EncodeError::Illegal {
        what: format!("file '{}'", path.display()),
        reason: "path is not valid UTF-8".to_string(),
    })?;
    ctx.write_str(text)
}

pub(crate) fn read_file(ctx: &mut ReadContext) -> Result<PathBuf, DecodeError> {
    Ok(PathBuf::from(ctx.read_string()?))
}
