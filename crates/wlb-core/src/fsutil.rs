use std::io::Write;
use std::path::Path;

use anyhow::anyhow;
use tempfile::NamedTempFile;
use tracing::debug;

/// Replaces `path` with `contents` via a sibling temp file and rename, so
/// readers see either the old or the new file, never a partial one.
#[tracing::instrument(skip(path, contents))]
pub(crate) fn write_atomic(path: &Path, contents: &[u8]) -> anyhow::Result<()> {
    debug!(file = %path.display(), bytes = contents.len(), "writing file atomically");

    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let mut temp = NamedTempFile::new_in(dir)?;
    temp.write_all(contents)?;
    temp.flush()?;

    temp.persist(path)
        .map_err(|err| anyhow!("failed to persist {}: {}", path.display(), err))?;

    Ok(())
}
