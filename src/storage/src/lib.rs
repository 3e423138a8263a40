use std::io;
use std::path::Path;

use tokio::io::AsyncWriteExt;

pub mod mmap;

/// replace_file stages data under `<path>tmp`, fsyncs it, then renames it
/// over path so the target is either the old content or the new content,
/// never a torn write.
pub async fn replace_file(path: impl AsRef<Path>, data: &[u8]) -> io::Result<()> {
    let path = path.as_ref();
    let mut tmp = path.as_os_str().to_owned();
    tmp.push("tmp");

    let mut f = tokio::fs::File::create(&tmp).await?;
    f.write_all(data).await?;
    f.sync_all().await?;
    drop(f);

    tokio::fs::rename(&tmp, path).await
}

/// remove_file_if_exists unlinks path, treating a missing file as success.
pub async fn remove_file_if_exists(path: impl AsRef<Path>) -> io::Result<()> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}
