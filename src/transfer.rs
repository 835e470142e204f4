//! Transient host files used to stage uploads into a service.
//!
//! Staged files live in the system temporary directory and are deleted when
//! the returned handle drops, on success and failure alike.

use crate::error::Result;
use crate::gateway::RuntimeGateway;
use std::io::Write;
use tempfile::NamedTempFile;
use tokio::io::{AsyncRead, AsyncWriteExt};
use tokio_util::sync::CancellationToken;

pub(crate) fn stage_bytes(contents: &[u8]) -> Result<NamedTempFile> {
    let mut staged = NamedTempFile::new()?;
    staged.write_all(contents)?;
    staged.flush()?;
    Ok(staged)
}

pub(crate) async fn stage_reader<R>(reader: &mut R) -> Result<NamedTempFile>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let staged = NamedTempFile::new()?;
    let mut file = tokio::fs::File::from_std(staged.reopen()?);
    tokio::io::copy(reader, &mut file).await?;
    file.flush().await?;
    Ok(staged)
}

/// Uploads `staged` and drops it afterwards, whatever the outcome.
pub(crate) async fn upload(
    gateway: &dyn RuntimeGateway,
    service_id: &str,
    staged: NamedTempFile,
    destination: &str,
    owner: Option<&str>,
    permissions: Option<&str>,
    cancel: &CancellationToken,
) -> Result<()> {
    let result = gateway
        .add_file(
            service_id,
            staged.path(),
            destination,
            owner,
            permissions,
            cancel,
        )
        .await;
    let closed = staged.close();
    result?;
    Ok(closed?)
}
