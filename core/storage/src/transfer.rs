//! Copy and move orchestration across providers.
//!
//! Both operations first ask the source whether a native transfer toward the
//! destination is possible. A native attempt that declines with
//! `Error::NotSupported` falls through to the generic path, which streams
//! `download` on the source into `upload` on the destination. Any other
//! error aborts the operation as-is.
//!
//! A generic move deletes the source only after the copy has returned
//! successfully, so the data is never absent from both sides. Dropping the
//! returned future cancels the in-flight step and no later step runs.

use tracing::{debug, warn};

use unistore_common::{Error, Metadata, Options, Result};

use crate::provider::StorageProvider;

/// Copy an entry from `source` to `dest`.
pub async fn copy<S>(
    source: &S,
    dest: &dyn StorageProvider,
    source_options: &Options,
    dest_options: &Options,
) -> Result<Metadata>
where
    S: StorageProvider + ?Sized,
{
    if source.can_intra_copy(dest) {
        debug!(from = source.name(), to = dest.name(), "attempting native copy");
        match source.intra_copy(dest, source_options, dest_options).await {
            Err(e) if e.is_not_supported() => {
                debug!(reason = %e, "native copy declined, streaming instead");
            }
            result => return result,
        }
    }

    stream_copy(source, dest, source_options, dest_options).await
}

/// Move an entry from `source` to `dest`.
///
/// # Errors
/// - Whatever the copy step returned, with the source untouched
/// - `Error::PartialMove` if the copy succeeded but deleting the source
///   failed
pub async fn move_to<S>(
    source: &S,
    dest: &dyn StorageProvider,
    source_options: &Options,
    dest_options: &Options,
) -> Result<Metadata>
where
    S: StorageProvider + ?Sized,
{
    if source.can_intra_move(dest) {
        debug!(from = source.name(), to = dest.name(), "attempting native move");
        match source.intra_move(dest, source_options, dest_options).await {
            Err(e) if e.is_not_supported() => {
                debug!(reason = %e, "native move declined, copying instead");
            }
            result => return result,
        }
    }

    let metadata = copy(source, dest, source_options, dest_options).await?;

    if let Err(e) = source.delete(source_options).await {
        warn!(provider = source.name(), error = %e, "copied but failed to delete source");
        return Err(Error::partial_move(metadata, e));
    }

    Ok(metadata)
}

async fn stream_copy<S>(
    source: &S,
    dest: &dyn StorageProvider,
    source_options: &Options,
    dest_options: &Options,
) -> Result<Metadata>
where
    S: StorageProvider + ?Sized,
{
    debug!(from = source.name(), to = dest.name(), "streaming copy");
    let stream = source.download(source_options).await?;
    dest.upload(stream, dest_options).await
}
