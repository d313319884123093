//! Streaming MD5 fingerprints.

use crate::{
    errors::{SyncError, SyncResult},
    models::candidate::ContentHash,
};
use md5::Context;
use std::{io, path::Path};
use tokio::{
    fs::File,
    io::{AsyncRead, AsyncReadExt},
};

/// Read size for hashing and for upload bodies.
pub const CHUNK_SIZE: usize = 64 * 1024;

/// Fingerprint a file's bytes, reading it in `CHUNK_SIZE` pieces.
pub async fn hash_file(path: &Path) -> SyncResult<ContentHash> {
    let file = File::open(path)
        .await
        .map_err(|err| SyncError::io(path, err))?;
    hash_reader(file)
        .await
        .map_err(|err| SyncError::io(path, err))
}

/// Fingerprint everything `reader` yields until EOF. Memory use is one chunk.
pub async fn hash_reader<R: AsyncRead + Unpin>(mut reader: R) -> io::Result<ContentHash> {
    let mut digest = Context::new();
    let mut buf = vec![0u8; CHUNK_SIZE];
    loop {
        let n = reader.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        digest.consume(&buf[..n]);
    }
    Ok(digest.compute().into())
}
