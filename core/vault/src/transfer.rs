//! Streaming import and export pipelines.
//!
//! Transfers move one buffer per integrity chunk and poll the cancellation
//! token between chunks. A cancelled transfer returns `Cancelled` and leaves
//! whatever it already wrote in place; callers decide whether to clean up.

use driftvault_common::{CancelToken, Error, Result};
use driftvault_crypto::integrity::DEFAULT_CHUNK_SIZE;
use driftvault_storage::StorageEntry;

use crate::drive::{Drive, FileMode};

fn buffer_size(drive: &Drive) -> usize {
    let chunk = drive.meta().chunk_size;
    if chunk > 0 {
        chunk as usize
    } else {
        DEFAULT_CHUNK_SIZE as usize
    }
}

fn check_cancel(cancel: Option<&CancelToken>) -> Result<()> {
    match cancel {
        Some(token) => token.check(),
        None => Ok(()),
    }
}

/// Encrypt a plaintext entry into the vault under `dest_name`.
///
/// Returns the number of plaintext bytes imported.
///
/// # Errors
/// - `NotFound` if the source does not exist
/// - `Cancelled` if the token fires between chunks; partial output stands
pub fn import_file(
    drive: &Drive,
    source: &dyn StorageEntry,
    dest_name: &str,
    cancel: Option<&CancelToken>,
) -> Result<u64> {
    if !source.exists() {
        return Err(Error::NotFound(format!(
            "Import source {:?} does not exist",
            source.name()
        )));
    }
    let mut input = source.open_read()?;
    let mut output = drive.create_file(dest_name)?;

    let mut buf = vec![0u8; buffer_size(drive)];
    let mut offset = 0u64;
    loop {
        check_cancel(cancel)?;
        let n = input.read_at(offset, &mut buf)?;
        if n == 0 {
            break;
        }
        output.write(&buf[..n])?;
        offset += n as u64;
    }
    output.flush()?;
    tracing::info!(
        drive = %drive.drive_id(),
        file = dest_name,
        bytes = offset,
        "import complete"
    );
    Ok(offset)
}

/// Decrypt a vault file into a plaintext entry.
///
/// Returns the number of plaintext bytes exported.
///
/// # Errors
/// - `NotFound` if the vault has no such file
/// - `Integrity` if any chunk fails verification; output up to that chunk
///   has already been written
/// - `Cancelled` if the token fires between chunks; partial output stands
pub fn export_file(
    drive: &Drive,
    name: &str,
    dest: &dyn StorageEntry,
    cancel: Option<&CancelToken>,
) -> Result<u64> {
    let mut input = drive.open_file(name, FileMode::Read)?;
    let mut output = dest.create()?;

    let mut buf = vec![0u8; buffer_size(drive)];
    let mut offset = 0u64;
    loop {
        check_cancel(cancel)?;
        let n = input.read(&mut buf)?;
        if n == 0 {
            break;
        }
        output.write_at(offset, &buf[..n])?;
        offset += n as u64;
    }
    output.flush()?;
    tracing::info!(
        drive = %drive.drive_id(),
        file = name,
        bytes = offset,
        "export complete"
    );
    Ok(offset)
}
