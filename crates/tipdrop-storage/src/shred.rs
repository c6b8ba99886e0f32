//! Overwrite-then-unlink deletion
//!
//! Ciphertext blobs must not be recoverable from freed disk blocks, so a file
//! is overwritten in place with random bytes (fsync after every pass) before
//! it is unlinked. Symlinks are unlinked without touching their target.

use rand::RngCore;
use std::fs::{self, OpenOptions};
use std::io::{self, Seek, SeekFrom, Write};
use std::path::Path;

const OVERWRITE_BUF_SIZE: usize = 64 * 1024;

/// Overwrite `path` with `passes` rounds of random data, then remove it.
///
/// Fails with `NotFound` if the file does not exist and `InvalidInput` if it
/// is not a regular file.
pub fn shred_file(path: &Path, passes: u32) -> io::Result<()> {
    let meta = fs::symlink_metadata(path)?;
    if !meta.file_type().is_file() {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("refusing to shred non-regular file: {}", path.display()),
        ));
    }

    let len = meta.len();
    if len > 0 && passes > 0 {
        let mut file = OpenOptions::new().write(true).open(path)?;
        let mut buf = vec![0u8; OVERWRITE_BUF_SIZE];
        let mut rng = rand::thread_rng();
        for _ in 0..passes {
            file.seek(SeekFrom::Start(0))?;
            let mut remaining = len;
            while remaining > 0 {
                let n = remaining.min(OVERWRITE_BUF_SIZE as u64) as usize;
                rng.fill_bytes(&mut buf[..n]);
                file.write_all(&buf[..n])?;
                remaining -= n as u64;
            }
            file.sync_all()?;
        }
        file.set_len(0)?;
        file.sync_all()?;
    }

    fs::remove_file(path)
}

/// Shred every regular file below `dir`, unlink symlinks, and remove the
/// emptied directories including `dir` itself. Returns the number of files
/// shredded.
pub fn shred_tree(dir: &Path, passes: u32) -> io::Result<usize> {
    let mut shredded = 0;
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        let file_type = entry.file_type()?;
        if file_type.is_dir() {
            shredded += shred_tree(&path, passes)?;
        } else if file_type.is_file() {
            shred_file(&path, passes)?;
            shredded += 1;
        } else {
            fs::remove_file(&path)?;
        }
    }
    fs::remove_dir(dir)?;
    Ok(shredded)
}
