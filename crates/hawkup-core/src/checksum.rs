//! SHA-1 digest of the downloaded bundle.
//!
//! The digest is computed over the final on-disk file, not incrementally
//! during the transfer, so resumed downloads verify correctly no matter how
//! many segments composed them.

use std::fs::File;
use std::io::{self, Read};
use std::path::Path;

use sha1::{Digest, Sha1};

const BUF_SIZE: usize = 64 * 1024;

/// Compute SHA-1 of a file and return the digest as lowercase hex.
/// Reads in chunks to keep memory use bounded; suitable for large bundles.
pub fn sha1_file(path: &Path) -> io::Result<String> {
    let mut f = File::open(path)?;
    let mut hasher = Sha1::new();
    let mut buf = [0u8; BUF_SIZE];
    loop {
        let n = f.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hex::encode(hasher.finalize()))
}
