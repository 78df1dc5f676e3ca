//! PEM persistence for issued keys and certificates.

use std::fs;
use std::io::Write;
use std::path::Path;

use tracing::debug;

use super::Bundle;
use crate::{Error, Result};

/// Write `bundle`'s private key to `key_path` and certificate to `cert_path`.
///
/// The key is written first; a failure on either file aborts the issuance.
pub fn write_bundle(bundle: &Bundle, key_path: &Path, cert_path: &Path) -> Result<()> {
    write_pem(key_path, &bundle.key_pem(), true)?;
    write_pem(cert_path, &bundle.cert_pem(), false)?;
    debug!(key = %key_path.display(), certificate = %cert_path.display(), "Bundle persisted");
    Ok(())
}

/// Create or truncate `path` and write `contents`, creating parent directories.
///
/// Private material is readable by the owner only on Unix.
pub fn write_pem(path: &Path, contents: &str, private: bool) -> Result<()> {
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        fs::create_dir_all(dir).map_err(|e| Error::file(dir, &e))?;
    }

    let mut options = fs::OpenOptions::new();
    options.create(true).write(true).truncate(true);

    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(if private { 0o600 } else { 0o644 });
    }
    #[cfg(not(unix))]
    let _ = private;

    let mut file = options.open(path).map_err(|e| Error::file(path, &e))?;
    file.write_all(contents.as_bytes())
        .map_err(|e| Error::file(path, &e))?;
    Ok(())
}
