//! SHA-256 digests of staged artifacts

use crate::error::Result;
use sha2::{Digest, Sha256};
use std::fmt;
use std::io::Read;
use std::path::Path;

const READ_BUFFER_SIZE: usize = 8192;

/// SHA-256 digest and byte length of a file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileDigest {
    pub hex: String,
    pub size: u64,
}

impl fmt::Display for FileDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sha256:{}", self.hex)
    }
}

/// Compute the digest and size of a file in one pass
pub fn digest_file(path: impl AsRef<Path>) -> Result<FileDigest> {
    let mut file = std::fs::File::open(path)?;
    digest_reader(&mut file)
}

fn digest_reader<R: Read>(reader: &mut R) -> Result<FileDigest> {
    let mut hasher = Sha256::new();
    let mut buffer = [0u8; READ_BUFFER_SIZE];
    let mut size = 0u64;

    loop {
        let bytes_read = reader.read(&mut buffer)?;
        if bytes_read == 0 {
            break;
        }
        hasher.update(&buffer[..bytes_read]);
        size += bytes_read as u64;
    }

    Ok(FileDigest {
        hex: hex::encode(hasher.finalize()),
        size,
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::error::CommonError;
    use std::io::{Cursor, Write};

    #[test]
    fn test_digest_reader_sha256() {
        let mut cursor = Cursor::new(b"hello world");
        let digest = digest_reader(&mut cursor).unwrap();
        assert_eq!(digest.hex, "b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9");
        assert_eq!(digest.size, 11);
    }

    #[test]
    fn test_digest_file_reports_size() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"hello world").unwrap();

        let digest = digest_file(file.path()).unwrap();
        assert_eq!(digest.size, 11);
        assert_eq!(
            digest.to_string(),
            "sha256:b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9"
        );
    }

    #[test]
    fn test_digest_empty_file() {
        let file = tempfile::NamedTempFile::new().unwrap();

        let digest = digest_file(file.path()).unwrap();
        assert_eq!(digest.size, 0);
        assert_eq!(digest.hex, "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855");
    }

    #[test]
    fn test_digest_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = digest_file(dir.path().join("absent.json")).unwrap_err();
        assert!(matches!(err, CommonError::Io(_)));
    }
}
