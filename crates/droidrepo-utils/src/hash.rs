use std::{fs::File, io::Read, path::Path};

use sha2::{Digest, Sha256};

use crate::error::{HashError, HashResult};

/// Returns the lower-case hex SHA-256 digest of `data`.
pub fn sha256_hex(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

/// Calculates the SHA-256 checksum of a file.
///
/// The file is streamed through the hasher in fixed-size chunks, so arbitrarily large index
/// payloads can be hashed without loading them into memory. The result is a lower-case hex
/// string.
///
/// # Errors
///
/// * [`HashError::ReadFailed`] if the file cannot be opened or read.
///
/// # Example
///
/// ```no_run
/// use droidrepo_utils::error::HashResult;
/// use droidrepo_utils::hash::calculate_checksum;
///
/// fn main() -> HashResult<()> {
///     let checksum = calculate_checksum("/tmp/index-v2.json")?;
///     println!("sha256 is {}", checksum);
///     Ok(())
/// }
/// ```
pub fn calculate_checksum<P: AsRef<Path>>(file_path: P) -> HashResult<String> {
    let file_path = file_path.as_ref();
    let read_failed = |source| {
        HashError::ReadFailed {
            path: file_path.to_path_buf(),
            source,
        }
    };

    let mut file = File::open(file_path).map_err(read_failed)?;
    let mut hasher = Sha256::new();
    let mut buffer = [0u8; 8192];
    loop {
        let n = file.read(&mut buffer).map_err(read_failed)?;
        if n == 0 {
            break;
        }
        hasher.update(&buffer[..n]);
    }
    Ok(hex::encode(hasher.finalize()))
}

/// Verifies the checksum of a file against an expected value.
///
/// The comparison is case-insensitive, since repositories publish hashes in either case.
pub fn verify_checksum<P: AsRef<Path>>(file_path: P, expected: &str) -> HashResult<bool> {
    let actual = calculate_checksum(file_path)?;
    Ok(actual.eq_ignore_ascii_case(expected))
}

/// Computes the fingerprint of a hex-encoded signing certificate.
///
/// The fingerprint is the lower-case hex SHA-256 of the raw certificate bytes. This is the value
/// users compare out of band (e.g. from a QR code or a `?fingerprint=` link).
pub fn fingerprint(certificate_hex: &str) -> HashResult<String> {
    let bytes = hex::decode(certificate_hex.trim()).map_err(|_| {
        HashError::InvalidHex {
            input: certificate_hex.to_string(),
        }
    })?;
    Ok(sha256_hex(&bytes))
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use tempfile::NamedTempFile;

    use super::*;

    const HELLO_SHA256: &str = "a948904f2f0f479b8f8197694b30184b0d2ed1c1cd2a1ec0fb85d299a192a447";

    #[test]
    fn test_sha256_hex_empty() {
        assert_eq!(
            sha256_hex(b""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn test_calculate_checksum() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(b"hello world\n").unwrap();

        let checksum = calculate_checksum(file.path()).unwrap();
        assert_eq!(checksum, HELLO_SHA256);
    }

    #[test]
    fn test_verify_checksum_ignores_case() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(b"hello world\n").unwrap();

        assert!(verify_checksum(file.path(), &HELLO_SHA256.to_uppercase()).unwrap());
        assert!(!verify_checksum(file.path(), "deadbeef").unwrap());
    }

    #[test]
    fn test_calculate_checksum_file_not_found() {
        let result = calculate_checksum("/path/to/nonexistent/file");
        assert!(matches!(result, Err(HashError::ReadFailed { .. })));
    }

    #[test]
    fn test_fingerprint_matches_sha256_of_bytes() {
        let cert = hex::encode(b"hello world\n");
        assert_eq!(fingerprint(&cert).unwrap(), HELLO_SHA256);
        assert_eq!(fingerprint(&cert.to_uppercase()).unwrap(), HELLO_SHA256);
    }

    #[test]
    fn test_fingerprint_rejects_invalid_hex() {
        assert!(matches!(
            fingerprint("not-hex"),
            Err(HashError::InvalidHex { .. })
        ));
    }
}
