//! Signed archive verification.
//!
//! Repositories publish their entry point (`entry.jar`) and the legacy index (`index-v1.jar`)
//! as signed ZIP archives laid out like a Java jar:
//!
//! * `META-INF/MANIFEST.MF` lists every content entry with its `SHA-256-Digest`;
//! * `META-INF/<ALIAS>.SF` carries the `SHA-256-Digest-Manifest` of the manifest;
//! * `META-INF/<ALIAS>.SIG` holds the ed25519 public key (the repository certificate) followed
//!   by the signature over the `.SF` file.
//!
//! The certificate is exchanged as lower-case hex; its fingerprint is the SHA-256 of the raw key.

use std::{
    collections::BTreeMap,
    fs,
    io::{Cursor, Read, Write},
    path::Path,
};

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use ed25519_dalek::{
    Signature, Signer, SigningKey, Verifier, VerifyingKey, PUBLIC_KEY_LENGTH, SIGNATURE_LENGTH,
};
use sha2::{Digest, Sha256};
use tracing::debug;
use zip::{write::FileOptions, ZipArchive, ZipWriter};

use crate::error::{ErrorContext, IndexError, Result};

pub const MANIFEST_NAME: &str = "META-INF/MANIFEST.MF";
pub const SUPPORTED_DIGEST: &str = "SHA-256-Digest";
pub const MANIFEST_DIGEST: &str = "SHA-256-Digest-Manifest";

/// Upper bound for buffers sized from the untrusted sizes in the ZIP directory.
const MAX_PREALLOCATION: u64 = 1 << 20;

/// The trusted content of a verified archive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifiedJar {
    /// Certificate that signed the archive, lower-case hex.
    pub certificate: String,
    pub payload: Vec<u8>,
}

/// Verifies signed archives against what is known about a repository.
///
/// With an expected certificate the embedded one must match it exactly. Without one, an expected
/// fingerprint must match the embedded certificate. With neither, the embedded certificate is
/// trusted on first use and returned so the caller can pin it.
#[derive(Debug, Clone, Default)]
pub struct JarVerifier {
    expected_certificate: Option<String>,
    expected_fingerprint: Option<String>,
}

impl JarVerifier {
    pub fn new(expected_certificate: Option<&str>, expected_fingerprint: Option<&str>) -> Self {
        Self {
            expected_certificate: expected_certificate.map(str::to_ascii_lowercase),
            expected_fingerprint: expected_fingerprint.map(|f| f.trim().to_ascii_lowercase()),
        }
    }

    pub fn verify_file(&self, path: &Path, payload_name: &str) -> Result<VerifiedJar> {
        let bytes = fs::read(path).with_context(|| format!("reading {}", path.display()))?;
        self.verify(&bytes, payload_name)
    }

    /// Verifies `jar` and returns the certificate together with the `payload_name` entry.
    pub fn verify(&self, jar: &[u8], payload_name: &str) -> Result<VerifiedJar> {
        let entries = read_entries(jar)?;

        let signature_blocks: Vec<&String> = entries
            .keys()
            .filter(|name| {
                let upper = name.to_ascii_uppercase();
                upper.starts_with("META-INF/") && upper.ends_with(".SIG")
            })
            .collect();
        let [block_name] = signature_blocks.as_slice() else {
            return Err(IndexError::signing(format!(
                "Expected exactly one signature block, found {}",
                signature_blocks.len()
            )));
        };

        let alias = &block_name[..block_name.len() - ".SIG".len()];
        let sf_name = format!("{alias}.SF").to_ascii_uppercase();
        let signature_file = entries
            .iter()
            .find(|(name, _)| name.to_ascii_uppercase() == sf_name)
            .map(|(_, content)| content)
            .ok_or_else(|| IndexError::signing(format!("Missing signature file for {alias}")))?;
        let certificate = verify_block(&entries[*block_name], signature_file)?;

        let sf = parse_manifest(signature_file)?;
        let manifest = entries
            .get(MANIFEST_NAME)
            .ok_or_else(|| IndexError::signing("Missing manifest"))?;
        let declared = match sf.main.get(MANIFEST_DIGEST) {
            Some(digest) => digest,
            None => {
                let other = sf.main.keys().find(|k| k.ends_with("-Digest-Manifest"));
                return Err(match other {
                    Some(key) => IndexError::signing(format!("Unsupported digest: {key}")),
                    None => IndexError::signing("Signature file has no manifest digest"),
                });
            }
        };
        if *declared != digest_b64(manifest) {
            return Err(IndexError::signing("Manifest digest does not match"));
        }

        let manifest = parse_manifest(manifest)?;
        for attributes in manifest.sections.values() {
            if let Some(key) = attributes.keys().find(|k| *k != SUPPORTED_DIGEST) {
                return Err(IndexError::signing(format!("Unsupported digest: {key}")));
            }
        }

        for (name, content) in &entries {
            if name.to_ascii_uppercase().starts_with("META-INF/") {
                continue;
            }
            let digest = manifest
                .sections
                .get(name)
                .and_then(|attributes| attributes.get(SUPPORTED_DIGEST))
                .ok_or_else(|| IndexError::signing(format!("Unsigned entry in archive: {name}")))?;
            if *digest != digest_b64(content) {
                return Err(IndexError::signing(format!("Digest mismatch for {name}")));
            }
        }

        let payload = entries
            .get(payload_name)
            .ok_or_else(|| IndexError::signing(format!("No {payload_name} in signed archive")))?
            .clone();

        self.check_certificate(&certificate)?;
        debug!("verified {payload_name} signed by {certificate}");

        Ok(VerifiedJar {
            certificate,
            payload,
        })
    }

    fn check_certificate(&self, certificate: &str) -> Result<()> {
        if let Some(expected) = &self.expected_certificate {
            if expected != certificate {
                return Err(IndexError::signing(
                    "Signing certificate does not match the pinned certificate",
                ));
            }
        } else if let Some(expected) = &self.expected_fingerprint {
            let actual = certificate_fingerprint(certificate)?;
            if *expected != actual {
                return Err(IndexError::signing(format!(
                    "Fingerprint {actual} does not match expected {expected}"
                )));
            }
        }
        Ok(())
    }
}

/// Lower-case hex SHA-256 of the raw bytes of a hex certificate.
pub fn certificate_fingerprint(certificate: &str) -> Result<String> {
    let bytes = hex::decode(certificate)
        .map_err(|_| IndexError::signing(format!("Invalid certificate encoding: {certificate}")))?;
    Ok(hex::encode(Sha256::digest(bytes)))
}

fn read_entries(jar: &[u8]) -> Result<BTreeMap<String, Vec<u8>>> {
    let mut archive = ZipArchive::new(Cursor::new(jar))?;
    let mut entries = BTreeMap::new();
    for i in 0..archive.len() {
        let mut file = archive.by_index(i)?;
        if file.is_dir() {
            continue;
        }
        let mut content = Vec::with_capacity(file.size().min(MAX_PREALLOCATION) as usize);
        file.read_to_end(&mut content)
            .with_context(|| format!("extracting {}", file.name()))?;
        entries.insert(file.name().to_string(), content);
    }
    Ok(entries)
}

fn verify_block(block: &[u8], signed: &[u8]) -> Result<String> {
    if block.len() != PUBLIC_KEY_LENGTH + SIGNATURE_LENGTH {
        return Err(IndexError::signing(format!(
            "Invalid signature block of {} bytes",
            block.len()
        )));
    }
    let (key, signature) = block.split_at(PUBLIC_KEY_LENGTH);
    let key: [u8; PUBLIC_KEY_LENGTH] = key
        .try_into()
        .map_err(|_| IndexError::signing("Invalid certificate"))?;
    let key = VerifyingKey::from_bytes(&key).map_err(|_| IndexError::signing("Invalid certificate"))?;
    let signature =
        Signature::from_slice(signature).map_err(|_| IndexError::signing("Invalid signature"))?;
    key.verify(signed, &signature)
        .map_err(|_| IndexError::signing("Signature does not verify"))?;
    Ok(hex::encode(key.as_bytes()))
}

fn digest_b64(data: &[u8]) -> String {
    BASE64.encode(Sha256::digest(data))
}

#[derive(Debug, Default)]
struct Manifest {
    main: BTreeMap<String, String>,
    sections: BTreeMap<String, BTreeMap<String, String>>,
}

/// Parses `Key: Value` sections separated by blank lines, honouring 1-space continuations.
fn parse_manifest(data: &[u8]) -> Result<Manifest> {
    let text = std::str::from_utf8(data).map_err(|_| IndexError::signing("Manifest is not UTF-8"))?;

    let mut lines: Vec<String> = Vec::new();
    for raw in text.split('\n') {
        let line = raw.strip_suffix('\r').unwrap_or(raw);
        if let Some(cont) = line.strip_prefix(' ') {
            if let Some(last) = lines.last_mut().filter(|l| !l.is_empty()) {
                last.push_str(cont);
                continue;
            }
        }
        lines.push(line.to_string());
    }

    let mut manifest = Manifest::default();
    let mut current = BTreeMap::new();
    let mut in_main = true;
    for line in lines.iter().chain(std::iter::once(&String::new())) {
        if line.is_empty() {
            if in_main {
                manifest.main = std::mem::take(&mut current);
                in_main = false;
            } else if let Some(name) = current.remove("Name") {
                manifest.sections.insert(name, std::mem::take(&mut current));
            } else if !current.is_empty() {
                return Err(IndexError::signing("Manifest section without Name"));
            }
            continue;
        }
        let (key, value) = line
            .split_once(": ")
            .ok_or_else(|| IndexError::signing(format!("Malformed manifest line: {line}")))?;
        current.insert(key.to_string(), value.to_string());
    }
    Ok(manifest)
}

/// Produces archives that [`JarVerifier`] accepts.
pub struct JarSigner {
    key: SigningKey,
    alias: String,
}

impl JarSigner {
    pub fn new(key: SigningKey, alias: impl Into<String>) -> Self {
        Self {
            key,
            alias: alias.into().to_ascii_uppercase(),
        }
    }

    pub fn from_seed(seed: [u8; 32], alias: impl Into<String>) -> Self {
        Self::new(SigningKey::from_bytes(&seed), alias)
    }

    /// The certificate as lower-case hex.
    pub fn certificate(&self) -> String {
        hex::encode(self.key.verifying_key().as_bytes())
    }

    pub fn fingerprint(&self) -> String {
        hex::encode(Sha256::digest(self.key.verifying_key().as_bytes()))
    }

    /// Signs `entries` and returns the archive bytes.
    pub fn sign(&self, entries: &[(&str, &[u8])]) -> Result<Vec<u8>> {
        let mut manifest = String::from("Manifest-Version: 1.0\r\nCreated-By: droidrepo\r\n\r\n");
        for (name, content) in entries {
            manifest.push_str(&format!(
                "Name: {name}\r\n{SUPPORTED_DIGEST}: {}\r\n\r\n",
                digest_b64(content)
            ));
        }
        let sf = format!(
            "Signature-Version: 1.0\r\n{MANIFEST_DIGEST}: {}\r\n\r\n",
            digest_b64(manifest.as_bytes())
        );
        let signature = self.key.sign(sf.as_bytes());
        let mut block = self.key.verifying_key().as_bytes().to_vec();
        block.extend_from_slice(&signature.to_bytes());

        let sf_name = format!("META-INF/{}.SF", self.alias);
        let block_name = format!("META-INF/{}.SIG", self.alias);
        self.write_archive(
            &[
                (MANIFEST_NAME, manifest.as_bytes()),
                (sf_name.as_str(), sf.as_bytes()),
                (block_name.as_str(), block.as_slice()),
            ],
            entries,
        )
    }

    /// Writes an archive with the given META-INF entries verbatim.
    ///
    /// Exposed so tests can build archives with tampered metadata.
    pub fn write_archive(
        &self,
        meta: &[(&str, &[u8])],
        entries: &[(&str, &[u8])],
    ) -> Result<Vec<u8>> {
        let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
        for (name, content) in meta.iter().chain(entries) {
            writer.start_file(*name, FileOptions::default())?;
            writer
                .write_all(content)
                .with_context(|| format!("writing {name} to archive"))?;
        }
        Ok(writer.finish()?.into_inner())
    }
}
