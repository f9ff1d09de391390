//! Per-domain key material for transports
//!
//! slipstream servers need a TLS certificate and key; dnstt servers need a
//! Noise key pair. Material is created once per domain and reused after.

use rcgen::{CertificateParams, DistinguishedName, DnType, KeyPair};
use sha2::{Digest, Sha256};
use std::fs;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use dnstm_config::{normalize_domain, TransportKind};

use crate::command;
use crate::error::SystemError;

const CERT_VALIDITY_DAYS: i64 = 3650;

/// Paths and fingerprint of a domain's key material
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyMaterial {
    /// Certificate (slipstream) or public key (dnstt)
    pub cert_path: PathBuf,
    /// Private key
    pub key_path: PathBuf,
    /// SHA-256 certificate fingerprint (slipstream) or public key (dnstt)
    pub fingerprint: String,
}

pub trait CertificateIssuer: Send + Sync {
    /// Return the material for `domain`, creating it when missing
    fn get_or_create(
        &self,
        domain: &str,
        transport: TransportKind,
    ) -> Result<KeyMaterial, SystemError>;
}

/// Issuer storing material under `<state_dir>/certs` and `<state_dir>/keys`
pub struct FileCertificateIssuer {
    state_dir: PathBuf,
    dnstt_binary: PathBuf,
}

impl FileCertificateIssuer {
    pub fn new(state_dir: impl Into<PathBuf>, dnstt_binary: impl Into<PathBuf>) -> Self {
        Self {
            state_dir: state_dir.into(),
            dnstt_binary: dnstt_binary.into(),
        }
    }

    fn slipstream_material(&self, domain: &str) -> Result<KeyMaterial, SystemError> {
        let dir = self.state_dir.join("certs");
        let cert_path = dir.join(format!("{}.crt", domain));
        let key_path = dir.join(format!("{}.key", domain));

        if !(cert_path.exists() && key_path.exists()) {
            create_dir(&dir)?;
            let (cert_pem, key_pem) = generate_certificate(domain)?;
            write_file(&cert_path, &cert_pem)?;
            write_file(&key_path, &key_pem)?;
            restrict_permissions(&key_path);
            info!("Generated certificate for {}", domain);
        }

        let fingerprint = certificate_fingerprint(&cert_path)?;
        Ok(KeyMaterial {
            cert_path,
            key_path,
            fingerprint,
        })
    }

    fn dnstt_material(&self, domain: &str) -> Result<KeyMaterial, SystemError> {
        let dir = self.state_dir.join("keys");
        let key_path = dir.join(format!("{}.key", domain));
        let pub_path = dir.join(format!("{}.pub", domain));

        if !(key_path.exists() && pub_path.exists()) {
            create_dir(&dir)?;
            let binary = self.dnstt_binary.to_string_lossy().to_string();
            let key_arg = key_path.to_string_lossy().to_string();
            let pub_arg = pub_path.to_string_lossy().to_string();
            command::run(
                &binary,
                &["-gen-key", "-privkey-file", &key_arg, "-pubkey-file", &pub_arg],
            )?;
            restrict_permissions(&key_path);
            info!("Generated dnstt key pair for {}", domain);
        }

        let fingerprint = fs::read_to_string(&pub_path)
            .map_err(|source| SystemError::Io {
                path: pub_path.clone(),
                source,
            })?
            .trim()
            .to_string();

        Ok(KeyMaterial {
            cert_path: pub_path,
            key_path,
            fingerprint,
        })
    }
}

impl CertificateIssuer for FileCertificateIssuer {
    fn get_or_create(
        &self,
        domain: &str,
        transport: TransportKind,
    ) -> Result<KeyMaterial, SystemError> {
        let domain = normalize_domain(domain);
        if domain.is_empty() || domain.contains('/') || domain.contains("..") {
            return Err(SystemError::KeyMaterial(format!(
                "Invalid domain for key material: '{}'",
                domain
            )));
        }

        match transport {
            TransportKind::Slipstream => self.slipstream_material(&domain),
            TransportKind::Dnstt => self.dnstt_material(&domain),
        }
    }
}

fn generate_certificate(domain: &str) -> Result<(String, String), SystemError> {
    let key_error = |e: rcgen::Error| SystemError::KeyMaterial(e.to_string());

    let mut params = CertificateParams::new(vec![domain.to_string()]).map_err(key_error)?;
    let mut dn = DistinguishedName::new();
    dn.push(DnType::CommonName, domain);
    params.distinguished_name = dn;

    let now = time::OffsetDateTime::now_utc();
    params.not_before = now;
    params.not_after = now + time::Duration::days(CERT_VALIDITY_DAYS);
    params.serial_number = Some(rcgen::SerialNumber::from(rand_serial()));

    let key_pair = KeyPair::generate().map_err(key_error)?;
    let cert = params.self_signed(&key_pair).map_err(key_error)?;
    Ok((cert.pem(), key_pair.serialize_pem()))
}

fn rand_serial() -> u64 {
    let nanos = time::OffsetDateTime::now_utc().unix_timestamp_nanos();
    (nanos as u64) ^ u64::from(std::process::id())
}

/// Colon-separated SHA-256 of the first certificate in a PEM file
fn certificate_fingerprint(path: &Path) -> Result<String, SystemError> {
    let file = fs::File::open(path).map_err(|source| SystemError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let mut reader = BufReader::new(file);

    let der = rustls_pemfile::certs(&mut reader)
        .next()
        .ok_or_else(|| SystemError::KeyMaterial(format!("No certificate in {:?}", path)))?
        .map_err(|e| SystemError::KeyMaterial(e.to_string()))?;

    let digest = Sha256::digest(der.as_ref());
    Ok(digest
        .iter()
        .map(|b| format!("{:02X}", b))
        .collect::<Vec<_>>()
        .join(":"))
}

fn create_dir(dir: &Path) -> Result<(), SystemError> {
    fs::create_dir_all(dir).map_err(|source| SystemError::Io {
        path: dir.to_path_buf(),
        source,
    })
}

fn write_file(path: &Path, content: &str) -> Result<(), SystemError> {
    fs::write(path, content).map_err(|source| SystemError::Io {
        path: path.to_path_buf(),
        source,
    })
}

/// Make a private key owner-only; failure is only worth a warning
fn restrict_permissions(path: &Path) {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        if let Err(e) = fs::set_permissions(path, fs::Permissions::from_mode(0o600)) {
            warn!("Could not restrict permissions on {:?}: {}", path, e);
        }
    }
    #[cfg(not(unix))]
    {
        let _ = path;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_slipstream_certificate_is_created_once() {
        let temp = TempDir::new().unwrap();
        let issuer = FileCertificateIssuer::new(temp.path(), "/nonexistent/dnstt-server");

        let first = issuer
            .get_or_create("T.Example.com.", TransportKind::Slipstream)
            .unwrap();
        assert_eq!(first.cert_path, temp.path().join("certs/t.example.com.crt"));
        assert!(first.key_path.exists());
        assert_eq!(first.fingerprint.split(':').count(), 32);

        let second = issuer
            .get_or_create("t.example.com", TransportKind::Slipstream)
            .unwrap();
        assert_eq!(first, second);
    }

    #[cfg(unix)]
    #[test]
    fn test_private_key_is_owner_only() {
        use std::os::unix::fs::PermissionsExt;

        let temp = TempDir::new().unwrap();
        let issuer = FileCertificateIssuer::new(temp.path(), "/nonexistent/dnstt-server");
        let material = issuer
            .get_or_create("k.example.com", TransportKind::Slipstream)
            .unwrap();

        let mode = fs::metadata(&material.key_path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[test]
    fn test_dnstt_reuses_existing_keys() {
        let temp = TempDir::new().unwrap();
        let keys = temp.path().join("keys");
        fs::create_dir_all(&keys).unwrap();
        fs::write(keys.join("d.example.com.key"), "private").unwrap();
        fs::write(keys.join("d.example.com.pub"), "abcdef0123\n").unwrap();

        let issuer = FileCertificateIssuer::new(temp.path(), "/nonexistent/dnstt-server");
        let material = issuer
            .get_or_create("d.example.com", TransportKind::Dnstt)
            .unwrap();
        assert_eq!(material.fingerprint, "abcdef0123");
        assert_eq!(material.cert_path, keys.join("d.example.com.pub"));
    }

    #[test]
    fn test_dnstt_without_binary_fails() {
        let temp = TempDir::new().unwrap();
        let issuer = FileCertificateIssuer::new(temp.path(), "/nonexistent/dnstt-server");
        assert!(issuer
            .get_or_create("d.example.com", TransportKind::Dnstt)
            .is_err());
    }

    #[test]
    fn test_rejects_path_like_domains() {
        let temp = TempDir::new().unwrap();
        let issuer = FileCertificateIssuer::new(temp.path(), "/nonexistent/dnstt-server");
        assert!(issuer
            .get_or_create("../etc/passwd", TransportKind::Slipstream)
            .is_err());
    }
}
