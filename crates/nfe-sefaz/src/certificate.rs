//! # Certificate Store
//!
//! Custody of each tenant's PKCS#12 signing certificate and passphrase.
//!
//! ## On-Disk Layout
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  {certificate_root}/                         (0700)                     │
//! │  ├── {tenant_id}/                            (0700)                     │
//! │  │   ├── certificate.pfx                     (0600) PKCS#12 blob        │
//! │  │   └── metadata.json                       (0600) passphrase, expiry  │
//! │  ├── .staging-{tenant_id}-{uuid}/            being written              │
//! │  └── .retired-{tenant_id}-{uuid}/            being deleted              │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Atomic Replacement
//! ```text
//! store():   write blob + metadata into .staging-…
//!            rename {tenant} → .retired-…     (if present)
//!            rename .staging-… → {tenant}     (restore .retired-… on failure)
//!            delete .retired-…
//!
//! remove():  rename {tenant} → .retired-…  then delete it
//! ```
//!
//! A reader sees either the complete old pair or the complete new pair.
//!
//! ## Leases
//! Signing takes a read lease for the tenant and keeps it until the
//! signature is produced. `store` and `remove` take the write side, so a
//! certificate is never swapped in the middle of a signing operation.

use base64::Engine;
use chrono::{DateTime, TimeZone, Utc};
use openssl::asn1::{Asn1Time, Asn1TimeRef};
use openssl::nid::Nid;
use openssl::pkcs12::Pkcs12;
use openssl::pkey::{PKey, Private};
use openssl::x509::X509;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tokio::sync::{OwnedRwLockReadGuard, RwLock};
use tracing::{debug, info, warn};
use uuid::Uuid;
use zeroize::Zeroizing;

use nfe_core::MAX_CERTIFICATE_BYTES;

const BLOB_FILE: &str = "certificate.pfx";
const METADATA_FILE: &str = "metadata.json";
const ALLOWED_EXTENSIONS: [&str; 2] = ["pfx", "p12"];
const MAX_TENANT_ID_LEN: usize = 64;

// =============================================================================
// Errors
// =============================================================================

/// Certificate store failures.
#[derive(Debug, Error)]
pub enum CertificateStoreError {
    /// No certificate on file for the tenant.
    #[error("No certificate on file for tenant {tenant_id}")]
    NotFound { tenant_id: String },

    /// The stored certificate cannot be used.
    ///
    /// ## When This Occurs
    /// - Metadata lacks a passphrase
    /// - The passphrase no longer opens the container
    /// - The certificate has expired
    #[error("Certificate for tenant {tenant_id} is invalid: {reason}")]
    Invalid { tenant_id: String, reason: String },

    /// An upload failed the pre-storage checks.
    #[error("Certificate upload rejected: {reason}")]
    Upload { reason: String },

    /// Tenant id unusable as a directory name.
    #[error("Invalid tenant id: {0}")]
    InvalidTenantId(String),

    #[error("Certificate storage I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Certificate metadata is unreadable: {0}")]
    Metadata(#[from] serde_json::Error),
}

pub type CertificateResult<T> = Result<T, CertificateStoreError>;

// =============================================================================
// Passphrase
// =============================================================================

/// A certificate passphrase. Zeroized on drop, never printed.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct Passphrase(Zeroizing<String>);

impl Passphrase {
    pub fn new(value: impl Into<String>) -> Self {
        Passphrase(Zeroizing::new(value.into()))
    }

    /// The secret itself. Keep the borrow short.
    pub fn expose(&self) -> &str {
        self.0.as_str()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<String> for Passphrase {
    fn from(value: String) -> Self {
        Passphrase::new(value)
    }
}

impl std::fmt::Debug for Passphrase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Passphrase(***)")
    }
}

impl Serialize for Passphrase {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.expose())
    }
}

impl<'de> Deserialize<'de> for Passphrase {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        String::deserialize(deserializer).map(Passphrase::new)
    }
}

// =============================================================================
// Metadata
// =============================================================================

/// Public certificate metadata. Never carries the passphrase.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CertificateMetadata {
    pub tenant_id: String,
    pub filename: String,
    /// Certificate subject common name.
    pub subject: Option<String>,
    pub uploaded_at: DateTime<Utc>,
    /// `notAfter` of the signing certificate.
    pub expires_at: Option<DateTime<Utc>>,
}

impl CertificateMetadata {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.map(|at| at <= now).unwrap_or(false)
    }
}

/// What `metadata.json` holds.
#[derive(Debug, Serialize, Deserialize)]
struct MetadataRecord {
    #[serde(flatten)]
    metadata: CertificateMetadata,
    #[serde(default)]
    passphrase: Option<Passphrase>,
}

/// A certificate as read back from disk.
#[derive(Debug)]
pub struct StoredCertificate {
    pub blob: Zeroizing<Vec<u8>>,
    pub passphrase: Passphrase,
    pub metadata: CertificateMetadata,
}

impl StoredCertificate {
    /// Opens the container and returns the key pair used for signing.
    pub fn identity(&self) -> CertificateResult<SigningIdentity> {
        SigningIdentity::from_pkcs12(&self.metadata.tenant_id, &self.blob, &self.passphrase)
    }
}

// =============================================================================
// Signing Identity
// =============================================================================

/// Private key and certificate opened from a PKCS#12 container.
pub struct SigningIdentity {
    pub(crate) key: PKey<Private>,
    pub(crate) certificate: X509,
}

impl std::fmt::Debug for SigningIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SigningIdentity")
            .field("subject", &common_name(&self.certificate))
            .finish_non_exhaustive()
    }
}

impl SigningIdentity {
    pub fn from_pkcs12(
        tenant_id: &str,
        blob: &[u8],
        passphrase: &Passphrase,
    ) -> CertificateResult<Self> {
        let invalid = |reason: String| CertificateStoreError::Invalid {
            tenant_id: tenant_id.to_string(),
            reason,
        };

        let container =
            Pkcs12::from_der(blob).map_err(|_| invalid("not a PKCS#12 container".into()))?;
        let parsed = container
            .parse2(passphrase.expose())
            .map_err(|_| invalid("passphrase does not open the container".into()))?;

        let key = parsed
            .pkey
            .ok_or_else(|| invalid("container has no private key".into()))?;
        let certificate = parsed
            .cert
            .ok_or_else(|| invalid("container has no certificate".into()))?;

        Ok(SigningIdentity { key, certificate })
    }

    /// DER certificate, base64, as `X509Certificate` expects it.
    pub fn certificate_base64(&self) -> Result<String, openssl::error::ErrorStack> {
        let der = self.certificate.to_der()?;
        Ok(base64::engine::general_purpose::STANDARD.encode(der))
    }

    pub fn subject(&self) -> Option<String> {
        common_name(&self.certificate)
    }

    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        asn1_to_utc(self.certificate.not_after())
    }
}

fn common_name(certificate: &X509) -> Option<String> {
    certificate
        .subject_name()
        .entries_by_nid(Nid::COMMONNAME)
        .next()
        .and_then(|entry| entry.data().as_utf8().ok())
        .map(|name| name.to_string())
}

fn asn1_to_utc(time: &Asn1TimeRef) -> Option<DateTime<Utc>> {
    let epoch = Asn1Time::from_unix(0).ok()?;
    let diff = epoch.diff(time).ok()?;
    let seconds = i64::from(diff.days) * 86_400 + i64::from(diff.secs);
    Utc.timestamp_opt(seconds, 0).single()
}

// =============================================================================
// Lease
// =============================================================================

/// A certificate held for the duration of a signing operation.
///
/// While the lease lives, `store` and `remove` for the same tenant wait.
pub struct CertificateLease {
    certificate: StoredCertificate,
    _guard: OwnedRwLockReadGuard<()>,
}

impl CertificateLease {
    pub fn certificate(&self) -> &StoredCertificate {
        &self.certificate
    }

    pub fn identity(&self) -> CertificateResult<SigningIdentity> {
        self.certificate.identity()
    }
}

// =============================================================================
// Upload Checks
// =============================================================================

/// Checks an upload before anything touches the disk.
///
/// Returns the opened identity so the caller can capture subject and expiry.
pub fn validate_upload(
    filename: &str,
    blob: &[u8],
    passphrase: &Passphrase,
) -> CertificateResult<SigningIdentity> {
    let extension = Path::new(filename)
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_ascii_lowercase());
    if !extension
        .as_deref()
        .map(|ext| ALLOWED_EXTENSIONS.contains(&ext))
        .unwrap_or(false)
    {
        return Err(CertificateStoreError::Upload {
            reason: format!("'{}' is not a .pfx or .p12 file", filename),
        });
    }
    if blob.is_empty() {
        return Err(CertificateStoreError::Upload {
            reason: "file is empty".into(),
        });
    }
    if blob.len() > MAX_CERTIFICATE_BYTES {
        return Err(CertificateStoreError::Upload {
            reason: format!(
                "file has {} bytes, the limit is {}",
                blob.len(),
                MAX_CERTIFICATE_BYTES
            ),
        });
    }
    if Pkcs12::from_der(blob).is_err() {
        return Err(CertificateStoreError::Upload {
            reason: "file is not a PKCS#12 container".into(),
        });
    }

    SigningIdentity::from_pkcs12("upload", blob, passphrase).map_err(|_| {
        CertificateStoreError::Upload {
            reason: "passphrase does not open the certificate".into(),
        }
    })
}

/// Tenant ids double as directory names: ASCII letters, digits, `-` and `_`.
pub fn check_tenant_id(tenant_id: &str) -> CertificateResult<()> {
    let ok = !tenant_id.is_empty()
        && tenant_id.len() <= MAX_TENANT_ID_LEN
        && !tenant_id.starts_with('.')
        && tenant_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if ok {
        Ok(())
    } else {
        Err(CertificateStoreError::InvalidTenantId(tenant_id.to_string()))
    }
}

// =============================================================================
// Certificate Store
// =============================================================================

/// File-backed certificate custody.
#[derive(Debug)]
pub struct CertificateStore {
    root: PathBuf,
    locks: Mutex<HashMap<String, Arc<RwLock<()>>>>,
}

impl CertificateStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        CertificateStore {
            root: root.into(),
            locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn tenant_dir(&self, tenant_id: &str) -> PathBuf {
        self.root.join(tenant_id)
    }

    fn lock_for(&self, tenant_id: &str) -> Arc<RwLock<()>> {
        let mut locks = match self.locks.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        locks
            .entry(tenant_id.to_string())
            .or_insert_with(|| Arc::new(RwLock::new(())))
            .clone()
    }

    /// Validates and stores a certificate, replacing any previous one.
    pub async fn store(
        &self,
        tenant_id: &str,
        filename: &str,
        blob: Vec<u8>,
        passphrase: Passphrase,
    ) -> CertificateResult<CertificateMetadata> {
        check_tenant_id(tenant_id)?;
        let blob = Zeroizing::new(blob);
        let identity = validate_upload(filename, &blob, &passphrase)?;

        let metadata = CertificateMetadata {
            tenant_id: tenant_id.to_string(),
            filename: filename.to_string(),
            subject: identity.subject(),
            uploaded_at: Utc::now(),
            expires_at: identity.expires_at(),
        };
        let record = MetadataRecord {
            metadata: metadata.clone(),
            passphrase: Some(passphrase),
        };
        let record_json = Zeroizing::new(serde_json::to_vec_pretty(&record)?);

        let lock = self.lock_for(tenant_id);
        let _guard = lock.write().await;

        create_private_dir(&self.root).await?;
        let staging = self
            .root
            .join(format!(".staging-{}-{}", tenant_id, Uuid::new_v4()));
        if let Err(e) = write_pair(&staging, &blob, &record_json).await {
            let _ = tokio::fs::remove_dir_all(&staging).await;
            return Err(e.into());
        }

        let target = self.tenant_dir(tenant_id);
        let retired = self
            .root
            .join(format!(".retired-{}-{}", tenant_id, Uuid::new_v4()));
        let had_previous = tokio::fs::try_exists(&target).await?;
        if had_previous {
            if let Err(e) = tokio::fs::rename(&target, &retired).await {
                let _ = tokio::fs::remove_dir_all(&staging).await;
                return Err(e.into());
            }
        }

        if let Err(e) = tokio::fs::rename(&staging, &target).await {
            if had_previous {
                if let Err(restore) = tokio::fs::rename(&retired, &target).await {
                    warn!(tenant_id = %tenant_id, error = %restore, "Failed to restore previous certificate");
                }
            }
            let _ = tokio::fs::remove_dir_all(&staging).await;
            return Err(e.into());
        }

        if had_previous {
            if let Err(e) = tokio::fs::remove_dir_all(&retired).await {
                warn!(tenant_id = %tenant_id, error = %e, "Failed to delete retired certificate");
            }
        }

        info!(
            tenant_id = %tenant_id,
            subject = ?metadata.subject,
            expires_at = ?metadata.expires_at,
            replaced = had_previous,
            "Certificate stored"
        );
        Ok(metadata)
    }

    /// Reads blob, passphrase and metadata.
    pub async fn retrieve(&self, tenant_id: &str) -> CertificateResult<StoredCertificate> {
        check_tenant_id(tenant_id)?;
        let lock = self.lock_for(tenant_id);
        let _guard = lock.read().await;
        self.read_unlocked(tenant_id).await
    }

    /// Reads the certificate and holds the tenant's read lease.
    pub async fn lease(&self, tenant_id: &str) -> CertificateResult<CertificateLease> {
        check_tenant_id(tenant_id)?;
        let guard = self.lock_for(tenant_id).read_owned().await;
        let certificate = self.read_unlocked(tenant_id).await?;
        Ok(CertificateLease {
            certificate,
            _guard: guard,
        })
    }

    async fn read_unlocked(&self, tenant_id: &str) -> CertificateResult<StoredCertificate> {
        let dir = self.tenant_dir(tenant_id);
        let not_found = || CertificateStoreError::NotFound {
            tenant_id: tenant_id.to_string(),
        };

        let record_bytes = match tokio::fs::read(dir.join(METADATA_FILE)).await {
            Ok(bytes) => Zeroizing::new(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Err(not_found()),
            Err(e) => return Err(e.into()),
        };
        let blob = match tokio::fs::read(dir.join(BLOB_FILE)).await {
            Ok(bytes) => Zeroizing::new(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Err(not_found()),
            Err(e) => return Err(e.into()),
        };

        let record: MetadataRecord = serde_json::from_slice(&record_bytes)?;
        let passphrase = match record.passphrase {
            Some(p) if !p.is_empty() => p,
            _ => {
                return Err(CertificateStoreError::Invalid {
                    tenant_id: tenant_id.to_string(),
                    reason: "metadata has no passphrase".into(),
                })
            }
        };

        debug!(tenant_id = %tenant_id, "Certificate read");
        Ok(StoredCertificate {
            blob,
            passphrase,
            metadata: record.metadata,
        })
    }

    /// Deletes blob and metadata.
    pub async fn remove(&self, tenant_id: &str) -> CertificateResult<()> {
        check_tenant_id(tenant_id)?;
        let lock = self.lock_for(tenant_id);
        let _guard = lock.write().await;

        let target = self.tenant_dir(tenant_id);
        if !tokio::fs::try_exists(&target).await? {
            return Err(CertificateStoreError::NotFound {
                tenant_id: tenant_id.to_string(),
            });
        }

        let retired = self
            .root
            .join(format!(".retired-{}-{}", tenant_id, Uuid::new_v4()));
        tokio::fs::rename(&target, &retired).await?;
        tokio::fs::remove_dir_all(&retired).await?;

        info!(tenant_id = %tenant_id, "Certificate removed");
        Ok(())
    }

    /// Opens the stored certificate to prove the passphrase still works.
    ///
    /// Expiry is only checked when the metadata carries it.
    pub async fn validate(&self, tenant_id: &str) -> CertificateResult<CertificateMetadata> {
        let stored = self.retrieve(tenant_id).await?;
        stored.identity()?;
        if stored.metadata.is_expired(Utc::now()) {
            return Err(CertificateStoreError::Invalid {
                tenant_id: tenant_id.to_string(),
                reason: format!(
                    "certificate expired at {}",
                    stored
                        .metadata
                        .expires_at
                        .map(|at| at.to_rfc3339())
                        .unwrap_or_default()
                ),
            });
        }
        Ok(stored.metadata)
    }
}

// =============================================================================
// Filesystem Helpers
// =============================================================================

async fn write_pair(dir: &Path, blob: &[u8], metadata: &[u8]) -> std::io::Result<()> {
    create_private_dir(dir).await?;
    write_private_file(&dir.join(BLOB_FILE), blob).await?;
    write_private_file(&dir.join(METADATA_FILE), metadata).await?;
    Ok(())
}

#[cfg(unix)]
async fn create_private_dir(dir: &Path) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;

    let mut builder = tokio::fs::DirBuilder::new();
    builder.recursive(true).mode(0o700);
    builder.create(dir).await?;
    tokio::fs::set_permissions(dir, std::fs::Permissions::from_mode(0o700)).await
}

#[cfg(not(unix))]
async fn create_private_dir(dir: &Path) -> std::io::Result<()> {
    tokio::fs::create_dir_all(dir).await
}

#[cfg(unix)]
async fn write_private_file(path: &Path, contents: &[u8]) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    use tokio::io::AsyncWriteExt;

    let mut file = tokio::fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .mode(0o600)
        .open(path)
        .await?;
    file.write_all(contents).await?;
    file.sync_all().await?;
    tokio::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600)).await
}

#[cfg(not(unix))]
async fn write_private_file(path: &Path, contents: &[u8]) -> std::io::Result<()> {
    tokio::fs::write(path, contents).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{pkcs12_fixture, PASSPHRASE};

    fn store() -> (tempfile::TempDir, CertificateStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = CertificateStore::new(dir.path().join("certs"));
        (dir, store)
    }

    #[tokio::test]
    async fn test_store_and_retrieve() {
        let (_dir, store) = store();
        let blob = pkcs12_fixture(PASSPHRASE);

        let metadata = store
            .store("tenant-1", "loja.pfx", blob.clone(), Passphrase::new(PASSPHRASE))
            .await
            .unwrap();
        assert_eq!(metadata.subject.as_deref(), Some("PADARIA EXEMPLO LTDA:11222333000181"));
        assert!(metadata.expires_at.is_some());

        let stored = store.retrieve("tenant-1").await.unwrap();
        assert_eq!(stored.blob.as_slice(), blob.as_slice());
        assert_eq!(stored.passphrase.expose(), PASSPHRASE);
        assert!(stored.identity().is_ok());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_permissions_are_owner_only() {
        use std::os::unix::fs::PermissionsExt;

        let (_dir, store) = store();
        store
            .store("tenant-1", "a.p12", pkcs12_fixture(PASSPHRASE), Passphrase::new(PASSPHRASE))
            .await
            .unwrap();

        let tenant_dir = store.root().join("tenant-1");
        let mode = |p: &Path| std::fs::metadata(p).unwrap().permissions().mode() & 0o777;
        assert_eq!(mode(store.root()), 0o700);
        assert_eq!(mode(&tenant_dir), 0o700);
        assert_eq!(mode(&tenant_dir.join(BLOB_FILE)), 0o600);
        assert_eq!(mode(&tenant_dir.join(METADATA_FILE)), 0o600);
    }

    #[tokio::test]
    async fn test_replace_leaves_no_staging() {
        let (_dir, store) = store();
        for _ in 0..2 {
            store
                .store("tenant-1", "a.pfx", pkcs12_fixture(PASSPHRASE), Passphrase::new(PASSPHRASE))
                .await
                .unwrap();
        }
        let entries: Vec<_> = std::fs::read_dir(store.root())
            .unwrap()
            .map(|e| e.unwrap().file_name().into_string().unwrap())
            .collect();
        assert_eq!(entries, vec!["tenant-1".to_string()]);
    }

    #[tokio::test]
    async fn test_upload_checks() {
        let (_dir, store) = store();
        let blob = pkcs12_fixture(PASSPHRASE);

        let wrong_name = store
            .store("t", "cert.pem", blob.clone(), Passphrase::new(PASSPHRASE))
            .await;
        assert!(matches!(wrong_name, Err(CertificateStoreError::Upload { .. })));

        let wrong_pass = store
            .store("t", "cert.pfx", blob, Passphrase::new("nope"))
            .await;
        assert!(matches!(wrong_pass, Err(CertificateStoreError::Upload { .. })));

        let garbage = store
            .store("t", "cert.pfx", b"not a container".to_vec(), Passphrase::new(PASSPHRASE))
            .await;
        assert!(matches!(garbage, Err(CertificateStoreError::Upload { .. })));

        let too_big = store
            .store("t", "cert.pfx", vec![0u8; MAX_CERTIFICATE_BYTES + 1], Passphrase::new(PASSPHRASE))
            .await;
        assert!(matches!(too_big, Err(CertificateStoreError::Upload { .. })));

        // nothing was written
        assert!(matches!(
            store.retrieve("t").await,
            Err(CertificateStoreError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_tenant_id_cannot_escape_root() {
        let (_dir, store) = store();
        assert!(matches!(
            store.retrieve("../etc").await,
            Err(CertificateStoreError::InvalidTenantId(_))
        ));
        assert!(matches!(
            store.remove(".staging-x").await,
            Err(CertificateStoreError::InvalidTenantId(_))
        ));
    }

    #[tokio::test]
    async fn test_remove() {
        let (_dir, store) = store();
        assert!(matches!(
            store.remove("tenant-1").await,
            Err(CertificateStoreError::NotFound { .. })
        ));

        store
            .store("tenant-1", "a.pfx", pkcs12_fixture(PASSPHRASE), Passphrase::new(PASSPHRASE))
            .await
            .unwrap();
        store.remove("tenant-1").await.unwrap();
        assert!(matches!(
            store.retrieve("tenant-1").await,
            Err(CertificateStoreError::NotFound { .. })
        ));
        assert!(!store.root().join("tenant-1").exists());
    }

    #[tokio::test]
    async fn test_missing_passphrase_is_invalid() {
        let (_dir, store) = store();
        store
            .store("tenant-1", "a.pfx", pkcs12_fixture(PASSPHRASE), Passphrase::new(PASSPHRASE))
            .await
            .unwrap();

        let path = store.root().join("tenant-1").join(METADATA_FILE);
        let mut json: serde_json::Value =
            serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
        json.as_object_mut().unwrap().remove("passphrase");
        std::fs::write(&path, serde_json::to_vec(&json).unwrap()).unwrap();

        assert!(matches!(
            store.retrieve("tenant-1").await,
            Err(CertificateStoreError::Invalid { .. })
        ));
    }

    #[tokio::test]
    async fn test_validate() {
        let (_dir, store) = store();
        store
            .store("tenant-1", "a.pfx", pkcs12_fixture(PASSPHRASE), Passphrase::new(PASSPHRASE))
            .await
            .unwrap();
        let metadata = store.validate("tenant-1").await.unwrap();
        assert_eq!(metadata.filename, "a.pfx");
    }

    #[tokio::test]
    async fn test_store_waits_for_lease() {
        let (_dir, store) = store();
        let store = Arc::new(store);
        store
            .store("tenant-1", "a.pfx", pkcs12_fixture(PASSPHRASE), Passphrase::new(PASSPHRASE))
            .await
            .unwrap();

        let lease = store.lease("tenant-1").await.unwrap();
        let writer = {
            let store = store.clone();
            tokio::spawn(async move { store.remove("tenant-1").await })
        };

        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        assert!(!writer.is_finished());
        assert!(lease.identity().is_ok());

        drop(lease);
        writer.await.unwrap().unwrap();
        assert!(store.retrieve("tenant-1").await.is_err());
    }

    #[test]
    fn test_passphrase_debug_is_redacted() {
        let p = Passphrase::new("super-secret");
        assert_eq!(format!("{:?}", p), "Passphrase(***)");
    }
}
