//! # Artifact Store
//!
//! Final XML and DANFE files of authorized documents and their events.
//!
//! ## Layout
//! ```text
//! {root}/
//! └── {tenant}/
//!     └── producao | homologacao/
//!         └── 55 | 65/
//!             └── {yyyy}/{mm}/
//!                 ├── Autorizados/{key}.xml   nfeProc (NFe + protNFe)
//!                 ├── Autorizados/{key}.pdf   DANFE
//!                 ├── Cancelados/{key}.xml    procEventoNFe (110111)
//!                 ├── CCe/{key}-{nn}.xml      procEventoNFe (110110, seq nn)
//!                 ├── CCe/{key}-{nn}.pdf      correction letter
//!                 └── Inutilizados/inut_{sss}_{first}_{last}.xml
//!                                             procInutNFe
//! ```
//!
//! Model, year and month come from the access key itself, so a key is
//! enough to find its files. The environment is not part of the key and
//! lookups check both environment folders. Voided ranges have no key and
//! are filed under the month they were registered in (Brasilia time).
//!
//! Every file is written to a temporary sibling and renamed into place.

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::assembler::brasilia;
use crate::certificate::check_tenant_id;
use crate::danfe::{CorrectionLetterData, DanfeData, DanfeRenderer, LopdfRenderer};
use crate::error::{IssueError, IssueResult};
use crate::xml::{extract_element, XmlWriter};
use nfe_core::{
    AccessKey, ArtifactRefs, DocumentModel, Environment, EventKind, ProtocolRecord,
    ValidationError, EVENT_LAYOUT_VERSION, LAYOUT_VERSION, NFE_NAMESPACE,
};

const XML_DECLARATION: &str = "<?xml version=\"1.0\" encoding=\"UTF-8\"?>";

// =============================================================================
// Kinds and Folders
// =============================================================================

/// Which file of a document is requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArtifactKind {
    Xml,
    Pdf,
}

impl ArtifactKind {
    pub const fn extension(&self) -> &'static str {
        match self {
            ArtifactKind::Xml => "xml",
            ArtifactKind::Pdf => "pdf",
        }
    }

    pub const fn content_type(&self) -> &'static str {
        match self {
            ArtifactKind::Xml => "application/xml",
            ArtifactKind::Pdf => "application/pdf",
        }
    }
}

impl FromStr for ArtifactKind {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "xml" => Ok(ArtifactKind::Xml),
            "pdf" => Ok(ArtifactKind::Pdf),
            _ => Err(ValidationError::NotAllowed {
                field: format!("artifact kind '{}'", s),
                allowed: vec!["xml".into(), "pdf".into()],
            }),
        }
    }
}

/// Outcome folder inside a month.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutcomeFolder {
    Authorized,
    Cancelled,
    Corrected,
    Voided,
}

impl OutcomeFolder {
    pub const fn name(&self) -> &'static str {
        match self {
            OutcomeFolder::Authorized => "Autorizados",
            OutcomeFolder::Cancelled => "Cancelados",
            OutcomeFolder::Corrected => "CCe",
            OutcomeFolder::Voided => "Inutilizados",
        }
    }

    fn for_event(kind: EventKind) -> Self {
        match kind {
            EventKind::Cancellation => OutcomeFolder::Cancelled,
            EventKind::Correction => OutcomeFolder::Corrected,
        }
    }
}

/// Correction letters are numbered in their file name; a cancellation is
/// unique per document.
const fn event_suffix(kind: EventKind, sequence: u32) -> Option<u32> {
    match kind {
        EventKind::Correction => Some(sequence),
        EventKind::Cancellation => None,
    }
}

// =============================================================================
// Final Documents
// =============================================================================

/// Joins the signed document and its authorization protocol into `nfeProc`.
///
/// `raw_protocol` is the `protNFe` block as the authority sent it; it is
/// kept byte for byte. Without it a `protNFe` is written from `protocol`.
pub fn wrap_nfe_proc(
    signed_xml: &str,
    access_key: &AccessKey,
    environment: Environment,
    protocol: &ProtocolRecord,
    raw_protocol: Option<&str>,
) -> IssueResult<String> {
    let nfe = extract_element(signed_xml, "NFe")
        .ok_or_else(|| IssueError::Storage("signed document has no <NFe> element".into()))?;

    let protocol_block = match raw_protocol {
        Some(raw) => raw.to_string(),
        None => protocol_block(access_key, environment, protocol),
    };

    let mut w = XmlWriter::new();
    w.raw(XML_DECLARATION)
        .open(
            "nfeProc",
            &[("xmlns", NFE_NAMESPACE), ("versao", LAYOUT_VERSION)],
        )
        .raw(nfe)
        .raw(&protocol_block)
        .close("nfeProc");
    Ok(w.finish())
}

fn protocol_block(access_key: &AccessKey, environment: Environment, protocol: &ProtocolRecord) -> String {
    let received = protocol.authorized_at.map(|at| {
        at.with_timezone(&brasilia())
            .format("%Y-%m-%dT%H:%M:%S%:z")
            .to_string()
    });
    let mut w = XmlWriter::new();
    w.open("protNFe", &[("versao", LAYOUT_VERSION)])
        .open("infProt", &[])
        .leaf("tpAmb", &environment.code().to_string())
        .leaf("chNFe", access_key.as_str())
        .opt_leaf("dhRecbto", received.as_deref())
        .opt_leaf("nProt", protocol.protocol_number.as_deref())
        .leaf("cStat", &protocol.status_code.to_string())
        .leaf("xMotivo", &protocol.reason)
        .close("infProt")
        .close("protNFe");
    w.finish()
}

/// Joins a signed event and the authority's `retEvento` into `procEventoNFe`.
pub fn wrap_event_proc(signed_event: &str, raw_answer: &str) -> IssueResult<String> {
    let event = extract_element(signed_event, "evento")
        .ok_or_else(|| IssueError::Storage("signed event has no <evento> element".into()))?;
    let mut w = XmlWriter::new();
    w.raw(XML_DECLARATION)
        .open(
            "procEventoNFe",
            &[("xmlns", NFE_NAMESPACE), ("versao", EVENT_LAYOUT_VERSION)],
        )
        .raw(event)
        .raw(raw_answer)
        .close("procEventoNFe");
    Ok(w.finish())
}

/// Joins a signed `inutNFe` and the authority's `retInutNFe` into
/// `procInutNFe`.
pub fn wrap_voiding_proc(signed_request: &str, raw_answer: &str) -> IssueResult<String> {
    let request = extract_element(signed_request, "inutNFe")
        .ok_or_else(|| IssueError::Storage("signed request has no <inutNFe> element".into()))?;
    let mut w = XmlWriter::new();
    w.raw(XML_DECLARATION)
        .open(
            "procInutNFe",
            &[("xmlns", NFE_NAMESPACE), ("versao", LAYOUT_VERSION)],
        )
        .raw(request)
        .raw(raw_answer)
        .close("procInutNFe");
    Ok(w.finish())
}

// =============================================================================
// Store
// =============================================================================

/// File-backed artifact custody.
#[derive(Clone)]
pub struct ArtifactStore {
    root: PathBuf,
    renderer: Arc<dyn DanfeRenderer>,
}

impl std::fmt::Debug for ArtifactStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ArtifactStore")
            .field("root", &self.root)
            .finish_non_exhaustive()
    }
}

impl ArtifactStore {
    /// A store rendering DANFEs with [`LopdfRenderer`].
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self::with_renderer(root, Arc::new(LopdfRenderer))
    }

    pub fn with_renderer(root: impl Into<PathBuf>, renderer: Arc<dyn DanfeRenderer>) -> Self {
        ArtifactStore {
            root: root.into(),
            renderer,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path of one artifact, relative to the root.
    pub fn relative_path(
        tenant_id: &str,
        environment: Environment,
        access_key: &AccessKey,
        folder: OutcomeFolder,
        sequence: Option<u32>,
        kind: ArtifactKind,
    ) -> PathBuf {
        let file = match sequence {
            Some(seq) => format!("{}-{:02}.{}", access_key, seq, kind.extension()),
            None => format!("{}.{}", access_key, kind.extension()),
        };
        PathBuf::from(tenant_id)
            .join(environment.folder_name())
            .join(access_key.model().code().to_string())
            .join(format!("{:04}", access_key.year()))
            .join(format!("{:02}", access_key.month()))
            .join(folder.name())
            .join(file)
    }

    /// Path of a voided range's file, relative to the root.
    pub fn voiding_path(
        tenant_id: &str,
        environment: Environment,
        model: DocumentModel,
        series: u16,
        first_number: u32,
        last_number: u32,
        registered_at: DateTime<Utc>,
    ) -> PathBuf {
        let local = registered_at.with_timezone(&brasilia());
        PathBuf::from(tenant_id)
            .join(environment.folder_name())
            .join(model.code().to_string())
            .join(local.format("%Y").to_string())
            .join(local.format("%m").to_string())
            .join(OutcomeFolder::Voided.name())
            .join(format!(
                "inut_{:03}_{:09}_{:09}.xml",
                series, first_number, last_number
            ))
    }

    /// Writes `nfeProc` and its DANFE under `Autorizados`.
    ///
    /// Rendering runs first: when it fails nothing is written.
    pub async fn persist_authorized(
        &self,
        tenant_id: &str,
        environment: Environment,
        access_key: &AccessKey,
        signed_xml: &str,
        protocol: &ProtocolRecord,
        raw_protocol: Option<&str>,
    ) -> IssueResult<ArtifactRefs> {
        check_tenant_id(tenant_id)?;
        let final_xml = wrap_nfe_proc(signed_xml, access_key, environment, protocol, raw_protocol)?;
        let pdf = self.render(&final_xml).await?;

        let xml_path = Self::relative_path(
            tenant_id,
            environment,
            access_key,
            OutcomeFolder::Authorized,
            None,
            ArtifactKind::Xml,
        );
        let pdf_path = xml_path.with_extension(ArtifactKind::Pdf.extension());

        self.write_atomic(&xml_path, final_xml.as_bytes()).await?;
        self.write_atomic(&pdf_path, &pdf).await?;

        info!(
            tenant_id = %tenant_id,
            access_key = %access_key,
            path = %xml_path.display(),
            "Authorized artifacts persisted"
        );
        Ok(ArtifactRefs {
            xml: path_string(&xml_path),
            pdf: Some(path_string(&pdf_path)),
        })
    }

    /// Writes `procEventoNFe` under `Cancelados` or `CCe`.
    #[allow(clippy::too_many_arguments)]
    pub async fn persist_event(
        &self,
        tenant_id: &str,
        environment: Environment,
        access_key: &AccessKey,
        kind: EventKind,
        sequence: u32,
        signed_event: &str,
        raw_answer: &str,
    ) -> IssueResult<String> {
        check_tenant_id(tenant_id)?;
        let xml = wrap_event_proc(signed_event, raw_answer)?;
        let path = Self::relative_path(
            tenant_id,
            environment,
            access_key,
            OutcomeFolder::for_event(kind),
            event_suffix(kind, sequence),
            ArtifactKind::Xml,
        );
        self.write_atomic(&path, xml.as_bytes()).await?;

        info!(
            tenant_id = %tenant_id,
            access_key = %access_key,
            kind = %kind,
            sequence,
            "Event artifact persisted"
        );
        Ok(path_string(&path))
    }

    /// Renders the PDF of a registered correction letter next to its XML.
    ///
    /// `document_xml` is the corrected document (signed `NFe` or
    /// `nfeProc`); the emitter block comes from it.
    pub async fn persist_correction_pdf(
        &self,
        tenant_id: &str,
        environment: Environment,
        access_key: &AccessKey,
        sequence: u32,
        event_xml: &str,
        document_xml: &str,
    ) -> IssueResult<String> {
        check_tenant_id(tenant_id)?;
        let (_, path) = self
            .write_correction_pdf(tenant_id, environment, access_key, sequence, event_xml, document_xml)
            .await?;
        Ok(path)
    }

    async fn write_correction_pdf(
        &self,
        tenant_id: &str,
        environment: Environment,
        access_key: &AccessKey,
        sequence: u32,
        event_xml: &str,
        document_xml: &str,
    ) -> IssueResult<(Vec<u8>, String)> {
        let data = CorrectionLetterData::from_xml(event_xml, document_xml)?;
        let renderer = Arc::clone(&self.renderer);
        let pdf = tokio::task::spawn_blocking(move || renderer.render_correction(&data))
            .await
            .map_err(|e| IssueError::Render(format!("renderer task failed: {}", e)))??;

        let path = Self::relative_path(
            tenant_id,
            environment,
            access_key,
            OutcomeFolder::Corrected,
            Some(sequence),
            ArtifactKind::Pdf,
        );
        self.write_atomic(&path, &pdf).await?;
        info!(
            tenant_id = %tenant_id,
            access_key = %access_key,
            sequence,
            "Correction letter PDF persisted"
        );
        Ok((pdf, path_string(&path)))
    }

    /// Writes `procInutNFe` under `Inutilizados`.
    #[allow(clippy::too_many_arguments)]
    pub async fn persist_voiding(
        &self,
        tenant_id: &str,
        environment: Environment,
        model: DocumentModel,
        series: u16,
        first_number: u32,
        last_number: u32,
        registered_at: DateTime<Utc>,
        signed_request: &str,
        raw_answer: &str,
    ) -> IssueResult<String> {
        check_tenant_id(tenant_id)?;
        let xml = wrap_voiding_proc(signed_request, raw_answer)?;
        let path = Self::voiding_path(
            tenant_id,
            environment,
            model,
            series,
            first_number,
            last_number,
            registered_at,
        );
        self.write_atomic(&path, xml.as_bytes()).await?;
        info!(
            tenant_id = %tenant_id,
            model = %model,
            series,
            first_number,
            last_number,
            "Voiding artifact persisted"
        );
        Ok(path_string(&path))
    }

    /// Reads an authorized artifact, checking both environments.
    pub async fn read(
        &self,
        tenant_id: &str,
        access_key: &AccessKey,
        kind: ArtifactKind,
    ) -> IssueResult<Vec<u8>> {
        check_tenant_id(tenant_id)?;
        for environment in Environment::ALL {
            let path = Self::relative_path(
                tenant_id,
                environment,
                access_key,
                OutcomeFolder::Authorized,
                None,
                kind,
            );
            if let Some(bytes) = self.read_optional(&path).await? {
                return Ok(bytes);
            }
        }
        Err(IssueError::not_found(
            "Artifact",
            format!("{}.{}", access_key, kind.extension()),
        ))
    }

    /// Reads an event artifact, checking both environments.
    ///
    /// A correction letter PDF that is missing while its XML is on disk is
    /// rendered again from the XML and the authorized document.
    pub async fn read_event(
        &self,
        tenant_id: &str,
        access_key: &AccessKey,
        kind: EventKind,
        sequence: u32,
        artifact: ArtifactKind,
    ) -> IssueResult<Vec<u8>> {
        check_tenant_id(tenant_id)?;
        if kind == EventKind::Cancellation && artifact == ArtifactKind::Pdf {
            return Err(ValidationError::NotAllowed {
                field: "artifact kind 'pdf' for a cancellation".into(),
                allowed: vec!["xml".into()],
            }
            .into());
        }

        let suffix = event_suffix(kind, sequence);
        let folder = OutcomeFolder::for_event(kind);
        for environment in Environment::ALL {
            let path = |a: ArtifactKind| {
                Self::relative_path(tenant_id, environment, access_key, folder, suffix, a)
            };
            if let Some(bytes) = self.read_optional(&path(artifact)).await? {
                return Ok(bytes);
            }
            if artifact != ArtifactKind::Pdf {
                continue;
            }
            let Some(event_xml) = self.read_optional(&path(ArtifactKind::Xml)).await? else {
                continue;
            };
            warn!(
                tenant_id = %tenant_id,
                access_key = %access_key,
                sequence,
                "Regenerating missing correction letter PDF"
            );
            let event_xml = String::from_utf8_lossy(&event_xml).into_owned();
            let document = self.read(tenant_id, access_key, ArtifactKind::Xml).await?;
            let document = String::from_utf8_lossy(&document).into_owned();
            let (pdf, _) = self
                .write_correction_pdf(tenant_id, environment, access_key, sequence, &event_xml, &document)
                .await?;
            return Ok(pdf);
        }

        let file = match suffix {
            Some(seq) => format!("{}-{:02}.{}", access_key, seq, artifact.extension()),
            None => format!("{}.{}", access_key, artifact.extension()),
        };
        Err(IssueError::not_found(
            format!("{} artifact", kind),
            file,
        ))
    }

    async fn read_optional(&self, relative: &Path) -> IssueResult<Option<Vec<u8>>> {
        let path = self.root.join(relative);
        match tokio::fs::read(&path).await {
            Ok(bytes) => {
                debug!(path = %path.display(), "Artifact read");
                Ok(Some(bytes))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Whether both authorized artifacts are on disk.
    pub async fn has_authorized(
        &self,
        tenant_id: &str,
        environment: Environment,
        access_key: &AccessKey,
    ) -> IssueResult<bool> {
        check_tenant_id(tenant_id)?;
        for kind in [ArtifactKind::Xml, ArtifactKind::Pdf] {
            let path = self.root.join(Self::relative_path(
                tenant_id,
                environment,
                access_key,
                OutcomeFolder::Authorized,
                None,
                kind,
            ));
            if !tokio::fs::try_exists(&path).await? {
                return Ok(false);
            }
        }
        Ok(true)
    }

    async fn render(&self, final_xml: &str) -> IssueResult<Vec<u8>> {
        let data = DanfeData::from_xml(final_xml)?;
        let renderer = Arc::clone(&self.renderer);
        tokio::task::spawn_blocking(move || renderer.render(&data))
            .await
            .map_err(|e| IssueError::Render(format!("renderer task failed: {}", e)))?
    }

    async fn write_atomic(&self, relative: &Path, bytes: &[u8]) -> IssueResult<()> {
        let target = self.root.join(relative);
        let parent = target
            .parent()
            .ok_or_else(|| IssueError::Storage(format!("no parent for {}", target.display())))?;
        tokio::fs::create_dir_all(parent).await?;

        let temp = parent.join(format!(".tmp-{}", Uuid::new_v4()));
        if let Err(e) = tokio::fs::write(&temp, bytes).await {
            let _ = tokio::fs::remove_file(&temp).await;
            return Err(e.into());
        }
        if let Err(e) = tokio::fs::rename(&temp, &target).await {
            let _ = tokio::fs::remove_file(&temp).await;
            return Err(e.into());
        }
        Ok(())
    }
}

fn path_string(path: &Path) -> String {
    path.to_string_lossy().replace('\\', "/")
}
