//! # Authority Endpoints
//!
//! Resolves the SEFAZ web service URLs for a (state, environment, model).
//!
//! ## Authorizers
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  State          Authorizer     URL style                                │
//! │  ─────          ──────────     ─────────                                │
//! │  SP (35)        SP             {base}/nfeautorizacao4.asmx              │
//! │  MG (31)        MG             {base}/NFeAutorizacao4                   │
//! │  PR (41)        PR             {base}/NFeAutorizacao4                   │
//! │  RS (43)        RS             {base}/NfeAutorizacao/NFeAutorizacao4.asmx│
//! │  everyone else  SVRS           {base}/NfeAutorizacao/NFeAutorizacao4.asmx│
//! │                                                                         │
//! │  [[authority.overrides]] replace any of these with                      │
//! │  {base_url}/{ServiceName}                                               │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The environment is part of the host name (`homologacao.`, `hnfe.`,
//! `-homologacao.`), which [`environment_hint`] uses to catch a document
//! whose `tpAmb` disagrees with the URL it is about to be sent to.

use crate::config::EndpointOverride;
use crate::error::{IssueError, IssueResult};
use nfe_core::validation::{state_abbreviation, state_code_for};
use nfe_core::{DocumentModel, Environment, ValidationError};

// =============================================================================
// Services
// =============================================================================

/// SEFAZ web services used by the issuer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Service {
    Authorization,
    ReturnAuthorization,
    Event,
    Consult,
    Voiding,
    Status,
}

impl Service {
    pub const ALL: [Service; 6] = [
        Service::Authorization,
        Service::ReturnAuthorization,
        Service::Event,
        Service::Consult,
        Service::Voiding,
        Service::Status,
    ];

    /// WSDL service name.
    pub const fn name(&self) -> &'static str {
        match self {
            Service::Authorization => "NFeAutorizacao4",
            Service::ReturnAuthorization => "NFeRetAutorizacao4",
            Service::Event => "NFeRecepcaoEvento4",
            Service::Consult => "NFeConsultaProtocolo4",
            Service::Voiding => "NFeInutilizacao4",
            Service::Status => "NFeStatusServico4",
        }
    }

    /// SOAP operation.
    pub const fn operation(&self) -> &'static str {
        match self {
            Service::Authorization => "nfeAutorizacaoLote",
            Service::ReturnAuthorization => "nfeRetAutorizacaoLote",
            Service::Event => "nfeRecepcaoEvento",
            Service::Consult => "nfeConsultaNF",
            Service::Voiding => "nfeInutilizacaoNF",
            Service::Status => "nfeStatusServicoNF",
        }
    }

    /// Namespace of `nfeDadosMsg`.
    pub fn namespace(&self) -> String {
        format!("http://www.portalfiscal.inf.br/nfe/wsdl/{}", self.name())
    }

    /// SOAP 1.2 `action` parameter.
    pub fn action(&self) -> String {
        format!("{}/{}", self.namespace(), self.operation())
    }
}

impl std::fmt::Display for Service {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

// =============================================================================
// Built-in Table
// =============================================================================

#[derive(Debug, Clone, Copy)]
enum PathStyle {
    /// `{base}/nfeautorizacao4.asmx`
    Asmx,
    /// `{base}/NFeAutorizacao4`
    Plain,
    /// `{base}/NfeAutorizacao/NFeAutorizacao4.asmx`
    Nested,
}

impl PathStyle {
    fn path(&self, service: Service) -> String {
        match self {
            PathStyle::Asmx => format!("{}.asmx", service.name().to_ascii_lowercase()),
            PathStyle::Plain => service.name().to_string(),
            PathStyle::Nested => match service {
                Service::Authorization => "NfeAutorizacao/NFeAutorizacao4.asmx".into(),
                Service::ReturnAuthorization => "NfeRetAutorizacao/NFeRetAutorizacao4.asmx".into(),
                Service::Event => "recepcaoevento/recepcaoevento4.asmx".into(),
                Service::Consult => "NfeConsulta/NfeConsulta4.asmx".into(),
                Service::Voiding => "nfeinutilizacao/nfeinutilizacao4.asmx".into(),
                Service::Status => "NfeStatusServico/NfeStatusServico4.asmx".into(),
            },
        }
    }
}

/// Base URLs indexed by `[model][environment]`:
/// `[[nfe prod, nfe hom], [nfce prod, nfce hom]]`.
struct Authorizer {
    name: &'static str,
    style: PathStyle,
    bases: [[&'static str; 2]; 2],
}

const SP: Authorizer = Authorizer {
    name: "SP",
    style: PathStyle::Asmx,
    bases: [
        [
            "https://nfe.fazenda.sp.gov.br/ws",
            "https://homologacao.nfe.fazenda.sp.gov.br/ws",
        ],
        [
            "https://nfce.fazenda.sp.gov.br/ws",
            "https://homologacao.nfce.fazenda.sp.gov.br/ws",
        ],
    ],
};

const MG: Authorizer = Authorizer {
    name: "MG",
    style: PathStyle::Plain,
    bases: [
        [
            "https://nfe.fazenda.mg.gov.br/nfe2/services",
            "https://hnfe.fazenda.mg.gov.br/nfe2/services",
        ],
        [
            "https://nfce.fazenda.mg.gov.br/nfce/services",
            "https://hnfce.fazenda.mg.gov.br/nfce/services",
        ],
    ],
};

const PR: Authorizer = Authorizer {
    name: "PR",
    style: PathStyle::Plain,
    bases: [
        [
            "https://nfe.sefa.pr.gov.br/nfe",
            "https://homologacao.nfe.sefa.pr.gov.br/nfe",
        ],
        [
            "https://nfce.sefa.pr.gov.br/nfce",
            "https://homologacao.nfce.sefa.pr.gov.br/nfce",
        ],
    ],
};

const RS: Authorizer = Authorizer {
    name: "RS",
    style: PathStyle::Nested,
    bases: [
        [
            "https://nfe.sefazrs.rs.gov.br/ws",
            "https://nfe-homologacao.sefazrs.rs.gov.br/ws",
        ],
        [
            "https://nfce.sefazrs.rs.gov.br/ws",
            "https://nfce-homologacao.sefazrs.rs.gov.br/ws",
        ],
    ],
};

const SVRS: Authorizer = Authorizer {
    name: "SVRS",
    style: PathStyle::Nested,
    bases: [
        [
            "https://nfe.svrs.rs.gov.br/ws",
            "https://nfe-homologacao.svrs.rs.gov.br/ws",
        ],
        [
            "https://nfce.svrs.rs.gov.br/ws",
            "https://nfce-homologacao.svrs.rs.gov.br/ws",
        ],
    ],
};

fn authorizer_for(state_code: u8) -> &'static Authorizer {
    match state_code {
        35 => &SP,
        31 => &MG,
        41 => &PR,
        43 => &RS,
        _ => &SVRS,
    }
}

/// NFC-e consultation portals: `(qr code url, consult url)` per environment.
fn nfce_portal(state: &str, environment: Environment) -> Option<(&'static str, &'static str)> {
    let production = environment == Environment::Production;
    match state {
        "SP" if production => Some((
            "https://www.nfce.fazenda.sp.gov.br/NFCeConsultaPublica/Paginas/ConsultaQRCode.aspx",
            "https://www.nfce.fazenda.sp.gov.br/NFCeConsultaPublica",
        )),
        "SP" => Some((
            "https://www.homologacao.nfce.fazenda.sp.gov.br/NFCeConsultaPublica/Paginas/ConsultaQRCode.aspx",
            "https://www.homologacao.nfce.fazenda.sp.gov.br/NFCeConsultaPublica",
        )),
        "MG" => Some((
            "https://portalsped.fazenda.mg.gov.br/portalnfce/sistema/qrcode.xhtml",
            "https://portalsped.fazenda.mg.gov.br/portalnfce",
        )),
        "PR" => Some((
            "http://www.fazenda.pr.gov.br/nfce/qrcode",
            "http://www.fazenda.pr.gov.br/nfce/consulta",
        )),
        "RS" => Some((
            "https://www.sefaz.rs.gov.br/NFCE/NFCE-COM.aspx",
            "https://www.sefaz.rs.gov.br/nfce/consulta",
        )),
        _ => None,
    }
}

// =============================================================================
// Endpoint
// =============================================================================

/// Resolved URLs for one (state, environment, model).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub authorizer: String,
    pub state_code: u8,
    pub environment: Environment,
    pub model: DocumentModel,
    authorization: String,
    return_authorization: String,
    event: String,
    consult: String,
    voiding: String,
    status: String,
    pub qr_code_url: Option<String>,
    pub consult_url: Option<String>,
}

impl Endpoint {
    pub fn url(&self, service: Service) -> &str {
        match service {
            Service::Authorization => &self.authorization,
            Service::ReturnAuthorization => &self.return_authorization,
            Service::Event => &self.event,
            Service::Consult => &self.consult,
            Service::Voiding => &self.voiding,
            Service::Status => &self.status,
        }
    }

    /// Fails unless `environment` matches this endpoint and every URL.
    pub fn ensure_environment(&self, environment: Environment) -> Result<(), ValidationError> {
        let mismatch = |target: Environment| ValidationError::EnvironmentMismatch {
            document: environment.to_string(),
            target: target.to_string(),
        };
        if self.environment != environment {
            return Err(mismatch(self.environment));
        }
        for service in Service::ALL {
            if let Some(hinted) = environment_hint(self.url(service)) {
                if hinted != environment {
                    return Err(mismatch(hinted));
                }
            }
        }
        Ok(())
    }
}

/// Guesses the environment a URL belongs to from its host name.
///
/// Returns `None` for hosts that do not follow the SEFAZ naming, such as a
/// local proxy.
pub fn environment_hint(url: &str) -> Option<Environment> {
    let host = url::Url::parse(url).ok()?.host_str()?.to_ascii_lowercase();
    let labels: Vec<&str> = host.split('.').collect();
    let homologation = labels.iter().any(|label| {
        *label == "homologacao"
            || label.ends_with("-homologacao")
            || *label == "hnfe"
            || *label == "hnfce"
    });
    if homologation {
        return Some(Environment::Homologation);
    }
    if host.ends_with(".gov.br") {
        return Some(Environment::Production);
    }
    None
}

// =============================================================================
// Resolver
// =============================================================================

/// Built-in table plus configured overrides.
#[derive(Debug, Clone, Default)]
pub struct EndpointResolver {
    overrides: Vec<EndpointOverride>,
}

impl EndpointResolver {
    pub fn new(overrides: Vec<EndpointOverride>) -> Self {
        EndpointResolver { overrides }
    }

    pub fn resolve(
        &self,
        state_code: u8,
        environment: Environment,
        model: DocumentModel,
    ) -> IssueResult<Endpoint> {
        let state = state_abbreviation(state_code).ok_or_else(|| {
            IssueError::Validation(ValidationError::OutOfRange {
                field: "state_code".into(),
                min: 11,
                max: 53,
            })
        })?;

        let matching = self.overrides.iter().find(|o| {
            state_code_for(&o.state) == Some(state_code)
                && o.environment == environment
                && o.model.map(|m| m == model).unwrap_or(true)
        });

        let portal = nfce_portal(state, environment);
        let mut endpoint = match matching {
            Some(o) => {
                let base = o.base_url.trim_end_matches('/');
                let url = |service: Service| format!("{}/{}", base, service.name());
                Endpoint {
                    authorizer: format!("override:{}", o.state),
                    state_code,
                    environment,
                    model,
                    authorization: url(Service::Authorization),
                    return_authorization: url(Service::ReturnAuthorization),
                    event: url(Service::Event),
                    consult: url(Service::Consult),
                    voiding: url(Service::Voiding),
                    status: url(Service::Status),
                    qr_code_url: o.qr_code_url.clone(),
                    consult_url: o.consult_url.clone(),
                }
            }
            None => {
                let authorizer = authorizer_for(state_code);
                let model_index = match model {
                    DocumentModel::Nfe => 0,
                    DocumentModel::Nfce => 1,
                };
                let env_index = match environment {
                    Environment::Production => 0,
                    Environment::Homologation => 1,
                };
                let base = authorizer.bases[model_index][env_index];
                let url =
                    |service: Service| format!("{}/{}", base, authorizer.style.path(service));
                Endpoint {
                    authorizer: authorizer.name.to_string(),
                    state_code,
                    environment,
                    model,
                    authorization: url(Service::Authorization),
                    return_authorization: url(Service::ReturnAuthorization),
                    event: url(Service::Event),
                    consult: url(Service::Consult),
                    voiding: url(Service::Voiding),
                    status: url(Service::Status),
                    qr_code_url: None,
                    consult_url: None,
                }
            }
        };

        if model == DocumentModel::Nfce {
            if endpoint.qr_code_url.is_none() {
                endpoint.qr_code_url = portal.map(|(qr, _)| qr.to_string());
            }
            if endpoint.consult_url.is_none() {
                endpoint.consult_url = portal.map(|(_, consult)| consult.to_string());
            }
        }

        Ok(endpoint)
    }
}
