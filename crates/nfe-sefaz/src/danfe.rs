//! # DANFE Rendering
//!
//! The human-readable copy of an authorized document, rendered from the
//! final `nfeProc` XML, and of its correction letters.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  nfeProc XML ──► DanfeData::from_xml ──► DanfeRenderer::render ──► PDF  │
//! │                                                                         │
//! │  procEventoNFe (110110) + nfeProc                                       │
//! │    ──► CorrectionLetterData::from_xml ──► render_correction ──► PDF     │
//! │                                                                         │
//! │  LopdfRenderer page layout (A4, Courier 9pt):                           │
//! │    header: emitter, model, series/number, emission date                 │
//! │    access key in blocks of four, authorization protocol                 │
//! │    recipient                                                            │
//! │    items table, continued on further pages as needed                    │
//! │    totals, payments, change, QR code URL (NFC-e)                        │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use lopdf::content::{Content, Operation};
use lopdf::{dictionary, Document, Object, Stream};

use crate::error::{IssueError, IssueResult};
use crate::xml::{extract_all, text_of};
use nfe_core::{AccessKey, DocumentModel, Environment};

/// Characters per line at Courier 9pt on A4 with 40pt margins.
const LINE_WIDTH: usize = 90;
const LINES_PER_PAGE: usize = 68;
const FONT_SIZE: i64 = 9;
const LEADING: i64 = 11;

// =============================================================================
// Data
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DanfeItem {
    pub code: String,
    pub description: String,
    pub quantity: String,
    pub unit: String,
    pub unit_price: String,
    pub total: String,
}

/// Everything printed on the DANFE.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DanfeData {
    pub access_key: AccessKey,
    pub environment: Environment,
    pub series: String,
    pub number: String,
    pub emitted_at: String,
    pub emitter_name: String,
    pub emitter_tax_id: String,
    pub emitter_address: String,
    pub recipient_name: Option<String>,
    pub recipient_tax_id: Option<String>,
    pub items: Vec<DanfeItem>,
    pub products_total: String,
    pub discounts: String,
    pub freight: String,
    pub document_total: String,
    pub payments: Vec<(String, String)>,
    pub change: Option<String>,
    pub protocol_number: Option<String>,
    pub authorized_at: Option<String>,
    pub qr_code: Option<String>,
}

impl DanfeData {
    /// Reads the fields from an `nfeProc` (or bare `NFe`) document.
    pub fn from_xml(xml: &str) -> IssueResult<Self> {
        let missing = |field: &str| IssueError::Render(format!("document has no {}", field));
        let text = |scope: &str, name: &str| text_of(scope, name).unwrap_or_default();

        let key_text = crate::xml::attribute_of(xml, "infNFe", "Id")
            .map(|id| id.trim_start_matches("NFe").to_string())
            .ok_or_else(|| missing("infNFe Id"))?;
        let access_key =
            AccessKey::parse(&key_text).map_err(|e| IssueError::Render(e.to_string()))?;

        let ide = crate::xml::extract_element(xml, "ide").ok_or_else(|| missing("ide"))?;
        let emit = crate::xml::extract_element(xml, "emit").ok_or_else(|| missing("emit"))?;
        let totals = crate::xml::extract_element(xml, "ICMSTot").ok_or_else(|| missing("ICMSTot"))?;

        let environment = text_of(ide, "tpAmb")
            .and_then(|t| t.parse::<u8>().ok())
            .and_then(Environment::from_code)
            .ok_or_else(|| missing("tpAmb"))?;

        let emitter_address = match crate::xml::extract_element(emit, "enderEmit") {
            Some(addr) => format!(
                "{}, {} - {} - {}/{}",
                text(addr, "xLgr"),
                text(addr, "nro"),
                text(addr, "xBairro"),
                text(addr, "xMun"),
                text(addr, "UF")
            ),
            None => String::new(),
        };

        let dest = crate::xml::extract_element(xml, "dest");
        let recipient_tax_id =
            dest.and_then(|d| text_of(d, "CNPJ").or_else(|| text_of(d, "CPF")));

        let items = extract_all(xml, "det")
            .into_iter()
            .map(|det| DanfeItem {
                code: text(det, "cProd"),
                description: text(det, "xProd"),
                quantity: text(det, "qCom"),
                unit: text(det, "uCom"),
                unit_price: text(det, "vUnCom"),
                total: text(det, "vProd"),
            })
            .collect();

        let payments = extract_all(xml, "detPag")
            .into_iter()
            .map(|p| (text(p, "tPag"), text(p, "vPag")))
            .collect();

        let protocol = crate::xml::extract_element(xml, "infProt");

        Ok(DanfeData {
            access_key,
            environment,
            series: text(ide, "serie"),
            number: text(ide, "nNF"),
            emitted_at: text(ide, "dhEmi"),
            emitter_name: text(emit, "xNome"),
            emitter_tax_id: text(emit, "CNPJ"),
            emitter_address,
            recipient_name: dest.and_then(|d| text_of(d, "xNome")),
            recipient_tax_id,
            items,
            products_total: text(totals, "vProd"),
            discounts: text(totals, "vDesc"),
            freight: text(totals, "vFrete"),
            document_total: text(totals, "vNF"),
            payments,
            change: text_of(xml, "vTroco"),
            protocol_number: protocol.and_then(|p| text_of(p, "nProt")),
            authorized_at: protocol.and_then(|p| text_of(p, "dhRecbto")),
            qr_code: text_of(xml, "qrCode"),
        })
    }

    fn title(&self) -> &'static str {
        match self.access_key.model() {
            DocumentModel::Nfe => "DANFE - Documento Auxiliar da Nota Fiscal Eletronica",
            DocumentModel::Nfce => "DANFE NFC-e - Documento Auxiliar da NFC-e",
        }
    }

    /// Printable lines, before pagination.
    pub fn lines(&self) -> Vec<String> {
        let rule = "-".repeat(LINE_WIDTH);
        let mut lines = vec![
            self.title().to_string(),
            rule.clone(),
            self.emitter_name.clone(),
            format!("CNPJ {}", self.emitter_tax_id),
            self.emitter_address.clone(),
            format!(
                "Serie {}  Numero {}  Emissao {}",
                self.series, self.number, self.emitted_at
            ),
        ];
        if self.environment == Environment::Homologation {
            lines.push("EMITIDA EM AMBIENTE DE HOMOLOGACAO - SEM VALOR FISCAL".to_string());
        }
        lines.push(rule.clone());
        lines.push("CHAVE DE ACESSO".to_string());
        lines.push(self.access_key.formatted());
        match (&self.protocol_number, &self.authorized_at) {
            (Some(number), Some(at)) => lines.push(format!("Protocolo de autorizacao {} {}", number, at)),
            (Some(number), None) => lines.push(format!("Protocolo de autorizacao {}", number)),
            _ => lines.push("SEM PROTOCOLO DE AUTORIZACAO".to_string()),
        }
        lines.push(rule.clone());

        match (&self.recipient_name, &self.recipient_tax_id) {
            (Some(name), Some(tax_id)) => {
                lines.push(format!("DESTINATARIO {}", name));
                lines.push(format!("CPF/CNPJ {}", tax_id));
            }
            (None, Some(tax_id)) => lines.push(format!("CONSUMIDOR {}", tax_id)),
            _ => lines.push("CONSUMIDOR NAO IDENTIFICADO".to_string()),
        }
        lines.push(rule.clone());

        lines.push(format!(
            "{:<10} {:<38} {:>10} {:<4} {:>11} {:>11}",
            "CODIGO", "DESCRICAO", "QTD", "UN", "VL UNIT", "VL TOTAL"
        ));
        for item in &self.items {
            let description = truncate(&item.description, 38);
            lines.push(format!(
                "{:<10} {:<38} {:>10} {:<4} {:>11} {:>11}",
                truncate(&item.code, 10),
                description,
                item.quantity,
                truncate(&item.unit, 4),
                item.unit_price,
                item.total
            ));
        }
        lines.push(rule.clone());

        lines.push(format!("VALOR DOS PRODUTOS {:>20}", self.products_total));
        lines.push(format!("DESCONTOS          {:>20}", self.discounts));
        lines.push(format!("FRETE              {:>20}", self.freight));
        lines.push(format!("VALOR TOTAL        {:>20}", self.document_total));
        for (method, amount) in &self.payments {
            lines.push(format!("PAGAMENTO {:<8} {:>20}", method, amount));
        }
        if let Some(change) = &self.change {
            lines.push(format!("TROCO              {:>20}", change));
        }
        if let Some(qr) = &self.qr_code {
            lines.push(rule);
            lines.push("CONSULTE PELA CHAVE DE ACESSO OU QR CODE".to_string());
            let chars: Vec<char> = qr.chars().collect();
            for chunk in chars.chunks(LINE_WIDTH) {
                lines.push(chunk.iter().collect());
            }
        }
        lines
    }
}

// =============================================================================
// Correction Letter
// =============================================================================

/// Everything printed on a correction letter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CorrectionLetterData {
    pub access_key: AccessKey,
    pub environment: Environment,
    pub sequence: String,
    pub occurred_at: String,
    pub correction: String,
    pub conditions: String,
    pub protocol_number: Option<String>,
    pub registered_at: Option<String>,
    pub status_reason: Option<String>,
    pub emitter_name: String,
    pub emitter_tax_id: String,
    pub emitter_address: String,
}

impl CorrectionLetterData {
    /// Reads the letter from its `procEventoNFe` and the emitter from the
    /// corrected document.
    pub fn from_xml(event_xml: &str, document_xml: &str) -> IssueResult<Self> {
        let missing = |field: &str| IssueError::Render(format!("correction letter has no {}", field));
        let text = |scope: &str, name: &str| text_of(scope, name).unwrap_or_default();

        let info = crate::xml::extract_element(event_xml, "infEvento")
            .ok_or_else(|| missing("infEvento"))?;
        let key_text = text_of(info, "chNFe").ok_or_else(|| missing("chNFe"))?;
        let access_key =
            AccessKey::parse(&key_text).map_err(|e| IssueError::Render(e.to_string()))?;
        let environment = text_of(info, "tpAmb")
            .and_then(|t| t.parse::<u8>().ok())
            .and_then(Environment::from_code)
            .ok_or_else(|| missing("tpAmb"))?;
        let correction = text_of(info, "xCorrecao").ok_or_else(|| missing("xCorrecao"))?;

        let emit = crate::xml::extract_element(document_xml, "emit")
            .ok_or_else(|| IssueError::Render("corrected document has no emit".into()))?;
        let emitter_address = match crate::xml::extract_element(emit, "enderEmit") {
            Some(addr) => format!(
                "{}, {} - {} - {}/{} CEP {}",
                text(addr, "xLgr"),
                text(addr, "nro"),
                text(addr, "xBairro"),
                text(addr, "xMun"),
                text(addr, "UF"),
                text(addr, "CEP")
            ),
            None => String::new(),
        };

        let answer = crate::xml::extract_element(event_xml, "retEvento");
        Ok(CorrectionLetterData {
            access_key,
            environment,
            sequence: text(info, "nSeqEvento"),
            occurred_at: text(info, "dhEvento"),
            correction,
            conditions: text(info, "xCondUso"),
            protocol_number: answer.and_then(|a| text_of(a, "nProt")),
            registered_at: answer.and_then(|a| text_of(a, "dhRegEvento")),
            status_reason: answer.and_then(|a| text_of(a, "xMotivo")),
            emitter_name: text(emit, "xNome"),
            emitter_tax_id: text(emit, "CNPJ"),
            emitter_address,
        })
    }

    pub fn lines(&self) -> Vec<String> {
        let rule = "-".repeat(LINE_WIDTH);
        let mut lines = vec![
            "CARTA DE CORRECAO ELETRONICA".to_string(),
            rule.clone(),
            self.emitter_name.clone(),
            format!("CNPJ {}", self.emitter_tax_id),
            self.emitter_address.clone(),
        ];
        if self.environment == Environment::Homologation {
            lines.push("EMITIDA EM AMBIENTE DE HOMOLOGACAO - SEM VALOR FISCAL".to_string());
        }
        lines.push(rule.clone());
        lines.push("CHAVE DE ACESSO DO DOCUMENTO CORRIGIDO".to_string());
        lines.push(self.access_key.formatted());
        lines.push(format!(
            "Modelo {}  Serie {}  Numero {}",
            self.access_key.model().code(),
            self.access_key.series(),
            self.access_key.number()
        ));
        lines.push(format!("Sequencia {}  Evento em {}", self.sequence, self.occurred_at));
        match (&self.protocol_number, &self.registered_at) {
            (Some(number), Some(at)) => lines.push(format!("Protocolo {} registrado em {}", number, at)),
            (Some(number), None) => lines.push(format!("Protocolo {}", number)),
            _ => lines.push("SEM PROTOCOLO DE REGISTRO".to_string()),
        }
        if let Some(reason) = &self.status_reason {
            lines.push(reason.clone());
        }
        lines.push(rule.clone());
        lines.push("CORRECAO".to_string());
        lines.extend(wrap(&self.correction, LINE_WIDTH));
        lines.push(rule);
        lines.push("CONDICOES DE USO".to_string());
        lines.extend(wrap(&self.conditions, LINE_WIDTH));
        lines
    }
}

/// Breaks `text` into lines of at most `width` characters at spaces.
fn wrap(text: &str, width: usize) -> Vec<String> {
    let mut lines = Vec::new();
    let mut current = String::new();
    for word in text.split_whitespace() {
        let word_len = word.chars().count();
        let current_len = current.chars().count();
        if current_len > 0 && current_len + 1 + word_len > width {
            lines.push(std::mem::take(&mut current));
        }
        if word_len > width {
            let chars: Vec<char> = word.chars().collect();
            for chunk in chars.chunks(width) {
                if !current.is_empty() {
                    lines.push(std::mem::take(&mut current));
                }
                current = chunk.iter().collect();
            }
            continue;
        }
        if !current.is_empty() {
            current.push(' ');
        }
        current.push_str(word);
    }
    if !current.is_empty() {
        lines.push(current);
    }
    lines
}

fn truncate(text: &str, width: usize) -> String {
    text.chars().take(width).collect()
}

/// Maps accented Portuguese letters to ASCII; the base-14 fonts cannot
/// show anything outside it.
fn to_ascii(text: &str) -> String {
    text.chars()
        .map(|c| match c {
            'á' | 'à' | 'â' | 'ã' | 'ä' => 'a',
            'Á' | 'À' | 'Â' | 'Ã' | 'Ä' => 'A',
            'é' | 'è' | 'ê' | 'ë' => 'e',
            'É' | 'È' | 'Ê' | 'Ë' => 'E',
            'í' | 'ì' | 'î' | 'ï' => 'i',
            'Í' | 'Ì' | 'Î' | 'Ï' => 'I',
            'ó' | 'ò' | 'ô' | 'õ' | 'ö' => 'o',
            'Ó' | 'Ò' | 'Ô' | 'Õ' | 'Ö' => 'O',
            'ú' | 'ù' | 'û' | 'ü' => 'u',
            'Ú' | 'Ù' | 'Û' | 'Ü' => 'U',
            'ç' => 'c',
            'Ç' => 'C',
            'º' | '°' => 'o',
            'ª' => 'a',
            c if c.is_ascii() && !c.is_ascii_control() => c,
            _ => '?',
        })
        .collect()
}

// =============================================================================
// Renderer
// =============================================================================

/// Produces the PDF bytes of a DANFE and of a correction letter.
pub trait DanfeRenderer: Send + Sync {
    fn render(&self, data: &DanfeData) -> IssueResult<Vec<u8>>;

    fn render_correction(&self, data: &CorrectionLetterData) -> IssueResult<Vec<u8>>;
}

/// Plain-text DANFE laid out with lopdf.
#[derive(Debug, Clone, Copy, Default)]
pub struct LopdfRenderer;

impl DanfeRenderer for LopdfRenderer {
    fn render(&self, data: &DanfeData) -> IssueResult<Vec<u8>> {
        typeset(&data.lines())
    }

    fn render_correction(&self, data: &CorrectionLetterData) -> IssueResult<Vec<u8>> {
        typeset(&data.lines())
    }
}

/// Lays text lines out on A4 pages in Courier.
fn typeset(lines: &[String]) -> IssueResult<Vec<u8>> {
    let render_error = |e: lopdf::Error| IssueError::Render(e.to_string());
    let lines: Vec<String> = lines.iter().map(|l| to_ascii(l)).collect();

    let mut doc = Document::with_version("1.5");
    let pages_id = doc.new_object_id();
    let font_id = doc.add_object(dictionary! {
        "Type" => "Font",
        "Subtype" => "Type1",
        "BaseFont" => "Courier",
    });
    let resources_id = doc.add_object(dictionary! {
        "Font" => dictionary! {
            "F1" => font_id,
        },
    });

    let mut kids: Vec<Object> = Vec::new();
    for page_lines in lines.chunks(LINES_PER_PAGE) {
        let mut operations = vec![
            Operation::new("BT", vec![]),
            Operation::new("Tf", vec!["F1".into(), FONT_SIZE.into()]),
            Operation::new("TL", vec![LEADING.into()]),
            Operation::new("Td", vec![40.into(), 800.into()]),
        ];
        for line in page_lines {
            operations.push(Operation::new(
                "Tj",
                vec![Object::string_literal(line.as_str())],
            ));
            operations.push(Operation::new("T*", vec![]));
        }
        operations.push(Operation::new("ET", vec![]));

        let content = Content { operations };
        let content_id =
            doc.add_object(Stream::new(dictionary! {}, content.encode().map_err(render_error)?));
        let page_id = doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "Contents" => content_id,
        });
        kids.push(page_id.into());
    }

    let count = kids.len() as i64;
    let pages = dictionary! {
        "Type" => "Pages",
        "Kids" => kids,
        "Count" => count,
        "Resources" => resources_id,
        "MediaBox" => vec![0.into(), 0.into(), 595.into(), 842.into()],
    };
    doc.objects.insert(pages_id, Object::Dictionary(pages));
    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    doc.trailer.set("Root", catalog_id);

    let mut bytes = Vec::new();
    doc.save_to(&mut bytes)
        .map_err(|e| IssueError::Render(e.to_string()))?;
    Ok(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{authorized_proc_xml, correction_proc_xml};

    #[test]
    fn test_data_from_nfe_proc() {
        let xml = authorized_proc_xml(3);
        let data = DanfeData::from_xml(&xml).unwrap();
        assert_eq!(data.items.len(), 3);
        assert_eq!(data.protocol_number.as_deref(), Some("135240000000042"));
        assert_eq!(data.environment, Environment::Homologation);
        assert!(data.lines().iter().any(|l| l == &data.access_key.formatted()));
    }

    #[test]
    fn test_render_produces_pdf() {
        let data = DanfeData::from_xml(&authorized_proc_xml(2)).unwrap();
        let bytes = LopdfRenderer.render(&data).unwrap();
        assert!(bytes.starts_with(b"%PDF-1.5"));

        let parsed = Document::load_mem(&bytes).unwrap();
        assert_eq!(parsed.get_pages().len(), 1);
    }

    #[test]
    fn test_long_documents_paginate() {
        let data = DanfeData::from_xml(&authorized_proc_xml(150)).unwrap();
        let bytes = LopdfRenderer.render(&data).unwrap();
        let parsed = Document::load_mem(&bytes).unwrap();
        assert!(parsed.get_pages().len() >= 3);
    }

    #[test]
    fn test_correction_letter_from_event_and_document() {
        let document = authorized_proc_xml(1);
        let key = DanfeData::from_xml(&document).unwrap().access_key;
        let event = correction_proc_xml(&key, 2, "Endereco do destinatario: Rua das Flores, 100");

        let letter = CorrectionLetterData::from_xml(&event, &document).unwrap();
        assert_eq!(letter.access_key, key);
        assert_eq!(letter.sequence, "2");
        assert_eq!(letter.protocol_number.as_deref(), Some("135240000000099"));
        assert!(!letter.emitter_name.is_empty());

        let lines = letter.lines();
        assert!(lines.iter().any(|l| l.contains("Rua das Flores")));
        assert!(lines.iter().all(|l| l.chars().count() <= LINE_WIDTH));

        let bytes = LopdfRenderer.render_correction(&letter).unwrap();
        assert!(bytes.starts_with(b"%PDF-1.5"));
        assert_eq!(Document::load_mem(&bytes).unwrap().get_pages().len(), 1);
    }

    #[test]
    fn test_correction_letter_needs_the_event() {
        let document = authorized_proc_xml(1);
        let err = CorrectionLetterData::from_xml("<procEventoNFe/>", &document).unwrap_err();
        assert!(matches!(err, IssueError::Render(_)));
    }

    #[test]
    fn test_wrap_breaks_at_spaces() {
        let lines = wrap("alpha beta gamma delta", 11);
        assert_eq!(lines, vec!["alpha beta", "gamma delta"]);
        assert_eq!(wrap(&"x".repeat(25), 10).len(), 3);
        assert!(wrap("   ", 10).is_empty());
    }

    #[test]
    fn test_to_ascii() {
        assert_eq!(to_ascii("Pão de Açúcar nº 1"), "Pao de Acucar no 1");
        assert_eq!(to_ascii("€"), "?");
    }

    #[test]
    fn test_missing_ide_is_render_error() {
        let err = DanfeData::from_xml("<NFe><infNFe Id=\"NFe1\"></infNFe></NFe>").unwrap_err();
        assert!(matches!(err, IssueError::Render(_)));
    }
}
