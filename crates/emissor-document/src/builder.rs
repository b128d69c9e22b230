use emissor_types::{
    CanonicalDocument, DocumentId, DocumentModel, Environment, ForeignAddress, Money,
    SequenceNumber,
};
use tracing::debug;

use crate::error::{BuildError, FieldError};
use crate::xml::XmlWriter;

/// Namespace of the national service-invoice schema.
pub const NFSE_NAMESPACE: &str = "http://www.sped.fazenda.gov.br/nfse";
/// Layout version written to the root element.
pub const LAYOUT_VERSION: &str = "1.00";

/// Invoice override keys the builder understands.
pub const OVERRIDE_KEYS: &[&str] = &[
    "service_description",
    "national_tax_code",
    "nbs_code",
    "result_country",
    "additional_info",
];

/// Turns a [`DocumentModel`] and an allocated number into canonical bytes.
///
/// Pure: no clock, no I/O, no randomness. Elements are written in the
/// order the schema requires.
#[derive(Clone, Copy, Debug, Default)]
pub struct DocumentBuilder;

impl DocumentBuilder {
    pub fn new() -> Self {
        Self
    }

    /// Structural checks that do not depend on the sequence number.
    ///
    /// Run before a number is allocated so that a bad model never consumes one.
    pub fn check(&self, model: &DocumentModel) -> Result<(), BuildError> {
        let violations = structural_violations(model);
        if violations.is_empty() {
            Ok(())
        } else {
            Err(BuildError { violations })
        }
    }

    pub fn build(
        &self,
        model: &DocumentModel,
        sequence: SequenceNumber,
        environment: Environment,
    ) -> Result<CanonicalDocument, BuildError> {
        let mut violations = structural_violations(model);

        if sequence.get() == 0 || sequence.get() > SequenceNumber::MAX {
            violations.push(FieldError::new(
                "sequence",
                format!("must be between 1 and {}", SequenceNumber::MAX),
            ));
        }

        let issuer = &model.issuer;
        let document_id = match DocumentId::derive(
            &issuer.municipality_code,
            &issuer.tax_id,
            &issuer.series,
            sequence,
        ) {
            Ok(id) => Some(id),
            Err(e) => {
                violations.push(FieldError::new("document_id", e.to_string()));
                None
            }
        };

        let totals = model.invoice.totals();
        let (Some(document_id), Some((total, foreign_total)), true) =
            (document_id, totals, violations.is_empty())
        else {
            return Err(BuildError { violations });
        };

        let bytes = write_document(model, sequence, environment, &document_id, total, foreign_total);
        debug!(
            seq = sequence.get(),
            document_id = %document_id,
            len = bytes.len(),
            "canonical document built"
        );

        Ok(CanonicalDocument {
            sequence,
            document_id,
            bytes,
        })
    }
}

fn structural_violations(model: &DocumentModel) -> Vec<FieldError> {
    let mut v = Vec::new();
    let mut required = |field: &str, value: &str| {
        if value.trim().is_empty() {
            v.push(FieldError::new(field, "is required"));
        }
    };

    let issuer = &model.issuer;
    required("issuer.legal_name", &issuer.legal_name);
    required("issuer.municipality_code", &issuer.municipality_code);
    required("issuer.phone", &issuer.phone);
    required("issuer.email", &issuer.email);
    required("issuer.series", &issuer.series);
    required("issuer.app_version", &issuer.app_version);
    required("issuer.service.national_tax_code", &issuer.service.national_tax_code);
    required("issuer.service.description", &issuer.service.description);

    let client = &model.client;
    required("client.tax_id", &client.tax_id);
    required("client.name", &client.name);
    require_address(&mut required, "client.address", &client.address);

    if let Some(interm) = &model.intermediary {
        required("intermediary.tax_id", &interm.tax_id);
        required("intermediary.name", &interm.name);
        require_address(&mut required, "intermediary.address", &interm.address);
    }

    if let Some(interm) = &model.intermediary {
        if !interm.tax_id.trim().is_empty() && interm.tax_id.trim() == client.tax_id.trim() {
            v.push(FieldError::new(
                "intermediary.tax_id",
                "must differ from the client's tax id",
            ));
        }
    }

    let invoice = &model.invoice;
    if invoice.lines.is_empty() {
        v.push(FieldError::new("invoice.lines", "at least one line is required"));
    }
    for (i, line) in invoice.lines.iter().enumerate() {
        if line.description.trim().is_empty() {
            v.push(FieldError::new(format!("invoice.lines[{i}].description"), "is required"));
        }
        if line.amount.is_negative() {
            v.push(FieldError::new(format!("invoice.lines[{i}].amount"), "must not be negative"));
        }
        if line.foreign_amount.is_negative() {
            v.push(FieldError::new(
                format!("invoice.lines[{i}].foreign_amount"),
                "must not be negative",
            ));
        }
    }
    match invoice.totals() {
        None => v.push(FieldError::new("invoice.lines", "total amount overflows")),
        Some((total, _)) if !invoice.lines.is_empty() && total <= Money::ZERO => {
            v.push(FieldError::new("invoice.total", "must be greater than zero"));
        }
        Some(_) => {}
    }

    if invoice.competence > invoice.issued_at.date_naive() {
        v.push(FieldError::new(
            "invoice.competence",
            "must not be after the emission date",
        ));
    }

    for key in invoice.overrides.keys() {
        if !OVERRIDE_KEYS.contains(&key.as_str()) {
            v.push(FieldError::new(format!("invoice.overrides.{key}"), "unknown override"));
        }
    }

    v
}

fn require_address(required: &mut impl FnMut(&str, &str), prefix: &str, address: &ForeignAddress) {
    required(&format!("{prefix}.country"), &address.country);
    required(&format!("{prefix}.postal_code"), &address.postal_code);
    required(&format!("{prefix}.city"), &address.city);
    required(&format!("{prefix}.state"), &address.state);
    required(&format!("{prefix}.street"), &address.street);
    required(&format!("{prefix}.number"), &address.number);
    required(&format!("{prefix}.district"), &address.district);
}

fn write_address(w: &mut XmlWriter, address: &ForeignAddress, with_complement: bool) {
    w.open("end", &[]);
    w.open("endExt", &[])
        .leaf("cPais", &address.country)
        .leaf("cEndPost", &address.postal_code)
        .leaf("xCidade", &address.city)
        .leaf("xEstProvReg", &address.state)
        .close();
    w.leaf("xLgr", &address.street).leaf("nro", &address.number);
    if with_complement {
        w.leaf_opt(
            "xCpl",
            address.complement.as_deref().filter(|c| !c.trim().is_empty()),
        );
    }
    w.leaf("xBairro", &address.district);
    w.close();
}

fn write_document(
    model: &DocumentModel,
    sequence: SequenceNumber,
    environment: Environment,
    document_id: &DocumentId,
    total: Money,
    foreign_total: Money,
) -> Vec<u8> {
    let issuer = &model.issuer;
    let client = &model.client;
    let invoice = &model.invoice;
    let overrides = &invoice.overrides;
    let pick = |key: &str, default: &str| -> String {
        overrides.get(key).cloned().unwrap_or_else(|| default.to_string())
    };

    let mut w = XmlWriter::new();
    w.open("DPS", &[("xmlns", NFSE_NAMESPACE), ("versao", LAYOUT_VERSION)]);
    w.open("infDPS", &[("Id", document_id.as_str())]);

    w.leaf("tpAmb", environment.remote_code())
        .leaf("dhEmi", &invoice.issued_at.format("%Y-%m-%dT%H:%M:%S%:z").to_string())
        .leaf("verAplic", &issuer.app_version)
        .leaf("serie", &issuer.series)
        .leaf("nDPS", &sequence.to_string())
        .leaf("dCompet", &invoice.competence.format("%Y-%m-%d").to_string())
        .leaf("tpEmit", "1")
        .leaf("cLocEmi", &issuer.municipality_code);

    w.open("prest", &[])
        .leaf("CNPJ", issuer.tax_id.as_str())
        .leaf("fone", &issuer.phone)
        .leaf("email", &issuer.email);
    w.open("regTrib", &[])
        .leaf("opSimpNac", &issuer.simple_national_option)
        .leaf("regEspTrib", &issuer.special_tax_regime)
        .close();
    w.close();

    w.open("toma", &[]).leaf("NIF", &client.tax_id).leaf("xNome", &client.name);
    write_address(&mut w, &client.address, true);
    w.close();

    if let Some(interm) = &model.intermediary {
        w.open("interm", &[]).leaf("NIF", &interm.tax_id).leaf("xNome", &interm.name);
        write_address(&mut w, &interm.address, false);
        w.close();
    }

    w.open("serv", &[]);
    w.open("locPrest", &[])
        .leaf("cLocPrestacao", &issuer.municipality_code)
        .close();
    w.open("cServ", &[])
        .leaf("cTribNac", &pick("national_tax_code", &issuer.service.national_tax_code))
        .leaf("xDescServ", &pick("service_description", &issuer.service.description))
        .leaf("cNBS", &pick("nbs_code", &issuer.service.nbs_code))
        .close();
    w.open("comExt", &[])
        .leaf("mdPrestacao", "4")
        .leaf("vincPrest", "0")
        .leaf("tpMoeda", &issuer.service.currency_code)
        .leaf("vServMoeda", &foreign_total.to_string())
        .leaf("mecAFComexP", &client.provider_support_mechanism)
        .leaf("mecAFComexT", &client.taker_support_mechanism)
        .leaf("movTempBens", "1")
        .leaf("mdic", "0")
        .close();
    let additional = additional_info(model);
    if let Some(info) = additional.as_deref() {
        w.open("infoCompl", &[]).leaf("xInfComp", info).close();
    }
    w.close();

    w.open("valores", &[]);
    w.open("vServPrest", &[]).leaf("vServ", &total.to_string()).close();
    w.open("trib", &[]);
    w.open("tribMun", &[])
        .leaf("tribISSQN", "3")
        .leaf("cPaisResult", &pick("result_country", &issuer.service.result_country))
        .leaf("tpRetISSQN", "1")
        .close();
    w.open("tribFed", &[]);
    w.open("piscofins", &[]).leaf("CST", "08").close();
    w.close();
    w.open("totTrib", &[]);
    w.open("pTotTrib", &[])
        .leaf("pTotTribFed", "0.00")
        .leaf("pTotTribEst", "0.00")
        .leaf("pTotTribMun", "0.00")
        .close();
    w.close();
    w.close();
    w.close();

    w.finish()
}

/// Line descriptions (when more than one) followed by the free-text override.
fn additional_info(model: &DocumentModel) -> Option<String> {
    let invoice = &model.invoice;
    let mut parts: Vec<String> = Vec::new();
    if invoice.lines.len() > 1 {
        parts.extend(
            invoice
                .lines
                .iter()
                .map(|l| format!("{} ({})", l.description.trim(), l.amount)),
        );
    }
    if let Some(extra) = invoice.overrides.get("additional_info") {
        if !extra.trim().is_empty() {
            parts.push(extra.trim().to_string());
        }
    }
    (!parts.is_empty()).then(|| parts.join("; "))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, NaiveDate};
    use emissor_types::{
        Client, ClientId, Intermediary, Invoice, InvoiceLine, Issuer, IssuerId, ServiceInfo,
    };
    use proptest::prelude::*;
    use std::collections::BTreeMap;

    fn address() -> ForeignAddress {
        ForeignAddress {
            country: "US".into(),
            postal_code: "94105".into(),
            city: "San Francisco".into(),
            state: "CA".into(),
            street: "Market St".into(),
            number: "500".into(),
            complement: Some("Suite 12".into()),
            district: "n/a".into(),
        }
    }

    fn model() -> DocumentModel {
        DocumentModel {
            issuer: Issuer {
                tax_id: IssuerId::new("12345678000199").unwrap(),
                legal_name: "Acme Software LTDA".into(),
                municipality_code: "4205407".into(),
                phone: "4830000000".into(),
                email: "fiscal@acme.example".into(),
                simple_national_option: "1".into(),
                special_tax_regime: "0".into(),
                series: "900".into(),
                app_version: "emissor_0.1.0".into(),
                service: ServiceInfo::default(),
            },
            client: Client {
                id: ClientId::new("globex").unwrap(),
                tax_id: "98-7654321".into(),
                name: "Globex Corp".into(),
                address: address(),
                provider_support_mechanism: "02".into(),
                taker_support_mechanism: "02".into(),
            },
            intermediary: None,
            invoice: Invoice {
                competence: NaiveDate::from_ymd_opt(2026, 9, 30).unwrap(),
                issued_at: DateTime::parse_from_rfc3339("2026-10-01T10:00:00-03:00").unwrap(),
                lines: vec![InvoiceLine {
                    description: "Software development".into(),
                    amount: Money::from_cents(2_500_000),
                    foreign_amount: Money::from_cents(450_000),
                }],
                overrides: BTreeMap::new(),
            },
        }
    }

    fn text(doc: &CanonicalDocument) -> String {
        String::from_utf8(doc.bytes.clone()).unwrap()
    }

    #[test]
    fn build_is_byte_identical_for_identical_inputs() {
        let b = DocumentBuilder::new();
        let a = b.build(&model(), SequenceNumber::new(3), Environment::Staging).unwrap();
        let c = b.build(&model(), SequenceNumber::new(3), Environment::Staging).unwrap();
        assert_eq!(a, c);
    }

    #[test]
    fn embeds_sequence_id_and_totals() {
        let doc = DocumentBuilder::new()
            .build(&model(), SequenceNumber::new(3), Environment::Staging)
            .unwrap();
        let xml = text(&doc);
        assert_eq!(doc.document_id.as_str(), "DPS420540721234567800019900900000000000000003");
        assert!(xml.contains("<infDPS Id=\"DPS420540721234567800019900900000000000000003\">"));
        assert!(xml.contains("<tpAmb>2</tpAmb>"));
        assert!(xml.contains("<nDPS>3</nDPS>"));
        assert!(xml.contains("<dhEmi>2026-10-01T10:00:00-03:00</dhEmi>"));
        assert!(xml.contains("<vServ>25000.00</vServ>"));
        assert!(xml.contains("<vServMoeda>4500.00</vServMoeda>"));
        assert!(xml.contains("<xCpl>Suite 12</xCpl>"));
        assert!(!xml.contains("<interm>"));
    }

    #[test]
    fn element_order_follows_schema() {
        let doc = DocumentBuilder::new()
            .build(&model(), SequenceNumber::new(1), Environment::Production)
            .unwrap();
        let xml = text(&doc);
        let pos = |tag: &str| xml.find(tag).unwrap_or_else(|| panic!("missing {tag}"));
        assert!(pos("<tpAmb>") < pos("<dhEmi>"));
        assert!(pos("<cLocEmi>") < pos("<prest>"));
        assert!(pos("<prest>") < pos("<toma>"));
        assert!(pos("<toma>") < pos("<serv>"));
        assert!(pos("<serv>") < pos("<valores>"));
        assert!(xml.ends_with("</valores></infDPS></DPS>"));
    }

    #[test]
    fn multiple_lines_are_summed_and_listed() {
        let mut m = model();
        m.invoice.lines.push(InvoiceLine {
            description: "Support".into(),
            amount: Money::from_cents(100_000),
            foreign_amount: Money::from_cents(18_000),
        });
        let xml = text(
            &DocumentBuilder::new()
                .build(&m, SequenceNumber::new(1), Environment::Staging)
                .unwrap(),
        );
        assert!(xml.contains("<vServ>26000.00</vServ>"));
        assert!(xml.contains("<vServMoeda>4680.00</vServMoeda>"));
        assert!(xml.contains("<xInfComp>Software development (25000.00); Support (1000.00)</xInfComp>"));
    }

    #[test]
    fn overrides_replace_service_fields() {
        let mut m = model();
        m.invoice
            .overrides
            .insert("service_description".into(), "Consultoria".into());
        let xml = text(
            &DocumentBuilder::new()
                .build(&m, SequenceNumber::new(1), Environment::Staging)
                .unwrap(),
        );
        assert!(xml.contains("<xDescServ>Consultoria</xDescServ>"));
    }

    #[test]
    fn intermediary_is_written_after_taker() {
        let mut m = model();
        m.intermediary = Some(Intermediary {
            tax_id: "11-1111111".into(),
            name: "Payments Inc".into(),
            address: address(),
        });
        let xml = text(
            &DocumentBuilder::new()
                .build(&m, SequenceNumber::new(1), Environment::Staging)
                .unwrap(),
        );
        assert!(xml.find("<toma>").unwrap() < xml.find("<interm>").unwrap());
        // Intermediary addresses carry no complement.
        assert_eq!(xml.matches("<xCpl>").count(), 1);
    }

    #[test]
    fn reports_every_offending_field() {
        let mut m = model();
        m.client.name = " ".into();
        m.client.address.city = String::new();
        m.invoice.lines[0].amount = Money::from_cents(-1);
        m.invoice.competence = NaiveDate::from_ymd_opt(2026, 11, 1).unwrap();
        m.invoice.overrides.insert("colour".into(), "blue".into());

        let err = DocumentBuilder::new()
            .build(&m, SequenceNumber::new(1), Environment::Staging)
            .unwrap_err();
        let fields: Vec<&str> = err.fields().collect();
        assert!(fields.contains(&"client.name"));
        assert!(fields.contains(&"client.address.city"));
        assert!(fields.contains(&"invoice.lines[0].amount"));
        assert!(fields.contains(&"invoice.total"));
        assert!(fields.contains(&"invoice.competence"));
        assert!(fields.contains(&"invoice.overrides.colour"));
    }

    #[test]
    fn intermediary_must_differ_from_client() {
        let mut m = model();
        m.intermediary = Some(Intermediary {
            tax_id: m.client.tax_id.clone(),
            name: "Same".into(),
            address: address(),
        });
        let err = DocumentBuilder::new().check(&m).unwrap_err();
        assert_eq!(err.violations.len(), 1);
        assert_eq!(err.violations[0].field, "intermediary.tax_id");
    }

    #[test]
    fn empty_lines_rejected() {
        let mut m = model();
        m.invoice.lines.clear();
        let err = DocumentBuilder::new().check(&m).unwrap_err();
        assert_eq!(err.violations[0].field, "invoice.lines");
    }

    #[test]
    fn sequence_zero_and_oversized_are_rejected() {
        let b = DocumentBuilder::new();
        let err = b.build(&model(), SequenceNumber::new(0), Environment::Staging).unwrap_err();
        assert!(err.fields().any(|f| f == "sequence"));

        let err = b
            .build(&model(), SequenceNumber::new(SequenceNumber::MAX + 1), Environment::Staging)
            .unwrap_err();
        assert!(err.fields().any(|f| f == "document_id"));
    }

    #[test]
    fn escapes_markup_in_names() {
        let mut m = model();
        m.client.name = "Smith & <Sons>".into();
        let xml = text(
            &DocumentBuilder::new()
                .build(&m, SequenceNumber::new(1), Environment::Staging)
                .unwrap(),
        );
        assert!(xml.contains("<xNome>Smith &amp; &lt;Sons&gt;</xNome>"));
    }

    proptest! {
        #[test]
        fn distinct_sequences_give_distinct_ids(a in 1u64..SequenceNumber::MAX, b in 1u64..SequenceNumber::MAX) {
            prop_assume!(a != b);
            let builder = DocumentBuilder::new();
            let da = builder.build(&model(), SequenceNumber::new(a), Environment::Staging).unwrap();
            let db = builder.build(&model(), SequenceNumber::new(b), Environment::Staging).unwrap();
            prop_assert_ne!(da.document_id, db.document_id);
            prop_assert_ne!(da.bytes, db.bytes);
        }
    }
}
