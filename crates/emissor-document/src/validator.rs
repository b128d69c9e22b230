use emissor_types::{DocumentModel, ForeignAddress};

use crate::error::{BuildError, FieldError};

// ---------------------------------------------------------------------------
// FieldValidator trait
// ---------------------------------------------------------------------------

/// Field-format rules applied to a model before a number is allocated.
///
/// Validators report every violation they find. The trait is object-safe and
/// `Send + Sync` so validators can be stacked in a [`ValidatorChain`].
pub trait FieldValidator: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &str;

    fn validate(&self, model: &DocumentModel) -> Vec<FieldError>;
}

// ---------------------------------------------------------------------------
// FormatValidator
// ---------------------------------------------------------------------------

/// Format rules of the national layout: code lengths, digits, contact shape.
#[derive(Clone, Copy, Debug, Default)]
pub struct FormatValidator;

impl FieldValidator for FormatValidator {
    fn name(&self) -> &str {
        "format"
    }

    fn validate(&self, model: &DocumentModel) -> Vec<FieldError> {
        let mut v = Vec::new();
        let issuer = &model.issuer;

        digits(&mut v, "issuer.municipality_code", &issuer.municipality_code, 7..=7);
        digits(&mut v, "issuer.series", &issuer.series, 1..=5);
        digits(&mut v, "issuer.phone", &issuer.phone, 6..=20);
        digits(&mut v, "issuer.simple_national_option", &issuer.simple_national_option, 1..=1);
        digits(&mut v, "issuer.special_tax_regime", &issuer.special_tax_regime, 1..=1);
        digits(&mut v, "issuer.service.national_tax_code", &issuer.service.national_tax_code, 6..=6);
        digits(&mut v, "issuer.service.nbs_code", &issuer.service.nbs_code, 9..=9);
        digits(&mut v, "issuer.service.currency_code", &issuer.service.currency_code, 3..=3);
        country(&mut v, "issuer.service.result_country", &issuer.service.result_country);

        let email = issuer.email.trim();
        match email.split_once('@') {
            Some((local, domain)) if !local.is_empty() && domain.contains('.') => {}
            _ => v.push(FieldError::new("issuer.email", "is not an email address")),
        }

        let client = &model.client;
        digits(&mut v, "client.provider_support_mechanism", &client.provider_support_mechanism, 2..=2);
        digits(&mut v, "client.taker_support_mechanism", &client.taker_support_mechanism, 2..=2);
        address(&mut v, "client.address", &client.address);

        if let Some(interm) = &model.intermediary {
            address(&mut v, "intermediary.address", &interm.address);
        }

        for (key, value) in &model.invoice.overrides {
            let field = format!("invoice.overrides.{key}");
            match key.as_str() {
                "national_tax_code" => digits(&mut v, &field, value, 6..=6),
                "nbs_code" => digits(&mut v, &field, value, 9..=9),
                "result_country" => country(&mut v, &field, value),
                _ => {}
            }
        }

        for (i, line) in model.invoice.lines.iter().enumerate() {
            if line.foreign_amount.cents() == 0 {
                v.push(FieldError::new(
                    format!("invoice.lines[{i}].foreign_amount"),
                    "must be greater than zero for an export of services",
                ));
            }
        }

        v
    }
}

fn digits(
    v: &mut Vec<FieldError>,
    field: &str,
    value: &str,
    len: std::ops::RangeInclusive<usize>,
) {
    // Blank values are reported by the builder's structural check.
    if value.is_empty() {
        return;
    }
    if !value.bytes().all(|b| b.is_ascii_digit()) {
        v.push(FieldError::new(field, "must contain only digits"));
    } else if !len.contains(&value.len()) {
        let reason = if len.start() == len.end() {
            format!("must have exactly {} digits", len.start())
        } else {
            format!("must have {} to {} digits", len.start(), len.end())
        };
        v.push(FieldError::new(field, reason));
    }
}

fn country(v: &mut Vec<FieldError>, field: &str, value: &str) {
    if value.is_empty() {
        return;
    }
    if value.len() != 2 || !value.bytes().all(|b| b.is_ascii_uppercase()) {
        v.push(FieldError::new(field, "must be a two-letter uppercase country code"));
    }
}

fn address(v: &mut Vec<FieldError>, prefix: &str, address: &ForeignAddress) {
    country(v, &format!("{prefix}.country"), &address.country);
    if address.country == "BR" {
        v.push(FieldError::new(
            format!("{prefix}.country"),
            "foreign address cannot be in Brazil",
        ));
    }
}

// ---------------------------------------------------------------------------
// ValidatorChain
// ---------------------------------------------------------------------------

/// Runs validators in order and collects all their violations.
#[derive(Default)]
pub struct ValidatorChain {
    validators: Vec<Box<dyn FieldValidator>>,
}

impl ValidatorChain {
    pub fn new() -> Self {
        Self::default()
    }

    /// Chain holding the built-in [`FormatValidator`].
    pub fn standard() -> Self {
        Self::new().with(FormatValidator)
    }

    pub fn with(mut self, validator: impl FieldValidator + 'static) -> Self {
        self.validators.push(Box::new(validator));
        self
    }

    pub fn len(&self) -> usize {
        self.validators.len()
    }

    pub fn is_empty(&self) -> bool {
        self.validators.is_empty()
    }

    pub fn check(&self, model: &DocumentModel) -> Result<(), BuildError> {
        let violations: Vec<FieldError> = self
            .validators
            .iter()
            .flat_map(|validator| {
                let found = validator.validate(model);
                if !found.is_empty() {
                    tracing::debug!(
                        validator = validator.name(),
                        count = found.len(),
                        "field violations"
                    );
                }
                found
            })
            .collect();
        if violations.is_empty() {
            Ok(())
        } else {
            Err(BuildError { violations })
        }
    }
}

impl FieldValidator for ValidatorChain {
    fn name(&self) -> &str {
        "chain"
    }

    fn validate(&self, model: &DocumentModel) -> Vec<FieldError> {
        self.check(model).err().map(|e| e.violations).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, NaiveDate};
    use emissor_types::{
        Client, ClientId, Invoice, InvoiceLine, Issuer, IssuerId, Money, ServiceInfo,
    };
    use std::collections::BTreeMap;

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
                address: ForeignAddress {
                    country: "US".into(),
                    postal_code: "94105".into(),
                    city: "San Francisco".into(),
                    state: "CA".into(),
                    street: "Market St".into(),
                    number: "500".into(),
                    complement: None,
                    district: "n/a".into(),
                },
                provider_support_mechanism: "02".into(),
                taker_support_mechanism: "02".into(),
            },
            intermediary: None,
            invoice: Invoice {
                competence: NaiveDate::from_ymd_opt(2026, 9, 30).unwrap(),
                issued_at: DateTime::parse_from_rfc3339("2026-10-01T10:00:00-03:00").unwrap(),
                lines: vec![InvoiceLine {
                    description: "Software development".into(),
                    amount: Money::from_cents(100_000),
                    foreign_amount: Money::from_cents(18_000),
                }],
                overrides: BTreeMap::new(),
            },
        }
    }

    #[test]
    fn valid_model_passes() {
        assert!(FormatValidator.validate(&model()).is_empty());
        assert!(ValidatorChain::standard().check(&model()).is_ok());
    }

    #[test]
    fn reports_all_format_violations() {
        let mut m = model();
        m.issuer.municipality_code = "42054".into();
        m.issuer.email = "fiscal.acme.example".into();
        m.client.address.country = "usa".into();
        m.invoice.overrides.insert("nbs_code".into(), "12ab".into());

        let fields: Vec<String> = FormatValidator
            .validate(&m)
            .into_iter()
            .map(|e| e.field)
            .collect();
        assert_eq!(
            fields,
            vec![
                "issuer.municipality_code",
                "issuer.email",
                "client.address.country",
                "invoice.overrides.nbs_code",
            ]
        );
    }

    #[test]
    fn brazilian_address_is_rejected() {
        let mut m = model();
        m.client.address.country = "BR".into();
        let errs = FormatValidator.validate(&m);
        assert_eq!(errs.len(), 1);
        assert!(errs[0].reason.contains("Brazil"));
    }

    #[test]
    fn zero_foreign_amount_is_rejected() {
        let mut m = model();
        m.invoice.lines[0].foreign_amount = Money::ZERO;
        let errs = FormatValidator.validate(&m);
        assert_eq!(errs[0].field, "invoice.lines[0].foreign_amount");
    }

    struct AlwaysFails;

    impl FieldValidator for AlwaysFails {
        fn name(&self) -> &str {
            "always-fails"
        }

        fn validate(&self, _: &DocumentModel) -> Vec<FieldError> {
            vec![FieldError::new("client.tax_id", "blocked")]
        }
    }

    #[test]
    fn chain_collects_from_every_validator() {
        let mut m = model();
        m.issuer.series = "x".into();
        let chain = ValidatorChain::standard().with(AlwaysFails);
        assert_eq!(chain.len(), 2);
        let err = chain.check(&m).unwrap_err();
        let fields: Vec<&str> = err.fields().collect();
        assert_eq!(fields, vec!["issuer.series", "client.tax_id"]);
    }
}
