use std::collections::BTreeMap;

use chrono::{DateTime, FixedOffset, NaiveDate};
use serde::{Deserialize, Serialize};

use crate::identity::{ClientId, IssuerId};
use crate::money::Money;

/// Service classification emitted with every document.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceInfo {
    /// National taxation code (`cTribNac`).
    pub national_tax_code: String,
    pub description: String,
    /// Nomenclatura Brasileira de Serviços code (`cNBS`).
    pub nbs_code: String,
    /// Currency of the foreign amount (`tpMoeda`).
    pub currency_code: String,
    /// Country where the service result is realized (`cPaisResult`).
    pub result_country: String,
}

impl Default for ServiceInfo {
    fn default() -> Self {
        Self {
            national_tax_code: "010101".into(),
            description: "Desenvolvimento de Software".into(),
            nbs_code: "115022000".into(),
            currency_code: "220".into(),
            result_country: "US".into(),
        }
    }
}

/// The company issuing documents (`prest`).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Issuer {
    pub tax_id: IssuerId,
    pub legal_name: String,
    /// Seven-digit municipality code where the issuer is registered.
    pub municipality_code: String,
    pub phone: String,
    pub email: String,
    #[serde(default = "defaults::simple_national")]
    pub simple_national_option: String,
    #[serde(default = "defaults::special_regime")]
    pub special_tax_regime: String,
    #[serde(default = "defaults::series")]
    pub series: String,
    #[serde(default = "defaults::app_version")]
    pub app_version: String,
    #[serde(default)]
    pub service: ServiceInfo,
}

/// Address outside the country (`endExt` plus street fields).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForeignAddress {
    #[serde(default = "defaults::country")]
    pub country: String,
    pub postal_code: String,
    pub city: String,
    pub state: String,
    pub street: String,
    pub number: String,
    #[serde(default)]
    pub complement: Option<String>,
    #[serde(default = "defaults::district")]
    pub district: String,
}

/// The service taker (`toma`).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Client {
    pub id: ClientId,
    /// Foreign tax identification number (`NIF`).
    pub tax_id: String,
    pub name: String,
    pub address: ForeignAddress,
    #[serde(default = "defaults::comex_mechanism")]
    pub provider_support_mechanism: String,
    #[serde(default = "defaults::comex_mechanism")]
    pub taker_support_mechanism: String,
}

/// Optional intermediary party (`interm`).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Intermediary {
    pub tax_id: String,
    pub name: String,
    pub address: ForeignAddress,
}

/// A configured client standing in as intermediary.
impl From<&Client> for Intermediary {
    fn from(client: &Client) -> Self {
        Self {
            tax_id: client.tax_id.clone(),
            name: client.name.clone(),
            address: client.address.clone(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvoiceLine {
    pub description: String,
    /// Amount in local currency.
    pub amount: Money,
    /// Amount in the service's foreign currency.
    pub foreign_amount: Money,
}

/// Per-invoice data supplied by the user.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Invoice {
    /// Competence date (`dCompet`).
    pub competence: NaiveDate,
    /// Emission timestamp (`dhEmi`), fixed by the caller so builds are reproducible.
    pub issued_at: DateTime<FixedOffset>,
    pub lines: Vec<InvoiceLine>,
    /// Optional per-invoice field overrides, remembered per client for prefill.
    #[serde(default)]
    pub overrides: BTreeMap<String, String>,
}

impl Invoice {
    /// Sum of line amounts as `(local, foreign)`; `None` on overflow.
    pub fn totals(&self) -> Option<(Money, Money)> {
        self.lines
            .iter()
            .try_fold((Money::ZERO, Money::ZERO), |(local, foreign), line| {
                Some((
                    local.checked_add(line.amount)?,
                    foreign.checked_add(line.foreign_amount)?,
                ))
            })
    }
}

/// Everything the builder needs to produce a document, minus the sequence number.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentModel {
    pub issuer: Issuer,
    pub client: Client,
    #[serde(default)]
    pub intermediary: Option<Intermediary>,
    pub invoice: Invoice,
}

mod defaults {
    pub fn simple_national() -> String {
        "1".into()
    }
    pub fn special_regime() -> String {
        "0".into()
    }
    pub fn series() -> String {
        "900".into()
    }
    pub fn app_version() -> String {
        concat!("emissor_", env!("CARGO_PKG_VERSION")).into()
    }
    pub fn country() -> String {
        "US".into()
    }
    pub fn district() -> String {
        "n/a".into()
    }
    pub fn comex_mechanism() -> String {
        "02".into()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn line(amount: i64, foreign: i64) -> InvoiceLine {
        InvoiceLine {
            description: "consulting".into(),
            amount: Money::from_cents(amount),
            foreign_amount: Money::from_cents(foreign),
        }
    }

    fn invoice(lines: Vec<InvoiceLine>) -> Invoice {
        Invoice {
            competence: NaiveDate::from_ymd_opt(2026, 9, 30).unwrap(),
            issued_at: DateTime::parse_from_rfc3339("2026-10-01T10:00:00-03:00").unwrap(),
            lines,
            overrides: BTreeMap::new(),
        }
    }

    #[test]
    fn totals_sum_lines() {
        let inv = invoice(vec![line(100_00, 20_00), line(50_50, 10_10)]);
        let (local, foreign) = inv.totals().unwrap();
        assert_eq!(local, Money::from_cents(150_50));
        assert_eq!(foreign, Money::from_cents(30_10));
    }

    #[test]
    fn totals_detect_overflow() {
        let inv = invoice(vec![line(i64::MAX, 0), line(1, 0)]);
        assert!(inv.totals().is_none());
    }

    #[test]
    fn issuer_defaults_apply_on_deserialize() {
        let json = r#"{
            "tax_id": "12345678000199",
            "legal_name": "Acme Software LTDA",
            "municipality_code": "4205407",
            "phone": "4830000000",
            "email": "fiscal@acme.example"
        }"#;
        let issuer: Issuer = serde_json::from_str(json).unwrap();
        assert_eq!(issuer.series, "900");
        assert_eq!(issuer.service, ServiceInfo::default());
    }
}
