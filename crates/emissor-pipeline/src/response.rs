use serde_json::Value;

use emissor_types::DocumentId;

/// A success-status response that does not honour the submission contract.
///
/// Never retried: the service answered, so it may already have issued the invoice.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[error("response contract violated at `{field}`: {reason}")]
pub struct ProtocolContractError {
    pub field: &'static str,
    pub reason: String,
}

impl ProtocolContractError {
    fn new(field: &'static str, reason: impl Into<String>) -> Self {
        Self {
            field,
            reason: reason.into(),
        }
    }

    pub fn hint(&self) -> &'static str {
        "look the document up on the national portal before emitting again; the service may have issued it"
    }
}

/// Identifiers extracted from an accepted submission.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AcceptedResponse {
    pub access_key: String,
    pub document_number: String,
    pub status_code: String,
    pub message: Option<String>,
    /// Issued NFS-e as sent by the service, still gzip+base64 encoded.
    pub issued_document: Option<String>,
}

/// Parse a 2xx body. Every required field must be present and non-blank.
pub fn parse_submission_response(
    body: &[u8],
    expected: &DocumentId,
    accepted_status_codes: &[String],
) -> Result<AcceptedResponse, ProtocolContractError> {
    let value: Value = serde_json::from_slice(body)
        .map_err(|e| ProtocolContractError::new("body", format!("not valid JSON: {e}")))?;
    let object = value
        .as_object()
        .ok_or_else(|| ProtocolContractError::new("body", "expected a JSON object"))?;

    let text = |field: &'static str| -> Result<Option<String>, ProtocolContractError> {
        match object.get(field) {
            None | Some(Value::Null) => Ok(None),
            Some(Value::String(s)) => Ok(Some(s.trim().to_string())),
            Some(Value::Number(n)) => Ok(Some(n.to_string())),
            Some(other) => Err(ProtocolContractError::new(
                field,
                format!("expected a string, got {other}"),
            )),
        }
    };
    let required = |field: &'static str| -> Result<String, ProtocolContractError> {
        match text(field)? {
            Some(s) if !s.is_empty() => Ok(s),
            Some(_) => Err(ProtocolContractError::new(field, "is blank")),
            None => Err(ProtocolContractError::new(field, "is missing")),
        }
    };

    let access_key = required("chNFSe")?;
    let document_number = required("nNFSe")?;
    let status_code = required("cStat")?;
    if !accepted_status_codes.iter().any(|c| c == &status_code) {
        return Err(ProtocolContractError::new(
            "cStat",
            format!("unrecognized status code {status_code}"),
        ));
    }
    if let Some(echoed) = text("idDps")? {
        if echoed != expected.as_str() {
            return Err(ProtocolContractError::new(
                "idDps",
                format!("echoes {echoed}, expected {expected}"),
            ));
        }
    }
    let message = text("xMotivo")?.filter(|m| !m.is_empty());
    let issued_document = text(crate::wire::ISSUED_FIELD)?.filter(|d| !d.is_empty());

    Ok(AcceptedResponse {
        access_key,
        document_number,
        status_code,
        message,
        issued_document,
    })
}

/// Short human-readable reason from an error body, if it carries one.
pub(crate) fn rejection_reason(body: &str) -> String {
    const LIMIT: usize = 500;
    let from_json = serde_json::from_str::<Value>(body).ok().and_then(|v| {
        ["xMotivo", "mensagem", "message"]
            .iter()
            .find_map(|k| v.get(k).and_then(Value::as_str).map(str::to_string))
    });
    let reason = from_json.unwrap_or_else(|| body.trim().to_string());
    if reason.chars().count() > LIMIT {
        reason.chars().take(LIMIT).collect::<String>() + "…"
    } else {
        reason
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use emissor_types::{IssuerId, SequenceNumber};

    fn id() -> DocumentId {
        let issuer = IssuerId::new("12345678000199").unwrap();
        DocumentId::derive("4205407", &issuer, "900", SequenceNumber::new(3)).unwrap()
    }

    fn accepted() -> Vec<String> {
        vec!["100".to_string()]
    }

    fn parse(body: &str) -> Result<AcceptedResponse, ProtocolContractError> {
        parse_submission_response(body.as_bytes(), &id(), &accepted())
    }

    #[test]
    fn accepts_complete_response() {
        let body = format!(
            r#"{{"chNFSe":"4205407221234567800019900000000000000326100000001","nNFSe":17,"cStat":"100","idDps":"{}","xMotivo":"Autorizado"}}"#,
            id()
        );
        let r = parse(&body).unwrap();
        assert_eq!(r.document_number, "17");
        assert_eq!(r.status_code, "100");
        assert_eq!(r.message.as_deref(), Some("Autorizado"));
        assert_eq!(r.issued_document, None);
    }

    #[test]
    fn carries_issued_document_through() {
        let r = parse(r#"{"chNFSe":"k","nNFSe":"1","cStat":"100","nfseXmlGZipB64":"H4sIAAAA"}"#).unwrap();
        assert_eq!(r.issued_document.as_deref(), Some("H4sIAAAA"));
    }

    #[test]
    fn blank_access_key_breaks_contract() {
        let err = parse(r#"{"chNFSe":"  ","nNFSe":"1","cStat":"100"}"#).unwrap_err();
        assert_eq!(err.field, "chNFSe");
        assert_eq!(err.reason, "is blank");
    }

    #[test]
    fn missing_fields_break_contract() {
        assert_eq!(parse(r#"{"chNFSe":"k","cStat":"100"}"#).unwrap_err().field, "nNFSe");
        assert_eq!(parse(r#"{"chNFSe":"k","nNFSe":"1"}"#).unwrap_err().field, "cStat");
    }

    #[test]
    fn unrecognized_status_breaks_contract() {
        let err = parse(r#"{"chNFSe":"k","nNFSe":"1","cStat":"999"}"#).unwrap_err();
        assert_eq!(err.field, "cStat");
    }

    #[test]
    fn mismatched_echo_breaks_contract() {
        let err = parse(r#"{"chNFSe":"k","nNFSe":"1","cStat":"100","idDps":"DPS000"}"#).unwrap_err();
        assert_eq!(err.field, "idDps");
    }

    #[test]
    fn unparseable_body_breaks_contract() {
        assert_eq!(parse("<html>gateway</html>").unwrap_err().field, "body");
        assert_eq!(parse("[1,2]").unwrap_err().field, "body");
        assert_eq!(parse(r#"{"chNFSe":["k"],"nNFSe":"1","cStat":"100"}"#).unwrap_err().field, "chNFSe");
    }

    #[test]
    fn rejection_reason_prefers_message_fields() {
        assert_eq!(rejection_reason(r#"{"xMotivo":"CNPJ invalido"}"#), "CNPJ invalido");
        assert_eq!(rejection_reason("  plain text  "), "plain text");
        assert_eq!(rejection_reason(&"x".repeat(600)).chars().count(), 501);
    }
}
