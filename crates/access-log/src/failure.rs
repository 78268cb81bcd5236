use crate::record::lenient_text;
use serde::Deserialize;
use std::fmt;

/// A failed OSPool transfer, decoded from the transfer index `_source`.
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(default)]
pub struct TransferFailure {
    #[serde(rename = "Endpoint", deserialize_with = "lenient_text")]
    pub endpoint: Option<String>,
    #[serde(rename = "TransferType", deserialize_with = "lenient_text")]
    pub transfer_type: Option<String>,
    #[serde(rename = "TransferProtocol", deserialize_with = "lenient_text")]
    pub protocol: Option<String>,
    #[serde(rename = "TransferError", deserialize_with = "lenient_text")]
    pub error: Option<String>,
}

struct OrNone<'a>(&'a Option<String>);

impl fmt::Display for OrNone<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.0.as_deref().unwrap_or("None"))
    }
}

impl fmt::Display for TransferFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} [{}] [{}] {}",
            OrNone(&self.endpoint),
            OrNone(&self.transfer_type),
            OrNone(&self.protocol),
            OrNone(&self.error),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_failure_line() {
        let failure: TransferFailure = serde_json::from_value(json!({
            "Endpoint": "osdf-cache.example.org:8443",
            "TransferType": "download",
            "TransferProtocol": "osdf",
            "TransferError": "HTTP 404"
        }))
        .unwrap();

        assert_eq!(
            failure.to_string(),
            "osdf-cache.example.org:8443 [download] [osdf] HTTP 404"
        );
    }

    #[test]
    fn test_missing_fields_print_none() {
        let failure: TransferFailure =
            serde_json::from_value(json!({ "TransferType": "upload", "TransferError": null }))
                .unwrap();
        assert_eq!(failure.to_string(), "None [upload] [None] None");
    }
}
