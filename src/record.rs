//! Record builder: CSV row -> (network, attribute record)
//!
//! Zero ASNs and empty organization names mean "no data" upstream, so they
//! are omitted from the record instead of being stored as `0` / `""`.

use crate::data_section::DataValue;
use crate::error::RecordError;
use crate::network::Network;
use csv::StringRecord;
use serde::Serialize;
use std::collections::BTreeMap;

/// Map key for the autonomous system number
pub const ASN_KEY: &str = "autonomous_system_number";
/// Map key for the autonomous system organization
pub const ORG_KEY: &str = "autonomous_system_organization";

/// Number of columns in an ASN blocks CSV row
pub const ROW_FIELDS: usize = 3;

/// Attributes stored for one network
///
/// Both keys are optional and independent. An empty record is valid and is
/// still inserted.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct AttributeRecord {
    #[serde(skip_serializing_if = "Option::is_none")]
    autonomous_system_number: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    autonomous_system_organization: Option<String>,
}

impl AttributeRecord {
    /// Create an empty record
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the ASN
    pub fn with_asn(mut self, asn: i64) -> Self {
        self.autonomous_system_number = Some(asn);
        self
    }

    /// Set the organization name
    pub fn with_organization(mut self, org: impl Into<String>) -> Self {
        self.autonomous_system_organization = Some(org.into());
        self
    }

    /// The ASN as parsed from the row, if non-zero
    ///
    /// Kept signed: the row parser accepts any base-10 integer and range
    /// checking happens when the record is encoded.
    pub fn autonomous_system_number(&self) -> Option<i64> {
        self.autonomous_system_number
    }

    /// The organization name, if non-empty
    pub fn autonomous_system_organization(&self) -> Option<&str> {
        self.autonomous_system_organization.as_deref()
    }

    /// Number of keys present (0..=2)
    pub fn len(&self) -> usize {
        self.autonomous_system_number.is_some() as usize
            + self.autonomous_system_organization.is_some() as usize
    }

    /// True if neither key is present
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Encode as an MMDB map
    ///
    /// Fails if the ASN does not fit in an unsigned 32-bit integer.
    pub fn to_data_value(&self) -> Result<DataValue, String> {
        let mut map = BTreeMap::new();
        if let Some(asn) = self.autonomous_system_number {
            let asn = u32::try_from(asn).map_err(|_| {
                format!("{} {} is outside the unsigned 32-bit range", ASN_KEY, asn)
            })?;
            map.insert(ASN_KEY.to_string(), DataValue::Uint32(asn));
        }
        if let Some(org) = &self.autonomous_system_organization {
            map.insert(ORG_KEY.to_string(), DataValue::String(org.clone()));
        }
        Ok(DataValue::Map(map))
    }
}

/// Turn one CSV row into a network and its attribute record
///
/// The row must have exactly three fields: CIDR network, base-10 ASN and
/// organization name.
pub fn build_record(row: &StringRecord) -> Result<(Network, AttributeRecord), RecordError> {
    if row.len() != ROW_FIELDS {
        return Err(RecordError::Schema {
            fields: row.iter().map(str::to_string).collect(),
        });
    }

    let network_text = &row[0];
    let network: Network = network_text
        .parse()
        .map_err(|e: crate::network::NetworkParseError| RecordError::NetworkParse {
            input: network_text.to_string(),
            reason: e.to_string(),
        })?;

    let asn_text = &row[1];
    let asn = asn_text
        .parse::<i64>()
        .map_err(|source| RecordError::NumericParse {
            input: asn_text.to_string(),
            source,
        })?;

    let mut record = AttributeRecord::new();
    if asn != 0 {
        record = record.with_asn(asn);
    }

    let org = &row[2];
    if !org.is_empty() {
        record = record.with_organization(org);
    }

    Ok((network, record))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(fields: &[&str]) -> StringRecord {
        StringRecord::from(fields.to_vec())
    }

    #[test]
    fn test_full_record() {
        let (network, record) = build_record(&row(&["1.2.3.0/24", "1234", "Example Org"])).unwrap();
        assert_eq!(network.to_string(), "1.2.3.0/24");
        assert_eq!(record.autonomous_system_number(), Some(1234));
        assert_eq!(record.autonomous_system_organization(), Some("Example Org"));
        assert_eq!(record.len(), 2);
    }

    #[test]
    fn test_zero_asn_and_empty_org_give_empty_record() {
        let (network, record) = build_record(&row(&["1.2.4.0/24", "0", ""])).unwrap();
        assert_eq!(network.to_string(), "1.2.4.0/24");
        assert!(record.is_empty());
        assert_eq!(record.to_data_value().unwrap(), DataValue::Map(BTreeMap::new()));
    }

    #[test]
    fn test_fields_are_independent() {
        let (_, record) = build_record(&row(&["10.0.0.0/8", "0", "No Number Inc"])).unwrap();
        assert_eq!(record.autonomous_system_number(), None);
        assert_eq!(record.autonomous_system_organization(), Some("No Number Inc"));

        let (_, record) = build_record(&row(&["10.0.0.0/8", "64512", ""])).unwrap();
        assert_eq!(record.autonomous_system_number(), Some(64512));
        assert_eq!(record.autonomous_system_organization(), None);
    }

    #[test]
    fn test_organization_kept_verbatim() {
        let (_, record) = build_record(&row(&["10.0.0.0/8", "1", "  padded, \"quoted\"  "])).unwrap();
        assert_eq!(
            record.autonomous_system_organization(),
            Some("  padded, \"quoted\"  ")
        );

        // Whitespace is data, not emptiness
        let (_, record) = build_record(&row(&["10.0.0.0/8", "1", " "])).unwrap();
        assert_eq!(record.autonomous_system_organization(), Some(" "));
    }

    #[test]
    fn test_wrong_field_count() {
        for fields in [
            vec![],
            vec!["1.2.3.0/24"],
            vec!["1.2.3.0/24", "1"],
            vec!["1.2.3.0/24", "1", "Org", "extra"],
        ] {
            let err = build_record(&row(&fields)).unwrap_err();
            assert!(matches!(err, RecordError::Schema { .. }), "{:?}", fields);
        }
    }

    #[test]
    fn test_bad_network() {
        let err = build_record(&row(&["1.2.3.0/99", "1", "Org"])).unwrap_err();
        assert!(matches!(err, RecordError::NetworkParse { ref input, .. } if input == "1.2.3.0/99"));
    }

    #[test]
    fn test_bad_asn() {
        for asn in ["", "abc", "12x", "1.5", " 12", "99999999999999999999"] {
            let err = build_record(&row(&["1.2.3.0/24", asn, "Org"])).unwrap_err();
            assert!(
                matches!(err, RecordError::NumericParse { .. }),
                "{:?} should fail to parse",
                asn
            );
        }
    }

    #[test]
    fn test_negative_asn_parses_but_does_not_encode() {
        let (_, record) = build_record(&row(&["1.2.3.0/24", "-5", ""])).unwrap();
        assert_eq!(record.autonomous_system_number(), Some(-5));
        assert!(record.to_data_value().is_err());

        let (_, record) = build_record(&row(&["1.2.3.0/24", "4294967296", ""])).unwrap();
        assert!(record.to_data_value().is_err());

        let (_, record) = build_record(&row(&["1.2.3.0/24", "+4294967295", ""])).unwrap();
        assert_eq!(
            record.to_data_value().unwrap(),
            DataValue::Map(BTreeMap::from([(
                ASN_KEY.to_string(),
                DataValue::Uint32(u32::MAX)
            )]))
        );
    }

    #[test]
    fn test_network_checked_before_asn() {
        let err = build_record(&row(&["bogus", "bogus", ""])).unwrap_err();
        assert!(matches!(err, RecordError::NetworkParse { .. }));
    }
}
