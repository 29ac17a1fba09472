use x509_cert::{
    attr::AttributeTypeAndValue,
    der::{
        asn1::{Any, SetOfVec},
        oid::ObjectIdentifier,
        Tag,
    },
    name::{Name, RdnSequence, RelativeDistinguishedName},
};

use crate::error::{Error, Result};

const ORGANIZATION: ObjectIdentifier = ObjectIdentifier::new_unwrap("2.5.4.10");
const ORGANIZATIONAL_UNIT: ObjectIdentifier = ObjectIdentifier::new_unwrap("2.5.4.11");
const COMMON_NAME: ObjectIdentifier = ObjectIdentifier::new_unwrap("2.5.4.3");

/// Identity written into both the subject and the issuer of a self-signed certificate.
///
/// The values are free text; nothing checks them against any outside authority.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SubjectInfo {
    pub organization: Option<String>,
    pub organizational_unit: Option<String>,
    pub common_name: String,
}

impl SubjectInfo {
    pub fn new(common_name: impl Into<String>) -> Self {
        Self {
            organization: None,
            organizational_unit: None,
            common_name: common_name.into(),
        }
    }

    pub fn with_organization(mut self, organization: impl Into<String>) -> Self {
        self.organization = Some(organization.into());
        self
    }

    pub fn with_organizational_unit(mut self, unit: impl Into<String>) -> Self {
        self.organizational_unit = Some(unit.into());
        self
    }

    fn attributes(&self) -> [(ObjectIdentifier, &'static str, Option<&str>); 3] {
        [
            (ORGANIZATION, "organization", self.organization.as_deref()),
            (
                ORGANIZATIONAL_UNIT,
                "organizational unit",
                self.organizational_unit.as_deref(),
            ),
            (COMMON_NAME, "common name", Some(self.common_name.as_str())),
        ]
    }

    /// Builds the distinguished name, one attribute per RDN in O, OU, CN order.
    pub(crate) fn to_name(&self) -> Result<Name> {
        let mut rdns = Vec::with_capacity(3);
        for (oid, field, value) in self.attributes() {
            let Some(value) = value else { continue };
            if value.trim().is_empty() {
                return Err(Error::invalid(format!("Subject {field} must not be empty")));
            }
            let value = Any::new(Tag::Utf8String, value.as_bytes())
                .map_err(|e| Error::invalid(format!("Subject {field}: {e}")))?;
            let set = SetOfVec::try_from(vec![AttributeTypeAndValue { oid, value }])
                .map_err(|e| Error::invalid(format!("Subject {field}: {e}")))?;
            rdns.push(RelativeDistinguishedName(set));
        }
        Ok(RdnSequence(rdns))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_supplied_fields_only() {
        let name = SubjectInfo::new("test")
            .with_organization("Acme")
            .to_name()
            .unwrap();
        assert_eq!(name.0.len(), 2);
        // RFC 4514 rendering lists the last RDN first.
        assert_eq!(name.to_string(), "CN=test,O=Acme");
    }

    #[test]
    fn rejects_empty_common_name() {
        let err = SubjectInfo::new(" ").to_name().unwrap_err();
        assert!(matches!(err, Error::InvalidParameter(_)), "{err}");
    }

    #[test]
    fn rejects_empty_optional_field() {
        let err = SubjectInfo::new("test")
            .with_organizational_unit("")
            .to_name()
            .unwrap_err();
        assert!(matches!(err, Error::InvalidParameter(_)), "{err}");
    }
}
