//! Document header and the people/organizations named in it.

use serde::{Deserialize, Serialize};

use crate::model::Recorded;

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Identifier {
    pub system: Option<String>,
    pub value: Recorded<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Address {
    pub use_code: Option<String>,
    pub lines: Vec<String>,
    pub city: Option<String>,
    pub postal_code: Option<String>,
    pub state: Option<String>,
    pub country: Option<String>,
}

impl Address {
    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
            && self.city.is_none()
            && self.postal_code.is_none()
            && self.state.is_none()
            && self.country.is_none()
    }

    /// Single line rendering, parts separated by commas.
    pub fn display(&self) -> String {
        let mut parts: Vec<&str> = self.lines.iter().map(String::as_str).collect();
        let locality = [self.postal_code.as_deref(), self.city.as_deref()]
            .into_iter()
            .flatten()
            .collect::<Vec<_>>()
            .join(" ");
        if !locality.is_empty() {
            parts.push(&locality);
        }
        if let Some(state) = self.state.as_deref() {
            parts.push(state);
        }
        if let Some(country) = self.country.as_deref() {
            parts.push(country);
        }
        parts.join(", ")
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Telecom {
    /// `phone`, `email`, `fax`, `url` or `other`.
    pub system: String,
    pub value: String,
    pub use_code: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ContactInfo {
    pub addresses: Vec<Address>,
    pub telecoms: Vec<Telecom>,
}

impl ContactInfo {
    pub fn is_empty(&self) -> bool {
        self.addresses.is_empty() && self.telecoms.is_empty()
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct OrganizationRecord {
    pub name: Recorded<String>,
    pub identifiers: Vec<Identifier>,
    pub contact_info: ContactInfo,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PersonKind {
    #[default]
    Person,
    /// Authoring device or software system.
    System,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct PersonRecord {
    pub kind: PersonKind,
    pub name: Recorded<String>,
    pub role: Recorded<String>,
    pub identifiers: Vec<Identifier>,
    pub contact_info: ContactInfo,
    pub organization: Option<OrganizationRecord>,
    /// Authoring, signing or participation time, raw.
    pub time: Recorded<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct PatientDemographics {
    pub identifiers: Vec<Identifier>,
    pub name: Recorded<String>,
    pub birth_date: Recorded<String>,
    pub gender: Recorded<String>,
}

/// Header data of one document.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct AdministrativeRecord {
    pub document_id: Recorded<String>,
    pub title: Recorded<String>,
    pub effective_time: Recorded<String>,
    pub language: Recorded<String>,
    pub patient: PatientDemographics,
    pub patient_contact: ContactInfo,
    pub author: Recorded<PersonRecord>,
    pub custodian: Recorded<OrganizationRecord>,
    pub legal_authenticator: Recorded<PersonRecord>,
    pub participants: Vec<PersonRecord>,
    pub service_event_performers: Vec<PersonRecord>,
    /// Practitioners the document's authors legitimately reference.
    #[serde(default)]
    pub care_team: Vec<PersonRecord>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn address_display_skips_missing_parts() {
        let address = Address {
            lines: vec!["1 Rue de la Paix".into()],
            city: Some("Paris".into()),
            postal_code: Some("75002".into()),
            country: Some("FR".into()),
            ..Address::default()
        };
        assert_eq!(address.display(), "1 Rue de la Paix, 75002 Paris, FR");
    }
}
