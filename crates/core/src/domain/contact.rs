// Contact Domain Model
//
// RawContact is what arrives from CRM exports and file ingestion: fields may
// sit at the top level or under `properties`. It is normalized once, at the
// ingestion boundary, into the canonical Contact the rest of the core uses.

use crate::domain::error::{DomainError, Result};
use serde::{Deserialize, Serialize};

/// Contact ID (CRM object id or ingestion-assigned id)
pub type ContactId = String;

/// Nested CRM properties (HubSpot naming)
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContactProperties {
    #[serde(default)]
    pub company: Option<String>,
    #[serde(default)]
    pub jobtitle: Option<String>,
    #[serde(default)]
    pub website: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub hs_object_id: Option<String>,
}

/// Contact as received from an upstream source
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawContact {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub company: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub website: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub properties: Option<ContactProperties>,
}

/// Canonical contact shape seen by the qualification engine and scheduler
///
/// All text fields are trimmed and lowercase; absent fields are empty strings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Contact {
    pub id: ContactId,
    pub company: String,
    pub title: String,
    pub website: String,
    pub email: String,
}

fn pick(top: &Option<String>, nested: Option<&Option<String>>) -> String {
    top.as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .or_else(|| {
            nested
                .and_then(|n| n.as_deref())
                .map(str::trim)
                .filter(|s| !s.is_empty())
        })
        .unwrap_or_default()
        .to_lowercase()
}

impl RawContact {
    /// Normalize into the canonical Contact
    ///
    /// Top-level fields win over `properties.*`. The id falls back to
    /// `properties.hs_object_id`, then to the email address.
    ///
    /// # Errors
    /// `DomainError::ValidationError` if no id can be derived at all.
    pub fn normalize(&self) -> Result<Contact> {
        let props = self.properties.as_ref();

        let company = pick(&self.company, props.map(|p| &p.company));
        let title = pick(&self.title, props.map(|p| &p.jobtitle));
        let website = pick(&self.website, props.map(|p| &p.website));
        let email = pick(&self.email, props.map(|p| &p.email));

        let id = self
            .id
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .or_else(|| {
                props
                    .and_then(|p| p.hs_object_id.as_deref())
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(str::to_string)
            })
            .or_else(|| (!email.is_empty()).then(|| email.clone()))
            .ok_or_else(|| {
                DomainError::ValidationError("contact has neither an id nor an email".to_string())
            })?;

        Ok(Contact {
            id,
            company,
            title,
            website,
            email,
        })
    }
}

/// Parse a JSON array of raw contacts (flat or with `properties`)
///
/// # Errors
/// `AppError::Serialization` if the text is not such an array.
pub fn parse_contacts(json: &str) -> crate::error::Result<Vec<RawContact>> {
    Ok(serde_json::from_str(json)?)
}

impl Contact {
    /// Email domain (part after the last '@'), if any
    pub fn email_domain(&self) -> Option<&str> {
        self.email.rsplit_once('@').map(|(_, domain)| domain)
    }

    /// Whether the email address is present and well-formed
    pub fn has_valid_email(&self) -> bool {
        is_valid_email(&self.email)
    }
}

/// Structural email check: one '@', non-empty local part, dotted domain,
/// no whitespace, no "..", no leading or trailing dot.
pub fn is_valid_email(email: &str) -> bool {
    if email.is_empty() || email.chars().any(char::is_whitespace) {
        return false;
    }
    if email.contains("..") || email.starts_with('.') || email.ends_with('.') {
        return false;
    }
    let mut parts = email.split('@');
    let (Some(local), Some(domain), None) = (parts.next(), parts.next(), parts.next()) else {
        return false;
    };
    if local.is_empty() {
        return false;
    }
    match domain.rsplit_once('.') {
        Some((host, tld)) => !host.is_empty() && !tld.is_empty(),
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_prefers_top_level_fields() {
        let raw = RawContact {
            id: Some("c-1".to_string()),
            company: Some("  Acme Corp ".to_string()),
            properties: Some(ContactProperties {
                company: Some("Other Inc".to_string()),
                jobtitle: Some("CTO".to_string()),
                ..Default::default()
            }),
            ..Default::default()
        };

        let contact = raw.normalize().unwrap();
        assert_eq!(contact.id, "c-1");
        assert_eq!(contact.company, "acme corp");
        assert_eq!(contact.title, "cto");
        assert_eq!(contact.website, "");
    }

    #[test]
    fn test_normalize_falls_back_to_properties() {
        let raw: RawContact = serde_json::from_value(serde_json::json!({
            "properties": {
                "hs_object_id": "901",
                "email": "Jane@Example.ORG",
                "website": "example.org"
            }
        }))
        .unwrap();

        let contact = raw.normalize().unwrap();
        assert_eq!(contact.id, "901");
        assert_eq!(contact.email, "jane@example.org");
        assert_eq!(contact.website, "example.org");
        assert_eq!(contact.email_domain(), Some("example.org"));
    }

    #[test]
    fn test_parse_contacts_batch() {
        let raw = parse_contacts(
            r#"[{"id": "1", "email": "a@b.com"}, {"properties": {"hs_object_id": "2"}}]"#,
        )
        .unwrap();
        assert_eq!(raw.len(), 2);
        assert_eq!(raw[1].normalize().unwrap().id, "2");

        let err = parse_contacts(r#"{"id": "1"}"#).unwrap_err();
        assert!(matches!(err, crate::error::AppError::Serialization(_)));
    }

    #[test]
    fn test_normalize_uses_email_as_id_and_rejects_anonymous() {
        let raw = RawContact {
            email: Some("a@b.com".to_string()),
            ..Default::default()
        };
        assert_eq!(raw.normalize().unwrap().id, "a@b.com");

        assert!(RawContact::default().normalize().is_err());
    }

    #[test]
    fn test_is_valid_email() {
        assert!(is_valid_email("a@school.edu"));
        assert!(is_valid_email("first.last@sub.example.co.uk"));
        assert!(!is_valid_email(""));
        assert!(!is_valid_email("no-at-sign.com"));
        assert!(!is_valid_email("@example.com"));
        assert!(!is_valid_email("a@@example.com"));
        assert!(!is_valid_email("a@localhost"));
        assert!(!is_valid_email("a..b@example.com"));
        assert!(!is_valid_email("a b@example.com"));
    }
}
