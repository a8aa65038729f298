//! Qualification Engine
//!
//! Classifies a normalized `Contact` into a lead type and template set.
//! `QualificationEngine::qualify` is pure and deterministic; the
//! `QualificationService` adds a lead cache in front of it.
//!
//! Classification (later rules override earlier ones):
//! 1. B2B by default
//! 2. NGO if an NGO keyword matches
//! 3. Student if a student keyword matches
//! 4. A `.edu` email domain always forces Student with the top score

use crate::application::cache::{CacheConfig, TtlCache};
use crate::domain::{Contact, ContactId, LeadType, QualificationResult, TemplateSet};
use crate::port::TimeProvider;
use std::sync::Arc;
use tracing::debug;

const STUDENT_KEYWORDS: &[&str] = &[
    "school",
    "university",
    "college",
    "academy",
    "education",
    "student",
    "teacher",
    "professor",
    "educator",
];

const NGO_KEYWORDS: &[&str] = &[
    "ngo",
    "nonprofit",
    "non-profit",
    "foundation",
    "charity",
    "organization",
    "association",
    "society",
];

const B2B_KEYWORDS: &[&str] = &[
    "corp",
    "corporation",
    "inc",
    "llc",
    "ltd",
    "company",
    "business",
    "enterprise",
    "tech",
    "software",
    "solutions",
];

const SCORE_EDU_DOMAIN: u32 = 90;
const SCORE_STUDENT: u32 = 85;
const SCORE_NGO: u32 = 80;
const SCORE_B2B: u32 = 75;

/// Qualification options
#[derive(Debug, Clone, Default)]
pub struct QualificationConfig {
    /// Reject contacts without a well-formed email (classification still runs)
    pub reject_on_missing_email: bool,
}

/// Keyword-based lead classifier
#[derive(Debug, Clone, Default)]
pub struct QualificationEngine {
    config: QualificationConfig,
}

fn matches_any(fields: &[&str], keywords: &[&str]) -> bool {
    keywords
        .iter()
        .any(|kw| fields.iter().any(|field| field.contains(kw)))
}

fn is_edu_domain(contact: &Contact) -> bool {
    contact
        .email_domain()
        .map(|d| d.ends_with(".edu") || d.contains(".edu."))
        .unwrap_or(false)
}

impl QualificationEngine {
    pub fn new(config: QualificationConfig) -> Self {
        Self { config }
    }

    /// Classify a contact; never fails
    pub fn qualify(&self, contact: &Contact) -> QualificationResult {
        let fields = [
            contact.company.as_str(),
            contact.title.as_str(),
            contact.website.as_str(),
            contact.email.as_str(),
        ];
        let student = matches_any(&fields, STUDENT_KEYWORDS);
        let ngo = matches_any(&fields, NGO_KEYWORDS);
        let b2b = matches_any(&fields, B2B_KEYWORDS);

        let mut lead_type = LeadType::B2b;
        let mut score = 0;
        let mut indicators = Vec::new();

        if student {
            lead_type = LeadType::Student;
            score = SCORE_STUDENT;
            indicators.push("Student/Education detected".to_string());
        } else if ngo {
            lead_type = LeadType::Ngo;
            score = SCORE_NGO;
            indicators.push("NGO/Nonprofit detected".to_string());
        } else if b2b {
            score = SCORE_B2B;
            indicators.push("B2B company detected".to_string());
        }

        if is_edu_domain(contact) {
            lead_type = LeadType::Student;
            score = SCORE_EDU_DOMAIN;
            indicators.push("Educational email domain (.edu)".to_string());
        }

        let rejection = (self.config.reject_on_missing_email && !contact.has_valid_email())
            .then(|| "missing or malformed email".to_string());

        debug!(
            contact_id = %contact.id,
            lead_type = %lead_type,
            score = score,
            qualified = rejection.is_none(),
            "Contact qualified"
        );

        QualificationResult {
            lead_type,
            template_set: TemplateSet::for_lead_type(lead_type),
            score,
            indicators,
            qualified: rejection.is_none(),
            rejection,
        }
    }

    /// Fixed step count of a template set (unknown sets: 5)
    pub fn sequence_steps(template_set: &TemplateSet) -> u32 {
        template_set.step_count()
    }
}

/// Engine plus a lead cache keyed by contact id
pub struct QualificationService {
    engine: QualificationEngine,
    cache: TtlCache<ContactId, QualificationResult>,
}

impl QualificationService {
    pub fn new(
        engine: QualificationEngine,
        cache_config: CacheConfig,
        time_provider: Arc<dyn TimeProvider>,
    ) -> Self {
        Self {
            engine,
            cache: TtlCache::new(cache_config, time_provider),
        }
    }

    /// Qualify with the default lead cache (10 minutes)
    pub fn with_lead_cache(engine: QualificationEngine, time_provider: Arc<dyn TimeProvider>) -> Self {
        Self::new(engine, CacheConfig::leads(), time_provider)
    }

    pub fn qualify(&self, contact: &Contact) -> QualificationResult {
        self.cache
            .get_or_insert_with(contact.id.clone(), || self.engine.qualify(contact))
    }

    /// Drop a cached result (e.g. after the contact record changed)
    pub fn invalidate(&self, contact_id: &str) -> bool {
        self.cache.delete(&contact_id.to_string())
    }

    pub fn cache(&self) -> &TtlCache<ContactId, QualificationResult> {
        &self.cache
    }
}
