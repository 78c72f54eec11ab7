//! Back-office listing, statistics and detail aggregation.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::domain::{
    DependentId, DependentRecord, OriginTag, ProposalId, ProposalRecord, ProposalStatus,
};
use super::questionnaire::{QuestionnaireResponse, Respondent};
use super::validation::ValidationError;

/// Query string accepted by the listing endpoints.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ListQuery {
    pub q: Option<String>,
    pub status: Option<String>,
    pub origin: Option<String>,
    pub page: Option<usize>,
}

/// Free-text, status and origin filters. `None` means "all".
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProposalFilter {
    pub text: String,
    pub status: Option<ProposalStatus>,
    pub origin: Option<OriginTag>,
}

impl ProposalFilter {
    /// Parses query values; `todos`/`todas` and blanks select everything.
    pub fn from_query(query: &ListQuery) -> Result<Self, ValidationError> {
        let status = match query.status.as_deref().map(str::trim) {
            None | Some("") | Some("todos") => None,
            Some(raw) => Some(
                ProposalStatus::from_label(raw)
                    .ok_or_else(|| ValidationError::single("status", "Status desconhecido"))?,
            ),
        };
        let origin = match query.origin.as_deref().map(str::trim) {
            None | Some("") | Some("todas") | Some("todos") => None,
            Some(raw) => Some(
                OriginTag::from_label(raw)
                    .ok_or_else(|| ValidationError::single("origin", "Origem desconhecida"))?,
            ),
        };

        Ok(Self {
            text: query.q.clone().unwrap_or_default(),
            status,
            origin,
        })
    }

    /// Case-insensitive substring match on the display name or email, plus exact status
    /// and origin matches.
    pub fn matches(&self, record: &ProposalRecord) -> bool {
        let needle = self.text.trim().to_lowercase();
        let text_matches = needle.is_empty()
            || record.display_name().to_lowercase().contains(&needle)
            || record.display_email().to_lowercase().contains(&needle);

        text_matches
            && self.status.map_or(true, |status| record.status == status)
            && self.origin.map_or(true, |origin| record.origin.tag() == origin)
    }
}

/// Listing state: any filter change resets the page to 1.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdminListState {
    filter: ProposalFilter,
    page: usize,
    page_size: usize,
}

impl AdminListState {
    pub fn new(page_size: usize) -> Self {
        Self {
            filter: ProposalFilter::default(),
            page: 1,
            page_size: page_size.max(1),
        }
    }

    pub fn filter(&self) -> &ProposalFilter {
        &self.filter
    }

    pub fn page(&self) -> usize {
        self.page
    }

    pub fn set_text(&mut self, text: impl Into<String>) {
        self.filter.text = text.into();
        self.page = 1;
    }

    pub fn set_status(&mut self, status: Option<ProposalStatus>) {
        self.filter.status = status;
        self.page = 1;
    }

    pub fn set_origin(&mut self, origin: Option<OriginTag>) {
        self.filter.origin = origin;
        self.page = 1;
    }

    pub fn set_page(&mut self, page: usize) {
        self.page = page.max(1);
    }

    pub fn apply(&self, records: &[ProposalRecord]) -> ProposalPage {
        let matching: Vec<&ProposalRecord> = records
            .iter()
            .filter(|record| self.filter.matches(record))
            .collect();
        paginate(&matching, self.page, self.page_size)
    }
}

pub fn page_count(total_items: usize, page_size: usize) -> usize {
    total_items.div_ceil(page_size.max(1))
}

/// Slices one page. Out-of-range pages are clamped to the last page.
pub fn paginate(records: &[&ProposalRecord], page: usize, page_size: usize) -> ProposalPage {
    let page_size = page_size.max(1);
    let total_pages = page_count(records.len(), page_size);
    let page = page.clamp(1, total_pages.max(1));
    let start = (page - 1) * page_size;

    let items = records
        .iter()
        .skip(start)
        .take(page_size)
        .map(|record| ProposalSummary::from_record(record))
        .collect();

    ProposalPage {
        items,
        page,
        page_size,
        total_pages,
        total_items: records.len(),
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProposalPage {
    pub items: Vec<ProposalSummary>,
    pub page: usize,
    pub page_size: usize,
    pub total_pages: usize,
    pub total_items: usize,
}

/// One table row in the back-office listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProposalSummary {
    pub id: ProposalId,
    pub client_name: String,
    pub client_email: String,
    pub client_phone: String,
    pub status: ProposalStatus,
    pub status_label: &'static str,
    pub origin: OriginTag,
    pub origin_label: &'static str,
    pub broker_name: Option<String>,
    pub total_value: String,
    pub email_validation_sent: bool,
    pub created_at: DateTime<Utc>,
}

impl ProposalSummary {
    pub fn from_record(record: &ProposalRecord) -> Self {
        let origin = record.origin.tag();
        Self {
            id: record.id.clone(),
            client_name: record.display_name().to_string(),
            client_email: record.display_email().to_string(),
            client_phone: record.display_phone().to_string(),
            status: record.status,
            status_label: record.status.display_label(),
            origin,
            origin_label: origin.display_label(),
            broker_name: record.origin.broker_name().map(str::to_string),
            total_value: record.total_value_label(),
            email_validation_sent: record.email_validation_sent,
            created_at: record.created_at,
        }
    }
}

/// Counters shown above the listing; computed over every proposal, not the filtered set.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ProposalStats {
    pub total: usize,
    pub awaiting_validation: usize,
    pub awaiting_review: usize,
    pub direct: usize,
    pub via_broker: usize,
}

impl ProposalStats {
    pub fn compute(records: &[ProposalRecord]) -> Self {
        records.iter().fold(
            Self {
                total: records.len(),
                ..Self::default()
            },
            |mut stats, record| {
                match record.status {
                    ProposalStatus::Parcial => stats.awaiting_validation += 1,
                    ProposalStatus::Pendente => stats.awaiting_review += 1,
                    _ => {}
                }
                match record.origin.tag() {
                    OriginTag::Direct => stats.direct += 1,
                    OriginTag::Broker => stats.via_broker += 1,
                }
                stats
            },
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AdminListing {
    pub page: ProposalPage,
    pub stats: ProposalStats,
}

/// A dependent with its questionnaire, if one was saved.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DependentDetail {
    pub dependent: DependentRecord,
    pub relationship_label: &'static str,
    pub questionnaire: Option<QuestionnaireResponse>,
}

/// Everything the detail view and the exports need about one proposal.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProposalDetail {
    pub proposal: ProposalRecord,
    pub summary: ProposalSummary,
    pub holder_questionnaire: Option<QuestionnaireResponse>,
    pub dependents: Vec<DependentDetail>,
}

impl ProposalDetail {
    pub fn assemble(
        proposal: ProposalRecord,
        dependents: Vec<DependentRecord>,
        questionnaires: Vec<QuestionnaireResponse>,
    ) -> Self {
        // The newest response per person wins.
        let holder_questionnaire = questionnaires
            .iter()
            .filter(|response| response.respondent == Respondent::Holder)
            .max_by_key(|response| response.created_at)
            .cloned();

        let for_dependent = |id: &DependentId| {
            questionnaires
                .iter()
                .filter(|response| {
                    matches!(&response.respondent, Respondent::Dependent { dependent_id } if dependent_id == id)
                })
                .max_by_key(|response| response.created_at)
                .cloned()
        };

        let dependents = dependents
            .into_iter()
            .map(|dependent| DependentDetail {
                relationship_label: dependent.relationship.display_label(),
                questionnaire: for_dependent(&dependent.id),
                dependent,
            })
            .collect();

        Self {
            summary: ProposalSummary::from_record(&proposal),
            proposal,
            holder_questionnaire,
            dependents,
        }
    }
}

/// Non-blank reason required to reject a proposal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct RejectionReason(String);

impl RejectionReason {
    pub fn parse(raw: &str) -> Result<Self, ValidationError> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(ValidationError::single(
                "reason",
                "Por favor, informe o motivo da rejeição",
            ));
        }
        Ok(Self(trimmed.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}
