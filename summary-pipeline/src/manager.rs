//! The clinical section pipeline.
//!
//! Every section of a document goes through extraction and enhancement once
//! per `(session, document version, section)`. The enhanced entries are kept
//! in the session store and handed back on later requests until the session
//! is invalidated or a different document version arrives.

use std::collections::BTreeMap;
use std::sync::Arc;

use dashmap::{DashMap, DashSet};
use serde::{Deserialize, Serialize};
use summary_core::fingerprint::short_fingerprint;
use summary_core::{
    ClinicalSectionEntry, ClinicalSummary, PipelineConfig, SectionType, SummaryError,
    SummaryResult,
};
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::enhance::enhance_entries;
use crate::services::{dedup_entries, default_services, SectionService};
use crate::session::SessionStore;
use crate::source::DocumentInput;
use crate::terminology::{TerminologyGateway, TerminologyResolver};

/// Lifecycle of one cached section.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SectionState {
    NotExtracted,
    Extracted,
    Enhanced,
}

/// Which document the entries of a section came from.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum EntryOrigin {
    Primary,
    Secondary,
    /// Neither document had entries for the section.
    Empty,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SectionOutcome {
    pub section_type: SectionType,
    pub entries: Vec<ClinicalSectionEntry>,
    pub origin: EntryOrigin,
    /// Served from the session store without re-parsing.
    pub from_cache: bool,
}

#[derive(Debug, Serialize, Deserialize)]
struct CachedSection {
    version: String,
    section: SectionType,
    state: SectionState,
    origin: EntryOrigin,
    entries: Vec<ClinicalSectionEntry>,
}

type CacheKey = (String, String, SectionType);

pub struct ClinicalPipelineManager {
    services: BTreeMap<SectionType, Arc<dyn SectionService>>,
    store: Arc<dyn SessionStore>,
    terminology: Option<TerminologyGateway>,
    config: PipelineConfig,
    /// Held only while a key is being extracted.
    locks: DashMap<CacheKey, Arc<Mutex<()>>>,
    /// Keys past extraction but not yet stored as enhanced.
    extracted: DashSet<CacheKey>,
}

impl ClinicalPipelineManager {
    /// Manager with no services registered and no terminology.
    pub fn new(store: Arc<dyn SessionStore>, config: PipelineConfig) -> Self {
        Self {
            services: BTreeMap::new(),
            store,
            terminology: None,
            config,
            locks: DashMap::new(),
            extracted: DashSet::new(),
        }
    }

    /// Manager with the standard service for every section type.
    pub fn with_default_services(store: Arc<dyn SessionStore>, config: PipelineConfig) -> Self {
        let mut manager = Self::new(store, config);
        for service in default_services() {
            manager.register(service);
        }
        manager
    }

    /// Route code lookups through `resolver`. Ignored when the configuration
    /// turns terminology off.
    pub fn with_terminology(mut self, resolver: Arc<dyn TerminologyResolver>) -> Self {
        if self.config.resolve_terminology {
            self.terminology = Some(TerminologyGateway::from_config(resolver, &self.config));
        }
        self
    }

    /// Register a service, replacing any previous one for the same section.
    pub fn register(
        &mut self,
        service: Arc<dyn SectionService>,
    ) -> Option<Arc<dyn SectionService>> {
        self.services.insert(service.section_type(), service)
    }

    pub fn registered_sections(&self) -> Vec<SectionType> {
        self.services.keys().copied().collect()
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Current state of one key. Enhanced sections are read from the session
    /// store, so expiry there is reflected here.
    pub async fn state(
        &self,
        session_id: &str,
        version: &str,
        section_type: SectionType,
    ) -> SummaryResult<SectionState> {
        let key: CacheKey = (session_id.to_string(), version.to_string(), section_type);
        if self.extracted.contains(&key) {
            return Ok(SectionState::Extracted);
        }
        let store_key = store_key(version, section_type);
        Ok(match self.cached(session_id, &store_key, version).await? {
            Some(_) => SectionState::Enhanced,
            None => SectionState::NotExtracted,
        })
    }

    /// Keys with extraction work in flight. Zero once every request returned.
    pub fn in_flight(&self) -> usize {
        self.locks.len() + self.extracted.len()
    }

    /// Enhanced entries of one section, from the session store when present.
    pub async fn process_section(
        &self,
        section_type: SectionType,
        session_id: &str,
        input: &DocumentInput,
    ) -> SummaryResult<SectionOutcome> {
        let service = self.services.get(&section_type).cloned().ok_or_else(|| {
            SummaryError::UnsupportedDocument(format!(
                "no service registered for section {section_type}"
            ))
        })?;
        let version = input.version();
        let store_key = store_key(version, section_type);

        if let Some(outcome) = self.cached(session_id, &store_key, version).await? {
            debug!(session_id, section = %section_type, "section served from session");
            return Ok(outcome);
        }

        let key: CacheKey = (session_id.to_string(), version.to_string(), section_type);
        let lock = self.locks.entry(key.clone()).or_default().clone();
        let result = {
            let _guard = lock.lock().await;
            self.extract_and_store(service.as_ref(), session_id, input, &key, &store_key)
                .await
        };
        self.extracted.remove(&key);
        self.locks.remove_if(&key, |_, current| Arc::ptr_eq(current, &lock));
        result
    }

    async fn extract_and_store(
        &self,
        service: &dyn SectionService,
        session_id: &str,
        input: &DocumentInput,
        key: &CacheKey,
        store_key: &str,
    ) -> SummaryResult<SectionOutcome> {
        let section_type = service.section_type();
        let version = input.version();

        // Another task may have finished while this one waited.
        if let Some(outcome) = self.cached(session_id, store_key, version).await? {
            debug!(session_id, section = %section_type, "section stored while waiting");
            return Ok(outcome);
        }

        let (mut entries, origin) = extract(service, input);
        self.extracted.insert(key.clone());

        enhance_entries(&mut entries, self.terminology.as_ref()).await;
        service.arrange(&mut entries);

        let cached = CachedSection {
            version: version.to_string(),
            section: section_type,
            state: SectionState::Enhanced,
            origin,
            entries,
        };
        let value = serde_json::to_value(&cached)?;
        self.store
            .set(session_id, store_key, value.clone(), self.config.session_ttl())
            .await?;

        info!(
            session_id,
            section = %section_type,
            version = short_fingerprint(version),
            entries = cached.entries.len(),
            ?origin,
            "section enhanced and cached"
        );
        // Hand back what later requests will read from the store.
        let stored: CachedSection = serde_json::from_value(value)?;
        Ok(SectionOutcome {
            section_type,
            entries: stored.entries,
            origin,
            from_cache: false,
        })
    }

    /// Every registered section plus the administrative record.
    pub async fn process_all(
        &self,
        session_id: &str,
        input: &DocumentInput,
    ) -> SummaryResult<ClinicalSummary> {
        let mut sections = BTreeMap::new();
        for section_type in self.registered_sections() {
            let outcome = self.process_section(section_type, session_id, input).await?;
            sections.insert(section_type, outcome.entries);
        }
        Ok(ClinicalSummary {
            format: input.format(),
            document_version: input.version().to_string(),
            administrative: input.administrative(),
            sections,
        })
    }

    /// Forget everything cached for a session.
    pub async fn invalidate(&self, session_id: &str) -> SummaryResult<()> {
        self.store.clear(session_id).await?;
        info!(session_id, "session sections invalidated");
        Ok(())
    }

    async fn cached(
        &self,
        session_id: &str,
        store_key: &str,
        version: &str,
    ) -> SummaryResult<Option<SectionOutcome>> {
        let Some(value) = self.store.get(session_id, store_key).await? else {
            return Ok(None);
        };
        let cached: CachedSection = serde_json::from_value(value)?;
        if cached.version != version || cached.state != SectionState::Enhanced {
            return Ok(None);
        }
        Ok(Some(SectionOutcome {
            section_type: cached.section,
            entries: cached.entries,
            origin: cached.origin,
            from_cache: true,
        }))
    }
}

impl std::fmt::Debug for ClinicalPipelineManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClinicalPipelineManager")
            .field("sections", &self.services.keys().collect::<Vec<_>>())
            .field("terminology", &self.terminology)
            .field("config", &self.config)
            .finish()
    }
}

fn store_key(version: &str, section_type: SectionType) -> String {
    format!("clinical:{version}:{}", section_type.key())
}

/// Entries from exactly one document: the primary, or the secondary when the
/// primary has nothing for the section.
fn extract(
    service: &dyn SectionService,
    input: &DocumentInput,
) -> (Vec<ClinicalSectionEntry>, EntryOrigin) {
    let section = service.section_type();
    let primary = dedup_entries(service, service.extract(&input.primary));
    if !primary.is_empty() {
        if input.secondary.is_some() {
            debug!(
                %section,
                entries = primary.len(),
                "primary document has entries, secondary ignored"
            );
        }
        return (primary, EntryOrigin::Primary);
    }

    let Some(secondary) = &input.secondary else {
        return (primary, EntryOrigin::Empty);
    };
    let secondary = dedup_entries(service, service.extract(secondary));
    if secondary.is_empty() {
        return (secondary, EntryOrigin::Empty);
    }
    debug!(%section, entries = secondary.len(), "section filled from secondary document");
    (secondary, EntryOrigin::Secondary)
}
