use std::fs;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use summary_core::{
    ClinicalSectionEntry, CodeResolution, DocumentFormat, EntryDetails, PipelineConfig, Recorded,
    SectionType, SourceKind, SummaryError,
};
use summary_pipeline::{
    ClinicalPipelineManager, DocumentInput, EntryOrdering, EntryOrigin, MemorySessionStore,
    SectionService, SectionState, SourceDocument, StandardSectionService, StaticTerminology,
    TerminologyError, TerminologyResolver,
};

fn fixture(name: &str) -> String {
    let path = format!("{}/tests/data/{name}", env!("CARGO_MANIFEST_DIR"));
    fs::read_to_string(path).expect("fixture readable")
}

fn cda_document() -> SourceDocument {
    SourceDocument::parse(&fixture("summary_seven_problems.xml"), DocumentFormat::CdaL3)
        .expect("CDA parses")
}

fn fhir_document() -> SourceDocument {
    SourceDocument::parse(&fixture("summary_seven_problems.json"), DocumentFormat::Fhir)
        .expect("bundle parses")
}

fn manager(config: PipelineConfig) -> ClinicalPipelineManager {
    ClinicalPipelineManager::with_default_services(Arc::new(MemorySessionStore::new()), config)
}

struct CountingService {
    inner: StandardSectionService,
    extractions: AtomicUsize,
}

impl CountingService {
    fn new(section_type: SectionType) -> Arc<Self> {
        Arc::new(Self {
            inner: StandardSectionService::new(section_type, EntryOrdering::ActiveFirst),
            extractions: AtomicUsize::new(0),
        })
    }

    fn count(&self) -> usize {
        self.extractions.load(Ordering::SeqCst)
    }
}

impl SectionService for CountingService {
    fn section_type(&self) -> SectionType {
        self.inner.section_type()
    }

    fn extract(&self, document: &SourceDocument) -> Vec<ClinicalSectionEntry> {
        self.extractions.fetch_add(1, Ordering::SeqCst);
        self.inner.extract(document)
    }

    fn arrange(&self, entries: &mut Vec<ClinicalSectionEntry>) {
        self.inner.arrange(entries);
    }
}

/// Answers after a short pause, so concurrent requests overlap.
struct PausingTerminology;

#[async_trait]
impl TerminologyResolver for PausingTerminology {
    async fn resolve(
        &self,
        _system: &str,
        _code: &str,
    ) -> Result<Option<String>, TerminologyError> {
        tokio::time::sleep(Duration::from_millis(50)).await;
        Ok(None)
    }
}

struct SlowTerminology;

#[async_trait]
impl TerminologyResolver for SlowTerminology {
    async fn resolve(
        &self,
        _system: &str,
        _code: &str,
    ) -> Result<Option<String>, TerminologyError> {
        tokio::time::sleep(Duration::from_secs(5)).await;
        Ok(Some("too late".to_string()))
    }
}

#[tokio::test]
async fn process_all_is_idempotent_and_cached() {
    let counting = CountingService::new(SectionType::Problems);
    let mut manager = manager(PipelineConfig::default());
    manager.register(counting.clone());
    let input = DocumentInput::new(cda_document());

    let first = manager.process_all("session-1", &input).await.expect("first run");
    let second = manager.process_all("session-1", &input).await.expect("second run");

    assert_eq!(
        serde_json::to_string(&first).expect("serializes"),
        serde_json::to_string(&second).expect("serializes")
    );
    assert_eq!(counting.count(), 1);
    assert_eq!(first.sections[&SectionType::Problems].len(), 7);
    assert_eq!(
        manager
            .state("session-1", input.version(), SectionType::Problems)
            .await
            .expect("state"),
        SectionState::Enhanced
    );
    assert_eq!(manager.in_flight(), 0);

    let cached = manager
        .process_section(SectionType::Problems, "session-1", &input)
        .await
        .expect("cached section");
    assert!(cached.from_cache);
}

#[tokio::test]
async fn secondary_source_never_doubles_entries() {
    let manager = manager(PipelineConfig::default());
    let input = DocumentInput::new(cda_document()).with_secondary(fhir_document());

    let problems = manager
        .process_section(SectionType::Problems, "session-2", &input)
        .await
        .expect("problems");
    assert_eq!(problems.entries.len(), 7);
    assert_eq!(problems.origin, EntryOrigin::Primary);
    assert!(problems.entries.iter().all(|entry| entry.source == SourceKind::Cda));

    let procedures = manager
        .process_section(SectionType::Procedures, "session-2", &input)
        .await
        .expect("procedures");
    assert_eq!(procedures.origin, EntryOrigin::Secondary);
    assert_eq!(procedures.entries.len(), 1);
    assert_eq!(procedures.entries[0].source, SourceKind::Fhir);

    let devices = manager
        .process_section(SectionType::MedicalDevices, "session-2", &input)
        .await
        .expect("devices");
    assert_eq!(devices.origin, EntryOrigin::Empty);
    assert!(devices.entries.is_empty());
}

#[tokio::test]
async fn dates_share_one_display_form() {
    let manager = manager(PipelineConfig::default());
    let input = DocumentInput::new(cda_document()).with_secondary(fhir_document());

    let problems = manager
        .process_section(SectionType::Problems, "session-3", &input)
        .await
        .expect("problems");
    let hypothyroidism = problems
        .entries
        .iter()
        .find(|entry| entry.source_id.as_deref() == Some("PRB-1"))
        .expect("PRB-1 present");
    assert_eq!(
        hypothyroidism.effective_time.formatted.as_deref(),
        Some("from 04/07/2015")
    );

    let procedures = manager
        .process_section(SectionType::Procedures, "session-3", &input)
        .await
        .expect("procedures");
    assert_eq!(
        procedures.entries[0].effective_time.formatted.as_deref(),
        Some("14/06/1998")
    );
}

#[tokio::test]
async fn terminology_displays_replace_raw_text_once_resolved() {
    let table =
        StaticTerminology::new().with("http://hl7.org/fhir/sid/icd-10", "E03.9", "Hypothyroidism");
    let manager = manager(PipelineConfig::default()).with_terminology(Arc::new(table));
    let input = DocumentInput::new(cda_document());

    let problems = manager
        .process_section(SectionType::Problems, "session-4", &input)
        .await
        .expect("problems");
    let entry = problems
        .entries
        .iter()
        .find(|entry| entry.source_id.as_deref() == Some("PRB-1"))
        .expect("PRB-1 present");
    let EntryDetails::Problem(details) = &entry.details else {
        panic!("problem details expected");
    };
    let code = details.problem.as_ref().expect("problem code");
    assert_eq!(code.resolution, CodeResolution::Resolved);
    assert_eq!(code.best_display(), Some("Hypothyroidism"));
    assert_eq!(
        code.raw_display,
        Recorded::Value("Hypothyroidism, unspecified".to_string())
    );

    let other = problems
        .entries
        .iter()
        .find(|entry| entry.source_id.as_deref() == Some("PRB-2"))
        .expect("PRB-2 present");
    let EntryDetails::Problem(details) = &other.details else {
        panic!("problem details expected");
    };
    let code = details.problem.as_ref().expect("problem code");
    assert_eq!(code.resolution, CodeResolution::Unresolved);
    assert_eq!(code.best_display(), Some("Essential (primary) hypertension"));
}

#[tokio::test]
async fn slow_terminology_falls_back_to_raw_display() {
    let config = PipelineConfig {
        terminology_timeout_ms: 20,
        ..PipelineConfig::default()
    };
    let manager = manager(config).with_terminology(Arc::new(SlowTerminology));
    let input = DocumentInput::new(cda_document());

    let medications = manager
        .process_section(SectionType::Medications, "session-5", &input)
        .await
        .expect("medications");
    let EntryDetails::Medication(details) = &medications.entries[0].details else {
        panic!("medication details expected");
    };
    let product = details.product.as_ref().expect("product");
    assert_eq!(product.resolution, CodeResolution::Unresolved);
    assert_eq!(product.best_display(), Some("levothyroxine"));
}

#[tokio::test]
async fn invalidation_forces_a_fresh_extraction() {
    let counting = CountingService::new(SectionType::Problems);
    let mut manager = manager(PipelineConfig::default());
    manager.register(counting.clone());
    let input = DocumentInput::new(cda_document());

    manager
        .process_section(SectionType::Problems, "session-6", &input)
        .await
        .expect("first");
    manager.invalidate("session-6").await.expect("invalidate");
    assert_eq!(
        manager
            .state("session-6", input.version(), SectionType::Problems)
            .await
            .expect("state"),
        SectionState::NotExtracted
    );

    let again = manager
        .process_section(SectionType::Problems, "session-6", &input)
        .await
        .expect("second");
    assert!(!again.from_cache);
    assert_eq!(counting.count(), 2);
}

#[tokio::test]
async fn new_document_version_is_not_served_stale_sections() {
    let counting = CountingService::new(SectionType::Problems);
    let mut manager = manager(PipelineConfig::default());
    manager.register(counting.clone());

    let cda_only = DocumentInput::new(cda_document());
    let with_bundle = DocumentInput::new(cda_document()).with_secondary(fhir_document());
    assert_ne!(cda_only.version(), with_bundle.version());

    manager
        .process_section(SectionType::Problems, "session-7", &cda_only)
        .await
        .expect("first version");
    let outcome = manager
        .process_section(SectionType::Problems, "session-7", &with_bundle)
        .await
        .expect("second version");
    assert!(!outcome.from_cache);
    assert_eq!(counting.count(), 2);
}

#[tokio::test(start_paused = true)]
async fn concurrent_requests_extract_once() {
    let counting = CountingService::new(SectionType::Problems);
    let mut manager =
        manager(PipelineConfig::default()).with_terminology(Arc::new(PausingTerminology));
    manager.register(counting.clone());
    let input = DocumentInput::new(cda_document());

    let (a, b) = tokio::join!(
        manager.process_section(SectionType::Problems, "session-8", &input),
        manager.process_section(SectionType::Problems, "session-8", &input),
    );
    let (a, b) = (a.expect("first"), b.expect("second"));
    assert_eq!(a.entries, b.entries);
    assert_eq!(counting.count(), 1);
    assert!(!a.from_cache);
    assert!(b.from_cache);
    assert_eq!(manager.in_flight(), 0);
}

#[tokio::test(start_paused = true)]
async fn expired_sections_report_not_extracted() {
    let config = PipelineConfig {
        session_ttl_secs: 60,
        ..PipelineConfig::default()
    };
    let counting = CountingService::new(SectionType::Problems);
    let mut manager = manager(config);
    manager.register(counting.clone());
    let input = DocumentInput::new(cda_document());

    manager
        .process_section(SectionType::Problems, "session-10", &input)
        .await
        .expect("first");
    tokio::time::advance(Duration::from_secs(61)).await;

    assert_eq!(
        manager
            .state("session-10", input.version(), SectionType::Problems)
            .await
            .expect("state"),
        SectionState::NotExtracted
    );
    assert_eq!(manager.in_flight(), 0);

    let again = manager
        .process_section(SectionType::Problems, "session-10", &input)
        .await
        .expect("after expiry");
    assert!(!again.from_cache);
    assert_eq!(counting.count(), 2);
}

#[tokio::test]
async fn first_and_cached_results_are_identical() {
    let manager = manager(PipelineConfig::default());
    let input = DocumentInput::new(cda_document()).with_secondary(fhir_document());

    for section in [SectionType::VitalSigns, SectionType::Results, SectionType::Medications] {
        let fresh = manager
            .process_section(section, "session-11", &input)
            .await
            .expect("fresh");
        let cached = manager
            .process_section(section, "session-11", &input)
            .await
            .expect("cached");
        assert!(cached.from_cache);
        assert_eq!(fresh.entries, cached.entries);
    }
}

#[tokio::test]
async fn unregistered_section_is_an_error() {
    let manager = ClinicalPipelineManager::new(
        Arc::new(MemorySessionStore::new()),
        PipelineConfig::default(),
    );
    let input = DocumentInput::new(cda_document());
    let result = manager
        .process_section(SectionType::Allergies, "session-9", &input)
        .await;
    assert!(matches!(result, Err(SummaryError::UnsupportedDocument(_))));
}
