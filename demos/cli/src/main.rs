use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context};
use clap::{Parser, ValueEnum};
use summary_core::{DocumentFormat, PipelineConfig, SectionType};
use summary_pipeline::{
    ClinicalPipelineManager, CompositionSelector, DocumentInput, MemorySessionStore,
    SourceDocument, StaticTerminology,
};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Debug, Clone, Copy, ValueEnum)]
enum FormatArg {
    CdaL1,
    CdaL3,
    Fhir,
}

impl From<FormatArg> for DocumentFormat {
    fn from(format: FormatArg) -> Self {
        match format {
            FormatArg::CdaL1 => DocumentFormat::CdaL1,
            FormatArg::CdaL3 => DocumentFormat::CdaL3,
            FormatArg::Fhir => DocumentFormat::Fhir,
        }
    }
}

#[derive(Parser, Debug)]
#[command(
    name = "summary-cli",
    about = "Normalize a CDA or FHIR patient summary and print it as JSON."
)]
struct Args {
    /// CDA XML document or FHIR bundle JSON.
    #[arg(short, long)]
    input: PathBuf,

    /// Second rendition of the same summary, used for sections the input leaves empty.
    #[arg(long)]
    secondary: Option<PathBuf>,

    /// Input format. Detected from the content when omitted.
    #[arg(short, long, value_enum)]
    format: Option<FormatArg>,

    /// Composition to read when a bundle carries several (`Composition/{id}` or fullUrl).
    #[arg(long, conflicts_with = "patient")]
    composition: Option<String>,

    /// Read the bundle Composition whose subject is this Patient reference.
    #[arg(long)]
    patient: Option<String>,

    /// Pipeline configuration (TOML).
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Terminology table, JSON object of `{ system: { code: display } }`.
    #[arg(short, long)]
    terminology: Option<PathBuf>,

    /// Print one section only (e.g. `medications`, `vital_signs`).
    #[arg(short, long)]
    section: Option<String>,

    /// Print the parsed document without pipeline enhancement.
    #[arg(long)]
    raw: bool,

    /// Pretty-print the JSON output.
    #[arg(long)]
    pretty: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let args = Args::parse();
    let config = load_config(args.config.as_deref())?;

    let selector = match (&args.composition, &args.patient) {
        (Some(reference), _) => CompositionSelector::Reference(reference.clone()),
        (None, Some(patient)) => CompositionSelector::Subject(patient.clone()),
        (None, None) => CompositionSelector::Sole,
    };

    let primary = load_document(&args.input, args.format, &selector)?;
    if args.raw {
        return print_json(&primary.to_clinical_document(), args.pretty);
    }

    let mut input = DocumentInput::new(primary);
    if let Some(path) = &args.secondary {
        input = input.with_secondary(load_document(path, None, &selector)?);
    }

    let mut manager =
        ClinicalPipelineManager::with_default_services(Arc::new(MemorySessionStore::new()), config);
    if let Some(path) = &args.terminology {
        manager = manager.with_terminology(Arc::new(load_terminology(path)?));
    }

    let session_id = "cli";
    match &args.section {
        Some(key) => {
            let section_type = parse_section(key)?;
            let outcome = manager.process_section(section_type, session_id, &input).await?;
            info!(section = %section_type, origin = ?outcome.origin, "section processed");
            print_json(&outcome.entries, args.pretty)
        }
        None => {
            let summary = manager.process_all(session_id, &input).await?;
            print_json(&summary, args.pretty)
        }
    }
}

fn load_config(path: Option<&Path>) -> anyhow::Result<PipelineConfig> {
    let Some(path) = path else {
        return Ok(PipelineConfig::default());
    };
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("cannot read config file {}", path.display()))?;
    toml::from_str(&text).with_context(|| format!("invalid config file {}", path.display()))
}

fn load_document(
    path: &Path,
    format: Option<FormatArg>,
    selector: &CompositionSelector,
) -> anyhow::Result<SourceDocument> {
    let data = std::fs::read_to_string(path)
        .with_context(|| format!("cannot read document {}", path.display()))?;
    let format = match format {
        Some(format) => format.into(),
        None => detect_format(&data)
            .with_context(|| format!("cannot tell the format of {}", path.display()))?,
    };
    SourceDocument::parse_with(&data, format, selector)
        .with_context(|| format!("cannot parse {}", path.display()))
}

fn detect_format(data: &str) -> anyhow::Result<DocumentFormat> {
    let content = data.trim_start_matches('\u{feff}').trim_start();
    if content.starts_with('{') {
        Ok(DocumentFormat::Fhir)
    } else if content.starts_with('<') {
        if content.contains("nonXMLBody") {
            Ok(DocumentFormat::CdaL1)
        } else {
            Ok(DocumentFormat::CdaL3)
        }
    } else {
        bail!("neither XML nor JSON")
    }
}

fn load_terminology(path: &Path) -> anyhow::Result<StaticTerminology> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("cannot read terminology file {}", path.display()))?;
    let map: HashMap<String, HashMap<String, String>> = serde_json::from_str(&text)
        .with_context(|| format!("invalid terminology file {}", path.display()))?;
    let terminology = StaticTerminology::from_nested(map);
    info!(codes = terminology.len(), "terminology table loaded");
    Ok(terminology)
}

fn parse_section(key: &str) -> anyhow::Result<SectionType> {
    let wanted = key.trim().to_ascii_lowercase().replace('-', "_");
    SectionType::ALL
        .into_iter()
        .find(|section| section.key() == wanted || section.loinc_code() == wanted)
        .with_context(|| format!("unknown section {key}"))
}

fn print_json<T: serde::Serialize>(value: &T, pretty: bool) -> anyhow::Result<()> {
    let text = if pretty {
        serde_json::to_string_pretty(value)?
    } else {
        serde_json::to_string(value)?
    };
    println!("{text}");
    Ok(())
}
