//! CLI Application logic
//!
//! Contains the command-line interface implementation.

use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{ArgAction, Parser, Subcommand};
use tracing::{debug, info, warn};

use docfill_ooxml::{replace_body, Document, OoxmlArchive};
use docfill_template::token::has_directives;
use docfill_template::{Fragment, FragmentSet, FunctionRegistry, Marker, Renderer, Value};

use crate::settings::{parse_fragment_arg, Settings};

#[derive(Parser)]
#[command(name = "docfill")]
#[command(author, version, about = "Fill DOCX templates with JSON data", long_about = None)]
struct Cli {
    /// More log output (-v debug, -vv trace); RUST_LOG overrides
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Render a DOCX/DOTX template with JSON data
    Render {
        /// Template file
        template: PathBuf,

        /// JSON data file, `-` for stdin
        data: PathBuf,

        /// Output DOCX file
        #[arg(short, long)]
        output: PathBuf,

        /// Configuration file path
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Fragment document as NAME=PATH (repeatable)
        #[arg(short, long = "fragment", value_parser = parse_fragment_arg)]
        fragments: Vec<(String, PathBuf)>,
    },
}

/// What a render produced
#[derive(Debug, Default)]
pub struct RenderSummary {
    /// Parts that carried directives and were rewritten
    pub rendered_parts: Vec<String>,
    /// Image and link markers from all parts
    pub markers: Vec<Marker>,
}

/// Run the CLI application
///
/// This is the main entry point for the command-line interface.
/// It parses arguments and dispatches to the appropriate command.
pub fn run_cli() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match cli.command {
        Commands::Render {
            template,
            data,
            output,
            config,
            fragments,
        } => {
            let mut settings = load_settings(config.as_deref())?;
            for (name, path) in fragments {
                settings.add_fragment(name, path);
            }
            let summary = render_command(&template, &data, &output, &settings)?;
            info!(
                parts = summary.rendered_parts.len(),
                markers = summary.markers.len(),
                output = %output.display(),
                "render complete"
            );
        }
    }

    Ok(())
}

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => tracing::Level::INFO,
        1 => tracing::Level::DEBUG,
        _ => tracing::Level::TRACE,
    };
    let filter = tracing_subscriber::EnvFilter::builder()
        .with_default_directive(level.into())
        .from_env_lossy();

    // A second init (tests driving run_cli twice) is harmless
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

/// Load settings from `path`, or defaults if none is given.
/// Relative fragment paths are taken relative to the settings file.
pub fn load_settings(path: Option<&Path>) -> Result<Settings> {
    let Some(path) = path else {
        return Ok(Settings::default());
    };
    let text = fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    let mut settings = Settings::from_toml_str(&text)
        .with_context(|| format!("Invalid config file: {}", path.display()))?;
    if let Some(base) = path.parent() {
        settings.resolve_paths(base);
    }
    debug!(config = %path.display(), "loaded settings");
    Ok(settings)
}

/// Read JSON data from a file, or stdin for `-`
pub fn load_data(path: &Path) -> Result<Value> {
    let text = if path == Path::new("-") {
        let mut text = String::new();
        std::io::stdin()
            .read_to_string(&mut text)
            .context("Failed to read data from stdin")?;
        text
    } else {
        fs::read_to_string(path)
            .with_context(|| format!("Failed to read data file: {}", path.display()))?
    };
    let json: serde_json::Value = serde_json::from_str(&text)
        .with_context(|| format!("Invalid JSON data: {}", path.display()))?;
    Ok(Value::from(json))
}

/// Load every configured fragment from its document's main part
pub fn load_fragments(settings: &Settings) -> Result<FragmentSet> {
    let mut fragments = FragmentSet::new();
    for (name, path) in &settings.fragments {
        let archive = OoxmlArchive::open(path)
            .with_context(|| format!("Failed to open fragment `{}`: {}", name, path.display()))?;
        let document = Document::parse(archive.document_xml()?)
            .with_context(|| format!("Failed to parse fragment `{}`", name))?;
        fragments.insert(Fragment::from_document(name.clone(), document));
        debug!(fragment = name.as_str(), path = %path.display(), "loaded fragment");
    }
    Ok(fragments)
}

/// Execute the render command
pub fn render_command(
    template: &Path,
    data: &Path,
    output: &Path,
    settings: &Settings,
) -> Result<RenderSummary> {
    if !template.exists() {
        anyhow::bail!("Template file not found: {}", template.display());
    }

    let data = load_data(data)?;
    let fragments = load_fragments(settings)?;
    let functions = FunctionRegistry::with_builtins();
    let renderer = Renderer::new(&functions, &fragments, &settings.render);

    let mut archive = OoxmlArchive::open(template)
        .with_context(|| format!("Failed to open template: {}", template.display()))?;
    let summary = render_archive(&mut archive, &renderer, &data)?;

    if archive.convert_template_to_document() {
        debug!("output declared as a document instead of a template");
    }
    archive
        .write_to_file(output)
        .with_context(|| format!("Failed to write output: {}", output.display()))?;

    if !summary.markers.is_empty() {
        warn!(
            count = summary.markers.len(),
            "image/link markers were rendered as text; media embedding is not performed"
        );
    }
    Ok(summary)
}

/// Render every template part of an unpacked package in place
pub fn render_archive(
    archive: &mut OoxmlArchive,
    renderer: &Renderer<'_>,
    data: &Value,
) -> Result<RenderSummary> {
    let mut summary = RenderSummary::default();

    for part in archive.template_parts() {
        let Some(original) = archive.get(&part).map(<[u8]>::to_vec) else {
            continue;
        };
        if !has_directives(&String::from_utf8_lossy(&original)) {
            debug!(part = part.as_str(), "no directives; part left as is");
            continue;
        }

        let document = Document::parse(&original)
            .with_context(|| format!("Failed to parse part: {}", part))?;
        let (rendered, markers) = renderer
            .render_document(&document, data)
            .with_context(|| format!("Failed to render part: {}", part))?;
        let xml = replace_body(&original, &rendered)
            .with_context(|| format!("Failed to write part: {}", part))?;

        archive.set(part.clone(), xml);
        summary.markers.extend(markers);
        summary.rendered_parts.push(part);
    }

    Ok(summary)
}
