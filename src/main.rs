use clap::{Parser, Subcommand};
use log::info;
use nbraster::inject::inject_png_fallbacks_into_notebook;
use nbraster::{Error, Result};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Parser)]
#[command(name = "nbraster", version, about = "Capture PNG fallbacks for notebook PDF export")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Screenshot rich outputs and write a cell id -> PNG data URL map
    Capture {
        /// Session view JSON (cell notifications and cell order)
        #[arg(long)]
        session: PathBuf,
        /// Pre-rendered HTML export of the notebook, for static capture
        #[arg(long)]
        html: Option<PathBuf>,
        /// Frontend asset directory served next to the exported HTML
        #[arg(long, default_value = ".")]
        assets: PathBuf,
        /// Notebook file, required for live capture
        #[arg(long)]
        notebook: Option<PathBuf>,
        #[arg(long, default_value_t = 4.0)]
        scale: f64,
        /// "static" or "live"
        #[arg(long, default_value = "static")]
        server_mode: String,
        /// Output JSON file; stdout when omitted
        #[arg(long)]
        out: Option<PathBuf>,
        /// Arguments forwarded to the notebook
        #[arg(last = true)]
        argv: Vec<String>,
    },
    /// Inject a captured map into an nbformat notebook
    Inject {
        #[arg(long)]
        notebook: PathBuf,
        #[arg(long)]
        fallbacks: PathBuf,
        /// Output notebook; overwrites the input when omitted
        #[arg(long)]
        out: Option<PathBuf>,
    },
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T> {
    let text = fs::read_to_string(path)?;
    Ok(serde_json::from_str(&text)?)
}

fn write_output(out: Option<&Path>, text: &str) -> Result<()> {
    match out {
        Some(path) => fs::write(path, text)?,
        None => println!("{}", text),
    }
    Ok(())
}

#[cfg(feature = "cdp")]
#[allow(clippy::too_many_arguments)]
fn capture(
    session: &Path,
    html: Option<&Path>,
    assets: &Path,
    notebook: Option<&Path>,
    scale: f64,
    server_mode: String,
    out: Option<&Path>,
    argv: &[String],
) -> Result<()> {
    use nbraster::cdp::CdpBrowser;
    use nbraster::export::PrerenderedHtmlExporter;
    use nbraster::{PngFallbackCollector, RasterOptions, SessionView};
    use std::sync::Arc;

    let view: SessionView = read_json(session)?;
    let html = match html {
        Some(path) => fs::read_to_string(path)?,
        None => String::new(),
    };
    let collector = PngFallbackCollector::new(
        Arc::new(PrerenderedHtmlExporter::new(html)),
        Arc::new(CdpBrowser::default()),
        assets,
    );
    let options = RasterOptions {
        enabled: true,
        scale,
        server_mode,
    };
    let filename = notebook.and_then(|p| p.file_name()).map(|n| n.to_string_lossy().into_owned());
    let filepath = notebook.map(|p| p.to_string_lossy().into_owned());

    let captures = collector.collect(&view, filename.as_deref(), filepath.as_deref(), argv, &options)?;
    info!("Captured {} output(s)", captures.len());
    write_output(out, &serde_json::to_string_pretty(&captures)?)
}

#[cfg(not(feature = "cdp"))]
#[allow(clippy::too_many_arguments)]
fn capture(
    _session: &Path,
    _html: Option<&Path>,
    _assets: &Path,
    _notebook: Option<&Path>,
    _scale: f64,
    _server_mode: String,
    _out: Option<&Path>,
    _argv: &[String],
) -> Result<()> {
    Err(Error::ConfigError(
        "capture requires the `cdp` feature".to_string(),
    ))
}

fn inject(notebook: &Path, fallbacks: &Path, out: Option<&Path>) -> Result<()> {
    let mut document: serde_json::Value = read_json(notebook)?;
    let fallbacks: HashMap<String, String> = read_json(fallbacks)?;
    let injected = inject_png_fallbacks_into_notebook(&mut document, &fallbacks);
    info!("Injected PNG fallbacks into {} cell(s)", injected);

    let text = serde_json::to_string_pretty(&document)?;
    fs::write(out.unwrap_or(notebook), text).map_err(Error::from)
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    let res = match cli.command {
        Command::Capture {
            session,
            html,
            assets,
            notebook,
            scale,
            server_mode,
            out,
            argv,
        } => capture(
            &session,
            html.as_deref(),
            &assets,
            notebook.as_deref(),
            scale,
            server_mode,
            out.as_deref(),
            &argv,
        ),
        Command::Inject {
            notebook,
            fallbacks,
            out,
        } => inject(&notebook, &fallbacks, out.as_deref()),
    };

    if let Err(e) = res {
        eprintln!("nbraster: {}", e);
        std::process::exit(1);
    }
}
