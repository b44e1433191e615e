use anyhow::Context;
use clap::{Parser, Subcommand};
use gdoc_fixer_core::{
    viewport_presets, ChromeBackend, Exporter, ExporterConfig, GeminiClient, PresentationStore,
    StyleMode, Viewport, ViewportFixer,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;

#[derive(Debug, Parser)]
#[clap(name = "gdoc-fixer", version, about = "Export HTML documents to PNG, DOCX and slides")]
struct Cli {
    /// JSON configuration file; flags override its values.
    #[clap(long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Chrome/Chromium binary to use.
    #[clap(long, global = true, env = "GDOC_FIXER_BROWSER", value_name = "PATH")]
    browser: Option<PathBuf>,

    #[clap(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Render an HTML file to PNG.
    Capture {
        input: PathBuf,
        #[clap(long, default_value_t = 1080)]
        width: u32,
        #[clap(long, default_value_t = 1080)]
        height: u32,
        /// Supersampling ratio.
        #[clap(long)]
        ratio: Option<f64>,
        /// Output file name (default: <input stem>.png).
        #[clap(long)]
        output: Option<String>,
        /// Directory receiving `<input stem>/<output>`.
        #[clap(long, default_value = "imgs")]
        out_dir: PathBuf,
    },
    /// Convert an HTML file to DOCX.
    Docx {
        input: PathBuf,
        /// Output path (default: <title>.docx next to the input).
        #[clap(long)]
        output: Option<PathBuf>,
        /// Document title (default: input file name).
        #[clap(long)]
        title: Option<String>,
        /// Resolve styles statically instead of in a browser.
        #[clap(long)]
        inline_styles: bool,
        /// Write the sanitized HTML instead of a packaged document.
        #[clap(long)]
        html_only: bool,
    },
    /// Generate a slide deck from an HTML file.
    Slides {
        input: PathBuf,
        /// Directory receiving `slide_NNN.html`.
        #[clap(long, default_value = "slides")]
        out_dir: PathBuf,
        /// Instruction applied to the whole deck after generation.
        #[clap(long)]
        instruction: Option<String>,
        /// Repair slides that overflow the 1280x720 canvas.
        #[clap(long)]
        fix_viewport: bool,
        /// Also export the deck as a PDF, one page per slide.
        #[clap(long, value_name = "PATH")]
        pdf: Option<PathBuf>,
    },
    /// List the built-in viewport presets.
    Presets,
}

fn load_config(path: Option<&Path>) -> anyhow::Result<ExporterConfig> {
    let Some(path) = path else {
        return Ok(ExporterConfig::default());
    };
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("reading config {}", path.display()))?;
    let config: ExporterConfig = serde_json::from_str(&text)
        .with_context(|| format!("parsing config {}", path.display()))?;
    Ok(config)
}

/// `dir/name`, or `dir/<stem>_001.<ext>` and upwards when that exists.
fn unique_output_path(dir: &Path, name: &str) -> PathBuf {
    let candidate = dir.join(name);
    if !candidate.exists() {
        return candidate;
    }
    let base = Path::new(name);
    let stem = base
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let ext = base
        .extension()
        .map(|e| format!(".{}", e.to_string_lossy()))
        .unwrap_or_default();
    (1..)
        .map(|n| dir.join(format!("{stem}_{n:03}{ext}")))
        .find(|path| !path.exists())
        .unwrap_or(candidate)
}

fn file_stem(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "document".to_string())
}

async fn capture(
    config: ExporterConfig,
    input: &Path,
    viewport: Viewport,
    output: Option<String>,
    out_dir: &Path,
) -> anyhow::Result<PathBuf> {
    let html = std::fs::read_to_string(input)
        .with_context(|| format!("reading {}", input.display()))?;
    let stem = file_stem(input);
    let dir = out_dir.join(&stem);
    std::fs::create_dir_all(&dir)?;
    let path = unique_output_path(&dir, &output.unwrap_or_else(|| format!("{stem}.png")));

    let exporter = Exporter::with_chrome(config)?;
    let png = exporter.export_png(&html, viewport).await?;
    std::fs::write(&path, &png.data)?;
    info!("Saved {}x{} PNG", png.width, png.height);
    Ok(path)
}

async fn docx(
    config: ExporterConfig,
    input: &Path,
    output: Option<PathBuf>,
    title: Option<String>,
    html_only: bool,
) -> anyhow::Result<PathBuf> {
    let html = std::fs::read_to_string(input)
        .with_context(|| format!("reading {}", input.display()))?;
    let title = title.unwrap_or_else(|| file_stem(input));
    let dir = input.parent().unwrap_or(Path::new("."));
    let exporter = Exporter::with_chrome(config)?;

    if html_only {
        let markup = exporter.export_docx_html(&html).await?;
        let path = output.unwrap_or_else(|| dir.join(format!("{}.docx.html", file_stem(input))));
        std::fs::write(&path, markup)?;
        return Ok(path);
    }

    let export = exporter.export_docx(&html, &title).await?;
    let path = output.unwrap_or_else(|| dir.join(&export.file_name));
    std::fs::write(&path, &export.data)?;
    Ok(path)
}

async fn slides(
    config: ExporterConfig,
    input: &Path,
    out_dir: &Path,
    instruction: Option<String>,
    fix_viewport: bool,
    pdf: Option<&Path>,
) -> anyhow::Result<usize> {
    let html = std::fs::read_to_string(input)
        .with_context(|| format!("reading {}", input.display()))?;
    let gemini = GeminiClient::new(config.gemini.clone())?;
    let store = PresentationStore::new(config.slides.clone());

    let count = store.generate(&gemini, &html).await?;
    println!("Generated {count} slides");

    if let Some(instruction) = instruction {
        store.modify_all_slides(&gemini, &instruction).await?;
    }

    if fix_viewport {
        let backend = Arc::new(ChromeBackend::new(config.render.clone())?);
        let fixer = ViewportFixer::new(backend, config.render.clone(), config.slides.clone())?;
        let report = fixer.fix_slides(&gemini, &store.slides().await).await;
        println!("Repaired {}/{} slides", report.fixed_count(), count);
        store.replace_slides(report.slides, "viewport repair").await?;
    }

    std::fs::create_dir_all(out_dir)?;
    let slides = store.slides().await;
    for (i, slide) in slides.iter().enumerate() {
        std::fs::write(out_dir.join(format!("slide_{:03}.html", i + 1)), slide)?;
    }

    if let Some(path) = pdf {
        let exporter = Exporter::with_chrome(config)?;
        let bytes = exporter.export_slides_pdf(&slides).await?;
        std::fs::write(path, bytes).with_context(|| format!("writing {}", path.display()))?;
        println!("Saved {}", path.display());
    }
    Ok(slides.len())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    gdoc_fixer_core::init_logging();
    let cli = Cli::parse();

    let mut config = load_config(cli.config.as_deref())?;
    if let Some(browser) = cli.browser {
        config.render.browser_path = Some(browser);
    }

    match cli.command {
        Command::Capture {
            input,
            width,
            height,
            ratio,
            output,
            out_dir,
        } => {
            if let Some(ratio) = ratio {
                config.render.pixel_ratio = ratio;
            }
            let viewport = Viewport::new(width as f64, height as f64);
            if (viewport.width, viewport.height) != (width, height) {
                eprintln!("Viewport clamped to {}", viewport.label());
            }
            println!("Capturing {} at {}", input.display(), viewport.label());
            let path = capture(config, &input, viewport, output, &out_dir).await?;
            println!("Saved {}", path.display());
        }
        Command::Docx {
            input,
            output,
            title,
            inline_styles,
            html_only,
        } => {
            if inline_styles {
                config.transpile.style_mode = StyleMode::Inline;
            }
            let path = docx(config, &input, output, title, html_only).await?;
            println!("Saved {}", path.display());
        }
        Command::Slides {
            input,
            out_dir,
            instruction,
            fix_viewport,
            pdf,
        } => {
            let written =
                slides(config, &input, &out_dir, instruction, fix_viewport, pdf.as_deref()).await?;
            println!("Wrote {} slides to {}", written, out_dir.display());
        }
        Command::Presets => {
            for preset in viewport_presets() {
                println!("{}", preset.label);
            }
        }
    }

    Ok(())
}
