use std::fs;
use std::io::{self, Stdout};
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use crossterm::cursor;
use crossterm::event::{self, DisableMouseCapture, EnableMouseCapture};
use crossterm::terminal::{self, Clear, ClearType};
use directories::ProjectDirs;
use image::RgbImage;
use inkpdf_core::config::project_dirs;
use inkpdf_core::{
    Color, Command, Config, DocumentInfo, GlyphRasterizer, NoGlyphs, PageExtent, Repaint, Session,
    SessionEvent, Tool,
};
use inkpdf_render::{FontdueRasterizer, PdfiumProvider, PdfiumWriter};
use inkpdf_tty::{
    compose_frame, write_status_line, CellSize, DrawParams, EventMapper, KittyRenderer,
    PromptKind, UiEvent,
};
use tracing::{info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{prelude::*, EnvFilter};

#[derive(Debug, Parser)]
#[command(name = "inkpdf", version, about = "kitty-native PDF annotator")]
struct Args {
    /// Configuration file (defaults to the platform config directory)
    #[arg(short = 'c', long = "config")]
    config: Option<PathBuf>,

    /// Initial render scale
    #[arg(short = 's', long = "scale")]
    scale: Option<f32>,

    /// Pen colour as #rrggbb
    #[arg(long = "pen-color")]
    pen_color: Option<Color>,

    /// Pen width in pixels
    #[arg(long = "pen-width")]
    pen_width: Option<f32>,

    /// PDF to open on startup
    file: Option<PathBuf>,
}

impl Args {
    fn apply_to(&self, config: &mut Config) -> Result<()> {
        if let Some(scale) = self.scale {
            config.initial_scale = scale;
        }
        if let Some(color) = self.pen_color {
            config.pen_color = color;
        }
        if let Some(width) = self.pen_width {
            config.pen_width = width;
        }
        config.validate().context("invalid command line option")
    }
}

struct RawModeGuard;

impl RawModeGuard {
    fn new() -> Result<Self> {
        terminal::enable_raw_mode()?;
        crossterm::execute!(io::stdout(), EnableMouseCapture, cursor::Hide)?;
        Ok(Self)
    }
}

impl Drop for RawModeGuard {
    fn drop(&mut self) {
        let mut stdout = io::stdout();
        let _ = crossterm::execute!(stdout, DisableMouseCapture, cursor::Show);
        let _ = terminal::disable_raw_mode();
    }
}

fn main() -> Result<()> {
    let args = Args::parse();

    let project_dirs = project_dirs()?;
    let _log_guard = init_logging(&project_dirs)?;

    let mut config = match &args.config {
        Some(path) => Config::load_required(path)?,
        None => Config::load(&Config::default_path(&project_dirs))?,
    };
    args.apply_to(&mut config)?;

    let glyphs = load_glyphs(&config);
    let provider = PdfiumProvider::new()?;
    let writer = provider.writer();
    let mut session = Session::new(config, glyphs);

    if let Some(path) = &args.file {
        session
            .open_with(&provider, path)
            .with_context(|| format!("failed to open {:?}", path))?;
    }

    let _raw = RawModeGuard::new()?;
    let mut app = App {
        session,
        provider,
        writer,
        renderer: KittyRenderer::new(io::stdout()),
        mapper: EventMapper::new(),
        geometry: Geometry::current()?,
        message: None,
    };
    app.run()?;
    app.renderer.clear_all()?;
    Ok(())
}

enum LoopAction {
    Continue,
    ContinueRedraw,
    Quit,
}

/// Terminal layout: the image occupies every row but the last, which holds
/// the status line.
#[derive(Debug, Clone, Copy)]
struct Geometry {
    columns: u16,
    image_rows: u16,
    cells: CellSize,
}

impl Geometry {
    fn current() -> Result<Self> {
        let window = terminal::window_size()?;
        Ok(Self::from_window(
            window.width,
            window.height,
            window.columns,
            window.rows,
        ))
    }

    fn from_window(pixel_width: u16, pixel_height: u16, columns: u16, rows: u16) -> Self {
        Self {
            columns: columns.max(1),
            image_rows: rows.saturating_sub(1).max(1),
            cells: CellSize::from_window(pixel_width, pixel_height, columns, rows),
        }
    }

    fn frame_size(&self) -> (u32, u32) {
        let width = (f32::from(self.columns) * self.cells.width).round() as u32;
        let height = (f32::from(self.image_rows) * self.cells.height).round() as u32;
        (width.max(1), height.max(1))
    }

    /// Viewport pixel under a mouse cell, or `None` on the status row.
    fn cell_to_viewport(&self, column: u16, row: u16) -> Option<(f32, f32)> {
        (row < self.image_rows).then(|| self.cells.to_pixels(column, row))
    }
}

struct App {
    session: Session,
    provider: PdfiumProvider,
    writer: PdfiumWriter,
    renderer: KittyRenderer<Stdout>,
    mapper: EventMapper,
    geometry: Geometry,
    message: Option<String>,
}

impl App {
    fn run(&mut self) -> Result<()> {
        self.fit_viewport();
        self.renderer.clear_all()?;
        let mut dirty = true;

        loop {
            if dirty {
                self.redraw()?;
                dirty = false;
            }

            if event::poll(Duration::from_millis(100))? {
                let ui_event = self.mapper.map_event(event::read()?);
                match self.handle_event(ui_event)? {
                    LoopAction::ContinueRedraw => dirty = true,
                    LoopAction::Continue => {}
                    LoopAction::Quit => break,
                }
                if self.absorb_session_events() {
                    dirty = true;
                }
            }
        }
        Ok(())
    }

    fn handle_event(&mut self, event: UiEvent) -> Result<LoopAction> {
        match event {
            UiEvent::Command(command) => {
                self.session.apply(command);
                Ok(LoopAction::ContinueRedraw)
            }
            UiEvent::PointerDown { column, row } => {
                let Some((x, y)) = self.geometry.cell_to_viewport(column, row) else {
                    return Ok(LoopAction::Continue);
                };
                let offset = self.session.viewport().offset;
                Ok(repaint_action(self.session.pointer_down_at(x, y + offset)))
            }
            UiEvent::PointerDrag { column, row } => {
                let Some((x, y)) = self.geometry.cell_to_viewport(column, row) else {
                    return Ok(LoopAction::Continue);
                };
                let offset = self.session.viewport().offset;
                Ok(repaint_action(self.session.pointer_move_at(x, y + offset)))
            }
            UiEvent::PointerUp => Ok(repaint_action(self.session.pointer_up())),
            UiEvent::BeginPrompt { kind } => {
                if kind == PromptKind::Save {
                    if let Some(path) = self.session.default_save_path() {
                        self.mapper.fill_prompt(&path.to_string_lossy());
                    }
                }
                Ok(LoopAction::ContinueRedraw)
            }
            UiEvent::PromptChanged { .. } => Ok(LoopAction::ContinueRedraw),
            UiEvent::PromptCancel => Ok(LoopAction::ContinueRedraw),
            UiEvent::PromptSubmit { kind, input } => {
                self.submit_prompt(kind, prompt_value(kind, &input));
                Ok(LoopAction::ContinueRedraw)
            }
            UiEvent::Resize { .. } => {
                self.geometry = Geometry::current()?;
                self.fit_viewport();
                self.renderer.clear_all()?;
                Ok(LoopAction::ContinueRedraw)
            }
            UiEvent::Quit => Ok(LoopAction::Quit),
            UiEvent::None => Ok(LoopAction::Continue),
        }
    }

    fn submit_prompt(&mut self, kind: PromptKind, input: &str) {
        match kind {
            PromptKind::Text => {
                self.session.apply(Command::AddText {
                    text: input.to_owned(),
                });
                if !input.is_empty() {
                    self.message = Some("click a page to place the text".to_owned());
                }
            }
            PromptKind::Open if input.is_empty() => {}
            PromptKind::Open => {
                if let Err(err) = self.session.open_with(&self.provider, Path::new(input)) {
                    warn!(error = %err, "open failed");
                    self.message = Some(format!("{:#}", anyhow::Error::new(err)));
                }
            }
            PromptKind::Save if input.is_empty() => {}
            PromptKind::Save => {
                if let Err(err) = self.session.save(&self.writer, Path::new(input)) {
                    warn!(error = %err, "save failed");
                    self.message = Some(format!("{:#}", anyhow::Error::new(err)));
                }
            }
            PromptKind::PenColor | PromptKind::PenWidth => match pen_command(kind, input) {
                Ok(Some(command)) => {
                    self.session.apply(command);
                }
                Ok(None) => {}
                Err(err) => self.message = Some(format!("{:#}", err)),
            },
        }
    }

    /// Turns queued session events into status messages; returns whether any arrived.
    fn absorb_session_events(&mut self) -> bool {
        let events = self.session.drain_events();
        for event in &events {
            match event {
                SessionEvent::DocumentOpened { path, pages } => {
                    self.message = Some(format!("Opened {} ({} pages)", path.display(), pages));
                }
                SessionEvent::Saved { path, pages } => {
                    self.message = Some(format!("Saved {} pages to {}", pages, path.display()));
                }
                SessionEvent::PagesRendered(_)
                | SessionEvent::PageDirty(_)
                | SessionEvent::ZoomChanged { .. }
                | SessionEvent::Scrolled { .. } => {}
            }
        }
        !events.is_empty()
    }

    fn fit_viewport(&mut self) {
        let (_, height) = self.geometry.frame_size();
        self.session.apply(Command::Resize {
            height: height as f32,
        });
    }

    fn redraw(&mut self) -> Result<()> {
        let (width, height) = self.geometry.frame_size();
        let viewport = self.session.viewport();
        let visible = visible_pages(&self.session);
        let frame = compose_frame(
            width,
            height,
            viewport.offset,
            visible.iter().map(|(extent, image)| (*extent, image)),
        );

        self.renderer.begin_sync_update()?;
        crossterm::execute!(self.renderer.writer(), cursor::MoveTo(0, 0))?;
        self.renderer.draw(
            &frame,
            DrawParams::clamped(
                u32::from(self.geometry.columns),
                u32::from(self.geometry.image_rows),
            ),
        )?;
        let status = format_status(
            &self.session,
            self.mapper.pending_input().as_deref(),
            self.message.as_deref(),
        );
        self.draw_status_line(&status)?;
        self.renderer.end_sync_update()?;
        Ok(())
    }

    fn draw_status_line(&mut self, status: &str) -> Result<()> {
        let row = self.geometry.image_rows;
        let width = usize::from(self.geometry.columns);
        let writer = self.renderer.writer();
        crossterm::execute!(
            writer,
            cursor::MoveTo(0, row),
            Clear(ClearType::CurrentLine)
        )?;
        write_status_line(writer, &truncate(status, width))?;
        Ok(())
    }
}

fn repaint_action(repaint: Repaint) -> LoopAction {
    if repaint.is_dirty() {
        LoopAction::ContinueRedraw
    } else {
        LoopAction::Continue
    }
}

/// Composed bitmaps of pages intersecting the viewport, with their placement.
fn visible_pages(session: &Session) -> Vec<(PageExtent, RgbImage)> {
    let viewport = session.viewport();
    let bottom = viewport.offset + viewport.height;
    session
        .extents()
        .into_iter()
        .enumerate()
        .filter(|(_, extent)| extent.bottom() >= viewport.offset && extent.top <= bottom)
        .filter_map(|(index, extent)| {
            session
                .compose_page(index)
                .map(|image| (extent, image))
        })
        .collect()
}

/// Text stamps keep their input verbatim; paths and numbers are trimmed.
fn prompt_value(kind: PromptKind, input: &str) -> &str {
    match kind {
        PromptKind::Text => input,
        PromptKind::Open | PromptKind::Save | PromptKind::PenColor | PromptKind::PenWidth => {
            input.trim()
        }
    }
}

/// Parses a pen prompt. Empty input leaves the pen unchanged.
fn pen_command(kind: PromptKind, input: &str) -> Result<Option<Command>> {
    if input.is_empty() {
        return Ok(None);
    }
    match kind {
        PromptKind::PenColor => {
            let color = input
                .parse::<Color>()
                .with_context(|| format!("invalid pen colour {:?}", input))?;
            Ok(Some(Command::SetPenColor { color }))
        }
        PromptKind::PenWidth => {
            let width = input
                .parse::<f32>()
                .with_context(|| format!("invalid pen width {:?}", input))?;
            if !width.is_finite() || width <= 0.0 {
                return Err(anyhow!("pen width must be positive, got {}", width));
            }
            Ok(Some(Command::SetPenWidth { width }))
        }
        PromptKind::Text | PromptKind::Open | PromptKind::Save => Ok(None),
    }
}

/// Document title when the file carries one, otherwise its file name.
fn document_label(info: &DocumentInfo) -> String {
    match info.metadata.title.as_deref().map(str::trim) {
        Some(title) if !title.is_empty() => title.to_owned(),
        _ => info
            .path
            .file_name()
            .and_then(|name| name.to_str())
            .unwrap_or("<unknown>")
            .to_owned(),
    }
}

fn format_status(session: &Session, pending_input: Option<&str>, message: Option<&str>) -> String {
    if let Some(pending) = pending_input {
        return pending.to_owned();
    }

    let mut parts = Vec::new();
    match session.document_info() {
        Some(info) => {
            parts.push(document_label(info));
            let page = session.current_page().map_or(0, |page| page + 1);
            parts.push(format!("page {}/{}", page, info.page_count()));
        }
        None => parts.push("no document (o to open)".to_owned()),
    }
    parts.push(format!("{:.0}%", session.scale() * 100.0));
    let ctx = session.editing_context();
    parts.push(match ctx.tool {
        Tool::Pen => format!("pen {} {}px", ctx.pen_color, ctx.pen_width),
        Tool::Eraser => format!("eraser {}px", ctx.pen_width * ctx.eraser_multiplier),
    });
    if let Some(text) = session.pending_text() {
        parts.push(format!("text \"{}\"", text));
    }
    if let Some(message) = message {
        parts.push(message.to_owned());
    }
    parts.join(" | ")
}

fn truncate(text: &str, width: usize) -> String {
    if text.chars().count() <= width {
        return text.to_owned();
    }
    if width <= 3 {
        return text.chars().take(width).collect();
    }
    let mut truncated: String = text.chars().take(width - 3).collect();
    truncated.push_str("...");
    truncated
}

fn load_glyphs(config: &Config) -> Box<dyn GlyphRasterizer> {
    match FontdueRasterizer::discover(
        config.font_path.as_deref(),
        config.bold_font_path.as_deref(),
    ) {
        Ok(rasterizer) => Box::new(rasterizer),
        Err(err) => {
            warn!("text stamps and page labels disabled: {:#}", err);
            Box::new(NoGlyphs)
        }
    }
}

fn init_logging(project_dirs: &ProjectDirs) -> Result<WorkerGuard> {
    let log_dir = project_dirs.data_local_dir().join("logs");
    fs::create_dir_all(&log_dir)
        .with_context(|| format!("failed to create log directory {:?}", log_dir))?;

    let file_appender = tracing_appender::rolling::never(&log_dir, "inkpdf.log");
    let (file_writer, guard) = tracing_appender::non_blocking(file_appender);
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let file_layer = tracing_subscriber::fmt::layer()
        .with_ansi(false)
        .with_writer(file_writer);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(file_layer)
        .try_init()
        .map_err(|err| anyhow!(err))?;

    info!(log_dir = %log_dir.display(), "logging initialised");
    Ok(guard)
}

#[cfg(test)]
mod tests {
    use super::*;
    use inkpdf_core::{DocumentMetadata, PageSize};

    #[test]
    fn geometry_reserves_status_row() {
        let geometry = Geometry::from_window(800, 480, 100, 30);
        assert_eq!(geometry.image_rows, 29);
        assert_eq!(geometry.frame_size(), (800, 464));
        assert_eq!(geometry.cell_to_viewport(0, 0), Some((4.0, 8.0)));
        assert_eq!(geometry.cell_to_viewport(3, 29), None);
    }

    #[test]
    fn truncate_adds_ellipsis_only_when_needed() {
        assert_eq!(truncate("short", 10), "short");
        assert_eq!(truncate("a long status line", 9), "a long...");
        assert_eq!(truncate("abcdef", 2), "ab");
    }

    #[test]
    fn status_without_document_prompts_to_open() {
        let session = Session::new(Config::default(), Box::new(NoGlyphs));
        let status = format_status(&session, None, Some("hello"));
        assert_eq!(status, "no document (o to open) | 200% | pen #000000 4px | hello");
        assert_eq!(format_status(&session, Some("open: /tmp"), None), "open: /tmp");
    }

    #[test]
    fn status_prefers_document_title_over_file_name() {
        let mut info = DocumentInfo {
            path: PathBuf::from("/tmp/report-final.pdf"),
            page_sizes: vec![PageSize {
                width: 100.0,
                height: 200.0,
            }],
            metadata: DocumentMetadata::default(),
        };
        assert_eq!(document_label(&info), "report-final.pdf");

        info.metadata.title = Some("   ".to_owned());
        assert_eq!(document_label(&info), "report-final.pdf");

        info.metadata.title = Some("Quarterly Report".to_owned());
        assert_eq!(document_label(&info), "Quarterly Report");
    }

    #[test]
    fn only_path_and_number_prompts_are_trimmed() {
        assert_eq!(prompt_value(PromptKind::Text, "  two words  "), "  two words  ");
        assert_eq!(prompt_value(PromptKind::Open, " /tmp/a.pdf\t"), "/tmp/a.pdf");
        assert_eq!(prompt_value(PromptKind::Save, " out.pdf "), "out.pdf");
        assert_eq!(prompt_value(PromptKind::PenWidth, " 3 "), "3");
    }

    #[test]
    fn pen_prompts_build_commands() {
        assert_eq!(
            pen_command(PromptKind::PenColor, "#00ff00").unwrap(),
            Some(Command::SetPenColor {
                color: Color::rgb(0, 255, 0)
            })
        );
        assert_eq!(
            pen_command(PromptKind::PenWidth, "2.5").unwrap(),
            Some(Command::SetPenWidth { width: 2.5 })
        );
        assert_eq!(pen_command(PromptKind::PenWidth, "").unwrap(), None);
        assert!(pen_command(PromptKind::PenWidth, "-1").is_err());
        assert!(pen_command(PromptKind::PenWidth, "wide").is_err());
        assert!(pen_command(PromptKind::PenColor, "blue").is_err());

        let mut session = Session::new(Config::default(), Box::new(NoGlyphs));
        if let Some(command) = pen_command(PromptKind::PenWidth, "9").unwrap() {
            session.apply(command);
        }
        assert_eq!(session.editing_context().pen_width, 9.0);
    }

    #[test]
    fn args_override_config_and_are_validated() {
        let args = Args::parse_from(["inkpdf", "--scale", "1.5", "--pen-color", "#ff0000"]);
        let mut config = Config::default();
        args.apply_to(&mut config).unwrap();
        assert_eq!(config.initial_scale, 1.5);
        assert_eq!(config.pen_color, Color::rgb(255, 0, 0));

        let args = Args::parse_from(["inkpdf", "--pen-width", "0"]);
        assert!(args.apply_to(&mut Config::default()).is_err());
        assert!(Args::try_parse_from(["inkpdf", "--pen-color", "red"]).is_err());
    }
}
