//! The editing session: one open document, its pages, and the shared tool,
//! text and zoom state that toolbar actions mutate.

use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::Context;
use image::RgbImage;
use thiserror::Error;
use tracing::{info, instrument, warn};

use crate::canvas::{EditingContext, PageCanvas, Repaint, Tool};
use crate::config::Config;
use crate::export::{ExportAssembler, ExportedDocument};
use crate::render_cache::{self, PageRenderer};
use crate::scheduler::{PageExtent, PageLayout, Viewport, VisibilityScheduler};
use crate::zoom::ZoomController;
use crate::{
    Color, DocumentBackend, DocumentInfo, DocumentProvider, DocumentWriter, GlyphRasterizer,
    Point,
};

type BoxedError = Box<dyn std::error::Error + Send + Sync + 'static>;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("cannot open {}", path.display())]
    Open {
        path: PathBuf,
        #[source]
        source: BoxedError,
    },
    #[error("cannot save {}", path.display())]
    Save {
        path: PathBuf,
        #[source]
        source: BoxedError,
    },
    #[error("no document is open")]
    NoDocument,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    ScrollBy { delta: f32 },
    ScrollTo { offset: f32 },
    Resize { height: f32 },
    SetTool { tool: Tool },
    AddText { text: String },
    SetPenColor { color: Color },
    SetPenWidth { width: f32 },
    ClearAll,
    ZoomIn,
    ZoomOut,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    DocumentOpened { path: PathBuf, pages: usize },
    PagesRendered(Vec<usize>),
    PageDirty(usize),
    ZoomChanged { scale: f32 },
    Scrolled { offset: f32 },
    Saved { path: PathBuf, pages: usize },
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HitTarget {
    pub page: usize,
    pub point: Point,
}

struct OpenDocument {
    backend: Box<dyn DocumentBackend>,
    pages: Vec<PageCanvas>,
}

pub struct Session {
    config: Config,
    glyphs: Box<dyn GlyphRasterizer>,
    document: Option<OpenDocument>,
    zoom: ZoomController,
    layout: PageLayout,
    scheduler: VisibilityScheduler,
    viewport: Viewport,
    tool: Tool,
    pending_text: Option<String>,
    pen_color: Color,
    pen_width: f32,
    active_stroke: Option<usize>,
    events: Vec<SessionEvent>,
}

impl Session {
    pub fn new(config: Config, glyphs: Box<dyn GlyphRasterizer>) -> Self {
        Self {
            zoom: config.zoom(),
            layout: config.layout(),
            scheduler: config.scheduler(),
            viewport: Viewport::default(),
            tool: Tool::Pen,
            pending_text: None,
            pen_color: config.pen_color,
            pen_width: config.pen_width,
            active_stroke: None,
            events: Vec::new(),
            document: None,
            glyphs,
            config,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn drain_events(&mut self) -> Vec<SessionEvent> {
        std::mem::take(&mut self.events)
    }

    /// Opens `path`, replacing the current document only on success.
    #[instrument(skip(self, provider))]
    pub fn open_with(
        &mut self,
        provider: &dyn DocumentProvider,
        path: &Path,
    ) -> Result<usize, SessionError> {
        let backend = provider.open(path).map_err(|err| SessionError::Open {
            path: path.to_path_buf(),
            source: err.into(),
        })?;
        let page_count = backend.info().page_count();
        let pages = (0..page_count).map(PageCanvas::new).collect();

        self.document = Some(OpenDocument { backend, pages });
        self.viewport.offset = 0.0;
        self.active_stroke = None;
        self.pending_text = None;
        info!(path = %path.display(), pages = page_count, "document opened");
        self.events.push(SessionEvent::DocumentOpened {
            path: path.to_path_buf(),
            pages: page_count,
        });
        self.on_scroll_or_resize();
        Ok(page_count)
    }

    pub fn document_info(&self) -> Option<&DocumentInfo> {
        self.document.as_ref().map(|doc| doc.backend.info())
    }

    pub fn pages(&self) -> &[PageCanvas] {
        self.document
            .as_ref()
            .map(|doc| doc.pages.as_slice())
            .unwrap_or(&[])
    }

    pub fn page(&self, index: usize) -> Option<&PageCanvas> {
        self.pages().get(index)
    }

    pub fn rendered_pages(&self) -> Vec<usize> {
        render_cache::rendered_pages(self.pages())
    }

    pub fn scale(&self) -> f32 {
        self.zoom.scale()
    }

    pub fn tool(&self) -> Tool {
        self.tool
    }

    pub fn pending_text(&self) -> Option<&str> {
        self.pending_text.as_deref()
    }

    pub fn viewport(&self) -> Viewport {
        self.viewport
    }

    pub fn editing_context(&self) -> EditingContext {
        let mut ctx = self.config.editing_context(self.tool, self.zoom.scale());
        ctx.pen_color = self.pen_color;
        ctx.pen_width = self.pen_width;
        ctx
    }

    pub fn apply(&mut self, command: Command) {
        match command {
            Command::ScrollBy { delta } => self.scroll_to(self.viewport.offset + delta),
            Command::ScrollTo { offset } => self.scroll_to(offset),
            Command::Resize { height } => self.resize(height),
            Command::SetTool { tool } => self.tool = tool,
            Command::AddText { text } => self.set_pending_text(text),
            Command::SetPenColor { color } => self.pen_color = color,
            Command::SetPenWidth { width } => {
                if width.is_finite() && width > 0.0 {
                    self.pen_width = width;
                } else {
                    warn!(width, "ignoring invalid pen width");
                }
            }
            Command::ClearAll => {
                self.clear_all();
            }
            Command::ZoomIn => {
                self.apply_zoom(self.config.zoom_in_step);
            }
            Command::ZoomOut => {
                self.apply_zoom(self.config.zoom_out_step);
            }
        }
    }

    /// Stores text for the next pointer-down on any page. Empty text cancels.
    pub fn set_pending_text(&mut self, text: String) {
        self.pending_text = if text.is_empty() { None } else { Some(text) };
    }

    pub fn extents(&self) -> Vec<PageExtent> {
        match &self.document {
            Some(doc) => {
                self.layout
                    .extents(&doc.pages, &doc.backend.info().page_sizes, self.zoom.scale())
            }
            None => Vec::new(),
        }
    }

    pub fn content_height(&self) -> f32 {
        self.layout.content_height(&self.extents())
    }

    /// Page whose extent is under the top of the viewport.
    pub fn current_page(&self) -> Option<usize> {
        self.layout
            .page_at_offset(&self.extents(), self.viewport.offset)
    }

    pub fn hit_test(&self, x: f32, y: f32) -> Option<HitTarget> {
        self.layout
            .hit_test(&self.extents(), x, y)
            .map(|(page, point)| HitTarget { page, point })
    }

    pub fn resize(&mut self, height: f32) {
        self.viewport.height = height.max(0.0);
        self.scroll_to(self.viewport.offset);
    }

    pub fn scroll_to(&mut self, offset: f32) {
        let max_offset = (self.content_height() - self.viewport.height).max(0.0);
        let offset = if offset.is_finite() { offset } else { 0.0 };
        let clamped = offset.clamp(0.0, max_offset);
        if (clamped - self.viewport.offset).abs() > f32::EPSILON {
            self.viewport.offset = clamped;
            self.events.push(SessionEvent::Scrolled { offset: clamped });
        }
        self.on_scroll_or_resize();
    }

    /// Rasterizes every near-visible page that lacks a base bitmap.
    pub fn on_scroll_or_resize(&mut self) -> Vec<usize> {
        let Some(doc) = self.document.as_mut() else {
            return Vec::new();
        };
        let renderer = PageRenderer::new(doc.backend.as_ref());
        let rendered = self.scheduler.on_scroll_or_resize(
            &mut doc.pages,
            &doc.backend.info().page_sizes,
            &renderer,
            &self.layout,
            self.viewport,
            self.zoom.scale(),
        );
        if !rendered.is_empty() {
            self.events
                .push(SessionEvent::PagesRendered(rendered.clone()));
        }
        rendered
    }

    /// Multiplies the scale, drops every base bitmap if it changed, then
    /// re-renders whatever is near-visible at the new scale.
    pub fn apply_zoom(&mut self, multiplier: f32) -> bool {
        let pages: &mut [PageCanvas] = match self.document.as_mut() {
            Some(doc) => doc.pages.as_mut_slice(),
            None => &mut [],
        };
        if !self.zoom.apply_zoom(multiplier, pages) {
            return false;
        }
        self.events.push(SessionEvent::ZoomChanged {
            scale: self.zoom.scale(),
        });
        self.scroll_to(self.viewport.offset);
        true
    }

    pub fn pointer_down(&mut self, page: usize, point: Point) -> Repaint {
        let ctx = self.editing_context();
        let Some(doc) = self.document.as_mut() else {
            return Repaint::Clean;
        };
        if let Some(previous) = self.active_stroke.take() {
            if let Some(canvas) = doc.pages.get_mut(previous) {
                let _ = canvas.pointer_up();
            }
        }
        let Some(canvas) = doc.pages.get_mut(page) else {
            return Repaint::Clean;
        };
        // an unrendered page has no overlay to stamp into; keep the text pending
        let stamp = if canvas.is_rendered() {
            self.pending_text.take()
        } else {
            None
        };
        let repaint = canvas.pointer_down(point, &ctx, stamp.as_deref(), self.glyphs.as_ref());
        self.active_stroke = Some(page);
        if repaint.is_dirty() {
            self.events.push(SessionEvent::PageDirty(page));
        }
        repaint
    }

    /// Continues the stroke on the page that received the pointer-down.
    pub fn pointer_move(&mut self, point: Point) -> Repaint {
        let ctx = self.editing_context();
        let Some(page) = self.active_stroke else {
            return Repaint::Clean;
        };
        let Some(canvas) = self
            .document
            .as_mut()
            .and_then(|doc| doc.pages.get_mut(page))
        else {
            return Repaint::Clean;
        };
        let repaint = canvas.pointer_move(point, &ctx);
        if repaint.is_dirty() {
            self.events.push(SessionEvent::PageDirty(page));
        }
        repaint
    }

    pub fn pointer_up(&mut self) -> Repaint {
        let Some(page) = self.active_stroke.take() else {
            return Repaint::Clean;
        };
        match self
            .document
            .as_mut()
            .and_then(|doc| doc.pages.get_mut(page))
        {
            Some(canvas) => canvas.pointer_up(),
            None => Repaint::Clean,
        }
    }

    /// Pointer-down at content-space coordinates; ignored between pages.
    pub fn pointer_down_at(&mut self, x: f32, y: f32) -> Repaint {
        match self.hit_test(x, y) {
            Some(target) => self.pointer_down(target.page, target.point),
            None => Repaint::Clean,
        }
    }

    /// Pointer-move at content-space coordinates, made local to the grabbed page.
    pub fn pointer_move_at(&mut self, x: f32, y: f32) -> Repaint {
        let Some(page) = self.active_stroke else {
            return Repaint::Clean;
        };
        let Some(extent) = self.extents().get(page).copied() else {
            return Repaint::Clean;
        };
        self.pointer_move(extent.to_local(x, y))
    }

    pub fn clear_all(&mut self) -> usize {
        let Some(doc) = self.document.as_mut() else {
            return 0;
        };
        let mut cleared = 0;
        for canvas in &mut doc.pages {
            if canvas.clear_overlay().is_dirty() {
                self.events.push(SessionEvent::PageDirty(canvas.index()));
                cleared += 1;
            }
        }
        cleared
    }

    pub fn compose_page(&self, index: usize) -> Option<RgbImage> {
        self.page(index)?
            .compose(self.glyphs.as_ref(), self.config.label_size)
    }

    /// `<stem>_edited.pdf` next to the open document.
    pub fn default_save_path(&self) -> Option<PathBuf> {
        let path = &self.document_info()?.path;
        let stem = path.file_stem()?.to_string_lossy();
        Some(path.with_file_name(format!("{}_edited.pdf", stem)))
    }

    pub fn export(&self, writer: &dyn DocumentWriter) -> anyhow::Result<ExportedDocument> {
        let doc = self
            .document
            .as_ref()
            .ok_or(SessionError::NoDocument)?;
        ExportAssembler::new(writer, self.glyphs.as_ref(), self.config.export_options())
            .export_document(&doc.pages)
    }

    #[instrument(skip(self, writer))]
    pub fn save(
        &mut self,
        writer: &dyn DocumentWriter,
        path: &Path,
    ) -> Result<ExportedDocument, SessionError> {
        if self.document.is_none() {
            return Err(SessionError::NoDocument);
        }
        let save_error = |err: anyhow::Error| SessionError::Save {
            path: path.to_path_buf(),
            source: err.into(),
        };
        let exported = self.export(writer).map_err(save_error)?;
        write_atomically(path, &exported.bytes).map_err(save_error)?;
        info!(path = %path.display(), pages = exported.pages.len(), "document saved");
        self.events.push(SessionEvent::Saved {
            path: path.to_path_buf(),
            pages: exported.pages.len(),
        });
        Ok(exported)
    }
}

fn write_atomically(path: &Path, bytes: &[u8]) -> anyhow::Result<()> {
    let tmp = path.with_extension("pdf.tmp");
    let result = write_then_rename(&tmp, path, bytes);
    if result.is_err() {
        let _ = fs::remove_file(&tmp);
    }
    result
}

fn write_then_rename(tmp: &Path, path: &Path, bytes: &[u8]) -> anyhow::Result<()> {
    let mut file = File::create(tmp).with_context(|| format!("failed to create {:?}", tmp))?;
    file.write_all(bytes)
        .with_context(|| format!("failed to write {:?}", tmp))?;
    file.flush()?;
    fs::rename(tmp, path).with_context(|| format!("failed to move output to {:?}", path))?;
    Ok(())
}
