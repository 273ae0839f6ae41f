use std::io::{self, Write};

use anyhow::Result;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use crossterm::{
    cursor,
    event::{Event, KeyCode, KeyEvent, KeyModifiers, MouseButton, MouseEvent, MouseEventKind},
    terminal::{Clear, ClearType},
};
use image::{imageops, Rgb, RgbImage};
use inkpdf_core::{Command, PageExtent, Tool};
use png::{BitDepth, ColorType, Encoder};
use tracing::trace;

/// Backdrop behind and between pages.
pub const BACKDROP: Rgb<u8> = Rgb([64, 64, 64]);

pub struct KittyRenderer<W: Write> {
    writer: W,
    image_id: u32,
    placement_id: u32,
}

pub struct DrawParams {
    pub columns: u32,
    pub rows: u32,
}

impl DrawParams {
    pub fn clamped(columns: u32, rows: u32) -> Self {
        Self {
            columns: columns.max(1),
            rows: rows.max(1),
        }
    }
}

impl<W: Write> KittyRenderer<W> {
    pub fn new(writer: W) -> Self {
        Self {
            writer,
            image_id: 1,
            placement_id: 1,
        }
    }

    pub fn writer(&mut self) -> &mut W {
        &mut self.writer
    }

    /// Transmits `frame` as PNG and places it over `params` cells at the cursor.
    pub fn draw(&mut self, frame: &RgbImage, params: DrawParams) -> Result<()> {
        let mut buffer = Vec::new();
        let mut encoder = Encoder::new(&mut buffer, frame.width(), frame.height());
        encoder.set_color(ColorType::Rgb);
        encoder.set_depth(BitDepth::Eight);
        let mut png = encoder.write_header()?;
        png.write_image_data(frame.as_raw())?;
        png.finish()?;
        trace!(bytes = buffer.len(), "encoded frame");

        let encoded = BASE64.encode(&buffer);
        let mut chunks = encoded.as_bytes().chunks(4096).peekable();
        let mut first = true;

        while let Some(chunk) = chunks.next() {
            let more = u8::from(chunks.peek().is_some());
            if first {
                write!(
                    self.writer,
                    "\u{1b}_Ga=T,f=100,C=1,q=2,i={},p={},c={},r={},s={},v={},z=-1,m={}",
                    self.image_id,
                    self.placement_id,
                    params.columns,
                    params.rows,
                    frame.width(),
                    frame.height(),
                    more
                )?;
                first = false;
            } else {
                write!(self.writer, "\u{1b}_Gm={},q=2", more)?;
            }
            if !chunk.is_empty() {
                self.writer.write_all(b";")?;
                self.writer.write_all(chunk)?;
            }
            write!(self.writer, "\u{1b}\\")?;
        }

        self.writer.flush()?;
        Ok(())
    }

    pub fn begin_sync_update(&mut self) -> Result<()> {
        write!(self.writer, "\u{1b}[?2026h")?;
        Ok(())
    }

    pub fn end_sync_update(&mut self) -> Result<()> {
        write!(self.writer, "\u{1b}[?2026l")?;
        self.writer.flush()?;
        Ok(())
    }

    pub fn clear_all(&mut self) -> Result<()> {
        crossterm::execute!(
            &mut self.writer,
            Clear(ClearType::All),
            cursor::MoveTo(0, 0)
        )?;
        Ok(())
    }
}

/// Paints composed pages into a `width`x`height` frame whose top edge sits at
/// content offset `offset`. Pages outside the frame are clipped.
pub fn compose_frame<'a, I>(width: u32, height: u32, offset: f32, pages: I) -> RgbImage
where
    I: IntoIterator<Item = (PageExtent, &'a RgbImage)>,
{
    let mut frame = RgbImage::from_pixel(width.max(1), height.max(1), BACKDROP);
    for (extent, image) in pages {
        let x = extent.left.round() as i64;
        let y = (extent.top - offset).round() as i64;
        imageops::replace(&mut frame, image, x, y);
    }
    frame
}

/// Terminal cell geometry used to map mouse cells onto frame pixels.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CellSize {
    pub width: f32,
    pub height: f32,
}

impl CellSize {
    /// Derives cell size from the window's pixel and cell dimensions, falling
    /// back to a common 8x16 cell when the terminal reports no pixel size.
    pub fn from_window(pixel_width: u16, pixel_height: u16, columns: u16, rows: u16) -> Self {
        if pixel_width == 0 || pixel_height == 0 || columns == 0 || rows == 0 {
            return Self {
                width: 8.0,
                height: 16.0,
            };
        }
        Self {
            width: f32::from(pixel_width) / f32::from(columns),
            height: f32::from(pixel_height) / f32::from(rows),
        }
    }

    /// Centre of the cell in frame pixels.
    pub fn to_pixels(self, column: u16, row: u16) -> (f32, f32) {
        (
            (f32::from(column) + 0.5) * self.width,
            (f32::from(row) + 0.5) * self.height,
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromptKind {
    Text,
    Open,
    Save,
    PenColor,
    PenWidth,
}

impl PromptKind {
    pub fn label(self) -> &'static str {
        match self {
            PromptKind::Text => "text",
            PromptKind::Open => "open",
            PromptKind::Save => "save as",
            PromptKind::PenColor => "pen colour",
            PromptKind::PenWidth => "pen width",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum UiEvent {
    Command(Command),
    PointerDown { column: u16, row: u16 },
    PointerDrag { column: u16, row: u16 },
    PointerUp,
    BeginPrompt { kind: PromptKind },
    PromptChanged { input: String },
    PromptSubmit { kind: PromptKind, input: String },
    PromptCancel,
    Resize { columns: u16, rows: u16 },
    Quit,
    None,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum InputMode {
    #[default]
    Normal,
    Prompt(PromptKind),
}

#[derive(Debug, Default)]
pub struct EventMapper {
    pending_count: Option<usize>,
    pending_digits: String,
    mode: InputMode,
    prompt_buffer: String,
}

impl EventMapper {
    pub const SCROLL_STEP: f32 = 60.0;
    pub const WHEEL_STEP: f32 = 120.0;

    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_mode(&mut self, mode: InputMode) {
        if self.mode != mode {
            self.reset_count();
            self.prompt_buffer.clear();
            self.mode = mode;
        }
    }

    pub fn mode(&self) -> InputMode {
        self.mode
    }

    /// Replaces the prompt input, e.g. to pre-fill a suggested save path.
    pub fn fill_prompt(&mut self, input: &str) {
        if matches!(self.mode, InputMode::Prompt(_)) {
            self.prompt_buffer = input.to_owned();
        }
    }

    pub fn map_event(&mut self, event: Event) -> UiEvent {
        match event {
            Event::Resize(columns, rows) => UiEvent::Resize { columns, rows },
            Event::Mouse(mouse) => match self.mode {
                InputMode::Normal => self.map_mouse(mouse),
                InputMode::Prompt(_) => UiEvent::None,
            },
            Event::Key(key) => match self.mode {
                InputMode::Normal => self.map_key_normal(key),
                InputMode::Prompt(kind) => self.map_key_prompt(kind, key),
            },
            _ => UiEvent::None,
        }
    }

    fn map_mouse(&mut self, mouse: MouseEvent) -> UiEvent {
        let MouseEvent {
            kind, column, row, ..
        } = mouse;
        match kind {
            MouseEventKind::Down(MouseButton::Left) => UiEvent::PointerDown { column, row },
            MouseEventKind::Drag(MouseButton::Left) => UiEvent::PointerDrag { column, row },
            MouseEventKind::Up(MouseButton::Left) => UiEvent::PointerUp,
            MouseEventKind::ScrollDown => UiEvent::Command(Command::ScrollBy {
                delta: Self::WHEEL_STEP,
            }),
            MouseEventKind::ScrollUp => UiEvent::Command(Command::ScrollBy {
                delta: -Self::WHEEL_STEP,
            }),
            _ => UiEvent::None,
        }
    }

    fn map_key_normal(&mut self, key: KeyEvent) -> UiEvent {
        let KeyEvent {
            code, modifiers, ..
        } = key;
        match (code, modifiers) {
            (KeyCode::Char(c), KeyModifiers::NONE) if c.is_ascii_digit() => {
                if let Some(digit) = c.to_digit(10) {
                    self.push_digit(digit as usize);
                }
                UiEvent::None
            }
            (KeyCode::Char('j'), KeyModifiers::NONE) | (KeyCode::Down, KeyModifiers::NONE) => {
                self.scroll(Self::SCROLL_STEP)
            }
            (KeyCode::Char('k'), KeyModifiers::NONE) | (KeyCode::Up, KeyModifiers::NONE) => {
                self.scroll(-Self::SCROLL_STEP)
            }
            (KeyCode::Char('d'), modifiers) if modifiers.contains(KeyModifiers::CONTROL) => {
                self.scroll(Self::SCROLL_STEP * 8.0)
            }
            (KeyCode::Char('u'), modifiers) if modifiers.contains(KeyModifiers::CONTROL) => {
                self.scroll(-Self::SCROLL_STEP * 8.0)
            }
            (KeyCode::PageDown, _) => self.scroll(Self::SCROLL_STEP * 8.0),
            (KeyCode::PageUp, _) => self.scroll(-Self::SCROLL_STEP * 8.0),
            (KeyCode::Char('g'), KeyModifiers::NONE) | (KeyCode::Home, _) => {
                self.reset_count();
                UiEvent::Command(Command::ScrollTo { offset: 0.0 })
            }
            (KeyCode::Char('G'), _) | (KeyCode::End, _) => {
                self.reset_count();
                UiEvent::Command(Command::ScrollTo { offset: f32::MAX })
            }
            (KeyCode::Char('+'), _) | (KeyCode::Char('='), _) => {
                self.reset_count();
                UiEvent::Command(Command::ZoomIn)
            }
            (KeyCode::Char('-'), _) => {
                self.reset_count();
                UiEvent::Command(Command::ZoomOut)
            }
            (KeyCode::Char('p'), KeyModifiers::NONE) => {
                self.reset_count();
                UiEvent::Command(Command::SetTool { tool: Tool::Pen })
            }
            (KeyCode::Char('e'), KeyModifiers::NONE) => {
                self.reset_count();
                UiEvent::Command(Command::SetTool { tool: Tool::Eraser })
            }
            (KeyCode::Char('c'), KeyModifiers::NONE) => {
                self.reset_count();
                UiEvent::Command(Command::ClearAll)
            }
            (KeyCode::Char('a'), KeyModifiers::NONE) | (KeyCode::Char('t'), KeyModifiers::NONE) => {
                self.begin_prompt(PromptKind::Text)
            }
            (KeyCode::Char('o'), KeyModifiers::NONE) => self.begin_prompt(PromptKind::Open),
            (KeyCode::Char('s'), KeyModifiers::NONE) => self.begin_prompt(PromptKind::Save),
            (KeyCode::Char('i'), KeyModifiers::NONE) => self.begin_prompt(PromptKind::PenColor),
            (KeyCode::Char('w'), KeyModifiers::NONE) => self.begin_prompt(PromptKind::PenWidth),
            (KeyCode::Esc, _) => {
                self.reset_count();
                UiEvent::Command(Command::AddText {
                    text: String::new(),
                })
            }
            (KeyCode::Char('q'), _) => {
                self.reset_count();
                UiEvent::Quit
            }
            (KeyCode::Char('c'), modifiers) if modifiers.contains(KeyModifiers::CONTROL) => {
                UiEvent::Quit
            }
            _ => {
                self.reset_count();
                UiEvent::None
            }
        }
    }

    fn map_key_prompt(&mut self, kind: PromptKind, key: KeyEvent) -> UiEvent {
        let KeyEvent {
            code, modifiers, ..
        } = key;
        match (code, modifiers) {
            (KeyCode::Esc, _) => {
                self.set_mode(InputMode::Normal);
                UiEvent::PromptCancel
            }
            (KeyCode::Enter, _) => {
                let input = std::mem::take(&mut self.prompt_buffer);
                self.set_mode(InputMode::Normal);
                UiEvent::PromptSubmit { kind, input }
            }
            (KeyCode::Backspace, _) => {
                self.prompt_buffer.pop();
                UiEvent::PromptChanged {
                    input: self.prompt_buffer.clone(),
                }
            }
            (KeyCode::Char(c), mods) if mods.is_empty() || mods == KeyModifiers::SHIFT => {
                self.prompt_buffer.push(c);
                UiEvent::PromptChanged {
                    input: self.prompt_buffer.clone(),
                }
            }
            _ => UiEvent::None,
        }
    }

    fn begin_prompt(&mut self, kind: PromptKind) -> UiEvent {
        self.set_mode(InputMode::Prompt(kind));
        UiEvent::BeginPrompt { kind }
    }

    fn scroll(&mut self, step: f32) -> UiEvent {
        let count = self.take_count() as f32;
        UiEvent::Command(Command::ScrollBy {
            delta: step * count,
        })
    }

    fn push_digit(&mut self, digit: usize) {
        let current = self.pending_count.unwrap_or(0);
        let next = current.saturating_mul(10).saturating_add(digit);
        self.pending_count = Some(next);
        if let Some(c) = char::from_digit(digit as u32, 10) {
            self.pending_digits.push(c);
        }
    }

    fn take_count(&mut self) -> usize {
        let count = self
            .pending_count
            .take()
            .filter(|&count| count > 0)
            .unwrap_or(1);
        self.pending_digits.clear();
        count
    }

    fn reset_count(&mut self) {
        self.pending_count = None;
        self.pending_digits.clear();
    }

    /// Text to echo in the status line: the prompt being typed or a count prefix.
    pub fn pending_input(&self) -> Option<String> {
        if let InputMode::Prompt(kind) = self.mode {
            return Some(format!("{}: {}", kind.label(), self.prompt_buffer));
        }
        if self.pending_digits.is_empty() {
            None
        } else {
            Some(self.pending_digits.clone())
        }
    }
}

pub fn write_status_line<W: Write>(writer: &mut W, label: &str) -> io::Result<()> {
    write!(writer, "{}", label)?;
    writer.flush()
}
