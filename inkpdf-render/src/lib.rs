#[cfg(feature = "pdf")]
mod pdf;
mod text;

#[cfg(feature = "pdf")]
pub use pdf::{PdfiumDocument, PdfiumProvider, PdfiumWriter};
pub use text::{FontdueRasterizer, FONT_ENV};
