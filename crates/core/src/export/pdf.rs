//! A4 layout of a Markdown document with the PDF built-in fonts.

use printpdf::{
    BuiltinFont, IndirectFontRef, Mm, PdfDocument, PdfDocumentReference, PdfLayerReference,
};
use pulldown_cmark::{Event, HeadingLevel, Options, Parser, Tag};
use std::fs::{self, File};
use std::io::BufWriter;
use std::path::Path;

use super::ExportError;

const PAGE_WIDTH: f32 = 210.0;
const PAGE_HEIGHT: f32 = 297.0;
const MARGIN: f32 = 20.0;
const PT_TO_MM: f32 = 0.3528;
const LIST_INDENT: f32 = 5.0;

#[derive(Clone, Copy, Debug, PartialEq)]
enum Style {
    Body,
    Heading(u8),
    Code,
}

impl Style {
    fn size(self) -> f32 {
        match self {
            Style::Body => 11.0,
            Style::Code => 9.5,
            Style::Heading(1) => 22.0,
            Style::Heading(2) => 17.0,
            Style::Heading(3) => 14.0,
            Style::Heading(_) => 12.0,
        }
    }

    /// Average glyph width as a fraction of the font size.
    fn char_width(self) -> f32 {
        match self {
            Style::Code => 0.6,
            _ => 0.5,
        }
    }

    fn line_height(self) -> f32 {
        self.size() * 1.4 * PT_TO_MM
    }

    fn max_chars(self, indent: f32) -> usize {
        let usable = PAGE_WIDTH - 2.0 * MARGIN - indent;
        let per_char = self.size() * self.char_width() * PT_TO_MM;
        ((usable / per_char) as usize).max(10)
    }
}

fn heading_number(level: HeadingLevel) -> u8 {
    match level {
        HeadingLevel::H1 => 1,
        HeadingLevel::H2 => 2,
        HeadingLevel::H3 => 3,
        HeadingLevel::H4 => 4,
        HeadingLevel::H5 => 5,
        HeadingLevel::H6 => 6,
    }
}

/// The built-in fonts only cover WinAnsi; typographic punctuation is folded
/// to ASCII and anything else outside Latin-1 becomes `?`.
fn builtin_safe(text: &str) -> String {
    text.chars()
        .map(|ch| match ch {
            '\u{2018}' | '\u{2019}' => '\'',
            '\u{201C}' | '\u{201D}' => '"',
            '\u{2013}' | '\u{2014}' => '-',
            '\u{2022}' => '*',
            '\u{2026}' => '.',
            '\t' => ' ',
            c if (c as u32) < 0x100 => c,
            _ => '?',
        })
        .collect()
}

pub(crate) fn wrap(text: &str, max_chars: usize) -> Vec<String> {
    let max_chars = max_chars.max(1);
    let mut lines = Vec::new();
    let mut current = String::new();
    let mut current_len = 0;

    for word in text.split_whitespace() {
        let mut word: Vec<char> = word.chars().collect();
        while word.len() > max_chars {
            if current_len > 0 {
                lines.push(std::mem::take(&mut current));
                current_len = 0;
            }
            let rest = word.split_off(max_chars);
            lines.push(word.into_iter().collect());
            word = rest;
        }
        let needed = if current_len == 0 { word.len() } else { word.len() + 1 };
        if current_len > 0 && current_len + needed > max_chars {
            lines.push(std::mem::take(&mut current));
            current_len = 0;
        }
        if current_len > 0 {
            current.push(' ');
            current_len += 1;
        }
        current.extend(word.iter());
        current_len += word.len();
    }
    if current_len > 0 {
        lines.push(current);
    }
    lines
}

struct PdfLayout {
    doc: PdfDocumentReference,
    layer: PdfLayerReference,
    regular: IndirectFontRef,
    bold: IndirectFontRef,
    mono: IndirectFontRef,
    cursor: f32,
    pages: usize,
}

impl PdfLayout {
    fn new(title: &str) -> Result<Self, ExportError> {
        let (doc, page, layer) =
            PdfDocument::new(builtin_safe(title), Mm(PAGE_WIDTH), Mm(PAGE_HEIGHT), "Page 1");
        let font = |font: BuiltinFont| {
            doc.add_builtin_font(font)
                .map_err(|err| ExportError::Pdf(err.to_string()))
        };
        let regular = font(BuiltinFont::Helvetica)?;
        let bold = font(BuiltinFont::HelveticaBold)?;
        let mono = font(BuiltinFont::Courier)?;
        let layer = doc.get_page(page).get_layer(layer);
        Ok(Self {
            doc,
            layer,
            regular,
            bold,
            mono,
            cursor: PAGE_HEIGHT - MARGIN,
            pages: 1,
        })
    }

    fn page_is_blank(&self) -> bool {
        self.cursor >= PAGE_HEIGHT - MARGIN
    }

    fn new_page(&mut self) {
        self.pages += 1;
        let (page, layer) = self.doc.add_page(
            Mm(PAGE_WIDTH),
            Mm(PAGE_HEIGHT),
            format!("Page {}", self.pages),
        );
        self.layer = self.doc.get_page(page).get_layer(layer);
        self.cursor = PAGE_HEIGHT - MARGIN;
    }

    fn gap(&mut self, mm: f32) {
        if !self.page_is_blank() {
            self.cursor -= mm;
        }
    }

    fn line(&mut self, text: &str, style: Style, indent: f32) {
        let height = style.line_height();
        if self.cursor - height < MARGIN {
            self.new_page();
        }
        self.cursor -= height;
        let font = match style {
            Style::Body => &self.regular,
            Style::Heading(_) => &self.bold,
            Style::Code => &self.mono,
        };
        self.layer.use_text(
            builtin_safe(text),
            style.size(),
            Mm(MARGIN + indent),
            Mm(self.cursor),
            font,
        );
    }

    fn paragraph(&mut self, text: &str, style: Style, indent: f32) {
        for line in wrap(text, style.max_chars(indent)) {
            self.line(&line, style, indent);
        }
    }

    fn save(self, path: &Path) -> Result<(), ExportError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|source| ExportError::CreateDir {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        let file = File::create(path).map_err(|source| ExportError::Write {
            path: path.to_path_buf(),
            source,
        })?;
        self.doc
            .save(&mut BufWriter::new(file))
            .map_err(|err| ExportError::Pdf(err.to_string()))
    }
}

/// Walks the Markdown event stream and feeds text blocks to the layout.
struct Renderer {
    layout: PdfLayout,
    buffer: String,
    style: Style,
    in_code: bool,
    list_depth: usize,
    seen_h1: bool,
}

impl Renderer {
    fn indent(&self) -> f32 {
        self.list_depth as f32 * LIST_INDENT
    }

    fn flush(&mut self) {
        let text = std::mem::take(&mut self.buffer);
        if !text.trim().is_empty() {
            let indent = self.indent();
            self.layout.paragraph(text.trim(), self.style, indent);
        }
    }

    fn event(&mut self, event: Event<'_>) {
        match event {
            Event::Start(Tag::Heading(level, _, _)) => {
                self.flush();
                let level = heading_number(level);
                // Chapters start on a fresh page.
                if level == 1 && self.seen_h1 && !self.layout.page_is_blank() {
                    self.layout.new_page();
                }
                self.seen_h1 |= level == 1;
                self.layout.gap(4.0);
                self.style = Style::Heading(level);
            }
            Event::End(Tag::Heading(..)) => {
                self.flush();
                self.layout.gap(2.0);
                self.style = Style::Body;
            }
            Event::End(Tag::Paragraph) => {
                self.flush();
                self.layout.gap(2.5);
            }
            Event::Start(Tag::CodeBlock(_)) => {
                self.flush();
                self.in_code = true;
            }
            Event::End(Tag::CodeBlock(_)) => {
                let code = std::mem::take(&mut self.buffer);
                let indent = self.indent() + 4.0;
                for line in code.lines() {
                    let chunks = wrap_code(line, Style::Code.max_chars(indent));
                    for chunk in chunks {
                        self.layout.line(&chunk, Style::Code, indent);
                    }
                }
                self.in_code = false;
                self.layout.gap(2.5);
            }
            Event::Start(Tag::List(_)) => {
                self.flush();
                self.list_depth += 1;
            }
            Event::End(Tag::List(_)) => {
                self.flush();
                self.list_depth = self.list_depth.saturating_sub(1);
                if self.list_depth == 0 {
                    self.layout.gap(2.5);
                }
            }
            Event::Start(Tag::Item) => {
                self.flush();
                self.buffer.push_str("- ");
            }
            Event::End(Tag::Item) => self.flush(),
            Event::Text(text) | Event::Code(text) => self.buffer.push_str(&text),
            Event::SoftBreak => self.buffer.push(if self.in_code { '\n' } else { ' ' }),
            Event::HardBreak => self.flush(),
            Event::Rule => {
                self.flush();
                self.layout.gap(4.0);
            }
            _ => {}
        }
    }
}

fn wrap_code(line: &str, max_chars: usize) -> Vec<String> {
    let chars: Vec<char> = line.chars().collect();
    if chars.is_empty() {
        return vec![String::new()];
    }
    chars
        .chunks(max_chars.max(1))
        .map(|chunk| chunk.iter().collect())
        .collect()
}

/// Renders `markdown` to an A4 PDF at `path`. Level-one headings after the
/// first start a new page.
pub fn render_markdown_pdf(title: &str, markdown: &str, path: &Path) -> Result<(), ExportError> {
    let mut renderer = Renderer {
        layout: PdfLayout::new(title)?,
        buffer: String::new(),
        style: Style::Body,
        in_code: false,
        list_depth: 0,
        seen_h1: false,
    };
    let options = Options::ENABLE_TABLES | Options::ENABLE_STRIKETHROUGH;
    for event in Parser::new_ext(markdown, options) {
        renderer.event(event);
    }
    renderer.flush();
    renderer.layout.save(path)
}
