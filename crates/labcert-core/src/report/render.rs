//! Report rendering.
//!
//! [`ReportRenderer`] is the seam between the archive and whatever turns
//! report data into PDF bytes. [`PdfReportRenderer`] is the built-in
//! implementation: a small PDF 1.4 writer laying out the certificate as
//! positioned Helvetica text over as many A4 pages as needed.

use std::io::Write;

use thiserror::Error;

use crate::models::ReportData;

/// Template name of the certificate of analysis.
pub const CERTIFICATE_TEMPLATE: &str = "certificate";

/// Rendering errors.
#[derive(Error, Debug)]
pub enum RenderError {
    #[error("Unknown template: {0}")]
    UnknownTemplate(String),

    #[error("Rendering failed: {0}")]
    Failed(String),

    #[error("PDF output error: {0}")]
    Io(#[from] std::io::Error),
}

/// Turns report data into a finished document.
pub trait ReportRenderer: Send + Sync {
    fn render(&self, template: &str, data: &ReportData) -> Result<Vec<u8>, RenderError>;
}

const PAGE_WIDTH: f32 = 595.0;
const PAGE_HEIGHT: f32 = 842.0;
const MARGIN: f32 = 50.0;
const LINE_HEIGHT: f32 = 15.0;
const FOOTER_Y: f32 = 30.0;
const WRAP_AT: usize = 92;

/// Table column x positions: parameter, result, norm, verdict.
const COLUMNS: [f32; 4] = [50.0, 230.0, 340.0, 480.0];
const COLUMN_CHARS: [usize; 4] = [32, 19, 24, 12];

#[derive(Debug, Clone, Copy, PartialEq)]
enum Font {
    Regular,
    Bold,
}

impl Font {
    fn resource(&self) -> &'static str {
        match self {
            Font::Regular => "/F1",
            Font::Bold => "/F2",
        }
    }
}

/// One laid-out line: cells at fixed x positions sharing a baseline.
#[derive(Debug, Clone)]
struct TextLine {
    cells: Vec<(f32, String)>,
    font: Font,
    size: f32,
}

impl TextLine {
    fn text(text: impl Into<String>) -> Self {
        Self {
            cells: vec![(MARGIN, text.into())],
            font: Font::Regular,
            size: 10.0,
        }
    }

    fn bold(text: impl Into<String>, size: f32) -> Self {
        Self {
            cells: vec![(MARGIN, text.into())],
            font: Font::Bold,
            size,
        }
    }

    fn row(cells: [&str; 4], font: Font) -> Self {
        Self {
            cells: COLUMNS
                .iter()
                .zip(cells.iter().zip(COLUMN_CHARS.iter()))
                .map(|(x, (text, max))| (*x, truncate(text, *max)))
                .collect(),
            font,
            size: 9.0,
        }
    }

    fn blank() -> Self {
        Self {
            cells: Vec::new(),
            font: Font::Regular,
            size: 10.0,
        }
    }
}

/// Built-in PDF renderer for the certificate template.
#[derive(Debug, Clone, Default)]
pub struct PdfReportRenderer;

impl PdfReportRenderer {
    pub fn new() -> Self {
        Self
    }
}

impl ReportRenderer for PdfReportRenderer {
    fn render(&self, template: &str, data: &ReportData) -> Result<Vec<u8>, RenderError> {
        if template != CERTIFICATE_TEMPLATE {
            return Err(RenderError::UnknownTemplate(template.to_string()));
        }
        let lines = certificate_lines(data);
        let pages = paginate(lines);
        write_pdf(&pages)
    }
}

fn certificate_lines(data: &ReportData) -> Vec<TextLine> {
    let sample = &data.sample;
    let requester = &data.requester;
    let mut lines = vec![
        TextLine::bold(data.lab_name.clone(), 16.0),
        TextLine::bold("Certificate of Analysis", 13.0),
        TextLine::blank(),
        TextLine::bold(format!("Sample {}", sample.code), 11.0),
        TextLine::text(format!("Type: {}", sample.sample_type.label())),
        TextLine::text(format!("Received: {}", sample.received_at.replace('T', " "))),
    ];
    if let Some(origin) = sample.origin.as_deref().filter(|s| !s.trim().is_empty()) {
        lines.extend(wrapped("Origin: ", origin));
    }
    if let Some(transport) = sample
        .transport_conditions
        .as_deref()
        .filter(|s| !s.trim().is_empty())
    {
        lines.extend(wrapped("Transport conditions: ", transport));
    }

    lines.push(TextLine::blank());
    lines.push(TextLine::bold("Requester", 11.0));
    lines.push(TextLine::text(format!(
        "{} (ID {})",
        requester.name, requester.national_id
    )));
    if let Some(address) = requester.address.as_deref().filter(|s| !s.trim().is_empty()) {
        lines.extend(wrapped("Address: ", address));
    }
    if let Some(contact) = requester.contact.as_deref().filter(|s| !s.trim().is_empty()) {
        lines.push(TextLine::text(format!("Contact: {contact}")));
    }

    lines.push(TextLine::blank());
    lines.push(TextLine::bold("Results", 11.0));
    lines.push(TextLine::row(
        ["Parameter", "Result", "Norm", "Within norm"],
        Font::Bold,
    ));
    for line in &data.lines {
        let result = match line.unit.as_deref() {
            Some(unit) if !unit.is_empty() => format!("{} {}", line.result, unit),
            _ => line.result.clone(),
        };
        lines.push(TextLine::row(
            [
                &line.parameter_name,
                &result,
                line.norm_text.as_deref().unwrap_or("-"),
                if line.within_norm { "Yes" } else { "No" },
            ],
            Font::Regular,
        ));
    }

    let mut sources: Vec<&str> = data
        .lines
        .iter()
        .filter_map(|l| l.norm_source.as_deref())
        .filter(|s| !s.trim().is_empty())
        .collect();
    sources.sort_unstable();
    sources.dedup();
    if !sources.is_empty() {
        lines.push(TextLine::blank());
        lines.extend(wrapped("Norm sources: ", &sources.join("; ")));
    }

    lines.push(TextLine::blank());
    let verdict = match data.fit_for_consumption {
        Some(true) => "FIT for consumption",
        Some(false) => "NOT FIT for consumption",
        None => "Fitness not determined",
    };
    lines.push(TextLine::bold(format!("Conclusion: {verdict}"), 11.0));
    if let Some(evaluator) = &data.evaluator_name {
        lines.push(TextLine::text(format!("Evaluated by: {evaluator}")));
    }
    lines.push(TextLine::text(format!("Issued: {}", data.generated_at)));
    lines
}

/// Word-wrap `label` + `text` into lines of at most [`WRAP_AT`] characters.
fn wrapped(label: &str, text: &str) -> Vec<TextLine> {
    let mut out = Vec::new();
    let mut current = label.to_string();
    let mut has_word = false;
    for word in text.split_whitespace() {
        if has_word && current.chars().count() + 1 + word.chars().count() > WRAP_AT {
            out.push(TextLine::text(std::mem::replace(&mut current, "  ".to_string())));
        } else if has_word {
            current.push(' ');
        }
        current.push_str(word);
        has_word = true;
    }
    out.push(TextLine::text(current));
    out
}

fn truncate(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        return text.to_string();
    }
    let kept: String = text.chars().take(max.saturating_sub(3)).collect();
    format!("{kept}...")
}

fn paginate(lines: Vec<TextLine>) -> Vec<Vec<TextLine>> {
    let per_page = ((PAGE_HEIGHT - 2.0 * MARGIN) / LINE_HEIGHT).floor() as usize;
    let mut pages: Vec<Vec<TextLine>> = lines
        .chunks(per_page.max(1))
        .map(<[TextLine]>::to_vec)
        .collect();
    if pages.is_empty() {
        pages.push(Vec::new());
    }
    pages
}

/// Encode text as a PDF literal string body in WinAnsiEncoding.
fn pdf_string(text: &str) -> Vec<u8> {
    let mut out = Vec::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '(' | ')' | '\\' => {
                out.push(b'\\');
                out.push(c as u8);
            }
            ' '..='~' => out.push(c as u8),
            '\u{a0}'..='\u{ff}' => out.push(c as u32 as u8),
            '–' => out.push(0x96),
            '—' => out.push(0x97),
            '≤' => out.extend_from_slice(b"<="),
            '≥' => out.extend_from_slice(b">="),
            '\t' => out.push(b' '),
            _ => out.push(b'?'),
        }
    }
    out
}

fn page_content(lines: &[TextLine], page: usize, total: usize) -> Result<Vec<u8>, RenderError> {
    let mut content = Vec::new();
    let mut y = PAGE_HEIGHT - MARGIN;
    for line in lines {
        for (x, text) in &line.cells {
            write!(
                content,
                "BT {} {:.0} Tf {:.1} {:.1} Td (",
                line.font.resource(),
                line.size,
                x,
                y
            )?;
            content.extend_from_slice(&pdf_string(text));
            content.extend_from_slice(b") Tj ET\n");
        }
        y -= LINE_HEIGHT;
    }
    write!(
        content,
        "BT /F1 8 Tf {:.1} {:.1} Td (Page {} of {}) Tj ET\n",
        PAGE_WIDTH - MARGIN - 50.0,
        FOOTER_Y,
        page + 1,
        total
    )?;
    Ok(content)
}

fn write_pdf(pages: &[Vec<TextLine>]) -> Result<Vec<u8>, RenderError> {
    // 1 catalog, 2 page tree, 3-4 fonts, then (page, content) per page
    let page_obj = |i: usize| 5 + 2 * i;
    let object_count = 4 + 2 * pages.len();

    let mut out: Vec<u8> = Vec::new();
    let mut offsets = vec![0usize; object_count + 1];
    out.extend_from_slice(b"%PDF-1.4\n%\xE2\xE3\xCF\xD3\n");

    offsets[1] = out.len();
    out.extend_from_slice(b"1 0 obj\n<< /Type /Catalog /Pages 2 0 R >>\nendobj\n");

    offsets[2] = out.len();
    let kids: Vec<String> = (0..pages.len())
        .map(|i| format!("{} 0 R", page_obj(i)))
        .collect();
    write!(
        out,
        "2 0 obj\n<< /Type /Pages /Kids [{}] /Count {} >>\nendobj\n",
        kids.join(" "),
        pages.len()
    )?;

    for (n, base) in [(3, "Helvetica"), (4, "Helvetica-Bold")] {
        offsets[n] = out.len();
        write!(
            out,
            "{n} 0 obj\n<< /Type /Font /Subtype /Type1 /BaseFont /{base} /Encoding /WinAnsiEncoding >>\nendobj\n"
        )?;
    }

    for (i, lines) in pages.iter().enumerate() {
        let page = page_obj(i);
        let contents = page + 1;

        offsets[page] = out.len();
        write!(
            out,
            "{page} 0 obj\n<< /Type /Page /Parent 2 0 R /MediaBox [0 0 {PAGE_WIDTH:.0} {PAGE_HEIGHT:.0}] \
             /Resources << /Font << /F1 3 0 R /F2 4 0 R >> >> /Contents {contents} 0 R >>\nendobj\n"
        )?;

        let stream = page_content(lines, i, pages.len())?;
        offsets[contents] = out.len();
        write!(out, "{contents} 0 obj\n<< /Length {} >>\nstream\n", stream.len())?;
        out.extend_from_slice(&stream);
        out.extend_from_slice(b"endstream\nendobj\n");
    }

    let xref = out.len();
    write!(out, "xref\n0 {}\n0000000000 65535 f \n", object_count + 1)?;
    for offset in &offsets[1..] {
        write!(out, "{offset:010} 00000 n \n")?;
    }
    write!(
        out,
        "trailer\n<< /Size {} /Root 1 0 R >>\nstartxref\n{xref}\n%%EOF\n",
        object_count + 1
    )?;
    Ok(out)
}
