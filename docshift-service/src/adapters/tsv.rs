//! Tesseract TSV output parsing.
//!
//! Columns: `level page_num block_num par_num line_num word_num left top
//! width height conf text`. Levels 1-4 are page/block/paragraph/line
//! aggregates; only level 5 rows are words.

use serde::Serialize;
use tracing::trace;

const WORD_LEVEL: u32 = 5;
const COLUMNS: usize = 12;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BoundingBox {
    pub left: u32,
    pub top: u32,
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OcrWord {
    pub text: String,
    /// 0-100; absent when the engine reported none
    pub confidence: Option<f32>,
    /// 1-based page number
    pub page: u32,
    pub bbox: BoundingBox,
}

/// Recognised words of a document and their mean confidence
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OcrWords {
    pub words: Vec<OcrWord>,
    pub average_confidence: Option<f32>,
}

impl OcrWords {
    pub fn from_words(words: Vec<OcrWord>) -> Self {
        let average_confidence = average_confidence(&words);
        Self {
            words,
            average_confidence,
        }
    }

    pub fn word_count(&self) -> usize {
        self.words.len()
    }
}

/// Parse TSV content into word rows. When `page` is given it replaces the
/// page number from the file (single-image runs always report page 1).
pub fn parse_tsv(content: &str, page: Option<u32>) -> Vec<OcrWord> {
    content
        .lines()
        .filter_map(|line| parse_row(line, page))
        .collect()
}

fn parse_row(line: &str, page_override: Option<u32>) -> Option<OcrWord> {
    let fields: Vec<&str> = line.splitn(COLUMNS, '\t').collect();
    if fields.len() < COLUMNS {
        return None;
    }

    // Header row fails here too
    let level: u32 = fields[0].trim().parse().ok()?;
    if level != WORD_LEVEL {
        return None;
    }

    let text = fields[11].trim();
    if text.is_empty() {
        return None;
    }

    let number = |idx: usize| fields[idx].trim().parse::<u32>().ok();
    let confidence = fields[10]
        .trim()
        .parse::<f32>()
        .ok()
        .filter(|conf| *conf >= 0.0);

    let word = OcrWord {
        text: text.to_string(),
        confidence,
        page: page_override.or_else(|| number(1)).unwrap_or(1),
        bbox: BoundingBox {
            left: number(6).unwrap_or(0),
            top: number(7).unwrap_or(0),
            width: number(8).unwrap_or(0),
            height: number(9).unwrap_or(0),
        },
    };
    trace!(text = %word.text, confidence = ?word.confidence, "Parsed OCR word");
    Some(word)
}

/// Mean confidence over words that have one.
pub fn average_confidence(words: &[OcrWord]) -> Option<f32> {
    let confidences: Vec<f32> = words.iter().filter_map(|word| word.confidence).collect();
    if confidences.is_empty() {
        return None;
    }
    Some(confidences.iter().sum::<f32>() / confidences.len() as f32)
}
