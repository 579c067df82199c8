//! Cached label line-wrapping
//!
//! Wrapping a name into a card is repeated every frame for every visible node,
//! so the result is memoized per (text, width bucket). Widths are quantized to
//! keep tiny zoom changes from missing the cache.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use super::lru::LruMap;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LabelConfig {
    /// Font size in world units
    pub font_size: f64,
    /// Average glyph advance as a fraction of the font size
    pub glyph_width_ratio: f64,
    /// Available widths are rounded down to a multiple of this
    pub width_quantum: f64,
    pub max_lines: usize,
    pub capacity: usize,
}

impl Default for LabelConfig {
    fn default() -> Self {
        Self {
            font_size: 14.0,
            glyph_width_ratio: 0.55,
            width_quantum: 8.0,
            max_lines: 2,
            capacity: 2048,
        }
    }
}

/// Wrapped label ready for the host to draw
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabelLayout {
    pub lines: Vec<String>,
    /// Text was cut to fit `max_lines`
    pub truncated: bool,
}

type LabelKey = (String, u32);

#[derive(Debug)]
pub struct LabelLayoutCache {
    config: LabelConfig,
    entries: LruMap<LabelKey, Arc<LabelLayout>>,
    hits: u64,
    misses: u64,
}

impl LabelLayoutCache {
    pub fn new(config: LabelConfig) -> Self {
        let entries = LruMap::new(config.capacity);
        Self {
            config,
            entries,
            hits: 0,
            misses: 0,
        }
    }

    /// Wrapped lines for `text` in a box `width` world units wide
    pub fn layout(&mut self, text: &str, width: f64) -> Arc<LabelLayout> {
        let bucket = self.width_bucket(width);
        let key = (text.to_owned(), bucket);
        if let Some(layout) = self.entries.get_mut(&key) {
            self.hits += 1;
            return layout.clone();
        }
        self.misses += 1;
        let layout = Arc::new(self.wrap(text, bucket));
        self.entries.insert(key, layout.clone());
        layout
    }

    fn width_bucket(&self, width: f64) -> u32 {
        if !(width.is_finite() && width > 0.0) {
            return 0;
        }
        let quantum = self.config.width_quantum.max(1.0);
        ((width / quantum).floor() * quantum).min(f64::from(u32::MAX)) as u32
    }

    fn wrap(&self, text: &str, width: u32) -> LabelLayout {
        let glyph = (self.config.font_size * self.config.glyph_width_ratio).max(f64::EPSILON);
        let per_line = ((f64::from(width) / glyph).floor() as usize).max(1);

        let mut lines: Vec<String> = Vec::new();
        let mut current = String::new();
        for word in text.split_whitespace() {
            for piece in split_long_word(word, per_line) {
                let needed = if current.is_empty() {
                    piece.chars().count()
                } else {
                    current.chars().count() + 1 + piece.chars().count()
                };
                if needed > per_line && !current.is_empty() {
                    lines.push(std::mem::take(&mut current));
                }
                if !current.is_empty() {
                    current.push(' ');
                }
                current.push_str(&piece);
            }
        }
        if !current.is_empty() {
            lines.push(current);
        }

        let max_lines = self.config.max_lines.max(1);
        let truncated = lines.len() > max_lines;
        if truncated {
            lines.truncate(max_lines);
            if let Some(last) = lines.last_mut() {
                let mut kept: String = last.chars().take(per_line.saturating_sub(1)).collect();
                kept.push('…');
                *last = kept;
            }
        }
        LabelLayout { lines, truncated }
    }

    pub fn hits(&self) -> u64 {
        self.hits
    }

    pub fn misses(&self) -> u64 {
        self.misses
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

impl Default for LabelLayoutCache {
    fn default() -> Self {
        Self::new(LabelConfig::default())
    }
}

fn split_long_word(word: &str, per_line: usize) -> Vec<String> {
    let chars: Vec<char> = word.chars().collect();
    chars
        .chunks(per_line)
        .map(|chunk| chunk.iter().collect())
        .collect()
}
