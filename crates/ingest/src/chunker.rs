use crate::chunk::Chunk;
use crate::markup::{is_figure_reference, starts_with_image};

#[derive(Debug, Clone)]
pub struct ChunkerConfig {
    /// Upper bound on chunk length in characters, newlines included.
    pub max_chars: usize,
    /// How many lines after a figure citation may hold its image.
    pub figure_lookahead: usize,
}

impl Default for ChunkerConfig {
    fn default() -> Self {
        Self {
            max_chars: 2000,
            figure_lookahead: 3,
        }
    }
}

/// A run of consecutive document lines.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextSpan {
    pub text: String,
    pub lines: (usize, usize),
    pub atomic: bool,
}

pub struct Chunker {
    config: ChunkerConfig,
}

/// Lines accumulated for the chunk currently being built.
struct Pending {
    start: usize,
    end: usize,
    chars: usize,
    atomic: bool,
}

impl Pending {
    fn at(line: usize) -> Self {
        Self {
            start: line,
            end: line,
            chars: 0,
            atomic: false,
        }
    }

    fn is_empty(&self) -> bool {
        self.start == self.end
    }

    /// Length after appending a line of `line_chars` characters.
    fn len_with(&self, line_chars: usize) -> usize {
        if self.is_empty() {
            line_chars
        } else {
            self.chars + 1 + line_chars
        }
    }

    fn push(&mut self, line_chars: usize) {
        self.chars = self.len_with(line_chars);
        self.end += 1;
    }
}

impl Chunker {
    pub fn new(config: ChunkerConfig) -> Self {
        Self { config }
    }

    /// Split a document into chunks carrying document metadata.
    pub fn chunk_text(&self, doc_id: &str, text: &str, source: &str) -> Vec<Chunk> {
        self.split(text)
            .into_iter()
            .map(|span| {
                Chunk::new(
                    doc_id.to_string(),
                    span.text,
                    source.to_string(),
                    span.lines,
                    span.atomic,
                )
            })
            .collect()
    }

    /// Split text into line spans of at most `max_chars` characters.
    ///
    /// A line citing a figure is kept in one span with the image markup that
    /// follows it, even when that span grows past the bound. A single line
    /// longer than the bound becomes its own oversized span.
    pub fn split(&self, text: &str) -> Vec<TextSpan> {
        if text.is_empty() {
            return Vec::new();
        }

        let lines: Vec<&str> = text.split('\n').collect();
        let mut spans = Vec::new();
        let mut pending = Pending::at(0);
        let mut i = 0;

        while i < lines.len() {
            if is_figure_reference(lines[i]) {
                if let Some(image) = self.find_image(&lines, i) {
                    self.flush(&lines, &mut pending, &mut spans);
                    pending = Pending::at(i);
                    for line in &lines[i..=image] {
                        pending.push(line.chars().count());
                    }
                    pending.atomic = true;
                    i = image + 1;
                    continue;
                }
            }

            let line_chars = lines[i].chars().count();
            if !pending.is_empty() && pending.len_with(line_chars) > self.config.max_chars {
                self.flush(&lines, &mut pending, &mut spans);
                pending = Pending::at(i);
            }
            pending.push(line_chars);
            i += 1;
        }

        self.flush(&lines, &mut pending, &mut spans);
        spans
    }

    /// Index of the first image line in the citation's look-ahead window.
    fn find_image(&self, lines: &[&str], citation: usize) -> Option<usize> {
        let last = (citation + self.config.figure_lookahead).min(lines.len() - 1);
        (citation..=last).find(|&j| starts_with_image(lines[j]))
    }

    fn flush(&self, lines: &[&str], pending: &mut Pending, spans: &mut Vec<TextSpan>) {
        if pending.is_empty() {
            return;
        }
        spans.push(TextSpan {
            text: lines[pending.start..pending.end].join("\n"),
            lines: (pending.start, pending.end),
            atomic: pending.atomic,
        });
        *pending = Pending::at(pending.end);
    }
}
