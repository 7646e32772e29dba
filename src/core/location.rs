//! Line, character and byte coordinates for sub-ranges of a text buffer.
//!
//! A [`LocationTracker`] indexes line starts once per buffer; every partition
//! strategy asks it for a [`PartitionLocation`] per block. Lines are split on
//! `\n`, a trailing newline does not open an extra line, and each line's byte
//! range includes its terminating newline, so consecutive line ranges tile
//! the buffer exactly.

use serde::{Deserialize, Serialize};

/// Immutable coordinates of one block inside its file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartitionLocation {
    /// First line of the block (1-based, 0 only for an empty file)
    pub start_line: usize,
    /// Last line of the block (1-based, inclusive)
    pub end_line: usize,
    /// Character offset within `start_line`
    pub start_char: usize,
    /// Character offset within `end_line` where the block stops
    pub end_char: usize,
    /// Byte offset of the block start in the file
    pub start_byte: usize,
    /// Byte offset one past the block end in the file
    pub end_byte: usize,
    /// Number of lines in the whole file
    pub total_lines: usize,
    /// Number of bytes in the whole file
    pub total_bytes: usize,
    /// Character length of every line in the block, newline excluded
    pub line_lengths: Vec<usize>,
}

impl PartitionLocation {
    /// Location of an empty buffer.
    pub fn empty() -> Self {
        Self {
            start_line: 0,
            end_line: 0,
            start_char: 0,
            end_char: 0,
            start_byte: 0,
            end_byte: 0,
            total_lines: 0,
            total_bytes: 0,
            line_lengths: Vec::new(),
        }
    }

    /// Number of lines covered.
    pub fn line_count(&self) -> usize {
        if self.total_lines == 0 {
            0
        } else {
            self.end_line - self.start_line + 1
        }
    }

    /// Number of bytes covered.
    pub fn byte_len(&self) -> usize {
        self.end_byte - self.start_byte
    }

    /// Slice the block's text out of the full file content.
    pub fn extract_content<'a>(&self, content: &'a str) -> &'a str {
        content.get(self.start_byte..self.end_byte).unwrap_or("")
    }
}

/// Line index over one text buffer.
#[derive(Debug, Clone)]
pub struct LocationTracker<'a> {
    content: &'a str,
    line_starts: Vec<usize>,
}

impl<'a> LocationTracker<'a> {
    /// Index `content`.
    pub fn new(content: &'a str) -> Self {
        let mut line_starts = Vec::new();
        if !content.is_empty() {
            line_starts.push(0);
            for (idx, byte) in content.bytes().enumerate() {
                if byte == b'\n' && idx + 1 < content.len() {
                    line_starts.push(idx + 1);
                }
            }
        }
        Self {
            content,
            line_starts,
        }
    }

    /// The indexed buffer.
    pub fn content(&self) -> &'a str {
        self.content
    }

    /// Number of lines in the buffer.
    pub fn total_lines(&self) -> usize {
        self.line_starts.len()
    }

    /// Number of bytes in the buffer.
    pub fn total_bytes(&self) -> usize {
        self.content.len()
    }

    /// Byte range of a 1-based line, including its newline.
    fn line_byte_range(&self, line: usize) -> (usize, usize) {
        let start = self.line_starts[line - 1];
        let end = self
            .line_starts
            .get(line)
            .copied()
            .unwrap_or(self.content.len());
        (start, end)
    }

    /// Text of a 1-based line without its line terminator.
    pub fn line_text(&self, line: usize) -> &'a str {
        if line == 0 || line > self.total_lines() {
            return "";
        }
        let (start, end) = self.line_byte_range(line);
        self.content[start..end].trim_end_matches('\n').trim_end_matches('\r')
    }

    /// Text of the inclusive 1-based line range, terminators included.
    pub fn slice_lines(&self, start_line: usize, end_line: usize) -> &'a str {
        let location = self.location(start_line, end_line);
        location.extract_content(self.content)
    }

    /// 1-based line containing `byte`; bytes past the end map to the last line.
    pub fn line_of_byte(&self, byte: usize) -> usize {
        if self.line_starts.is_empty() {
            return 0;
        }
        match self.line_starts.binary_search(&byte) {
            Ok(idx) => idx + 1,
            Err(idx) => idx.max(1),
        }
    }

    /// Coordinates for the inclusive 1-based line range. Out-of-range input is
    /// clamped into `[1, total_lines]`; an inverted range collapses onto
    /// `start_line`.
    pub fn location(&self, start_line: usize, end_line: usize) -> PartitionLocation {
        let total = self.total_lines();
        if total == 0 {
            return PartitionLocation::empty();
        }

        let start = start_line.clamp(1, total);
        let end = end_line.clamp(start, total);

        let (start_byte, _) = self.line_byte_range(start);
        let (_, end_byte) = self.line_byte_range(end);

        let line_lengths: Vec<usize> = (start..=end)
            .map(|line| self.line_text(line).chars().count())
            .collect();
        let end_char = line_lengths.last().copied().unwrap_or(0);

        PartitionLocation {
            start_line: start,
            end_line: end,
            start_char: 0,
            end_char,
            start_byte,
            end_byte,
            total_lines: total,
            total_bytes: self.content.len(),
            line_lengths,
        }
    }
}
