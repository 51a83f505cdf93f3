//! Virtual window rendering
//!
//! The renderer never holds the whole document in its view: `LineStore`
//! absorbs decoded batches progressively, and `VirtualWindow` computes the
//! slice of lines actually materialised for a given scroll position — the
//! visible rows plus a symmetric buffer margin. Scroll extent comes from
//! line count times a fixed line height, so the scrollbar is correct even
//! while the tail of the document is still decoding.

use crate::config::RetrievalConfig;
use crate::retrieval::decoder::LineBatch;
use std::ops::Range;
use tracing::debug;

/// Progressive, append-only line storage for one open document.
#[derive(Debug, Default)]
pub struct LineStore {
    lines: Vec<String>,
    complete: bool,
}

impl LineStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Absorb one decoded batch. The final batch marks the store complete.
    pub fn absorb(&mut self, batch: LineBatch) {
        self.lines.extend(batch.lines);
        if batch.is_final {
            self.complete = true;
            debug!(total_lines = self.lines.len(), "line store complete");
        }
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    /// True once the final decode batch has been absorbed.
    pub fn is_complete(&self) -> bool {
        self.complete
    }

    pub fn line(&self, index: usize) -> Option<&str> {
        self.lines.get(index).map(String::as_str)
    }

    /// The materialised slice for a window; clamped to available lines.
    pub fn slice(&self, range: Range<usize>) -> &[String] {
        let start = range.start.min(self.lines.len());
        let end = range.end.min(self.lines.len());
        &self.lines[start..end]
    }

    /// Discard everything, e.g. after an aborted session.
    pub fn clear(&mut self) {
        self.lines.clear();
        self.complete = false;
    }
}

/// Window geometry over a `LineStore`.
#[derive(Debug, Clone, Copy)]
pub struct VirtualWindow {
    buffer_margin: usize,
    line_height: u32,
}

impl VirtualWindow {
    pub fn new(config: &RetrievalConfig) -> Self {
        Self {
            buffer_margin: config.buffer_margin,
            line_height: config.line_height,
        }
    }

    /// Total scrollable height in pixels for the current line count.
    pub fn content_height(&self, total_lines: usize) -> u64 {
        total_lines as u64 * u64::from(self.line_height)
    }

    /// First line on screen for a pixel scroll offset.
    pub fn first_visible_line(&self, scroll_offset: u64) -> usize {
        (scroll_offset / u64::from(self.line_height)) as usize
    }

    /// Scroll offset that puts `line` at the top of the viewport.
    pub fn scroll_offset_for_line(&self, line: usize) -> u64 {
        line as u64 * u64::from(self.line_height)
    }

    /// The range of lines to materialise: the visible rows plus the buffer
    /// margin on each side, clamped to the document. Never wider than
    /// `visible + 2 * margin` regardless of document length.
    pub fn visible_range(
        &self,
        scroll_offset: u64,
        viewport_height: u32,
        total_lines: usize,
    ) -> Range<usize> {
        let visible = (viewport_height / self.line_height).max(1) as usize + 1;
        let first = self.first_visible_line(scroll_offset);
        let start = first.saturating_sub(self.buffer_margin);
        let end = (first + visible + self.buffer_margin).min(total_lines);
        start.min(end)..end
    }
}

/// Ordered match positions for a search term, with circular navigation.
#[derive(Debug)]
pub struct SearchMatches {
    term: String,
    indices: Vec<usize>,
    cursor: Option<usize>,
}

impl SearchMatches {
    /// Linear scan over the currently loaded lines. Re-running with a new
    /// term (or after more lines arrived) replaces the previous result set.
    pub fn scan(store: &LineStore, term: &str) -> Self {
        let indices = if term.is_empty() {
            Vec::new()
        } else {
            (0..store.len())
                .filter(|&i| store.line(i).is_some_and(|l| l.contains(term)))
                .collect()
        };
        debug!(term, matches = indices.len(), "search scan complete");
        Self {
            term: term.to_string(),
            indices,
            cursor: None,
        }
    }

    pub fn term(&self) -> &str {
        &self.term
    }

    pub fn len(&self) -> usize {
        self.indices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }

    /// Line index of the current match, if navigation has started.
    pub fn current(&self) -> Option<usize> {
        self.cursor.map(|c| self.indices[c])
    }

    /// One-based position for a "3 / 17" style badge.
    pub fn position(&self) -> Option<(usize, usize)> {
        self.cursor.map(|c| (c + 1, self.indices.len()))
    }

    /// Advance to the next match, wrapping past the last back to the first.
    pub fn next(&mut self) -> Option<usize> {
        if self.indices.is_empty() {
            return None;
        }
        self.cursor = Some(match self.cursor {
            None => 0,
            Some(c) => (c + 1) % self.indices.len(),
        });
        self.current()
    }

    /// Step to the previous match, wrapping before the first to the last.
    pub fn prev(&mut self) -> Option<usize> {
        if self.indices.is_empty() {
            return None;
        }
        self.cursor = Some(match self.cursor {
            None => self.indices.len() - 1,
            Some(0) => self.indices.len() - 1,
            Some(c) => c - 1,
        });
        self.current()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store_with(lines: usize) -> LineStore {
        let mut store = LineStore::new();
        store.absorb(LineBatch {
            lines: (0..lines).map(|i| format!("line {i}")).collect(),
            is_final: true,
        });
        store
    }

    fn window() -> VirtualWindow {
        VirtualWindow::new(&RetrievalConfig::default())
    }

    #[test]
    fn store_absorbs_batches_progressively() {
        let mut store = LineStore::new();
        store.absorb(LineBatch {
            lines: vec!["a".into(), "b".into()],
            is_final: false,
        });
        assert_eq!(store.len(), 2);
        assert!(!store.is_complete());

        store.absorb(LineBatch {
            lines: vec!["c".into()],
            is_final: true,
        });
        assert_eq!(store.len(), 3);
        assert!(store.is_complete());
        assert_eq!(store.line(2), Some("c"));
    }

    #[test]
    fn materialised_range_is_bounded_for_huge_documents() {
        let window = window();
        let total = 1_000_000usize;
        // Mid-document, 800px viewport at 20px lines = 40 visible rows.
        let range = window.visible_range(window.scroll_offset_for_line(500_000), 800, total);

        let margin = RetrievalConfig::default().buffer_margin;
        let visible = 800 / 20 + 1;
        assert!(range.len() <= visible as usize + 2 * margin);
        assert!(range.contains(&500_000));
    }

    #[test]
    fn range_clamps_at_document_edges() {
        let window = window();
        let top = window.visible_range(0, 400, 10_000);
        assert_eq!(top.start, 0);

        let bottom_offset = window.scroll_offset_for_line(9_990);
        let bottom = window.visible_range(bottom_offset, 400, 10_000);
        assert_eq!(bottom.end, 10_000);

        // Tiny document: never larger than the document itself.
        let tiny = window.visible_range(0, 400, 5);
        assert_eq!(tiny, 0..5);
    }

    #[test]
    fn content_height_tracks_line_count() {
        let window = window();
        assert_eq!(window.content_height(0), 0);
        assert_eq!(window.content_height(1_000_000), 20_000_000);
        assert_eq!(window.first_visible_line(20_000_000 - 20), 999_999);
    }

    #[test]
    fn store_slice_clamps_out_of_range() {
        let store = store_with(10);
        assert_eq!(store.slice(8..50).len(), 2);
        assert!(store.slice(20..30).is_empty());
    }

    #[test]
    fn search_finds_ordered_matches_and_wraps() {
        let mut store = LineStore::new();
        store.absorb(LineBatch {
            lines: vec![
                "temp=21.5".into(),
                "pressure nominal".into(),
                "temp=22.0".into(),
                "temp=22.4".into(),
            ],
            is_final: true,
        });

        let mut matches = SearchMatches::scan(&store, "temp");
        assert_eq!(matches.len(), 3);
        assert_eq!(matches.current(), None);

        assert_eq!(matches.next(), Some(0));
        assert_eq!(matches.next(), Some(2));
        assert_eq!(matches.next(), Some(3));
        // Wraps back to the first.
        assert_eq!(matches.next(), Some(0));
        assert_eq!(matches.position(), Some((1, 3)));

        // Backwards from the first wraps to the last.
        assert_eq!(matches.prev(), Some(3));
    }

    #[test]
    fn search_with_no_matches_navigates_nowhere() {
        let store = store_with(5);
        let mut matches = SearchMatches::scan(&store, "absent");
        assert!(matches.is_empty());
        assert_eq!(matches.next(), None);
        assert_eq!(matches.prev(), None);
    }

    #[test]
    fn rescan_replaces_previous_results() {
        let store = store_with(20);
        let first = SearchMatches::scan(&store, "line 1");
        // "line 1" plus "line 1x" variants.
        assert_eq!(first.len(), 11);
        let second = SearchMatches::scan(&store, "line 19");
        assert_eq!(second.len(), 1);
        assert_eq!(second.term(), "line 19");
    }
}
