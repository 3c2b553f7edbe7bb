use std::ops::Range;

/// Inclusive byte span `[start, end]` over the working buffer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Span {
    pub start: usize,
    pub end: usize,
}

impl Span {
    pub fn new(start: usize, end: usize) -> Self {
        Self { start, end }
    }

    pub fn contains(&self, index: usize) -> bool {
        self.start <= index && index <= self.end
    }
}

/// Working state threaded through the canonicalization passes: the buffer
/// being rewritten and the spans later passes must leave alone.
#[derive(Clone, Debug, Default)]
pub struct Scan {
    pub buffer: String,
    /// Sorted by start; nested and overlapping spans are kept.
    ignore: Vec<Span>,
    /// `reach[i]` is the largest end among `ignore[..=i]`.
    reach: Vec<usize>,
}

impl Scan {
    pub fn new(buffer: impl Into<String>) -> Self {
        Self {
            buffer: buffer.into(),
            ignore: Vec::new(),
            reach: Vec::new(),
        }
    }

    pub fn ignored(&self) -> &[Span] {
        &self.ignore
    }

    /// Find every unprotected `from`, optionally paired with the next
    /// unprotected `to`. Unterminated pairs run to the end of the buffer.
    pub fn find_positions(&self, from: &str, to: Option<&str>) -> Vec<Span> {
        let mut spans = Vec::new();
        if from.is_empty() || self.buffer.is_empty() {
            return spans;
        }

        let last = self.buffer.len() - 1;
        let mut cursor = 0;
        while let Some(start) = self.find_unignored(from, cursor) {
            let end = match to {
                Some(to) if !to.is_empty() => self
                    .find_unignored(to, start + from.len())
                    .map(|close| close + to.len() - 1)
                    .unwrap_or(last),
                _ => start + from.len() - 1,
            };
            spans.push(Span::new(start, end));
            cursor = end + 1;
        }

        spans
    }

    /// Next occurrence of `needle` at or after `cursor` that does not start
    /// inside an ignore range.
    pub fn find_unignored(&self, needle: &str, mut cursor: usize) -> Option<usize> {
        loop {
            let found = cursor + self.buffer.get(cursor..)?.find(needle)?;
            let jumped = self.jump_ignore(found);
            if jumped == found {
                return Some(found);
            }
            cursor = jumped;
        }
    }

    /// One past the end of the furthest-reaching ignore range holding
    /// `index`, or `index` itself.
    pub fn jump_ignore(&self, index: usize) -> usize {
        self.covering_end(index).map_or(index, |end| end + 1)
    }

    pub fn is_ignored(&self, index: usize) -> bool {
        self.covering_end(index).is_some()
    }

    fn covering_end(&self, index: usize) -> Option<usize> {
        let before = self.ignore.partition_point(|span| span.start <= index);
        let end = *self.reach.get(before.checked_sub(1)?)?;
        (end >= index).then_some(end)
    }

    pub fn add_ignore_positions(&mut self, spans: impl IntoIterator<Item = Span>) {
        add_ignore_positions(&mut self.ignore, spans);
        self.refresh_reach();
    }

    fn refresh_reach(&mut self) {
        let mut furthest = 0;
        self.reach = self
            .ignore
            .iter()
            .map(|span| {
                furthest = furthest.max(span.end);
                furthest
            })
            .collect();
    }

    /// Replace `range` of the buffer and shift the ignore ranges by the
    /// resulting length change.
    pub fn replace(&mut self, range: Range<usize>, with: &str) {
        let offset = range.len() as isize - with.len() as isize;
        let start = range.start;
        self.buffer.replace_range(range, with);
        if offset != 0 {
            update_positions(&mut self.ignore, start, offset);
            self.refresh_reach();
        }
    }

    /// Apply non-overlapping `edits`, sorted by start, in a single rebuild
    /// of the buffer. Ignore ranges end up where one `replace` per edit,
    /// last edit first, would put them.
    pub fn replace_all(&mut self, edits: &[(Range<usize>, &str)]) {
        if edits.is_empty() {
            return;
        }

        let mut buffer = String::with_capacity(self.buffer.len());
        let mut placed = Vec::with_capacity(edits.len());
        let mut copied = 0;
        for (range, with) in edits {
            buffer.push_str(&self.buffer[copied..range.start]);
            placed.push(buffer.len());
            buffer.push_str(with);
            copied = range.end;
        }
        buffer.push_str(&self.buffer[copied..]);

        let moved = |pos: usize| -> usize {
            let Some(last) = edits.partition_point(|(range, _)| range.start <= pos).checked_sub(1) else {
                return pos;
            };
            let (range, with) = &edits[last];
            if pos >= range.end {
                placed[last] + with.len() + (pos - range.end)
            } else {
                // inside the replaced text: clipped at the replacement point
                placed[last] + (pos - range.start + with.len()).saturating_sub(range.len())
            }
        };

        for span in self.ignore.iter_mut() {
            span.start = moved(span.start);
            span.end = moved(span.end);
        }
        self.buffer = buffer;
        self.refresh_reach();
    }
}

/// Shift every endpoint at or after `start` left by `offset` (right when
/// negative). Endpoints never move before `start`.
pub fn update_positions(spans: &mut [Span], start: usize, offset: isize) {
    let shift = |pos: usize| -> usize {
        if pos < start {
            return pos;
        }
        let moved = pos as isize - offset;
        moved.max(start as isize) as usize
    };

    for span in spans.iter_mut() {
        span.start = shift(span.start);
        span.end = shift(span.end);
    }
}

/// Merge by sorting on start; overlapping spans are kept as they are.
pub fn add_ignore_positions(ignore: &mut Vec<Span>, spans: impl IntoIterator<Item = Span>) {
    ignore.extend(spans);
    ignore.sort_by_key(|span| span.start);
}
