//! UTF-8 text instantiation of the rope.
//!
//! Items are [`Chunk`]s of up to [`Summary::MAX_ITEM_LEN`] bytes, always
//! split on character boundaries. The cached [`TextSummary`] tracks bytes,
//! characters, UTF-16 code units and newline count, giving four coordinate
//! systems over the same tree: [`ByteMetric`], [`CharMetric`],
//! [`Utf16Metric`] and [`LineMetric`].

use std::fmt;

use memchr::memchr_iter;

use crate::{Item, Metric, Rope, Summary};

/// A rope over UTF-8 text chunks.
pub type Text = Rope<Chunk>;

// === Summary ===

#[derive(Clone, Copy, Default, PartialEq, Eq, Debug)]
pub struct TextSummary {
    pub bytes: usize,
    pub chars: usize,
    pub utf16_units: usize,
    pub lines: usize,
}

impl TextSummary {
    pub fn of(text: &str) -> Self {
        let bytes = text.as_bytes();
        let chars = bytecount::num_chars(bytes);
        // Characters outside the BMP are exactly the 4-byte sequences and
        // take two UTF-16 units each.
        let wide = bytes.iter().filter(|&&b| b >= 0xf0).count();
        TextSummary {
            bytes: bytes.len(),
            chars,
            utf16_units: chars + wide,
            lines: bytecount::count(bytes, b'\n'),
        }
    }
}

impl Summary for TextSummary {
    const MAX_CHILDREN: usize = 16;
    const MAX_ITEM_LEN: usize = 1024;

    fn add(&mut self, other: &Self) {
        self.bytes += other.bytes;
        self.chars += other.chars;
        self.utf16_units += other.utf16_units;
        self.lines += other.lines;
    }

    fn subtract(&mut self, other: &Self) {
        self.bytes -= other.bytes;
        self.chars -= other.chars;
        self.utf16_units -= other.utf16_units;
        self.lines -= other.lines;
    }
}

// === Chunk ===

/// A contiguous run of UTF-8 bytes, at most `MAX_ITEM_LEN` long.
#[derive(Clone, PartialEq, Eq)]
pub struct Chunk {
    // Invariant: always valid UTF-8.
    bytes: Vec<u8>,
}

impl Chunk {
    pub fn from_str(text: &str) -> Self {
        assert!(
            text.len() <= TextSummary::MAX_ITEM_LEN,
            "chunk of {} bytes exceeds the size budget",
            text.len()
        );
        Chunk { bytes: text.as_bytes().to_vec() }
    }

    /// Build a chunk from raw bytes, validating UTF-8.
    pub fn from_bytes(bytes: Vec<u8>) -> Result<Self, simdutf8::basic::Utf8Error> {
        simdutf8::basic::from_utf8(&bytes)?;
        assert!(
            bytes.len() <= TextSummary::MAX_ITEM_LEN,
            "chunk of {} bytes exceeds the size budget",
            bytes.len()
        );
        Ok(Chunk { bytes })
    }

    #[inline]
    pub fn as_str(&self) -> &str {
        debug_assert!(simdutf8::basic::from_utf8(&self.bytes).is_ok());
        // Safety: `bytes` is valid UTF-8 by construction; every mutation
        // (split_at, merge) preserves it.
        unsafe { std::str::from_utf8_unchecked(&self.bytes) }
    }

    #[inline]
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }
}

impl fmt::Debug for Chunk {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Chunk({:?})", self.as_str())
    }
}

impl Item for Chunk {
    type Summary = TextSummary;

    fn summarize(&self) -> TextSummary {
        TextSummary::of(self.as_str())
    }

    #[inline]
    fn len(&self) -> usize {
        self.bytes.len()
    }

    #[inline]
    fn is_undersized(&self) -> bool {
        self.bytes.len() < TextSummary::MAX_ITEM_LEN / 2
    }

    fn split_at(&mut self, offset: usize) -> Self {
        assert!(
            self.as_str().is_char_boundary(offset),
            "chunk split at byte {offset} is not a character boundary"
        );
        let rest = self.bytes.split_off(offset);
        Chunk { bytes: rest }
    }

    fn merge(&mut self, other: Self) {
        debug_assert!(self.bytes.len() + other.bytes.len() <= TextSummary::MAX_ITEM_LEN);
        self.bytes.extend_from_slice(&other.bytes);
    }
}

// === Metrics ===

/// Byte positions. The base coordinate system; `to_offset` is the identity.
pub struct ByteMetric;

impl Metric<Chunk> for ByteMetric {
    #[inline]
    fn measure(summary: &TextSummary) -> usize {
        summary.bytes
    }

    #[inline]
    fn to_offset(item: &Chunk, pos: usize) -> usize {
        assert!(item.as_str().is_char_boundary(pos), "byte position splits a character");
        pos
    }
}

/// Character (Unicode scalar) positions.
pub struct CharMetric;

impl Metric<Chunk> for CharMetric {
    #[inline]
    fn measure(summary: &TextSummary) -> usize {
        summary.chars
    }

    fn to_offset(item: &Chunk, pos: usize) -> usize {
        let text = item.as_str();
        match text.char_indices().nth(pos) {
            Some((offset, _)) => offset,
            None => text.len(),
        }
    }
}

/// UTF-16 code unit positions, for interop with editors and protocols that
/// count in UTF-16.
pub struct Utf16Metric;

impl Metric<Chunk> for Utf16Metric {
    #[inline]
    fn measure(summary: &TextSummary) -> usize {
        summary.utf16_units
    }

    fn to_offset(item: &Chunk, pos: usize) -> usize {
        let text = item.as_str();
        let mut units = 0;
        for (offset, ch) in text.char_indices() {
            if units == pos {
                return offset;
            }
            units += ch.len_utf16();
            assert!(units <= pos, "utf-16 position splits a surrogate pair");
        }
        text.len()
    }
}

/// Newline counts. Position `n` is the start of the `n`-th line, so a
/// chunk-local lookup of `n > 0` resolves to just past the `n`-th newline.
pub struct LineMetric;

impl Metric<Chunk> for LineMetric {
    #[inline]
    fn measure(summary: &TextSummary) -> usize {
        summary.lines
    }

    fn to_offset(item: &Chunk, pos: usize) -> usize {
        if pos == 0 {
            return 0;
        }
        match memchr_iter(b'\n', item.as_bytes()).nth(pos - 1) {
            Some(newline) => newline + 1,
            None => panic!("line position out of bounds for chunk"),
        }
    }
}

// === Text conveniences ===

impl Rope<Chunk> {
    /// Build a text rope, packing the string into maximally sized chunks
    /// split on character boundaries.
    pub fn from_str(text: &str) -> Text {
        let mut rope = Rope::new();
        let mut rest = text;
        while !rest.is_empty() {
            let mut end = rest.len().min(TextSummary::MAX_ITEM_LEN);
            while !rest.is_char_boundary(end) {
                end -= 1;
            }
            rope.push(Chunk::from_str(&rest[..end]));
            rest = &rest[end..];
        }
        rope
    }

    #[inline]
    pub fn byte_len(&self) -> usize {
        self.summary().bytes
    }

    #[inline]
    pub fn char_len(&self) -> usize {
        self.summary().chars
    }

    /// Number of newlines.
    #[inline]
    pub fn line_count(&self) -> usize {
        self.summary().lines
    }
}

impl fmt::Display for Rope<Chunk> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut err = None;
        self.for_each_while(|chunk| match f.write_str(chunk.as_str()) {
            Ok(()) => true,
            Err(e) => {
                err = Some(e);
                false
            }
        });
        match err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_summary_of_multibyte_text() {
        let s = TextSummary::of("héllo\nwörld 🎉\n");
        assert_eq!(s.bytes, 19);
        assert_eq!(s.chars, 14);
        assert_eq!(s.utf16_units, 15);
        assert_eq!(s.lines, 2);
    }

    #[test]
    fn test_summary_add_subtract_roundtrip() {
        let mut acc = TextSummary::of("one\n");
        let other = TextSummary::of("two 🎉");
        let before = acc;
        acc.add(&other);
        acc.subtract(&other);
        assert_eq!(acc, before);
    }

    #[test]
    fn test_char_metric_offsets() {
        let chunk = Chunk::from_str("aé🎉b");
        assert_eq!(CharMetric::to_offset(&chunk, 0), 0);
        assert_eq!(CharMetric::to_offset(&chunk, 1), 1);
        assert_eq!(CharMetric::to_offset(&chunk, 2), 3);
        assert_eq!(CharMetric::to_offset(&chunk, 3), 7);
        assert_eq!(CharMetric::to_offset(&chunk, 4), 8);
    }

    #[test]
    fn test_utf16_metric_offsets() {
        let chunk = Chunk::from_str("a🎉b");
        assert_eq!(Utf16Metric::to_offset(&chunk, 0), 0);
        assert_eq!(Utf16Metric::to_offset(&chunk, 1), 1);
        assert_eq!(Utf16Metric::to_offset(&chunk, 3), 5);
        assert_eq!(Utf16Metric::to_offset(&chunk, 4), 6);
    }

    #[test]
    #[should_panic(expected = "surrogate pair")]
    fn test_utf16_metric_rejects_surrogate_split() {
        let chunk = Chunk::from_str("🎉");
        Utf16Metric::to_offset(&chunk, 1);
    }

    #[test]
    fn test_line_metric_offsets() {
        let chunk = Chunk::from_str("one\ntwo\nthree");
        assert_eq!(LineMetric::to_offset(&chunk, 0), 0);
        assert_eq!(LineMetric::to_offset(&chunk, 1), 4);
        assert_eq!(LineMetric::to_offset(&chunk, 2), 8);
    }

    #[test]
    fn test_chunk_split_preserves_content() {
        let mut chunk = Chunk::from_str("hello world");
        let rest = chunk.split_at(5);
        assert_eq!(chunk.as_str(), "hello");
        assert_eq!(rest.as_str(), " world");
    }

    #[test]
    #[should_panic(expected = "character boundary")]
    fn test_chunk_split_rejects_mid_character() {
        let mut chunk = Chunk::from_str("é");
        chunk.split_at(1);
    }

    #[test]
    fn test_from_bytes_rejects_invalid_utf8() {
        assert!(Chunk::from_bytes(vec![0xff, 0xfe]).is_err());
        assert_eq!(Chunk::from_bytes(b"ok".to_vec()).unwrap().as_str(), "ok");
    }

    #[test]
    fn test_from_str_packs_chunks_on_char_boundaries() {
        // 2-byte characters force the packer off the 1024-byte alignment.
        let text = "é".repeat(2000);
        let rope = Text::from_str(&text);
        rope.assert_invariants();
        assert_eq!(rope.byte_len(), 4000);
        assert_eq!(rope.char_len(), 2000);
        assert_eq!(rope.to_string(), text);
        rope.for_each_while(|chunk| {
            assert!(chunk.len() <= TextSummary::MAX_ITEM_LEN);
            true
        });
    }
}
