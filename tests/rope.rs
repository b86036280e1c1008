use sum_rope::text::{ByteMetric, CharMetric, Chunk, LineMetric, Text, TextSummary};
use sum_rope::{Rope, Summary};

const ITEM: usize = TextSummary::MAX_ITEM_LEN;

/// A full-size chunk of one repeated letter, so item boundaries stay put
/// (full chunks are never folded into a neighbor).
fn block(ch: char) -> String {
    ch.to_string().repeat(ITEM)
}

fn rope_of(parts: &[&str]) -> Text {
    let mut rope = Rope::new();
    for part in parts {
        rope.push(Chunk::from_str(part));
    }
    rope
}

#[test]
fn test_push_and_read_back() {
    let blocks: Vec<String> = "abcdefghij".chars().map(block).collect();
    let parts: Vec<&str> = blocks.iter().map(|s| s.as_str()).collect();
    let rope = rope_of(&parts);
    rope.assert_invariants();
    assert_eq!(rope.item_count(), 10);
    assert_eq!(rope.len(), 10 * ITEM);
    assert_eq!(rope.to_string(), blocks.concat());
}

#[test]
fn test_deep_tree_roundtrip() {
    // Enough full chunks for three levels.
    let text: String = (0..300).map(|i| format!("{:>width$}", i, width = ITEM)).collect();
    let rope = Text::from_str(&text);
    rope.assert_invariants();
    assert_eq!(rope.to_string(), text);
    assert_eq!(rope.byte_len(), text.len());
}

#[test]
fn test_insert_mid_item_splits_in_place() {
    let mut rope = rope_of(&[&block('a')]);
    rope.insert::<ByteMetric>(Chunk::from_str(&block('b')), ITEM / 2);
    rope.assert_invariants();
    let expected = format!(
        "{}{}{}",
        &block('a')[..ITEM / 2],
        block('b'),
        &block('a')[..ITEM / 2]
    );
    assert_eq!(rope.to_string(), expected);
    assert_eq!(rope.item_count(), 3);
}

#[test]
fn test_insert_by_char_metric_multibyte() {
    let mut rope = Text::from_str("héllo wörld");
    rope.insert::<CharMetric>(Chunk::from_str(","), 5);
    assert_eq!(rope.to_string(), "héllo, wörld");
}

#[test]
fn test_remove_on_boundary() {
    let mut rope = rope_of(&[&block('a'), &block('b'), &block('c')]);
    let removed = rope.remove::<ByteMetric>(ITEM);
    assert_eq!(removed.as_str(), block('b'));
    assert_eq!(rope.to_string(), format!("{}{}", block('a'), block('c')));
    rope.assert_invariants();
}

#[test]
#[should_panic(expected = "element boundary")]
fn test_remove_mid_item_panics() {
    let mut rope = rope_of(&[&block('a'), &block('b')]);
    rope.remove::<ByteMetric>(ITEM / 2);
}

#[test]
fn test_find_prefer_end_selects_left_item() {
    let rope = rope_of(&[&block('a'), &block('b')]);
    let (start_side, rem) = rope.find::<ByteMetric>(ITEM, false);
    assert_eq!(rem, 0);
    let (end_side, rem) = rope.find::<ByteMetric>(ITEM, true);
    assert_eq!(rem, ITEM);
    assert_ne!(start_side, end_side);
}

#[test]
fn test_index_survives_reads_but_not_writes() {
    let mut rope = rope_of(&[&block('a'), &block('b'), &block('c')]);
    let (index, _) = rope.find::<ByteMetric>(ITEM, false);
    // Reads do not advance the version.
    let _ = rope.find::<ByteMetric>(0, false);
    let removed = rope.remove_at(&index);
    assert_eq!(removed.as_str(), block('b'));
}

#[test]
#[should_panic(expected = "stale index")]
fn test_stale_index_panics() {
    let mut rope = rope_of(&[&block('a'), &block('b')]);
    let (index, _) = rope.find::<ByteMetric>(ITEM, false);
    rope.push(Chunk::from_str(&block('c')));
    rope.remove_at(&index);
}

#[test]
fn test_insert_at_index() {
    let mut rope = rope_of(&[&block('a'), &block('c')]);
    let (index, _) = rope.find::<ByteMetric>(ITEM, false);
    rope.insert_at(Chunk::from_str(&block('b')), &index);
    assert_eq!(
        rope.to_string(),
        format!("{}{}{}", block('a'), block('b'), block('c'))
    );
}

#[test]
fn test_split_then_join_restores_content() {
    let blocks: Vec<String> = "abcde".chars().map(block).collect();
    let parts: Vec<&str> = blocks.iter().map(|s| s.as_str()).collect();
    let rope = rope_of(&parts);
    let full = rope.to_string();

    let (left, right) = rope.split::<ByteMetric>(2 * ITEM);
    left.assert_invariants();
    right.assert_invariants();
    assert_eq!(left.to_string(), full[..2 * ITEM]);
    assert_eq!(right.to_string(), full[2 * ITEM..]);

    let joined = Rope::join(left, right);
    joined.assert_invariants();
    assert_eq!(joined.to_string(), full);
}

#[test]
fn test_split_inside_item_preserves_order() {
    // Cut strictly inside the first of several distinct full items; the
    // trailing items must read back in sequence order on the right side.
    let blocks: Vec<String> = "abcdefgh".chars().map(block).collect();
    let parts: Vec<&str> = blocks.iter().map(|s| s.as_str()).collect();
    let full = blocks.concat();
    for at in [1, ITEM / 2, ITEM + ITEM / 2, 3 * ITEM + 7] {
        let (left, right) = rope_of(&parts).split::<ByteMetric>(at);
        assert_eq!(left.to_string(), full[..at], "left side reordered at {at}");
        assert_eq!(right.to_string(), full[at..], "right side reordered at {at}");
    }
}

#[test]
fn test_remove_subrange_mid_items_across_leaf() {
    let blocks: Vec<String> = "abcd".chars().map(block).collect();
    let parts: Vec<&str> = blocks.iter().map(|s| s.as_str()).collect();
    let mut rope = rope_of(&parts);
    rope.remove_subrange::<ByteMetric>(ITEM / 2..3 * ITEM + ITEM / 2);
    rope.assert_invariants();
    let expected = format!("{}{}", &block('a')[..ITEM / 2], &block('d')[..ITEM / 2]);
    assert_eq!(rope.to_string(), expected);
}

#[test]
fn test_split_at_index() {
    let rope = rope_of(&[&block('a'), &block('b'), &block('c')]);
    let (index, _) = rope.find::<ByteMetric>(2 * ITEM, false);
    let (left, right) = rope.split_at(&index);
    assert_eq!(left.to_string(), format!("{}{}", block('a'), block('b')));
    assert_eq!(right.to_string(), block('c'));
}

#[test]
fn test_split_shares_untouched_subtrees() {
    let text: String = (0..200).map(|i| format!("{:>width$}", i, width = ITEM)).collect();
    let rope = Text::from_str(&text);
    let snapshot = rope.clone();
    assert!(rope.ptr_eq(&snapshot));
    let (left, right) = rope.split::<ByteMetric>(text.len() / 2);
    // The original snapshot is untouched by the split.
    assert_eq!(snapshot.to_string(), text);
    assert_eq!(
        format!("{left}{right}"),
        text
    );
}

#[test]
fn test_remove_subrange() {
    let blocks: Vec<String> = "abcde".chars().map(block).collect();
    let parts: Vec<&str> = blocks.iter().map(|s| s.as_str()).collect();
    let mut rope = rope_of(&parts);
    rope.remove_subrange::<ByteMetric>(ITEM..4 * ITEM);
    rope.assert_invariants();
    assert_eq!(rope.to_string(), format!("{}{}", block('a'), block('e')));
}

#[test]
fn test_remove_subrange_mid_item() {
    let mut rope = Text::from_str("hello cruel world");
    rope.remove_subrange::<ByteMetric>(5..11);
    assert_eq!(rope.to_string(), "hello world");
}

#[test]
fn test_replace_subrange() {
    let mut rope = Text::from_str("one two three");
    rope.replace_subrange::<ByteMetric>(4..7, Text::from_str("2"));
    assert_eq!(rope.to_string(), "one 2 three");
}

#[test]
fn test_extract_returns_the_middle() {
    let mut rope = Text::from_str("keep CUT keep");
    let cut = rope.extract::<ByteMetric>(5..9);
    assert_eq!(cut.to_string(), "CUT ");
    assert_eq!(rope.to_string(), "keep keep");
    rope.assert_invariants();
    cut.assert_invariants();
}

#[test]
fn test_empty_range_surgery_is_harmless() {
    let mut rope = Text::from_str("abc");
    rope.remove_subrange::<ByteMetric>(1..1);
    assert_eq!(rope.to_string(), "abc");
    let cut = rope.extract::<ByteMetric>(2..2);
    assert!(cut.is_empty());
}

#[test]
fn test_line_metric_surgery() {
    let mut rope = Text::from_str("alpha\nbeta\ngamma\ndelta\n");
    // Delete lines 1 and 2.
    rope.remove_subrange::<LineMetric>(1..3);
    assert_eq!(rope.to_string(), "alpha\ndelta\n");
    assert_eq!(rope.line_count(), 2);
}

#[test]
fn test_append_and_prepend() {
    let mut rope = Text::from_str("middle");
    rope.append(Text::from_str(" end"));
    rope.prepend(Text::from_str("start "));
    assert_eq!(rope.to_string(), "start middle end");
}

#[test]
fn test_join_empty_sides_share_roots() {
    let rope = rope_of(&[&block('a')]);
    let joined = Rope::join(rope.clone(), Rope::new());
    assert!(joined.ptr_eq(&rope));
    let joined = Rope::join(Rope::new(), rope.clone());
    assert!(joined.ptr_eq(&rope));
}

#[test]
fn test_for_each_while_early_stop() {
    let rope = rope_of(&[&block('a'), &block('b'), &block('c')]);
    let mut seen = 0;
    let done = rope.for_each_while(|_| {
        seen += 1;
        seen < 2
    });
    assert!(!done);
    assert_eq!(seen, 2);
}

#[test]
fn test_for_each_from_reports_partial_entry() {
    let rope = rope_of(&[&block('a'), &block('b')]);
    let mut visits = Vec::new();
    rope.for_each_from::<ByteMetric>(ITEM / 4, |chunk, local| {
        visits.push((chunk.as_str().chars().next().unwrap(), local));
        true
    });
    assert_eq!(visits, [('a', Some(ITEM / 4)), ('b', None)]);
}

#[test]
fn test_for_each_from_the_end_visits_nothing() {
    let rope = rope_of(&[&block('a')]);
    let done = rope.for_each_from::<ByteMetric>(ITEM, |_, _| panic!("no items past the end"));
    assert!(done);
}

#[test]
fn test_mutating_for_each_fixes_summaries() {
    let mut rope = Text::from_str("one two three four");
    rope.mutating_for_each(|chunk| {
        // Same byte length, different line summary.
        let swapped = chunk.as_str().replace(' ', "\n");
        *chunk = Chunk::from_str(&swapped);
        true
    });
    rope.assert_invariants();
    assert_eq!(rope.to_string(), "one\ntwo\nthree\nfour");
    assert_eq!(rope.line_count(), 3);
}

#[test]
fn test_mutating_for_each_from_resumes() {
    let blocks: Vec<String> = "abcdef".chars().map(block).collect();
    let parts: Vec<&str> = blocks.iter().map(|s| s.as_str()).collect();
    let mut rope = rope_of(&parts);

    let (mut index, _) = rope.find::<ByteMetric>(0, false);
    let mut budget = 2;
    let done = rope.mutating_for_each_from(&mut index, |chunk| {
        *chunk = Chunk::from_str(&chunk.as_str().to_uppercase());
        budget -= 1;
        budget > 0
    });
    assert!(!done);
    rope.assert_invariants();

    // The returned index addresses the next unvisited item under the new
    // version, so the walk picks up exactly where it stopped.
    let done = rope.mutating_for_each_from(&mut index, |chunk| {
        *chunk = Chunk::from_str(&chunk.as_str().to_uppercase());
        true
    });
    assert!(done);
    rope.assert_invariants();
    let expected: String = "ABCDEF".chars().map(block).collect();
    assert_eq!(rope.to_string(), expected);
}

#[test]
fn test_versions_advance_on_every_mutation() {
    let mut rope = Text::from_str("abc");
    let mut last = rope.version();
    rope.push(Chunk::from_str("d"));
    assert!(rope.version() > last);
    last = rope.version();
    rope.remove_subrange::<ByteMetric>(0..1);
    assert!(rope.version() > last);
}

#[test]
fn test_clone_is_a_stable_snapshot() {
    let text: String = (0..100).map(|i| format!("{:>width$}", i, width = ITEM)).collect();
    let mut rope = Text::from_str(&text);
    let snapshot = rope.clone();
    rope.remove_subrange::<ByteMetric>(0..50 * ITEM);
    rope.push(Chunk::from_str(&block('z')));
    rope.assert_invariants();
    snapshot.assert_invariants();
    assert_eq!(snapshot.to_string(), text);
}

#[test]
fn test_undersized_pushes_coalesce() {
    let mut rope: Text = Rope::new();
    for _ in 0..100 {
        rope.push(Chunk::from_str("tiny "));
    }
    rope.assert_invariants();
    assert_eq!(rope.len(), 500);
    // Far fewer items than pushes: small chunks fold into their neighbor.
    assert!(rope.item_count() <= 500 / (TextSummary::MAX_ITEM_LEN / 2) + 1);
}
