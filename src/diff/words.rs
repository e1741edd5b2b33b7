use similar::{Algorithm, ChangeTag, TextDiff};

use super::WordChange;

/// Changed byte spans of `old` and `new`, word-diffed against each other only.
pub(super) fn word_spans(old: &str, new: &str) -> (Vec<WordChange>, Vec<WordChange>) {
    let diff = TextDiff::configure()
        .algorithm(Algorithm::Patience)
        .diff_words(old, new);

    let mut old_spans = Vec::new();
    let mut new_spans = Vec::new();
    let (mut old_pos, mut new_pos) = (0usize, 0usize);
    for change in diff.iter_all_changes() {
        let len = change.value().len();
        match change.tag() {
            ChangeTag::Equal => {
                old_pos += len;
                new_pos += len;
            }
            ChangeTag::Delete => {
                push_span(&mut old_spans, old_pos, old_pos + len);
                old_pos += len;
            }
            ChangeTag::Insert => {
                push_span(&mut new_spans, new_pos, new_pos + len);
                new_pos += len;
            }
        }
    }
    (old_spans, new_spans)
}

fn push_span(spans: &mut Vec<WordChange>, start: usize, end: usize) {
    if start == end {
        return;
    }
    match spans.last_mut() {
        Some(last) if last.end == start => last.end = end,
        _ => spans.push(WordChange { start, end }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn texts<'a>(line: &'a str, spans: &[WordChange]) -> Vec<&'a str> {
        spans.iter().map(|s| &line[s.range()]).collect()
    }

    #[test]
    fn test_single_word_changed() {
        let old = "let value = compute a;";
        let new = "let value = compute b;";
        let (o, n) = word_spans(old, new);
        assert_eq!(texts(old, &o), vec!["a;"]);
        assert_eq!(texts(new, &n), vec!["b;"]);
    }

    #[test]
    fn test_adjacent_tokens_merge() {
        // No token in common: every change is contiguous
        let old = "alpha beta";
        let new = "gamma  delta";
        let (o, n) = word_spans(old, new);
        assert_eq!(o, vec![WordChange { start: 0, end: old.len() }]);
        assert_eq!(n, vec![WordChange { start: 0, end: new.len() }]);
    }

    #[test]
    fn test_insertion_only_touches_new_side() {
        let (o, n) = word_spans("fn main()", "pub fn main()");
        assert!(o.is_empty());
        assert_eq!(texts("pub fn main()", &n), vec!["pub "]);
    }

    #[test]
    fn test_identical_lines_have_no_spans() {
        let (o, n) = word_spans("same", "same");
        assert!(o.is_empty() && n.is_empty());
    }

    #[test]
    fn test_multibyte_offsets_are_byte_offsets() {
        let old = "naïve café";
        let new = "naïve bar";
        let (o, n) = word_spans(old, new);
        assert_eq!(texts(old, &o), vec!["café"]);
        assert_eq!(texts(new, &n), vec!["bar"]);
    }
}
