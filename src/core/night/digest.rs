//! Context digest assembly.
//!
//! Collaborator sections are capped independently before concatenation so a
//! runaway section (a huge meeting transcript, an unbounded note file) can
//! never crowd out the others or blow the planner's context.

/// Truncate to at most `cap` bytes on a char boundary.
pub(crate) fn truncate_chars(text: &str, cap: usize) -> &str {
    if text.len() <= cap {
        return text;
    }
    let mut cut = cap;
    while !text.is_char_boundary(cut) {
        cut -= 1;
    }
    &text[..cut]
}

/// Assemble titled sections into one digest string.
pub fn assemble_digest(sections: &[(String, String)], per_section_cap: usize) -> String {
    let mut digest = String::new();
    for (title, body) in sections {
        let body = truncate_chars(body.trim(), per_section_cap);
        if body.is_empty() {
            continue;
        }
        digest.push_str("## ");
        digest.push_str(title);
        digest.push('\n');
        digest.push_str(body);
        digest.push_str("\n\n");
    }
    if digest.is_empty() {
        digest.push_str("(no context available)");
    }
    digest
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sections_capped_independently() {
        let sections = vec![
            ("notes".to_string(), "x".repeat(100)),
            ("calendar".to_string(), "y".repeat(10)),
        ];
        let digest = assemble_digest(&sections, 20);

        assert_eq!(digest.matches('x').count(), 20);
        assert_eq!(digest.matches('y').count(), 10);
        assert!(digest.contains("## notes"));
        assert!(digest.contains("## calendar"));
    }

    #[test]
    fn truncation_respects_char_boundaries() {
        let text = "héllo wörld";
        for cap in 0..text.len() {
            let cut = truncate_chars(text, cap);
            assert!(cut.len() <= cap);
            assert!(text.starts_with(cut));
        }
    }

    #[test]
    fn empty_sections_skipped() {
        let sections = vec![
            ("empty".to_string(), "   ".to_string()),
            ("real".to_string(), "content".to_string()),
        ];
        let digest = assemble_digest(&sections, 100);
        assert!(!digest.contains("## empty"));
        assert!(digest.contains("## real"));
    }

    #[test]
    fn no_sections_yields_placeholder() {
        let digest = assemble_digest(&[], 100);
        assert_eq!(digest, "(no context available)");
    }
}
