/// Canonical form of a text used as its identity key: surrounding whitespace
/// trimmed and inner whitespace runs collapsed to one space. Case is kept
/// (video IDs are case-sensitive).
pub fn normalize_text(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn collapses_whitespace() {
        assert_eq!(normalize_text("  India  is\tgreat \n"), "India is great");
    }

    #[test]
    fn keeps_case() {
        assert_ne!(normalize_text("dQw4w9WgXcQ"), normalize_text("dqw4w9wgxcq"));
    }

    #[test]
    fn keeps_non_latin_scripts() {
        assert_eq!(normalize_text(" भारत  महान "), "भारत महान");
    }

    #[test]
    fn empty_stays_empty() {
        assert_eq!(normalize_text("   "), "");
    }
}
