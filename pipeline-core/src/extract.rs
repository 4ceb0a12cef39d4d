//! Locating the result inside raw engine output.
//!
//! Engines may print banners, echoed input or log lines ahead of the part a
//! caller wants. The result starts at a known begin-marker such as an opening
//! tag.

/// The slice of `text` from the first occurrence of `marker` onward.
pub fn extract_from_marker<'a>(text: &'a str, marker: &str) -> Option<&'a str> {
    text.find(marker).map(|start| &text[start..])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_skips_leading_banner() {
        let raw = "Loading model... done\n<sentences>\n<sentence/>\n</sentences>";
        assert_eq!(
            extract_from_marker(raw, "<sentences>"),
            Some("<sentences>\n<sentence/>\n</sentences>")
        );
    }

    #[test]
    fn test_first_occurrence_wins() {
        assert_eq!(extract_from_marker("a <x> b <x> c", "<x>"), Some("<x> b <x> c"));
    }

    #[test]
    fn test_missing_marker() {
        assert_eq!(extract_from_marker("no result here", "<sentences>"), None);
    }

    #[test]
    fn test_multibyte_prefix() {
        assert_eq!(extract_from_marker("準備完了\n今日 名詞", "今日"), Some("今日 名詞"));
    }
}
