//! Pulling the candidate implementation out of a free-form response.

use regex::Regex;
use std::sync::LazyLock;

/// Fence tags accepted as source or markup. An untagged fence also qualifies.
const CODE_TAGS: &[&str] = &[
    "javascript",
    "typescript",
    "js",
    "ts",
    "jsx",
    "tsx",
    "java",
    "csharp",
    "cs",
    "c#",
    "html",
    "htm",
    "xml",
    "css",
    "scss",
];

static FENCE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)```([^\n`]*)\r?\n(.*?)```").expect("fence pattern is valid")
});

/// Returns the first fenced block tagged with a source language (or untagged),
/// trimmed. Without a matching fence the whole response is returned trimmed.
pub fn extract_code(response: &str) -> String {
    for caps in FENCE_RE.captures_iter(response) {
        let tag = caps
            .get(1)
            .map(|m| m.as_str())
            .unwrap_or_default()
            .split_whitespace()
            .next()
            .unwrap_or_default()
            .to_ascii_lowercase();

        if tag.is_empty() || CODE_TAGS.contains(&tag.as_str()) {
            if let Some(body) = caps.get(2) {
                return body.as_str().trim().to_string();
            }
        }
    }
    response.trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extracts_tagged_block() {
        let response = "Here you go:\n```javascript\nmodule.exports = 1;\n```\nDone.";
        assert_eq!(extract_code(response), "module.exports = 1;");
    }

    #[test]
    fn test_markup_fences_are_code() {
        let response = "```text\nnotes\n```\n```html\n<main id=\"app\"></main>\n```";
        assert_eq!(extract_code(response), "<main id=\"app\"></main>");

        let response = "```XML\n<project/>\n```";
        assert_eq!(extract_code(response), "<project/>");
    }

    #[test]
    fn test_skips_non_code_fences() {
        let response = "```bash\nnpm install\n```\n\n```ts\nexport const x = 1;\n```";
        assert_eq!(extract_code(response), "export const x = 1;");
    }

    #[test]
    fn test_untagged_fence_counts() {
        let response = "```\npublic class Fixture {}\n```";
        assert_eq!(extract_code(response), "public class Fixture {}");
    }

    #[test]
    fn test_tag_with_attributes_and_case() {
        let response = "```Java title=\"Fixture.java\"\nclass A {}\n```";
        assert_eq!(extract_code(response), "class A {}");
    }

    #[test]
    fn test_no_fence_returns_trimmed_response() {
        assert_eq!(extract_code("  const a = 1;\n"), "const a = 1;");
    }

    #[test]
    fn test_csharp_hash_tag() {
        let response = "```c#\npublic class Users {}\n```";
        assert_eq!(extract_code(response), "public class Users {}");
    }
}
