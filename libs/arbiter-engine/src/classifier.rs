/// Language Classifier
///
/// Assigns a language tag to source text by matching an ordered table of
/// textual signatures. The first signature that fully matches wins; when
/// nothing matches the configured default (normally `unknown`) is returned.
///
/// Classification only serves auto-detection for people who did not pick a
/// language. It never feeds a security decision and an explicit hint on the
/// submission always takes precedence.
use arbiter_common::types::LanguageTag;
use serde::{Deserialize, Serialize};

/// Necessary markers for one language.
///
/// A signature matches when every `all_of` marker is present, at least one
/// `any_of` marker is present (if any are listed) and no `none_of` marker is.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Signature {
    pub language: String,
    #[serde(default)]
    pub all_of: Vec<String>,
    #[serde(default)]
    pub any_of: Vec<String>,
    #[serde(default)]
    pub none_of: Vec<String>,
}

impl Signature {
    fn new(language: &str, all_of: &[&str], any_of: &[&str], none_of: &[&str]) -> Self {
        let owned = |markers: &[&str]| markers.iter().map(|m| m.to_string()).collect();
        Self {
            language: language.to_string(),
            all_of: owned(all_of),
            any_of: owned(any_of),
            none_of: owned(none_of),
        }
    }

    pub fn matches(&self, source: &str) -> bool {
        self.all_of.iter().all(|m| source.contains(m.as_str()))
            && (self.any_of.is_empty() || self.any_of.iter().any(|m| source.contains(m.as_str())))
            && !self.none_of.iter().any(|m| source.contains(m.as_str()))
    }
}

/// Signature table for the runners shipped with the engine, in priority order.
pub fn builtin_signatures() -> Vec<Signature> {
    vec![
        Signature::new("java", &["class ", "static void main"], &[], &[]),
        Signature::new(
            "rust",
            &[],
            &["fn main(", "println!(", "let mut "],
            &["#include"],
        ),
        Signature::new(
            "cpp",
            &[],
            &["#include", "int main(", "std::cout", "cin >>"],
            &["console.log"],
        ),
        Signature::new(
            "javascript",
            &[],
            &["console.log", "require(", "function ", "=>", "const ", "let "],
            &["def ", "import sys"],
        ),
        Signature::new(
            "python",
            &[],
            &["def ", "print(", "input(", "import ", "elif ", "range("],
            &["console.log", "#include"],
        ),
    ]
}

#[derive(Debug, Clone)]
pub struct Classifier {
    signatures: Vec<Signature>,
    fallback: LanguageTag,
}

impl Classifier {
    pub fn new(signatures: Vec<Signature>, fallback: LanguageTag) -> Self {
        Self {
            signatures,
            fallback,
        }
    }

    pub fn builtin() -> Self {
        Self::new(builtin_signatures(), LanguageTag::unknown())
    }

    pub fn classify(&self, source: &str) -> LanguageTag {
        self.signatures
            .iter()
            .find(|s| s.matches(source))
            .map(|s| LanguageTag::new(&s.language))
            .unwrap_or_else(|| self.fallback.clone())
    }

    /// The hint wins whenever one is given.
    pub fn resolve(&self, hint: Option<&LanguageTag>, source: &str) -> LanguageTag {
        match hint {
            Some(tag) => tag.clone(),
            None => self.classify(source),
        }
    }
}
