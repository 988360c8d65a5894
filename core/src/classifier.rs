//! Heuristic mutation classification.
//!
//! There is no syntax tree here. "Refactor vs evolution" is approximated from
//! line deltas and a handful of regexes for externally visible declarations.
//! Misclassification is expected now and then and is not an error.

use std::collections::BTreeSet;
use std::str;
use std::sync::OnceLock;

use regex::Regex;
use warden_types::{MutationClass, ResourcePath};
use warden_utils::{compute_diff_stats, line_count};

/// Before/after view of one resource.
#[derive(Debug, Clone, Copy)]
pub struct ClassificationInput<'a> {
    pub resource: &'a ResourcePath,
    /// `None` when the resource did not exist before.
    pub before: Option<&'a [u8]>,
    /// `None` when the mutation deleted the resource.
    pub after: Option<&'a [u8]>,
    /// The caller says the intent's acceptance criteria changed.
    pub intent_changed: bool,
}

pub trait MutationClassifier: Send + Sync {
    fn classify(&self, input: &ClassificationInput<'_>) -> MutationClass;
}

/// Default classifier: relative line delta plus new-symbol detection.
#[derive(Debug, Clone, Copy)]
pub struct LineDeltaClassifier {
    threshold: f64,
}

impl Default for LineDeltaClassifier {
    fn default() -> Self {
        Self::new(warden_config::DEFAULT_CLASSIFIER_THRESHOLD)
    }
}

impl LineDeltaClassifier {
    #[must_use]
    pub const fn new(threshold: f64) -> Self {
        Self { threshold }
    }

    #[must_use]
    pub const fn threshold(&self) -> f64 {
        self.threshold
    }
}

impl MutationClassifier for LineDeltaClassifier {
    fn classify(&self, input: &ClassificationInput<'_>) -> MutationClass {
        let (before, after) = match (input.before, input.after) {
            _ if input.intent_changed => return MutationClass::IntentEvolution,
            (Some(before), Some(after)) => (before, after),
            _ => return MutationClass::IntentEvolution,
        };

        let new_symbols = introduced_symbols(before, after);
        if !new_symbols.is_empty() {
            tracing::debug!(
                resource = %input.resource,
                symbols = ?new_symbols,
                "New visible symbols"
            );
            return MutationClass::IntentEvolution;
        }

        let (additions, deletions) = compute_diff_stats(before, after);
        let ratio = f64::from(additions.max(deletions)) / f64::from(line_count(before).max(1));
        if ratio > self.threshold {
            MutationClass::IntentEvolution
        } else {
            MutationClass::AstRefactor
        }
    }
}

struct SymbolPatterns {
    js_export: Regex,
    js_function: Regex,
    rust_pub: Regex,
    py_def: Regex,
    py_class: Regex,
    go_func: Regex,
    route_call: Regex,
    route_decorator: Regex,
}

static SYMBOL_PATTERNS: OnceLock<SymbolPatterns> = OnceLock::new();

fn symbol_patterns() -> &'static SymbolPatterns {
    SYMBOL_PATTERNS.get_or_init(|| SymbolPatterns {
        js_export: Regex::new(
            r"(?m)^\s*export\s+(?:default\s+)?(?:declare\s+)?(?:abstract\s+)?(?:async\s+)?(?:function\*?|class|const|let|var|interface|type|enum)\s+([A-Za-z_$][\w$]*)",
        )
        .expect("valid export regex"),
        js_function: Regex::new(r"(?m)^(?:async\s+)?function\*?\s+([A-Za-z_$][\w$]*)")
            .expect("valid function regex"),
        rust_pub: Regex::new(
            r"(?m)^\s*pub(?:\([^)]*\))?\s+(?:const\s+)?(?:async\s+)?(?:unsafe\s+)?(?:fn|struct|enum|trait|type|const|static|mod|union)\s+([A-Za-z_]\w*)",
        )
        .expect("valid pub item regex"),
        py_def: Regex::new(r"(?m)^(?:async\s+)?def\s+([A-Za-z_]\w*)").expect("valid def regex"),
        py_class: Regex::new(r"(?m)^class\s+([A-Za-z_]\w*)").expect("valid class regex"),
        go_func: Regex::new(r"(?m)^func\s+(?:\([^)]*\)\s*)?([A-Z]\w*)")
            .expect("valid go func regex"),
        route_call: Regex::new(
            r#"(?m)\b(?:app|router|server|api|route[rs]?)\.(get|post|put|patch|delete|head|options|all|route)\s*\(\s*['"`]([^'"`]+)['"`]"#,
        )
        .expect("valid route call regex"),
        route_decorator: Regex::new(
            r#"(?m)^\s*@\w+\.(get|post|put|patch|delete|route)\(\s*['"]([^'"]+)['"]"#,
        )
        .expect("valid route decorator regex"),
    })
}

/// Visible symbols and routes declared in `text`, tagged by kind.
fn visible_symbols(text: &str) -> BTreeSet<String> {
    let patterns = symbol_patterns();
    let mut symbols = BTreeSet::new();

    for (tag, regex) in [
        ("export", &patterns.js_export),
        ("function", &patterns.js_function),
        ("pub", &patterns.rust_pub),
        ("def", &patterns.py_def),
        ("class", &patterns.py_class),
        ("func", &patterns.go_func),
    ] {
        for caps in regex.captures_iter(text) {
            symbols.insert(format!("{tag} {}", &caps[1]));
        }
    }

    for regex in [&patterns.route_call, &patterns.route_decorator] {
        for caps in regex.captures_iter(text) {
            symbols.insert(format!("route {} {}", caps[1].to_ascii_uppercase(), &caps[2]));
        }
    }

    symbols
}

/// Symbols present after the change that were not present before.
/// A rename shows up here as a new name.
fn introduced_symbols(before: &[u8], after: &[u8]) -> Vec<String> {
    let before = visible_symbols(str::from_utf8(before).unwrap_or(""));
    let after = visible_symbols(str::from_utf8(after).unwrap_or(""));
    after.difference(&before).cloned().collect()
}
