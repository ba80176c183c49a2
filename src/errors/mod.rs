//! Build-time diagnostics
//!
//! Every problem found while generating a module is collected rather than
//! raised, so one pass reports all of them. Each diagnostic carries a stable
//! code, the offending symbol and its location, a title and an optional
//! elaboration.

use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SourceLocation {
    #[serde(default)]
    pub file: String,
    #[serde(default)]
    pub line: usize,
    #[serde(default)]
    pub col: usize,
}

impl SourceLocation {
    pub fn new(file: impl Into<String>, line: usize, col: usize) -> Self {
        Self {
            file: file.into(),
            line,
            col,
        }
    }

    pub fn is_unknown(&self) -> bool {
        self.file.is_empty() && self.line == 0
    }
}

impl fmt::Display for SourceLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_unknown() {
            return f.write_str("<unknown>");
        }
        if !self.file.is_empty() {
            write!(f, "{}:", self.file)?;
        }
        write!(f, "{}:{}", self.line, self.col)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum DiagnosticCode {
    UnsupportedType,
    TypeNotExported,
    UnsupportedCallingConvention,
    OverloadedConstructor,
    InvalidInitializer,
    VisibilityViolation,
    NameCollision,
}

impl DiagnosticCode {
    /// Stable identifier reported to the build pipeline.
    pub fn code(self) -> &'static str {
        match self {
            Self::UnsupportedType => "JSB1001",
            Self::TypeNotExported => "JSB1002",
            Self::UnsupportedCallingConvention => "JSB1003",
            Self::OverloadedConstructor => "JSB1004",
            Self::InvalidInitializer => "JSB1005",
            Self::VisibilityViolation => "JSB1006",
            Self::NameCollision => "JSB1007",
        }
    }

    pub fn title(self) -> &'static str {
        match self {
            Self::UnsupportedType => "Unsupported type shape",
            Self::TypeNotExported => "Referenced type not exported",
            Self::UnsupportedCallingConvention => "Unsupported parameter calling convention",
            Self::OverloadedConstructor => "Unsupported overloaded constructor",
            Self::InvalidInitializer => "Invalid or duplicate module initializer",
            Self::VisibilityViolation => "Export visibility violation",
            Self::NameCollision => "Name collision",
        }
    }
}

impl fmt::Display for DiagnosticCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diagnostic {
    pub code: DiagnosticCode,
    /// Fully qualified symbol the diagnostic is about, e.g. `app.Calc.Add`.
    pub symbol: String,
    pub location: SourceLocation,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub elaboration: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub suggestions: Vec<String>,
}

impl Diagnostic {
    pub fn new(
        code: DiagnosticCode,
        symbol: impl Into<String>,
        location: SourceLocation,
        message: impl Into<String>,
    ) -> Self {
        Self {
            code,
            symbol: symbol.into(),
            location,
            message: message.into(),
            elaboration: None,
            suggestions: Vec::new(),
        }
    }

    pub fn title(&self) -> &'static str {
        self.code.title()
    }

    pub fn with_elaboration(mut self, elaboration: impl Into<String>) -> Self {
        self.elaboration = Some(elaboration.into());
        self
    }

    pub fn with_suggestion(mut self, suggestion: String) -> Self {
        self.suggestions.push(suggestion);
        self
    }

    pub fn with_suggestions(mut self, suggestions: Vec<String>) -> Self {
        self.suggestions = suggestions;
        self
    }

    /// Attach "did you mean" hints for a misspelled type name.
    pub fn with_similar(self, similar: &[String]) -> Self {
        if similar.is_empty() {
            return self;
        }
        let suggestions = similar
            .iter()
            .take(3)
            .map(|s| format!("Did you mean '{}'?", s))
            .collect();
        self.with_suggestions(suggestions)
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: {} {}: {}",
            self.location,
            self.code,
            self.code.title(),
            self.message
        )?;
        if let Some(elaboration) = &self.elaboration {
            write!(f, "\n  note: {}", elaboration)?;
        }
        for suggestion in &self.suggestions {
            write!(f, "\n  hint: {}", suggestion)?;
        }
        Ok(())
    }
}

/// Collector for diagnostics raised during one generation session
#[derive(Debug)]
pub struct Diagnostics {
    items: Vec<Diagnostic>,
    max_items: usize,
    dropped: usize,
}

impl Diagnostics {
    pub fn new() -> Self {
        Self::with_max(100)
    }

    pub fn with_max(max_items: usize) -> Self {
        Self {
            items: Vec::new(),
            max_items: max_items.max(1),
            dropped: 0,
        }
    }

    pub fn add(&mut self, diagnostic: Diagnostic) {
        tracing::debug!(
            target: "diagnostics",
            code = diagnostic.code.code(),
            symbol = %diagnostic.symbol,
            "{}",
            diagnostic.message
        );
        if self.items.len() < self.max_items {
            self.items.push(diagnostic);
        } else {
            self.dropped += 1;
        }
    }

    pub fn extend(&mut self, diagnostics: impl IntoIterator<Item = Diagnostic>) {
        for diagnostic in diagnostics {
            self.add(diagnostic);
        }
    }

    pub fn has_errors(&self) -> bool {
        !self.items.is_empty() || self.dropped > 0
    }

    /// Total raised, including diagnostics beyond the cap.
    pub fn error_count(&self) -> usize {
        self.items.len() + self.dropped
    }

    pub fn dropped(&self) -> usize {
        self.dropped
    }

    pub fn items(&self) -> &[Diagnostic] {
        &self.items
    }

    pub fn with_code(&self, code: DiagnosticCode) -> impl Iterator<Item = &Diagnostic> {
        self.items.iter().filter(move |d| d.code == code)
    }

    pub fn into_vec(self) -> Vec<Diagnostic> {
        self.items
    }

    pub fn clear(&mut self) {
        self.items.clear();
        self.dropped = 0;
    }
}

impl Default for Diagnostics {
    fn default() -> Self {
        Self::new()
    }
}

/// Compute Levenshtein distance for "did you mean" suggestions
pub fn levenshtein_distance(a: &str, b: &str) -> usize {
    let a_chars: Vec<char> = a.chars().collect();
    let b_chars: Vec<char> = b.chars().collect();
    let b_len = b_chars.len();

    if a_chars.is_empty() {
        return b_len;
    }
    if b_len == 0 {
        return a_chars.len();
    }

    let mut previous: Vec<usize> = (0..=b_len).collect();
    let mut current = vec![0; b_len + 1];

    for (i, a_char) in a_chars.iter().enumerate() {
        current[0] = i + 1;
        for j in 1..=b_len {
            let cost = usize::from(*a_char != b_chars[j - 1]);
            current[j] = (previous[j] + 1)
                .min(current[j - 1] + 1)
                .min(previous[j - 1] + cost);
        }
        std::mem::swap(&mut previous, &mut current);
    }

    previous[b_len]
}

/// Find similar names for "did you mean" suggestions, closest first
pub fn find_similar_names(target: &str, candidates: &[String], max_distance: usize) -> Vec<String> {
    let mut results: Vec<(String, usize)> = candidates
        .iter()
        .map(|c| (c.clone(), levenshtein_distance(target, c)))
        .filter(|(_, dist)| *dist <= max_distance && *dist > 0)
        .collect();

    results.sort_by(|(a_name, a_dist), (b_name, b_dist)| a_dist.cmp(b_dist).then_with(|| a_name.cmp(b_name)));
    results.into_iter().map(|(name, _)| name).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes_are_stable() {
        assert_eq!(DiagnosticCode::UnsupportedType.code(), "JSB1001");
        assert_eq!(DiagnosticCode::NameCollision.code(), "JSB1007");
        assert_eq!(DiagnosticCode::InvalidInitializer.title(), "Invalid or duplicate module initializer");
    }

    #[test]
    fn test_display_includes_location_and_hints() {
        let diag = Diagnostic::new(
            DiagnosticCode::TypeNotExported,
            "app.Calc.Run",
            SourceLocation::new("Calc.cs", 12, 5),
            "type 'app.Pont' is not exported",
        )
        .with_similar(&["app.Point".to_string()]);

        let text = diag.to_string();
        assert!(text.starts_with("Calc.cs:12:5: JSB1002 Referenced type not exported"));
        assert!(text.contains("hint: Did you mean 'app.Point'?"));
    }

    #[test]
    fn test_collector_caps_but_counts() {
        let mut diags = Diagnostics::with_max(2);
        for i in 0..5 {
            diags.add(Diagnostic::new(
                DiagnosticCode::NameCollision,
                format!("m{i}"),
                SourceLocation::default(),
                "collision",
            ));
        }
        assert_eq!(diags.items().len(), 2);
        assert_eq!(diags.error_count(), 5);
        assert!(diags.has_errors());
    }

    #[test]
    fn test_levenshtein() {
        assert_eq!(levenshtein_distance("kitten", "sitting"), 3);
        assert_eq!(levenshtein_distance("", "abc"), 3);
        assert_eq!(levenshtein_distance("same", "same"), 0);
    }

    #[test]
    fn test_find_similar_names() {
        let candidates = vec!["app.Point".to_string(), "app.Paint".to_string(), "app.Vector".to_string()];
        let similar = find_similar_names("app.Pont", &candidates, 2);
        assert_eq!(similar, vec!["app.Point".to_string(), "app.Paint".to_string()]);
    }
}
