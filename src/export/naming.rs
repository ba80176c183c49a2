use serde::{Deserialize, Serialize};

/// Transformation applied to member names on the guest side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CaseTransform {
    /// First letter lower-cased: `GetValue` becomes `getValue`.
    #[default]
    CamelCase,
    Preserve,
}

impl CaseTransform {
    pub fn apply(self, name: &str) -> String {
        match self {
            Self::Preserve => name.to_string(),
            Self::CamelCase => {
                let mut chars = name.chars();
                match chars.next() {
                    Some(first) => first.to_lowercase().chain(chars).collect(),
                    None => String::new(),
                }
            }
        }
    }

    /// Guest name of a member: the override when one is given, otherwise the
    /// transformed host name.
    pub fn external_name(self, name: &str, export_name: Option<&str>) -> String {
        match export_name {
            Some(name) => name.to_string(),
            None => self.apply(name),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_camel_case_lowers_first_letter_only() {
        let naming = CaseTransform::CamelCase;
        assert_eq!(naming.apply("GetValue"), "getValue");
        assert_eq!(naming.apply("URL"), "uRL");
        assert_eq!(naming.apply("already"), "already");
        assert_eq!(naming.apply(""), "");
    }

    #[test]
    fn test_override_wins() {
        assert_eq!(CaseTransform::CamelCase.external_name("Add", Some("plus")), "plus");
        assert_eq!(CaseTransform::Preserve.external_name("Add", None), "Add");
    }
}
