//! Per-row validation rules
//!
//! Every rule except [`Rule::Required`] passes on an empty value. Messages
//! name the field with underscores turned into spaces, e.g.
//! "The first name field is required.", and all messages of a row are
//! joined with a single space.

use regex::Regex;
use std::sync::OnceLock;

use super::types::Row;

#[derive(Debug, Clone)]
pub enum Rule {
    Required(String),
    Integer(String),
    Numeric(String),
    Email(String),
    MaxLength(String, usize),
    In(String, Vec<String>),
    Pattern(String, Regex),
}

impl Rule {
    pub fn required(field: impl Into<String>) -> Self {
        Rule::Required(field.into())
    }

    pub fn integer(field: impl Into<String>) -> Self {
        Rule::Integer(field.into())
    }

    pub fn numeric(field: impl Into<String>) -> Self {
        Rule::Numeric(field.into())
    }

    pub fn email(field: impl Into<String>) -> Self {
        Rule::Email(field.into())
    }

    pub fn max_length(field: impl Into<String>, max: usize) -> Self {
        Rule::MaxLength(field.into(), max)
    }

    pub fn one_of<I, S>(field: impl Into<String>, allowed: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Rule::In(field.into(), allowed.into_iter().map(Into::into).collect())
    }

    pub fn pattern(field: impl Into<String>, pattern: Regex) -> Self {
        Rule::Pattern(field.into(), pattern)
    }

    pub fn field(&self) -> &str {
        match self {
            Rule::Required(f)
            | Rule::Integer(f)
            | Rule::Numeric(f)
            | Rule::Email(f)
            | Rule::MaxLength(f, _)
            | Rule::In(f, _)
            | Rule::Pattern(f, _) => f,
        }
    }

    /// The failure message, if the row breaks this rule
    pub fn check(&self, row: &Row) -> Option<String> {
        let value = row.get(self.field()).unwrap_or("").trim();
        let label = self.field().replace('_', " ");

        if value.is_empty() {
            return match self {
                Rule::Required(_) => Some(format!("The {} field is required.", label)),
                _ => None,
            };
        }

        let ok = match self {
            Rule::Required(_) => true,
            Rule::Integer(_) => value.parse::<i64>().is_ok(),
            Rule::Numeric(_) => value.parse::<f64>().map(f64::is_finite).unwrap_or(false),
            Rule::Email(_) => email_pattern().is_match(value),
            Rule::MaxLength(_, max) => value.chars().count() <= *max,
            Rule::In(_, allowed) => allowed.iter().any(|a| a == value),
            Rule::Pattern(_, pattern) => pattern.is_match(value),
        };
        if ok {
            return None;
        }

        Some(match self {
            Rule::Required(_) => format!("The {} field is required.", label),
            Rule::Integer(_) => format!("The {} field must be an integer.", label),
            Rule::Numeric(_) => format!("The {} field must be a number.", label),
            Rule::Email(_) => format!("The {} field must be a valid email address.", label),
            Rule::MaxLength(_, max) => {
                format!("The {} field must not be greater than {} characters.", label, max)
            }
            Rule::In(_, _) => format!("The selected {} is invalid.", label),
            Rule::Pattern(_, _) => format!("The {} field format is invalid.", label),
        })
    }
}

#[allow(clippy::expect_used)]
fn email_pattern() -> &'static Regex {
    static EMAIL: OnceLock<Regex> = OnceLock::new();
    EMAIL.get_or_init(|| Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").expect("static email pattern"))
}

/// Messages of every broken rule, joined with a space
pub fn validate(row: &Row, rules: &[Rule]) -> Result<(), String> {
    let messages: Vec<String> = rules.iter().filter_map(|rule| rule.check(row)).collect();
    if messages.is_empty() {
        Ok(())
    } else {
        Err(messages.join(" "))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn row(pairs: &[(&str, &str)]) -> Row {
        Row::from_pairs(pairs.iter().copied())
    }

    #[test]
    fn test_required_and_joined_messages() {
        let rules = vec![Rule::required("first_name"), Rule::email("email")];
        let err = validate(&row(&[("first_name", " "), ("email", "nope")]), &rules).unwrap_err();
        assert_eq!(
            err,
            "The first name field is required. The email field must be a valid email address."
        );
    }

    #[test]
    fn test_optional_rules_skip_empty_values() {
        let rules = vec![Rule::integer("age"), Rule::max_length("bio", 3)];
        assert!(validate(&row(&[("age", ""), ("bio", "")]), &rules).is_ok());
        assert!(validate(&row(&[]), &rules).is_ok());
    }

    #[test]
    fn test_value_rules() {
        let r = row(&[("age", "4.5"), ("score", "4.5"), ("plan", "gold"), ("bio", "abcd")]);
        assert!(Rule::integer("age").check(&r).is_some());
        assert!(Rule::numeric("score").check(&r).is_none());
        assert_eq!(
            Rule::one_of("plan", ["free", "pro"]).check(&r).unwrap(),
            "The selected plan is invalid."
        );
        assert!(Rule::max_length("bio", 4).check(&r).is_none());
        assert!(Rule::max_length("bio", 3).check(&r).is_some());
    }

    #[test]
    fn test_pattern_rule() {
        let r = row(&[("sku", "AB-123")]);
        let rule = Rule::pattern("sku", Regex::new(r"^[A-Z]{2}-\d{3}$").unwrap());
        assert!(rule.check(&r).is_none());
        let strict = Rule::pattern("sku", Regex::new(r"^\d+$").unwrap());
        assert_eq!(strict.check(&r).unwrap(), "The sku field format is invalid.");
    }
}
