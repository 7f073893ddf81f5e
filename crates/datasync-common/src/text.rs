//! Header and identifier normalisation

/// Normalise a column header to snake_case.
///
/// Whitespace and dashes become word boundaries, a lower-to-upper case change
/// starts a new word, and runs of capitals stay together:
///
/// ```
/// use datasync_common::text::snake_case;
///
/// assert_eq!(snake_case("First Name"), "first_name");
/// assert_eq!(snake_case("userID"), "user_id");
/// assert_eq!(snake_case("already_snake"), "already_snake");
/// ```
pub fn snake_case(value: &str) -> String {
    let value = value.trim_start_matches('\u{feff}').trim();
    let mut out = String::with_capacity(value.len() + 4);
    let mut prev: Option<char> = None;

    for ch in value.chars() {
        if ch.is_whitespace() || ch == '-' || ch == '_' {
            push_separator(&mut out);
        } else if ch.is_uppercase() {
            if matches!(prev, Some(p) if p.is_lowercase() || p.is_ascii_digit()) {
                push_separator(&mut out);
            }
            out.extend(ch.to_lowercase());
        } else {
            out.push(ch);
        }
        prev = Some(ch);
    }

    out.trim_matches('_').to_string()
}

fn push_separator(out: &mut String) {
    if !out.is_empty() && !out.ends_with('_') {
        out.push('_');
    }
}

/// Normalise every header in a list
pub fn snake_case_all<I, S>(headers: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    headers.into_iter().map(|h| snake_case(h.as_ref())).collect()
}
