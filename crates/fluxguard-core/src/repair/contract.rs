//! Output-contract enforcement: make a bare expression bind `result`.

use lazy_static::lazy_static;
use regex::Regex;

use crate::sandbox::RESULT_BINDING;

/// Lines at or above this length are only wrapped when they look like an
/// access on the dataset handle.
pub const MAX_WRAP_LEN: usize = 400;

lazy_static! {
    /// `df.x`, `df[...]`, `(...)`, `[...]` or `name(...)`.
    static ref ACCESS_LIKE: Regex = Regex::new(r"^(?:df[.\[]|[(\[]|\w+\()").unwrap();
}

/// True if `line` assigns at the top level: a lone `=` outside brackets,
/// string literals and comments. `==`, `!=`, `<=`, `>=` and keyword
/// arguments such as `head(n=1)` do not count.
pub fn has_assignment(line: &str) -> bool {
    let bytes = line.as_bytes();
    let mut depth = 0usize;
    let mut quote: Option<u8> = None;
    let mut escaped = false;
    for (i, &b) in bytes.iter().enumerate() {
        if let Some(q) = quote {
            match b {
                _ if escaped => escaped = false,
                b'\\' => escaped = true,
                _ if b == q => quote = None,
                _ => {}
            }
            continue;
        }
        match b {
            b'\'' | b'"' => quote = Some(b),
            b'#' => break,
            b'(' | b'[' | b'{' => depth += 1,
            b')' | b']' | b'}' => depth = depth.saturating_sub(1),
            b'=' if depth == 0 => {
                let prev = i.checked_sub(1).map(|p| bytes[p]);
                let next = bytes.get(i + 1).copied();
                if !matches!(prev, Some(b'=' | b'!' | b'<' | b'>')) && next != Some(b'=') {
                    return true;
                }
            }
            _ => {}
        }
    }
    false
}

/// Whether `snippet` is a single bare expression that should be wrapped.
pub fn looks_like_single_expression(snippet: &str) -> bool {
    let mut lines = snippet.lines().map(str::trim).filter(|l| !l.is_empty());
    let (Some(line), None) = (lines.next(), lines.next()) else {
        return false;
    };
    if line.starts_with(RESULT_BINDING) || has_assignment(line) {
        return false;
    }
    ACCESS_LIKE.is_match(line) || line.len() < MAX_WRAP_LEN
}

/// `result = <line>`.
pub fn bind_result(line: &str) -> String {
    format!("{} = {}", RESULT_BINDING, line.trim())
}

/// Rewrite a single bare expression as a result binding; leave anything
/// else untouched.
pub fn enforce_contract(snippet: &str) -> String {
    if looks_like_single_expression(snippet) && !snippet.contains(RESULT_BINDING) {
        bind_result(snippet)
    } else {
        snippet.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wraps_bare_expression() {
        assert_eq!(enforce_contract("df['src'].value_counts()"), "result = df['src'].value_counts()");
        assert_eq!(enforce_contract("  len(df) \n\n"), "result = len(df)");
        assert_eq!(
            enforce_contract("df[df['proto'] == 'tcp'].shape"),
            "result = df[df['proto'] == 'tcp'].shape"
        );
    }

    #[test]
    fn test_leaves_assignments_and_multiline_alone() {
        assert_eq!(enforce_contract("x = df.head()"), "x = df.head()");
        assert_eq!(enforce_contract("result = 1"), "result = 1");
        assert_eq!(enforce_contract("a = 1\nlen(df)"), "a = 1\nlen(df)");
        assert_eq!(enforce_contract("df['result'].sum()"), "df['result'].sum()");
    }

    #[test]
    fn test_long_lines_need_access_shape() {
        let long = format!("1 + {}", "1 + ".repeat(120)) + "1";
        assert_eq!(enforce_contract(&long), long);
        let long_access = format!("df[{}]", "'a', ".repeat(120));
        assert!(enforce_contract(&long_access).starts_with("result = "));
    }

    #[test]
    fn test_has_assignment() {
        assert!(has_assignment("x = 1"));
        assert!(has_assignment("df['a']=2"));
        assert!(!has_assignment("a == b"));
        assert!(!has_assignment("a != b and c <= d and e >= f"));
        assert!(has_assignment("total += 1"));
    }

    #[test]
    fn test_keyword_arguments_are_not_assignments() {
        assert!(!has_assignment("df.head(n=1)"));
        assert!(!has_assignment("df.nlargest(n=1, columns='Bytes_int')"));
        assert!(!has_assignment("df['src'].value_counts(normalize=True)"));
        assert!(!has_assignment("df.rename(columns={'a': 'b'}).groupby(by=['b']).size()"));
        assert!(!has_assignment("'a=b'.split('=')"));
        assert!(!has_assignment("len(df)  # n=1"));
        assert!(has_assignment("counts = df['src'].value_counts(normalize=True)"));
        assert!(has_assignment("df.loc[df['x'] == 1, 'y'] = 0"));
    }

    #[test]
    fn test_wraps_calls_with_keyword_arguments() {
        for line in [
            "df.head(n=1)",
            "df.nlargest(n=1, columns='Bytes_int')",
            "df['src'].value_counts(normalize=True)",
        ] {
            assert_eq!(enforce_contract(line), format!("result = {line}"));
        }
        let long_access = format!("df.sort_values(by='a', ascending=False)[{}]", "'a', ".repeat(120));
        assert_eq!(enforce_contract(&long_access), format!("result = {long_access}"));
    }
}
