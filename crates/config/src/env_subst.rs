/// Replace `${ENV_VAR}` placeholders in raw config text.
///
/// Unresolvable variables are left as-is.
pub fn substitute_env(input: &str) -> String {
    substitute_env_with(input, |name| std::env::var(name).ok())
}

/// Replace `${ENV_VAR}` placeholders using a custom lookup function.
pub(crate) fn substitute_env_with(input: &str, lookup: impl Fn(&str) -> Option<String>) -> String {
    let mut result = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch != '$' || chars.peek() != Some(&'{') {
            result.push(ch);
            continue;
        }
        chars.next();

        let mut name = String::new();
        let mut closed = false;
        for c in chars.by_ref() {
            if c == '}' {
                closed = true;
                break;
            }
            name.push(c);
        }

        match (closed, name.is_empty()) {
            (true, false) => match lookup(&name) {
                Some(val) => result.push_str(&val),
                None => {
                    result.push_str("${");
                    result.push_str(&name);
                    result.push('}');
                },
            },
            (true, true) => result.push_str("${}"),
            (false, _) => {
                result.push_str("${");
                result.push_str(&name);
            },
        }
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lookup(name: &str) -> Option<String> {
        match name {
            "RUKUN_TEST_DB" => Some("/srv/rukun/rukun.db".to_string()),
            _ => None,
        }
    }

    #[test]
    fn substitutes_known_var() {
        assert_eq!(
            substitute_env_with("path = \"${RUKUN_TEST_DB}\"", lookup),
            "path = \"/srv/rukun/rukun.db\""
        );
    }

    #[test]
    fn leaves_unknown_var() {
        assert_eq!(
            substitute_env_with("${RUKUN_NOT_SET_ANYWHERE}", lookup),
            "${RUKUN_NOT_SET_ANYWHERE}"
        );
    }

    #[test]
    fn unterminated_placeholder_is_literal() {
        assert_eq!(substitute_env_with("a${RUKUN", lookup), "a${RUKUN");
    }

    #[test]
    fn empty_placeholder_is_literal() {
        assert_eq!(substitute_env_with("x${}y", lookup), "x${}y");
    }

    #[test]
    fn no_placeholders() {
        assert_eq!(substitute_env("plain $text"), "plain $text");
    }
}
