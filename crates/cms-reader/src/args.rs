//! Shell-style argument splitting and quoting.
//!
//! Compile and link fragments in the reply are command-line snippets; they
//! are split with POSIX shell quoting rules.

/// Splits `input` into arguments.
///
/// Whitespace separates arguments. Single quotes are literal, double quotes
/// honor `\"`, `\\`, `\$` and `` \` `` escapes, and a backslash outside
/// quotes escapes the next character.
///
/// # Examples
///
/// ```
/// use cms_reader::split_args;
///
/// assert_eq!(
///     split_args(r#"-DNAME="a b" -I'/x y' -O2"#),
///     ["-DNAME=a b", "-I/x y", "-O2"],
/// );
/// ```
#[must_use]
pub fn split_args(input: &str) -> Vec<String> {
    let mut args = Vec::new();
    let mut current = String::new();
    let mut in_arg = false;
    let mut chars = input.chars();

    while let Some(c) = chars.next() {
        match c {
            c if c.is_whitespace() => {
                if in_arg {
                    args.push(std::mem::take(&mut current));
                    in_arg = false;
                }
            }
            '\'' => {
                in_arg = true;
                for q in chars.by_ref() {
                    if q == '\'' {
                        break;
                    }
                    current.push(q);
                }
            }
            '"' => {
                in_arg = true;
                while let Some(q) = chars.next() {
                    match q {
                        '"' => break,
                        '\\' => match chars.next() {
                            Some(e @ ('"' | '\\' | '$' | '`')) => current.push(e),
                            Some(e) => {
                                current.push('\\');
                                current.push(e);
                            }
                            None => current.push('\\'),
                        },
                        _ => current.push(q),
                    }
                }
            }
            '\\' => {
                in_arg = true;
                if let Some(e) = chars.next() {
                    current.push(e);
                }
            }
            _ => {
                in_arg = true;
                current.push(c);
            }
        }
    }
    if in_arg {
        args.push(current);
    }
    args
}

/// Quotes `arg` for display in a shell command line.
#[must_use]
pub fn quote_arg(arg: &str) -> String {
    let safe = !arg.is_empty()
        && arg
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "-_=+:,./@%".contains(c));
    if safe {
        arg.to_owned()
    } else {
        format!("'{}'", arg.replace('\'', r"'\''"))
    }
}

/// Joins arguments into a displayable command line.
#[must_use]
pub fn join_args<S: AsRef<str>>(args: &[S]) -> String {
    args.iter()
        .map(|a| quote_arg(a.as_ref()))
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_plain() {
        assert_eq!(split_args("  -g   -O0\t-Wall\n"), ["-g", "-O0", "-Wall"]);
        assert!(split_args("").is_empty());
        assert!(split_args("   ").is_empty());
    }

    #[test]
    fn test_split_quotes() {
        assert_eq!(split_args(r#"-D'A=1 2'"#), ["-DA=1 2"]);
        assert_eq!(split_args(r#""""#), [""]);
        assert_eq!(split_args(r#"-DV=\"x\""#), [r#"-DV="x""#]);
        assert_eq!(split_args(r#""a\nb""#), [r"a\nb"]);
        assert_eq!(split_args(r"a\ b c"), ["a b", "c"]);
    }

    #[test]
    fn test_split_unterminated_quote_keeps_text() {
        assert_eq!(split_args("'abc"), ["abc"]);
    }

    #[test]
    fn test_quote_and_join() {
        assert_eq!(quote_arg("-DCMAKE_BUILD_TYPE:STRING=Debug"), "-DCMAKE_BUILD_TYPE:STRING=Debug");
        assert_eq!(quote_arg("a b"), "'a b'");
        assert_eq!(quote_arg(""), "''");
        assert_eq!(quote_arg("it's"), r"'it'\''s'");
        assert_eq!(join_args(&["cmake", "-G", "Unix Makefiles"]), "cmake -G 'Unix Makefiles'");
    }
}
