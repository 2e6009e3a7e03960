//! Splits a batch of SQL into individual statements.

#[derive(Clone, Copy, PartialEq, Eq)]
enum Mode {
    Code,
    Quoted(char),
    LineComment,
    BlockComment,
}

/// Splits `text` on semicolons that sit outside string literals, quoted
/// identifiers and comments. Statements are trimmed; segments holding only
/// whitespace or comments are dropped.
pub fn split_statements(text: &str) -> Vec<String> {
    let mut statements = Vec::new();
    let mut start = 0;
    let mut has_code = false;
    let mut mode = Mode::Code;
    let mut chars = text.char_indices().peekable();

    while let Some((at, ch)) = chars.next() {
        match mode {
            Mode::Code => match ch {
                '\'' | '"' | '`' => {
                    mode = Mode::Quoted(ch);
                    has_code = true;
                }
                '[' => {
                    mode = Mode::Quoted(']');
                    has_code = true;
                }
                '-' if matches!(chars.peek(), Some((_, '-'))) => {
                    chars.next();
                    mode = Mode::LineComment;
                }
                '/' if matches!(chars.peek(), Some((_, '*'))) => {
                    chars.next();
                    mode = Mode::BlockComment;
                }
                ';' => {
                    if has_code {
                        statements.push(text[start..at].trim().to_owned());
                    }
                    start = at + 1;
                    has_code = false;
                }
                c if c.is_whitespace() => {}
                _ => has_code = true,
            },
            Mode::Quoted(close) => {
                if ch == close {
                    // A doubled quote is an escaped quote, not the end.
                    if close != ']' && matches!(chars.peek(), Some((_, c)) if *c == close) {
                        chars.next();
                    } else {
                        mode = Mode::Code;
                    }
                }
            }
            Mode::LineComment => {
                if ch == '\n' {
                    mode = Mode::Code;
                }
            }
            Mode::BlockComment => {
                if ch == '*' && matches!(chars.peek(), Some((_, '/'))) {
                    chars.next();
                    mode = Mode::Code;
                }
            }
        }
    }

    if has_code {
        statements.push(text[start..].trim().to_owned());
    }
    statements
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_plain_batches() {
        assert_eq!(
            split_statements("SELECT 1; SELECT 2 ;\n SELECT 3"),
            vec!["SELECT 1", "SELECT 2", "SELECT 3"]
        );
    }

    #[test]
    fn ignores_semicolons_in_literals_and_identifiers() {
        let batch = "INSERT INTO t VALUES('a;b', \"c;d\", [e;f]); SELECT 'it''s;'";
        assert_eq!(
            split_statements(batch),
            vec![
                "INSERT INTO t VALUES('a;b', \"c;d\", [e;f])",
                "SELECT 'it''s;'"
            ]
        );
    }

    #[test]
    fn drops_empty_and_comment_only_segments() {
        let batch = ";; -- leading; comment\n SELECT 1; /* block; */ ; SELECT 2 -- trailing";
        assert_eq!(
            split_statements(batch),
            vec!["-- leading; comment\n SELECT 1", "SELECT 2 -- trailing"]
        );
        assert!(split_statements("  ; -- nothing\n").is_empty());
    }
}
