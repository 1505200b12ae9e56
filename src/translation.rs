use std::borrow::Cow;

use crate::dialect::PlaceholderStyle;

#[derive(Debug)]
enum State {
    Normal,
    SingleQuoted,
    DoubleQuoted,
    LineComment,
    BlockComment(u32),
}

fn is_line_comment_start(bytes: &[u8], idx: usize) -> bool {
    bytes[idx] == b'-' && bytes.get(idx + 1) == Some(&b'-')
}

fn is_block_comment_start(bytes: &[u8], idx: usize) -> bool {
    bytes[idx] == b'/' && bytes.get(idx + 1) == Some(&b'*')
}

fn is_block_comment_end(bytes: &[u8], idx: usize) -> bool {
    bytes[idx] == b'*' && bytes.get(idx + 1) == Some(&b'/')
}

/// Rewrite the builder's bare `?` placeholders into the backend's style:
/// `$1..$N` for PostgreSQL, `@P1..@PN` for SQL Server. MySQL and SQLite
/// drivers take `?` as-is, so those return the input unchanged.
///
/// A lightweight state machine skips quoted strings and comments so literal
/// question marks are never rewritten. Returns a borrowed `Cow` when nothing
/// changes.
#[must_use]
pub fn number_placeholders(sql: &str, style: PlaceholderStyle) -> Cow<'_, str> {
    if style == PlaceholderStyle::Question {
        return Cow::Borrowed(sql);
    }

    let mut out: Option<String> = None;
    let mut state = State::Normal;
    let mut ordinal: u32 = 0;
    // start of the pending verbatim span; `?` is ASCII, so every slice
    // taken around a replacement lands on a char boundary
    let mut copy_from = 0;
    let bytes = sql.as_bytes();
    let mut idx = 0;

    while idx < bytes.len() {
        let b = bytes[idx];
        match state {
            State::Normal => match b {
                b'\'' => state = State::SingleQuoted,
                b'"' => state = State::DoubleQuoted,
                _ if is_line_comment_start(bytes, idx) => state = State::LineComment,
                _ if is_block_comment_start(bytes, idx) => state = State::BlockComment(1),
                b'?' => {
                    ordinal += 1;
                    let buf = out.get_or_insert_with(String::new);
                    buf.push_str(&sql[copy_from..idx]);
                    match style {
                        PlaceholderStyle::Dollar => {
                            buf.push('$');
                        }
                        PlaceholderStyle::AtP => {
                            buf.push_str("@P");
                        }
                        PlaceholderStyle::Question => unreachable!(),
                    }
                    buf.push_str(&ordinal.to_string());
                    copy_from = idx + 1;
                }
                _ => {}
            },
            State::SingleQuoted => {
                if b == b'\'' {
                    if bytes.get(idx + 1) == Some(&b'\'') {
                        idx += 1; // skip escaped quote
                    } else {
                        state = State::Normal;
                    }
                }
            }
            State::DoubleQuoted => {
                if b == b'"' {
                    if bytes.get(idx + 1) == Some(&b'"') {
                        idx += 1;
                    } else {
                        state = State::Normal;
                    }
                }
            }
            State::LineComment => {
                if b == b'\n' {
                    state = State::Normal;
                }
            }
            State::BlockComment(depth) => {
                if is_block_comment_start(bytes, idx) {
                    state = State::BlockComment(depth + 1);
                } else if is_block_comment_end(bytes, idx) {
                    if depth == 1 {
                        state = State::Normal;
                    } else {
                        state = State::BlockComment(depth - 1);
                    }
                }
            }
        }

        idx += 1;
    }

    match out {
        Some(mut buf) => {
            buf.push_str(&sql[copy_from..]);
            Cow::Owned(buf)
        }
        None => Cow::Borrowed(sql),
    }
}

/// Count the bindable `?` placeholders in a statement, skipping literals and
/// comments. Used to assert the bound-params invariant before execution.
#[must_use]
pub fn count_placeholders(sql: &str) -> usize {
    let mut state = State::Normal;
    let bytes = sql.as_bytes();
    let mut idx = 0;
    let mut count = 0;

    while idx < bytes.len() {
        let b = bytes[idx];
        match state {
            State::Normal => match b {
                b'\'' => state = State::SingleQuoted,
                b'"' => state = State::DoubleQuoted,
                _ if is_line_comment_start(bytes, idx) => state = State::LineComment,
                _ if is_block_comment_start(bytes, idx) => state = State::BlockComment(1),
                b'?' => count += 1,
                _ => {}
            },
            State::SingleQuoted => {
                if b == b'\'' {
                    if bytes.get(idx + 1) == Some(&b'\'') {
                        idx += 1;
                    } else {
                        state = State::Normal;
                    }
                }
            }
            State::DoubleQuoted => {
                if b == b'"' {
                    if bytes.get(idx + 1) == Some(&b'"') {
                        idx += 1;
                    } else {
                        state = State::Normal;
                    }
                }
            }
            State::LineComment => {
                if b == b'\n' {
                    state = State::Normal;
                }
            }
            State::BlockComment(depth) => {
                if is_block_comment_start(bytes, idx) {
                    state = State::BlockComment(depth + 1);
                } else if is_block_comment_end(bytes, idx) {
                    if depth == 1 {
                        state = State::Normal;
                    } else {
                        state = State::BlockComment(depth - 1);
                    }
                }
            }
        }
        idx += 1;
    }
    count
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numbers_for_postgres() {
        let sql = "SELECT * FROM t WHERE a = ? AND b = ?";
        let res = number_placeholders(sql, PlaceholderStyle::Dollar);
        assert_eq!(res, "SELECT * FROM t WHERE a = $1 AND b = $2");
    }

    #[test]
    fn numbers_for_mssql() {
        let sql = "INSERT INTO t (a, b) VALUES (?, ?)";
        let res = number_placeholders(sql, PlaceholderStyle::AtP);
        assert_eq!(res, "INSERT INTO t (a, b) VALUES (@P1, @P2)");
    }

    #[test]
    fn question_style_borrows_unchanged() {
        let sql = "SELECT * FROM t WHERE a = ?";
        let res = number_placeholders(sql, PlaceholderStyle::Question);
        assert!(matches!(res, Cow::Borrowed(_)));
    }

    #[test]
    fn skips_literals_and_comments() {
        let sql = "SELECT '?' , a -- ?\n/* ? */ FROM t WHERE b = ?";
        let res = number_placeholders(sql, PlaceholderStyle::Dollar);
        assert_eq!(res, "SELECT '?' , a -- ?\n/* ? */ FROM t WHERE b = $1");
        assert_eq!(count_placeholders(sql), 1);
    }

    #[test]
    fn multibyte_text_survives_rewriting() {
        let sql = "SELECT * FROM t WHERE a = ? AND b = 'héllo' AND c = ?";
        let res = number_placeholders(sql, PlaceholderStyle::Dollar);
        assert_eq!(res, "SELECT * FROM t WHERE a = $1 AND b = 'héllo' AND c = $2");

        let sql = "INSERT INTO \"tâble\" (x) VALUES (?) -- ünïcode";
        let res = number_placeholders(sql, PlaceholderStyle::AtP);
        assert_eq!(res, "INSERT INTO \"tâble\" (x) VALUES (@P1) -- ünïcode");
    }

    #[test]
    fn escaped_quotes_after_a_rewrite_stay_intact() {
        let sql = "UPDATE t SET a = ? WHERE b = 'it''s'";
        let res = number_placeholders(sql, PlaceholderStyle::Dollar);
        assert_eq!(res, "UPDATE t SET a = $1 WHERE b = 'it''s'");
    }

    #[test]
    fn escaped_quotes_stay_literal() {
        let sql = "SELECT 'it''s a ?' WHERE a = ?";
        assert_eq!(count_placeholders(sql), 1);
        let res = number_placeholders(sql, PlaceholderStyle::Dollar);
        assert_eq!(res, "SELECT 'it''s a ?' WHERE a = $1");
    }
}
