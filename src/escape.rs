//! # Path Escaping
//!
//! The manifest is a whitespace-tokenised text file, so paths written to it
//! must not contain spaces, control characters or anything else that would
//! confuse the tokenizer. `escaped` rewrites such characters as backslash
//! escapes; `unescape` is the exact inverse.

/// Escape a string for storage in the manifest.
///
/// Space becomes `\ `, control characters become `\xHH`, other non-ASCII
/// characters `\uHHHH` (or `\UHHHHHHHH` outside the basic plane).
/// Backslash and `#` also go through `\xHH`: a bare backslash would be
/// ambiguous next to an escaped space, and `#` would start a comment.
pub fn escaped(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '\\' => out.push_str("\\x5c"),
            '#' => out.push_str("\\x23"),
            ' ' => out.push_str("\\ "),
            c if (c as u32) < 0x20 || c as u32 == 0x7f => {
                out.push_str(&format!("\\x{:02x}", c as u32));
            }
            c if (c as u32) > 0x7f => {
                if (c as u32) <= 0xffff {
                    out.push_str(&format!("\\u{:04x}", c as u32));
                } else {
                    out.push_str(&format!("\\U{:08x}", c as u32));
                }
            }
            c => out.push(c),
        }
    }
    out
}

/// Reverse `escaped`. Unknown escape sequences and truncated input are left
/// verbatim rather than rejected; manifest tokens never contain them.
pub fn unescape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut chars = s.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('\\') => out.push('\\'),
            Some(' ') => out.push(' '),
            Some('x') => push_hex(&mut out, &mut chars, 2, "\\x"),
            Some('u') => push_hex(&mut out, &mut chars, 4, "\\u"),
            Some('U') => push_hex(&mut out, &mut chars, 8, "\\U"),
            Some(other) => {
                out.push('\\');
                out.push(other);
            }
            None => out.push('\\'),
        }
    }
    out
}

fn push_hex(out: &mut String, chars: &mut std::str::Chars<'_>, len: usize, prefix: &str) {
    let digits: String = chars.by_ref().take(len).collect();
    match u32::from_str_radix(&digits, 16).ok().and_then(char::from_u32) {
        Some(c) if digits.len() == len => out.push(c),
        _ => {
            out.push_str(prefix);
            out.push_str(&digits);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_ascii_untouched() {
        assert_eq!(escaped("/usr/local/bin"), "/usr/local/bin");
    }

    #[test]
    fn space_escapes() {
        assert_eq!(escaped("My Documents"), "My\\ Documents");
        assert_eq!(unescape("My\\ Documents"), "My Documents");
    }

    #[test]
    fn control_chars_escape() {
        assert_eq!(escaped("a\tb"), "a\\x09b");
        assert_eq!(escaped("a\nb"), "a\\x0ab");
        assert_eq!(unescape("a\\x09b"), "a\tb");
    }

    #[test]
    fn backslash_and_hash_become_hex_escapes() {
        assert_eq!(escaped("a\\b"), "a\\x5cb");
        assert_eq!(unescape("a\\x5cb"), "a\\b");
        assert_eq!(escaped("note#1"), "note\\x231");
        assert_eq!(unescape("note\\x231"), "note#1");
        // never a bare backslash before a token-splitting space
        assert!(!escaped("tricky\\ end").contains("\\\\ "));
    }

    #[test]
    fn unicode_round_trip() {
        for s in [
            "",
            " ",
            "plain",
            "with space",
            "tab\there",
            "Ünïcøde",
            "日本語ファイル",
            "emoji 🎉 path",
            "back\\slash and space mix \\ ",
            "\x01\x02\x7f",
        ] {
            assert_eq!(unescape(&escaped(s)), s, "round trip failed for {s:?}");
        }
    }

    #[test]
    fn escaped_has_no_whitespace() {
        let e = escaped("a b\tc\nd");
        assert!(!e.contains(' ') || e.contains("\\ "));
        assert!(!e.contains('\t'));
        assert!(!e.contains('\n'));
    }
}
