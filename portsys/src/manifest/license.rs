//! SPDX license expression checking.
//!
//! The `license` manifest field holds an SPDX expression such as
//! `MIT OR (Apache-2.0 AND Zlib)`. Loading only checks the syntax;
//! the lint pass additionally rewrites deprecated identifiers to their
//! current forms.

use crate::diagnostic::Diagnostics;

/// Deprecated SPDX identifiers and their replacements. Applied by
/// [`normalize`] on the lint path, never while loading.
const DEPRECATED_IDENTIFIERS: &[(&str, &str)] = &[
    ("AGPL-1.0", "AGPL-1.0-only"),
    ("AGPL-3.0", "AGPL-3.0-only"),
    ("BSD-2-Clause-FreeBSD", "BSD-2-Clause"),
    ("BSD-2-Clause-NetBSD", "BSD-2-Clause"),
    ("GFDL-1.1", "GFDL-1.1-only"),
    ("GFDL-1.2", "GFDL-1.2-only"),
    ("GFDL-1.3", "GFDL-1.3-only"),
    ("GPL-1.0", "GPL-1.0-only"),
    ("GPL-1.0+", "GPL-1.0-or-later"),
    ("GPL-2.0", "GPL-2.0-only"),
    ("GPL-2.0+", "GPL-2.0-or-later"),
    ("GPL-2.0-with-GCC-exception", "GPL-2.0-only WITH GCC-exception-2.0"),
    ("GPL-2.0-with-autoconf-exception", "GPL-2.0-only WITH Autoconf-exception-2.0"),
    ("GPL-2.0-with-bison-exception", "GPL-2.0-only WITH Bison-exception-2.2"),
    ("GPL-2.0-with-classpath-exception", "GPL-2.0-only WITH Classpath-exception-2.0"),
    ("GPL-2.0-with-font-exception", "GPL-2.0-only WITH Font-exception-2.0"),
    ("GPL-3.0", "GPL-3.0-only"),
    ("GPL-3.0+", "GPL-3.0-or-later"),
    ("GPL-3.0-with-GCC-exception", "GPL-3.0-only WITH GCC-exception-3.1"),
    ("GPL-3.0-with-autoconf-exception", "GPL-3.0-only WITH Autoconf-exception-3.0"),
    ("LGPL-2.0", "LGPL-2.0-only"),
    ("LGPL-2.0+", "LGPL-2.0-or-later"),
    ("LGPL-2.1", "LGPL-2.1-only"),
    ("LGPL-2.1+", "LGPL-2.1-or-later"),
    ("LGPL-3.0", "LGPL-3.0-only"),
    ("LGPL-3.0+", "LGPL-3.0-or-later"),
    ("Nunit", "MIT"),
    ("StandardML-NJ", "SMLNJ"),
    ("bzip2-1.0.5", "bzip2-1.0.6"),
    ("eCos-2.0", "RHeCos-1.1"),
    ("wxWindows", "LGPL-2.0-or-later WITH WxWindows-exception-3.1"),
];

fn is_idstring_char(ch: char) -> bool {
    ch.is_ascii_alphanumeric() || ch == '-' || ch == '.'
}

#[derive(Debug, PartialEq, Eq)]
enum Token {
    Id(String),
    Plus,
    And,
    Or,
    With,
    Open,
    Close,
}

fn tokenize(text: &str, origin: &str, diagnostics: &mut Diagnostics) -> Option<Vec<Token>> {
    let mut tokens = Vec::new();
    let mut chars = text.char_indices().peekable();
    while let Some(&(index, ch)) = chars.peek() {
        match ch {
            ' ' | '\t' => {
                chars.next();
            }
            '(' => {
                tokens.push(Token::Open);
                chars.next();
            }
            ')' => {
                tokens.push(Token::Close);
                chars.next();
            }
            '+' => {
                tokens.push(Token::Plus);
                chars.next();
            }
            ch if is_idstring_char(ch) => {
                let mut word = String::new();
                while let Some(&(_, ch)) = chars.peek() {
                    if !is_idstring_char(ch) {
                        break;
                    }
                    word.push(ch);
                    chars.next();
                }
                tokens.push(match word.as_str() {
                    "AND" => Token::And,
                    "OR" => Token::Or,
                    "WITH" => Token::With,
                    _ => Token::Id(word),
                });
            }
            other => {
                diagnostics.error(
                    origin,
                    format!("unexpected character `{other}` at offset {index} in license expression"),
                );
                return None;
            }
        }
    }
    Some(tokens)
}

/// Validate an SPDX expression. Returns false (with diagnostics) when the
/// expression is syntactically malformed. `NONE` and `NULL` mark ports
/// with no extractable license and are accepted standalone.
pub fn check_expression(text: &str, origin: &str, diagnostics: &mut Diagnostics) -> bool {
    if text == "NONE" || text == "NULL" {
        return true;
    }
    let before = diagnostics.records().len();
    let Some(tokens) = tokenize(text, origin, diagnostics) else {
        return false;
    };
    let mut parser = LicenseParser {
        tokens,
        pos: 0,
        origin,
        diagnostics,
    };
    parser.expression();
    if parser.pos != parser.tokens.len() {
        let origin = origin.to_string();
        parser
            .diagnostics
            .error(origin, "unexpected trailing tokens in license expression");
    }
    diagnostics.records().len() == before
}

struct LicenseParser<'a> {
    tokens: Vec<Token>,
    pos: usize,
    origin: &'a str,
    diagnostics: &'a mut Diagnostics,
}

impl LicenseParser<'_> {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn bump(&mut self) -> Option<&Token> {
        let token = self.tokens.get(self.pos);
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn error(&mut self, message: impl Into<String>) {
        self.diagnostics.error(self.origin, message);
        // Park at the end so one malformed term reports once.
        self.pos = self.tokens.len();
    }

    // expression = compound { ("AND" | "OR") compound }
    fn expression(&mut self) {
        self.compound();
        while matches!(self.peek(), Some(Token::And) | Some(Token::Or)) {
            self.bump();
            self.compound();
        }
    }

    // compound = simple ["WITH" id] | "(" expression ")"
    fn compound(&mut self) {
        match self.bump() {
            Some(Token::Open) => {
                self.expression();
                match self.bump() {
                    Some(Token::Close) => {}
                    _ => self.error("missing closing ) in license expression"),
                }
            }
            Some(Token::Id(_)) => {
                if matches!(self.peek(), Some(Token::Plus)) {
                    self.bump();
                }
                if matches!(self.peek(), Some(Token::With)) {
                    self.bump();
                    match self.bump() {
                        Some(Token::Id(_)) => {}
                        _ => self.error("expected an exception identifier after WITH"),
                    }
                }
            }
            _ => self.error("expected a license identifier"),
        }
    }
}

/// Rewrite deprecated identifiers to their replacements, returning the
/// normalized expression and the list of rewrites performed. Only the
/// lint path calls this.
pub fn normalize(text: &str) -> (String, Vec<(String, String)>) {
    let mut out = String::new();
    let mut rewrites = Vec::new();
    let mut rest = text;
    while !rest.is_empty() {
        let word_len = rest.chars().take_while(|&c| is_idstring_char(c) || c == '+').count();
        if word_len == 0 {
            let mut chars = rest.chars();
            out.push(chars.next().unwrap());
            rest = chars.as_str();
            continue;
        }
        let (word, tail) = rest.split_at(word_len);
        match DEPRECATED_IDENTIFIERS
            .iter()
            .find(|(deprecated, _)| *deprecated == word)
        {
            Some((deprecated, replacement)) => {
                rewrites.push((deprecated.to_string(), replacement.to_string()));
                // A replacement with a WITH clause needs parens to keep
                // precedence when the context has other operators.
                if replacement.contains(' ') && text.len() != word.len() {
                    out.push('(');
                    out.push_str(replacement);
                    out.push(')');
                } else {
                    out.push_str(replacement);
                }
            }
            None => out.push_str(word),
        }
        rest = tail;
    }
    (out, rewrites)
}

#[cfg(test)]
mod test {
    use super::*;

    fn check(text: &str) -> bool {
        let mut diagnostics = Diagnostics::new();
        check_expression(text, "test", &mut diagnostics)
    }

    #[test]
    fn accepts_common_expressions() {
        for expr in [
            "MIT",
            "Apache-2.0",
            "GPL-2.0-only",
            "GPL-2.0-or-later WITH Classpath-exception-2.0",
            "MIT OR Apache-2.0",
            "MIT AND (BSD-3-Clause OR Zlib)",
            "CC0-1.0+",
            "NONE",
        ] {
            assert!(check(expr), "{expr} should parse");
        }
    }

    #[test]
    fn rejects_malformed_expressions() {
        for expr in ["", "MIT OR", "AND MIT", "(MIT", "MIT WITH", "MIT %"] {
            assert!(!check(expr), "{expr} should be rejected");
        }
    }

    #[test]
    fn normalize_rewrites_deprecated_ids() {
        let (out, rewrites) = normalize("GPL-2.0 OR MIT");
        assert_eq!(out, "GPL-2.0-only OR MIT");
        assert_eq!(rewrites.len(), 1);

        let (out, _) = normalize("StandardML-NJ");
        assert_eq!(out, "SMLNJ");

        let (out, _) = normalize("MIT");
        assert_eq!(out, "MIT");
    }

    #[test]
    fn normalize_parenthesizes_multi_token_replacements() {
        let (out, _) = normalize("wxWindows OR MIT");
        assert_eq!(out, "(LGPL-2.0-or-later WITH WxWindows-exception-3.1) OR MIT");
    }
}
