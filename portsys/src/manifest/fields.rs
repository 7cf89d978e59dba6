//! The RFC-822-like paragraph format shared by CONTROL files and the
//! installed-status database.
//!
//! A paragraph is a run of `Name: value` fields; continuation lines begin
//! with a space and are preserved (newline and indentation included) in
//! the field value. `#` at the start of a line is a comment. Paragraphs
//! are separated by blank lines.

use crate::diagnostic::Diagnostics;

/// One field with the position of its value, for error reporting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawField {
    pub name: String,
    pub value: String,
    /// One-based line of the field name.
    pub line: usize,
    /// One-based column where the value starts.
    pub col: usize,
}

/// An ordered set of fields. Consumers `take` the fields they understand;
/// whatever remains is unrecognized.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawParagraph {
    pub fields: Vec<RawField>,
    /// One-based line the paragraph starts on.
    pub start_line: usize,
}

impl RawParagraph {
    pub fn take(&mut self, name: &str) -> Option<RawField> {
        let index = self.fields.iter().position(|f| f.name == name)?;
        Some(self.fields.remove(index))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.fields.iter().any(|f| f.name == name)
    }

    /// Names of the fields nobody consumed.
    pub fn remaining(&self) -> Vec<&str> {
        self.fields.iter().map(|f| f.name.as_str()).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

fn is_field_name_char(ch: char) -> bool {
    ch.is_ascii_alphanumeric() || ch == '-'
}

/// Split `text` into paragraphs, collecting problems into `diagnostics`.
/// Malformed paragraphs are dropped; well-formed ones around them survive.
pub fn parse_paragraphs(text: &str, origin: &str, diagnostics: &mut Diagnostics) -> Vec<RawParagraph> {
    let mut paragraphs = Vec::new();
    let mut current: Option<RawParagraph> = None;
    let mut bad_paragraph = false;

    for (index, line) in text.lines().enumerate() {
        let line_number = index + 1;

        if line.is_empty() {
            // Blank line: close the open paragraph.
            if let Some(paragraph) = current.take() {
                if !bad_paragraph && !paragraph.is_empty() {
                    paragraphs.push(paragraph);
                }
            }
            bad_paragraph = false;
            continue;
        }

        if line.starts_with('#') {
            continue;
        }

        if let Some(rest) = line.strip_prefix(' ') {
            // Continuation of the previous field.
            let paragraph = match current.as_mut() {
                Some(p) if !p.is_empty() => p,
                _ => {
                    diagnostics.error(
                        (origin, line_number, 1usize),
                        "continuation line without a preceding field",
                    );
                    bad_paragraph = true;
                    continue;
                }
            };
            if rest.trim().is_empty() {
                diagnostics.error(
                    (origin, line_number, 1usize),
                    "unexpected end of line in field value continuation",
                );
                bad_paragraph = true;
                continue;
            }
            let field = paragraph.fields.last_mut().unwrap();
            field.value.push('\n');
            // The marker space is consumed; deeper indentation is content.
            field.value.push_str(rest);
            continue;
        }

        let name_len = line.chars().take_while(|&ch| is_field_name_char(ch)).count();
        let (name, rest) = line.split_at(line.chars().take(name_len).map(char::len_utf8).sum());
        if name.is_empty() {
            diagnostics.error((origin, line_number, 1usize), "expected a field name");
            bad_paragraph = true;
            continue;
        }
        let value = match rest.strip_prefix(':') {
            Some(value) => value,
            None => {
                diagnostics.error(
                    (origin, line_number, name_len + 1),
                    format!("expected `:` after the field name `{name}`"),
                );
                bad_paragraph = true;
                continue;
            }
        };
        let trimmed = value.trim_start_matches([' ', '\t']);
        let col = line.len() - trimmed.len() + 1;

        let paragraph = current.get_or_insert_with(|| RawParagraph {
            fields: Vec::new(),
            start_line: line_number,
        });
        if paragraph.contains(name) {
            diagnostics.error(
                (origin, line_number, 1usize),
                format!("duplicate field `{name}` in paragraph"),
            );
            bad_paragraph = true;
            continue;
        }
        paragraph.fields.push(RawField {
            name: name.to_string(),
            value: trimmed.to_string(),
            line: line_number,
            col,
        });
    }

    if let Some(paragraph) = current.take() {
        if !bad_paragraph && !paragraph.is_empty() {
            paragraphs.push(paragraph);
        }
    }

    paragraphs
}

/// Parse text that must hold exactly one paragraph.
pub fn parse_single_paragraph(
    text: &str,
    origin: &str,
    diagnostics: &mut Diagnostics,
) -> Option<RawParagraph> {
    let mut paragraphs = parse_paragraphs(text, origin, diagnostics);
    match paragraphs.len() {
        1 => Some(paragraphs.remove(0)),
        0 => {
            diagnostics.error(origin, "expected a paragraph, found none");
            None
        }
        _ => {
            diagnostics.error(origin, "expected exactly one paragraph");
            None
        }
    }
}
