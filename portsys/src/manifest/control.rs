//! Legacy CONTROL file parsing.
//!
//! The first paragraph carries the port (`Source:`); later paragraphs each
//! declare one feature (`Feature:`). CONTROL predates version schemes, so
//! every version is a `string` version. Dependency lists use the
//! `name[features] (platform)` specifier syntax.

use crate::core::{SchemedVersion, Version, VersionScheme};
use crate::diagnostic::Diagnostics;
use crate::manifest::fields::{parse_paragraphs, RawField, RawParagraph};
use crate::manifest::{CoreParagraph, Dependency, FeatureParagraph, SourceControlFile};
use platform_expr::{Expr, MultipleBinaryOperators};

pub fn parse_control(
    text: &str,
    origin: &str,
    diagnostics: &mut Diagnostics,
) -> Option<SourceControlFile> {
    let mut paragraphs = parse_paragraphs(text, origin, diagnostics);
    if paragraphs.is_empty() {
        diagnostics.error(origin, "CONTROL file contains no paragraphs");
        return None;
    }

    let mut source = paragraphs.remove(0);
    let core = parse_source_paragraph(&mut source, origin, diagnostics)?;

    let mut features = Vec::new();
    for mut paragraph in paragraphs {
        if let Some(feature) = parse_feature_paragraph(&mut paragraph, origin, diagnostics) {
            features.push(feature);
        }
    }

    Some(SourceControlFile { core, features })
}

fn parse_source_paragraph(
    paragraph: &mut RawParagraph,
    origin: &str,
    diagnostics: &mut Diagnostics,
) -> Option<CoreParagraph> {
    let name = match paragraph.take("Source") {
        Some(field) => field.value,
        None => {
            diagnostics.error(
                (origin, paragraph.start_line, 1usize),
                "missing required field `Source`",
            );
            return None;
        }
    };
    let version_text = match paragraph.take("Version") {
        Some(field) => field.value,
        None => {
            diagnostics.error(
                (origin, paragraph.start_line, 1usize),
                "missing required field `Version`",
            );
            return None;
        }
    };
    let port_version = match paragraph.take("Port-Version") {
        None => 0,
        Some(field) => match field.value.parse::<u32>() {
            Ok(value) => value,
            Err(_) => {
                diagnostics.error(
                    (origin, field.line, field.col),
                    "`Port-Version` must be a nonnegative integer",
                );
                0
            }
        },
    };

    let description = paragraph
        .take("Description")
        .map(|f| f.value.lines().map(str::to_string).collect())
        .unwrap_or_default();
    let maintainers = paragraph
        .take("Maintainer")
        .map(|f| f.value.lines().map(str::to_string).collect())
        .unwrap_or_default();
    let homepage = paragraph.take("Homepage").map(|f| f.value);
    let dependencies = paragraph
        .take("Build-Depends")
        .map(|f| parse_dependency_list(&f, origin, diagnostics))
        .unwrap_or_default();
    let default_features = paragraph
        .take("Default-Features")
        .map(|f| parse_name_list(&f))
        .unwrap_or_default();
    let supports = paragraph
        .take("Supports")
        .map(|f| parse_platform(&f, origin, diagnostics))
        .unwrap_or_default();

    warn_leftover_fields(paragraph, origin, diagnostics);

    Some(CoreParagraph {
        name,
        version: SchemedVersion::new(
            VersionScheme::String,
            Version::new(version_text, port_version),
        ),
        description,
        maintainers,
        homepage,
        documentation: None,
        license: None,
        supports,
        dependencies,
        default_features,
        overrides: Vec::new(),
        builtin_baseline: None,
    })
}

fn parse_feature_paragraph(
    paragraph: &mut RawParagraph,
    origin: &str,
    diagnostics: &mut Diagnostics,
) -> Option<FeatureParagraph> {
    let name = match paragraph.take("Feature") {
        Some(field) => field.value,
        None => {
            diagnostics.error(
                (origin, paragraph.start_line, 1usize),
                "expected a `Feature` paragraph after the `Source` paragraph",
            );
            return None;
        }
    };
    let description = paragraph
        .take("Description")
        .map(|f| f.value.lines().map(str::to_string).collect())
        .unwrap_or_default();
    let dependencies = paragraph
        .take("Build-Depends")
        .map(|f| parse_dependency_list(&f, origin, diagnostics))
        .unwrap_or_default();
    let supports = paragraph
        .take("Supports")
        .map(|f| parse_platform(&f, origin, diagnostics))
        .unwrap_or_default();

    warn_leftover_fields(paragraph, origin, diagnostics);

    Some(FeatureParagraph {
        name,
        description,
        dependencies,
        supports,
    })
}

fn warn_leftover_fields(paragraph: &RawParagraph, origin: &str, diagnostics: &mut Diagnostics) {
    for name in paragraph.remaining() {
        diagnostics.warning(
            (origin, paragraph.start_line, 1usize),
            format!("unrecognized field `{name}`"),
        );
    }
}

fn parse_name_list(field: &RawField) -> Vec<String> {
    field
        .value
        .split(',')
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .map(str::to_string)
        .collect()
}

fn parse_platform(field: &RawField, origin: &str, diagnostics: &mut Diagnostics) -> Expr {
    match Expr::parse(&field.value, MultipleBinaryOperators::Allow) {
        Ok(expr) => expr,
        Err(e) => {
            diagnostics.error((origin, field.line, field.col), e.to_string());
            Expr::default()
        }
    }
}

/// Parse a comma-separated `Build-Depends` list of qualified specifiers:
/// `name`, `name[f1,f2]`, `name (platform)`, or both. Triplet qualifiers
/// are not allowed in dependency position.
fn parse_dependency_list(
    field: &RawField,
    origin: &str,
    diagnostics: &mut Diagnostics,
) -> Vec<Dependency> {
    let mut dependencies = Vec::new();
    for item in split_dependency_items(&field.value) {
        let item = item.trim();
        if item.is_empty() {
            continue;
        }
        match parse_qualified_specifier(item) {
            Ok(dependency) => dependencies.push(dependency),
            Err(problem) => {
                diagnostics.error(
                    (origin, field.line, field.col),
                    format!("in `{item}`: {problem}"),
                );
            }
        }
    }
    dependencies
}

/// Split on commas that are not inside `[...]` feature lists or `(...)`
/// platform expressions.
fn split_dependency_items(value: &str) -> Vec<&str> {
    let mut items = Vec::new();
    let mut depth = 0usize;
    let mut start = 0usize;
    for (index, ch) in value.char_indices() {
        match ch {
            '[' | '(' => depth += 1,
            ']' | ')' => depth = depth.saturating_sub(1),
            ',' if depth == 0 => {
                items.push(&value[start..index]);
                start = index + 1;
            }
            _ => {}
        }
    }
    items.push(&value[start..]);
    items
}

fn parse_qualified_specifier(item: &str) -> Result<Dependency, String> {
    let (rest, platform) = match item.find('(') {
        Some(open) => {
            let close = item
                .rfind(')')
                .ok_or_else(|| "missing closing ) after platform expression".to_string())?;
            let expr_text = &item[open + 1..close];
            let expr = Expr::parse(expr_text, MultipleBinaryOperators::Allow)
                .map_err(|e| e.to_string())?;
            if !item[close + 1..].trim().is_empty() {
                return Err("unexpected text after platform expression".to_string());
            }
            (item[..open].trim(), expr)
        }
        None => (item, Expr::default()),
    };

    let (name, features) = match rest.find('[') {
        Some(open) => {
            let close = rest
                .rfind(']')
                .ok_or_else(|| "missing closing ] after feature list".to_string())?;
            let features = rest[open + 1..close]
                .split(',')
                .map(str::trim)
                .filter(|f| !f.is_empty())
                .map(str::to_string)
                .collect();
            (rest[..open].trim(), features)
        }
        None => (rest.trim(), Vec::new()),
    };

    if name.contains(':') {
        return Err("triplet qualifiers are not allowed on dependencies".to_string());
    }
    if name.is_empty() {
        return Err("expected a port name".to_string());
    }

    Ok(Dependency {
        name: name.to_string(),
        features,
        platform,
        host: false,
        constraint: None,
    })
}
