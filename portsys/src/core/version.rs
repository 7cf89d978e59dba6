use std::cmp::Ordering;
use std::fmt::{self, Display, Formatter};

/// A port version: the upstream version text plus the port revision.
/// Revision 0 is elided in display; `1.2.3#4` is revision 4.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Version {
    text: String,
    port_version: u32,
}

impl Version {
    pub fn new(text: impl Into<String>, port_version: u32) -> Version {
        Version {
            text: text.into(),
            port_version,
        }
    }

    /// Parse the `text#N` display form back into a version.
    pub fn parse(text: &str) -> Result<Version, String> {
        match text.rsplit_once('#') {
            Some((version, revision)) => {
                let port_version = revision
                    .parse::<u32>()
                    .map_err(|_| format!("invalid port revision in `{text}`"))?;
                Ok(Version::new(version, port_version))
            }
            None => Ok(Version::new(text, 0)),
        }
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn port_version(&self) -> u32 {
        self.port_version
    }
}

impl Display for Version {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        if self.port_version == 0 {
            write!(f, "{}", self.text)
        } else {
            write!(f, "{}#{}", self.text, self.port_version)
        }
    }
}

/// How a port's version text is interpreted and ordered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VersionScheme {
    /// Opaque text; only equality is defined between different texts.
    String,
    /// Dotted numeric segments, compared numerically; missing segments
    /// count as zero.
    Relaxed,
    /// SemVer 2.0 with pre-release precedence.
    Semver,
    /// `YYYY-MM-DD`, optionally followed by relaxed-style `.N` segments.
    Date,
}

impl VersionScheme {
    /// The manifest field that declares this scheme.
    pub fn field_name(self) -> &'static str {
        match self {
            VersionScheme::String => "version-string",
            VersionScheme::Relaxed => "version",
            VersionScheme::Semver => "version-semver",
            VersionScheme::Date => "version-date",
        }
    }

    /// Whether `text` is well-formed under this scheme.
    pub fn is_valid_text(self, text: &str) -> bool {
        match self {
            VersionScheme::String => true,
            VersionScheme::Relaxed => parse_relaxed(text).is_some(),
            VersionScheme::Semver => semver::Version::parse(text).is_ok(),
            VersionScheme::Date => parse_date(text).is_some(),
        }
    }
}

impl Display for VersionScheme {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.field_name())
    }
}

/// A version paired with the scheme it was declared under.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SchemedVersion {
    pub scheme: VersionScheme,
    pub version: Version,
}

impl SchemedVersion {
    pub fn new(scheme: VersionScheme, version: Version) -> SchemedVersion {
        SchemedVersion { scheme, version }
    }
}

impl Display for SchemedVersion {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.version)
    }
}

/// Compare two versions under `scheme`. Returns `None` when either text is
/// malformed for the scheme, or when the scheme is `string` and the texts
/// differ (distinct opaque texts are incomparable). The port revision
/// breaks ties between equal texts.
pub fn compare_under(scheme: VersionScheme, a: &Version, b: &Version) -> Option<Ordering> {
    let text_ordering = match scheme {
        VersionScheme::String => {
            if a.text == b.text {
                Ordering::Equal
            } else {
                return None;
            }
        }
        VersionScheme::Relaxed => parse_relaxed(&a.text)?.cmp(&parse_relaxed(&b.text)?),
        VersionScheme::Semver => {
            let a = semver::Version::parse(&a.text).ok()?;
            let b = semver::Version::parse(&b.text).ok()?;
            a.cmp_precedence(&b)
        }
        VersionScheme::Date => parse_date(&a.text)?.cmp(&parse_date(&b.text)?),
    };
    Some(text_ordering.then(a.port_version.cmp(&b.port_version)))
}

/// Compare two schemed versions; differing schemes are incomparable.
pub fn compare_schemed(a: &SchemedVersion, b: &SchemedVersion) -> Option<Ordering> {
    if a.scheme != b.scheme {
        return None;
    }
    compare_under(a.scheme, &a.version, &b.version)
}

fn parse_relaxed(text: &str) -> Option<Vec<u64>> {
    if text.is_empty() {
        return None;
    }
    text.split('.')
        .map(|segment| {
            if segment.is_empty() || !segment.bytes().all(|b| b.is_ascii_digit()) {
                None
            } else {
                segment.parse::<u64>().ok()
            }
        })
        .collect()
}

/// A date version as `(year, month, day, trailing segments)`. Months and
/// days are range-checked only loosely; the scheme is a file format, not a
/// calendar.
fn parse_date(text: &str) -> Option<(u64, u64, u64, Vec<u64>)> {
    let rest = text.get(10..).unwrap_or("");
    let date = text.get(..10)?;
    let bytes = date.as_bytes();
    if bytes[4] != b'-' || bytes[7] != b'-' {
        return None;
    }
    let year = date[..4].parse::<u64>().ok()?;
    let month = date[5..7].parse::<u64>().ok()?;
    let day = date[8..10].parse::<u64>().ok()?;
    if !date[..4].bytes().all(|b| b.is_ascii_digit())
        || !date[5..7].bytes().all(|b| b.is_ascii_digit())
        || !date[8..10].bytes().all(|b| b.is_ascii_digit())
    {
        return None;
    }
    let trailing = match rest.strip_prefix('.') {
        Some(suffix) => parse_relaxed(suffix)?,
        None if rest.is_empty() => Vec::new(),
        None => return None,
    };
    Some((year, month, day, trailing))
}

#[cfg(test)]
mod test {
    use super::*;

    fn v(text: &str) -> Version {
        Version::parse(text).unwrap()
    }

    #[test]
    fn display_elides_zero_revision() {
        assert_eq!(Version::new("1.2.3", 0).to_string(), "1.2.3");
        assert_eq!(Version::new("1.2.3", 4).to_string(), "1.2.3#4");
        assert_eq!(v("1.2.3#4"), Version::new("1.2.3", 4));
    }

    #[test]
    fn relaxed_treats_missing_segments_as_zero() {
        let scheme = VersionScheme::Relaxed;
        assert_eq!(compare_under(scheme, &v("1.2"), &v("1.2.0")), Some(Ordering::Equal));
        assert_eq!(compare_under(scheme, &v("1.2"), &v("1.2.1")), Some(Ordering::Less));
        assert_eq!(compare_under(scheme, &v("1.10"), &v("1.9")), Some(Ordering::Greater));
        assert_eq!(compare_under(scheme, &v("2"), &v("10")), Some(Ordering::Less));
    }

    #[test]
    fn relaxed_rejects_non_numeric_segments() {
        assert!(!VersionScheme::Relaxed.is_valid_text("1.2a"));
        assert!(!VersionScheme::Relaxed.is_valid_text("1..2"));
        assert!(VersionScheme::Relaxed.is_valid_text("1.2.3.4.5"));
        assert_eq!(compare_under(VersionScheme::Relaxed, &v("1.2a"), &v("1.2")), None);
    }

    #[test]
    fn semver_orders_prereleases_before_release() {
        let scheme = VersionScheme::Semver;
        assert_eq!(
            compare_under(scheme, &v("1.0.0-rc.1"), &v("1.0.0")),
            Some(Ordering::Less)
        );
        assert_eq!(
            compare_under(scheme, &v("1.0.0-alpha"), &v("1.0.0-beta")),
            Some(Ordering::Less)
        );
        assert!(!scheme.is_valid_text("1.0"));
    }

    #[test]
    fn date_scheme_with_trailing_segments() {
        let scheme = VersionScheme::Date;
        assert!(scheme.is_valid_text("2020-06-26"));
        assert!(scheme.is_valid_text("2020-06-26.1.2"));
        assert!(!scheme.is_valid_text("2020-6-26"));
        assert!(!scheme.is_valid_text("2020-06-26x"));
        assert_eq!(
            compare_under(scheme, &v("2021-01-01"), &v("2020-12-31")),
            Some(Ordering::Greater)
        );
        assert_eq!(
            compare_under(scheme, &v("2020-06-26"), &v("2020-06-26.1")),
            Some(Ordering::Less)
        );
    }

    #[test]
    fn string_scheme_unequal_texts_are_incomparable() {
        let scheme = VersionScheme::String;
        assert_eq!(compare_under(scheme, &v("apr"), &v("apr")), Some(Ordering::Equal));
        assert_eq!(
            compare_under(scheme, &v("apr#1"), &v("apr")),
            Some(Ordering::Greater)
        );
        assert_eq!(compare_under(scheme, &v("apr"), &v("beta")), None);
    }

    #[test]
    fn port_revision_breaks_text_ties() {
        assert_eq!(
            compare_under(VersionScheme::Relaxed, &v("1.2#3"), &v("1.2.0#2")),
            Some(Ordering::Greater)
        );
    }

    #[test]
    fn schemes_are_mutually_incomparable() {
        let a = SchemedVersion::new(VersionScheme::Relaxed, v("1.2.3"));
        let b = SchemedVersion::new(VersionScheme::Semver, v("1.2.3"));
        assert_eq!(compare_schemed(&a, &b), None);
    }
}
