//! NuGet feed references for cache entries.
//!
//! Feeds need a three-field numeric version, so the port's version text
//! is normalized: a date becomes `YYYY.M.D`, a semver-ish prefix is kept
//! and zero-padded to three fields, and anything else collapses to
//! `0.0.0`. The ABI rides in the prerelease tag, which is what actually
//! keys the lookup.

use crate::core::PackageSpec;
use std::fmt::{self, Display, Formatter};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedReference {
    pub id: String,
    pub version: String,
}

impl FeedReference {
    /// The `.nupkg` file name for this reference.
    pub fn nupkg_filename(&self) -> String {
        format!("{}.{}.nupkg", self.id, self.version)
    }
}

impl Display for FeedReference {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.id, self.version)
    }
}

/// Build the feed reference for one cached package:
/// `<prefix><name>_<triplet>` at `<normalized-version>-vcpkg<abi>`.
pub fn make_feedref(
    spec: &PackageSpec,
    version_text: &str,
    abi_tag: &str,
    id_prefix: &str,
) -> FeedReference {
    FeedReference {
        id: format!("{id_prefix}{}", spec.dir()),
        version: format_version_for_feedref(version_text, abi_tag),
    }
}

/// Normalize `version_text` and append the `-vcpkg<abi>` prerelease tag.
pub fn format_version_for_feedref(version_text: &str, abi_tag: &str) -> String {
    let fields = parse_date_fields(version_text)
        .or_else(|| parse_semverish_fields(version_text))
        .unwrap_or([0, 0, 0]);
    format!(
        "{}.{}.{}-vcpkg{abi_tag}",
        fields[0], fields[1], fields[2]
    )
}

/// `YYYY-MM-DD` exactly, with anything after the tenth character ignored.
fn parse_date_fields(text: &str) -> Option<[u64; 3]> {
    let bytes = text.as_bytes();
    if bytes.len() < 10 || bytes[4] != b'-' || bytes[7] != b'-' {
        return None;
    }
    let digits =
        |range: std::ops::Range<usize>| -> Option<u64> {
            let slice = &text[range];
            if slice.bytes().all(|b| b.is_ascii_digit()) {
                slice.parse().ok()
            } else {
                None
            }
        };
    Some([digits(0..4)?, digits(5..7)?, digits(8..10)?])
}

/// An optional `v`, then up to three dot-separated numeric fields.
/// Trailing junk is tolerated only after all three fields ("1.1.1q");
/// a partial match with a leftover ("20-06-26") is no match at all.
fn parse_semverish_fields(text: &str) -> Option<[u64; 3]> {
    let rest = text.strip_prefix('v').unwrap_or(text);
    let mut fields = [0u64; 3];
    let mut count = 0;
    let mut rest = rest;
    while count < 3 {
        let digit_len = rest.bytes().take_while(|b| b.is_ascii_digit()).count();
        if digit_len == 0 {
            return None;
        }
        fields[count] = rest[..digit_len].parse().ok()?;
        count += 1;
        rest = &rest[digit_len..];
        match rest.strip_prefix('.') {
            Some(after_dot) if count < 3 => rest = after_dot,
            _ => break,
        }
    }
    if count < 3 && !rest.is_empty() {
        return None;
    }
    Some(fields)
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::core::Triplet;

    #[test]
    fn semverish_versions() {
        assert_eq!(format_version_for_feedref("0.0.0", "abitag"), "0.0.0-vcpkgabitag");
        assert_eq!(format_version_for_feedref("1.0.1", "abitag"), "1.0.1-vcpkgabitag");
        assert_eq!(format_version_for_feedref("1.01.000", "abitag"), "1.1.0-vcpkgabitag");
        assert_eq!(format_version_for_feedref("1.2", "abitag"), "1.2.0-vcpkgabitag");
        assert_eq!(format_version_for_feedref("v52", "abitag"), "52.0.0-vcpkgabitag");
        assert_eq!(format_version_for_feedref("v09.01.02", "abitag"), "9.1.2-vcpkgabitag");
        assert_eq!(format_version_for_feedref("1.1.1q", "abitag"), "1.1.1-vcpkgabitag");
        assert_eq!(format_version_for_feedref("1", "abitag"), "1.0.0-vcpkgabitag");
    }

    #[test]
    fn date_versions() {
        assert_eq!(
            format_version_for_feedref("2020-06-26", "abitag"),
            "2020.6.26-vcpkgabitag"
        );
        assert_eq!(format_version_for_feedref("20-06-26", "abitag"), "0.0.0-vcpkgabitag");
        assert_eq!(
            format_version_for_feedref("2020-06-26-release", "abitag"),
            "2020.6.26-vcpkgabitag"
        );
        assert_eq!(
            format_version_for_feedref("2020-06-26000", "abitag"),
            "2020.6.26-vcpkgabitag"
        );
    }

    #[test]
    fn generic_versions_collapse_to_zero() {
        assert_eq!(format_version_for_feedref("apr", "abitag"), "0.0.0-vcpkgabitag");
        assert_eq!(format_version_for_feedref("", "abitag"), "0.0.0-vcpkgabitag");
    }

    #[test]
    fn feedref_id_includes_prefix_and_spec_dir() {
        let spec = PackageSpec::new("zlib", Triplet::from_canonical_name("x64-windows"));
        let reference = make_feedref(&spec, "1.2.13", "abcd", "team_");
        assert_eq!(reference.id, "team_zlib_x64-windows");
        assert_eq!(reference.version, "1.2.13-vcpkgabcd");
        assert_eq!(
            reference.nupkg_filename(),
            "team_zlib_x64-windows.1.2.13-vcpkgabcd.nupkg"
        );
    }
}
