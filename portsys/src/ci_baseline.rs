//! The CI baseline file: the expected build state of every port/triplet
//! pair the CI system exercises.
//!
//! Line format: `port:triplet=(fail|skip|pass)`, `#` comments, free
//! whitespace around tokens. `fail` means the port is known broken there
//! (CI still builds it and reports until the file is updated); `skip`
//! means do not build it at all.

use crate::core::{PackageSpec, Triplet};
use crate::diagnostic::Diagnostics;
use std::collections::BTreeSet;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CiBaselineState {
    Fail,
    Skip,
    Pass,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CiBaselineLine {
    pub port: String,
    pub triplet: Triplet,
    pub state: CiBaselineState,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipFailures {
    Yes,
    No,
}

/// The baseline after application: which specs are expected to fail, and
/// which should not be built at all.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CiBaselineData {
    pub expected_failures: BTreeSet<PackageSpec>,
    pub skipped: BTreeSet<PackageSpec>,
}

fn is_name_char(ch: char) -> bool {
    ch.is_ascii_lowercase() || ch.is_ascii_digit() || ch == '-'
}

/// Parse the baseline text. Parsing stops at the first malformed line;
/// the error carries its exact position and nothing is returned.
pub fn parse_ci_baseline(
    text: &str,
    origin: &str,
    diagnostics: &mut Diagnostics,
) -> Vec<CiBaselineLine> {
    let mut lines = Vec::new();
    for (index, raw_line) in text.lines().enumerate() {
        let line_number = index + 1;
        let mut error = |col: usize, message: &str| {
            diagnostics.error((origin, line_number, col), message.to_string());
        };

        let chars: Vec<char> = raw_line.chars().collect();
        let mut pos = 0;
        let skip_ws = |pos: &mut usize| {
            while matches!(chars.get(*pos), Some(ch) if ch.is_ascii_whitespace()) {
                *pos += 1;
            }
        };
        let take_name = |pos: &mut usize| {
            let start = *pos;
            while matches!(chars.get(*pos), Some(&ch) if is_name_char(ch)) {
                *pos += 1;
            }
            chars[start..*pos].iter().collect::<String>()
        };

        skip_ws(&mut pos);
        if pos == chars.len() || chars[pos] == '#' {
            continue;
        }

        let port = take_name(&mut pos);
        if port.is_empty() {
            error(pos + 1, "expected a port name here (must be lowercase, digits, '-')");
            return Vec::new();
        }
        if chars.get(pos) != Some(&':') {
            error(pos + 1, "expected ':' here");
            return Vec::new();
        }
        pos += 1;

        let triplet = take_name(&mut pos);
        if triplet.is_empty() {
            error(
                pos + 1,
                "expected a triplet name here (must be lowercase, digits, '-')",
            );
            return Vec::new();
        }

        skip_ws(&mut pos);
        if chars.get(pos) != Some(&'=') {
            error(pos + 1, "expected '=' here");
            return Vec::new();
        }
        pos += 1;
        skip_ws(&mut pos);

        let state_word = take_name(&mut pos);
        let state = match state_word.as_str() {
            "fail" => CiBaselineState::Fail,
            "skip" => CiBaselineState::Skip,
            "pass" => CiBaselineState::Pass,
            _ => {
                error(
                    pos + 1 - state_word.chars().count(),
                    "expected 'fail', 'skip', or 'pass' here",
                );
                return Vec::new();
            }
        };

        skip_ws(&mut pos);
        if pos != chars.len() && chars[pos] != '#' {
            error(
                pos + 1,
                "unrecognizable baseline entry; expected 'port:triplet=(fail|skip|pass)'",
            );
            return Vec::new();
        }

        lines.push(CiBaselineLine {
            port,
            triplet: Triplet::from_canonical_name(triplet),
            state,
        });
    }
    lines
}

/// Apply parsed baseline lines to a CI run. Entries for triplets in
/// `excluded_triplets` are dropped (those triplets are not exercised at
/// all). `fail` entries become expected failures; with
/// [`SkipFailures::Yes`] they are additionally skipped rather than built.
pub fn apply_ci_baseline(
    lines: &[CiBaselineLine],
    excluded_triplets: &BTreeSet<Triplet>,
    skip_failures: SkipFailures,
) -> CiBaselineData {
    let mut data = CiBaselineData::default();
    for line in lines {
        if excluded_triplets.contains(&line.triplet) {
            continue;
        }
        let spec = PackageSpec::new(line.port.clone(), line.triplet.clone());
        match line.state {
            CiBaselineState::Fail => {
                if skip_failures == SkipFailures::Yes {
                    data.skipped.insert(spec.clone());
                }
                data.expected_failures.insert(spec);
            }
            CiBaselineState::Skip => {
                data.skipped.insert(spec);
            }
            CiBaselineState::Pass => {}
        }
    }
    data
}

/// One line of the CI report for a finished spec, or `None` when the
/// outcome matches the baseline's expectation.
pub fn format_ci_result(
    spec: &PackageSpec,
    baseline: Option<CiBaselineState>,
    result: crate::install::InstallResult,
) -> Option<String> {
    use crate::install::InstallResult;
    let expected_fail = baseline == Some(CiBaselineState::Fail);
    match result {
        InstallResult::Succeeded | InstallResult::Downloaded => expected_fail
            .then(|| format!("PASSING, REMOVE FROM FAIL LIST: {spec}")),
        InstallResult::CascadedDueToMissingDependencies => {
            (!expected_fail).then(|| format!("CASCADE: {spec}"))
        }
        InstallResult::BuildFailed
        | InstallResult::PostBuildChecksFailed
        | InstallResult::FileConflicts => {
            (!expected_fail).then(|| format!("REGRESSION: {spec} ({result})"))
        }
        InstallResult::Excluded | InstallResult::Removed => None,
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn parse_ok(text: &str) -> Vec<CiBaselineLine> {
        let mut diagnostics = Diagnostics::new();
        let lines = parse_ci_baseline(text, "test", &mut diagnostics);
        assert!(!diagnostics.has_errors(), "{diagnostics}");
        lines
    }

    fn triplet(name: &str) -> Triplet {
        Triplet::from_canonical_name(name)
    }

    #[test]
    fn empty_input_parses_to_nothing() {
        assert!(parse_ok("").is_empty());
        assert!(parse_ok("# only comments\n\n   \n").is_empty());
    }

    #[test]
    fn entries_parse_with_loose_whitespace() {
        let lines = parse_ok(
            "foo:x64-windows=fail\n  bar:x64-linux =  skip  # pinned\nbaz:arm-uwp=pass\n",
        );
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0].port, "foo");
        assert_eq!(lines[0].state, CiBaselineState::Fail);
        assert_eq!(lines[1].triplet, triplet("x64-linux"));
        assert_eq!(lines[1].state, CiBaselineState::Skip);
        assert_eq!(lines[2].state, CiBaselineState::Pass);
    }

    #[test]
    fn errors_carry_positions_and_stop_parsing() {
        let cases = [
            ("hello", 1, 6, "expected ':' here"),
            ("?example:x64-windows=fail", 1, 1, "expected a port name"),
            ("x64-windows:", 1, 13, "expected a triplet name"),
            ("port:x64-windows\n=fail", 1, 17, "expected '=' here"),
            ("example:x64-windows   =    fails", 1, 28, "expected 'fail', 'skip', or 'pass'"),
            (
                "example:x64-windows   =    fail extra stuff",
                1,
                33,
                "unrecognizable baseline entry",
            ),
            (
                "example:x64-windows = fail # fine\nexample:x64-uwp=skip extra stuff\n",
                2,
                22,
                "unrecognizable baseline entry",
            ),
        ];
        for (input, line, col, fragment) in cases {
            let mut diagnostics = Diagnostics::new();
            let parsed = parse_ci_baseline(input, "test", &mut diagnostics);
            assert!(parsed.is_empty(), "{input} should fail");
            let record = &diagnostics.records()[0];
            assert_eq!((record.line, record.col), (Some(line), Some(col)), "{input}");
            assert!(record.message.contains(fragment), "{input}: {record:?}");
        }
    }

    #[test]
    fn apply_respects_excluded_triplets_and_skip_failures() {
        let lines = parse_ok("foo:x64-windows=fail\nbar:x64-linux=skip");
        assert_eq!(lines.len(), 2);

        let excluded = BTreeSet::from([triplet("x64-linux")]);
        let data = apply_ci_baseline(&lines, &excluded, SkipFailures::No);
        assert_eq!(
            data.expected_failures,
            BTreeSet::from([PackageSpec::new("foo", triplet("x64-windows"))])
        );
        assert!(data.skipped.is_empty());

        let data = apply_ci_baseline(&lines, &BTreeSet::new(), SkipFailures::Yes);
        assert_eq!(data.expected_failures.len(), 1);
        assert_eq!(
            data.skipped,
            BTreeSet::from([
                PackageSpec::new("foo", triplet("x64-windows")),
                PackageSpec::new("bar", triplet("x64-linux")),
            ])
        );
    }

    #[test]
    fn ci_result_formatting() {
        use crate::install::InstallResult;
        let spec = PackageSpec::new("fail", triplet("x64-uwp"));

        // Matches expectation: no message.
        assert_eq!(
            format_ci_result(&spec, Some(CiBaselineState::Fail), InstallResult::BuildFailed),
            None
        );
        assert_eq!(
            format_ci_result(&spec, None, InstallResult::Succeeded),
            None
        );
        // A port on the fail list that now passes should be delisted.
        assert!(format_ci_result(&spec, Some(CiBaselineState::Fail), InstallResult::Succeeded)
            .unwrap()
            .contains("REMOVE FROM FAIL LIST"));
        // An unexpected failure is a regression.
        assert!(format_ci_result(&spec, None, InstallResult::BuildFailed)
            .unwrap()
            .contains("REGRESSION"));
        assert!(
            format_ci_result(&spec, None, InstallResult::CascadedDueToMissingDependencies)
                .unwrap()
                .contains("CASCADE")
        );
    }
}
