/*!
The platform expression sublanguage used to gate dependencies and
supports-clauses, e.g. `windows & !arm | linux`.

Expressions are parsed into a small tree and evaluated against a map of
build variables (`VCPKG_TARGET_ARCHITECTURE`, `VCPKG_CMAKE_SYSTEM_NAME`,
`VCPKG_LIBRARY_LINKAGE`, `VCPKG_CRT_LINKAGE`, `Z_VCPKG_IS_NATIVE`). The
semicolon-separated variable `VCPKG_DEP_INFO_OVERRIDE_VARS` can force
individual identifiers true (`ident`) or false (`!ident`) regardless of the
other variables.

Grammar, operators and identifier meanings:

```text
expr      = not-expr , { ("&" | "|" | "and" | ",") , not-expr } ;
not-expr  = ( "!" | "not" ) , simple | simple ;
simple    = identifier | "(" , expr , ")" ;
```

`&` and `|` must not be mixed at one grouping level; `,` is a low-precedence
OR that may combine either. The keyword operators `and` and `not` must end
on a non-identifier character, so `notwindows` is an identifier. An empty
expression is always true.
*/

pub mod error;

pub use error::Error;

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::BTreeMap;
use std::fmt;

/// Whether chained repeats of one binary operator (`x && y`) are tolerated.
/// Legacy CONTROL files allowed them; JSON manifests do not.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MultipleBinaryOperators {
    Allow,
    Deny,
}

/// The variables an expression is evaluated against.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Context {
    vars: BTreeMap<String, String>,
}

impl Context {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, name: impl Into<String>, value: impl Into<String>) -> &mut Self {
        self.vars.insert(name.into(), value.into());
        self
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.vars.get(name).map(String::as_str)
    }

    fn is(&self, name: &str, value: &str) -> bool {
        self.get(name) == Some(value)
    }
}

impl<N: Into<String>, V: Into<String>> FromIterator<(N, V)> for Context {
    fn from_iter<T: IntoIterator<Item = (N, V)>>(iter: T) -> Self {
        Self {
            vars: iter
                .into_iter()
                .map(|(n, v)| (n.into(), v.into()))
                .collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Node {
    Identifier(String),
    Not(Box<Node>),
    And(Vec<Node>),
    Or(Vec<Node>),
}

/// A parsed platform expression. The default expression is empty and
/// evaluates to true.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Expr {
    node: Option<Node>,
}

impl Expr {
    /// Parse `text` into an expression. An all-whitespace `text` produces
    /// the empty (always-true) expression.
    pub fn parse(text: &str, multiple_binary_operators: MultipleBinaryOperators) -> Result<Expr, Error> {
        Parser::new(text, multiple_binary_operators).parse()
    }

    pub fn is_empty(&self) -> bool {
        self.node.is_none()
    }

    /// Evaluate against `context`. Unknown identifiers evaluate to false;
    /// their names are appended to `unknown` for diagnosis.
    pub fn evaluate_collect_unknown(&self, context: &Context, unknown: &mut Vec<String>) -> bool {
        let node = match &self.node {
            Some(node) => node,
            None => return true,
        };

        let mut overrides = BTreeMap::new();
        if let Some(vars) = context.get("VCPKG_DEP_INFO_OVERRIDE_VARS") {
            for entry in vars.split(';').filter(|e| !e.is_empty()) {
                match entry.strip_prefix('!') {
                    Some(name) => overrides.insert(name.to_string(), false),
                    None => overrides.insert(entry.to_string(), true),
                };
            }
        }

        eval(node, context, &overrides, unknown)
    }

    pub fn evaluate(&self, context: &Context) -> bool {
        let mut unknown = Vec::new();
        self.evaluate_collect_unknown(context, &mut unknown)
    }

    /// Number of nodes in the expression tree; used to order qualified
    /// dependencies from simple to elaborate.
    pub fn complexity(&self) -> usize {
        fn count(node: &Node) -> usize {
            match node {
                Node::Identifier(_) => 1,
                Node::Not(inner) => 1 + count(inner),
                Node::And(children) | Node::Or(children) => {
                    1 + children.iter().map(count).sum::<usize>()
                }
            }
        }
        self.node.as_ref().map(|n| count(n)).unwrap_or(0)
    }
}

/// Orders by complexity, then by the canonical text. Gives qualified
/// dependency lists a stable presentation order.
impl Ord for Expr {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        (self.complexity(), self.to_string()).cmp(&(other.complexity(), other.to_string()))
    }
}

impl PartialOrd for Expr {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

fn eval(
    node: &Node,
    context: &Context,
    overrides: &BTreeMap<String, bool>,
    unknown: &mut Vec<String>,
) -> bool {
    match node {
        Node::Identifier(name) => {
            if let Some(forced) = overrides.get(name) {
                return *forced;
            }
            eval_identifier(name, context, unknown)
        }
        Node::Not(inner) => !eval(inner, context, overrides, unknown),
        // Evaluate every child even once the outcome is decided so that
        // unknown identifiers in later children still get reported.
        Node::And(children) => children.iter().fold(true, |acc, child| {
            eval(child, context, overrides, unknown) && acc
        }),
        Node::Or(children) => children.iter().fold(false, |acc, child| {
            eval(child, context, overrides, unknown) || acc
        }),
    }
}

fn eval_identifier(name: &str, ctx: &Context, unknown: &mut Vec<String>) -> bool {
    const ARCH: &str = "VCPKG_TARGET_ARCHITECTURE";
    const SYSTEM: &str = "VCPKG_CMAKE_SYSTEM_NAME";

    match name {
        "x86" => ctx.is(ARCH, "x86"),
        "x64" => ctx.is(ARCH, "x64"),
        // `arm` historically matched by substring, so it covers arm64 too.
        "arm" => ctx.is(ARCH, "arm") || ctx.is(ARCH, "arm64"),
        "arm32" => ctx.is(ARCH, "arm"),
        "arm64" => ctx.is(ARCH, "arm64"),
        "wasm32" => ctx.is(ARCH, "wasm32"),
        "windows" => ctx.is(SYSTEM, "") || ctx.is(SYSTEM, "WindowsStore") || ctx.is(SYSTEM, "MinGW"),
        "mingw" => ctx.is(SYSTEM, "MinGW"),
        "uwp" => ctx.is(SYSTEM, "WindowsStore"),
        "linux" => ctx.is(SYSTEM, "Linux"),
        "osx" => ctx.is(SYSTEM, "Darwin"),
        "android" => ctx.is(SYSTEM, "Android"),
        "emscripten" => ctx.is(SYSTEM, "Emscripten"),
        "ios" => ctx.is(SYSTEM, "iOS"),
        "static" => ctx.is("VCPKG_LIBRARY_LINKAGE", "static"),
        "staticcrt" => ctx.is("VCPKG_CRT_LINKAGE", "static"),
        "native" => ctx.is("Z_VCPKG_IS_NATIVE", "1"),
        _ => {
            unknown.push(name.to_string());
            false
        }
    }
}

/// Emits the canonical text form: keyword operators are normalized to
/// symbols and composite children are parenthesized, so the output parses
/// back to a semantically identical expression.
impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fn write_child(f: &mut fmt::Formatter<'_>, node: &Node) -> fmt::Result {
            match node {
                Node::Identifier(_) | Node::Not(_) => write_node(f, node),
                Node::And(_) | Node::Or(_) => {
                    write!(f, "(")?;
                    write_node(f, node)?;
                    write!(f, ")")
                }
            }
        }

        fn write_node(f: &mut fmt::Formatter<'_>, node: &Node) -> fmt::Result {
            match node {
                Node::Identifier(name) => write!(f, "{}", name),
                Node::Not(inner) => {
                    write!(f, "!")?;
                    write_child(f, inner)
                }
                Node::And(children) => {
                    for (i, child) in children.iter().enumerate() {
                        if i != 0 {
                            write!(f, " & ")?;
                        }
                        write_child(f, child)?;
                    }
                    Ok(())
                }
                Node::Or(children) => {
                    for (i, child) in children.iter().enumerate() {
                        if i != 0 {
                            write!(f, " | ")?;
                        }
                        write_child(f, child)?;
                    }
                    Ok(())
                }
            }
        }

        match &self.node {
            None => Ok(()),
            Some(node) => write_node(f, node),
        }
    }
}

/// Serializes as the canonical text form; deserializes with the strict
/// (manifest) operator rules.
impl Serialize for Expr {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Expr {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        Expr::parse(&text, MultipleBinaryOperators::Deny).map_err(D::Error::custom)
    }
}

struct Parser {
    chars: Vec<char>,
    pos: usize,
    row: usize,
    col: usize,
    multiple_binary_operators: MultipleBinaryOperators,
}

impl Parser {
    fn new(text: &str, multiple_binary_operators: MultipleBinaryOperators) -> Self {
        Self {
            chars: text.chars().collect(),
            pos: 0,
            row: 1,
            col: 1,
            multiple_binary_operators,
        }
    }

    fn cur(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn bump(&mut self) {
        if let Some(ch) = self.cur() {
            self.pos += 1;
            if ch == '\n' {
                self.row += 1;
                self.col = 1;
            } else {
                self.col += 1;
            }
        }
    }

    fn skip_whitespace(&mut self) {
        while matches!(self.cur(), Some(ch) if ch.is_ascii_whitespace()) {
            self.bump();
        }
    }

    fn is_identifier_char(ch: char) -> bool {
        ch.is_ascii_lowercase() || ch.is_ascii_digit()
    }

    /// The identifier starting at the cursor, without consuming it.
    fn peek_word(&self) -> &[char] {
        let start = self.pos;
        let mut end = start;
        while matches!(self.chars.get(end), Some(&ch) if Self::is_identifier_char(ch)) {
            end += 1;
        }
        &self.chars[start..end]
    }

    fn eat_word(&mut self, len: usize) {
        for _ in 0..len {
            self.bump();
        }
    }

    fn parse(mut self) -> Result<Expr, Error> {
        self.skip_whitespace();
        if self.cur().is_none() {
            return Ok(Expr::default());
        }

        let node = self.comma_expr()?;
        if self.cur().is_some() {
            return error::UnexpectedCharacterSnafu {
                row: self.row,
                col: self.col,
            }
            .fail();
        }
        Ok(Expr { node: Some(node) })
    }

    // expr { "," expr } — the low-precedence OR, which may join `&` and `|`
    // groups without parentheses.
    fn comma_expr(&mut self) -> Result<Node, Error> {
        let first = self.expr()?;
        if self.cur() != Some(',') {
            return Ok(first);
        }

        let mut children = Vec::new();
        let mut push = |node: Node| match node {
            // Collapse OR-of-OR so `a | b, c` and `a | (b | c)` read back
            // the same way.
            Node::Or(mut inner) => children.append(&mut inner),
            other => children.push(other),
        };
        push(first);
        while self.cur() == Some(',') {
            self.bump();
            self.skip_whitespace();
            push(self.expr()?);
        }
        Ok(Node::Or(children))
    }

    // not-expr followed by a homogeneous chain of `&`/`and` or `|`.
    fn expr(&mut self) -> Result<Node, Error> {
        let first = self.not_expr()?;
        match self.binary_operator() {
            Some(Operator::And) => self.binary_chain(first, Operator::And),
            Some(Operator::Or) => self.binary_chain(first, Operator::Or),
            None => Ok(first),
        }
    }

    /// Identifies the binary operator at the cursor without consuming it.
    fn binary_operator(&self) -> Option<Operator> {
        match self.cur() {
            Some('&') => Some(Operator::And),
            Some('|') => Some(Operator::Or),
            // The keyword form must end on a non-identifier character.
            Some('a') if self.peek_word() == ['a', 'n', 'd'] => Some(Operator::And),
            _ => None,
        }
    }

    fn consume_operator(&mut self, op: Operator) {
        match self.cur() {
            Some('&') | Some('|') => {
                self.bump();
                // Legacy chains like `x && y` are tolerated in CONTROL files.
                if self.multiple_binary_operators == MultipleBinaryOperators::Allow {
                    while self.cur() == Some(op.symbol()) {
                        self.bump();
                    }
                }
            }
            _ => self.eat_word(3), // "and"
        }
        self.skip_whitespace();
    }

    fn binary_chain(&mut self, first: Node, op: Operator) -> Result<Node, Error> {
        let mut children = vec![first];
        loop {
            self.consume_operator(op);
            children.push(self.not_expr()?);
            match self.binary_operator() {
                Some(next) if next == op => continue,
                Some(_) => {
                    return error::MixedOperatorsSnafu {
                        row: self.row,
                        col: self.col,
                    }
                    .fail();
                }
                None => break,
            }
        }
        Ok(match op {
            Operator::And => Node::And(children),
            Operator::Or => Node::Or(children),
        })
    }

    fn not_expr(&mut self) -> Result<Node, Error> {
        if self.cur() == Some('!') {
            self.bump();
            self.skip_whitespace();
            return Ok(Node::Not(Box::new(self.simple()?)));
        }
        if self.cur() == Some('n') && self.peek_word() == ['n', 'o', 't'] {
            self.eat_word(3);
            self.skip_whitespace();
            return Ok(Node::Not(Box::new(self.simple()?)));
        }
        self.simple()
    }

    fn simple(&mut self) -> Result<Node, Error> {
        if self.cur() == Some('(') {
            self.bump();
            self.skip_whitespace();
            let inner = self.comma_expr()?;
            if self.cur() != Some(')') {
                return error::MissingClosingParenSnafu {
                    row: self.row,
                    col: self.col,
                }
                .fail();
            }
            self.bump();
            self.skip_whitespace();
            return Ok(inner);
        }
        self.identifier()
    }

    fn identifier(&mut self) -> Result<Node, Error> {
        let word: String = self.peek_word().iter().collect();
        if word.is_empty() {
            let (row, col) = (self.row, self.col);
            return match self.cur() {
                None | Some(')') | Some(',') | Some('&') | Some('|') => {
                    error::MissingOperandSnafu { row, col }.fail()
                }
                Some(_) => error::UnexpectedCharacterSnafu { row, col }.fail(),
            };
        }
        self.eat_word(word.chars().count());
        self.skip_whitespace();
        Ok(Node::Identifier(word))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Operator {
    And,
    Or,
}

impl Operator {
    fn symbol(self) -> char {
        match self {
            Operator::And => '&',
            Operator::Or => '|',
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn parse(text: &str) -> Expr {
        Expr::parse(text, MultipleBinaryOperators::Deny).unwrap()
    }

    fn ctx(pairs: &[(&str, &str)]) -> Context {
        pairs.iter().copied().collect()
    }

    #[test]
    fn empty_expression_is_true() {
        assert!(parse("").evaluate(&Context::new()));
        assert!(parse("   ").evaluate(&Context::new()));
    }

    #[test]
    fn os_identifiers() {
        let windows = parse("windows");
        assert!(windows.evaluate(&ctx(&[("VCPKG_CMAKE_SYSTEM_NAME", "")])));
        assert!(windows.evaluate(&ctx(&[("VCPKG_CMAKE_SYSTEM_NAME", "WindowsStore")])));
        assert!(windows.evaluate(&ctx(&[("VCPKG_CMAKE_SYSTEM_NAME", "MinGW")])));
        assert!(!windows.evaluate(&ctx(&[("VCPKG_CMAKE_SYSTEM_NAME", "Linux")])));

        let osx = parse("osx");
        assert!(osx.evaluate(&ctx(&[("VCPKG_CMAKE_SYSTEM_NAME", "Darwin")])));
        assert!(!osx.evaluate(&ctx(&[("VCPKG_CMAKE_SYSTEM_NAME", "")])));

        let uwp = parse("uwp");
        assert!(uwp.evaluate(&ctx(&[("VCPKG_CMAKE_SYSTEM_NAME", "WindowsStore")])));
        assert!(!uwp.evaluate(&ctx(&[("VCPKG_CMAKE_SYSTEM_NAME", "")])));
    }

    #[test]
    fn arm_matches_both_arm32_and_arm64() {
        let arm = parse("arm");
        assert!(arm.evaluate(&ctx(&[("VCPKG_TARGET_ARCHITECTURE", "arm")])));
        assert!(arm.evaluate(&ctx(&[("VCPKG_TARGET_ARCHITECTURE", "arm64")])));
        assert!(!arm.evaluate(&ctx(&[("VCPKG_TARGET_ARCHITECTURE", "x64")])));

        let arm32 = parse("arm32");
        assert!(arm32.evaluate(&ctx(&[("VCPKG_TARGET_ARCHITECTURE", "arm")])));
        assert!(!arm32.evaluate(&ctx(&[("VCPKG_TARGET_ARCHITECTURE", "arm64")])));

        let arm64 = parse("arm64");
        assert!(!arm64.evaluate(&ctx(&[("VCPKG_TARGET_ARCHITECTURE", "arm")])));
        assert!(arm64.evaluate(&ctx(&[("VCPKG_TARGET_ARCHITECTURE", "arm64")])));
    }

    #[test]
    fn linkage_and_native() {
        assert!(parse("static").evaluate(&ctx(&[("VCPKG_LIBRARY_LINKAGE", "static")])));
        assert!(!parse("static").evaluate(&ctx(&[("VCPKG_LIBRARY_LINKAGE", "dynamic")])));
        assert!(parse("staticcrt").evaluate(&ctx(&[("VCPKG_CRT_LINKAGE", "static")])));
        assert!(parse("native").evaluate(&ctx(&[("Z_VCPKG_IS_NATIVE", "1")])));
        assert!(!parse("native").evaluate(&ctx(&[("Z_VCPKG_IS_NATIVE", "0")])));
    }

    #[test]
    fn not_and_keyword_not() {
        for text in ["!windows", "not windows"] {
            let expr = parse(text);
            assert!(!expr.evaluate(&ctx(&[("VCPKG_CMAKE_SYSTEM_NAME", "")])));
            assert!(expr.evaluate(&ctx(&[("VCPKG_CMAKE_SYSTEM_NAME", "Linux")])));
        }
    }

    #[test]
    fn keyword_must_end_on_non_identifier_character() {
        // `notwindows` is an identifier, not a negation; it is unknown and
        // therefore false.
        let expr = parse("notwindows");
        let mut unknown = Vec::new();
        assert!(!expr.evaluate_collect_unknown(
            &ctx(&[("VCPKG_CMAKE_SYSTEM_NAME", "Linux")]),
            &mut unknown
        ));
        assert_eq!(unknown, ["notwindows"]);
    }

    #[test]
    fn spec_conjunction_example() {
        // `!windows & !arm & !x86` from the supports-gating docs.
        let expr = parse("!windows & !arm & !x86");
        assert!(!expr.evaluate(&ctx(&[
            ("VCPKG_CMAKE_SYSTEM_NAME", "Linux"),
            ("VCPKG_TARGET_ARCHITECTURE", "arm"),
        ])));
        assert!(expr.evaluate(&ctx(&[
            ("VCPKG_CMAKE_SYSTEM_NAME", "Linux"),
            ("VCPKG_TARGET_ARCHITECTURE", "x64"),
        ])));
    }

    #[test]
    fn mixed_keyword_and_symbol_operators() {
        let expr = parse("not windows and !arm & not x86");
        assert!(expr.evaluate(&ctx(&[("VCPKG_CMAKE_SYSTEM_NAME", "Linux")])));
        assert!(!expr.evaluate(&ctx(&[("VCPKG_CMAKE_SYSTEM_NAME", "WindowsStore")])));
    }

    #[test]
    fn parenthesized_groups() {
        let expr = parse("(x64 | arm64) & (linux | osx | windows)");
        assert!(expr.evaluate(&ctx(&[
            ("VCPKG_CMAKE_SYSTEM_NAME", "Linux"),
            ("VCPKG_TARGET_ARCHITECTURE", "x64"),
        ])));
        assert!(expr.evaluate(&ctx(&[
            ("VCPKG_CMAKE_SYSTEM_NAME", ""),
            ("VCPKG_TARGET_ARCHITECTURE", "arm64"),
        ])));
        assert!(!expr.evaluate(&ctx(&[("VCPKG_CMAKE_SYSTEM_NAME", "")])));
    }

    #[test]
    fn comma_is_low_precedence_or() {
        let expr = parse("x64 & windows, linux & arm");
        assert!(expr.evaluate(&ctx(&[
            ("VCPKG_CMAKE_SYSTEM_NAME", ""),
            ("VCPKG_TARGET_ARCHITECTURE", "x64"),
        ])));
        assert!(expr.evaluate(&ctx(&[
            ("VCPKG_CMAKE_SYSTEM_NAME", "Linux"),
            ("VCPKG_TARGET_ARCHITECTURE", "arm64"),
        ])));
        assert!(!expr.evaluate(&ctx(&[
            ("VCPKG_CMAKE_SYSTEM_NAME", "Linux"),
            ("VCPKG_TARGET_ARCHITECTURE", "x64"),
        ])));
    }

    #[test]
    fn mixing_and_or_without_parens_is_rejected() {
        let err = Expr::parse("windows & linux | osx", MultipleBinaryOperators::Deny).unwrap_err();
        assert!(matches!(err, Error::MixedOperators { .. }));
        let err = Expr::parse("windows | linux & osx", MultipleBinaryOperators::Deny).unwrap_err();
        assert!(matches!(err, Error::MixedOperators { .. }));
    }

    #[test]
    fn error_positions_are_one_based() {
        let err = Expr::parse("windows & Linux", MultipleBinaryOperators::Deny).unwrap_err();
        assert_eq!(err, Error::UnexpectedCharacter { row: 1, col: 11 });

        let err = Expr::parse("(windows", MultipleBinaryOperators::Deny).unwrap_err();
        assert!(matches!(err, Error::MissingClosingParen { row: 1, col: 9 }));

        let err = Expr::parse("windows &", MultipleBinaryOperators::Deny).unwrap_err();
        assert!(matches!(err, Error::MissingOperand { .. }));
    }

    #[test]
    fn double_operator_only_in_legacy_mode() {
        assert!(Expr::parse("windows && linux", MultipleBinaryOperators::Deny).is_err());
        let expr = Expr::parse("windows && linux", MultipleBinaryOperators::Allow).unwrap();
        assert!(!expr.evaluate(&ctx(&[("VCPKG_CMAKE_SYSTEM_NAME", "Linux")])));
    }

    #[test]
    fn override_vars_force_identifier_truth() {
        let expr = parse("windows & !static");
        let context = ctx(&[
            ("VCPKG_CMAKE_SYSTEM_NAME", "Linux"),
            ("VCPKG_LIBRARY_LINKAGE", "static"),
            ("VCPKG_DEP_INFO_OVERRIDE_VARS", "windows;!static"),
        ]);
        assert!(expr.evaluate(&context));
    }

    #[test]
    fn unknown_identifier_is_false_and_reported() {
        let expr = parse("linux | riscv");
        let mut unknown = Vec::new();
        assert!(expr.evaluate_collect_unknown(
            &ctx(&[("VCPKG_CMAKE_SYSTEM_NAME", "Linux")]),
            &mut unknown
        ));
        assert_eq!(unknown, ["riscv"]);
    }

    #[test]
    fn stringify_parse_round_trip_preserves_semantics() {
        let cases = [
            "windows",
            "!windows",
            "not windows and !arm & not x86",
            "(x64 | arm64) & (linux | osx | windows)",
            "x64 & windows, linux & arm",
            "!(windows | osx)",
            "x64, arm64, wasm32",
        ];
        let contexts = [
            ctx(&[("VCPKG_CMAKE_SYSTEM_NAME", ""), ("VCPKG_TARGET_ARCHITECTURE", "x64")]),
            ctx(&[("VCPKG_CMAKE_SYSTEM_NAME", "Linux"), ("VCPKG_TARGET_ARCHITECTURE", "arm")]),
            ctx(&[("VCPKG_CMAKE_SYSTEM_NAME", "Darwin"), ("VCPKG_TARGET_ARCHITECTURE", "arm64")]),
            ctx(&[("VCPKG_CMAKE_SYSTEM_NAME", "WindowsStore"), ("VCPKG_TARGET_ARCHITECTURE", "x86")]),
        ];
        for case in cases {
            let original = parse(case);
            let round_tripped = parse(&original.to_string());
            for context in &contexts {
                assert_eq!(
                    original.evaluate(context),
                    round_tripped.evaluate(context),
                    "case `{case}` diverged after round trip through `{original}`"
                );
            }
        }
    }

    #[test]
    fn complexity_counts_nodes() {
        assert_eq!(parse("").complexity(), 0);
        assert_eq!(parse("windows").complexity(), 1);
        assert_eq!(parse("!windows").complexity(), 2);
        assert_eq!(parse("windows & linux").complexity(), 3);
    }

    #[test]
    fn serde_round_trip() {
        let expr = parse("!uwp & (x64 | arm64)");
        let json = serde_json::to_string(&expr).unwrap();
        let back: Expr = serde_json::from_str(&json).unwrap();
        assert_eq!(expr, back);
    }
}
