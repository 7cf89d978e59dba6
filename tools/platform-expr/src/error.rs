use snafu::Snafu;

/// Parse failures for platform expressions. Every variant carries the
/// one-based row and column at which the problem was found.
#[derive(Debug, PartialEq, Eq, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum Error {
    #[snafu(display("{row}:{col}: unexpected character in platform expression"))]
    UnexpectedCharacter { row: usize, col: usize },

    #[snafu(display(
        "{row}:{col}: mixing & and | is not allowed; use () to specify order of operations"
    ))]
    MixedOperators { row: usize, col: usize },

    #[snafu(display("{row}:{col}: missing closing ) in platform expression"))]
    MissingClosingParen { row: usize, col: usize },

    #[snafu(display("{row}:{col}: expected an identifier or ( expression )"))]
    MissingOperand { row: usize, col: usize },
}

impl Error {
    /// Position of the failure as `(row, col)`, both one-based.
    pub fn position(&self) -> (usize, usize) {
        match *self {
            Error::UnexpectedCharacter { row, col }
            | Error::MixedOperators { row, col }
            | Error::MissingClosingParen { row, col }
            | Error::MissingOperand { row, col } => (row, col),
        }
    }
}
