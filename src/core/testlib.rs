//! testlib.h exit code convention
//!
//! Checkers and interactors report their result through the process exit code.
//! Reference: https://github.com/MikeMirzayanov/testlib

use thiserror::Error;

use crate::models::Verdict;

mod exit_codes {
    pub const OK: i32 = 0; // _ok
    pub const WRONG_ANSWER: i32 = 1; // _wa
    pub const PRESENTATION_ERROR: i32 = 2; // _pe
    pub const FAIL: i32 = 3; // _fail (checker bug or internal error)
    pub const DIRT: i32 = 4; // _dirt
    pub const POINTS: i32 = 5; // _points
    pub const UNEXPECTED_EOF: i32 = 8; // _unexpected_eof
    pub const PARTIALLY: i32 = 16; // _partially + n
}

/// Exit code outside of the testlib convention
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("unknown testlib exit code: {0}")]
pub struct UnknownExitCode(pub i32);

/// Convert testlib exit code to verdict
pub fn exit_code_to_verdict(exit_code: i32) -> Result<Verdict, UnknownExitCode> {
    match exit_code {
        exit_codes::OK => Ok(Verdict::Accepted),
        exit_codes::WRONG_ANSWER => Ok(Verdict::WrongAnswer),
        exit_codes::FAIL => Ok(Verdict::Failed),
        exit_codes::PRESENTATION_ERROR | exit_codes::DIRT | exit_codes::UNEXPECTED_EOF => {
            Ok(Verdict::PresentationError)
        }
        exit_codes::POINTS => Ok(Verdict::PartiallyAccepted),
        code if code >= exit_codes::PARTIALLY => Ok(Verdict::PartiallyAccepted),
        code => Err(UnknownExitCode(code)),
    }
}
