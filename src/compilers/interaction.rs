//! Two-process interaction over OS pipes

use std::os::fd::OwnedFd;

use anyhow::{Context, Result};
use nix::fcntl::OFlag;
use nix::unistd::pipe2;

use crate::safeexec::{Process, Redirect, Report};

/// Crossed pipes between a solution and an interactor.
///
/// Every end belongs to exactly one process. Ends are close-on-exec, so no
/// other child inherits them and each side sees EOF once its peer exits.
pub struct InteractionPipes {
    pub solution_stdin: OwnedFd,
    pub solution_stdout: OwnedFd,
    pub interactor_stdin: OwnedFd,
    pub interactor_stdout: OwnedFd,
}

impl InteractionPipes {
    pub fn new() -> Result<Self> {
        let (solution_stdin, interactor_stdout) =
            pipe2(OFlag::O_CLOEXEC).context("Cannot create interactor pipe")?;
        let (interactor_stdin, solution_stdout) =
            pipe2(OFlag::O_CLOEXEC).context("Cannot create solution pipe")?;
        Ok(Self {
            solution_stdin,
            solution_stdout,
            interactor_stdin,
            interactor_stdout,
        })
    }

    /// Split into `(solution stdin, solution stdout)` and
    /// `(interactor stdin, interactor stdout)` redirects
    pub fn into_redirects(self) -> ((Redirect, Redirect), (Redirect, Redirect)) {
        (
            (
                Redirect::Pipe(self.solution_stdin),
                Redirect::Pipe(self.solution_stdout),
            ),
            (
                Redirect::Pipe(self.interactor_stdin),
                Redirect::Pipe(self.interactor_stdout),
            ),
        )
    }
}

/// Wait for both sides concurrently; neither wait can block the other
pub async fn wait_pair(
    solution: &mut Process,
    interactor: &mut Process,
) -> (Result<Report>, Result<Report>) {
    tokio::join!(solution.wait(), interactor.wait())
}
