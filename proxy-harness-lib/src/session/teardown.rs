use std::fmt;

use crate::error::{HarnessError, Result};

/// Cleanup actions, in the order teardown runs them
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TeardownStep {
    RestoreKeystoreFormat,
    StopClient,
    StopUpstream,
    StopHost,
    AwaitRelease,
}

impl TeardownStep {
    pub const ORDER: [TeardownStep; 5] = [
        TeardownStep::RestoreKeystoreFormat,
        TeardownStep::StopClient,
        TeardownStep::StopUpstream,
        TeardownStep::StopHost,
        TeardownStep::AwaitRelease,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TeardownStep::RestoreKeystoreFormat => "restore-keystore-format",
            TeardownStep::StopClient => "stop-client",
            TeardownStep::StopUpstream => "stop-upstream",
            TeardownStep::StopHost => "stop-host",
            TeardownStep::AwaitRelease => "await-release",
        }
    }
}

impl fmt::Display for TeardownStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug)]
pub struct TeardownOutcome {
    pub step: TeardownStep,
    pub result: Result<()>,
}

/// Outcome of every teardown step; failures are collected, never raised
#[derive(Debug, Default)]
pub struct TeardownReport {
    pub outcomes: Vec<TeardownOutcome>,
}

impl TeardownReport {
    pub(crate) fn record(&mut self, step: TeardownStep, result: Result<()>) {
        self.outcomes.push(TeardownOutcome { step, result });
    }

    /// No step ran, as for a repeated teardown
    pub fn is_empty(&self) -> bool {
        self.outcomes.is_empty()
    }

    pub fn is_clean(&self) -> bool {
        self.outcomes.iter().all(|o| o.result.is_ok())
    }

    pub fn steps(&self) -> Vec<TeardownStep> {
        self.outcomes.iter().map(|o| o.step).collect()
    }

    pub fn failures(&self) -> impl Iterator<Item = (TeardownStep, &HarnessError)> {
        self.outcomes
            .iter()
            .filter_map(|o| o.result.as_ref().err().map(|e| (o.step, e)))
    }
}
