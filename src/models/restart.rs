//! Restart strategy and attempt bookkeeping.

use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};

/// Relaunch strategies in priority order.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum RestartStrategy {
    /// Launch the packaged bundle through the OS and verify the new process.
    BundleRelaunch,
    /// Replace the current process image with itself.
    ReplaceImage,
    /// Spawn an independent copy of the current command line.
    DevRelaunch,
}

impl RestartStrategy {
    /// Every strategy, highest priority first.
    pub const PRIORITY: [Self; 3] = [Self::BundleRelaunch, Self::ReplaceImage, Self::DevRelaunch];

    /// Stable name used in logs.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::BundleRelaunch => "bundle_relaunch",
            Self::ReplaceImage => "replace_image",
            Self::DevRelaunch => "dev_relaunch",
        }
    }
}

impl Display for RestartStrategy {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Successful result of a single strategy.
///
/// The variants differ in what the caller must still do: after
/// `Relaunched` and `Spawned` the old process has to exit explicitly,
/// after `ImageReplaced` nothing of the old image is left to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StrategyOutcome {
    /// The bundle was launched and a new process was observed.
    Relaunched {
        /// Pid of the verified new process.
        pid: u32,
    },
    /// The current process image was replaced in place.
    ImageReplaced,
    /// An independent process was spawned.
    Spawned {
        /// Pid of the spawned process.
        pid: u32,
    },
}

impl StrategyOutcome {
    /// Whether the old process must terminate itself after this outcome.
    #[must_use]
    pub fn requires_exit(self) -> bool {
        !matches!(self, Self::ImageReplaced)
    }
}

/// State owned by the supervisor for the duration of one attempt.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RestartAttemptState {
    /// Strategy that succeeded, if any.
    pub chosen: Option<RestartStrategy>,
    /// Sticky marker: the primary strategy failed and must not be retried.
    pub primary_unavailable: bool,
    /// Strategies attempted so far, in order.
    pub tried: Vec<RestartStrategy>,
    /// Terminal success flag; `None` while the attempt is running.
    pub succeeded: Option<bool>,
}

impl RestartAttemptState {
    /// Whether `strategy` may still be attempted in this cycle.
    #[must_use]
    pub fn may_attempt(&self, strategy: RestartStrategy) -> bool {
        if strategy == RestartStrategy::BundleRelaunch && self.primary_unavailable {
            return false;
        }
        !self.tried.contains(&strategy)
    }

    /// Record that `strategy` is being attempted.
    pub fn begin(&mut self, strategy: RestartStrategy) {
        self.tried.push(strategy);
    }

    /// Record a failed strategy.
    pub fn fail(&mut self, strategy: RestartStrategy) {
        if strategy == RestartStrategy::BundleRelaunch {
            self.primary_unavailable = true;
        }
    }

    /// Record the winning strategy and close the attempt.
    pub fn succeed(&mut self, strategy: RestartStrategy) {
        self.chosen = Some(strategy);
        self.succeeded = Some(true);
    }

    /// Close the attempt without a winning strategy.
    pub fn exhaust(&mut self) {
        self.succeeded = Some(false);
    }
}

/// Terminal result of [`crate::restart::RestartSupervisor`] work.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RestartOutcome {
    /// A strategy succeeded.
    Succeeded {
        /// Winning strategy.
        strategy: RestartStrategy,
        /// What the strategy produced.
        outcome: StrategyOutcome,
    },
    /// Every applicable strategy failed or was disallowed.
    Exhausted {
        /// Strategies attempted, in order.
        tried: Vec<RestartStrategy>,
    },
    /// Another process holds the restart lock.
    Contended,
}
