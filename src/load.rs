//! Exhaustive lazy-load driver.
//!
//! Content on a chapter page materialises progressively as the viewport moves,
//! so a single snapshot undercounts. The driver advances the viewport round by
//! round and trusts the count only once it has stayed unchanged for
//! `stable_threshold` consecutive rounds while the viewport sits at the bottom.
//!
//! The stopping rule lives in [`LoadState::step`], a pure function of the
//! previous state and one [`Observation`]; [`ExhaustiveLoader`] is the
//! cooperative loop feeding it observations from a session.

use std::collections::BTreeSet;
use std::time::Duration;

use tracing::{debug, instrument, trace, warn};

use crate::session::{ContentElement, RenderSession, ScrollPosition, SessionError};

/// Parameters of the exhaustive-load loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoadParams {
    /// Unchanged rounds (at the bottom) required before the count is trusted.
    pub stable_threshold: u32,
    /// Hard cap on rounds.
    pub max_rounds: u32,
    /// Viewport advance per round, in pixels.
    pub scroll_step_px: u32,
    /// Wait after each step before counting.
    pub settle_interval: Duration,
}

/// What one round observed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Observation {
    /// Valid content elements currently rendered.
    pub count: u32,
    /// Whether the viewport reached the bottom of the document.
    pub at_bottom: bool,
}

/// Typed state of the stability loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LoadState {
    /// Count seen when the current stable streak started.
    pub last_count: u32,
    /// Consecutive rounds without a count change.
    pub stable_rounds: u32,
    /// Rounds completed so far.
    pub round: u32,
}

/// Result of advancing the state machine by one round.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadStep {
    /// Keep loading with the new state.
    Continue(LoadState),
    /// The count stabilised at the bottom of the page.
    Stable {
        /// Trusted count.
        count: u32,
        /// Rounds it took.
        rounds: u32,
    },
    /// The round cap was hit before stabilising.
    RoundLimit {
        /// Last observed count.
        count: u32,
        /// Rounds it took.
        rounds: u32,
    },
}

impl LoadState {
    /// Advances the loop by one observation.
    #[must_use]
    pub fn step(self, observation: Observation, params: &LoadParams) -> LoadStep {
        let round = self.round + 1;
        let (last_count, stable_rounds) = if observation.count == self.last_count {
            (self.last_count, self.stable_rounds + 1)
        } else {
            (observation.count, 0)
        };

        if stable_rounds >= params.stable_threshold && observation.at_bottom {
            return LoadStep::Stable {
                count: observation.count,
                rounds: round,
            };
        }
        if round >= params.max_rounds {
            return LoadStep::RoundLimit {
                count: observation.count,
                rounds: round,
            };
        }
        LoadStep::Continue(Self {
            last_count,
            stable_rounds,
            round,
        })
    }
}

/// Final result of an exhaustive load.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoadOutcome {
    /// Live count of valid content elements (the remote item count).
    pub remote_count: u32,
    /// Rounds performed.
    pub rounds: u32,
    /// Whether the count stabilised rather than hitting the round cap.
    pub converged: bool,
}

/// Number of distinct valid content indices.
///
/// Elements carrying an error marker or a visible error indicator are left out.
#[must_use]
pub fn count_valid_elements(elements: &[ContentElement]) -> u32 {
    let distinct: BTreeSet<u32> = elements
        .iter()
        .filter_map(ContentElement::content_index)
        .collect();
    u32::try_from(distinct.len()).unwrap_or(u32::MAX)
}

/// Drives a session until its content count is trustworthy.
#[derive(Debug, Clone, Copy)]
pub struct ExhaustiveLoader {
    params: LoadParams,
}

impl ExhaustiveLoader {
    #[must_use]
    pub fn new(params: LoadParams) -> Self {
        Self { params }
    }

    /// Forces every lazily loaded element to render and reports the count.
    ///
    /// The viewport advances by `scroll_step_px` each round and jumps to the
    /// bottom once less than one step remains.
    ///
    /// # Errors
    ///
    /// Propagates the first [`SessionError`] raised while scrolling or counting.
    #[instrument(level = "debug", skip(self, session), fields(stable_threshold = self.params.stable_threshold, max_rounds = self.params.max_rounds))]
    pub async fn run(&self, session: &dyn RenderSession) -> Result<LoadOutcome, SessionError> {
        let step = self.params.scroll_step_px;
        let mut state = LoadState::default();
        let mut previous: Option<ScrollPosition> = None;

        loop {
            let near_bottom = previous.is_some_and(|p| p.remaining() <= step);
            let position = if near_bottom {
                session.scroll_to_bottom().await?
            } else {
                session.scroll_by(step).await?
            };
            tokio::time::sleep(self.params.settle_interval).await;

            let count = count_valid_elements(&session.content_elements().await?);
            let observation = Observation {
                count,
                at_bottom: position.at_bottom(),
            };
            trace!(
                round = state.round + 1,
                count,
                at_bottom = observation.at_bottom,
                "load round"
            );

            match state.step(observation, &self.params) {
                LoadStep::Continue(next) => {
                    state = next;
                    previous = Some(position);
                }
                LoadStep::Stable { count, rounds } => {
                    debug!(remote_count = count, rounds, "content count stabilised");
                    return Ok(LoadOutcome {
                        remote_count: count,
                        rounds,
                        converged: true,
                    });
                }
                LoadStep::RoundLimit { count, rounds } => {
                    warn!(
                        remote_count = count,
                        rounds, "round limit reached before content count stabilised"
                    );
                    return Ok(LoadOutcome {
                        remote_count: count,
                        rounds,
                        converged: false,
                    });
                }
            }
        }
    }
}
