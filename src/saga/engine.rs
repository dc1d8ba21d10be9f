//! Saga execution: run in order, compensate in reverse.

use serde::Serialize;

use super::step::{SelfFailurePolicy, Step};
use crate::error::ReleaseError;
use crate::events::{EventSink, ReleaseEvent};

/// What happened to one step during a saga execution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum StepOutcome {
    Succeeded,
    Failed { error: String },
    Undone,
    UndoFailed { error: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StepRecord {
    pub step: &'static str,
    #[serde(flatten)]
    pub outcome: StepOutcome,
}

/// An `undo` that itself failed. Logged and reported, never escalated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CompensationFailure {
    pub step: &'static str,
    pub error: String,
}

/// A saga that ran to completion.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SagaReport {
    pub records: Vec<StepRecord>,
}

/// A saga that stopped at a failing step.
#[derive(Debug)]
pub struct SagaFailure {
    /// The step that failed.
    pub step: &'static str,
    pub error: ReleaseError,
    /// Steps whose `undo` succeeded, in the order they were undone.
    pub undone: Vec<&'static str>,
    pub compensation_failures: Vec<CompensationFailure>,
    pub records: Vec<StepRecord>,
    /// True if unwind was skipped because an irreversible action had happened.
    pub past_point_of_no_return: bool,
}

struct Registered<C> {
    step: Box<dyn Step<C>>,
    /// False for steps without `undo` and for everything after the point of
    /// no return.
    reversible: bool,
    irreversible: bool,
}

/// An ordered list of steps over context `C`.
pub struct Saga<C> {
    name: &'static str,
    steps: Vec<Registered<C>>,
}

/// Builds a [`Saga`]. Step order is dependency order.
pub struct SagaBuilder<C> {
    name: &'static str,
    steps: Vec<Registered<C>>,
    past_point_of_no_return: bool,
}

impl<C: Send> SagaBuilder<C> {
    pub fn new(name: &'static str) -> Self {
        SagaBuilder {
            name,
            steps: Vec::new(),
            past_point_of_no_return: false,
        }
    }

    /// Appends a step. After [`irreversible`](Self::irreversible) its undo is
    /// dropped.
    pub fn step(mut self, step: impl Step<C> + 'static) -> Self {
        let irreversible = self.past_point_of_no_return;
        let reversible = !irreversible && step.has_undo();
        self.steps.push(Registered {
            step: Box::new(step),
            reversible,
            irreversible,
        });
        self
    }

    /// Appends the step that crosses the point of no return. Neither it nor
    /// any later step is ever compensated, and once it has completed no
    /// earlier step is either.
    pub fn irreversible(mut self, step: impl Step<C> + 'static) -> Self {
        self.past_point_of_no_return = true;
        self.steps.push(Registered {
            step: Box::new(step),
            reversible: false,
            irreversible: true,
        });
        self
    }

    pub fn build(self) -> Saga<C> {
        Saga {
            name: self.name,
            steps: self.steps,
        }
    }
}

impl<C: Send> Saga<C> {
    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn step_names(&self) -> Vec<&'static str> {
        self.steps.iter().map(|r| r.step.name()).collect()
    }

    /// Runs every step in order against `ctx`.
    ///
    /// On the first failure that the step's own policy gives up on, completed
    /// reversible steps are undone in reverse completion order, each exactly
    /// once. Unwind is skipped entirely if an irreversible step has completed
    /// or the error says an irreversible action already happened.
    pub async fn run(&self, ctx: &mut C, events: &dyn EventSink) -> Result<SagaReport, SagaFailure> {
        let mut records = Vec::with_capacity(self.steps.len());
        let mut completed: Vec<usize> = Vec::new();

        for (index, registered) in self.steps.iter().enumerate() {
            let name = registered.step.name();
            events.emit(ReleaseEvent::StepStarted {
                step: name.to_string(),
            });

            let mut attempt = 0;
            let error = loop {
                attempt += 1;
                let err = match registered.step.run(ctx).await {
                    Ok(()) => break None,
                    Err(e) => e,
                };
                events.emit(ReleaseEvent::StepFailed {
                    step: name.to_string(),
                    error: err.to_string(),
                    attempt,
                });
                match registered.step.on_self_failure(&err, attempt) {
                    SelfFailurePolicy::Retry { after } => {
                        tracing::info!(saga = self.name, step = name, attempt, error = %err, "retrying step");
                        tokio::time::sleep(after).await;
                    }
                    SelfFailurePolicy::GiveUp => break Some(err),
                }
            };

            let Some(error) = error else {
                events.emit(ReleaseEvent::StepSucceeded {
                    step: name.to_string(),
                });
                records.push(StepRecord {
                    step: name,
                    outcome: StepOutcome::Succeeded,
                });
                completed.push(index);
                continue;
            };

            tracing::warn!(saga = self.name, step = name, error = %error, "step failed");
            records.push(StepRecord {
                step: name,
                outcome: StepOutcome::Failed {
                    error: error.to_string(),
                },
            });

            let crossed = completed.iter().any(|&i| self.steps[i].irreversible)
                || error.is_past_point_of_no_return();
            if crossed {
                tracing::warn!(
                    saga = self.name,
                    step = name,
                    "failure is past the point of no return; nothing will be rolled back"
                );
                return Err(SagaFailure {
                    step: name,
                    error,
                    undone: Vec::new(),
                    compensation_failures: Vec::new(),
                    records,
                    past_point_of_no_return: true,
                });
            }

            let (undone, compensation_failures) =
                self.unwind(&completed, ctx, events, &mut records).await;
            return Err(SagaFailure {
                step: name,
                error,
                undone,
                compensation_failures,
                records,
                past_point_of_no_return: false,
            });
        }

        Ok(SagaReport { records })
    }

    async fn unwind(
        &self,
        completed: &[usize],
        ctx: &mut C,
        events: &dyn EventSink,
        records: &mut Vec<StepRecord>,
    ) -> (Vec<&'static str>, Vec<CompensationFailure>) {
        let mut undone = Vec::new();
        let mut failures = Vec::new();

        for &index in completed.iter().rev() {
            let registered = &self.steps[index];
            if !registered.reversible {
                continue;
            }
            let name = registered.step.name();

            match registered.step.undo(ctx).await {
                Ok(()) => {
                    tracing::info!(saga = self.name, step = name, "step undone");
                    events.emit(ReleaseEvent::StepUndone {
                        step: name.to_string(),
                    });
                    records.push(StepRecord {
                        step: name,
                        outcome: StepOutcome::Undone,
                    });
                    undone.push(name);
                }
                Err(e) => {
                    tracing::warn!(saga = self.name, step = name, error = %e, "undo failed; continuing unwind");
                    events.emit(ReleaseEvent::UndoFailed {
                        step: name.to_string(),
                        error: e.to_string(),
                    });
                    records.push(StepRecord {
                        step: name,
                        outcome: StepOutcome::UndoFailed {
                            error: e.to_string(),
                        },
                    });
                    failures.push(CompensationFailure {
                        step: name,
                        error: e.to_string(),
                    });
                }
            }
        }

        (undone, failures)
    }
}
