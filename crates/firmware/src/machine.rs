//! Update state machine
//!
//! [`transition`] is pure: it maps the current state and the outcome of the
//! last effect to the next state and the next effect to run. All I/O lives
//! in the control loop in `logic`, which executes effects and feeds their
//! outcomes back in.

use crate::error::UpdateError;
use crate::policy::UpdatePolicy;
use crate::progress::ProgressRange;
use crate::sdk::{FirmwareInfo, OPFW};
use crate::status::Status;
use std::fmt;

/// Flash strategy chosen from the policy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlashMode {
    Continuous,
    OpfwFirst,
}

/// Modules to flash and how
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlashPlan {
    pub mode: FlashMode,
    pub modules: Vec<String>,
}

impl FlashPlan {
    /// First (or only) flash pass
    pub fn first_step(&self) -> FlashStep {
        match self.mode {
            FlashMode::Continuous => FlashStep {
                modules: self.modules.clone(),
                range: ProgressRange::FULL,
            },
            FlashMode::OpfwFirst => FlashStep {
                modules: vec![OPFW.to_string()],
                range: ProgressRange::first_phase(self.modules.len()),
            },
        }
    }

    /// Second pass of an OPFW-first flash: everything except the core module
    pub fn remainder_step(&self) -> FlashStep {
        FlashStep {
            modules: self.modules.iter().filter(|m| *m != OPFW).cloned().collect(),
            range: ProgressRange::remainder_phase(self.modules.len()),
        }
    }
}

/// One call into the updater
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlashStep {
    pub modules: Vec<String>,
    pub range: ProgressRange,
}

/// Orchestrator state
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpdateState {
    Idle,
    /// Waiting for the policy, then for the image metadata
    PolicyDecision { mode: Option<FlashMode> },
    Flashing(FlashPlan),
    AwaitingReboot(FlashPlan),
    FlashingRemainder(FlashPlan),
    Done,
    Failed(UpdateError),
}

impl UpdateState {
    pub fn phase(&self) -> UpdatePhase {
        match self {
            UpdateState::Idle => UpdatePhase::Idle,
            UpdateState::PolicyDecision { .. } => UpdatePhase::PolicyDecision,
            UpdateState::Flashing(_) => UpdatePhase::Flashing,
            UpdateState::AwaitingReboot(_) => UpdatePhase::AwaitingReboot,
            UpdateState::FlashingRemainder(_) => UpdatePhase::FlashingRemainder,
            UpdateState::Done => UpdatePhase::Done,
            UpdateState::Failed(_) => UpdatePhase::Failed,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, UpdateState::Done | UpdateState::Failed(_))
    }
}

/// State without its payload, for reporting
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UpdatePhase {
    Idle,
    PolicyDecision,
    Flashing,
    AwaitingReboot,
    FlashingRemainder,
    Done,
    Failed,
}

impl fmt::Display for UpdatePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            UpdatePhase::Idle => "idle",
            UpdatePhase::PolicyDecision => "deciding update policy",
            UpdatePhase::Flashing => "flashing",
            UpdatePhase::AwaitingReboot => "waiting for device reboot",
            UpdatePhase::FlashingRemainder => "flashing remaining modules",
            UpdatePhase::Done => "done",
            UpdatePhase::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Result of the last effect
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Started,
    PolicyDecided(UpdatePolicy),
    MetadataExtracted(FirmwareInfo),
    Flashed(Status),
    DeviceReappeared,
    Reconnected,
    DeviceSettled,
    Faulted(UpdateError),
}

/// Work for the control loop
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    /// Connect and ask the updater for a policy
    DecidePolicy,
    /// Read the module list from the image
    ExtractMetadata,
    /// Flash, then close the connection
    Flash(FlashStep),
    /// Wait for the device to come back after the final flash
    Settle,
    /// Wait for the device to reboot into the new core module
    AwaitReboot,
    /// Re-request permission and reopen the connection
    Reconnect,
    Finish,
    Abort,
}

fn fail(error: UpdateError) -> (UpdateState, Effect) {
    (UpdateState::Failed(error), Effect::Abort)
}

fn plan_for(mode: FlashMode, info: FirmwareInfo) -> Result<FlashPlan, UpdateError> {
    if info.module_names.is_empty() {
        return Err(UpdateError::MetadataExtractionFailed(
            "image contains no modules".to_string(),
        ));
    }
    if mode == FlashMode::OpfwFirst && !info.has_module(OPFW) {
        return Err(UpdateError::MetadataExtractionFailed(format!(
            "image has no {} module",
            OPFW
        )));
    }
    Ok(FlashPlan {
        mode,
        modules: info.module_names,
    })
}

/// Advance the state machine by one outcome
pub fn transition(state: UpdateState, outcome: Outcome) -> (UpdateState, Effect) {
    use Outcome as O;
    use UpdateState as S;

    match (state, outcome) {
        // The first fault wins
        (S::Failed(e), _) => (S::Failed(e), Effect::Abort),
        (state, O::Faulted(e)) if !state.is_terminal() => fail(e),

        (S::Idle, O::Started) => (S::PolicyDecision { mode: None }, Effect::DecidePolicy),

        (S::PolicyDecision { mode: None }, O::PolicyDecided(policy)) => match policy {
            UpdatePolicy::NotAllowed => fail(UpdateError::PolicyNotAllowed),
            UpdatePolicy::RequireIntermediateFirmware(version) => {
                fail(UpdateError::PolicyRequiresIntermediate(version))
            }
            UpdatePolicy::Continuous => (
                S::PolicyDecision {
                    mode: Some(FlashMode::Continuous),
                },
                Effect::ExtractMetadata,
            ),
            UpdatePolicy::OpfwFirst => (
                S::PolicyDecision {
                    mode: Some(FlashMode::OpfwFirst),
                },
                Effect::ExtractMetadata,
            ),
        },

        (S::PolicyDecision { mode: Some(mode) }, O::MetadataExtracted(info)) => {
            match plan_for(mode, info) {
                Ok(plan) => {
                    let step = plan.first_step();
                    (S::Flashing(plan), Effect::Flash(step))
                }
                Err(e) => fail(e),
            }
        }

        (S::Flashing(plan), O::Flashed(status)) if status.is_ok() => match plan.mode {
            FlashMode::Continuous => (S::Flashing(plan), Effect::Settle),
            FlashMode::OpfwFirst => (S::AwaitingReboot(plan), Effect::AwaitReboot),
        },
        (S::Flashing(_) | S::FlashingRemainder(_), O::Flashed(status)) if !status.is_ok() => {
            fail(UpdateError::FlashFailed(status))
        }

        (S::AwaitingReboot(plan), O::DeviceReappeared) => (S::FlashingRemainder(plan), Effect::Reconnect),

        (S::FlashingRemainder(plan), O::Reconnected) => {
            let step = plan.remainder_step();
            if step.modules.is_empty() {
                (S::FlashingRemainder(plan), Effect::Settle)
            } else {
                (S::FlashingRemainder(plan), Effect::Flash(step))
            }
        }
        (S::FlashingRemainder(plan), O::Flashed(_)) => (S::FlashingRemainder(plan), Effect::Settle),

        (S::Flashing(_) | S::FlashingRemainder(_), O::DeviceSettled) => (S::Done, Effect::Finish),

        (state, outcome) => fail(UpdateError::InvalidTransition(format!(
            "{:?} in phase {}",
            outcome,
            state.phase()
        ))),
    }
}
