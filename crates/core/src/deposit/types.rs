//! Deposit state, action and field-name types.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

// ============================================================================
// Lifecycle State
// ============================================================================

/// Lifecycle state of a deposit.
///
/// `unregistered → queued → running → {paused ⇄ running} → {finished, cancelled, failed}`
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum DepositState {
    Unregistered,
    Queued,
    Running,
    Paused,
    Finished,
    Cancelled,
    Failed,
}

impl DepositState {
    pub fn as_str(&self) -> &'static str {
        match self {
            DepositState::Unregistered => "unregistered",
            DepositState::Queued => "queued",
            DepositState::Running => "running",
            DepositState::Paused => "paused",
            DepositState::Finished => "finished",
            DepositState::Cancelled => "cancelled",
            DepositState::Failed => "failed",
        }
    }

    /// Returns true if no further transitions are possible.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            DepositState::Finished | DepositState::Cancelled | DepositState::Failed
        )
    }
}

impl fmt::Display for DepositState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DepositState {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "unregistered" => Ok(DepositState::Unregistered),
            "queued" => Ok(DepositState::Queued),
            "running" => Ok(DepositState::Running),
            "paused" => Ok(DepositState::Paused),
            "finished" => Ok(DepositState::Finished),
            "cancelled" => Ok(DepositState::Cancelled),
            "failed" => Ok(DepositState::Failed),
            _ => Err(()),
        }
    }
}

// ============================================================================
// Advisory Action Requests
// ============================================================================

/// Action a client asks the supervising process to take.
///
/// Written into the deposit's `actionRequest` field and only acted upon when
/// a supervisor polls it. Requesting an action never changes the state.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum DepositAction {
    Register,
    Pause,
    Resume,
    Cancel,
    Destroy,
}

impl DepositAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            DepositAction::Register => "register",
            DepositAction::Pause => "pause",
            DepositAction::Resume => "resume",
            DepositAction::Cancel => "cancel",
            DepositAction::Destroy => "destroy",
        }
    }
}

impl fmt::Display for DepositAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DepositAction {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "register" => Ok(DepositAction::Register),
            "pause" => Ok(DepositAction::Pause),
            "resume" => Ok(DepositAction::Resume),
            "cancel" => Ok(DepositAction::Cancel),
            "destroy" => Ok(DepositAction::Destroy),
            _ => Err(()),
        }
    }
}

// ============================================================================
// Field Names
// ============================================================================

/// Field names of the `deposit-status:{id}` hash.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DepositField {
    Uuid,
    State,
    ActionRequest,
    Lock,
    DepositorName,
    DepositorEmail,
    PackagingType,
    FileName,
    SubmitTime,
    StartTime,
    EndTime,
    IngestedOctets,
    IngestedObjects,
    TotalObjects,
    ErrorMessage,
}

impl DepositField {
    pub fn as_str(&self) -> &'static str {
        match self {
            DepositField::Uuid => "uuid",
            DepositField::State => "state",
            DepositField::ActionRequest => "actionRequest",
            DepositField::Lock => "lock",
            DepositField::DepositorName => "depositorName",
            DepositField::DepositorEmail => "depositorEmail",
            DepositField::PackagingType => "packagingType",
            DepositField::FileName => "fileName",
            DepositField::SubmitTime => "submitTime",
            DepositField::StartTime => "startTime",
            DepositField::EndTime => "endTime",
            DepositField::IngestedOctets => "ingestedOctets",
            DepositField::IngestedObjects => "ingestedObjects",
            DepositField::TotalObjects => "totalObjects",
            DepositField::ErrorMessage => "errorMessage",
        }
    }

    /// Counters that only change through atomic increments.
    pub fn is_counter(name: &str) -> bool {
        name == DepositField::IngestedOctets.as_str()
            || name == DepositField::IngestedObjects.as_str()
    }
}

impl AsRef<str> for DepositField {
    fn as_ref(&self) -> &str {
        self.as_str()
    }
}

impl fmt::Display for DepositField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
