//! Status machines for every shared entity
//!
//! Transitions are checked against the row an agent has just read. The store
//! itself applies writes unconditionally, so these checks keep a single agent
//! from regressing a status; they do not arbitrate between agents.

use std::fmt::Debug;

use crate::errors::AgentError;
use crate::models::{DeploymentJobStatus, DeploymentStatus, ImageStatus, JobStatus};

/// A status enumeration with a fixed set of legal forward transitions
pub trait StatusMachine: Copy + Eq + Debug {
    /// Whether `self -> next` is a legal transition
    fn can_transition(self, next: Self) -> bool;

    /// Whether no transition leaves this status
    fn is_terminal(self) -> bool;
}

impl StatusMachine for DeploymentStatus {
    fn can_transition(self, next: Self) -> bool {
        use DeploymentStatus::*;
        matches!(
            (self, next),
            (Scheduled, BuildingImage)
                | (Scheduled, StartingContainers)
                | (BuildingImage, StartingContainers)
                | (StartingContainers, Finished)
        )
    }

    fn is_terminal(self) -> bool {
        self == DeploymentStatus::Finished
    }
}

impl StatusMachine for ImageStatus {
    fn can_transition(self, next: Self) -> bool {
        use ImageStatus::*;
        matches!(
            (self, next),
            (ToBuild, Building) | (Building, Ready) | (Building, Error)
        )
    }

    fn is_terminal(self) -> bool {
        matches!(self, ImageStatus::Ready | ImageStatus::Error)
    }
}

impl StatusMachine for DeploymentJobStatus {
    fn can_transition(self, next: Self) -> bool {
        use DeploymentJobStatus::*;
        matches!((self, next), (ToDeploy, InProgress) | (InProgress, Deployed))
    }

    fn is_terminal(self) -> bool {
        self == DeploymentJobStatus::Deployed
    }
}

impl StatusMachine for JobStatus {
    fn can_transition(self, next: Self) -> bool {
        matches!((self, next), (JobStatus::Planned, JobStatus::Finished))
    }

    fn is_terminal(self) -> bool {
        self == JobStatus::Finished
    }
}

/// Fail with `TransitionError` unless `from -> to` is legal
pub fn check_transition<S: StatusMachine>(from: S, to: S) -> Result<(), AgentError> {
    if from.can_transition(to) {
        Ok(())
    } else {
        Err(AgentError::TransitionError(format!("{:?} -> {:?}", from, to)))
    }
}
