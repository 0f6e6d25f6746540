//! Status machine tests

use rollagent::deploy::fsm::{check_transition, StatusMachine};
use rollagent::errors::AgentError;
use rollagent::models::{DeploymentJobStatus, DeploymentStatus, ImageStatus, JobStatus};

fn reachable<S: StatusMachine>(all: &[S], from: S) -> Vec<S> {
    all.iter().copied().filter(|s| from.can_transition(*s)).collect()
}

#[test]
fn test_deployment_paths() {
    use DeploymentStatus::*;
    let all = [Scheduled, BuildingImage, StartingContainers, Finished];

    assert_eq!(reachable(&all, Scheduled), vec![BuildingImage, StartingContainers]);
    assert_eq!(reachable(&all, BuildingImage), vec![StartingContainers]);
    assert_eq!(reachable(&all, StartingContainers), vec![Finished]);
    assert!(reachable(&all, Finished).is_empty());

    for status in all {
        assert!(!status.can_transition(status), "{:?} loops", status);
        assert_eq!(status.is_terminal(), status == Finished);
    }
}

#[test]
fn test_image_paths() {
    use ImageStatus::*;
    let all = [ToBuild, Building, Ready, Error];

    assert_eq!(reachable(&all, ToBuild), vec![Building]);
    assert_eq!(reachable(&all, Building), vec![Ready, Error]);
    assert!(reachable(&all, Ready).is_empty());
    assert!(reachable(&all, Error).is_empty());
    assert!(Ready.is_terminal() && Error.is_terminal());
    assert!(!Building.is_terminal());
}

#[test]
fn test_job_paths() {
    use DeploymentJobStatus::*;
    let all = [ToDeploy, InProgress, Deployed];
    assert_eq!(reachable(&all, ToDeploy), vec![InProgress]);
    assert_eq!(reachable(&all, InProgress), vec![Deployed]);
    assert!(Deployed.is_terminal());

    assert!(JobStatus::Planned.can_transition(JobStatus::Finished));
    assert!(!JobStatus::Finished.can_transition(JobStatus::Planned));
    assert!(JobStatus::Finished.is_terminal());
}

#[test]
fn test_check_transition_names_both_ends() {
    let err = check_transition(DeploymentStatus::Finished, DeploymentStatus::Scheduled)
        .unwrap_err();
    match err {
        AgentError::TransitionError(msg) => {
            assert!(msg.contains("Finished"));
            assert!(msg.contains("Scheduled"));
        }
        other => panic!("unexpected error: {other}"),
    }
    assert!(check_transition(ImageStatus::Building, ImageStatus::Ready).is_ok());
}
