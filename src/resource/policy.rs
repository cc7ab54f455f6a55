//! Stop/Start Policy Resolver
//!
//! Pure functions from `(action, config, current state)` to a target state.
//! No I/O, no clock: the same inputs always give the same target.

use super::handler::Action;
use crate::config::{ActionConfig, StartSpec, StopBehavior, StopSpec};
use crate::error::{LightsOutError, Result};
use serde::Serialize;

/// How a count change is applied
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum ScalingMode {
    /// Only the desired count is changed
    Direct,
    /// Capacity bounds are updated along with the count
    AutoScaling { min_capacity: u32, max_capacity: u32 },
}

/// Observed state the resolver works from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CurrentState {
    ServiceCount { desired_count: u32 },
    DatabaseStatus(String),
}

/// What a database handler has to do to reach its target
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DbTransition {
    AlreadyAtTarget,
    /// Already moving toward the target
    InProgress,
    Issue,
    /// Current status does not allow the action
    Incompatible,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "shape", rename_all = "snake_case")]
pub enum TargetState {
    ServiceCount {
        desired_count: u32,
        scaling: ScalingMode,
    },
    Database {
        target_status: &'static str,
        transition: DbTransition,
        take_snapshot: bool,
    },
}

/// Whether `min <= desired <= max`
pub fn bounds_valid(min: u32, desired: u32, max: u32) -> bool {
    min <= desired && desired <= max
}

/// Auto-Scaling when both bounds are present and valid, otherwise Direct
pub fn start_mode(spec: &StartSpec) -> ScalingMode {
    match (spec.min_capacity, spec.max_capacity) {
        (Some(min), Some(max)) if bounds_valid(min, spec.desired_count, max) => {
            ScalingMode::AutoScaling {
                min_capacity: min,
                max_capacity: max,
            }
        }
        _ => ScalingMode::Direct,
    }
}

/// Stop bounds are validated against the computed target, then pinned to it
/// so the scaling policy cannot scale the service back out
pub fn stop_mode(spec: &StopSpec, target: u32) -> ScalingMode {
    match (spec.min_capacity, spec.max_capacity) {
        (Some(min), Some(max)) if bounds_valid(min, target, max) => {
            ScalingMode::AutoScaling {
                min_capacity: target,
                max_capacity: target,
            }
        }
        _ => ScalingMode::Direct,
    }
}

/// Capacity bounds that are present but were rejected
pub fn has_invalid_bounds(min: Option<u32>, desired: u32, max: Option<u32>) -> bool {
    match (min, max) {
        (None, None) => false,
        (Some(min), Some(max)) => !bounds_valid(min, desired, max),
        _ => true,
    }
}

/// Behavior used when a stop spec names none
pub fn effective_stop_behavior(spec: &StopSpec) -> StopBehavior {
    spec.behavior.unwrap_or(if spec.desired_count == 0 {
        StopBehavior::ScaleToZero
    } else {
        StopBehavior::ReduceToCount {
            count: spec.desired_count,
        }
    })
}

/// Target count of a stop
pub fn stop_target(behavior: StopBehavior, current: u32) -> u32 {
    match behavior {
        StopBehavior::ScaleToZero => 0,
        StopBehavior::ReduceByCount { count } => current.saturating_sub(count),
        StopBehavior::ReduceToCount { count } => count,
    }
}

fn database_transition(action: Action, status: &str) -> DbTransition {
    match (action, status) {
        (Action::Start, "available") | (Action::Stop, "stopped") => DbTransition::AlreadyAtTarget,
        (Action::Start, "starting") | (Action::Stop, "stopping") => DbTransition::InProgress,
        (Action::Start, "stopped") | (Action::Stop, "available") => DbTransition::Issue,
        _ => DbTransition::Incompatible,
    }
}

/// Resolve the target state of `action`
pub fn resolve(action: Action, config: &ActionConfig, current: &CurrentState) -> Result<TargetState> {
    match current {
        CurrentState::ServiceCount { desired_count } => match action {
            Action::Start => {
                let spec = config
                    .start
                    .as_ref()
                    .ok_or_else(|| LightsOutError::config("start spec is required"))?;
                Ok(TargetState::ServiceCount {
                    desired_count: spec.desired_count,
                    scaling: start_mode(spec),
                })
            }
            Action::Stop => {
                let spec = config
                    .stop
                    .as_ref()
                    .ok_or_else(|| LightsOutError::config("stop spec is required"))?;
                let target = stop_target(effective_stop_behavior(spec), *desired_count);
                Ok(TargetState::ServiceCount {
                    desired_count: target,
                    scaling: stop_mode(spec, target),
                })
            }
        },
        CurrentState::DatabaseStatus(status) => Ok(TargetState::Database {
            target_status: match action {
                Action::Start => "available",
                Action::Stop => "stopped",
            },
            transition: database_transition(action, status),
            take_snapshot: action == Action::Stop && !config.skip_snapshot,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config_with(start: Option<StartSpec>, stop: Option<StopSpec>) -> ActionConfig {
        ActionConfig {
            start,
            stop,
            ..ActionConfig::default()
        }
    }

    fn stop_behavior(behavior: StopBehavior) -> ActionConfig {
        config_with(
            None,
            Some(StopSpec {
                behavior: Some(behavior),
                ..StopSpec::default()
            }),
        )
    }

    fn service(desired_count: u32) -> CurrentState {
        CurrentState::ServiceCount { desired_count }
    }

    #[test]
    fn test_start_auto_scaling_mode() {
        let config = config_with(
            Some(StartSpec {
                desired_count: 2,
                min_capacity: Some(1),
                max_capacity: Some(4),
            }),
            None,
        );
        let target = resolve(Action::Start, &config, &service(0)).unwrap();
        assert_eq!(
            target,
            TargetState::ServiceCount {
                desired_count: 2,
                scaling: ScalingMode::AutoScaling {
                    min_capacity: 1,
                    max_capacity: 4
                }
            }
        );
    }

    #[test]
    fn test_start_direct_mode_without_bounds() {
        let config = config_with(
            Some(StartSpec {
                desired_count: 3,
                min_capacity: None,
                max_capacity: None,
            }),
            None,
        );
        let target = resolve(Action::Start, &config, &service(0)).unwrap();
        assert_eq!(
            target,
            TargetState::ServiceCount {
                desired_count: 3,
                scaling: ScalingMode::Direct
            }
        );
    }

    #[test]
    fn test_invalid_bounds_fall_back_to_direct() {
        // desired above max
        let spec = StartSpec {
            desired_count: 5,
            min_capacity: Some(1),
            max_capacity: Some(4),
        };
        assert_eq!(start_mode(&spec), ScalingMode::Direct);
        assert!(has_invalid_bounds(spec.min_capacity, spec.desired_count, spec.max_capacity));

        // only one bound
        let spec = StartSpec {
            desired_count: 2,
            min_capacity: Some(1),
            max_capacity: None,
        };
        assert_eq!(start_mode(&spec), ScalingMode::Direct);
        assert!(has_invalid_bounds(spec.min_capacity, spec.desired_count, spec.max_capacity));

        assert!(!has_invalid_bounds(None, 2, None));
    }

    #[test]
    fn test_stop_behaviors() {
        assert_eq!(stop_target(StopBehavior::ScaleToZero, 7), 0);
        assert_eq!(stop_target(StopBehavior::ReduceByCount { count: 2 }, 3), 1);
        assert_eq!(stop_target(StopBehavior::ReduceByCount { count: 5 }, 3), 0);
        assert_eq!(stop_target(StopBehavior::ReduceToCount { count: 1 }, 4), 1);
    }

    #[test]
    fn test_reduce_by_count_is_staged_and_floored() {
        let config = stop_behavior(StopBehavior::ReduceByCount { count: 1 });
        let mut current = 3;
        let mut targets = Vec::new();
        for _ in 0..4 {
            let TargetState::ServiceCount { desired_count, .. } =
                resolve(Action::Stop, &config, &service(current)).unwrap()
            else {
                panic!("expected service target");
            };
            targets.push(desired_count);
            current = desired_count;
        }
        assert_eq!(targets, vec![2, 1, 0, 0]);
    }

    #[test]
    fn test_stop_spec_without_behavior_uses_desired_count() {
        let spec = StopSpec {
            desired_count: 1,
            ..StopSpec::default()
        };
        assert_eq!(
            effective_stop_behavior(&spec),
            StopBehavior::ReduceToCount { count: 1 }
        );
        assert_eq!(
            effective_stop_behavior(&StopSpec::default()),
            StopBehavior::ScaleToZero
        );
    }

    #[test]
    fn test_stop_auto_scaling_pins_bounds_to_target() {
        let config = config_with(
            None,
            Some(StopSpec {
                desired_count: 0,
                min_capacity: Some(0),
                max_capacity: Some(0),
                behavior: Some(StopBehavior::ScaleToZero),
            }),
        );
        let target = resolve(Action::Stop, &config, &service(2)).unwrap();
        assert_eq!(
            target,
            TargetState::ServiceCount {
                desired_count: 0,
                scaling: ScalingMode::AutoScaling {
                    min_capacity: 0,
                    max_capacity: 0
                }
            }
        );
    }

    #[test]
    fn test_missing_spec_is_config_error() {
        let err = resolve(Action::Start, &ActionConfig::default(), &service(0)).unwrap_err();
        assert!(matches!(err, LightsOutError::Config(_)));
    }

    #[test]
    fn test_database_transitions() {
        let config = ActionConfig::default();
        let cases = [
            (Action::Stop, "available", DbTransition::Issue),
            (Action::Stop, "stopping", DbTransition::InProgress),
            (Action::Stop, "stopped", DbTransition::AlreadyAtTarget),
            (Action::Stop, "backing-up", DbTransition::Incompatible),
            (Action::Start, "stopped", DbTransition::Issue),
            (Action::Start, "starting", DbTransition::InProgress),
            (Action::Start, "available", DbTransition::AlreadyAtTarget),
            (Action::Start, "stopping", DbTransition::Incompatible),
        ];
        for (action, status, expected) in cases {
            let target = resolve(
                action,
                &config,
                &CurrentState::DatabaseStatus(status.to_string()),
            )
            .unwrap();
            let TargetState::Database { transition, .. } = target else {
                panic!("expected database target");
            };
            assert_eq!(transition, expected, "{} from {}", action, status);
        }
    }

    #[test]
    fn test_snapshot_only_on_stop_when_enabled() {
        let config = ActionConfig {
            skip_snapshot: false,
            ..ActionConfig::default()
        };
        let current = CurrentState::DatabaseStatus("available".to_string());
        let Ok(TargetState::Database { take_snapshot, .. }) =
            resolve(Action::Stop, &config, &current)
        else {
            panic!("expected database target");
        };
        assert!(take_snapshot);

        let current = CurrentState::DatabaseStatus("stopped".to_string());
        let Ok(TargetState::Database { take_snapshot, .. }) =
            resolve(Action::Start, &config, &current)
        else {
            panic!("expected database target");
        };
        assert!(!take_snapshot);
    }
}
