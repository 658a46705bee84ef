//! planner.rs
//! Outer control law seam. The slow loop hands the latest attitude state to a
//! `CommandPlanner` and forwards whatever commands it returns.

use crate::state::types::{
    AngularVelocity, ControlCommand, MagnetId, Orientation, Vector3,
};

/// Attitude state visible to the planner on one slow-loop cycle.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PlannerInput {
    pub orientation: Orientation,
    /// `None` until the IMU has reported a rate.
    pub angular_velocity: Option<AngularVelocity>,
    pub offset: Orientation,
    pub ideal_direction: Vector3,
}

pub trait CommandPlanner: Send {
    /// Zero or more commands to apply this cycle.
    fn plan(&mut self, input: &PlannerInput) -> Vec<ControlCommand>;
}

/// Never issues commands.
#[derive(Debug, Default, Clone, Copy)]
pub struct IdlePlanner;

impl CommandPlanner for IdlePlanner {
    fn plan(&mut self, _input: &PlannerInput) -> Vec<ControlCommand> {
        Vec::new()
    }
}

/// Replays a fixed command set once, then stays quiet.
#[derive(Debug, Clone, Default)]
pub struct HoldPlanner {
    targets: Vec<(MagnetId, f32)>,
    issued: bool,
}

impl HoldPlanner {
    pub fn new(targets: Vec<(MagnetId, f32)>) -> Self {
        Self { targets, issued: false }
    }
}

impl CommandPlanner for HoldPlanner {
    fn plan(&mut self, _input: &PlannerInput) -> Vec<ControlCommand> {
        if self.issued {
            return Vec::new();
        }
        self.issued = true;
        self.targets
            .iter()
            .map(|&(id, value)| ControlCommand::new(id, value))
            .collect()
    }
}

impl<F> CommandPlanner for F
where
    F: FnMut(&PlannerInput) -> Vec<ControlCommand> + Send,
{
    fn plan(&mut self, input: &PlannerInput) -> Vec<ControlCommand> {
        self(input)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn input() -> PlannerInput {
        PlannerInput {
            orientation: Orientation::IDENTITY,
            angular_velocity: None,
            offset: Orientation::IDENTITY,
            ideal_direction: Vector3::new(0.0, 0.0, 1.0),
        }
    }

    #[test]
    fn hold_planner_issues_once() {
        let mut p = HoldPlanner::new(vec![(MagnetId(1), 1.5), (MagnetId(2), 0.5)]);
        assert_eq!(p.plan(&input()).len(), 2);
        assert!(p.plan(&input()).is_empty());
    }

    #[test]
    fn closures_are_planners() {
        let mut calls = 0;
        let mut p = |_: &PlannerInput| {
            calls += 1;
            vec![ControlCommand::zero(MagnetId(3))]
        };
        assert_eq!(CommandPlanner::plan(&mut p, &input()).len(), 1);
        drop(p);
        assert_eq!(calls, 1);
    }
}
