//! Daily intake goal.

use log::{info, warn};
use serde::{Deserialize, Serialize};

const ML_PER_KG: f64 = 31.256;
const ML_PER_EXERCISE_MIN: f64 = 11.34;

/// Recommended intake in millilitres, rounded up. `None` for unusable inputs.
pub fn calculate_goal_ml(weight_kg: f64, exercise_min: f64) -> Option<u32> {
    if !weight_kg.is_finite() || !exercise_min.is_finite() || weight_kg < 0.0 || exercise_min < 0.0 {
        warn!("Cannot calculate goal from weight={} kg, exercise={} min", weight_kg, exercise_min);
        return None;
    }

    let goal = (weight_kg * ML_PER_KG + exercise_min * ML_PER_EXERCISE_MIN).ceil();
    if goal > u32::MAX as f64 {
        return None;
    }
    Some(goal as u32)
}

/// Calculated goal plus an optional override that applies to today only.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct DailyGoal {
    calculated_ml: u32,
    today_ml: Option<u32>,
}

impl DailyGoal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update_from_health(&mut self, weight_kg: f64, exercise_min: f64) -> Option<u32> {
        let goal = calculate_goal_ml(weight_kg, exercise_min)?;
        info!("🎯 Calculated water intake goal: {} mL", goal);
        self.calculated_ml = goal;
        Some(goal)
    }

    pub fn set_today(&mut self, goal_ml: u32) {
        self.today_ml = Some(goal_ml);
    }

    pub fn reset_to_calculated(&mut self) {
        self.today_ml = None;
    }

    pub fn calculated_ml(&self) -> u32 {
        self.calculated_ml
    }

    pub fn effective_ml(&self) -> u32 {
        self.today_ml.unwrap_or(self.calculated_ml)
    }

    /// Fraction of the goal reached, in `[0, 1]`. A zero goal counts as not started.
    pub fn progress(&self, total_intake_ml: f64) -> f64 {
        let goal = self.effective_ml();
        if goal == 0 {
            return 0.0;
        }
        (total_intake_ml / goal as f64).clamp(0.0, 1.0)
    }
}
