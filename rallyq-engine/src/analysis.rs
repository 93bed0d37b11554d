use glam::Vec3;

use rallyq_calib::Calibration;
use rallyq_common::{landmark, PoseFrame};

const CM_PER_M: f32 = 100.0;

/// Speed along the board axes, meters per second
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Velocity {
    /// Along the board x axis
    pub sideways: f32,
    /// Along the board y axis
    pub forward: f32,
    /// Along the board z axis
    pub depth: f32,
    pub overall: f32,
}

impl Velocity {
    fn from_displacement(delta: Vec3, fps: f32) -> Self {
        let abs = delta.abs();
        Self {
            sideways: abs.x * fps,
            forward: abs.y * fps,
            depth: abs.z * fps,
            overall: delta.length() * fps,
        }
    }

    fn max(self, other: Self) -> Self {
        Self {
            sideways: self.sideways.max(other.sideways),
            forward: self.forward.max(other.forward),
            depth: self.depth.max(other.depth),
            overall: self.overall.max(other.overall),
        }
    }

    fn scale(self, k: f32) -> Self {
        Self {
            sideways: self.sideways * k,
            forward: self.forward * k,
            depth: self.depth * k,
            overall: self.overall * k,
        }
    }

    pub fn km_h(self) -> Self {
        self.scale(3.6)
    }
}

impl std::ops::Add for Velocity {
    type Output = Self;

    fn add(self, other: Self) -> Self {
        Self {
            sideways: self.sideways + other.sideways,
            forward: self.forward + other.forward,
            depth: self.depth + other.depth,
            overall: self.overall + other.overall,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct SpeedStats {
    pub current: Velocity,
    pub max: Velocity,
    pub average: Velocity,
}

/// Player speed from the hip midpoint of consecutive frames
#[derive(Debug)]
pub struct SpeedTracker {
    fps: f32,
    noise_threshold: f32,
    previous: Option<Vec3>,
    current: Velocity,
    max: Velocity,
    sum: Velocity,
    samples: usize,
}

impl SpeedTracker {
    pub fn new(fps: f32, noise_threshold: f32) -> Self {
        Self {
            fps,
            noise_threshold,
            previous: None,
            current: Velocity::default(),
            max: Velocity::default(),
            sum: Velocity::default(),
            samples: 0,
        }
    }

    /// Feed the hip position of a frame in meters, None when it is unknown.
    /// Frames without a position keep the last known one as reference.
    pub fn update(&mut self, position: Option<Vec3>) -> Velocity {
        let Some(position) = position else {
            self.current = Velocity::default();
            return self.current;
        };

        self.current = match self.previous {
            Some(previous) => {
                let delta = position - previous;
                let velocity = if delta.length() < self.noise_threshold {
                    Velocity::default()
                } else {
                    Velocity::from_displacement(delta, self.fps)
                };
                self.max = self.max.max(velocity);
                self.sum = self.sum + velocity;
                self.samples += 1;
                velocity
            }
            None => Velocity::default(),
        };
        self.previous = Some(position);
        self.current
    }

    pub fn stats(&self) -> SpeedStats {
        let average = if self.samples > 0 {
            self.sum.scale(1.0 / self.samples as f32)
        } else {
            Velocity::default()
        };
        SpeedStats {
            current: self.current,
            max: self.max,
            average,
        }
    }

    pub fn reset(&mut self) {
        *self = Self::new(self.fps, self.noise_threshold);
    }
}

/// Share of foot placements per grid cell
#[derive(Debug, Default)]
pub struct CoverageTracker {
    hits: Vec<u32>,
    /// Area of one cell, square meters
    cell_area: f64,
}

impl CoverageTracker {
    /// Count the feet of a pose on the grid, returns the cells hit
    pub fn record(&mut self, calibration: &Calibration, pose: &PoseFrame) -> Vec<usize> {
        if self.hits.len() != calibration.cells.len() {
            self.hits = vec![0; calibration.cells.len()];
        }
        self.cell_area = calibration.board.cell_area();

        let cells = feet_cells(calibration, pose);
        for &cell in &cells {
            self.hits[cell] += 1;
        }
        cells
    }

    #[cfg(test)]
    pub fn hits(&self) -> &[u32] {
        &self.hits
    }

    pub fn total(&self) -> u32 {
        self.hits.iter().sum()
    }

    /// Percentage of all hits per cell, all zero before the first hit
    pub fn ratios(&self) -> Vec<f32> {
        let total = self.total();
        self.hits
            .iter()
            .map(|&h| if total > 0 { h as f32 / total as f32 * 100.0 } else { 0.0 })
            .collect()
    }

    pub fn covered_cells(&self) -> usize {
        self.hits.iter().filter(|&&h| h > 0).count()
    }

    /// Square meters
    pub fn covered_area(&self) -> f64 {
        self.covered_cells() as f64 * self.cell_area
    }

    pub fn reset(&mut self) {
        self.hits.iter_mut().for_each(|h| *h = 0);
    }
}

/// First cell under each foot of a pose.
/// Feet lying on the top or left border are detector fallbacks and skipped.
pub fn feet_cells(calibration: &Calibration, pose: &PoseFrame) -> Vec<usize> {
    landmark::FEET
        .iter()
        .filter_map(|&foot| pose.point2(foot))
        .filter(|point| point.x > 0.0 && point.y > 0.0)
        .filter_map(|point| calibration.cell_at(point).map(|cell| cell.index))
        .collect()
}

/// Board position of the hip midpoint, meters
pub fn hip_position(calibration: &Calibration, pose: &PoseFrame) -> Option<Vec3> {
    let hips = pose.midpoint2(landmark::LEFT_HIP, landmark::RIGHT_HIP)?;
    Some(calibration.back_project(hips) / CM_PER_M)
}

/// Distance between nose and ankles on the board, meters
pub fn body_height(calibration: &Calibration, pose: &PoseFrame, correction: f32) -> Option<f32> {
    let nose = pose.point2(landmark::NOSE)?;
    let ankles = pose.midpoint2(landmark::LEFT_ANKLE, landmark::RIGHT_ANKLE)?;
    let distance = calibration.back_project(nose).distance(calibration.back_project(ankles));
    Some(distance * correction / CM_PER_M)
}
