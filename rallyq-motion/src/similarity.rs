use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::RangeInclusive;
use std::str::FromStr;

use crate::angle::inner_angle;
use rallyq_common::PoseFrame;

/// Minimum similarity for a template frame to count as a match
pub const DEFAULT_THRESHOLD: f32 = 0.9;

/// Joint angles compared between poses, as (a, vertex, b) landmark indices
pub const ANGLE_TRIPLES: [(usize, usize, usize); 12] = [
    (11, 13, 15), (12, 14, 16), // elbows
    (23, 11, 13), (24, 12, 14), // shoulders
    (13, 15, 17), (14, 16, 18), // wrists
    (23, 25, 27), (24, 26, 28), // knees
    (26, 28, 32), (25, 27, 31), // ankles
    (28, 24, 27), (27, 23, 28), // stance
];

/// Body region a template describes
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Category {
    /// Strokes, upper body from shoulders to hips
    Arm,
    /// Steps, lower body from hips to feet
    Footwork,
}

impl Category {
    pub const ALL: [Category; 2] = [Category::Arm, Category::Footwork];

    /// Landmarks belonging to the region
    pub fn joints(&self) -> RangeInclusive<usize> {
        match self {
            Category::Arm => 11..=24,
            Category::Footwork => 23..=32,
        }
    }

    /// Angle triples entirely inside the region
    pub fn triples(&self) -> impl Iterator<Item = (usize, usize, usize)> + '_ {
        let joints = self.joints();
        ANGLE_TRIPLES
            .into_iter()
            .filter(move |(a, m, b)| joints.contains(a) && joints.contains(m) && joints.contains(b))
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Category::Arm => write!(f, "Arm"),
            Category::Footwork => write!(f, "Footwork"),
        }
    }
}

impl FromStr for Category {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Arm" => Ok(Category::Arm),
            "Footwork" => Ok(Category::Footwork),
            _ => Err(format!("unknown template category '{}'", s)),
        }
    }
}

/// Joint angles of one pose, restricted to one region
#[derive(Debug, Clone, PartialEq)]
pub struct AngleProfile {
    /// Number of landmarks of the pose the angles come from
    landmarks: usize,
    angles: Vec<f32>,
}

impl AngleProfile {
    /// None if the pose lacks a landmark used by the region
    pub fn new(pose: &PoseFrame, category: Category) -> Option<Self> {
        let angles = category
            .triples()
            .map(|(a, m, b)| Some(inner_angle(pose.get(a)?, pose.get(m)?, pose.get(b)?)))
            .collect::<Option<Vec<f32>>>()?;

        Some(Self {
            landmarks: pose.len(),
            angles,
        })
    }

    pub fn angles(&self) -> &[f32] {
        &self.angles
    }

    /// Mean of `1 - |Δangle| / 180` over the region's angles.
    /// None when the poses have a different number of landmarks.
    pub fn similarity(&self, other: &AngleProfile) -> Option<f32> {
        if self.landmarks != other.landmarks || self.angles.is_empty() {
            return None;
        }

        let total: f32 = self
            .angles
            .iter()
            .zip(&other.angles)
            .map(|(a, b)| 1.0 - (a - b).abs() / 180.0)
            .sum();
        Some(total / self.angles.len() as f32)
    }
}

/// Similarity between two single frames
pub fn frame_similarity(current: &PoseFrame, template: &PoseFrame, category: Category) -> Option<f32> {
    AngleProfile::new(current, category)?.similarity(&AngleProfile::new(template, category)?)
}

/// Best similarity against any frame of a template, or 0 if below threshold
pub fn compare_profiles(current: &AngleProfile, template: &[AngleProfile], threshold: f32) -> f32 {
    let best = template
        .iter()
        .filter_map(|frame| current.similarity(frame))
        .fold(None, |best: Option<f32>, s| Some(best.map_or(s, |b| b.max(s))));

    match best {
        Some(similarity) if similarity >= threshold => similarity,
        _ => 0.0,
    }
}

/// Compare a live pose with a recorded landmark sequence
pub fn compare_keypoints(
    current: &PoseFrame,
    template: &[PoseFrame],
    category: Category,
    threshold: f32,
) -> f32 {
    let Some(current) = AngleProfile::new(current, category) else {
        return 0.0;
    };
    let frames: Vec<AngleProfile> = template
        .iter()
        .filter_map(|frame| AngleProfile::new(frame, category))
        .collect();
    compare_profiles(&current, &frames, threshold)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::{displaced, standing_pose};
    use assert_approx_eq::assert_approx_eq;
    use glam::Vec3;

    #[test]
    fn identical_sequences_score_one() {
        let pose = standing_pose();
        for category in Category::ALL {
            let score = compare_keypoints(&pose, &[pose.clone()], category, DEFAULT_THRESHOLD);
            assert_eq!(score, 1.0);
        }
    }

    #[test]
    fn regions_select_their_triples() {
        let arm: Vec<_> = Category::Arm.triples().collect();
        let footwork: Vec<_> = Category::Footwork.triples().collect();
        assert_eq!(arm, ANGLE_TRIPLES[..6].to_vec());
        assert_eq!(footwork, ANGLE_TRIPLES[6..].to_vec());
    }

    #[test]
    fn joints_outside_region_are_ignored() {
        let pose = standing_pose();

        // Raise the right wrist and the nose, footwork must not notice
        let moved = displaced(&displaced(&pose, 16, 0.05, -0.2), 0, 0.1, 0.1);
        let footwork = frame_similarity(&moved, &pose, Category::Footwork).unwrap();
        assert_eq!(footwork, 1.0);

        let arm = frame_similarity(&moved, &pose, Category::Arm).unwrap();
        assert!(arm < 1.0);
    }

    #[test]
    fn single_angle_difference() {
        let pose = standing_pose();
        let arm = AngleProfile::new(&pose, Category::Arm).unwrap();
        let mut other = arm.clone();
        other.angles[0] += 18.0;

        // One of six angles off by a tenth of the range
        let expected = (5.0 + 0.9) / 6.0;
        assert_approx_eq!(arm.similarity(&other).unwrap(), expected, 1e-5);
    }

    #[test]
    fn below_threshold_is_zero() {
        let pose = standing_pose();
        let bent = displaced(&displaced(&pose, 25, 0.15, -0.05), 26, -0.15, -0.05);
        let s = frame_similarity(&bent, &pose, Category::Footwork).unwrap();
        assert!(s < 1.0);

        assert_eq!(compare_keypoints(&bent, &[pose.clone()], Category::Footwork, s + 0.01), 0.0);
        assert_approx_eq!(compare_keypoints(&bent, &[pose], Category::Footwork, s - 0.01), s, 1e-6);
    }

    #[test]
    fn best_frame_wins() {
        let pose = standing_pose();
        let far = displaced(&pose, 15, 0.1, 0.1);
        let near = displaced(&pose, 15, 0.005, 0.0);
        let near_score = frame_similarity(&pose, &near, Category::Arm).unwrap();

        let score = compare_keypoints(&pose, &[far, near], Category::Arm, 0.0);
        assert_approx_eq!(score, near_score, 1e-6);
    }

    #[test]
    fn mismatched_frames_are_skipped() {
        let pose = standing_pose();
        let mut extended = pose.landmarks().to_vec();
        extended.push(Vec3::ZERO);
        let longer = PoseFrame::new(extended);

        assert_eq!(frame_similarity(&pose, &longer, Category::Arm), None);
        assert_eq!(compare_keypoints(&pose, &[longer], Category::Arm, 0.0), 0.0);
    }

    #[test]
    fn incomplete_pose_has_no_profile() {
        let pose = PoseFrame::new(standing_pose().landmarks()[..25].to_vec());
        assert!(AngleProfile::new(&pose, Category::Arm).is_some());
        assert!(AngleProfile::new(&pose, Category::Footwork).is_none());
    }

    #[test]
    fn category_names() {
        assert_eq!("Arm".parse::<Category>(), Ok(Category::Arm));
        assert_eq!(Category::Footwork.to_string(), "Footwork");
        assert!("Serve".parse::<Category>().is_err());
    }
}
