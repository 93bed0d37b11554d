//! Motion analysis of a single player: joint angles, similarity
//! between a live pose and recorded templates, and the counting
//! of template matches (strokes and footwork steps).
//!
//! A template is a short recording of landmark frames tagged with
//! a body region. Matching is nearest-frame: every incoming pose is
//! compared with every frame of every template, there is no temporal
//! alignment between the two sequences.

mod angle;
mod matcher;
mod similarity;
mod template;

pub use angle::inner_angle;
pub use matcher::{Match, MatchResults, TemplateMatcher};
pub use similarity::{
    compare_keypoints, compare_profiles, frame_similarity, AngleProfile, Category, ANGLE_TRIPLES,
    DEFAULT_THRESHOLD,
};
pub use template::{StoreError, Template, TemplateStore};
