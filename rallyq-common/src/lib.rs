use serde::{Deserialize, Serialize};

/// Indices of the landmarks used by the analysis
pub mod landmark {
    pub const NOSE: usize = 0;
    pub const LEFT_SHOULDER: usize = 11;
    pub const RIGHT_SHOULDER: usize = 12;
    pub const LEFT_HIP: usize = 23;
    pub const RIGHT_HIP: usize = 24;
    pub const LEFT_ANKLE: usize = 27;
    pub const RIGHT_ANKLE: usize = 28;
    pub const LEFT_HEEL: usize = 29;
    pub const RIGHT_HEEL: usize = 30;
    pub const LEFT_FOOT_INDEX: usize = 31;
    pub const RIGHT_FOOT_INDEX: usize = 32;

    /// Landmarks hit-tested against the floor grid, left foot first
    pub const FEET: [usize; 4] = [LEFT_HEEL, LEFT_FOOT_INDEX, RIGHT_HEEL, RIGHT_FOOT_INDEX];
}

/// Bones of the BlazePose body, used to draw the skeleton
pub const POSE_CONNECTIONS: [(usize, usize); 35] = [
    (0, 1), (1, 2), (2, 3), (3, 7), (0, 4), (4, 5), (5, 6), (6, 8), (9, 10),
    (11, 12), (11, 13), (13, 15), (15, 17), (15, 19), (15, 21), (17, 19),
    (12, 14), (14, 16), (16, 18), (16, 20), (16, 22), (18, 20),
    (11, 23), (12, 24), (23, 24), (23, 25), (24, 26), (25, 27), (26, 28),
    (27, 29), (28, 30), (29, 31), (30, 32), (27, 31), (28, 32),
];

/// A single landmark, normalized to the frame size on x and y
pub type Landmark = glam::Vec3;

/// The landmarks of one person in one frame, in model order
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PoseFrame(pub Vec<Landmark>);

impl PoseFrame {
    pub fn new(landmarks: Vec<Landmark>) -> Self {
        Self(landmarks)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn landmarks(&self) -> &[Landmark] {
        &self.0
    }

    pub fn get(&self, index: usize) -> Option<Landmark> {
        self.0.get(index).copied()
    }

    /// Normalized image-space position of a landmark
    pub fn point2(&self, index: usize) -> Option<glam::Vec2> {
        self.get(index).map(|l| l.truncate())
    }

    /// Pixel position of a landmark
    pub fn pixel(&self, index: usize, resolution: &Resolution) -> Option<glam::Vec2> {
        self.point2(index).map(|p| resolution.denormalize(p))
    }

    /// Normalized midpoint between two landmarks
    pub fn midpoint2(&self, a: usize, b: usize) -> Option<glam::Vec2> {
        Some((self.point2(a)? + self.point2(b)?) * 0.5)
    }
}

impl From<Vec<Landmark>> for PoseFrame {
    fn from(landmarks: Vec<Landmark>) -> Self {
        Self(landmarks)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resolution {
    pub w: usize,
    pub h: usize,
}

impl Resolution {
    pub fn new(w: usize, h: usize) -> Self {
        Self { w, h }
    }

    pub fn size(&self) -> glam::Vec2 {
        glam::Vec2::new(self.w as f32, self.h as f32)
    }

    pub fn normalize(&self, pixel: glam::Vec2) -> glam::Vec2 {
        pixel / self.size()
    }

    pub fn denormalize(&self, point: glam::Vec2) -> glam::Vec2 {
        point * self.size()
    }
}

/// A captured RGB frame and the pose detected on it, if any
#[derive(Debug, Clone)]
pub struct CaptureData {
    /// Position of the frame inside its source
    pub index: usize,
    pub resolution: Resolution,
    /// Packed RGB8 pixels, row major
    pub frame: Vec<u8>,
    pub pose: Option<PoseFrame>,
}
