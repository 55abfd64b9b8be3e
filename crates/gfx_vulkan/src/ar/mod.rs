//! AR platform access
//!
//! [`ArPlatform`] is the capability table a platform binding (ARCore, AR Engine,
//! ARKit) implements once at startup. [`ArModule`] wraps the optional platform
//! and owns fixed-size caches for the camera data, so callers always get a
//! valid array even when no platform is linked or the platform misbehaves.

pub mod background;

use nalgebra::{Isometry3, Matrix4, Quaternion, Translation3, UnitQuaternion};

pub use background::{ArBackground, BackgroundResources, ShaderSource, ShaderSources};

/// Floats in a camera pose: translation xyz then rotation quaternion xyzw
pub const POSE_LENGTH: usize = 7;
/// Floats in a column-major 4x4 matrix
pub const MATRIX_LENGTH: usize = 16;
/// Floats in the camera quad texture coordinates (four uv pairs)
pub const TEX_COORDS_LENGTH: usize = 8;
/// Floats in one plane record
pub const PLANE_INFO_LENGTH: usize = 12;

/// Operations a platform AR SDK binding provides.
///
/// Array getters return whatever the SDK produced; [`ArModule`] validates the
/// length before caching.
pub trait ArPlatform: Send {
    /// Create the AR session
    fn start(&mut self);
    /// Resume the session after the app returns to the foreground
    fn resume(&mut self);
    /// Pause the session
    fn pause(&mut self);
    /// Advance tracking by one frame
    fn update(&mut self);
    /// SDK specific state code
    fn api_state(&self) -> i32;
    /// A session is running
    fn check_start(&self) -> bool;
    /// Texture the SDK writes the camera image into
    fn set_camera_texture_name(&mut self, id: u32);

    /// Camera pose
    fn camera_pose(&self) -> Vec<f32>;
    /// Camera view matrix
    fn camera_view_matrix(&self) -> Vec<f32>;
    /// Camera projection matrix
    fn camera_projection_matrix(&self) -> Vec<f32>;
    /// Texture coordinates of the camera image for a full-screen quad
    fn camera_tex_coords(&self) -> Vec<f32>;

    /// Refresh the added/removed/updated plane lists
    fn update_planes_info(&mut self);
    /// Planes first seen by the last update
    fn added_planes_count(&self) -> i32;
    /// Planes lost or merged by the last update
    fn removed_planes_count(&self) -> i32;
    /// Planes changed by the last update
    fn updated_planes_count(&self) -> i32;
    /// Records of the added planes, [`PLANE_INFO_LENGTH`] floats each
    fn added_planes_info(&self) -> Vec<f32>;
    /// Indices of the removed planes
    fn removed_planes_info(&self) -> Vec<i32>;
    /// Records of the updated planes
    fn updated_planes_info(&self) -> Vec<f32>;
}

fn copy_fixed<const N: usize>(cache: &mut [f32; N], values: &[f32], what: &str) {
    if values.len() > N {
        log::warn!(
            "AR {} has {} elements, at most {} are supported; keeping the previous value",
            what,
            values.len(),
            N
        );
        return;
    }
    cache[..values.len()].copy_from_slice(values);
}

/// AR entry point used by the renderer
pub struct ArModule {
    platform: Option<Box<dyn ArPlatform>>,
    camera_pose: [f32; POSE_LENGTH],
    view_matrix: [f32; MATRIX_LENGTH],
    projection_matrix: [f32; MATRIX_LENGTH],
    tex_coords: [f32; TEX_COORDS_LENGTH],
    added_planes: Vec<f32>,
    removed_planes: Vec<i32>,
    updated_planes: Vec<f32>,
    info_length: usize,
}

impl ArModule {
    /// Module over `platform`, or a no-op module when it is `None`
    pub fn new(platform: Option<Box<dyn ArPlatform>>) -> Self {
        if platform.is_none() {
            log::debug!("No AR platform linked; AR calls degrade to defaults");
        }
        Self {
            platform,
            camera_pose: [0.0; POSE_LENGTH],
            view_matrix: [0.0; MATRIX_LENGTH],
            projection_matrix: [0.0; MATRIX_LENGTH],
            tex_coords: [0.0; TEX_COORDS_LENGTH],
            added_planes: Vec::new(),
            removed_planes: Vec::new(),
            updated_planes: Vec::new(),
            info_length: 0,
        }
    }

    /// Module with no platform
    pub fn unavailable() -> Self {
        Self::new(None)
    }

    /// A platform is linked
    pub fn is_available(&self) -> bool {
        self.platform.is_some()
    }

    /// Start the session
    pub fn start(&mut self) {
        if let Some(platform) = &mut self.platform {
            platform.start();
        }
    }

    /// Resume the session
    pub fn resume(&mut self) {
        if let Some(platform) = &mut self.platform {
            platform.resume();
        }
    }

    /// Pause the session
    pub fn pause(&mut self) {
        if let Some(platform) = &mut self.platform {
            platform.pause();
        }
    }

    /// Advance tracking
    pub fn update(&mut self) {
        if let Some(platform) = &mut self.platform {
            platform.update();
        }
    }

    /// Platform state code, `-1` without a platform
    pub fn api_state(&self) -> i32 {
        self.platform.as_ref().map_or(-1, |p| p.api_state())
    }

    /// A session is running
    pub fn check_start(&self) -> bool {
        self.platform.as_ref().map_or(false, |p| p.check_start())
    }

    /// Hand the camera texture to the platform
    pub fn set_camera_texture_name(&mut self, id: u32) {
        if let Some(platform) = &mut self.platform {
            platform.set_camera_texture_name(id);
        }
    }

    /// Latest camera pose
    pub fn camera_pose(&mut self) -> &[f32; POSE_LENGTH] {
        if let Some(platform) = &self.platform {
            copy_fixed(&mut self.camera_pose, &platform.camera_pose(), "camera pose");
        }
        &self.camera_pose
    }

    /// Latest view matrix, column-major
    pub fn camera_view_matrix(&mut self) -> &[f32; MATRIX_LENGTH] {
        if let Some(platform) = &self.platform {
            copy_fixed(&mut self.view_matrix, &platform.camera_view_matrix(), "view matrix");
        }
        &self.view_matrix
    }

    /// Latest projection matrix, column-major
    pub fn camera_projection_matrix(&mut self) -> &[f32; MATRIX_LENGTH] {
        if let Some(platform) = &self.platform {
            copy_fixed(
                &mut self.projection_matrix,
                &platform.camera_projection_matrix(),
                "projection matrix",
            );
        }
        &self.projection_matrix
    }

    /// Latest camera quad texture coordinates
    pub fn camera_tex_coords(&mut self) -> &[f32; TEX_COORDS_LENGTH] {
        if let Some(platform) = &self.platform {
            copy_fixed(&mut self.tex_coords, &platform.camera_tex_coords(), "texture coordinates");
        }
        &self.tex_coords
    }

    /// Camera pose as a rigid transform
    pub fn camera_transform(&mut self) -> Isometry3<f32> {
        pose_to_isometry(self.camera_pose())
    }

    /// View matrix as a matrix
    pub fn view_matrix(&mut self) -> Matrix4<f32> {
        Matrix4::from_column_slice(self.camera_view_matrix())
    }

    /// Projection matrix as a matrix
    pub fn projection_matrix(&mut self) -> Matrix4<f32> {
        Matrix4::from_column_slice(self.camera_projection_matrix())
    }

    /// Refresh the plane lists
    pub fn update_planes_info(&mut self) {
        if let Some(platform) = &mut self.platform {
            platform.update_planes_info();
        }
    }

    /// Planes added by the last update, `-1` without a platform
    pub fn added_planes_count(&self) -> i32 {
        self.platform.as_ref().map_or(-1, |p| p.added_planes_count())
    }

    /// Planes removed by the last update, `-1` without a platform
    pub fn removed_planes_count(&self) -> i32 {
        self.platform.as_ref().map_or(-1, |p| p.removed_planes_count())
    }

    /// Planes updated by the last update, `-1` without a platform
    pub fn updated_planes_count(&self) -> i32 {
        self.platform.as_ref().map_or(-1, |p| p.updated_planes_count())
    }

    /// Added plane records; replaces the array returned by the previous call
    pub fn added_planes_info(&mut self) -> &[f32] {
        if let Some(platform) = &self.platform {
            self.added_planes = platform.added_planes_info();
            self.info_length = self.added_planes.len();
        }
        &self.added_planes
    }

    /// Removed plane indices; replaces the array returned by the previous call
    pub fn removed_planes_info(&mut self) -> &[i32] {
        if let Some(platform) = &self.platform {
            self.removed_planes = platform.removed_planes_info();
            self.info_length = self.removed_planes.len();
        }
        &self.removed_planes
    }

    /// Updated plane records; replaces the array returned by the previous call
    pub fn updated_planes_info(&mut self) -> &[f32] {
        if let Some(platform) = &self.platform {
            self.updated_planes = platform.updated_planes_info();
            self.info_length = self.updated_planes.len();
        }
        &self.updated_planes
    }

    /// Length of the array returned by the latest plane info call
    pub fn info_length(&self) -> usize {
        self.info_length
    }
}

impl Default for ArModule {
    fn default() -> Self {
        Self::unavailable()
    }
}

fn pose_to_isometry(pose: &[f32; POSE_LENGTH]) -> Isometry3<f32> {
    let translation = Translation3::new(pose[0], pose[1], pose[2]);
    let quaternion = Quaternion::new(pose[6], pose[3], pose[4], pose[5]);
    // An all-zero pose (nothing tracked yet) normalizes to NaN.
    let rotation = if quaternion.norm_squared() > f32::EPSILON {
        UnitQuaternion::from_quaternion(quaternion)
    } else {
        UnitQuaternion::identity()
    };
    Isometry3::from_parts(translation, rotation)
}

/// One decoded plane record
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PlaneInfo {
    /// Stable plane index assigned by the platform
    pub index: i32,
    /// Platform plane type ordinal
    pub plane_type: i32,
    /// Platform tracking state ordinal
    pub tracking_state: i32,
    /// Extent along the plane's local X axis
    pub extent_x: f32,
    /// Extent along the plane's local Z axis
    pub extent_z: f32,
    /// Center pose, same layout as the camera pose
    pub pose: [f32; POSE_LENGTH],
}

impl PlaneInfo {
    /// Decode one record; `None` when `record` is shorter than [`PLANE_INFO_LENGTH`]
    pub fn decode(record: &[f32]) -> Option<Self> {
        let record = record.get(..PLANE_INFO_LENGTH)?;
        let mut pose = [0.0; POSE_LENGTH];
        pose.copy_from_slice(&record[5..]);
        Some(Self {
            index: record[0] as i32,
            plane_type: record[1] as i32,
            tracking_state: record[2] as i32,
            extent_x: record[3],
            extent_z: record[4],
            pose,
        })
    }

    /// Decode every complete record in `info`; a trailing partial record is ignored
    pub fn decode_all(info: &[f32]) -> Vec<Self> {
        info.chunks_exact(PLANE_INFO_LENGTH)
            .filter_map(Self::decode)
            .collect()
    }

    /// Center pose as a rigid transform
    pub fn center(&self) -> Isometry3<f32> {
        pose_to_isometry(&self.pose)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use nalgebra::{Point3, Vector3};
    use std::sync::{Arc, Mutex};

    #[derive(Default)]
    struct FakeState {
        started: bool,
        texture_name: Option<u32>,
        pose: Vec<f32>,
        view: Vec<f32>,
        tex_coords: Vec<f32>,
        planes: Vec<f32>,
        removed: Vec<i32>,
    }

    struct FakePlatform(Arc<Mutex<FakeState>>);

    impl ArPlatform for FakePlatform {
        fn start(&mut self) {
            self.0.lock().unwrap().started = true;
        }
        fn resume(&mut self) {}
        fn pause(&mut self) {
            self.0.lock().unwrap().started = false;
        }
        fn update(&mut self) {}
        fn api_state(&self) -> i32 {
            3
        }
        fn check_start(&self) -> bool {
            self.0.lock().unwrap().started
        }
        fn set_camera_texture_name(&mut self, id: u32) {
            self.0.lock().unwrap().texture_name = Some(id);
        }
        fn camera_pose(&self) -> Vec<f32> {
            self.0.lock().unwrap().pose.clone()
        }
        fn camera_view_matrix(&self) -> Vec<f32> {
            self.0.lock().unwrap().view.clone()
        }
        fn camera_projection_matrix(&self) -> Vec<f32> {
            Vec::new()
        }
        fn camera_tex_coords(&self) -> Vec<f32> {
            self.0.lock().unwrap().tex_coords.clone()
        }
        fn update_planes_info(&mut self) {}
        fn added_planes_count(&self) -> i32 {
            (self.0.lock().unwrap().planes.len() / PLANE_INFO_LENGTH) as i32
        }
        fn removed_planes_count(&self) -> i32 {
            self.0.lock().unwrap().removed.len() as i32
        }
        fn updated_planes_count(&self) -> i32 {
            0
        }
        fn added_planes_info(&self) -> Vec<f32> {
            self.0.lock().unwrap().planes.clone()
        }
        fn removed_planes_info(&self) -> Vec<i32> {
            self.0.lock().unwrap().removed.clone()
        }
        fn updated_planes_info(&self) -> Vec<f32> {
            Vec::new()
        }
    }

    fn module() -> (ArModule, Arc<Mutex<FakeState>>) {
        let state = Arc::new(Mutex::new(FakeState::default()));
        let platform = FakePlatform(Arc::clone(&state));
        (ArModule::new(Some(Box::new(platform))), state)
    }

    fn plane_record(index: f32, pose: [f32; 7]) -> Vec<f32> {
        let mut record = vec![index, 0.0, 0.0, 2.0, 3.0];
        record.extend_from_slice(&pose);
        record
    }

    #[test]
    fn test_unavailable_defaults() {
        let mut ar = ArModule::unavailable();
        ar.start();
        ar.set_camera_texture_name(4);

        assert!(!ar.is_available());
        assert_eq!(ar.api_state(), -1);
        assert!(!ar.check_start());
        assert_eq!(ar.added_planes_count(), -1);
        assert_eq!(ar.camera_pose(), &[0.0; POSE_LENGTH]);
        assert!(ar.added_planes_info().is_empty());
        assert_eq!(ar.info_length(), 0);
    }

    #[test]
    fn test_lifecycle_forwarded() {
        let (mut ar, state) = module();
        assert!(!ar.check_start());
        ar.start();
        assert!(ar.check_start());
        ar.set_camera_texture_name(9);
        assert_eq!(state.lock().unwrap().texture_name, Some(9));
        assert_eq!(ar.api_state(), 3);
        ar.pause();
        assert!(!ar.check_start());
    }

    #[test]
    fn test_oversized_array_is_dropped() {
        let (mut ar, state) = module();
        let pose = [1.0, 2.0, 3.0, 0.0, 0.0, 0.0, 1.0];
        state.lock().unwrap().pose = pose.to_vec();
        assert_eq!(ar.camera_pose(), &pose);

        state.lock().unwrap().pose = vec![9.0; POSE_LENGTH + 1];
        assert_eq!(ar.camera_pose(), &pose);

        state.lock().unwrap().tex_coords = vec![5.0; 64];
        assert_eq!(ar.camera_tex_coords(), &[0.0; TEX_COORDS_LENGTH]);
    }

    #[test]
    fn test_short_array_overwrites_prefix() {
        let (mut ar, state) = module();
        state.lock().unwrap().view = vec![1.0; MATRIX_LENGTH];
        ar.camera_view_matrix();

        state.lock().unwrap().view = vec![2.0, 2.0];
        let view = ar.camera_view_matrix();
        assert_eq!(&view[..2], &[2.0, 2.0]);
        assert!(view[2..].iter().all(|v| *v == 1.0));
    }

    #[test]
    fn test_view_matrix_is_column_major() {
        let (mut ar, state) = module();
        let translation = Matrix4::new_translation(&Vector3::new(1.0, 2.0, 3.0));
        state.lock().unwrap().view = translation.as_slice().to_vec();

        let moved = ar.view_matrix().transform_point(&Point3::origin());
        assert_relative_eq!(moved, Point3::new(1.0, 2.0, 3.0));
    }

    #[test]
    fn test_camera_transform() {
        let (mut ar, state) = module();
        let half = std::f32::consts::FRAC_1_SQRT_2;
        // 90 degrees about Y
        state.lock().unwrap().pose = vec![0.0, 1.0, 0.0, 0.0, half, 0.0, half];

        let transform = ar.camera_transform();
        let forward = transform.transform_vector(&Vector3::new(0.0, 0.0, 1.0));
        assert_relative_eq!(forward, Vector3::new(1.0, 0.0, 0.0), epsilon = 1e-6);
        assert_relative_eq!(transform.translation.vector, Vector3::new(0.0, 1.0, 0.0));
    }

    #[test]
    fn test_untracked_pose_is_identity() {
        let mut ar = ArModule::unavailable();
        assert_eq!(ar.camera_transform(), Isometry3::identity());
    }

    #[test]
    fn test_plane_info_replaced_and_length_tracked() {
        let (mut ar, state) = module();
        let mut planes = plane_record(0.0, [0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 1.0]);
        planes.extend(plane_record(1.0, [1.0, 0.0, 0.0, 0.0, 0.0, 0.0, 1.0]));
        state.lock().unwrap().planes = planes;
        state.lock().unwrap().removed = vec![4, 5, 6];

        assert_eq!(ar.added_planes_info().len(), 2 * PLANE_INFO_LENGTH);
        assert_eq!(ar.info_length(), 24);
        assert_eq!(ar.added_planes_count(), 2);

        assert_eq!(ar.removed_planes_info(), &[4, 5, 6]);
        assert_eq!(ar.info_length(), 3);

        state.lock().unwrap().planes.clear();
        assert!(ar.added_planes_info().is_empty());
        assert_eq!(ar.info_length(), 0);
    }

    #[test]
    fn test_decode_plane_records() {
        let mut info = plane_record(7.0, [1.0, 2.0, 3.0, 0.0, 0.0, 0.0, 1.0]);
        info.extend(plane_record(8.0, [0.0; 7]));
        info.push(99.0);

        let planes = PlaneInfo::decode_all(&info);
        assert_eq!(planes.len(), 2);
        assert_eq!(planes[0].index, 7);
        assert_relative_eq!(planes[0].extent_x, 2.0);
        assert_relative_eq!(planes[0].extent_z, 3.0);
        assert_relative_eq!(planes[0].center().translation.vector, Vector3::new(1.0, 2.0, 3.0));
        assert_eq!(planes[1].index, 8);

        assert!(PlaneInfo::decode(&info[..5]).is_none());
    }
}
