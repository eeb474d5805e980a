//! Link retargeting.
//!
//! Converts per-joint poses from the simulator's Z-up convention into the
//! rendered skeleton's Y-up convention and maps joint names through an
//! optional [`JointMap`].
//!
//! The basis change is a fixed −90° rotation about X, applied to the
//! translation as a vector rotation and to the rotation by conjugation.
//! Both go through quaternion products so repeated frames never accumulate
//! matrix round-off.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use serde::{Deserialize, Serialize};
use strider_types::{LinkPose, StriderError};
use tracing::{debug, warn};

use crate::transform::{Quaternion, Transform3D, Vec3};

/// Per-axis bound on a converted link translation.
pub const MAX_LINK_TRANSLATION: f64 = 2.5;

/// Joint-name remapping file: `{ "map": {src: dst}, "ignore": [..], "enable": bool }`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JointMap {
    #[serde(default)]
    pub map: BTreeMap<String, String>,
    #[serde(default)]
    pub ignore: BTreeSet<String>,
    #[serde(default = "default_enable")]
    pub enable: bool,
}

fn default_enable() -> bool {
    true
}

impl Default for JointMap {
    fn default() -> Self {
        Self {
            map: BTreeMap::new(),
            ignore: BTreeSet::new(),
            enable: true,
        }
    }
}

impl JointMap {
    pub fn from_json(text: &str) -> Result<Self, StriderError> {
        serde_json::from_str(text).map_err(|e| StriderError::Serialization(e.to_string()))
    }

    /// Read a map from disk.  Any failure yields the identity map with
    /// retargeting enabled.
    pub fn load_or_identity(path: &Path) -> Self {
        let parsed = std::fs::read_to_string(path)
            .map_err(|e| StriderError::Config(e.to_string()))
            .and_then(|text| Self::from_json(&text));
        match parsed {
            Ok(map) => {
                debug!(path = %path.display(), entries = map.map.len(), "joint map loaded");
                map
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "joint map unavailable; using identity mapping");
                Self::default()
            }
        }
    }

    /// Target joint for `source`, or `None` if the joint is ignored.
    pub fn resolve<'a>(&'a self, source: &'a str) -> Option<&'a str> {
        if self.ignore.contains(source) {
            return None;
        }
        Some(self.map.get(source).map(String::as_str).unwrap_or(source))
    }
}

/// Simulator Z-up to skeleton Y-up.
pub fn basis_change() -> Quaternion {
    Quaternion::from_axis_angle(Vec3::new(1.0, 0.0, 0.0), -std::f64::consts::FRAC_PI_2)
}

/// Convert one link into the skeleton convention.
///
/// `None` for non-finite data, a degenerate quaternion, or a translation that
/// leaves the plausibility box after scaling.
pub fn convert_link(pose: &LinkPose, scale: f64) -> Option<Transform3D> {
    let b = basis_change();
    let pos = Vec3::from_array(pose.pos);
    if !pos.is_finite() {
        return None;
    }
    let translation = b.rotate(pos).scale(scale);
    if !translation.is_finite() || translation.max_abs() > MAX_LINK_TRANSLATION {
        return None;
    }
    let rotation = Quaternion::from_array(pose.quat).normalized()?.conjugated_by(b);
    Some(Transform3D::new(translation, rotation))
}

/// Counts from one [`LinkRetargeter::apply`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RetargetReport {
    pub applied: usize,
    pub ignored: usize,
    pub rejected: usize,
}

/// Holds the current skeleton pose and folds incoming link maps into it.
#[derive(Debug, Clone)]
pub struct LinkRetargeter {
    joints: JointMap,
    scale: f64,
    skeleton: BTreeMap<String, Transform3D>,
}

impl LinkRetargeter {
    pub fn new(joints: JointMap, scale: f64) -> Self {
        Self {
            joints,
            scale,
            skeleton: BTreeMap::new(),
        }
    }

    pub fn joint_map(&self) -> &JointMap {
        &self.joints
    }

    /// Current local transform of target joint `name`.
    pub fn joint(&self, name: &str) -> Option<&Transform3D> {
        self.skeleton.get(name)
    }

    pub fn skeleton(&self) -> &BTreeMap<String, Transform3D> {
        &self.skeleton
    }

    /// Apply one frame of link poses.  Rejected links keep their previous
    /// pose.  Nothing changes when the joint map disables animation.
    pub fn apply(&mut self, links: &BTreeMap<String, LinkPose>) -> RetargetReport {
        let mut report = RetargetReport::default();
        if !self.joints.enable {
            return report;
        }
        for (source, pose) in links {
            let Some(target) = self.joints.resolve(source) else {
                report.ignored += 1;
                continue;
            };
            match convert_link(pose, self.scale) {
                Some(t) => {
                    self.skeleton.insert(target.to_string(), t);
                    report.applied += 1;
                }
                None => {
                    debug!(joint = %source, "implausible link pose rejected");
                    report.rejected += 1;
                }
            }
        }
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const EPS: f64 = 1e-9;

    fn link(pos: [f64; 3]) -> LinkPose {
        LinkPose {
            pos,
            quat: [1.0, 0.0, 0.0, 0.0],
        }
    }

    #[test]
    fn basis_change_maps_z_up_to_y_up() {
        let t = convert_link(&link([1.0, 2.0, 0.5]), 1.0).unwrap();
        assert!((t.translation.x - 1.0).abs() < EPS);
        assert!((t.translation.y - 0.5).abs() < EPS);
        assert!((t.translation.z + 2.0).abs() < EPS);
    }

    #[test]
    fn rotation_axis_follows_basis() {
        let yaw = Quaternion::from_axis_angle(Vec3::new(0.0, 0.0, 1.0), 0.3);
        let pose = LinkPose {
            pos: [0.0; 3],
            quat: yaw.to_array(),
        };
        let q = convert_link(&pose, 1.0).unwrap().rotation;
        assert!((q.y - (0.15f64).sin()).abs() < EPS);
        assert!(q.x.abs() < EPS && q.z.abs() < EPS);
    }

    #[test]
    fn out_of_bounds_and_non_finite_rejected() {
        assert!(convert_link(&link([0.0, 0.0, 2.6]), 1.0).is_none());
        assert!(convert_link(&link([1.0, 0.0, 0.0]), 3.0).is_none());
        assert!(convert_link(&link([f64::NAN, 0.0, 0.0]), 1.0).is_none());
        let degenerate = LinkPose {
            pos: [0.0; 3],
            quat: [0.0; 4],
        };
        assert!(convert_link(&degenerate, 1.0).is_none());
    }

    #[test]
    fn joint_map_resolves_names() {
        let map = JointMap::from_json(r#"{"map": {"l_knee": "LeftLeg"}, "ignore": ["tail"]}"#).unwrap();
        assert!(map.enable);
        assert_eq!(map.resolve("l_knee"), Some("LeftLeg"));
        assert_eq!(map.resolve("neck"), Some("neck"));
        assert_eq!(map.resolve("tail"), None);
    }

    #[test]
    fn missing_file_falls_back_to_identity() {
        let map = JointMap::load_or_identity(Path::new("/definitely/not/here.json"));
        assert_eq!(map, JointMap::default());
        assert!(map.enable);
    }

    #[test]
    fn malformed_file_falls_back_to_identity() {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        write!(f, "{{ not json").unwrap();
        assert_eq!(JointMap::load_or_identity(f.path()), JointMap::default());
    }

    #[test]
    fn loads_map_from_disk() {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        write!(f, r#"{{"map": {{"a": "b"}}, "enable": false}}"#).unwrap();
        let map = JointMap::load_or_identity(f.path());
        assert!(!map.enable);
        assert_eq!(map.resolve("a"), Some("b"));
    }

    #[test]
    fn rejected_link_keeps_previous_pose() {
        let mut r = LinkRetargeter::new(JointMap::default(), 1.0);
        let mut links = BTreeMap::new();
        links.insert("arm".to_string(), link([0.1, 0.0, 0.0]));
        assert_eq!(r.apply(&links).applied, 1);

        links.insert("arm".to_string(), link([9.0, 0.0, 0.0]));
        let report = r.apply(&links);
        assert_eq!(report.rejected, 1);
        assert!((r.joint("arm").unwrap().translation.x - 0.1).abs() < EPS);
    }

    #[test]
    fn ignored_and_disabled() {
        let map = JointMap::from_json(r#"{"ignore": ["tail"]}"#).unwrap();
        let mut r = LinkRetargeter::new(map, 1.0);
        let mut links = BTreeMap::new();
        links.insert("tail".to_string(), link([0.0; 3]));
        assert_eq!(r.apply(&links).ignored, 1);
        assert!(r.joint("tail").is_none());

        let mut off = LinkRetargeter::new(JointMap { enable: false, ..JointMap::default() }, 1.0);
        assert_eq!(off.apply(&links), RetargetReport::default());
        assert!(off.skeleton().is_empty());
    }
}
