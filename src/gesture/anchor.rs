//! 骨骼锚点
//!
//! 身体部位（HEAD、CHEST ……）与手上接触点（指尖、指腹、掌心 ……）
//! 都表示为"父骨骼 + 本地偏移 + 可选法线"，随骨骼一起运动。

use std::collections::HashMap;

use glam::{Mat4, Quat, Vec3};

use crate::skeleton::{BoneSet, CanonicalJoints, Digit, Joint, Side};
use crate::{Result, SignError};
use super::config::AnchorDef;

/// 骨骼上的一个点
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Anchor {
    pub bone: usize,
    /// 骨骼本地空间位置
    pub offset: Vec3,
    /// 骨骼本地空间法线
    pub normal: Option<Vec3>,
}

impl Anchor {
    /// 由外部定义创建（骨骼名查找失败时报错）
    pub fn from_def(skeleton: &BoneSet, def: &AnchorDef) -> Result<Self> {
        let bone = skeleton
            .find_bone_by_name(&def.bone)
            .ok_or_else(|| SignError::BoneNotFound(def.bone.clone()))?;
        Ok(Self {
            bone,
            offset: def.position,
            normal: def.direction.and_then(|d| d.try_normalize()),
        })
    }

    /// 由绑定姿态下的世界位置/法线反算本地偏移
    pub fn from_world(bone: usize, bind_world: &Mat4, position: Vec3, normal: Option<Vec3>) -> Self {
        let inv = bind_world.inverse();
        Self {
            bone,
            offset: inv.transform_point3(position),
            normal: normal.and_then(|n| inv.transform_vector3(n).try_normalize()),
        }
    }

    /// 当前姿态下的世界位置
    #[inline]
    pub fn world_position(&self, skeleton: &BoneSet) -> Vec3 {
        skeleton.bones()[self.bone].transform_point(self.offset)
    }

    /// 当前姿态下的世界法线
    #[inline]
    pub fn world_normal(&self, skeleton: &BoneSet) -> Option<Vec3> {
        self.normal.map(|n| skeleton.bones()[self.bone].transform_direction(n))
    }
}

/// 锚点名统一为大写
#[inline]
fn anchor_key(name: &str) -> String {
    name.trim().to_ascii_uppercase()
}

/// 覆盖或追加外部锚点，骨骼缺失只警告
fn merge_defs(skeleton: &BoneSet, anchors: &mut HashMap<String, Anchor>, defs: &HashMap<String, AnchorDef>, tag: &str) {
    for (name, def) in defs {
        match Anchor::from_def(skeleton, def) {
            Ok(anchor) => {
                anchors.insert(anchor_key(name), anchor);
            }
            Err(e) => log::warn!("[Anchor] {} 锚点 '{}' 无效: {}", tag, name, e),
        }
    }
}

// ============================================================================
// 身体锚点
// ============================================================================

/// 身体部位锚点表
#[derive(Clone, Debug, Default)]
pub struct BodyLocations {
    anchors: HashMap<String, Anchor>,
}

impl BodyLocations {
    /// 由骨骼推导默认部位，再叠加外部定义
    ///
    /// 前伸距离按臂长比例给出，保证默认位置在手臂可达范围内。
    pub fn new(
        skeleton: &BoneSet,
        joints: &CanonicalJoints,
        forward: Vec3,
        arm_length: f32,
        defs: &HashMap<String, AnchorDef>,
    ) -> Self {
        let (bind_world, _) = skeleton.bind_world_transforms();
        let pos = |i: usize| bind_world[i].col(3).truncate();
        let mut anchors = HashMap::new();

        let torso = [
            ("HEAD", Joint::Head, 0.2),
            ("NECK", Joint::Neck, 0.12),
            ("CHEST", Joint::Spine2, 0.2),
            ("STOMACH", Joint::Spine1, 0.2),
            ("BELLY", Joint::Spine, 0.22),
            ("NEUTRAL", Joint::Spine1, 0.35),
        ];
        for (name, joint, reach) in torso {
            match joints.get(joint) {
                Some(bone) => {
                    let at = pos(bone) + forward * reach * arm_length;
                    anchors.insert(name.to_string(), Anchor::from_world(bone, &bind_world[bone], at, Some(forward)));
                }
                None => log::warn!("[Anchor] 缺少关节 {}，跳过部位 {}", joint.canonical_name(), name),
            }
        }

        for side in Side::BOTH {
            let name = format!("SHOULDER_{}", side.name().to_ascii_uppercase());
            match (joints.get(Joint::Shoulder(side)), joints.get(Joint::Arm(side))) {
                (Some(shoulder), Some(arm)) => {
                    let at = pos(arm) + forward * 0.1 * arm_length;
                    anchors.insert(name, Anchor::from_world(shoulder, &bind_world[shoulder], at, Some(forward)));
                }
                _ => log::warn!("[Anchor] 缺少{}肩关节，跳过部位 {}", side.name(), name),
            }
        }

        merge_defs(skeleton, &mut anchors, defs, "body");
        Self { anchors }
    }

    pub fn get(&self, name: &str) -> Option<&Anchor> {
        self.anchors.get(&anchor_key(name))
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.anchors.keys().map(String::as_str)
    }
}

// ============================================================================
// 手部几何
// ============================================================================

/// 单手骨骼索引、绑定姿态下的手掌坐标轴与接触锚点
#[derive(Clone, Debug)]
pub struct HandGeometry {
    pub side: Side,
    pub hand: usize,
    pub thumb: [usize; 4],
    /// 食指、中指、无名指、小指
    pub fingers: [[usize; 4]; 4],
    /// 绑定姿态：手腕 -> 中指根
    pub finger_dir: Vec3,
    /// 绑定姿态：掌心朝向
    pub palm_normal: Vec3,
    /// 绑定姿态：拇指一侧
    pub radial: Vec3,
    /// 手腕到中指根的距离
    pub palm_size: f32,
    bind_rotation: Quat,
    anchors: HashMap<String, Anchor>,
}

impl HandGeometry {
    pub fn new(
        skeleton: &BoneSet,
        joints: &CanonicalJoints,
        side: Side,
        thickness: f32,
        overrides: &HashMap<String, AnchorDef>,
    ) -> Result<Self> {
        let hand = joints.require(Joint::Hand(side))?;
        let chain = |digit: Digit| {
            joints
                .finger_chain(side, digit)
                .ok_or_else(|| SignError::BoneNotFound(format!("{}Hand{}", side.name(), digit.name())))
        };
        let thumb = chain(Digit::Thumb)?;
        let fingers = [chain(Digit::Index)?, chain(Digit::Middle)?, chain(Digit::Ring)?, chain(Digit::Pinky)?];

        let (bind_world, bind_rot) = skeleton.bind_world_transforms();
        let pos = |i: usize| bind_world[i].col(3).truncate();

        // ========================================
        // 手掌坐标轴
        // ========================================
        let wrist = pos(hand);
        let to_middle = pos(fingers[1][0]) - wrist;
        let palm_size = to_middle.length();
        let degenerate = |what: &str| SignError::DegenerateGeometry(format!("{} hand: {}", side.name(), what));
        let finger_dir = to_middle.try_normalize().ok_or_else(|| degenerate("zero-length palm"))?;
        let across = pos(fingers[0][0]) - pos(fingers[3][0]);
        let radial = (across - finger_dir * across.dot(finger_dir))
            .try_normalize()
            .ok_or_else(|| degenerate("index and pinky knuckles are collinear with the palm"))?;
        let palm_normal = finger_dir.cross(radial) * side.sign();

        // ========================================
        // 默认锚点
        // ========================================
        let mut anchors = HashMap::new();
        let mut put = |name: String, bone: usize, at: Vec3, normal: Vec3| {
            anchors.insert(name, Anchor::from_world(bone, &bind_world[bone], at, Some(normal)));
        };

        let digits = std::iter::once((1, thumb)).chain(fingers.iter().enumerate().map(|(i, c)| (i as u32 + 2, *c)));
        for (number, c) in digits {
            let p = c.map(pos);
            let mid = |a: usize, b: usize| (p[a] + p[b]) * 0.5;
            let tip_dir = (p[3] - p[2]).try_normalize().unwrap_or(finger_dir);
            let palmar = palm_normal * thickness;
            put(format!("{number}_TIP"), c[3], p[3] + tip_dir * thickness * 0.5, tip_dir);
            put(format!("{number}_PAD"), c[2], mid(2, 3) + palmar, palm_normal);
            put(format!("{number}_MID"), c[1], mid(1, 2) + palmar, palm_normal);
            put(format!("{number}_BASE"), c[0], mid(0, 1) + palmar, palm_normal);
            put(format!("{number}_BACK"), c[1], mid(1, 2) - palmar, -palm_normal);
        }

        let palm_center = wrist + to_middle * 0.5;
        put("PALMAR".to_string(), hand, palm_center + palm_normal * thickness * 2.0, palm_normal);
        put("BACK".to_string(), hand, palm_center - palm_normal * thickness * 2.0, -palm_normal);
        put("RADIAL".to_string(), fingers[0][0], pos(fingers[0][0]) + radial * thickness, radial);
        put("ULNAR".to_string(), fingers[3][0], pos(fingers[3][0]) - radial * thickness, -radial);
        put("WRIST".to_string(), hand, wrist, -finger_dir);

        merge_defs(skeleton, &mut anchors, overrides, side.name());

        Ok(Self {
            side,
            hand,
            thumb,
            fingers,
            finger_dir,
            palm_normal,
            radial,
            palm_size,
            bind_rotation: bind_rot[hand],
            anchors,
        })
    }

    /// 四指之一的关节链
    pub fn finger(&self, digit: Digit) -> Option<&[usize; 4]> {
        match digit {
            Digit::Thumb => None,
            d => self.fingers.get(d.index() - 1),
        }
    }

    pub fn anchor(&self, name: &str) -> Option<&Anchor> {
        self.anchors.get(&anchor_key(name))
    }

    /// 锚点当前世界位置
    pub fn anchor_world(&self, skeleton: &BoneSet, name: &str) -> Option<Vec3> {
        self.anchor(name).map(|a| a.world_position(skeleton))
    }

    /// 手掌从绑定到当前的世界旋转
    #[inline]
    pub fn rotation_from_bind(&self, skeleton: &BoneSet) -> Quat {
        skeleton.world_rotation(self.hand) * self.bind_rotation.inverse()
    }

    /// 绑定姿态下的手世界旋转
    #[inline]
    pub fn bind_rotation(&self) -> Quat {
        self.bind_rotation
    }

    /// 当前姿态下的 (手指方向, 掌心, 拇指侧)
    pub fn current_axes(&self, skeleton: &BoneSet) -> (Vec3, Vec3, Vec3) {
        let r = self.rotation_from_bind(skeleton);
        (r * self.finger_dir, r * self.palm_normal, r * self.radial)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup() -> (BoneSet, CanonicalJoints) {
        let skel = crate::test_rig::humanoid();
        let joints = CanonicalJoints::auto_detect(&skel);
        (skel, joints)
    }

    #[test]
    fn test_hand_axes_in_tpose() {
        let (skel, joints) = setup();
        for side in Side::BOTH {
            let hand = HandGeometry::new(&skel, &joints, side, 0.01, &HashMap::new()).unwrap();
            assert!(hand.finger_dir.abs_diff_eq(Vec3::X * side.sign(), 1e-5));
            // T-pose 掌心朝下，拇指朝前
            assert!(hand.palm_normal.abs_diff_eq(-Vec3::Y, 1e-5));
            assert!(hand.radial.abs_diff_eq(Vec3::Z, 1e-5));
            assert!((hand.palm_size - 0.095).abs() < 1e-5);
        }
    }

    #[test]
    fn test_anchor_follows_bone() {
        let (mut skel, joints) = setup();
        let hand = HandGeometry::new(&skel, &joints, Side::Left, 0.01, &HashMap::new()).unwrap();
        let tip = hand.anchor_world(&skel, "2_tip").unwrap();
        let index4 = skel.world_position(hand.fingers[0][3]);
        assert!((tip - index4).length() < 0.01);

        let pad = hand.anchor_world(&skel, "2_PAD").unwrap();
        assert!(pad.y < index4.y);

        skel.rotate_world(hand.hand, Quat::from_rotation_y(std::f32::consts::FRAC_PI_2));
        let moved = hand.anchor_world(&skel, "2_TIP").unwrap();
        let (fdir, normal, _) = hand.current_axes(&skel);
        assert!(fdir.abs_diff_eq(-Vec3::Z, 1e-5));
        assert!(normal.abs_diff_eq(-Vec3::Y, 1e-5));
        assert!(moved.z < tip.z - 0.1);
    }

    #[test]
    fn test_body_locations_defaults_and_overrides() {
        let (skel, joints) = setup();
        let mut defs = HashMap::new();
        defs.insert("chin".to_string(), AnchorDef { bone: "Head".to_string(), position: Vec3::new(0.0, -0.05, 0.1), direction: None });
        defs.insert("ghost".to_string(), AnchorDef { bone: "Nope".to_string(), position: Vec3::ZERO, direction: None });
        let body = BodyLocations::new(&skel, &joints, Vec3::Z, 0.53, &defs);

        let chest = body.get("chest").unwrap().world_position(&skel);
        assert!((chest - Vec3::new(0.0, 1.4, 0.106)).length() < 1e-4);
        let left = body.get("SHOULDER_LEFT").unwrap().world_position(&skel);
        assert!(left.x > 0.1);
        let chin = body.get("CHIN").unwrap().world_position(&skel);
        assert!((chin - Vec3::new(0.0, 1.6, 0.1)).length() < 1e-5);
        assert!(body.get("GHOST").is_none());
        assert!(body.get("NEUTRAL").is_some());
    }

    #[test]
    fn test_hand_override_replaces_default() {
        let (skel, joints) = setup();
        let mut defs = HashMap::new();
        defs.insert("PALMAR".to_string(), AnchorDef { bone: "RightHand".to_string(), position: Vec3::ZERO, direction: Some(Vec3::Y * 2.0) });
        let hand = HandGeometry::new(&skel, &joints, Side::Right, 0.01, &defs).unwrap();
        let palmar = hand.anchor("palmar").unwrap();
        assert_eq!(palmar.offset, Vec3::ZERO);
        assert_eq!(palmar.normal, Some(Vec3::Y));
    }
}
