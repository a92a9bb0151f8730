//! 手相对身体的位置
//!
//! 目标点 = 身体锚点 + 法线 × 距离，距离按臂长比例给出。
//! 中立位置是两手共用的锚点，额外向本侧偏移，其它锚点不偏移。

use glam::Vec3;

use crate::skeleton::{BoneSet, Side};
use crate::{Result, SignError};
use super::anchor::{Anchor, BodyLocations};
use super::config::GestureConfig;
use super::instruction::{GestureInstruction, Symmetry};
use super::timeline::{PhasedValue, Timing};

#[derive(Clone, Debug)]
pub struct HandLocation {
    side: Side,
    arm_length: f32,
    value: PhasedValue<Vec3>,
}

impl HandLocation {
    /// 静止位置取配置中的中立锚点，缺失时用手当前的位置
    pub fn new(
        side: Side,
        skeleton: &BoneSet,
        body: &BodyLocations,
        config: &GestureConfig,
        arm_length: f32,
        fallback: Vec3,
    ) -> Self {
        let rest = match body.get(&config.neutral_location) {
            Some(anchor) => location_point(anchor, skeleton, side, config.location_distance, config, arm_length, true),
            None => {
                log::warn!("[Gesture] 中立位置 '{}' 不存在，使用当前手位置", config.neutral_location);
                fallback
            }
        };
        Self { side, arm_length, value: PhasedValue::new(rest) }
    }

    pub fn value(&self) -> &PhasedValue<Vec3> {
        &self.value
    }

    #[inline]
    pub fn current(&self) -> Vec3 {
        self.value.cur
    }

    pub fn new_gesture(
        &mut self,
        skeleton: &BoneSet,
        body: &BodyLocations,
        instr: &GestureInstruction,
        symmetry: Symmetry,
        config: &GestureConfig,
        timing: Timing,
        elapsed: f32,
    ) -> Result<()> {
        let name = instr
            .location_body_arm
            .as_deref()
            .ok_or_else(|| SignError::InvalidInstruction("location instruction without locationBodyArm".to_string()))?;
        let name = symmetry.mirror_location(name);
        let anchor = body
            .get(&name)
            .ok_or_else(|| SignError::UnknownName { kind: "body location", name: name.clone() })?;
        let distance = instr.distance.unwrap_or(config.location_distance);
        let spread = name == config.neutral_location;
        let target = location_point(anchor, skeleton, self.side, distance, config, self.arm_length, spread);
        self.value.arm(target, timing, elapsed, instr.shift);
        Ok(())
    }

    pub fn update(&mut self, dt: f32) {
        self.value.update(dt);
    }
}

/// 锚点前方 distance 倍臂长处；`spread` 时再向本侧偏移
pub fn location_point(
    anchor: &Anchor,
    skeleton: &BoneSet,
    side: Side,
    distance: f32,
    config: &GestureConfig,
    arm_length: f32,
    spread: bool,
) -> Vec3 {
    let normal = anchor.world_normal(skeleton).unwrap_or_else(|| config.forward_axis());
    let mut offset = normal * distance;
    if spread {
        offset += config.left_axis() * side.sign() * config.location_side_offset;
    }
    anchor.world_position(skeleton) + offset * arm_length
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gesture::instruction::{GestureKind, HandSelector};
    use crate::skeleton::CanonicalJoints;
    use std::collections::HashMap;

    fn setup() -> (BoneSet, BodyLocations, GestureConfig) {
        let skel = crate::test_rig::humanoid();
        let joints = CanonicalJoints::auto_detect(&skel);
        let config = GestureConfig::default();
        let body = BodyLocations::new(&skel, &joints, config.forward_axis(), 0.5, &HashMap::new());
        (skel, body, config)
    }

    #[test]
    fn test_rest_at_neutral() {
        let (skel, body, config) = setup();
        let loc = HandLocation::new(Side::Left, &skel, &body, &config, 0.5, Vec3::ZERO);
        // Spine1 (0, 1.25, 0) + 前方 0.35·0.5 + 0.3·0.5 + 左侧 0.12·0.5
        assert!(loc.current().abs_diff_eq(Vec3::new(0.06, 1.25, 0.325), 1e-5));
    }

    #[test]
    fn test_location_with_symmetry_and_unknown_name() {
        let (skel, body, config) = setup();
        let mut loc = HandLocation::new(Side::Left, &skel, &body, &config, 0.5, Vec3::ZERO);
        let mut instr = GestureInstruction::new(GestureKind::LocationBodyArm, HandSelector::Left);
        instr.location_body_arm = Some("SHOULDER_RIGHT".to_string());
        instr.distance = Some(0.0);
        let sym = Symmetry { lr: true, ..Symmetry::NONE };
        loc.new_gesture(&skel, &body, &instr, sym, &config, Timing::fill(None, None, None, None), 0.0).unwrap();
        // 镜像到左肩
        assert!(loc.value().tgt.x > 0.1);

        instr.location_body_arm = Some("ELBOW_PIT".to_string());
        let before = loc.value().tgt;
        let err = loc.new_gesture(&skel, &body, &instr, Symmetry::NONE, &config, Timing::fill(None, None, None, None), 0.0);
        assert!(matches!(err, Err(SignError::UnknownName { .. })));
        assert_eq!(loc.value().tgt, before);
    }

    #[test]
    fn test_named_location_has_no_side_offset() {
        let (skel, body, config) = setup();
        let mut loc = HandLocation::new(Side::Right, &skel, &body, &config, 0.5, Vec3::ZERO);
        let mut instr = GestureInstruction::new(GestureKind::LocationBodyArm, HandSelector::Right);
        instr.location_body_arm = Some("SHOULDER_LEFT".to_string());
        instr.distance = Some(0.0);
        loc.new_gesture(&skel, &body, &instr, Symmetry::NONE, &config, Timing::fill(None, None, None, None), 0.0).unwrap();
        let shoulder = body.get("SHOULDER_LEFT").unwrap().world_position(&skel);
        assert!(loc.value().tgt.abs_diff_eq(shoulder, 1e-6));

        // 中立位置仍向本侧（右手为 -X）偏移
        instr.location_body_arm = Some("NEUTRAL".to_string());
        instr.distance = None;
        loc.new_gesture(&skel, &body, &instr, Symmetry::NONE, &config, Timing::fill(None, None, None, None), 0.0).unwrap();
        assert!(loc.value().tgt.abs_diff_eq(Vec3::new(-0.06, 1.25, 0.325), 1e-5));
    }
}
