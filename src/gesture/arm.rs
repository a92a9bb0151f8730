//! 单臂控制器
//!
//! 持有一条手臂的全部子模块（位置、手腕朝向、手形、动作叠加、肩肘姿态），
//! 每帧按固定顺序写入骨骼，见 [`super::BodyController::update`]。

use bitflags::bitflags;
use glam::{Quat, Vec3};

use crate::skeleton::{ArmAesthetics, ArmChain, ArmRaise, BoneSet, CanonicalJoints, Side};
use crate::{Result, SignError};
use super::anchor::{BodyLocations, HandGeometry};
use super::config::{AvatarConfig, GestureConfig};
use super::handshape::HandShapeSynth;
use super::instruction::{GestureInstruction, GestureKind, Symmetry};
use super::location::HandLocation;
use super::motion::{MotionOverlay, MotionSum};
use super::timeline::{PhasedValue, Timing};
use super::wrist::WristOrientation;

bitflags! {
    /// 一条指令装载了哪些子模块
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
    pub struct ArmModules: u8 {
        const LOCATION = 1 << 0;
        const WRIST = 1 << 1;
        const HANDSHAPE = 1 << 2;
        const MOTION = 1 << 3;
        const ARM_POSE = 1 << 4;
        const CONSTELLATION = 1 << 5;
    }
}

/// 单臂状态
#[derive(Clone, Debug)]
pub struct ArmController {
    side: Side,
    chain: ArmChain,
    hand: HandGeometry,
    location: HandLocation,
    wrist: WristOrientation,
    handshape: HandShapeSynth,
    motions: Vec<MotionOverlay>,
    /// (抬肘, 抬肩, 耸肩)，弧度
    raise: PhasedValue<Vec3>,

    aesthetics: ArmAesthetics,
    forward: Vec3,
    twist_ratio: f32,

    // ========== 本帧中间结果 ==========
    wrist_target: Quat,
    motion: MotionSum,
    residual: f32,
}

impl ArmController {
    /// 骨骼须处于绑定姿态
    pub fn new(
        skeleton: &mut BoneSet,
        joints: &CanonicalJoints,
        side: Side,
        avatar: &AvatarConfig,
        body: &BodyLocations,
        config: &GestureConfig,
    ) -> Result<Self> {
        let chain = ArmChain::new(skeleton, joints, side)?;
        let hand = HandGeometry::new(skeleton, joints, side, config.finger_thickness, avatar.hand_locations(side))?;
        let handshape = HandShapeSynth::new(skeleton, &hand, config)?;
        let location = HandLocation::new(
            side,
            skeleton,
            body,
            config,
            chain.length(),
            skeleton.world_position(chain.hand),
        );
        let wrist = WristOrientation::new(side, config);
        let wrist_target = wrist.target_rotation(&hand);

        Ok(Self {
            side,
            chain,
            hand,
            location,
            wrist,
            handshape,
            motions: Vec::new(),
            raise: PhasedValue::new(Vec3::ZERO),
            aesthetics: config.aesthetics(),
            forward: config.forward_axis(),
            twist_ratio: config.forearm_twist_ratio.clamp(0.0, 1.0),
            wrist_target,
            motion: MotionSum { offset: Vec3::ZERO, wrist: Quat::IDENTITY, finger_play: None },
            residual: 0.0,
        })
    }

    #[inline]
    pub fn side(&self) -> Side {
        self.side
    }

    pub fn chain(&self) -> &ArmChain {
        &self.chain
    }

    pub fn hand(&self) -> &HandGeometry {
        &self.hand
    }

    pub fn location(&self) -> &HandLocation {
        &self.location
    }

    pub fn wrist(&self) -> &WristOrientation {
        &self.wrist
    }

    pub fn handshape(&self) -> &HandShapeSynth {
        &self.handshape
    }

    pub fn motions(&self) -> &[MotionOverlay] {
        &self.motions
    }

    pub fn raise(&self) -> &PhasedValue<Vec3> {
        &self.raise
    }

    /// 最近一次手臂 IK 的剩余距离
    #[inline]
    pub fn residual(&self) -> f32 {
        self.residual
    }

    /// 本帧手腕（含动作叠加）的世界旋转
    #[inline]
    pub fn wrist_world(&self) -> Quat {
        (self.motion.wrist * self.wrist_target).normalize()
    }

    // ========================================
    // 指令
    // ========================================

    /// 把指令交给对应子模块；失败时该子模块保持原状
    pub fn new_gesture(
        &mut self,
        skeleton: &mut BoneSet,
        body: &BodyLocations,
        instr: &GestureInstruction,
        symmetry: Symmetry,
        config: &GestureConfig,
        timing: Timing,
        elapsed: f32,
    ) -> Result<ArmModules> {
        match instr.kind()? {
            GestureKind::LocationBodyArm => {
                self.location.new_gesture(skeleton, body, instr, symmetry, config, timing, elapsed)?;
                Ok(ArmModules::LOCATION)
            }
            GestureKind::Extfidir | GestureKind::Palmor => {
                self.wrist.new_gesture(instr, symmetry, config, timing, elapsed)?;
                Ok(ArmModules::WRIST)
            }
            GestureKind::Handshape => {
                self.handshape.new_gesture(skeleton, &self.hand, instr, timing, elapsed)?;
                Ok(ArmModules::HANDSHAPE)
            }
            GestureKind::Motion => {
                let overlay = MotionOverlay::from_instruction(instr, symmetry, config, self.chain.length(), timing, elapsed)?;
                self.motions.push(overlay);
                Ok(ArmModules::MOTION)
            }
            GestureKind::ArmPose => {
                let degrees = [instr.elbow_raise, instr.shoulder_raise, instr.shoulder_hunch];
                if degrees.iter().all(Option::is_none) {
                    return Err(SignError::InvalidInstruction("arm pose without any angle".to_string()));
                }
                let current = self.raise.cur.to_array();
                let target: [f32; 3] =
                    std::array::from_fn(|k| degrees[k].map_or(current[k], f32::to_radians));
                self.raise.arm(Vec3::from_array(target), timing, elapsed, instr.shift);
                Ok(ArmModules::ARM_POSE)
            }
            GestureKind::HandConstellation => Err(SignError::InvalidInstruction(
                "hand constellation is resolved by the body controller".to_string(),
            )),
        }
    }

    // ========================================
    // 每帧
    // ========================================

    /// 推进时间线，重置手臂链，写入手形，求手腕目标与动作叠加
    pub fn update(&mut self, skeleton: &mut BoneSet, dt: f32) {
        self.location.update(dt);
        self.wrist.update(dt);
        self.raise.update(dt);
        for motion in &mut self.motions {
            motion.update(dt);
        }
        self.motions.retain(|m| !m.is_finished());

        self.chain.reset(skeleton);
        self.wrist_target = self.wrist.target_rotation(&self.hand);
        let r = self.wrist_target * self.hand.bind_rotation().inverse();
        let axes = (r * self.hand.finger_dir, r * self.hand.palm_normal, r * self.hand.radial);
        self.motion = MotionSum::of(&self.motions, axes);
        self.handshape.update(skeleton, &self.hand, dt, self.motion.finger_play);
    }

    /// 手腕到达 位置 + 动作偏移 + extra，并设定手的世界旋转
    pub fn reach(&mut self, skeleton: &mut BoneSet, extra: Vec3, apply_aesthetics: bool) {
        let target = self.location.current() + self.motion.offset + extra;
        let raise = ArmRaise {
            elbow: self.raise.cur.x,
            shoulder_raise: self.raise.cur.y,
            shoulder_hunch: self.raise.cur.z,
        };
        self.residual =
            self.chain
                .reach_target(skeleton, target, raise, &self.aesthetics, apply_aesthetics, self.forward);
        skeleton.set_world_rotation(self.chain.hand, self.wrist_world());
    }

    /// 把手腕扭转按比例分给前臂，手的世界旋转保持不变
    pub fn distribute_twist(&mut self, skeleton: &mut BoneSet) {
        let hand = self.chain.hand;
        let wrist = self.wrist_world();
        skeleton.set_world_rotation(hand, wrist);
        if self.twist_ratio <= 0.0 {
            return;
        }

        let bone = &skeleton.bones()[hand];
        let Some(axis) = bone.bind_local.translation.try_normalize() else {
            return;
        };
        // 相对绑定的本地旋转增量（前臂空间），取绕前臂轴的扭转分量
        let delta = bone.local.rotation * bone.bind_local.rotation.inverse();
        let Some(twist) = twist_about(delta, axis) else {
            return;
        };
        let share = Quat::IDENTITY.slerp(twist, self.twist_ratio);
        let forearm = self.chain.forearm;
        let local = skeleton.bones()[forearm].local.rotation;
        skeleton.set_local_rotation(forearm, local * share);
        skeleton.set_world_rotation(hand, wrist);
    }
}

/// 旋转 q 绕 axis 的扭转分量（swing-twist 分解）
fn twist_about(q: Quat, axis: Vec3) -> Option<Quat> {
    let projected = axis * Vec3::new(q.x, q.y, q.z).dot(axis);
    let twist = Quat::from_xyzw(projected.x, projected.y, projected.z, q.w);
    let len = twist.length();
    if len < 1e-6 {
        return None;
    }
    let twist = twist / len;
    Some(if twist.w < 0.0 { -twist } else { twist })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gesture::instruction::HandSelector;
    use crate::test_rig::quat_eq;
    use std::collections::HashMap;

    fn build(side: Side, config: GestureConfig) -> (BoneSet, BodyLocations, GestureConfig, ArmController) {
        crate::test_rig::init_logger();
        let mut skel = crate::test_rig::humanoid();
        let joints = CanonicalJoints::auto_detect(&skel);
        let body = BodyLocations::new(&skel, &joints, config.forward_axis(), 0.53, &HashMap::new());
        let arm = ArmController::new(&mut skel, &joints, side, &AvatarConfig::default(), &body, &config).unwrap();
        (skel, body, config, arm)
    }

    fn setup(side: Side) -> (BoneSet, BodyLocations, GestureConfig, ArmController) {
        build(side, GestureConfig::default())
    }

    fn tick(arm: &mut ArmController, skel: &mut BoneSet, dt: f32) {
        arm.update(skel, dt);
        arm.reach(skel, Vec3::ZERO, true);
        arm.distribute_twist(skel);
    }

    #[test]
    fn test_twist_about_axis() {
        let q = Quat::from_rotation_x(0.6) * Quat::from_rotation_y(0.3);
        let (axis, angle) = twist_about(q, Vec3::X).unwrap().to_axis_angle();
        assert!(axis.abs_diff_eq(Vec3::X, 1e-5));
        assert!((angle - 0.6).abs() < 1e-5);
        assert!(twist_about(Quat::from_rotation_y(std::f32::consts::PI), Vec3::X).is_none());
    }

    #[test]
    fn test_rest_tick_reaches_neutral() {
        let (mut skel, _, _, mut arm) = setup(Side::Right);
        tick(&mut arm, &mut skel, 0.016);
        let wrist = skel.world_position(arm.chain().hand);
        assert!(wrist.distance(arm.location().current()) < 1e-3, "residual {}", arm.residual());
        assert!(quat_eq(skel.world_rotation(arm.chain().hand), arm.wrist_world(), 1e-4));
    }

    #[test]
    fn test_twist_moves_to_forearm_without_changing_hand() {
        // 手相对前臂剩余的扭转角
        let remaining = |ratio: f32| {
            let config = GestureConfig { forearm_twist_ratio: ratio, ..GestureConfig::default() };
            let (mut skel, _, _, mut arm) = build(Side::Left, config);
            tick(&mut arm, &mut skel, 0.016);
            let hand = arm.chain().hand;
            assert!(quat_eq(skel.world_rotation(hand), arm.wrist_world(), 1e-4));
            let bone = &skel.bones()[hand];
            let axis = bone.bind_local.translation.normalize();
            let delta = bone.local.rotation * bone.bind_local.rotation.inverse();
            let angle = twist_about(delta, axis).map_or(0.0, |t| t.to_axis_angle().1);
            (angle, skel.world_position(hand))
        };
        let (full, at_full) = remaining(0.0);
        let (half, at_half) = remaining(0.5);
        assert!((half - full * 0.5).abs() < 1e-3, "full {full}, half {half}");
        assert!(at_full.distance(at_half) < 1e-4);
    }

    #[test]
    fn test_dispatch_flags_and_arm_pose() {
        let (mut skel, body, config, mut arm) = setup(Side::Right);
        let timing = Timing { start: 0.0, attack_peak: 0.5, relax: 1.0, end: 2.0 };
        let mut instr = GestureInstruction::new(GestureKind::ArmPose, HandSelector::Right);
        instr.elbow_raise = Some(30.0);
        let modules = arm.new_gesture(&mut skel, &body, &instr, Symmetry::NONE, &config, timing, 0.0).unwrap();
        assert_eq!(modules, ArmModules::ARM_POSE);
        tick(&mut arm, &mut skel, 0.75);
        assert!((arm.raise().cur.x - 30f32.to_radians()).abs() < 1e-6);
        assert_eq!(arm.raise().cur.y, 0.0);

        let empty = GestureInstruction::new(GestureKind::ArmPose, HandSelector::Right);
        assert!(arm.new_gesture(&mut skel, &body, &empty, Symmetry::NONE, &config, timing, 0.0).is_err());

        let mut instr = GestureInstruction::new(GestureKind::Motion, HandSelector::Right);
        instr.motion = Some("DIRECTED".to_string());
        instr.direction = Some("u".to_string());
        let modules = arm.new_gesture(&mut skel, &body, &instr, Symmetry::NONE, &config, timing, 0.0).unwrap();
        assert!(modules.contains(ArmModules::MOTION));
        assert_eq!(arm.motions().len(), 1);
        tick(&mut arm, &mut skel, 0.75);
        let lifted = skel.world_position(arm.chain().hand);
        assert!(lifted.y > arm.location().current().y + 0.04);
        tick(&mut arm, &mut skel, 2.0);
        assert!(arm.motions().is_empty());
    }
}
