//! 解析手臂 IK
//!
//! 肩 - 肘 - 腕三关节：余弦定理求肘角，再整体对准目标，
//! 最后绕"肩 -> 目标"轴旋转把肘部摆向下方。
//! 可选的美学项：抬肩、耸肩（前探）、抬肘。

use glam::{Quat, Vec3};

use crate::{Result, SignError};
use super::bone_map::{CanonicalJoints, Joint, Side};
use super::bone_set::BoneSet;

/// 美学角度范围（弧度）：静止值 + 上下限
#[derive(Clone, Copy, Debug, PartialEq, serde::Deserialize)]
pub struct AestheticRange {
    pub rest: f32,
    pub min: f32,
    pub max: f32,
}

impl AestheticRange {
    pub const fn new(rest: f32, min: f32, max: f32) -> Self {
        Self { rest, min, max }
    }

    /// x ∈ [-1, 1]：0 取静止值，1 取上限，-1 取下限
    pub fn eval(&self, x: f32) -> f32 {
        let x = x.clamp(-1.0, 1.0);
        if x >= 0.0 {
            self.rest + x * (self.max - self.rest)
        } else {
            self.rest - x * (self.min - self.rest)
        }
    }
}

/// 三项美学配置
#[derive(Clone, Copy, Debug)]
pub struct ArmAesthetics {
    pub elbow_raise: AestheticRange,
    pub shoulder_raise: AestheticRange,
    pub shoulder_hunch: AestheticRange,
}

/// 指令给出的额外角度（弧度，叠加在美学项上）
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct ArmRaise {
    pub elbow: f32,
    pub shoulder_raise: f32,
    pub shoulder_hunch: f32,
}

/// 单侧手臂链
#[derive(Clone, Debug)]
pub struct ArmChain {
    pub side: Side,
    pub shoulder: usize,
    pub arm: usize,
    pub forearm: usize,
    pub hand: usize,
    upper_len: f32,
    lower_len: f32,
}

impl ArmChain {
    pub fn new(skeleton: &BoneSet, joints: &CanonicalJoints, side: Side) -> Result<Self> {
        let shoulder = joints.require(Joint::Shoulder(side))?;
        let arm = joints.require(Joint::Arm(side))?;
        let forearm = joints.require(Joint::ForeArm(side))?;
        let hand = joints.require(Joint::Hand(side))?;

        let (bind_world, _) = skeleton.bind_world_transforms();
        let pos = |i: usize| bind_world[i].col(3).truncate();
        let upper_len = pos(arm).distance(pos(forearm));
        let lower_len = pos(forearm).distance(pos(hand));
        if upper_len < 1e-6 || lower_len < 1e-6 {
            return Err(SignError::DegenerateGeometry(format!(
                "{} arm has a zero-length segment",
                side.name()
            )));
        }

        Ok(Self { side, shoulder, arm, forearm, hand, upper_len, lower_len })
    }

    /// 手臂全长
    #[inline]
    pub fn length(&self) -> f32 {
        self.upper_len + self.lower_len
    }

    /// 肩、上臂、前臂恢复绑定本地旋转
    pub fn reset(&self, skeleton: &mut BoneSet) {
        for idx in [self.shoulder, self.arm, self.forearm] {
            let bind = skeleton.bones()[idx].bind_local.rotation;
            skeleton.set_local_rotation(idx, bind);
        }
    }

    /// 让手腕到达 target（骨骼空间）
    ///
    /// `apply_aesthetics` 为 false 时只做位置求解，肩部保持绑定姿态，肘部只摆向下方。
    /// 返回手腕到目标的剩余距离（目标超出臂长时大于 0）。
    pub fn reach_target(
        &self,
        skeleton: &mut BoneSet,
        target: Vec3,
        raise: ArmRaise,
        aesthetics: &ArmAesthetics,
        apply_aesthetics: bool,
        forward: Vec3,
    ) -> f32 {
        self.reset(skeleton);

        let up = Vec3::Y;
        let lateral = up.cross(forward).normalize_or_zero() * self.side.sign();

        // ========================================
        // 肩部：抬肩 / 前探
        // ========================================
        let mut elbow_raise = 0.0;
        if apply_aesthetics {
            let rel = (target - skeleton.world_position(self.arm)) / self.length();
            let raise_angle = aesthetics.shoulder_raise.eval(rel.y) + raise.shoulder_raise;
            let hunch_angle = aesthetics.shoulder_hunch.eval(rel.dot(forward)) + raise.shoulder_hunch;
            elbow_raise = aesthetics.elbow_raise.eval(rel.y) + raise.elbow;

            let raise_axis = lateral.cross(up).normalize_or_zero();
            let hunch_axis = lateral.cross(forward).normalize_or_zero();
            let delta = Quat::from_axis_angle(hunch_axis, hunch_angle) * Quat::from_axis_angle(raise_axis, raise_angle);
            skeleton.rotate_world(self.shoulder, delta);
        }

        // ========================================
        // 肘角（余弦定理）
        // ========================================
        let arm_pos = skeleton.world_position(self.arm);
        let to_target = target - arm_pos;
        let Some(target_dir) = to_target.try_normalize() else {
            return 0.0;
        };
        let (u, l) = (self.upper_len, self.lower_len);
        let min_reach = (u - l).abs() + 1e-4;
        let max_reach = u + l - 1e-4;
        let d = to_target.length().clamp(min_reach, max_reach);

        let cos_inner = ((u * u + l * l - d * d) / (2.0 * u * l)).clamp(-1.0, 1.0);
        let bend = std::f32::consts::PI - cos_inner.acos();

        let upper_dir = skeleton.world_position(self.forearm) - arm_pos;
        let lower_dir = skeleton.world_position(self.hand) - skeleton.world_position(self.forearm);
        // 当前肘角（绑定姿态下手臂未必完全伸直）
        let current_bend = upper_dir.cross(lower_dir).length().atan2(upper_dir.dot(lower_dir));
        let bend_axis = upper_dir
            .cross(lower_dir)
            .try_normalize()
            .filter(|_| current_bend > 1e-3)
            .or_else(|| upper_dir.cross(forward).try_normalize())
            .or_else(|| upper_dir.cross(up).try_normalize())
            .unwrap_or(Vec3::Z);
        skeleton.rotate_world(self.forearm, Quat::from_axis_angle(bend_axis, bend - current_bend));

        // ========================================
        // 上臂对准目标
        // ========================================
        let wrist_dir = skeleton.world_position(self.hand) - arm_pos;
        if let Some(wrist_dir) = wrist_dir.try_normalize() {
            skeleton.rotate_world(self.arm, Quat::from_rotation_arc(wrist_dir, target_dir));
        }

        // ========================================
        // 绕"肩 -> 目标"轴摆肘
        // ========================================
        let elbow = skeleton.world_position(self.forearm) - arm_pos;
        let elbow_planar = elbow - target_dir * elbow.dot(target_dir);
        let pole = -up - target_dir * (-up).dot(target_dir);
        let mut swivel = 0.0;
        if let (Some(e), Some(p)) = (elbow_planar.try_normalize(), pole.try_normalize()) {
            swivel = e.cross(p).dot(target_dir).atan2(e.dot(p));
        }
        swivel += self.side.sign() * elbow_raise;
        if swivel.abs() > 1e-6 {
            skeleton.rotate_world(self.arm, Quat::from_axis_angle(target_dir, swivel));
        }

        skeleton.world_position(self.hand).distance(target)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn aesthetics() -> ArmAesthetics {
        ArmAesthetics {
            elbow_raise: AestheticRange::new(0.0, 0.0, 0.4),
            shoulder_raise: AestheticRange::new(0.0, -0.1, 0.5),
            shoulder_hunch: AestheticRange::new(0.0, -0.1, 0.3),
        }
    }

    fn left_arm() -> (BoneSet, ArmChain) {
        let skel = crate::test_rig::humanoid();
        let joints = CanonicalJoints::auto_detect(&skel);
        let chain = ArmChain::new(&skel, &joints, Side::Left).unwrap();
        (skel, chain)
    }

    #[test]
    fn test_aesthetic_range_eval() {
        let r = AestheticRange::new(0.1, -0.2, 0.5);
        assert!((r.eval(0.0) - 0.1).abs() < 1e-6);
        assert!((r.eval(1.0) - 0.5).abs() < 1e-6);
        assert!((r.eval(-1.0) + 0.2).abs() < 1e-6);
        assert!((r.eval(5.0) - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_reachable_target_without_aesthetics() {
        let (mut skel, chain) = left_arm();
        let target = skel.world_position(chain.arm) + Vec3::new(0.2, -0.3, 0.2);
        let residual = chain.reach_target(&mut skel, target, ArmRaise::default(), &aesthetics(), false, Vec3::Z);
        assert!(residual < 1e-3, "residual = {residual}");
        // 不加美学时肩部保持绑定
        let shoulder = &skel.bones()[chain.shoulder];
        assert!(shoulder.local.rotation.abs_diff_eq(shoulder.bind_local.rotation, 1e-6));
        // 肘部朝下
        let elbow = skel.world_position(chain.forearm);
        let mid = (skel.world_position(chain.arm) + target) * 0.5;
        assert!(elbow.y < mid.y);
    }

    #[test]
    fn test_unreachable_target_extends_arm() {
        let (mut skel, chain) = left_arm();
        let arm_pos = skel.world_position(chain.arm);
        let target = arm_pos + Vec3::new(0.0, 0.0, 5.0);
        let residual = chain.reach_target(&mut skel, target, ArmRaise::default(), &aesthetics(), false, Vec3::Z);
        assert!(residual > 4.0);
        let reach = skel.world_position(chain.hand) - arm_pos;
        assert!((reach.length() - chain.length()).abs() < 1e-2);
        assert!(reach.normalize().dot(Vec3::Z) > 0.999);
    }

    #[test]
    fn test_aesthetics_raise_shoulder_for_high_target() {
        let (mut skel, chain) = left_arm();
        let target = skel.world_position(chain.arm) + Vec3::new(0.1, 0.35, 0.2);
        let residual = chain.reach_target(&mut skel, target, ArmRaise::default(), &aesthetics(), true, Vec3::Z);
        assert!(residual < 1e-3);
        let shoulder = &skel.bones()[chain.shoulder];
        assert!(!shoulder.local.rotation.abs_diff_eq(shoulder.bind_local.rotation, 1e-3));
        // 抬肩后上臂根部更高
        let mut rest = crate::test_rig::humanoid();
        rest.update_world_matrices();
        assert!(skel.world_position(chain.arm).y > rest.world_position(chain.arm).y);
    }

    #[test]
    fn test_degenerate_arm_rejected() {
        let mut skel = BoneSet::new();
        let t = crate::skeleton::BoneTransform::default();
        skel.push_bone("Spine2", None, t).unwrap();
        skel.push_bone("LeftShoulder", Some("Spine2"), t).unwrap();
        skel.push_bone("LeftArm", Some("LeftShoulder"), t).unwrap();
        skel.push_bone("LeftForeArm", Some("LeftArm"), t).unwrap();
        skel.push_bone("LeftHand", Some("LeftForeArm"), t).unwrap();
        skel.build().unwrap();
        let joints = CanonicalJoints::auto_detect(&skel);
        assert!(matches!(
            ArmChain::new(&skel, &joints, Side::Left),
            Err(SignError::DegenerateGeometry(_))
        ));
    }
}
