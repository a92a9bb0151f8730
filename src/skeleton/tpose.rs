//! 绑定姿态归一化（T-pose 对齐）
//!
//! 坐标约定：Y 向上，面朝 +Z，虚拟人左侧为 +X。
//! 每一步都取"骨骼 -> 子骨骼"的当前世界方向，求到目标轴的最短弧旋转，
//! 再以世界空间增量叠加到该骨骼上（兄弟骨骼不受影响）。

use glam::{Quat, Vec3};

use crate::Result;
use super::bone_map::{CanonicalJoints, Digit, Joint, Side};
use super::bone_set::BoneSet;
use super::rotation_between;

/// 把 bone -> child 的方向转到 target
fn align_bone(skeleton: &mut BoneSet, bone: usize, child: usize, target: Vec3) {
    let dir = skeleton.world_position(child) - skeleton.world_position(bone);
    if let Some(delta) = rotation_between(dir, target) {
        skeleton.rotate_world(bone, delta);
    }
}

/// 绕 axis 扭转 bone，使 from -> to 的方向在垂直于 axis 的平面内指向 target
fn twist_toward(skeleton: &mut BoneSet, bone: usize, from: usize, to: usize, axis: Vec3, target: Vec3) {
    let Some(axis) = axis.try_normalize() else {
        return;
    };
    let d = skeleton.world_position(to) - skeleton.world_position(from);
    let d = d - axis * d.dot(axis);
    let target = target - axis * target.dot(axis);
    if d.length_squared() < 1e-12 || target.length_squared() < 1e-12 {
        return;
    }
    let angle = axis.dot(d.cross(target)).atan2(d.dot(target));
    if angle.abs() > 1e-6 {
        skeleton.rotate_world(bone, Quat::from_axis_angle(axis, angle));
    }
}

/// 沿关节序列依次对齐，缺失的关节跳过
fn align_chain(skeleton: &mut BoneSet, joints: &CanonicalJoints, chain: &[Joint], target: Vec3) {
    let present: Vec<usize> = chain.iter().filter_map(|j| joints.get(*j)).collect();
    for pair in present.windows(2) {
        align_bone(skeleton, pair[0], pair[1], target);
    }
}

/// 原地把骨骼调整为标准 T-pose
///
/// 1. 拉直脊柱链（每段与上一段同向）
/// 2. 旋转髋部，使（左大腿，脊柱）平面法线朝 +Z
/// 3. 髋 -> 脊柱朝 +Y
/// 4. 腿朝 -Y，脚绕竖直轴扭转使脚尖朝前（+Z）
/// 5. 手臂朝 ±X（左 +X），手掌与四指同向；手绕手臂轴扭转使
///    食指根 -> 小指根的反方向朝 +Z（掌心朝下），再拉直各手指
pub fn align_to_tpose(skeleton: &mut BoneSet, joints: &CanonicalJoints) -> Result<()> {
    let hips = joints.require(Joint::Hips)?;
    skeleton.update_world_matrices();

    // 1. 脊柱
    let spine: Vec<usize> = [Joint::Hips, Joint::Spine, Joint::Spine1, Joint::Spine2, Joint::Neck, Joint::Head]
        .iter()
        .filter_map(|j| joints.get(*j))
        .collect();
    for window in spine.windows(3) {
        let prev = skeleton.world_position(window[1]) - skeleton.world_position(window[0]);
        align_bone(skeleton, window[1], window[2], prev);
    }

    // 2. 髋部平面
    if let (Some(up_leg), Some(spine_idx)) = (joints.get(Joint::UpLeg(Side::Left)), joints.get(Joint::Spine)) {
        let hips_pos = skeleton.world_position(hips);
        let normal = (skeleton.world_position(up_leg) - hips_pos).cross(skeleton.world_position(spine_idx) - hips_pos);
        if let Some(delta) = rotation_between(normal, Vec3::Z) {
            skeleton.rotate_world(hips, delta);
        }
    } else {
        log::debug!("[TPose] 缺少左大腿或脊柱，跳过髋部平面对齐");
    }

    // 3. 髋 -> 脊柱
    if let Some(spine_idx) = joints.get(Joint::Spine) {
        align_bone(skeleton, hips, spine_idx, Vec3::Y);
    }

    for side in Side::BOTH {
        // 4. 腿
        align_chain(skeleton, joints, &[Joint::UpLeg(side), Joint::Leg(side), Joint::Foot(side)], Vec3::NEG_Y);
        if let (Some(foot), Some(toe)) = (joints.get(Joint::Foot(side)), joints.get(Joint::ToeBase(side))) {
            twist_toward(skeleton, foot, foot, toe, Vec3::Y, Vec3::Z);
        }

        // 5. 手臂与手指
        let out = Vec3::X * side.sign();
        align_chain(
            skeleton,
            joints,
            &[
                Joint::Shoulder(side),
                Joint::Arm(side),
                Joint::ForeArm(side),
                Joint::Hand(side),
                Joint::Finger(side, Digit::Middle, 1),
            ],
            out,
        );
        let hand = joints.get(Joint::Hand(side));
        let index = joints.get(Joint::Finger(side, Digit::Index, 1));
        let pinky = joints.get(Joint::Finger(side, Digit::Pinky, 1));
        if let (Some(hand), Some(index), Some(pinky)) = (hand, index, pinky) {
            twist_toward(skeleton, hand, pinky, index, out, Vec3::Z);
        }
        for digit in Digit::FINGERS {
            let chain: Vec<Joint> = (1..=4).map(|l| Joint::Finger(side, digit, l)).collect();
            align_chain(skeleton, joints, &chain, out);
        }
    }

    skeleton.update_world_matrices();
    Ok(())
}

/// 复制一份骨骼并对齐为 T-pose，返回的副本以该姿态为绑定姿态
pub fn tposed_copy(skeleton: &BoneSet, joints: &CanonicalJoints) -> Result<BoneSet> {
    let mut copy = skeleton.clone();
    copy.reset_to_bind();
    align_to_tpose(&mut copy, joints)?;
    copy.capture_bind_pose();
    Ok(copy)
}
