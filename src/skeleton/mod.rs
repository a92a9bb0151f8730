//! 骨骼系统
//!
//! 组成：
//! - BoneLink: 单个骨骼节点（绑定姿态 + 当前姿态）
//! - BoneSet: 骨骼层次结构（即 Skeleton）
//! - BoneMap: 两套骨骼之间的关节对应关系
//! - tpose: 绑定姿态归一化（T-pose 对齐）
//! - ChainSolver / ArmIk: CCD 链求解器与解析手臂 IK

mod bone_link;
mod bone_set;
mod bone_map;
mod ik_solver;
mod arm_ik;
pub mod tpose;

pub use bone_link::BoneLink;
pub use bone_set::{BoneSet, LocalPose};
pub use bone_map::{BoneMap, CanonicalJoints, Digit, Joint, Side, clean_bone_name};
pub use ik_solver::{ChainSolver, ChainLink};
pub use arm_ik::{AestheticRange, ArmAesthetics, ArmChain, ArmRaise};

use glam::{Vec3, Quat, Mat4};

// ============================================================================
// 公共类型定义
// ============================================================================

/// 骨骼变换数据
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BoneTransform {
    pub translation: Vec3,
    pub rotation: Quat,
    pub scale: Vec3,
}

impl Default for BoneTransform {
    fn default() -> Self {
        Self {
            translation: Vec3::ZERO,
            rotation: Quat::IDENTITY,
            scale: Vec3::ONE,
        }
    }
}

impl BoneTransform {
    /// 仅平移
    #[inline]
    pub fn from_translation(translation: Vec3) -> Self {
        Self { translation, ..Default::default() }
    }

    /// 平移 + 旋转
    #[inline]
    pub fn from_rotation_translation(rotation: Quat, translation: Vec3) -> Self {
        Self { translation, rotation, scale: Vec3::ONE }
    }

    /// 转换为 4x4 矩阵
    #[inline]
    pub fn to_matrix(&self) -> Mat4 {
        Mat4::from_scale_rotation_translation(self.scale, self.rotation, self.translation)
    }

    /// 从矩阵分解
    #[inline]
    pub fn from_matrix(m: Mat4) -> Self {
        let (scale, rotation, translation) = m.to_scale_rotation_translation();
        Self { translation, rotation, scale }
    }
}

// ============================================================================
// 类型别名
// ============================================================================

/// Skeleton 别名
pub type Skeleton = BoneSet;

/// 四元数最短弧旋转，零向量时返回 None
#[inline]
pub(crate) fn rotation_between(from: Vec3, to: Vec3) -> Option<Quat> {
    let from = from.try_normalize()?;
    let to = to.try_normalize()?;
    Some(Quat::from_rotation_arc(from, to))
}
