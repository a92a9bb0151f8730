//! 骨骼节点
//!
//! 每个 BoneLink 保存绑定姿态与当前姿态的本地变换，以及由父链累乘得到的世界变换。

use glam::{Vec3, Quat, Mat4};

use super::BoneTransform;

// ============================================================================
// 骨骼节点
// ============================================================================

/// 骨骼节点
///
/// local_to_world = parent.local_to_world * local_to_parent
#[derive(Clone, Debug)]
pub struct BoneLink {
    // ========================================
    // 静态数据（初始化后不变）
    // ========================================

    /// 骨骼名称
    pub name: String,

    /// 父骨骼索引 (-1 表示根骨骼)
    pub parent_index: i32,

    /// 绑定姿态的本地变换
    pub bind_local: BoneTransform,

    // ========================================
    // 动态数据（每帧更新）
    // ========================================

    /// 当前本地变换
    pub local: BoneTransform,

    /// 本地变换矩阵 (local_to_parent)
    pub local_to_parent: Mat4,

    /// 全局变换矩阵 (local_to_world，骨骼空间)
    pub local_to_world: Mat4,

    /// 全局旋转（沿父链累乘本地旋转，不含缩放）
    pub world_rotation: Quat,
}

impl BoneLink {
    /// 创建新骨骼
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            parent_index: -1,
            bind_local: BoneTransform::default(),
            local: BoneTransform::default(),
            local_to_parent: Mat4::IDENTITY,
            local_to_world: Mat4::IDENTITY,
            world_rotation: Quat::IDENTITY,
        }
    }

    /// 以绑定本地变换创建
    pub fn with_bind(name: impl Into<String>, parent_index: i32, bind_local: BoneTransform) -> Self {
        let mut bone = Self::new(name);
        bone.parent_index = parent_index;
        bone.bind_local = bind_local;
        bone.local = bind_local;
        bone.compute_local_transform();
        bone
    }

    // ========================================
    // 访问器
    // ========================================

    /// 父骨骼索引
    #[inline]
    pub fn parent_id(&self) -> Option<usize> {
        if self.parent_index >= 0 {
            Some(self.parent_index as usize)
        } else {
            None
        }
    }

    /// 是否为根骨骼
    #[inline]
    pub fn is_root(&self) -> bool {
        self.parent_index < 0
    }

    /// 获取世界位置
    #[inline]
    pub fn position(&self) -> Vec3 {
        self.local_to_world.col(3).truncate()
    }


    // ========================================
    // 变换计算
    // ========================================

    /// 恢复绑定姿态
    #[inline]
    pub fn reset_to_bind(&mut self) {
        self.local = self.bind_local;
    }

    /// 计算本地变换 (local_to_parent)
    #[inline]
    pub fn compute_local_transform(&mut self) {
        self.local_to_parent = self.local.to_matrix();
    }

    /// 由父骨骼结果更新全局变换
    #[inline]
    pub(crate) fn update_from_parent(&mut self, parent_to_world: Mat4, parent_rotation: Quat) {
        self.compute_local_transform();
        self.local_to_world = parent_to_world * self.local_to_parent;
        self.world_rotation = (parent_rotation * self.local.rotation).normalize();
    }

    /// 把骨骼本地空间中的点转换到骨骼空间
    #[inline]
    pub fn transform_point(&self, local_point: Vec3) -> Vec3 {
        self.local_to_world.transform_point3(local_point)
    }

    /// 把骨骼本地空间中的方向转换到骨骼空间
    #[inline]
    pub fn transform_direction(&self, local_dir: Vec3) -> Vec3 {
        self.world_rotation * local_dir
    }
}

impl Default for BoneLink {
    fn default() -> Self {
        Self::new(String::new())
    }
}
