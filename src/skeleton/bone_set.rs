//! 骨骼集合
//!
//! 管理骨骼层次结构：名称索引、子节点缓存、父先子后的遍历顺序，
//! 以及绑定姿态 / 当前姿态的世界变换更新。

use std::collections::HashMap;

use glam::{Mat4, Quat, Vec3};

use crate::{Result, SignError};
use super::bone_link::BoneLink;
use super::BoneTransform;

/// 一套骨骼的本地姿态快照（按骨骼索引）
pub type LocalPose = Vec<BoneTransform>;

/// 骨骼集合
#[derive(Clone, Debug, Default)]
pub struct BoneSet {
    /// 骨骼列表
    bones: Vec<BoneLink>,
    /// 名称 -> 索引
    name_to_index: HashMap<String, usize>,
    /// 子骨骼缓存
    children_cache: Vec<Vec<usize>>,
    /// 父先子后的遍历顺序
    traversal_order: Vec<usize>,
    /// 根骨骼之上的外部变换（骨骼挂载对象的世界变换）
    pub armature_transform: Mat4,
}

impl BoneSet {
    pub fn new() -> Self {
        Self {
            armature_transform: Mat4::IDENTITY,
            ..Default::default()
        }
    }

    /// 从骨骼列表构建
    ///
    /// 父索引不要求小于自身索引，但必须有效且无环。
    pub fn from_bones(bones: Vec<BoneLink>) -> Result<Self> {
        let mut set = Self::new();
        set.bones = bones;
        set.build()?;
        Ok(set)
    }

    /// 追加骨骼（父骨骼按名称查找，必须已存在）
    pub fn push_bone(
        &mut self,
        name: &str,
        parent: Option<&str>,
        bind_local: BoneTransform,
    ) -> Result<usize> {
        let parent_index = match parent {
            Some(p) => self
                .find_bone_by_name(p)
                .ok_or_else(|| SignError::BoneNotFound(p.to_string()))? as i32,
            None => -1,
        };
        let index = self.bones.len();
        let mut bone = BoneLink::with_bind(name, parent_index, bind_local);
        self.name_to_index.insert(name.to_string(), index);
        self.bones.push(bone);
        Ok(index)
    }

    /// 构建层次结构缓存并计算世界变换
    pub fn build(&mut self) -> Result<()> {
        let count = self.bones.len();
        self.name_to_index.clear();
        self.children_cache = vec![Vec::new(); count];
        let mut roots = Vec::new();

        for (i, bone) in self.bones.iter().enumerate() {
            self.name_to_index.insert(bone.name.clone(), i);
        }


        for i in 0..count {
            match self.bones[i].parent_id() {
                Some(p) if p < count && p != i => self.children_cache[p].push(i),
                Some(p) => {
                    return Err(SignError::InvalidSkeleton(format!(
                        "bone '{}' has invalid parent index {}",
                        self.bones[i].name, p
                    )));
                }
                None => roots.push(i),
            }
        }

        // 广度优先得到父先子后的顺序，同时检测环
        let mut order = Vec::with_capacity(count);
        let mut queue = std::collections::VecDeque::from(roots);
        while let Some(idx) = queue.pop_front() {
            order.push(idx);
            for &child in &self.children_cache[idx] {
                queue.push_back(child);
            }
        }
        if order.len() != count {
            return Err(SignError::InvalidSkeleton(
                "bone hierarchy contains a cycle".to_string(),
            ));
        }
        self.traversal_order = order;

        self.update_world_matrices();
        Ok(())
    }

    // ========================================
    // 访问器
    // ========================================

    #[inline]
    pub fn len(&self) -> usize {
        self.bones.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.bones.is_empty()
    }

    #[inline]
    pub fn bones(&self) -> &[BoneLink] {
        &self.bones
    }

    #[inline]
    pub fn get_bone(&self, idx: usize) -> Option<&BoneLink> {
        self.bones.get(idx)
    }

    #[inline]
    pub fn get_bone_mut(&mut self, idx: usize) -> Option<&mut BoneLink> {
        self.bones.get_mut(idx)
    }

    #[inline]
    pub fn find_bone_by_name(&self, name: &str) -> Option<usize> {
        self.name_to_index.get(name).copied()
    }

    #[inline]
    pub fn children(&self, idx: usize) -> &[usize] {
        self.children_cache.get(idx).map(Vec::as_slice).unwrap_or(&[])
    }

    /// 父先子后的遍历顺序
    #[inline]
    pub fn traversal_order(&self) -> &[usize] {
        &self.traversal_order
    }

    #[inline]
    pub fn world_position(&self, idx: usize) -> Vec3 {
        self.bones[idx].position()
    }

    #[inline]
    pub fn world_rotation(&self, idx: usize) -> Quat {
        self.bones[idx].world_rotation
    }

    /// 父骨骼的世界旋转（根骨骼为单位旋转）
    #[inline]
    pub fn parent_world_rotation(&self, idx: usize) -> Quat {
        match self.bones[idx].parent_id() {
            Some(p) => self.bones[p].world_rotation,
            None => Quat::IDENTITY,
        }
    }

    /// 当前姿态下到父骨骼的世界距离
    pub fn bone_length(&self, idx: usize) -> f32 {
        match self.bones[idx].parent_id() {
            Some(p) => self.world_position(idx).distance(self.world_position(p)),
            None => 0.0,
        }
    }

    // ========================================
    // 变换更新
    // ========================================

    /// 更新全部骨骼的世界变换
    pub fn update_world_matrices(&mut self) {
        for i in 0..self.traversal_order.len() {
            let idx = self.traversal_order[i];
            let (parent_world, parent_rot) = match self.bones[idx].parent_id() {
                Some(p) => (self.bones[p].local_to_world, self.bones[p].world_rotation),
                None => (Mat4::IDENTITY, Quat::IDENTITY),
            };
            self.bones[idx].update_from_parent(parent_world, parent_rot);
        }
    }

    /// 更新某骨骼及其所有子孙的世界变换
    pub fn update_subtree(&mut self, idx: usize) {
        update_global_transform_recursive(&mut self.bones, &self.children_cache, idx);
    }

    /// 设置本地旋转并更新子树
    pub fn set_local_rotation(&mut self, idx: usize, rotation: Quat) {
        self.bones[idx].local.rotation = rotation.normalize();
        self.update_subtree(idx);
    }

    /// 设置世界旋转（换算为本地旋转）并更新子树
    pub fn set_world_rotation(&mut self, idx: usize, rotation: Quat) {
        let local = self.parent_world_rotation(idx).inverse() * rotation;
        self.set_local_rotation(idx, local);
    }

    /// 在世界空间叠加旋转：new_world = delta * world
    pub fn rotate_world(&mut self, idx: usize, delta: Quat) {
        let world = self.world_rotation(idx);
        self.set_world_rotation(idx, delta * world);
    }

    // ========================================
    // 姿态管理
    // ========================================

    /// 所有骨骼恢复绑定姿态
    pub fn reset_to_bind(&mut self) {
        for bone in &mut self.bones {
            bone.reset_to_bind();
        }
        self.update_world_matrices();
    }

    /// 把当前姿态捕获为新的绑定姿态
    pub fn capture_bind_pose(&mut self) {
        self.update_world_matrices();
        for bone in &mut self.bones {
            bone.bind_local = bone.local;
        }
    }

    /// 保存当前本地姿态
    pub fn save_pose(&self) -> LocalPose {
        self.bones.iter().map(|b| b.local).collect()
    }

    /// 恢复本地姿态
    pub fn restore_pose(&mut self, pose: &LocalPose) {
        for (bone, local) in self.bones.iter_mut().zip(pose.iter()) {
            bone.local = *local;
        }
        self.update_world_matrices();
    }

    /// 计算绑定姿态下的世界矩阵与旋转（不修改当前姿态）
    pub fn bind_world_transforms(&self) -> (Vec<Mat4>, Vec<Quat>) {
        let count = self.bones.len();
        let mut matrices = vec![Mat4::IDENTITY; count];
        let mut rotations = vec![Quat::IDENTITY; count];
        for &idx in &self.traversal_order {
            let bone = &self.bones[idx];
            let (parent_world, parent_rot) = match bone.parent_id() {
                Some(p) => (matrices[p], rotations[p]),
                None => (Mat4::IDENTITY, Quat::IDENTITY),
            };
            matrices[idx] = parent_world * bone.bind_local.to_matrix();
            rotations[idx] = (parent_rot * bone.bind_local.rotation).normalize();
        }
        (matrices, rotations)
    }
}

/// 递归更新全局变换
pub(crate) fn update_global_transform_recursive(
    bones: &mut [BoneLink],
    children_cache: &[Vec<usize>],
    idx: usize,
) {
    if idx >= bones.len() {
        return;
    }

    let (parent_world, parent_rot) = match bones[idx].parent_id() {
        Some(p) if p < bones.len() => (bones[p].local_to_world, bones[p].world_rotation),
        _ => (Mat4::IDENTITY, Quat::IDENTITY),
    };
    bones[idx].update_from_parent(parent_world, parent_rot);

    // 递归更新子骨骼
    if idx < children_cache.len() {
        for &child_idx in &children_cache[idx] {
            update_global_transform_recursive(bones, children_cache, child_idx);
        }
    }
}
