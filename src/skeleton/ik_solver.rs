//! CCD 链求解器
//!
//! 设计原则：
//! - 使用迭代求解方式（循环坐标下降）
//! - 支持单轴（铰链）模式，并把反向弯曲夹回绑定姿态
//! - 固定迭代上限，距离平方低于阈值时提前退出

use glam::{Quat, Vec3};

use super::bone_set::BoneSet;

// ============================================================================
// 链节点
// ============================================================================

/// 链上的一个关节
#[derive(Clone, Copy, Debug)]
pub struct ChainLink {
    /// 骨骼索引
    pub bone: usize,
    /// 铰链轴（骨骼自身空间，单位向量），None 表示自由旋转
    pub hinge: Option<Vec3>,
}

impl ChainLink {
    #[inline]
    pub fn free(bone: usize) -> Self {
        Self { bone, hinge: None }
    }

    #[inline]
    pub fn hinge(bone: usize, axis: Vec3) -> Self {
        Self { bone, hinge: axis.try_normalize() }
    }
}

// ============================================================================
// 求解器
// ============================================================================

/// CCD 链求解器
#[derive(Clone, Debug)]
pub struct ChainSolver {
    /// 关节，从根到末端排列
    pub links: Vec<ChainLink>,
    /// 末端效应器骨骼
    pub effector: usize,
    /// 迭代上限
    pub iterations: u32,
    /// 收敛阈值（距离平方）
    pub tolerance_sq: f32,
    /// 单步最大旋转角（弧度）
    pub limit_angle: f32,
}

impl ChainSolver {
    pub fn new(links: Vec<ChainLink>, effector: usize) -> Self {
        Self {
            links,
            effector,
            iterations: 40,
            tolerance_sq: 1e-6,
            limit_angle: std::f32::consts::PI,
        }
    }

    pub fn with_iterations(mut self, iterations: u32) -> Self {
        self.iterations = iterations;
        self
    }

    pub fn with_tolerance_sq(mut self, tolerance_sq: f32) -> Self {
        self.tolerance_sq = tolerance_sq;
        self
    }

    /// 求解，返回末端到目标的最终距离
    ///
    /// 无法到达时不报错，保留迭代中最接近目标的姿态。
    pub fn solve(&self, skeleton: &mut BoneSet, target: Vec3) -> f32 {
        if self.links.is_empty() || self.effector >= skeleton.len() {
            return f32::MAX;
        }

        let mut best_distance_sq = skeleton.world_position(self.effector).distance_squared(target);
        let mut best_rotations = self.chain_rotations(skeleton);

        for _ in 0..self.iterations {
            if best_distance_sq < self.tolerance_sq {
                break;
            }
            self.solve_iteration(skeleton, target);

            let distance_sq = skeleton.world_position(self.effector).distance_squared(target);
            if distance_sq < best_distance_sq {
                best_distance_sq = distance_sq;
                best_rotations = self.chain_rotations(skeleton);
            }
        }

        // 恢复最佳结果
        for (link, rotation) in self.links.iter().zip(best_rotations) {
            skeleton.set_local_rotation(link.bone, rotation);
        }
        best_distance_sq.sqrt()
    }

    fn chain_rotations(&self, skeleton: &BoneSet) -> Vec<Quat> {
        self.links
            .iter()
            .map(|l| skeleton.bones()[l.bone].local.rotation)
            .collect()
    }

    /// 单次迭代：从末端侧到根依次旋转
    fn solve_iteration(&self, skeleton: &mut BoneSet, target: Vec3) {
        for link in self.links.iter().rev() {
            let bone = &skeleton.bones()[link.bone];
            let inv_link = bone.local_to_world.inverse();
            let effector_pos = skeleton.world_position(self.effector);

            let local_effector = inv_link.transform_point3(effector_pos);
            let local_target = inv_link.transform_point3(target);

            let (Some(effector_vec), Some(target_vec)) =
                (local_effector.try_normalize(), local_target.try_normalize())
            else {
                continue;
            };

            let dot = effector_vec.dot(target_vec).clamp(-1.0, 1.0);
            if dot.acos().to_degrees() < 1e-3 {
                continue;
            }

            let mut delta = Quat::from_rotation_arc(effector_vec, target_vec);

            // 单步角度限制
            let (axis, angle) = delta.to_axis_angle();
            if angle > self.limit_angle {
                delta = Quat::from_axis_angle(axis, self.limit_angle);
            }

            let mut rotation = bone.local.rotation * delta;

            if let Some(hinge) = link.hinge {
                // 只保留绕铰链轴的分量
                let v = Vec3::new(delta.x, delta.y, delta.z);
                let twist = hinge * v.dot(hinge);
                let Some(projected) = normalize_quat(Quat::from_xyzw(twist.x, twist.y, twist.z, delta.w)) else {
                    continue;
                };
                rotation = bone.local.rotation * projected;

                // 反向弯曲夹回绑定姿态
                let bind = bone.bind_local.rotation;
                let rel = bind.inverse() * rotation;
                let rel_v = Vec3::new(rel.x, rel.y, rel.z);
                if hinge_angle(rel_v.dot(hinge), rel.w) < 0.0 {
                    rotation = bind;
                }
            }

            skeleton.set_local_rotation(link.bone, rotation);
        }
    }
}

/// 绕铰链轴的有符号角度，范围 (-PI, PI]
#[inline]
fn hinge_angle(axis_component: f32, w: f32) -> f32 {
    let (s, w) = if w < 0.0 { (-axis_component, -w) } else { (axis_component, w) };
    2.0 * s.atan2(w)
}

/// 四元数归一化，长度过小时返回 None
#[inline]
fn normalize_quat(q: Quat) -> Option<Quat> {
    let len = q.length();
    if len > 1e-6 && len.is_finite() {
        Some(q * (1.0 / len))
    } else {
        None
    }
}
