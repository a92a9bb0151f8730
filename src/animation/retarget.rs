//! 动画重定向
//!
//! 由两套骨骼的绑定姿态与关节映射预计算每个关节的一对常量四元数，
//! 之后每帧只需一次共轭：`trg_local = left * src_local * right`。

use std::collections::HashMap;

use glam::{Mat4, Quat, Vec3};
use rayon::prelude::*;

use crate::skeleton::{tpose, BoneMap, BoneSet, CanonicalJoints};
use crate::{Result, SignError};
use super::clip::AnimationClip;
use super::motion_track::{KeyframeTrack, TrackValues};

/// 绑定姿态来源
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, serde::Deserialize)]
pub enum BindPoseMode {
    /// 骨骼自身的绑定姿态
    #[default]
    BindPose,
    /// 骨骼当前姿态
    CurrentPose,
    /// 先对齐为 T-pose
    TPose,
}

/// 重定向选项
#[derive(Clone, Debug, Default)]
pub struct RetargetOptions {
    pub src_pose_mode: BindPoseMode,
    pub trg_pose_mode: BindPoseMode,
    /// 把根骨骼之上的外部变换（armature_transform）计入源骨骼
    pub src_embed_world: bool,
    pub trg_embed_world: bool,
    /// 显式关节映射（源骨骼名 -> 目标骨骼名），None 时自动匹配
    pub bone_map: Option<HashMap<String, String>>,
}

// ============================================================================
// 绑定姿态快照
// ============================================================================

/// 绑定姿态快照，创建后不再修改
#[derive(Clone, Debug)]
struct BindPoseSnapshot {
    skeleton: BoneSet,
    world: Vec<Mat4>,
    rotation: Vec<Quat>,
    embedded: Option<(Mat4, Quat)>,
}

impl BindPoseSnapshot {
    fn capture(skeleton: &BoneSet, mode: BindPoseMode, embed_world: bool) -> Result<Self> {
        let skeleton = match mode {
            BindPoseMode::BindPose => {
                let mut copy = skeleton.clone();
                copy.reset_to_bind();
                copy
            }
            BindPoseMode::CurrentPose => {
                let mut copy = skeleton.clone();
                copy.update_world_matrices();
                copy
            }
            BindPoseMode::TPose => {
                let joints = CanonicalJoints::auto_detect(skeleton);
                tpose::tposed_copy(skeleton, &joints)?
            }
        };

        let world: Vec<Mat4> = skeleton.bones().iter().map(|b| b.local_to_world).collect();
        let rotation: Vec<Quat> = skeleton.bones().iter().map(|b| b.world_rotation).collect();
        let embedded = embed_world.then(|| {
            let m = skeleton.armature_transform;
            let (_, r, _) = m.to_scale_rotation_translation();
            (m, r.normalize())
        });

        Ok(Self { skeleton, world, rotation, embedded })
    }

    #[inline]
    fn position(&self, idx: usize) -> Vec3 {
        self.world[idx].col(3).truncate()
    }

    #[inline]
    fn parent_rotation(&self, idx: usize) -> Quat {
        match self.skeleton.bones()[idx].parent_id() {
            Some(p) => self.rotation[p],
            None => Quat::IDENTITY,
        }
    }

    #[inline]
    fn embedded_rotation(&self) -> Quat {
        self.embedded.map(|(_, r)| r).unwrap_or(Quat::IDENTITY)
    }

    /// 骨骼空间的点转到嵌入后的世界空间
    #[inline]
    fn to_world(&self, p: Vec3) -> Vec3 {
        match self.embedded {
            Some((m, _)) => m.transform_point3(p),
            None => p,
        }
    }

    #[inline]
    fn from_world(&self, p: Vec3) -> Vec3 {
        match self.embedded {
            Some((m, _)) => m.inverse().transform_point3(p),
            None => p,
        }
    }

    /// 到父骨骼的绑定长度
    fn bone_length(&self, idx: usize) -> f32 {
        match self.skeleton.bones()[idx].parent_id() {
            Some(p) => self.position(idx).distance(self.position(p)),
            None => 0.0,
        }
    }
}

// ============================================================================
// 重定向会话
// ============================================================================

/// 每个已映射关节的常量桥接旋转
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct JointBridge {
    pub target: usize,
    pub left: Quat,
    pub right: Quat,
}

/// 重定向会话：每对（源骨骼，目标骨骼）创建一次，可重复使用
#[derive(Clone, Debug)]
pub struct RetargetSession {
    src: BindPoseSnapshot,
    trg: BindPoseSnapshot,
    bone_map: BoneMap,
    /// 按源骨骼索引
    bridges: Vec<Option<JointBridge>>,
    proportion_ratio: f32,
}

impl RetargetSession {
    pub fn new(src: &BoneSet, trg: &BoneSet, options: &RetargetOptions) -> Result<Self> {
        let src_snap = BindPoseSnapshot::capture(src, options.src_pose_mode, options.src_embed_world)?;
        let trg_snap = BindPoseSnapshot::capture(trg, options.trg_pose_mode, options.trg_embed_world)?;

        let bone_map = match &options.bone_map {
            Some(table) => BoneMap::from_name_table(&src_snap.skeleton, &trg_snap.skeleton, table),
            None => BoneMap::auto(&src_snap.skeleton, &trg_snap.skeleton),
        };
        if bone_map.mapped_count() == 0 {
            log::warn!("[Retarget] 没有任何关节被映射，重定向结果将为空");
        }

        let src_emb = src_snap.embedded_rotation();
        let trg_emb = trg_snap.embedded_rotation();
        let mut bridges = vec![None; src_snap.skeleton.len()];
        for (i, j) in bone_map.pairs() {
            let right = src_snap.rotation[i].inverse() * src_emb.inverse() * trg_emb * trg_snap.rotation[j];
            let left = trg_snap.parent_rotation(j).inverse() * trg_emb.inverse() * src_emb * src_snap.parent_rotation(i);
            bridges[i] = Some(JointBridge {
                target: j,
                left: left.normalize(),
                right: right.normalize(),
            });
        }

        let proportion_ratio = Self::compute_proportion_ratio(&src_snap, &trg_snap, &bone_map)?;
        log::info!(
            "[Retarget] 会话已创建：映射 {} 个关节，比例 {:.4}",
            bone_map.mapped_count(),
            proportion_ratio
        );

        Ok(Self {
            src: src_snap,
            trg: trg_snap,
            bone_map,
            bridges,
            proportion_ratio,
        })
    }

    /// 目标骨骼长度和 / 源骨骼长度和（只统计已映射的非根关节）
    fn compute_proportion_ratio(src: &BindPoseSnapshot, trg: &BindPoseSnapshot, map: &BoneMap) -> Result<f32> {
        let mut src_sum = 0.0;
        let mut trg_sum = 0.0;
        let mut count = 0;
        for (i, j) in map.pairs() {
            if src.skeleton.bones()[i].is_root() {
                continue;
            }
            src_sum += src.bone_length(i);
            trg_sum += trg.bone_length(j);
            count += 1;
        }

        if count == 0 {
            log::warn!("[Retarget] 没有可比较的骨骼长度，比例取 1");
            return Ok(1.0);
        }
        if src_sum < 1e-6 {
            return Err(SignError::DegenerateGeometry(
                "source skeleton has zero total bone length".to_string(),
            ));
        }
        Ok(trg_sum / src_sum)
    }

    #[inline]
    pub fn proportion_ratio(&self) -> f32 {
        self.proportion_ratio
    }

    #[inline]
    pub fn bone_map(&self) -> &BoneMap {
        &self.bone_map
    }

    /// 源关节的桥接旋转（未映射返回 None）
    #[inline]
    pub fn bridge(&self, src_idx: usize) -> Option<&JointBridge> {
        self.bridges.get(src_idx).and_then(Option::as_ref)
    }

    /// 单个源本地旋转 -> 目标本地旋转
    #[inline]
    pub fn retarget_rotation(&self, src_idx: usize, src_local: Quat) -> Option<Quat> {
        self.bridge(src_idx).map(|b| (b.left * src_local * b.right).normalize())
    }

    /// 把源骨骼当前姿态写入目标骨骼（只写旋转）
    pub fn retarget_pose(&self, src: &BoneSet, trg: &mut BoneSet) {
        for (i, bone) in src.bones().iter().enumerate() {
            let Some(bridge) = self.bridge(i) else {
                continue;
            };
            if let Some(target) = trg.get_bone_mut(bridge.target) {
                target.local.rotation = (bridge.left * bone.local.rotation * bridge.right).normalize();
            }
        }
        trg.update_world_matrices();
    }

    /// 根骨骼位置：去掉源绑定位置，按比例缩放，再叠到目标绑定位置上
    fn retarget_root_position(&self, target: usize, p: Vec3) -> Vec3 {
        const ROOT: usize = 0;
        let src_bind = self.src.to_world(self.src.position(ROOT));
        let diff = (self.src.to_world(p) - src_bind) * self.proportion_ratio;
        let trg_world = self.trg.to_world(self.trg.position(target)) + diff;
        let trg_local = self.trg.from_world(trg_world);
        // 目标关节若有父骨骼，换算到父骨骼空间
        match self.trg.skeleton.bones()[target].parent_id() {
            Some(parent) => self.trg.world[parent].inverse().transform_point3(trg_local),
            None => trg_local,
        }
    }

    fn retarget_track(&self, track: &KeyframeTrack) -> Option<KeyframeTrack> {
        let src_idx = self.src.skeleton.find_bone_by_name(&track.bone)?;
        let bridge = self.bridge(src_idx)?;
        let target_name = self.trg.skeleton.bones()[bridge.target].name.clone();

        let values = match &track.values {
            TrackValues::Rotation(qs) => TrackValues::Rotation(
                qs.iter().map(|q| (bridge.left * *q * bridge.right).normalize()).collect(),
            ),
            TrackValues::Position(ps) if src_idx == 0 => TrackValues::Position(
                ps.iter().map(|p| self.retarget_root_position(bridge.target, *p)).collect(),
            ),
            // 只有根骨骼的位移在比例不同的骨骼间有意义
            TrackValues::Position(_) => return None,
            // 缩放与标量原样传递
            other => other.clone(),
        };
        Some(track.with_values(target_name, values))
    }

    /// 重定向整个片段
    ///
    /// 源片段的轨道列表会被原地过滤（只保留已映射关节的轨道），需要原始数据请先克隆。
    pub fn retarget_clip(&self, clip: &mut AnimationClip) -> AnimationClip {
        clip.tracks.retain(|t| {
            self.src
                .skeleton
                .find_bone_by_name(&t.bone)
                .is_some_and(|i| self.bridge(i).is_some())
        });

        let tracks: Vec<KeyframeTrack> = clip
            .tracks
            .par_iter()
            .filter_map(|t| self.retarget_track(t))
            .collect();

        if tracks.is_empty() {
            log::warn!("[Retarget] 片段 '{}' 重定向后没有轨道", clip.name);
        }
        AnimationClip::with_duration(clip.name.clone(), clip.duration, tracks)
    }
}
