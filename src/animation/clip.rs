//! 动画片段
//!
//! 一组骨骼关键帧轨道 + 时长，按骨骼名绑定到骨骼集合上播放。

use super::motion_track::{KeyframeTrack, MotionTrack, TrackKind, TrackSample, nlerp};
use crate::skeleton::BoneSet;

/// 动画片段
#[derive(Clone, Debug, Default, PartialEq)]
pub struct AnimationClip {
    pub name: String,
    /// 时长（秒）
    pub duration: f32,
    pub tracks: Vec<KeyframeTrack>,
}

impl AnimationClip {
    /// 创建片段，时长取所有轨道最后一帧的最大值
    pub fn new(name: impl Into<String>, tracks: Vec<KeyframeTrack>) -> Self {
        let duration = tracks.iter().map(|t| t.max_time()).fold(0.0, f32::max);
        Self { name: name.into(), duration, tracks }
    }

    pub fn with_duration(name: impl Into<String>, duration: f32, tracks: Vec<KeyframeTrack>) -> Self {
        Self { name: name.into(), duration, tracks }
    }

    /// 查找某骨骼某属性的轨道
    pub fn find_track(&self, bone: &str, kind: TrackKind) -> Option<&KeyframeTrack> {
        self.tracks.iter().find(|t| t.bone == bone && t.kind() == kind)
    }

    pub fn track_names(&self) -> impl Iterator<Item = String> + '_ {
        self.tracks.iter().map(KeyframeTrack::name)
    }

    /// 评估动画（完全覆盖）
    pub fn apply(&self, skeleton: &mut BoneSet, time: f32) {
        self.apply_with_weight(skeleton, time, 1.0);
    }

    /// 带权重评估动画
    ///
    /// # 参数
    /// - `time`: 秒，超出范围时取端点
    /// - `weight`: 混合权重 [0, 1]
    pub fn apply_with_weight(&self, skeleton: &mut BoneSet, time: f32, weight: f32) {
        if weight <= 0.0 {
            return;
        }
        let weight = weight.min(1.0);

        for track in &self.tracks {
            let Some(bone_idx) = skeleton.find_bone_by_name(&track.bone) else {
                continue;
            };
            let Some(sample) = track.seek(time) else {
                continue;
            };
            let Some(bone) = skeleton.get_bone_mut(bone_idx) else {
                continue;
            };
            match sample {
                TrackSample::Position(p) => {
                    bone.local.translation = bone.local.translation.lerp(p, weight);
                }
                TrackSample::Rotation(q) => {
                    bone.local.rotation = nlerp(bone.local.rotation, q, weight);
                }
                TrackSample::Scale(s) => {
                    bone.local.scale = bone.local.scale.lerp(s, weight);
                }
                // 标量轨道（形变权重等）不作用于骨骼
                TrackSample::Scalar(_) => {}
            }
        }

        skeleton.update_world_matrices();
    }
}
