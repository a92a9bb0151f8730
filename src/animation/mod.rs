//! 动画系统
//!
//! - motion_track: 关键帧轨道与插值
//! - clip: 动画片段与播放
//! - retarget: 跨骨骼重定向

mod motion_track;
mod clip;
mod retarget;

pub use motion_track::{KeyframeTrack, MotionTrack, TrackKind, TrackSample, TrackValues};
pub(crate) use motion_track::nlerp;
pub use clip::AnimationClip;
pub use retarget::{BindPoseMode, JointBridge, RetargetOptions, RetargetSession};
