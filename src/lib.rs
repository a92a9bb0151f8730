//! 手语虚拟人运行时
//!
//! 两个核心子系统：
//! - 动画重定向：把一套骨骼上的姿态/动画片段迁移到另一套骨骼
//! - 手势合成：把带时间轴的指令（手型、腕部朝向、位置、双手接触）转换为关节旋转
//!
//! 所有状态都由调用方显式构造并持有，没有全局单例。

pub mod skeleton;
pub mod animation;
pub mod gesture;

#[cfg(test)]
pub(crate) mod test_rig;

pub use skeleton::{BoneLink, BoneSet, BoneTransform, Skeleton, BoneMap, Joint, Side, Digit};
pub use animation::{AnimationClip, KeyframeTrack, TrackValues, RetargetSession, RetargetOptions, BindPoseMode};
pub use gesture::{BodyController, GestureConfig, AvatarConfig, GestureInstruction};

use thiserror::Error;

/// 引擎错误类型
#[derive(Debug, Error)]
pub enum SignError {
    #[error("bone not found: {0}")]
    BoneNotFound(String),

    #[error("invalid skeleton: {0}")]
    InvalidSkeleton(String),

    #[error("degenerate geometry: {0}")]
    DegenerateGeometry(String),

    #[error("unknown {kind}: {name}")]
    UnknownName { kind: &'static str, name: String },

    #[error("invalid instruction: {0}")]
    InvalidInstruction(String),
}

/// 结果类型别名
pub type Result<T> = std::result::Result<T, SignError>;
