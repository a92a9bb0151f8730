//! 手势合成
//!
//! - GestureInstruction: 外部翻译器产出的结构化指令
//! - PhasedValue / Timing: 四阶段时间线（S 曲线过渡）
//! - BodyLocations / HandGeometry: 骨骼上的锚点与手掌坐标轴
//! - HandLocation / WristOrientation / HandShapeSynth / MotionOverlay: 单臂子模块
//! - HandConstellation: 双手接触
//! - BodyController: 调度指令并按固定顺序驱动双臂

mod config;
mod timeline;
mod instruction;
mod anchor;
mod location;
mod wrist;
mod handshape;
mod motion;
mod constellation;
mod arm;
mod controller;

pub use config::{AnchorDef, AvatarConfig, GestureConfig};
pub use timeline::{s_curve, Blend, Phase, PhaseTimeline, PhasedValue, Timing};
pub use instruction::{direction_from_code, GestureInstruction, GestureKind, HandSelector, Symmetry};
pub use anchor::{Anchor, BodyLocations, HandGeometry};
pub use location::HandLocation;
pub use wrist::WristOrientation;
pub use handshape::{Bending, FingerPose, HandInfo, HandShapeSynth, Handshape, Thumbshape};
pub use motion::{MotionKind, MotionOverlay, MotionSum, WristMode};
pub use constellation::{ContactPoint, HandConstellation};
pub use arm::{ArmController, ArmModules};
pub use controller::BodyController;
