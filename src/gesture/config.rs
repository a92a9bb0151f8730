//! 手势合成配置
//!
//! `GestureConfig` 是平铺的调参结构，每个控制器持有一份（不是全局单例）。
//! `AvatarConfig` 描述虚拟人：骨骼名映射与绑定在骨骼上的锚点。
//! 两者都可由外层应用从 JSON 反序列化，缺省字段取默认值。

use std::collections::HashMap;
use std::f32::consts::PI;

use glam::Vec3;
use serde::Deserialize;

use crate::skeleton::{AestheticRange, ArmAesthetics, Side};

/// 手势合成参数
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GestureConfig {
    // ========== 身体 ==========
    /// 惯用手，默认右手
    pub dominant_hand: Side,
    /// 虚拟人正前方（骨骼空间），默认 +Z
    pub forward: Vec3,

    // ========== 手指 ==========
    /// 弯曲值 1.0 对应的角度（弧度），默认 90°
    pub finger_bend_max: f32,
    /// 张开值 1.0 对应的角度（弧度），默认 20°
    pub finger_splay_max: f32,
    /// 手指厚度（米），接触锚点沿掌面法线的偏移，默认 0.01
    pub finger_thickness: f32,

    // ========== 拇指 IK ==========
    /// CCD 最大迭代次数，默认 100
    pub thumb_ik_iterations: u32,
    /// 收敛阈值（距离平方，m²），默认 1e-6
    pub thumb_ik_tolerance_sq: f32,
    /// 自动张开时映射到的角度范围 [min, max]（弧度）
    pub thumb_splay_range: [f32; 2],

    // ========== 手臂 ==========
    /// 手腕扭转分配给前臂的比例 [0, 1]，默认 0.5
    pub forearm_twist_ratio: f32,
    /// 抬肘 [静止, 下限, 上限]
    pub elbow_raise: AestheticRange,
    /// 抬肩
    pub shoulder_raise: AestheticRange,
    /// 耸肩（前探）
    pub shoulder_hunch: AestheticRange,

    // ========== 位置 ==========
    /// 手离身体锚点的默认距离（臂长的比例），默认 0.3
    pub location_distance: f32,
    /// 中立位置时手向本侧的偏移（臂长的比例），默认 0.12
    pub location_side_offset: f32,
    /// 静止时手的位置（身体锚点名），默认 "NEUTRAL"
    pub neutral_location: String,

    // ========== 调试 ==========
    /// 是否输出每条指令的调试日志，默认 false
    pub debug_log: bool,
}

impl Default for GestureConfig {
    fn default() -> Self {
        Self {
            dominant_hand: Side::Right,
            forward: Vec3::Z,

            finger_bend_max: PI * 0.5,
            finger_splay_max: 20f32.to_radians(),
            finger_thickness: 0.01,

            thumb_ik_iterations: 100,
            thumb_ik_tolerance_sq: 1e-6,
            thumb_splay_range: [-0.3, 0.6],

            forearm_twist_ratio: 0.5,
            // 目标越高，肘和肩抬得越多
            elbow_raise: AestheticRange::new(0.0, -0.1, 0.6),
            shoulder_raise: AestheticRange::new(0.0, -0.05, 0.35),
            shoulder_hunch: AestheticRange::new(0.0, -0.05, 0.2),

            location_distance: 0.3,
            location_side_offset: 0.12,
            neutral_location: "NEUTRAL".to_string(),

            debug_log: false,
        }
    }
}

impl GestureConfig {
    /// 手臂 IK 的美学参数
    pub fn aesthetics(&self) -> ArmAesthetics {
        ArmAesthetics {
            elbow_raise: self.elbow_raise,
            shoulder_raise: self.shoulder_raise,
            shoulder_hunch: self.shoulder_hunch,
        }
    }

    /// 单位化的正前方，退化时取 +Z
    pub fn forward_axis(&self) -> Vec3 {
        self.forward.try_normalize().unwrap_or(Vec3::Z)
    }

    /// 虚拟人左侧方向（Y 向上）
    pub fn left_axis(&self) -> Vec3 {
        Vec3::Y.cross(self.forward_axis()).normalize_or_zero()
    }
}

/// 绑定在骨骼上的锚点定义
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct AnchorDef {
    /// 父骨骼名
    pub bone: String,
    /// 骨骼本地空间位置
    pub position: Vec3,
    /// 可选的本地空间朝向（离开表面的方向）
    #[serde(default)]
    pub direction: Option<Vec3>,
}

/// 虚拟人描述
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct AvatarConfig {
    /// 规范关节名 -> 骨骼名；为空时自动识别
    pub bone_map: HashMap<String, String>,
    /// 身体部位锚点（HEAD、CHEST ……），为空时由骨骼推导
    pub body_locations: HashMap<String, AnchorDef>,
    /// 左手锚点覆盖
    pub hand_locations_l: HashMap<String, AnchorDef>,
    /// 右手锚点覆盖
    pub hand_locations_r: HashMap<String, AnchorDef>,
}

impl AvatarConfig {
    pub fn hand_locations(&self, side: Side) -> &HashMap<String, AnchorDef> {
        match side {
            Side::Left => &self.hand_locations_l,
            Side::Right => &self.hand_locations_r,
        }
    }
}
