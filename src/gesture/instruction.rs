//! 手势指令
//!
//! 外部 BML/SiGML 翻译器产出的结构化指令。字段名与其 JSON 一致（camelCase），
//! 未给出的字段为 None / false，时间字段由 [`Timing::fill`] 补全。

use glam::Vec3;
use serde::Deserialize;

use crate::skeleton::Side;
use crate::{Result, SignError};
use super::timeline::Timing;

/// 指令类型
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum GestureKind {
    /// 手相对身体的位置
    LocationBodyArm,
    /// 掌心朝向
    Palmor,
    /// 手指延伸方向
    Extfidir,
    Handshape,
    /// 动作叠加（直线、圆弧、腕部、手指）
    Motion,
    /// 双手接触
    HandConstellation,
    /// 抬肘 / 抬肩 / 耸肩
    ArmPose,
}

/// 指令作用的手
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum HandSelector {
    Right,
    Left,
    Both,
    #[default]
    Dominant,
    NonDominant,
}

impl HandSelector {
    /// 展开为具体的手（BOTH 时惯用手在前）
    pub fn resolve(self, dominant: Side) -> Vec<Side> {
        match self {
            HandSelector::Right => vec![Side::Right],
            HandSelector::Left => vec![Side::Left],
            HandSelector::Both => vec![dominant, dominant.opposite()],
            HandSelector::Dominant => vec![dominant],
            HandSelector::NonDominant => vec![dominant.opposite()],
        }
    }
}

/// 对称标志：非惯用手的目标值沿对应轴镜像
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Symmetry {
    /// 左右
    pub lr: bool,
    /// 上下
    pub ud: bool,
    /// 前后（里外）
    pub io: bool,
}

impl Symmetry {
    pub const NONE: Symmetry = Symmetry { lr: false, ud: false, io: false };

    #[inline]
    pub fn is_none(&self) -> bool {
        !(self.lr || self.ud || self.io)
    }

    /// 镜像的轴数（奇数时旋转方向反转）
    pub fn flips(&self) -> u32 {
        self.lr as u32 + self.ud as u32 + self.io as u32
    }

    /// 镜像方向码中的字母（l/r、u/d、o/i）
    pub fn mirror_code(&self, code: &str) -> String {
        code.chars()
            .map(|c| match c.to_ascii_lowercase() {
                'l' if self.lr => 'r',
                'r' if self.lr => 'l',
                'u' if self.ud => 'd',
                'd' if self.ud => 'u',
                'o' if self.io => 'i',
                'i' if self.io => 'o',
                other => other,
            })
            .collect()
    }

    /// 镜像位置名中的 LEFT / RIGHT
    pub fn mirror_location(&self, name: &str) -> String {
        if !self.lr {
            return name.to_string();
        }
        let upper = name.to_ascii_uppercase();
        if let Some(base) = upper.strip_suffix("_LEFT") {
            format!("{base}_RIGHT")
        } else if let Some(base) = upper.strip_suffix("_RIGHT") {
            format!("{base}_LEFT")
        } else {
            upper
        }
    }

    /// 在虚拟人坐标系（left / up / forward）中镜像向量
    pub fn mirror_vector(&self, v: Vec3, left: Vec3, forward: Vec3) -> Vec3 {
        let mut v = v;
        for (enabled, axis) in [(self.lr, left), (self.ud, Vec3::Y), (self.io, forward)] {
            if enabled {
                v -= 2.0 * v.dot(axis) * axis;
            }
        }
        v
    }
}

/// 方向码（u d l r o i 的组合，如 "uo"、"dl"）-> 单位向量
///
/// l / r 是虚拟人自身的左右，o 为身体正前方，i 指向身体。
pub fn direction_from_code(code: &str, left: Vec3, forward: Vec3) -> Result<Vec3> {
    let mut dir = Vec3::ZERO;
    for c in code.trim().chars() {
        dir += match c.to_ascii_lowercase() {
            'u' => Vec3::Y,
            'd' => -Vec3::Y,
            'l' => left,
            'r' => -left,
            'o' => forward,
            'i' => -forward,
            _ => {
                return Err(SignError::UnknownName { kind: "direction", name: code.to_string() });
            }
        };
    }
    dir.try_normalize()
        .ok_or_else(|| SignError::InvalidInstruction(format!("direction '{code}' has no extent")))
}

/// 一条手势指令
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GestureInstruction {
    #[serde(rename = "type")]
    pub kind: Option<GestureKind>,
    pub hand: HandSelector,

    // ========== 时间（秒，相对指令发出时刻）==========
    pub start: Option<f32>,
    pub attack_peak: Option<f32>,
    pub relax: Option<f32>,
    pub end: Option<f32>,

    /// 保留为新的默认姿态
    pub shift: bool,
    pub lr_sym: bool,
    pub ud_sym: bool,
    pub io_sym: bool,

    // ========== 位置 ==========
    pub location_body_arm: Option<String>,
    /// 位置：离锚点的距离；动作：位移/半径；接触：间隔（均为臂长的比例）
    pub distance: Option<f32>,

    // ========== 手腕 ==========
    pub extfidir: Option<String>,
    pub palmor: Option<String>,

    // ========== 手形 ==========
    pub handshape: Option<String>,
    pub second_handshape: Option<String>,
    pub main_bend: Option<String>,
    pub bend2: Option<String>,
    pub bend3: Option<String>,
    pub bend4: Option<String>,
    pub bend5: Option<String>,
    pub splay2: Option<f32>,
    pub splay3: Option<f32>,
    pub splay4: Option<f32>,
    pub splay5: Option<f32>,
    /// 如 "23"：参与特殊角色的手指编号
    pub special_fingers: Option<String>,
    pub thumbshape: Option<String>,
    /// 拇指目标锚点（如 "2_PAD"）
    pub thumb_target: Option<String>,
    /// 拇指与目标的距离（手掌尺寸的比例）
    pub thumb_distance: Option<f32>,
    /// 接触目标的拇指部位：TIP（默认）或 PAD
    pub thumb_source: Option<String>,

    // ========== 动作 ==========
    /// DIRECTED / CIRCULAR / WRIST / FINGERPLAY
    pub motion: Option<String>,
    pub direction: Option<String>,
    pub axis: Option<String>,
    /// 角度（度）
    pub start_angle: Option<f32>,
    pub end_angle: Option<f32>,
    /// 腕部动作：NOD / SWING / TWIST / STIR
    pub mode: Option<String>,
    /// 振荡频率（Hz）
    pub speed: Option<f32>,
    /// 振幅（弧度或弯曲值）
    pub intensity: Option<f32>,

    // ========== 双手接触 ==========
    pub src_contact: Option<String>,
    pub dst_contact: Option<String>,
    pub keep_updating_contact: bool,

    // ========== 肩肘（度）==========
    pub elbow_raise: Option<f32>,
    pub shoulder_raise: Option<f32>,
    pub shoulder_hunch: Option<f32>,
}

impl GestureInstruction {
    pub fn new(kind: GestureKind, hand: HandSelector) -> Self {
        Self { kind: Some(kind), hand, ..Default::default() }
    }

    pub fn with_timing(mut self, start: f32, end: f32) -> Self {
        self.start = Some(start);
        self.end = Some(end);
        self
    }

    pub fn kind(&self) -> Result<GestureKind> {
        self.kind
            .ok_or_else(|| SignError::InvalidInstruction("missing instruction type".to_string()))
    }

    /// 补全并校验时间
    pub fn timing(&self) -> Result<Timing> {
        let timing = Timing::fill(self.start, self.attack_peak, self.relax, self.end);
        if !timing.is_ordered() {
            return Err(SignError::InvalidInstruction(format!(
                "timing must satisfy start <= attackPeak <= relax <= end, got {:?}",
                timing
            )));
        }
        Ok(timing)
    }

    pub fn symmetry(&self) -> Symmetry {
        Symmetry { lr: self.lr_sym, ud: self.ud_sym, io: self.io_sym }
    }

    /// 某只手实际使用的对称（只作用于非惯用手）
    pub fn symmetry_for(&self, side: Side, dominant: Side) -> Symmetry {
        if side == dominant {
            Symmetry::NONE
        } else {
            self.symmetry()
        }
    }

    /// bend2..bend5
    pub fn bend_override(&self, number: u32) -> Option<&str> {
        match number {
            2 => self.bend2.as_deref(),
            3 => self.bend3.as_deref(),
            4 => self.bend4.as_deref(),
            5 => self.bend5.as_deref(),
            _ => None,
        }
    }

    /// splay2..splay5
    pub fn splay_override(&self, number: u32) -> Option<f32> {
        match number {
            2 => self.splay2,
            3 => self.splay3,
            4 => self.splay4,
            5 => self.splay5,
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deserialize_instruction() {
        let instr: GestureInstruction = serde_json::from_str(
            r#"{ "type": "handshape", "hand": "NON_DOMINANT", "handshape": "FIST",
                 "start": 0.2, "end": 1.0, "bend3": "990", "lrSym": true, "shift": true }"#,
        )
        .unwrap();
        assert_eq!(instr.kind().unwrap(), GestureKind::Handshape);
        assert_eq!(instr.hand, HandSelector::NonDominant);
        assert_eq!(instr.bend_override(3), Some("990"));
        assert!(instr.symmetry().lr && instr.shift);
        let timing = instr.timing().unwrap();
        assert!((timing.attack_peak - 0.4).abs() < 1e-6);
        assert!((timing.relax - 0.7).abs() < 1e-6);
    }

    #[test]
    fn test_missing_type_and_bad_timing() {
        let instr: GestureInstruction = serde_json::from_str(r#"{ "hand": "BOTH" }"#).unwrap();
        assert!(matches!(instr.kind(), Err(SignError::InvalidInstruction(_))));
        let instr = GestureInstruction::new(GestureKind::Motion, HandSelector::Right).with_timing(2.0, 1.0);
        assert!(instr.timing().is_err());
    }

    #[test]
    fn test_hand_selector_resolve() {
        assert_eq!(HandSelector::Both.resolve(Side::Right), vec![Side::Right, Side::Left]);
        assert_eq!(HandSelector::NonDominant.resolve(Side::Left), vec![Side::Right]);
        assert_eq!(HandSelector::Dominant.resolve(Side::Left), vec![Side::Left]);
    }

    #[test]
    fn test_direction_codes() {
        let (left, fwd) = (Vec3::X, Vec3::Z);
        assert_eq!(direction_from_code("u", left, fwd).unwrap(), Vec3::Y);
        assert_eq!(direction_from_code("r", left, fwd).unwrap(), -Vec3::X);
        let d = direction_from_code("uo", left, fwd).unwrap();
        assert!(d.abs_diff_eq(Vec3::new(0.0, 1.0, 1.0).normalize(), 1e-6));
        assert!(matches!(direction_from_code("ux", left, fwd), Err(SignError::UnknownName { .. })));
        assert!(direction_from_code("ud", left, fwd).is_err());
    }

    #[test]
    fn test_symmetry_mirroring() {
        let sym = Symmetry { lr: true, ud: false, io: true };
        assert_eq!(sym.mirror_code("luo"), "rui");
        assert_eq!(sym.mirror_location("shoulder_left"), "SHOULDER_RIGHT");
        assert_eq!(sym.flips(), 2);
        let v = sym.mirror_vector(Vec3::new(1.0, 2.0, 3.0), Vec3::X, Vec3::Z);
        assert_eq!(v, Vec3::new(-1.0, 2.0, -3.0));
        assert!(Symmetry::NONE.is_none());

        let instr = GestureInstruction { lr_sym: true, ..Default::default() };
        assert!(instr.symmetry_for(Side::Right, Side::Right).is_none());
        assert!(instr.symmetry_for(Side::Left, Side::Right).lr);
    }
}
