//! 手形合成
//!
//! 四指用 [张开, 根节弯曲, 中节弯曲, 末节弯曲] 四个标量描述，
//! 拇指直接存三节本地旋转。初始化时（骨骼处于绑定姿态）预计算：
//! - 每节手指的弯曲轴、张开轴（骨骼本地空间）
//! - 手形预设表、拇指形状表、拇指弯曲表（拇指姿态由 CCD 求解）

use std::f32::consts::FRAC_PI_2;

use glam::{Quat, Vec3};

use crate::animation::nlerp;
use crate::skeleton::{BoneSet, ChainLink, ChainSolver, Digit, Side};
use crate::{Result, SignError};
use super::anchor::HandGeometry;
use super::config::GestureConfig;
use super::instruction::GestureInstruction;
use super::timeline::{Blend, PhasedValue, Timing};

/// 单指：[张开, 根节弯曲, 中节弯曲, 末节弯曲]
pub type FingerPose = [f32; 4];

const EXTENDED: FingerPose = [0.0, 0.0, 0.0, 0.0];
const CURLED: FingerPose = [0.0, 1.0, 1.0, 0.8];
const PINCHED: FingerPose = [0.0, 0.55, 0.5, 0.35];
const CUPPED: FingerPose = [0.0, 0.35, 0.35, 0.25];
const RELAXED: FingerPose = [0.0, 0.1, 0.1, 0.05];

/// 张开值 1.0 时各指的偏转方向与比例（正值偏向拇指侧）
const SPLAY_DIRECTION: [f32; 4] = [1.0, -0.5, -1.0, -1.5];

/// 手指弯曲叠加值的范围
const FINGER_PLAY_RANGE: (f32, f32) = (-0.2, 1.0);

// ============================================================================
// 手形状态
// ============================================================================

/// 整只手的姿态
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct HandInfo {
    /// 拇指三节本地旋转
    pub thumb: [Quat; 3],
    /// 食指、中指、无名指、小指
    pub fingers: [FingerPose; 4],
}

impl HandInfo {
    pub fn finger(&self, digit: Digit) -> Option<&FingerPose> {
        match digit {
            Digit::Thumb => None,
            d => self.fingers.get(d.index() - 1),
        }
    }

    pub fn finger_mut(&mut self, digit: Digit) -> Option<&mut FingerPose> {
        match digit {
            Digit::Thumb => None,
            d => self.fingers.get_mut(d.index() - 1),
        }
    }
}

impl Blend for HandInfo {
    fn blend(&self, other: &Self, t: f32) -> Self {
        if t <= 0.0 {
            return *self;
        }
        if t >= 1.0 {
            return *other;
        }
        let mut out = *self;
        for (q, (a, b)) in out.thumb.iter_mut().zip(self.thumb.iter().zip(other.thumb.iter())) {
            *q = nlerp(*a, *b, t);
        }
        for (f, g) in out.fingers.iter_mut().zip(other.fingers.iter()) {
            for (x, y) in f.iter_mut().zip(g.iter()) {
                *x += (y - *x) * t;
            }
        }
        out
    }
}

// ============================================================================
// 名称表
// ============================================================================

/// 手形预设
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Handshape {
    Fist,
    Flat,
    Finger2,
    Finger23,
    Finger23Spread,
    Finger2345,
    Pinch12,
    Pinch12Open,
    PinchAll,
    Cee12,
    CeeAll,
    Cee12Open,
}

impl Handshape {
    pub const ALL: [Handshape; 12] = [
        Handshape::Fist,
        Handshape::Flat,
        Handshape::Finger2,
        Handshape::Finger23,
        Handshape::Finger23Spread,
        Handshape::Finger2345,
        Handshape::Pinch12,
        Handshape::Pinch12Open,
        Handshape::PinchAll,
        Handshape::Cee12,
        Handshape::CeeAll,
        Handshape::Cee12Open,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Handshape::Fist => "FIST",
            Handshape::Flat => "FLAT",
            Handshape::Finger2 => "FINGER_2",
            Handshape::Finger23 => "FINGER_23",
            Handshape::Finger23Spread => "FINGER_23_SPREAD",
            Handshape::Finger2345 => "FINGER_2345",
            Handshape::Pinch12 => "PINCH_12",
            Handshape::Pinch12Open => "PINCH_12_OPEN",
            Handshape::PinchAll => "PINCH_ALL",
            Handshape::Cee12 => "CEE_12",
            Handshape::CeeAll => "CEE_ALL",
            Handshape::Cee12Open => "CEE_12_OPEN",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|s| s.name().eq_ignore_ascii_case(name.trim()))
    }
}

/// 拇指形状
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Thumbshape {
    /// 贴在食指旁
    Default,
    /// 向外伸出
    Out,
    /// 与掌心相对
    Opposed,
    /// 横过掌心
    Across,
}

impl Thumbshape {
    pub const ALL: [Thumbshape; 4] = [Thumbshape::Default, Thumbshape::Out, Thumbshape::Opposed, Thumbshape::Across];

    pub fn name(self) -> &'static str {
        match self {
            Thumbshape::Default => "DEFAULT",
            Thumbshape::Out => "OUT",
            Thumbshape::Opposed => "OPPOSED",
            Thumbshape::Across => "ACROSS",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|s| s.name().eq_ignore_ascii_case(name.trim()))
    }
}

/// 手指弯曲方式
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Bending {
    Straight,
    HalfBent,
    Bent,
    Round,
    Hooked,
    DoubleBent,
    DoubleHooked,
}

impl Bending {
    pub const ALL: [Bending; 7] = [
        Bending::Straight,
        Bending::HalfBent,
        Bending::Bent,
        Bending::Round,
        Bending::Hooked,
        Bending::DoubleBent,
        Bending::DoubleHooked,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Bending::Straight => "STRAIGHT",
            Bending::HalfBent => "HALF_BENT",
            Bending::Bent => "BENT",
            Bending::Round => "ROUND",
            Bending::Hooked => "HOOKED",
            Bending::DoubleBent => "DOUBLE_BENT",
            Bending::DoubleHooked => "DOUBLE_HOOKED",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|s| s.name().eq_ignore_ascii_case(name.trim()))
    }

    /// [根节, 中节, 末节] 弯曲值
    pub fn bends(self) -> [f32; 3] {
        match self {
            Bending::Straight => [0.0, 0.0, 0.0],
            Bending::HalfBent => [0.5, 0.0, 0.0],
            Bending::Bent => [1.0, 0.0, 0.0],
            Bending::Round => [0.5, 0.5, 0.5],
            Bending::Hooked => [0.0, 1.0, 1.0],
            Bending::DoubleBent => [1.0, 1.0, 0.0],
            Bending::DoubleHooked => [0.5, 1.0, 1.0],
        }
    }
}

// ============================================================================
// 预设定义
// ============================================================================

/// 指定特殊手指时的处理方式
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum SpecialRule {
    /// 特殊手指伸出，其余握起
    Extend,
    /// 特殊手指握起，其余保持
    Fold,
    /// 特殊手指与拇指捏合
    Pinch,
    /// 特殊手指与拇指成 C 形
    Cee,
}

#[derive(Clone, Copy, Debug)]
enum ThumbSpec {
    Shape(Thumbshape),
    /// 拇指尖到某指锚点，gap 为沿掌心法线的间距（手掌尺寸的比例）
    Contact { digit: Digit, site: &'static str, gap: f32 },
}

#[derive(Clone, Copy, Debug)]
struct PresetDef {
    selected: &'static [Digit],
    selected_pose: FingerPose,
    other_pose: FingerPose,
    spread: bool,
    thumb: ThumbSpec,
    rule: SpecialRule,
}

const FOUR: &[Digit] = &Digit::FINGERS;
const INDEX: &[Digit] = &[Digit::Index];
const INDEX_MIDDLE: &[Digit] = &[Digit::Index, Digit::Middle];

fn preset_def(shape: Handshape) -> PresetDef {
    use SpecialRule::*;
    let pinch = |digit| ThumbSpec::Contact { digit, site: "TIP", gap: 0.0 };
    let cee = |digit| ThumbSpec::Contact { digit, site: "PAD", gap: 0.25 };
    let def = |selected, selected_pose, other_pose, thumb, rule| PresetDef {
        selected,
        selected_pose,
        other_pose,
        spread: false,
        thumb,
        rule,
    };
    match shape {
        Handshape::Fist => def(&[], EXTENDED, CURLED, ThumbSpec::Shape(Thumbshape::Across), Extend),
        Handshape::Flat => def(FOUR, EXTENDED, CURLED, ThumbSpec::Shape(Thumbshape::Default), Fold),
        Handshape::Finger2 => def(INDEX, EXTENDED, CURLED, ThumbSpec::Shape(Thumbshape::Across), Extend),
        Handshape::Finger23 => def(INDEX_MIDDLE, EXTENDED, CURLED, ThumbSpec::Shape(Thumbshape::Across), Extend),
        Handshape::Finger23Spread => PresetDef {
            spread: true,
            ..def(INDEX_MIDDLE, EXTENDED, CURLED, ThumbSpec::Shape(Thumbshape::Across), Extend)
        },
        Handshape::Finger2345 => def(FOUR, EXTENDED, CURLED, ThumbSpec::Shape(Thumbshape::Across), Fold),
        Handshape::Pinch12 => def(INDEX, PINCHED, CURLED, pinch(Digit::Index), Pinch),
        Handshape::Pinch12Open => def(INDEX, PINCHED, EXTENDED, pinch(Digit::Index), Pinch),
        Handshape::PinchAll => def(FOUR, PINCHED, EXTENDED, pinch(Digit::Middle), Pinch),
        Handshape::Cee12 => def(INDEX, CUPPED, CURLED, cee(Digit::Index), Cee),
        Handshape::CeeAll => def(FOUR, CUPPED, EXTENDED, cee(Digit::Middle), Cee),
        Handshape::Cee12Open => def(INDEX, CUPPED, EXTENDED, cee(Digit::Index), Cee),
    }
}

/// "23" -> [Index, Middle]
fn parse_digits(code: &str) -> Result<Vec<Digit>> {
    code.trim()
        .chars()
        .map(|c| {
            c.to_digit(10)
                .and_then(Digit::from_number)
                .ok_or_else(|| SignError::InvalidInstruction(format!("invalid finger list '{code}'")))
        })
        .collect()
}

/// "990" -> [1.0, 1.0, 0.0]
fn parse_bend_code(code: &str) -> Result<[f32; 3]> {
    let digits: Vec<u32> = code.trim().chars().filter_map(|c| c.to_digit(10)).collect();
    if digits.len() != 3 || code.trim().chars().count() != 3 {
        return Err(SignError::InvalidInstruction(format!("bend override '{code}' must be three digits")));
    }
    Ok([digits[0] as f32 / 9.0, digits[1] as f32 / 9.0, digits[2] as f32 / 9.0])
}

// ============================================================================
// 合成器
// ============================================================================

/// 单手手形合成器
#[derive(Clone, Debug)]
pub struct HandShapeSynth {
    side: Side,
    bend_max: f32,
    splay_max: f32,
    thumb_iterations: u32,
    thumb_tolerance_sq: f32,
    thumb_splay_range: [f32; 2],

    bind_thumb: [Quat; 3],
    bind_fingers: [[Quat; 3]; 4],
    /// 每指三节的弯曲轴（骨骼本地）
    bend_axes: [[Vec3; 3]; 4],
    /// 每指根节的张开轴（骨骼本地）
    splay_axes: [Vec3; 4],
    /// 拇指三节的铰链轴（骨骼本地）
    thumb_axes: [Vec3; 3],

    presets: Vec<HandInfo>,
    thumbshapes: Vec<[Quat; 3]>,
    thumb_bendings: Vec<[Quat; 3]>,
    value: PhasedValue<HandInfo>,
}

impl HandShapeSynth {
    /// 预计算轴与查找表
    ///
    /// 求解拇指时会临时改动骨骼姿态，返回前恢复。
    pub fn new(skeleton: &mut BoneSet, hand: &HandGeometry, config: &GestureConfig) -> Result<Self> {
        let (bind_world, bind_rot) = skeleton.bind_world_transforms();
        let pos = |i: usize| bind_world[i].col(3).truncate();
        let local = |i: usize| skeleton.bones()[i].bind_local.rotation;

        let degenerate = |bone: usize| {
            SignError::DegenerateGeometry(format!("cannot derive finger axes at '{}'", skeleton.bones()[bone].name))
        };
        // 世界轴换算到骨骼本地
        let axis_local = |bone: usize, world: Vec3| -> Result<Vec3> {
            let world = world.try_normalize().ok_or_else(|| degenerate(bone))?;
            Ok(bind_rot[bone].inverse() * world)
        };
        let segment = |a: usize, b: usize| (pos(b) - pos(a)).try_normalize().ok_or_else(|| degenerate(a));

        let mut bend_axes = [[Vec3::X; 3]; 4];
        let mut splay_axes = [Vec3::Y; 4];
        let mut bind_fingers = [[Quat::IDENTITY; 3]; 4];
        for (f, chain) in hand.fingers.iter().enumerate() {
            for k in 0..3 {
                let dir = segment(chain[k], chain[k + 1])?;
                bend_axes[f][k] = axis_local(chain[k], dir.cross(hand.palm_normal))?;
                bind_fingers[f][k] = local(chain[k]);
            }
            let dir = segment(chain[0], chain[1])?;
            splay_axes[f] = axis_local(chain[0], dir.cross(hand.radial))?;
        }

        let mut thumb_axes = [Vec3::X; 3];
        let mut bind_thumb = [Quat::IDENTITY; 3];
        for k in 0..3 {
            let dir = segment(hand.thumb[k], hand.thumb[k + 1])?;
            thumb_axes[k] = axis_local(hand.thumb[k], dir.cross(hand.palm_normal))?;
            bind_thumb[k] = local(hand.thumb[k]);
        }

        let flat = HandInfo { thumb: bind_thumb, fingers: [EXTENDED; 4] };
        let mut synth = Self {
            side: hand.side,
            bend_max: config.finger_bend_max,
            splay_max: config.finger_splay_max,
            thumb_iterations: config.thumb_ik_iterations,
            thumb_tolerance_sq: config.thumb_ik_tolerance_sq,
            thumb_splay_range: config.thumb_splay_range,
            bind_thumb,
            bind_fingers,
            bend_axes,
            splay_axes,
            thumb_axes,
            presets: Vec::new(),
            thumbshapes: Vec::new(),
            thumb_bendings: Vec::new(),
            value: PhasedValue::new(flat),
        };

        // ========================================
        // 拇指形状（在伸直的手上求解）
        // ========================================
        let thickness = config.finger_thickness;
        let thumb_len: f32 = (0..3).map(|k| pos(hand.thumb[k]).distance(pos(hand.thumb[k + 1]))).sum();
        for shape in Thumbshape::ALL {
            let pose = synth.solve_thumb(skeleton, hand, &flat, false, |skel| {
                let (fdir, normal, radial) = hand.current_axes(skel);
                let anchor = |name: &str| hand.anchor_world(skel, name).unwrap_or_else(|| skel.world_position(hand.hand));
                match shape {
                    Thumbshape::Default => anchor("RADIAL") + fdir * hand.palm_size * 0.3,
                    Thumbshape::Out => {
                        let base = skel.world_position(hand.thumb[0]);
                        base + (radial + fdir * 0.6).normalize_or_zero() * thumb_len * 0.95
                    }
                    Thumbshape::Opposed => anchor("PALMAR") + normal * hand.palm_size * 0.5 + radial * hand.palm_size * 0.2,
                    Thumbshape::Across => anchor("4_BASE") + normal * thickness,
                }
            });
            synth.thumbshapes.push(pose);
        }

        // 拇指弯曲：默认拇指形状上绕铰链轴弯曲
        let default_thumb = synth.thumbshapes[Thumbshape::Default as usize];
        for bending in Bending::ALL {
            let bends = bending.bends();
            let pose: [Quat; 3] = std::array::from_fn(|k| {
                default_thumb[k] * Quat::from_axis_angle(synth.thumb_axes[k], bends[k] * synth.bend_max)
            });
            synth.thumb_bendings.push(pose);
        }

        // ========================================
        // 手形预设
        // ========================================
        for shape in Handshape::ALL {
            let def = preset_def(shape);
            let mut info = HandInfo { thumb: default_thumb, fingers: [def.other_pose; 4] };
            for (f, digit) in Digit::FINGERS.iter().enumerate() {
                if def.selected.contains(digit) {
                    info.fingers[f] = def.selected_pose;
                    if def.spread {
                        info.fingers[f][0] = 1.0;
                    }
                }
            }
            info.thumb = match def.thumb {
                ThumbSpec::Shape(ts) => synth.thumbshapes[ts as usize],
                ThumbSpec::Contact { digit, site, gap } => {
                    let name = format!("{}_{}", digit.index() + 1, site);
                    synth.solve_thumb_to_anchor(skeleton, hand, &info, &name, gap, false)?
                }
            };
            synth.presets.push(info);
        }

        synth.value = PhasedValue::new(HandInfo { thumb: default_thumb, fingers: [RELAXED; 4] });
        Ok(synth)
    }

    #[inline]
    pub fn side(&self) -> Side {
        self.side
    }

    pub fn preset(&self, shape: Handshape) -> &HandInfo {
        &self.presets[shape as usize]
    }

    pub fn thumbshape(&self, shape: Thumbshape) -> &[Quat; 3] {
        &self.thumbshapes[shape as usize]
    }

    pub fn thumb_bending(&self, bending: Bending) -> &[Quat; 3] {
        &self.thumb_bendings[bending as usize]
    }

    pub fn value(&self) -> &PhasedValue<HandInfo> {
        &self.value
    }

    // ========================================
    // 写入骨骼
    // ========================================

    /// 把手形写入手指骨骼
    pub fn apply(&self, skeleton: &mut BoneSet, hand: &HandGeometry, info: &HandInfo) {
        for (f, chain) in hand.fingers.iter().enumerate() {
            let [splay, b0, b1, b2] = info.fingers[f];
            let bends = [b0, b1, b2];
            for k in 0..3 {
                let mut rotation = self.bind_fingers[f][k];
                if k == 0 {
                    let angle = splay * SPLAY_DIRECTION[f] * self.splay_max;
                    rotation *= Quat::from_axis_angle(self.splay_axes[f], angle);
                }
                rotation *= Quat::from_axis_angle(self.bend_axes[f][k], bends[k] * self.bend_max);
                if let Some(bone) = skeleton.get_bone_mut(chain[k]) {
                    bone.local.rotation = rotation.normalize();
                }
            }
        }
        for k in 0..3 {
            if let Some(bone) = skeleton.get_bone_mut(hand.thumb[k]) {
                bone.local.rotation = info.thumb[k].normalize();
            }
        }
        skeleton.update_subtree(hand.hand);
    }

    /// 推进时间线，叠加手指动作后写入骨骼
    pub fn update(&mut self, skeleton: &mut BoneSet, hand: &HandGeometry, dt: f32, finger_play: Option<[f32; 4]>) {
        self.value.update(dt);
        let info = self.current(finger_play);
        self.apply(skeleton, hand, &info);
    }

    /// 当前手形（含手指动作叠加）
    pub fn current(&self, finger_play: Option<[f32; 4]>) -> HandInfo {
        let mut info = self.value.cur;
        if let Some(play) = finger_play {
            let (lo, hi) = FINGER_PLAY_RANGE;
            for (pose, delta) in info.fingers.iter_mut().zip(play) {
                for bend in &mut pose[1..] {
                    *bend = (*bend + delta).clamp(lo, hi);
                }
            }
        }
        info
    }

    // ========================================
    // 拇指 IK
    // ========================================

    /// CCD 求解拇指，返回末端到目标的剩余距离
    ///
    /// `short_chain` 时以第三节（指腹）为末端，只动前两节。
    /// `splay` 为 [0, 1] 的张开系数，None 时按指尖相对手掌的位置自动取值。
    pub fn thumb_ik(
        &self,
        skeleton: &mut BoneSet,
        hand: &HandGeometry,
        target: Vec3,
        short_chain: bool,
        splay: Option<f32>,
    ) -> f32 {
        let t = hand.thumb;
        let (links, effector) = if short_chain {
            (vec![ChainLink::free(t[0]), ChainLink::hinge(t[1], self.thumb_axes[1])], t[2])
        } else {
            (
                vec![
                    ChainLink::free(t[0]),
                    ChainLink::hinge(t[1], self.thumb_axes[1]),
                    ChainLink::hinge(t[2], self.thumb_axes[2]),
                ],
                t[3],
            )
        };
        let residual = ChainSolver::new(links, effector)
            .with_iterations(self.thumb_iterations)
            .with_tolerance_sq(self.thumb_tolerance_sq)
            .solve(skeleton, target);

        // 绕"根 -> 末端"轴扭转，末端位置不变
        let base = skeleton.world_position(t[0]);
        let tip = skeleton.world_position(effector);
        let factor = splay.unwrap_or_else(|| {
            let (_, normal, radial) = hand.current_axes(skeleton);
            let rel = (tip - skeleton.world_position(hand.hand)) / hand.palm_size;
            (rel.dot(normal).atan2(rel.dot(radial)) / FRAC_PI_2).clamp(0.0, 1.0)
        });
        let [lo, hi] = self.thumb_splay_range;
        let angle = lo + (hi - lo) * factor.clamp(0.0, 1.0);
        if let Some(axis) = (tip - base).try_normalize() {
            skeleton.rotate_world(t[0], Quat::from_axis_angle(axis, angle * self.side.sign()));
        }
        residual
    }

    /// 在给定手形上求解拇指，返回三节本地旋转；骨骼姿态恢复原样
    fn solve_thumb(
        &self,
        skeleton: &mut BoneSet,
        hand: &HandGeometry,
        info: &HandInfo,
        short_chain: bool,
        target: impl Fn(&BoneSet) -> Vec3,
    ) -> [Quat; 3] {
        let saved = skeleton.save_pose();
        self.apply(skeleton, hand, info);
        let target = target(skeleton);
        self.thumb_ik(skeleton, hand, target, short_chain, None);
        let thumb = hand.thumb;
        let pose = std::array::from_fn(|k| skeleton.bones()[thumb[k]].local.rotation);
        skeleton.restore_pose(&saved);
        pose
    }

    /// 拇指到手上锚点（沿掌心法线留 gap·手掌尺寸 的间距）
    fn solve_thumb_to_anchor(
        &self,
        skeleton: &mut BoneSet,
        hand: &HandGeometry,
        info: &HandInfo,
        anchor: &str,
        gap: f32,
        short_chain: bool,
    ) -> Result<[Quat; 3]> {
        let anchor = *hand
            .anchor(anchor)
            .ok_or_else(|| SignError::UnknownName { kind: "hand location", name: anchor.to_string() })?;
        Ok(self.solve_thumb(skeleton, hand, info, short_chain, |skel| {
            let (_, normal, _) = hand.current_axes(skel);
            anchor.world_position(skel) + normal * gap * hand.palm_size
        }))
    }

    // ========================================
    // 指令
    // ========================================

    /// 解析手形指令并装载时间线
    ///
    /// 解析失败时时间线保持不变。
    pub fn new_gesture(
        &mut self,
        skeleton: &mut BoneSet,
        hand: &HandGeometry,
        instr: &GestureInstruction,
        timing: Timing,
        elapsed: f32,
    ) -> Result<()> {
        let name = instr
            .handshape
            .as_deref()
            .ok_or_else(|| SignError::InvalidInstruction("handshape instruction without handshape".to_string()))?;
        let shape = Handshape::from_name(name)
            .ok_or_else(|| SignError::UnknownName { kind: "handshape", name: name.to_string() })?;
        let def = preset_def(shape);

        let mut target = self.presets[shape as usize];
        if let Some(second) = instr.second_handshape.as_deref() {
            let second = Handshape::from_name(second)
                .ok_or_else(|| SignError::UnknownName { kind: "handshape", name: second.to_string() })?;
            target = target.blend(&self.presets[second as usize], 0.5);
        }

        // ========================================
        // 特殊手指
        // ========================================
        let special = match instr.special_fingers.as_deref() {
            Some(code) => parse_digits(code)?,
            None => Vec::new(),
        };
        let special_thumb = special.contains(&Digit::Thumb);
        let special_fingers: Vec<Digit> = special.iter().copied().filter(|d| *d != Digit::Thumb).collect();

        let mut contact = match def.thumb {
            ThumbSpec::Contact { digit, site, gap } => Some((digit, site, gap)),
            ThumbSpec::Shape(_) => None,
        };
        let mut resolve_thumb = false;
        let mut bend_targets: Vec<Digit> = def.selected.to_vec();

        if !special_fingers.is_empty() {
            for digit in Digit::FINGERS {
                let chosen = special_fingers.contains(&digit);
                let pose = match def.rule {
                    SpecialRule::Extend => if chosen { EXTENDED } else { CURLED },
                    SpecialRule::Fold => if chosen { CURLED } else { EXTENDED },
                    SpecialRule::Pinch => if chosen { PINCHED } else { def.other_pose },
                    SpecialRule::Cee => if chosen { CUPPED } else { def.other_pose },
                };
                if let Some(f) = target.finger_mut(digit) {
                    f[1..].copy_from_slice(&pose[1..]);
                }
            }
            bend_targets = match def.rule {
                SpecialRule::Fold => Digit::FINGERS.into_iter().filter(|d| !special_fingers.contains(d)).collect(),
                _ => special_fingers.clone(),
            };
            if let (Some((_, site, gap)), Some(first)) = (contact, special_fingers.first()) {
                contact = Some((*first, site, gap));
                resolve_thumb = true;
            }
        }

        // ========================================
        // 弯曲与张开覆盖
        // ========================================
        if let Some(bend) = instr.main_bend.as_deref() {
            let bending = Bending::from_name(bend)
                .ok_or_else(|| SignError::UnknownName { kind: "bending", name: bend.to_string() })?;
            for digit in &bend_targets {
                if let Some(f) = target.finger_mut(*digit) {
                    f[1..].copy_from_slice(&bending.bends());
                }
            }
            if special_thumb {
                target.thumb = self.thumb_bendings[bending as usize];
            }
        }
        for digit in Digit::FINGERS {
            let number = digit.index() as u32 + 1;
            if let Some(code) = instr.bend_override(number) {
                let bends = parse_bend_code(code)?;
                if let Some(f) = target.finger_mut(digit) {
                    f[1..].copy_from_slice(&bends);
                }
            }
            if let Some(splay) = instr.splay_override(number) {
                if let Some(f) = target.finger_mut(digit) {
                    f[0] = splay;
                }
            }
        }

        // ========================================
        // 拇指
        // ========================================
        if let Some(ts) = instr.thumbshape.as_deref() {
            let ts = Thumbshape::from_name(ts)
                .ok_or_else(|| SignError::UnknownName { kind: "thumbshape", name: ts.to_string() })?;
            target.thumb = self.thumbshapes[ts as usize];
            resolve_thumb = false;
        }
        let short_chain = match instr.thumb_source.as_deref() {
            None => false,
            Some(s) if s.eq_ignore_ascii_case("TIP") => false,
            Some(s) if s.eq_ignore_ascii_case("PAD") => true,
            Some(s) => return Err(SignError::UnknownName { kind: "thumb source", name: s.to_string() }),
        };
        let thumb_goal = match instr.thumb_target.as_deref() {
            Some(anchor) => Some((anchor.to_string(), instr.thumb_distance.unwrap_or(0.0))),
            None if resolve_thumb => contact.map(|(digit, site, gap)| {
                (format!("{}_{}", digit.index() + 1, site), instr.thumb_distance.unwrap_or(gap))
            }),
            None => None,
        };
        if let Some((anchor, distance)) = thumb_goal {
            target.thumb = self.solve_thumb_to_anchor(skeleton, hand, &target, &anchor, distance, short_chain)?;
        }

        self.value.arm(target, timing, elapsed, instr.shift);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gesture::instruction::{GestureKind, HandSelector};
    use crate::skeleton::CanonicalJoints;
    use std::collections::HashMap;

    fn setup(side: Side) -> (BoneSet, HandGeometry, HandShapeSynth) {
        let mut skel = crate::test_rig::humanoid();
        let joints = CanonicalJoints::auto_detect(&skel);
        let config = GestureConfig::default();
        let hand = HandGeometry::new(&skel, &joints, side, config.finger_thickness, &HashMap::new()).unwrap();
        let synth = HandShapeSynth::new(&mut skel, &hand, &config).unwrap();
        (skel, hand, synth)
    }

    fn handshape(name: &str) -> GestureInstruction {
        GestureInstruction {
            handshape: Some(name.to_string()),
            ..GestureInstruction::new(GestureKind::Handshape, HandSelector::Right)
        }
    }

    fn timing() -> Timing {
        Timing::fill(Some(0.0), None, None, Some(1.0))
    }

    #[test]
    fn test_names_round_trip_through_tables() {
        assert_eq!(Handshape::from_name("finger_23_spread"), Some(Handshape::Finger23Spread));
        assert_eq!(Handshape::from_name("BANANA"), None);
        assert_eq!(Thumbshape::from_name("opposed"), Some(Thumbshape::Opposed));
        assert_eq!(Bending::from_name("DOUBLE_HOOKED").map(Bending::bends), Some([0.5, 1.0, 1.0]));
    }

    #[test]
    fn test_presets_precomputed() {
        let (skel, _, synth) = setup(Side::Right);
        let fist = synth.preset(Handshape::Fist);
        let flat = synth.preset(Handshape::Flat);
        assert_eq!(fist.fingers, [CURLED; 4]);
        assert_eq!(flat.fingers, [EXTENDED; 4]);
        let spread = synth.preset(Handshape::Finger23Spread);
        assert_eq!(spread.fingers[0][0], 1.0);
        assert_eq!(spread.fingers[2], CURLED);
        for info in &synth.presets {
            for q in info.thumb {
                assert!(q.is_normalized());
            }
        }
        // 预计算不改动骨骼
        let fresh = crate::test_rig::humanoid();
        for (a, b) in skel.bones().iter().zip(fresh.bones()) {
            assert!(a.local.rotation.abs_diff_eq(b.local.rotation, 1e-6));
        }
    }

    #[test]
    fn test_fist_curls_fingers_toward_palm() {
        let (mut skel, hand, synth) = setup(Side::Left);
        let wrist = skel.world_position(hand.hand);
        let tip = hand.fingers[1][3];
        let open = skel.world_position(tip).distance(wrist);

        synth.apply(&mut skel, &hand, synth.preset(Handshape::Fist));
        let closed = skel.world_position(tip);
        assert!(closed.distance(wrist) < open * 0.7);
        // 弯向掌心（T-pose 掌心朝下）
        assert!(closed.y < wrist.y);
    }

    #[test]
    fn test_thumb_ik_reaches_reachable_target() {
        let (mut skel, hand, synth) = setup(Side::Right);
        let t = hand.thumb;
        // 用合法的弯曲姿态生成目标
        skel.set_local_rotation(t[1], synth.bind_thumb[1] * Quat::from_axis_angle(synth.thumb_axes[1], 0.4));
        skel.set_local_rotation(t[2], synth.bind_thumb[2] * Quat::from_axis_angle(synth.thumb_axes[2], 0.3));
        let target = skel.world_position(t[3]);
        skel.reset_to_bind();

        let residual = synth.thumb_ik(&mut skel, &hand, target, false, Some(0.5));
        assert!(residual < 1e-3, "residual = {residual}");
        assert!(skel.world_position(t[3]).distance(target) < 1e-3);
    }

    #[test]
    fn test_thumb_ik_unreachable_extends_toward_target() {
        let (mut skel, hand, synth) = setup(Side::Left);
        let base = skel.world_position(hand.thumb[0]);
        let dir = Vec3::new(0.3, -0.2, 1.0).normalize();
        let target = base + dir * 2.0;
        let residual = synth.thumb_ik(&mut skel, &hand, target, false, None);
        assert!(residual > 1.5);
        let reach = (skel.world_position(hand.thumb[3]) - skel.world_position(hand.thumb[0])).normalize();
        assert!(reach.dot(dir) > 0.99);
    }

    #[test]
    fn test_new_gesture_with_overrides() {
        let (mut skel, hand, mut synth) = setup(Side::Right);
        let mut instr = handshape("FIST");
        instr.special_fingers = Some("2".to_string());
        instr.bend3 = Some("990".to_string());
        instr.splay5 = Some(0.5);
        synth.new_gesture(&mut skel, &hand, &instr, timing(), 0.0).unwrap();

        let tgt = synth.value().tgt;
        assert_eq!(tgt.fingers[0], EXTENDED);
        assert_eq!(tgt.fingers[1], [0.0, 1.0, 1.0, 0.0]);
        assert_eq!(tgt.fingers[2], CURLED);
        assert_eq!(tgt.fingers[3][0], 0.5);
        assert!(synth.value().is_transitioning());
    }

    #[test]
    fn test_main_bend_applies_to_selected_fingers() {
        let (mut skel, hand, mut synth) = setup(Side::Right);
        let mut instr = handshape("FINGER_23");
        instr.main_bend = Some("HOOKED".to_string());
        synth.new_gesture(&mut skel, &hand, &instr, timing(), 0.0).unwrap();
        let tgt = synth.value().tgt;
        assert_eq!(tgt.fingers[0], [0.0, 0.0, 1.0, 1.0]);
        assert_eq!(tgt.fingers[1], [0.0, 0.0, 1.0, 1.0]);
        assert_eq!(tgt.fingers[3], CURLED);
    }

    #[test]
    fn test_second_handshape_blends_midway() {
        let (mut skel, hand, mut synth) = setup(Side::Right);
        let mut instr = handshape("FIST");
        instr.second_handshape = Some("FLAT".to_string());
        synth.new_gesture(&mut skel, &hand, &instr, timing(), 0.0).unwrap();
        assert_eq!(synth.value().tgt.fingers[2], [0.0, 0.5, 0.5, 0.4]);
    }

    #[test]
    fn test_invalid_instructions_leave_timeline_alone() {
        let (mut skel, hand, mut synth) = setup(Side::Right);
        let before = synth.value().cur;
        for instr in [
            handshape("BANANA"),
            GestureInstruction { main_bend: Some("WIGGLY".to_string()), ..handshape("FLAT") },
            GestureInstruction { bend2: Some("9x".to_string()), ..handshape("FLAT") },
            GestureInstruction { thumb_target: Some("7_TIP".to_string()), ..handshape("FLAT") },
        ] {
            assert!(synth.new_gesture(&mut skel, &hand, &instr, timing(), 0.0).is_err());
            assert!(!synth.value().is_transitioning());
            assert_eq!(synth.value().cur, before);
        }
        let err = synth.new_gesture(&mut skel, &hand, &handshape("BANANA"), timing(), 0.0).unwrap_err();
        assert!(matches!(err, SignError::UnknownName { kind: "handshape", .. }));
    }

    #[test]
    fn test_finger_play_clamped() {
        let (_, _, synth) = setup(Side::Right);
        let info = synth.current(Some([2.0, -2.0, 0.0, 0.1]));
        assert_eq!(info.fingers[0][1..], [1.0, 1.0, 1.0]);
        assert_eq!(info.fingers[1][1..], [-0.2, -0.2, -0.2]);
        assert_eq!(info.fingers[2], RELAXED);
        assert!((info.fingers[3][3] - 0.15).abs() < 1e-6);
    }

    #[test]
    fn test_explicit_thumb_target_moves_thumb_to_anchor() {
        let (mut skel, hand, mut synth) = setup(Side::Left);
        let mut instr = handshape("FLAT");
        instr.thumb_target = Some("2_BASE".to_string());
        instr.thumb_distance = Some(0.0);
        synth.new_gesture(&mut skel, &hand, &instr, timing(), 0.0).unwrap();
        let before = skel.save_pose();

        // 直接把目标手形写入骨骼，拇指尖应比默认姿态更接近锚点
        let goal = hand.anchor_world(&skel, "2_BASE").unwrap();
        let tip = hand.thumb[3];
        let rest_distance = skel.world_position(tip).distance(goal);
        synth.apply(&mut skel, &hand, &synth.value().tgt);
        assert!(skel.world_position(tip).distance(goal) < rest_distance);
        skel.restore_pose(&before);
    }
}
