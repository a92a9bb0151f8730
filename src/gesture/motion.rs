//! 动作叠加
//!
//! 叠加在手位置 / 手腕旋转 / 手指弯曲之上的短时动作，
//! 强度由包络控制：attack 段上升到 1，peak 保持，relax 段回落到 0。

use std::f32::consts::{FRAC_PI_2, TAU};

use glam::{Quat, Vec3};

use crate::{Result, SignError};
use super::config::GestureConfig;
use super::instruction::{direction_from_code, GestureInstruction, Symmetry};
use super::timeline::{s_curve, Phase, PhaseTimeline, Timing};

/// 直线动作默认位移（臂长的比例）
const DIRECTED_DISTANCE: f32 = 0.1;
/// 圆弧动作默认半径（臂长的比例）
const CIRCLE_RADIUS: f32 = 0.06;
const WRIST_SPEED: f32 = 3.0;
const WRIST_INTENSITY: f32 = 0.35;
const FINGERPLAY_SPEED: f32 = 4.0;
const FINGERPLAY_INTENSITY: f32 = 0.4;

fn required<'a>(field: Option<&'a str>, motion: &str, what: &str) -> Result<&'a str> {
    field.ok_or_else(|| SignError::InvalidInstruction(format!("{motion} motion without {what}")))
}

/// 腕部动作方式
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WristMode {
    /// 上下点（绕拇指侧轴）
    Nod,
    /// 左右摆（绕掌心法线）
    Swing,
    /// 绕手指方向扭转
    Twist,
    /// 点与摆错相叠加，手画圈
    Stir,
}

impl WristMode {
    pub fn from_name(name: &str) -> Option<Self> {
        match name.trim().to_ascii_uppercase().as_str() {
            "NOD" => Some(WristMode::Nod),
            "SWING" => Some(WristMode::Swing),
            "TWIST" => Some(WristMode::Twist),
            "STIR" => Some(WristMode::Stir),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum MotionKind {
    /// 沿方向平移（骨骼空间，已乘臂长）
    Directed { offset: Vec3 },
    /// 绕 axis 的圆弧；`spoke` 为起始角处的半径方向
    Circular { axis: Vec3, spoke: Vec3, radius: f32, sweep: f32 },
    Wrist { mode: WristMode, frequency: f32, amplitude: f32 },
    FingerPlay { frequency: f32, amplitude: f32 },
}

/// 一个正在进行的动作
#[derive(Clone, Debug)]
pub struct MotionOverlay {
    kind: MotionKind,
    symmetry: Symmetry,
    left: Vec3,
    forward: Vec3,
    timeline: PhaseTimeline,
}

impl MotionOverlay {
    /// 解析动作指令
    pub fn from_instruction(
        instr: &GestureInstruction,
        symmetry: Symmetry,
        config: &GestureConfig,
        arm_length: f32,
        timing: Timing,
        elapsed: f32,
    ) -> Result<Self> {
        let left = config.left_axis();
        let forward = config.forward_axis();
        let name = instr
            .motion
            .as_deref()
            .ok_or_else(|| SignError::InvalidInstruction("motion instruction without motion".to_string()))?;

        let kind = match name.trim().to_ascii_uppercase().as_str() {
            "DIRECTED" => {
                let dir = direction_from_code(required(instr.direction.as_deref(), name, "direction")?, left, forward)?;
                let distance = instr.distance.unwrap_or(DIRECTED_DISTANCE);
                MotionKind::Directed { offset: dir * distance * arm_length }
            }
            "CIRCULAR" => {
                let axis = direction_from_code(required(instr.axis.as_deref(), name, "axis")?, left, forward)?;
                // 起始半径方向：给定方向或向上，投影到圆所在平面
                let hint = match instr.direction.as_deref() {
                    Some(d) => direction_from_code(d, left, forward)?,
                    None => Vec3::Y,
                };
                let spoke = (hint - axis * hint.dot(axis))
                    .try_normalize()
                    .or_else(|| (forward - axis * forward.dot(axis)).try_normalize())
                    .unwrap_or_else(|| axis.any_orthonormal_vector());
                let start = instr.start_angle.unwrap_or(0.0).to_radians();
                let end = instr.end_angle.unwrap_or(360.0).to_radians();
                MotionKind::Circular {
                    axis,
                    spoke: Quat::from_axis_angle(axis, start) * spoke,
                    radius: instr.distance.unwrap_or(CIRCLE_RADIUS) * arm_length,
                    sweep: end - start,
                }
            }
            "WRIST" => {
                let mode = required(instr.mode.as_deref(), name, "mode")?;
                let mode = WristMode::from_name(mode)
                    .ok_or_else(|| SignError::UnknownName { kind: "wrist motion", name: mode.to_string() })?;
                MotionKind::Wrist {
                    mode,
                    frequency: instr.speed.unwrap_or(WRIST_SPEED),
                    amplitude: instr.intensity.unwrap_or(WRIST_INTENSITY),
                }
            }
            "FINGERPLAY" => MotionKind::FingerPlay {
                frequency: instr.speed.unwrap_or(FINGERPLAY_SPEED),
                amplitude: instr.intensity.unwrap_or(FINGERPLAY_INTENSITY),
            },
            _ => return Err(SignError::UnknownName { kind: "motion", name: name.to_string() }),
        };

        Ok(Self {
            kind,
            symmetry,
            left,
            forward,
            timeline: PhaseTimeline::armed(timing, elapsed),
        })
    }

    pub fn kind(&self) -> &MotionKind {
        &self.kind
    }

    pub fn update(&mut self, dt: f32) {
        self.timeline.advance(dt);
    }

    /// 包络结束后可以丢弃
    #[inline]
    pub fn is_finished(&self) -> bool {
        !self.timeline.transition
    }

    /// 包络强度 [0, 1]
    pub fn envelope(&self) -> f32 {
        match self.timeline.phase() {
            Phase::Hold | Phase::Done => 0.0,
            Phase::Attack(t) => t,
            Phase::Peak => 1.0,
            Phase::Relax(t) => 1.0 - t,
        }
    }

    /// 振荡相位（弧度），从 start 起算
    fn oscillation(&self, frequency: f32) -> f32 {
        (self.timeline.time - self.timing().start).max(0.0) * frequency * TAU
    }

    #[inline]
    fn timing(&self) -> &Timing {
        &self.timeline.timing
    }

    /// 手位置偏移（骨骼空间）
    pub fn position_offset(&self) -> Vec3 {
        let offset = match self.kind {
            MotionKind::Directed { offset } => offset * self.envelope(),
            MotionKind::Circular { axis, spoke, radius, sweep } => {
                // 圆弧在 start..relax 内走完，relax 段回到原位
                let t = self.timing();
                let progress = match self.timeline.phase() {
                    Phase::Hold => 0.0,
                    Phase::Relax(_) | Phase::Done => 1.0,
                    _ if t.relax - t.start <= f32::EPSILON => 1.0,
                    _ => s_curve((self.timeline.time - t.start) / (t.relax - t.start)),
                };
                let fade = match self.timeline.phase() {
                    Phase::Relax(k) => 1.0 - k,
                    Phase::Done => 0.0,
                    _ => 1.0,
                };
                let swept = Quat::from_axis_angle(axis, sweep * progress) * spoke;
                (swept - spoke) * radius * fade
            }
            _ => return Vec3::ZERO,
        };
        self.symmetry.mirror_vector(offset, self.left, self.forward)
    }

    /// 手腕附加旋转（世界空间）
    ///
    /// `axes` 为手当前的 (手指方向, 掌心, 拇指侧)。
    pub fn wrist_delta(&self, axes: (Vec3, Vec3, Vec3)) -> Quat {
        let MotionKind::Wrist { mode, frequency, amplitude } = self.kind else {
            return Quat::IDENTITY;
        };
        let (finger, normal, radial) = axes;
        let phase = self.oscillation(frequency);
        let amp = amplitude * self.envelope();
        // 奇数次镜像时旋转方向相反
        let mirror = if self.symmetry.flips() % 2 == 1 { -1.0 } else { 1.0 };
        match mode {
            WristMode::Nod => Quat::from_axis_angle(radial, amp * phase.sin()),
            WristMode::Swing => Quat::from_axis_angle(normal, mirror * amp * phase.sin()),
            WristMode::Twist => Quat::from_axis_angle(finger, mirror * amp * phase.sin()),
            WristMode::Stir => {
                Quat::from_axis_angle(normal, mirror * amp * phase.cos()) * Quat::from_axis_angle(radial, amp * phase.sin())
            }
        }
    }

    /// 四指弯曲增量（食指 -> 小指，相位依次错开 90°）
    pub fn finger_play(&self) -> Option<[f32; 4]> {
        let MotionKind::FingerPlay { frequency, amplitude } = self.kind else {
            return None;
        };
        let phase = self.oscillation(frequency);
        let amp = amplitude * self.envelope();
        Some(std::array::from_fn(|k| amp * (0.5 - 0.5 * (phase + k as f32 * FRAC_PI_2).cos())))
    }
}

/// 多个动作叠加后的结果
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct MotionSum {
    pub offset: Vec3,
    pub wrist: Quat,
    pub finger_play: Option<[f32; 4]>,
}

impl MotionSum {
    pub fn of(overlays: &[MotionOverlay], axes: (Vec3, Vec3, Vec3)) -> Self {
        let mut sum = Self { offset: Vec3::ZERO, wrist: Quat::IDENTITY, finger_play: None };
        for overlay in overlays {
            sum.offset += overlay.position_offset();
            sum.wrist = overlay.wrist_delta(axes) * sum.wrist;
            if let Some(play) = overlay.finger_play() {
                let acc = sum.finger_play.get_or_insert([0.0; 4]);
                for (a, p) in acc.iter_mut().zip(play) {
                    *a += p;
                }
            }
        }
        sum.wrist = sum.wrist.normalize();
        sum
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gesture::instruction::{GestureKind, HandSelector};

    fn motion(name: &str) -> GestureInstruction {
        GestureInstruction {
            motion: Some(name.to_string()),
            ..GestureInstruction::new(GestureKind::Motion, HandSelector::Right)
        }
    }

    fn timing() -> Timing {
        Timing { start: 0.0, attack_peak: 1.0, relax: 2.0, end: 3.0 }
    }

    fn advance(overlay: &mut MotionOverlay, time: f32) {
        overlay.update(time - overlay.timeline.time);
    }

    #[test]
    fn test_directed_envelope() {
        let config = GestureConfig::default();
        let mut instr = motion("directed");
        instr.direction = Some("o".to_string());
        instr.distance = Some(0.2);
        let mut m = MotionOverlay::from_instruction(&instr, Symmetry::NONE, &config, 0.5, timing(), 0.0).unwrap();
        assert_eq!(m.position_offset(), Vec3::ZERO);
        advance(&mut m, 1.5);
        assert!(m.position_offset().abs_diff_eq(Vec3::new(0.0, 0.0, 0.1), 1e-6));
        advance(&mut m, 3.5);
        assert!(m.is_finished());
        assert_eq!(m.position_offset(), Vec3::ZERO);
    }

    #[test]
    fn test_directed_mirrored() {
        let config = GestureConfig::default();
        let mut instr = motion("DIRECTED");
        instr.direction = Some("l".to_string());
        let sym = Symmetry { lr: true, ..Symmetry::NONE };
        let mut m = MotionOverlay::from_instruction(&instr, sym, &config, 1.0, timing(), 0.0).unwrap();
        advance(&mut m, 1.5);
        assert!(m.position_offset().abs_diff_eq(Vec3::new(-0.1, 0.0, 0.0), 1e-6));
    }

    #[test]
    fn test_circular_arc() {
        let config = GestureConfig::default();
        let mut instr = motion("circular");
        instr.axis = Some("o".to_string());
        instr.distance = Some(0.1);
        instr.end_angle = Some(180.0);
        let mut m = MotionOverlay::from_instruction(&instr, Symmetry::NONE, &config, 1.0, timing(), 0.0).unwrap();
        assert!(m.position_offset().length() < 1e-6);
        // 半圈走完：从圆顶到圆底
        advance(&mut m, 2.0);
        assert!(m.position_offset().abs_diff_eq(Vec3::new(0.0, -0.2, 0.0), 1e-5));
        advance(&mut m, 3.0);
        assert!(m.position_offset().length() < 1e-6);
    }

    #[test]
    fn test_wrist_and_finger_play() {
        let config = GestureConfig::default();
        let axes = (Vec3::Z, -Vec3::X, Vec3::Y);
        let mut instr = motion("wrist");
        instr.mode = Some("twist".to_string());
        instr.speed = Some(0.25);
        let mut m = MotionOverlay::from_instruction(&instr, Symmetry::NONE, &config, 1.0, timing(), 0.0).unwrap();
        advance(&mut m, 1.0);
        // 相位 π/2，振幅取默认
        let q = m.wrist_delta(axes);
        let (axis, angle) = q.to_axis_angle();
        assert!((angle - WRIST_INTENSITY).abs() < 1e-4);
        assert!(axis.abs_diff_eq(Vec3::Z, 1e-4));
        assert!(m.finger_play().is_none());

        let mut instr = motion("fingerplay");
        instr.speed = Some(0.5);
        let mut m = MotionOverlay::from_instruction(&instr, Symmetry::NONE, &config, 1.0, timing(), 0.0).unwrap();
        advance(&mut m, 1.0);
        let play = m.finger_play().unwrap();
        assert!((play[0] - FINGERPLAY_INTENSITY).abs() < 1e-5);
        assert!((play[1] - FINGERPLAY_INTENSITY * 0.5).abs() < 1e-5);

        let sum = MotionSum::of(&[m], axes);
        assert_eq!(sum.offset, Vec3::ZERO);
        assert!(sum.finger_play.is_some());
    }

    #[test]
    fn test_unknown_motion() {
        let config = GestureConfig::default();
        let instr = motion("wobble");
        assert!(matches!(
            MotionOverlay::from_instruction(&instr, Symmetry::NONE, &config, 1.0, timing(), 0.0),
            Err(SignError::UnknownName { kind: "motion", .. })
        ));
        let mut instr = motion("wrist");
        instr.mode = Some("flap".to_string());
        assert!(MotionOverlay::from_instruction(&instr, Symmetry::NONE, &config, 1.0, timing(), 0.0).is_err());
    }
}
