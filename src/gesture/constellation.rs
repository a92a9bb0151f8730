//! 双手接触（Hand Constellation）
//!
//! 源手上的接触点向目标手上的接触点靠拢，两点间保留 distance·臂长 的间隔
//! （沿目标点法线方向）。BOTH 时两手各走一半，否则只移动源手。
//! 接触点可写成 "A+B"，取两个锚点的中点。

use glam::Vec3;

use crate::skeleton::{BoneSet, Side};
use crate::{Result, SignError};
use super::anchor::{Anchor, HandGeometry};
use super::instruction::{GestureInstruction, HandSelector};
use super::timeline::{Phase, PhaseTimeline, Timing};

/// 一个接触点：同一只手上的一个或两个锚点
#[derive(Clone, Debug, PartialEq)]
pub struct ContactPoint {
    pub side: Side,
    anchors: Vec<Anchor>,
}

impl ContactPoint {
    pub fn parse(spec: &str, hand: &HandGeometry) -> Result<Self> {
        let anchors = spec
            .split('+')
            .map(|name| {
                hand.anchor(name)
                    .copied()
                    .ok_or_else(|| SignError::UnknownName { kind: "hand location", name: name.trim().to_string() })
            })
            .collect::<Result<Vec<_>>>()?;
        if anchors.is_empty() || anchors.len() > 2 {
            return Err(SignError::InvalidInstruction(format!("contact '{spec}' must name one or two anchors")));
        }
        Ok(Self { side: hand.side, anchors })
    }

    pub fn world_position(&self, skeleton: &BoneSet) -> Vec3 {
        let sum: Vec3 = self.anchors.iter().map(|a| a.world_position(skeleton)).sum();
        sum / self.anchors.len() as f32
    }

    /// 平均法线，锚点都没有法线时为 None
    pub fn world_normal(&self, skeleton: &BoneSet) -> Option<Vec3> {
        let sum: Vec3 = self.anchors.iter().filter_map(|a| a.world_normal(skeleton)).sum();
        sum.try_normalize()
    }
}

#[derive(Clone, Debug)]
struct Contact {
    src: ContactPoint,
    dst: ContactPoint,
    /// 以左 / 右手索引：该手是否移动
    moving: [bool; 2],
    separation: f32,
    keep_updating: bool,
    shift: bool,
    timeline: PhaseTimeline,
    /// 越过 attack_peak 时的完整偏移
    peak: Option<[Vec3; 2]>,
}

/// 双手接触求解器
#[derive(Clone, Debug, Default)]
pub struct HandConstellation {
    contact: Option<Contact>,
    current: [Vec3; 2],
}

impl HandConstellation {
    pub fn new() -> Self {
        Self::default()
    }

    /// 解析接触指令
    ///
    /// `hands` 按 [`Side::index`] 排列；`arm_length` 为两臂平均长度。
    /// 源接触点在所选手（BOTH 时为主手）上，目标接触点总在另一只手上：
    /// 同一只手上的两个锚点随手臂一起平移，无法靠手臂位移靠拢，由手形指令处理。
    pub fn new_gesture(
        &mut self,
        instr: &GestureInstruction,
        hands: [&HandGeometry; 2],
        dominant: Side,
        arm_length: f32,
        timing: Timing,
        elapsed: f32,
    ) -> Result<()> {
        let (src_side, both) = match instr.hand {
            HandSelector::Both => (dominant, true),
            selector => {
                let sides = selector.resolve(dominant);
                (sides.first().copied().unwrap_or(dominant), false)
            }
        };
        let dst_side = src_side.opposite();
        let spec = |field: Option<&str>, what: &str| -> Result<String> {
            field
                .map(str::to_string)
                .ok_or_else(|| SignError::InvalidInstruction(format!("hand constellation without {what}")))
        };
        let src = ContactPoint::parse(&spec(instr.src_contact.as_deref(), "srcContact")?, hands[src_side.index()])?;
        let dst = ContactPoint::parse(&spec(instr.dst_contact.as_deref(), "dstContact")?, hands[dst_side.index()])?;

        let mut moving = [false; 2];
        moving[src_side.index()] = true;
        moving[dst_side.index()] = both;

        self.contact = Some(Contact {
            src,
            dst,
            moving,
            separation: instr.distance.unwrap_or(0.0) * arm_length,
            keep_updating: instr.keep_updating_contact,
            shift: instr.shift,
            timeline: PhaseTimeline::armed(timing, elapsed),
            peak: None,
        });
        Ok(())
    }

    /// 接触是否仍需每帧求解
    pub fn is_active(&self) -> bool {
        self.contact.as_ref().is_some_and(|c| c.timeline.transition || c.shift)
    }

    /// 某只手是否被接触约束移动
    pub fn moves(&self, side: Side) -> bool {
        self.is_active() && self.contact.as_ref().is_some_and(|c| c.moving[side.index()])
    }

    pub fn update(&mut self, dt: f32) {
        if let Some(contact) = &mut self.contact {
            contact.timeline.advance(dt);
        }
    }

    /// 由当前（未加接触偏移的）锚点位置求两手偏移
    pub fn resolve(&mut self, skeleton: &BoneSet) {
        self.current = [Vec3::ZERO; 2];
        if !self.is_active() {
            return;
        }
        let Some(contact) = &mut self.contact else {
            return;
        };

        let full = if let (Some(peak), false) = (contact.peak, contact.keep_updating) {
            peak
        } else {
            let src = contact.src.world_position(skeleton);
            let dst = contact.dst.world_position(skeleton);
            let normal = contact
                .dst
                .world_normal(skeleton)
                .or_else(|| (src - dst).try_normalize())
                .unwrap_or(Vec3::ZERO);
            let gap = dst + normal * contact.separation - src;

            let mut full = [Vec3::ZERO; 2];
            let (s, d) = (contact.src.side.index(), contact.dst.side.index());
            if contact.moving[d] {
                full[s] = gap * 0.5;
                full[d] = -gap * 0.5;
            } else {
                full[s] = gap;
            }
            if contact.timeline.past_peak() && contact.peak.is_none() {
                contact.peak = Some(full);
            }
            full
        };

        let envelope = match contact.timeline.phase() {
            Phase::Hold => 0.0,
            Phase::Attack(t) => t,
            Phase::Peak => 1.0,
            Phase::Relax(_) | Phase::Done if contact.shift => 1.0,
            Phase::Relax(t) => 1.0 - t,
            Phase::Done => 0.0,
        };
        for side in Side::BOTH {
            let i = side.index();
            if contact.moving[i] {
                self.current[i] = full[i] * envelope;
            }
        }
    }

    /// 本帧某只手的偏移
    #[inline]
    pub fn offset(&self, side: Side) -> Vec3 {
        self.current[side.index()]
    }

    /// 取消某只手的接触（该手收到新的位置指令时）
    pub fn cancel_arm(&mut self, side: Side) {
        self.current[side.index()] = Vec3::ZERO;
        let idle = match &mut self.contact {
            Some(contact) => {
                contact.moving[side.index()] = false;
                !contact.moving.iter().any(|m| *m)
            }
            None => false,
        };
        if idle {
            self.contact = None;
        }
    }
}
