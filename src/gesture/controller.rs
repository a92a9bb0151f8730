//! 身体手势控制器
//!
//! 接收指令、按时钟调度，并在每帧按固定顺序驱动两条手臂：
//!
//! ```text
//! 1. 肩 / 上臂 / 前臂恢复绑定
//! 2. 手形写入手指（含手指动作）
//! 3. 求手腕目标旋转
//! 4. 记下该旋转（IK 会转动父骨骼）
//! 5. 汇总动作叠加偏移
//! 6. 有双手接触时：不加美学的试探 IK，读取锚点，求接触偏移
//! 7. 带美学的最终 IK（位置 + 动作 + 接触）
//! 8. 恢复手腕世界旋转，前臂分担扭转
//! ```

use glam::Vec3;

use crate::skeleton::{ArmChain, BoneSet, CanonicalJoints, Side};
use crate::{Result, SignError};
use super::anchor::BodyLocations;
use super::arm::{ArmController, ArmModules};
use super::config::{AvatarConfig, GestureConfig};
use super::constellation::HandConstellation;
use super::instruction::{GestureInstruction, GestureKind};
use super::timeline::Timing;

/// 等待调度的指令
#[derive(Clone, Debug)]
struct PendingGesture {
    instr: GestureInstruction,
    timing: Timing,
    /// 发出时的控制器时钟
    issue: f32,
}

impl PendingGesture {
    #[inline]
    fn due_at(&self) -> f32 {
        self.issue + self.timing.start
    }
}

/// 双臂手势控制器
#[derive(Clone, Debug)]
pub struct BodyController {
    config: GestureConfig,
    body: BodyLocations,
    /// 按 [`Side::index`] 排列
    arms: [ArmController; 2],
    constellation: HandConstellation,
    clock: f32,
    pending: Vec<PendingGesture>,
}

impl BodyController {
    /// 骨骼先恢复到绑定姿态，再预计算各模块的查找表
    pub fn new(skeleton: &mut BoneSet, avatar: &AvatarConfig, config: GestureConfig) -> Result<Self> {
        skeleton.reset_to_bind();
        let joints = if avatar.bone_map.is_empty() {
            CanonicalJoints::auto_detect(skeleton)
        } else {
            CanonicalJoints::from_name_map(skeleton, &avatar.bone_map)
        };

        let arm_length = (ArmChain::new(skeleton, &joints, Side::Left)?.length()
            + ArmChain::new(skeleton, &joints, Side::Right)?.length())
            * 0.5;
        let body = BodyLocations::new(skeleton, &joints, config.forward_axis(), arm_length, &avatar.body_locations);
        let left = ArmController::new(skeleton, &joints, Side::Left, avatar, &body, &config)?;
        let right = ArmController::new(skeleton, &joints, Side::Right, avatar, &body, &config)?;

        log::info!(
            "[Gesture] 控制器就绪: 惯用手 {}, 臂长 {:.3}, 身体部位 {} 个",
            config.dominant_hand.name(),
            arm_length,
            body.names().count()
        );

        Ok(Self {
            config,
            body,
            arms: [left, right],
            constellation: HandConstellation::new(),
            clock: 0.0,
            pending: Vec::new(),
        })
    }

    pub fn config(&self) -> &GestureConfig {
        &self.config
    }

    pub fn body_locations(&self) -> &BodyLocations {
        &self.body
    }

    pub fn arm(&self, side: Side) -> &ArmController {
        &self.arms[side.index()]
    }

    pub fn constellation(&self) -> &HandConstellation {
        &self.constellation
    }

    /// 控制器时钟（秒）
    #[inline]
    pub fn clock(&self) -> f32 {
        self.clock
    }

    /// 尚未调度的指令数
    #[inline]
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// 两臂平均长度
    pub fn arm_length(&self) -> f32 {
        (self.arms[0].chain().length() + self.arms[1].chain().length()) * 0.5
    }

    /// 某只手上锚点的当前世界位置
    pub fn hand_anchor_world(&self, skeleton: &BoneSet, side: Side, name: &str) -> Option<Vec3> {
        self.arms[side.index()].hand().anchor_world(skeleton, name)
    }

    // ========================================
    // 指令
    // ========================================

    /// 排队一条指令，时间相对当前时钟
    ///
    /// 只做格式校验；名称解析在调度时进行，失败记录警告。
    pub fn new_gesture(&mut self, instr: GestureInstruction) -> Result<()> {
        instr.kind()?;
        let timing = instr.timing()?;
        if self.config.debug_log {
            log::debug!("[Gesture] 排队 {:?} ({:?}) @ {:.3}s", instr.kind, instr.hand, self.clock);
        }
        self.pending.push(PendingGesture { instr, timing, issue: self.clock });
        Ok(())
    }

    /// 立即装载一条指令（从 elapsed = 0 开始）
    pub fn apply_gesture(&mut self, skeleton: &mut BoneSet, instr: &GestureInstruction) -> Result<ArmModules> {
        self.dispatch(skeleton, instr, 0.0)
    }

    fn dispatch(&mut self, skeleton: &mut BoneSet, instr: &GestureInstruction, elapsed: f32) -> Result<ArmModules> {
        let kind = instr.kind()?;
        let timing = instr.timing()?;
        let dominant = self.config.dominant_hand;

        if kind == GestureKind::HandConstellation {
            let hands = [self.arms[0].hand(), self.arms[1].hand()];
            let arm_length = self.arm_length();
            self.constellation.new_gesture(instr, hands, dominant, arm_length, timing, elapsed)?;
            return Ok(ArmModules::CONSTELLATION);
        }

        // 一只手失败不影响另一只
        let mut modules = ArmModules::empty();
        let mut first_error: Option<SignError> = None;
        for side in instr.hand.resolve(dominant) {
            let symmetry = instr.symmetry_for(side, dominant);
            let arm = &mut self.arms[side.index()];
            match arm.new_gesture(skeleton, &self.body, instr, symmetry, &self.config, timing, elapsed) {
                Ok(loaded) => {
                    if loaded.contains(ArmModules::LOCATION) {
                        self.constellation.cancel_arm(side);
                    }
                    modules |= loaded;
                }
                Err(e) => {
                    log::warn!("[Gesture] {}手拒绝 {:?} 指令: {}", side.name(), kind, e);
                    first_error.get_or_insert(e);
                }
            }
        }

        match first_error {
            Some(e) if modules.is_empty() => Err(e),
            _ => {
                if self.config.debug_log {
                    log::debug!("[Gesture] 装载 {:?} -> {:?} (elapsed {:.3}s)", kind, modules, elapsed);
                }
                Ok(modules)
            }
        }
    }

    // ========================================
    // 每帧
    // ========================================

    /// 推进 dt 并写入骨骼
    pub fn update(&mut self, skeleton: &mut BoneSet, dt: f32) {
        let before = self.clock;
        self.clock += dt;

        // 到期的指令按到期时间依次装载
        let (mut due, rest): (Vec<_>, Vec<_>) =
            std::mem::take(&mut self.pending).into_iter().partition(|p| before >= p.due_at());
        self.pending = rest;
        due.sort_by(|a, b| a.due_at().total_cmp(&b.due_at()));
        for pending in due {
            if let Err(e) = self.dispatch(skeleton, &pending.instr, before - pending.issue) {
                log::warn!("[Gesture] 指令被拒绝: {}", e);
            }
        }

        for arm in &mut self.arms {
            arm.update(skeleton, dt);
        }

        self.constellation.update(dt);
        if self.constellation.is_active() {
            for arm in &mut self.arms {
                arm.reach(skeleton, Vec3::ZERO, false);
            }
        }
        self.constellation.resolve(skeleton);

        for arm in &mut self.arms {
            let offset = self.constellation.offset(arm.side());
            arm.reach(skeleton, offset, true);
            arm.distribute_twist(skeleton);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gesture::handshape::Handshape;
    use crate::gesture::instruction::HandSelector;

    fn setup() -> (BoneSet, BodyController) {
        crate::test_rig::init_logger();
        let mut skel = crate::test_rig::humanoid();
        let controller = BodyController::new(&mut skel, &AvatarConfig::default(), GestureConfig::default()).unwrap();
        (skel, controller)
    }

    fn handshape(hand: HandSelector, name: &str, start: f32, end: f32) -> GestureInstruction {
        GestureInstruction {
            handshape: Some(name.to_string()),
            ..GestureInstruction::new(GestureKind::Handshape, hand).with_timing(start, end)
        }
    }

    #[test]
    fn test_rearm_from_live_pose() {
        let (mut skel, mut controller) = setup();
        controller.new_gesture(handshape(HandSelector::Right, "FIST", 0.0, 1.0)).unwrap();
        controller.new_gesture(handshape(HandSelector::Right, "FLAT", 0.5, 1.5)).unwrap();
        assert_eq!(controller.pending_count(), 2);

        controller.update(&mut skel, 0.25);
        controller.update(&mut skel, 0.25);
        assert_eq!(controller.pending_count(), 1);
        controller.update(&mut skel, 0.1);
        assert_eq!(controller.pending_count(), 0);

        let synth = controller.arm(Side::Right).handshape();
        let fist = *synth.preset(Handshape::Fist);
        let flat = *synth.preset(Handshape::Flat);
        let value = synth.value();
        assert_eq!(value.src, fist);
        assert_eq!(value.tgt, flat);
        // 已经在向 FLAT 过渡，而不是从 FIST 的起点重来
        let bend = value.cur.fingers[1][1];
        assert!(bend > flat.fingers[1][1] && bend < fist.fingers[1][1], "bend = {bend}");
    }

    #[test]
    fn test_both_hands_with_lr_symmetry() {
        let (mut skel, mut controller) = setup();
        let mut instr = GestureInstruction::new(GestureKind::Extfidir, HandSelector::Both);
        instr.extfidir = Some("l".to_string());
        instr.lr_sym = true;
        let modules = controller.apply_gesture(&mut skel, &instr).unwrap();
        assert_eq!(modules, ArmModules::WRIST);
        assert_eq!(controller.arm(Side::Right).wrist().extfidir().tgt, Vec3::X);
        assert_eq!(controller.arm(Side::Left).wrist().extfidir().tgt, -Vec3::X);
    }

    #[test]
    fn test_shift_persists_between_gestures() {
        let (mut skel, mut controller) = setup();
        let mut instr = GestureInstruction::new(GestureKind::Extfidir, HandSelector::Right).with_timing(0.0, 1.0);
        instr.extfidir = Some("u".to_string());
        instr.shift = true;
        controller.new_gesture(instr).unwrap();
        controller.update(&mut skel, 0.5);
        controller.update(&mut skel, 1.0);
        let wrist = controller.arm(Side::Right).wrist();
        assert!(!wrist.is_transitioning());
        assert_eq!(wrist.extfidir().cur, Vec3::Y);

        let mut instr = GestureInstruction::new(GestureKind::Extfidir, HandSelector::Right).with_timing(0.5, 1.5);
        instr.extfidir = Some("d".to_string());
        controller.apply_gesture(&mut skel, &instr).unwrap();
        let extfidir = controller.arm(Side::Right).wrist().extfidir();
        assert_eq!(extfidir.sample(0.25), Vec3::Y);
        assert_eq!(extfidir.def, Vec3::Y);
    }

    #[test]
    fn test_contact_meets_at_attack_peak() {
        let (mut skel, mut controller) = setup();
        let mut instr = GestureInstruction::new(GestureKind::HandConstellation, HandSelector::Both).with_timing(0.0, 1.0);
        instr.src_contact = Some("2_TIP".to_string());
        instr.dst_contact = Some("2_TIP".to_string());
        instr.distance = Some(0.0);
        controller.new_gesture(instr).unwrap();
        controller.update(&mut skel, 0.25);

        assert!(controller.constellation().is_active());
        let left = controller.hand_anchor_world(&skel, Side::Left, "2_TIP").unwrap();
        let right = controller.hand_anchor_world(&skel, Side::Right, "2_TIP").unwrap();
        assert!(left.distance(right) < 5e-3, "gap = {}", left.distance(right));

        // 新的位置指令取消该手的接触
        let mut instr = GestureInstruction::new(GestureKind::LocationBodyArm, HandSelector::Left);
        instr.location_body_arm = Some("CHEST".to_string());
        controller.apply_gesture(&mut skel, &instr).unwrap();
        assert!(!controller.constellation().moves(Side::Left));
        assert!(controller.constellation().moves(Side::Right));
    }

    #[test]
    fn test_unknown_handshape_rejected() {
        let (mut skel, mut controller) = setup();
        controller.apply_gesture(&mut skel, &handshape(HandSelector::Right, "FIST", 0.0, 1.0)).unwrap();
        let before = controller.arm(Side::Right).handshape().value().clone();

        let err = controller.apply_gesture(&mut skel, &handshape(HandSelector::Right, "BANANA", 0.0, 1.0));
        assert!(matches!(err, Err(SignError::UnknownName { kind: "handshape", .. })));
        let after = controller.arm(Side::Right).handshape().value();
        assert_eq!(after.tgt, before.tgt);
        assert_eq!(after.timeline, before.timeline);

        // 排队的坏指令只记录警告，其他手不受影响
        controller.new_gesture(handshape(HandSelector::Both, "BANANA", 0.0, 1.0)).unwrap();
        controller.update(&mut skel, 0.1);
        assert_eq!(controller.pending_count(), 0);
        assert_eq!(controller.arm(Side::Left).handshape().value().tgt, controller.arm(Side::Left).handshape().value().def);
    }

    #[test]
    fn test_invalid_timing_not_queued() {
        let (_, mut controller) = setup();
        let instr = handshape(HandSelector::Right, "FIST", 1.0, 0.5);
        assert!(matches!(controller.new_gesture(instr), Err(SignError::InvalidInstruction(_))));
        assert_eq!(controller.pending_count(), 0);
    }
}
