//! 手腕朝向
//!
//! 由两个方向决定：手指延伸方向（extfidir）和掌心朝向（palmor），
//! 各自一条时间线。每帧把两者正交化后求出手的世界旋转。

use glam::{Mat3, Quat, Vec3};

use crate::skeleton::Side;
use crate::{Result, SignError};
use super::anchor::HandGeometry;
use super::config::GestureConfig;
use super::instruction::{direction_from_code, GestureInstruction, GestureKind, Symmetry};
use super::timeline::{PhasedValue, Timing};

#[derive(Clone, Debug)]
pub struct WristOrientation {
    extfidir: PhasedValue<Vec3>,
    palmor: PhasedValue<Vec3>,
}

impl WristOrientation {
    /// 静止：手指朝前，两手掌心相对
    pub fn new(side: Side, config: &GestureConfig) -> Self {
        let palm = -config.left_axis() * side.sign();
        Self {
            extfidir: PhasedValue::new(config.forward_axis()),
            palmor: PhasedValue::new(palm),
        }
    }

    pub fn extfidir(&self) -> &PhasedValue<Vec3> {
        &self.extfidir
    }

    pub fn palmor(&self) -> &PhasedValue<Vec3> {
        &self.palmor
    }

    /// 解析 extfidir / palmor 指令
    pub fn new_gesture(
        &mut self,
        instr: &GestureInstruction,
        symmetry: Symmetry,
        config: &GestureConfig,
        timing: Timing,
        elapsed: f32,
    ) -> Result<()> {
        let (code, value) = match instr.kind()? {
            GestureKind::Extfidir => (instr.extfidir.as_deref(), &mut self.extfidir),
            GestureKind::Palmor => (instr.palmor.as_deref(), &mut self.palmor),
            other => {
                return Err(SignError::InvalidInstruction(format!("{other:?} is not a wrist instruction")));
            }
        };
        let code = code.ok_or_else(|| SignError::InvalidInstruction("wrist instruction without direction".to_string()))?;
        let dir = direction_from_code(&symmetry.mirror_code(code), config.left_axis(), config.forward_axis())?;
        value.arm(dir, timing, elapsed, instr.shift);
        Ok(())
    }

    pub fn update(&mut self, dt: f32) {
        self.extfidir.update(dt);
        self.palmor.update(dt);
    }

    pub fn is_transitioning(&self) -> bool {
        self.extfidir.is_transitioning() || self.palmor.is_transitioning()
    }

    /// 当前值对应的手世界旋转
    ///
    /// 掌心方向先对手指方向正交化；两者平行时保持绑定掌心随手指方向转动的结果。
    pub fn target_rotation(&self, hand: &HandGeometry) -> Quat {
        let finger = self.extfidir.cur.try_normalize().unwrap_or(hand.finger_dir);
        let swing = Quat::from_rotation_arc(hand.finger_dir, finger);
        let palm = self.palmor.cur;
        let palm = (palm - finger * palm.dot(finger))
            .try_normalize()
            .unwrap_or_else(|| swing * hand.palm_normal);

        let bind = Mat3::from_cols(hand.finger_dir, hand.palm_normal, hand.finger_dir.cross(hand.palm_normal));
        let goal = Mat3::from_cols(finger, palm, finger.cross(palm));
        let delta = Quat::from_mat3(&(goal * bind.transpose())).normalize();
        delta * hand.bind_rotation()
    }
}
