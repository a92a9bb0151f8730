//! 四阶段时间线
//!
//! 每个子模块（位置、手腕朝向、手形、动作叠加、肩肘美学）各自持有一条：
//!
//! ```text
//! time < start            保持 src
//! start  ..attack_peak    src -> tgt（S 曲线）
//! attack_peak..relax      保持 tgt
//! relax  ..end            tgt -> def（S 曲线）
//! time >= end             保持 def，transition = false
//! ```

use std::f32::consts::PI;

use glam::{Quat, Vec3};

use crate::animation::nlerp;

/// S 曲线：0.5 + 0.5·sin(πt − π/2)，t ∈ [0, 1]
#[inline]
pub fn s_curve(t: f32) -> f32 {
    if t <= 0.0 {
        return 0.0;
    }
    if t >= 1.0 {
        return 1.0;
    }
    0.5 + 0.5 * (PI * t - PI * 0.5).sin()
}

/// 指令时间（秒，相对指令发出时刻）
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Timing {
    pub start: f32,
    pub attack_peak: f32,
    pub relax: f32,
    pub end: f32,
}

impl Timing {
    /// 补全缺省字段：
    /// start 默认 0，end 默认 start + 1，
    /// attack_peak = start + 0.25·(end − start)，relax = attack_peak + 0.5·(end − attack_peak)
    pub fn fill(start: Option<f32>, attack_peak: Option<f32>, relax: Option<f32>, end: Option<f32>) -> Self {
        let start = start.unwrap_or(0.0);
        let end = end.unwrap_or(start + 1.0);
        let attack_peak = attack_peak.unwrap_or(start + 0.25 * (end - start));
        let relax = relax.unwrap_or(attack_peak + 0.5 * (end - attack_peak));
        Self { start, attack_peak, relax, end }
    }

    /// start ≤ attack_peak ≤ relax ≤ end 且均为有限值
    pub fn is_ordered(&self) -> bool {
        let values = [self.start, self.attack_peak, self.relax, self.end];
        values.iter().all(|v| v.is_finite()) && values.windows(2).all(|w| w[0] <= w[1])
    }
}

/// 当前所处阶段
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Phase {
    /// 尚未开始
    Hold,
    /// src -> tgt，参数为已过 S 曲线的插值系数
    Attack(f32),
    Peak,
    /// tgt -> def
    Relax(f32),
    Done,
}

/// 时间线状态
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PhaseTimeline {
    pub timing: Timing,
    pub time: f32,
    pub transition: bool,
}

impl Default for PhaseTimeline {
    fn default() -> Self {
        Self {
            timing: Timing::fill(None, None, None, Some(0.0)),
            time: 0.0,
            transition: false,
        }
    }
}

/// 区间内的 S 曲线系数，零长区间直接取 1
#[inline]
fn eased(time: f32, from: f32, to: f32) -> f32 {
    if to - from <= f32::EPSILON {
        1.0
    } else {
        s_curve((time - from) / (to - from))
    }
}

impl PhaseTimeline {
    /// 从 elapsed 时刻开始（调度延迟时 elapsed > 0）
    pub fn armed(timing: Timing, elapsed: f32) -> Self {
        Self { timing, time: elapsed, transition: true }
    }

    /// 某时刻的阶段
    pub fn phase_at(&self, time: f32) -> Phase {
        let t = &self.timing;
        if time < t.start {
            Phase::Hold
        } else if time < t.attack_peak {
            Phase::Attack(eased(time, t.start, t.attack_peak))
        } else if time < t.relax {
            Phase::Peak
        } else if time < t.end {
            Phase::Relax(eased(time, t.relax, t.end))
        } else {
            Phase::Done
        }
    }

    #[inline]
    pub fn phase(&self) -> Phase {
        self.phase_at(self.time)
    }

    /// 推进 dt，返回推进后的阶段；到达终点后不再计时
    pub fn advance(&mut self, dt: f32) -> Phase {
        if !self.transition {
            return Phase::Done;
        }
        self.time += dt;
        let phase = self.phase();
        if phase == Phase::Done {
            self.transition = false;
        }
        phase
    }

    /// 是否已越过 attack_peak
    #[inline]
    pub fn past_peak(&self) -> bool {
        self.time >= self.timing.attack_peak
    }
}

// ============================================================================
// 可插值的值
// ============================================================================

/// 时间线上插值的值类型
pub trait Blend: Clone {
    /// t = 0 时必须精确返回 self，t = 1 时精确返回 other
    fn blend(&self, other: &Self, t: f32) -> Self;
}

impl Blend for f32 {
    #[inline]
    fn blend(&self, other: &Self, t: f32) -> Self {
        if t >= 1.0 {
            return *other;
        }
        self + (other - self) * t
    }
}

impl Blend for Vec3 {
    #[inline]
    fn blend(&self, other: &Self, t: f32) -> Self {
        if t >= 1.0 {
            return *other;
        }
        self.lerp(*other, t)
    }
}

impl Blend for Quat {
    #[inline]
    fn blend(&self, other: &Self, t: f32) -> Self {
        if t <= 0.0 {
            *self
        } else if t >= 1.0 {
            *other
        } else {
            nlerp(*self, *other, t)
        }
    }
}

/// src / tgt / def / cur 四份值 + 时间线
#[derive(Clone, Debug)]
pub struct PhasedValue<T: Blend> {
    pub src: T,
    pub tgt: T,
    pub def: T,
    pub cur: T,
    pub timeline: PhaseTimeline,
}

impl<T: Blend> PhasedValue<T> {
    /// 静止状态：四份值都等于 rest
    pub fn new(rest: T) -> Self {
        Self {
            src: rest.clone(),
            tgt: rest.clone(),
            def: rest.clone(),
            cur: rest,
            timeline: PhaseTimeline::default(),
        }
    }

    /// 重新装载：src ← cur，tgt ← target；shift 时 def 也改为 target
    pub fn arm(&mut self, target: T, timing: Timing, elapsed: f32, shift: bool) {
        self.src = self.cur.clone();
        if shift {
            self.def = target.clone();
        }
        self.tgt = target;
        self.timeline = PhaseTimeline::armed(timing, elapsed);
        self.cur = self.sample(self.timeline.time);
    }

    /// 某时刻的值（不改变状态）
    pub fn sample(&self, time: f32) -> T {
        match self.timeline.phase_at(time) {
            Phase::Hold => self.src.clone(),
            Phase::Attack(t) => self.src.blend(&self.tgt, t),
            Phase::Peak => self.tgt.clone(),
            Phase::Relax(t) => self.tgt.blend(&self.def, t),
            Phase::Done => self.def.clone(),
        }
    }

    /// 推进 dt 并刷新 cur
    pub fn update(&mut self, dt: f32) -> &T {
        if self.timeline.transition {
            self.timeline.advance(dt);
            self.cur = self.sample(self.timeline.time);
        }
        &self.cur
    }

    #[inline]
    pub fn is_transitioning(&self) -> bool {
        self.timeline.transition
    }
}
