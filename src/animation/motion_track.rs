//! 动画轨道
//!
//! 存储单个骨骼某一属性（位置 / 旋转 / 缩放 / 标量）的全部关键帧，
//! 并提供查找和插值功能。

use glam::{Quat, Vec3};

/// 轨道属性种类
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TrackKind {
    Position,
    Rotation,
    Scale,
    Scalar,
}

impl TrackKind {
    /// 轨道名中的属性后缀
    pub fn property(self) -> &'static str {
        match self {
            TrackKind::Position => "position",
            TrackKind::Rotation => "quaternion",
            TrackKind::Scale => "scale",
            TrackKind::Scalar => "scalar",
        }
    }
}

/// 关键帧值序列（与时间序列等长）
#[derive(Clone, Debug, PartialEq)]
pub enum TrackValues {
    Position(Vec<Vec3>),
    Rotation(Vec<Quat>),
    Scale(Vec<Vec3>),
    Scalar(Vec<f32>),
}

impl TrackValues {
    pub fn kind(&self) -> TrackKind {
        match self {
            TrackValues::Position(_) => TrackKind::Position,
            TrackValues::Rotation(_) => TrackKind::Rotation,
            TrackValues::Scale(_) => TrackKind::Scale,
            TrackValues::Scalar(_) => TrackKind::Scalar,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            TrackValues::Position(v) | TrackValues::Scale(v) => v.len(),
            TrackValues::Rotation(v) => v.len(),
            TrackValues::Scalar(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// 单个采样结果
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum TrackSample {
    Position(Vec3),
    Rotation(Quat),
    Scale(Vec3),
    Scalar(f32),
}

/// 动画轨道 trait
pub trait MotionTrack {
    type Frame;

    /// 查找最近的前后关键帧索引（前帧时间 <= time < 后帧时间）
    fn search_closest(&self, time: f32) -> (Option<usize>, Option<usize>);

    /// 求值指定时间，无关键帧时返回 None
    fn seek(&self, time: f32) -> Option<Self::Frame>;

    /// 获取轨道长度
    fn len(&self) -> usize;

    /// 是否为空
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// 最后一个关键帧的时间
    fn max_time(&self) -> f32;
}

/// 骨骼关键帧轨道
#[derive(Clone, Debug, PartialEq)]
pub struct KeyframeTrack {
    /// 骨骼名
    pub bone: String,
    /// 关键帧时间（秒，升序）
    pub times: Vec<f32>,
    /// 关键帧值
    pub values: TrackValues,
}

impl KeyframeTrack {
    pub fn new(bone: impl Into<String>, times: Vec<f32>, values: TrackValues) -> Self {
        Self { bone: bone.into(), times, values }
    }

    pub fn rotation(bone: impl Into<String>, times: Vec<f32>, values: Vec<Quat>) -> Self {
        Self::new(bone, times, TrackValues::Rotation(values))
    }

    pub fn position(bone: impl Into<String>, times: Vec<f32>, values: Vec<Vec3>) -> Self {
        Self::new(bone, times, TrackValues::Position(values))
    }

    #[inline]
    pub fn kind(&self) -> TrackKind {
        self.values.kind()
    }

    /// 轨道名，如 "LeftArm.quaternion"
    pub fn name(&self) -> String {
        format!("{}.{}", self.bone, self.kind().property())
    }

    /// 同类型、同时间轴，换骨骼与值
    pub fn with_values(&self, bone: impl Into<String>, values: TrackValues) -> Self {
        Self::new(bone, self.times.clone(), values)
    }
}

/// 插值系数
#[inline]
fn coefficient(prev: f32, next: f32, time: f32) -> f32 {
    let interval = next - prev;
    if interval > f32::EPSILON {
        ((time - prev) / interval).clamp(0.0, 1.0)
    } else {
        0.0
    }
}

/// 四元数归一化线性插值（取最短路径）
#[inline]
pub(crate) fn nlerp(a: Quat, b: Quat, t: f32) -> Quat {
    let b = if a.dot(b) < 0.0 { -b } else { b };
    (a * (1.0 - t) + b * t).normalize()
}

impl MotionTrack for KeyframeTrack {
    type Frame = TrackSample;

    fn search_closest(&self, time: f32) -> (Option<usize>, Option<usize>) {
        let next = self.times.partition_point(|&t| t <= time);
        let prev = next.checked_sub(1);
        let next = (next < self.times.len()).then_some(next);
        (prev, next)
    }

    fn seek(&self, time: f32) -> Option<Self::Frame> {
        let count = self.times.len().min(self.values.len());
        if count == 0 {
            return None;
        }

        let (prev, next) = match self.search_closest(time) {
            (Some(p), Some(n)) if n < count => (p, n),
            // 只有前帧或后帧时取端点
            (Some(p), _) => (p.min(count - 1), p.min(count - 1)),
            (None, _) => (0, 0),
        };
        let coef = coefficient(self.times[prev], self.times[next], time);

        Some(match &self.values {
            TrackValues::Position(v) => TrackSample::Position(v[prev].lerp(v[next], coef)),
            TrackValues::Rotation(v) => TrackSample::Rotation(nlerp(v[prev], v[next], coef)),
            TrackValues::Scale(v) => TrackSample::Scale(v[prev].lerp(v[next], coef)),
            TrackValues::Scalar(v) => TrackSample::Scalar(v[prev] + (v[next] - v[prev]) * coef),
        })
    }

    fn len(&self) -> usize {
        self.times.len()
    }

    fn max_time(&self) -> f32 {
        self.times.last().copied().unwrap_or(0.0)
    }
}
