//! 测试用的程序化人形骨骼
//!
//! T-pose，面朝 +Z，Y 向上，虚拟人左侧为 +X。

use glam::{Quat, Vec3};

use crate::skeleton::{BoneSet, BoneTransform};

const FINGERS: [(&str, f32, f32, [f32; 3]); 4] = [
    ("Index", 0.090, 0.025, [0.040, 0.025, 0.022]),
    ("Middle", 0.095, 0.0, [0.045, 0.028, 0.024]),
    ("Ring", 0.090, -0.015, [0.042, 0.026, 0.022]),
    ("Pinky", 0.080, -0.033, [0.032, 0.020, 0.018]),
];

/// 测试日志初始化
pub fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// 两个四元数表示同一旋转（允许符号相反）
pub fn quat_eq(a: Quat, b: Quat, eps: f32) -> bool {
    a.abs_diff_eq(b, eps) || a.abs_diff_eq(-b, eps)
}

/// 标准命名的人形骨骼
pub fn humanoid() -> BoneSet {
    build("", 1.0)
}

/// 带绑定前缀的人形骨骼（如 "mixamorig:"）
pub fn humanoid_with_prefix(prefix: &str) -> BoneSet {
    build(prefix, 1.0)
}

/// 所有骨骼长度乘以 k 的人形骨骼
pub fn scaled_humanoid(k: f32) -> BoneSet {
    build("", k)
}

fn build(prefix: &str, k: f32) -> BoneSet {
    let mut set = BoneSet::new();
    let name = |n: &str| format!("{prefix}{n}");
    let push = |set: &mut BoneSet, n: &str, parent: Option<&str>, offset: Vec3| {
        let parent = parent.map(|p| format!("{prefix}{p}"));
        set.push_bone(&name(n), parent.as_deref(), BoneTransform::from_translation(offset * k))
            .expect("test rig parent exists");
    };

    push(&mut set, "Hips", None, Vec3::new(0.0, 1.0, 0.0));
    push(&mut set, "Spine", Some("Hips"), Vec3::new(0.0, 0.10, 0.0));
    push(&mut set, "Spine1", Some("Spine"), Vec3::new(0.0, 0.15, 0.0));
    push(&mut set, "Spine2", Some("Spine1"), Vec3::new(0.0, 0.15, 0.0));
    push(&mut set, "Neck", Some("Spine2"), Vec3::new(0.0, 0.15, 0.0));
    push(&mut set, "Head", Some("Neck"), Vec3::new(0.0, 0.10, 0.0));

    for (side, s) in [("Left", 1.0f32), ("Right", -1.0f32)] {
        let m = |x: f32, y: f32, z: f32| Vec3::new(x * s, y, z);
        push(&mut set, &format!("{side}Shoulder"), Some("Spine2"), m(0.05, 0.12, 0.0));
        push(&mut set, &format!("{side}Arm"), Some(format!("{side}Shoulder").as_str()), m(0.12, 0.0, 0.0));
        push(&mut set, &format!("{side}ForeArm"), Some(format!("{side}Arm").as_str()), m(0.28, 0.0, 0.0));
        push(&mut set, &format!("{side}Hand"), Some(format!("{side}ForeArm").as_str()), m(0.25, 0.0, 0.0));

        let hand = format!("{side}Hand");
        let thumb = [
            m(0.025, -0.010, 0.030),
            m(0.025, -0.005, 0.020),
            m(0.020, 0.0, 0.012),
            m(0.018, 0.0, 0.010),
        ];
        let mut parent = hand.clone();
        for (i, offset) in thumb.iter().enumerate() {
            let n = format!("{side}HandThumb{}", i + 1);
            push(&mut set, &n, Some(parent.as_str()), *offset);
            parent = n;
        }

        for (finger, x, z, lengths) in FINGERS {
            let mut parent = hand.clone();
            for level in 1..=4 {
                let n = format!("{side}Hand{finger}{level}");
                let offset = if level == 1 { m(x, 0.0, z) } else { m(lengths[level - 2], 0.0, 0.0) };
                push(&mut set, &n, Some(parent.as_str()), offset);
                parent = n;
            }
        }
    }

    for (side, s) in [("Left", 1.0f32), ("Right", -1.0f32)] {
        push(&mut set, &format!("{side}UpLeg"), Some("Hips"), Vec3::new(0.1 * s, -0.05, 0.0));
        push(&mut set, &format!("{side}Leg"), Some(format!("{side}UpLeg").as_str()), Vec3::new(0.0, -0.42, 0.0));
        push(&mut set, &format!("{side}Foot"), Some(format!("{side}Leg").as_str()), Vec3::new(0.0, -0.40, 0.0));
        push(&mut set, &format!("{side}ToeBase"), Some(format!("{side}Foot").as_str()), Vec3::new(0.0, -0.05, 0.12));
    }

    set.build().expect("test rig is a valid hierarchy");
    set
}
