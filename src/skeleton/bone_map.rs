//! 骨骼映射
//!
//! 标准关节词表（头、颈、脊柱各级、髋、肩/上臂/前臂/手、
//! 每只手 5 指 × 4 节、腿/脚），以及两套骨骼之间的关节对应关系。
//!
//! 自动匹配规则：骨骼名转小写、去掉标点与已知绑定前缀，
//! 第一个包含标准词（或别名）子串的骨骼胜出，不回溯。

use std::collections::HashMap;

use once_cell::sync::Lazy;
use serde::Deserialize;

use crate::{Result, SignError};
use super::bone_set::BoneSet;

/// 已知的绑定名前缀
const RIG_PREFIXES: &[&str] = &["mixamorig", "bip001", "bip01", "armature"];

// ============================================================================
// 左右 / 手指
// ============================================================================

/// 身体左右侧（虚拟人自身的左右，左侧为 +X）
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Deserialize)]
pub enum Side {
    Left,
    Right,
}

impl Side {
    pub const BOTH: [Side; 2] = [Side::Left, Side::Right];

    #[inline]
    pub fn opposite(self) -> Self {
        match self {
            Side::Left => Side::Right,
            Side::Right => Side::Left,
        }
    }

    /// 侧向符号：左 +1，右 -1
    #[inline]
    pub fn sign(self) -> f32 {
        match self {
            Side::Left => 1.0,
            Side::Right => -1.0,
        }
    }

    #[inline]
    pub fn index(self) -> usize {
        match self {
            Side::Left => 0,
            Side::Right => 1,
        }
    }

    #[inline]
    pub fn name(self) -> &'static str {
        match self {
            Side::Left => "Left",
            Side::Right => "Right",
        }
    }
}

/// 手指
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Digit {
    Thumb,
    Index,
    Middle,
    Ring,
    Pinky,
}

impl Digit {
    pub const ALL: [Digit; 5] = [Digit::Thumb, Digit::Index, Digit::Middle, Digit::Ring, Digit::Pinky];
    /// 除拇指外的四指
    pub const FINGERS: [Digit; 4] = [Digit::Index, Digit::Middle, Digit::Ring, Digit::Pinky];

    #[inline]
    pub fn index(self) -> usize {
        self as usize
    }

    /// 手语记法中的手指编号（拇指 1 ... 小指 5）
    pub fn from_number(n: u32) -> Option<Self> {
        match n {
            1 => Some(Digit::Thumb),
            2 => Some(Digit::Index),
            3 => Some(Digit::Middle),
            4 => Some(Digit::Ring),
            5 => Some(Digit::Pinky),
            _ => None,
        }
    }

    #[inline]
    pub fn name(self) -> &'static str {
        match self {
            Digit::Thumb => "Thumb",
            Digit::Index => "Index",
            Digit::Middle => "Middle",
            Digit::Ring => "Ring",
            Digit::Pinky => "Pinky",
        }
    }

    fn aliases(self) -> &'static [&'static str] {
        match self {
            Digit::Thumb => &["thumb"],
            Digit::Index => &["index"],
            Digit::Middle => &["middle"],
            Digit::Ring => &["ring"],
            Digit::Pinky => &["pinky", "little"],
        }
    }
}

// ============================================================================
// 标准关节
// ============================================================================

/// 标准关节
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Joint {
    Hips,
    Spine,
    Spine1,
    Spine2,
    Neck,
    Head,
    Shoulder(Side),
    Arm(Side),
    ForeArm(Side),
    Hand(Side),
    /// 手指关节，层级 1（根）到 4（指尖端点）
    Finger(Side, Digit, u8),
    UpLeg(Side),
    Leg(Side),
    Foot(Side),
    ToeBase(Side),
}

/// 标准词表：关节 + 清洗后的匹配词
static VOCABULARY: Lazy<Vec<(Joint, Vec<String>)>> = Lazy::new(|| {
    let mut joints = vec![Joint::Hips, Joint::Spine, Joint::Spine1, Joint::Spine2, Joint::Neck, Joint::Head];
    for side in Side::BOTH {
        joints.extend([Joint::Shoulder(side), Joint::Arm(side), Joint::ForeArm(side), Joint::Hand(side)]);
        for digit in Digit::ALL {
            for level in 1..=4 {
                joints.push(Joint::Finger(side, digit, level));
            }
        }
        joints.extend([Joint::UpLeg(side), Joint::Leg(side), Joint::Foot(side), Joint::ToeBase(side)]);
    }
    joints.into_iter().map(|j| (j, j.tokens())).collect()
});

/// 标准名（小写）-> 关节
static BY_CANONICAL_NAME: Lazy<HashMap<String, Joint>> = Lazy::new(|| {
    VOCABULARY
        .iter()
        .map(|(j, _)| (j.canonical_name().to_lowercase(), *j))
        .collect()
});

impl Joint {
    /// 全部标准关节（固定顺序）
    pub fn all() -> impl Iterator<Item = Joint> {
        VOCABULARY.iter().map(|(j, _)| *j)
    }

    /// 标准名，如 "LeftHandIndex1"
    pub fn canonical_name(&self) -> String {
        match *self {
            Joint::Hips => "Hips".to_string(),
            Joint::Spine => "Spine".to_string(),
            Joint::Spine1 => "Spine1".to_string(),
            Joint::Spine2 => "Spine2".to_string(),
            Joint::Neck => "Neck".to_string(),
            Joint::Head => "Head".to_string(),
            Joint::Shoulder(s) => format!("{}Shoulder", s.name()),
            Joint::Arm(s) => format!("{}Arm", s.name()),
            Joint::ForeArm(s) => format!("{}ForeArm", s.name()),
            Joint::Hand(s) => format!("{}Hand", s.name()),
            Joint::Finger(s, d, l) => format!("{}Hand{}{}", s.name(), d.name(), l),
            Joint::UpLeg(s) => format!("{}UpLeg", s.name()),
            Joint::Leg(s) => format!("{}Leg", s.name()),
            Joint::Foot(s) => format!("{}Foot", s.name()),
            Joint::ToeBase(s) => format!("{}ToeBase", s.name()),
        }
    }

    /// 由标准名解析（不区分大小写）
    pub fn from_canonical_name(name: &str) -> Option<Joint> {
        BY_CANONICAL_NAME.get(&name.to_lowercase()).copied()
    }

    /// 清洗后的匹配词（标准名在前，别名在后）
    fn tokens(&self) -> Vec<String> {
        let mut tokens = vec![clean_bone_name(&self.canonical_name())];
        // 左右只接受完整单词，单字母后缀会误中 "lefthandring" 之类的名字
        let sided = |side: Side, aliases: &[&str]| {
            let side = side.name().to_lowercase();
            aliases
                .iter()
                .flat_map(|alias| [format!("{side}{alias}"), format!("{alias}{side}")])
                .collect::<Vec<_>>()
        };
        match *self {
            Joint::Hips => tokens.extend(["pelvis", "hip"].map(String::from)),
            Joint::Spine1 => tokens.push("chest".to_string()),
            Joint::Spine2 => tokens.push("upperchest".to_string()),
            Joint::Shoulder(s) => tokens.extend(sided(s, &["shoulder", "clavicle"])),
            Joint::Arm(s) => tokens.extend(sided(s, &["arm", "upperarm"])),
            Joint::ForeArm(s) => tokens.extend(sided(s, &["forearm", "lowerarm", "elbow"])),
            Joint::Hand(s) => tokens.extend(sided(s, &["hand", "wrist"])),
            Joint::Finger(s, d, l) => {
                let side = s.name().to_lowercase();
                for alias in d.aliases() {
                    tokens.push(format!("{side}{alias}{l}"));
                    tokens.push(format!("{alias}{l}{side}"));
                }
            }
            Joint::UpLeg(s) => tokens.extend(sided(s, &["upleg", "thigh", "upperleg"])),
            Joint::Leg(s) => tokens.extend(sided(s, &["leg", "lowerleg", "calf", "shin"])),
            Joint::Foot(s) => tokens.extend(sided(s, &["foot", "ankle"])),
            Joint::ToeBase(s) => tokens.extend(sided(s, &["toebase", "toe"])),
            _ => {}
        }
        tokens
    }
}

/// 清洗骨骼名：小写、只保留字母数字、去掉已知绑定前缀
pub fn clean_bone_name(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .map(|c| c.to_ascii_lowercase())
        .collect();
    for prefix in RIG_PREFIXES {
        if let Some(rest) = cleaned.strip_prefix(prefix) {
            return rest.to_string();
        }
    }
    cleaned
}

// ============================================================================
// 标准关节 -> 骨骼索引
// ============================================================================

/// 一套骨骼上标准关节到骨骼索引的解析结果
#[derive(Clone, Debug, Default)]
pub struct CanonicalJoints {
    map: HashMap<Joint, usize>,
}

impl CanonicalJoints {
    /// 按名称模糊匹配
    pub fn auto_detect(skeleton: &BoneSet) -> Self {
        let cleaned: Vec<String> = skeleton.bones().iter().map(|b| clean_bone_name(&b.name)).collect();
        let mut map = HashMap::new();
        for (joint, tokens) in VOCABULARY.iter() {
            let found = cleaned
                .iter()
                .position(|name| tokens.iter().any(|t| name.contains(t.as_str())));
            if let Some(idx) = found {
                map.insert(*joint, idx);
            }
        }
        Self { map }
    }

    /// 显式名称表（标准名 -> 骨骼名）优先，其余关节回退到模糊匹配
    pub fn from_name_map(skeleton: &BoneSet, names: &HashMap<String, String>) -> Self {
        let mut resolved = Self::auto_detect(skeleton);
        for (canonical, bone_name) in names {
            let Some(joint) = Joint::from_canonical_name(canonical) else {
                log::warn!("[BoneMap] 未知标准关节名 '{}'，忽略", canonical);
                continue;
            };
            match skeleton.find_bone_by_name(bone_name) {
                Some(idx) => {
                    resolved.map.insert(joint, idx);
                }
                None => {
                    log::warn!("[BoneMap] 骨骼 '{}'（{}）不存在", bone_name, canonical);
                    resolved.map.remove(&joint);
                }
            }
        }
        resolved
    }

    #[inline]
    pub fn get(&self, joint: Joint) -> Option<usize> {
        self.map.get(&joint).copied()
    }

    /// 必需关节，缺失时报错
    pub fn require(&self, joint: Joint) -> Result<usize> {
        self.get(joint)
            .ok_or_else(|| SignError::BoneNotFound(joint.canonical_name()))
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.map.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// 四节手指关节（缺任意一节返回 None）
    pub fn finger_chain(&self, side: Side, digit: Digit) -> Option<[usize; 4]> {
        Some([
            self.get(Joint::Finger(side, digit, 1))?,
            self.get(Joint::Finger(side, digit, 2))?,
            self.get(Joint::Finger(side, digit, 3))?,
            self.get(Joint::Finger(side, digit, 4))?,
        ])
    }
}

// ============================================================================
// 两套骨骼之间的映射
// ============================================================================

/// 源骨骼索引 -> 目标骨骼索引（-1 表示未映射），附带名称镜像
#[derive(Clone, Debug, Default)]
pub struct BoneMap {
    idx: Vec<i32>,
    names: HashMap<String, String>,
}

impl BoneMap {
    /// 由显式名称表（源骨骼名 -> 目标骨骼名）构建
    pub fn from_name_table(src: &BoneSet, trg: &BoneSet, table: &HashMap<String, String>) -> Self {
        let mut map = Self::unmapped(src.len());
        for (src_name, trg_name) in table {
            match (src.find_bone_by_name(src_name), trg.find_bone_by_name(trg_name)) {
                (Some(s), Some(t)) => map.insert(src, trg, s, t),
                _ => log::warn!("[BoneMap] 无法映射 '{}' -> '{}'，跳过", src_name, trg_name),
            }
        }
        map
    }

    /// 两侧都按标准词表自动匹配
    pub fn auto(src: &BoneSet, trg: &BoneSet) -> Self {
        let src_joints = CanonicalJoints::auto_detect(src);
        let trg_joints = CanonicalJoints::auto_detect(trg);
        let mut map = Self::unmapped(src.len());
        for joint in Joint::all() {
            match (src_joints.get(joint), trg_joints.get(joint)) {
                (Some(s), Some(t)) => map.insert(src, trg, s, t),
                (Some(_), None) => {
                    log::warn!("[BoneMap] 目标骨骼缺少关节 {}", joint.canonical_name());
                }
                _ => {}
            }
        }
        map
    }

    fn unmapped(len: usize) -> Self {
        Self {
            idx: vec![-1; len],
            names: HashMap::new(),
        }
    }

    fn insert(&mut self, src: &BoneSet, trg: &BoneSet, s: usize, t: usize) {
        // 先到先得
        if self.idx[s] >= 0 {
            return;
        }
        self.idx[s] = t as i32;
        self.names.insert(src.bones()[s].name.clone(), trg.bones()[t].name.clone());
    }

    /// 源骨骼对应的目标骨骼
    #[inline]
    pub fn target_of(&self, src: usize) -> Option<usize> {
        match self.idx.get(src) {
            Some(&t) if t >= 0 => Some(t as usize),
            _ => None,
        }
    }

    /// 源骨骼名对应的目标骨骼名
    #[inline]
    pub fn target_name(&self, src_name: &str) -> Option<&str> {
        self.names.get(src_name).map(String::as_str)
    }

    /// 原始索引数组
    #[inline]
    pub fn indices(&self) -> &[i32] {
        &self.idx
    }

    /// 已映射的 (源, 目标) 对
    pub fn pairs(&self) -> impl Iterator<Item = (usize, usize)> + '_ {
        self.idx
            .iter()
            .enumerate()
            .filter(|(_, &t)| t >= 0)
            .map(|(s, &t)| (s, t as usize))
    }

    #[inline]
    pub fn mapped_count(&self) -> usize {
        self.pairs().count()
    }
}
