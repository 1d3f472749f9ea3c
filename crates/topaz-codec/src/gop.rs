//! mini-GOP 依赖结构.
//!
//! 固件按编码顺序读取 mini-GOP 表, 每项是一个 16 位字:
//! 帧类型 (0..1), 参考标志 (2), 显示位置 (3..7), 两个参考帧的层级 (8..11, 12..15).
//!
//! 平坦结构中 P 帧是唯一参考帧, 其余 B 帧都参考最低层;
//! 分层结构对区间递归二分, 中点成为新节点, 宽度不小于 3 的区间中点可作参考.

use log::{debug, trace};
use topaz_core::{FrameType, TopazError, TopazResult};

/// 单个 mini-GOP 允许的最多 B 帧数
pub const MAX_B_FRAMES: u8 = 7;

/// 参考帧间距上限
pub const MAX_REF_SPACING: u8 = 1;

/// 层级数上限
pub const MAX_REF_LEVELS: usize = 6;

const GOP_FRAME_TYPE_SHIFT: u16 = 0;
const GOP_REFERENCE_SHIFT: u16 = 2;
const GOP_POS_SHIFT: u16 = 3;
const GOP_REF0_SHIFT: u16 = 8;
const GOP_REF1_SHIFT: u16 = 12;

/// mini-GOP 类型
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum MiniGopKind {
    #[default]
    Flat,
    Hierarchical,
}

impl MiniGopKind {
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Flat => "flat",
            Self::Hierarchical => "hierarchical",
        }
    }
}

/// mini-GOP 表项
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GopEntry {
    pub frame_type: FrameType,
    pub reference: bool,
    /// mini-GOP 内的显示位置
    pub position: u8,
    pub ref0_level: u8,
    pub ref1_level: u8,
    /// 本帧层级 = 1 + max(参考层级)
    pub level: u8,
}

impl GopEntry {
    fn new(frame_type: FrameType, reference: bool, position: u8, ref0_level: u8, ref1_level: u8) -> Self {
        Self {
            frame_type,
            reference,
            position,
            ref0_level,
            ref1_level,
            level: ref0_level.max(ref1_level) + 1,
        }
    }

    fn frame_type_code(&self) -> u16 {
        match self.frame_type {
            FrameType::Idr => 0,
            FrameType::Intra => 1,
            FrameType::InterP | FrameType::InterPIdr => 2,
            FrameType::InterB => 3,
        }
    }

    /// 固件使用的打包字
    pub fn word(&self) -> u16 {
        (self.frame_type_code() << GOP_FRAME_TYPE_SHIFT)
            | (u16::from(self.reference) << GOP_REFERENCE_SHIFT)
            | ((u16::from(self.position) & 0x1F) << GOP_POS_SHIFT)
            | ((u16::from(self.ref0_level) & 0xF) << GOP_REF0_SHIFT)
            | ((u16::from(self.ref1_level) & 0xF) << GOP_REF1_SHIFT)
    }

    /// 从打包字还原 (层级由参考层级推出)
    pub fn from_word(word: u16) -> Self {
        let frame_type = match (word >> GOP_FRAME_TYPE_SHIFT) & 0x3 {
            0 => FrameType::Idr,
            1 => FrameType::Intra,
            2 => FrameType::InterP,
            _ => FrameType::InterB,
        };
        Self::new(
            frame_type,
            (word >> GOP_REFERENCE_SHIFT) & 1 == 1,
            ((word >> GOP_POS_SHIFT) & 0x1F) as u8,
            ((word >> GOP_REF0_SHIFT) & 0xF) as u8,
            ((word >> GOP_REF1_SHIFT) & 0xF) as u8,
        )
    }
}

/// 二分树节点, 子节点以下标引用
struct SplitNode {
    entry: GopEntry,
    left: Option<usize>,
    right: Option<usize>,
}

struct SplitTree {
    nodes: Vec<SplitNode>,
}

impl SplitTree {
    /// 对开区间 (ref0, ref1) 二分, 返回中点节点
    fn split(&mut self, ref0: i8, ref1: i8, ref0_level: u8, ref1_level: u8) -> Option<usize> {
        let distance = ref1 - ref0;
        if distance <= 1 {
            return None;
        }
        let position = ref0 + (distance >> 1);
        let entry = GopEntry::new(
            FrameType::InterB,
            distance >= 3,
            position as u8,
            ref0_level,
            ref1_level,
        );
        let level = entry.level;
        let index = self.nodes.len();
        self.nodes.push(SplitNode {
            entry,
            left: None,
            right: None,
        });
        if distance >= 4 {
            self.nodes[index].left = self.split(ref0, position, ref0_level, level);
        }
        if distance >= 3 {
            self.nodes[index].right = self.split(position, ref1, level, ref1_level);
        }
        Some(index)
    }

    /// 先序展开: 节点, 左子树, 右子树
    fn flatten(&self, root: Option<usize>, out: &mut Vec<GopEntry>) {
        let mut stack: Vec<usize> = root.into_iter().collect();
        while let Some(index) = stack.pop() {
            let node = &self.nodes[index];
            out.push(node.entry);
            stack.extend(node.right);
            stack.extend(node.left);
        }
    }
}

/// 编码顺序的 mini-GOP
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MiniGop {
    kind: MiniGopKind,
    b_frames: u8,
    ref_spacing: u8,
    entries: Vec<GopEntry>,
    pic_on_level: [u8; MAX_REF_LEVELS],
}

impl MiniGop {
    pub fn new(kind: MiniGopKind, b_frames: u8, ref_spacing: u8) -> TopazResult<Self> {
        if b_frames > MAX_B_FRAMES {
            return Err(TopazError::config(format!(
                "B 帧数超出范围: {b_frames} (最大 {MAX_B_FRAMES})"
            )));
        }
        if ref_spacing > MAX_REF_SPACING {
            return Err(TopazError::config(format!(
                "参考帧间距超出范围: {ref_spacing} (最大 {MAX_REF_SPACING})"
            )));
        }

        let mut gop = Self {
            kind,
            b_frames,
            ref_spacing,
            entries: Vec::with_capacity(usize::from(b_frames) + 1),
            pic_on_level: [0; MAX_REF_LEVELS],
        };
        match kind {
            MiniGopKind::Flat => gop.build_flat(),
            MiniGopKind::Hierarchical => gop.build_hierarchical(),
        }
        gop.count_levels()?;

        debug!(
            "mini-GOP 生成: kind={}, b_frames={}, entries={}, levels={:?}",
            kind.name(),
            b_frames,
            gop.entries.len(),
            gop.pic_on_level
        );
        Ok(gop)
    }

    pub fn flat(b_frames: u8, ref_spacing: u8) -> TopazResult<Self> {
        Self::new(MiniGopKind::Flat, b_frames, ref_spacing)
    }

    pub fn hierarchical(b_frames: u8, ref_spacing: u8) -> TopazResult<Self> {
        Self::new(MiniGopKind::Hierarchical, b_frames, ref_spacing)
    }

    fn anchor(&self) -> GopEntry {
        GopEntry::new(FrameType::InterP, true, self.b_frames, self.ref_spacing, 0)
    }

    /// 平坦结构: P 锚点后接 `b_frames` 个只参考锚点的 B 帧.
    ///
    /// 锚点位置取实际的 B 帧数, 表项数为 `b_frames + 1`. 固件表的平坦生成
    /// 固定按 7 个 B 帧填满全部 8 项, 锚点位置总为 7; 这里只生成会话实际
    /// 使用的项, 与固件表在项数和锚点位置上不同.
    fn build_flat(&mut self) {
        let anchor = self.anchor();
        self.entries.push(anchor);
        for pos in 0..self.b_frames {
            self.entries.push(GopEntry::new(
                FrameType::InterB,
                false,
                pos,
                self.ref_spacing,
                self.ref_spacing + 1,
            ));
        }
    }

    fn build_hierarchical(&mut self) {
        let anchor = self.anchor();
        self.entries.push(anchor);
        let mut tree = SplitTree { nodes: Vec::new() };
        let root = tree.split(
            -1,
            self.b_frames as i8,
            self.ref_spacing,
            self.ref_spacing + 1,
        );
        tree.flatten(root, &mut self.entries);
        trace!("分层二分节点数: {}", tree.nodes.len());
    }

    fn count_levels(&mut self) -> TopazResult<()> {
        for entry in &self.entries {
            let level = usize::from(entry.level);
            let slot = self.pic_on_level.get_mut(level).ok_or_else(|| {
                TopazError::Internal(format!("GOP 层级越界: {level}"))
            })?;
            match (self.kind, entry.frame_type) {
                // 平坦结构的 B 层计数直接等于 B 帧数
                (MiniGopKind::Flat, FrameType::InterB) => *slot = self.b_frames,
                _ => *slot += 1,
            }
        }
        Ok(())
    }

    pub fn kind(&self) -> MiniGopKind {
        self.kind
    }

    pub fn b_frames(&self) -> u8 {
        self.b_frames
    }

    /// 编码顺序的表项
    pub fn entries(&self) -> &[GopEntry] {
        &self.entries
    }

    /// 固件表
    pub fn words(&self) -> Vec<u16> {
        self.entries.iter().map(GopEntry::word).collect()
    }

    /// 各层级的图像数
    pub fn pic_on_level(&self) -> &[u8; MAX_REF_LEVELS] {
        &self.pic_on_level
    }

    /// 每个 B 帧的运动向量缩放参数, 参考帧为 mini-GOP 两端
    pub fn level_scale(&self) -> TopazResult<Vec<MvScaling>> {
        let ref0 = u32::from(self.b_frames) + 1;
        self.entries
            .iter()
            .filter(|e| e.frame_type == FrameType::InterB)
            .map(|e| MvScaling::compute(u32::from(e.position) + 1, ref0, 0, true))
            .collect()
    }
}

/// 候选运动向量的时间距离缩放
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MvScaling {
    /// 同位块缩放
    pub colocated: i32,
    /// 前向参考缩放
    pub pic0: i32,
    /// 后向参考缩放
    pub pic1: i32,
    /// IPE 抖动因子 (1..=4), 首帧为 0
    pub jitter0: u8,
    pub jitter1: u8,
}

impl MvScaling {
    fn dist_scale(frame: i32, far: i32, near: i32) -> TopazResult<i32> {
        let tb = frame * 2 - near * 2;
        let td = far * 2 - near * 2;
        if td == 0 {
            return Err(TopazError::config("B 帧的两个参考帧不能相同"));
        }
        let tx = (16384 + (td / 2).abs()) / td;
        Ok(((tb * tx + 32) >> 6).clamp(-1024, 1023))
    }

    /// 按帧号与两个参考帧号计算
    pub fn compute(frame: u32, ref0: u32, ref1: u32, b_frame: bool) -> TopazResult<Self> {
        let (f, r0, r1) = (frame as i32, ref0 as i32, ref1 as i32);
        let mut s = Self::default();
        if b_frame {
            s.colocated = Self::dist_scale(f, r0, r1)?;
            s.pic0 = s.colocated;
            // 后向参考按反方向距离缩放
            let tb = f * 2 - r0 * 2;
            let td = r0 * 2 - r1 * 2;
            let tx = (16384 + (td / 2).abs()) / td;
            s.pic1 = ((tb * tx + 32) >> 6).clamp(-1024, 1023);
        } else {
            s.pic0 = 1 << 8;
            s.pic1 = if r0 != r1 {
                let d0 = f - r0;
                if d0 == 0 {
                    return Err(TopazError::config("P 帧不能参考自身"));
                }
                (((f - r1) << 8) / d0).clamp(-1024, 1023)
            } else {
                1 << 8
            };
        }

        if frame > 0 {
            let d0 = (f - r0).abs();
            let d1 = (f - r1).abs();
            let (j0, j1) = if b_frame {
                (d1, d0)
            } else {
                (d0, if d0 > 1 { 1 } else { 2 })
            };
            s.jitter0 = j0.clamp(1, 4) as u8;
            s.jitter1 = j1.clamp(1, 4) as u8;
        }
        Ok(s)
    }
}
