//! Structured-control-flow recovery from recorded branch instructions.
//!
//! Translation emits flat statements and records every branch instead of
//! emitting it. This pass classifies the records into loop / conditional
//! scopes keyed by instruction byte offsets, then splices braces and
//! keywords back into the already-produced text through the source map.
//!
//! Backward branches are classified first so that loop scopes exist when
//! forward branches are tested for `break`; forward branches are then
//! classified in record order. The check order for forward branches is
//! break, then else, then ordinary conditional.

use crate::source_map::SourceMap;
use crate::ErrorClass;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlowError {
    pub offset: u32,
    pub class: ErrorClass,
    pub message: String,
}

impl std::fmt::Display for FlowError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "control-flow reconstruction error ({}) at offset {}: {}",
            self.class, self.offset, self.message
        )
    }
}

impl std::error::Error for FlowError {}

fn unsupported(offset: u32, message: impl Into<String>) -> FlowError {
    FlowError {
        offset,
        class: ErrorClass::Unsupported,
        message: message.into(),
    }
}

fn internal(offset: u32, message: impl Into<String>) -> FlowError {
    FlowError {
        offset,
        class: ErrorClass::Internal,
        message: message.into(),
    }
}

/// Condition attached to a recorded branch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BranchCond {
    Always,
    IfTrue,
    IfFalse,
}

/// One branch instruction, recorded during linear translation.
#[derive(Debug, Clone, PartialEq)]
pub struct BranchRecord {
    /// Byte offset of the branch instruction.
    pub offset: u32,
    /// Absolute destination byte offset.
    pub target: u32,
    pub cond: BranchCond,
    /// Popped condition expression; present iff the branch is conditional.
    pub expr: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ScopeKind {
    Root,
    Loop,
    Conditional,
}

/// A byte-offset range classified as a loop or conditional body. Scopes form
/// a tree: children nest fully inside their parent.
#[derive(Debug)]
struct Scope {
    start: u32,
    /// Exclusive end offset.
    end: u32,
    kind: ScopeKind,
    parent: usize,
    children: Vec<usize>,
}

struct ScopeTree {
    scopes: Vec<Scope>,
}

impl ScopeTree {
    fn new(end: u32) -> Self {
        Self {
            scopes: vec![Scope {
                start: 0,
                end,
                kind: ScopeKind::Root,
                parent: 0,
                children: Vec::new(),
            }],
        }
    }

    fn contains(&self, id: usize, offset: u32) -> bool {
        let s = &self.scopes[id];
        s.start <= offset && offset < s.end
    }

    fn innermost_containing(&self, offset: u32) -> usize {
        let mut cur = 0;
        loop {
            let next = self.scopes[cur]
                .children
                .iter()
                .copied()
                .find(|&c| self.contains(c, offset));
            match next {
                Some(c) => cur = c,
                None => return cur,
            }
        }
    }

    /// Registers `[start, end)` under the innermost scope that fully
    /// contains it. Existing children fully inside the new scope are
    /// re-parented; a child that overlaps without nesting is an invariant
    /// violation and fails the registration.
    fn insert(&mut self, start: u32, end: u32, kind: ScopeKind) -> Result<usize, FlowError> {
        let root = &self.scopes[0];
        if start < root.start || end > root.end {
            return Err(internal(
                start,
                format!("scope [{start}, {end}) exceeds the function body"),
            ));
        }

        let mut parent = 0;
        loop {
            let descend = self.scopes[parent]
                .children
                .iter()
                .copied()
                .find(|&c| self.scopes[c].start <= start && end <= self.scopes[c].end);
            match descend {
                Some(c) => parent = c,
                None => break,
            }
        }

        for &c in &self.scopes[parent].children {
            let child = &self.scopes[c];
            let disjoint = child.end <= start || end <= child.start;
            let nested = start <= child.start && child.end <= end;
            if !disjoint && !nested {
                return Err(internal(
                    start,
                    format!(
                        "scope [{start}, {end}) overlaps [{}, {}) without nesting",
                        child.start, child.end
                    ),
                ));
            }
        }

        let id = self.scopes.len();
        self.scopes.push(Scope {
            start,
            end,
            kind,
            parent,
            children: Vec::new(),
        });

        let adopted: Vec<usize> = self.scopes[parent]
            .children
            .iter()
            .copied()
            .filter(|&c| start <= self.scopes[c].start && self.scopes[c].end <= end)
            .collect();
        self.scopes[parent].children.retain(|c| !adopted.contains(c));
        for c in &adopted {
            self.scopes[*c].parent = id;
        }
        self.scopes[id].children = adopted;
        self.scopes[parent].children.push(id);
        Ok(id)
    }

    fn nearest_loop(&self, mut id: usize) -> Option<usize> {
        loop {
            match self.scopes[id].kind {
                ScopeKind::Loop => return Some(id),
                ScopeKind::Root => return None,
                ScopeKind::Conditional => id = self.scopes[id].parent,
            }
        }
    }
}

// Insertion classes order same-anchor text: scope closers first, then
// openers, then break statements.
const CLASS_CLOSE: u8 = 0;
const CLASS_OPEN: u8 = 1;
const CLASS_BREAK: u8 = 2;

struct Insertion {
    anchor: u32,
    class: u8,
    /// Same-anchor tiebreak: closers order innermost-first, openers
    /// outermost-first.
    key: u32,
    text: String,
}

fn cond_expr(br: &BranchRecord) -> Result<&str, FlowError> {
    br.expr
        .as_deref()
        .ok_or_else(|| internal(br.offset, "conditional branch without a condition expression"))
}

/// Rewrites `buf` in place, turning recorded branches into structured
/// control flow.
pub fn reconstruct(
    buf: &mut String,
    map: &mut SourceMap,
    branches: &[BranchRecord],
) -> Result<(), FlowError> {
    let end = map.end_offset();
    let mut tree = ScopeTree::new(end);
    let mut inserts: Vec<Insertion> = Vec::new();

    // Backward branches are loops.
    for br in branches.iter().filter(|b| b.target <= b.offset) {
        let (opener, closer) = match br.cond {
            BranchCond::Always => ("  while (true) {\n".to_owned(), "  }\n".to_owned()),
            BranchCond::IfTrue => (
                "  do {\n".to_owned(),
                format!("  }} while ({});\n", cond_expr(br)?),
            ),
            BranchCond::IfFalse => (
                "  do {\n".to_owned(),
                format!("  }} while (!({}));\n", cond_expr(br)?),
            ),
        };
        let scope_end = br.offset + 1;
        tree.insert(br.target, scope_end, ScopeKind::Loop)?;
        inserts.push(Insertion {
            anchor: br.target,
            class: CLASS_OPEN,
            key: u32::MAX - scope_end,
            text: opener,
        });
        inserts.push(Insertion {
            anchor: br.offset,
            class: CLASS_CLOSE,
            key: u32::MAX - br.target,
            text: closer,
        });
    }

    // Forward branches, in record order.
    for br in branches.iter().filter(|b| b.target > b.offset) {
        let enclosing = tree.innermost_containing(br.offset);

        // Jumping past the end of the innermost enclosing loop, but staying
        // within that loop's parent, is a break.
        if let Some(loop_id) = tree.nearest_loop(enclosing) {
            let loop_end = tree.scopes[loop_id].end;
            let parent_end = tree.scopes[tree.scopes[loop_id].parent].end;
            if br.target >= loop_end && br.target <= parent_end {
                let text = match br.cond {
                    BranchCond::Always => "  break;\n".to_owned(),
                    BranchCond::IfTrue => format!("  if ({}) {{ break; }}\n", cond_expr(br)?),
                    BranchCond::IfFalse => {
                        format!("  if (!({})) {{ break; }}\n", cond_expr(br)?)
                    }
                };
                inserts.push(Insertion {
                    anchor: br.offset,
                    class: CLASS_BREAK,
                    key: 0,
                    text,
                });
                continue;
            }
        }

        if br.cond == BranchCond::Always {
            // An unconditional jump out of a conditional scope whose body
            // ends right after the jump is the then/else separator.
            let next = map
                .offset_after(br.offset)
                .ok_or_else(|| internal(br.offset, "branch has no following instruction"))?;
            let cur = &tree.scopes[enclosing];
            if cur.kind == ScopeKind::Conditional && cur.end == next {
                let else_start = next;
                let else_end = br.target;
                tree.insert(else_start, else_end, ScopeKind::Conditional)?;
                inserts.push(Insertion {
                    anchor: else_start,
                    class: CLASS_OPEN,
                    key: u32::MAX - else_end,
                    text: "  else {\n".to_owned(),
                });
                inserts.push(Insertion {
                    anchor: else_end,
                    class: CLASS_CLOSE,
                    key: u32::MAX - else_start,
                    text: "  }\n".to_owned(),
                });
                continue;
            }
            return Err(unsupported(
                br.offset,
                "cannot reconstruct control flow for this jump pattern",
            ));
        }

        // Ordinary forward skip: wrap the jumped-over range in a
        // conditional. The branch skips when its test passes, so the kept
        // block runs on the complementary condition.
        let opener = match br.cond {
            BranchCond::IfFalse => format!("  if ({}) {{\n", cond_expr(br)?),
            BranchCond::IfTrue => format!("  if (!({})) {{\n", cond_expr(br)?),
            BranchCond::Always => unreachable!("handled above"),
        };
        tree.insert(br.offset, br.target, ScopeKind::Conditional)?;
        inserts.push(Insertion {
            anchor: br.offset,
            class: CLASS_OPEN,
            key: u32::MAX - br.target,
            text: opener,
        });
        inserts.push(Insertion {
            anchor: br.target,
            class: CLASS_CLOSE,
            key: u32::MAX - br.offset,
            text: "  }\n".to_owned(),
        });
    }

    inserts.sort_by(|a, b| {
        (a.anchor, a.class, a.key).cmp(&(b.anchor, b.class, b.key))
    });
    for ins in &inserts {
        let pos = if ins.anchor >= end {
            buf.len()
        } else {
            map.position(ins.anchor).ok_or_else(|| {
                internal(ins.anchor, "branch destination is not an instruction boundary")
            })?
        };
        map.splice(buf, pos, &ins.text);
    }
    Ok(())
}
