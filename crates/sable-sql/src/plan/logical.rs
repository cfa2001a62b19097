//! Logical plan tree and its EXPLAIN rendering.
//!
//! Conditions stay structured all the way here and are serialized to
//! text only while printing. Rendering is deterministic: condition and
//! column lists print in lexicographic order, and a join's children
//! print ordered by node kind (`Filter < Join < Project < Scan`), with
//! a kind-specific key breaking ties between same-kind children.

use crate::analyzer::{Condition, TabCol};

/// A node of the logical plan tree.
#[derive(Debug, Clone)]
pub enum LogicalNode {
    /// Base table scan.
    Scan {
        /// Scanned table.
        table: String,
    },
    /// Predicate application.
    Filter {
        /// Conditions, all of which must hold.
        conds: Vec<Condition>,
        /// Input node.
        child: Box<LogicalNode>,
    },
    /// Column selection.
    Project {
        /// Kept columns; ignored when `select_all`.
        cols: Vec<TabCol>,
        /// True for `SELECT *`.
        select_all: bool,
        /// Input node.
        child: Box<LogicalNode>,
    },
    /// Binary join.
    Join {
        /// Left input.
        left: Box<LogicalNode>,
        /// Right input.
        right: Box<LogicalNode>,
        /// Join conditions; empty for a Cartesian product.
        conds: Vec<Condition>,
    },
}

impl LogicalNode {
    /// Wraps a node in a filter, unless there is nothing to filter.
    pub fn filtered(self, conds: Vec<Condition>) -> LogicalNode {
        if conds.is_empty() {
            self
        } else {
            LogicalNode::Filter {
                conds,
                child: Box::new(self),
            }
        }
    }

    /// The tables visible in this node's output.
    pub fn output_tables(&self) -> Vec<String> {
        match self {
            LogicalNode::Scan { table } => vec![table.clone()],
            LogicalNode::Filter { child, .. } | LogicalNode::Project { child, .. } => {
                child.output_tables()
            }
            LogicalNode::Join { left, right, .. } => {
                let mut tables = left.output_tables();
                tables.extend(right.output_tables());
                tables
            }
        }
    }

    /// Print rank of the node kind: `Filter < Join < Project < Scan`.
    fn kind_rank(&self) -> u8 {
        match self {
            LogicalNode::Filter { .. } => 0,
            LogicalNode::Join { .. } => 1,
            LogicalNode::Project { .. } => 2,
            LogicalNode::Scan { .. } => 3,
        }
    }

    /// Tie-break key among same-kind siblings.
    fn sort_key(&self) -> String {
        match self {
            LogicalNode::Scan { table } => table.clone(),
            LogicalNode::Filter { conds, .. } => sorted_strings(conds).into_iter().next().unwrap_or_default(),
            LogicalNode::Project { cols, .. } => {
                let mut names: Vec<String> = cols.iter().map(|c| c.to_string()).collect();
                names.sort();
                names.into_iter().next().unwrap_or_default()
            }
            LogicalNode::Join { .. } => {
                let mut tables = self.output_tables();
                tables.sort();
                tables.into_iter().next().unwrap_or_default()
            }
        }
    }

    /// Renders the tree, tab-indented, one node per line.
    pub fn render(&self) -> String {
        let mut out = String::new();
        self.render_into(0, &mut out);
        out.push('\n');
        out
    }

    fn render_into(&self, indent: usize, out: &mut String) {
        for _ in 0..indent {
            out.push('\t');
        }
        match self {
            LogicalNode::Scan { table } => {
                out.push_str(&format!("Scan(table={table})"));
            }
            LogicalNode::Filter { conds, child } => {
                out.push_str(&format!(
                    "Filter(condition=[{}])\n",
                    sorted_strings(conds).join(",")
                ));
                child.render_into(indent + 1, out);
            }
            LogicalNode::Project {
                cols,
                select_all,
                child,
            } => {
                if *select_all {
                    out.push_str("Project(columns=[*])\n");
                } else {
                    let mut names: Vec<String> = cols.iter().map(|c| c.to_string()).collect();
                    names.sort();
                    out.push_str(&format!("Project(columns=[{}])\n", names.join(",")));
                }
                child.render_into(indent + 1, out);
            }
            LogicalNode::Join { left, right, conds } => {
                let mut tables = self.output_tables();
                tables.sort();
                out.push_str(&format!(
                    "Join(tables=[{}],condition=[{}])\n",
                    tables.join(","),
                    sorted_strings(conds).join(",")
                ));
                let (first, second) = if left_first(left, right) {
                    (left, right)
                } else {
                    (right, left)
                };
                first.render_into(indent + 1, out);
                out.push('\n');
                second.render_into(indent + 1, out);
            }
        }
    }
}

fn sorted_strings(conds: &[Condition]) -> Vec<String> {
    let mut out: Vec<String> = conds.iter().map(|c| c.to_string()).collect();
    out.sort();
    out
}

fn left_first(left: &LogicalNode, right: &LogicalNode) -> bool {
    if left.kind_rank() != right.kind_rank() {
        return left.kind_rank() < right.kind_rank();
    }
    let (lk, rk) = (left.sort_key(), right.sort_key());
    if lk.is_empty() || rk.is_empty() {
        return true;
    }
    lk < rk
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyzer::CondRhs;
    use crate::value::{CompOp, Value};

    fn cond_val(table: &str, col: &str, op: CompOp, v: i32) -> Condition {
        Condition {
            lhs: TabCol::new(table, col),
            op,
            rhs: CondRhs::Val {
                value: Value::Int(v),
                raw: v.to_le_bytes().to_vec(),
            },
        }
    }

    fn cond_col(lt: &str, lc: &str, rt: &str, rc: &str) -> Condition {
        Condition {
            lhs: TabCol::new(lt, lc),
            op: CompOp::Eq,
            rhs: CondRhs::Col(TabCol::new(rt, rc)),
        }
    }

    #[test]
    fn test_render_scan_filter_project() {
        let tree = LogicalNode::Project {
            cols: vec![TabCol::new("t", "v")],
            select_all: false,
            child: Box::new(
                LogicalNode::Scan { table: "t".into() }
                    .filtered(vec![cond_val("t", "id", CompOp::Ge, 2)]),
            ),
        };
        assert_eq!(
            tree.render(),
            "Project(columns=[t.v])\n\tFilter(condition=[t.id>=2])\n\t\tScan(table=t)\n"
        );
    }

    #[test]
    fn test_join_children_order_filter_before_scan() {
        let filtered_a = LogicalNode::Scan { table: "a".into() }
            .filtered(vec![cond_val("a", "x", CompOp::Gt, 50)]);
        let scan_b = LogicalNode::Scan { table: "b".into() };
        let tree = LogicalNode::Project {
            cols: vec![TabCol::new("a", "x")],
            select_all: false,
            child: Box::new(LogicalNode::Join {
                // Built right-deep on purpose: printing must reorder.
                left: Box::new(scan_b),
                right: Box::new(filtered_a),
                conds: vec![cond_col("a", "id", "b", "id")],
            }),
        };
        assert_eq!(
            tree.render(),
            "Project(columns=[a.x])\n\
             \tJoin(tables=[a,b],condition=[a.id=b.id])\n\
             \t\tFilter(condition=[a.x>50])\n\
             \t\t\tScan(table=a)\n\
             \t\tScan(table=b)\n"
        );
    }

    #[test]
    fn test_same_kind_children_order_lexicographic() {
        let tree = LogicalNode::Join {
            left: Box::new(LogicalNode::Scan { table: "zeta".into() }),
            right: Box::new(LogicalNode::Scan { table: "alpha".into() }),
            conds: vec![],
        };
        let rendered = tree.render();
        let alpha = rendered.find("Scan(table=alpha)").unwrap();
        let zeta = rendered.find("Scan(table=zeta)").unwrap();
        assert!(alpha < zeta);
    }

    #[test]
    fn test_condition_lists_sorted() {
        let tree = LogicalNode::Scan { table: "t".into() }.filtered(vec![
            cond_val("t", "z", CompOp::Lt, 9),
            cond_val("t", "a", CompOp::Gt, 1),
        ]);
        assert!(tree
            .render()
            .starts_with("Filter(condition=[t.a>1,t.z<9])"));
    }
}
