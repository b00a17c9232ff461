//! C-like rendering of trees for diagnostics.
//!
//! `{}` prints labels; the alternate form `{:#}` also prints node ids.

use super::expr::{BinaryOp, ExprKind, ExprNode, UnaryOp};
use super::stmt::{ReduceOp, StmtKind, StmtNode};
use std::fmt;

/// Indenting line writer.
#[derive(Debug)]
pub struct CodeFormatter {
    output: String,
    indent_level: usize,
    indent_str: String,
    at_line_start: bool,
}

impl CodeFormatter {
    pub fn new(indent_str: &str) -> Self {
        Self { output: String::new(), indent_level: 0, indent_str: indent_str.to_string(), at_line_start: true }
    }

    pub fn indent(&mut self) {
        self.indent_level += 1;
    }

    pub fn dedent(&mut self) {
        self.indent_level = self.indent_level.saturating_sub(1);
    }

    pub fn write(&mut self, s: &str) {
        for c in s.chars() {
            if c == '\n' {
                self.output.push('\n');
                self.at_line_start = true;
                continue;
            }
            if self.at_line_start {
                for _ in 0..self.indent_level {
                    self.output.push_str(&self.indent_str);
                }
                self.at_line_start = false;
            }
            self.output.push(c);
        }
    }

    pub fn writeln(&mut self, s: &str) {
        self.write(s);
        self.write("\n");
    }

    /// Write `header {`, the indented block, then `}`.
    pub fn block<F: FnOnce(&mut Self)>(&mut self, header: &str, f: F) {
        self.write(header);
        self.writeln(" {");
        self.indent();
        f(self);
        self.dedent();
        self.writeln("}");
    }

    pub fn finish(self) -> String {
        self.output
    }
}

impl fmt::Display for ExprNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            ExprKind::IntConst(v) => write!(f, "{}", v),
            ExprKind::BoolConst(b) => write!(f, "{}", b),
            ExprKind::Var(n) => write!(f, "{}", n),
            ExprKind::Load { var, indices } => {
                write!(f, "{}", var)?;
                for i in indices {
                    write!(f, "[{}]", i)?;
                }
                Ok(())
            }
            ExprKind::Binary { op: op @ (BinaryOp::Min | BinaryOp::Max), lhs, rhs } => {
                write!(f, "{}({}, {})", op.symbol(), lhs, rhs)
            }
            ExprKind::Binary { op, lhs, rhs } => write!(f, "({} {} {})", lhs, op.symbol(), rhs),
            ExprKind::Unary { op: UnaryOp::Neg, operand } => write!(f, "-{}", operand),
            ExprKind::Unary { op: UnaryOp::LNot, operand } => write!(f, "!{}", operand),
            ExprKind::IfExpr { cond, then_case, else_case } => {
                write!(f, "({} ? {} : {})", cond, then_case, else_case)
            }
        }
    }
}

fn reduce_symbol(op: ReduceOp) -> &'static str {
    match op {
        ReduceOp::Add => "+=",
        ReduceOp::Mul => "*=",
        ReduceOp::Min => "min=",
        ReduceOp::Max => "max=",
    }
}

fn write_stmt(out: &mut CodeFormatter, s: &StmtNode, with_ids: bool) {
    let mut tag = String::new();
    if with_ids {
        tag.push_str(&format!("{} ", s.id));
    }
    if let Some(l) = &s.label {
        tag.push_str(&format!("{}: ", l));
    }
    match &s.kind {
        StmtKind::StmtSeq { stmts } => {
            if tag.is_empty() {
                for c in stmts {
                    write_stmt(out, c, with_ids);
                }
            } else {
                out.block(tag.trim_end(), |out| {
                    for c in stmts {
                        write_stmt(out, c, with_ids);
                    }
                });
            }
        }
        StmtKind::VarDef { name, buffer, body } => {
            let shape: Vec<String> = buffer.shape.iter().map(|e| e.to_string()).collect();
            let header = format!(
                "{}{:?} {}[{}] /* {:?}, {:?} */",
                tag,
                buffer.dtype,
                name,
                shape.join(", "),
                buffer.atype,
                buffer.mtype
            );
            out.block(&header, |out| write_stmt(out, body, with_ids));
        }
        StmtKind::Store { var, indices, expr } => {
            let idx: String = indices.iter().map(|i| format!("[{}]", i)).collect();
            out.writeln(&format!("{}{}{} = {};", tag, var, idx, expr));
        }
        StmtKind::ReduceTo { var, indices, op, expr } => {
            let idx: String = indices.iter().map(|i| format!("[{}]", i)).collect();
            out.writeln(&format!("{}{}{} {} {};", tag, var, idx, reduce_symbol(*op), expr));
        }
        StmtKind::For { iter, begin, end, step, property, body, .. } => {
            let mut header = String::new();
            if property.parallel {
                header.push_str("#pragma parallel\n");
            }
            header.push_str(&tag);
            if step.as_int() == Some(1) {
                header.push_str(&format!("for {} in {}..{}", iter, begin, end));
            } else {
                header.push_str(&format!("for {} in {}..{} step {}", iter, begin, end, step));
            }
            out.block(&header, |out| write_stmt(out, body, with_ids));
        }
        StmtKind::If { cond, then_case, else_case } => {
            out.block(&format!("{}if {}", tag, cond), |out| write_stmt(out, then_case, with_ids));
            if let Some(e) = else_case {
                out.block("else", |out| write_stmt(out, e, with_ids));
            }
        }
        StmtKind::Assert { cond, body } => {
            out.block(&format!("{}assert {}", tag, cond), |out| write_stmt(out, body, with_ids));
        }
        StmtKind::Eval { expr } => out.writeln(&format!("{}{};", tag, expr)),
    }
}

impl fmt::Display for StmtNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut out = CodeFormatter::new("  ");
        write_stmt(&mut out, self, f.alternate());
        f.write_str(out.finish().trim_end())
    }
}

#[cfg(test)]
mod tests {
    use crate::ast::expr::{add, floor_div, int, load, max, var};
    use crate::ast::stmt::{for_range, labeled, seq, store};

    #[test]
    fn test_expr_display() {
        assert_eq!(add(var("i"), int(1)).to_string(), "(i + 1)");
        assert_eq!(floor_div(var("i"), int(4)).to_string(), "(i // 4)");
        assert_eq!(max(var("a"), int(0)).to_string(), "max(a, 0)");
        assert_eq!(load("a", vec![var("i"), var("j")]).to_string(), "a[i][j]");
    }

    #[test]
    fn test_stmt_display() {
        let s = labeled(
            "L",
            for_range("i", int(0), int(4), seq(vec![store("a", vec![var("i")], int(0))])),
        );
        let text = s.to_string();
        assert_eq!(text, "L: for i in 0..4 {\n  a[i] = 0;\n}");
        let with_ids = format!("{:#}", s);
        assert!(with_ids.starts_with(&format!("{} L: for", s.id)));
    }
}
