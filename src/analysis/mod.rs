use std::collections::BTreeSet;

use crate::ast::Expr;

/// The variables a formula reads (`depends`) and writes (`assigns`).
/// Ordered sets keep every downstream artifact (graph node numbering,
/// compiled chunks) deterministic for identical input batches.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VariableSet {
    depends: BTreeSet<String>,
    assigns: BTreeSet<String>,
}

impl VariableSet {
    pub fn new() -> Self {
        VariableSet::default()
    }

    pub fn from_depend(name: impl Into<String>) -> Self {
        let mut set = VariableSet::new();
        set.depends.insert(name.into());
        set
    }

    pub fn from_assign(name: impl Into<String>) -> Self {
        let mut set = VariableSet::new();
        set.assigns.insert(name.into());
        set
    }

    pub fn depends(&self) -> &BTreeSet<String> {
        &self.depends
    }

    pub fn assigns(&self) -> &BTreeSet<String> {
        &self.assigns
    }

    pub fn add_depend(&mut self, name: impl Into<String>) {
        self.depends.insert(name.into());
    }

    pub fn add_assign(&mut self, name: impl Into<String>) {
        self.assigns.insert(name.into());
    }

    pub fn combine(&mut self, other: VariableSet) {
        self.depends.extend(other.depends);
        self.assigns.extend(other.assigns);
    }
}

/// Compute the read/write variable sets of an expression tree.
///
/// Dotted property chains contribute one compound name (`a.b.c`), never
/// the intermediate segments; a call contributes its argument reads but
/// the callee name is not a variable.
pub fn analyze(expr: &Expr) -> VariableSet {
    match expr {
        Expr::Literal { .. } => VariableSet::new(),

        Expr::Identifier { name } => VariableSet::from_depend(name.lexeme.clone()),

        Expr::Unary { right, .. } => analyze(right),

        Expr::Binary { left, right, .. } | Expr::Logic { left, right, .. } => {
            let mut set = analyze(left);
            set.combine(analyze(right));
            set
        }

        Expr::Assign { name, value } => {
            let mut set = VariableSet::from_assign(name.lexeme.clone());
            set.combine(analyze(value));
            set
        }

        Expr::Get { .. } => VariableSet::from_depend(dotted_path(expr)),

        Expr::Set { object, name, value } => {
            let mut path = Vec::new();
            collect_path(object, &mut path);
            path.push(name.lexeme.clone());
            let mut set = VariableSet::from_assign(path.join("."));
            set.combine(analyze(value));
            set
        }

        Expr::Call { args, .. } => {
            let mut set = VariableSet::new();
            for arg in args {
                set.combine(analyze(arg));
            }
            set
        }

        Expr::If { condition, then_branch, else_branch } => {
            let mut set = analyze(condition);
            set.combine(analyze(then_branch));
            if let Some(else_branch) = else_branch {
                set.combine(analyze(else_branch));
            }
            set
        }
    }
}

fn dotted_path(expr: &Expr) -> String {
    let mut path = Vec::new();
    collect_path(expr, &mut path);
    path.join(".")
}

fn collect_path(expr: &Expr, path: &mut Vec<String>) {
    match expr {
        Expr::Identifier { name } => path.push(name.lexeme.clone()),
        Expr::Get { object, name } => {
            collect_path(object, path);
            path.push(name.lexeme.clone());
        }
        // A computed object segment has no stable name.
        _ => path.push("?".to_string()),
    }
}

/// A parsed formula paired with its original batch index and its
/// derived read/write sets. The sets are computed once at construction
/// and exposed as immutable borrows.
#[derive(Debug, Clone)]
pub struct FormulaInfo {
    expr: Expr,
    index: usize,
    precursors: BTreeSet<String>,
    successors: BTreeSet<String>,
}

impl FormulaInfo {
    pub fn new(expr: Expr, index: usize) -> Self {
        let vars = analyze(&expr);
        FormulaInfo {
            expr,
            index,
            precursors: vars.depends().clone(),
            successors: vars.assigns().clone(),
        }
    }

    pub fn expr(&self) -> &Expr {
        &self.expr
    }

    pub fn index(&self) -> usize {
        self.index
    }

    /// Variables this formula reads.
    pub fn precursors(&self) -> &BTreeSet<String> {
        &self.precursors
    }

    /// Variables this formula writes.
    pub fn successors(&self) -> &BTreeSet<String> {
        &self.successors
    }

    pub fn is_assign(&self) -> bool {
        self.expr.is_assign()
    }
}
