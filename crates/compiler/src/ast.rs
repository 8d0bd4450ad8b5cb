//! Expression/statement AST nodes the parser builds and the code generator
//! walks (spec §1: "an AST-building parser, assumed, not specified in
//! detail" — this module is the minimal AST that satisfies every operation
//! the compiler needs to lower, grounded on the teacher's `ast.rs` shape of
//! small `#[derive(Debug, Clone)]` node enums plus a `SourceLocation`
//! carried on every statement.

use zym_core::qualifier::Qualifier;

/// Line in the combined source a node was parsed from (already mapped back
/// to the original file by the time it reaches a diagnostic — the compiler
/// re-derives the (file, line) pair via the active module's line map).
pub type Line = u32;

#[derive(Debug, Clone, PartialEq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    BAnd,
    BOr,
    BXor,
    BLShift,
    BRShiftI,
    BRShiftU,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

#[derive(Debug, Clone, PartialEq)]
pub enum UnaryOp {
    Neg,
    Not,
    BNot,
}

#[derive(Debug, Clone, PartialEq)]
pub enum LogicalOp {
    And,
    Or,
}

/// A struct literal's named-init field: `{ name: expr }` or `...spread_expr`.
#[derive(Debug, Clone)]
pub enum StructInitField {
    Named { name: String, value: Expr },
    Spread(Expr),
}

#[derive(Debug, Clone)]
pub enum Expr {
    Null,
    Bool(bool),
    Number(f64),
    /// String literal text with escapes already decoded (spec §4.1: the
    /// lexer hands back raw text between the quotes; decoding is the
    /// parser's job, done when this node is built).
    Str(String),
    Identifier(String),
    Unary {
        op: UnaryOp,
        operand: Box<Expr>,
        line: Line,
    },
    Binary {
        op: BinaryOp,
        left: Box<Expr>,
        right: Box<Expr>,
        line: Line,
    },
    Logical {
        op: LogicalOp,
        left: Box<Expr>,
        right: Box<Expr>,
        line: Line,
    },
    Ternary {
        cond: Box<Expr>,
        then_branch: Box<Expr>,
        else_branch: Box<Expr>,
        line: Line,
    },
    Assign {
        target: Box<Expr>,
        value: Box<Expr>,
        /// `slot x = v` rebinds only the outer reference layer rather than
        /// writing through nested references (spec §4.3.3/§8).
        is_slot_rebind: bool,
        line: Line,
    },
    /// Compound assignment (`x += 1`) desugars to `Assign` at parse time
    /// wrapping a `Binary` of the base form, so the code generator only
    /// ever sees plain `Assign`.
    Call {
        callee: Box<Expr>,
        args: Vec<Expr>,
        line: Line,
    },
    Index {
        container: Box<Expr>,
        index: Box<Expr>,
        line: Line,
    },
    Property {
        container: Box<Expr>,
        name: String,
        line: Line,
    },
    List(Vec<Expr>),
    Map(Vec<(String, Expr)>),
    /// `Name{ field: value, ..., ...other }` named-init, duplicate field is
    /// a compile error, `...other` spreads another struct's fields.
    StructInitNamed {
        name: String,
        fields: Vec<StructInitField>,
        line: Line,
    },
    /// `ref <lvalue>` / `slot <lvalue>` taken in expression position (e.g.
    /// as a call argument under a `ref`/`slot` parameter qualifier is
    /// implicit at the call site; this variant covers explicit
    /// `var r = ref x;`-style reference creation).
    MakeRef {
        qualifier: Qualifier,
        target: Box<Expr>,
        line: Line,
    },
    TypeOf {
        operand: Box<Expr>,
        line: Line,
    },
    Clone {
        operand: Box<Expr>,
        line: Line,
    },
    /// `...expr` outside a struct literal or call spread position. Per
    /// spec §9's open question, the single representation this codebase
    /// settles on is: a `Spread` node only ever appears inside
    /// `StructInitField::Spread` or as a list-literal element; any other
    /// context is a parse-time error (see DESIGN.md).
    Spread {
        operand: Box<Expr>,
        line: Line,
    },
    /// An inline anonymous function; compiled the same way a named nested
    /// function is, minus the hoisting-table entry.
    FuncLiteral {
        params: Vec<Param>,
        body: Vec<Stmt>,
        line: Line,
    },
}

impl Expr {
    pub fn line(&self) -> Line {
        match self {
            Expr::Unary { line, .. }
            | Expr::Binary { line, .. }
            | Expr::Logical { line, .. }
            | Expr::Ternary { line, .. }
            | Expr::Assign { line, .. }
            | Expr::Call { line, .. }
            | Expr::Index { line, .. }
            | Expr::Property { line, .. }
            | Expr::StructInitNamed { line, .. }
            | Expr::MakeRef { line, .. }
            | Expr::TypeOf { line, .. }
            | Expr::Clone { line, .. }
            | Expr::Spread { line, .. }
            | Expr::FuncLiteral { line, .. } => *line,
            _ => 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Param {
    pub name: String,
    pub qualifier: Qualifier,
}

/// Declaration-site qualifier on `var`/`val`/`ref`/`clone` bindings; mirrors
/// [`Qualifier`] but `Ref` here always carries the l-value expression being
/// bound (so it is folded directly into `Stmt::VarDecl`'s `init`, which for
/// a `ref` binding is itself a `MakeRef` expression built by the parser).
pub type VarQualifier = Qualifier;

#[derive(Debug, Clone)]
pub enum Stmt {
    Expr(Expr),
    VarDecl {
        name: String,
        qualifier: VarQualifier,
        init: Option<Expr>,
        line: Line,
    },
    FuncDecl {
        name: String,
        params: Vec<Param>,
        body: Vec<Stmt>,
        line: Line,
    },
    StructDecl {
        name: String,
        fields: Vec<String>,
        line: Line,
    },
    EnumDecl {
        name: String,
        variants: Vec<String>,
        line: Line,
    },
    Return {
        value: Option<Expr>,
        line: Line,
    },
    If {
        cond: Expr,
        then_branch: Vec<Stmt>,
        else_branch: Option<Vec<Stmt>>,
        line: Line,
    },
    While {
        cond: Expr,
        body: Vec<Stmt>,
        line: Line,
    },
    DoWhile {
        body: Vec<Stmt>,
        cond: Expr,
        line: Line,
    },
    For {
        init: Option<Box<Stmt>>,
        cond: Option<Expr>,
        increment: Option<Expr>,
        body: Vec<Stmt>,
        line: Line,
    },
    Break {
        line: Line,
    },
    Continue {
        line: Line,
    },
    Block(Vec<Stmt>),
    Switch {
        discriminant: Expr,
        cases: Vec<SwitchCase>,
        default: Option<Vec<Stmt>>,
        line: Line,
    },
    Goto {
        label: String,
        line: Line,
    },
    Label {
        name: String,
        line: Line,
    },
}

#[derive(Debug, Clone)]
pub struct SwitchCase {
    pub value: Expr,
    pub body: Vec<Stmt>,
}

/// The top-level parse result for a single (already module-loader-combined)
/// source: every statement in order. Function/struct/enum declarations are
/// mixed in with ordinary statements, matching "script with hoisted
/// declarations" semantics rather than a separate top-level items list.
#[derive(Debug, Clone, Default)]
pub struct Program {
    pub statements: Vec<Stmt>,
}
