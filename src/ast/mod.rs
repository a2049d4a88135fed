//! JavaScript syntax tree facade.
//!
//! A thin wrapper over the oxc toolchain: `oxc_parser` parses, the result
//! is lowered into the flat tagged-variant [`Node`] enum the analysis stack
//! consumes, and [`codegen::generate`] serializes transformed trees back
//! through `oxc_codegen` for normalized output. The depth-first
//! [`visit::Visitor`] walk and the postorder mutating [`visit::rewrite`]
//! operate on the domain tree, which keeps the deobfuscation and taint
//! passes independent of the parser's arena lifetimes.
//!
//! Parsing is best-effort: recoverable oxc diagnostics and constructs the
//! lowering cannot represent are recorded as issues on the outcome, so
//! collected real-world scripts still yield a usable tree.

pub mod codegen;
pub mod parser;
pub mod visit;

pub use codegen::{generate, GenOptions};
pub use parser::{parse, parse_expression, ParseOutcome};
pub use visit::{
    clone_node, for_each_child, for_each_child_mut, insert_stmt, rewrite, walk, Rewrite, Visitor,
};

use serde::Serialize;

/// Source position: 1-based line and column plus the byte range the node
/// covers in the parsed text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct Span {
    pub line: u32,
    pub col: u32,
    pub start: u32,
    pub end: u32,
}

/// Kind of a variable declaration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeclKind {
    Var,
    Let,
    Const,
}

impl DeclKind {
    pub fn as_str(self) -> &'static str {
        match self {
            DeclKind::Var => "var",
            DeclKind::Let => "let",
            DeclKind::Const => "const",
        }
    }
}

/// One declarator inside a `var`/`let`/`const` statement.
#[derive(Debug, Clone, PartialEq)]
pub struct Declarator {
    pub name: String,
    pub init: Option<Node>,
    pub span: Span,
}

/// A `case`/`default` arm of a switch statement.
#[derive(Debug, Clone, PartialEq)]
pub struct SwitchCase {
    pub test: Option<Node>,
    pub body: Vec<Node>,
    pub span: Span,
}

/// Function parameter: identifier, optional default, optional rest marker.
#[derive(Debug, Clone, PartialEq)]
pub struct Param {
    pub name: String,
    pub default: Option<Node>,
    pub rest: bool,
}

impl Param {
    pub fn simple(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            default: None,
            rest: false,
        }
    }
}

/// Property in an object literal.
#[derive(Debug, Clone, PartialEq)]
pub struct Property {
    pub key: Node,
    pub value: Node,
    pub computed: bool,
    pub shorthand: bool,
}

/// Method or field inside a class body.
#[derive(Debug, Clone, PartialEq)]
pub struct ClassMember {
    pub key: String,
    pub kind: ClassMemberKind,
    pub is_static: bool,
    pub value: Node,
    pub span: Span,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClassMemberKind {
    Method,
    Getter,
    Setter,
    Field,
}

/// Flat tagged-variant JavaScript node.
///
/// Statements and expressions share one enum; helper predicates
/// (`is_statement`, `is_call`, ...) dispatch on the tag.
#[derive(Debug, Clone, PartialEq)]
pub enum Node {
    Program {
        body: Vec<Node>,
    },

    // ---- statements ----
    VarDecl {
        kind: DeclKind,
        decls: Vec<Declarator>,
        span: Span,
    },
    FunctionDecl {
        name: String,
        params: Vec<Param>,
        body: Box<Node>,
        is_async: bool,
        is_generator: bool,
        span: Span,
    },
    ClassDecl {
        name: String,
        superclass: Option<Box<Node>>,
        members: Vec<ClassMember>,
        span: Span,
    },
    Block {
        body: Vec<Node>,
        span: Span,
    },
    If {
        test: Box<Node>,
        consequent: Box<Node>,
        alternate: Option<Box<Node>>,
        span: Span,
    },
    For {
        init: Option<Box<Node>>,
        test: Option<Box<Node>>,
        update: Option<Box<Node>>,
        body: Box<Node>,
        span: Span,
    },
    ForIn {
        left: Box<Node>,
        right: Box<Node>,
        body: Box<Node>,
        /// true for `for..of`, false for `for..in`
        of: bool,
        span: Span,
    },
    While {
        test: Box<Node>,
        body: Box<Node>,
        span: Span,
    },
    DoWhile {
        body: Box<Node>,
        test: Box<Node>,
        span: Span,
    },
    Switch {
        discriminant: Box<Node>,
        cases: Vec<SwitchCase>,
        span: Span,
    },
    Try {
        block: Box<Node>,
        param: Option<String>,
        handler: Option<Box<Node>>,
        finalizer: Option<Box<Node>>,
        span: Span,
    },
    Return {
        arg: Option<Box<Node>>,
        span: Span,
    },
    Throw {
        arg: Box<Node>,
        span: Span,
    },
    Break {
        label: Option<String>,
        span: Span,
    },
    Continue {
        label: Option<String>,
        span: Span,
    },
    Labeled {
        label: String,
        body: Box<Node>,
        span: Span,
    },
    ExprStmt {
        expr: Box<Node>,
        span: Span,
    },
    Empty {
        span: Span,
    },
    Debugger {
        span: Span,
    },

    // ---- expressions ----
    Ident {
        name: String,
        span: Span,
    },
    Num {
        value: f64,
        raw: String,
        span: Span,
    },
    Str {
        value: String,
        span: Span,
    },
    Template {
        quasis: Vec<String>,
        exprs: Vec<Node>,
        span: Span,
    },
    Regex {
        pattern: String,
        flags: String,
        span: Span,
    },
    Bool {
        value: bool,
        span: Span,
    },
    Null {
        span: Span,
    },
    This {
        span: Span,
    },
    Array {
        elements: Vec<Option<Node>>,
        span: Span,
    },
    Object {
        props: Vec<Property>,
        span: Span,
    },
    FunctionExpr {
        name: Option<String>,
        params: Vec<Param>,
        body: Box<Node>,
        is_async: bool,
        is_generator: bool,
        span: Span,
    },
    Arrow {
        params: Vec<Param>,
        body: Box<Node>,
        /// true when the body is a bare expression
        expression: bool,
        is_async: bool,
        span: Span,
    },
    Unary {
        op: &'static str,
        arg: Box<Node>,
        span: Span,
    },
    Update {
        op: &'static str,
        prefix: bool,
        arg: Box<Node>,
        span: Span,
    },
    Binary {
        op: &'static str,
        left: Box<Node>,
        right: Box<Node>,
        span: Span,
    },
    Logical {
        op: &'static str,
        left: Box<Node>,
        right: Box<Node>,
        span: Span,
    },
    Assign {
        op: &'static str,
        target: Box<Node>,
        value: Box<Node>,
        span: Span,
    },
    Conditional {
        test: Box<Node>,
        consequent: Box<Node>,
        alternate: Box<Node>,
        span: Span,
    },
    Call {
        callee: Box<Node>,
        args: Vec<Node>,
        optional: bool,
        span: Span,
    },
    New {
        callee: Box<Node>,
        args: Vec<Node>,
        span: Span,
    },
    Member {
        object: Box<Node>,
        property: Box<Node>,
        computed: bool,
        optional: bool,
        span: Span,
    },
    Sequence {
        exprs: Vec<Node>,
        span: Span,
    },
    Spread {
        arg: Box<Node>,
        span: Span,
    },
    Await {
        arg: Box<Node>,
        span: Span,
    },
    Yield {
        arg: Option<Box<Node>>,
        delegate: bool,
        span: Span,
    },
}

impl Node {
    pub fn span(&self) -> Span {
        match self {
            Node::Program { .. } => Span::default(),
            Node::VarDecl { span, .. }
            | Node::FunctionDecl { span, .. }
            | Node::ClassDecl { span, .. }
            | Node::Block { span, .. }
            | Node::If { span, .. }
            | Node::For { span, .. }
            | Node::ForIn { span, .. }
            | Node::While { span, .. }
            | Node::DoWhile { span, .. }
            | Node::Switch { span, .. }
            | Node::Try { span, .. }
            | Node::Return { span, .. }
            | Node::Throw { span, .. }
            | Node::Break { span, .. }
            | Node::Continue { span, .. }
            | Node::Labeled { span, .. }
            | Node::ExprStmt { span, .. }
            | Node::Empty { span }
            | Node::Debugger { span }
            | Node::Ident { span, .. }
            | Node::Num { span, .. }
            | Node::Str { span, .. }
            | Node::Template { span, .. }
            | Node::Regex { span, .. }
            | Node::Bool { span, .. }
            | Node::Null { span }
            | Node::This { span }
            | Node::Array { span, .. }
            | Node::Object { span, .. }
            | Node::FunctionExpr { span, .. }
            | Node::Arrow { span, .. }
            | Node::Unary { span, .. }
            | Node::Update { span, .. }
            | Node::Binary { span, .. }
            | Node::Logical { span, .. }
            | Node::Assign { span, .. }
            | Node::Conditional { span, .. }
            | Node::Call { span, .. }
            | Node::New { span, .. }
            | Node::Member { span, .. }
            | Node::Sequence { span, .. }
            | Node::Spread { span, .. }
            | Node::Await { span, .. }
            | Node::Yield { span, .. } => *span,
        }
    }

    /// Short tag name for diagnostics and graph nodes.
    pub fn kind(&self) -> &'static str {
        match self {
            Node::Program { .. } => "Program",
            Node::VarDecl { .. } => "VarDecl",
            Node::FunctionDecl { .. } => "FunctionDecl",
            Node::ClassDecl { .. } => "ClassDecl",
            Node::Block { .. } => "Block",
            Node::If { .. } => "If",
            Node::For { .. } => "For",
            Node::ForIn { .. } => "ForIn",
            Node::While { .. } => "While",
            Node::DoWhile { .. } => "DoWhile",
            Node::Switch { .. } => "Switch",
            Node::Try { .. } => "Try",
            Node::Return { .. } => "Return",
            Node::Throw { .. } => "Throw",
            Node::Break { .. } => "Break",
            Node::Continue { .. } => "Continue",
            Node::Labeled { .. } => "Labeled",
            Node::ExprStmt { .. } => "ExprStmt",
            Node::Empty { .. } => "Empty",
            Node::Debugger { .. } => "Debugger",
            Node::Ident { .. } => "Ident",
            Node::Num { .. } => "Num",
            Node::Str { .. } => "Str",
            Node::Template { .. } => "Template",
            Node::Regex { .. } => "Regex",
            Node::Bool { .. } => "Bool",
            Node::Null { .. } => "Null",
            Node::This { .. } => "This",
            Node::Array { .. } => "Array",
            Node::Object { .. } => "Object",
            Node::FunctionExpr { .. } => "FunctionExpr",
            Node::Arrow { .. } => "Arrow",
            Node::Unary { .. } => "Unary",
            Node::Update { .. } => "Update",
            Node::Binary { .. } => "Binary",
            Node::Logical { .. } => "Logical",
            Node::Assign { .. } => "Assign",
            Node::Conditional { .. } => "Conditional",
            Node::Call { .. } => "Call",
            Node::New { .. } => "New",
            Node::Member { .. } => "Member",
            Node::Sequence { .. } => "Sequence",
            Node::Spread { .. } => "Spread",
            Node::Await { .. } => "Await",
            Node::Yield { .. } => "Yield",
        }
    }

    pub fn is_statement(&self) -> bool {
        matches!(
            self,
            Node::VarDecl { .. }
                | Node::FunctionDecl { .. }
                | Node::ClassDecl { .. }
                | Node::Block { .. }
                | Node::If { .. }
                | Node::For { .. }
                | Node::ForIn { .. }
                | Node::While { .. }
                | Node::DoWhile { .. }
                | Node::Switch { .. }
                | Node::Try { .. }
                | Node::Return { .. }
                | Node::Throw { .. }
                | Node::Break { .. }
                | Node::Continue { .. }
                | Node::Labeled { .. }
                | Node::ExprStmt { .. }
                | Node::Empty { .. }
                | Node::Debugger { .. }
        )
    }

    pub fn is_call(&self) -> bool {
        matches!(self, Node::Call { .. })
    }

    pub fn is_member(&self) -> bool {
        matches!(self, Node::Member { .. })
    }

    pub fn is_literal(&self) -> bool {
        matches!(
            self,
            Node::Num { .. } | Node::Str { .. } | Node::Bool { .. } | Node::Null { .. } | Node::Regex { .. }
        )
    }

    pub fn is_function(&self) -> bool {
        matches!(
            self,
            Node::FunctionDecl { .. } | Node::FunctionExpr { .. } | Node::Arrow { .. }
        )
    }

    pub fn as_ident(&self) -> Option<&str> {
        match self {
            Node::Ident { name, .. } => Some(name),
            _ => None,
        }
    }

    pub fn as_str_lit(&self) -> Option<&str> {
        match self {
            Node::Str { value, .. } => Some(value),
            _ => None,
        }
    }

    pub fn as_num_lit(&self) -> Option<f64> {
        match self {
            Node::Num { value, .. } => Some(*value),
            // `-5` parses as Unary, still a numeric constant
            Node::Unary { op: "-", arg, .. } => arg.as_num_lit().map(|v| -v),
            _ => None,
        }
    }

    pub fn num(value: f64, span: Span) -> Node {
        let raw = if value.fract() == 0.0 && value.abs() < 1e15 {
            format!("{}", value as i64)
        } else {
            format!("{value}")
        };
        Node::Num { value, raw, span }
    }

    pub fn str(value: impl Into<String>, span: Span) -> Node {
        Node::Str {
            value: value.into(),
            span,
        }
    }

    pub fn ident(name: impl Into<String>, span: Span) -> Node {
        Node::Ident {
            name: name.into(),
            span,
        }
    }

    /// Dotted member-expression path like `navigator.userAgent`, when the
    /// chain is made only of non-computed identifier links.
    pub fn member_path(&self) -> Option<String> {
        match self {
            Node::Ident { name, .. } => Some(name.clone()),
            Node::This { .. } => Some("this".into()),
            Node::Member {
                object,
                property,
                computed: false,
                ..
            } => {
                let base = object.member_path()?;
                let prop = property.as_ident()?;
                Some(format!("{base}.{prop}"))
            }
            _ => None,
        }
    }
}
