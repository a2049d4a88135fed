//! Parsing: oxc in front, the domain tree behind.
//!
//! Source goes through `oxc_parser` (script first, retried as a module when
//! the script parse complains about module syntax), and the resulting oxc
//! AST is lowered into the owned [`Node`] tree. Constructs the domain model
//! does not carry (destructuring patterns, TS/JSX forms, import machinery)
//! are recorded as issues and lowered to neutral placeholders, so one
//! exotic construct does not lose the rest of a harvested script.

use oxc_allocator::Allocator;
use oxc_ast::ast as js;
use oxc_parser::{ParseOptions, Parser};
use oxc_span::{GetSpan, SourceType};

use super::{
    ClassMember, ClassMemberKind, DeclKind, Declarator, Node, Param, Property, Span, SwitchCase,
};

/// A recovered parse problem with its position.
#[derive(Debug, Clone)]
pub struct ParseIssue {
    pub message: String,
    pub span: Span,
}

impl std::fmt::Display for ParseIssue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} at line {}, column {}",
            self.message, self.span.line, self.span.col
        )
    }
}

impl std::error::Error for ParseIssue {}

/// Best-effort tree plus everything that went wrong along the way.
#[derive(Debug)]
pub struct ParseOutcome {
    pub program: Node,
    pub errors: Vec<ParseIssue>,
}

impl ParseOutcome {
    pub fn is_clean(&self) -> bool {
        self.errors.is_empty()
    }
}

fn parse_options() -> ParseOptions {
    ParseOptions {
        // Harvested scripts are often fragments with a bare top-level return.
        allow_return_outside_function: true,
        // Parens carry no meaning in the domain tree; regeneration re-derives
        // them from precedence.
        preserve_parens: false,
        ..ParseOptions::default()
    }
}

/// Parse a full program. Fails only when oxc produced nothing usable;
/// otherwise the outcome carries a best-effort tree and the issue list.
pub fn parse(source: &str) -> Result<ParseOutcome, ParseIssue> {
    let allocator = Allocator::default();
    let parse_with = |ty: SourceType| {
        Parser::new(&allocator, source, ty)
            .with_options(parse_options())
            .parse()
    };

    // Scripts admit constructs modules reject (and vice versa); keep the
    // parse with fewer complaints.
    let script = parse_with(SourceType::cjs());
    let ret = if script.errors.is_empty() {
        script
    } else {
        let module = parse_with(SourceType::mjs());
        if module.errors.len() < script.errors.len() {
            module
        } else {
            script
        }
    };

    let mut errors: Vec<ParseIssue> = ret
        .errors
        .iter()
        .map(|e| ParseIssue {
            message: e.to_string(),
            span: Span::default(),
        })
        .collect();

    if ret.panicked {
        return Err(errors.into_iter().next().unwrap_or(ParseIssue {
            message: "parser panicked with no diagnostics".into(),
            span: Span::default(),
        }));
    }

    let mut lowerer = Lowerer::new(source);
    let program = lowerer.program(&ret.program);
    errors.append(&mut lowerer.issues);

    let nothing_parsed = matches!(&program, Node::Program { body } if body.is_empty());
    if nothing_parsed && !errors.is_empty() {
        return Err(errors.remove(0));
    }
    Ok(ParseOutcome { program, errors })
}

/// Parse a single expression (callers holding an expression fragment).
pub fn parse_expression(source: &str) -> Result<Node, ParseIssue> {
    let wrapped = format!("({source});");
    let outcome = parse(&wrapped)?;
    if let Some(issue) = outcome.errors.into_iter().next() {
        return Err(issue);
    }
    let Node::Program { mut body } = outcome.program else {
        unreachable!("parse always yields a program");
    };
    match (body.pop(), body.is_empty()) {
        (Some(Node::ExprStmt { expr, .. }), true) => Ok(*expr),
        _ => Err(ParseIssue {
            message: "input is not a single expression".into(),
            span: Span::default(),
        }),
    }
}

// ---------------------------------------------------------------------------
// Lowering: oxc AST → domain tree
// ---------------------------------------------------------------------------

struct Lowerer<'s> {
    source: &'s str,
    /// Byte offset of each line start, for span translation.
    line_starts: Vec<u32>,
    issues: Vec<ParseIssue>,
}

impl<'s> Lowerer<'s> {
    fn new(source: &'s str) -> Self {
        let mut line_starts = vec![0u32];
        for (i, b) in source.bytes().enumerate() {
            if b == b'\n' {
                line_starts.push(i as u32 + 1);
            }
        }
        Self {
            source,
            line_starts,
            issues: Vec::new(),
        }
    }

    fn span(&self, s: oxc_span::Span) -> Span {
        let idx = self.line_starts.partition_point(|&start| start <= s.start) - 1;
        Span {
            line: idx as u32 + 1,
            col: s.start - self.line_starts[idx] + 1,
            start: s.start,
            end: s.end,
        }
    }

    fn slice(&self, s: oxc_span::Span) -> &str {
        self.source
            .get(s.start as usize..s.end as usize)
            .unwrap_or("")
    }

    fn issue(&mut self, s: oxc_span::Span, message: impl Into<String>) {
        self.issues.push(ParseIssue {
            message: message.into(),
            span: self.span(s),
        });
    }

    fn placeholder(&self, s: oxc_span::Span) -> Node {
        Node::ident("undefined", self.span(s))
    }

    // ---- program & statements --------------------------------------------

    fn program(&mut self, p: &js::Program) -> Node {
        Node::Program {
            body: self.stmts(&p.body),
        }
    }

    fn stmts(&mut self, list: &[js::Statement]) -> Vec<Node> {
        list.iter().map(|s| self.stmt(s)).collect()
    }

    fn stmt(&mut self, s: &js::Statement) -> Node {
        match s {
            js::Statement::BlockStatement(b) => Node::Block {
                body: self.stmts(&b.body),
                span: self.span(b.span),
            },
            js::Statement::ExpressionStatement(es) => Node::ExprStmt {
                expr: Box::new(self.expr(&es.expression)),
                span: self.span(es.span),
            },
            js::Statement::VariableDeclaration(d) => self.var_decl(d),
            js::Statement::FunctionDeclaration(f) => self.function_decl(f),
            js::Statement::ClassDeclaration(c) => self.class(c),
            js::Statement::IfStatement(i) => Node::If {
                test: Box::new(self.expr(&i.test)),
                consequent: Box::new(self.stmt(&i.consequent)),
                alternate: i.alternate.as_ref().map(|a| Box::new(self.stmt(a))),
                span: self.span(i.span),
            },
            js::Statement::ForStatement(f) => {
                let init = f.init.as_ref().map(|init| {
                    Box::new(match init {
                        js::ForStatementInit::VariableDeclaration(v) => self.var_decl(v),
                        other => match other.as_expression() {
                            Some(e) => self.expr(e),
                            None => {
                                self.issue(other.span(), "for-init form not lowered");
                                self.placeholder(other.span())
                            }
                        },
                    })
                });
                Node::For {
                    init,
                    test: f.test.as_ref().map(|e| Box::new(self.expr(e))),
                    update: f.update.as_ref().map(|e| Box::new(self.expr(e))),
                    body: Box::new(self.stmt(&f.body)),
                    span: self.span(f.span),
                }
            }
            js::Statement::ForInStatement(f) => Node::ForIn {
                left: Box::new(self.for_left(&f.left)),
                right: Box::new(self.expr(&f.right)),
                body: Box::new(self.stmt(&f.body)),
                of: false,
                span: self.span(f.span),
            },
            js::Statement::ForOfStatement(f) => Node::ForIn {
                left: Box::new(self.for_left(&f.left)),
                right: Box::new(self.expr(&f.right)),
                body: Box::new(self.stmt(&f.body)),
                of: true,
                span: self.span(f.span),
            },
            js::Statement::WhileStatement(w) => Node::While {
                test: Box::new(self.expr(&w.test)),
                body: Box::new(self.stmt(&w.body)),
                span: self.span(w.span),
            },
            js::Statement::DoWhileStatement(d) => Node::DoWhile {
                body: Box::new(self.stmt(&d.body)),
                test: Box::new(self.expr(&d.test)),
                span: self.span(d.span),
            },
            js::Statement::SwitchStatement(sw) => {
                let discriminant = Box::new(self.expr(&sw.discriminant));
                let cases = sw
                    .cases
                    .iter()
                    .map(|c| SwitchCase {
                        test: c.test.as_ref().map(|e| self.expr(e)),
                        body: self.stmts(&c.consequent),
                        span: self.span(c.span),
                    })
                    .collect();
                Node::Switch {
                    discriminant,
                    cases,
                    span: self.span(sw.span),
                }
            }
            js::Statement::TryStatement(t) => {
                let block = Box::new(Node::Block {
                    body: self.stmts(&t.block.body),
                    span: self.span(t.block.span),
                });
                let (param, handler) = match &t.handler {
                    Some(h) => {
                        let param = h
                            .param
                            .as_ref()
                            .map(|p| self.binding_name(&p.pattern).0);
                        let body = Node::Block {
                            body: self.stmts(&h.body.body),
                            span: self.span(h.body.span),
                        };
                        (param, Some(Box::new(body)))
                    }
                    None => (None, None),
                };
                let finalizer = t.finalizer.as_ref().map(|f| {
                    Box::new(Node::Block {
                        body: self.stmts(&f.body),
                        span: self.span(f.span),
                    })
                });
                Node::Try {
                    block,
                    param,
                    handler,
                    finalizer,
                    span: self.span(t.span),
                }
            }
            js::Statement::ReturnStatement(r) => Node::Return {
                arg: r.argument.as_ref().map(|e| Box::new(self.expr(e))),
                span: self.span(r.span),
            },
            js::Statement::ThrowStatement(t) => Node::Throw {
                arg: Box::new(self.expr(&t.argument)),
                span: self.span(t.span),
            },
            js::Statement::BreakStatement(b) => Node::Break {
                label: b.label.as_ref().map(|l| l.name.to_string()),
                span: self.span(b.span),
            },
            js::Statement::ContinueStatement(c) => Node::Continue {
                label: c.label.as_ref().map(|l| l.name.to_string()),
                span: self.span(c.span),
            },
            js::Statement::LabeledStatement(l) => Node::Labeled {
                label: l.label.name.to_string(),
                body: Box::new(self.stmt(&l.body)),
                span: self.span(l.span),
            },
            js::Statement::EmptyStatement(e) => Node::Empty {
                span: self.span(e.span),
            },
            js::Statement::DebuggerStatement(d) => Node::Debugger {
                span: self.span(d.span),
            },
            // Module machinery: keep the declarations, drop the wiring.
            js::Statement::ExportNamedDeclaration(e) => match &e.declaration {
                Some(d) => self.declaration(d),
                None => Node::Empty {
                    span: self.span(e.span),
                },
            },
            js::Statement::ExportDefaultDeclaration(e) => match &e.declaration {
                js::ExportDefaultDeclarationKind::FunctionDeclaration(f) => self.function_decl(f),
                js::ExportDefaultDeclarationKind::ClassDeclaration(c) => self.class(c),
                other => match other.as_expression() {
                    Some(ex) => Node::ExprStmt {
                        expr: Box::new(self.expr(ex)),
                        span: self.span(e.span),
                    },
                    None => Node::Empty {
                        span: self.span(e.span),
                    },
                },
            },
            js::Statement::ImportDeclaration(_) | js::Statement::ExportAllDeclaration(_) => {
                Node::Empty {
                    span: self.span(s.span()),
                }
            }
            other => {
                self.issue(other.span(), "statement form not lowered");
                Node::Empty {
                    span: self.span(other.span()),
                }
            }
        }
    }

    fn declaration(&mut self, d: &js::Declaration) -> Node {
        match d {
            js::Declaration::VariableDeclaration(v) => self.var_decl(v),
            js::Declaration::FunctionDeclaration(f) => self.function_decl(f),
            js::Declaration::ClassDeclaration(c) => self.class(c),
            other => {
                self.issue(other.span(), "declaration form not lowered");
                Node::Empty {
                    span: self.span(other.span()),
                }
            }
        }
    }

    fn var_decl(&mut self, d: &js::VariableDeclaration) -> Node {
        let kind = match d.kind {
            js::VariableDeclarationKind::Var => DeclKind::Var,
            js::VariableDeclarationKind::Let => DeclKind::Let,
            _ => DeclKind::Const,
        };
        let decls = d
            .declarations
            .iter()
            .map(|dec| {
                let (name, _default) = self.binding_name(&dec.id);
                Declarator {
                    name,
                    init: dec.init.as_ref().map(|e| self.expr(e)),
                    span: self.span(dec.span),
                }
            })
            .collect();
        Node::VarDecl {
            kind,
            decls,
            span: self.span(d.span),
        }
    }

    fn for_left(&mut self, left: &js::ForStatementLeft) -> Node {
        match left {
            js::ForStatementLeft::VariableDeclaration(v) => self.var_decl(v),
            js::ForStatementLeft::AssignmentTargetIdentifier(id) => Node::Ident {
                name: id.name.to_string(),
                span: self.span(id.span),
            },
            js::ForStatementLeft::StaticMemberExpression(m) => self.static_member(m),
            js::ForStatementLeft::ComputedMemberExpression(m) => self.computed_member(m),
            other => {
                self.issue(other.span(), "destructuring loop target not lowered");
                Node::ident("_destructured", self.span(other.span()))
            }
        }
    }

    // ---- functions & classes ---------------------------------------------

    /// Identifier (or defaulted identifier) out of a binding pattern;
    /// destructuring collapses to a placeholder with an issue.
    fn binding_name(&mut self, p: &js::BindingPattern) -> (String, Option<Node>) {
        match &p.kind {
            js::BindingPatternKind::BindingIdentifier(id) => (id.name.to_string(), None),
            js::BindingPatternKind::AssignmentPattern(a) => {
                let (name, _) = self.binding_name(&a.left);
                (name, Some(self.expr(&a.right)))
            }
            other => {
                self.issue(other.span(), "destructuring pattern not lowered");
                ("_destructured".to_string(), None)
            }
        }
    }

    fn params(&mut self, fp: &js::FormalParameters) -> Vec<Param> {
        let mut out = Vec::new();
        for item in &fp.items {
            let (name, default) = self.binding_name(&item.pattern);
            out.push(Param {
                name,
                default,
                rest: false,
            });
        }
        if let Some(rest) = &fp.rest {
            let (name, _) = self.binding_name(&rest.argument);
            out.push(Param {
                name,
                default: None,
                rest: true,
            });
        }
        out
    }

    fn function_body(&mut self, body: &js::FunctionBody) -> Node {
        Node::Block {
            body: self.stmts(&body.statements),
            span: self.span(body.span),
        }
    }

    fn function_decl(&mut self, f: &js::Function) -> Node {
        let name = f
            .id
            .as_ref()
            .map(|i| i.name.to_string())
            .unwrap_or_else(|| "_anonymous".to_string());
        let body = match &f.body {
            Some(b) => self.function_body(b),
            None => Node::Block {
                body: Vec::new(),
                span: self.span(f.span),
            },
        };
        Node::FunctionDecl {
            name,
            params: self.params(&f.params),
            body: Box::new(body),
            is_async: f.r#async,
            is_generator: f.generator,
            span: self.span(f.span),
        }
    }

    fn function_expr(&mut self, f: &js::Function) -> Node {
        let body = match &f.body {
            Some(b) => self.function_body(b),
            None => Node::Block {
                body: Vec::new(),
                span: self.span(f.span),
            },
        };
        Node::FunctionExpr {
            name: f.id.as_ref().map(|i| i.name.to_string()),
            params: self.params(&f.params),
            body: Box::new(body),
            is_async: f.r#async,
            is_generator: f.generator,
            span: self.span(f.span),
        }
    }

    fn arrow(&mut self, a: &js::ArrowFunctionExpression) -> Node {
        let params = self.params(&a.params);
        let span = self.span(a.span);
        if a.expression {
            // Expression bodies arrive as one wrapped expression statement.
            let body = match a.body.statements.first() {
                Some(js::Statement::ExpressionStatement(es)) => self.expr(&es.expression),
                _ => {
                    self.issue(a.span, "arrow expression body not lowered");
                    self.placeholder(a.span)
                }
            };
            Node::Arrow {
                params,
                body: Box::new(body),
                expression: true,
                is_async: a.r#async,
                span,
            }
        } else {
            Node::Arrow {
                params,
                body: Box::new(self.function_body(&a.body)),
                expression: false,
                is_async: a.r#async,
                span,
            }
        }
    }

    fn class(&mut self, c: &js::Class) -> Node {
        let name = c
            .id
            .as_ref()
            .map(|i| i.name.to_string())
            .unwrap_or_else(|| "_anonymous".to_string());
        let superclass = c.super_class.as_ref().map(|e| Box::new(self.expr(e)));
        let mut members = Vec::new();
        for el in &c.body.body {
            match el {
                js::ClassElement::MethodDefinition(m) => {
                    let kind = match m.kind {
                        js::MethodDefinitionKind::Get => ClassMemberKind::Getter,
                        js::MethodDefinitionKind::Set => ClassMemberKind::Setter,
                        _ => ClassMemberKind::Method,
                    };
                    members.push(ClassMember {
                        key: self.class_key(&m.key),
                        kind,
                        is_static: m.r#static,
                        value: self.function_expr(&m.value),
                        span: self.span(m.span),
                    });
                }
                js::ClassElement::PropertyDefinition(p) => {
                    let value = match &p.value {
                        Some(e) => self.expr(e),
                        None => Node::ident("undefined", self.span(p.span)),
                    };
                    members.push(ClassMember {
                        key: self.class_key(&p.key),
                        kind: ClassMemberKind::Field,
                        is_static: p.r#static,
                        value,
                        span: self.span(p.span),
                    });
                }
                other => self.issue(other.span(), "class element not lowered"),
            }
        }
        Node::ClassDecl {
            name,
            superclass,
            members,
            span: self.span(c.span),
        }
    }

    fn class_key(&mut self, k: &js::PropertyKey) -> String {
        match k {
            js::PropertyKey::StaticIdentifier(id) => id.name.to_string(),
            js::PropertyKey::PrivateIdentifier(id) => format!("#{}", id.name),
            other => match other.as_expression() {
                Some(js::Expression::StringLiteral(s)) => s.value.to_string(),
                Some(js::Expression::NumericLiteral(n)) => self.slice(n.span).to_string(),
                _ => {
                    self.issue(other.span(), "computed class key not lowered");
                    "_computed".to_string()
                }
            },
        }
    }

    // ---- expressions -----------------------------------------------------

    fn expr(&mut self, e: &js::Expression) -> Node {
        match e {
            js::Expression::BooleanLiteral(l) => Node::Bool {
                value: l.value,
                span: self.span(l.span),
            },
            js::Expression::NullLiteral(l) => Node::Null {
                span: self.span(l.span),
            },
            js::Expression::NumericLiteral(l) => Node::Num {
                value: l.value,
                raw: self.slice(l.span).to_string(),
                span: self.span(l.span),
            },
            js::Expression::StringLiteral(l) => Node::Str {
                value: l.value.to_string(),
                span: self.span(l.span),
            },
            js::Expression::RegExpLiteral(l) => {
                let (pattern, flags) = split_regex(self.slice(l.span));
                Node::Regex {
                    pattern,
                    flags,
                    span: self.span(l.span),
                }
            }
            js::Expression::TemplateLiteral(t) => self.template(t),
            js::Expression::Identifier(id) => Node::Ident {
                name: id.name.to_string(),
                span: self.span(id.span),
            },
            js::Expression::ThisExpression(t) => Node::This {
                span: self.span(t.span),
            },
            js::Expression::Super(s) => Node::Ident {
                name: "super".to_string(),
                span: self.span(s.span),
            },
            js::Expression::ArrayExpression(a) => {
                let elements = a
                    .elements
                    .iter()
                    .map(|el| match el {
                        js::ArrayExpressionElement::Elision(_) => None,
                        js::ArrayExpressionElement::SpreadElement(sp) => Some(Node::Spread {
                            arg: Box::new(self.expr(&sp.argument)),
                            span: self.span(sp.span),
                        }),
                        other => match other.as_expression() {
                            Some(ex) => Some(self.expr(ex)),
                            None => {
                                self.issue(other.span(), "array element not lowered");
                                None
                            }
                        },
                    })
                    .collect();
                Node::Array {
                    elements,
                    span: self.span(a.span),
                }
            }
            js::Expression::ObjectExpression(o) => self.object(o),
            js::Expression::FunctionExpression(f) => self.function_expr(f),
            js::Expression::ArrowFunctionExpression(a) => self.arrow(a),
            js::Expression::ClassExpression(c) => self.class(c),
            js::Expression::UnaryExpression(u) => Node::Unary {
                op: u.operator.as_str(),
                arg: Box::new(self.expr(&u.argument)),
                span: self.span(u.span),
            },
            js::Expression::UpdateExpression(u) => Node::Update {
                op: u.operator.as_str(),
                prefix: u.prefix,
                arg: Box::new(self.simple_target(&u.argument)),
                span: self.span(u.span),
            },
            js::Expression::BinaryExpression(b) => Node::Binary {
                op: b.operator.as_str(),
                left: Box::new(self.expr(&b.left)),
                right: Box::new(self.expr(&b.right)),
                span: self.span(b.span),
            },
            js::Expression::LogicalExpression(l) => Node::Logical {
                op: l.operator.as_str(),
                left: Box::new(self.expr(&l.left)),
                right: Box::new(self.expr(&l.right)),
                span: self.span(l.span),
            },
            js::Expression::AssignmentExpression(a) => Node::Assign {
                op: a.operator.as_str(),
                target: Box::new(self.assignment_target(&a.left)),
                value: Box::new(self.expr(&a.right)),
                span: self.span(a.span),
            },
            js::Expression::ConditionalExpression(c) => Node::Conditional {
                test: Box::new(self.expr(&c.test)),
                consequent: Box::new(self.expr(&c.consequent)),
                alternate: Box::new(self.expr(&c.alternate)),
                span: self.span(c.span),
            },
            js::Expression::CallExpression(c) => self.call(c),
            js::Expression::NewExpression(n) => Node::New {
                callee: Box::new(self.expr(&n.callee)),
                args: self.arguments(&n.arguments),
                span: self.span(n.span),
            },
            js::Expression::StaticMemberExpression(m) => self.static_member(m),
            js::Expression::ComputedMemberExpression(m) => self.computed_member(m),
            js::Expression::PrivateFieldExpression(m) => self.private_member(m),
            js::Expression::ChainExpression(c) => self.chain(&c.expression),
            js::Expression::ParenthesizedExpression(p) => self.expr(&p.expression),
            js::Expression::SequenceExpression(s) => Node::Sequence {
                exprs: s.expressions.iter().map(|e| self.expr(e)).collect(),
                span: self.span(s.span),
            },
            js::Expression::AwaitExpression(a) => Node::Await {
                arg: Box::new(self.expr(&a.argument)),
                span: self.span(a.span),
            },
            js::Expression::YieldExpression(y) => Node::Yield {
                arg: y.argument.as_ref().map(|e| Box::new(self.expr(e))),
                delegate: y.delegate,
                span: self.span(y.span),
            },
            js::Expression::TaggedTemplateExpression(t) => {
                // Modeled as a call with one template argument.
                let span = self.span(t.span);
                let tmpl = self.template(&t.quasi);
                Node::Call {
                    callee: Box::new(self.expr(&t.tag)),
                    args: vec![tmpl],
                    optional: false,
                    span,
                }
            }
            other => {
                self.issue(other.span(), "expression form not lowered");
                self.placeholder(other.span())
            }
        }
    }

    fn object(&mut self, o: &js::ObjectExpression) -> Node {
        let mut props = Vec::new();
        for p in &o.properties {
            match p {
                js::ObjectPropertyKind::ObjectProperty(op) => {
                    let key = self.property_key(&op.key);
                    let value = self.expr(&op.value);
                    props.push(Property {
                        key,
                        value,
                        computed: op.computed,
                        shorthand: op.shorthand,
                    });
                }
                js::ObjectPropertyKind::SpreadProperty(sp) => {
                    let span = self.span(sp.span);
                    props.push(Property {
                        key: Node::Str {
                            value: "...".to_string(),
                            span,
                        },
                        value: Node::Spread {
                            arg: Box::new(self.expr(&sp.argument)),
                            span,
                        },
                        computed: false,
                        shorthand: true,
                    });
                }
            }
        }
        Node::Object {
            props,
            span: self.span(o.span),
        }
    }

    fn property_key(&mut self, k: &js::PropertyKey) -> Node {
        match k {
            js::PropertyKey::StaticIdentifier(id) => Node::Ident {
                name: id.name.to_string(),
                span: self.span(id.span),
            },
            js::PropertyKey::PrivateIdentifier(id) => Node::Ident {
                name: format!("#{}", id.name),
                span: self.span(id.span),
            },
            other => match other.as_expression() {
                Some(e) => self.expr(e),
                None => {
                    self.issue(other.span(), "property key not lowered");
                    self.placeholder(other.span())
                }
            },
        }
    }

    fn call(&mut self, c: &js::CallExpression) -> Node {
        Node::Call {
            callee: Box::new(self.expr(&c.callee)),
            args: self.arguments(&c.arguments),
            optional: c.optional,
            span: self.span(c.span),
        }
    }

    fn arguments(&mut self, args: &[js::Argument]) -> Vec<Node> {
        args.iter()
            .map(|a| match a {
                js::Argument::SpreadElement(sp) => Node::Spread {
                    arg: Box::new(self.expr(&sp.argument)),
                    span: self.span(sp.span),
                },
                other => match other.as_expression() {
                    Some(e) => self.expr(e),
                    None => {
                        self.issue(other.span(), "argument form not lowered");
                        self.placeholder(other.span())
                    }
                },
            })
            .collect()
    }

    fn static_member(&mut self, m: &js::StaticMemberExpression) -> Node {
        Node::Member {
            object: Box::new(self.expr(&m.object)),
            property: Box::new(Node::Ident {
                name: m.property.name.to_string(),
                span: self.span(m.property.span),
            }),
            computed: false,
            optional: m.optional,
            span: self.span(m.span),
        }
    }

    fn computed_member(&mut self, m: &js::ComputedMemberExpression) -> Node {
        Node::Member {
            object: Box::new(self.expr(&m.object)),
            property: Box::new(self.expr(&m.expression)),
            computed: true,
            optional: m.optional,
            span: self.span(m.span),
        }
    }

    fn private_member(&mut self, m: &js::PrivateFieldExpression) -> Node {
        Node::Member {
            object: Box::new(self.expr(&m.object)),
            property: Box::new(Node::Ident {
                name: format!("#{}", m.field.name),
                span: self.span(m.field.span),
            }),
            computed: false,
            optional: m.optional,
            span: self.span(m.span),
        }
    }

    fn chain(&mut self, el: &js::ChainElement) -> Node {
        match el {
            js::ChainElement::CallExpression(c) => self.call(c),
            js::ChainElement::StaticMemberExpression(m) => self.static_member(m),
            js::ChainElement::ComputedMemberExpression(m) => self.computed_member(m),
            js::ChainElement::PrivateFieldExpression(m) => self.private_member(m),
            other => {
                self.issue(other.span(), "optional-chain form not lowered");
                self.placeholder(other.span())
            }
        }
    }

    fn assignment_target(&mut self, t: &js::AssignmentTarget) -> Node {
        match t {
            js::AssignmentTarget::AssignmentTargetIdentifier(id) => Node::Ident {
                name: id.name.to_string(),
                span: self.span(id.span),
            },
            js::AssignmentTarget::StaticMemberExpression(m) => self.static_member(m),
            js::AssignmentTarget::ComputedMemberExpression(m) => self.computed_member(m),
            js::AssignmentTarget::PrivateFieldExpression(m) => self.private_member(m),
            other => {
                self.issue(other.span(), "destructuring assignment target not lowered");
                Node::ident("_destructured", self.span(other.span()))
            }
        }
    }

    fn simple_target(&mut self, t: &js::SimpleAssignmentTarget) -> Node {
        match t {
            js::SimpleAssignmentTarget::AssignmentTargetIdentifier(id) => Node::Ident {
                name: id.name.to_string(),
                span: self.span(id.span),
            },
            js::SimpleAssignmentTarget::StaticMemberExpression(m) => self.static_member(m),
            js::SimpleAssignmentTarget::ComputedMemberExpression(m) => self.computed_member(m),
            js::SimpleAssignmentTarget::PrivateFieldExpression(m) => self.private_member(m),
            other => {
                self.issue(other.span(), "update target not lowered");
                self.placeholder(other.span())
            }
        }
    }

    fn template(&mut self, t: &js::TemplateLiteral) -> Node {
        let quasis = t
            .quasis
            .iter()
            .map(|q| {
                q.value
                    .cooked
                    .as_ref()
                    .map(|c| c.to_string())
                    .unwrap_or_else(|| q.value.raw.to_string())
            })
            .collect();
        let exprs = t.expressions.iter().map(|e| self.expr(e)).collect();
        Node::Template {
            quasis,
            exprs,
            span: self.span(t.span),
        }
    }
}

/// `/pattern/flags` split from the literal text.
fn split_regex(text: &str) -> (String, String) {
    let inner = text.strip_prefix('/').unwrap_or(text);
    match inner.rfind('/') {
        Some(idx) => (inner[..idx].to_string(), inner[idx + 1..].to_string()),
        None => (inner.to_string(), String::new()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ok(src: &str) -> Node {
        let outcome = parse(src).expect("parse failed");
        assert!(outcome.is_clean(), "issues: {:?}", outcome.errors);
        outcome.program
    }

    fn body(src: &str) -> Vec<Node> {
        match ok(src) {
            Node::Program { body } => body,
            _ => unreachable!(),
        }
    }

    #[test]
    fn test_var_decl() {
        let b = body("var x = 1, y;");
        match &b[0] {
            Node::VarDecl { kind, decls, .. } => {
                assert_eq!(*kind, DeclKind::Var);
                assert_eq!(decls.len(), 2);
                assert_eq!(decls[0].name, "x");
                assert!(decls[1].init.is_none());
            }
            other => panic!("expected VarDecl, got {other:?}"),
        }
    }

    #[test]
    fn test_precedence() {
        let b = body("x = 1 + 2 * 3;");
        let Node::ExprStmt { expr, .. } = &b[0] else {
            panic!()
        };
        let Node::Assign { value, .. } = expr.as_ref() else {
            panic!()
        };
        let Node::Binary { op: "+", right, .. } = value.as_ref() else {
            panic!("expected + at top, got {value:?}")
        };
        assert!(matches!(right.as_ref(), Node::Binary { op: "*", .. }));
    }

    #[test]
    fn test_member_chain() {
        let b = body("a.b[c].d();");
        let Node::ExprStmt { expr, .. } = &b[0] else {
            panic!()
        };
        assert!(expr.is_call());
    }

    #[test]
    fn test_member_path() {
        let b = body("navigator.userAgent;");
        let Node::ExprStmt { expr, .. } = &b[0] else {
            panic!()
        };
        assert_eq!(expr.member_path().as_deref(), Some("navigator.userAgent"));
    }

    #[test]
    fn test_spans_are_lines_and_offsets() {
        let b = body("var a = 1;\neval(a);");
        let span = b[1].span();
        assert_eq!(span.line, 2);
        assert_eq!(span.col, 1);
        assert_eq!(span.start, 11);
    }

    #[test]
    fn test_arrow_functions() {
        let b = body("const f = (a, b) => a + b; const g = x => x;");
        assert_eq!(b.len(), 2);
        let Node::VarDecl { decls, .. } = &b[0] else {
            panic!()
        };
        assert!(matches!(
            decls[0].init.as_ref().unwrap(),
            Node::Arrow {
                expression: true,
                ..
            }
        ));
    }

    #[test]
    fn test_iife() {
        let b = body("(function(){ var a = 1; })();");
        let Node::ExprStmt { expr, .. } = &b[0] else {
            panic!()
        };
        let Node::Call { callee, .. } = expr.as_ref() else {
            panic!()
        };
        assert!(callee.is_function());
    }

    #[test]
    fn test_switch_while_shape() {
        let b = body("while (true) {switch(s){case 0: x(); break; default: y();}}");
        let Node::While { body: wb, .. } = &b[0] else {
            panic!()
        };
        let Node::Block { body: inner, .. } = wb.as_ref() else {
            panic!()
        };
        let Node::Switch { cases, .. } = &inner[0] else {
            panic!()
        };
        assert_eq!(cases.len(), 2);
        assert!(cases[1].test.is_none());
    }

    #[test]
    fn test_top_level_return_allowed() {
        let b = body("var a = 1\nvar b = 2\nreturn");
        assert_eq!(b.len(), 3);
        assert!(matches!(b[2], Node::Return { arg: None, .. }));
    }

    #[test]
    fn test_garbage_is_error() {
        assert!(parse("%%%%").is_err());
        assert!(parse("((((").is_err());
    }

    #[test]
    fn test_module_syntax_retried_as_module() {
        let outcome = parse("import x from 'y';\nuse(x);").expect("module parse");
        let Node::Program { body } = outcome.program else {
            panic!()
        };
        // Import lowers to an empty statement; the call survives.
        assert!(body
            .iter()
            .any(|n| matches!(n, Node::ExprStmt { expr, .. } if expr.is_call())));
    }

    #[test]
    fn test_destructuring_recorded_as_issue() {
        let outcome = parse("var { a } = o; use(a);").expect("parse");
        assert!(!outcome.is_clean());
        let Node::Program { body } = outcome.program else {
            panic!()
        };
        // The rest of the program still lowers.
        assert!(body.len() >= 2);
    }

    #[test]
    fn test_class() {
        let b = body(
            "class A extends B { constructor(x) { this.x = x; } get v() { return 1; } static z = 3; }",
        );
        let Node::ClassDecl { members, .. } = &b[0] else {
            panic!()
        };
        assert_eq!(members.len(), 3);
        assert_eq!(members[1].kind, ClassMemberKind::Getter);
        assert!(members[2].is_static);
    }

    #[test]
    fn test_for_variants() {
        let b = body("for (var i = 0; i < 9; i++) {} for (const k in o) {} for (const v of a) {}");
        assert!(matches!(b[0], Node::For { .. }));
        assert!(matches!(b[1], Node::ForIn { of: false, .. }));
        assert!(matches!(b[2], Node::ForIn { of: true, .. }));
    }

    #[test]
    fn test_object_literal() {
        let b = body("var o = { a: 1, 'b': 2, c, d() { return 3; }, [e]: 4 };");
        let Node::VarDecl { decls, .. } = &b[0] else {
            panic!()
        };
        let Some(Node::Object { props, .. }) = &decls[0].init else {
            panic!()
        };
        assert_eq!(props.len(), 5);
        assert!(props[2].shorthand);
        assert!(props[4].computed);
    }

    #[test]
    fn test_optional_chain() {
        let b = body("a?.b?.[0]?.();");
        let Node::ExprStmt { expr, .. } = &b[0] else {
            panic!()
        };
        assert!(matches!(expr.as_ref(), Node::Call { optional: true, .. }));
    }

    #[test]
    fn test_hex_raw_preserved() {
        let b = body("f(0x1f4);");
        let Node::ExprStmt { expr, .. } = &b[0] else {
            panic!()
        };
        let Node::Call { args, .. } = expr.as_ref() else {
            panic!()
        };
        assert!(matches!(&args[0], Node::Num { raw, value, .. } if raw == "0x1f4" && *value == 500.0));
    }

    #[test]
    fn test_string_array_sample() {
        // The javascript-obfuscator shape the deobfuscator targets.
        let b = body("var _0xabcd=['hello','world'];console[_0xabcd[0]](_0xabcd[1]);");
        assert_eq!(b.len(), 2);
        assert!(matches!(&b[0], Node::VarDecl { .. }));
    }

    #[test]
    fn test_parse_expression() {
        let node = parse_expression("a + b * 2").expect("expression");
        assert!(matches!(node, Node::Binary { op: "+", .. }));
        let obj = parse_expression("{ a: 1 }").expect("object expression");
        assert!(matches!(obj, Node::Object { .. }));
    }

    #[test]
    fn test_split_regex() {
        assert_eq!(
            split_regex("/ab+c/gi"),
            ("ab+c".to_string(), "gi".to_string())
        );
        assert_eq!(split_regex("/a\\/b/"), ("a\\/b".to_string(), String::new()));
    }
}
