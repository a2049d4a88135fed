//! Tree traversal and mutation.
//!
//! [`walk`] is a single-pass depth-first, left-to-right traversal with exit
//! callbacks guaranteed on backtrack. [`rewrite`] is a postorder mutating
//! pass: children are rewritten before their parent is offered to the
//! callback, so a replacement sees already-transformed children.

use super::{Node, Span};

/// Enter/exit callbacks for a read-only walk. Per-traversal state lives in
/// the visitor value itself, passed in mutably by the caller.
pub trait Visitor {
    fn enter(&mut self, _node: &Node) {}
    fn exit(&mut self, _node: &Node) {}
}

/// Depth-first document-order walk. Runs to completion; traversal is not
/// cancellable mid-flight.
pub fn walk<V: Visitor>(node: &Node, visitor: &mut V) {
    visitor.enter(node);
    for_each_child(node, &mut |child| walk(child, visitor));
    visitor.exit(node);
}

/// Invoke `f` on every direct child of `node`, in document order.
pub fn for_each_child(node: &Node, f: &mut impl FnMut(&Node)) {
    match node {
        Node::Program { body } => body.iter().for_each(&mut *f),
        Node::VarDecl { decls, .. } => {
            for d in decls {
                if let Some(init) = &d.init {
                    f(init);
                }
            }
        }
        Node::FunctionDecl { params, body, .. } => {
            for p in params {
                if let Some(d) = &p.default {
                    f(d);
                }
            }
            f(body);
        }
        Node::ClassDecl {
            superclass,
            members,
            ..
        } => {
            if let Some(s) = superclass {
                f(s);
            }
            for m in members {
                f(&m.value);
            }
        }
        Node::Block { body, .. } => body.iter().for_each(&mut *f),
        Node::If {
            test,
            consequent,
            alternate,
            ..
        } => {
            f(test);
            f(consequent);
            if let Some(a) = alternate {
                f(a);
            }
        }
        Node::For {
            init,
            test,
            update,
            body,
            ..
        } => {
            if let Some(i) = init {
                f(i);
            }
            if let Some(t) = test {
                f(t);
            }
            if let Some(u) = update {
                f(u);
            }
            f(body);
        }
        Node::ForIn {
            left, right, body, ..
        } => {
            f(left);
            f(right);
            f(body);
        }
        Node::While { test, body, .. } => {
            f(test);
            f(body);
        }
        Node::DoWhile { body, test, .. } => {
            f(body);
            f(test);
        }
        Node::Switch {
            discriminant,
            cases,
            ..
        } => {
            f(discriminant);
            for c in cases {
                if let Some(t) = &c.test {
                    f(t);
                }
                c.body.iter().for_each(&mut *f);
            }
        }
        Node::Try {
            block,
            handler,
            finalizer,
            ..
        } => {
            f(block);
            if let Some(h) = handler {
                f(h);
            }
            if let Some(fin) = finalizer {
                f(fin);
            }
        }
        Node::Return { arg, .. } => {
            if let Some(a) = arg {
                f(a);
            }
        }
        Node::Throw { arg, .. } => f(arg),
        Node::Labeled { body, .. } => f(body),
        Node::ExprStmt { expr, .. } => f(expr),
        Node::Template { exprs, .. } => exprs.iter().for_each(&mut *f),
        Node::Array { elements, .. } => {
            for e in elements.iter().flatten() {
                f(e);
            }
        }
        Node::Object { props, .. } => {
            for p in props {
                if p.computed {
                    f(&p.key);
                }
                f(&p.value);
            }
        }
        Node::FunctionExpr { params, body, .. } | Node::Arrow { params, body, .. } => {
            for p in params {
                if let Some(d) = &p.default {
                    f(d);
                }
            }
            f(body);
        }
        Node::Unary { arg, .. } | Node::Update { arg, .. } | Node::Spread { arg, .. } | Node::Await { arg, .. } => {
            f(arg)
        }
        Node::Yield { arg, .. } => {
            if let Some(a) = arg {
                f(a);
            }
        }
        Node::Binary { left, right, .. }
        | Node::Logical { left, right, .. } => {
            f(left);
            f(right);
        }
        Node::Assign { target, value, .. } => {
            f(target);
            f(value);
        }
        Node::Conditional {
            test,
            consequent,
            alternate,
            ..
        } => {
            f(test);
            f(consequent);
            f(alternate);
        }
        Node::Call { callee, args, .. } | Node::New { callee, args, .. } => {
            f(callee);
            args.iter().for_each(&mut *f);
        }
        Node::Member {
            object,
            property,
            computed,
            ..
        } => {
            f(object);
            if *computed {
                f(property);
            }
        }
        Node::Sequence { exprs, .. } => exprs.iter().for_each(&mut *f),
        Node::Ident { .. }
        | Node::Num { .. }
        | Node::Str { .. }
        | Node::Regex { .. }
        | Node::Bool { .. }
        | Node::Null { .. }
        | Node::This { .. }
        | Node::Empty { .. }
        | Node::Debugger { .. }
        | Node::Break { .. }
        | Node::Continue { .. } => {}
    }
}

/// Invoke `f` on every direct child of `node` mutably, in document order.
/// Non-computed member properties and object keys are names, not child
/// expressions, and are skipped just like in [`for_each_child`].
pub fn for_each_child_mut(node: &mut Node, f: &mut impl FnMut(&mut Node)) {
    match node {
        Node::Program { body } => body.iter_mut().for_each(&mut *f),
        Node::VarDecl { decls, .. } => {
            for d in decls.iter_mut() {
                if let Some(init) = &mut d.init {
                    f(init);
                }
            }
        }
        Node::FunctionDecl { params, body, .. } => {
            for p in params.iter_mut() {
                if let Some(d) = &mut p.default {
                    f(d);
                }
            }
            f(body);
        }
        Node::ClassDecl {
            superclass,
            members,
            ..
        } => {
            if let Some(s) = superclass {
                f(s);
            }
            for m in members.iter_mut() {
                f(&mut m.value);
            }
        }
        Node::Block { body, .. } => body.iter_mut().for_each(&mut *f),
        Node::If {
            test,
            consequent,
            alternate,
            ..
        } => {
            f(test);
            f(consequent);
            if let Some(a) = alternate {
                f(a);
            }
        }
        Node::For {
            init,
            test,
            update,
            body,
            ..
        } => {
            if let Some(i) = init {
                f(i);
            }
            if let Some(t) = test {
                f(t);
            }
            if let Some(u) = update {
                f(u);
            }
            f(body);
        }
        Node::ForIn {
            left, right, body, ..
        } => {
            f(left);
            f(right);
            f(body);
        }
        Node::While { test, body, .. } => {
            f(test);
            f(body);
        }
        Node::DoWhile { body, test, .. } => {
            f(body);
            f(test);
        }
        Node::Switch {
            discriminant,
            cases,
            ..
        } => {
            f(discriminant);
            for c in cases.iter_mut() {
                if let Some(t) = &mut c.test {
                    f(t);
                }
                c.body.iter_mut().for_each(&mut *f);
            }
        }
        Node::Try {
            block,
            handler,
            finalizer,
            ..
        } => {
            f(block);
            if let Some(h) = handler {
                f(h);
            }
            if let Some(fin) = finalizer {
                f(fin);
            }
        }
        Node::Return { arg, .. } | Node::Yield { arg, .. } => {
            if let Some(a) = arg {
                f(a);
            }
        }
        Node::Throw { arg, .. } => f(arg),
        Node::Labeled { body, .. } => f(body),
        Node::ExprStmt { expr, .. } => f(expr),
        Node::Template { exprs, .. } => exprs.iter_mut().for_each(&mut *f),
        Node::Array { elements, .. } => {
            for e in elements.iter_mut().flatten() {
                f(e);
            }
        }
        Node::Object { props, .. } => {
            for p in props.iter_mut() {
                if p.computed {
                    f(&mut p.key);
                }
                f(&mut p.value);
            }
        }
        Node::FunctionExpr { params, body, .. } | Node::Arrow { params, body, .. } => {
            for p in params.iter_mut() {
                if let Some(d) = &mut p.default {
                    f(d);
                }
            }
            f(body);
        }
        Node::Unary { arg, .. }
        | Node::Update { arg, .. }
        | Node::Spread { arg, .. }
        | Node::Await { arg, .. } => f(arg),
        Node::Binary { left, right, .. } | Node::Logical { left, right, .. } => {
            f(left);
            f(right);
        }
        Node::Assign { target, value, .. } => {
            f(target);
            f(value);
        }
        Node::Conditional {
            test,
            consequent,
            alternate,
            ..
        } => {
            f(test);
            f(consequent);
            f(alternate);
        }
        Node::Call { callee, args, .. } | Node::New { callee, args, .. } => {
            f(callee);
            args.iter_mut().for_each(&mut *f);
        }
        Node::Member {
            object,
            property,
            computed,
            ..
        } => {
            f(object);
            if *computed {
                f(property);
            }
        }
        Node::Sequence { exprs, .. } => exprs.iter_mut().for_each(&mut *f),
        Node::Ident { .. }
        | Node::Num { .. }
        | Node::Str { .. }
        | Node::Regex { .. }
        | Node::Bool { .. }
        | Node::Null { .. }
        | Node::This { .. }
        | Node::Empty { .. }
        | Node::Debugger { .. }
        | Node::Break { .. }
        | Node::Continue { .. } => {}
    }
}

/// What a rewrite callback wants done with the offered node.
pub enum Rewrite {
    Keep,
    Replace(Node),
    /// Remove the node. Only meaningful for nodes held in a list (statement
    /// bodies, arguments, sequence elements); elsewhere the node collapses
    /// to an empty statement.
    Remove,
}

/// Postorder mutating traversal. Returns the number of nodes replaced or
/// removed.
pub fn rewrite(node: &mut Node, f: &mut impl FnMut(&mut Node) -> Rewrite) -> usize {
    let mut count = rewrite_children(node, f);
    match f(node) {
        Rewrite::Keep => {}
        Rewrite::Replace(n) => {
            *node = n;
            count += 1;
        }
        Rewrite::Remove => {
            *node = Node::Empty { span: node.span() };
            count += 1;
        }
    }
    count
}

fn rewrite_vec(list: &mut Vec<Node>, f: &mut impl FnMut(&mut Node) -> Rewrite) -> usize {
    let mut count = 0;
    let mut out = Vec::with_capacity(list.len());
    for mut item in list.drain(..) {
        count += rewrite_children(&mut item, f);
        match f(&mut item) {
            Rewrite::Keep => out.push(item),
            Rewrite::Replace(n) => {
                out.push(n);
                count += 1;
            }
            Rewrite::Remove => count += 1,
        }
    }
    *list = out;
    count
}

fn rewrite_box(node: &mut Node, f: &mut impl FnMut(&mut Node) -> Rewrite) -> usize {
    rewrite(node, f)
}

fn rewrite_opt(node: &mut Option<Box<Node>>, f: &mut impl FnMut(&mut Node) -> Rewrite) -> usize {
    match node {
        Some(n) => rewrite(n, f),
        None => 0,
    }
}

fn rewrite_children(node: &mut Node, f: &mut impl FnMut(&mut Node) -> Rewrite) -> usize {
    let mut count = 0;
    match node {
        Node::Program { body } => count += rewrite_vec(body, f),
        Node::VarDecl { decls, .. } => {
            for d in decls.iter_mut() {
                if let Some(init) = &mut d.init {
                    count += rewrite_box(init, f);
                }
            }
        }
        Node::FunctionDecl { params, body, .. } => {
            for p in params.iter_mut() {
                if let Some(d) = &mut p.default {
                    count += rewrite_box(d, f);
                }
            }
            count += rewrite_box(body, f);
        }
        Node::ClassDecl {
            superclass,
            members,
            ..
        } => {
            count += rewrite_opt(superclass, f);
            for m in members.iter_mut() {
                count += rewrite_box(&mut m.value, f);
            }
        }
        Node::Block { body, .. } => count += rewrite_vec(body, f),
        Node::If {
            test,
            consequent,
            alternate,
            ..
        } => {
            count += rewrite_box(test, f);
            count += rewrite_box(consequent, f);
            count += rewrite_opt(alternate, f);
        }
        Node::For {
            init,
            test,
            update,
            body,
            ..
        } => {
            count += rewrite_opt(init, f);
            count += rewrite_opt(test, f);
            count += rewrite_opt(update, f);
            count += rewrite_box(body, f);
        }
        Node::ForIn {
            left, right, body, ..
        } => {
            count += rewrite_box(left, f);
            count += rewrite_box(right, f);
            count += rewrite_box(body, f);
        }
        Node::While { test, body, .. } => {
            count += rewrite_box(test, f);
            count += rewrite_box(body, f);
        }
        Node::DoWhile { body, test, .. } => {
            count += rewrite_box(body, f);
            count += rewrite_box(test, f);
        }
        Node::Switch {
            discriminant,
            cases,
            ..
        } => {
            count += rewrite_box(discriminant, f);
            for c in cases.iter_mut() {
                if let Some(t) = &mut c.test {
                    count += rewrite_box(t, f);
                }
                count += rewrite_vec(&mut c.body, f);
            }
        }
        Node::Try {
            block,
            handler,
            finalizer,
            ..
        } => {
            count += rewrite_box(block, f);
            count += rewrite_opt(handler, f);
            count += rewrite_opt(finalizer, f);
        }
        Node::Return { arg, .. } | Node::Yield { arg, .. } => count += rewrite_opt(arg, f),
        Node::Throw { arg, .. } => count += rewrite_box(arg, f),
        Node::Labeled { body, .. } => count += rewrite_box(body, f),
        Node::ExprStmt { expr, .. } => count += rewrite_box(expr, f),
        Node::Template { exprs, .. } => count += rewrite_vec(exprs, f),
        Node::Array { elements, .. } => {
            for e in elements.iter_mut().flatten() {
                count += rewrite(e, f);
            }
        }
        Node::Object { props, .. } => {
            for p in props.iter_mut() {
                if p.computed {
                    count += rewrite(&mut p.key, f);
                }
                count += rewrite(&mut p.value, f);
            }
        }
        Node::FunctionExpr { params, body, .. } | Node::Arrow { params, body, .. } => {
            for p in params.iter_mut() {
                if let Some(d) = &mut p.default {
                    count += rewrite_box(d, f);
                }
            }
            count += rewrite_box(body, f);
        }
        Node::Unary { arg, .. }
        | Node::Update { arg, .. }
        | Node::Spread { arg, .. }
        | Node::Await { arg, .. } => count += rewrite_box(arg, f),
        Node::Binary { left, right, .. } | Node::Logical { left, right, .. } => {
            count += rewrite_box(left, f);
            count += rewrite_box(right, f);
        }
        Node::Assign { target, value, .. } => {
            count += rewrite_box(target, f);
            count += rewrite_box(value, f);
        }
        Node::Conditional {
            test,
            consequent,
            alternate,
            ..
        } => {
            count += rewrite_box(test, f);
            count += rewrite_box(consequent, f);
            count += rewrite_box(alternate, f);
        }
        Node::Call { callee, args, .. } | Node::New { callee, args, .. } => {
            count += rewrite_box(callee, f);
            count += rewrite_vec(args, f);
        }
        Node::Member {
            object,
            property,
            computed,
            ..
        } => {
            count += rewrite_box(object, f);
            if *computed {
                count += rewrite_box(property, f);
            }
        }
        Node::Sequence { exprs, .. } => count += rewrite_vec(exprs, f),
        Node::Ident { .. }
        | Node::Num { .. }
        | Node::Str { .. }
        | Node::Regex { .. }
        | Node::Bool { .. }
        | Node::Null { .. }
        | Node::This { .. }
        | Node::Empty { .. }
        | Node::Debugger { .. }
        | Node::Break { .. }
        | Node::Continue { .. } => {}
    }
    count
}

/// Insert a statement into a `Program` or `Block` body at `index`
/// (clamped to the end). Returns false when the container has no
/// statement list.
pub fn insert_stmt(container: &mut Node, index: usize, stmt: Node) -> bool {
    match container {
        Node::Program { body } | Node::Block { body, .. } => {
            let at = index.min(body.len());
            body.insert(at, stmt);
            true
        }
        _ => false,
    }
}

/// Deep clone, optionally resetting spans to the default position.
pub fn clone_node(node: &Node, preserve_spans: bool) -> Node {
    let mut out = node.clone();
    if !preserve_spans {
        let mut strip = |n: &mut Node| -> Rewrite {
            set_span(n, Span::default());
            Rewrite::Keep
        };
        rewrite(&mut out, &mut strip);
        set_span(&mut out, Span::default());
    }
    out
}

fn set_span(node: &mut Node, new: Span) {
    match node {
        Node::Program { .. } => {}
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
        | Node::Yield { span, .. } => *span = new,
    }
}

#[cfg(test)]
mod tests {
    use super::super::parser::parse;
    use super::*;

    struct Counter {
        entered: Vec<&'static str>,
        exited: Vec<&'static str>,
    }

    impl Visitor for Counter {
        fn enter(&mut self, node: &Node) {
            self.entered.push(node.kind());
        }
        fn exit(&mut self, node: &Node) {
            self.exited.push(node.kind());
        }
    }

    #[test]
    fn test_walk_document_order() {
        let program = parse("var a = 1; f(a);").unwrap().program;
        let mut v = Counter {
            entered: Vec::new(),
            exited: Vec::new(),
        };
        walk(&program, &mut v);
        assert_eq!(v.entered[0], "Program");
        // Exit fires after all children: Program exits last.
        assert_eq!(v.exited.last(), Some(&"Program"));
        // VarDecl entered before the call statement.
        let var_idx = v.entered.iter().position(|k| *k == "VarDecl").unwrap();
        let call_idx = v.entered.iter().position(|k| *k == "Call").unwrap();
        assert!(var_idx < call_idx);
    }

    #[test]
    fn test_rewrite_replace() {
        let mut program = parse("x = 1 + 2;").unwrap().program;
        let changed = rewrite(&mut program, &mut |n| {
            if let Node::Binary { op: "+", left, right, span } = n {
                if let (Some(a), Some(b)) = (left.as_num_lit(), right.as_num_lit()) {
                    return Rewrite::Replace(Node::num(a + b, *span));
                }
            }
            Rewrite::Keep
        });
        assert_eq!(changed, 1);
        let src = super::super::codegen::generate(&program, &Default::default());
        assert!(src.contains("x = 3"), "got: {src}");
    }

    #[test]
    fn test_rewrite_remove_from_list() {
        let mut program = parse("a(); debugger; b();").unwrap().program;
        let removed = rewrite(&mut program, &mut |n| {
            if matches!(n, Node::Debugger { .. }) {
                Rewrite::Remove
            } else {
                Rewrite::Keep
            }
        });
        assert_eq!(removed, 1);
        let Node::Program { body } = &program else {
            panic!()
        };
        assert_eq!(body.len(), 2);
    }

    #[test]
    fn test_insert_stmt() {
        let mut program = parse("a(); b();").unwrap().program;
        let inserted = insert_stmt(
            &mut program,
            1,
            Node::Debugger {
                span: Span::default(),
            },
        );
        assert!(inserted);
        let Node::Program { body } = &program else {
            panic!()
        };
        assert_eq!(body.len(), 3);
        assert!(matches!(body[1], Node::Debugger { .. }));
        // Non-container nodes refuse.
        let mut lone = Node::Null {
            span: Span::default(),
        };
        assert!(!insert_stmt(
            &mut lone,
            0,
            Node::Empty {
                span: Span::default()
            }
        ));
    }

    #[test]
    fn test_clone_strips_spans() {
        let program = parse("var a = 1;").unwrap().program;
        let Node::Program { body } = &program else {
            panic!()
        };
        let cloned = clone_node(&body[0], false);
        assert_eq!(cloned.span(), Span::default());
    }
}
