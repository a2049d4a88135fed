//! Source regeneration.
//!
//! The domain tree serializes to an intermediate form with every compound
//! expression parenthesized (no precedence bookkeeping, no ambiguity), and
//! `oxc_codegen` turns that into the final output: minimal parens, quoting,
//! and layout all come from the real code generator. If the normalization
//! parse ever rejects the intermediate form, the raw serialization is
//! returned so callers still get working text.

use oxc_allocator::Allocator;
use oxc_codegen::{Codegen, CodegenOptions};
use oxc_parser::{ParseOptions, Parser};
use oxc_span::SourceType;

use super::{ClassMemberKind, Node, Property};

/// Generation options.
#[derive(Debug, Clone, Default)]
pub struct GenOptions {
    /// Emit minified output.
    pub compact: bool,
}

/// Regenerate source for a tree.
pub fn generate(node: &Node, opts: &GenOptions) -> String {
    let mut raw = String::new();
    match node {
        Node::Program { body } => {
            for s in body {
                stmt(&mut raw, s);
            }
        }
        n if n.is_statement() => stmt(&mut raw, n),
        n => expr(&mut raw, n),
    }
    normalize(&raw, opts).unwrap_or(raw)
}

fn normalize(source: &str, opts: &GenOptions) -> Option<String> {
    let allocator = Allocator::default();
    let ret = Parser::new(&allocator, source, SourceType::cjs())
        .with_options(ParseOptions {
            allow_return_outside_function: true,
            preserve_parens: false,
            ..ParseOptions::default()
        })
        .parse();
    if ret.panicked || !ret.errors.is_empty() {
        return None;
    }
    let out = Codegen::new()
        .with_options(CodegenOptions {
            single_quote: true,
            minify: opts.compact,
            ..CodegenOptions::default()
        })
        .build(&ret.program);
    Some(out.code)
}

// ---------------------------------------------------------------------------
// statement serialization
// ---------------------------------------------------------------------------

fn stmt(out: &mut String, node: &Node) {
    match node {
        Node::VarDecl { .. } => {
            var_decl(out, node);
            out.push_str(";\n");
        }
        Node::FunctionDecl {
            name,
            params,
            body,
            is_async,
            is_generator,
            ..
        } => {
            if *is_async {
                out.push_str("async ");
            }
            out.push_str("function");
            if *is_generator {
                out.push('*');
            }
            out.push(' ');
            out.push_str(name);
            params_list(out, params);
            out.push(' ');
            block_of(out, body);
        }
        Node::ClassDecl { .. } => class(out, node),
        Node::Block { body, .. } => {
            out.push_str("{\n");
            for s in body {
                stmt(out, s);
            }
            out.push_str("}\n");
        }
        Node::If {
            test,
            consequent,
            alternate,
            ..
        } => {
            out.push_str("if (");
            expr(out, test);
            out.push_str(") ");
            block_of(out, consequent);
            if let Some(alt) = alternate {
                out.push_str("else ");
                block_of(out, alt);
            }
        }
        Node::For {
            init,
            test,
            update,
            body,
            ..
        } => {
            out.push_str("for (");
            if let Some(i) = init {
                match i.as_ref() {
                    Node::VarDecl { .. } => var_decl(out, i),
                    other => expr(out, other),
                }
            }
            out.push_str("; ");
            if let Some(t) = test {
                expr(out, t);
            }
            out.push_str("; ");
            if let Some(u) = update {
                expr(out, u);
            }
            out.push_str(") ");
            block_of(out, body);
        }
        Node::ForIn {
            left,
            right,
            body,
            of,
            ..
        } => {
            out.push_str("for (");
            match left.as_ref() {
                Node::VarDecl { .. } => var_decl(out, left),
                other => expr(out, other),
            }
            out.push_str(if *of { " of " } else { " in " });
            expr(out, right);
            out.push_str(") ");
            block_of(out, body);
        }
        Node::While { test, body, .. } => {
            out.push_str("while (");
            expr(out, test);
            out.push_str(") ");
            block_of(out, body);
        }
        Node::DoWhile { body, test, .. } => {
            out.push_str("do ");
            block_of(out, body);
            out.push_str("while (");
            expr(out, test);
            out.push_str(");\n");
        }
        Node::Switch {
            discriminant,
            cases,
            ..
        } => {
            out.push_str("switch (");
            expr(out, discriminant);
            out.push_str(") {\n");
            for case in cases {
                match &case.test {
                    Some(t) => {
                        out.push_str("case ");
                        expr(out, t);
                        out.push_str(":\n");
                    }
                    None => out.push_str("default:\n"),
                }
                for s in &case.body {
                    stmt(out, s);
                }
            }
            out.push_str("}\n");
        }
        Node::Try {
            block,
            param,
            handler,
            finalizer,
            ..
        } => {
            out.push_str("try ");
            block_of(out, block);
            if let Some(h) = handler {
                out.push_str("catch ");
                if let Some(p) = param {
                    out.push('(');
                    out.push_str(p);
                    out.push_str(") ");
                }
                block_of(out, h);
            }
            if let Some(fin) = finalizer {
                out.push_str("finally ");
                block_of(out, fin);
            }
        }
        Node::Return { arg, .. } => {
            out.push_str("return");
            if let Some(a) = arg {
                out.push(' ');
                expr(out, a);
            }
            out.push_str(";\n");
        }
        Node::Throw { arg, .. } => {
            out.push_str("throw ");
            expr(out, arg);
            out.push_str(";\n");
        }
        Node::Break { label, .. } => {
            out.push_str("break");
            if let Some(l) = label {
                out.push(' ');
                out.push_str(l);
            }
            out.push_str(";\n");
        }
        Node::Continue { label, .. } => {
            out.push_str("continue");
            if let Some(l) = label {
                out.push(' ');
                out.push_str(l);
            }
            out.push_str(";\n");
        }
        Node::Labeled { label, body, .. } => {
            out.push_str(label);
            // A labeled loop must stay a loop for `continue label`.
            out.push_str(": ");
            stmt(out, body);
        }
        Node::ExprStmt { expr: e, .. } => {
            expr(out, e);
            out.push_str(";\n");
        }
        Node::Empty { .. } => out.push_str(";\n"),
        Node::Debugger { .. } => out.push_str("debugger;\n"),
        other => {
            // Expression in statement position (defensively total).
            expr(out, other);
            out.push_str(";\n");
        }
    }
}

/// Every non-block body gets braces; dangling-else can never arise.
fn block_of(out: &mut String, node: &Node) {
    match node {
        Node::Block { body, .. } => {
            out.push_str("{\n");
            for s in body {
                stmt(out, s);
            }
            out.push_str("}\n");
        }
        other => {
            out.push_str("{\n");
            stmt(out, other);
            out.push_str("}\n");
        }
    }
}

fn var_decl(out: &mut String, node: &Node) {
    let Node::VarDecl { kind, decls, .. } = node else {
        return;
    };
    out.push_str(kind.as_str());
    out.push(' ');
    for (i, d) in decls.iter().enumerate() {
        if i > 0 {
            out.push_str(", ");
        }
        out.push_str(&d.name);
        if let Some(init) = &d.init {
            out.push_str(" = ");
            expr(out, init);
        }
    }
}

fn class(out: &mut String, node: &Node) {
    let Node::ClassDecl {
        name,
        superclass,
        members,
        ..
    } = node
    else {
        return;
    };
    out.push_str("class ");
    out.push_str(name);
    if let Some(sup) = superclass {
        out.push_str(" extends ");
        expr(out, sup);
    }
    out.push_str(" {\n");
    for m in members {
        if m.is_static {
            out.push_str("static ");
        }
        match m.kind {
            ClassMemberKind::Getter => out.push_str("get "),
            ClassMemberKind::Setter => out.push_str("set "),
            _ => {}
        }
        if m.kind == ClassMemberKind::Field {
            out.push_str(&m.key);
            if !matches!(&m.value, Node::Ident { name, .. } if name == "undefined") {
                out.push_str(" = ");
                expr(out, &m.value);
            }
            out.push_str(";\n");
        } else if let Node::FunctionExpr {
            params,
            body,
            is_async,
            is_generator,
            ..
        } = &m.value
        {
            if *is_async {
                out.push_str("async ");
            }
            if *is_generator {
                out.push('*');
            }
            out.push_str(&m.key);
            params_list(out, params);
            out.push(' ');
            block_of(out, body);
        }
    }
    out.push_str("}\n");
}

fn params_list(out: &mut String, params: &[super::Param]) {
    out.push('(');
    for (i, p) in params.iter().enumerate() {
        if i > 0 {
            out.push_str(", ");
        }
        if p.rest {
            out.push_str("...");
        }
        out.push_str(&p.name);
        if let Some(d) = &p.default {
            out.push_str(" = ");
            expr(out, d);
        }
    }
    out.push(')');
}

// ---------------------------------------------------------------------------
// expression serialization
// ---------------------------------------------------------------------------

fn expr(out: &mut String, node: &Node) {
    match node {
        Node::Ident { name, .. } => out.push_str(name),
        Node::Num { value, raw, .. } => {
            if raw.is_empty() {
                out.push_str(&format_number(*value));
            } else {
                out.push_str(raw);
            }
        }
        Node::Str { value, .. } => {
            // JSON escaping is valid JS; the code generator re-quotes.
            out.push_str(&serde_json::to_string(value).unwrap_or_else(|_| "''".into()));
        }
        Node::Template { quasis, exprs, .. } => {
            out.push('`');
            for (i, q) in quasis.iter().enumerate() {
                let escaped = q
                    .replace('\\', "\\\\")
                    .replace('`', "\\`")
                    .replace("${", "\\${");
                out.push_str(&escaped);
                if i < exprs.len() {
                    out.push_str("${");
                    expr(out, &exprs[i]);
                    out.push('}');
                }
            }
            out.push('`');
        }
        Node::Regex { pattern, flags, .. } => {
            out.push('/');
            out.push_str(pattern);
            out.push('/');
            out.push_str(flags);
        }
        Node::Bool { value, .. } => out.push_str(if *value { "true" } else { "false" }),
        Node::Null { .. } => out.push_str("null"),
        Node::This { .. } => out.push_str("this"),
        Node::Array { elements, .. } => {
            out.push('[');
            for (i, e) in elements.iter().enumerate() {
                if i > 0 {
                    out.push_str(", ");
                }
                if let Some(e) = e {
                    expr(out, e);
                }
            }
            out.push(']');
        }
        Node::Object { props, .. } => {
            // Parens keep an object literal unambiguous in every position.
            out.push_str("({ ");
            for (i, p) in props.iter().enumerate() {
                if i > 0 {
                    out.push_str(", ");
                }
                property(out, p);
            }
            out.push_str(" })");
        }
        Node::Member {
            object,
            property,
            computed,
            optional,
            ..
        } => {
            expr(out, object);
            if *computed {
                if *optional {
                    out.push_str("?.");
                }
                out.push('[');
                expr(out, property);
                out.push(']');
            } else {
                out.push_str(if *optional { "?." } else { "." });
                if let Node::Ident { name, .. } = property.as_ref() {
                    out.push_str(name);
                }
            }
        }
        Node::Call {
            callee,
            args,
            optional,
            ..
        } => {
            expr(out, callee);
            if *optional {
                out.push_str("?.");
            }
            args_list(out, args);
        }
        Node::New { callee, args, .. } => {
            // Parens stop a callee-side call from binding the argument list.
            out.push_str("new (");
            expr(out, callee);
            out.push(')');
            args_list(out, args);
        }
        Node::Spread { arg, .. } => {
            out.push_str("...");
            expr(out, arg);
        }
        Node::FunctionExpr {
            name,
            params,
            body,
            is_async,
            is_generator,
            ..
        } => {
            out.push('(');
            if *is_async {
                out.push_str("async ");
            }
            out.push_str("function");
            if *is_generator {
                out.push('*');
            }
            if let Some(n) = name {
                out.push(' ');
                out.push_str(n);
            }
            params_list(out, params);
            out.push(' ');
            block_of(out, body);
            out.push(')');
        }
        Node::Arrow {
            params,
            body,
            expression,
            is_async,
            ..
        } => {
            out.push('(');
            if *is_async {
                out.push_str("async ");
            }
            params_list(out, params);
            out.push_str(" => ");
            if *expression {
                expr(out, body);
            } else {
                block_of(out, body);
            }
            out.push(')');
        }
        Node::Unary { op, arg, .. } => {
            out.push('(');
            out.push_str(op);
            if op.len() > 1 {
                out.push(' ');
            }
            expr(out, arg);
            out.push(')');
        }
        Node::Update {
            op, prefix, arg, ..
        } => {
            out.push('(');
            if *prefix {
                out.push_str(op);
                expr(out, arg);
            } else {
                expr(out, arg);
                out.push_str(op);
            }
            out.push(')');
        }
        Node::Binary {
            op, left, right, ..
        }
        | Node::Logical {
            op, left, right, ..
        } => {
            out.push('(');
            expr(out, left);
            out.push(' ');
            out.push_str(op);
            out.push(' ');
            expr(out, right);
            out.push(')');
        }
        Node::Assign {
            op, target, value, ..
        } => {
            out.push('(');
            expr(out, target);
            out.push(' ');
            out.push_str(op);
            out.push(' ');
            expr(out, value);
            out.push(')');
        }
        Node::Conditional {
            test,
            consequent,
            alternate,
            ..
        } => {
            out.push('(');
            expr(out, test);
            out.push_str(" ? ");
            expr(out, consequent);
            out.push_str(" : ");
            expr(out, alternate);
            out.push(')');
        }
        Node::Sequence { exprs, .. } => {
            out.push('(');
            for (i, e) in exprs.iter().enumerate() {
                if i > 0 {
                    out.push_str(", ");
                }
                expr(out, e);
            }
            out.push(')');
        }
        Node::Await { arg, .. } => {
            out.push_str("(await ");
            expr(out, arg);
            out.push(')');
        }
        Node::Yield { arg, delegate, .. } => {
            out.push_str("(yield");
            if *delegate {
                out.push('*');
            }
            if let Some(a) = arg {
                out.push(' ');
                expr(out, a);
            }
            out.push(')');
        }
        // Statements reached through expression positions print inline.
        other => stmt(out, other),
    }
}

fn property(out: &mut String, p: &Property) {
    // Spread property (stored as a shorthand Spread value).
    if let Node::Spread { .. } = &p.value {
        expr(out, &p.value);
        return;
    }
    if p.shorthand {
        if let Node::Ident { name, .. } = &p.key {
            out.push_str(name);
            return;
        }
    }
    if p.computed {
        out.push('[');
        expr(out, &p.key);
        out.push(']');
    } else {
        match &p.key {
            Node::Ident { name, .. } if is_valid_ident(name) => out.push_str(name),
            Node::Ident { name, .. } => {
                out.push_str(&serde_json::to_string(name).unwrap_or_default())
            }
            Node::Str { value, .. } if is_valid_ident(value) => out.push_str(value),
            Node::Str { value, .. } => {
                out.push_str(&serde_json::to_string(value).unwrap_or_default())
            }
            Node::Num { raw, .. } => out.push_str(raw),
            other => {
                out.push('[');
                expr(out, other);
                out.push(']');
            }
        }
    }
    out.push_str(": ");
    expr(out, &p.value);
}

fn args_list(out: &mut String, args: &[Node]) {
    out.push('(');
    for (i, a) in args.iter().enumerate() {
        if i > 0 {
            out.push_str(", ");
        }
        expr(out, a);
    }
    out.push(')');
}

fn format_number(value: f64) -> String {
    if value.fract() == 0.0 && value.abs() < 1e15 {
        format!("{}", value as i64)
    } else {
        format!("{value}")
    }
}

fn is_valid_ident(s: &str) -> bool {
    let mut chars = s.chars();
    match chars.next() {
        Some(c) if c == '_' || c == '$' || c.is_alphabetic() => {}
        _ => return false,
    }
    chars.all(|c| c == '_' || c == '$' || c.is_alphanumeric())
}

#[cfg(test)]
mod tests {
    use super::super::parser::parse;
    use super::*;

    /// parse → generate → parse must yield an equivalent tree.
    fn roundtrip(src: &str) {
        let first = parse(src).expect("initial parse");
        assert!(first.is_clean(), "issues on {src}: {:?}", first.errors);
        let gen1 = generate(&first.program, &GenOptions::default());
        let second = parse(&gen1)
            .unwrap_or_else(|e| panic!("regenerated source failed to parse: {e}\n{gen1}"));
        assert!(
            second.is_clean(),
            "issues on regenerated: {:?}\n{gen1}",
            second.errors
        );
        let gen2 = generate(&second.program, &GenOptions::default());
        assert_eq!(gen1, gen2, "generation not stable for {src}");
    }

    #[test]
    fn test_roundtrip_basics() {
        roundtrip("var x = 1 + 2 * 3;");
        roundtrip("function f(a, b) { return a + b; }");
        roundtrip("if (a) { b(); } else { c(); }");
        roundtrip("for (var i = 0; i < 10; i++) { f(i); }");
        roundtrip("for (const k in obj) { log(k); }");
        roundtrip("while (x) { x--; }");
        roundtrip("do { tick(); } while (alive);");
        roundtrip("try { risky(); } catch (e) { handle(e); } finally { done(); }");
    }

    #[test]
    fn test_roundtrip_expressions() {
        roundtrip("x = a ? b : c;");
        roundtrip("y = (a + b) * c;");
        roundtrip("z = a && b || c;");
        roundtrip("w = obj.a.b['c'](1, 2);");
        roundtrip("v = [1, , 3];");
        roundtrip("u = { a: 1, 'b c': 2, [k]: 3 };");
        roundtrip("t = function named() { return 1; };");
        roundtrip("s = (a, b) => a + b;");
        roundtrip("r = x => ({ a: x });");
        roundtrip("q = new Date(1, 2);");
        roundtrip("p = typeof x === 'string';");
        roundtrip("o = -(-x);");
        roundtrip("n = a?.b?.[0];");
    }

    #[test]
    fn test_roundtrip_obfuscated_shapes() {
        roundtrip("var _0xabcd = ['hello', 'world'];console[_0xabcd[0]](_0xabcd[1]);");
        roundtrip(
            "while (true) { switch (s) { case 0: a(); continue; case 1: b(); continue; } break; }",
        );
        roundtrip("(function(a, b) { a['push'](a['shift']()); })(arr, 500);");
    }

    #[test]
    fn test_normalization_strips_serializer_parens() {
        let program = parse("x = 1 + 2;").unwrap().program;
        let out = generate(&program, &GenOptions::default());
        // The intermediate form is fully parenthesized; the code generator
        // re-derives minimal parens.
        assert!(out.contains("x = 1 + 2"), "got: {out}");
        assert!(!out.contains("(x"), "got: {out}");
    }

    #[test]
    fn test_precedence_parens_preserved() {
        let program = parse("x = (a + b) * c;").unwrap().program;
        let out = generate(&program, &GenOptions::default());
        assert!(out.contains("(a + b) * c"), "got: {out}");
    }

    #[test]
    fn test_object_statement_parenthesized() {
        let program = parse("x = { a: 1 };").unwrap().program;
        let Node::Program { body } = &program else {
            panic!()
        };
        // Pull the object out into statement position and print it.
        let Node::ExprStmt { expr, .. } = &body[0] else {
            panic!()
        };
        let Node::Assign { value, .. } = expr.as_ref() else {
            panic!()
        };
        let span = value.span();
        let stmt = Node::ExprStmt {
            expr: value.clone(),
            span,
        };
        let out = generate(&stmt, &GenOptions::default());
        assert!(out.trim_start().starts_with('('), "got: {out}");
    }

    #[test]
    fn test_single_quoted_strings() {
        let program = parse("f(\"hi\");").unwrap().program;
        let out = generate(&program, &GenOptions::default());
        assert!(out.contains("'hi'"), "got: {out}");
    }

    #[test]
    fn test_compact_mode() {
        let program = parse("if (a) { b(); }").unwrap().program;
        let out = generate(
            &program,
            &GenOptions {
                compact: true,
            },
        );
        assert!(!out.trim_end().contains('\n'), "got: {out}");
    }
}
