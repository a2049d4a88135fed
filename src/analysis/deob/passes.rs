//! Rule-based passes: constant folding, dead-code elimination, string
//! decoding, and the simplification sweep.
//!
//! Passes parse their input fresh and only write regenerated source back
//! when they changed something, so untouched code keeps its original text
//! for the next pass.

use crate::ast::{self, GenOptions, Node, Rewrite};

use super::PassContext;

/// Parse helper: on failure, record a skipped pass and return None.
fn parse_or_skip(ctx: &mut PassContext, kind: &str) -> Option<Node> {
    match ast::parse(&ctx.source) {
        Ok(outcome) => {
            if !outcome.is_clean() {
                ctx.warn(format!(
                    "{kind}: {} parse issue(s), operating on recovered tree",
                    outcome.errors.len()
                ));
            }
            Some(outcome.program)
        }
        Err(e) => {
            ctx.record(kind, format!("skipped: {e}"), false, 0);
            None
        }
    }
}

fn emit(ctx: &mut PassContext, kind: &str, description: &str, tree: &Node, count: usize) {
    if count > 0 {
        ctx.source = ast::generate(tree, &GenOptions::default());
        ctx.record(kind, description, true, count);
    } else {
        ctx.record(kind, description, true, 0);
    }
}

// ---------------------------------------------------------------------------
// basic-ast-transform: constant folding + dead code elimination
// ---------------------------------------------------------------------------

pub fn basic_transform(ctx: &mut PassContext) {
    let kind = "basic-ast-transform";
    let Some(mut tree) = parse_or_skip(ctx, kind) else {
        return;
    };
    let mut count = 0usize;
    ast::rewrite(&mut tree, &mut |node| {
        count += fold_node(node);
        count += eliminate_dead(node);
        Rewrite::Keep
    });
    emit(ctx, kind, "constant folding and dead-code elimination", &tree, count);
}

/// Fold a single node in place where its value is statically known.
/// Returns the number of folds applied.
fn fold_node(node: &mut Node) -> usize {
    match node {
        Node::Binary { op, left, right, span } => {
            let span = *span;
            if let (Some(a), Some(b)) = (lit_num(left), lit_num(right)) {
                if let Some(v) = fold_numeric(op, a, b) {
                    *node = Node::num(v, span);
                    return 1;
                }
                if let Some(v) = fold_num_compare(op, a, b) {
                    *node = Node::Bool { value: v, span };
                    return 1;
                }
            }
            if let (Node::Str { value: a, .. }, Node::Str { value: b, .. }) =
                (left.as_ref(), right.as_ref())
            {
                match *op {
                    "+" => {
                        let joined = format!("{a}{b}");
                        *node = Node::str(joined, span);
                        return 1;
                    }
                    "==" | "===" => {
                        let v = a == b;
                        *node = Node::Bool { value: v, span };
                        return 1;
                    }
                    "!=" | "!==" => {
                        let v = a != b;
                        *node = Node::Bool { value: v, span };
                        return 1;
                    }
                    _ => {}
                }
            }
            // String + number concatenation.
            if *op == "+" {
                if let (Node::Str { value: a, .. }, Some(b)) = (left.as_ref(), lit_num(right)) {
                    let joined = format!("{a}{}", js_num_string(b));
                    *node = Node::str(joined, span);
                    return 1;
                }
                if let (Some(a), Node::Str { value: b, .. }) = (lit_num(left), right.as_ref()) {
                    let joined = format!("{}{b}", js_num_string(a));
                    *node = Node::str(joined, span);
                    return 1;
                }
            }
            0
        }
        Node::Logical { op, left, right, span } => {
            let span = *span;
            if let Some(truthy) = lit_truthiness(left) {
                let replacement = match (*op, truthy) {
                    ("&&", true) | ("||", false) => Some(std::mem::replace(
                        right.as_mut(),
                        Node::Null { span },
                    )),
                    ("&&", false) | ("||", true) => Some(std::mem::replace(
                        left.as_mut(),
                        Node::Null { span },
                    )),
                    _ => None,
                };
                if let Some(r) = replacement {
                    *node = r;
                    return 1;
                }
            }
            0
        }
        Node::Unary { op, arg, span } => {
            let span = *span;
            match *op {
                "!" => {
                    if let Some(truthy) = lit_truthiness(arg) {
                        *node = Node::Bool {
                            value: !truthy,
                            span,
                        };
                        return 1;
                    }
                    0
                }
                "typeof" => match arg.as_ref() {
                    Node::Str { .. } => {
                        *node = Node::str("string", span);
                        1
                    }
                    Node::Num { .. } => {
                        *node = Node::str("number", span);
                        1
                    }
                    Node::Bool { .. } => {
                        *node = Node::str("boolean", span);
                        1
                    }
                    _ => 0,
                },
                "void" if arg.is_literal() => {
                    *node = Node::ident("undefined", span);
                    1
                }
                _ => 0,
            }
        }
        Node::Conditional {
            test,
            consequent,
            alternate,
            span,
        } => {
            let span = *span;
            if let Some(truthy) = lit_truthiness(test) {
                let winner = if truthy { consequent } else { alternate };
                *node = std::mem::replace(winner.as_mut(), Node::Null { span });
                return 1;
            }
            0
        }
        _ => 0,
    }
}

/// Dead branches and unreachable tails. Returns folds applied.
fn eliminate_dead(node: &mut Node) -> usize {
    let mut count = 0;
    match node {
        Node::If {
            test,
            consequent,
            alternate,
            span,
        } => {
            let span = *span;
            if let Some(truthy) = lit_truthiness(test) {
                let replacement = if truthy {
                    std::mem::replace(consequent.as_mut(), Node::Empty { span })
                } else {
                    match alternate.take() {
                        Some(mut alt) => std::mem::replace(alt.as_mut(), Node::Empty { span }),
                        None => Node::Empty { span },
                    }
                };
                *node = replacement;
                count += 1;
            }
        }
        Node::Program { body } | Node::Block { body, .. } => {
            count += truncate_unreachable(body);
        }
        Node::Switch { cases, .. } => {
            for case in cases.iter_mut() {
                count += truncate_unreachable(&mut case.body);
            }
        }
        _ => {}
    }
    count
}

/// Drop statements after a terminator, keeping hoisted function
/// declarations.
fn truncate_unreachable(body: &mut Vec<Node>) -> usize {
    let terminator = body.iter().position(|n| {
        matches!(
            n,
            Node::Return { .. } | Node::Throw { .. } | Node::Break { .. } | Node::Continue { .. }
        )
    });
    let Some(idx) = terminator else {
        return 0;
    };
    if idx + 1 >= body.len() {
        return 0;
    }
    let tail: Vec<Node> = body.split_off(idx + 1);
    let before = tail.len();
    let kept: Vec<Node> = tail
        .into_iter()
        .filter(|n| matches!(n, Node::FunctionDecl { .. }))
        .collect();
    let dropped = before - kept.len();
    body.extend(kept);
    usize::from(dropped > 0)
}

// ---------------------------------------------------------------------------
// decode-strings
// ---------------------------------------------------------------------------

pub fn decode_strings(ctx: &mut PassContext) {
    let kind = "decode-strings";
    // Escape sequences are normalized by regeneration; count what the
    // incoming text still carries so the credit lands on this pass.
    let escape_re = regex::Regex::new(r"\\x[0-9a-fA-F]{2}|\\u[0-9a-fA-F]{4}").unwrap();
    let escapes = escape_re.find_iter(&ctx.source).count();

    let Some(mut tree) = parse_or_skip(ctx, kind) else {
        return;
    };
    let mut folds = 0usize;
    ast::rewrite(&mut tree, &mut |node| {
        if let Node::Call { callee, args, span, .. } = node {
            let span = *span;
            let is_from_char_code = matches!(
                callee.as_ref(),
                Node::Member { object, property, computed: false, .. }
                    if object.as_ident() == Some("String")
                        && property.as_ident() == Some("fromCharCode")
            );
            if is_from_char_code && !args.is_empty() {
                let codes: Option<Vec<f64>> = args.iter().map(Node::as_num_lit).collect();
                if let Some(codes) = codes {
                    let decoded: String = codes
                        .iter()
                        .filter_map(|c| char::from_u32(*c as u32))
                        .collect();
                    *node = Node::str(decoded, span);
                    folds += 1;
                }
            }
        }
        Rewrite::Keep
    });

    let count = folds + escapes;
    emit(
        ctx,
        kind,
        "literal escape and fromCharCode decoding",
        &tree,
        count,
    );
}

// ---------------------------------------------------------------------------
// simplify
// ---------------------------------------------------------------------------

pub fn simplify(ctx: &mut PassContext) {
    let kind = "simplify";
    let Some(mut tree) = parse_or_skip(ctx, kind) else {
        return;
    };
    let mut count = 0usize;

    // Computed member access with a literal key reads better as dot form.
    ast::rewrite(&mut tree, &mut |node| {
        if let Node::Member {
            property,
            computed,
            span,
            ..
        } = node
        {
            if *computed {
                if let Node::Str { value, .. } = property.as_ref() {
                    if is_js_ident(value) {
                        let name = value.clone();
                        *property = Box::new(Node::ident(name, *span));
                        *computed = false;
                        count += 1;
                    }
                }
            }
        }
        count += fold_opaque(node);
        Rewrite::Keep
    });

    // Drop string-array declarations with no remaining references.
    let arrays: Vec<String> = ctx.string_arrays.keys().cloned().collect();
    for name in arrays {
        if ident_uses(&tree, &name) == 0 {
            if remove_declaration(&mut tree, &name) {
                count += 1;
            }
        }
    }

    emit(ctx, kind, "access simplification and dead declarations", &tree, count);
}

/// Opaque predicates: `x * 0 === 0` and friends with side-effect-free `x`.
fn fold_opaque(node: &mut Node) -> usize {
    if let Node::Binary {
        op: "===" | "==",
        left,
        right,
        span,
    } = node
    {
        let span = *span;
        let is_times_zero = matches!(
            left.as_ref(),
            Node::Binary { op: "*", left: a, right: b, .. }
                if (b.as_num_lit() == Some(0.0) && side_effect_free(a))
                    || (a.as_num_lit() == Some(0.0) && side_effect_free(b))
        );
        if is_times_zero && right.as_num_lit() == Some(0.0) {
            *node = Node::Bool { value: true, span };
            return 1;
        }
    }
    0
}

fn side_effect_free(node: &Node) -> bool {
    matches!(node, Node::Ident { .. }) || node.is_literal()
}

fn ident_uses(tree: &Node, name: &str) -> usize {
    struct Uses<'a> {
        name: &'a str,
        count: usize,
    }
    impl ast::Visitor for Uses<'_> {
        fn enter(&mut self, node: &Node) {
            if node.as_ident() == Some(self.name) {
                self.count += 1;
            }
        }
    }
    let mut v = Uses { name, count: 0 };
    ast::walk(tree, &mut v);
    v.count
}

fn remove_declaration(tree: &mut Node, name: &str) -> bool {
    let Node::Program { body } = tree else {
        return false;
    };
    let mut removed = false;
    for stmt in body.iter_mut() {
        if let Node::VarDecl { decls, .. } = stmt {
            let before = decls.len();
            decls.retain(|d| d.name != name);
            if decls.len() < before {
                removed = true;
            }
        }
    }
    body.retain(|stmt| !matches!(stmt, Node::VarDecl { decls, .. } if decls.is_empty()));
    removed
}

// ---------------------------------------------------------------------------
// shared literal helpers
// ---------------------------------------------------------------------------

fn lit_num(node: &Node) -> Option<f64> {
    match node {
        Node::Num { value, .. } => Some(*value),
        _ => None,
    }
}

/// Statically known truthiness, restricted to side-effect-free operands.
fn lit_truthiness(node: &Node) -> Option<bool> {
    match node {
        Node::Bool { value, .. } => Some(*value),
        Node::Num { value, .. } => Some(*value != 0.0 && !value.is_nan()),
        Node::Str { value, .. } => Some(!value.is_empty()),
        Node::Null { .. } => Some(false),
        Node::Ident { name, .. } if name == "undefined" => Some(false),
        Node::Ident { name, .. } if name == "NaN" => Some(false),
        Node::Array { elements, .. } if elements.iter().flatten().all(|e| e.is_literal()) => {
            Some(true)
        }
        Node::Object { props, .. } if props.is_empty() => Some(true),
        Node::Unary { op: "!", arg, .. } => lit_truthiness(arg).map(|t| !t),
        _ => None,
    }
}

fn fold_numeric(op: &str, a: f64, b: f64) -> Option<f64> {
    Some(match op {
        "+" => a + b,
        "-" => a - b,
        "*" => a * b,
        "/" => a / b,
        "%" => a % b,
        "**" => a.powf(b),
        "&" => (to_int32(a) & to_int32(b)) as f64,
        "|" => (to_int32(a) | to_int32(b)) as f64,
        "^" => (to_int32(a) ^ to_int32(b)) as f64,
        "<<" => (to_int32(a).wrapping_shl(to_uint32(b) & 31)) as f64,
        ">>" => (to_int32(a).wrapping_shr(to_uint32(b) & 31)) as f64,
        ">>>" => ((to_int32(a) as u32).wrapping_shr(to_uint32(b) & 31)) as f64,
        _ => return None,
    })
    .filter(|v| v.is_finite())
}

fn fold_num_compare(op: &str, a: f64, b: f64) -> Option<bool> {
    Some(match op {
        "==" | "===" => a == b,
        "!=" | "!==" => a != b,
        "<" => a < b,
        ">" => a > b,
        "<=" => a <= b,
        ">=" => a >= b,
        _ => return None,
    })
}

fn to_int32(n: f64) -> i32 {
    if !n.is_finite() {
        return 0;
    }
    let n = n.trunc();
    let m = ((n % 4294967296.0) + 4294967296.0) % 4294967296.0;
    if m >= 2147483648.0 {
        (m - 4294967296.0) as i32
    } else {
        m as i32
    }
}

fn to_uint32(n: f64) -> u32 {
    to_int32(n) as u32
}

fn js_num_string(n: f64) -> String {
    if n.fract() == 0.0 && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        format!("{n}")
    }
}

fn is_js_ident(s: &str) -> bool {
    let mut chars = s.chars();
    match chars.next() {
        Some(c) if c == '_' || c == '$' || c.is_alphabetic() => {}
        _ => return false,
    }
    chars.all(|c| c == '_' || c == '$' || c.is_alphanumeric())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn ctx(src: &str) -> PassContext {
        PassContext {
            source: src.to_string(),
            records: Vec::new(),
            warnings: Vec::new(),
            string_arrays: HashMap::new(),
            mangling: regex::Regex::new(r"^_0x[a-fA-F0-9]+$").unwrap(),
        }
    }

    #[test]
    fn test_numeric_folding() {
        let mut c = ctx("x = 2 + 3 * 4;");
        basic_transform(&mut c);
        assert!(c.source.contains("x = 14"), "got: {}", c.source);
    }

    #[test]
    fn test_string_folding() {
        let mut c = ctx("x = 'ab' + 'cd' + 1;");
        basic_transform(&mut c);
        assert!(c.source.contains("'abcd1'"), "got: {}", c.source);
    }

    #[test]
    fn test_logical_shortcuts() {
        let mut c = ctx("a = true && go(); b = false || fallback();");
        basic_transform(&mut c);
        assert!(c.source.contains("a = go()"), "got: {}", c.source);
        assert!(c.source.contains("b = fallback()"), "got: {}", c.source);
    }

    #[test]
    fn test_bang_bang_bracket() {
        let mut c = ctx("while (!![]) { f(); break; }");
        basic_transform(&mut c);
        assert!(c.source.contains("while (true)"), "got: {}", c.source);
    }

    #[test]
    fn test_if_true_false() {
        let mut c = ctx("if (true) { a(); } if (false) { b(); } else { c(); }");
        basic_transform(&mut c);
        assert!(c.source.contains("a()"));
        assert!(!c.source.contains("b()"));
        assert!(c.source.contains("c()"));
    }

    #[test]
    fn test_unreachable_after_return_keeps_functions() {
        let mut c = ctx("function f() { return 1; var dead = 2; function hoisted() {} }");
        basic_transform(&mut c);
        assert!(!c.source.contains("dead"), "got: {}", c.source);
        assert!(c.source.contains("hoisted"), "got: {}", c.source);
    }

    #[test]
    fn test_decode_fromcharcode() {
        let mut c = ctx("var s = String.fromCharCode(72, 105);");
        decode_strings(&mut c);
        assert!(c.source.contains("'Hi'"), "got: {}", c.source);
        let rec = c.records.last().unwrap();
        assert!(rec.success && rec.count >= 1);
    }

    #[test]
    fn test_fromcharcode_non_numeric_untouched() {
        let mut c = ctx("var s = String.fromCharCode(x);");
        decode_strings(&mut c);
        assert!(c.source.contains("fromCharCode(x)"));
    }

    #[test]
    fn test_member_to_dot() {
        let mut c = ctx("console['log']('x'); a['not-ident'] = 1;");
        simplify(&mut c);
        assert!(c.source.contains("console.log"), "got: {}", c.source);
        assert!(c.source.contains("['not-ident']"), "got: {}", c.source);
    }

    #[test]
    fn test_opaque_times_zero() {
        let mut c = ctx("if (x * 0 === 0) { a(); } else { b(); }");
        simplify(&mut c);
        // fold_opaque turns the test into true; a later basic pass would
        // collapse the branch, but simplify already rewrote the predicate.
        assert!(c.source.contains("if (true)"), "got: {}", c.source);
    }

    #[test]
    fn test_unused_array_decl_removed() {
        let mut c = ctx("var _0xab = ['x'];f('done');");
        c.string_arrays
            .insert("_0xab".to_string(), vec!["x".to_string()]);
        simplify(&mut c);
        assert!(!c.source.contains("_0xab"), "got: {}", c.source);
    }

    #[test]
    fn test_to_int32_wrapping() {
        assert_eq!(to_int32(4294967296.0), 0);
        assert_eq!(to_int32(2147483648.0), -2147483648);
        assert_eq!(to_int32(-1.0), -1);
        assert_eq!(to_int32(f64::NAN), 0);
    }
}
