//! String-array handling: extraction, decryption, and rotation removal.
//!
//! javascript-obfuscator hides string literals in a top-level array behind a
//! mangled name, rewrites every use into an indexed access, and often adds a
//! rotation IIFE that push/shifts the array until a checksum settles.
//! Extraction must run before decryption: later passes look the arrays up in
//! the shared context.

use crate::ast::{self, GenOptions, Node, Rewrite};

use super::PassContext;

/// Record top-level mangled string arrays into the pass context.
pub fn extract_string_arrays(ctx: &mut PassContext) {
    let kind = "extract-string-arrays";
    let tree = match ast::parse(&ctx.source) {
        Ok(outcome) => outcome.program,
        Err(e) => {
            ctx.record(kind, format!("skipped: {e}"), false, 0);
            return;
        }
    };
    let Node::Program { body } = &tree else {
        return;
    };
    let mut found = 0usize;
    for stmt in body {
        let Node::VarDecl { decls, .. } = stmt else {
            continue;
        };
        for d in decls {
            if !ctx.mangling.is_match(&d.name) {
                continue;
            }
            let Some(Node::Array { elements, .. }) = &d.init else {
                continue;
            };
            let strings: Option<Vec<String>> = elements
                .iter()
                .map(|e| match e {
                    Some(Node::Str { value, .. }) => Some(value.clone()),
                    _ => None,
                })
                .collect();
            if let Some(strings) = strings {
                if !strings.is_empty() {
                    ctx.string_arrays.insert(d.name.clone(), strings);
                    found += 1;
                }
            }
        }
    }
    ctx.record(
        kind,
        format!("{found} string array(s) recorded"),
        found > 0,
        found,
    );
}

/// Replace indexed accesses into recorded arrays with the string literals.
pub fn decrypt_arrays(ctx: &mut PassContext) {
    let kind = "decrypt-arrays";
    if ctx.string_arrays.is_empty() {
        ctx.record(kind, "no string arrays recorded", true, 0);
        return;
    }
    let mut tree = match ast::parse(&ctx.source) {
        Ok(outcome) => outcome.program,
        Err(e) => {
            ctx.record(kind, format!("skipped: {e}"), false, 0);
            return;
        }
    };
    let arrays = ctx.string_arrays.clone();
    let mut count = 0usize;
    ast::rewrite(&mut tree, &mut |node| {
        if let Node::Member {
            object,
            property,
            computed: true,
            span,
            ..
        } = node
        {
            let span = *span;
            if let (Some(name), Some(idx)) = (object.as_ident(), property.as_num_lit()) {
                if let Some(strings) = arrays.get(name) {
                    if idx >= 0.0 && (idx as usize) < strings.len() && idx.fract() == 0.0 {
                        *node = Node::str(strings[idx as usize].clone(), span);
                        count += 1;
                    }
                }
            }
        }
        Rewrite::Keep
    });
    if count > 0 {
        ctx.source = ast::generate(&tree, &GenOptions::default());
    }
    ctx.record(
        kind,
        format!("{count} indexed access(es) replaced"),
        count > 0,
        count,
    );
}

/// Remove rotation IIFEs: a call statement whose function body runs a
/// while/try loop doing push/shift on a recorded string array.
pub fn remove_rotation(ctx: &mut PassContext) {
    let kind = "remove-rotation";
    if ctx.string_arrays.is_empty() {
        ctx.record(kind, "no string arrays recorded", true, 0);
        return;
    }
    let mut tree = match ast::parse(&ctx.source) {
        Ok(outcome) => outcome.program,
        Err(e) => {
            ctx.record(kind, format!("skipped: {e}"), false, 0);
            return;
        }
    };
    let Node::Program { body } = &mut tree else {
        return;
    };
    let before = body.len();
    let arrays = &ctx.string_arrays;
    body.retain(|stmt| !is_rotation_iife(stmt, arrays));
    let count = before - body.len();
    if count > 0 {
        ctx.source = ast::generate(&tree, &GenOptions::default());
    }
    ctx.record(
        kind,
        format!("{count} rotation IIFE(s) removed"),
        count > 0,
        count,
    );
}

fn is_rotation_iife(
    stmt: &Node,
    arrays: &std::collections::HashMap<String, Vec<String>>,
) -> bool {
    let Node::ExprStmt { expr, .. } = stmt else {
        return false;
    };
    let Node::Call { callee, .. } = expr.as_ref() else {
        return false;
    };
    if !callee.is_function() {
        return false;
    }
    // The call must reference a recorded array somewhere (argument or body).
    struct Touch<'a> {
        arrays: &'a std::collections::HashMap<String, Vec<String>>,
        found: bool,
    }
    impl ast::Visitor for Touch<'_> {
        fn enter(&mut self, node: &Node) {
            if node
                .as_ident()
                .is_some_and(|n| self.arrays.contains_key(n))
            {
                self.found = true;
            }
        }
    }
    let mut touch = Touch {
        arrays,
        found: false,
    };
    ast::walk(expr, &mut touch);
    if !touch.found {
        return false;
    }

    // Body must loop and shuffle via push/shift.
    struct Shape {
        has_loop: bool,
        has_push: bool,
        has_shift: bool,
    }
    impl ast::Visitor for Shape {
        fn enter(&mut self, node: &Node) {
            match node {
                Node::While { .. } | Node::DoWhile { .. } | Node::For { .. } => {
                    self.has_loop = true
                }
                Node::Call { callee, .. } => {
                    if let Node::Member { property, .. } = callee.as_ref() {
                        let prop = match property.as_ref() {
                            Node::Ident { name, .. } => Some(name.as_str()),
                            Node::Str { value, .. } => Some(value.as_str()),
                            _ => None,
                        };
                        match prop {
                            Some("push") => self.has_push = true,
                            Some("shift") => self.has_shift = true,
                            _ => {}
                        }
                    }
                }
                _ => {}
            }
        }
    }
    let mut shape = Shape {
        has_loop: false,
        has_push: false,
        has_shift: false,
    };
    ast::walk(callee, &mut shape);
    shape.has_loop && shape.has_push && shape.has_shift
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
    fn test_extract_then_decrypt() {
        let mut c = ctx("var _0xab=['log','hi'];console[_0xab[0]](_0xab[1]);");
        extract_string_arrays(&mut c);
        assert_eq!(c.string_arrays["_0xab"], vec!["log", "hi"]);
        decrypt_arrays(&mut c);
        assert!(c.source.contains("console['log']('hi')"), "got: {}", c.source);
        assert_eq!(c.records.last().unwrap().count, 2);
    }

    #[test]
    fn test_extract_ignores_non_mangled() {
        let mut c = ctx("var friendly = ['a'];");
        extract_string_arrays(&mut c);
        assert!(c.string_arrays.is_empty());
    }

    #[test]
    fn test_extract_ignores_mixed_arrays() {
        let mut c = ctx("var _0xab = ['a', 2];");
        extract_string_arrays(&mut c);
        assert!(c.string_arrays.is_empty());
    }

    #[test]
    fn test_decrypt_out_of_bounds_untouched() {
        let mut c = ctx("var _0xab=['a'];f(_0xab[7]);");
        extract_string_arrays(&mut c);
        decrypt_arrays(&mut c);
        assert!(c.source.contains("_0xab[7]"), "got: {}", c.source);
    }

    #[test]
    fn test_rotation_removed() {
        let src = "var _0xab=['a','b'];(function(arr, n){while(true){try{arr['push'](arr['shift']());break;}catch(e){}}})(_0xab, 0x1f4);f(_0xab[0]);";
        let mut c = ctx(src);
        extract_string_arrays(&mut c);
        remove_rotation(&mut c);
        assert!(!c.source.contains("shift"), "got: {}", c.source);
        assert!(c.source.contains("f(_0xab[0])"), "got: {}", c.source);
        let rec = c.records.last().unwrap();
        assert!(rec.success);
        assert_eq!(rec.count, 1);
    }

    #[test]
    fn test_plain_iife_kept() {
        let src = "var _0xab=['a'];(function(){setup();})();";
        let mut c = ctx(src);
        extract_string_arrays(&mut c);
        remove_rotation(&mut c);
        assert!(c.source.contains("setup"), "got: {}", c.source);
    }
}
