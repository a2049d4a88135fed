//! Mangled-identifier renaming.
//!
//! Identifiers matching the mangling pattern are renamed to `var_N`
//! placeholders. Maps are keyed per parse scope: a nested function's
//! `_0xcafe` and its parent's are distinct bindings and get distinct
//! placeholders. Property names, object keys, and labels are left alone.

use std::collections::HashMap;

use crate::ast::{self, Declarator, GenOptions, Node, Param};

use super::PassContext;

pub fn rename_mangled(ctx: &mut PassContext) {
    let kind = "rename-variables";
    let mut tree = match ast::parse(&ctx.source) {
        Ok(outcome) => outcome.program,
        Err(e) => {
            ctx.record(kind, format!("skipped: {e}"), false, 0);
            return;
        }
    };
    let mut renamer = Renamer {
        scopes: vec![HashMap::new()],
        counter: 0,
        renamed: 0,
        pattern: ctx.mangling.clone(),
    };
    renamer.collect_scope_decls(&tree);
    renamer.visit(&mut tree);
    let count = renamer.renamed;
    if count > 0 {
        ctx.source = ast::generate(&tree, &GenOptions::default());
    }
    ctx.record(
        kind,
        format!("{count} identifier occurrence(s) renamed"),
        count > 0,
        count,
    );
}

struct Renamer {
    /// Innermost scope last. Each maps original name → placeholder.
    scopes: Vec<HashMap<String, String>>,
    counter: usize,
    renamed: usize,
    pattern: regex::Regex,
}

impl Renamer {
    fn declare(&mut self, name: &str) {
        if !self.pattern.is_match(name) {
            return;
        }
        let scope = self.scopes.last_mut().expect("scope stack never empty");
        if !scope.contains_key(name) {
            self.counter += 1;
            scope.insert(name.to_string(), format!("var_{}", self.counter));
        }
    }

    fn lookup(&self, name: &str) -> Option<&str> {
        self.scopes
            .iter()
            .rev()
            .find_map(|s| s.get(name))
            .map(String::as_str)
    }

    /// Pre-scan the statements of the current scope for declarations, so
    /// uses before the declaration line still resolve (hoisting).
    fn collect_scope_decls(&mut self, scope_root: &Node) {
        let body: &[Node] = match scope_root {
            Node::Program { body } => body,
            Node::Block { body, .. } => body,
            _ => return,
        };
        for stmt in body {
            self.collect_stmt_decls(stmt);
        }
    }

    fn collect_stmt_decls(&mut self, stmt: &Node) {
        match stmt {
            Node::VarDecl { decls, .. } => {
                for Declarator { name, .. } in decls {
                    self.declare(name);
                }
            }
            Node::FunctionDecl { name, .. } => self.declare(name),
            Node::ClassDecl { name, .. } => self.declare(name),
            // Declarations inside non-function nesting share the scope
            // (var hoisting; let/const treated the same, which is safe for
            // renaming because names are unique per placeholder).
            Node::Block { body, .. } => {
                for s in body {
                    self.collect_stmt_decls(s);
                }
            }
            Node::If {
                consequent,
                alternate,
                ..
            } => {
                self.collect_stmt_decls(consequent);
                if let Some(a) = alternate {
                    self.collect_stmt_decls(a);
                }
            }
            Node::For { init, body, .. } => {
                if let Some(i) = init {
                    self.collect_stmt_decls(i);
                }
                self.collect_stmt_decls(body);
            }
            Node::ForIn { left, body, .. } => {
                self.collect_stmt_decls(left);
                self.collect_stmt_decls(body);
            }
            Node::While { body, .. } | Node::DoWhile { body, .. } | Node::Labeled { body, .. } => {
                self.collect_stmt_decls(body)
            }
            Node::Switch { cases, .. } => {
                for c in cases {
                    for s in &c.body {
                        self.collect_stmt_decls(s);
                    }
                }
            }
            Node::Try {
                block,
                handler,
                finalizer,
                ..
            } => {
                self.collect_stmt_decls(block);
                if let Some(h) = handler {
                    self.collect_stmt_decls(h);
                }
                if let Some(f) = finalizer {
                    self.collect_stmt_decls(f);
                }
            }
            _ => {}
        }
    }

    /// Rename `name` through the scope stack; returns the replacement.
    fn resolve(&mut self, name: &str) -> Option<String> {
        let new = self.lookup(name)?.to_string();
        if new == name {
            None
        } else {
            Some(new)
        }
    }

    fn enter_function(&mut self, params: &mut [Param], body: &mut Node) {
        self.scopes.push(HashMap::new());
        for p in params.iter_mut() {
            self.declare(&p.name);
            if let Some(new) = self.resolve(&p.name) {
                p.name = new;
                self.renamed += 1;
            }
            if let Some(d) = &mut p.default {
                self.visit(d);
            }
        }
        self.collect_scope_decls(body);
        self.visit(body);
        self.scopes.pop();
    }

    fn visit(&mut self, node: &mut Node) {
        match node {
            Node::Ident { name, .. } => {
                if let Some(new) = self.resolve(name) {
                    *name = new;
                    self.renamed += 1;
                }
            }
            Node::VarDecl { decls, .. } => {
                for d in decls.iter_mut() {
                    if let Some(new) = self.resolve(&d.name) {
                        d.name = new;
                        self.renamed += 1;
                    }
                    if let Some(init) = &mut d.init {
                        self.visit(init);
                    }
                }
            }
            Node::FunctionDecl {
                name, params, body, ..
            } => {
                if let Some(new) = self.resolve(name) {
                    *name = new;
                    self.renamed += 1;
                }
                self.enter_function(params, body);
            }
            Node::FunctionExpr { params, body, .. } | Node::Arrow { params, body, .. } => {
                // Split borrows: params and body are distinct fields.
                let body: &mut Node = body;
                self.enter_function(params, body);
            }
            Node::Try {
                block,
                param,
                handler,
                finalizer,
                ..
            } => {
                self.visit(block);
                if let Some(h) = handler {
                    if let Some(pname) = param.clone() {
                        self.declare(&pname);
                        if let Some(new) = self.resolve(&pname) {
                            *param = Some(new);
                            self.renamed += 1;
                        }
                    }
                    self.visit(h);
                }
                if let Some(f) = finalizer {
                    self.visit(f);
                }
            }
            other => {
                // Everything else recurses generically; non-computed member
                // properties and object keys are skipped by the walker.
                ast::for_each_child_mut(other, &mut |child| self.visit(child));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap as Map;

    fn ctx(src: &str) -> PassContext {
        PassContext {
            source: src.to_string(),
            records: Vec::new(),
            warnings: Vec::new(),
            string_arrays: Map::new(),
            mangling: regex::Regex::new(r"^_0x[a-fA-F0-9]+$").unwrap(),
        }
    }

    #[test]
    fn test_rename_basic() {
        let mut c = ctx("var _0xdead = 1; use(_0xdead);");
        rename_mangled(&mut c);
        assert!(!c.source.contains("_0xdead"), "got: {}", c.source);
        assert!(c.source.contains("var_1"), "got: {}", c.source);
    }

    #[test]
    fn test_rename_scoped() {
        let mut c = ctx("var _0xaa = 1; function f(_0xaa) { return _0xaa; } g(_0xaa);");
        rename_mangled(&mut c);
        // Outer and parameter bindings get distinct placeholders.
        assert!(c.source.contains("var_1"), "got: {}", c.source);
        assert!(c.source.contains("var_2"), "got: {}", c.source);
        // The return references the parameter, not the outer binding.
        let inner = c
            .source
            .split("return ")
            .nth(1)
            .unwrap()
            .split(';')
            .next()
            .unwrap()
            .trim()
            .to_string();
        let param = c
            .source
            .split("function")
            .nth(1)
            .unwrap()
            .split('(')
            .nth(1)
            .unwrap()
            .split(')')
            .next()
            .unwrap()
            .trim()
            .to_string();
        assert_eq!(inner, param);
    }

    #[test]
    fn test_properties_untouched() {
        let mut c = ctx("var _0xaa = 1; obj._0xbb = _0xaa; obj['_0xcc'] = 2;");
        rename_mangled(&mut c);
        assert!(c.source.contains("obj._0xbb"), "got: {}", c.source);
        assert!(c.source.contains("'_0xcc'"), "got: {}", c.source);
        assert!(!c.source.contains("var _0xaa"), "got: {}", c.source);
    }

    #[test]
    fn test_plain_names_untouched() {
        let mut c = ctx("var keep = 1; use(keep);");
        rename_mangled(&mut c);
        assert_eq!(c.source, "var keep = 1; use(keep);");
        let rec = c.records.last().unwrap();
        assert_eq!(rec.count, 0);
    }
}
