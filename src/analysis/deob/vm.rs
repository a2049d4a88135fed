//! Control-flow unflattening and VM component identification.
//!
//! The dispatcher-loop shape (`while (true) { switch (state) { ... } }`)
//! cannot be reconstructed reliably by rules alone; without a model adapter
//! the pass records the finding and leaves the code unchanged. VM component
//! identification marks the interpreter function, instruction array, and
//! dispatch loop so the agent can target them with the debugger tools.

use crate::ast::{self, Node, Visitor};

use super::super::obfuscation::DetectionResult;
use super::PassContext;

/// Dispatcher shapes found in a scan.
#[derive(Debug)]
pub struct FlattenedLoop {
    pub line: u32,
    pub case_count: usize,
}

pub fn find_flattened_loops(tree: &Node) -> Vec<FlattenedLoop> {
    struct Scan {
        found: Vec<FlattenedLoop>,
    }
    impl Visitor for Scan {
        fn enter(&mut self, node: &Node) {
            let (test, body, span) = match node {
                Node::While {
                    test, body, span, ..
                } => (test, body, span),
                _ => return,
            };
            let test_always_true = match test.as_ref() {
                Node::Bool { value: true, .. } => true,
                Node::Num { value, .. } => *value != 0.0,
                Node::Unary { op: "!", arg, .. } => {
                    matches!(arg.as_ref(), Node::Unary { op: "!", .. })
                }
                _ => false,
            };
            if !test_always_true {
                return;
            }
            let switch_cases = match body.as_ref() {
                Node::Switch { cases, .. } => Some(cases.len()),
                Node::Block { body, .. } => body.iter().find_map(|s| match s {
                    Node::Switch { cases, .. } => Some(cases.len()),
                    _ => None,
                }),
                _ => None,
            };
            if let Some(case_count) = switch_cases {
                self.found.push(FlattenedLoop {
                    line: span.line,
                    case_count,
                });
            }
        }
    }
    let mut scan = Scan { found: Vec::new() };
    ast::walk(tree, &mut scan);
    scan.found
}

/// Without a model the flattened flow stays as-is; the record says so.
pub fn unflatten(ctx: &mut PassContext, model_rewrite: Option<String>) {
    let kind = "unflatten-control-flow";
    let tree = match ast::parse(&ctx.source) {
        Ok(outcome) => outcome.program,
        Err(e) => {
            ctx.record(kind, format!("skipped: {e}"), false, 0);
            return;
        }
    };
    let loops = find_flattened_loops(&tree);
    if loops.is_empty() {
        ctx.record(kind, "no dispatcher loops found", true, 0);
        return;
    }

    match model_rewrite {
        Some(code) => match ast::parse(&code) {
            Ok(outcome) if outcome.is_clean() => {
                ctx.source = code;
                ctx.record(
                    kind,
                    format!("{} dispatcher loop(s) reconstructed by model", loops.len()),
                    true,
                    loops.len(),
                );
            }
            _ => {
                ctx.warn("model unflattening output did not parse; discarded");
                ctx.record(kind, "model rewrite rejected", false, 0);
            }
        },
        None => {
            let lines: Vec<String> = loops
                .iter()
                .map(|l| format!("line {} ({} cases)", l.line, l.case_count))
                .collect();
            ctx.warn(format!(
                "control-flow flattening at {} not resolved (no model adapter)",
                lines.join(", ")
            ));
            ctx.record(kind, "dispatcher loops left unresolved", false, 0);
        }
    }
}

/// Mark interpreter function, instruction array, and dispatch loop. With
/// `stub` set (no model available), each identified interpreter body is
/// replaced in the source by a same-length comment-padded placeholder; the
/// surrounding code keeps its exact byte offsets.
pub fn identify_components(ctx: &mut PassContext, detection: &DetectionResult, stub: bool) {
    let kind = "identify-vm-components";
    if !detection.types.iter().any(|t| t == "vm-protection") {
        ctx.record(kind, "no VM protection detected", true, 0);
        return;
    }
    let tree = match ast::parse(&ctx.source) {
        Ok(outcome) => outcome.program,
        Err(e) => {
            ctx.record(kind, format!("skipped: {e}"), false, 0);
            return;
        }
    };

    struct Components {
        /// (line, body byte start, body byte end) per interpreter candidate.
        interpreters: Vec<(u32, u32, u32)>,
        array_line: Option<u32>,
        loop_line: Option<u32>,
        in_function: usize,
    }
    impl Visitor for Components {
        fn enter(&mut self, node: &Node) {
            match node {
                Node::FunctionDecl { body, span, .. } | Node::FunctionExpr { body, span, .. } => {
                    self.in_function += 1;
                    // Interpreter candidate: function directly holding a
                    // large switch.
                    let mut arms = 0usize;
                    ast::for_each_child(body, &mut |child| {
                        if let Node::Switch { cases, .. } = child {
                            arms = arms.max(cases.len());
                        }
                        if let Node::While { body: wb, .. } = child {
                            if let Node::Block { body: inner, .. } = wb.as_ref() {
                                for s in inner {
                                    if let Node::Switch { cases, .. } = s {
                                        arms = arms.max(cases.len());
                                    }
                                }
                            }
                        }
                    });
                    if arms >= 10 {
                        let body_span = body.span();
                        self.interpreters
                            .push((span.line, body_span.start, body_span.end));
                    }
                }
                Node::Array { elements, span, .. } => {
                    if elements.len() >= 50 && self.array_line.is_none() {
                        self.array_line = Some(span.line);
                    }
                }
                Node::While { span, .. } | Node::DoWhile { span, .. } => {
                    if self.loop_line.is_none() && self.in_function > 0 {
                        self.loop_line = Some(span.line);
                    }
                }
                _ => {}
            }
        }
        fn exit(&mut self, node: &Node) {
            if matches!(node, Node::FunctionDecl { .. } | Node::FunctionExpr { .. }) {
                self.in_function -= 1;
            }
        }
    }
    let mut c = Components {
        interpreters: Vec::new(),
        array_line: None,
        loop_line: None,
        in_function: 0,
    };
    ast::walk(&tree, &mut c);

    let mut notes = Vec::new();
    for (line, _, _) in &c.interpreters {
        notes.push(format!("interpreter function at line {line}"));
    }
    if let Some(l) = c.array_line {
        notes.push(format!("instruction array at line {l}"));
    }
    if let Some(l) = c.loop_line {
        notes.push(format!("dispatch loop at line {l}"));
    }
    for note in &notes {
        ctx.warn(format!("vm component: {note}"));
    }

    // Stub substitution: each interpreter body becomes a comment block of
    // the same byte length, so everything around it keeps its offsets.
    let mut substitutions = 0usize;
    if stub {
        let mut stubbed: Vec<(u32, u32)> = Vec::new();
        for (line, start, end) in &c.interpreters {
            // A body nested inside an already-stubbed one is gone.
            if stubbed.iter().any(|(s, e)| start >= s && end <= e) {
                continue;
            }
            if let Some(replacement) = body_stub(&ctx.source, *start, *end) {
                ctx.source
                    .replace_range(*start as usize..*end as usize, &replacement);
                stubbed.push((*start, *end));
                substitutions += 1;
                ctx.warn(format!(
                    "vm interpreter body at line {line} replaced by a same-length stub"
                ));
            }
        }
    }

    ctx.record(
        kind,
        if notes.is_empty() {
            "vm protection flagged but components not located".to_string()
        } else if substitutions > 0 {
            format!("{}; {substitutions} interpreter body(ies) stubbed", notes.join("; "))
        } else {
            notes.join("; ")
        },
        substitutions > 0 || !notes.is_empty(),
        substitutions,
    );
}

/// A `{/* ... */}` block of exactly `end - start` bytes, or None when the
/// range is too small or not splice-safe.
fn body_stub(source: &str, start: u32, end: u32) -> Option<String> {
    let (start, end) = (start as usize, end as usize);
    if end <= start || end > source.len() {
        return None;
    }
    let len = end - start;
    if len < 8 || !source.is_char_boundary(start) || !source.is_char_boundary(end) {
        return None;
    }
    Some(format!("{{/*{}*/}}", ".".repeat(len - 6)))
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
    fn test_find_flattened() {
        let tree = ast::parse("while (true) { switch (s) { case 0: a(); continue; case 1: b(); continue; } break; }")
            .unwrap()
            .program;
        let loops = find_flattened_loops(&tree);
        assert_eq!(loops.len(), 1);
        assert_eq!(loops[0].case_count, 2);
    }

    #[test]
    fn test_unflatten_without_model_records_unresolved() {
        let mut c = ctx("while (true) { switch (s) { case 0: a(); continue; } break; }");
        unflatten(&mut c, None);
        let rec = c.records.last().unwrap();
        assert!(!rec.success);
        assert!(!c.warnings.is_empty());
        // Source untouched.
        assert!(c.source.contains("switch"));
    }

    #[test]
    fn test_unflatten_accepts_parsing_model_output() {
        let mut c = ctx("while (true) { switch (s) { case 0: a(); continue; } break; }");
        unflatten(&mut c, Some("a();".to_string()));
        assert_eq!(c.source, "a();");
        assert!(c.records.last().unwrap().success);
    }

    #[test]
    fn test_unflatten_rejects_broken_model_output() {
        let original = "while (true) { switch (s) { case 0: a(); continue; } break; }";
        let mut c = ctx(original);
        unflatten(&mut c, Some("((((".to_string()));
        assert_eq!(c.source, original);
        assert!(!c.records.last().unwrap().success);
    }

    #[test]
    fn test_no_dispatcher_is_clean_zero() {
        let mut c = ctx("var a = 1;");
        unflatten(&mut c, None);
        let rec = c.records.last().unwrap();
        assert!(rec.success);
        assert_eq!(rec.count, 0);
    }

    fn vm_detection() -> DetectionResult {
        DetectionResult {
            types: vec!["vm-protection".to_string()],
            confidence: HashMap::from([("vm-protection".to_string(), 0.85)]),
            features: Vec::new(),
            recommendations: Vec::new(),
            vm_features: None,
        }
    }

    fn interpreter_source() -> String {
        let mut cases = String::new();
        for i in 0..12 {
            cases.push_str(&format!("case {i}: pc += 1; break;"));
        }
        format!(
            "function interp(code) {{ var pc = 0; while (pc < code.length) {{ switch (code[pc]) {{ {cases} }} }} }}\ninterp([]);"
        )
    }

    #[test]
    fn test_identify_stubs_interpreter_body_same_length() {
        let src = interpreter_source();
        let mut c = ctx(&src);
        identify_components(&mut c, &vm_detection(), true);

        assert_eq!(c.source.len(), src.len(), "stub must preserve source length");
        assert!(c.source.contains("/*"), "got: {}", c.source);
        assert!(!c.source.contains("case 5"), "interpreter body survived: {}", c.source);
        // The surrounding code is untouched and everything still parses.
        assert!(c.source.contains("interp([])"));
        assert!(ast::parse(&c.source).expect("stubbed source parses").is_clean());

        let rec = c.records.last().unwrap();
        assert!(rec.success);
        assert!(rec.count >= 1);
        assert!(c.warnings.iter().any(|w| w.contains("stub")));
    }

    #[test]
    fn test_identify_without_stub_marks_only() {
        let src = interpreter_source();
        let mut c = ctx(&src);
        identify_components(&mut c, &vm_detection(), false);

        assert_eq!(c.source, src, "marking pass must not touch the source");
        let rec = c.records.last().unwrap();
        assert!(rec.success);
        assert_eq!(rec.count, 0);
        assert!(c.warnings.iter().any(|w| w.contains("interpreter function")));
    }

    #[test]
    fn test_identify_skips_without_vm_verdict() {
        let src = interpreter_source();
        let mut c = ctx(&src);
        let detection = DetectionResult {
            types: vec!["unknown".to_string()],
            confidence: HashMap::new(),
            features: Vec::new(),
            recommendations: Vec::new(),
            vm_features: None,
        };
        identify_components(&mut c, &detection, true);
        assert_eq!(c.source, src);
        assert_eq!(c.records.last().unwrap().count, 0);
    }

    #[test]
    fn test_body_stub_shape() {
        let source = "function f() { a(); b(); c(); }";
        let open = source.find("{ a").unwrap() as u32;
        let stub = body_stub(source, open, source.len() as u32).unwrap();
        assert_eq!(stub.len(), source.len() - open as usize);
        assert!(stub.starts_with("{/*"));
        assert!(stub.ends_with("*/}"));
        // Too small a range refuses.
        assert!(body_stub(source, 0, 4).is_none());
    }
}
