//! Obfuscation-family detection.
//!
//! Pattern rules over the raw source, one family per rule, backed by a
//! structural scan over the oxc syntax tree for the virtual-machine
//! pathway. Confidences are fixed per family; the VM family only triggers
//! on two or more co-occurring structural signals.

use std::collections::HashMap;

use oxc_allocator::Allocator;
use oxc_ast::ast as js;
use oxc_ast_visit::{walk, Visit};
use oxc_parser::{ParseOptions, Parser};
use oxc_span::SourceType;
use regex::Regex;
use serde::Serialize;

/// Structural fingerprint of an embedded interpreter.
#[derive(Debug, Clone, Serialize)]
pub struct VmFeatures {
    pub instruction_count: usize,
    /// Line of the suspected interpreter function.
    pub interpreter_location: Option<u32>,
    pub complexity: String,
    pub has_switch: bool,
    pub has_instruction_array: bool,
    pub has_program_counter: bool,
}

/// Detection verdict.
#[derive(Debug, Clone, Serialize)]
pub struct DetectionResult {
    pub types: Vec<String>,
    pub confidence: HashMap<String, f64>,
    pub features: Vec<String>,
    pub recommendations: Vec<String>,
    pub vm_features: Option<VmFeatures>,
}

impl DetectionResult {
    pub fn is_obfuscated(&self) -> bool {
        self.types.iter().any(|t| t != "unknown")
    }
}

struct FamilyRule {
    name: &'static str,
    confidence: f64,
    feature: &'static str,
    matcher: Box<dyn Fn(&str) -> bool + Send + Sync>,
}

fn re(pattern: &str) -> Regex {
    Regex::new(pattern).expect("static detector pattern")
}

fn family_rules() -> Vec<FamilyRule> {
    let hex_ident = re(r"_0x[a-fA-F0-9]{4,6}");
    let hex_ident2 = hex_ident.clone();
    let hex_ident3 = hex_ident.clone();
    let string_array = re(r#"(?:var|const|let)\s+_0x[a-fA-F0-9]+\s*=\s*\[\s*['"]"#);
    let string_array2 = string_array.clone();
    let rotation = re(r"\['push'\]\(\w+\['shift'\]\(\)\)|\.push\(\w+\.shift\(\)\)");
    let unicode_escape = re(r"(\\u[0-9a-fA-F]{4}){4,}");
    let hex_escape = re(r"(\\x[0-9a-fA-F]{2}){4,}");
    let eval_packer = re(r"eval\(function\(p,\s*a,\s*c,\s*k,\s*e,\s*[dr]\)");
    let base64_blob = re(r"[A-Za-z0-9+/]{120,}={0,2}");
    let atob = re(r"\batob\s*\(|\bbtoa\s*\(");
    let flattening = re(r"while\s*\(\s*(!!\[\]|true|0x1|1)\s*\)\s*\{\s*switch");
    let flattening_order = re(r#"['"]\d+(\|\d+){3,}['"]\s*(?:\[['"]split['"]\]|\.split)"#);
    let jsfuck = re(r"^[\[\]()!+\s]{64,}$");
    let aaencode = re("ﾟ[ωΘoθ]ﾟ");
    let jjencode = re(r"\$=~\[\];|\$\$\$\$");
    let self_defending = re(r"toString\(\)\s*\.\s*(?:search|replace)|RegExp\(\s*['\x22]\\\\w\+");
    let debug_protection = re(r"(?:setInterval|setTimeout)\s*\([^)]*debugger|debugger[\s\S]{0,40}debugger");
    let console_disable = re(r"console\s*(?:\[\s*['\x22](?:log|warn|error|info|debug)['\x22]\s*\]|\.(?:log|warn|error|info|debug))\s*=\s*function");
    let domain_lock = re(r"(?:location|document\.domain)[\s\S]{0,60}(?:indexOf|includes|hostname)[\s\S]{0,60}(?:throw|return|while\s*\(\s*true)");
    let dead_code = re(r"if\s*\(\s*(?:!!\[\]|!\[\]|false|true|0x[01]\b)\s*\)");

    vec![
        FamilyRule {
            name: "javascript-obfuscator",
            confidence: 0.9,
            feature: "hex-mangled identifiers alongside a quoted string array",
            matcher: Box::new(move |s| hex_ident.is_match(s) && string_array.is_match(s)),
        },
        FamilyRule {
            name: "string-array",
            confidence: 0.85,
            feature: "top-level array of string literals behind a mangled name",
            matcher: Box::new(move |s| string_array2.is_match(s)),
        },
        FamilyRule {
            name: "string-array-rotation",
            confidence: 0.85,
            feature: "push/shift rotation loop over a string array",
            matcher: Box::new(move |s| rotation.is_match(s)),
        },
        FamilyRule {
            name: "hex-identifiers",
            confidence: 0.7,
            feature: "identifiers of the _0x.... shape",
            matcher: Box::new(move |s| hex_ident2.find_iter(s).count() >= 5),
        },
        FamilyRule {
            name: "unicode-escape",
            confidence: 0.6,
            feature: "runs of \\uXXXX escapes in string literals",
            matcher: Box::new(move |s| unicode_escape.is_match(s)),
        },
        FamilyRule {
            name: "hex-escape",
            confidence: 0.6,
            feature: "runs of \\xHH escapes in string literals",
            matcher: Box::new(move |s| hex_escape.is_match(s)),
        },
        FamilyRule {
            name: "eval-packer",
            confidence: 0.95,
            feature: "Dean Edwards style eval(function(p,a,c,k,e,d)) packer",
            matcher: Box::new(move |s| eval_packer.is_match(s)),
        },
        FamilyRule {
            name: "base64-encoding",
            confidence: 0.5,
            feature: "long base64 blobs or atob/btoa decoding",
            matcher: Box::new(move |s| atob.is_match(s) && base64_blob.is_match(s)),
        },
        FamilyRule {
            name: "control-flow-flattening",
            confidence: 0.85,
            feature: "dispatcher loop over a switch with a piped order string",
            matcher: Box::new(move |s| flattening.is_match(s) || flattening_order.is_match(s)),
        },
        FamilyRule {
            name: "dead-code-injection",
            confidence: 0.6,
            feature: "constant-predicate branches guarding junk code",
            matcher: Box::new(move |s| dead_code.find_iter(s).count() >= 3),
        },
        FamilyRule {
            name: "jsfuck",
            confidence: 0.95,
            feature: "program written entirely in []()!+ characters",
            matcher: Box::new(move |s| jsfuck.is_match(s.trim())),
        },
        FamilyRule {
            name: "aaencode",
            confidence: 0.95,
            feature: "kaomoji identifier soup",
            matcher: Box::new(move |s| aaencode.is_match(s)),
        },
        FamilyRule {
            name: "jjencode",
            confidence: 0.9,
            feature: "$ identifier soup with ~[] seeds",
            matcher: Box::new(move |s| jjencode.is_match(s)),
        },
        FamilyRule {
            name: "name-mangling",
            confidence: 0.4,
            feature: "dense single-character identifier usage",
            matcher: Box::new(single_char_density),
        },
        FamilyRule {
            name: "self-defending",
            confidence: 0.8,
            feature: "function source inspected through toString()",
            matcher: Box::new(move |s| self_defending.is_match(s)),
        },
        FamilyRule {
            name: "debug-protection",
            confidence: 0.8,
            feature: "debugger statements armed on an interval",
            matcher: Box::new(move |s| debug_protection.is_match(s)),
        },
        FamilyRule {
            name: "console-disable",
            confidence: 0.7,
            feature: "console methods overwritten",
            matcher: Box::new(move |s| console_disable.is_match(s)),
        },
        FamilyRule {
            name: "domain-lock",
            confidence: 0.7,
            feature: "hostname check gating execution",
            matcher: Box::new(move |s| domain_lock.is_match(s)),
        },
        FamilyRule {
            name: "hex-identifiers-light",
            confidence: 0.3,
            feature: "a handful of hex-shaped identifiers",
            matcher: Box::new(move |s| {
                let n = hex_ident3.find_iter(s).count();
                (1..5).contains(&n)
            }),
        },
    ]
}

fn single_char_density(source: &str) -> bool {
    let single = Regex::new(r"\b[a-z]\b").unwrap().find_iter(source).count();
    let words = Regex::new(r"\b[A-Za-z_$][A-Za-z0-9_$]*\b")
        .unwrap()
        .find_iter(source)
        .count();
    words > 40 && single * 3 > words
}

/// Classify a script across the known obfuscation families.
pub fn detect(source: &str) -> DetectionResult {
    let mut types = Vec::new();
    let mut confidence = HashMap::new();
    let mut features = Vec::new();

    for rule in family_rules() {
        if (rule.matcher)(source) {
            types.push(rule.name.to_string());
            confidence.insert(rule.name.to_string(), rule.confidence);
            features.push(rule.feature.to_string());
        }
    }

    let vm_features = scan_vm(source);
    if let Some(vm) = &vm_features {
        // VM protection wants at least two co-occurring structural signals.
        let signals = [
            vm.has_switch,
            vm.has_instruction_array,
            vm.has_program_counter,
        ]
        .iter()
        .filter(|b| **b)
        .count();
        if signals >= 2 {
            types.push("vm-protection".to_string());
            confidence.insert("vm-protection".to_string(), 0.85);
            features.push(format!(
                "embedded interpreter: ~{} instructions, {} complexity",
                vm.instruction_count, vm.complexity
            ));
        }
    }

    let recommendations = recommend(&types);

    if types.is_empty() {
        return DetectionResult {
            types: vec!["unknown".to_string()],
            confidence: HashMap::from([("unknown".to_string(), 0.5)]),
            features,
            recommendations,
            vm_features: None,
        };
    }

    let vm_features = if types.iter().any(|t| t == "vm-protection") {
        vm_features
    } else {
        None
    };
    DetectionResult {
        types,
        confidence,
        features,
        recommendations,
        vm_features,
    }
}

fn recommend(types: &[String]) -> Vec<String> {
    let mut out = Vec::new();
    let has = |t: &str| types.iter().any(|x| x == t);
    if has("string-array") || has("javascript-obfuscator") {
        out.push("run deobfuscate: string-array extraction and decryption apply".to_string());
    }
    if has("control-flow-flattening") || has("vm-protection") {
        out.push("run deobfuscate with aggressive=true; a model adapter improves unflattening".to_string());
    }
    if has("eval-packer") {
        out.push("the packer payload is in the eval argument; collect it at runtime via console_execute".to_string());
    }
    if has("debug-protection") || has("self-defending") {
        out.push("anti-debug present; prefer static analysis over live debugging".to_string());
    }
    if has("domain-lock") {
        out.push("domain lock present; runtime behavior differs off the original host".to_string());
    }
    out
}

// ---------------------------------------------------------------------------
// VM structural scan
// ---------------------------------------------------------------------------

/// Minimum switch arms for an interpreter candidate.
const VM_SWITCH_ARMS: usize = 10;

/// Minimum elements for an instruction-array candidate.
const VM_ARRAY_LEN: usize = 50;

/// Read-only scan over the oxc tree for interpreter fingerprints.
#[derive(Default)]
struct VmScan {
    line_starts: Vec<u32>,
    best_switch_arms: usize,
    switch_in_loop: bool,
    switch_line: Option<u32>,
    loop_depth: usize,
    big_array: bool,
    program_counter: bool,
    parse_int_hex: bool,
}

impl VmScan {
    fn new(source: &str) -> Self {
        let mut line_starts = vec![0u32];
        for (i, b) in source.bytes().enumerate() {
            if b == b'\n' {
                line_starts.push(i as u32 + 1);
            }
        }
        Self {
            line_starts,
            ..Self::default()
        }
    }

    fn line(&self, offset: u32) -> u32 {
        self.line_starts.partition_point(|&s| s <= offset) as u32
    }
}

impl<'a> Visit<'a> for VmScan {
    fn visit_while_statement(&mut self, it: &js::WhileStatement<'a>) {
        self.loop_depth += 1;
        walk::walk_while_statement(self, it);
        self.loop_depth -= 1;
    }

    fn visit_do_while_statement(&mut self, it: &js::DoWhileStatement<'a>) {
        self.loop_depth += 1;
        walk::walk_do_while_statement(self, it);
        self.loop_depth -= 1;
    }

    fn visit_for_statement(&mut self, it: &js::ForStatement<'a>) {
        self.loop_depth += 1;
        walk::walk_for_statement(self, it);
        self.loop_depth -= 1;
    }

    fn visit_switch_statement(&mut self, it: &js::SwitchStatement<'a>) {
        if it.cases.len() >= VM_SWITCH_ARMS && it.cases.len() > self.best_switch_arms {
            self.best_switch_arms = it.cases.len();
            self.switch_line = Some(self.line(it.span.start));
            if self.loop_depth > 0 {
                self.switch_in_loop = true;
            }
        }
        walk::walk_switch_statement(self, it);
    }

    fn visit_array_expression(&mut self, it: &js::ArrayExpression<'a>) {
        if it.elements.len() >= VM_ARRAY_LEN
            && it.elements.iter().all(|el| {
                matches!(
                    el,
                    js::ArrayExpressionElement::NumericLiteral(_)
                        | js::ArrayExpressionElement::StringLiteral(_)
                        | js::ArrayExpressionElement::Elision(_)
                )
            })
        {
            self.big_array = true;
        }
        walk::walk_array_expression(self, it);
    }

    // pc++ on a short identifier
    fn visit_update_expression(&mut self, it: &js::UpdateExpression<'a>) {
        if let js::SimpleAssignmentTarget::AssignmentTargetIdentifier(id) = &it.argument {
            if id.name.len() <= 3 {
                self.program_counter = true;
            }
        }
        walk::walk_update_expression(self, it);
    }

    // pc += n
    fn visit_assignment_expression(&mut self, it: &js::AssignmentExpression<'a>) {
        if it.operator.as_str() == "+="
            && matches!(it.left, js::AssignmentTarget::AssignmentTargetIdentifier(_))
            && matches!(it.right, js::Expression::NumericLiteral(_))
        {
            self.program_counter = true;
        }
        walk::walk_assignment_expression(self, it);
    }

    // parseInt(x, 16) style byte decoding
    fn visit_call_expression(&mut self, it: &js::CallExpression<'a>) {
        if let js::Expression::Identifier(id) = &it.callee {
            if id.name == "parseInt" {
                if let Some(js::Argument::NumericLiteral(lit)) = it.arguments.get(1) {
                    if lit.value == 16.0 {
                        self.parse_int_hex = true;
                    }
                }
            }
        }
        walk::walk_call_expression(self, it);
    }
}

fn scan_vm(source: &str) -> Option<VmFeatures> {
    let allocator = Allocator::default();
    let ret = Parser::new(&allocator, source, SourceType::cjs())
        .with_options(ParseOptions {
            allow_return_outside_function: true,
            preserve_parens: false,
            ..ParseOptions::default()
        })
        .parse();
    if ret.panicked {
        return None;
    }
    let mut scan = VmScan::new(source);
    scan.visit_program(&ret.program);

    let has_switch = scan.best_switch_arms >= VM_SWITCH_ARMS && scan.switch_in_loop;
    if scan.best_switch_arms == 0 && !scan.big_array {
        return None;
    }
    let instruction_count = scan.best_switch_arms;
    let complexity = match instruction_count {
        0..=49 => "low",
        50..=199 => "medium",
        _ => "high",
    };
    Some(VmFeatures {
        instruction_count,
        interpreter_location: scan.switch_line,
        complexity: complexity.to_string(),
        has_switch,
        has_instruction_array: scan.big_array,
        has_program_counter: scan.program_counter && (has_switch || scan.parse_int_hex),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clean_code_is_unknown() {
        let result = detect("function add(left, right) { return left + right; }");
        assert_eq!(result.types, vec!["unknown"]);
        assert_eq!(result.confidence["unknown"], 0.5);
    }

    #[test]
    fn test_javascript_obfuscator_sample() {
        let src = "var _0xabcd=['hello','world'];console[_0xabcd[0]](_0xabcd[1]);";
        let result = detect(src);
        assert!(result.types.iter().any(|t| t == "javascript-obfuscator"));
        assert!(result.types.iter().any(|t| t == "string-array"));
        assert!(result.confidence["javascript-obfuscator"] >= 0.9);
        assert!(!result.recommendations.is_empty());
    }

    #[test]
    fn test_rotation() {
        let src = "(function(a,b){while(true){try{a['push'](a['shift']());}catch(e){}}})(arr,0x1f4);";
        let result = detect(src);
        assert!(result.types.iter().any(|t| t == "string-array-rotation"));
    }

    #[test]
    fn test_eval_packer() {
        let src = "eval(function(p,a,c,k,e,d){return p})('x',62,1,'y'.split('|'),0,{})";
        let result = detect(src);
        assert!(result.types.iter().any(|t| t == "eval-packer"));
    }

    #[test]
    fn test_control_flow_flattening() {
        let src = "var s='0|4|2|1|3'.split('|'),i=0;while(!![]){switch(s[i++]){case '0':a();continue;}break;}";
        let result = detect(src);
        assert!(result.types.iter().any(|t| t == "control-flow-flattening"));
    }

    #[test]
    fn test_vm_requires_two_signals() {
        // A large switch in a loop plus a program counter, no big array.
        let mut cases = String::new();
        for i in 0..12 {
            cases.push_str(&format!("case {i}: pc += 1; break;"));
        }
        let src = format!("function interp(code) {{ var pc = 0; while (pc < code.length) {{ switch (code[pc]) {{ {cases} }} }} }}");
        let result = detect(&src);
        assert!(result.types.iter().any(|t| t == "vm-protection"), "{result:?}");
        let vm = result.vm_features.unwrap();
        assert!(vm.has_switch);
        assert!(vm.has_program_counter);
        assert_eq!(vm.complexity, "low");
    }

    #[test]
    fn test_single_switch_alone_not_vm() {
        // A switch outside any loop with no counter or array: not VM.
        let mut cases = String::new();
        for i in 0..12 {
            cases.push_str(&format!("case {i}: handle{i}(); break;"));
        }
        let src = format!("function route(kind) {{ switch (kind) {{ {cases} }} }}");
        let result = detect(&src);
        assert!(!result.types.iter().any(|t| t == "vm-protection"));
    }

    #[test]
    fn test_debug_protection() {
        let src = "setInterval(function(){debugger;},100);";
        let result = detect(src);
        assert!(result.types.iter().any(|t| t == "debug-protection"));
    }

    #[test]
    fn test_console_disable() {
        let src = "console.log = function(){}; console['warn'] = function(){};";
        let result = detect(src);
        assert!(result.types.iter().any(|t| t == "console-disable"));
    }
}
