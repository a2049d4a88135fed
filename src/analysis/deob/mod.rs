//! Multi-pass deobfuscation pipeline.
//!
//! Fixed pass order: detect, extract string arrays, basic AST transform,
//! decode strings, decrypt arrays, optional unflattening, simplify, optional
//! renaming, optional model cleanup. Each pass consumes and returns source,
//! appends a transformation record, and skips silently when its parse fails,
//! so one hostile construct cannot sink the whole run.

mod passes;
mod rename;
mod strings;
mod vm;

use std::collections::HashMap;

use serde::Serialize;
use tracing::{debug, info};

use super::obfuscation::{self, DetectionResult};
use crate::llm::{ChatMessage, ChatOptions, ModelAdapter, Role};

/// Per-pass outcome, append-only within one call.
#[derive(Debug, Clone, Serialize)]
pub struct TransformRecord {
    pub kind: String,
    pub description: String,
    pub success: bool,
    pub count: usize,
}

/// Pipeline options.
#[derive(Debug, Clone)]
pub struct DeobOptions {
    /// Enables control-flow unflattening and VM component work.
    pub aggressive: bool,
    /// Rename mangled identifiers to stable placeholders.
    pub rename: bool,
    /// Allow model-assisted passes when an adapter is configured.
    pub use_model: bool,
    /// Identifier shape considered mangled.
    pub mangling_pattern: String,
}

impl Default for DeobOptions {
    fn default() -> Self {
        Self {
            aggressive: false,
            rename: false,
            use_model: true,
            mangling_pattern: r"^_0x[a-fA-F0-9]+$".to_string(),
        }
    }
}

/// Pipeline result.
#[derive(Debug, Serialize)]
pub struct DeobResult {
    pub code: String,
    pub transformations: Vec<TransformRecord>,
    pub confidence: f64,
    pub detection: DetectionResult,
    pub warnings: Vec<String>,
}

/// Scratch shared across passes of one call.
pub(crate) struct PassContext {
    pub source: String,
    pub records: Vec<TransformRecord>,
    pub warnings: Vec<String>,
    /// Extracted string arrays: identifier → elements.
    pub string_arrays: HashMap<String, Vec<String>>,
    pub mangling: regex::Regex,
}

impl PassContext {
    pub fn record(&mut self, kind: &str, description: impl Into<String>, success: bool, count: usize) {
        self.records.push(TransformRecord {
            kind: kind.to_string(),
            description: description.into(),
            success,
            count,
        });
    }

    pub fn warn(&mut self, message: impl Into<String>) {
        self.warnings.push(message.into());
    }
}

/// The deobfuscator. Stateless between calls apart from the optional model
/// adapter handle.
#[derive(Default)]
pub struct Deobfuscator {
    model: Option<ModelAdapter>,
}

impl Deobfuscator {
    pub fn new() -> Self {
        Self { model: None }
    }

    pub fn with_model(model: ModelAdapter) -> Self {
        Self { model: Some(model) }
    }

    /// Run the full pipeline.
    pub async fn run(&self, source: &str, opts: &DeobOptions) -> DeobResult {
        // With a model on hand the unflattening pass runs once, model-first,
        // instead of recording a rule-only failure it would then shadow.
        let defer_unflatten = opts.aggressive && opts.use_model && self.model.is_some();
        let mut result = self.run_static(source, opts, defer_unflatten);

        if opts.use_model {
            if let Some(model) = &self.model {
                if defer_unflatten {
                    self.model_unflatten(model, &mut result, opts).await;
                }
                self.model_cleanup(model, &mut result).await;
            }
        }

        result.confidence = confidence(&result);
        result
    }

    /// The deferred unflattening pass: one model shot, then `vm::unflatten`
    /// validates the rewrite and appends the pass's single record.
    async fn model_unflatten(&self, model: &ModelAdapter, result: &mut DeobResult, opts: &DeobOptions) {
        let mut ctx = PassContext {
            source: result.code.clone(),
            records: Vec::new(),
            warnings: Vec::new(),
            string_arrays: HashMap::new(),
            mangling: mangling_regex(opts),
        };

        let loops = match crate::ast::parse(&ctx.source) {
            Ok(outcome) => vm::find_flattened_loops(&outcome.program),
            Err(_) => Vec::new(),
        };
        let rewrite = if loops.is_empty() {
            None
        } else {
            let messages = vec![
                ChatMessage {
                    role: Role::System,
                    content: "You reconstruct natural control flow from JavaScript that was flattened into while(true)/switch dispatcher loops. Return only equivalent code with the dispatcher removed, no fences, no commentary.".into(),
                },
                ChatMessage {
                    role: Role::User,
                    content: ctx.source.clone(),
                },
            ];
            match model.chat(&messages, &ChatOptions::default()).await {
                Ok(resp) => Some(strip_fences(&resp.content).to_string()),
                Err(e) => {
                    ctx.warn(format!("model unflattening unavailable: {e}"));
                    None
                }
            }
        };

        vm::unflatten(&mut ctx, rewrite);
        result.code = ctx.source;
        result.transformations.append(&mut ctx.records);
        result.warnings.append(&mut ctx.warnings);
    }

    /// Static-only pipeline (no model calls). What `run` does when no
    /// adapter is configured.
    pub fn run_sync(&self, source: &str, opts: &DeobOptions) -> DeobResult {
        let mut result = self.run_static(source, opts, false);
        result.confidence = confidence(&result);
        result
    }

    /// `defer_unflatten` skips the rule-only unflattening record (and the
    /// stub substitution) because a model-backed pass will follow.
    fn run_static(&self, source: &str, opts: &DeobOptions, defer_unflatten: bool) -> DeobResult {
        let detection = obfuscation::detect(source);
        debug!(types = ?detection.types, "deobfuscation starting");

        let mut ctx = PassContext {
            source: source.to_string(),
            records: Vec::new(),
            warnings: Vec::new(),
            string_arrays: HashMap::new(),
            mangling: mangling_regex(opts),
        };

        if source.trim().is_empty() {
            return DeobResult {
                code: String::new(),
                transformations: ctx.records,
                confidence: 0.0,
                detection,
                warnings: ctx.warnings,
            };
        }

        strings::extract_string_arrays(&mut ctx);
        passes::basic_transform(&mut ctx);
        passes::decode_strings(&mut ctx);
        strings::decrypt_arrays(&mut ctx);
        strings::remove_rotation(&mut ctx);

        if opts.aggressive {
            if !defer_unflatten {
                vm::unflatten(&mut ctx, None);
            }
            vm::identify_components(&mut ctx, &detection, !defer_unflatten);
        }

        passes::simplify(&mut ctx);

        if opts.rename {
            rename::rename_mangled(&mut ctx);
        }

        info!(
            passes = ctx.records.len(),
            changed = ctx.records.iter().any(|r| r.success && r.count > 0),
            "deobfuscation finished"
        );

        DeobResult {
            code: ctx.source,
            transformations: ctx.records,
            confidence: 0.0,
            detection,
            warnings: ctx.warnings,
        }
    }

    async fn model_cleanup(&self, model: &ModelAdapter, result: &mut DeobResult) {
        // Unflattening left unresolved? Give the model one shot at the
        // whole cleaned source; keep its output only if it still parses.
        const MODEL_INPUT_CAP: usize = 24_000;
        let trimmed: String = result.code.chars().take(MODEL_INPUT_CAP).collect();
        let messages = vec![
            ChatMessage {
                role: Role::System,
                content: "You clean up deobfuscated JavaScript. Return only code, no fences, no commentary. Preserve behavior exactly; improve names and layout only.".into(),
            },
            ChatMessage {
                role: Role::User,
                content: trimmed,
            },
        ];
        match model.chat(&messages, &ChatOptions::default()).await {
            Ok(resp) => {
                let candidate = strip_fences(&resp.content);
                match crate::ast::parse(candidate) {
                    Ok(outcome) if outcome.is_clean() => {
                        let changed = candidate != result.code;
                        result.code = candidate.to_string();
                        result.transformations.push(TransformRecord {
                            kind: "model-cleanup".into(),
                            description: "model-assisted readability rewrite".into(),
                            success: true,
                            count: usize::from(changed),
                        });
                    }
                    _ => {
                        result.transformations.push(TransformRecord {
                            kind: "model-cleanup".into(),
                            description: "model output did not parse; discarded".into(),
                            success: false,
                            count: 0,
                        });
                    }
                }
            }
            Err(e) => {
                result.warnings.push(format!("model cleanup unavailable: {e}"));
                result.transformations.push(TransformRecord {
                    kind: "model-cleanup".into(),
                    description: "model call failed".into(),
                    success: false,
                    count: 0,
                });
            }
        }
    }
}

fn mangling_regex(opts: &DeobOptions) -> regex::Regex {
    regex::Regex::new(&opts.mangling_pattern)
        .unwrap_or_else(|_| regex::Regex::new(r"^_0x[a-fA-F0-9]+$").unwrap())
}

fn strip_fences(content: &str) -> &str {
    let trimmed = content.trim();
    let without_open = trimmed
        .strip_prefix("```javascript")
        .or_else(|| trimmed.strip_prefix("```js"))
        .or_else(|| trimmed.strip_prefix("```"))
        .unwrap_or(trimmed);
    without_open.strip_suffix("```").unwrap_or(without_open).trim()
}

/// Success weights minus warning weights, family bonus, clamped. A VM-only
/// verdict caps the ceiling: without the interpreter unwound, readability
/// claims stay modest.
fn confidence(result: &DeobResult) -> f64 {
    let weight = |kind: &str| -> f64 {
        match kind {
            "extract-string-arrays" => 0.10,
            "basic-ast-transform" => 0.10,
            "decode-strings" => 0.10,
            "decrypt-arrays" => 0.15,
            "remove-rotation" => 0.05,
            "unflatten-control-flow" => 0.15,
            "simplify" => 0.05,
            "rename-variables" => 0.05,
            "model-cleanup" => 0.10,
            "identify-vm-components" => 0.05,
            _ => 0.0,
        }
    };
    let mut score = 0.3;
    for record in &result.transformations {
        if record.success && record.count > 0 {
            score += weight(&record.kind);
        }
    }
    score -= 0.05 * result.warnings.len() as f64;

    let known_families = result
        .detection
        .types
        .iter()
        .filter(|t| t.as_str() != "unknown")
        .count();
    if known_families > 0 {
        score += 0.1;
    }

    let vm_only = result.detection.types == vec!["vm-protection".to_string()];
    let ceiling = if vm_only { 0.6 } else { 0.95 };
    score.clamp(0.1, ceiling)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast;

    fn run(src: &str, opts: &DeobOptions) -> DeobResult {
        Deobfuscator::new().run_sync(src, opts)
    }

    #[test]
    fn test_string_array_sample() {
        let result = run(
            "var _0xabcd=['hello','world'];console[_0xabcd[0]](_0xabcd[1]);",
            &DeobOptions::default(),
        );
        // The canonical javascript-obfuscator shape resolves to a direct call.
        assert!(
            result.code.contains("console.hello('world')"),
            "got: {}",
            result.code
        );
        let extract = result
            .transformations
            .iter()
            .find(|t| t.kind == "extract-string-arrays")
            .unwrap();
        assert!(extract.success);
        assert_eq!(extract.count, 1);
        let decrypt = result
            .transformations
            .iter()
            .find(|t| t.kind == "decrypt-arrays")
            .unwrap();
        assert!(decrypt.success);
        assert!(decrypt.count >= 1);
        assert!(result.confidence >= 0.5, "confidence {}", result.confidence);
    }

    #[test]
    fn test_dead_code_elimination() {
        let result = run(
            "if(false){x=1;}else{x=2;}return 3;var y=4;",
            &DeobOptions::default(),
        );
        assert!(result.code.contains("x = 2"), "got: {}", result.code);
        assert!(!result.code.contains("x = 1"));
        assert!(!result.code.contains("y = 4"));
        let basic = result
            .transformations
            .iter()
            .find(|t| t.kind == "basic-ast-transform")
            .unwrap();
        assert!(basic.success && basic.count > 0);
    }

    #[test]
    fn test_empty_source() {
        let result = run("", &DeobOptions::default());
        assert_eq!(result.code, "");
        assert!(result.confidence >= 0.1);
        assert!(result
            .transformations
            .iter()
            .all(|t| t.success || t.count == 0));
    }

    #[test]
    fn test_unchanged_passes_report_zero_count() {
        let result = run("function add(a, b) { return a + b; }", &DeobOptions::default());
        for t in &result.transformations {
            assert!(
                t.count == 0 || t.success,
                "record {t:?} violates the unchanged-source contract"
            );
        }
    }

    #[test]
    fn test_idempotence() {
        let opts = DeobOptions::default();
        let first = run(
            "var _0xabcd=['hello','world'];console[_0xabcd[0]](_0xabcd[1]);",
            &opts,
        );
        let second = run(&first.code, &opts);
        let effective = second
            .transformations
            .iter()
            .filter(|t| t.success && t.count > 0)
            .count();
        assert!(effective <= 1, "second run still transforming: {:?}", second.transformations);
    }

    #[test]
    fn test_output_parses() {
        let samples = [
            "var _0xabcd=['a','b','c'];f(_0xabcd[0]+_0xabcd[2]);",
            "if(true){go();}else{stop();}",
            "var s = String.fromCharCode(104,105);",
        ];
        for src in samples {
            let result = run(src, &DeobOptions::default());
            let outcome = ast::parse(&result.code).expect("output must parse");
            assert!(outcome.is_clean(), "{src} -> {}", result.code);
        }
    }

    #[test]
    fn test_fromcharcode() {
        let result = run("var s = String.fromCharCode(104,105);", &DeobOptions::default());
        assert!(result.code.contains("'hi'"), "got: {}", result.code);
    }

    #[test]
    fn test_rename() {
        let mut opts = DeobOptions::default();
        opts.rename = true;
        let result = run(
            "var _0xdead = 1; function _0xbeef(_0xcafe) { return _0xcafe + _0xdead; } _0xbeef(2);",
            &opts,
        );
        assert!(!result.code.contains("_0xdead"), "got: {}", result.code);
        assert!(result.code.contains("var_"), "got: {}", result.code);
        // Still parses and references line up.
        assert!(ast::parse(&result.code).unwrap().is_clean());
    }

    #[test]
    fn test_confidence_bounds() {
        for src in ["", "var a = 1;", "var _0x1=['x'];f(_0x1[0]);"] {
            let c = run(src, &DeobOptions::default()).confidence;
            assert!((0.1..=0.95).contains(&c), "{src} -> {c}");
        }
    }

    #[test]
    fn test_aggressive_records_unflatten_once() {
        let mut opts = DeobOptions::default();
        opts.aggressive = true;
        let result = run(
            "while (true) { switch (s) { case 0: a(); continue; } break; }",
            &opts,
        );
        let unflatten_records = result
            .transformations
            .iter()
            .filter(|t| t.kind == "unflatten-control-flow")
            .count();
        assert_eq!(unflatten_records, 1, "{:?}", result.transformations);
    }

    #[tokio::test]
    async fn test_run_without_model_records_unflatten_once() {
        let mut opts = DeobOptions::default();
        opts.aggressive = true;
        // No adapter configured: run() takes the same path as run_sync and
        // must record the pass exactly once.
        let result = Deobfuscator::new()
            .run(
                "while (true) { switch (s) { case 0: a(); continue; } break; }",
                &opts,
            )
            .await;
        let unflatten_records = result
            .transformations
            .iter()
            .filter(|t| t.kind == "unflatten-control-flow")
            .count();
        assert_eq!(unflatten_records, 1, "{:?}", result.transformations);
    }
}
