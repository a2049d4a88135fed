//! End-to-end tests over the static analysis stack. No browser needed.

use jsrev_tools::analysis::deob::{DeobOptions, Deobfuscator};
use jsrev_tools::analysis::obfuscation;
use jsrev_tools::analysis::taint::{self, TaintConfig};
use jsrev_tools::ast;
use jsrev_tools::detail::DetailStore;
use serde_json::json;

// ---------------------------------------------------------------------------
// deobfuscation seed scenarios
// ---------------------------------------------------------------------------

#[test]
fn deobfuscate_javascript_obfuscator_output() {
    let input = "var _0xabcd=['hello','world'];console[_0xabcd[0]](_0xabcd[1]);";
    let result = Deobfuscator::new().run_sync(input, &DeobOptions::default());

    // The output parses and resolves to a direct member call.
    let outcome = ast::parse(&result.code).expect("deobfuscated output parses");
    assert!(outcome.is_clean());
    assert!(
        result.code.contains("console.hello('world')"),
        "got: {}",
        result.code
    );

    let extract = result
        .transformations
        .iter()
        .find(|t| t.kind == "extract-string-arrays")
        .expect("extract pass recorded");
    assert!(extract.success);
    assert_eq!(extract.count, 1);

    let decrypt = result
        .transformations
        .iter()
        .find(|t| t.kind == "decrypt-arrays")
        .expect("decrypt pass recorded");
    assert!(decrypt.success);
    assert!(decrypt.count >= 1);

    assert!(result.confidence >= 0.5, "confidence {}", result.confidence);
}

#[test]
fn dead_code_elimination_scenario() {
    let input = "if(false){x=1;}else{x=2;}return 3;var y=4;";
    let result = Deobfuscator::new().run_sync(input, &DeobOptions::default());

    assert!(result.code.contains("x = 2"), "got: {}", result.code);
    assert!(result.code.contains("return 3"), "got: {}", result.code);
    assert!(!result.code.contains("x = 1"));
    assert!(!result.code.contains("y = 4"));

    let basic = result
        .transformations
        .iter()
        .find(|t| t.kind == "basic-ast-transform")
        .expect("basic pass recorded");
    assert!(basic.success && basic.count > 0);
}

#[test]
fn pipeline_is_idempotent_on_clean_code() {
    let first = Deobfuscator::new().run_sync(
        "var _0xaa=['log','done'];console[_0xaa[0]](_0xaa[1]);",
        &DeobOptions::default(),
    );
    let second = Deobfuscator::new().run_sync(&first.code, &DeobOptions::default());
    let effective = second
        .transformations
        .iter()
        .filter(|t| t.success && t.count > 0)
        .count();
    assert!(
        effective <= 1,
        "second run still transforming: {:?}",
        second.transformations
    );
}

#[test]
fn unchanged_passes_obey_record_contract() {
    let result = Deobfuscator::new().run_sync(
        "function add(a, b) { return a + b; }",
        &DeobOptions::default(),
    );
    for t in &result.transformations {
        assert!(
            t.count == 0 || t.success,
            "record violates contract: {t:?}"
        );
    }
}

#[test]
fn empty_source_boundary() {
    let result = Deobfuscator::new().run_sync("", &DeobOptions::default());
    assert_eq!(result.code, "");
    assert!(result.confidence >= 0.1);
    assert!(result
        .transformations
        .iter()
        .all(|t| t.success || t.count == 0));
}

// ---------------------------------------------------------------------------
// detection feeding the pipeline
// ---------------------------------------------------------------------------

#[test]
fn detection_routes_to_recommendations() {
    let detection =
        obfuscation::detect("var _0xabcd=['hello','world'];console[_0xabcd[0]](_0xabcd[1]);");
    assert!(detection.is_obfuscated());
    assert!(detection
        .recommendations
        .iter()
        .any(|r| r.contains("deobfuscate")));
}

#[test]
fn ast_roundtrip_invariant() {
    let sources = [
        "var a = 1; function f(x) { return x * 2; } f(a);",
        "for (const k in o) { if (k.length > 3) { log(k); } }",
        "try { risky(); } catch (e) { console.error(e); } finally { done(); }",
        "const g = async x => { await wait(x); return x ?? 0; };",
    ];
    for src in sources {
        let first = ast::parse(src).expect("parse");
        assert!(first.is_clean(), "{src}");
        let gen1 = ast::generate(&first.program, &Default::default());
        let second = ast::parse(&gen1).expect("reparse");
        assert!(second.is_clean(), "regenerated source has issues: {gen1}");
        let gen2 = ast::generate(&second.program, &Default::default());
        assert_eq!(gen1, gen2, "unstable generation for {src}");
    }
}

// ---------------------------------------------------------------------------
// taint seed scenarios
// ---------------------------------------------------------------------------

#[test]
fn taint_eval_from_location() {
    let report = taint::analyze("const u = location.hash;\neval(u);", &TaintConfig::default())
        .expect("analysis");
    assert_eq!(report.taint_paths.len(), 1);
    let path = &report.taint_paths[0];
    assert_eq!(path.source.kind, "user-input");
    assert_eq!(path.sink.kind, "eval");
    assert_eq!(path.path, vec![1, 2]);
}

#[test]
fn taint_sanitized_flow_is_silent() {
    let report = taint::analyze(
        "const u = location.hash;\nconst safe = encodeURIComponent(u);\ndocument.body.innerHTML = safe;",
        &TaintConfig::default(),
    )
    .expect("analysis");
    assert!(
        report.taint_paths.is_empty(),
        "unexpected: {:?}",
        report.taint_paths
    );
}

#[test]
fn taint_path_has_no_sanitizer_between() {
    // A flow through a plain helper keeps the taint; the sink fires.
    let report = taint::analyze(
        "var c = document.cookie;\nvar wrapped = pad(c);\neval(wrapped);",
        &TaintConfig::default(),
    )
    .expect("analysis");
    assert_eq!(report.taint_paths.len(), 1);
}

// ---------------------------------------------------------------------------
// detail-token seed scenario
// ---------------------------------------------------------------------------

#[test]
fn detail_token_roundtrip_for_dom_structure() {
    let mut store = DetailStore::new();
    // A DOM structure bigger than the budget.
    let children: Vec<_> = (0..2000)
        .map(|i| json!({ "tag": format!("div{i}"), "children": [] }))
        .collect();
    let structure = json!({ "tag": "html", "children": children });

    let wrapped = store.smart_handle(structure.clone(), 50 * 1024);
    let detail_id = wrapped["detailId"]
        .as_str()
        .expect("oversized result carries a detailId")
        .to_string();
    assert!(wrapped["summary"].is_object());

    // Exact original back.
    assert_eq!(store.retrieve(&detail_id, None).unwrap(), structure);
    // Path indexing into the stored object.
    assert_eq!(
        store.retrieve(&detail_id, Some("children.0.tag")).unwrap(),
        json!("div0")
    );
}
