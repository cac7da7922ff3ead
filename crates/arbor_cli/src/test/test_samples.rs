use super::run_sample::analyze_sample;
use std::ffi::OsString;
use walkdir::WalkDir;

sample! { tick "../../samples/tick.arb";
    args = ["--right-side", "zero"];
    stdout = ["tick.f: 1 → 0", "SAT ("];
}

sample! { tick_integer "../../samples/tick.arb";
    args = ["--right-side", "zero", "--domain", "integer", "--threads", "1"];
    stdout = ["tick.f: 1 → 0", "SAT ("];
}

sample! { trees "../../samples/trees.arb";
    args = ["--right-side", "zero"];
    stdout = [
        "trees.mirror t: 0 → 0",
        "trees.left t: 0 → 0",
        "trees.twice t: 0 → 0",
        "SAT (",
    ];
}

sample! { trees_weakening "../../samples/trees.arb";
    args = ["--right-side", "zero", "--auto", "--weaken", "--no-tree-cf"];
    stdout = [
        "trees.mirror t: 0 → 0",
        "trees.left t: 0 → 0",
        "trees.twice t: 0 → 0",
        "SAT (",
    ];
}

sample! { tick_with_companion "../../samples/tick.arb";
    args = ["--right-side", "zero", "--infer-cf"];
    stdout = ["tick.f: 1 → 0, cf: ", "SAT ("];
}

sample! { tactic_checked "../../samples/tactic.arb";
    args = ["--mode", "check", "--tactic", "tactic.first=../../samples/tactics/first.json"];
    stdout = ["tactic.first t: ", "SAT ("];
}

sample! { budget "../../samples/budget.arb";
    args = ["--mode", "check", "--annotations", "../../samples/annotations/budget.json"];
    stdout = ["budget.g: skipped", "UNSAT", "  (tick)"];
    status = 1;
}

sample! { tactic "../../samples/tactic.arb";
    args = ["--tactic", "first=../../samples/tactics/first.json"];
    stdout = ["tactic.first t: ", "SAT ("];
}

sample! { tactic_for_unknown_function "../../samples/tactic.arb";
    args = ["--tactic", "second=../../samples/tactics/first.json"];
    stdout = [];
    status = 1;
}

sample! { malformed "../../samples/malformed.arb";
    stdout = [];
    status = 1;
}

#[test]
fn test_proof_dir() {
    let dir = tempfile::tempdir().unwrap();
    let args: Vec<OsString> = vec![
        "../../samples/tactic.arb".into(),
        "--tactic".into(),
        "first=../../samples/tactics/first.json".into(),
        "--proof-dir".into(),
        dir.path().join("proofs").into(),
    ];
    let (status, _) = analyze_sample(&args).unwrap();
    assert_eq!(status, 0);

    let proof = std::fs::read_to_string(dir.path().join("proofs/tactic.first.json")).unwrap();
    let proof: serde_json::Value = serde_json::from_str(&proof).unwrap();
    assert_eq!(proof["roots"].as_array().unwrap().len(), 1);
    let rules: Vec<_> = proof["edges"]
        .as_array()
        .unwrap()
        .iter()
        .map(|edge| edge["rule"].as_str().unwrap())
        .collect();
    assert!(rules.contains(&"match") && rules.contains(&"tick"));
    assert!(dir.path().join("proofs/tactic.first.smt2").exists());
}

#[test]
fn test_every_sample_is_tested() {
    let tests = include_str!("test_samples.rs");
    for entry in WalkDir::new("../../samples") {
        let entry = entry.unwrap();
        let path = entry.path();
        if path.extension().and_then(|ext| ext.to_str()) != Some("arb") {
            continue;
        }
        let name = path.strip_prefix("../../").unwrap_or(path);
        assert!(
            tests.contains(&format!("\"../../{}\"", name.display())),
            "sample {} has no test",
            name.display()
        );
    }
}
