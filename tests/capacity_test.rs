//! Capacity enforcement: hard caps produce partial but consistent indexes
//! with explicit markers.

use cerberus::{DiagnosticKind, Engine, Settings};
use std::fs;
use tempfile::TempDir;

fn engine_with(temp: &TempDir, mutate: impl FnOnce(&mut Settings)) -> Engine {
    let mut settings = Settings::default();
    settings.indexing.parallel_threads = 2;
    settings.indexing.batch_size = 3;
    mutate(&mut settings);
    Engine::open(&temp.path().join("store"), settings).unwrap()
}

/// 20 files with 5 functions each: 100 symbols total.
fn seed_corpus(temp: &TempDir) -> std::path::PathBuf {
    let project = temp.path().join("project");
    fs::create_dir_all(&project).unwrap();
    for f in 0..20 {
        let mut content = String::new();
        for s in 0..5 {
            content.push_str(&format!("def fn_{f}_{s}():\n    pass\n\n"));
        }
        fs::write(project.join(format!("file{f:02}.py")), content).unwrap();
    }
    project
}

#[test]
fn test_global_cap_stores_exactly_the_cap() {
    let temp = TempDir::new().unwrap();
    let project = seed_corpus(&temp);
    let engine = engine_with(&temp, |s| s.indexing.max_total_symbols = 42);

    let report = engine.index(&project).unwrap();

    assert!(report.capacity_reached);
    assert_eq!(engine.stats().unwrap().symbols, 42);
    assert!(report
        .diagnostics
        .iter()
        .any(|d| d.kind == DiagnosticKind::GlobalCapReached));

    // The store is consistent: every stored symbol belongs to a stored
    // file and snippets materialize.
    let symbols: Vec<_> = engine.query_symbols(Default::default()).collect();
    assert_eq!(symbols.len(), 42);
    for symbol in &symbols {
        assert!(engine
            .store()
            .get_file(&symbol.file_path)
            .unwrap()
            .is_some());
    }
    let snippet = engine.snippet(symbols[0].id, 0).unwrap();
    assert!(snippet.content.contains("def "));
}

#[test]
fn test_per_file_cap_truncates_in_source_order() {
    let temp = TempDir::new().unwrap();
    let project = temp.path().join("project");
    fs::create_dir_all(&project).unwrap();
    let mut content = String::new();
    for i in 0..10 {
        content.push_str(&format!("def f{i}():\n    pass\n\n"));
    }
    fs::write(project.join("many.py"), content).unwrap();

    let engine = engine_with(&temp, |s| s.indexing.max_symbols_per_file = 4);
    let report = engine.index(&project).unwrap();

    assert_eq!(report.truncations, 1);
    assert_eq!(engine.stats().unwrap().symbols, 4);
    // Deterministic: the first four in source order survive.
    for i in 0..4 {
        assert!(engine.get_symbol(&format!("f{i}"), true, None).is_ok());
    }
    assert!(engine.get_symbol("f4", true, None).is_err());
}

#[test]
fn test_byte_cap_skips_with_diagnostic() {
    let temp = TempDir::new().unwrap();
    let project = temp.path().join("project");
    fs::create_dir_all(&project).unwrap();
    fs::write(project.join("small.py"), "def ok():\n    pass\n").unwrap();
    fs::write(
        project.join("huge.py"),
        format!("# {}\n", "x".repeat(4096)),
    )
    .unwrap();

    let engine = engine_with(&temp, |s| s.indexing.max_file_bytes = 1024);
    let report = engine.index(&project).unwrap();

    assert_eq!(report.files_indexed, 1);
    assert_eq!(report.files_skipped, 1);
    assert!(report
        .diagnostics
        .iter()
        .any(|d| d.kind == DiagnosticKind::FileTooLarge && d.path.ends_with("huge.py")));
    assert!(engine.get_symbol("ok", true, None).is_ok());
}

#[test]
fn test_parse_failure_confined_to_file() {
    let temp = TempDir::new().unwrap();
    let project = temp.path().join("project");
    fs::create_dir_all(&project).unwrap();
    fs::write(project.join("broken.py"), "def broken(:\n").unwrap();
    fs::write(project.join("fine.py"), "def fine():\n    pass\n").unwrap();

    let engine = engine_with(&temp, |_| {});
    let report = engine.index(&project).unwrap();

    assert_eq!(report.parse_failures, 1);
    // The rest of the batch committed.
    assert!(engine.get_symbol("fine", true, None).is_ok());
    assert!(report
        .diagnostics
        .iter()
        .any(|d| d.kind == DiagnosticKind::ParseFailure && d.path.ends_with("broken.py")));
}

#[test]
fn test_capacity_preserves_invariants_on_reingest() {
    let temp = TempDir::new().unwrap();
    let project = seed_corpus(&temp);
    let engine = engine_with(&temp, |s| s.indexing.max_total_symbols = 42);

    engine.index(&project).unwrap();
    // Second pass over the capped index keeps the count stable.
    engine.index(&project).unwrap();
    assert_eq!(engine.stats().unwrap().symbols, 42);
}
