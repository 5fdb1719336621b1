//! Incremental correctness: surgical updates converge to the same state a
//! fresh index would produce, and unchanged files keep their rows.

use cerberus::{Direction, Engine, HashEmbedder, RefKind, Settings};
use std::fs;
use std::path::PathBuf;
use tempfile::TempDir;

fn engine_for(temp: &TempDir) -> Engine {
    let mut settings = Settings::default();
    settings.indexing.parallel_threads = 2;
    Engine::open(&temp.path().join("store"), settings)
        .unwrap()
        .with_embedder(Box::new(HashEmbedder::default()))
}

/// Project: a class file, a caller file, and filler files that keep the
/// change ratio under the rebuild threshold.
fn seed_project(temp: &TempDir, method: &str) -> PathBuf {
    let project = temp.path().join("project");
    fs::create_dir_all(&project).unwrap();

    fs::write(
        project.join("shape.py"),
        format!("class Shape:\n    def {method}(self):\n        return 1\n"),
    )
    .unwrap();
    fs::write(
        project.join("main.py"),
        format!(
            "from shape import Shape\n\n\ndef run():\n    s = Shape()\n    s.{method}()\n"
        ),
    )
    .unwrap();
    for i in 0..6 {
        fs::write(
            project.join(format!("util{i}.py")),
            format!("def util{i}():\n    pass\n"),
        )
        .unwrap();
    }
    project
}

#[test]
fn test_rename_method_updates_references() {
    let temp = TempDir::new().unwrap();
    let project = seed_project(&temp, "step");
    let engine = engine_for(&temp);
    engine.index(&project).unwrap();

    // The call in run() resolves to Shape.step before the rename.
    let graph = engine
        .call_graph("run", Direction::Forward, None)
        .unwrap();
    assert!(graph.nodes.iter().any(|n| n.symbol == "step"));

    let util_ids_before: Vec<_> = (0..6)
        .map(|i| engine.get_symbol(&format!("util{i}"), true, None).unwrap()[0].id)
        .collect();

    // Rename step -> apply in both declaring and calling file.
    fs::write(
        project.join("shape.py"),
        "class Shape:\n    def apply(self):\n        return 1\n",
    )
    .unwrap();
    fs::write(
        project.join("main.py"),
        "from shape import Shape\n\n\ndef run():\n    s = Shape()\n    s.apply()\n",
    )
    .unwrap();

    let report = engine.update(&project).unwrap();
    // 2 changed out of 8 indexed: stays surgical.
    assert!(!report.full_rebuild);
    assert_eq!(report.ingest.files_indexed, 2);

    // Old symbol gone, new one present.
    assert!(engine.get_symbol("step", true, None).is_err());
    let apply = engine.get_symbol("apply", true, None).unwrap();
    assert_eq!(apply.len(), 1);

    // The method-call edge from run() now lands on apply.
    let main_path = project.join("main.py").to_string_lossy().to_string();
    let refs = engine
        .store()
        .references_from(&main_path, Some("run"))
        .unwrap();
    let call_refs: Vec<_> = refs
        .iter()
        .filter(|r| r.kind == RefKind::MethodCall)
        .collect();
    assert!(call_refs
        .iter()
        .any(|r| r.target_symbol.as_deref() == Some("apply")));
    assert!(call_refs
        .iter()
        .all(|r| r.target_symbol.as_deref() != Some("step")));

    // Untouched files keep their internal ids.
    for (i, id_before) in util_ids_before.iter().enumerate() {
        let id_after = engine.get_symbol(&format!("util{i}"), true, None).unwrap()[0].id;
        assert_eq!(*id_before, id_after, "util{i} row was rewritten");
    }
}

#[test]
fn test_update_matches_fresh_index() {
    let temp = TempDir::new().unwrap();
    let project = seed_project(&temp, "step");
    let engine = engine_for(&temp);
    engine.index(&project).unwrap();

    fs::write(
        project.join("shape.py"),
        "class Shape:\n    def apply(self):\n        return 1\n",
    )
    .unwrap();
    fs::write(project.join("extra.py"), "def extra():\n    pass\n").unwrap();
    fs::remove_file(project.join("util5.py")).unwrap();
    engine.update(&project).unwrap();

    // A fresh index over the same tree must agree on the logical state.
    let fresh_temp = TempDir::new().unwrap();
    let fresh = engine_for(&fresh_temp);
    fresh.index(&project).unwrap();

    let snapshot = |e: &Engine| {
        let mut rows: Vec<(String, String, String, u32, u32)> = e
            .query_symbols(Default::default())
            .map(|s| {
                (
                    s.file_path
                        .rsplit('/')
                        .next()
                        .unwrap_or_default()
                        .to_string(),
                    s.name.to_string(),
                    s.kind.as_str().to_string(),
                    s.span.start_line,
                    s.span.end_line,
                )
            })
            .collect();
        rows.sort();
        rows
    };

    assert_eq!(snapshot(&engine), snapshot(&fresh));
}

#[test]
fn test_deleted_file_cascades_fully() {
    let temp = TempDir::new().unwrap();
    let project = seed_project(&temp, "step");
    let engine = engine_for(&temp);
    engine.index(&project).unwrap();

    let shape_path = project.join("shape.py").to_string_lossy().to_string();
    fs::remove_file(project.join("shape.py")).unwrap();
    let report = engine.update(&project).unwrap();
    assert_eq!(report.changes.deleted.len(), 1);

    // No row anywhere still references the deleted path.
    assert!(engine.store().get_file(&shape_path).unwrap().is_none());
    assert!(engine.store().symbols_in_file(&shape_path).unwrap().is_empty());
    assert!(engine
        .store()
        .references_from(&shape_path, None)
        .unwrap()
        .is_empty());

    // References that targeted it became unresolved, not dangling.
    let main_path = project.join("main.py").to_string_lossy().to_string();
    for reference in engine.store().references_from(&main_path, None).unwrap() {
        assert_ne!(reference.target_file.as_deref(), Some(shape_path.as_str()));
    }
}

#[test]
fn test_large_change_ratio_falls_back_to_rebuild() {
    let temp = TempDir::new().unwrap();
    let project = temp.path().join("project");
    fs::create_dir_all(&project).unwrap();
    fs::write(project.join("a.py"), "def a():\n    pass\n").unwrap();
    fs::write(project.join("b.py"), "def b():\n    pass\n").unwrap();

    let engine = engine_for(&temp);
    engine.index(&project).unwrap();

    fs::write(project.join("a.py"), "def a2():\n    pass\n").unwrap();
    fs::write(project.join("b.py"), "def b2():\n    pass\n").unwrap();

    let report = engine.update(&project).unwrap();
    assert!(report.full_rebuild);
    assert!(engine.get_symbol("a2", true, None).is_ok());
    assert!(engine.get_symbol("a", true, None).is_err());
}
