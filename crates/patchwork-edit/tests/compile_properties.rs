//! Property tests: a compiled diff reproduces the compiler's own edits.

#![cfg_attr(
    test,
    allow(
        clippy::expect_used,
        clippy::unwrap_used,
        clippy::panic,
        clippy::missing_panics_doc,
        clippy::tests_outside_test_module,
        reason = "Test allows"
    )
)]

use patchwork_core::{EditOp, PatchOps, PathStrip};
use patchwork_edit::{DiffApplier, EditCompiler, FileSnapshot};
use proptest::prelude::*;
use std::fs;
use tempfile::TempDir;
use tokio::runtime::Runtime;

const PATHS: [&str; 2] = ["src/a.ts", "src/b.ts"];

const LINES: [&str; 6] = [
    "import { http } from './http';",
    "export class Store {",
    "  load() {",
    "  }",
    "}",
    "const limit = 10;",
];

const SNIPPETS: [&str; 4] = [
    "const added = 0;",
    "  save() {}",
    "// generated",
    "export const total = limit * 2;",
];

fn file_content() -> impl Strategy<Value = Option<String>> {
    prop::option::of(
        prop::collection::vec(prop::sample::select(LINES.to_vec()), 0..10)
            .prop_map(|lines| lines.iter().map(|line| format!("{line}\n")).collect()),
    )
}

fn edit_op() -> impl Strategy<Value = EditOp> {
    let path = prop::sample::select(PATHS.to_vec()).prop_map(str::to_owned);
    let anchor = prop::sample::select(LINES.to_vec()).prop_map(str::to_owned);
    let code = prop::sample::select(SNIPPETS.to_vec()).prop_map(str::to_owned);
    let occurrence = prop::option::of(1_usize..3);

    prop_oneof![
        (path.clone(), anchor.clone(), code.clone(), occurrence.clone()).prop_map(
            |(path, anchor, code, occurrence)| EditOp::InsertAfter {
                path,
                anchor,
                code,
                occurrence,
            }
        ),
        (path.clone(), anchor.clone(), code.clone(), occurrence).prop_map(
            |(path, anchor, code, occurrence)| EditOp::InsertBefore {
                path,
                anchor,
                code,
                occurrence,
            }
        ),
        (path.clone(), anchor.clone(), anchor, code.clone()).prop_map(
            |(path, start, end, code)| EditOp::ReplaceBetween {
                path,
                start,
                end,
                code,
            }
        ),
        (path.clone(), code).prop_map(|(path, code)| EditOp::AppendIfMissing {
            path,
            code,
            guard: String::new(),
        }),
        (
            path,
            prop::sample::select(vec!["{ Query }", "{ http }", "{ save, load }"]),
            prop::sample::select(vec!["./http", "./query"]),
        )
            .prop_map(|(path, spec, from)| EditOp::UpsertImport {
                path,
                spec: spec.to_owned(),
                from: from.to_owned(),
            }),
    ]
}

fn snapshot_of(contents: &[Option<String>]) -> FileSnapshot {
    let mut snapshot = FileSnapshot::new();
    for (path, content) in PATHS.iter().zip(contents) {
        if let Some(content) = content {
            snapshot.insert(*path, content.clone());
        }
    }
    snapshot
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn prop_compiled_diff_reproduces_edits(
        contents in prop::collection::vec(file_content(), PATHS.len()),
        ops in prop::collection::vec(edit_op(), 1..6),
    ) {
        let snapshot = snapshot_of(&contents);
        let ops = PatchOps::new(ops);
        let compiler = EditCompiler::new(PathStrip::P1);
        let Ok(diff) = compiler.compile(&ops, &snapshot) else {
            // Unresolvable or ambiguous anchors produce no diff at all.
            return Ok(());
        };
        let expected = compiler
            .apply_in_memory(&ops, &snapshot)
            .expect("in-memory edits succeed when compile does");

        let patched = snapshot.apply_diff(&diff).expect("diff applies to its own snapshot");
        for path in ops.touched_paths() {
            prop_assert_eq!(patched.get(path), expected.get(path), "in memory: {}", path);
        }

        let repo = TempDir::new().expect("tempdir");
        fs::create_dir_all(repo.path().join("src")).expect("mkdir");
        for path in snapshot.paths() {
            fs::write(repo.path().join(path), snapshot.get(path).unwrap_or_default())
                .expect("write");
        }
        let runtime = Runtime::new().expect("runtime");
        runtime
            .block_on(DiffApplier::default().check_and_apply(&diff, repo.path(), PathStrip::P1))
            .expect("diff applies on disk");
        for path in ops.touched_paths() {
            let on_disk = fs::read_to_string(repo.path().join(path)).ok();
            prop_assert_eq!(on_disk.as_deref(), expected.get(path), "on disk: {}", path);
        }
    }
}
