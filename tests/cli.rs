use assert_cmd::Command;
use predicates::prelude::*;
use serde_json::Value;
use std::fs;
use std::path::Path;
use tempfile::TempDir;

fn temp_workspace() -> TempDir {
    tempfile::tempdir().expect("create tempdir")
}

fn lmprep() -> Command {
    Command::cargo_bin("lmprep").expect("binary exists")
}

fn write_corpus(dir: &Path) -> std::path::PathBuf {
    let input = dir.join("corpus.txt");
    fs::write(&input, "The cat sat.\nTHE DOG SAT.\n").expect("write corpus");
    input
}

#[test]
fn vocab_writes_normalized_corpus_and_vocabulary() {
    let workspace = temp_workspace();
    let input = write_corpus(workspace.path());
    let out = workspace.path().join("out");

    let stdout = lmprep()
        .args(["--quiet", "vocab", "--no-progress", "--json", "--top-k", "3"])
        .arg("--input")
        .arg(&input)
        .arg("--output-dir")
        .arg(&out)
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();

    let summary: Value = serde_json::from_slice(&stdout).expect("summary is valid JSON");
    assert_eq!(summary["vocabulary_size"], 3);
    assert_eq!(summary["normalized_reused"], false);
    assert_eq!(summary["stats"]["total_tokens"], 6);
    assert_eq!(summary["stats"]["distinct_tokens"], 4);
    assert_eq!(summary["stats"]["coverage_percent"], 83.33);

    assert!(out.join("corpus.txt_lower.txt.gz").exists());
    let vocab = fs::read_to_string(out.join("corpus.txt_vocab-3.txt")).expect("vocab file");
    let words: Vec<&str> = vocab.split('\n').collect();
    assert_eq!(words.len(), 3);
    assert!(words[..2].contains(&"the"));
    assert!(words[..2].contains(&"sat."));
}

#[test]
fn rerun_reuses_artifacts() {
    let workspace = temp_workspace();
    let input = write_corpus(workspace.path());

    let run = || {
        lmprep()
            .current_dir(workspace.path())
            .args(["--quiet", "vocab", "--no-progress", "--top-k", "2", "--input"])
            .arg(&input)
            .assert()
            .success()
    };
    run().stdout(predicate::str::contains("percent of all words"));
    run().stdout(predicate::str::contains("reused"));
    assert!(workspace.path().join(".lmprep-cache.json").exists());
}

#[test]
fn blank_corpus_fails_with_message() {
    let workspace = temp_workspace();
    let input = workspace.path().join("blank.txt");
    fs::write(&input, "   \n\n").expect("write corpus");

    lmprep()
        .current_dir(workspace.path())
        .args(["--quiet", "vocab", "--no-progress", "--input"])
        .arg(&input)
        .assert()
        .failure()
        .stderr(predicate::str::contains("0 words"));
    assert!(!workspace.path().join("blank.txt_vocab-500000.txt").exists());
}

#[test]
fn build_requires_prune_thresholds() {
    let workspace = temp_workspace();
    let input = write_corpus(workspace.path());
    lmprep()
        .args(["build", "--input"])
        .arg(&input)
        .assert()
        .failure()
        .stderr(predicate::str::contains("--arpa-prune"));
}

#[cfg(unix)]
mod kenlm {
    use super::*;
    use std::os::unix::fs::PermissionsExt;

    fn install_tool(bins: &Path, name: &str, body: &str) {
        let path = bins.join(name);
        let script = format!(
            "#!/bin/sh\necho \"$@\" >> \"{}\"\n{body}\n",
            bins.join("calls.log").display()
        );
        fs::write(&path, script).expect("write fake tool");
        fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).expect("chmod");
    }

    /// Fake `lmplz`, `filter` and `build_binary` that record their arguments and create the
    /// requested output files.
    fn fake_kenlm(dir: &Path, binarize_exit: i32) -> std::path::PathBuf {
        let bins = dir.join("bin");
        fs::create_dir_all(&bins).expect("bin dir");
        install_tool(
            &bins,
            "lmplz",
            r#"while [ $# -gt 0 ]; do
  if [ "$1" = "--arpa" ]; then echo arpa > "$2"; fi
  shift
done"#,
        );
        install_tool(
            &bins,
            "filter",
            &format!("cat > \"{}\"\ncp \"${{2#model:}}\" \"$3\"", bins.join("vocab.stdin").display()),
        );
        install_tool(
            &bins,
            "build_binary",
            &format!(
                "for last; do :; done\necho binary > \"$last\"\nexit {binarize_exit}"
            ),
        );
        bins
    }

    fn build(workspace: &TempDir, bins: &Path) -> Command {
        let mut cmd = lmprep();
        cmd.current_dir(workspace.path())
            .args([
                "--quiet",
                "build",
                "--no-progress",
                "--top-k",
                "2",
                "--arpa-prune",
                "0|0|1",
                "--input",
                "corpus.txt",
            ])
            .arg("--kenlm-bins")
            .arg(bins);
        cmd
    }

    #[test]
    fn build_runs_all_three_tools() {
        let workspace = temp_workspace();
        write_corpus(workspace.path());
        let bins = fake_kenlm(workspace.path(), 0);

        build(&workspace, &bins)
            .assert()
            .success()
            .stdout(predicate::str::contains("Binary model:"));

        let root = workspace.path();
        assert!(root.join("corpus.txt_lm_3_0|0|1.arpa").exists());
        assert!(root.join("corpus.txt_lm_3_0|0|1_filtered_2.arpa").exists());
        assert!(root.join("corpus.txt_lm_3_0|0|1_filtered_2.binary").exists());

        let fed = fs::read_to_string(bins.join("vocab.stdin")).expect("filter stdin");
        assert_eq!(
            fed,
            fs::read_to_string(root.join("corpus.txt_vocab-2.txt")).expect("vocab file")
        );

        let calls = fs::read_to_string(bins.join("calls.log")).expect("calls log");
        let lines: Vec<&str> = calls.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[0].starts_with("--order 3 --temp_prefix"));
        assert!(lines[0].ends_with("--prune 0 0 1"));
        assert!(lines[1].starts_with("single model:"));
        assert!(lines[2].starts_with("-v "));
    }

    #[test]
    fn failing_tool_exits_non_zero() {
        let workspace = temp_workspace();
        write_corpus(workspace.path());
        let bins = fake_kenlm(workspace.path(), 1);

        build(&workspace, &bins)
            .assert()
            .failure()
            .stderr(predicate::str::contains("build_binary exited"));
    }
}
