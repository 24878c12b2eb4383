//! End-to-end runs against a shell script standing in for ffmpeg.
//!
//! The fake logs every invocation, writes `transforms.trf` on analysis,
//! refuses to transform without it, copies the input on transform and writes
//! the concat listing into the output on join.
#![cfg(unix)]

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::watch;
use vidproc::{run, RunOutcome, Stage, StabilizeConfig, VidprocError};

/// Extra shell run at the start of a stage, e.g. `exit 1`
#[derive(Default)]
struct Hooks {
    detect: &'static str,
    transform: &'static str,
    concat: &'static str,
}

struct Fixture {
    _root: tempfile::TempDir,
    input_dir: PathBuf,
    bin_dir: PathBuf,
    log: PathBuf,
}

impl Fixture {
    fn new(inputs: &[&str]) -> Self {
        let root = tempfile::tempdir().unwrap();
        let input_dir = root.path().join("videos");
        let bin_dir = root.path().join("bin");
        fs::create_dir(&input_dir).unwrap();
        fs::create_dir(&bin_dir).unwrap();
        for name in inputs {
            fs::write(input_dir.join(name), format!("frames of {name}")).unwrap();
        }
        let log = root.path().join("ffmpeg.log");
        Self { _root: root, input_dir, bin_dir, log }
    }

    /// Write the fake ffmpeg with `hooks` and return a config pointing at it
    fn config(&self, hooks: Hooks) -> StabilizeConfig {
        let script = format!(
            r#"#!/bin/sh
printf '%s\n' "$*" >> '{log}'
last=""
for a in "$@"; do last="$a"; done
case "$*" in
  *vidstabdetect*)
    {detect}
    printf 'transforms of %s\n' "$2" > transforms.trf
    ;;
  *vidstabtransform*)
    {transform}
    [ -f transforms.trf ] || exit 3
    cp "$2" "$last"
    ;;
  *concat*)
    {concat}
    cp "$6" "$last"
    ;;
esac
"#,
            log = self.log.display(),
            detect = self_or_true(hooks.detect),
            transform = self_or_true(hooks.transform),
            concat = self_or_true(hooks.concat),
        );
        let bin = self.bin_dir.join("ffmpeg");
        // Replace rather than rewrite in place so a running copy is never modified
        let staged = self.bin_dir.join("ffmpeg.new");
        fs::write(&staged, script).unwrap();
        fs::set_permissions(&staged, fs::Permissions::from_mode(0o755)).unwrap();
        fs::rename(&staged, &bin).unwrap();

        StabilizeConfig {
            input_dir: self.input_dir.clone(),
            ffmpeg_bin: bin,
            // The fake has no -version or -filters output
            preflight: false,
            ..Default::default()
        }
    }

    fn invocations(&self) -> Vec<String> {
        fs::read_to_string(&self.log)
            .unwrap_or_default()
            .lines()
            .map(str::to_string)
            .collect()
    }

    fn count(&self, needle: &str) -> usize {
        self.invocations().iter().filter(|l| l.contains(needle)).count()
    }

    fn clear_log(&self) {
        let _ = fs::remove_file(&self.log);
    }

    fn side(&self, name: &str) -> PathBuf {
        self.input_dir.join("vidproc").join(name)
    }

    fn assert_no_temp_artifacts(&self) {
        for path in [
            self.input_dir.join("files.txt"),
            self.input_dir.join("transforms.trf"),
            self.side("temp_stabilized.mp4"),
        ] {
            assert!(!path.exists(), "left behind: {}", path.display());
        }
        if let Ok(entries) = fs::read_dir(self.input_dir.join("vidproc")) {
            for entry in entries {
                let name = entry.unwrap().file_name();
                assert!(!name.to_string_lossy().ends_with(".partial"), "left behind: {:?}", name);
            }
        }
    }
}

fn self_or_true(hook: &str) -> &str {
    if hook.is_empty() { ":" } else { hook }
}

fn no_shutdown() -> (watch::Sender<bool>, watch::Receiver<bool>) {
    watch::channel(false)
}

fn completed(outcome: RunOutcome) -> vidproc::RunSummary {
    match outcome {
        RunOutcome::Completed(summary) => summary,
        other => panic!("expected a completed run, got {:?}", other),
    }
}

fn snapshot(dir: &Path) -> Vec<(String, Vec<u8>)> {
    let mut files: Vec<_> = fs::read_dir(dir)
        .unwrap()
        .map(|e| {
            let e = e.unwrap();
            (e.file_name().to_string_lossy().into_owned(), fs::read(e.path()).unwrap())
        })
        .collect();
    files.sort();
    files
}

#[tokio::test]
async fn test_full_run_joins_in_name_order() {
    // Created out of order on purpose
    let fx = Fixture::new(&["c.ext", "a.ext", "b.ext"]);
    let cfg = fx.config(Hooks::default());
    let (_tx, rx) = no_shutdown();

    let summary = completed(run(&cfg, Path::new("out.mp4"), rx).await.unwrap());

    assert_eq!(fx.count("vidstabdetect"), 3);
    assert_eq!(fx.count("vidstabtransform"), 3);
    assert_eq!(fx.count("concat"), 1);
    assert_eq!(summary.count(Stage::Analyze), 3);
    assert_eq!(summary.count(Stage::Transform), 3);
    assert_eq!(summary.count(Stage::Concat), 1);

    let output = fx.input_dir.join("out.mp4");
    assert_eq!(summary.output, output.canonicalize().unwrap());
    assert_eq!(
        fs::read_to_string(&output).unwrap(),
        "file 'vidproc/a.mp4'\nfile 'vidproc/b.mp4'\nfile 'vidproc/c.mp4'\n"
    );
    assert_eq!(fs::read_to_string(fx.side("b.mp4")).unwrap(), "frames of b.ext");
    assert!(fx.side("a.trf").exists());
    fx.assert_no_temp_artifacts();

    // Inputs are never touched
    assert_eq!(fs::read_to_string(fx.input_dir.join("a.ext")).unwrap(), "frames of a.ext");
}

#[tokio::test]
async fn test_second_run_reuses_every_checkpoint() {
    let fx = Fixture::new(&["a.ext", "b.ext"]);
    let cfg = fx.config(Hooks::default());

    let (_tx, rx) = no_shutdown();
    completed(run(&cfg, Path::new("out.mp4"), rx).await.unwrap());

    fs::remove_file(fx.input_dir.join("out.mp4")).unwrap();
    fx.clear_log();

    let (_tx, rx) = no_shutdown();
    let summary = completed(run(&cfg, Path::new("out.mp4"), rx).await.unwrap());

    assert_eq!(fx.count("vidstabdetect"), 0);
    assert_eq!(fx.count("vidstabtransform"), 0);
    assert_eq!(fx.count("concat"), 1);
    assert_eq!(summary.stages.len(), 1);
    assert_eq!(
        fs::read_to_string(fx.input_dir.join("out.mp4")).unwrap(),
        "file 'vidproc/a.mp4'\nfile 'vidproc/b.mp4'\n"
    );
    fx.assert_no_temp_artifacts();
}

#[tokio::test]
async fn test_resume_after_analysis_skips_reanalysis() {
    let fx = Fixture::new(&["a.ext", "b.ext"]);

    // Transform of any input fails: a's analysis is committed, nothing else
    let failing = fx.config(Hooks { transform: "exit 1", ..Default::default() });
    let (_tx, rx) = no_shutdown();
    let err = run(&failing, Path::new("out.mp4"), rx).await.unwrap_err();
    assert!(
        matches!(err, VidprocError::ToolFailed { stage: Stage::Transform, code: Some(1), .. }),
        "unexpected error: {err}"
    );

    assert!(fx.side("a.trf").exists());
    assert!(!fx.side("a.mp4").exists());
    assert!(!fx.side("b.trf").exists(), "later inputs must not be processed");
    assert!(!fx.input_dir.join("out.mp4").exists());
    fx.assert_no_temp_artifacts();

    fx.clear_log();
    let cfg = fx.config(Hooks::default());
    let (_tx, rx) = no_shutdown();
    let summary = completed(run(&cfg, Path::new("out.mp4"), rx).await.unwrap());

    let calls = fx.invocations();
    assert!(!calls.iter().any(|c| c.contains("vidstabdetect") && c.contains("a.ext")), "{calls:?}");
    assert!(calls.iter().any(|c| c.contains("vidstabtransform") && c.contains("a.ext")));
    assert!(calls.iter().any(|c| c.contains("vidstabdetect") && c.contains("b.ext")));
    assert_eq!(summary.count(Stage::Analyze), 1);
    assert_eq!(summary.count(Stage::Transform), 2);
    fx.assert_no_temp_artifacts();
}

#[tokio::test]
async fn test_existing_output_is_a_no_op() {
    let fx = Fixture::new(&["a.ext"]);
    let cfg = fx.config(Hooks::default());
    let (_tx, rx) = no_shutdown();
    completed(run(&cfg, Path::new("out.mp4"), rx).await.unwrap());

    // Stale scratch in the side folder must survive the short-circuit too
    fs::write(fx.side("temp_stabilized.mp4"), b"scratch").unwrap();
    let before = snapshot(&fx.input_dir.join("vidproc"));
    fx.clear_log();

    // Not even the ffmpeg preflight runs
    let cfg = StabilizeConfig { preflight: true, ..cfg };
    let (_tx, rx) = no_shutdown();
    let outcome = run(&cfg, Path::new("out.mp4"), rx).await.unwrap();

    assert!(matches!(outcome, RunOutcome::AlreadyExists(_)));
    assert!(fx.invocations().is_empty());
    assert_eq!(snapshot(&fx.input_dir.join("vidproc")), before);
}

#[tokio::test]
async fn test_bad_suffix_does_nothing() {
    let fx = Fixture::new(&["a.ext"]);
    let cfg = StabilizeConfig { preflight: true, ..fx.config(Hooks::default()) };
    fs::write(fx.input_dir.join("transforms.trf"), b"stale").unwrap();
    let (_tx, rx) = no_shutdown();

    let err = run(&cfg, Path::new("out.mkv"), rx).await.unwrap_err();

    assert!(err.is_config(), "unexpected error: {err}");
    assert!(fx.invocations().is_empty());
    assert!(!fx.input_dir.join("vidproc").exists());
    assert!(fx.input_dir.join("transforms.trf").exists());
}

#[tokio::test]
async fn test_uppercase_suffix_accepted() {
    let fx = Fixture::new(&["a.ext"]);
    let cfg = fx.config(Hooks::default());
    let (_tx, rx) = no_shutdown();

    completed(run(&cfg, Path::new("OUT.MP4"), rx).await.unwrap());
    assert!(fx.input_dir.join("OUT.MP4").exists());
}

#[tokio::test]
async fn test_failed_join_cleans_up_and_keeps_checkpoints() {
    let fx = Fixture::new(&["a.ext", "b.ext"]);
    // Leave a partial output behind before failing
    let cfg = fx.config(Hooks { concat: "echo partial > \"$last\"; exit 1", ..Default::default() });
    let (_tx, rx) = no_shutdown();

    let err = run(&cfg, Path::new("out.mp4"), rx).await.unwrap_err();

    assert!(matches!(err, VidprocError::ToolFailed { stage: Stage::Concat, .. }));
    assert!(!fx.input_dir.join("out.mp4").exists(), "partial output would block the next run");
    assert!(fx.side("a.mp4").exists());
    assert!(fx.side("b.mp4").exists());
    fx.assert_no_temp_artifacts();
}

#[tokio::test]
async fn test_failed_analysis_leaves_no_scratch() {
    let fx = Fixture::new(&["a.ext"]);
    let cfg = fx.config(Hooks {
        detect: "printf 'half' > transforms.trf; exit 2",
        ..Default::default()
    });
    let (_tx, rx) = no_shutdown();

    let err = run(&cfg, Path::new("out.mp4"), rx).await.unwrap_err();

    assert!(matches!(err, VidprocError::ToolFailed { stage: Stage::Analyze, code: Some(2), .. }));
    assert!(!fx.side("a.trf").exists());
    fx.assert_no_temp_artifacts();
}

#[tokio::test]
async fn test_stale_scratch_from_crash_is_discarded() {
    let fx = Fixture::new(&["a.ext"]);
    let cfg = fx.config(Hooks::default());
    fs::create_dir(fx.input_dir.join("vidproc")).unwrap();
    fs::write(fx.input_dir.join("transforms.trf"), b"someone else's transforms").unwrap();
    fs::write(fx.side("temp_stabilized.mp4"), b"half a video").unwrap();
    fs::write(fx.side("a.trf.partial"), b"half").unwrap();
    fs::write(fx.input_dir.join("files.txt"), b"file 'gone.mp4'\n").unwrap();

    let (_tx, rx) = no_shutdown();
    completed(run(&cfg, Path::new("out.mp4"), rx).await.unwrap());

    assert_eq!(fx.count("vidstabdetect"), 1);
    let input = fx.input_dir.canonicalize().unwrap().join("a.ext");
    assert_eq!(
        fs::read_to_string(fx.side("a.trf")).unwrap(),
        format!("transforms of {}\n", input.display())
    );
    assert_eq!(fs::read_to_string(fx.side("a.mp4")).unwrap(), "frames of a.ext");
    fx.assert_no_temp_artifacts();
}

#[tokio::test]
async fn test_empty_folder_is_config_error() {
    let fx = Fixture::new(&[]);
    let cfg = fx.config(Hooks::default());
    let (_tx, rx) = no_shutdown();

    let err = run(&cfg, Path::new("out.mp4"), rx).await.unwrap_err();
    assert!(err.is_config());
    assert!(fx.invocations().is_empty());
}

#[tokio::test]
async fn test_clashing_base_names_rejected_before_work() {
    let fx = Fixture::new(&["a.mov", "a.mp4"]);
    let cfg = fx.config(Hooks::default());
    let (_tx, rx) = no_shutdown();

    let err = run(&cfg, Path::new("out.mp4"), rx).await.unwrap_err();
    assert!(err.is_config());
    assert!(fx.invocations().is_empty());
}

#[tokio::test]
async fn test_scratch_named_input_rejected_before_work() {
    let fx = Fixture::new(&["temp_stabilized.ext", "z.ext"]);
    let cfg = fx.config(Hooks::default());
    let (_tx, rx) = no_shutdown();

    let err = run(&cfg, Path::new("out.mp4"), rx).await.unwrap_err();
    assert!(err.is_config(), "unexpected error: {err}");
    assert!(fx.invocations().is_empty());
}

#[tokio::test]
async fn test_preflight_rejects_ffmpeg_without_filters() {
    let fx = Fixture::new(&["a.ext"]);
    let cfg = StabilizeConfig { preflight: true, ..fx.config(Hooks::default()) };
    let (_tx, rx) = no_shutdown();

    let err = run(&cfg, Path::new("out.mp4"), rx).await.unwrap_err();

    assert!(err.is_config(), "unexpected error: {err}");
    assert_eq!(fx.invocations(), vec!["-version", "-hide_banner -filters"]);
    assert!(!fx.input_dir.join("vidproc").exists());
}

#[tokio::test]
async fn test_shutdown_terminates_active_invocation() {
    let fx = Fixture::new(&["a.ext"]);
    let cfg = fx.config(Hooks { detect: "exec sleep 30", ..Default::default() });
    let (tx, rx) = watch::channel(false);

    let handle = tokio::spawn({
        let cfg = cfg.clone();
        async move { run(&cfg, Path::new("out.mp4"), rx).await }
    });

    // Wait until the analysis pass is running
    for _ in 0..100 {
        if fx.count("vidstabdetect") > 0 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    assert_eq!(fx.count("vidstabdetect"), 1);
    tx.send(true).unwrap();

    let result = tokio::time::timeout(Duration::from_secs(10), handle)
        .await
        .expect("run did not stop after shutdown")
        .unwrap();

    assert!(matches!(result, Err(VidprocError::Interrupted)));
    assert!(!fx.side("a.trf").exists());
    assert!(!fx.input_dir.join("out.mp4").exists());
    fx.assert_no_temp_artifacts();
}
