//! Local converter backend tests using shell scripts in place of `soffice`.
//!
//! The fake converters understand the same command line as the real one
//! (`--outdir <dir> <input>`). The successful one writes a small PDF that
//! embeds its output directory and a copy of the input, so tests can check
//! isolation and cleanup.

#![cfg(unix)]

use doc2pdf::backend::local::LocalProcessBackend;
use doc2pdf::{
    CancelSignal, ConversionBackend, ConvertError, DocumentBody, ErrorKind, JobState, Orchestrator,
    PollPolicy, Stage, UploadedDocument,
};
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

const CONVERT_OK: &str = r#"#!/bin/sh
outdir=""
input=""
while [ $# -gt 0 ]; do
  case "$1" in
    --outdir) outdir="$2"; shift 2 ;;
    --convert-to) shift 2 ;;
    -*) shift ;;
    *) input="$1"; shift ;;
  esac
done
stem=$(basename "$input")
stem="${stem%.*}"
{
  printf '%%PDF-1.4 fake\n'
  printf 'outdir=%s\n' "$outdir"
  cat "$input"
} > "$outdir/$stem.pdf"
echo "convert $input -> $outdir/$stem.pdf"
"#;

const CONVERT_FAIL: &str = "#!/bin/sh\necho 'Error: source file could not be loaded' >&2\nexit 77\n";

const CONVERT_NOTHING: &str = "#!/bin/sh\nexit 0\n";

const CONVERT_HANG: &str = "#!/bin/sh\nexec sleep 5\n";

struct Scripts {
    ok: PathBuf,
    fail: PathBuf,
    nothing: PathBuf,
    hang: PathBuf,
    dir: PathBuf,
}

/// Every test calls this before spawning anything, so no script is still
/// open for writing when a child is exec'd.
fn scripts() -> &'static Scripts {
    static SCRIPTS: OnceLock<Scripts> = OnceLock::new();
    SCRIPTS.get_or_init(|| {
        let dir = Path::new(env!("CARGO_TARGET_TMPDIR"))
            .join(format!("doc2pdf-fake-soffice-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();

        let write = |name: &str, body: &str| {
            let path = dir.join(name);
            std::fs::write(&path, body).unwrap();
            std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
            path
        };
        Scripts {
            ok: write("soffice-ok", CONVERT_OK),
            fail: write("soffice-fail", CONVERT_FAIL),
            nothing: write("soffice-nothing", CONVERT_NOTHING),
            hang: write("soffice-hang", CONVERT_HANG),
            dir,
        }
    })
}

fn orchestrator(program: &Path, timeout: Duration) -> Orchestrator {
    let backend: Arc<dyn ConversionBackend> = Arc::new(LocalProcessBackend::new(program, timeout));
    Orchestrator::new(
        backend,
        PollPolicy::default(),
        vec!["docx".into(), "pptx".into()],
    )
}

fn docx(name: &str, body: &[u8]) -> UploadedDocument {
    UploadedDocument::from_bytes(name, "application/octet-stream", body.to_vec())
}

/// The `outdir=` line the fake converter embeds in its PDF.
fn outdir_of(pdf: &[u8]) -> PathBuf {
    let text = String::from_utf8_lossy(pdf);
    let line = text
        .lines()
        .find_map(|l| l.strip_prefix("outdir="))
        .expect("fake PDF carries its outdir");
    PathBuf::from(line)
}

#[tokio::test]
async fn converts_and_names_pdf_after_upload() {
    let s = scripts();
    let orch = orchestrator(&s.ok, Duration::from_secs(10));

    let outcome = orch
        .run(&docx("Annual Report.docx", b"docx-body"), &CancelSignal::never())
        .await;
    assert!(outcome.is_done(), "got: {:?}", outcome.result);
    assert_eq!(outcome.polls, 0);
    assert_eq!(outcome.job.state(), JobState::Succeeded);

    let pdf = outcome.result.unwrap();
    assert!(pdf.pdf_bytes.starts_with(b"%PDF-1.4 fake"));
    assert!(pdf.pdf_bytes.ends_with(b"docx-body"));
    assert_eq!(pdf.suggested_filename, "Annual Report.pdf");
}

#[tokio::test]
async fn working_directory_is_removed_after_conversion() {
    let s = scripts();
    let orch = orchestrator(&s.ok, Duration::from_secs(10));

    let pdf = orch
        .convert(&docx("a.docx", b"a"), &CancelSignal::never())
        .await
        .unwrap();
    let outdir = outdir_of(&pdf.pdf_bytes);
    assert!(outdir.is_absolute(), "got: {}", outdir.display());
    assert!(!outdir.exists(), "{} should be gone", outdir.display());
}

#[tokio::test]
async fn concurrent_conversions_do_not_share_state() {
    let s = scripts();
    let orch = orchestrator(&s.ok, Duration::from_secs(10));
    let first = docx("first.docx", b"first-body");
    let second = docx("second.pptx", b"second-body");
    let never = CancelSignal::never();

    let (a, b) = tokio::join!(orch.convert(&first, &never), orch.convert(&second, &never));
    let (a, b) = (a.unwrap(), b.unwrap());

    assert!(a.pdf_bytes.ends_with(b"first-body"));
    assert!(b.pdf_bytes.ends_with(b"second-body"));
    assert_eq!(a.suggested_filename, "first.pdf");
    assert_eq!(b.suggested_filename, "second.pdf");
    assert_ne!(outdir_of(&a.pdf_bytes), outdir_of(&b.pdf_bytes));
}

#[tokio::test]
async fn converting_twice_gives_the_same_document() {
    let s = scripts();
    let orch = orchestrator(&s.ok, Duration::from_secs(10));
    let doc = docx("same.docx", b"stable-body");

    let one = orch.convert(&doc, &CancelSignal::never()).await.unwrap();
    let two = orch.convert(&doc, &CancelSignal::never()).await.unwrap();

    assert!(one.pdf_bytes.ends_with(b"stable-body"));
    assert!(two.pdf_bytes.ends_with(b"stable-body"));
    assert_eq!(one.suggested_filename, two.suggested_filename);
    // The upload itself is left untouched.
    assert_eq!(&doc.read_bytes().await.unwrap()[..], b"stable-body");
}

#[tokio::test]
async fn spooled_upload_is_copied_not_moved() {
    let s = scripts();
    let orch = orchestrator(&s.ok, Duration::from_secs(10));

    let spool = tempfile::NamedTempFile::new_in(&s.dir).unwrap();
    std::fs::write(spool.path(), b"spooled-body").unwrap();
    let spool = spool.into_temp_path();
    let spool_path = spool.to_path_buf();
    let doc = UploadedDocument {
        filename: "big.pptx".to_string(),
        mime_type: "application/octet-stream".to_string(),
        size_bytes: 12,
        body: DocumentBody::Spooled(spool),
    };

    let pdf = orch.convert(&doc, &CancelSignal::never()).await.unwrap();
    assert!(pdf.pdf_bytes.ends_with(b"spooled-body"));
    assert_eq!(pdf.suggested_filename, "big.pdf");
    assert!(spool_path.exists());

    drop(doc);
    assert!(!spool_path.exists());
}

#[tokio::test]
async fn non_zero_exit_reports_stderr() {
    let s = scripts();
    let orch = orchestrator(&s.fail, Duration::from_secs(10));

    let outcome = orch
        .run(&docx("broken.docx", b"x"), &CancelSignal::never())
        .await;
    assert_eq!(outcome.failed_during, Some(Stage::Submitting));
    assert_eq!(outcome.job.state(), JobState::Failed);
    match outcome.result.unwrap_err() {
        ConvertError::ProcessFailed { code, stderr } => {
            assert_eq!(code, Some(77));
            assert!(stderr.contains("could not be loaded"), "got: {stderr}");
        }
        other => panic!("expected ProcessFailed, got {other:?}"),
    }
}

#[tokio::test]
async fn missing_converter_is_backend_unavailable() {
    let s = scripts();
    let orch = orchestrator(&s.dir.join("no-such-soffice"), Duration::from_secs(10));

    let err = orch
        .convert(&docx("a.docx", b"a"), &CancelSignal::never())
        .await
        .unwrap_err();
    assert!(
        matches!(err, ConvertError::BackendUnavailable { .. }),
        "got: {err:?}"
    );
    assert_eq!(err.kind(), ErrorKind::BackendUnavailable);
}

#[tokio::test]
async fn clean_exit_without_output_is_result_unavailable() {
    let s = scripts();
    let orch = orchestrator(&s.nothing, Duration::from_secs(10));

    let outcome = orch
        .run(&docx("a.docx", b"a"), &CancelSignal::never())
        .await;
    assert_eq!(outcome.failed_during, Some(Stage::Fetching));
    assert_eq!(
        outcome.result.unwrap_err().kind(),
        ErrorKind::ResultUnavailable
    );
}

#[tokio::test]
async fn hung_converter_is_killed_at_timeout() {
    let s = scripts();
    let orch = orchestrator(&s.hang, Duration::from_secs(1));

    let start = std::time::Instant::now();
    let err = orch
        .convert(&docx("slow.docx", b"a"), &CancelSignal::never())
        .await
        .unwrap_err();
    assert!(
        matches!(err, ConvertError::ProcessTimeout { secs: 1 }),
        "got: {err:?}"
    );
    assert_eq!(err.kind(), ErrorKind::Timeout);
    assert!(start.elapsed() < Duration::from_secs(4));
}
