// tests/fetch_workflow.rs

//! Distfile mirroring into a local directory

mod common;

use common::{LocalVcs, Route, TestServer, TreeScanner, distfile, init_kit, write_ebuild};
use mark_devkit::fetcher::{DirFetcher, Downloader, FetchOptions, Fetcher};
use mark_devkit::hash::{HashAlgorithm, hash_file};
use mark_devkit::http::{HttpClient, HttpOptions};
use mark_devkit::specs::DistfilesSpec;
use mark_devkit::{MergeBot, MergeOptions};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

const CONTENT: &[u8] = b"x distfile content";

struct Fixture {
    tmp: TempDir,
    spec: DistfilesSpec,
    target: PathBuf,
    server: TestServer,
}

/// mark-kit with `dev-lang/x-1.0` fetching `mirror://macaroni/x.tar.gz`
///
/// The first mirror base answers 404, the second serves `ok_body`.
fn fixture(ok_body: &[u8]) -> Fixture {
    let tmp = TempDir::new().unwrap();
    let server = TestServer::start();
    server.route("/ok/x.tar.gz", Route::ok(ok_body.to_vec()));

    let target = tmp.path().join("origin/mark-kit");
    init_kit(&target, "mark-kit");
    let mut file = distfile("x.tar.gz", "https://unused.example/x.tar.gz", CONTENT);
    file.src_uri = vec!["mirror://macaroni/x.tar.gz".to_string()];
    write_ebuild(&target, "dev-lang/x", "1.0", "amd64", &[file]);

    let spec_path = tmp.path().join("distfiles.yml");
    fs::write(
        &spec_path,
        format!(
            "target:\n  name: mark-kit\n  url: {}\n  branch: mark-v1\n  thirdpartymirrors:\n    - name: macaroni\n      uri:\n        - {}\n        - {}\n  atoms:\n    - pkg: dev-lang/x\n",
            target.display(),
            server.url("/down/"),
            server.url("/ok/")
        ),
    )
    .unwrap();
    let spec = DistfilesSpec::load(&spec_path).unwrap();

    Fixture {
        tmp,
        spec,
        target,
        server,
    }
}

fn client() -> HttpClient {
    HttpClient::new(&HttpOptions {
        timeout: Duration::from_secs(5),
        retries: 1,
        retry_delay: Duration::from_millis(10),
        ..Default::default()
    })
    .unwrap()
}

fn run(fx: &Fixture, download_dir: &Path) -> (DirFetcher, mark_devkit::fetcher::FetchReport) {
    let vcs = Arc::new(LocalVcs::new());
    vcs.add_branch(&fx.target, "mark-v1");
    let bot = MergeBot::new(vcs, Arc::new(TreeScanner::new()));
    let opts = MergeOptions {
        work_dir: fx.tmp.path().join("work"),
        ..Default::default()
    };
    let ws = bot.prepare(&fx.spec.kit, &opts).unwrap();

    let downloader = Downloader::new(client()).with_mirrors(fx.spec.kit.mirrors());
    let fetcher = DirFetcher::new(download_dir.to_path_buf(), downloader);
    let report = fetcher.sync(&fx.spec, &ws.target, &FetchOptions::default()).unwrap();
    ws.cleanup().unwrap();
    (fetcher, report)
}

#[test]
fn test_mirror_failover() {
    let fx = fixture(CONTENT);
    let download_dir = fx.tmp.path().join("download");

    let (fetcher, report) = run(&fx, &download_dir);

    assert_eq!(report.tot_atoms, 1);
    assert_eq!(report.tot_errors, 0);
    assert!(report.is_success());
    assert_eq!(report.tot_bytes, CONTENT.len() as u64);

    let requests = fx.server.requests();
    let down = requests.iter().position(|r| r == "GET /down/x.tar.gz").unwrap();
    let ok = requests.iter().position(|r| r == "GET /ok/x.tar.gz").unwrap();
    assert!(down < ok);

    let expected = distfile("x.tar.gz", "", CONTENT);
    let local = hash_file(&download_dir.join("x.tar.gz"), &[HashAlgorithm::Sha512]).unwrap();
    assert_eq!(local.get(HashAlgorithm::Sha512), expected.sha512());
    assert_eq!(fetcher.files_list().unwrap(), vec!["x.tar.gz".to_string()]);
}

#[test]
fn test_verified_file_is_reused() {
    let fx = fixture(CONTENT);
    let download_dir = fx.tmp.path().join("download");

    run(&fx, &download_dir);
    let fetched = fx.server.requests().len();

    let (_, report) = run(&fx, &download_dir);
    assert_eq!(report.tot_errors, 0);
    assert_eq!(report.tot_bytes, 0);
    assert_eq!(fx.server.requests().len(), fetched);
}

#[test]
fn test_digest_mismatch_is_recorded() {
    let fx = fixture(b"tampered content");
    let download_dir = fx.tmp.path().join("download");

    let (fetcher, report) = run(&fx, &download_dir);

    assert_eq!(report.tot_atoms, 1);
    assert_eq!(report.tot_errors, 1);
    assert!(!report.is_success());
    let errors = fetcher.atoms_in_error();
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].atom, "dev-lang/x-1.0");
    assert!(!download_dir.join("x.tar.gz").exists());
}

#[test]
fn test_tampered_mirror_falls_through_to_next() {
    let mut fx = fixture(CONTENT);
    fx.server.route("/bad/x.tar.gz", Route::ok(b"tampered content".to_vec()));
    fx.spec.kit.target.thirdpartymirrors[0].uri = vec![fx.server.url("/bad/"), fx.server.url("/ok/")];
    let download_dir = fx.tmp.path().join("download");

    let (fetcher, report) = run(&fx, &download_dir);

    assert_eq!(report.tot_errors, 0);
    assert!(fetcher.atoms_in_error().is_empty());
    let requests = fx.server.requests();
    let bad = requests.iter().position(|r| r == "GET /bad/x.tar.gz").unwrap();
    let ok = requests.iter().position(|r| r == "GET /ok/x.tar.gz").unwrap();
    assert!(bad < ok);
    assert_eq!(fs::read(download_dir.join("x.tar.gz")).unwrap(), CONTENT);
}

#[test]
fn test_dry_run_downloads_nothing() {
    let fx = fixture(CONTENT);
    let download_dir = fx.tmp.path().join("download");

    let vcs = Arc::new(LocalVcs::new());
    vcs.add_branch(&fx.target, "mark-v1");
    let bot = MergeBot::new(vcs, Arc::new(TreeScanner::new()));
    let ws = bot
        .prepare(
            &fx.spec.kit,
            &MergeOptions {
                work_dir: fx.tmp.path().join("work"),
                ..Default::default()
            },
        )
        .unwrap();
    let fetcher = DirFetcher::new(download_dir.clone(), Downloader::new(client()));
    let opts = FetchOptions {
        dry_run: true,
        ..Default::default()
    };
    let report = fetcher.sync(&fx.spec, &ws.target, &opts).unwrap();

    assert_eq!(report.tot_errors, 0);
    assert!(fx.server.requests().is_empty());
    assert!(fetcher.files_list().unwrap().is_empty());
}
