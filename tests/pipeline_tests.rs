use chrono::NaiveDate;
use logship::source::cursor::Cursor;
use logship::source::puller::Puller;
use object_store::memory::InMemory;
use object_store::path::Path as ObjectPath;
use object_store::ObjectStore;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::mpsc;
use tokio::time::timeout;

async fn seed(store: &InMemory, key: &str, body: &str) {
    store
        .put(&ObjectPath::from(key), body.as_bytes().to_vec().into())
        .await
        .unwrap();
}

fn spawn_puller(
    store: Arc<InMemory>,
    tmpdir: &TempDir,
    state_path: PathBuf,
    page_size: usize,
) -> mpsc::Receiver<PathBuf> {
    let (tx, rx) = mpsc::channel::<PathBuf>(4);
    let puller = Puller::with_store(
        store,
        "",
        tmpdir.path(),
        &state_path,
        page_size,
        Duration::from_millis(200),
    )
    .unwrap();
    tokio::spawn(async move {
        let _ = puller.run(tx).await;
    });
    rx
}

async fn collect_downloads(rx: &mut mpsc::Receiver<PathBuf>, expected: usize) -> Vec<PathBuf> {
    let mut paths = Vec::new();
    for _ in 0..expected {
        let path = timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("timed out waiting for download")
            .expect("downloaded-files queue closed");
        paths.push(path);
    }
    paths
}

#[tokio::test]
async fn test_puller_downloads_matching_keys() {
    let store = Arc::new(InMemory::new());
    seed(&store, "nginx/access/2015-04-20/host1.log", "line one\n").await;
    seed(&store, "nginx/access/2015-04-21/host1.log", "line two\n").await;
    seed(&store, "nginx/error/2015-04-20/host1.log", "not matching\n").await;

    let tmpdir = TempDir::new().unwrap();
    let state_dir = TempDir::new().unwrap();
    let state_path = state_dir.path().join("marker.txt");

    let mut rx = spawn_puller(Arc::clone(&store), &tmpdir, state_path.clone(), 1000);

    let mut paths = collect_downloads(&mut rx, 2).await;
    paths.sort();

    assert!(paths[0].ends_with("nginx/access/2015-04-20/host1.log"));
    assert!(paths[1].ends_with("nginx/access/2015-04-21/host1.log"));
    assert_eq!(std::fs::read_to_string(&paths[0]).unwrap(), "line one\n");
    assert_eq!(std::fs::read_to_string(&paths[1]).unwrap(), "line two\n");

    // nothing else becomes eligible
    assert!(timeout(Duration::from_millis(500), rx.recv()).await.is_err());
}

#[tokio::test]
async fn test_puller_advances_cursor_frontier() {
    let store = Arc::new(InMemory::new());
    seed(&store, "nginx/access/2015-04-20/host1.log", "a\n").await;
    seed(&store, "nginx/access/2015-04-22/host1.log", "b\n").await;

    let tmpdir = TempDir::new().unwrap();
    let state_dir = TempDir::new().unwrap();
    let state_path = state_dir.path().join("marker.txt");

    let mut rx = spawn_puller(Arc::clone(&store), &tmpdir, state_path.clone(), 1000);
    collect_downloads(&mut rx, 2).await;

    // after the pass completes, the persisted frontier is the newest key date
    // and the marker has been reset for the next full pass
    timeout(Duration::from_secs(5), async {
        loop {
            if let Ok(cursor) = Cursor::load(&state_path) {
                if cursor.last_date == NaiveDate::from_ymd_opt(2015, 4, 22).unwrap()
                    && cursor.marker.is_empty()
                {
                    break;
                }
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    })
    .await
    .expect("cursor never reached the expected state");
}

#[tokio::test]
async fn test_restart_resumes_after_marker() {
    let store = Arc::new(InMemory::new());
    for n in 1..=6 {
        seed(
            &store,
            &format!("nginx/access/2015-04-20/k{}.log", n),
            &format!("body {}\n", n),
        )
        .await;
    }

    let tmpdir = TempDir::new().unwrap();
    let state_dir = TempDir::new().unwrap();
    let state_path = state_dir.path().join("marker.txt");

    // a previous run stopped after persisting k5 as its marker
    let cursor = Cursor {
        marker: "nginx/access/2015-04-20/k5.log".to_string(),
        last_date: NaiveDate::from_ymd_opt(2015, 4, 20).unwrap(),
    };
    cursor.store(&state_path).unwrap();

    // page_size 10 > remaining keys, so the first page is final and the
    // puller would then reset the marker; only k6 lies beyond the marker
    let mut rx = spawn_puller(Arc::clone(&store), &tmpdir, state_path.clone(), 10);

    let paths = collect_downloads(&mut rx, 1).await;
    assert!(paths[0].ends_with("nginx/access/2015-04-20/k6.log"));
    assert_eq!(std::fs::read_to_string(&paths[0]).unwrap(), "body 6\n");
}

#[tokio::test]
async fn test_age_filter_skips_keys_behind_frontier() {
    let store = Arc::new(InMemory::new());
    seed(&store, "nginx/access/2015-01-01/stale.log", "stale\n").await;
    seed(&store, "nginx/access/2015-04-20/fresh.log", "fresh\n").await;

    let tmpdir = TempDir::new().unwrap();
    let state_dir = TempDir::new().unwrap();
    let state_path = state_dir.path().join("marker.txt");

    // frontier already at 2015-04-20 from an earlier run
    let cursor = Cursor {
        marker: String::new(),
        last_date: NaiveDate::from_ymd_opt(2015, 4, 20).unwrap(),
    };
    cursor.store(&state_path).unwrap();

    let mut rx = spawn_puller(Arc::clone(&store), &tmpdir, state_path.clone(), 1000);

    let paths = collect_downloads(&mut rx, 1).await;
    assert!(paths[0].ends_with("nginx/access/2015-04-20/fresh.log"));

    // the stale key is never downloaded
    assert!(timeout(Duration::from_millis(500), rx.recv()).await.is_err());
    assert!(!tmpdir
        .path()
        .join("nginx/access/2015-01-01/stale.log")
        .exists());
}

#[tokio::test]
async fn test_keys_at_frontier_minus_one_day_still_accepted() {
    let store = Arc::new(InMemory::new());
    seed(&store, "nginx/access/2015-04-19/edge.log", "edge\n").await;

    let tmpdir = TempDir::new().unwrap();
    let state_dir = TempDir::new().unwrap();
    let state_path = state_dir.path().join("marker.txt");

    let cursor = Cursor {
        marker: String::new(),
        last_date: NaiveDate::from_ymd_opt(2015, 4, 20).unwrap(),
    };
    cursor.store(&state_path).unwrap();

    let mut rx = spawn_puller(Arc::clone(&store), &tmpdir, state_path.clone(), 1000);

    // 2015-04-19 == last_date - 1 day, inside the window
    let paths = collect_downloads(&mut rx, 1).await;
    assert!(paths[0].ends_with("nginx/access/2015-04-19/edge.log"));
}
