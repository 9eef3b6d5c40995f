use std::fs;
use std::sync::mpsc;
use std::thread;
use std::time::Duration;

use novelfetch::pipeline::{ChapterError, ChapterStatus};
use novelfetch::{
    download_novel, BookmarkStore, ChapterFormat, DirectClient, DownloadOptions, FetchError,
    Fetcher, NovelStore, TocTier,
};

const CHAPTERS: usize = 4;

fn chapter_page(n: usize) -> String {
    let paragraphs: String = (1..=4)
        .map(|p| {
            format!("<p>Chapter {n} paragraph {p}: the caravan kept moving through the dunes at dusk.</p>")
        })
        .collect();
    format!(
        r#"<!doctype html>
<html>
  <head><title>Chapter {n} - Sand Road</title></head>
  <body>
    <nav><a href="/novel/">Index</a></nav>
    <h1>Chapter {n}</h1>
    <div id="chapter-content">
      {paragraphs}
      <p>Next Chapter</p>
    </div>
  </body>
</html>
"#
    )
}

fn index_page() -> String {
    // Listed out of order; the anchor scan sorts numerically.
    let links: String = [10, 2, 1, 3]
        .iter()
        .take(CHAPTERS)
        .map(|n| format!("<a href=\"/novel/chapter-{n}\">Chapter {n}</a>\n"))
        .collect();
    format!(
        r#"<!doctype html>
<html>
  <head><meta property="og:title" content="Sand Road"><title>Sand Road | Reader</title></head>
  <body>
    <h1>Sand Road</h1>
    {links}
    <a href="/about">About</a>
  </body>
</html>
"#
    )
}

/// Index whose third chapter lives on a port nothing listens on.
fn unreachable_chapter_index(base_url: &str) -> String {
    format!(
        r#"<html>
  <head><title>Dead Link</title></head>
  <body>
    <a href="{base_url}/novel/chapter-1">Chapter 1</a>
    <a href="{base_url}/novel/chapter-2">Chapter 2</a>
    <a href="http://127.0.0.1:1/novel/chapter-3">Chapter 3</a>
  </body>
</html>
"#
    )
}

fn spawn_novel_server() -> (String, mpsc::Sender<()>, thread::JoinHandle<()>) {
    let server = tiny_http::Server::http("127.0.0.1:0").expect("start tiny_http server");
    let base_url = format!("http://{}", server.server_addr());
    let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>();
    let base = base_url.clone();

    let handle = thread::spawn(move || loop {
        if shutdown_rx.try_recv().is_ok() {
            break;
        }
        let request = match server.recv_timeout(Duration::from_millis(50)) {
            Ok(Some(req)) => req,
            Ok(None) => continue,
            Err(_) => break,
        };
        let path = request.url().to_string();
        let (status, body) = match path.as_str() {
            "/novel/" => (200, index_page()),
            "/dead-link/" => (200, unreachable_chapter_index(&base)),
            // Chapter 3 is down.
            "/novel/chapter-3" => (500, "internal error".to_string()),
            p => match p
                .strip_prefix("/novel/chapter-")
                .and_then(|n| n.parse::<usize>().ok())
            {
                Some(n) => (200, chapter_page(n)),
                None => (404, "not found".to_string()),
            },
        };
        let _ = request.respond(tiny_http::Response::from_string(body).with_status_code(status));
    });

    (base_url, shutdown_tx, handle)
}

#[test]
fn downloads_a_novel_end_to_end_over_http() -> Result<(), Box<dyn std::error::Error>> {
    let (base_url, shutdown, handle) = spawn_novel_server();
    let out = tempfile::tempdir()?;
    let store = NovelStore::new(out.path());
    let mut fetcher = Fetcher::new(DirectClient::builder().timeout_secs(5).build()?, None);
    let options = DownloadOptions {
        delay: Duration::ZERO,
        format: ChapterFormat::Markdown,
        ..DownloadOptions::default()
    };

    let report = download_novel(&mut fetcher, &store, &format!("{base_url}/novel/"), &options)?;
    let _ = shutdown.send(());
    let _ = handle.join();

    assert_eq!(report.novel.title(), "Sand Road");
    assert_eq!(report.tier, TocTier::AnchorScan);
    assert_eq!(report.total_chapters, CHAPTERS);
    assert_eq!(report.saved_count(), 3);
    assert_eq!(report.failed_count(), 1);

    let order: Vec<u32> = report.chapters.iter().map(|c| c.chapter.index).collect();
    assert_eq!(order, vec![1, 2, 3, 4]);
    let paths: Vec<String> = report
        .chapters
        .iter()
        .map(|c| c.chapter.url.path().to_string())
        .collect();
    assert_eq!(
        paths,
        vec!["/novel/chapter-1", "/novel/chapter-2", "/novel/chapter-3", "/novel/chapter-10"]
    );
    assert!(matches!(report.chapters[2].status, ChapterStatus::Failed(_)));

    let folder = out.path().join("Sand Road");
    assert_eq!(report.folder, folder);
    assert!(folder.join("raw_chapter_3.html").is_file());

    let first = fs::read_to_string(folder.join("Chapter 1.md"))?;
    assert!(first.starts_with("# Chapter 1\n\n"));
    assert!(first.contains("paragraph 4"));
    assert!(!first.contains("Next Chapter"));

    let metadata: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(folder.join("metadata.json"))?)?;
    assert_eq!(metadata["title"], "Sand Road");
    let titles: Vec<&str> = metadata["chapters"]
        .as_array()
        .ok_or("chapters is not an array")?
        .iter()
        .filter_map(|c| c["title"].as_str())
        .collect();
    assert_eq!(titles, vec!["Chapter 1", "Chapter 2", "Chapter 10"]);

    let listed = store.list_chapters()?;
    assert_eq!(listed.len(), 3);
    assert_eq!(listed[0], folder.join("Chapter 1.md"));

    let bookmarks = BookmarkStore::in_dir(out.path())?;
    assert_eq!(bookmarks.get(&listed[0]), None);
    Ok(())
}

#[test]
fn unreachable_chapter_is_a_network_failure() -> Result<(), Box<dyn std::error::Error>> {
    let (base_url, shutdown, handle) = spawn_novel_server();
    let out = tempfile::tempdir()?;
    let store = NovelStore::new(out.path());
    let mut fetcher = Fetcher::new(DirectClient::builder().timeout_secs(5).build()?, None);
    let options = DownloadOptions {
        delay: Duration::ZERO,
        ..DownloadOptions::default()
    };

    let index_url = format!("{base_url}/dead-link/");
    let report = download_novel(&mut fetcher, &store, &index_url, &options)?;
    let _ = shutdown.send(());
    let _ = handle.join();

    assert_eq!(report.total_chapters, 3);
    assert_eq!(report.saved_count(), 2);
    assert!(matches!(
        report.chapters[2].status,
        ChapterStatus::Failed(ChapterError::Fetch(FetchError::Network { .. }))
    ));
    let artifact = fs::read_to_string(report.folder.join("raw_chapter_3.html"))?;
    assert!(artifact.contains("127.0.0.1:1"));
    assert_eq!(store.list_chapters()?.len(), 2);
    Ok(())
}
