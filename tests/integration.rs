use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;

fn shelfname_binary() -> PathBuf {
    let mut path = std::env::current_exe().unwrap();
    path.pop(); // remove test binary name
    path.pop(); // remove deps/
    path.push("shelfname");
    path
}

/// EPUB with the given Dublin Core block and, when `body` is set, one
/// spine document holding it.
fn epub_bytes(dc_metadata: &str, body: Option<&str>) -> Vec<u8> {
    let mut buf = Vec::new();
    {
        let mut zip = zip::ZipWriter::new(std::io::Cursor::new(&mut buf));
        let opts = zip::write::SimpleFileOptions::default();
        zip.start_file("mimetype", opts).unwrap();
        zip.write_all(b"application/epub+zip").unwrap();
        zip.start_file("META-INF/container.xml", opts).unwrap();
        zip.write_all(
            br#"<?xml version="1.0"?>
<container xmlns="urn:oasis:names:tc:opendocument:xmlns:container" version="1.0">
  <rootfiles><rootfile full-path="OEBPS/content.opf" media-type="application/oebps-package+xml"/></rootfiles>
</container>"#,
        )
        .unwrap();
        let (manifest, spine) = match body {
            Some(_) => (
                r#"<item id="c1" href="title.xhtml" media-type="application/xhtml+xml"/>"#,
                r#"<itemref idref="c1"/>"#,
            ),
            None => ("", ""),
        };
        zip.start_file("OEBPS/content.opf", opts).unwrap();
        write!(
            zip,
            r#"<?xml version="1.0"?>
<package xmlns="http://www.idpf.org/2007/opf" xmlns:dc="http://purl.org/dc/elements/1.1/">
<metadata>{}</metadata>
<manifest>{}</manifest>
<spine>{}</spine></package>"#,
            dc_metadata, manifest, spine
        )
        .unwrap();
        if let Some(body) = body {
            zip.start_file("OEBPS/title.xhtml", opts).unwrap();
            write!(
                zip,
                r#"<html xmlns="http://www.w3.org/1999/xhtml"><head><title>t</title></head><body>{}</body></html>"#,
                body
            )
            .unwrap();
        }
        zip.finish().unwrap();
    }
    buf
}

fn setup_test_env() -> (TempDir, PathBuf, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().to_path_buf();

    let config_dir = root.join("config");
    fs::create_dir_all(&config_dir).unwrap();

    let books = root.join("books");
    fs::create_dir_all(books.join("nested")).unwrap();
    fs::write(
        books.join("Jean-Paul Sartre - Being and Nothingness (1943).epub"),
        epub_bytes("", None),
    )
    .unwrap();
    fs::write(
        books.join("nested/scan_0042.epub"),
        epub_bytes(
            "",
            Some("<h1>Thinking in Systems</h1><p>By Donella Meadows</p><p>Copyright 2008</p>"),
        ),
    )
    .unwrap();
    fs::write(
        books.join("Some Author - Some Title.epub"),
        epub_bytes(
            "<dc:title>Some Title</dc:title><dc:creator>Some Author</dc:creator><dc:date>2011</dc:date>",
            None,
        ),
    )
    .unwrap();
    fs::write(books.join("notes.txt"), "not a book").unwrap();

    let config_content = format!(
        r#"[extraction]
advanced = true

[enhancement]
enabled = false

[years]
min = 1500
max = 2030

[cache]
path = "{}/data/cache.sqlite"
"#,
        root.display()
    );
    let config_path = config_dir.join("shelfname.toml");
    fs::write(&config_path, config_content).unwrap();

    (tmp, config_path, books)
}

fn run_shelfname(config_path: &Path, args: &[&str]) -> (String, String, bool) {
    let binary = shelfname_binary();
    let output = Command::new(&binary)
        .arg("--config")
        .arg(config_path.to_str().unwrap())
        .arg("--progress")
        .arg("off")
        .args(args)
        .env_remove("PERPLEXITY_API_KEY")
        .output()
        .unwrap_or_else(|e| panic!("Failed to run shelfname binary at {:?}: {}", binary, e));

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    (stdout, stderr, output.status.success())
}

fn file_names(dir: &Path) -> Vec<String> {
    let mut names: Vec<String> = walkdir::WalkDir::new(dir)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .map(|e| e.file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();
    names
}

#[test]
fn test_dry_run_reports_without_renaming() {
    let (_tmp, config, books) = setup_test_env();
    let before = file_names(&books);

    let (stdout, stderr, success) =
        run_shelfname(&config, &["--dry-run", "rename", books.to_str().unwrap()]);
    assert!(success, "dry run failed: {}", stderr);

    assert!(stdout.contains("Jean-Paul_Sartre_Being_and_Nothingness_1943.epub"));
    assert!(stdout.contains("Some_Author_Some_Title_2011.epub"));
    assert!(stdout.contains("3 file(s)"));
    assert!(!stdout.contains("notes.txt"), "non-matching files are not discovered");
    assert_eq!(file_names(&books), before);
}

#[test]
fn test_rename_applies_and_is_idempotent() {
    let (_tmp, config, books) = setup_test_env();

    let (_, stderr, success) = run_shelfname(&config, &["rename", books.to_str().unwrap()]);
    assert!(success, "rename failed: {}", stderr);

    let names = file_names(&books);
    assert!(names.contains(&"Jean-Paul_Sartre_Being_and_Nothingness_1943.epub".to_string()));
    assert!(names.contains(&"Some_Author_Some_Title_2011.epub".to_string()));
    assert!(names.contains(&"Donella_Meadows_Thinking_in_Systems_2008.epub".to_string()));
    assert!(names.contains(&"notes.txt".to_string()));

    // Second run: every document already carries its canonical name
    let (stdout, _, success) = run_shelfname(&config, &["rename", books.to_str().unwrap()]);
    assert!(success);
    assert!(stdout.contains("0 renamed"), "{}", stdout);
}

#[test]
fn test_json_output_is_parseable() {
    let (_tmp, config, books) = setup_test_env();

    let (stdout, stderr, success) = run_shelfname(
        &config,
        &["--dry-run", "--json", "rename", books.to_str().unwrap()],
    );
    assert!(success, "json run failed: {}", stderr);

    let doc: serde_json::Value = serde_json::from_str(&stdout).expect("valid JSON on stdout");
    assert_eq!(doc["summary"]["total"], 3);
    let outcomes = doc["outcomes"].as_array().unwrap();
    assert_eq!(outcomes.len(), 3);
    for outcome in outcomes {
        assert_eq!(outcome["status"], "dry_run");
        // every fixture reaches the threshold from local sources
        assert_eq!(outcome["enhancement"]["state"], "not_needed");
        assert!(outcome["record"]["author"].is_string());
    }
}

#[test]
fn test_inspect_shows_record() {
    let (_tmp, config, books) = setup_test_env();
    let file = books.join("nested/scan_0042.epub");

    let (stdout, stderr, success) = run_shelfname(&config, &["inspect", file.to_str().unwrap()]);
    assert!(success, "inspect failed: {}", stderr);
    assert!(stdout.contains("author: Donella Meadows"), "{}", stdout);
    assert!(stdout.contains("title:  Thinking in Systems"));
    assert!(stdout.contains("year:   2008"));
    assert!(file.exists(), "inspect never renames");
}

#[test]
fn test_use_ai_without_key_fails_before_touching_files() {
    let (_tmp, config, books) = setup_test_env();
    let before = file_names(&books);

    let (_, stderr, success) = run_shelfname(&config, &["--use-ai", "rename", books.to_str().unwrap()]);
    assert!(!success);
    assert!(stderr.contains("PERPLEXITY_API_KEY"), "{}", stderr);
    assert_eq!(file_names(&books), before);
}

#[test]
fn test_invalid_threshold_is_rejected() {
    let (_tmp, config, books) = setup_test_env();
    let (_, stderr, success) = run_shelfname(
        &config,
        &["--confidence", "1.5", "rename", books.to_str().unwrap()],
    );
    assert!(!success);
    assert!(stderr.to_lowercase().contains("threshold"), "{}", stderr);
}

#[test]
fn test_empty_input_is_an_error() {
    let (tmp, config, _books) = setup_test_env();
    let empty = tmp.path().join("empty");
    fs::create_dir_all(&empty).unwrap();

    let (_, stderr, success) = run_shelfname(&config, &["rename", empty.to_str().unwrap()]);
    assert!(!success);
    assert!(stderr.contains("No PDF or EPUB files"), "{}", stderr);
}

#[test]
fn test_cache_stats_and_clear() {
    let (_tmp, config, _books) = setup_test_env();

    let (stdout, stderr, success) = run_shelfname(&config, &["cache", "stats"]);
    assert!(success, "cache stats failed: {}", stderr);
    assert!(stdout.contains("Entries: 0"));

    let (stdout, _, success) = run_shelfname(&config, &["cache", "clear"]);
    assert!(success);
    assert!(stdout.contains("Cleared 0 cache entries."));
}
