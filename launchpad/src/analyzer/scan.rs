//! Repository scanning: manifests, entry files and ports

use std::collections::BTreeSet;
use std::fs;
use std::path::Path;
use std::sync::LazyLock;

use regex::Regex;
use sha2::{Digest, Sha256};
use walkdir::{DirEntry, WalkDir};

use crate::analyzer::rules::Signals;
use crate::errors::DeployError;
use crate::models::framework::Language;

/// Detection looks at the root and two levels below it
pub const SCAN_DEPTH: usize = 3;

/// Entry files larger than this are not read
const MAX_SOURCE_BYTES: u64 = 512 * 1024;

const IGNORED_DIRS: &[&str] = &[
    ".git",
    "node_modules",
    "venv",
    ".venv",
    "env",
    "__pycache__",
    "vendor",
    "target",
    "dist",
    "build",
    ".next",
];

const TEST_DIRS: &[&str] = &["tests", "test", "__tests__", "spec", "specs", "fixtures", "testdata"];

const ENTRY_FILES: &[&str] = &[
    "app.py",
    "main.py",
    "server.py",
    "run.py",
    "wsgi.py",
    "asgi.py",
    "application.py",
    "manage.py",
    "app.js",
    "server.js",
    "index.js",
    "main.js",
    "app.ts",
    "server.ts",
    "index.php",
];

const CONFIG_FILES: &[&str] = &[
    ".env",
    "config.py",
    "settings.py",
    "config.js",
    "config.json",
    "next.config.js",
    "next.config.mjs",
    "vue.config.js",
    "vite.config.js",
    "vite.config.ts",
    "application.properties",
    "application.yml",
    "application.yaml",
];

const MANIFESTS: &[(&str, Language)] = &[
    ("requirements.txt", Language::Python),
    ("pyproject.toml", Language::Python),
    ("setup.py", Language::Python),
    ("Pipfile", Language::Python),
    ("package.json", Language::Nodejs),
    ("pom.xml", Language::Java),
    ("build.gradle", Language::Java),
    ("build.gradle.kts", Language::Java),
    ("composer.json", Language::Php),
];

const CONTAINER_DESCRIPTORS: &[&str] = &[
    "Dockerfile",
    "docker-compose.yml",
    "docker-compose.yaml",
    "compose.yml",
    "compose.yaml",
];

static PORT_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r"(?i)\bport\s*[=:]\s*(\d{2,5})\b",
        r"\.listen\(\s*(\d{2,5})\b",
        r"process\.env\.PORT\s*\|\|\s*(\d{2,5})\b",
        r"--port[= ](\d{2,5})\b",
        r"\bserver\.port\s*=\s*(\d{2,5})\b",
    ]
    .iter()
    .filter_map(|pattern| Regex::new(pattern).ok())
    .collect()
});

/// Everything the analyzer learns from walking the repository
#[derive(Debug, Clone, Default)]
pub struct ScanResult {
    pub signals: Signals,
    pub digest: String,
    pub file_count: usize,
    pub manifests: Vec<String>,
    pub manifest_languages: Vec<Language>,
    pub entry_points: Vec<String>,
    pub config_files: Vec<String>,
    pub container_descriptor: Option<String>,
    pub detected_port: Option<u16>,
}

fn is_ignored(entry: &DirEntry) -> bool {
    entry.depth() > 0
        && entry.file_type().is_dir()
        && IGNORED_DIRS
            .iter()
            .any(|ignored| entry.file_name().to_string_lossy() == *ignored)
}

fn relative(root: &Path, path: &Path) -> String {
    let rel = path.strip_prefix(root).unwrap_or(path);
    rel.components()
        .map(|c| c.as_os_str().to_string_lossy().to_string())
        .collect::<Vec<_>>()
        .join("/")
}

/// Walk the repository rooted at `root`
///
/// Every file outside the ignored directories feeds the digest. Only files
/// within `SCAN_DEPTH` feed detection.
pub fn scan(root: &Path) -> Result<ScanResult, DeployError> {
    let mut result = ScanResult::default();
    let mut hasher = Sha256::new();

    let walker = WalkDir::new(root)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|entry| !is_ignored(entry));

    for entry in walker {
        let entry = entry.map_err(|e| DeployError::IoError(e.into()))?;
        if !entry.file_type().is_file() {
            continue;
        }

        let rel = relative(root, entry.path());
        let contents = fs::read(entry.path())?;
        hasher.update(rel.as_bytes());
        hasher.update([0u8]);
        hasher.update(&contents);
        hasher.update([0u8]);
        result.file_count += 1;

        if entry.depth() > SCAN_DEPTH {
            continue;
        }
        classify(&mut result, &rel, entry.file_name().to_string_lossy().as_ref(), &contents);
    }

    result.digest = format!("{:x}", hasher.finalize());
    result.detected_port = detect_port(&result);
    result.manifests.sort_by_key(|path| (path.matches('/').count(), path.clone()));
    Ok(result)
}

fn classify(result: &mut ScanResult, rel: &str, name: &str, contents: &[u8]) {
    result.signals.files.insert(rel.to_string());

    if let Some(language) = manifest_language(name) {
        result.manifests.push(rel.to_string());
        if !result.manifest_languages.contains(&language) {
            result.manifest_languages.push(language);
        }
        let text = String::from_utf8_lossy(contents);
        result
            .signals
            .dependencies
            .extend(parse_manifest(name, &text));
    }

    if in_test_tree(rel) {
        return;
    }

    if ENTRY_FILES.contains(&name) {
        result.entry_points.push(rel.to_string());
        if (contents.len() as u64) <= MAX_SOURCE_BYTES {
            result
                .signals
                .entry_sources
                .insert(rel.to_string(), String::from_utf8_lossy(contents).to_string());
        }
    }

    if CONFIG_FILES.contains(&name) {
        result.config_files.push(rel.to_string());
    }

    if result.container_descriptor.is_none()
        && !rel.contains('/')
        && CONTAINER_DESCRIPTORS.contains(&name)
    {
        result.container_descriptor = Some(rel.to_string());
    }
}

/// Whether the path sits under a test or fixture directory, whose sources
/// are never entry points or runtime configuration
fn in_test_tree(rel: &str) -> bool {
    let mut dirs = rel.split('/').collect::<Vec<_>>();
    dirs.pop();
    dirs.iter().any(|dir| TEST_DIRS.contains(dir))
}

/// Whether a top-level name marks its directory as a repository root
pub fn is_root_marker(name: &str) -> bool {
    manifest_language(name).is_some()
        || ENTRY_FILES.contains(&name)
        || CONTAINER_DESCRIPTORS.contains(&name)
}

/// Language of a manifest file name
pub fn manifest_language(name: &str) -> Option<Language> {
    MANIFESTS
        .iter()
        .find(|(manifest, _)| *manifest == name)
        .map(|(_, language)| *language)
}

/// Dependency names declared by a manifest, lowercased
pub fn parse_manifest(name: &str, text: &str) -> BTreeSet<String> {
    match name {
        "requirements.txt" => parse_requirements(text),
        "package.json" => json_keys(text, &["dependencies", "devDependencies"]),
        "composer.json" => json_keys(text, &["require"]),
        _ => BTreeSet::new(),
    }
}

fn parse_requirements(text: &str) -> BTreeSet<String> {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#') && !line.starts_with('-'))
        .filter_map(|line| {
            let end = line
                .find(|c: char| "<>=!~;[ @".contains(c))
                .unwrap_or(line.len());
            let name = line[..end].trim();
            (!name.is_empty()).then(|| name.to_lowercase().replace('_', "-"))
        })
        .collect()
}

fn json_keys(text: &str, sections: &[&str]) -> BTreeSet<String> {
    let Ok(value) = serde_json::from_str::<serde_json::Value>(text) else {
        return BTreeSet::new();
    };
    sections
        .iter()
        .filter_map(|section| value.get(section).and_then(|v| v.as_object()))
        .flat_map(|map| map.keys().map(|k| k.to_lowercase()))
        .collect()
}

fn detect_port(result: &ScanResult) -> Option<u16> {
    result
        .signals
        .entry_sources
        .values()
        .find_map(|source| find_port(source))
}

/// First plausible port literal in the source
pub fn find_port(source: &str) -> Option<u16> {
    PORT_PATTERNS.iter().find_map(|pattern| {
        pattern.captures_iter(source).find_map(|caps| {
            caps.get(1)
                .and_then(|m| m.as_str().parse::<u16>().ok())
                .filter(|port| *port >= 80)
        })
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_requirements_strip_specifiers() {
        let deps = parse_requirements(
            "# web\nFlask==2.3.2\ngunicorn>=20\n-r base.txt\nflask_cors ; python_version > '3'\nrequests[socks]\n",
        );
        let deps: Vec<_> = deps.into_iter().collect();
        assert_eq!(deps, vec!["flask", "flask-cors", "gunicorn", "requests"]);
    }

    #[test]
    fn test_package_json_dependencies() {
        let deps = parse_manifest(
            "package.json",
            r#"{"dependencies": {"express": "^4"}, "devDependencies": {"nodemon": "^3"}}"#,
        );
        assert!(deps.contains("express"));
        assert!(deps.contains("nodemon"));
        assert!(parse_manifest("package.json", "{not json").is_empty());
    }

    #[test]
    fn test_test_trees_are_not_targets() {
        assert!(in_test_tree("tests/app.py"));
        assert!(in_test_tree("src/__tests__/server.js"));
        assert!(!in_test_tree("app.py"));
        assert!(!in_test_tree("backend/tests.py"));
    }

    #[test]
    fn test_find_port() {
        assert_eq!(find_port("app.run(host='127.0.0.1', port=5000)"), Some(5000));
        assert_eq!(find_port("app.listen(3001, () => {})"), Some(3001));
        assert_eq!(find_port("const port = process.env.PORT || 4000;"), Some(4000));
        assert_eq!(find_port("print('hello')"), None);
    }

    #[test]
    fn test_scan_ignores_vendored_dirs_and_sorts() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        fs::write(root.join("app.py"), "from flask import Flask\napp.run(port=5001)\n").unwrap();
        fs::write(root.join("requirements.txt"), "flask\n").unwrap();
        fs::create_dir_all(root.join("node_modules/express")).unwrap();
        fs::write(root.join("node_modules/express/index.js"), "x").unwrap();

        let result = scan(root).unwrap();
        assert_eq!(result.file_count, 2);
        assert_eq!(result.entry_points, vec!["app.py"]);
        assert_eq!(result.manifests, vec!["requirements.txt"]);
        assert_eq!(result.manifest_languages, vec![Language::Python]);
        assert_eq!(result.detected_port, Some(5001));
        assert!(result.signals.dependencies.contains("flask"));
    }
}
