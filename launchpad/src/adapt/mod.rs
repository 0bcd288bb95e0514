//! Source adaptation for public reachability
//!
//! Three pattern families are rewritten, in this priority order when matches
//! overlap: bind addresses become `0.0.0.0`, local URLs and bare
//! `localhost:port` pairs point at the public address. Text already in the
//! target form is recorded as a zero-effect edit and left alone.

use std::ops::Range;
use std::sync::LazyLock;

use regex::Regex;
use tracing::{debug, info, warn};

use crate::errors::DeployError;
use crate::filesys::file::File;
use crate::models::adaptation::{AdaptationEdit, AdaptationFailure, AdaptationResult, PatternKind};
use crate::models::infra::ProvisionedInfrastructure;
use crate::models::snapshot::RepositorySnapshot;

/// Address every rewritten bind uses
pub const ANY_ADDRESS: &str = "0.0.0.0";

static BIND_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r#"(?P<pre>\b(?i:host|bind|hostname)\s*[=:]\s*["']?)(?P<addr>127\.0\.0\.1|localhost|0\.0\.0\.0)(?P<post>["']?)"#,
        r#"(?P<pre>\.listen\(\s*[\w.]+\s*,\s*["'])(?P<addr>127\.0\.0\.1|localhost|0\.0\.0\.0)(?P<post>["'])"#,
    ]
    .iter()
    .filter_map(|pattern| Regex::new(pattern).ok())
    .collect()
});

static LOCAL_URL: LazyLock<Option<Regex>> = LazyLock::new(|| {
    Regex::new(r"(?P<scheme>https?://)(?P<host>localhost|127\.0\.0\.1)(?P<port>:\d{1,5})?\b").ok()
});

static HOST_PORT: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"\b(?P<host>localhost|127\.0\.0\.1):(?P<port>\d{2,5})\b").ok());

/// A candidate edit inside one line
#[derive(Debug, Clone)]
struct LineEdit {
    span: Range<usize>,
    pattern: PatternKind,
    original: String,
    replacement: String,
}

/// Matchers for the already-adapted forms, built once per public address
struct AdaptedForms {
    public_url: Option<Regex>,
    public_host_port: Option<Regex>,
    public_address: String,
}

impl AdaptedForms {
    fn new(public_address: &str) -> Self {
        let escaped = regex::escape(public_address);
        Self {
            public_url: Regex::new(&format!(r"https?://{}(?::\d{{1,5}})?\b", escaped)).ok(),
            public_host_port: Regex::new(&format!(r"\b{}:\d{{2,5}}\b", escaped)).ok(),
            public_address: public_address.to_string(),
        }
    }
}

/// Rewrites local-only addresses in entry and configuration files
#[derive(Debug, Default)]
pub struct CodeAdapter;

impl CodeAdapter {
    pub fn new() -> Self {
        Self
    }

    /// Adapt every entry point and configuration file of the snapshot
    ///
    /// Never fails as a whole; unreadable or unwritable files are listed in
    /// `AdaptationResult::failures`.
    pub async fn adapt(
        &self,
        snapshot: &RepositorySnapshot,
        infra: &ProvisionedInfrastructure,
    ) -> AdaptationResult {
        let forms = AdaptedForms::new(&infra.public_address);
        let mut result = AdaptationResult::default();

        for rel in snapshot.adaptation_targets() {
            let file = File::new(snapshot.root.join(&rel));
            let source = match file.read_bytes().await {
                Ok(bytes) => match String::from_utf8(bytes) {
                    Ok(text) => text,
                    Err(_) => {
                        result.failures.push(AdaptationFailure {
                            file: rel,
                            reason: "not valid UTF-8".to_string(),
                        });
                        continue;
                    }
                },
                Err(e) => {
                    result.failures.push(AdaptationFailure {
                        file: rel,
                        reason: e.to_string(),
                    });
                    continue;
                }
            };

            let (adapted, edits) = adapt_source(&rel, &source, &forms);
            let changed = adapted != source;
            if changed {
                if let Err(e) = file.write_atomic(adapted.as_bytes()).await {
                    warn!("Unable to rewrite {}: {}", rel, e);
                    result.failures.push(AdaptationFailure {
                        file: rel,
                        reason: e.to_string(),
                    });
                    continue;
                }
            }
            debug!("{}: {} edit(s), changed: {}", rel, edits.len(), changed);
            result.edits.extend(edits);
        }

        info!(
            "Adaptation: {} effective edit(s), {} zero-effect, {} failure(s)",
            result.effective_edits().count(),
            result.edits.len() - result.effective_edits().count(),
            result.failures.len()
        );
        result
    }
}

/// The partial-failure error for a result, if any file failed
pub fn partial_failure(result: &AdaptationResult) -> Option<DeployError> {
    result.is_partial().then(|| DeployError::AdaptationPartialFailure {
        files: result.failures.iter().map(|f| f.file.clone()).collect(),
    })
}

/// Rewrite one file's text and report every match
fn adapt_source(
    rel: &str,
    source: &str,
    forms: &AdaptedForms,
) -> (String, Vec<AdaptationEdit>) {
    let mut output = String::with_capacity(source.len());
    let mut edits = Vec::new();

    for (index, line) in source.split_inclusive('\n').enumerate() {
        let line_edits = find_edits(line, forms);
        let mut cursor = 0;
        for edit in &line_edits {
            output.push_str(&line[cursor..edit.span.start]);
            output.push_str(&edit.replacement);
            cursor = edit.span.end;
        }
        output.push_str(&line[cursor..]);

        edits.extend(line_edits.into_iter().map(|edit| AdaptationEdit {
            file: rel.to_string(),
            line: index + 1,
            pattern: edit.pattern,
            original: edit.original,
            replacement: edit.replacement,
        }));
    }

    (output, edits)
}

/// Non-overlapping edits in one line, ordered by position
fn find_edits(line: &str, forms: &AdaptedForms) -> Vec<LineEdit> {
    let mut found: Vec<LineEdit> = Vec::new();
    let mut push = |edit: LineEdit| {
        let overlaps = found
            .iter()
            .any(|e| e.span.start < edit.span.end && edit.span.start < e.span.end);
        if !overlaps {
            found.push(edit);
        }
    };

    for pattern in BIND_PATTERNS.iter() {
        for caps in pattern.captures_iter(line) {
            let (Some(whole), Some(pre), Some(post)) = (caps.get(0), caps.name("pre"), caps.name("post"))
            else {
                continue;
            };
            push(LineEdit {
                span: whole.range(),
                pattern: PatternKind::BindAddress,
                original: whole.as_str().to_string(),
                replacement: format!("{}{}{}", pre.as_str(), ANY_ADDRESS, post.as_str()),
            });
        }
    }

    if let Some(public_url) = &forms.public_url {
        for m in public_url.find_iter(line) {
            push(zero_effect(m.range(), m.as_str(), PatternKind::LocalUrl));
        }
    }
    if let Some(local_url) = LOCAL_URL.as_ref() {
        for caps in local_url.captures_iter(line) {
            let (Some(whole), Some(scheme)) = (caps.get(0), caps.name("scheme")) else {
                continue;
            };
            let port = caps.name("port").map(|p| p.as_str()).unwrap_or("");
            push(LineEdit {
                span: whole.range(),
                pattern: PatternKind::LocalUrl,
                original: whole.as_str().to_string(),
                replacement: format!("{}{}{}", scheme.as_str(), forms.public_address, port),
            });
        }
    }

    if let Some(public_host_port) = &forms.public_host_port {
        for m in public_host_port.find_iter(line) {
            if !after_scheme(line, m.start()) {
                push(zero_effect(m.range(), m.as_str(), PatternKind::HostPort));
            }
        }
    }
    if let Some(host_port) = HOST_PORT.as_ref() {
        for caps in host_port.captures_iter(line) {
            let (Some(whole), Some(port)) = (caps.get(0), caps.name("port")) else {
                continue;
            };
            if after_scheme(line, whole.start()) {
                continue;
            }
            push(LineEdit {
                span: whole.range(),
                pattern: PatternKind::HostPort,
                original: whole.as_str().to_string(),
                replacement: format!("{}:{}", forms.public_address, port.as_str()),
            });
        }
    }

    found.sort_by_key(|e| e.span.start);
    found
}

fn zero_effect(span: Range<usize>, text: &str, pattern: PatternKind) -> LineEdit {
    LineEdit {
        span,
        pattern,
        original: text.to_string(),
        replacement: text.to_string(),
    }
}

/// The regex crate has no lookbehind; URLs are left to the URL pattern
fn after_scheme(line: &str, start: usize) -> bool {
    line[..start].ends_with("//")
}
