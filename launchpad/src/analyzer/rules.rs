//! Declarative framework detection rules

use std::collections::{BTreeMap, BTreeSet};

use crate::models::framework::Framework;
use crate::models::snapshot::FrameworkCandidate;

/// An import of the framework in an entry file
pub const WEIGHT_IMPORT: u32 = 5;
/// A file only this framework produces
pub const WEIGHT_MARKER: u32 = 4;
/// The framework's own package in a manifest
pub const WEIGHT_DEPENDENCY: u32 = 3;
/// A package commonly used alongside the framework
pub const WEIGHT_SUPPORTING_DEPENDENCY: u32 = 1;
/// An entry filename shared by several frameworks
pub const WEIGHT_ENTRY_FILE: u32 = 1;

/// What a rule looks for
#[derive(Debug, Clone, Copy)]
pub enum Matcher {
    /// Any entry file contains one of these source fragments
    Import(&'static [&'static str]),
    /// A declared dependency with this name
    Dependency(&'static str),
    /// A file at this relative path, or with this file name
    Marker(&'static str),
    /// An entry file with this file name
    EntryFile(&'static str),
}

/// One weighted detection rule
#[derive(Debug, Clone, Copy)]
pub struct Rule {
    pub framework: Framework,
    pub matcher: Matcher,
    pub weight: u32,
}

const fn rule(framework: Framework, matcher: Matcher, weight: u32) -> Rule {
    Rule {
        framework,
        matcher,
        weight,
    }
}

use Framework::*;
use Matcher::*;

pub const RULES: &[Rule] = &[
    // python
    rule(Flask, Import(&["from flask import", "import flask"]), WEIGHT_IMPORT),
    rule(Flask, Dependency("flask"), WEIGHT_DEPENDENCY),
    rule(Flask, EntryFile("app.py"), WEIGHT_ENTRY_FILE),
    rule(Django, Import(&["from django", "import django"]), WEIGHT_IMPORT),
    rule(Django, Dependency("django"), WEIGHT_DEPENDENCY),
    rule(Django, Marker("manage.py"), WEIGHT_MARKER),
    rule(Fastapi, Import(&["from fastapi import", "import fastapi"]), WEIGHT_IMPORT),
    rule(Fastapi, Dependency("fastapi"), WEIGHT_DEPENDENCY),
    rule(Fastapi, Dependency("uvicorn"), WEIGHT_SUPPORTING_DEPENDENCY),
    rule(Fastapi, EntryFile("main.py"), WEIGHT_ENTRY_FILE),
    rule(Bottle, Import(&["from bottle import", "import bottle"]), WEIGHT_IMPORT),
    rule(Bottle, Dependency("bottle"), WEIGHT_DEPENDENCY),
    rule(Bottle, EntryFile("app.py"), WEIGHT_ENTRY_FILE),
    // node
    rule(
        Express,
        Import(&[
            "require('express')",
            "require(\"express\")",
            "from 'express'",
            "from \"express\"",
        ]),
        WEIGHT_IMPORT,
    ),
    rule(Express, Dependency("express"), WEIGHT_DEPENDENCY),
    rule(Express, EntryFile("server.js"), WEIGHT_ENTRY_FILE),
    rule(Express, EntryFile("app.js"), WEIGHT_ENTRY_FILE),
    rule(Nextjs, Dependency("next"), WEIGHT_DEPENDENCY),
    rule(Nextjs, Marker("next.config.js"), WEIGHT_MARKER),
    rule(Nextjs, Marker("next.config.mjs"), WEIGHT_MARKER),
    rule(React, Dependency("react-scripts"), WEIGHT_DEPENDENCY),
    rule(React, Dependency("react"), WEIGHT_SUPPORTING_DEPENDENCY),
    rule(React, Marker("src/App.js"), WEIGHT_MARKER),
    rule(React, Marker("src/App.jsx"), WEIGHT_MARKER),
    rule(React, Marker("src/App.tsx"), WEIGHT_MARKER),
    rule(Vue, Dependency("vue"), WEIGHT_DEPENDENCY),
    rule(Vue, Marker("vue.config.js"), WEIGHT_MARKER),
    rule(Vue, Marker("src/App.vue"), WEIGHT_MARKER),
    // java
    rule(Spring, Marker("pom.xml"), WEIGHT_MARKER),
    rule(Spring, Marker("build.gradle"), WEIGHT_MARKER),
    rule(Spring, Marker("build.gradle.kts"), WEIGHT_MARKER),
    // php
    rule(Laravel, Dependency("laravel/framework"), WEIGHT_DEPENDENCY),
    rule(Laravel, Dependency("laravel/laravel"), WEIGHT_DEPENDENCY),
    rule(Laravel, Marker("artisan"), WEIGHT_MARKER),
    rule(Symfony, Dependency("symfony/framework-bundle"), WEIGHT_DEPENDENCY),
    rule(Symfony, Dependency("symfony/symfony"), WEIGHT_DEPENDENCY),
    rule(Symfony, Marker("symfony.lock"), WEIGHT_MARKER),
    rule(Symfony, Marker("bin/console"), WEIGHT_MARKER),
];

/// Signals extracted from a repository, the only input to scoring
#[derive(Debug, Clone, Default)]
pub struct Signals {
    /// Relative paths of every scanned file, '/' separated
    pub files: BTreeSet<String>,
    /// Lowercased dependency names from every manifest
    pub dependencies: BTreeSet<String>,
    /// Entry file relative path to its source text
    pub entry_sources: BTreeMap<String, String>,
}

impl Signals {
    fn has_marker(&self, marker: &str) -> Option<&str> {
        self.files
            .iter()
            .find(|path| path.as_str() == marker || file_name(path) == marker)
            .map(String::as_str)
    }

    fn has_entry_file(&self, name: &str) -> Option<&str> {
        self.entry_sources
            .keys()
            .find(|path| file_name(path) == name)
            .map(String::as_str)
    }

    fn import_in(&self, fragments: &[&str]) -> Option<&str> {
        self.entry_sources
            .iter()
            .find(|(_, source)| fragments.iter().any(|f| source.contains(f)))
            .map(|(path, _)| path.as_str())
    }
}

fn file_name(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

/// Evaluate every rule against the signals
///
/// A rule contributes its weight at most once. The result is ordered by score,
/// highest first, then by the framework's declaration order, so filesystem
/// iteration order never affects ranking.
pub fn score(signals: &Signals) -> Vec<FrameworkCandidate> {
    let mut totals: BTreeMap<Framework, (u32, Vec<String>)> = BTreeMap::new();

    for rule in RULES {
        let evidence = match rule.matcher {
            Import(fragments) => signals
                .import_in(fragments)
                .map(|path| format!("{} imported in {}", rule.framework, path)),
            Dependency(name) => signals
                .dependencies
                .contains(name)
                .then(|| format!("dependency {}", name)),
            Marker(marker) => signals
                .has_marker(marker)
                .map(|path| format!("marker file {}", path)),
            EntryFile(name) => signals
                .has_entry_file(name)
                .map(|path| format!("entry file {}", path)),
        };

        if let Some(evidence) = evidence {
            let entry = totals.entry(rule.framework).or_default();
            entry.0 += rule.weight;
            entry.1.push(evidence);
        }
    }

    let mut candidates: Vec<FrameworkCandidate> = totals
        .into_iter()
        .map(|(framework, (score, evidence))| FrameworkCandidate {
            framework,
            score,
            evidence,
        })
        .collect();
    candidates.sort_by(|a, b| b.score.cmp(&a.score).then(a.framework.cmp(&b.framework)));
    candidates
}
