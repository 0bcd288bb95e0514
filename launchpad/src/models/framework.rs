//! Languages and frameworks known to the analyzer

use std::fmt;

use serde::{Deserialize, Serialize};

/// Application language
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    Python,
    Nodejs,
    Java,
    Php,
}

impl Language {
    pub fn as_str(&self) -> &'static str {
        match self {
            Language::Python => "python",
            Language::Nodejs => "nodejs",
            Language::Java => "java",
            Language::Php => "php",
        }
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Supported application frameworks
///
/// Declaration order is the tie-break priority: when two candidates score
/// the same, the one declared first ranks higher.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Framework {
    Flask,
    Django,
    Fastapi,
    Bottle,
    Express,
    Nextjs,
    React,
    Vue,
    Spring,
    Laravel,
    Symfony,
}

impl Framework {
    pub const ALL: [Framework; 11] = [
        Framework::Flask,
        Framework::Django,
        Framework::Fastapi,
        Framework::Bottle,
        Framework::Express,
        Framework::Nextjs,
        Framework::React,
        Framework::Vue,
        Framework::Spring,
        Framework::Laravel,
        Framework::Symfony,
    ];

    pub fn language(&self) -> Language {
        match self {
            Framework::Flask | Framework::Django | Framework::Fastapi | Framework::Bottle => {
                Language::Python
            }
            Framework::Express | Framework::Nextjs | Framework::React | Framework::Vue => {
                Language::Nodejs
            }
            Framework::Spring => Language::Java,
            Framework::Laravel | Framework::Symfony => Language::Php,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Framework::Flask => "flask",
            Framework::Django => "django",
            Framework::Fastapi => "fastapi",
            Framework::Bottle => "bottle",
            Framework::Express => "express",
            Framework::Nextjs => "nextjs",
            Framework::React => "react",
            Framework::Vue => "vue",
            Framework::Spring => "spring",
            Framework::Laravel => "laravel",
            Framework::Symfony => "symfony",
        }
    }

    /// Resolve a user-supplied name, accepting common spellings
    pub fn from_name(name: &str) -> Option<Self> {
        let normalized = name.trim().to_lowercase().replace(['.', '-', ' '], "");
        match normalized.as_str() {
            "flask" => Some(Framework::Flask),
            "django" => Some(Framework::Django),
            "fastapi" => Some(Framework::Fastapi),
            "bottle" => Some(Framework::Bottle),
            "express" | "expressjs" => Some(Framework::Express),
            "next" | "nextjs" => Some(Framework::Nextjs),
            "react" | "reactjs" => Some(Framework::React),
            "vue" | "vuejs" => Some(Framework::Vue),
            "spring" | "springboot" | "maven" | "gradle" => Some(Framework::Spring),
            "laravel" => Some(Framework::Laravel),
            "symfony" => Some(Framework::Symfony),
            _ => None,
        }
    }
}

impl fmt::Display for Framework {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
