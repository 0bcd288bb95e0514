//! Static per-framework deployment defaults

use crate::models::framework::Framework;
use crate::models::plan::SizeClass;

/// Defaults used when neither the repository nor the user decides
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameworkDefaults {
    pub port: u16,
    pub size: SizeClass,
}

pub fn defaults_for(framework: Framework) -> FrameworkDefaults {
    let (port, size) = match framework {
        Framework::Flask => (5000, SizeClass::Micro),
        Framework::Django => (8000, SizeClass::Micro),
        Framework::Fastapi => (8000, SizeClass::Micro),
        Framework::Bottle => (8080, SizeClass::Micro),
        Framework::Express => (3000, SizeClass::Micro),
        Framework::Nextjs => (3000, SizeClass::Small),
        Framework::React => (3000, SizeClass::Small),
        Framework::Vue => (8080, SizeClass::Small),
        Framework::Spring => (8080, SizeClass::Small),
        Framework::Laravel => (8000, SizeClass::Micro),
        Framework::Symfony => (8000, SizeClass::Micro),
    };
    FrameworkDefaults { port, size }
}

/// Entry file names a framework is usually started from, preferred first
pub fn entry_candidates(framework: Framework) -> &'static [&'static str] {
    match framework {
        Framework::Flask => &["app.py", "wsgi.py", "main.py", "run.py", "server.py", "application.py"],
        Framework::Django => &["manage.py"],
        Framework::Fastapi => &["main.py", "app.py", "asgi.py", "server.py"],
        Framework::Bottle => &["app.py", "main.py", "server.py", "run.py"],
        Framework::Express => &["server.js", "app.js", "index.js", "main.js", "server.ts", "app.ts"],
        Framework::Nextjs
        | Framework::React
        | Framework::Vue
        | Framework::Spring
        | Framework::Laravel
        | Framework::Symfony => &[],
    }
}
